//! Settings file for the command line front end

use anyhow::{anyhow, Context, Result};
use hdlplay_common::{Catalog, CatalogFile, Preset, VersionEntry};
use hdlplay_sandbox::EngineSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Contents of `~/.config/hdlplay/config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaygroundConfig {
    /// Version used when none is given on the command line
    #[serde(default)]
    pub default_version: Option<String>,

    /// Base URL of the web playground, for share links
    #[serde(default = "PlaygroundConfig::default_share_base")]
    pub share_base: String,

    #[serde(default)]
    pub engines: EngineSettings,

    /// Replaces the built-in catalog when not empty
    #[serde(default)]
    pub versions: Vec<VersionEntry>,

    #[serde(default)]
    pub demos: BTreeMap<String, String>,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            default_version: None,
            share_base: Self::default_share_base(),
            engines: EngineSettings::default(),
            versions: Vec::new(),
            demos: BTreeMap::new(),
        }
    }
}

impl PlaygroundConfig {
    /// Loads the settings file. An explicitly given path must exist; a
    /// missing default file means default settings.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::config_path()?, false),
        };

        if !explicit && !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        Ok(home.join(".config").join("hdlplay").join("config.toml"))
    }

    /// Versions from the settings file, or the built-in ones.
    pub fn catalog(&self) -> Result<Catalog> {
        let catalog = if self.versions.is_empty() {
            Catalog::builtin()?
        } else {
            Catalog::from_file(CatalogFile {
                versions: self.versions.clone(),
                demos: self.demos.clone(),
            })?
        };
        Ok(catalog)
    }

    /// Resolves the requested version, falling back to the configured
    /// default and then to the first catalog entry.
    pub fn preset<'a>(&self, catalog: &'a Catalog, requested: Option<&str>) -> Result<&'a Preset> {
        match requested.or(self.default_version.as_deref()) {
            Some(name) => catalog.get(name).ok_or_else(|| {
                let known: Vec<&str> = catalog.names().collect();
                anyhow!("Unknown version '{}' (known: {})", name, known.join(", "))
            }),
            None => Ok(catalog.default_preset()),
        }
    }

    fn default_share_base() -> String {
        "https://amaranth-lang.org/play/".to_string()
    }
}
