//! Named package versions a sandbox can be configured with

use crate::{Configuration, Locator};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

const BUILTIN_CATALOG: &str = include_str!("../catalog.toml");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Catalog contains no versions")]
    Empty,

    #[error("Version '{0}' is listed more than once")]
    DuplicateVersion(String),

    #[error("Version '{version}' refers to unknown demo '{demo}'")]
    UnknownDemo { version: String, demo: String },
}

/// On-disk layout of a catalog
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
    /// Demo programs keyed by name, shared between versions.
    #[serde(default)]
    pub demos: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub name: String,
    pub locators: Vec<Locator>,
    #[serde(default)]
    pub demo: Option<String>,
}

/// One selectable version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    pub name: String,
    pub configuration: Configuration,
    pub demo: Option<String>,
}

impl Preset {
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}

/// Ordered list of presets; the first one is the default.
#[derive(Debug, Clone)]
pub struct Catalog {
    presets: Vec<Preset>,
}

impl Catalog {
    /// Catalog shipped with the crate.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(text)?;
        Self::from_file(file)
    }

    pub fn from_file(file: CatalogFile) -> Result<Self, CatalogError> {
        if file.versions.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::new();
        let mut presets = Vec::with_capacity(file.versions.len());
        for entry in file.versions {
            if !seen.insert(entry.name.clone()) {
                return Err(CatalogError::DuplicateVersion(entry.name));
            }
            let demo = match entry.demo {
                Some(demo) => match file.demos.get(&demo) {
                    Some(source) => Some(source.clone()),
                    None => {
                        return Err(CatalogError::UnknownDemo {
                            version: entry.name,
                            demo,
                        })
                    }
                },
                None => None,
            };
            presets.push(Preset {
                name: entry.name,
                configuration: Configuration::new(entry.locators),
                demo,
            });
        }

        tracing::debug!(versions = presets.len(), "Loaded catalog");
        Ok(Self { presets })
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.iter().map(|preset| preset.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.iter().find(|preset| preset.name == name)
    }

    pub fn default_preset(&self) -> &Preset {
        // `from_file` rejects empty catalogs
        &self.presets[0]
    }
}
