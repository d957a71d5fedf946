//! Package locators and sandbox configurations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque URI naming one package or module the interpreter must load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the locator, without query or fragment.
    ///
    /// For wheel URLs this is the wheel file name, e.g.
    /// `amaranth-0.4.2-py3-none-any.whl`.
    pub fn file_name(&self) -> &str {
        let path = self.0.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/').next().unwrap_or(path)
    }

    /// Distribution name encoded in a wheel-style file name (`name-version-...`).
    pub fn package_name(&self) -> &str {
        let file = self.file_name();
        file.split('-').next().unwrap_or(file)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

impl From<String> for Locator {
    fn from(uri: String) -> Self {
        Self(uri)
    }
}

/// Ordered list of locators applied to a sandbox.
///
/// Equality is ordered-sequence equality: the same locators in a different
/// order are a different configuration, since load side effects happen in
/// list order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    locators: Vec<Locator>,
}

impl Configuration {
    pub fn new<I, L>(locators: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Locator>,
    {
        Self {
            locators: locators.into_iter().map(Into::into).collect(),
        }
    }

    /// Configuration with no extra packages.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn locators(&self) -> &[Locator] {
        &self.locators
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    pub fn contains(&self, locator: &Locator) -> bool {
        self.locators.contains(locator)
    }

    pub fn into_locators(self) -> Vec<Locator> {
        self.locators
    }
}

impl<L: Into<Locator>> FromIterator<L> for Configuration {
    fn from_iter<T: IntoIterator<Item = L>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.locators.iter().map(Locator::file_name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
