//! Dotted module names
//!
//! Validates names like `pkg.sub` and maps them onto relative file paths.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while parsing a module name
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    /// Empty module name
    #[error("Module name is empty")]
    Empty,

    /// A component between dots is empty (e.g. `a..b`)
    #[error("Empty component in module name: {0}")]
    EmptyComponent(String),

    /// A component is not a valid identifier
    #[error("Invalid component '{component}' in module name: {name}")]
    InvalidComponent { name: String, component: String },

    /// A dotted name where only a top-level name is accepted
    #[error("Expected a top-level module name, got: {0}")]
    NotTopLevel(String),
}

/// A validated dotted module name (`pkg`, `pkg.sub`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ModuleName(String);

impl ModuleName {
    /// Parse and validate a dotted module name
    pub fn parse(name: &str) -> Result<Self, NameError> {
        if name.is_empty() {
            return Err(NameError::Empty);
        }

        for component in name.split('.') {
            if component.is_empty() {
                return Err(NameError::EmptyComponent(name.to_string()));
            }
            if !is_identifier(component) {
                return Err(NameError::InvalidComponent {
                    name: name.to_string(),
                    component: component.to_string(),
                });
            }
        }

        Ok(Self(name.to_string()))
    }

    /// Parse a name that must not contain dots
    pub fn parse_top_level(name: &str) -> Result<Self, NameError> {
        let parsed = Self::parse(name)?;
        if !parsed.is_top_level() {
            return Err(NameError::NotTopLevel(name.to_string()));
        }
        Ok(parsed)
    }

    /// The full dotted name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The substring before the first dot, or the whole name
    pub fn top_level(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }

    /// The last component
    pub fn last(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// The enclosing package, if any (`a.b.c` -> `a.b`)
    pub fn parent(&self) -> Option<ModuleName> {
        self.0
            .rsplit_once('.')
            .map(|(parent, _)| ModuleName(parent.to_string()))
    }

    /// Iterate over the dotted components
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Whether this is a top-level name (no dots)
    pub fn is_top_level(&self) -> bool {
        !self.0.contains('.')
    }

    /// `a.b.c` -> `a/b/c`
    ///
    /// Always uses `/` so the result can be appended to a URL.
    pub fn to_relative_path(&self) -> String {
        self.0.replace('.', "/")
    }

    /// Remote subpaths to try, in order: package form, then plain module
    ///
    /// `pkg.sub` with extension `py` yields `pkg/sub/__init__.py` and
    /// `pkg/sub.py`.
    pub fn candidate_subpaths(&self, extension: &str) -> [String; 2] {
        let as_path = self.to_relative_path();
        [
            format!("{}/__init__.{}", as_path, extension),
            format!("{}.{}", as_path, extension),
        ]
    }

    /// The local path of a subpath relative to a download directory
    pub fn subpath_to_local(subpath: &str) -> PathBuf {
        subpath.split('/').collect()
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ModuleName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ModuleName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
