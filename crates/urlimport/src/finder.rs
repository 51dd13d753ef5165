//! Finder chain entries
//!
//! An [`ImportSystem`](crate::ImportSystem) asks each [`Finder`] in order
//! until one produces a module.

use crate::loader::{ModuleHandle, NativeLoader};
use crate::name::ModuleName;
use crate::registry::ImportError;
use std::path::PathBuf;
use std::sync::Arc;

/// One resolution strategy in the chain
pub trait Finder: Send + Sync {
    /// Try to produce `name`
    ///
    /// `search_path` holds the directories that directly contain `name`: the
    /// import system's local search path for a top-level name, the parent
    /// package's search locations for a submodule. `Ok(None)` passes the
    /// name on to the next finder.
    fn find_spec(
        &self,
        name: &ModuleName,
        search_path: &[PathBuf],
    ) -> Result<Option<ModuleHandle>, ImportError>;

    /// Drop any memoized lookup state
    fn invalidate_caches(&self) {}
}

/// Finder over the local search path
///
/// Always the first entry of the chain.
pub struct PathFinder {
    loader: Arc<dyn NativeLoader>,
}

impl PathFinder {
    /// Create a finder backed by `loader`
    pub fn new(loader: Arc<dyn NativeLoader>) -> Self {
        Self { loader }
    }
}

impl Finder for PathFinder {
    fn find_spec(
        &self,
        name: &ModuleName,
        search_path: &[PathBuf],
    ) -> Result<Option<ModuleHandle>, ImportError> {
        Ok(self.loader.find_spec(name, search_path)?)
    }

    fn invalidate_caches(&self) {
        self.loader.invalidate_caches();
    }
}
