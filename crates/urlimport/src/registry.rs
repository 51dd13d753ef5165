//! Import system and hook registration
//!
//! An [`ImportSystem`] owns the finder chain, the local search path and the
//! cache of imported modules. At most one [`RemoteResolver`] can be
//! registered on it at a time; registration returns a [`HookHandle`] that
//! unregisters the resolver when dropped.
//!
//! ```ignore
//! use std::sync::Arc;
//! use urlimport::{HttpFetcher, ImportSystem, ResolverConfig};
//!
//! let system = ImportSystem::new();
//! let hook = system.register_hook(
//!     ResolverConfig::new("https://example.com/modules").download_path("vendor"),
//!     Arc::new(HttpFetcher::new()?),
//! )?;
//!
//! let module = system.import("regular_module.submodule")?;
//! println!("{}", module.origin.display());
//!
//! drop(hook); // unregistered; imported modules stay cached
//! ```

use crate::config::{ConfigError, ResolverConfig, DEFAULT_EXTENSION};
use crate::fetch::Fetch;
use crate::finder::{Finder, PathFinder};
use crate::loader::{ModuleHandle, NativeLoader, PathLoader};
use crate::name::{ModuleName, NameError};
use crate::resolver::{RemoteResolver, ResolveError};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the import system
#[derive(Debug, Error)]
pub enum ImportError {
    /// A resolver is already registered
    #[error("import hook is already registered, unregister the existing hook first")]
    AlreadyRegistered,

    /// No resolver is registered
    #[error("import hook is not registered")]
    NotRegistered,

    /// No finder could produce the module
    #[error("No module named '{0}'")]
    ModuleNotFound(String),

    /// Submodule requested from a plain module
    #[error("No module named '{name}': '{parent}' is not a package")]
    NotAPackage { name: String, parent: String },

    /// Invalid module name
    #[error("Invalid module name: {0}")]
    InvalidName(#[from] NameError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Remote resolution failed
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Local loading failed
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

struct SystemState {
    /// Finder chain, consulted in order
    finders: Vec<Arc<dyn Finder>>,
    /// Local directories, de-duplicated
    search_path: Vec<PathBuf>,
    /// Imported modules
    modules: HashMap<ModuleName, Arc<ModuleHandle>>,
    /// The registered remote resolver, if any
    active: Option<Arc<RemoteResolver>>,
}

/// Host-side module lookup: finder chain, search path and module cache
///
/// Cloning yields another handle to the same system.
#[derive(Clone)]
pub struct ImportSystem {
    state: Arc<RwLock<SystemState>>,
    loader: Arc<dyn NativeLoader>,
}

impl Default for ImportSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportSystem {
    /// Create an import system for the default source extension
    pub fn new() -> Self {
        Self::with_extension(DEFAULT_EXTENSION)
    }

    /// Create an import system whose local loader recognizes `extension`
    pub fn with_extension(extension: &str) -> Self {
        Self::with_loader(Arc::new(PathLoader::new(extension)))
    }

    /// Create an import system on top of a custom native loader
    pub fn with_loader(loader: Arc<dyn NativeLoader>) -> Self {
        let path_finder: Arc<dyn Finder> = Arc::new(PathFinder::new(Arc::clone(&loader)));
        let state = SystemState {
            finders: vec![path_finder],
            search_path: Vec::new(),
            modules: HashMap::new(),
            active: None,
        };

        Self {
            state: Arc::new(RwLock::new(state)),
            loader,
        }
    }

    /// Register a remote resolver at the end of the finder chain
    ///
    /// Fails with [`ImportError::AlreadyRegistered`] if one is active, and
    /// with a configuration error if `config.extension` is not the one this
    /// system's loader recognizes. When `config.update_search_path` is set,
    /// the download directory is also appended to the local search path, so
    /// modules already on disk are found without a network round-trip.
    pub fn register_hook(
        &self,
        config: ResolverConfig,
        fetcher: Arc<dyn Fetch>,
    ) -> Result<HookHandle, ImportError> {
        if self.state.read().active.is_some() {
            return Err(ImportError::AlreadyRegistered);
        }

        let resolver = Arc::new(RemoteResolver::new(
            &config,
            fetcher,
            Arc::clone(&self.loader),
        )?);

        let mut state = self.state.write();
        if state.active.is_some() {
            return Err(ImportError::AlreadyRegistered);
        }

        state.finders.push(resolver.clone());
        state.active = Some(Arc::clone(&resolver));
        if config.update_search_path {
            push_unique(&mut state.search_path, resolver.download_path());
        }

        tracing::debug!(
            search_paths = ?resolver.search_paths(),
            download_path = %resolver.download_path().display(),
            "registered import hook"
        );

        Ok(HookHandle {
            system: self.clone(),
            resolver,
            update_search_path: config.update_search_path,
        })
    }

    /// Remove the active resolver from the chain
    ///
    /// No-op when nothing is registered. Already imported modules stay
    /// available. Returns whether a resolver was removed.
    pub fn unregister_hook(&self) -> bool {
        let mut state = self.state.write();
        let Some(active) = state.active.take() else {
            return false;
        };

        state.finders.retain(|finder| !same_object(finder, &active));
        tracing::debug!("unregistered import hook");
        true
    }

    /// Whether a resolver is currently registered
    pub fn is_registered(&self) -> bool {
        self.state.read().active.is_some()
    }

    /// The registered resolver, if any
    pub fn active_resolver(&self) -> Option<Arc<RemoteResolver>> {
        self.state.read().active.clone()
    }

    /// Add a name to the active resolver's whitelist
    pub fn add_module(&self, name: &str) -> Result<(), ImportError> {
        self.add_modules([name])
    }

    /// Add several names to the active resolver's whitelist
    pub fn add_modules<I, S>(&self, names: I) -> Result<(), ImportError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let resolver = self.active_resolver().ok_or(ImportError::NotRegistered)?;
        resolver.add_modules(names)?;
        Ok(())
    }

    /// The active resolver's whitelist (`None` = unrestricted)
    pub fn available_modules(&self) -> Result<Option<BTreeSet<String>>, ImportError> {
        let resolver = self.active_resolver().ok_or(ImportError::NotRegistered)?;
        Ok(resolver.available_modules())
    }

    /// Import a module by dotted name
    ///
    /// Returns the cached module if it was imported before. Otherwise the
    /// parent package is imported first, then each finder is asked in order.
    /// Top-level names are searched on the local search path; submodules
    /// only in their parent package's search locations.
    pub fn import(&self, name: &str) -> Result<Arc<ModuleHandle>, ImportError> {
        let name = ModuleName::parse(name)?;
        self.import_module(&name)
    }

    /// Import an already validated name
    pub fn import_module(&self, name: &ModuleName) -> Result<Arc<ModuleHandle>, ImportError> {
        if let Some(module) = self.state.read().modules.get(name) {
            return Ok(Arc::clone(module));
        }

        let package_path = match name.parent() {
            Some(parent) => {
                let parent_module = self.import_module(&parent)?;
                if !parent_module.is_package {
                    return Err(ImportError::NotAPackage {
                        name: name.to_string(),
                        parent: parent.to_string(),
                    });
                }
                Some(parent_module.search_locations.clone())
            }
            None => None,
        };

        // Snapshot so finders run without holding the lock
        let (finders, search_path) = {
            let state = self.state.read();
            let search_path = package_path.unwrap_or_else(|| state.search_path.clone());
            (state.finders.clone(), search_path)
        };

        for finder in &finders {
            if let Some(module) = finder.find_spec(name, &search_path)? {
                let mut state = self.state.write();
                let module = state
                    .modules
                    .entry(name.clone())
                    .or_insert_with(|| Arc::new(module));
                return Ok(Arc::clone(module));
            }
        }

        Err(ImportError::ModuleNotFound(name.to_string()))
    }

    /// Whether `name` has been imported
    pub fn is_loaded(&self, name: &str) -> bool {
        ModuleName::parse(name)
            .map(|name| self.state.read().modules.contains_key(&name))
            .unwrap_or(false)
    }

    /// Names of imported modules, sorted
    pub fn loaded_modules(&self) -> Vec<ModuleName> {
        let mut names: Vec<_> = self.state.read().modules.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop `name` and its submodules from the module cache
    ///
    /// Returns how many entries were removed. The files on disk are kept.
    pub fn forget(&self, name: &str) -> usize {
        let prefix = format!("{}.", name);
        let mut state = self.state.write();
        let before = state.modules.len();
        state
            .modules
            .retain(|key, _| key.as_str() != name && !key.as_str().starts_with(&prefix));
        before - state.modules.len()
    }

    /// Local directories searched by the first finder
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.state.read().search_path.clone()
    }

    /// Append a directory to the local search path, unless already present
    pub fn add_search_path(&self, dir: &Path) {
        push_unique(&mut self.state.write().search_path, dir);
    }

    /// Remove a directory from the local search path
    ///
    /// Returns whether it was present.
    pub fn remove_search_path(&self, dir: &Path) -> bool {
        let mut state = self.state.write();
        let before = state.search_path.len();
        state.search_path.retain(|p| p != dir);
        state.search_path.len() != before
    }

    /// Number of finders in the chain
    pub fn finder_count(&self) -> usize {
        self.state.read().finders.len()
    }

    /// Clear memoized lookup state in every finder
    pub fn invalidate_caches(&self) {
        let finders = self.state.read().finders.clone();
        for finder in finders {
            finder.invalidate_caches();
        }
    }

    /// Register a hook for the duration of `f`
    ///
    /// The hook is unregistered when `f` returns or panics.
    pub fn scoped<R>(
        &self,
        config: ResolverConfig,
        fetcher: Arc<dyn Fetch>,
        f: impl FnOnce(&HookHandle) -> R,
    ) -> Result<R, ImportError> {
        let hook = self.register_hook(config, fetcher)?;
        Ok(f(&hook))
    }

    fn reregister(
        &self,
        resolver: &Arc<RemoteResolver>,
        update_search_path: bool,
    ) -> Result<(), ImportError> {
        let mut state = self.state.write();
        match &state.active {
            Some(active) if Arc::ptr_eq(active, resolver) => Ok(()),
            Some(_) => Err(ImportError::AlreadyRegistered),
            None => {
                state.finders.push(resolver.clone());
                state.active = Some(Arc::clone(resolver));
                if update_search_path {
                    push_unique(&mut state.search_path, resolver.download_path());
                }
                tracing::debug!("re-registered import hook");
                Ok(())
            }
        }
    }

    fn holds(&self, resolver: &Arc<RemoteResolver>) -> bool {
        matches!(&self.state.read().active, Some(active) if Arc::ptr_eq(active, resolver))
    }
}

/// Registration of a [`RemoteResolver`] on an [`ImportSystem`]
///
/// Dropping the handle unregisters the resolver if it is still the active
/// one.
pub struct HookHandle {
    system: ImportSystem,
    resolver: Arc<RemoteResolver>,
    update_search_path: bool,
}

impl HookHandle {
    /// The registered resolver
    pub fn resolver(&self) -> &Arc<RemoteResolver> {
        &self.resolver
    }

    /// Whether this handle's resolver is the active one
    pub fn is_registered(&self) -> bool {
        self.system.holds(&self.resolver)
    }

    /// Put this handle's resolver back at the end of the chain
    ///
    /// No-op if it is already active; fails if another resolver is. The
    /// download directory is added to the search path again if the original
    /// registration asked for it.
    pub fn register(&self) -> Result<(), ImportError> {
        self.system.reregister(&self.resolver, self.update_search_path)
    }

    /// Remove this handle's resolver from the chain; idempotent
    pub fn unregister(&self) {
        if self.is_registered() {
            self.system.unregister_hook();
        }
    }

    /// Add a name to the whitelist
    pub fn add_module(&self, name: &str) -> Result<(), ImportError> {
        Ok(self.resolver.add_module(name)?)
    }

    /// Add several names to the whitelist
    pub fn add_modules<I, S>(&self, names: I) -> Result<(), ImportError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.resolver.add_modules(names)?)
    }

    /// The whitelist (`None` = unrestricted)
    pub fn available_modules(&self) -> Option<BTreeSet<String>> {
        self.resolver.available_modules()
    }
}

impl Drop for HookHandle {
    fn drop(&mut self) {
        self.unregister();
    }
}

impl std::fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookHandle")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

fn push_unique(paths: &mut Vec<PathBuf>, dir: &Path) {
    if !paths.iter().any(|p| p == dir) {
        paths.push(dir.to_path_buf());
    }
}

fn same_object(finder: &Arc<dyn Finder>, resolver: &Arc<RemoteResolver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(finder) as *const (),
        Arc::as_ptr(resolver) as *const (),
    )
}
