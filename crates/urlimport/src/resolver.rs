//! Remote module resolution
//!
//! [`RemoteResolver`] is the last entry of the finder chain. For a dotted
//! name it tries, for every base URL in order:
//! 1. `<base>/<a/b>/__init__.<ext>` (package)
//! 2. `<base>/<a/b>.<ext>` (plain module)
//!
//! The first 200 response is written under the download directory at the
//! same relative path, the native loader's directory caches are dropped, and
//! the module is loaded from disk. Submodules are loaded from the package
//! directory the download landed in, never from other search locations.

use crate::config::{ConfigError, ResolverConfig};
use crate::fetch::Fetch;
use crate::finder::Finder;
use crate::loader::{ModuleHandle, NativeLoader};
use crate::name::{ModuleName, NameError};
use crate::registry::ImportError;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during remote resolution
///
/// Transport failures never show up here; they only skip a candidate.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Invalid configuration
    #[error("Invalid resolver configuration: {0}")]
    Config(#[from] ConfigError),

    /// Could not determine the download directory
    #[error("Cannot resolve download path {path}: {source}")]
    DownloadPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fetched source could not be written to disk
    #[error("Failed to persist {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted source could not be loaded back
    #[error("Failed to load module {name}: {source}")]
    Load {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolver that fetches missing modules from base URLs
pub struct RemoteResolver {
    /// Base URLs, each ending with `/`
    search_paths: Vec<String>,
    /// Absolute download directory
    download_path: PathBuf,
    /// Source file extension
    extension: String,
    /// Allowed top-level names (`None` = unrestricted)
    whitelist: RwLock<Option<BTreeSet<String>>>,
    fetcher: Arc<dyn Fetch>,
    loader: Arc<dyn NativeLoader>,
}

impl std::fmt::Debug for RemoteResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteResolver")
            .field("search_paths", &self.search_paths)
            .field("download_path", &self.download_path)
            .field("extension", &self.extension)
            .field("whitelist", &*self.whitelist.read())
            .finish_non_exhaustive()
    }
}

impl RemoteResolver {
    /// Create a resolver from a validated configuration
    ///
    /// The download path is made absolute once, here. An empty path means
    /// the current working directory. The loader must recognize the
    /// configured extension, or persisted files could never be loaded.
    pub fn new(
        config: &ResolverConfig,
        fetcher: Arc<dyn Fetch>,
        loader: Arc<dyn NativeLoader>,
    ) -> Result<Self, ResolveError> {
        config.validate()?;
        if config.extension != loader.extension() {
            return Err(ConfigError::ExtensionMismatch {
                expected: loader.extension().to_string(),
                found: config.extension.clone(),
            }
            .into());
        }

        let download_path = absolute_download_path(&config.download_path)?;
        let whitelist = config
            .allowed_modules
            .as_ref()
            .map(|modules| modules.iter().cloned().collect());

        Ok(Self {
            search_paths: config.normalized_search_paths(),
            download_path,
            extension: config.extension.clone(),
            whitelist: RwLock::new(whitelist),
            fetcher,
            loader,
        })
    }

    /// Base URLs in search order
    pub fn search_paths(&self) -> &[String] {
        &self.search_paths
    }

    /// Absolute download directory
    pub fn download_path(&self) -> &Path {
        &self.download_path
    }

    /// Source file extension
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Allow `name` to be resolved remotely
    ///
    /// Creates the whitelist if the resolver was unrestricted.
    pub fn add_module(&self, name: &str) -> Result<(), NameError> {
        self.add_modules([name])
    }

    /// Allow several names at once
    ///
    /// Only top-level names are accepted, since the whitelist is matched
    /// against the first component. Nothing is added if one is invalid.
    pub fn add_modules<I, S>(&self, names: I) -> Result<(), NameError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| {
                ModuleName::parse_top_level(name.as_ref()).map(|n| n.as_str().to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut whitelist = self.whitelist.write();
        whitelist.get_or_insert_with(BTreeSet::new).extend(names);
        Ok(())
    }

    /// Current whitelist; `None` means every name may be resolved remotely
    pub fn available_modules(&self) -> Option<BTreeSet<String>> {
        self.whitelist.read().clone()
    }

    /// Whether the top-level component of `name` passes the whitelist
    pub fn is_allowed(&self, name: &ModuleName) -> bool {
        match &*self.whitelist.read() {
            Some(allowed) => allowed.contains(name.top_level()),
            None => true,
        }
    }

    /// Fetch, persist and load `name`
    ///
    /// Returns `Ok(None)` when the name is not whitelisted or when no
    /// candidate URL answered 200.
    pub fn resolve(&self, name: &ModuleName) -> Result<Option<ModuleHandle>, ResolveError> {
        if !self.is_allowed(name) {
            tracing::debug!(module = %name, "not in whitelist, skipping remote lookup");
            return Ok(None);
        }

        let subpaths = name.candidate_subpaths(&self.extension);

        for base in &self.search_paths {
            for subpath in &subpaths {
                let url = format!("{}{}", base, subpath);

                let response = match self.fetcher.fetch(&url) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(%url, error = %e, "fetch failed, trying next candidate");
                        continue;
                    }
                };

                if !response.is_success() {
                    tracing::debug!(%url, status = response.status, "candidate not available");
                    continue;
                }

                let local = self.persist(subpath, &response.body)?;
                tracing::info!(module = %name, %url, path = %local.display(), "downloaded module");

                // The loader may have already cached a miss for this directory
                self.loader.invalidate_caches();

                return self
                    .loader
                    .find_spec(name, &[self.containing_dir(name)])
                    .map_err(|source| ResolveError::Load {
                        name: name.to_string(),
                        source,
                    });
            }
        }

        tracing::debug!(module = %name, "no remote candidate found");
        Ok(None)
    }

    /// Local directory that directly holds `name` (`a.b.c` -> `<download>/a/b`)
    fn containing_dir(&self, name: &ModuleName) -> PathBuf {
        match name.parent() {
            Some(parent) => self
                .download_path
                .join(ModuleName::subpath_to_local(&parent.to_relative_path())),
            None => self.download_path.clone(),
        }
    }

    /// Write `body` to `<download_path>/<subpath>`, creating parents
    fn persist(&self, subpath: &str, body: &str) -> Result<PathBuf, ResolveError> {
        let path = self.download_path.join(ModuleName::subpath_to_local(subpath));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ResolveError::Persistence {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        fs::write(&path, body).map_err(|source| ResolveError::Persistence {
            path: path.clone(),
            source,
        })?;

        Ok(path)
    }
}

impl Finder for RemoteResolver {
    fn find_spec(
        &self,
        name: &ModuleName,
        _search_path: &[PathBuf],
    ) -> Result<Option<ModuleHandle>, ImportError> {
        Ok(self.resolve(name)?)
    }
}

fn absolute_download_path(path: &Path) -> Result<PathBuf, ResolveError> {
    let to_error = |source| ResolveError::DownloadPath {
        path: path.to_path_buf(),
        source,
    };

    let absolute = if path.as_os_str().is_empty() {
        std::env::current_dir().map_err(to_error)?
    } else {
        std::path::absolute(path).map_err(to_error)?
    };

    // Canonicalize when possible to handle symlinks consistently
    Ok(absolute.canonicalize().unwrap_or(absolute))
}
