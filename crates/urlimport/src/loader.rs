//! Native (local filesystem) module loading
//!
//! [`PathLoader`] finds a module in a list of directories that directly
//! contain it. For a top-level name those are the search path roots; for a
//! submodule they are the parent package's search locations. Only the last
//! name component is looked up, in the two layouts the remote resolver
//! persists:
//! - `<dir>/b/__init__.<ext>` (package)
//! - `<dir>/b.<ext>` (plain module)
//!
//! Directory listings are memoized, so a directory that was listed before a
//! file was written into it keeps reporting a miss until
//! [`NativeLoader::invalidate_caches`] is called.

use crate::name::ModuleName;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A loaded module, ready to be handed to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleHandle {
    /// Full dotted name
    pub name: ModuleName,
    /// Path of the source file the module was loaded from
    pub origin: PathBuf,
    /// Whether the module is a package (`__init__` form)
    pub is_package: bool,
    /// Directories searched for submodules (packages only)
    pub search_locations: Vec<PathBuf>,
    /// Module source text
    #[serde(skip)]
    pub source: String,
}

impl ModuleHandle {
    /// Module source text
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Host loader over local directories
pub trait NativeLoader: Send + Sync {
    /// Find the last component of `name` in the given directories, in order
    fn find_spec(&self, name: &ModuleName, dirs: &[PathBuf]) -> io::Result<Option<ModuleHandle>>;

    /// Source file extension (without the dot)
    fn extension(&self) -> &str;

    /// Forget memoized directory state, including cached misses
    fn invalidate_caches(&self);
}

type Listing = Arc<HashSet<OsString>>;

/// Filesystem loader with memoized directory listings
#[derive(Debug)]
pub struct PathLoader {
    extension: String,
    listings: Mutex<HashMap<PathBuf, Listing>>,
}

impl PathLoader {
    /// Create a loader for source files with the given extension
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            listings: Mutex::new(HashMap::new()),
        }
    }

    /// Number of directories with a memoized listing
    pub fn cached_dirs(&self) -> usize {
        self.listings.lock().len()
    }

    fn listing(&self, dir: &Path) -> Listing {
        let mut listings = self.listings.lock();
        if let Some(listing) = listings.get(dir) {
            return Arc::clone(listing);
        }

        // A missing directory is remembered as empty
        let entries: HashSet<OsString> = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name())
                .collect(),
            Err(_) => HashSet::new(),
        };

        let listing = Arc::new(entries);
        listings.insert(dir.to_path_buf(), Arc::clone(&listing));
        listing
    }

    /// Locate the source file of `name` directly inside `dir`
    fn locate(&self, name: &ModuleName, dir: &Path) -> Option<(PathBuf, bool)> {
        let last = name.last();
        let listing = self.listing(dir);

        // Package form first
        if listing.contains(OsStr::new(last)) {
            let package_dir = dir.join(last);
            let init = format!("__init__.{}", self.extension);
            if self.listing(&package_dir).contains(OsStr::new(&init)) {
                return Some((package_dir.join(init), true));
            }
        }

        let file = format!("{}.{}", last, self.extension);
        if listing.contains(OsStr::new(&file)) {
            return Some((dir.join(file), false));
        }

        None
    }
}

impl NativeLoader for PathLoader {
    fn find_spec(&self, name: &ModuleName, dirs: &[PathBuf]) -> io::Result<Option<ModuleHandle>> {
        for dir in dirs {
            let Some((origin, is_package)) = self.locate(name, dir) else {
                continue;
            };

            let source = fs::read_to_string(&origin)?;
            let search_locations = match origin.parent() {
                Some(dir) if is_package => vec![dir.to_path_buf()],
                _ => Vec::new(),
            };

            tracing::debug!(module = %name, origin = %origin.display(), "found local module");
            return Ok(Some(ModuleHandle {
                name: name.clone(),
                origin,
                is_package,
                search_locations,
                source,
            }));
        }

        Ok(None)
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    fn invalidate_caches(&self) {
        let mut listings = self.listings.lock();
        tracing::trace!(dirs = listings.len(), "invalidating directory listings");
        listings.clear();
    }
}
