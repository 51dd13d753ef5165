//! urlimport: remote module import hook
//!
//! This crate provides a resolver that plugs into an ordered chain of module
//! finders. When every local strategy has failed, it fetches module source
//! from one or more base URLs, persists it under a download directory, and
//! hands the file to the native loader:
//! - Dotted module name validation and candidate path construction
//! - Remote resolution with whitelist filtering
//! - Local filesystem loader with invalidatable directory caches
//! - Import system with exclusive hook registration and scoped handles
//! - TOML configuration and a blocking HTTP transport

pub mod config;
pub mod fetch;
pub mod finder;
pub mod loader;
pub mod name;
pub mod registry;
pub mod resolver;

pub use config::{find_config, ConfigError, ResolverConfig, CONFIG_FILE_NAME, DEFAULT_EXTENSION};
pub use fetch::{Fetch, FetchError, FetchResponse, HttpFetcher, MAX_CONTENT_SIZE, REQUEST_TIMEOUT};
pub use finder::{Finder, PathFinder};
pub use loader::{ModuleHandle, NativeLoader, PathLoader};
pub use name::{ModuleName, NameError};
pub use registry::{HookHandle, ImportError, ImportSystem};
pub use resolver::{RemoteResolver, ResolveError};
