//! Integration tests for importing modules through a registered hook
//!
//! A fake server maps URLs to module sources and records every request.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use urlimport::{
    ConfigError, Fetch, FetchError, FetchResponse, HookHandle, ImportError, ImportSystem,
    ResolveError, ResolverConfig,
};

const BASE_URL: &str = "http://127.0.0.1:8000";

/// In-memory module server
struct ModuleServer {
    files: HashMap<String, String>,
    requests: Mutex<Vec<String>>,
}

impl ModuleServer {
    /// Serves one plain module and one package with two submodules
    fn new() -> Arc<Self> {
        let files = [
            ("file_module.py", "def hello():\n    return \"hello from file_module\"\n"),
            (
                "regular_module/__init__.py",
                "hello = lambda: \"hello from regular_module\"\n\
                 from .submodule2 import hello as submodule2_hello\n",
            ),
            (
                "regular_module/submodule.py",
                "def hello():\n    return \"hello from regular_module.submodule\"\n",
            ),
            (
                "regular_module/submodule2.py",
                "def hello():\n    return \"hello from regular_module.submodule2\"\n",
            ),
        ];

        Arc::new(Self {
            files: files
                .into_iter()
                .map(|(path, body)| (format!("{}/{}", BASE_URL, path), body.to_string()))
                .collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Fetch for ModuleServer {
    fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.requests.lock().push(url.to_string());
        Ok(match self.files.get(url) {
            Some(body) => FetchResponse::new(200, body.clone()),
            None => FetchResponse::new(404, "File not found"),
        })
    }
}

struct Fixture {
    system: ImportSystem,
    server: Arc<ModuleServer>,
    hook: HookHandle,
    temp: TempDir,
}

fn hook() -> Fixture {
    let temp = TempDir::new().unwrap();
    let server = ModuleServer::new();
    let system = ImportSystem::new();
    let fetcher: Arc<dyn Fetch> = server.clone();
    let hook = system
        .register_hook(
            ResolverConfig::new(BASE_URL).download_path(temp.path()),
            fetcher,
        )
        .unwrap();

    Fixture {
        system,
        server,
        hook,
        temp,
    }
}

#[test]
fn test_file_module() {
    let fx = hook();

    let module = fx.system.import("file_module").unwrap();

    assert!(!module.is_package);
    assert!(module.source().contains("hello from file_module"));
    assert!(fx.temp.path().join("file_module.py").exists());

    // Package form is requested first and misses
    assert_eq!(
        fx.server.requests(),
        vec![
            format!("{}/file_module/__init__.py", BASE_URL),
            format!("{}/file_module.py", BASE_URL),
        ]
    );
}

#[test]
fn test_regular_module_init() {
    let fx = hook();

    let module = fx.system.import("regular_module").unwrap();

    assert!(module.is_package);
    assert!(module.source().contains("hello from regular_module"));
    assert!(fx
        .temp
        .path()
        .join("regular_module")
        .join("__init__.py")
        .exists());
    assert_eq!(fx.server.request_count(), 1);
}

#[test]
fn test_regular_module_submodule() {
    let fx = hook();

    let module = fx.system.import("regular_module.submodule").unwrap();

    assert!(module
        .source()
        .contains("hello from regular_module.submodule"));
    assert!(fx.system.is_loaded("regular_module"));
    assert!(fx
        .temp
        .path()
        .join("regular_module")
        .join("submodule.py")
        .exists());
}

#[test]
fn test_regular_module_submodule2() {
    let fx = hook();

    fx.system.import("regular_module").unwrap();
    let module = fx.system.import("regular_module.submodule2").unwrap();

    assert!(module
        .source()
        .contains("hello from regular_module.submodule2"));
}

#[test]
fn test_second_import_uses_no_network() {
    let fx = hook();

    let first = fx.system.import("file_module").unwrap();
    let requests = fx.server.request_count();

    // Cached module
    let second = fx.system.import("file_module").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(fx.server.request_count(), requests);

    // Evicted from the module cache, found on the local search path
    assert_eq!(fx.system.forget("file_module"), 1);
    let third = fx.system.import("file_module").unwrap();
    assert_eq!(third.origin, first.origin);
    assert_eq!(fx.server.request_count(), requests);
}

#[test]
fn test_module_whitelist() {
    let fx = hook();
    fx.system.add_module("file_module").unwrap();

    fx.system.import("file_module").unwrap();
    let requests = fx.server.request_count();

    let result = fx.system.import("regular_module");
    assert!(matches!(result, Err(ImportError::ModuleNotFound(_))));
    assert_eq!(fx.server.request_count(), requests);
}

#[test]
fn test_nohook() {
    let server = ModuleServer::new();
    let system = ImportSystem::new();

    let result = system.import("file_module");

    assert!(matches!(result, Err(ImportError::ModuleNotFound(_))));
    assert_eq!(server.request_count(), 0);
}

#[test]
fn test_unregister_hook() {
    let fx = hook();
    assert!(fx.system.unregister_hook());

    let result = fx.system.import("file_module");

    assert!(matches!(result, Err(ImportError::ModuleNotFound(_))));
    assert_eq!(fx.server.request_count(), 0);
}

#[test]
fn test_unregister_keeps_imported_modules() {
    let fx = hook();
    fx.system.import("file_module").unwrap();

    fx.hook.unregister();

    assert!(fx.system.is_loaded("file_module"));
    fx.system.import("file_module").unwrap();
}

#[test]
fn test_available_modules() {
    let fx = hook();
    fx.hook.add_modules(["module1", "module2"]).unwrap();

    let modules = fx.hook.available_modules().unwrap();
    assert!(modules.contains("module1"));
    assert!(!modules.contains("notamodule"));
}

#[test]
fn test_unrestricted_differs_from_empty() {
    let fx = hook();
    assert_eq!(fx.system.available_modules().unwrap(), None);

    let temp = TempDir::new().unwrap();
    let system = ImportSystem::new();
    let fetcher: Arc<dyn Fetch> = ModuleServer::new();
    let _hook = system
        .register_hook(
            ResolverConfig::new(BASE_URL)
                .download_path(temp.path())
                .allowed_modules(Vec::<String>::new()),
            fetcher,
        )
        .unwrap();

    assert_eq!(system.available_modules().unwrap(), Some(Default::default()));
    assert!(system.import("file_module").is_err());
}

#[test]
fn test_scoped_hook() {
    let fx = hook();

    // Leaving the scope unregisters the hook
    {
        let hook = fx.hook;
        fx.system.import("file_module").unwrap();
        assert!(hook.is_registered());
    }

    let result = fx.system.import("regular_module");
    assert!(matches!(result, Err(ImportError::ModuleNotFound(_))));
}

#[test]
fn test_scoped_hook_unregisters_on_panic() {
    let temp = TempDir::new().unwrap();
    let system = ImportSystem::new();
    let fetcher: Arc<dyn Fetch> = ModuleServer::new();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        system
            .scoped(
                ResolverConfig::new(BASE_URL).download_path(temp.path()),
                fetcher,
                |_| panic!("boom"),
            )
            .unwrap();
    }));

    assert!(result.is_err());
    assert!(!system.is_registered());
}

#[test]
fn test_already_downloaded_module_found_locally() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("file_module.py"), "cached = True\n").unwrap();

    let server = ModuleServer::new();
    let system = ImportSystem::new();
    let fetcher: Arc<dyn Fetch> = server.clone();
    let _hook = system
        .register_hook(
            ResolverConfig::new(BASE_URL).download_path(temp.path()),
            fetcher,
        )
        .unwrap();

    let module = system.import("file_module").unwrap();
    assert_eq!(module.source(), "cached = True\n");
    assert_eq!(server.request_count(), 0);
}

#[test]
fn test_miss_then_download_in_listed_directory() {
    let fx = hook();

    // The local finder lists the download directory and caches the miss
    assert!(fx.system.import("nonexistent").is_err());

    // A later download into the same directory must still be found
    let module = fx.system.import("file_module").unwrap();
    assert!(module.source().contains("hello from file_module"));
}

#[test]
fn test_invalid_module_name() {
    let fx = hook();
    let result = fx.system.import("../etc/passwd");
    assert!(matches!(result, Err(ImportError::InvalidName(_))));
    assert_eq!(fx.server.request_count(), 0);
}

#[test]
fn test_custom_extension_round_trip() {
    let temp = TempDir::new().unwrap();
    let system = ImportSystem::with_extension("txt");
    let fetcher: Arc<dyn Fetch> = Arc::new(|url: &str| -> Result<FetchResponse, FetchError> {
        Ok(match url {
            "http://127.0.0.1:8000/notes.txt" => FetchResponse::new(200, "plain text module"),
            _ => FetchResponse::new(404, ""),
        })
    });
    let _hook = system
        .register_hook(
            ResolverConfig::new(BASE_URL)
                .download_path(temp.path())
                .extension("txt"),
            fetcher,
        )
        .unwrap();

    let module = system.import("notes").unwrap();
    assert_eq!(module.source(), "plain text module");
    assert!(temp.path().join("notes.txt").exists());
}

#[test]
fn test_extension_mismatch_rejected_at_registration() {
    let temp = TempDir::new().unwrap();
    let server = ModuleServer::new();
    let system = ImportSystem::new();
    let fetcher: Arc<dyn Fetch> = server.clone();

    let result = system.register_hook(
        ResolverConfig::new(BASE_URL)
            .download_path(temp.path())
            .extension("txt"),
        fetcher,
    );

    assert!(matches!(
        result,
        Err(ImportError::Resolve(ResolveError::Config(
            ConfigError::ExtensionMismatch { .. }
        )))
    ));
    assert!(!system.is_registered());
    assert_eq!(server.request_count(), 0);
}

#[test]
fn test_submodule_comes_from_parent_package() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    for root in [first.path(), second.path()] {
        fs::create_dir_all(root.join("pkg")).unwrap();
    }
    fs::write(first.path().join("pkg").join("__init__.py"), "first").unwrap();
    fs::write(second.path().join("pkg").join("__init__.py"), "second").unwrap();
    fs::write(second.path().join("pkg").join("sub.py"), "second sub").unwrap();

    let system = ImportSystem::new();
    system.add_search_path(first.path());
    system.add_search_path(second.path());

    // The parent resolves from the first root, which has no `sub`
    let parent = system.import("pkg").unwrap();
    assert_eq!(parent.source(), "first");
    assert!(matches!(
        system.import("pkg.sub"),
        Err(ImportError::ModuleNotFound(_))
    ));

    fs::write(first.path().join("pkg").join("sub.py"), "first sub").unwrap();
    system.invalidate_caches();

    let sub = system.import("pkg.sub").unwrap();
    assert_eq!(sub.source(), "first sub");
    assert_eq!(sub.origin, first.path().join("pkg").join("sub.py"));
}

#[test]
fn test_remote_submodule_of_local_package() {
    let fx = hook();
    let local = TempDir::new().unwrap();
    fs::create_dir_all(local.path().join("regular_module")).unwrap();
    fs::write(
        local.path().join("regular_module").join("__init__.py"),
        "local = True\n",
    )
    .unwrap();
    fx.system.add_search_path(local.path());

    fx.system.import("regular_module").unwrap();
    let sub = fx.system.import("regular_module.submodule").unwrap();

    // Downloaded next to the remote package layout and loaded from there
    assert!(sub.source().contains("hello from regular_module.submodule"));
    assert_eq!(
        sub.origin,
        fx.hook
            .resolver()
            .download_path()
            .join("regular_module")
            .join("submodule.py")
    );
}
