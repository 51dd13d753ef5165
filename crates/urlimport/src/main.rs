//! urlimport command line
//!
//! Resolves modules through a fresh import system, downloading whatever is
//! missing locally.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use urlimport::{find_config, HttpFetcher, ImportSystem, ResolverConfig};

#[derive(Parser)]
#[command(name = "urlimport")]
#[command(about = "Fetch modules from remote base URLs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve modules, downloading them if needed
    Fetch {
        /// Dotted module names
        #[arg(required = true)]
        modules: Vec<String>,
        /// Base URL to search (repeatable, searched in order)
        #[arg(short, long = "base-url")]
        base_url: Vec<String>,
        /// Directory modules are downloaded to
        #[arg(short, long)]
        download_path: Option<PathBuf>,
        /// Top-level names allowed to be fetched (repeatable)
        #[arg(short, long)]
        allow: Vec<String>,
        /// Config file (default: nearest urlimport.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Source file extension
        #[arg(long)]
        ext: Option<String>,
        /// Request timeout in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Config file (default: nearest urlimport.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            modules,
            base_url,
            download_path,
            allow,
            config,
            ext,
            timeout,
            json,
        } => {
            let mut resolver_config = match load_config(config)? {
                Some(file_config) if base_url.is_empty() => file_config,
                Some(file_config) => ResolverConfig {
                    search_paths: base_url,
                    ..file_config
                },
                None => ResolverConfig::with_search_paths(base_url),
            };
            if let Some(path) = download_path {
                resolver_config.download_path = path;
            }
            if !allow.is_empty() {
                resolver_config.allowed_modules = Some(allow);
            }
            if let Some(ext) = ext {
                resolver_config.extension = ext;
            }
            resolver_config.validate()?;

            let fetcher = HttpFetcher::with_timeout(std::time::Duration::from_secs(timeout))?;
            let system = ImportSystem::with_extension(&resolver_config.extension);
            let _hook = system.register_hook(resolver_config, Arc::new(fetcher))?;

            let mut resolved = Vec::new();
            for name in &modules {
                let module = system
                    .import(name)
                    .with_context(|| format!("Failed to import '{}'", name))?;
                resolved.push(module);
            }

            if json {
                let handles: Vec<_> = resolved.iter().map(|m| m.as_ref()).collect();
                println!("{}", serde_json::to_string_pretty(&handles)?);
            } else {
                for module in &resolved {
                    println!("{} -> {}", module.name, module.origin.display());
                }
            }
        }
        Commands::Config { config } => match load_config(config)? {
            Some(config) => print!("{}", config.to_toml_string()?),
            None => anyhow::bail!("No urlimport.toml found"),
        },
    }

    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<Option<ResolverConfig>> {
    let path = match explicit {
        Some(path) => Some(path),
        None => find_config(&std::env::current_dir()?),
    };

    match path {
        Some(path) => {
            let config = ResolverConfig::from_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(Some(config))
        }
        None => Ok(None),
    }
}
