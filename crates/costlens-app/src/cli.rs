//! CLI argument definitions for the costlens binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Costlens - ask questions about multi-cloud project costs in plain language.
#[derive(Parser, Debug)]
#[command(name = "costlens", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Load sample data if the database is empty.
    #[arg(long = "seed")]
    pub seed: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > COSTLENS_CONFIG env var > ~/.costlens/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.resolve_config_path_with(|key| std::env::var(key).ok())
    }

    fn resolve_config_path_with<F>(&self, lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = lookup("COSTLENS_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path(lookup("HOME"))
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > COSTLENS_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.resolve_port_with(config_port, |key| std::env::var(key).ok())
    }

    fn resolve_port_with<F>(&self, config_port: u16, lookup: F) -> u16
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = self.port {
            return p;
        }
        if let Some(p) = lookup("COSTLENS_PORT").and_then(|v| v.parse::<u16>().ok()) {
            return p;
        }
        config_port
    }

    /// Resolve the data directory. `None` keeps the config value.
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level. `None` keeps the config value.
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Default config file path under the user's home directory.
fn default_config_path(home: Option<String>) -> PathBuf {
    match home {
        Some(home) => PathBuf::from(home).join(".costlens").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

/// Expand a leading `~/` to `home`.
pub fn expand_home(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        (Some(rest), None) => PathBuf::from(".").join(rest),
        _ => PathBuf::from(path),
    }
}
