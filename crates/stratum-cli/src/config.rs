//! Configuration file handling for stratum.
//!
//! The nearest `.config/stratum.styx` at or above the working directory wins.

pub use stratum_config::Config;

use camino::{Utf8Path, Utf8PathBuf};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stratum::{LockKey, Settings};

/// Where schema sources live when nothing says otherwise.
pub const DEFAULT_SOURCES_DIR: &str = "schema";

/// The config file, relative to the project root.
pub const CONFIG_FILE: &str = ".config/stratum.styx";

/// Load the nearest config file at or above the working directory.
pub fn load() -> Result<(Config, PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: PathBuf::from("."),
        source,
    })?;
    load_from(&cwd)
}

/// Load the nearest config file at or above `start`.
pub fn load_from(start: &Path) -> Result<(Config, PathBuf), ConfigError> {
    let path = locate(start).ok_or(ConfigError::NotFound)?;
    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let config = facet_styx::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;
    Ok((config, path))
}

/// Like [`load`], but a missing file means an empty configuration.
pub fn load_or_default() -> Result<(Config, Option<PathBuf>), ConfigError> {
    match load() {
        Ok((config, path)) => Ok((config, Some(path))),
        Err(ConfigError::NotFound) => Ok((Config::default(), None)),
        Err(e) => Err(e),
    }
}

fn locate(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
}

/// Overlay the file's values on the built-in defaults.
pub fn settings(config: &Config) -> Settings {
    let mut settings = Settings::default();

    if let Some(name) = &config.schema.name {
        settings.schema = name.clone();
    }
    if let Some(version) = &config.schema.version {
        settings.schema_version = version.clone();
    }
    if let Some(extensions) = &config.schema.extensions {
        settings.extensions = extensions.clone();
    }

    if let Some(key) = config.lock.key {
        settings.lock_key = LockKey(key);
    } else if let Some(name) = &config.lock.name {
        settings.lock_key = LockKey::from_name(name);
    }
    if let Some(ms) = config.lock.timeout_ms {
        settings.lock_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = config.lock.poll_interval_ms {
        settings.poll_interval = Duration::from_millis(ms);
    }

    if let Some(min) = config.verify.min_tables {
        settings.min_table_count = min as usize;
    }
    if let Some(tables) = &config.verify.tables {
        settings.critical_tables = tables.clone();
    }
    if let Some(functions) = &config.verify.functions {
        settings.critical_functions = functions.clone();
    }
    match config.verify.view.as_deref() {
        Some("") => settings.compatibility_view = None,
        Some(view) => settings.compatibility_view = Some(view.to_string()),
        None => {}
    }

    if let Some(ms) = config.run.statement_timeout_ms {
        settings.statement_timeout = Some(Duration::from_millis(ms));
    }

    settings
}

/// The sources directory: the command-line flag, else the configured one
/// relative to the project root (the directory holding `.config/`), else
/// `schema` in the working directory.
pub fn sources_dir(
    flag: Option<&Utf8Path>,
    config: &Config,
    config_path: Option<&Path>,
) -> Utf8PathBuf {
    if let Some(dir) = flag {
        return dir.to_owned();
    }
    let configured = config.schema.sources.as_deref().unwrap_or(DEFAULT_SOURCES_DIR);
    let root = config_path
        .and_then(|path| path.parent())
        .and_then(|dot_config| dot_config.parent())
        .and_then(|root| Utf8Path::from_path(root));
    match root {
        Some(root) => root.join(configured),
        None => Utf8PathBuf::from(configured),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no .config/stratum.styx in the current directory or any parent")]
    NotFound,

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },
}
