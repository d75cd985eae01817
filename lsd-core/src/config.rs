//! TOML config files shared by `lsd` and `lsdd`.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Default locations of `file`: `~/.config/lsd/<file>`, then `/etc/lsd/<file>`.
pub fn config_paths(file: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = std::env::var_os("HOME") {
        out.push(PathBuf::from(h).join(".config/lsd").join(file));
    }
    out.push(Path::new("/etc/lsd").join(file));
    out
}

pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str::<T>(&s).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Parse `explicit`, else the first of `candidates` that exists, else `T::default()`.
/// An explicit path that cannot be read is an error.
pub fn load_or_default<T: DeserializeOwned + Default>(
    explicit: Option<&Path>,
    candidates: &[PathBuf],
) -> Result<T, ConfigError> {
    let file = match explicit {
        Some(p) => Some(p),
        None => candidates.iter().map(PathBuf::as_path).find(|p| p.exists()),
    };
    match file {
        Some(p) => load_file(p),
        None => Ok(T::default()),
    }
}

/// Port from an environment value; `None` (with a warning) if it does not parse.
pub fn env_port(name: &str, value: &str) -> Option<u16> {
    match value.parse::<u16>() {
        Ok(p) => Some(p),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a port", name, value);
            None
        }
    }
}
