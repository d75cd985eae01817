//! Load client config from file and environment.

use std::path::{Path, PathBuf};

use lsd_core::config;
pub use lsd_core::config::ConfigError;
use lsd_core::DEFAULT_PORT;
use serde::Deserialize;

/// Client configuration. File: ~/.config/lsd/lsd.toml or /etc/lsd/lsd.toml.
/// Env overrides: LSD_PORT, LSD_PRIVATE_KEY.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Daemon port on every target (default 6969).
    #[serde(default = "default_port")]
    pub port: u16,
    /// PEM private key that signs requests.
    #[serde(default = "default_private_key")]
    pub private_key: PathBuf,
    /// Seconds to wait for query replies per try.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Sends of a query while no reply has arrived.
    #[serde(default = "default_tries")]
    pub tries: u32,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_private_key() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".config/lsd/private.pem"),
        None => PathBuf::from("private.pem"),
    }
}
fn default_timeout() -> u64 {
    3
}
fn default_tries() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            private_key: default_private_key(),
            timeout_secs: default_timeout(),
            tries: default_tries(),
        }
    }
}

/// Load config: defaults, then `explicit` or the first existing default file, then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c: Config = config::load_or_default(explicit, &config::config_paths("lsd.toml"))?;
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("LSD_PORT").and_then(|s| config::env_port("LSD_PORT", &s)) {
        c.port = p;
    }
    if let Some(s) = var("LSD_PRIVATE_KEY") {
        c.private_key = PathBuf::from(s);
    }
}
