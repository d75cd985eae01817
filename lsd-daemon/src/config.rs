//! Load daemon config from file and environment.

use std::path::{Path, PathBuf};

use lsd_core::config;
pub use lsd_core::config::ConfigError;
use lsd_core::{RequestKind, DEFAULT_PORT};
use serde::Deserialize;

/// Daemon configuration. File: ~/.config/lsd/lsdd.toml or /etc/lsd/lsdd.toml.
/// Env overrides: LSD_PORT, LSD_PUBLIC_KEY, LSD_DRY_RUN.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// UDP listen port (default 6969).
    #[serde(default = "default_port")]
    pub port: u16,
    /// PEM public key that verifies request signatures.
    #[serde(default = "default_public_key")]
    pub public_key: PathBuf,
    /// How long to wait for a user to confirm a non-forced action.
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,
    /// Log actions instead of performing them.
    #[serde(default)]
    pub dry_run: bool,
    /// Actions refused even when correctly signed.
    #[serde(default)]
    pub disabled: Vec<RequestKind>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_public_key() -> PathBuf {
    PathBuf::from("/etc/lsd/public.pem")
}
fn default_confirm_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_key: default_public_key(),
            confirm_timeout_secs: default_confirm_timeout(),
            dry_run: false,
            disabled: Vec::new(),
        }
    }
}

/// Load config: defaults, then `explicit` or the first existing default file, then env vars.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut c: Config = config::load_or_default(explicit, &config::config_paths("lsdd.toml"))?;
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("LSD_PORT").and_then(|s| config::env_port("LSD_PORT", &s)) {
        c.port = p;
    }
    if let Some(s) = var("LSD_PUBLIC_KEY") {
        c.public_key = PathBuf::from(s);
    }
    if let Some(s) = var("LSD_DRY_RUN") {
        c.dry_run = matches!(s.as_str(), "1" | "true" | "yes");
    }
}
