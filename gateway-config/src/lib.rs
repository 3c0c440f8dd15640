//! Load configuration from XDG `config.toml` and project `.env`, then apply to the process
//! environment with priority: **existing env > .env > XDG**.
//!
//! Also defines [`GatewayConfig`], the small set of runtime knobs the gateway crates need
//! (upstream base URL, timeouts, default persona, streaming flush size), loaded from the same
//! layered environment.

mod dotenv;
mod xdg_toml;

use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from XDG `config.toml` and optional project `.env`, then sets environment
/// variables only for keys that are **not** already set (so existing env has highest priority).
///
/// Order of precedence when a key is missing in the process environment:
/// 1. Value from project `.env` (current directory or `override_dir` if given)
/// 2. Value from `$XDG_CONFIG_HOME/<app_name>/config.toml` `[env]` table
///
/// * `app_name`: e.g. `"loom"` â€” used for XDG path `~/.config/<app_name>/config.toml`.
/// * `override_dir`: if `Some`, look for `.env` in this directory instead of `std::env::current_dir()`.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    // Collect all keys from both sources; for each, choose value: env > .env > XDG.
    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue; // existing env wins
        }
        let value = dotenv_map
            .get(&key)
            .or_else(|| xdg_map.get(&key))
            .cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

/// Runtime configuration for the gateway, layered on top of [`load_and_apply`].
///
/// Every field has a default so a caller can run with zero configuration; each is
/// overridable via an environment variable of the same name in upper-snake-case
/// (e.g. `GATEWAY_DEFAULT_PERSONA`).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the upstream OpenAI-compatible chat-completions endpoint.
    pub upstream_base_url: String,
    /// Deadline for a non-streaming completion call.
    pub complete_timeout: Duration,
    /// Deadline for a streaming completion call (covers the whole stream, not per-chunk).
    pub stream_timeout: Duration,
    /// Fallback persona line used when neither caller preferences nor a profile supply one.
    pub default_persona: String,
    /// Minimum whitespace-separated tokens buffered before a text-delta event is flushed.
    pub text_flush_word_count: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            upstream_base_url: "https://api.openai.com/v1".to_string(),
            complete_timeout: Duration::from_secs(120),
            stream_timeout: Duration::from_secs(600),
            default_persona: "a helpful assistant".to_string(),
            text_flush_word_count: 6,
        }
    }
}

impl GatewayConfig {
    /// Builds config from defaults overridden by process environment variables.
    ///
    /// Call [`load_and_apply`] first if `.env`/XDG values should participate.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("GATEWAY_UPSTREAM_BASE_URL") {
            cfg.upstream_base_url = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_COMPLETE_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                cfg.complete_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_STREAM_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse::<u64>() {
                cfg.stream_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_DEFAULT_PERSONA") {
            cfg.default_persona = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_TEXT_FLUSH_WORD_COUNT") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.text_flush_word_count = n;
            }
        }
        cfg
    }
}

/// Installs a `tracing` subscriber driven by `RUST_LOG` (defaulting to `info`).
///
/// Mirrors the teacher's CLI/ACP tracing-init helper; intended for binaries, not library code.
#[cfg(feature = "tracing-init")]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
