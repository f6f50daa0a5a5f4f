//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use mockup_shared::constants::{DEFAULT_HTTP_PORT, MIN_CREDITS_TO_GENERATE};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-3-pro-preview";
pub const DEFAULT_GEMINI_FALLBACK_MODEL: &str = "gemini-2.0-flash-thinking-exp-01-21";

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./mockup.db`
    pub database_path: PathBuf,

    /// Env: `GEMINI_API_KEY`
    /// Default: empty (every generation fails with an error marker).
    pub gemini_api_key: Option<String>,

    /// Env: `GEMINI_API_BASE`
    pub gemini_api_base: String,

    /// Env: `GEMINI_MODEL`
    pub gemini_model: String,

    /// Model retried once when the primary one is missing, exhausted or
    /// overloaded.
    /// Env: `GEMINI_FALLBACK_MODEL`
    pub gemini_fallback_model: String,

    /// Directory of reference design images sent with every generation.
    /// Env: `REFERENCE_DESIGNS_DIR`
    /// Default: `./training-designs`
    pub reference_designs_dir: PathBuf,

    /// Balance below which a generation is refused.
    /// Env: `MIN_CREDITS`
    /// Default: `5`
    pub min_credits: i64,

    /// Allow the read-modify-write deduction when the atomic statement is
    /// unavailable. Concurrent generations of one user can then lose a
    /// deduction.
    /// Env: `LEDGER_ALLOW_FALLBACK` (true/false)
    /// Default: `false`
    pub ledger_allow_fallback: bool,

    /// Balance given to a profile created on first sight of a user id.
    /// Env: `STARTING_CREDITS`
    /// Default: `20`
    pub starting_credits: i64,

    /// Maximum request body size in bytes (prompts carry inline images).
    /// Env: `MAX_PROMPT_BYTES`
    /// Default: 10 MiB
    pub max_body_bytes: usize,

    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `10`
    pub rate_limit_per_sec: f64,

    /// Env: `RATE_LIMIT_BURST`
    /// Default: `30`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./mockup.db"),
            gemini_api_key: None,
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_fallback_model: DEFAULT_GEMINI_FALLBACK_MODEL.to_string(),
            reference_designs_dir: PathBuf::from("./training-designs"),
            min_credits: MIN_CREDITS_TO_GENERATE,
            ledger_allow_fallback: false,
            starting_credits: 20,
            max_body_bytes: 10 * 1024 * 1024, // 10 MiB
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(key) = var("GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                config.gemini_api_key = Some(key.trim().to_string());
            }
        }

        if let Some(base) = var("GEMINI_API_BASE") {
            config.gemini_api_base = base.trim_end_matches('/').to_string();
        }

        if let Some(model) = var("GEMINI_MODEL") {
            config.gemini_model = model;
        }

        if let Some(model) = var("GEMINI_FALLBACK_MODEL") {
            config.gemini_fallback_model = model;
        }

        if let Some(dir) = var("REFERENCE_DESIGNS_DIR") {
            config.reference_designs_dir = PathBuf::from(dir);
        }

        if let Some(val) = var("MIN_CREDITS") {
            parse_into(&val, "MIN_CREDITS", &mut config.min_credits);
        }

        if let Some(val) = var("LEDGER_ALLOW_FALLBACK") {
            config.ledger_allow_fallback = val == "true" || val == "1";
        }

        if let Some(val) = var("STARTING_CREDITS") {
            parse_into(&val, "STARTING_CREDITS", &mut config.starting_credits);
        }

        if let Some(val) = var("MAX_PROMPT_BYTES") {
            parse_into(&val, "MAX_PROMPT_BYTES", &mut config.max_body_bytes);
        }

        if let Some(val) = var("RATE_LIMIT_PER_SEC") {
            parse_into(&val, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        }

        if let Some(val) = var("RATE_LIMIT_BURST") {
            parse_into(&val, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: std::str::FromStr>(value: &str, name: &str, slot: &mut T) {
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(value = %value, "Invalid {name}, using default"),
    }
}

// The API key must never end up in logs.
impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "<redacted>"))
            .field("gemini_api_base", &self.gemini_api_base)
            .field("gemini_model", &self.gemini_model)
            .field("gemini_fallback_model", &self.gemini_fallback_model)
            .field("reference_designs_dir", &self.reference_designs_dir)
            .field("min_credits", &self.min_credits)
            .field("ledger_allow_fallback", &self.ledger_allow_fallback)
            .field("starting_credits", &self.starting_credits)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .finish()
    }
}
