//! Configuration loader
//!
//! Loads client configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `COURIER_BASE_URL` is missing, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `COURIER_BASE_URL`: Service base URL (required)
//! - `COURIER_TIMEOUT_SECS`: Request timeout in seconds
//! - `COURIER_USER_AGENT`: User agent sent with every request
//! - `COURIER_MAX_BATCH_SIZE`: Requests per batch transfer
//! - `COURIER_BACKOFF_ENABLED`: Whether failed commands are retried (true/false)
//! - `COURIER_MAX_RETRIES`: Retries per command
//! - `COURIER_BASE_DELAY_MS`: First retry delay in milliseconds
//!
//! ## File Locations
//! The loader checks the following paths (in order):
//! 1. `./courier.json` or `./courier.toml` (current working directory)
//! 2. `./config.json` or `./config.toml` (current working directory)
//! 3. The same names relative to the executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use courier_domain::{ClientConfig, CourierError, Result};

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If the base URL is
/// not set there, falls back to loading from a config file.
///
/// # Errors
/// Returns `CourierError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - The loaded configuration fails validation
pub fn load() -> Result<ClientConfig> {
    let config = match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            config
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)?
        }
    };
    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// Only `COURIER_BASE_URL` is required; everything else falls back to the
/// defaults of [`ClientConfig`].
///
/// # Errors
/// Returns `CourierError::Config` if the base URL is missing or a numeric
/// variable does not parse.
pub fn load_from_env() -> Result<ClientConfig> {
    let mut config = ClientConfig::new(env_var("COURIER_BASE_URL")?);

    if let Some(timeout) = env_parse("COURIER_TIMEOUT_SECS", "timeout")? {
        config.timeout_secs = timeout;
    }
    if let Ok(agent) = std::env::var("COURIER_USER_AGENT") {
        config.user_agent = agent;
    }
    if let Some(size) = env_parse("COURIER_MAX_BATCH_SIZE", "batch size")? {
        config.batch.max_batch_size = size;
    }
    config.backoff.enabled = env_bool("COURIER_BACKOFF_ENABLED", config.backoff.enabled);
    if let Some(retries) = env_parse("COURIER_MAX_RETRIES", "retry count")? {
        config.backoff.max_retries = retries;
    }
    if let Some(delay) = env_parse("COURIER_BASE_DELAY_MS", "base delay")? {
        config.backoff.base_delay_ms = delay;
    }

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, checks the default locations for a config file.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `CourierError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<ClientConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CourierError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => find_config_file().ok_or_else(|| {
            CourierError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CourierError::Config(format!("Failed to read config file: {}", e)))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<ClientConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| CourierError::Config(format!("Invalid TOML format: {}", e))),
        "json" => {
            serde_json::from_str(contents).map_err(|e| CourierError::Config(format!("Invalid JSON format: {}", e)))
        }
        _ => Err(CourierError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the current working directory first, then the directory of the
/// running executable.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn find_config_file() -> Option<PathBuf> {
    const NAMES: [&str; 4] = ["courier.json", "courier.toml", "config.json", "config.toml"];

    let mut dirs = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        dirs.push(cwd);
    }
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        dirs.push(exe_dir);
    }

    dirs.iter().flat_map(|dir| NAMES.iter().map(move |name| dir.join(name))).find(|path| path.exists())
}

/// Get required environment variable
///
/// # Errors
/// Returns `CourierError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| CourierError::Config(format!("Missing required environment variable: {}", key)))
}

/// Parse an optional numeric environment variable
fn env_parse<T>(key: &str, what: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CourierError::Config(format!("Invalid {what} in {key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use once_cell::sync::Lazy;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: [&str; 7] = [
        "COURIER_BASE_URL",
        "COURIER_TIMEOUT_SECS",
        "COURIER_USER_AGENT",
        "COURIER_MAX_BATCH_SIZE",
        "COURIER_BACKOFF_ENABLED",
        "COURIER_MAX_RETRIES",
        "COURIER_BASE_DELAY_MS",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        std::env::set_var("COURIER_TEST_BOOL_ON", "ON");
        std::env::set_var("COURIER_TEST_BOOL_OFF", "no");
        std::env::remove_var("COURIER_TEST_BOOL_MISSING");

        assert!(env_bool("COURIER_TEST_BOOL_ON", false));
        assert!(!env_bool("COURIER_TEST_BOOL_OFF", true));
        assert!(env_bool("COURIER_TEST_BOOL_MISSING", true));

        std::env::remove_var("COURIER_TEST_BOOL_ON");
        std::env::remove_var("COURIER_TEST_BOOL_OFF");
    }

    #[test]
    fn test_load_from_env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("COURIER_BASE_URL", "https://api.example.com/");
        std::env::set_var("COURIER_TIMEOUT_SECS", "5");
        std::env::set_var("COURIER_MAX_BATCH_SIZE", "20");
        std::env::set_var("COURIER_BACKOFF_ENABLED", "true");
        std::env::set_var("COURIER_MAX_RETRIES", "6");

        let config = load_from_env().expect("config from env");
        assert_eq!(config.base_url, "https://api.example.com/");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.batch.max_batch_size, 20);
        assert!(config.backoff.enabled);
        assert_eq!(config.backoff.max_retries, 6);
        assert_eq!(config.backoff.base_delay_ms, ClientConfig::default().backoff.base_delay_ms);

        clear_env();
    }

    #[test]
    fn test_load_from_env_missing_base_url() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        let err = load_from_env().unwrap_err();
        assert!(matches!(err, CourierError::Config(_)), "Should be a Config error");
    }

    #[test]
    fn test_load_from_env_invalid_number() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var("COURIER_BASE_URL", "https://api.example.com/");
        std::env::set_var("COURIER_MAX_RETRIES", "several");

        let err = load_from_env().unwrap_err();
        assert!(err.to_string().contains("COURIER_MAX_RETRIES"));

        clear_env();
    }

    #[test]
    fn test_parse_config_json() {
        let json_content = r#"{
            "base_url": "https://api.example.com/",
            "batch": { "max_batch_size": 10 },
            "backoff": { "enabled": true, "jitter": true }
        }"#;

        let config = parse_config(json_content, &PathBuf::from("courier.json")).expect("valid JSON");
        assert_eq!(config.batch.max_batch_size, 10);
        assert!(config.backoff.jitter);
        assert_eq!(config.timeout_secs, ClientConfig::default().timeout_secs);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_content = r#"
base_url = "https://api.example.com/"
user_agent = "people-sync/2.0"

[default_headers]
X-Tenant = "acme"

[backoff]
max_retries = 1
"#;

        let config = parse_config(toml_content, &PathBuf::from("courier.toml")).expect("valid TOML");
        assert_eq!(config.user_agent, "people-sync/2.0");
        assert_eq!(config.default_headers.get("X-Tenant").map(String::as_str), Some("acme"));
        assert_eq!(config.backoff.max_retries, 1);
    }

    #[test]
    fn test_parse_config_unsupported_format() {
        let result = parse_config("base_url: x", &PathBuf::from("courier.yaml"));
        assert!(result.is_err(), "Should fail with unsupported format");
    }

    #[test]
    fn test_load_from_file_not_found() {
        let result = load_from_file(Some(PathBuf::from("/nonexistent/courier.json")));
        assert!(matches!(result, Err(CourierError::Config(_))));
    }
}
