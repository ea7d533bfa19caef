//! Configuration module for the speech relay
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use speech_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use zeroize::Zeroizing;

mod merge;
mod utils;
mod validation;
mod yaml;

use crate::core::reconnect::BackoffPolicy;
use crate::core::session::{RelayContext, SessionSettings};
use crate::core::upstream::{UpstreamConnector, UpstreamSettings};
use crate::errors::RelayError;

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Session limits and timers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    pub keepalive_interval_ms: u64,
    pub inactivity_check_interval_secs: u64,
    pub idle_timeout_secs: u64,
    /// Hard limit on session lifetime
    pub safety_timeout_secs: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub reconnect_max_attempts: u32,
    pub upstream_connect_timeout_secs: u64,
    /// How long shutdown waits for sessions to drain
    pub shutdown_grace_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_sessions: 100,
            keepalive_interval_ms: 3000,
            inactivity_check_interval_secs: 60,
            idle_timeout_secs: 300,
            safety_timeout_secs: 1800,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 5,
            upstream_connect_timeout_secs: 10,
            shutdown_grace_secs: 10,
        }
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the relay:
/// - Server settings (host, port, TLS)
/// - Deepgram credentials and endpoint
/// - Session limits and timers
/// - Security settings (CORS, rate limiting)
#[derive(Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Deepgram settings
    pub deepgram_api_key: Option<String>,
    pub deepgram_url: String,
    pub deepgram_model: String,

    // Session limits and timers
    pub relay: RelayConfig,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,
    /// Maximum requests per second per IP address
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    pub rate_limit_burst_size: u32,
}

/// Zeroize the API key when the configuration is dropped
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.deepgram_api_key {
            key.zeroize();
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field(
                "deepgram_api_key",
                &self.deepgram_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("deepgram_url", &self.deepgram_url)
            .field("deepgram_model", &self.deepgram_model)
            .field("relay", &self.relay)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field(
                "rate_limit_requests_per_second",
                &self.rate_limit_requests_per_second,
            )
            .field("rate_limit_burst_size", &self.rate_limit_burst_size)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables and defaults
    ///
    /// The .env file is loaded in main.rs at application startup, so its values
    /// are already visible as environment variables here.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_relay_config(&self.relay)?;
        validation::validate_tls_config(&self.tls)?;
        validation::validate_deepgram_url(&self.deepgram_url)?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// The Deepgram API key, which the relay cannot start without
    pub fn require_deepgram_api_key(&self) -> Result<&str, RelayError> {
        self.deepgram_api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                RelayError::Configuration("DEEPGRAM_API_KEY is not configured".to_string())
            })
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.relay.shutdown_grace_secs)
    }

    /// Provider settings for upstream connections
    pub fn upstream_settings(&self) -> Result<UpstreamSettings, RelayError> {
        let api_key = self.require_deepgram_api_key()?;
        Ok(UpstreamSettings {
            url: self.deepgram_url.clone(),
            api_key: Zeroizing::new(api_key.to_string()),
            model: self.deepgram_model.clone(),
            connect_timeout: Duration::from_secs(self.relay.upstream_connect_timeout_secs),
            ..Default::default()
        })
    }

    /// Per-session timers and backoff
    pub fn session_settings(&self) -> SessionSettings {
        let relay = &self.relay;
        SessionSettings {
            keepalive_interval: Duration::from_millis(relay.keepalive_interval_ms),
            inactivity_check_interval: Duration::from_secs(relay.inactivity_check_interval_secs),
            idle_timeout: Duration::from_secs(relay.idle_timeout_secs),
            safety_timeout: Duration::from_secs(relay.safety_timeout_secs),
            backoff: BackoffPolicy {
                base: Duration::from_millis(relay.reconnect_base_delay_ms),
                cap: Duration::from_millis(relay.reconnect_max_delay_ms),
                max_attempts: relay.reconnect_max_attempts,
            },
        }
    }

    /// Everything a session needs from the configuration
    pub fn relay_context(&self) -> Result<RelayContext, RelayError> {
        let connector = UpstreamConnector::new(self.upstream_settings()?);
        Ok(RelayContext::new(connector, self.session_settings()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use tempfile::TempDir;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3001,
            tls: None,
            deepgram_api_key: Some("dg-test-key".to_string()),
            deepgram_url: "wss://api.deepgram.com/v1/listen".to_string(),
            deepgram_model: "nova-2".to_string(),
            relay: RelayConfig::default(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
        }
    }

    #[test]
    fn test_address() {
        assert_eq!(test_config().address(), "127.0.0.1:3001");
    }

    #[test]
    fn test_require_deepgram_api_key() {
        let config = test_config();
        assert_eq!(config.require_deepgram_api_key().unwrap(), "dg-test-key");

        let mut missing = test_config();
        missing.deepgram_api_key = None;
        assert!(matches!(
            missing.require_deepgram_api_key(),
            Err(RelayError::Configuration(_))
        ));
        assert!(missing.relay_context().is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let debug = format!("{:?}", test_config());
        assert!(!debug.contains("dg-test-key"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_session_settings_conversion() {
        let mut config = test_config();
        config.relay.keepalive_interval_ms = 2500;
        config.relay.reconnect_max_attempts = 3;

        let settings = config.session_settings();
        assert_eq!(settings.keepalive_interval, Duration::from_millis(2500));
        assert_eq!(settings.idle_timeout, Duration::from_secs(300));
        assert_eq!(settings.safety_timeout, Duration::from_secs(1800));
        assert_eq!(settings.backoff.base, Duration::from_secs(1));
        assert_eq!(settings.backoff.cap, Duration::from_secs(30));
        assert_eq!(settings.backoff.max_attempts, 3);
    }

    #[test]
    fn test_upstream_settings_conversion() {
        let mut config = test_config();
        config.deepgram_model = "nova-3".to_string();
        config.relay.upstream_connect_timeout_secs = 4;

        let upstream = config.upstream_settings().unwrap();
        assert_eq!(upstream.api_key.as_str(), "dg-test-key");
        assert_eq!(upstream.model, "nova-3");
        assert_eq!(upstream.connect_timeout, Duration::from_secs(4));
        assert_eq!(upstream.sample_rate, 16000);
    }

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("HOST");
            env::remove_var("PORT");
            env::remove_var("DEEPGRAM_API_KEY");
            env::remove_var("MAX_SESSIONS");
            env::remove_var("IDLE_TIMEOUT_SECS");
        }
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let yaml_content = r#"
server:
  host: "127.0.0.1"
  port: 8080

deepgram:
  api_key: "yaml-key"

relay:
  max_sessions: 12
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("HOST", "0.0.0.0");
            env::set_var("DEEPGRAM_API_KEY", "env-key");
            env::set_var("IDLE_TIMEOUT_SECS", "120");
        }

        let config = ServerConfig::from_file(&config_path).unwrap();

        // YAML overrides ENV
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.deepgram_api_key, Some("yaml-key".to_string()));
        assert_eq!(config.port, 8080);
        assert_eq!(config.relay.max_sessions, 12);
        // ENV fills what YAML leaves out
        assert_eq!(config.relay.idle_timeout_secs, 120);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing_file() {
        cleanup_env_vars();

        let config_path = PathBuf::from("/nonexistent/config.yaml");
        let result = ServerConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    #[serial]
    fn test_from_file_rejects_invalid_relay_values() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "relay:\n  max_sessions: 0\n").unwrap();

        let err = ServerConfig::from_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("MAX_SESSIONS"));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();
        unsafe { env::set_var("MAX_SESSIONS", "2") };

        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.relay.max_sessions, 2);
        assert_eq!(config.port, 3001);
        assert!(!config.is_tls_enabled());

        cleanup_env_vars();
    }
}
