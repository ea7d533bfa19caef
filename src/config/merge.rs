use std::env;
use std::path::PathBuf;

use super::utils::{non_empty, parse_env};
use super::yaml::YamlConfig;
use super::{RelayConfig, ServerConfig, TlsConfig};
use crate::core::upstream::{DEFAULT_DEEPGRAM_MODEL, DEFAULT_DEEPGRAM_URL};

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. YAML configuration values
/// 2. Environment variables
/// 3. Default values
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();

    // Helper macro to get value with priority: YAML > ENV > Default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            $yaml_value
                .or_else(|| env::var($env_var).ok())
                .unwrap_or_else(|| $default.to_string())
        };
    }

    // Helper macro for optional values: YAML > ENV
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            non_empty($yaml_value.or_else(|| env::var($env_var).ok()))
        };
    }

    // Helper macro for parsed values: YAML > ENV > Default
    macro_rules! get_number {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            match $yaml_value {
                Some(value) => value,
                None => parse_env($env_var)?.unwrap_or($default),
            }
        };
    }

    let server = yaml.server.unwrap_or_default();
    let deepgram = yaml.deepgram.unwrap_or_default();
    let relay_yaml = yaml.relay.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    // Server configuration
    let host = get_value!("HOST", server.host, "0.0.0.0");
    let port: u16 = get_number!("PORT", server.port, 3001);

    // TLS: YAML paths win, a YAML `enabled: false` switches TLS off entirely
    let tls_yaml = server.tls.unwrap_or_default();
    let tls = if tls_yaml.enabled == Some(false) {
        None
    } else {
        let cert_path = get_optional!("TLS_CERT_PATH", tls_yaml.cert_path);
        let key_path = get_optional!("TLS_KEY_PATH", tls_yaml.key_path);
        match (cert_path, key_path) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            (None, None) => None,
            (Some(_), None) => return Err("TLS_KEY_PATH is required when TLS_CERT_PATH is set".into()),
            (None, Some(_)) => return Err("TLS_CERT_PATH is required when TLS_KEY_PATH is set".into()),
        }
    };

    // Deepgram configuration
    let deepgram_api_key = get_optional!("DEEPGRAM_API_KEY", deepgram.api_key);
    let deepgram_url = get_value!("DEEPGRAM_URL", deepgram.url, DEFAULT_DEEPGRAM_URL);
    let deepgram_model = get_value!("DEEPGRAM_MODEL", deepgram.model, DEFAULT_DEEPGRAM_MODEL);

    // Relay limits and timers
    let defaults = RelayConfig::default();
    let relay = RelayConfig {
        max_sessions: get_number!("MAX_SESSIONS", relay_yaml.max_sessions, defaults.max_sessions),
        keepalive_interval_ms: get_number!(
            "KEEPALIVE_INTERVAL_MS",
            relay_yaml.keepalive_interval_ms,
            defaults.keepalive_interval_ms
        ),
        inactivity_check_interval_secs: get_number!(
            "INACTIVITY_CHECK_INTERVAL_SECS",
            relay_yaml.inactivity_check_interval_secs,
            defaults.inactivity_check_interval_secs
        ),
        idle_timeout_secs: get_number!(
            "IDLE_TIMEOUT_SECS",
            relay_yaml.idle_timeout_secs,
            defaults.idle_timeout_secs
        ),
        safety_timeout_secs: get_number!(
            "SAFETY_TIMEOUT_SECS",
            relay_yaml.safety_timeout_secs,
            defaults.safety_timeout_secs
        ),
        reconnect_base_delay_ms: get_number!(
            "RECONNECT_BASE_DELAY_MS",
            relay_yaml.reconnect_base_delay_ms,
            defaults.reconnect_base_delay_ms
        ),
        reconnect_max_delay_ms: get_number!(
            "RECONNECT_MAX_DELAY_MS",
            relay_yaml.reconnect_max_delay_ms,
            defaults.reconnect_max_delay_ms
        ),
        reconnect_max_attempts: get_number!(
            "RECONNECT_MAX_ATTEMPTS",
            relay_yaml.reconnect_max_attempts,
            defaults.reconnect_max_attempts
        ),
        upstream_connect_timeout_secs: get_number!(
            "UPSTREAM_CONNECT_TIMEOUT_SECS",
            relay_yaml.upstream_connect_timeout_secs,
            defaults.upstream_connect_timeout_secs
        ),
        shutdown_grace_secs: get_number!(
            "SHUTDOWN_GRACE_SECS",
            relay_yaml.shutdown_grace_secs,
            defaults.shutdown_grace_secs
        ),
    };

    // Security configuration
    let cors_allowed_origins =
        get_optional!("CORS_ALLOWED_ORIGINS", security.cors_allowed_origins);
    let rate_limit_requests_per_second: u32 = get_number!(
        "RATE_LIMIT_REQUESTS_PER_SECOND",
        security.rate_limit_requests_per_second,
        60
    );
    let rate_limit_burst_size: u32 = get_number!(
        "RATE_LIMIT_BURST_SIZE",
        security.rate_limit_burst_size,
        10
    );

    Ok(ServerConfig {
        host,
        port,
        tls,
        deepgram_api_key,
        deepgram_url,
        deepgram_model,
        relay,
        cors_allowed_origins,
        rate_limit_requests_per_second,
        rate_limit_burst_size,
    })
}
