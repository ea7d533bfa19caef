use tracing::warn;
use url::Url;

use super::{RelayConfig, TlsConfig};

/// Validate relay limits, timers and backoff bounds
pub fn validate_relay_config(relay: &RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    if relay.max_sessions == 0 {
        return Err("MAX_SESSIONS must be greater than zero".into());
    }

    let non_zero = [
        ("KEEPALIVE_INTERVAL_MS", relay.keepalive_interval_ms),
        (
            "INACTIVITY_CHECK_INTERVAL_SECS",
            relay.inactivity_check_interval_secs,
        ),
        ("IDLE_TIMEOUT_SECS", relay.idle_timeout_secs),
        ("SAFETY_TIMEOUT_SECS", relay.safety_timeout_secs),
        ("RECONNECT_BASE_DELAY_MS", relay.reconnect_base_delay_ms),
        ("RECONNECT_MAX_DELAY_MS", relay.reconnect_max_delay_ms),
        (
            "UPSTREAM_CONNECT_TIMEOUT_SECS",
            relay.upstream_connect_timeout_secs,
        ),
    ];
    for (name, value) in non_zero {
        if value == 0 {
            return Err(format!("{name} must be greater than zero").into());
        }
    }

    if relay.reconnect_max_attempts == 0 {
        return Err("RECONNECT_MAX_ATTEMPTS must be greater than zero".into());
    }

    if relay.reconnect_base_delay_ms > relay.reconnect_max_delay_ms {
        return Err(format!(
            "RECONNECT_BASE_DELAY_MS ({}) cannot exceed RECONNECT_MAX_DELAY_MS ({})",
            relay.reconnect_base_delay_ms, relay.reconnect_max_delay_ms
        )
        .into());
    }

    if relay.idle_timeout_secs < relay.inactivity_check_interval_secs {
        warn!(
            idle_timeout_secs = relay.idle_timeout_secs,
            check_interval_secs = relay.inactivity_check_interval_secs,
            "Idle timeout is shorter than the inactivity check interval; idle sessions close late"
        );
    }

    Ok(())
}

/// Validate that configured TLS files exist
pub fn validate_tls_config(tls: &Option<TlsConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(tls) = tls else {
        return Ok(());
    };

    if !tls.cert_path.exists() {
        return Err(format!(
            "TLS_CERT_PATH file does not exist: {}",
            tls.cert_path.display()
        )
        .into());
    }
    if !tls.key_path.exists() {
        return Err(format!(
            "TLS_KEY_PATH file does not exist: {}",
            tls.key_path.display()
        )
        .into());
    }

    Ok(())
}

/// Validate the upstream listen endpoint
pub fn validate_deepgram_url(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = Url::parse(url).map_err(|e| format!("Invalid DEEPGRAM_URL '{url}': {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!("DEEPGRAM_URL must use ws:// or wss://, got {other}://").into()),
    }
}
