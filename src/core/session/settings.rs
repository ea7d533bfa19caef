use std::time::Duration;

use crate::core::reconnect::BackoffPolicy;
use crate::core::upstream::UpstreamConnector;

/// Timer and retry settings applied to every session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub keepalive_interval: Duration,
    pub inactivity_check_interval: Duration,
    pub idle_timeout: Duration,
    pub safety_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_millis(3000),
            inactivity_check_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(300),
            safety_timeout: Duration::from_secs(1800),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Process-wide, read-only dependencies of a session
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub connector: UpstreamConnector,
    pub settings: SessionSettings,
}

impl RelayContext {
    pub fn new(connector: UpstreamConnector, settings: SessionSettings) -> Self {
        Self {
            connector,
            settings,
        }
    }
}
