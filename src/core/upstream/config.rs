use std::fmt;
use std::time::Duration;

use serde::Serialize;
use url::Url;
use zeroize::Zeroizing;

use crate::errors::RelayError;

pub const DEFAULT_DEEPGRAM_URL: &str = "wss://api.deepgram.com/v1/listen";
pub const DEFAULT_DEEPGRAM_MODEL: &str = "nova-2";

/// Provider settings shared by every upstream connection of the process
#[derive(Clone)]
pub struct UpstreamSettings {
    /// Listen endpoint; query parameters are appended per connection
    pub url: String,
    pub api_key: Zeroizing<String>,
    pub model: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub interim_results: bool,
    pub endpointing_ms: u32,
    pub vad_turnoff_ms: u32,
    pub connect_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DEEPGRAM_URL.to_string(),
            api_key: Zeroizing::new(String::new()),
            model: DEFAULT_DEEPGRAM_MODEL.to_string(),
            encoding: "linear16".to_string(),
            sample_rate: 16000,
            channels: 1,
            interim_results: true,
            endpointing_ms: 200,
            vad_turnoff_ms: 500,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for UpstreamSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamSettings")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("encoding", &self.encoding)
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("interim_results", &self.interim_results)
            .field("endpointing_ms", &self.endpointing_ms)
            .field("vad_turnoff_ms", &self.vad_turnoff_ms)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

/// JSON sent as the first message on every freshly opened upstream connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfigMessage<'a> {
    pub encoding: &'a str,
    pub sample_rate: u32,
    pub channels: u16,
    pub language: &'a str,
    pub model: &'a str,
    pub interim_results: bool,
    pub endpointing: u32,
    pub vad_turnoff: u32,
}

impl UpstreamSettings {
    pub fn session_config<'a>(&'a self, language: &'a str) -> SessionConfigMessage<'a> {
        SessionConfigMessage {
            encoding: &self.encoding,
            sample_rate: self.sample_rate,
            channels: self.channels,
            language,
            model: &self.model,
            interim_results: self.interim_results,
            endpointing: self.endpointing_ms,
            vad_turnoff: self.vad_turnoff_ms,
        }
    }

    /// Listen URL carrying the same parameters as the session config message
    pub fn listen_url(&self, language: &str) -> Result<Url, RelayError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| RelayError::Configuration(format!("Invalid upstream URL: {e}")))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(RelayError::Configuration(format!(
                    "Upstream URL must use ws or wss, got {other}"
                )));
            }
        }

        url.query_pairs_mut()
            .append_pair("encoding", &self.encoding)
            .append_pair("sample_rate", &self.sample_rate.to_string())
            .append_pair("channels", &self.channels.to_string())
            .append_pair("language", language)
            .append_pair("model", &self.model)
            .append_pair("interim_results", &self.interim_results.to_string())
            .append_pair("endpointing", &self.endpointing_ms.to_string())
            .append_pair("vad_turnoff", &self.vad_turnoff_ms.to_string());

        Ok(url)
    }

    /// Value of the `Authorization` header for the upgrade request
    pub fn authorization(&self) -> String {
        format!("Token {}", self.api_key.as_str())
    }
}
