//! Configuration interceptor
//!
//! Every inbound client frame goes through [`classify`], which decides whether
//! the frame is a language control message or opaque data. Malformed or
//! look-alike JSON is always data: the payload is handed back untouched so the
//! relay can forward it exactly as received.

use serde_json::Value;
use tracing::debug;

use super::language::map_language;
use super::protocol::Frame;
use crate::errors::RelayError;

/// A recognized `{"config":"language","language":<code>}` message
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
    /// Code exactly as sent by the client (number or string)
    pub code: Value,
    /// Provider locale tag resolved from `code`
    pub language: &'static str,
}

/// Result of classifying one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Control(ControlFrame),
    Data(Frame),
}

/// Classify an inbound frame as control or data
pub fn classify(frame: Frame) -> Classified {
    let Frame::Text(text) = &frame else {
        return Classified::Data(frame);
    };

    if !looks_like_config(text) {
        return Classified::Data(frame);
    }

    match parse_control(text) {
        Ok(control) => Classified::Control(control),
        Err(e) => {
            debug!("Treating text frame as data: {}", e);
            Classified::Data(frame)
        }
    }
}

/// Cheap pre-filter applied before any JSON parsing
#[inline]
fn looks_like_config(text: &str) -> bool {
    text.starts_with('{') && text.contains("config")
}

fn parse_control(text: &str) -> Result<ControlFrame, RelayError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| RelayError::ConfigParse(e.to_string()))?;

    let object = value
        .as_object()
        .ok_or_else(|| RelayError::ConfigParse("not a JSON object".to_string()))?;

    if object.get("config").and_then(Value::as_str) != Some("language") {
        return Err(RelayError::ConfigParse(
            "`config` is not \"language\"".to_string(),
        ));
    }

    let code = object
        .get("language")
        .filter(|code| !code.is_null())
        .ok_or_else(|| RelayError::ConfigParse("missing `language`".to_string()))?;

    Ok(ControlFrame {
        language: map_language(code),
        code: code.clone(),
    })
}
