//! Client language codes to Deepgram locale tags.
//!
//! Clients select a language with a small numeric code, sent either as a JSON
//! number (`2`) or as a string (`"2"`). Both forms resolve identically and any
//! code outside the table falls back to French.

use phf::phf_map;
use serde_json::Value;

/// Locale used when the client never selected a language or sent an unknown code
pub const DEFAULT_LANGUAGE: &str = "fr";

static LANGUAGE_TAGS: phf::Map<&'static str, &'static str> = phf_map! {
    "1" => "fr",
    "2" => "en-US",
    "3" => "nl",
    "4" => "es",
};

/// Resolve a string code such as `"3"` to a provider locale tag
pub fn map_language_code(code: &str) -> &'static str {
    LANGUAGE_TAGS.get(code).copied().unwrap_or(DEFAULT_LANGUAGE)
}

/// Resolve the `language` field of a control frame to a provider locale tag
///
/// Integral numbers are looked up by their decimal form, so `2`, `2.0` and
/// `"2"` all yield `en-US`. Anything else (objects, booleans, fractions,
/// unknown codes) yields [`DEFAULT_LANGUAGE`].
pub fn map_language(code: &Value) -> &'static str {
    match code {
        Value::String(s) => map_language_code(s),
        Value::Number(n) => {
            let integral = n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u32::MAX as f64)
                    .map(|f| f as u64)
            });
            match integral {
                Some(value) => map_language_code(&value.to_string()),
                None => DEFAULT_LANGUAGE,
            }
        }
        _ => DEFAULT_LANGUAGE,
    }
}
