use std::env;
use std::str::FromStr;

/// Read and parse an environment variable
///
/// Returns `Ok(None)` when the variable is unset and an error naming the
/// variable when it is set but cannot be parsed.
pub fn parse_env<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {name} environment variable: {e}").into()),
        Err(_) => Ok(None),
    }
}

/// Treat empty strings as absent
pub fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parse_env_values() {
        unsafe {
            env::set_var("SPEECH_RELAY_TEST_NUMBER", " 42 ");
            env::set_var("SPEECH_RELAY_TEST_BAD", "forty-two");
            env::remove_var("SPEECH_RELAY_TEST_UNSET");
        }

        assert_eq!(parse_env::<u64>("SPEECH_RELAY_TEST_NUMBER").unwrap(), Some(42));
        assert_eq!(parse_env::<u64>("SPEECH_RELAY_TEST_UNSET").unwrap(), None);

        let err = parse_env::<u64>("SPEECH_RELAY_TEST_BAD").unwrap_err();
        assert!(err.to_string().contains("SPEECH_RELAY_TEST_BAD"));

        unsafe {
            env::remove_var("SPEECH_RELAY_TEST_NUMBER");
            env::remove_var("SPEECH_RELAY_TEST_BAD");
        }
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("key".into())), Some("key".into()));
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(None), None);
    }
}
