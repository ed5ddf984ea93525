//! Environment variable parsing utilities.

use std::collections::HashMap;
use std::str::FromStr;

use super::ConfigError;

/// Get environment variable with default value.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get optional environment variable (None if empty or missing).
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// Parse environment variable as boolean.
/// Treats "1", "true" (case-insensitive) as true.
pub fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(default)
}

/// Parse environment variable with type conversion.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => v.parse().map_err(|e: T::Err| ConfigError::Parse {
            key: key.into(),
            value: v,
            error: e.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Parse a label list of the form `key=value,key2=value2`.
///
/// Whitespace around keys and values is trimmed; empty segments are
/// skipped. A segment without `=` is an error.
pub fn parse_label_pairs(key: &str, raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut labels = HashMap::new();
    for segment in raw.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (name, value) = segment.split_once('=').ok_or_else(|| ConfigError::Parse {
            key: key.into(),
            value: raw.into(),
            error: format!("expected key=value, got '{}'", segment),
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::Parse {
                key: key.into(),
                value: raw.into(),
                error: "empty label name".into(),
            });
        }
        labels.insert(name.to_string(), value.trim().to_string());
    }
    Ok(labels)
}

/// Parse environment variable as a label list.
pub fn env_labels(key: &str) -> Result<HashMap<String, String>, ConfigError> {
    match env_opt(key) {
        Some(raw) => parse_label_pairs(key, &raw),
        None => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label_pairs() {
        let labels = parse_label_pairs("TEST", "env=prod, region = eu-west-1").unwrap();
        assert_eq!(labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(labels.get("region").map(String::as_str), Some("eu-west-1"));

        let empty = parse_label_pairs("TEST", "").unwrap();
        assert!(empty.is_empty());

        // Trailing comma is tolerated
        let labels = parse_label_pairs("TEST", "a=1,").unwrap();
        assert_eq!(labels.len(), 1);
    }

    #[test]
    fn test_parse_label_pairs_rejects_bare_key() {
        let err = parse_label_pairs("TEST", "env").unwrap_err();
        assert!(err.to_string().contains("expected key=value"));

        let err = parse_label_pairs("TEST", "=value").unwrap_err();
        assert!(err.to_string().contains("empty label name"));
    }

    #[test]
    fn test_env_bool() {
        std::env::set_var("HYPERWATCH_TEST_BOOL", "true");
        assert!(env_bool("HYPERWATCH_TEST_BOOL", false));
        std::env::set_var("HYPERWATCH_TEST_BOOL", "0");
        assert!(!env_bool("HYPERWATCH_TEST_BOOL", true));
        std::env::remove_var("HYPERWATCH_TEST_BOOL");
        assert!(env_bool("HYPERWATCH_TEST_BOOL", true));
    }
}
