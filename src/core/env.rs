//! Environment variable parsing for the `from_env` config constructors.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Read and parse an environment variable, falling back to `default`
/// when it is unset or unparsable.
pub fn var_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Read an optional, non-empty environment variable.
pub fn var_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read a boolean flag (`true`/`1`/`yes` or `false`/`0`/`no`). Anything
/// else warns and falls back to `default`.
pub fn flag_or(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => {
                warn!("Ignoring unrecognized flag {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a millisecond duration.
pub fn millis_or(key: &str, default: Duration) -> Duration {
    Duration::from_millis(var_or(key, default.as_millis() as u64))
}

/// Read a second duration.
pub fn secs_or(key: &str, default: Duration) -> Duration {
    Duration::from_secs(var_or(key, default.as_secs()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_or_fallbacks() {
        std::env::set_var("AVIATOR_TEST_ENV_GOOD", "42");
        std::env::set_var("AVIATOR_TEST_ENV_BAD", "forty-two");

        assert_eq!(var_or("AVIATOR_TEST_ENV_GOOD", 7u32), 42);
        assert_eq!(var_or("AVIATOR_TEST_ENV_BAD", 7u32), 7);
        assert_eq!(var_or("AVIATOR_TEST_ENV_MISSING", 7u32), 7);
    }

    #[test]
    fn test_flag_and_opt() {
        std::env::set_var("AVIATOR_TEST_FLAG", "YES");
        std::env::set_var("AVIATOR_TEST_EMPTY", "  ");

        assert!(flag_or("AVIATOR_TEST_FLAG", false));
        assert!(!flag_or("AVIATOR_TEST_FLAG_MISSING", false));
        assert_eq!(var_opt("AVIATOR_TEST_EMPTY"), None);
    }

    #[test]
    fn test_unrecognized_flag_keeps_default() {
        std::env::set_var("AVIATOR_TEST_FLAG_ON", "on");
        std::env::set_var("AVIATOR_TEST_FLAG_OFF", "No");

        assert!(flag_or("AVIATOR_TEST_FLAG_ON", true));
        assert!(!flag_or("AVIATOR_TEST_FLAG_ON", false));
        assert!(!flag_or("AVIATOR_TEST_FLAG_OFF", true));
    }

    #[test]
    fn test_durations() {
        std::env::set_var("AVIATOR_TEST_MS", "250");
        assert_eq!(millis_or("AVIATOR_TEST_MS", Duration::from_secs(1)), Duration::from_millis(250));
        assert_eq!(secs_or("AVIATOR_TEST_SECS_MISSING", Duration::from_secs(30)), Duration::from_secs(30));
    }
}
