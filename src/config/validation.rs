//! Configuration errors and value helpers shared by the config sections.

use std::sync::OnceLock;
use std::time::Duration;

use regex::{Captures, Regex};
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// Parse the humantime value of config field `field`.
///
/// Zero is rejected: every duration in the config paces a loop.
pub fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::Validation(format!("{field}: {reason}"));
    let duration = humantime::parse_duration(value.trim())
        .map_err(|e| invalid(format!("'{value}' is not a duration ({e})")))?;
    if duration.is_zero() {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(duration)
}

/// `${NAME}` or `${NAME:-fallback}`.
fn env_reference() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-[^}]*)?\}").expect("env reference pattern")
    })
}

/// Expand `${NAME}` and `${NAME:-fallback}` in a collector argument.
///
/// An unset reference expands to nothing. The fallback applies when the
/// variable is unset or empty, as in a POSIX shell. Collector placeholders
/// such as `{device_group}` are left alone.
///
/// ```
/// use netdrift::config::expand_env_vars;
///
/// let arg = expand_env_vars("--user=${NETDRIFT_DOC_UNSET_BIGIP_USER:-monitor}");
/// assert_eq!(arg, "--user=monitor");
/// assert_eq!(expand_env_vars("{device_group}"), "{device_group}");
/// ```
pub fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    env_reference()
        .replace_all(input, |caps: &Captures| {
            let value = lookup(&caps[1]).filter(|v| !v.is_empty());
            match (value, caps.get(2)) {
                (Some(value), _) => value,
                (None, Some(fallback)) => fallback.as_str()[2..].to_string(),
                (None, None) => String::new(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("timeout", "2m").unwrap(),
            Duration::from_secs(120)
        );
        assert_eq!(
            parse_duration("timeout", " 1h ").unwrap(),
            Duration::from_secs(3600)
        );
        assert_eq!(
            parse_duration("timeout", "250ms").unwrap(),
            Duration::from_millis(250)
        );

        for bad in ["", "15", "soon", "0s"] {
            let err = parse_duration("schedule interval", bad).unwrap_err();
            assert!(
                err.to_string().contains("schedule interval"),
                "{bad}: {err}"
            );
        }
    }

    #[test]
    fn test_expand_with_lookup() {
        let env: HashMap<&str, &str> = [("BIGIP_HOST", "lb1.example.net"), ("EMPTY", "")]
            .into_iter()
            .collect();
        let lookup = |name: &str| env.get(name).map(|v| v.to_string());

        assert_eq!(
            expand_with("https://${BIGIP_HOST}/mgmt", lookup),
            "https://lb1.example.net/mgmt"
        );
        assert_eq!(expand_with("${BIGIP_HOST:-lb0}", lookup), "lb1.example.net");
        assert_eq!(expand_with("--user=${BIGIP_USER:-admin}", lookup), "--user=admin");
        assert_eq!(expand_with("${EMPTY:-fallback}", lookup), "fallback");
        assert_eq!(expand_with("${BIGIP_TOKEN}", lookup), "");
        assert_eq!(expand_with("${BIGIP_TOKEN:-}", lookup), "");
        assert_eq!(
            expand_with("{device_group} $BIGIP_HOST", lookup),
            "{device_group} $BIGIP_HOST"
        );
    }

    #[test]
    fn test_expand_env_vars_reads_process_env() {
        assert_eq!(expand_env_vars("${NETDRIFT_TEST_MISSING_TOKEN}"), "");
        assert_eq!(
            expand_env_vars("--user=${NETDRIFT_TEST_MISSING_USER:-admin}"),
            "--user=admin"
        );
    }
}
