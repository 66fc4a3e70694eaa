use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the idle-shutdown window in milliseconds.
/// The name is an external contract shared with the session setup.
pub const PROVIDER_TIMEOUT_MS_VAR: &str = "PROVIDER_TIMEOUT_MS";

#[derive(Debug, Clone)]
pub struct Config {
    // bus configuration
    /// Well-known bus name this daemon claims once all of its initial
    /// account objects are published.
    pub bus_name: String,
    /// Accounts-service id whose accounts this daemon serves. An empty id
    /// runs the daemon in fixed mode: a single account with id 0, no
    /// accounts-service traffic.
    pub service_id: String,

    // lifecycle
    /// Idle window after which the daemon exits with status 0. `None`
    /// disables idle shutdown.
    pub idle_timeout: Option<Duration>,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Build a config with the idle window taken from the environment.
    pub fn new(bus_name: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            bus_name: bus_name.into(),
            service_id: service_id.into(),
            idle_timeout: idle_timeout_from_env(),
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }
}

/// Read the idle-shutdown window from [`PROVIDER_TIMEOUT_MS_VAR`].
pub fn idle_timeout_from_env() -> Option<Duration> {
    parse_idle_timeout(std::env::var(PROVIDER_TIMEOUT_MS_VAR).ok().as_deref())
}

/// Absent, non-positive, or unparseable values disable idle shutdown.
fn parse_idle_timeout(raw: Option<&str>) -> Option<Duration> {
    let raw = raw?;
    match raw.trim().parse::<i64>() {
        Ok(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
        Ok(_) => None,
        Err(_) => {
            tracing::warn!(value = %raw, "ignoring unparseable {PROVIDER_TIMEOUT_MS_VAR}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_window_is_parsed() {
        assert_eq!(
            parse_idle_timeout(Some("1500")),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn absent_and_non_positive_disable_idle_shutdown() {
        assert_eq!(parse_idle_timeout(None), None);
        assert_eq!(parse_idle_timeout(Some("0")), None);
        assert_eq!(parse_idle_timeout(Some("-200")), None);
    }

    #[test]
    fn garbage_disables_idle_shutdown() {
        assert_eq!(parse_idle_timeout(Some("soon")), None);
    }
}
