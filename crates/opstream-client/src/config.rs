use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_WATCHDOG_SECS: u64 = 15;
pub const DEFAULT_RETRY_MS: u64 = 3000;
pub const DEFAULT_ENDPOINT: &str = "https://127.0.0.1/api/sse";
pub const MAX_WATCHDOG_SECS: u64 = 3_600;
pub const MAX_RETRY_MS: u64 = 600_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub endpoint: Url,
    pub auth_header: Option<String>,
    pub accept_invalid_certs: bool,
    /// Silence after which the stream is presumed dead.
    pub watchdog_window: Duration,
    /// Pause between failed connection attempts.
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            auth_header: None,
            accept_invalid_certs: false,
            watchdog_window: Duration::from_secs(DEFAULT_WATCHDOG_SECS),
            retry_delay: Duration::from_millis(DEFAULT_RETRY_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid endpoint url '{value}': {message}")]
    InvalidEndpoint { value: String, message: String },
    #[error("endpoint must use http or https, got '{0}'")]
    UnsupportedScheme(String),
    #[error("invalid value for {name}: '{value}' (expected 1..={max})")]
    InvalidNumber {
        name: &'static str,
        value: String,
        max: u64,
    },
}

/// Raw values as given on the command line; empty means "not set".
#[derive(Debug, Clone, Default)]
pub struct ConfigFlags {
    pub url: String,
    pub auth_header: String,
    pub insecure: bool,
    pub watchdog_secs: Option<u64>,
    pub retry_ms: Option<u64>,
}

pub fn resolve_config(flags: &ConfigFlags) -> Result<ClientConfig, ConfigError> {
    let endpoint = resolve_endpoint(&flags.url)?;
    let mut config = ClientConfig::new(endpoint);
    config.auth_header = resolve_auth_header(&flags.auth_header);
    config.accept_invalid_certs = flags.insecure || resolve_insecure();
    config.watchdog_window = Duration::from_secs(resolve_number(
        flags.watchdog_secs,
        "OPSTREAM_WATCHDOG_SECS",
        DEFAULT_WATCHDOG_SECS,
        MAX_WATCHDOG_SECS,
    )?);
    config.retry_delay = Duration::from_millis(resolve_number(
        flags.retry_ms,
        "OPSTREAM_RETRY_MS",
        DEFAULT_RETRY_MS,
        MAX_RETRY_MS,
    )?);
    Ok(config)
}

fn resolve_endpoint(flag: &str) -> Result<Url, ConfigError> {
    let raw = if !flag.trim().is_empty() {
        flag.trim().to_string()
    } else {
        match env::var("OPSTREAM_URL") {
            Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => DEFAULT_ENDPOINT.to_string(),
        }
    };
    parse_endpoint(&raw)
}

pub fn parse_endpoint(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|err| ConfigError::InvalidEndpoint {
        value: raw.to_string(),
        message: err.to_string(),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

fn resolve_auth_header(flag: &str) -> Option<String> {
    if !flag.trim().is_empty() {
        return Some(flag.trim().to_string());
    }
    if let Ok(value) = env::var("OPSTREAM_AUTH_HEADER") {
        if !value.trim().is_empty() {
            return Some(value.trim().to_string());
        }
    }
    None
}

fn resolve_insecure() -> bool {
    env::var("OPSTREAM_INSECURE")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false)
}

fn resolve_number(
    flag: Option<u64>,
    var: &'static str,
    default: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let invalid = |value: String| ConfigError::InvalidNumber {
        name: var,
        value,
        max,
    };
    let value = match flag {
        Some(value) => value,
        None => match env::var(var) {
            Ok(value) if !value.trim().is_empty() => value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(value.clone()))?,
            _ => return Ok(default),
        },
    };
    if value == 0 || value > max {
        return Err(invalid(value.to_string()));
    }
    Ok(value)
}

/// Log directory from the flag, then `OPSTREAM_LOG_DIR`. Empty disables
/// file logging.
pub fn resolve_log_dir(flag: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.trim().to_string();
    }
    match env::var("OPSTREAM_LOG_DIR") {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => String::new(),
    }
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_win_over_defaults() {
        let config = resolve_config(&ConfigFlags {
            url: "http://10.0.0.2:8080/api/sse".to_string(),
            auth_header: "Bearer t0k".to_string(),
            insecure: true,
            watchdog_secs: Some(5),
            retry_ms: Some(250),
        })
        .expect("config");
        assert_eq!(config.endpoint.as_str(), "http://10.0.0.2:8080/api/sse");
        assert_eq!(config.auth_header.as_deref(), Some("Bearer t0k"));
        assert!(config.accept_invalid_certs);
        assert_eq!(config.watchdog_window, Duration::from_secs(5));
        assert_eq!(config.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn endpoint_must_be_http() {
        assert!(matches!(
            parse_endpoint("ws://host/stream"),
            Err(ConfigError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            parse_endpoint("not a url"),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn defaults_match_stream_contract() {
        let config = ClientConfig::new(parse_endpoint(DEFAULT_ENDPOINT).expect("default"));
        assert_eq!(config.watchdog_window, Duration::from_secs(15));
        assert_eq!(config.retry_delay, Duration::from_millis(3000));
        assert!(!config.accept_invalid_certs);
    }

    #[test]
    fn zero_and_oversized_durations_are_rejected() {
        let zero_retry = resolve_config(&ConfigFlags {
            url: DEFAULT_ENDPOINT.to_string(),
            retry_ms: Some(0),
            ..ConfigFlags::default()
        });
        assert!(matches!(
            zero_retry,
            Err(ConfigError::InvalidNumber {
                name: "OPSTREAM_RETRY_MS",
                ..
            })
        ));

        let huge_watchdog = resolve_config(&ConfigFlags {
            url: DEFAULT_ENDPOINT.to_string(),
            watchdog_secs: Some(u64::MAX),
            ..ConfigFlags::default()
        });
        assert!(matches!(
            huge_watchdog,
            Err(ConfigError::InvalidNumber {
                name: "OPSTREAM_WATCHDOG_SECS",
                ..
            })
        ));

        let upper_bounds = resolve_config(&ConfigFlags {
            url: DEFAULT_ENDPOINT.to_string(),
            watchdog_secs: Some(MAX_WATCHDOG_SECS),
            retry_ms: Some(MAX_RETRY_MS),
            ..ConfigFlags::default()
        })
        .expect("bounds are inclusive");
        assert_eq!(upper_bounds.watchdog_window, Duration::from_secs(3_600));
        assert_eq!(upper_bounds.retry_delay, Duration::from_secs(600));
    }

    #[test]
    fn log_dir_prefers_flag_then_env() {
        env::set_var("OPSTREAM_LOG_DIR", " /var/log/opstream ");
        assert_eq!(resolve_log_dir(""), "/var/log/opstream");
        assert_eq!(resolve_log_dir(" ./logs "), "./logs");
        env::remove_var("OPSTREAM_LOG_DIR");
        assert_eq!(resolve_log_dir("  "), "");
    }

    #[test]
    fn parse_bool_flag_accepts_common_values() {
        assert_eq!(parse_bool_flag("YES"), Some(true));
        assert_eq!(parse_bool_flag(" off "), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
