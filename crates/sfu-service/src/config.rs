//! SFU service configuration.
//!
//! Configuration is loaded from environment variables. Every value has a
//! default, so an empty environment yields a working local setup.

use crate::engine::LocalEngineSettings;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default IP announced in ICE candidates.
pub const DEFAULT_ANNOUNCED_IP: &str = "127.0.0.1";

/// Default lower bound of the RTC port range.
pub const DEFAULT_RTC_MIN_PORT: u16 = 40000;

/// Default upper bound of the RTC port range.
pub const DEFAULT_RTC_MAX_PORT: u16 = 49999;

/// Default timeout applied to every media engine call, in milliseconds.
pub const DEFAULT_ENGINE_TIMEOUT_MS: u64 = 10_000;

/// Default timeout for a whole signaling request, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Default chat history bound per room.
pub const DEFAULT_CHAT_MAX_MESSAGES: usize = 1000;

/// Default delay after which a typing flag clears itself, in milliseconds.
pub const DEFAULT_CHAT_TYPING_TIMEOUT_MS: u64 = 3000;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 30;

/// Default SFU instance ID prefix.
pub const DEFAULT_SFU_ID_PREFIX: &str = "sfu";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue(format!(
                "SFU_LOG_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

/// SFU service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:3000").
    pub bind_address: String,

    /// IP announced to clients in ICE candidates.
    pub announced_ip: String,

    /// RTC port range handed out to transports (inclusive).
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,

    /// Timeout applied to every media engine call.
    pub engine_timeout: Duration,

    /// Timeout for a whole signaling request.
    pub request_timeout: Duration,

    /// Chat history bound per room.
    pub chat_max_messages: usize,

    /// Delay after which a typing flag clears itself.
    pub chat_typing_timeout: Duration,

    /// HTTP request timeout for REST endpoints.
    pub http_timeout: Duration,

    pub log_format: LogFormat,

    /// Unique identifier for this SFU instance.
    pub sfu_id: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("announced_ip", &self.announced_ip)
            .field("rtc_ports", &format!("{}-{}", self.rtc_min_port, self.rtc_max_port))
            .field("engine_timeout", &self.engine_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("chat_max_messages", &self.chat_max_messages)
            .field("chat_typing_timeout", &self.chat_typing_timeout)
            .field("http_timeout", &self.http_timeout)
            .field("log_format", &self.log_format)
            .field("sfu_id", &self.sfu_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Parse an optional numeric variable, falling back to `default` when unset.
fn parse_var<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(key) {
        Some(value_str) => value_str.trim().parse().map_err(|e| {
            ConfigError::InvalidValue(format!(
                "{key} must be a valid number, got '{value_str}': {e}"
            ))
        }),
        None => Ok(default),
    }
}

/// Parse a millisecond duration that must be non-zero.
fn parse_millis(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let millis = parse_var(vars, key, default)?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(Duration::from_millis(millis))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("SFU_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let announced_ip = vars
            .get("SFU_ANNOUNCED_IP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_ANNOUNCED_IP.to_string());

        let rtc_min_port = parse_var(vars, "SFU_RTC_MIN_PORT", DEFAULT_RTC_MIN_PORT)?;
        let rtc_max_port = parse_var(vars, "SFU_RTC_MAX_PORT", DEFAULT_RTC_MAX_PORT)?;
        if rtc_min_port > rtc_max_port {
            return Err(ConfigError::InvalidValue(format!(
                "SFU_RTC_MIN_PORT ({rtc_min_port}) must not exceed SFU_RTC_MAX_PORT ({rtc_max_port})"
            )));
        }

        let engine_timeout = parse_millis(vars, "SFU_ENGINE_TIMEOUT_MS", DEFAULT_ENGINE_TIMEOUT_MS)?;
        let request_timeout =
            parse_millis(vars, "SFU_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        // A request must outlive the engine call it waits on
        if request_timeout <= engine_timeout {
            return Err(ConfigError::InvalidValue(format!(
                "SFU_REQUEST_TIMEOUT_MS ({}) must exceed SFU_ENGINE_TIMEOUT_MS ({})",
                request_timeout.as_millis(),
                engine_timeout.as_millis()
            )));
        }
        let chat_typing_timeout = parse_millis(
            vars,
            "SFU_CHAT_TYPING_TIMEOUT_MS",
            DEFAULT_CHAT_TYPING_TIMEOUT_MS,
        )?;

        let chat_max_messages =
            parse_var(vars, "SFU_CHAT_MAX_MESSAGES", DEFAULT_CHAT_MAX_MESSAGES)?;
        if chat_max_messages == 0 {
            return Err(ConfigError::InvalidValue(
                "SFU_CHAT_MAX_MESSAGES must be greater than zero".to_string(),
            ));
        }

        let http_timeout_seconds =
            parse_var(vars, "SFU_HTTP_TIMEOUT_SECONDS", DEFAULT_HTTP_TIMEOUT_SECONDS)?;
        if http_timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "SFU_HTTP_TIMEOUT_SECONDS must be greater than zero".to_string(),
            ));
        }

        let log_format = match vars.get("SFU_LOG_FORMAT") {
            Some(value) => value.parse()?,
            None => LogFormat::Text,
        };

        // Generate SFU instance ID
        let sfu_id = vars.get("SFU_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_SFU_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            bind_address,
            announced_ip,
            rtc_min_port,
            rtc_max_port,
            engine_timeout,
            request_timeout,
            chat_max_messages,
            chat_typing_timeout,
            http_timeout: Duration::from_secs(http_timeout_seconds),
            log_format,
            sfu_id,
        })
    }

    /// Settings for the in-process media engine.
    #[must_use]
    pub fn engine_settings(&self) -> LocalEngineSettings {
        LocalEngineSettings {
            announced_ip: self.announced_ip.clone(),
            rtc_min_port: self.rtc_min_port,
            rtc_max_port: self.rtc_max_port,
            ..LocalEngineSettings::default()
        }
    }
}
