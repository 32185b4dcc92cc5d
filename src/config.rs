//! Configuration handling for the OpenTransfer API.
//!
//! This module provides configuration management via CLI arguments and
//! environment variables. The environment variable names follow the keys the
//! service has always been deployed with (`OpenTransferConnection`,
//! `API_KEY`, `Culture`, ...).

use chrono::format::{Item, StrftimeItems};
use clap::{Parser, ValueEnum};
use std::time::Duration;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_CULTURE: &str = "da-DK";
pub const DEFAULT_SHORT_DATE_PATTERN: &str = "%Y-%m-%d";
pub const DEFAULT_LONG_DATE_PATTERN: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Fallback variable used by hosts that nest connection strings.
pub const NESTED_CONNECTION_STRING_ENV: &str = "ConnectionStrings__OpenTransferConnection";

/// How function arguments reach the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ArgumentMode {
    /// Values are bound through the driver (`name => $1`)
    #[default]
    Bound,
    /// Values are encoded as SQL literals (`name => 'value'`)
    Inline,
}

impl std::fmt::Display for ArgumentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bound => write!(f, "bound"),
            Self::Inline => write!(f, "inline"),
        }
    }
}

/// Culture and date formats, passed explicitly to every formatting site.
///
/// Patterns use chrono's strftime syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleSettings {
    pub culture: String,
    pub short_date_pattern: String,
    pub long_date_pattern: String,
}

impl LocaleSettings {
    /// Create locale settings, validating the culture tag and both patterns.
    pub fn new(
        culture: impl Into<String>,
        short_date_pattern: impl Into<String>,
        long_date_pattern: impl Into<String>,
    ) -> Result<Self, String> {
        let settings = Self {
            culture: culture.into(),
            short_date_pattern: short_date_pattern.into(),
            long_date_pattern: long_date_pattern.into(),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), String> {
        let culture_ok = !self.culture.is_empty()
            && self
                .culture
                .split(['-', '_'])
                .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()));
        if !culture_ok {
            return Err(format!("Invalid culture tag: '{}'", self.culture));
        }
        validate_pattern("ShortDatePattern", &self.short_date_pattern)?;
        validate_pattern("LongDatePattern", &self.long_date_pattern)?;
        Ok(())
    }
}

impl Default for LocaleSettings {
    fn default() -> Self {
        Self {
            culture: DEFAULT_CULTURE.to_string(),
            short_date_pattern: DEFAULT_SHORT_DATE_PATTERN.to_string(),
            long_date_pattern: DEFAULT_LONG_DATE_PATTERN.to_string(),
        }
    }
}

fn validate_pattern(name: &str, pattern: &str) -> Result<(), String> {
    if pattern.trim().is_empty() {
        return Err(format!("{} cannot be empty", name));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(format!("{} is not a valid date pattern: '{}'", name, pattern));
    }
    Ok(())
}

/// Configuration for the OpenTransfer API.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "opentransfer-api",
    about = "HTTP API exposing OpenTransfer application data from PostgreSQL",
    version
)]
pub struct Config {
    /// PostgreSQL connection string, either a postgres:// URL or
    /// "Host=...;Database=...;Username=...;Password=..."
    #[arg(
        long = "connection-string",
        value_name = "CONNECTION",
        env = "OpenTransferConnection",
        hide_env_values = true
    )]
    pub connection_string: Option<String>,

    /// API key every request must present in the X-API-KEY header
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Culture tag, sent as Content-Language
    #[arg(long, default_value = DEFAULT_CULTURE, env = "Culture")]
    pub culture: String,

    /// strftime pattern for date values
    #[arg(long, default_value = DEFAULT_SHORT_DATE_PATTERN, env = "ShortDatePattern")]
    pub short_date_pattern: String,

    /// strftime pattern for timestamp values
    #[arg(long, default_value = DEFAULT_LONG_DATE_PATTERN, env = "LongDatePattern")]
    pub long_date_pattern: String,

    /// HTTP host to bind to
    #[arg(long, default_value = DEFAULT_HTTP_HOST, env = "OPENTRANSFER_HTTP_HOST")]
    pub http_host: String,

    /// HTTP port to bind to
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT, env = "OPENTRANSFER_HTTP_PORT")]
    pub http_port: u16,

    /// How function arguments are passed to the database
    #[arg(
        long,
        value_enum,
        default_value = "bound",
        env = "OPENTRANSFER_ARGUMENT_MODE"
    )]
    pub argument_mode: ArgumentMode,

    /// Statement timeout in seconds (0 disables)
    #[arg(
        long,
        default_value_t = DEFAULT_STATEMENT_TIMEOUT_SECS,
        env = "OPENTRANSFER_STATEMENT_TIMEOUT"
    )]
    pub statement_timeout: u64,

    /// Connection timeout in seconds (0 disables)
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "OPENTRANSFER_CONNECT_TIMEOUT"
    )]
    pub connect_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "OPENTRANSFER_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "OPENTRANSFER_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            connection_string: None,
            api_key: None,
            culture: DEFAULT_CULTURE.to_string(),
            short_date_pattern: DEFAULT_SHORT_DATE_PATTERN.to_string(),
            long_date_pattern: DEFAULT_LONG_DATE_PATTERN.to_string(),
            http_host: DEFAULT_HTTP_HOST.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            argument_mode: ArgumentMode::Bound,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT_SECS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// The configured connection string, falling back to the nested variable.
    ///
    /// Blank values count as missing.
    pub fn resolve_connection_string(&self) -> Option<String> {
        self.connection_string
            .clone()
            .or_else(|| std::env::var(NESTED_CONNECTION_STRING_ENV).ok())
            .filter(|s| !s.trim().is_empty())
    }

    /// The server-side API key, if one is configured and non-blank.
    pub fn configured_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn locale_settings(&self) -> Result<LocaleSettings, String> {
        LocaleSettings::new(
            &self.culture,
            &self.short_date_pattern,
            &self.long_date_pattern,
        )
    }

    /// Get the HTTP bind address.
    pub fn http_bind_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Get the statement timeout as a Duration, `None` when disabled.
    pub fn statement_timeout_duration(&self) -> Option<Duration> {
        (self.statement_timeout > 0).then(|| Duration::from_secs(self.statement_timeout))
    }

    /// Get the connection timeout as a Duration, `None` when disabled.
    pub fn connect_timeout_duration(&self) -> Option<Duration> {
        (self.connect_timeout > 0).then(|| Duration::from_secs(self.connect_timeout))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http_host, DEFAULT_HTTP_HOST);
        assert_eq!(config.http_port, DEFAULT_HTTP_PORT);
        assert_eq!(config.argument_mode, ArgumentMode::Bound);
        assert!(config.configured_api_key().is_none());
    }

    #[test]
    fn test_http_bind_addr() {
        let config = Config {
            http_host: "0.0.0.0".to_string(),
            http_port: 3000,
            ..Config::default()
        };
        assert_eq!(config.http_bind_addr(), "0.0.0.0:3000");
    }

    #[test]
    fn test_timeout_durations() {
        let config = Config {
            statement_timeout: 60,
            connect_timeout: 0,
            ..Config::default()
        };
        assert_eq!(
            config.statement_timeout_duration(),
            Some(Duration::from_secs(60))
        );
        assert_eq!(config.connect_timeout_duration(), None);
    }

    #[test]
    fn test_parse_from_args() {
        let config = Config::try_parse_from([
            "opentransfer-api",
            "--connection-string",
            "postgres://u:p@localhost/ot",
            "--api-key",
            "secret",
            "--argument-mode",
            "inline",
            "--http-port",
            "9000",
        ])
        .unwrap();
        assert_eq!(
            config.resolve_connection_string().as_deref(),
            Some("postgres://u:p@localhost/ot")
        );
        assert_eq!(config.configured_api_key(), Some("secret"));
        assert_eq!(config.argument_mode, ArgumentMode::Inline);
        assert_eq!(config.http_port, 9000);
    }

    #[test]
    fn test_blank_api_key_counts_as_missing() {
        let config = Config {
            api_key: Some("   ".to_string()),
            ..Config::default()
        };
        assert!(config.configured_api_key().is_none());
    }

    #[test]
    fn test_blank_connection_string_counts_as_missing() {
        let config = Config {
            connection_string: Some(" ".to_string()),
            ..Config::default()
        };
        // The nested fallback is not set in the test environment.
        if std::env::var(NESTED_CONNECTION_STRING_ENV).is_err() {
            assert!(config.resolve_connection_string().is_none());
        }
    }

    #[test]
    fn test_locale_settings_defaults_are_valid() {
        let locale = Config::default().locale_settings().unwrap();
        assert_eq!(locale, LocaleSettings::default());
    }

    #[test]
    fn test_locale_settings_validation() {
        assert!(LocaleSettings::new("da-DK", "%d-%m-%Y", "%A %d. %B %Y").is_ok());
        assert!(LocaleSettings::new("en_US", "%Y", "%Y").is_ok());

        let err = LocaleSettings::new("da DK", "%Y", "%Y").unwrap_err();
        assert!(err.contains("culture"));

        let err = LocaleSettings::new("da-DK", "%Q", "%Y").unwrap_err();
        assert!(err.contains("ShortDatePattern"));

        let err = LocaleSettings::new("da-DK", "%Y", "").unwrap_err();
        assert!(err.contains("LongDatePattern"));
    }

    #[test]
    fn test_argument_mode_display() {
        assert_eq!(ArgumentMode::Bound.to_string(), "bound");
        assert_eq!(ArgumentMode::Inline.to_string(), "inline");
    }
}
