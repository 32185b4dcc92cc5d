//! Connection settings and the session seam.
//!
//! [`ConnectionString`] parses either a `postgres://` URL or the
//! `Host=...;Database=...` key/value form. [`Connector`] opens one
//! [`Session`] per logical operation; [`PgConnector`] is the real
//! PostgreSQL implementation, tests plug in their own.

use crate::db::encoder::Statement;
use crate::db::params::bind_all;
use crate::db::types::{categorize_type, decode_column, materialize};
use crate::error::{DbResult, GatewayError};
use crate::models::TabularResult;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Column, Connection, PgConnection, Row, TypeInfo};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MASK: &str = "****";

/// Parsed, immutable connection settings.
#[derive(Clone)]
pub struct ConnectionString {
    raw: String,
    options: PgConnectOptions,
    /// `Some(None)` when the string disables the limit with `0`
    connect_timeout: Option<Option<Duration>>,
    statement_timeout: Option<Option<Duration>>,
}

impl ConnectionString {
    /// Parse a connection string.
    ///
    /// Blank input is a configuration error, as is any malformed segment.
    pub fn parse(raw: &str) -> DbResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GatewayError::configuration(
                "Connection string cannot be null or empty",
            ));
        }

        if is_url(trimmed) {
            let options = PgConnectOptions::from_str(trimmed).map_err(|e| {
                GatewayError::configuration(format!("Invalid connection URL: {}", e))
            })?;
            return Ok(Self {
                raw: trimmed.to_string(),
                options,
                connect_timeout: None,
                statement_timeout: None,
            });
        }

        let mut settings = Self {
            raw: trimmed.to_string(),
            options: PgConnectOptions::new(),
            connect_timeout: None,
            statement_timeout: None,
        };
        for (key, value) in key_value_pairs(trimmed)? {
            settings.apply(&key, value)?;
        }
        Ok(settings)
    }

    fn apply(&mut self, key: &str, value: &str) -> DbResult<()> {
        let options = std::mem::replace(&mut self.options, PgConnectOptions::new());
        self.options = match key {
            "host" | "server" => options.host(value),
            "port" => options.port(value.parse().map_err(|_| {
                GatewayError::configuration(format!("Invalid port: '{}'", value))
            })?),
            "database" | "db" | "initial catalog" => options.database(value),
            "username" | "user name" | "user id" | "userid" | "user" | "uid" => {
                options.username(value)
            }
            "password" | "pwd" => options.password(value),
            "ssl mode" | "sslmode" => options.ssl_mode(parse_ssl_mode(value)?),
            "application name" => options.application_name(value),
            "search path" => options.options([("search_path", value)]),
            "timeout" | "connect timeout" | "connection timeout" => {
                self.connect_timeout = Some(parse_seconds(key, value)?);
                options
            }
            "command timeout" => {
                self.statement_timeout = Some(parse_seconds(key, value)?);
                options
            }
            other => {
                warn!(key = %other, "Ignoring unsupported connection string key");
                options
            }
        };
        Ok(())
    }

    pub fn options(&self) -> &PgConnectOptions {
        &self.options
    }

    /// `Timeout=` from a key/value string: `None` when absent,
    /// `Some(None)` when set to `0`.
    pub fn connect_timeout(&self) -> Option<Option<Duration>> {
        self.connect_timeout
    }

    /// `Command Timeout=` from a key/value string, same shape as
    /// [`connect_timeout`](Self::connect_timeout).
    pub fn statement_timeout(&self) -> Option<Option<Duration>> {
        self.statement_timeout
    }

    /// The string's statement timeout, or `default` when it sets none.
    pub fn statement_timeout_or(&self, default: Option<Duration>) -> Option<Duration> {
        self.statement_timeout.unwrap_or(default)
    }

    /// Display-safe rendering with the password replaced.
    pub fn masked(&self) -> String {
        if is_url(&self.raw) {
            return mask_url(&self.raw);
        }
        self.raw
            .split(';')
            .map(|segment| match segment.split_once('=') {
                Some((key, _)) if matches!(normalize_key(key).as_str(), "password" | "pwd") => {
                    format!("{}={}", key, MASK)
                }
                _ => segment.to_string(),
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl FromStr for ConnectionString {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("masked", &self.masked())
            .field("connect_timeout", &self.connect_timeout)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

fn is_url(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower.starts_with("postgres://") || lower.starts_with("postgresql://")
}

fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn key_value_pairs(raw: &str) -> DbResult<Vec<(String, &str)>> {
    raw.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                GatewayError::configuration(format!(
                    "Connection string segment '{}' is not of the form Key=Value",
                    segment
                ))
            })?;
            let key = normalize_key(key);
            if key.is_empty() {
                return Err(GatewayError::configuration(
                    "Connection string contains an empty key",
                ));
            }
            Ok((key, value.trim()))
        })
        .collect()
}

fn parse_ssl_mode(value: &str) -> DbResult<PgSslMode> {
    let normalized = match value.to_ascii_lowercase().as_str() {
        "verifyca" => "verify-ca".to_string(),
        "verifyfull" => "verify-full".to_string(),
        other => other.to_string(),
    };
    PgSslMode::from_str(&normalized)
        .map_err(|_| GatewayError::configuration(format!("Invalid SSL mode: '{}'", value)))
}

/// Whole seconds; zero disables the limit.
fn parse_seconds(key: &str, value: &str) -> DbResult<Option<Duration>> {
    let secs: u64 = value.parse().map_err(|_| {
        GatewayError::configuration(format!("Invalid value for '{}': '{}'", key, value))
    })?;
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn mask_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some(MASK));
            }
            parsed.to_string()
        }
        Err(_) => {
            // Unparseable: mask everything between the scheme and '@'
            match (raw.find("://"), raw.rfind('@')) {
                (Some(scheme_end), Some(at)) if at > scheme_end => {
                    format!("{}{}{}", &raw[..scheme_end + 3], MASK, &raw[at..])
                }
                _ => raw.to_string(),
            }
        }
    }
}

// =============================================================================
// Connector / Session
// =============================================================================

/// Opens sessions for the gateway.
pub trait Connector: Send + Sync {
    type Session: Session;

    fn connect(&self) -> impl Future<Output = DbResult<Self::Session>> + Send;
}

/// One open database session.
pub trait Session: Send {
    /// Run a statement and materialize every row.
    fn fetch_all(
        &mut self,
        statement: &Statement,
    ) -> impl Future<Output = DbResult<TabularResult>> + Send;

    /// First column of the first row; `None` for no row or SQL NULL.
    fn fetch_scalar(
        &mut self,
        statement: &Statement,
    ) -> impl Future<Output = DbResult<Option<JsonValue>>> + Send;

    /// Close the session cleanly.
    fn close(self) -> impl Future<Output = DbResult<()>> + Send;
}

/// Opens a fresh PostgreSQL connection per session.
#[derive(Debug, Clone)]
pub struct PgConnector {
    settings: Arc<ConnectionString>,
    default_connect_timeout: Option<Duration>,
}

impl PgConnector {
    pub fn new(settings: ConnectionString) -> Self {
        Self {
            settings: Arc::new(settings),
            default_connect_timeout: None,
        }
    }

    /// Used when the connection string does not set its own timeout.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_connect_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &ConnectionString {
        &self.settings
    }

    fn connect_timeout(&self) -> Option<Duration> {
        self.settings
            .connect_timeout()
            .unwrap_or(self.default_connect_timeout)
    }
}

fn connect_failure(err: sqlx::Error) -> GatewayError {
    match err {
        sqlx::Error::Configuration(msg) => GatewayError::configuration(msg.to_string()),
        other => GatewayError::connection(
            other.to_string(),
            "Check the connection string and that the database server is reachable",
        ),
    }
}

impl Connector for PgConnector {
    type Session = PgSession;

    async fn connect(&self) -> DbResult<PgSession> {
        debug!(target = %self.settings.masked(), "Opening database connection");
        let connecting = PgConnection::connect_with(self.settings.options());
        let conn = match self.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| GatewayError::timeout("connect", limit))?
                .map_err(connect_failure)?,
            None => connecting.await.map_err(connect_failure)?,
        };
        Ok(PgSession { conn })
    }
}

/// A single open [`PgConnection`].
#[derive(Debug)]
pub struct PgSession {
    conn: PgConnection,
}

impl Session for PgSession {
    async fn fetch_all(&mut self, statement: &Statement) -> DbResult<TabularResult> {
        let rows = bind_all(sqlx::query(&statement.sql), &statement.binds)
            .fetch_all(&mut self.conn)
            .await?;
        Ok(materialize(&rows))
    }

    async fn fetch_scalar(&mut self, statement: &Statement) -> DbResult<Option<JsonValue>> {
        let row = bind_all(sqlx::query(&statement.sql), &statement.binds)
            .fetch_optional(&mut self.conn)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(column) = row.columns().first() else {
            return Ok(None);
        };
        let category = categorize_type(column.type_info().name());
        match decode_column(&row, 0, category)? {
            JsonValue::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    async fn close(self) -> DbResult<()> {
        self.conn.close().await.map_err(GatewayError::from)
    }
}
