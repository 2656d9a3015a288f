//! Logical connections
//!
//! A [`Connection`] is what legacy client code holds on to: an id, a
//! provider, connection attributes and a pooled handle checked out for its
//! whole lifetime. The state machine is:
//!
//! ```text
//! connecting ─► open ─► executing ─► fetching ─► open ... ─► closed
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pool::PoolInstance;
use crate::provider::{ConnectionHandle, ProviderKind};

/// Connect timeout applied when the connection string names none
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Handle being acquired
    Connecting,
    /// Idle and usable
    Open,
    /// Statement in flight
    Executing,
    /// Result rows being copied
    Fetching,
    /// Terminal
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Executing => "executing",
            Self::Fetching => "fetching",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Where cursors live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorLocation {
    /// Server-side cursor
    #[default]
    Server,
    /// Client-side cursor
    Client,
}

/// Access permissions requested for the connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    /// Read-only
    Read,
    /// Write-only
    Write,
    /// Read and write
    #[default]
    ReadWrite,
}

impl std::str::FromStr for ConnectMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "read" | "admoderead" => Ok(Self::Read),
            "write" | "admodewrite" => Ok(Self::Write),
            "readwrite" | "admodereadwrite" => Ok(Self::ReadWrite),
            _ => Err(Error::validation(format!("unknown connect mode '{}'", s))),
        }
    }
}

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Read uncommitted - dirty reads possible
    ReadUncommitted,
    /// Read committed - no dirty reads
    #[default]
    ReadCommitted,
    /// Repeatable read - no non-repeatable reads
    RepeatableRead,
    /// Serializable - full isolation
    Serializable,
    /// Snapshot isolation (SQL Server specific)
    Snapshot,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION statement
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
            Self::Snapshot => "SNAPSHOT",
        }
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

impl std::str::FromStr for IsolationLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "readuncommitted" | "browse" | "chaos" => Ok(Self::ReadUncommitted),
            "readcommitted" | "cursorstability" => Ok(Self::ReadCommitted),
            "repeatableread" => Ok(Self::RepeatableRead),
            "serializable" | "isolated" => Ok(Self::Serializable),
            "snapshot" => Ok(Self::Snapshot),
            _ => Err(Error::validation(format!("unknown isolation level '{}'", s))),
        }
    }
}

/// Per-connection attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionAttributes {
    /// Bound on acquiring the pooled handle
    pub connect_timeout: Duration,
    /// Cursor location
    pub cursor_location: CursorLocation,
    /// Access mode
    pub mode: ConnectMode,
    /// Isolation level
    pub isolation_level: IsolationLevel,
}

impl Default for ConnectionAttributes {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cursor_location: CursorLocation::default(),
            mode: ConnectMode::default(),
            isolation_level: IsolationLevel::default(),
        }
    }
}

impl ConnectionAttributes {
    /// Read `mode`, `isolation level` and `cursor location` from extra
    /// connection-string properties; absent keys keep their defaults.
    pub fn from_properties(
        timeout: Option<Duration>,
        properties: &HashMap<String, String>,
    ) -> Result<Self> {
        let mut attrs = Self::default();
        if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
            attrs.connect_timeout = timeout;
        }
        if let Some(mode) = properties.get("mode") {
            attrs.mode = mode.parse()?;
        }
        if let Some(level) = properties.get("isolation level") {
            attrs.isolation_level = level.parse()?;
        }
        if let Some(location) = properties.get("cursor location") {
            attrs.cursor_location = match location.to_ascii_lowercase().as_str() {
                "server" | "aduseserver" => CursorLocation::Server,
                "client" | "aduseclient" => CursorLocation::Client,
                other => {
                    return Err(Error::validation(format!(
                        "unknown cursor location '{}'",
                        other
                    )))
                }
            };
        }
        Ok(attrs)
    }
}

/// An open logical connection holding one pooled handle
pub struct Connection {
    id: String,
    provider: ProviderKind,
    attributes: ConnectionAttributes,
    pool: Arc<PoolInstance>,
    handle: ConnectionHandle,
    state: Mutex<ConnectionState>,
    created_at: DateTime<Utc>,
    last_used: Mutex<DateTime<Utc>>,
    queries_executed: AtomicU64,
    cache_hits: AtomicU64,
    errors: AtomicU64,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("pool", &self.pool.fingerprint())
            .field("handle", &self.handle)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Register an open connection over an already acquired handle
    pub fn new(
        id: String,
        attributes: ConnectionAttributes,
        pool: Arc<PoolInstance>,
        handle: ConnectionHandle,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider: pool.provider(),
            attributes,
            pool,
            handle,
            state: Mutex::new(ConnectionState::Open),
            created_at: now,
            last_used: Mutex::new(now),
            queries_executed: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Connection id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Backend provider
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Attributes fixed at open time
    pub fn attributes(&self) -> &ConnectionAttributes {
        &self.attributes
    }

    /// Pool this connection draws from
    pub fn pool(&self) -> &Arc<PoolInstance> {
        &self.pool
    }

    /// Pooled handle held for the connection's lifetime
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Whether the connection accepts statements
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last statement time
    pub fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock()
    }

    /// Move open → executing. The returned guard moves the connection back
    /// to open when dropped, unless it was closed in the meantime.
    pub fn begin_execute(&self) -> Result<ExecutionGuard<'_>> {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Open => {
                *state = ConnectionState::Executing;
                *self.last_used.lock() = Utc::now();
                Ok(ExecutionGuard { conn: self })
            }
            ConnectionState::Closed => Err(Error::invalid_state(format!(
                "connection {} is closed",
                self.id
            ))),
            other => Err(Error::invalid_state(format!(
                "connection {} is {}, not open",
                self.id, other
            ))),
        }
    }

    /// Mark closed; returns false if it already was
    pub fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        let was_open = *state != ConnectionState::Closed;
        *state = ConnectionState::Closed;
        was_open
    }

    pub(crate) fn record_query(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Statements executed
    pub fn queries_executed(&self) -> u64 {
        self.queries_executed.load(Ordering::Relaxed)
    }

    /// Statements answered from the cache
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Failed statements
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Serializable snapshot
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            provider: self.provider,
            state: self.state(),
            pool: self.pool.fingerprint().to_string(),
            attributes: self.attributes.clone(),
            created_at: self.created_at,
            last_used: self.last_used(),
            queries_executed: self.queries_executed(),
            cache_hits: self.cache_hits(),
            errors: self.errors(),
        }
    }
}

/// Keeps a connection in `executing`/`fetching` for the span of one statement
#[must_use]
pub struct ExecutionGuard<'a> {
    conn: &'a Connection,
}

impl ExecutionGuard<'_> {
    /// Statement returned; rows are being copied
    pub fn fetching(&self) {
        let mut state = self.conn.state.lock();
        if *state == ConnectionState::Executing {
            *state = ConnectionState::Fetching;
        }
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.conn.state.lock();
        if *state != ConnectionState::Closed {
            *state = ConnectionState::Open;
        }
    }
}

/// Connection snapshot for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    /// Connection id
    pub id: String,
    /// Backend provider
    pub provider: ProviderKind,
    /// Current state
    pub state: ConnectionState,
    /// Pool fingerprint
    pub pool: String,
    /// Attributes
    pub attributes: ConnectionAttributes,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last statement time
    pub last_used: DateTime<Utc>,
    /// Statements executed
    pub queries_executed: u64,
    /// Statements answered from the cache
    pub cache_hits: u64,
    /// Failed statements
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::ReadCommitted.to_sql(), "READ COMMITTED");
        assert_eq!(IsolationLevel::Serializable.to_string(), "SERIALIZABLE");
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_isolation_level_parse() {
        assert_eq!(
            "Repeatable Read".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "adXactCursorStability".trim_start_matches("adXact").parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert!("whatever".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn test_connect_mode_parse() {
        assert_eq!("adModeRead".parse::<ConnectMode>().unwrap(), ConnectMode::Read);
        assert_eq!("Read/Write".parse::<ConnectMode>().unwrap(), ConnectMode::ReadWrite);
        assert!("share".parse::<ConnectMode>().is_err());
    }

    #[test]
    fn test_attributes_from_properties() {
        let mut props = HashMap::new();
        props.insert("mode".to_string(), "Read".to_string());
        props.insert("cursor location".to_string(), "adUseClient".to_string());

        let attrs = ConnectionAttributes::from_properties(Some(Duration::from_secs(5)), &props)
            .unwrap();
        assert_eq!(attrs.mode, ConnectMode::Read);
        assert_eq!(attrs.cursor_location, CursorLocation::Client);
        assert_eq!(attrs.connect_timeout, Duration::from_secs(5));
        assert_eq!(attrs.isolation_level, IsolationLevel::ReadCommitted);

        let attrs = ConnectionAttributes::from_properties(Some(Duration::ZERO), &HashMap::new())
            .unwrap();
        assert_eq!(attrs.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }
}
