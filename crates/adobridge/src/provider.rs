//! Provider abstraction for adobridge
//!
//! The engine never speaks a wire protocol. Each backend plugs in at one of
//! two seams:
//! - [`PoolAdapter`]: a complete pool (acquire, release, execute, close),
//!   built per fingerprint by an [`AdapterFactory`]
//! - [`Driver`]: a physical-connection factory; wrap it with
//!   [`ManagedPool::factory`](crate::pool::ManagedPool::factory) to get a
//!   pooled adapter with the stock sizing and timeout behavior

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pool::{PoolOptions, PoolSettings, PoolSnapshot};
use crate::types::{Row, Value};

/// Database backend identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// MySQL/MariaDB
    MySql,
    /// PostgreSQL
    PostgreSql,
    /// Microsoft SQL Server
    SqlServer,
    /// Oracle
    Oracle,
    /// SQLite
    Sqlite,
    /// MongoDB
    MongoDb,
    /// Generic ODBC data source
    Odbc,
}

impl ProviderKind {
    /// All known providers
    pub const ALL: [ProviderKind; 7] = [
        Self::MySql,
        Self::PostgreSql,
        Self::SqlServer,
        Self::Oracle,
        Self::Sqlite,
        Self::MongoDb,
        Self::Odbc,
    ];

    /// Port assumed when the connection string names none
    pub const fn default_port(self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::PostgreSql => Some(5432),
            Self::SqlServer => Some(1433),
            Self::Oracle => Some(1521),
            Self::MongoDb => Some(27017),
            Self::Sqlite | Self::Odbc => None,
        }
    }

    /// Stable lowercase tag used in fingerprints and configuration keys
    pub const fn tag(self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::SqlServer => "sqlserver",
            Self::Oracle => "oracle",
            Self::Sqlite => "sqlite",
            Self::MongoDb => "mongodb",
            Self::Odbc => "odbc",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MySql => write!(f, "MySQL"),
            Self::PostgreSql => write!(f, "PostgreSQL"),
            Self::SqlServer => write!(f, "SQL Server"),
            Self::Oracle => write!(f, "Oracle"),
            Self::Sqlite => write!(f, "SQLite"),
            Self::MongoDb => write!(f, "MongoDB"),
            Self::Odbc => write!(f, "ODBC"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    /// Accepts the tags above plus the OLE DB provider names legacy
    /// connection strings carry.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let kind = match normalized.as_str() {
            "mysql" | "mariadb" | "mysqlprov" => Self::MySql,
            "postgres" | "postgresql" | "pg" | "pgnp" => Self::PostgreSql,
            "sqlserver" | "mssql" | "sqloledb" | "sqlncli" | "sqlncli11" | "msoledbsql" => {
                Self::SqlServer
            }
            "oracle" | "oraoledb" | "oraoledb.oracle" | "msdaora" => Self::Oracle,
            "sqlite" | "sqlite3" => Self::Sqlite,
            "mongodb" | "mongo" => Self::MongoDb,
            "odbc" | "msdasql" => Self::Odbc,
            _ => return Err(Error::validation(format!("unknown provider '{}'", s))),
        };
        Ok(kind)
    }
}

/// Opaque token for a checked-out pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Wrap a raw handle id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw handle id
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Rows or affected count returned by a backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    /// Column names, present even when no rows came back
    pub columns: Vec<String>,
    /// Returned rows
    pub rows: Vec<Row>,
    /// Rows affected by a write
    pub rows_affected: u64,
}

impl RawResult {
    /// Result of a read
    pub fn rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let rows_affected = rows.len() as u64;
        Self {
            columns,
            rows,
            rows_affected,
        }
    }

    /// Result of a write
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Default::default()
        }
    }
}

/// Pool capability every backend must offer
#[async_trait]
pub trait PoolAdapter: Send + Sync {
    /// Provider this pool talks to
    fn provider(&self) -> ProviderKind;

    /// Check out a connection, waiting at most the acquire timeout
    async fn acquire(&self) -> Result<ConnectionHandle>;

    /// Return a checked-out connection
    async fn release(&self, handle: ConnectionHandle) -> Result<()>;

    /// Run a statement on a checked-out connection.
    ///
    /// `sql` already has its parameters substituted; `params` carries the
    /// original values for drivers that want to log or re-bind them.
    async fn execute_raw(
        &self,
        handle: ConnectionHandle,
        sql: &str,
        params: &[Value],
    ) -> Result<RawResult>;

    /// Point-in-time pool occupancy and counters
    fn status(&self) -> PoolSnapshot;

    /// Close every connection and refuse further acquires
    async fn close(&self) -> Result<()>;
}

/// Builds a pool adapter for one fingerprint
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Provider served by this factory
    fn provider(&self) -> ProviderKind;

    /// Construct a pool for the given target and sizing
    async fn create(
        &self,
        options: &PoolOptions,
        settings: &PoolSettings,
    ) -> Result<Arc<dyn PoolAdapter>>;
}

/// A physical connection opened by a [`Driver`]
#[async_trait]
pub trait DriverConnection: Send + Sync {
    /// Execute a statement
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<RawResult>;

    /// Check if connection is valid/alive
    async fn ping(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Factory for physical connections
#[async_trait]
pub trait Driver: Send + Sync {
    /// Provider this driver speaks
    fn provider(&self) -> ProviderKind;

    /// Open a new physical connection
    async fn connect(&self, options: &PoolOptions) -> Result<Box<dyn DriverConnection>>;
}
