//! # adobridge
//!
//! Pooled, cached, cursor-oriented data access for legacy recordset clients.
//!
//! Applications written against the ADO programming model expect connection
//! strings, BOF/EOF cursors and read-only/optimistic locks. This crate
//! provides that model over any number of database backends.
//!
//! ## Features
//!
//! - **Connection Pooling**: one semaphore-bounded pool per backend
//!   fingerprint, with per-provider sizing and timeouts
//! - **Query Cache**: TTL + LRU cache with an optional remote tier that
//!   degrades to local-only on failure
//! - **Recordsets**: owned row snapshots with positional navigation,
//!   Find/Filter/Sort and optimistic edits
//! - **Pluggable Backends**: wire protocols live behind the
//!   [`provider::Driver`] and [`provider::PoolAdapter`] traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use adobridge::prelude::*;
//!
//! let config = EngineConfig::from_file("adobridge.yaml")?;
//!
//! let cache = Arc::new(CacheManager::new(config.cache.clone(), None));
//! cache.initialize().await;
//!
//! let pools = Arc::new(ConnectionPoolManager::new(config.pools.clone()));
//! pools.register_driver(Arc::new(MySqlDriver::new()));
//!
//! let db = DatabaseManager::new(config.query.clone(), cache, pools);
//! let conn = db
//!     .create_vb6_connection("Server=db1;Database=sales;UID=app;PWD=secret", ProviderKind::MySql)
//!     .await?;
//!
//! let rs = db
//!     .create_recordset(&conn, "SELECT * FROM orders WHERE status = ?", &["open".into()],
//!         RecordsetOptions::default().with_lock_type(LockType::Optimistic))
//!     .await?;
//! db.find(&rs.id, "Total > 100", false, SearchDirection::Forward)?;
//!
//! db.shutdown().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cache;
pub mod config;
pub mod connection;
pub mod connection_string;
pub mod criteria;
pub mod error;
pub mod logging;
pub mod manager;
pub mod pool;
pub mod provider;
pub mod recordset;
pub mod sql;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{FieldMetadata, FieldType, QueryResult, Row, Value};

    // Configuration
    pub use crate::config::{CacheConfig, EngineConfig, PoolOverrides, PoolsConfig, QueryConfig};

    // Providers
    pub use crate::provider::{
        AdapterFactory, ConnectionHandle, Driver, DriverConnection, PoolAdapter, ProviderKind,
        RawResult,
    };

    // Pool types
    pub use crate::pool::{
        AtomicPoolStats, ConnectionPoolManager, ManagedPool, PoolInstance, PoolManagerStatus,
        PoolOptions, PoolSettings, PoolSnapshot, PoolStatus,
    };

    // Cache types
    pub use crate::cache::{CacheEntry, CacheManager, CacheStats, RemoteCacheStore, SweepReport};

    // Connections
    pub use crate::connection::{
        ConnectMode, Connection, ConnectionAttributes, ConnectionInfo, ConnectionState,
        CursorLocation, IsolationLevel,
    };
    pub use crate::connection_string::ConnectionOptions;

    // Recordsets
    pub use crate::criteria::{Criteria, SortKey};
    pub use crate::recordset::{
        CursorType, EditMode, LockType, Recordset, RecordsetOptions, RecordsetState,
        RecordsetView, SearchDirection,
    };

    // Orchestration
    pub use crate::manager::{ConnectionStatus, DatabaseManager, ManagerStats, ManagerStatus};

    pub use std::sync::Arc;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use manager::DatabaseManager;
pub use types::Value;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _value = Value::Int32(42);
        let _config = EngineConfig::default();
        let _options = RecordsetOptions::default().with_lock_type(LockType::Optimistic);
        let _pool = PoolOptions::new(ProviderKind::PostgreSql, "localhost");
    }

    #[test]
    fn test_error_types() {
        let err = Error::timeout("pool exhausted");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Timeout);

        let err = Error::read_only("locked");
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_value_types() {
        let v = Value::from(42_i32);
        assert!(!v.is_null());
        assert_eq!(v.as_i64(), Some(42));

        let v = Value::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(LockType::default(), LockType::ReadOnly);
        assert_eq!(CursorType::default(), CursorType::Static);
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }
}
