//! DatabaseManager: legacy connections, cache-through queries and
//! recordset cursors
//!
//! # Example
//!
//! ```rust,ignore
//! use adobridge::prelude::*;
//!
//! let cache = Arc::new(CacheManager::new(CacheConfig::default(), None));
//! cache.initialize().await;
//! let pools = Arc::new(ConnectionPoolManager::new(PoolsConfig::default()));
//! pools.register_driver(Arc::new(MySqlDriver::new()));
//!
//! let db = DatabaseManager::new(QueryConfig::default(), cache, pools);
//! let conn = db
//!     .create_vb6_connection("Server=db1;Database=sales;UID=app;PWD=secret", ProviderKind::MySql)
//!     .await?;
//!
//! let rs = db
//!     .create_recordset(&conn, "SELECT * FROM customers", &[], RecordsetOptions::default())
//!     .await?;
//! while !db.move_next(&rs.id)?.eof { /* ... */ }
//!
//! db.close_connection(&conn).await?;
//! db.shutdown().await;
//! ```

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheManager, CacheStats};
use crate::config::QueryConfig;
use crate::connection::{ConnectMode, Connection, ConnectionAttributes, ConnectionInfo};
use crate::connection_string::ConnectionOptions;
use crate::error::{Error, Result};
use crate::pool::{ConnectionPoolManager, PoolManagerStatus};
use crate::provider::ProviderKind;
use crate::recordset::{Recordset, RecordsetOptions, RecordsetView, SearchDirection};
use crate::sql;
use crate::types::{FieldMetadata, QueryResult, Row, Value};

#[derive(Debug, Default)]
struct AtomicManagerStats {
    queries_executed: AtomicU64,
    cache_hits: AtomicU64,
    errors: AtomicU64,
    slow_queries: AtomicU64,
}

/// Aggregate engine statistics
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    /// Open connections
    pub connections: usize,
    /// Open recordsets
    pub recordsets: usize,
    /// Statements executed
    pub queries_executed: u64,
    /// Statements answered from the cache
    pub cache_hits: u64,
    /// Failed statements
    pub errors: u64,
    /// Statements slower than the slow-query threshold
    pub slow_queries: u64,
    /// Time since the manager was created
    pub uptime: Duration,
    /// Cache statistics
    pub cache: CacheStats,
    /// Pool statistics
    pub pools: PoolManagerStatus,
}

/// Per-connection status
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Connection snapshot
    #[serde(flatten)]
    pub info: ConnectionInfo,
    /// Recordsets opened on this connection
    pub recordsets: Vec<String>,
}

/// Engine status
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    /// Whether `shutdown` has run
    pub shutting_down: bool,
    /// Open connections
    pub connections: Vec<ConnectionStatus>,
    /// Pool status
    pub pools: PoolManagerStatus,
    /// Whether the cache round-trips a probe
    pub cache_healthy: bool,
}

/// Orchestrates connections, queries and recordsets
pub struct DatabaseManager {
    config: QueryConfig,
    cache: Arc<CacheManager>,
    pools: Arc<ConnectionPoolManager>,
    connections: DashMap<String, Arc<Connection>>,
    recordsets: DashMap<String, Arc<Mutex<Recordset>>>,
    stats: AtomicManagerStats,
    started_at: Instant,
    shutting_down: AtomicBool,
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("config", &self.config)
            .field("connections", &self.connections.len())
            .field("recordsets", &self.recordsets.len())
            .finish()
    }
}

impl DatabaseManager {
    /// Create a manager over shared cache and pool managers
    pub fn new(
        config: QueryConfig,
        cache: Arc<CacheManager>,
        pools: Arc<ConnectionPoolManager>,
    ) -> Self {
        Self {
            config,
            cache,
            pools,
            connections: DashMap::new(),
            recordsets: DashMap::new(),
            stats: AtomicManagerStats::default(),
            started_at: Instant::now(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Query cache
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Pool manager
    pub fn pools(&self) -> &Arc<ConnectionPoolManager> {
        &self.pools
    }

    fn connection(&self, id: &str) -> Result<Arc<Connection>> {
        self.connections
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("connection", id))
    }

    fn recordset(&self, id: &str) -> Result<Arc<Mutex<Recordset>>> {
        self.recordsets
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found("recordset", id))
    }

    fn with_recordset<R>(
        &self,
        id: &str,
        op: impl FnOnce(&mut Recordset) -> Result<R>,
    ) -> Result<R> {
        let rs = self.recordset(id)?;
        let mut guard = rs.lock();
        op(&mut guard)
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Open a connection from a legacy connection string.
    ///
    /// The pooled handle is acquired here and held until
    /// [`close_connection`](Self::close_connection). Returns the connection id.
    pub async fn create_vb6_connection(
        &self,
        connection_string: &str,
        provider: ProviderKind,
    ) -> Result<String> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::invalid_state("database manager is shut down"));
        }

        let parsed = ConnectionOptions::parse(connection_string)?;
        let attributes = ConnectionAttributes::from_properties(parsed.timeout, &parsed.properties)?;
        let pool = self.pools.get_pool(&parsed.to_pool_options(provider)).await?;

        let handle = tokio::time::timeout(attributes.connect_timeout, pool.adapter().acquire())
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "connecting to {} took longer than {}s",
                    parsed.host,
                    attributes.connect_timeout.as_secs()
                ))
            })??;

        let id = Uuid::new_v4().to_string();
        let conn = Arc::new(Connection::new(id.clone(), attributes, pool, handle));
        info!(
            connection = %id,
            provider = %provider,
            host = %parsed.host,
            database = parsed.database.as_deref().unwrap_or(""),
            "Connection opened"
        );
        self.connections.insert(id.clone(), conn);
        Ok(id)
    }

    /// Snapshot of one connection
    pub fn connection_info(&self, connection_id: &str) -> Result<ConnectionInfo> {
        Ok(self.connection(connection_id)?.info())
    }

    /// Close a connection, every recordset opened on it, and return its
    /// pooled handle
    pub async fn close_connection(&self, connection_id: &str) -> Result<()> {
        let (_, conn) = self
            .connections
            .remove(connection_id)
            .ok_or_else(|| Error::not_found("connection", connection_id))?;
        conn.mark_closed();

        let closed = self.close_recordsets_of(connection_id);

        if let Err(e) = conn.pool().adapter().release(conn.handle()).await {
            warn!(
                connection = %connection_id,
                handle = %conn.handle(),
                error = %e,
                "Releasing pooled handle failed"
            );
        }

        info!(connection = %connection_id, recordsets = closed, "Connection closed");
        Ok(())
    }

    fn close_recordsets_of(&self, connection_id: &str) -> usize {
        let ids: Vec<String> = self
            .recordsets
            .iter()
            .filter(|entry| entry.value().lock().connection_id() == connection_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = 0;
        for id in &ids {
            if let Some((_, rs)) = self.recordsets.remove(id) {
                rs.lock().close();
                closed += 1;
            }
        }
        closed
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Execute a statement.
    ///
    /// Reads (`SELECT ...`) are served from the cache when possible and
    /// cached afterwards when small enough; writes always reach the backend.
    /// Cache failures never fail the query.
    pub async fn execute_query(
        &self,
        connection_id: &str,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult> {
        let conn = self.connection(connection_id)?;
        if !conn.is_open() {
            return Err(Error::invalid_state(format!(
                "connection {} is {}, not open",
                connection_id,
                conn.state()
            )));
        }
        if sql.trim().is_empty() {
            return Err(Error::validation("SQL statement is empty"));
        }

        let outcome = self.run_statement(&conn, sql, params).await;
        if let Err(e) = &outcome {
            conn.record_error();
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            debug!(connection = %connection_id, error = %e, "Statement failed");
        }
        outcome
    }

    async fn run_statement(
        &self,
        conn: &Connection,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult> {
        let read_only = sql::is_read_only(sql);
        if !read_only && conn.attributes().mode == ConnectMode::Read {
            return Err(Error::read_only(format!(
                "connection {} was opened read-only",
                conn.id()
            )));
        }

        let guard = conn.begin_execute()?;
        let start = Instant::now();
        conn.record_query();
        self.stats.queries_executed.fetch_add(1, Ordering::Relaxed);

        let cache_key = if read_only && self.config.cache_enabled {
            match sql::cache_key(sql, params) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(error = %e, "Cannot derive cache key, bypassing cache");
                    None
                }
            }
        } else {
            None
        };

        if let Some(key) = &cache_key {
            if let Some(mut cached) = self.cache.get::<QueryResult>(key).await {
                cached.from_cache = true;
                cached.execution_time = start.elapsed();
                conn.record_cache_hit();
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(connection = %conn.id(), rows = cached.row_count(), "Served from cache");
                return Ok(cached);
            }
        }

        let bound = sql::bind_parameters(sql, params)?;
        let raw = conn
            .pool()
            .adapter()
            .execute_raw(conn.handle(), &bound, params)
            .await?;
        guard.fetching();

        let columns = if raw.columns.is_empty() {
            raw.rows
                .first()
                .map(|row| row.columns().to_vec())
                .unwrap_or_default()
        } else {
            raw.columns
        };
        let fields = FieldMetadata::infer(&columns, &raw.rows);
        let result = QueryResult {
            records_affected: raw.rows_affected,
            data: raw.rows,
            execution_time: start.elapsed(),
            from_cache: false,
            fields,
        };
        drop(guard);

        if result.execution_time > self.config.slow_query_threshold() {
            self.stats.slow_queries.fetch_add(1, Ordering::Relaxed);
            warn!(
                connection = %conn.id(),
                provider = %conn.provider(),
                elapsed_ms = result.execution_time.as_millis() as u64,
                threshold_ms = self.config.slow_query_threshold_ms,
                sql = %sql,
                "Slow query"
            );
        }

        if let Some(key) = &cache_key {
            if result.row_count() < self.config.max_cached_rows {
                if let Err(e) = self.cache.set(key, &result, self.config.cache_ttl_secs).await {
                    warn!(error = %e, "Caching query result failed");
                }
            }
        }

        Ok(result)
    }

    // ------------------------------------------------------------------
    // Recordsets
    // ------------------------------------------------------------------

    /// Run `source` and open a recordset over its rows
    pub async fn create_recordset(
        &self,
        connection_id: &str,
        source: &str,
        params: &[Value],
        options: RecordsetOptions,
    ) -> Result<RecordsetView> {
        let result = self.execute_query(connection_id, source, params).await?;

        let id = Uuid::new_v4().to_string();
        let rs = Recordset::from_result(
            id.clone(),
            connection_id,
            source,
            params.to_vec(),
            options,
            &result,
        );
        let view = rs.view();
        debug!(
            recordset = %id,
            connection = %connection_id,
            records = view.record_count,
            from_cache = result.from_cache,
            "Recordset opened"
        );
        self.recordsets.insert(id.clone(), Arc::new(Mutex::new(rs)));

        // the connection may have been closed while the query ran
        if !self.connections.contains_key(connection_id) {
            if let Some((_, rs)) = self.recordsets.remove(&id) {
                rs.lock().close();
            }
            return Err(Error::invalid_state(format!(
                "connection {} was closed while recordset {} was opening",
                connection_id, id
            )));
        }
        Ok(view)
    }

    /// Snapshot of one recordset
    pub fn recordset_view(&self, recordset_id: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| Ok(rs.view()))
    }

    /// Re-run the recordset's source and reset its cursor
    pub async fn requery(&self, recordset_id: &str) -> Result<RecordsetView> {
        let (connection_id, source, params) = self.with_recordset(recordset_id, |rs| {
            Ok((
                rs.connection_id().to_string(),
                rs.source().to_string(),
                rs.params().to_vec(),
            ))
        })?;

        let result = self.execute_query(&connection_id, &source, &params).await?;

        self.with_recordset(recordset_id, |rs| {
            rs.reload(&result)?;
            Ok(rs.view())
        })
    }

    /// Close and forget a recordset
    pub fn close_recordset(&self, recordset_id: &str) -> Result<()> {
        let (_, rs) = self
            .recordsets
            .remove(recordset_id)
            .ok_or_else(|| Error::not_found("recordset", recordset_id))?;
        rs.lock().close();
        debug!(recordset = %recordset_id, "Recordset closed");
        Ok(())
    }

    /// Move to the first record
    pub fn move_first(&self, recordset_id: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.move_first()?;
            Ok(rs.view())
        })
    }

    /// Move to the last record
    pub fn move_last(&self, recordset_id: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.move_last()?;
            Ok(rs.view())
        })
    }

    /// Move to the next record
    pub fn move_next(&self, recordset_id: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.move_next()?;
            Ok(rs.view())
        })
    }

    /// Move to the previous record
    pub fn move_previous(&self, recordset_id: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.move_previous()?;
            Ok(rs.view())
        })
    }

    /// Move to a zero-based position
    pub fn move_to(&self, recordset_id: &str, position: usize) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.move_to(position)?;
            Ok(rs.view())
        })
    }

    /// Field value on the current record
    pub fn get_field_value(&self, recordset_id: &str, field: &str) -> Result<Value> {
        self.with_recordset(recordset_id, |rs| rs.get_field(field).cloned())
    }

    /// Change a field on the current record
    pub fn set_field_value(
        &self,
        recordset_id: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.with_recordset(recordset_id, |rs| rs.set_field(field, value))
    }

    /// Append a blank record
    pub fn add_new(&self, recordset_id: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.add_new()?;
            Ok(rs.view())
        })
    }

    /// Delete the current record
    pub fn delete(&self, recordset_id: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.delete()?;
            Ok(rs.view())
        })
    }

    /// Commit the pending edit
    pub fn update(&self, recordset_id: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.update()?;
            Ok(rs.view())
        })
    }

    /// Discard the pending edit
    pub fn cancel_update(&self, recordset_id: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.cancel_update()?;
            Ok(rs.view())
        })
    }

    /// Search for a matching record; returns whether one was found
    pub fn find(
        &self,
        recordset_id: &str,
        criteria: &str,
        skip_current: bool,
        direction: SearchDirection,
    ) -> Result<bool> {
        self.with_recordset(recordset_id, |rs| rs.find(criteria, skip_current, direction))
    }

    /// Keep only matching records
    pub fn filter(&self, recordset_id: &str, criteria: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.filter(criteria)?;
            Ok(rs.view())
        })
    }

    /// Sort records, e.g. `"Name ASC, Age DESC"`
    pub fn sort(&self, recordset_id: &str, spec: &str) -> Result<RecordsetView> {
        self.with_recordset(recordset_id, |rs| {
            rs.sort(spec)?;
            Ok(rs.view())
        })
    }

    /// Copy of every record
    pub fn get_rows(&self, recordset_id: &str) -> Result<Vec<Row>> {
        self.with_recordset(recordset_id, |rs| Ok(rs.get_rows()))
    }

    // ------------------------------------------------------------------
    // Observability and shutdown
    // ------------------------------------------------------------------

    /// Aggregate statistics
    pub fn get_stats(&self) -> ManagerStats {
        ManagerStats {
            connections: self.connections.len(),
            recordsets: self.recordsets.len(),
            queries_executed: self.stats.queries_executed.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            slow_queries: self.stats.slow_queries.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
            cache: self.cache.get_stats(),
            pools: self.pools.get_status(),
        }
    }

    /// Per-connection status, pool status and cache health
    pub async fn get_status(&self) -> ManagerStatus {
        let mut connections: Vec<ConnectionStatus> = self
            .connections
            .iter()
            .map(|entry| ConnectionStatus {
                info: entry.value().info(),
                recordsets: Vec::new(),
            })
            .collect();

        let owners: Vec<(String, String)> = self
            .recordsets
            .iter()
            .map(|entry| (entry.value().lock().connection_id().to_string(), entry.key().clone()))
            .collect();
        for (owner, rs_id) in owners {
            if let Some(status) = connections.iter_mut().find(|c| c.info.id == owner) {
                status.recordsets.push(rs_id);
            }
        }
        connections.sort_by(|a, b| a.info.created_at.cmp(&b.info.created_at));

        ManagerStatus {
            shutting_down: self.shutting_down.load(Ordering::Acquire),
            connections,
            pools: self.pools.get_status(),
            cache_healthy: self.cache.health_check().await,
        }
    }

    /// Close every connection, close every pool, clear the cache and stop
    /// its sweep. Individual failures are logged.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(
            connections = self.connections.len(),
            recordsets = self.recordsets.len(),
            "Shutting down database manager"
        );

        let ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        let closes = ids.iter().map(|id| self.close_connection(id));
        for (id, outcome) in ids.iter().zip(futures::future::join_all(closes).await) {
            if let Err(e) = outcome {
                warn!(connection = %id, error = %e, "Closing connection during shutdown failed");
            }
        }
        self.recordsets.clear();

        self.pools.close_all().await;
        self.cache.clear().await;
        self.cache.close().await;

        info!("Database manager shut down");
    }
}
