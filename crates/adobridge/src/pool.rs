//! Connection pooling for adobridge
//!
//! Two layers:
//! - [`ManagedPool`]: a semaphore-bounded pool over a [`Driver`], with
//!   min/max sizing and four timeout classes (acquire, create, destroy, idle)
//! - [`ConnectionPoolManager`]: one pool per backend fingerprint
//!   (provider + host + port + database + username), built on demand through
//!   the [`AdapterFactory`] registered for the provider
//!
//! # Example
//!
//! ```rust,ignore
//! use adobridge::prelude::*;
//!
//! let pools = ConnectionPoolManager::new(PoolsConfig::default());
//! pools.register_driver(Arc::new(MyMySqlDriver));
//!
//! let options = PoolOptions::new(ProviderKind::MySql, "db1").with_database("sales");
//! let pool = pools.get_pool(&options).await?;
//! let handle = pool.adapter().acquire().await?;
//! let result = pool.adapter().execute_raw(handle, "SELECT 1", &[]).await?;
//! pool.adapter().release(handle).await?;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::PoolsConfig;
use crate::error::{Error, Result};
use crate::provider::{
    AdapterFactory, ConnectionHandle, Driver, DriverConnection, PoolAdapter, ProviderKind,
    RawResult,
};
use crate::types::Value;

/// Pool sizing and timeouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    /// Connections opened eagerly and kept warm
    pub min_connections: usize,
    /// Hard ceiling on open connections
    pub max_connections: usize,
    /// Maximum time to wait for a free connection
    pub acquire_timeout: Duration,
    /// Maximum time to open one physical connection
    pub create_timeout: Duration,
    /// Maximum time to close one physical connection
    pub destroy_timeout: Duration,
    /// Idle connections older than this are closed instead of reused
    pub idle_timeout: Duration,
    /// Ping idle connections before handing them out
    pub test_on_borrow: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(60),
            create_timeout: Duration::from_secs(30),
            destroy_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            test_on_borrow: true,
        }
    }
}

impl PoolSettings {
    /// Documented defaults for a provider
    pub fn for_provider(provider: ProviderKind) -> Self {
        let base = Self::default();
        match provider {
            ProviderKind::Sqlite => Self {
                min_connections: 1,
                max_connections: 1,
                ..base
            },
            ProviderKind::MongoDb => Self {
                min_connections: 0,
                ..base
            },
            ProviderKind::Odbc => Self {
                min_connections: 1,
                max_connections: 5,
                ..base
            },
            ProviderKind::MySql
            | ProviderKind::PostgreSql
            | ProviderKind::SqlServer
            | ProviderKind::Oracle => base,
        }
    }

    /// Set minimum pool size
    pub fn with_min_connections(mut self, size: usize) -> Self {
        self.min_connections = size;
        self
    }

    /// Set maximum pool size
    pub fn with_max_connections(mut self, size: usize) -> Self {
        self.max_connections = size;
        self
    }

    /// Set acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set create timeout
    pub fn with_create_timeout(mut self, timeout: Duration) -> Self {
        self.create_timeout = timeout;
        self
    }

    /// Set destroy timeout
    pub fn with_destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    /// Set idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable/disable ping on borrow
    pub fn with_test_on_borrow(mut self, test: bool) -> Self {
        self.test_on_borrow = test;
        self
    }

    /// Reject impossible sizing
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::validation("max_connections must be at least 1"));
        }
        if self.min_connections > self.max_connections {
            return Err(Error::validation(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

/// Target of a pool: which backend, where, and as whom
#[derive(Clone)]
pub struct PoolOptions {
    /// Backend provider
    pub provider: ProviderKind,
    /// Server host (or file path for SQLite)
    pub host: String,
    /// Explicit port, if any
    pub port: Option<u16>,
    /// Database / catalog
    pub database: Option<String>,
    /// Login
    pub username: Option<String>,
    /// Password (never logged)
    pub password: Option<String>,
    /// Sizing override that wins over configuration
    pub settings: Option<PoolSettings>,
    /// Driver-specific extras
    pub properties: HashMap<String, String>,
}

impl std::fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolOptions")
            .field("provider", &self.provider)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("settings", &self.settings)
            .field("properties", &self.properties)
            .finish()
    }
}

impl PoolOptions {
    /// Target a host on a provider
    pub fn new(provider: ProviderKind, host: impl Into<String>) -> Self {
        Self {
            provider,
            host: host.into(),
            port: None,
            database: None,
            username: None,
            password: None,
            settings: None,
            properties: HashMap::new(),
        }
    }

    /// Set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set database
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set login
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Override pool sizing for this target
    pub fn with_settings(mut self, settings: PoolSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Explicit port, else the provider default
    pub fn resolved_port(&self) -> Option<u16> {
        self.port.or_else(|| self.provider.default_port())
    }

    /// Deterministic pool key.
    ///
    /// Host is case-insensitive; database and username are kept verbatim
    /// apart from percent-escaping `%`, `@`, `:` and `/`. The password is
    /// not part of the key.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.provider.tag(),
            escape_component(self.username.as_deref().unwrap_or("")),
            escape_component(&self.host.to_ascii_lowercase()),
            self.resolved_port().map(|p| p.to_string()).unwrap_or_default(),
            escape_component(self.database.as_deref().unwrap_or("")),
        )
    }
}

fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '@' => out.push_str("%40"),
            ':' => out.push_str("%3A"),
            '/' => out.push_str("%2F"),
            c => out.push(c),
        }
    }
    out
}

/// Point-in-time pool occupancy and counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolSnapshot {
    /// Open physical connections
    pub total_connections: usize,
    /// Connections checked out
    pub active_connections: usize,
    /// Connections parked in the idle list
    pub idle_connections: usize,
    /// Callers currently waiting in acquire
    pub waiting_requests: usize,
    /// Successful acquisitions
    pub acquires: u64,
    /// Releases
    pub releases: u64,
    /// Acquire timeouts
    pub timeouts: u64,
    /// Mean time spent in acquire
    pub avg_acquire_ms: f64,
    /// Physical connections opened
    pub connections_created: u64,
    /// Physical connections closed
    pub connections_destroyed: u64,
    /// Failed liveness pings
    pub health_check_failures: u64,
}

/// Atomic pool counters for concurrent updates
#[derive(Debug, Default)]
pub struct AtomicPoolStats {
    acquires: AtomicU64,
    releases: AtomicU64,
    timeouts: AtomicU64,
    total_acquire_us: AtomicU64,
    connections_created: AtomicU64,
    connections_destroyed: AtomicU64,
    health_check_failures: AtomicU64,
}

impl AtomicPoolStats {
    /// Create new atomic stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful acquisition and its wait
    pub fn record_acquisition(&self, waited: Duration) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        self.total_acquire_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a release
    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an acquire timeout
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection creation
    pub fn record_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection close
    pub fn record_destroyed(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record health check failure
    pub fn record_health_check_failure(&self) {
        self.health_check_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Calculate average acquire latency in milliseconds
    pub fn avg_acquire_ms(&self) -> f64 {
        let acquires = self.acquires.load(Ordering::Relaxed);
        if acquires == 0 {
            0.0
        } else {
            self.total_acquire_us.load(Ordering::Relaxed) as f64 / acquires as f64 / 1000.0
        }
    }

    /// Fill the counter half of a snapshot
    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            acquires: self.acquires.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            avg_acquire_ms: self.avg_acquire_ms(),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_destroyed: self.connections_destroyed.load(Ordering::Relaxed),
            health_check_failures: self.health_check_failures.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}

// ============================================================================
// ManagedPool - stock pool adapter over a Driver
// ============================================================================

struct IdleConnection {
    conn: Arc<dyn DriverConnection>,
    created_at: Instant,
    last_used: Instant,
}

struct CheckedOut {
    conn: Arc<dyn DriverConnection>,
    created_at: Instant,
    permit: OwnedSemaphorePermit,
}

/// Semaphore-bounded pool of driver connections.
///
/// Idle connections are reused LIFO. Locks guard only synchronous list
/// manipulation; no lock is held while a driver call is in flight.
pub struct ManagedPool {
    options: PoolOptions,
    settings: PoolSettings,
    driver: Arc<dyn Driver>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
    checked_out: Mutex<HashMap<u64, CheckedOut>>,
    next_handle: AtomicU64,
    total_connections: AtomicUsize,
    waiting: AtomicUsize,
    stats: AtomicPoolStats,
    shutdown: AtomicBool,
}

impl std::fmt::Debug for ManagedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedPool")
            .field("options", &self.options)
            .field("settings", &self.settings)
            .field("driver", &"<dyn Driver>")
            .field("total_connections", &self.total_connections)
            .field("waiting", &self.waiting)
            .field("stats", &self.stats)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

impl ManagedPool {
    /// Create a pool and open `min_connections` eagerly.
    ///
    /// Failing to open a warm connection fails construction.
    pub async fn new(
        driver: Arc<dyn Driver>,
        options: PoolOptions,
        settings: PoolSettings,
    ) -> Result<Arc<Self>> {
        settings.validate()?;

        let pool = Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(settings.max_connections)),
            idle: Mutex::new(Vec::with_capacity(settings.max_connections)),
            checked_out: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            total_connections: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            stats: AtomicPoolStats::new(),
            shutdown: AtomicBool::new(false),
            options,
            settings,
            driver,
        });

        for _ in 0..pool.settings.min_connections {
            match pool.create_connection().await {
                Ok(conn) => {
                    let now = Instant::now();
                    pool.idle.lock().push(IdleConnection {
                        conn,
                        created_at: now,
                        last_used: now,
                    });
                }
                Err(e) => {
                    let _ = pool.close().await;
                    return Err(e);
                }
            }
        }

        debug!(
            provider = %pool.provider(),
            host = %pool.options.host,
            warm = pool.settings.min_connections,
            max = pool.settings.max_connections,
            "Pool created"
        );
        Ok(pool)
    }

    /// Factory that builds a `ManagedPool` per fingerprint from `driver`
    pub fn factory(driver: Arc<dyn Driver>) -> Arc<dyn AdapterFactory> {
        Arc::new(ManagedPoolFactory { driver })
    }

    /// Get pool settings
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    fn wrap_driver_error(&self, err: Error, context: &str) -> Error {
        match err {
            e @ (Error::ProviderFailure { .. } | Error::Timeout { .. }) => e,
            other => Error::provider_with_source(self.provider(), context.to_string(), other),
        }
    }

    async fn create_connection(&self) -> Result<Arc<dyn DriverConnection>> {
        let conn = tokio::time::timeout(
            self.settings.create_timeout,
            self.driver.connect(&self.options),
        )
        .await
        .map_err(|_| {
            Error::timeout(format!(
                "opening a {} connection to {} took longer than {}ms",
                self.provider(),
                self.options.host,
                self.settings.create_timeout.as_millis()
            ))
        })?
        .map_err(|e| self.wrap_driver_error(e, "failed to open connection"))?;

        self.total_connections.fetch_add(1, Ordering::AcqRel);
        self.stats.record_created();
        Ok(Arc::from(conn))
    }

    async fn destroy_connection(&self, conn: Arc<dyn DriverConnection>) -> Result<()> {
        self.total_connections.fetch_sub(1, Ordering::AcqRel);
        self.stats.record_destroyed();

        match tokio::time::timeout(self.settings.destroy_timeout, conn.close()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(provider = %self.provider(), error = %e, "Closing pooled connection failed");
                Err(self.wrap_driver_error(e, "failed to close connection"))
            }
            Err(_) => {
                warn!(
                    provider = %self.provider(),
                    timeout_ms = self.settings.destroy_timeout.as_millis() as u64,
                    "Closing pooled connection timed out"
                );
                Err(Error::timeout("closing pooled connection timed out"))
            }
        }
    }

    /// Take a reusable idle connection, discarding stale or dead ones
    async fn take_idle(&self) -> Option<(Arc<dyn DriverConnection>, Instant)> {
        loop {
            let entry = self.idle.lock().pop()?;

            if entry.last_used.elapsed() > self.settings.idle_timeout {
                debug!(provider = %self.provider(), "Discarding idle-expired connection");
                let _ = self.destroy_connection(entry.conn).await;
                continue;
            }

            if self.settings.test_on_borrow && !entry.conn.ping().await {
                self.stats.record_health_check_failure();
                let _ = self.destroy_connection(entry.conn).await;
                continue;
            }

            return Some((entry.conn, entry.created_at));
        }
    }
}

#[async_trait]
impl PoolAdapter for ManagedPool {
    fn provider(&self) -> ProviderKind {
        self.options.provider
    }

    async fn acquire(&self) -> Result<ConnectionHandle> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::invalid_state("pool is closed"));
        }

        let start = Instant::now();

        self.waiting.fetch_add(1, Ordering::AcqRel);
        let permit = tokio::time::timeout(
            self.settings.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await;
        self.waiting.fetch_sub(1, Ordering::AcqRel);

        let permit = match permit {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::invalid_state("pool is closed")),
            Err(_) => {
                self.stats.record_timeout();
                return Err(Error::timeout(format!(
                    "waited {}ms for a {} connection",
                    self.settings.acquire_timeout.as_millis(),
                    self.provider()
                )));
            }
        };

        let (conn, created_at) = match self.take_idle().await {
            Some(reused) => reused,
            None => (self.create_connection().await?, Instant::now()),
        };

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.checked_out.lock().insert(
            id,
            CheckedOut {
                conn,
                created_at,
                permit,
            },
        );
        self.stats.record_acquisition(start.elapsed());

        Ok(ConnectionHandle::new(id))
    }

    async fn release(&self, handle: ConnectionHandle) -> Result<()> {
        let entry = self
            .checked_out
            .lock()
            .remove(&handle.id())
            .ok_or_else(|| Error::not_found("pooled connection", handle.to_string()))?;
        self.stats.record_release();

        let CheckedOut {
            conn,
            created_at,
            permit,
        } = entry;

        if self.shutdown.load(Ordering::Acquire) {
            drop(permit);
            return self.destroy_connection(conn).await;
        }

        self.idle.lock().push(IdleConnection {
            conn,
            created_at,
            last_used: Instant::now(),
        });
        drop(permit);
        Ok(())
    }

    async fn execute_raw(
        &self,
        handle: ConnectionHandle,
        sql: &str,
        params: &[Value],
    ) -> Result<RawResult> {
        let conn = self
            .checked_out
            .lock()
            .get(&handle.id())
            .map(|entry| entry.conn.clone())
            .ok_or_else(|| Error::not_found("pooled connection", handle.to_string()))?;

        conn.execute(sql, params)
            .await
            .map_err(|e| self.wrap_driver_error(e, "statement failed"))
    }

    fn status(&self) -> PoolSnapshot {
        let idle = self.idle.lock().len();
        let active = self.checked_out.lock().len();
        PoolSnapshot {
            total_connections: self.total_connections.load(Ordering::Acquire),
            active_connections: active,
            idle_connections: idle,
            waiting_requests: self.waiting.load(Ordering::Acquire),
            ..self.stats.snapshot()
        }
    }

    async fn close(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        self.semaphore.close();

        let mut doomed: Vec<Arc<dyn DriverConnection>> =
            self.idle.lock().drain(..).map(|e| e.conn).collect();
        doomed.extend(self.checked_out.lock().drain().map(|(_, e)| e.conn));

        let results =
            futures::future::join_all(doomed.into_iter().map(|c| self.destroy_connection(c)))
                .await;

        let failures = results.iter().filter(|r| r.is_err()).count();
        if failures > 0 {
            return Err(Error::provider(
                self.provider(),
                format!("{} connection(s) failed to close cleanly", failures),
            ));
        }
        Ok(())
    }
}

struct ManagedPoolFactory {
    driver: Arc<dyn Driver>,
}

#[async_trait]
impl AdapterFactory for ManagedPoolFactory {
    fn provider(&self) -> ProviderKind {
        self.driver.provider()
    }

    async fn create(
        &self,
        options: &PoolOptions,
        settings: &PoolSettings,
    ) -> Result<Arc<dyn PoolAdapter>> {
        let pool: Arc<dyn PoolAdapter> =
            ManagedPool::new(self.driver.clone(), options.clone(), settings.clone()).await?;
        Ok(pool)
    }
}

// ============================================================================
// ConnectionPoolManager
// ============================================================================

/// One pool per fingerprint
pub struct PoolInstance {
    fingerprint: String,
    options: PoolOptions,
    settings: PoolSettings,
    adapter: Arc<dyn PoolAdapter>,
    created_at: DateTime<Utc>,
    last_used: Mutex<DateTime<Utc>>,
}

impl std::fmt::Debug for PoolInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolInstance")
            .field("fingerprint", &self.fingerprint)
            .field("options", &self.options)
            .field("settings", &self.settings)
            .field("adapter", &"<dyn PoolAdapter>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl PoolInstance {
    /// Pool key
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Provider tag
    pub fn provider(&self) -> ProviderKind {
        self.options.provider
    }

    /// Resolved target
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Resolved sizing
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Underlying provider pool
    pub fn adapter(&self) -> &Arc<dyn PoolAdapter> {
        &self.adapter
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last time `get_pool` handed this instance out
    pub fn last_used(&self) -> DateTime<Utc> {
        *self.last_used.lock()
    }

    fn touch(&self) {
        *self.last_used.lock() = Utc::now();
    }

    /// Status snapshot of this pool
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            fingerprint: self.fingerprint.clone(),
            provider: self.provider(),
            created_at: self.created_at,
            last_used: self.last_used(),
            snapshot: self.adapter.status(),
        }
    }
}

/// Status of one pool
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    /// Pool key
    pub fingerprint: String,
    /// Provider tag
    pub provider: ProviderKind,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last handed out
    pub last_used: DateTime<Utc>,
    /// Occupancy and counters
    #[serde(flatten)]
    pub snapshot: PoolSnapshot,
}

/// Status of every pool
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolManagerStatus {
    /// Number of live pools
    pub total_pools: usize,
    /// Per-pool status, ordered by fingerprint
    pub pools: Vec<PoolStatus>,
}

/// Owns one pool per unique backend fingerprint
pub struct ConnectionPoolManager {
    config: PoolsConfig,
    factories: DashMap<ProviderKind, Arc<dyn AdapterFactory>>,
    pools: DashMap<String, Arc<OnceCell<Arc<PoolInstance>>>>,
}

impl ConnectionPoolManager {
    /// Create an empty manager
    pub fn new(config: PoolsConfig) -> Self {
        Self {
            config,
            factories: DashMap::new(),
            pools: DashMap::new(),
        }
    }

    /// Register (or replace) the adapter factory for a provider
    pub fn register_factory(&self, factory: Arc<dyn AdapterFactory>) {
        let provider = factory.provider();
        info!(provider = %provider, "Registered pool adapter factory");
        self.factories.insert(provider, factory);
    }

    /// Register a driver, pooled with [`ManagedPool`]
    pub fn register_driver(&self, driver: Arc<dyn Driver>) {
        self.register_factory(ManagedPool::factory(driver));
    }

    /// Effective settings for a provider: defaults, then configuration
    pub fn settings_for(&self, provider: ProviderKind) -> PoolSettings {
        let defaults = PoolSettings::for_provider(provider);
        match self.config.providers.get(&provider) {
            Some(overrides) => overrides.apply(defaults),
            None => defaults,
        }
    }

    /// Get the pool for `options`, creating it on first use.
    ///
    /// Concurrent first calls for one fingerprint build a single pool.
    pub async fn get_pool(&self, options: &PoolOptions) -> Result<Arc<PoolInstance>> {
        let fingerprint = options.fingerprint();
        let cell = self
            .pools
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let built = cell
            .get_or_try_init(|| self.build_instance(options, fingerprint.clone()))
            .await;

        match built {
            Ok(instance) => {
                instance.touch();
                Ok(instance.clone())
            }
            Err(e) => {
                self.pools
                    .remove_if(&fingerprint, |_, c| Arc::ptr_eq(c, &cell) && c.get().is_none());
                Err(e)
            }
        }
    }

    async fn build_instance(
        &self,
        options: &PoolOptions,
        fingerprint: String,
    ) -> Result<Arc<PoolInstance>> {
        let provider = options.provider;
        let factory = self
            .factories
            .get(&provider)
            .map(|f| f.value().clone())
            .ok_or_else(|| Error::provider(provider, "no pool adapter registered"))?;

        let settings = options
            .settings
            .clone()
            .unwrap_or_else(|| self.settings_for(provider));

        let adapter = factory
            .create(options, &settings)
            .await
            .map_err(|e| match e {
                e @ Error::ProviderFailure { .. } => e,
                other => Error::provider_with_source(provider, "pool construction failed", other),
            })?;

        info!(
            provider = %provider,
            fingerprint = %fingerprint,
            min = settings.min_connections,
            max = settings.max_connections,
            "Created connection pool"
        );

        let now = Utc::now();
        Ok(Arc::new(PoolInstance {
            fingerprint,
            options: options.clone(),
            settings,
            adapter,
            created_at: now,
            last_used: Mutex::new(now),
        }))
    }

    /// Live pools
    pub fn pools(&self) -> Vec<Arc<PoolInstance>> {
        self.pools
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect()
    }

    /// Per-pool status and the number of live pools
    pub fn get_status(&self) -> PoolManagerStatus {
        let mut pools: Vec<PoolStatus> = self.pools().iter().map(|p| p.status()).collect();
        pools.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        PoolManagerStatus {
            total_pools: pools.len(),
            pools,
        }
    }

    /// Close and forget one pool
    pub async fn remove_pool(&self, fingerprint: &str) -> Result<()> {
        let (_, cell) = self
            .pools
            .remove(fingerprint)
            .ok_or_else(|| Error::not_found("pool", fingerprint))?;
        match cell.get() {
            Some(instance) => instance.adapter.close().await,
            None => Ok(()),
        }
    }

    /// Close every pool concurrently.
    ///
    /// Individual failures and timeouts are logged and do not stop the
    /// remaining pools from closing.
    pub async fn close_all(&self) {
        let fingerprints: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        let instances: Vec<Arc<PoolInstance>> = fingerprints
            .iter()
            .filter_map(|fp| self.pools.remove(fp))
            .filter_map(|(_, cell)| cell.get().cloned())
            .collect();

        let close_timeout = self.config.close_timeout();
        let closes = instances.iter().map(|instance| async move {
            let outcome = tokio::time::timeout(close_timeout, instance.adapter.close()).await;
            (instance, outcome)
        });

        for (instance, outcome) in futures::future::join_all(closes).await {
            match outcome {
                Ok(Ok(())) => {
                    debug!(fingerprint = %instance.fingerprint, "Pool closed");
                }
                Ok(Err(e)) => {
                    error!(fingerprint = %instance.fingerprint, error = %e, "Pool close failed");
                }
                Err(_) => {
                    error!(
                        fingerprint = %instance.fingerprint,
                        timeout_ms = close_timeout.as_millis() as u64,
                        "Pool close timed out"
                    );
                }
            }
        }

        info!(pools = instances.len(), "All connection pools closed");
    }
}
