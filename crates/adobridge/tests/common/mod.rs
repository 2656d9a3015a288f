//! In-memory backends shared by the integration tests
#![allow(dead_code)]

use adobridge::prelude::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// What the scripted backend has seen, and how it should misbehave
#[derive(Default)]
pub struct DriverState {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
    pub fail_connect: AtomicBool,
    pub fail_execute: AtomicBool,
    pub dead: AtomicBool,
    pub execute_delay: Mutex<Duration>,
    pub select_result: Mutex<Option<RawResult>>,
}

impl DriverState {
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn execute_count(&self) -> usize {
        self.executed.lock().len()
    }

    pub fn set_select_result(&self, result: RawResult) {
        *self.select_result.lock() = Some(result);
    }
}

/// Driver answering every SELECT with a fixed table and every write with
/// one affected row
pub struct ScriptedDriver {
    provider: ProviderKind,
    pub state: Arc<DriverState>,
}

impl ScriptedDriver {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            state: Arc::new(DriverState::default()),
        }
    }
}

struct ScriptedConnection {
    state: Arc<DriverState>,
}

#[async_trait]
impl DriverConnection for ScriptedConnection {
    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<RawResult> {
        let delay = *self.state.execute_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.executed.lock().push(sql.to_string());

        if self.state.fail_execute.load(Ordering::SeqCst) {
            return Err(Error::validation("syntax error near 'FROM'"));
        }
        if sql.trim_start().to_ascii_lowercase().starts_with("select") {
            let scripted = self.state.select_result.lock().clone();
            return Ok(scripted.unwrap_or_else(people));
        }
        Ok(RawResult::affected(1))
    }

    async fn ping(&self) -> bool {
        !self.state.dead.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn connect(&self, _options: &PoolOptions) -> Result<Box<dyn DriverConnection>> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::validation("connection refused"));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            state: self.state.clone(),
        }))
    }
}

pub fn people_columns() -> Vec<String> {
    vec!["id".into(), "name".into(), "age".into()]
}

pub fn person(id: i32, name: &str, age: i32) -> Row {
    Row::new(
        people_columns(),
        vec![Value::Int32(id), Value::from(name), Value::Int32(age)],
    )
}

/// Three-row `people` table
pub fn people() -> RawResult {
    RawResult::rows(
        people_columns(),
        vec![person(1, "Alice", 30), person(2, "Bob", 25), person(3, "Carol", 35)],
    )
}

/// Small pools with short timeouts so tests stay fast
pub fn test_pools_config() -> PoolsConfig {
    let overrides = PoolOverrides {
        min_connections: Some(1),
        max_connections: Some(2),
        acquire_timeout_secs: Some(1),
        ..Default::default()
    };
    ProviderKind::ALL
        .iter()
        .fold(PoolsConfig::default(), |cfg, p| cfg.with_provider(*p, overrides.clone()))
}

/// Manager over a scripted MySQL backend
pub fn engine() -> (DatabaseManager, Arc<DriverState>) {
    engine_with(QueryConfig::default())
}

pub fn engine_with(query: QueryConfig) -> (DatabaseManager, Arc<DriverState>) {
    let driver = ScriptedDriver::new(ProviderKind::MySql);
    let state = driver.state.clone();

    let pools = Arc::new(ConnectionPoolManager::new(test_pools_config()));
    pools.register_driver(Arc::new(driver));
    let cache = Arc::new(CacheManager::new(CacheConfig::default(), None));

    (DatabaseManager::new(query, cache, pools), state)
}

pub const CONN_STR: &str = "Server=db1;Database=sales;User ID=app;Password=secret";

/// Remote tier kept in a map
#[derive(Default)]
pub struct MemoryRemote {
    pub data: Mutex<HashMap<String, String>>,
    pub fail_ops: AtomicBool,
}

#[async_trait]
impl RemoteCacheStore for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(Error::unsupported("remote down"));
        }
        Ok(self.data.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, payload: &str, _ttl_seconds: u64) -> Result<()> {
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(Error::unsupported("remote down"));
        }
        self.data.lock().insert(key.to_string(), payload.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().remove(key).is_some())
    }

    async fn flush(&self) -> Result<()> {
        self.data.lock().clear();
        Ok(())
    }
}

/// Remote tier that never connects
pub struct UnreachableRemote;

#[async_trait]
impl RemoteCacheStore for UnreachableRemote {
    async fn connect(&self) -> Result<()> {
        Err(Error::timeout("remote cache did not answer"))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        unreachable!("never connected")
    }

    async fn set(&self, _key: &str, _payload: &str, _ttl_seconds: u64) -> Result<()> {
        unreachable!("never connected")
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        unreachable!("never connected")
    }

    async fn flush(&self) -> Result<()> {
        unreachable!("never connected")
    }
}
