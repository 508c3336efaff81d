//! Fake pool implementations for lifecycle and transaction tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::pool::{ConnectionPool, PoolConnector, PoolOptions, PooledConnection};
use crate::error::{InfraError, InfraResult};

#[derive(Default)]
struct LogInner {
    statements: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    fail_acquire: AtomicBool,
    pools_built: AtomicUsize,
    pools_closed: AtomicUsize,
    acquired: AtomicUsize,
    released: AtomicUsize,
    discarded: AtomicUsize,
}

/// Shared record of everything the fakes did.
#[derive(Clone, Default)]
pub struct FakeLog {
    inner: Arc<LogInner>,
}

impl FakeLog {
    /// Makes every execution of `sql` fail.
    pub fn fail_on(&self, sql: &str) {
        self.inner.failing.lock().unwrap().insert(sql.to_string());
    }

    pub fn fail_acquire(&self, fail: bool) {
        self.inner.fail_acquire.store(fail, Ordering::SeqCst);
    }

    pub fn statements(&self) -> Vec<String> {
        self.inner.statements.lock().unwrap().clone()
    }

    pub fn count(&self, sql: &str) -> usize {
        self.statements().iter().filter(|s| s.as_str() == sql).count()
    }

    pub fn pools_built(&self) -> usize {
        self.inner.pools_built.load(Ordering::SeqCst)
    }

    pub fn pools_closed(&self) -> usize {
        self.inner.pools_closed.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> usize {
        self.inner.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> usize {
        self.inner.discarded.load(Ordering::SeqCst)
    }
}

pub struct FakeConnector {
    log: FakeLog,
}

impl FakeConnector {
    pub fn new(log: FakeLog) -> Self {
        Self { log }
    }
}

impl PoolConnector for FakeConnector {
    type Pool = FakePool;

    fn build(&self, options: &PoolOptions) -> InfraResult<FakePool> {
        let id = self.log.inner.pools_built.fetch_add(1, Ordering::SeqCst);
        Ok(FakePool {
            id,
            options: options.clone(),
            closed: Arc::new(AtomicBool::new(false)),
            log: self.log.clone(),
        })
    }
}

#[derive(Clone)]
pub struct FakePool {
    id: usize,
    options: PoolOptions,
    closed: Arc<AtomicBool>,
    log: FakeLog,
}

impl FakePool {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }
}

#[async_trait]
impl ConnectionPool for FakePool {
    type Connection = FakeConnection;

    async fn acquire(&self) -> InfraResult<FakeConnection> {
        if self.log.inner.fail_acquire.load(Ordering::SeqCst) {
            return Err(InfraError::Connection {
                backend: "fake".to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.log.inner.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            log: self.log.clone(),
            discarded: false,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.log.inner.pools_closed.fetch_add(1, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct FakeConnection {
    log: FakeLog,
    discarded: bool,
}

#[async_trait]
impl PooledConnection for FakeConnection {
    async fn execute_raw(&mut self, sql: &str) -> InfraResult<()> {
        self.log
            .inner
            .statements
            .lock()
            .unwrap()
            .push(sql.to_string());
        if self.log.inner.failing.lock().unwrap().contains(sql) {
            return Err(InfraError::Query {
                message: format!("'{sql}' failed"),
            });
        }
        Ok(())
    }

    fn discard(&mut self) {
        if !self.discarded {
            self.discarded = true;
            self.log.inner.discarded.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.log.inner.released.fetch_add(1, Ordering::SeqCst);
    }
}
