//! BEGIN / COMMIT / ROLLBACK around a unit of work.

use std::fmt::Display;

use futures::future::BoxFuture;
use tracing::{error, instrument, warn};

use crate::db::pool::{ConnectionPool, PooledConnection};
use crate::error::InfraError;

/// Runs handlers inside a transaction on a dedicated connection.
///
/// Exactly one of COMMIT / ROLLBACK is issued for every invocation whose
/// BEGIN succeeded. A connection whose transaction state is unknown (BEGIN
/// failed, ROLLBACK failed, or `run` was dropped mid-flight) is discarded
/// rather than returned to the pool.
#[derive(Debug, Clone)]
pub struct TransactionExecutor<P> {
    pool: P,
    backend: &'static str,
}

/// Connection between BEGIN and the end of the transaction.
///
/// Dropped before `finished` is set, it discards the connection.
struct OpenTransaction<C: PooledConnection> {
    conn: C,
    finished: bool,
}

impl<C: PooledConnection> OpenTransaction<C> {
    fn new(conn: C) -> Self {
        Self {
            conn,
            finished: false,
        }
    }

    fn discard(&mut self) {
        self.conn.discard();
        self.finished = true;
    }

    async fn rollback(&mut self) {
        match self.conn.execute_raw("ROLLBACK").await {
            Ok(()) => self.finished = true,
            Err(e) => {
                error!(error = %e, "Rollback failed, discarding connection");
                self.discard();
            }
        }
    }
}

impl<C: PooledConnection> Drop for OpenTransaction<C> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Transaction abandoned before COMMIT or ROLLBACK, discarding connection");
            self.conn.discard();
        }
    }
}

impl<P: ConnectionPool> TransactionExecutor<P> {
    pub fn new(pool: P, backend: &'static str) -> Self {
        Self { pool, backend }
    }

    fn record(&self, outcome: &'static str) {
        metrics::counter!(
            "graphmind_transactions_total",
            "backend" => self.backend,
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Runs `handler` between BEGIN and COMMIT.
    ///
    /// If the handler fails, ROLLBACK is issued, the failure is logged, and
    /// the handler's error is returned unchanged. A failed COMMIT is followed
    /// by ROLLBACK and surfaces as [`InfraError::Transaction`].
    ///
    /// Acquiring the connection may wait until the pool's acquire timeout.
    #[instrument(skip_all, fields(backend = self.backend))]
    pub async fn run<T, E, F>(&self, handler: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut P::Connection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<InfraError> + Display + Send,
    {
        let mut tx = OpenTransaction::new(self.pool.acquire().await?);

        if let Err(e) = tx.conn.execute_raw("BEGIN").await {
            tx.discard();
            return Err(InfraError::Transaction {
                message: format!("failed to begin transaction: {e}"),
            }
            .into());
        }

        match handler(&mut tx.conn).await {
            Ok(value) => match tx.conn.execute_raw("COMMIT").await {
                Ok(()) => {
                    tx.finished = true;
                    self.record("commit");
                    Ok(value)
                }
                Err(e) => {
                    error!(error = %e, "Commit failed, rolling back");
                    tx.rollback().await;
                    self.record("rollback");
                    Err(InfraError::Transaction {
                        message: format!("failed to commit transaction: {e}"),
                    }
                    .into())
                }
            },
            Err(err) => {
                error!(error = %err, "Transaction failed and rolled back");
                tx.rollback().await;
                self.record("rollback");
                Err(err)
            }
        }
    }
}
