//! Postgres pool backed by sqlx
//!
//! [`Postgres`] owns the `PgPool` and implements [`Pool`] on it. Business logic should
//! not use it directly; hand out [`Postgres::executor`] instead, which routes each call
//! to the ambient transaction when there is one.

mod codec;
mod tx;
mod wire;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Connection;

use crate::config::PgConfig;
use crate::context::Context;
use crate::copy::Identifier;
use crate::db::{Pool, Queryer, Transactor, TxHandle};
use crate::error::{Error, Result};
use crate::executor::TxExecutor;
use crate::row::Row;
use crate::transaction::{TxManager, TxOptions};
use crate::value::{CommandTag, Value};

use codec::{bind_values, copy_rows, decode_one, decode_rows};

pub use tx::PgTx;

#[derive(Debug, Clone)]
pub struct Postgres {
    pool: PgPool,
}

impl Postgres {
    /// Build the pool, retrying up to `connect_attempts` times. Each attempt is bounded
    /// by `connect_timeout`; once connected, calls wait on the pool only as long as
    /// their context allows (capped by `acquire_timeout`).
    pub async fn connect(config: &PgConfig) -> Result<Self> {
        config.validate()?;

        let options = PgPoolOptions::new()
            .max_connections(config.max_pool_size)
            .acquire_timeout(config.acquire_timeout);

        let mut attempts_left = config.connect_attempts;
        loop {
            let attempt = tokio::time::timeout(
                config.connect_timeout,
                options.clone().connect(&config.url),
            )
            .await
            .unwrap_or_else(|_| Err(connect_timed_out(config.connect_timeout)));

            match attempt {
                Ok(pool) => return Ok(Self::from_pool(pool)),
                Err(e) => {
                    attempts_left -= 1;
                    if attempts_left == 0 {
                        return Err(Error::Connect {
                            attempts: config.connect_attempts,
                            source: e,
                        });
                    }
                    log::warn!(
                        "Postgres is trying to connect, attempts left: {} ({})",
                        attempts_left,
                        e
                    );
                    tokio::time::sleep(config.connect_timeout).await;
                }
            }
        }
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Context-routing executor for business logic
    pub fn executor(&self) -> TxExecutor {
        TxExecutor::new(Arc::new(self.clone()))
    }

    /// Read-committed transaction manager beginning on this pool
    pub fn transaction_manager(&self) -> TxManager {
        TxManager::new(Arc::new(self.executor()))
    }
}

fn connect_timed_out(after: Duration) -> sqlx::Error {
    sqlx::Error::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("connect attempt timed out after {:?}", after),
    ))
}

#[async_trait]
impl Queryer for Postgres {
    async fn exec(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<CommandTag> {
        ctx.run(async {
            let done = bind_values(sql, args)?.execute(&self.pool).await?;
            Ok(CommandTag::new(done.rows_affected()))
        })
        .await
    }

    async fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        ctx.run(async {
            let rows = bind_values(sql, args)?.fetch_all(&self.pool).await?;
            decode_rows(&rows)
        })
        .await
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Row> {
        ctx.run(async {
            let row = bind_values(sql, args)?
                .fetch_optional(&self.pool)
                .await?
                .ok_or(Error::NoRows)?;
            decode_one(&row)
        })
        .await
    }

    async fn copy_from(
        &self,
        ctx: &Context,
        table: &Identifier,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        ctx.run(async {
            let mut conn = self.pool.acquire().await?;
            copy_rows(&mut conn, table, columns, rows).await
        })
        .await
    }
}

#[async_trait]
impl Transactor for Postgres {
    async fn begin_tx(&self, ctx: &Context, opts: TxOptions) -> Result<Arc<dyn TxHandle>> {
        ctx.run(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query(&opts.set_transaction_sql())
                .execute(&mut *tx)
                .await?;
            let handle: Arc<dyn TxHandle> = Arc::new(PgTx::new(tx));
            Ok(handle)
        })
        .await
    }
}

#[async_trait]
impl Pool for Postgres {
    async fn ping(&self, ctx: &Context) -> Result<()> {
        ctx.run(async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await?;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        self.pool.close().await
    }
}
