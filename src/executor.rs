//! Dispatching executor
//!
//! [`TxExecutor`] wraps the pool and routes every call by looking at the context it is
//! given: to the transaction bound under [`TxKey`](crate::TxKey) when there is one,
//! otherwise straight to the pool (where each statement auto-commits). It keeps no
//! state of its own, so one executor can be shared by every call chain.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::copy::Identifier;
use crate::db::{Pool, Queryer, Transactor, TxHandle};
use crate::error::Result;
use crate::row::Row;
use crate::transaction::{TxOptions, tx_from_context};
use crate::value::{CommandTag, Value};

/// Target a single call is sent to
pub enum Route<'a> {
    Tx(&'a dyn TxHandle),
    Pool(&'a dyn Pool),
}

impl Route<'_> {
    pub fn in_transaction(&self) -> bool {
        matches!(self, Route::Tx(_))
    }

    async fn exec(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<CommandTag> {
        match self {
            Route::Tx(tx) => tx.exec(ctx, sql, args).await,
            Route::Pool(pool) => pool.exec(ctx, sql, args).await,
        }
    }

    async fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        match self {
            Route::Tx(tx) => tx.query(ctx, sql, args).await,
            Route::Pool(pool) => pool.query(ctx, sql, args).await,
        }
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Row> {
        match self {
            Route::Tx(tx) => tx.query_row(ctx, sql, args).await,
            Route::Pool(pool) => pool.query_row(ctx, sql, args).await,
        }
    }

    async fn copy_from(
        &self,
        ctx: &Context,
        table: &Identifier,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        match self {
            Route::Tx(tx) => tx.copy_from(ctx, table, columns, rows).await,
            Route::Pool(pool) => pool.copy_from(ctx, table, columns, rows).await,
        }
    }
}

#[derive(Clone)]
pub struct TxExecutor {
    pool: Arc<dyn Pool>,
}

impl fmt::Debug for TxExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxExecutor").finish_non_exhaustive()
    }
}

impl TxExecutor {
    pub fn new(pool: Arc<dyn Pool>) -> Self {
        Self { pool }
    }

    /// Where a call made with `ctx` would go
    pub fn route<'a>(&'a self, ctx: &'a Context) -> Route<'a> {
        match tx_from_context(ctx) {
            Some(tx) => Route::Tx(tx.as_ref()),
            None => Route::Pool(self.pool.as_ref()),
        }
    }

    pub fn pool(&self) -> &Arc<dyn Pool> {
        &self.pool
    }
}

#[async_trait]
impl Queryer for TxExecutor {
    async fn exec(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<CommandTag> {
        self.route(ctx).exec(ctx, sql, args).await
    }

    async fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        self.route(ctx).query(ctx, sql, args).await
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Row> {
        self.route(ctx).query_row(ctx, sql, args).await
    }

    async fn copy_from(
        &self,
        ctx: &Context,
        table: &Identifier,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        self.route(ctx).copy_from(ctx, table, columns, rows).await
    }
}

#[async_trait]
impl Transactor for TxExecutor {
    /// Always begins on the pool; joining an ambient transaction is the manager's job
    async fn begin_tx(&self, ctx: &Context, opts: TxOptions) -> Result<Arc<dyn TxHandle>> {
        self.pool.begin_tx(ctx, opts).await
    }
}

#[async_trait]
impl Pool for TxExecutor {
    async fn ping(&self, ctx: &Context) -> Result<()> {
        self.pool.ping(ctx).await
    }

    async fn close(&self) {
        self.pool.close().await
    }
}
