//! Database seams
//!
//! The connection pool and its transaction handles are external collaborators. This
//! module names what the rest of the crate needs from them:
//!
//! - [`Queryer`]: exec / query / query_row / copy_from, identical for pool and transaction
//! - [`TxHandle`]: an open transaction, a `Queryer` that can also commit or roll back
//! - [`Transactor`]: anything that can begin a transaction
//! - [`Pool`]: the full pool surface, including ping and close
//!
//! Every call takes the caller's [`Context`]; deadline and cancellation are honoured by
//! the implementation, never by the layers above it.
//!
//! Business logic should depend on `&dyn Queryer` (or the dispatching executor) so the
//! same function runs unchanged inside and outside a transaction:
//!
//! ```ignore
//! use pgtx::{Context, Queryer, Result};
//!
//! pub async fn rename_user(db: &dyn Queryer, ctx: &Context, id: i64, name: &str) -> Result<()> {
//!     db.exec(ctx, "UPDATE users_v5 SET username = $1 WHERE user_id = $2", &[name.into(), id.into()])
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::copy::Identifier;
use crate::error::Result;
use crate::row::Row;
use crate::transaction::TxOptions;
use crate::value::{CommandTag, Value};

#[async_trait]
pub trait Queryer: Send + Sync {
    async fn exec(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<CommandTag>;

    async fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Vec<Row>>;

    /// First row of the result, or [`Error::NoRows`](crate::Error::NoRows)
    async fn query_row(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Row>;

    /// Bulk load `rows` into `table`; returns the number of rows copied
    async fn copy_from(
        &self,
        ctx: &Context,
        table: &Identifier,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64>;
}

/// Live handle to an open transaction. Not safe to drive from two call chains at once.
#[async_trait]
pub trait TxHandle: Queryer {
    async fn commit(&self, ctx: &Context) -> Result<()>;

    async fn rollback(&self, ctx: &Context) -> Result<()>;
}

#[async_trait]
pub trait Transactor: Send + Sync {
    async fn begin_tx(&self, ctx: &Context, opts: TxOptions) -> Result<Arc<dyn TxHandle>>;
}

#[async_trait]
pub trait Pool: Queryer + Transactor {
    async fn ping(&self, ctx: &Context) -> Result<()>;

    async fn close(&self);
}
