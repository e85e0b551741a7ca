//! Transaction handle over an sqlx Postgres transaction

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use tokio::sync::Mutex;

use super::codec::{bind_values, copy_rows, decode_one, decode_rows};
use crate::context::Context;
use crate::copy::Identifier;
use crate::db::{Queryer, TxHandle};
use crate::error::{Error, Result};
use crate::row::Row;
use crate::value::{CommandTag, Value};

/// An open Postgres transaction.
///
/// The sqlx transaction is taken out on commit or rollback; any later call fails with
/// [`Error::TxClosed`]. If the transaction is dropped while still open (an aborted
/// commit/rollback, or a forgotten handle) sqlx rolls it back when the connection goes
/// back to the pool.
pub struct PgTx {
    inner: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgTx {
    pub fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            inner: Mutex::new(Some(tx)),
        }
    }

    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    async fn take(&self) -> Result<Transaction<'static, Postgres>> {
        self.inner.lock().await.take().ok_or(Error::TxClosed)
    }
}

#[async_trait]
impl Queryer for PgTx {
    async fn exec(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<CommandTag> {
        ctx.run(async {
            let mut guard = self.inner.lock().await;
            let tx = guard.as_mut().ok_or(Error::TxClosed)?;
            let done = bind_values(sql, args)?.execute(&mut **tx).await?;
            Ok(CommandTag::new(done.rows_affected()))
        })
        .await
    }

    async fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        ctx.run(async {
            let mut guard = self.inner.lock().await;
            let tx = guard.as_mut().ok_or(Error::TxClosed)?;
            let rows = bind_values(sql, args)?.fetch_all(&mut **tx).await?;
            decode_rows(&rows)
        })
        .await
    }

    async fn query_row(&self, ctx: &Context, sql: &str, args: &[Value]) -> Result<Row> {
        ctx.run(async {
            let mut guard = self.inner.lock().await;
            let tx = guard.as_mut().ok_or(Error::TxClosed)?;
            let row = bind_values(sql, args)?
                .fetch_optional(&mut **tx)
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
            let mut guard = self.inner.lock().await;
            let tx = guard.as_mut().ok_or(Error::TxClosed)?;
            copy_rows(&mut **tx, table, columns, rows).await
        })
        .await
    }
}

#[async_trait]
impl TxHandle for PgTx {
    async fn commit(&self, ctx: &Context) -> Result<()> {
        let tx = self.take().await?;
        ctx.run(async move { Ok(tx.commit().await?) }).await
    }

    async fn rollback(&self, ctx: &Context) -> Result<()> {
        let tx = self.take().await?;
        ctx.run(async move { Ok(tx.rollback().await?) }).await
    }
}
