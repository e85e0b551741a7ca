//! Transaction manager
//!
//! [`TxManager`] runs a handler inside a transaction. The open transaction is bound to
//! the [`Context`] handed to the handler under [`TxKey`]; any manager call that finds a
//! transaction already bound joins it instead of opening another one. Only the
//! outermost call begins, commits or rolls back.
//!
//! ```ignore
//! let tx = &postgres.transaction_manager();
//!
//! tx.run_in_transaction(&ctx, |ctx| async move {
//!     repo.save(&ctx, &user).await?;
//!     // joins the outer transaction: no second BEGIN, no early COMMIT
//!     tx.run_in_transaction(&ctx, |ctx| async move { repo.save(&ctx, &other).await })
//!         .await
//! })
//! .await?;
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::context::{Context, ContextKey};
use crate::db::{Transactor, TxHandle};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
    RepeatableRead,
    #[default]
    ReadCommitted,
    ReadUncommitted,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub access_mode: AccessMode,
    pub deferrable: bool,
}

impl TxOptions {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            ..Self::default()
        }
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = AccessMode::ReadOnly;
        self
    }

    pub fn deferrable(mut self) -> Self {
        self.deferrable = true;
        self
    }

    /// `SET TRANSACTION` statement applying these options to a freshly begun transaction
    pub fn set_transaction_sql(&self) -> String {
        let mut sql = format!("SET TRANSACTION ISOLATION LEVEL {}", self.isolation.as_sql());
        if self.access_mode == AccessMode::ReadOnly {
            sql.push_str(" READ ONLY");
        }
        if self.deferrable {
            sql.push_str(" DEFERRABLE");
        }
        sql
    }
}

/// Context key the active transaction is bound under
pub struct TxKey;

impl ContextKey for TxKey {
    type Value = Arc<dyn TxHandle>;
}

pub fn make_context_tx(ctx: &Context, tx: Arc<dyn TxHandle>) -> Context {
    ctx.with_value::<TxKey>(tx)
}

pub fn tx_from_context(ctx: &Context) -> Option<&Arc<dyn TxHandle>> {
    ctx.value::<TxKey>()
}

#[derive(Clone)]
pub struct TxManager {
    db: Arc<dyn Transactor>,
    opts: TxOptions,
}

impl fmt::Debug for TxManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxManager").field("opts", &self.opts).finish()
    }
}

impl TxManager {
    /// Manager beginning read-committed transactions on `db`
    pub fn new(db: Arc<dyn Transactor>) -> Self {
        Self {
            db,
            opts: TxOptions::default(),
        }
    }

    /// Options used by [`run_in_transaction`](Self::run_in_transaction)
    pub fn with_options(mut self, opts: TxOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn options(&self) -> TxOptions {
        self.opts
    }

    pub async fn run_in_transaction<F, Fut, T>(&self, ctx: &Context, handler: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_options(ctx, self.opts, handler).await
    }

    pub async fn read_committed<F, Fut, T>(&self, ctx: &Context, handler: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_options(ctx, TxOptions::new(IsolationLevel::ReadCommitted), handler)
            .await
    }

    pub async fn repeatable_read<F, Fut, T>(&self, ctx: &Context, handler: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_options(ctx, TxOptions::new(IsolationLevel::RepeatableRead), handler)
            .await
    }

    pub async fn serializable<F, Fut, T>(&self, ctx: &Context, handler: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_options(ctx, TxOptions::new(IsolationLevel::Serializable), handler)
            .await
    }

    /// Run `handler` in a transaction opened with `opts`, or inside the transaction
    /// already bound to `ctx`.
    ///
    /// The outermost call commits when the handler returns `Ok` and rolls back when it
    /// returns `Err` or panics. A panic never escapes; it comes back as
    /// [`Error::Panic`]. Nested calls return the handler's result untouched and leave
    /// commit/rollback to the outermost call, so an inner failure that the outer handler
    /// propagates rolls back everything.
    pub async fn run_with_options<F, Fut, T>(
        &self,
        ctx: &Context,
        opts: TxOptions,
        handler: F,
    ) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if tx_from_context(ctx).is_some() {
            if opts != self.opts {
                log::debug!("nested transaction joins outer one, ignoring {:?}", opts);
            } else {
                log::debug!("nested transaction joins outer one");
            }
            return handler(ctx.clone()).await;
        }

        let tx = self
            .db
            .begin_tx(ctx, opts)
            .await
            .map_err(|e| Error::Begin(Box::new(e)))?;
        log::debug!("transaction started ({})", opts.isolation.as_sql());

        let tx_ctx = make_context_tx(ctx, tx.clone());

        let mut panicked = false;
        let outcome = AssertUnwindSafe(async move { handler(tx_ctx).await })
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                panicked = true;
                let msg = panic_message(panic.as_ref());
                log::error!("panic inside transaction: {}", msg);
                Err(Error::Panic(msg))
            });

        match outcome {
            Ok(value) => {
                if let Err(e) = tx.commit(ctx).await {
                    log::error!("transaction commit failed: {}", e);
                    return Err(Error::Commit(Box::new(e)));
                }
                log::debug!("transaction committed");
                Ok(value)
            }
            Err(cause) => {
                log::warn!("rolling back transaction: {}", cause);
                if let Err(e) = tx.rollback(ctx).await {
                    log::error!("transaction rollback failed: {}", e);
                    return Err(Error::Rollback {
                        source: Box::new(e),
                        cause: Box::new(cause),
                    });
                }
                if panicked {
                    Err(cause)
                } else {
                    Err(Error::Handler(Box::new(cause)))
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
