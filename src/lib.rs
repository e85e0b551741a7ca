//! Context-propagated Postgres transactions
//!
//! Business logic talks to the database through a [`TxExecutor`] and never sees a
//! transaction object. Transaction boundaries are drawn with [`TxManager`]: the open
//! transaction travels inside the [`Context`] passed to the handler, the executor picks
//! it up from there, and nested manager calls join it instead of opening their own.
//!
//! ```ignore
//! use pgtx::{Context, PgConfig, Postgres, Queryer};
//!
//! let pg = Postgres::connect(&PgConfig::from_env()?).await?;
//! let (db, tx) = (&pg.executor(), &pg.transaction_manager());
//! let ctx = Context::background();
//!
//! tx.run_in_transaction(&ctx, |ctx| async move {
//!     db.exec(&ctx, "INSERT INTO users_v5 (username) VALUES ($1)", &["alice".into()])
//!         .await?;
//!     tx.run_in_transaction(&ctx, |ctx| async move {
//!         db.exec(&ctx, "INSERT INTO users_v5 (username) VALUES ($1)", &["bob".into()])
//!             .await?;
//!         Ok(())
//!     })
//!     .await
//! })
//! .await?;
//! ```

pub mod config;
pub mod context;
pub mod copy;
pub mod db;
pub mod error;
pub mod executor;
pub mod postgres;
pub mod row;
pub mod transaction;
pub mod value;

pub use config::PgConfig;
pub use context::{CancelHandle, Context, ContextKey};
pub use copy::Identifier;
pub use db::{Pool, Queryer, Transactor, TxHandle};
pub use error::{BoxError, Error, Result, Stage};
pub use executor::{Route, TxExecutor};
pub use postgres::{PgTx, Postgres};
pub use row::{ColumnIndex, Row};
pub use transaction::{
    AccessMode, IsolationLevel, TxKey, TxManager, TxOptions, make_context_tx, tx_from_context,
};
pub use value::{CommandTag, FromValue, Value};
