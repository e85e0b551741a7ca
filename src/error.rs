//! Error type shared by the executor, the transaction manager and the Postgres backend

use std::fmt;

use thiserror::Error;

/// Boxed error for caller-defined failures raised inside a handler
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Phase of a managed transaction in which an error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Begin,
    Handler,
    Commit,
    Rollback,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Begin => write!(f, "begin"),
            Stage::Handler => write!(f, "handler"),
            Stage::Commit => write!(f, "commit"),
            Stage::Rollback => write!(f, "rollback"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The transaction could not be opened; the handler never ran
    #[error("can't begin transaction: {0}")]
    Begin(#[source] Box<Error>),

    /// The handler returned an error and the transaction was rolled back
    #[error("failed executing code inside transaction: {0}")]
    Handler(#[source] Box<Error>),

    /// The handler panicked and the transaction was rolled back
    #[error("panic recovered: {0}")]
    Panic(String),

    /// Rolling back after a handler failure failed as well.
    /// `source` is the rollback error, `cause` is what triggered the rollback.
    #[error("rollback failed: {source} (after: {cause})")]
    Rollback {
        #[source]
        source: Box<Error>,
        cause: Box<Error>,
    },

    /// The handler succeeded but the commit failed
    #[error("tx commit failed: {0}")]
    Commit(#[source] Box<Error>),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("no rows in result set")]
    NoRows,

    #[error("transaction is already closed")]
    TxClosed,

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("cannot decode column `{column}`: {message}")]
    Decode { column: String, message: String },

    /// `position` is 1-based, as in `$1`
    #[error("cannot encode argument ${position}: {message}")]
    Encode { position: usize, message: String },

    #[error("postgres connect failed after {attempts} attempts: {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Custom(BoxError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a caller-defined error so it can be returned from a handler
    pub fn custom<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Custom(err.into())
    }

    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn encode(position: usize, message: impl Into<String>) -> Self {
        Error::Encode {
            position,
            message: message.into(),
        }
    }

    /// Transaction phase this error was tagged with, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Begin(_) => Some(Stage::Begin),
            Error::Handler(_) | Error::Panic(_) => Some(Stage::Handler),
            Error::Commit(_) => Some(Stage::Commit),
            Error::Rollback { .. } => Some(Stage::Rollback),
            _ => None,
        }
    }

    /// The error that made the manager roll back, when the rollback itself failed
    pub fn rollback_cause(&self) -> Option<&Error> {
        match self {
            Error::Rollback { cause, .. } => Some(cause),
            _ => None,
        }
    }

    /// Innermost error, skipping the stage wrappers added by the transaction manager
    pub fn root(&self) -> &Error {
        match self {
            Error::Begin(inner)
            | Error::Handler(inner)
            | Error::Commit(inner)
            | Error::Rollback { source: inner, .. } => inner.root(),
            other => other,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.root(), Error::Panic(_))
            || matches!(self.rollback_cause().map(Error::root), Some(Error::Panic(_)))
    }

    /// Downcast a `Custom` error back into the caller's type
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self.root() {
            Error::Custom(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }
}
