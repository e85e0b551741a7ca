//! Call-scoped context
//!
//! A [`Context`] is an immutable, chainable carrier threaded explicitly through every
//! database call. Deriving a child (`with_value`, `with_timeout`, `with_cancel`) never
//! changes the parent, so a value bound for one call chain is invisible to any other.
//!
//! Values are keyed by a type implementing [`ContextKey`]; the lookup walks from the
//! newest binding towards the root, so a child shadows its parent.

use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Key type for values stored in a [`Context`]
pub trait ContextKey: 'static {
    type Value: Send + Sync + 'static;
}

struct Binding {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Binding>>,
}

#[derive(Clone, Default)]
pub struct Context {
    bindings: Option<Arc<Binding>>,
    deadline: Option<Instant>,
    cancel: Vec<watch::Receiver<bool>>,
}

/// Cancels the context returned alongside it by [`Context::with_cancel`] and every
/// context derived from it
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Context {
    /// Empty root context with no deadline and no cancellation
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_value<K: ContextKey>(&self, value: K::Value) -> Self {
        let binding = Binding {
            key: TypeId::of::<K>(),
            value: Arc::new(value),
            parent: self.bindings.clone(),
        };
        Self {
            bindings: Some(Arc::new(binding)),
            deadline: self.deadline,
            cancel: self.cancel.clone(),
        }
    }

    pub fn value<K: ContextKey>(&self) -> Option<&K::Value> {
        let key = TypeId::of::<K>();
        let mut node = self.bindings.as_deref();
        while let Some(binding) = node {
            if binding.key == key {
                return binding.value.downcast_ref::<K::Value>();
            }
            node = binding.parent.as_deref();
        }
        None
    }

    /// Child context that expires at `deadline`, or at the parent's deadline if earlier
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.clone();
        child.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        child
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut child = self.clone();
        child.cancel.push(rx);
        (child, CancelHandle { tx: Arc::new(tx) })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.iter().any(|rx| *rx.borrow())
    }

    /// Error describing why the context is done, or `None` while it is still live
    pub fn err(&self) -> Option<Error> {
        if self.is_cancelled() {
            return Some(Error::Canceled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once any cancel handle in the chain fires. Pending forever otherwise.
    pub async fn cancelled(&self) {
        if self.cancel.is_empty() {
            return future::pending().await;
        }

        let waiters: Vec<BoxFuture<'static, ()>> = self
            .cancel
            .iter()
            .cloned()
            .map(|mut rx| {
                async move {
                    // a dropped handle can no longer cancel
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        future::pending::<()>().await;
                    }
                }
                .boxed()
            })
            .collect();

        future::select_all(waiters).await;
    }

    /// Drive a database call under this context's deadline and cancellation
    pub async fn run<F, T>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancelled() => Err(Error::Canceled),
                res = call => res,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .unwrap_or(Err(Error::DeadlineExceeded)),
            None => guarded.await,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut depth = 0;
        let mut node = self.bindings.as_deref();
        while let Some(binding) = node {
            depth += 1;
            node = binding.parent.as_deref();
        }
        f.debug_struct("Context")
            .field("values", &depth)
            .field("deadline", &self.deadline)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
