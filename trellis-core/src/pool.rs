//! Context pooling.
//!
//! Dispatch reuses [`Context`] allocations across requests. A context is
//! checked out as a [`PooledContext`] guard and goes back to the pool when
//! the guard is released or dropped, including on panic or when the
//! request future is cancelled.

use crate::app::Shared;
use crate::context::Context;
use bytes::Bytes;
use http::Request;
use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Idle contexts kept around; extras are freed on release.
pub const DEFAULT_MAX_IDLE: usize = 1024;

pub(crate) struct ContextPool {
    idle: Mutex<Vec<Box<Context>>>,
    max_idle: usize,
}

impl ContextPool {
    pub(crate) fn new(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Check out a context bound to `shared` and reset for `request`.
    pub(crate) fn acquire(&self, shared: &Arc<Shared>, request: Request<Bytes>) -> PooledContext<'_> {
        let popped = self.idle.lock().pop();
        let mut context = match popped {
            Some(mut context) => {
                context.rebind(shared);
                context
            }
            None => Box::new(Context::new(shared.clone())),
        };
        context.reset(request);
        PooledContext {
            context: Some(context),
            pool: self,
        }
    }

    fn put(&self, context: Box<Context>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(context);
        }
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.lock().len()
    }
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("idle", &self.idle())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// A context checked out of the application's pool.
///
/// Dereferences to [`Context`].
pub struct PooledContext<'p> {
    context: Option<Box<Context>>,
    pool: &'p ContextPool,
}

impl PooledContext<'_> {
    /// Return the context to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        // Only `Drop` takes the box out.
        self.context.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.context.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.put(context);
        }
    }
}

impl fmt::Debug for PooledContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledContext").field(&**self).finish()
    }
}
