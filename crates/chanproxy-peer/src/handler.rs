use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::error;

/// Lock a mutex, recovering the data if a handler panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A replaceable, shareable handler.
///
/// The handler is cloned out before it is called, so callbacks never run
/// under the slot lock and may replace or clear the slot themselves.
pub struct HandlerSlot<F: ?Sized> {
    inner: Mutex<Option<Arc<F>>>,
}

impl<F: ?Sized> HandlerSlot<F> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Install `handler` (or clear with `None`) and return the previous one.
    pub fn replace(&self, handler: Option<Arc<F>>) -> Option<Arc<F>> {
        std::mem::replace(&mut *lock(&self.inner), handler)
    }

    pub fn get(&self) -> Option<Arc<F>> {
        lock(&self.inner).clone()
    }

    pub fn take(&self) -> Option<Arc<F>> {
        lock(&self.inner).take()
    }

    pub fn is_set(&self) -> bool {
        lock(&self.inner).is_some()
    }
}

impl<F: ?Sized> Default for HandlerSlot<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives failures that happen on background tasks, where there is no
/// caller to return them to.
pub trait ExceptionSink: Send + Sync {
    fn write_exception(&self, err: &(dyn Error + 'static));
}

/// Default sink: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ExceptionSink for TracingSink {
    fn write_exception(&self, err: &(dyn Error + 'static)) {
        error!(error = %err, source = ?err.source().map(ToString::to_string), "channel exception");
    }
}
