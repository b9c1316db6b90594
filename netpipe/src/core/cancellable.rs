//! Cancellation handles returned to subscribers.

use std::fmt;
use std::sync::Arc;

/// Something that can be told to stop.
///
/// Cancelling must be idempotent: calling `cancel` on an already finished or
/// already cancelled activity does nothing.
pub trait Cancellable: Send + Sync {
    /// Requests cancellation.
    fn cancel(&self);
}

/// A type-erased cancellation handle that cancels when dropped.
#[must_use = "dropping the handle cancels the subscription"]
pub struct AnyCancellable {
    inner: Option<Arc<dyn Cancellable>>,
}

impl AnyCancellable {
    /// Wraps a cancellable.
    pub fn new(inner: Arc<dyn Cancellable>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Wraps a closure.
    pub fn from_fn<F>(cancel: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::new(Arc::new(FnCancellable(cancel)))
    }

    /// Cancels now.
    pub fn cancel(&self) {
        if let Some(inner) = &self.inner {
            inner.cancel();
        }
    }

    /// Releases the handle without cancelling.
    ///
    /// The underlying activity keeps running until it finishes on its own.
    pub fn detach(mut self) {
        self.inner = None;
    }
}

impl Cancellable for AnyCancellable {
    fn cancel(&self) {
        Self::cancel(self);
    }
}

impl Drop for AnyCancellable {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.cancel();
        }
    }
}

impl fmt::Debug for AnyCancellable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyCancellable")
            .field("attached", &self.inner.is_some())
            .finish()
    }
}

struct FnCancellable<F>(F);

impl<F> Cancellable for FnCancellable<F>
where
    F: Fn() + Send + Sync,
{
    fn cancel(&self) {
        (self.0)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Arc<AtomicUsize>, AnyCancellable) {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let handle = AnyCancellable::from_fn(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        (counter, handle)
    }

    #[test]
    fn test_drop_cancels() {
        let (counter, handle) = counting();
        drop(handle);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detach_does_not_cancel() {
        let (counter, handle) = counting();
        handle.detach();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_explicit_cancel_then_drop() {
        let (counter, handle) = counting();
        handle.cancel();
        drop(handle);
        // The wrapped closure decides idempotency; AnyCancellable forwards both.
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
