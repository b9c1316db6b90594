//! The publisher/subscription contract of the demand-driven substrate.

use crate::core::{AnyCancellable, Cancellable, Demand};
use crate::pipeline::Pipeline;
use crate::queue::WorkQueue;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Receives the single terminal outcome of a subscription.
pub type Downstream<T, E> = Box<dyn FnOnce(Result<T, E>) + Send>;

/// A live link between a publisher and its downstream.
pub trait Subscription: Cancellable {
    /// Adds demand. Work starts once the accumulated demand is positive.
    fn request(&self, demand: Demand);
}

/// A producer of one success value or one failure, started on demand.
///
/// Unlike [`Pipeline`], attaching a downstream does nothing by itself; the
/// work begins when positive demand is requested.
pub trait Publisher: Send + Sync {
    /// Success type.
    type Output: Send + 'static;
    /// Failure type.
    type Failure: Send + 'static;

    /// Links a downstream without requesting anything.
    fn attach(&self, downstream: Downstream<Self::Output, Self::Failure>) -> Arc<dyn Subscription>;

    /// Requests unlimited demand and hands the outcome to `on_result`.
    ///
    /// Dropping the returned handle cancels the subscription.
    fn subscribe<F>(&self, on_result: F) -> AnyCancellable
    where
        Self: Sized,
        F: FnOnce(Result<Self::Output, Self::Failure>) + Send + 'static,
    {
        let subscription = self.attach(Box::new(on_result));
        subscription.request(Demand::Unlimited);
        AnyCancellable::from_fn(move || subscription.cancel())
    }

    /// Bridges into the queue substrate on a fresh sequential queue.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    fn into_pipeline(self) -> Pipeline<Self::Output, Self::Failure>
    where
        Self: Sized + 'static,
    {
        let queue = WorkQueue::sequential("netpipe.publisher");
        self.into_pipeline_on(&queue)
    }

    /// Bridges into the queue substrate on `queue`.
    ///
    /// The subscription is started when the work item runs. Cancelling the
    /// pipeline cancels the subscription.
    fn into_pipeline_on(self, queue: &WorkQueue) -> Pipeline<Self::Output, Self::Failure>
    where
        Self: Sized + 'static,
    {
        Pipeline::schedule(queue, "publisher", move |token| async move {
            let (tx, rx) = oneshot::channel();
            let subscription = self.attach(Box::new(move |result| {
                let _ = tx.send(result);
            }));

            let on_cancel = subscription.clone();
            token.on_cancel(move || on_cancel.cancel());
            subscription.request(Demand::Unlimited);

            tokio::select! {
                result = rx => match result {
                    Ok(result) => Some(result),
                    Err(_) => {
                        token.cancel("subscription dropped its downstream");
                        None
                    }
                },
                () = token.cancelled() => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::WorkState;
    use pretty_assertions::assert_eq;

    struct Idle;

    impl Cancellable for Idle {
        fn cancel(&self) {}
    }

    impl Subscription for Idle {
        fn request(&self, _demand: Demand) {}
    }

    /// Drops its downstream without ever delivering.
    struct Forgetful;

    impl Publisher for Forgetful {
        type Output = i32;
        type Failure = String;

        fn attach(&self, downstream: Downstream<i32, String>) -> Arc<dyn Subscription> {
            drop(downstream);
            Arc::new(Idle)
        }
    }

    /// Delivers `Ok(7)` as soon as demand arrives.
    struct Immediate;

    struct Pending(parking_lot::Mutex<Option<Downstream<i32, String>>>);

    impl Cancellable for Pending {
        fn cancel(&self) {
            self.0.lock().take();
        }
    }

    impl Subscription for Pending {
        fn request(&self, demand: Demand) {
            if demand.is_positive() {
                if let Some(downstream) = self.0.lock().take() {
                    downstream(Ok(7));
                }
            }
        }
    }

    impl Publisher for Immediate {
        type Output = i32;
        type Failure = String;

        fn attach(&self, downstream: Downstream<i32, String>) -> Arc<dyn Subscription> {
            Arc::new(Pending(parking_lot::Mutex::new(Some(downstream))))
        }
    }

    #[tokio::test]
    async fn test_into_pipeline_delivers_outcome() {
        let pipeline = Immediate.into_pipeline();

        assert_eq!(pipeline.wait().await, Some(Ok(7)));
        assert_eq!(pipeline.state(), WorkState::Finished);
    }

    #[tokio::test]
    async fn test_dropped_downstream_cancels_pipeline() {
        let pipeline = Forgetful.into_pipeline();

        assert_eq!(pipeline.wait().await, None);
        assert_eq!(pipeline.state(), WorkState::Cancelled);
    }
}
