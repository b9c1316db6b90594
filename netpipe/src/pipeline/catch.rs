//! Catch: recover from a failure with a replacement pipeline.

use super::Pipeline;
use tracing::debug;

impl<T, E> Pipeline<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// On failure, hands the error to `handler` and adopts the outcome of the
    /// pipeline it returns.
    ///
    /// `handler` runs at most once and never on success. The replacement's
    /// outcome, failure included, is forwarded unchanged. Once the replacement
    /// is terminal its queue is drained with `cancel_all`; cancelling the
    /// returned pipeline drains it as well.
    ///
    /// # Panics
    ///
    /// The step panics (and the engine logs it) if the replacement is still
    /// waiting on this pipeline's own sequential queue, since it could never
    /// run.
    pub fn catch_failure<E2, F>(&self, handler: F) -> Pipeline<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> Pipeline<T, E2> + Send + 'static,
    {
        let upstream = self.clone();
        let own_queue = self.queue().clone();

        Pipeline::schedule(self.queue(), "catch_failure", move |token| async move {
            tokio::select! {
                () = upstream.finished() => {}
                () = token.cancelled() => return None,
            }

            let error = match upstream.peek() {
                None => {
                    token.cancel("upstream cancelled");
                    return None;
                }
                Some(Ok(output)) => return Some(Ok(output)),
                Some(Err(error)) => error,
            };

            let replacement = handler(error);
            let replacement_queue = replacement.queue().clone();
            let shares_queue = replacement_queue.is_same(&own_queue);
            assert!(
                !(shares_queue && own_queue.is_sequential() && !replacement.state().is_terminal()),
                "catch_failure replacement is queued behind its own catch step on sequential queue `{}`",
                own_queue.name()
            );
            debug!(queue = %own_queue.name(), replacement_queue = %replacement_queue.name(), "upstream failed, running replacement");

            if !shares_queue {
                let drain = replacement_queue.clone();
                token.on_cancel(move || drain.cancel_all("catch_failure cancelled"));
            }

            tokio::select! {
                () = replacement.finished() => {}
                () = token.cancelled() => {
                    replacement.cancel();
                    return None;
                }
            }

            let outcome = replacement.peek();
            if !shares_queue {
                replacement_queue.cancel_all("catch_failure replacement finished");
            }
            if outcome.is_none() {
                token.cancel("replacement cancelled");
            }
            outcome
        })
    }
}
