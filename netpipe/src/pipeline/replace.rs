//! Replace-Error: turn any failure into a fixed success value.

use super::Pipeline;
use std::convert::Infallible;
use tracing::debug;

impl<T, E> Pipeline<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Replaces a failure with `value`.
    ///
    /// The step is scheduled on this pipeline's queue right away and waits for
    /// the upstream to be terminal. A success passes through unchanged. If the
    /// upstream is cancelled, so is the returned pipeline.
    pub fn replace_failure(&self, value: T) -> Pipeline<T, Infallible> {
        let upstream = self.clone();
        Pipeline::schedule(self.queue(), "replace_failure", move |token| async move {
            tokio::select! {
                () = upstream.finished() => {}
                () = token.cancelled() => return None,
            }

            let Some(outcome) = upstream.peek() else {
                token.cancel("upstream cancelled");
                return None;
            };
            match outcome {
                Ok(output) => Some(Ok(output)),
                Err(_) => {
                    debug!(queue = %upstream.queue().name(), "upstream failed, substituting replacement value");
                    Some(Ok(value))
                }
            }
        })
    }
}
