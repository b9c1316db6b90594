//! Structured logging setup.
//!
//! netpipe itself only emits `tracing` events. Applications and tests that
//! want to see them can install a subscriber here.

use crate::errors::NetpipeError;
use std::fmt::Display;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

fn logging_error(err: impl Display) -> NetpipeError {
    NetpipeError::Logging(err.to_string())
}

fn text_subscriber<W>(default_filter: &str, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_target(false)
        .with_writer(writer)
        .finish()
}

fn json_subscriber<W>(default_filter: &str, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter(default_filter))
        .with_current_span(false)
        .with_writer(writer)
        .finish()
}

/// Installs a human-readable subscriber.
///
/// Uses the `RUST_LOG` env var if set, otherwise falls back to
/// `default_filter` (e.g. `"info,netpipe=debug"`).
pub fn init_logging(default_filter: &str) -> Result<(), NetpipeError> {
    text_subscriber(default_filter, std::io::stdout)
        .try_init()
        .map_err(logging_error)
}

/// Installs a JSON subscriber, one object per line.
pub fn init_json_logging(default_filter: &str) -> Result<(), NetpipeError> {
    json_subscriber(default_filter, std::io::stdout)
        .try_init()
        .map_err(logging_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_text_subscriber_writes_events() {
        let captured = Captured::default();
        let subscriber = text_subscriber("info", captured.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(task_id = 7, "task stalled");
        });

        let output = captured.contents();
        assert!(output.contains("task stalled"));
        assert!(!output.contains("netpipe::logging"));
    }

    #[test]
    fn test_json_subscriber_writes_objects() {
        let captured = Captured::default();
        let subscriber = json_subscriber("info", captured.clone());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(task_id = 7, "task stalled");
        });

        let output = captured.contents();
        let line = output.lines().next().expect("one event should be written");
        let event: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(event["fields"]["message"], "task stalled");
        assert_eq!(event["fields"]["task_id"], 7);
    }

    #[test]
    fn test_install_error_maps_to_logging() {
        let err = logging_error("a global default trace dispatcher has already been set");
        assert!(matches!(err, NetpipeError::Logging(message) if message.contains("already been set")));
    }
}
