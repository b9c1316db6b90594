//! End-to-end tests across sessions, pipelines and the correlator.

#[cfg(test)]
mod tests {
    use crate::config::{QueueConfig, SessionConfig};
    use crate::core::{Demand, TaskDescriptor, TaskId, TaskOutput, UploadSource};
    use crate::errors::{TaskError, TaskErrorKind, TransportError};
    use crate::lifecycle::{LifecycleCorrelator, TaskLifecycle};
    use crate::pipeline::Pipeline;
    use crate::session::{JsonDecoder, Publisher, Session, TaskHandle, Utf8Decoder};
    use crate::testing::{sample_metrics, MockExecutor, MockReply};
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn fixture(first_id: u64) -> (Arc<MockExecutor>, Arc<LifecycleCorrelator>, Session) {
        let executor = Arc::new(MockExecutor::starting_at(first_id));
        let lifecycle = Arc::new(LifecycleCorrelator::new());
        let session = Session::with_lifecycle(executor.clone(), lifecycle.clone());
        (executor, lifecycle, session)
    }

    async fn until<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition should hold within a second");
    }

    #[tokio::test]
    async fn test_metrics_then_success_decodes_with_metrics() {
        let (executor, lifecycle, session) = fixture(42);
        let (tx, rx) = oneshot::channel();

        let _handle = session
            .data_task(TaskDescriptor::new("https://api.example.com/ping"))
            .decode(Utf8Decoder)
            .subscribe(move |result| {
                let _ = tx.send(result);
            });

        let task = executor.last_task().unwrap();
        assert_eq!(task.id(), TaskId::new(42));
        session.events().metrics_collected(TaskId::new(42), sample_metrics());
        task.succeed(&b"ok"[..]);

        let decoded = rx.await.unwrap().unwrap();
        assert_eq!(decoded.value, "ok");
        assert_eq!(decoded.metrics, Some(sample_metrics()));
        assert!(!lifecycle.contains(TaskId::new(42)));
    }

    #[tokio::test]
    async fn test_catch_with_failing_replacement_fails_with_its_error() {
        let upstream: Pipeline<String, String> = Pipeline::fail("E1".to_string());
        let chain = upstream.catch_failure(|_| Pipeline::<String, String>::fail("E".to_string()));

        assert_eq!(chain.wait().await, Some(Err("E".to_string())));
    }

    #[tokio::test]
    async fn test_zero_demand_never_starts_network_work() {
        let (executor, _, session) = fixture(1);
        let subscription = session
            .data_task(TaskDescriptor::new("https://api.example.com/idle"))
            .attach(Box::new(|_: Result<TaskOutput, TaskError>| {
                panic!("nothing should be delivered")
            }));

        subscription.request(Demand::None);
        tokio::task::yield_now().await;

        assert_eq!(executor.created_count(), 0);
    }

    #[tokio::test]
    async fn test_session_pipeline_recovers_through_catch() {
        let executor = Arc::new(MockExecutor::new().with_responder(|descriptor, _| {
            if descriptor.url.contains("primary") {
                MockReply::Failure(TransportError::new("io", -1009, "offline"))
            } else {
                MockReply::success(&b"mirror"[..])
            }
        }));
        let session = Session::with_lifecycle(executor.clone(), Arc::new(LifecycleCorrelator::new()));
        let fallback = session.clone();

        let pipeline = session
            .pipeline(TaskDescriptor::new("https://primary.example.com/data"))
            .catch_failure(move |error: TaskError| {
                assert_eq!(error.transport_error().map(|e| e.code), Some(-1009));
                fallback.pipeline(TaskDescriptor::new("https://mirror.example.com/data"))
            });

        let output = pipeline.wait().await.unwrap().unwrap();
        assert_eq!(&output.data[..], b"mirror");
        assert_eq!(executor.created_count(), 2);
    }

    #[tokio::test]
    async fn test_replace_failure_on_session_pipeline() {
        let executor = Arc::new(MockExecutor::new().with_responder(|_, _| MockReply::Empty));
        let session = Session::with_lifecycle(executor, Arc::new(LifecycleCorrelator::new()));

        let pipeline = session
            .pipeline(TaskDescriptor::new("https://api.example.com/empty"))
            .catch_failure(|error: TaskError| {
                assert_eq!(error.kind, TaskErrorKind::InvalidOutcome);
                Pipeline::<_, TaskError>::fail(error)
            })
            .replace_failure(TaskOutput {
                data: bytes::Bytes::from_static(b"cached"),
                response: crate::core::ResponseDescriptor::with_status(200),
                metrics: None,
                waited_for_connectivity: false,
                task_id: None,
            });

        let output = pipeline.wait().await.unwrap().unwrap();
        assert_eq!(&output.data[..], b"cached");
    }

    #[tokio::test]
    async fn test_cancelling_pipeline_cancels_task() {
        let (executor, lifecycle, session) = fixture(7);
        let pipeline = session.pipeline(TaskDescriptor::new("https://api.example.com/slow"));

        until(|| executor.created_count() == 1).await;
        let task = executor.last_task().unwrap();
        lifecycle.record(
            task.id(),
            crate::lifecycle::LifecycleEvent::MetricsCollected(sample_metrics()),
        );

        pipeline.cancel();

        assert_eq!(pipeline.wait().await, None);
        assert!(task.is_cancelled());
        assert!(!lifecycle.contains(task.id()));

        // A late completion after cancellation goes nowhere.
        task.succeed(&b"late"[..]);
        assert!(pipeline.peek().is_none());
    }

    #[tokio::test]
    async fn test_upload_task_reaches_executor() {
        let (executor, _, session) = fixture(1);
        let (tx, rx) = oneshot::channel();

        let _handle = session
            .upload_task(
                TaskDescriptor::new("https://api.example.com/upload"),
                UploadSource::Data(Some(bytes::Bytes::from_static(b"payload"))),
            )
            .subscribe(move |result| {
                let _ = tx.send(result);
            });

        let task = executor.last_task().unwrap();
        assert_eq!(
            task.kind(),
            &crate::core::TaskKind::Upload(UploadSource::Data(Some(bytes::Bytes::from_static(b"payload"))))
        );
        task.succeed(&b"stored"[..]);
        assert_eq!(&rx.await.unwrap().unwrap().data[..], b"stored");
    }

    #[tokio::test]
    async fn test_upload_progress_reported_through_session_events() {
        let (executor, lifecycle, session) = fixture(5);
        let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
        let (tx, rx) = oneshot::channel();

        let _handle = session
            .upload_task(
                TaskDescriptor::new("https://api.example.com/upload"),
                UploadSource::Data(Some(bytes::Bytes::from_static(b"0123456789"))),
            )
            .on_progress(move |completed, total| {
                let _ = progress_tx.send((completed, total));
            })
            .subscribe(move |result| {
                let _ = tx.send(result);
            });

        let task = executor.last_task().unwrap();
        let events = session.events();
        events.progress(task.id(), 4, Some(10));
        events.progress(task.id(), 10, Some(10));

        let mut reports = Vec::new();
        while reports.len() < 2 {
            let report = tokio::time::timeout(Duration::from_secs(1), progress_rx.recv())
                .await
                .expect("progress should be reported")
                .unwrap();
            reports.push(report);
        }
        assert_eq!(reports, vec![(4, Some(10)), (10, Some(10))]);

        task.succeed(&b"stored"[..]);
        let output = rx.await.unwrap().unwrap();
        assert_eq!(output.task_id, Some(TaskId::new(5)));

        // Progress after completion goes nowhere.
        events.progress(task.id(), 11, Some(10));
        assert!(!lifecycle.is_routed(task.id()));
    }

    #[tokio::test]
    async fn test_json_pipeline() {
        #[derive(Debug, Clone, PartialEq, Deserialize)]
        struct Health {
            status: String,
        }

        let executor = Arc::new(
            MockExecutor::new().with_responder(|_, _| MockReply::success(&br#"{"status":"up"}"#[..])),
        );
        let session = Session::with_lifecycle(executor, Arc::new(LifecycleCorrelator::new()));

        let decoded = session
            .data_task(TaskDescriptor::new("https://api.example.com/health"))
            .decode(JsonDecoder::<Health>::new())
            .into_pipeline()
            .wait()
            .await
            .unwrap()
            .unwrap();

        assert_eq!(decoded.value.status, "up");
    }

    #[tokio::test]
    async fn test_late_events_after_completion_are_dropped() {
        let (executor, lifecycle, session) = fixture(42);
        let _handle = session
            .data_task(TaskDescriptor::new("https://api.example.com/ping"))
            .subscribe(|_| {});

        let task = executor.last_task().unwrap();
        task.succeed(&b"ok"[..]);

        let events = session.events();
        events.metrics_collected(task.id(), sample_metrics());
        events.waiting_for_connectivity(task.id());

        assert!(!lifecycle.contains(task.id()));
        assert!(lifecycle.consume(task.id()).is_none());
    }

    #[tokio::test]
    async fn test_from_config_applies_queue_settings() {
        let config = SessionConfig::new()
            .with_name("bulk")
            .with_queue(QueueConfig::new().with_name("bulk.queue").with_max_concurrency(4))
            .with_log_requests(false);
        let executor = Arc::new(MockExecutor::new().with_responder(|_, _| MockReply::success(&b"x"[..])));
        let session = Session::from_config(executor, config);

        let pipeline = session.pipeline(TaskDescriptor::new("https://api.example.com/x"));
        assert_eq!(pipeline.queue().name(), "bulk.queue");
        assert_eq!(pipeline.queue().max_concurrency(), 4);
        assert!(pipeline.wait().await.unwrap().is_ok());
    }
}
