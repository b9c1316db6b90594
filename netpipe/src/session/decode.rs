//! Payload decoding for successful tasks.

use super::publisher::{Downstream, Publisher, Subscription};
use super::task::TaskPublisher;
use crate::core::{ResponseDescriptor, TaskMetrics, TaskOutput};
use crate::errors::{ErrorContext, TaskError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Turns a raw payload into a typed value.
pub trait Decoder: Send + Sync + 'static {
    /// The decoded type.
    type Output: Send + 'static;

    /// Decodes `data`. The error message ends up in a decode [`TaskError`].
    fn decode(&self, data: &[u8], response: &ResponseDescriptor) -> Result<Self::Output, String>;
}

/// Decodes the payload as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Decoder;

impl Decoder for Utf8Decoder {
    type Output = String;

    fn decode(&self, data: &[u8], _response: &ResponseDescriptor) -> Result<String, String> {
        std::str::from_utf8(data)
            .map(str::to_owned)
            .map_err(|e| e.to_string())
    }
}

/// Passes the payload through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesDecoder;

impl Decoder for BytesDecoder {
    type Output = Bytes;

    fn decode(&self, data: &[u8], _response: &ResponseDescriptor) -> Result<Bytes, String> {
        Ok(Bytes::copy_from_slice(data))
    }
}

/// Decodes the payload as JSON.
pub struct JsonDecoder<T>(PhantomData<fn() -> T>);

impl<T> JsonDecoder<T> {
    /// Creates a JSON decoder.
    #[must_use]
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonDecoder<{}>", std::any::type_name::<T>())
    }
}

impl<T> Decoder for JsonDecoder<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn decode(&self, data: &[u8], _response: &ResponseDescriptor) -> Result<T, String> {
        serde_json::from_slice(data).map_err(|e| e.to_string())
    }
}

/// A decoded payload with the metadata of the task that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    /// The decoded value.
    pub value: T,
    /// The response metadata.
    pub response: ResponseDescriptor,
    /// Metrics correlated with the task, if any.
    pub metrics: Option<TaskMetrics>,
}

/// A [`TaskPublisher`] whose output is run through a [`Decoder`].
pub struct DecodePublisher<D> {
    upstream: TaskPublisher,
    decoder: Arc<D>,
}

impl<D: Decoder> DecodePublisher<D> {
    pub(crate) fn new(upstream: TaskPublisher, decoder: D) -> Self {
        Self {
            upstream,
            decoder: Arc::new(decoder),
        }
    }
}

impl<D: Decoder> Publisher for DecodePublisher<D> {
    type Output = Decoded<D::Output>;
    type Failure = TaskError;

    fn attach(&self, downstream: Downstream<Self::Output, TaskError>) -> Arc<dyn Subscription> {
        let decoder = self.decoder.clone();
        self.upstream.attach(Box::new(move |result| {
            downstream(result.and_then(|output| decode_output(decoder.as_ref(), output)));
        }))
    }
}

impl<D> Clone for DecodePublisher<D> {
    fn clone(&self) -> Self {
        Self {
            upstream: self.upstream.clone(),
            decoder: self.decoder.clone(),
        }
    }
}

impl<D> fmt::Debug for DecodePublisher<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodePublisher")
            .field("upstream", &self.upstream)
            .field("decoder", &std::any::type_name::<D>())
            .finish()
    }
}

fn decode_output<D: Decoder>(decoder: &D, output: TaskOutput) -> Result<Decoded<D::Output>, TaskError> {
    match decoder.decode(&output.data, &output.response) {
        Ok(value) => Ok(Decoded {
            value,
            response: output.response,
            metrics: output.metrics,
        }),
        Err(message) => {
            let error = TaskError::decode(message).with_context(ErrorContext {
                metrics: output.metrics,
                response: Some(output.response),
                data: Some(output.data),
                waited_for_connectivity: output.waited_for_connectivity,
            });
            Err(match output.task_id {
                Some(id) => error.with_task_id(id),
                None => error,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskId;
    use crate::errors::TaskErrorKind;
    use crate::testing::sample_metrics;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: u32,
        name: String,
    }

    fn output(data: &'static [u8]) -> TaskOutput {
        TaskOutput {
            task_id: Some(TaskId::new(9)),
            data: Bytes::from_static(data),
            response: ResponseDescriptor::with_status(200),
            metrics: Some(sample_metrics()),
            waited_for_connectivity: false,
        }
    }

    #[test]
    fn test_utf8_decoder() {
        let decoded = decode_output(&Utf8Decoder, output(b"ok")).unwrap();
        assert_eq!(decoded.value, "ok");
        assert_eq!(decoded.metrics, Some(sample_metrics()));
    }

    #[test]
    fn test_json_decoder() {
        let decoded = decode_output(
            &JsonDecoder::<User>::new(),
            output(br#"{"id": 1, "name": "ada"}"#),
        )
        .unwrap();
        assert_eq!(
            decoded.value,
            User {
                id: 1,
                name: "ada".to_string()
            }
        );
    }

    #[test]
    fn test_decode_failure_keeps_context() {
        let err = decode_output(&JsonDecoder::<User>::new(), output(b"not json")).unwrap_err();

        assert!(matches!(err.kind, TaskErrorKind::Decode(_)));
        assert_eq!(err.partial_data(), Some(&Bytes::from_static(b"not json")));
        assert_eq!(err.metrics(), Some(&sample_metrics()));
        assert_eq!(err.response().and_then(|r| r.status), Some(200));
        assert_eq!(err.task_id, Some(TaskId::new(9)));
    }

    #[test]
    fn test_decode_failure_without_task() {
        let detached = TaskOutput {
            task_id: None,
            ..output(b"\xff")
        };
        let err = decode_output(&Utf8Decoder, detached).unwrap_err();
        assert_eq!(err.task_id, None);
    }

    #[test]
    fn test_invalid_utf8() {
        let err = decode_output(&Utf8Decoder, output(&[0xff, 0xfe])).unwrap_err();
        assert!(matches!(err.kind, TaskErrorKind::Decode(_)));
    }
}
