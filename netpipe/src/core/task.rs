//! Task descriptors, responses and metrics exchanged with the task layer.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifier assigned to a task by the task-execution layer.
///
/// Used purely as a correlation key for side-channel events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `GET`
    #[default]
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `COPY` (WebDAV)
    Copy,
    /// `HEAD`
    Head,
    /// `OPTIONS`
    Options,
    /// `CONNECT`
    Connect,
    /// `TRACE`
    Trace,
    /// `LINK`
    Link,
    /// `UNLINK`
    Unlink,
    /// `PURGE`, used by caching proxies.
    Purge,
    /// `LOCK` (WebDAV)
    Lock,
    /// `UNLOCK` (WebDAV)
    Unlock,
    /// `PROPFIND` (WebDAV)
    Propfind,
    /// `VIEW`
    View,
}

impl HttpMethod {
    /// Returns the method as it appears on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Copy => "COPY",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Link => "LINK",
            Self::Unlink => "UNLINK",
            Self::Purge => "PURGE",
            Self::Lock => "LOCK",
            Self::Unlock => "UNLOCK",
            Self::Propfind => "PROPFIND",
            Self::View => "VIEW",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prepared request, produced by request-building collaborators.
///
/// Opaque to the core beyond what is needed to start a task and log it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskDescriptor {
    /// Name used for logging only.
    pub name: String,
    /// Fully composed target URL.
    pub url: String,
    /// Request method.
    pub method: HttpMethod,
    /// Request headers, in order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Bytes>,
}

impl TaskDescriptor {
    /// Creates a GET descriptor for the given URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the logging name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the method.
    #[must_use]
    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns the first header value with the given name (case-insensitive).
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// Where an upload task reads its body from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// Upload an in-memory body (possibly empty).
    Data(Option<Bytes>),
    /// Upload the contents of a file.
    File(PathBuf),
}

/// The kind of one-shot task to create.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaskKind {
    /// A plain request.
    #[default]
    Data,
    /// An upload.
    Upload(UploadSource),
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Upload(_) => write!(f, "upload"),
        }
    }
}

/// The response metadata reported by the task layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResponseDescriptor {
    /// The final URL, after redirects.
    pub url: Option<String>,
    /// HTTP status code, when the response is HTTP.
    pub status: Option<u16>,
    /// Response headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// MIME type of the payload.
    pub mime_type: Option<String>,
    /// Content length announced by the server.
    pub expected_content_length: Option<u64>,
}

impl ResponseDescriptor {
    /// Creates a response with the given status.
    #[must_use]
    pub fn with_status(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_some_and(|s| (200..300).contains(&s))
    }
}

/// Timing metrics collected for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetrics {
    /// When the fetch started.
    pub fetch_start: DateTime<Utc>,
    /// When the last byte of the response arrived.
    pub response_end: DateTime<Utc>,
    /// Number of redirects followed.
    #[serde(default)]
    pub redirect_count: u32,
    /// Request bytes written.
    #[serde(default)]
    pub bytes_sent: u64,
    /// Response bytes read.
    #[serde(default)]
    pub bytes_received: u64,
}

impl TaskMetrics {
    /// Elapsed time between fetch start and response end.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.response_end - self.fetch_start
    }

    /// Elapsed time in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.duration().num_milliseconds()
    }
}

/// Close code of a duplex connection, numbered as in RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// Normal closure.
    pub const NORMAL: Self = Self(1000);
    /// The endpoint is going away.
    pub const GOING_AWAY: Self = Self(1001);
    /// Protocol error.
    pub const PROTOCOL_ERROR: Self = Self(1002);
    /// Unsupported data type.
    pub const UNSUPPORTED_DATA: Self = Self(1003);
    /// No status code was present.
    pub const NO_STATUS_RECEIVED: Self = Self(1005);
    /// The connection dropped without a close frame.
    pub const ABNORMAL_CLOSURE: Self = Self(1006);
    /// Payload inconsistent with the message type.
    pub const INVALID_PAYLOAD: Self = Self(1007);
    /// Policy violation.
    pub const POLICY_VIOLATION: Self = Self(1008);
    /// Message too big to process.
    pub const MESSAGE_TOO_BIG: Self = Self(1009);
    /// The client expected an extension the server did not negotiate.
    pub const MANDATORY_EXTENSION_MISSING: Self = Self(1010);
    /// The server hit an unexpected condition.
    pub const INTERNAL_SERVER_ERROR: Self = Self(1011);
    /// TLS handshake failed.
    pub const TLS_HANDSHAKE_FAILURE: Self = Self(1015);

    /// Returns the numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The successful outcome of a data or upload task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput {
    /// The task that produced this output, when it came from a task.
    pub task_id: Option<TaskId>,
    /// The response payload.
    pub data: Bytes,
    /// The response metadata.
    pub response: ResponseDescriptor,
    /// Metrics correlated with the task, if any arrived before completion.
    pub metrics: Option<TaskMetrics>,
    /// Whether the task stalled waiting for connectivity at some point.
    pub waited_for_connectivity: bool,
}
