//! The transport capability the engine sends requests through.
//!
//! The engine never looks at sockets, TLS or connection pools. It hands a
//! [`TransportRequest`] to a [`Transport`] and gets back either a
//! [`RawResponse`] snapshot or a [`TransportError`]. Everything wire-level
//! (status code semantics, body serialization, header encoding) belongs to
//! the implementation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Headers, Method};

/// How the response body should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Decode the body as JSON.
    #[default]
    Json,
    /// Keep the body as text.
    Text,
}

impl ResponseType {
    /// Returns the lower-case name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Json => "json",
            ResponseType::Text => "text",
        }
    }
}

impl std::fmt::Display for ResponseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved request ready to be put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// Request method.
    pub method: Method,
    /// Resolved URL (base, path and query string).
    pub url: String,
    /// Request headers.
    pub headers: Headers,
    /// Serialized body, if any.
    pub body: Option<Bytes>,
    /// Upper bound for the whole exchange.
    pub timeout: Option<Duration>,
    /// Whether credentials (cookies, auth) should accompany the request.
    pub with_credentials: bool,
    /// Declared body interpretation; a hint for transports that negotiate it.
    pub response_type: ResponseType,
}

/// Snapshot of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// Status code. `0` means the exchange never produced an HTTP status.
    pub status: u16,
    /// Reason phrase or error description.
    pub status_text: String,
    /// Response headers.
    pub headers: Headers,
    /// Undecoded body.
    pub body: Bytes,
}

impl RawResponse {
    /// Creates a response with the given status and body and no headers.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Headers::new(),
            body: body.into(),
        }
    }

    /// Represents a transport-level failure as a status `0` response.
    pub fn from_error(error: &TransportError) -> Self {
        Self {
            status: 0,
            status_text: error.to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Status codes in the 2xx and 3xx classes count as success.
    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }
}

/// Returns `true` for 2xx and 3xx statuses.
pub const fn is_success_status(status: u16) -> bool {
    matches!(status / 100, 2 | 3)
}

/// Failure to obtain any HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The URL cannot be sent by this transport.
    #[error("invalid url `{0}`")]
    InvalidUrl(String),
    /// The exchange exceeded its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// Connecting to or talking with the remote side failed.
    #[error("connection failed: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Any other transport error.
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

/// Sends requests and returns completed responses.
///
/// Implementations must be cheap to share: the engine holds one behind an
/// `Arc` and calls it concurrently from spawned tasks. Cancellation is done
/// by dropping the returned future.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use callbox_core::{RawResponse, Transport, TransportError, TransportRequest};
///
/// struct Echo;
///
/// #[async_trait]
/// impl Transport for Echo {
///     async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
///         Ok(RawResponse::new(200, request.url.into_bytes()))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Performs one exchange.
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError>;
}

#[async_trait]
impl<T> Transport for std::sync::Arc<T>
where
    T: Transport + ?Sized,
{
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        self.as_ref().send(request).await
    }
}
