//! Response descriptors and the failure channel.

use std::sync::Arc;

use callbox_core::transport::is_success_status;
use callbox_core::{Headers, RawResponse, ResponseType};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::call::CallId;
use crate::config::RequestConfig;

/// Where a delivered response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    /// The call's own transport attempt.
    #[default]
    Transport,
    /// Fan-out of a cache leader's attempt the call was waiting on.
    Leader,
    /// Stored data of a fresh cache entry.
    Cache,
}

impl ResponseSource {
    /// Returns the source as a string slice.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Transport => "transport",
            ResponseSource::Leader => "leader",
            ResponseSource::Cache => "cache",
        }
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseData {
    /// Body decoded as JSON. An empty body decodes to `null`.
    Json(Value),
    /// Body kept as text (lossy UTF-8).
    Text(String),
}

/// Immutable snapshot of one completed attempt, as seen by one call.
///
/// Waiters served from a cache entry each get their own `Response` built
/// from the same raw snapshot, carrying their own config and id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status code, `0` when no HTTP status was obtained.
    pub status: u16,
    /// Reason phrase, or the transport error for status `0`.
    pub status_text: String,
    /// Response headers.
    pub headers: Headers,
    /// Configuration of the call this response is delivered to.
    pub config: Arc<RequestConfig>,
    /// Decoded body.
    pub data: ResponseData,
    /// Identity of the call this response is delivered to.
    pub request: CallId,
    /// Where the response came from.
    pub source: ResponseSource,
}

impl Response {
    /// Builds a response for `request` and decodes the body according to the
    /// call's `response_type`. The decode error, if any, is returned alongside;
    /// the body is then kept as text.
    pub(crate) fn decode(
        raw: &RawResponse,
        config: Arc<RequestConfig>,
        request: CallId,
        source: ResponseSource,
    ) -> (Self, Option<serde_json::Error>) {
        let (data, error) = match config.response_type {
            ResponseType::Text => (ResponseData::Text(lossy(&raw.body)), None),
            ResponseType::Json if raw.body.iter().all(u8::is_ascii_whitespace) => {
                (ResponseData::Json(Value::Null), None)
            }
            ResponseType::Json => match serde_json::from_slice(&raw.body) {
                Ok(value) => (ResponseData::Json(value), None),
                Err(error) => (ResponseData::Text(lossy(&raw.body)), Some(error)),
            },
        };
        let response = Self {
            status: raw.status,
            status_text: raw.status_text.clone(),
            headers: raw.headers.clone(),
            config,
            data,
            request,
            source,
        };
        (response, error)
    }

    /// Whether the status is in the 2xx/3xx class.
    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }

    /// The JSON body, if the body was decoded as JSON.
    pub fn json(&self) -> Option<&Value> {
        match &self.data {
            ResponseData::Json(value) => Some(value),
            ResponseData::Text(_) => None,
        }
    }

    /// The text body, if the body was kept as text.
    pub fn text(&self) -> Option<&str> {
        match &self.data {
            ResponseData::Json(_) => None,
            ResponseData::Text(text) => Some(text),
        }
    }

    /// Deserializes the JSON body into `T`.
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.data {
            ResponseData::Json(value) => T::deserialize(value),
            ResponseData::Text(text) => serde_json::from_str(text),
        }
    }
}

fn lossy(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

/// A call that did not succeed.
#[derive(Debug, Clone, Error)]
pub enum Failure {
    /// The final attempt ended outside the 2xx/3xx class, including status
    /// `0` for transport errors and timeouts.
    #[error("request failed with status {} {}", .0.status, .0.status_text)]
    Status(Response),

    /// The body could not be interpreted as the declared response type.
    #[error("response body is not valid {expected}: {source}")]
    Decode {
        /// The response, body kept as text.
        response: Response,
        /// The declared response type.
        expected: ResponseType,
        /// Decoder error.
        #[source]
        source: Arc<serde_json::Error>,
    },
}

impl Failure {
    /// The response the failure was built from.
    pub fn response(&self) -> &Response {
        match self {
            Failure::Status(response) => response,
            Failure::Decode { response, .. } => response,
        }
    }

    /// Status code of the underlying response.
    pub fn status(&self) -> u16 {
        self.response().status
    }
}

/// Final result of a call.
pub type Outcome = Result<Response, Failure>;

pub(crate) fn classify(response: Response, decode_error: Option<serde_json::Error>) -> Outcome {
    if let Some(error) = decode_error {
        let expected = response.config.response_type;
        return Err(Failure::Decode {
            response,
            expected,
            source: Arc::new(error),
        });
    }
    if response.is_success() {
        Ok(response)
    } else {
        Err(Failure::Status(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, RequestOptions};

    fn config(response_type: ResponseType) -> Arc<RequestConfig> {
        Arc::new(RequestConfig::resolve(
            &ClientConfig::default(),
            RequestOptions::new("/x").response_type(response_type),
        ))
    }

    fn decode(raw: RawResponse, response_type: ResponseType) -> Outcome {
        let (response, error) = Response::decode(
            &raw,
            config(response_type),
            CallId::next(),
            ResponseSource::Transport,
        );
        classify(response, error)
    }

    #[test]
    fn json_body_is_decoded() {
        let response = decode(RawResponse::new(200, r#"{"id":7}"#), ResponseType::Json).unwrap();
        assert_eq!(response.json(), Some(&serde_json::json!({"id": 7})));

        #[derive(serde::Deserialize)]
        struct Item {
            id: u32,
        }
        assert_eq!(response.json_as::<Item>().unwrap().id, 7);
    }

    #[test]
    fn empty_json_body_is_null() {
        let response = decode(RawResponse::new(204, ""), ResponseType::Json).unwrap();
        assert_eq!(response.json(), Some(&Value::Null));
    }

    #[test]
    fn text_body_is_kept() {
        let response = decode(RawResponse::new(200, "plain"), ResponseType::Text).unwrap();
        assert_eq!(response.text(), Some("plain"));
    }

    #[test]
    fn undecodable_json_is_a_decode_failure() {
        let failure = decode(RawResponse::new(200, "<html>"), ResponseType::Json).unwrap_err();
        match &failure {
            Failure::Decode {
                response, expected, ..
            } => {
                assert_eq!(*expected, ResponseType::Json);
                assert_eq!(response.text(), Some("<html>"));
            }
            other => panic!("expected decode failure, got {other:?}"),
        }
        assert_eq!(failure.status(), 200);
    }

    #[test]
    fn error_status_is_a_status_failure() {
        let failure = decode(RawResponse::new(503, "{}"), ResponseType::Json).unwrap_err();
        assert!(matches!(failure, Failure::Status(ref r) if r.status == 503));
        assert_eq!(failure.response().json(), Some(&serde_json::json!({})));
    }
}
