//! Transport over reqwest-middleware's client.

use std::time::Duration;

use async_trait::async_trait;
use callbox_core::{Headers, RawResponse, Transport, TransportError, TransportRequest};
use reqwest::Url;
use reqwest::header::HeaderMap;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tracing::trace;

/// Sends callbox requests with reqwest.
///
/// Requests pass through the middleware chain of the wrapped
/// [`ClientWithMiddleware`]. The body is read completely before the attempt
/// counts as finished.
///
/// `with_credentials` has no meaning for a native client: cookies and
/// credentials are whatever the wrapped client is configured with.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: ClientWithMiddleware,
}

impl ReqwestTransport {
    /// Wraps a plain reqwest client with an empty middleware chain.
    pub fn new(client: reqwest::Client) -> Self {
        Self::from_middleware(ClientBuilder::new(client).build())
    }

    /// Wraps a client with middleware already attached.
    pub fn from_middleware(client: ClientWithMiddleware) -> Self {
        Self { client }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        let url = Url::parse(&request.url)
            .map_err(|_| TransportError::InvalidUrl(request.url.clone()))?;
        let method = http::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|error| TransportError::Other(Box::new(error)))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if request.with_credentials {
            trace!("with_credentials is handled by the wrapped client");
        }

        let response = builder
            .send()
            .await
            .map_err(|error| from_middleware_error(error, request.timeout))?;

        let status = response.status();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|error| from_reqwest_error(error, request.timeout))?;

        Ok(RawResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            headers,
            body,
        })
    }
}

/// Repeated headers are joined with `", "` in the order received.
fn collect_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        let value = String::from_utf8_lossy(value.as_bytes());
        let joined = match headers.get(name.as_str()) {
            Some(existing) => format!("{existing}, {value}"),
            None => value.into_owned(),
        };
        headers.insert(name.as_str(), joined);
    }
    headers
}

fn from_middleware_error(
    error: reqwest_middleware::Error,
    timeout: Option<Duration>,
) -> TransportError {
    match error {
        reqwest_middleware::Error::Reqwest(error) => from_reqwest_error(error, timeout),
        other => TransportError::Other(Box::new(other)),
    }
}

fn from_reqwest_error(error: reqwest::Error, timeout: Option<Duration>) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout.unwrap_or_default())
    } else if error.is_connect() || error.is_request() || error.is_body() {
        TransportError::Connection(Box::new(error))
    } else {
        TransportError::Other(Box::new(error))
    }
}
