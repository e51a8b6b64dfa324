//! Client defaults, per-call options and the resolved request snapshot.
//!
//! Three layers take part in configuring a call:
//!
//! - [`ClientConfig`] holds instance-wide defaults. It deserializes from
//!   configuration files, durations written as humantime strings (`"300ms"`).
//! - [`RequestOptions`] holds per-call overrides; every field is optional.
//! - [`RequestConfig`] is the resolved snapshot: defaults overlaid with the
//!   options, headers merged key by key. The request interceptor may edit it
//!   once before hand-off; after that it is frozen for the rest of the call.

use std::str::FromStr;
use std::time::Duration;

use callbox_core::{Headers, Method, ResponseType, Strategies};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Scheduling mode applied before a call enters dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Dispatch on the next scheduler turn.
    #[default]
    None,
    /// Only the last call within `debounce_time` for the same URL is sent.
    Debounce,
    /// At most one call per `throttle_time` for the same URL is sent.
    Throttle,
}

impl Mode {
    /// Returns the lower-case mode name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Mode::None => "none",
            Mode::Debounce => "debounce",
            Mode::Throttle => "throttle",
        }
    }
}

/// Error returned for an unknown mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("mode `{0}` is invalid, expected \"debounce\" or \"throttle\"")]
pub struct InvalidMode(pub String);

impl FromStr for Mode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(Mode::None),
            "debounce" => Ok(Mode::Debounce),
            "throttle" => Ok(Mode::Throttle),
            other => Err(InvalidMode(other.to_owned())),
        }
    }
}

fn default_headers() -> Headers {
    Headers::from([("Content-Type", "application/json")])
}

/// Instance-wide defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix for relative URLs.
    pub base_url: String,
    /// URL used when a call names none.
    pub url: String,
    /// Method used when a call names none.
    pub method: Method,
    /// Headers sent with every call; per-call headers are merged on top.
    pub headers: Headers,
    /// Default scheduling mode.
    pub mode: Mode,
    /// Number of re-sends after a failed attempt.
    pub retry_limit: u32,
    /// Fixed delay before each re-send.
    #[serde(with = "humantime_serde")]
    pub retry_buffer: Duration,
    /// Quiet period for [`Mode::Debounce`].
    #[serde(with = "humantime_serde")]
    pub debounce_time: Duration,
    /// Window for [`Mode::Throttle`].
    #[serde(with = "humantime_serde")]
    pub throttle_time: Duration,
    /// Whether credentials accompany requests.
    pub with_credentials: bool,
    /// Upper bound for each transport attempt; `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// How response bodies are decoded.
    pub response_type: ResponseType,
    /// Cache rules installed when the client is built.
    pub strategies: Strategies,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "/".to_owned(),
            url: "/".to_owned(),
            method: Method::Get,
            headers: default_headers(),
            mode: Mode::None,
            retry_limit: 0,
            retry_buffer: Duration::from_millis(3000),
            debounce_time: Duration::from_millis(300),
            throttle_time: Duration::from_millis(3000),
            with_credentials: false,
            timeout: None,
            response_type: ResponseType::Json,
            strategies: Strategies::new(),
        }
    }
}

const OPTION_KEYS: &[&str] = &[
    "url",
    "method",
    "base_url",
    "headers",
    "params",
    "data",
    "mode",
    "retry_limit",
    "retry_buffer",
    "debounce_time",
    "throttle_time",
    "with_credentials",
    "timeout",
    "response_type",
];

/// Per-call overrides. Unset fields fall back to the [`ClientConfig`].
///
/// `mode` is kept as a loose string: an unknown value is dropped with a
/// warning and the call proceeds unscheduled, it never fails the call.
/// Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// Target URL, relative to `base_url` unless absolute.
    pub url: Option<String>,
    /// Request method.
    pub method: Option<Method>,
    /// Prefix for a relative `url`.
    pub base_url: Option<String>,
    /// Headers merged over the client defaults.
    pub headers: Option<Headers>,
    /// Query parameters, appended in insertion order.
    pub params: Option<Map<String, Value>>,
    /// Body, serialized as JSON.
    pub data: Option<Value>,
    /// `"debounce"`, `"throttle"` or `"none"`.
    pub mode: Option<String>,
    /// Number of re-sends after a failed attempt.
    pub retry_limit: Option<u32>,
    /// Fixed delay before each re-send.
    #[serde(with = "humantime_serde")]
    pub retry_buffer: Option<Duration>,
    /// Quiet period for debounce.
    #[serde(with = "humantime_serde")]
    pub debounce_time: Option<Duration>,
    /// Window for throttle.
    #[serde(with = "humantime_serde")]
    pub throttle_time: Option<Duration>,
    /// Whether credentials accompany the request.
    pub with_credentials: Option<bool>,
    /// Upper bound for each transport attempt. Zero disables the bound.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// How the response body is decoded.
    pub response_type: Option<ResponseType>,
}

impl RequestOptions {
    /// Reads options from a JSON object, warning about keys that name no
    /// option. Known keys with a value of the wrong shape are an error.
    pub fn from_json(options: Map<String, Value>) -> Result<Self, serde_json::Error> {
        for key in options.keys() {
            if !OPTION_KEYS.contains(&key.as_str()) {
                warn!(key = %key, "ignoring unknown request option");
            }
        }
        serde_json::from_value(Value::Object(options))
    }

    /// Options targeting `url` with every other field unset.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Sets the URL.
    pub fn url(self, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..self
        }
    }

    /// Sets the method.
    pub fn method(self, method: Method) -> Self {
        Self {
            method: Some(method),
            ..self
        }
    }

    /// Sets the base URL.
    pub fn base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..self
        }
    }

    /// Adds one header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(name, value);
        self
    }

    /// Adds one query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    /// Sets the JSON body.
    pub fn data(self, data: impl Into<Value>) -> Self {
        Self {
            data: Some(data.into()),
            ..self
        }
    }

    /// Sets the scheduling mode.
    pub fn mode(self, mode: Mode) -> Self {
        Self {
            mode: Some(mode.as_str().to_owned()),
            ..self
        }
    }

    /// Sets the retry budget.
    pub fn retry_limit(self, limit: u32) -> Self {
        Self {
            retry_limit: Some(limit),
            ..self
        }
    }

    /// Sets the delay between retries.
    pub fn retry_buffer(self, delay: Duration) -> Self {
        Self {
            retry_buffer: Some(delay),
            ..self
        }
    }

    /// Sets the debounce window.
    pub fn debounce_time(self, window: Duration) -> Self {
        Self {
            debounce_time: Some(window),
            ..self
        }
    }

    /// Sets the throttle window.
    pub fn throttle_time(self, window: Duration) -> Self {
        Self {
            throttle_time: Some(window),
            ..self
        }
    }

    /// Sets whether credentials accompany the request.
    pub fn with_credentials(self, enabled: bool) -> Self {
        Self {
            with_credentials: Some(enabled),
            ..self
        }
    }

    /// Sets the attempt timeout.
    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Sets how the response body is decoded.
    pub fn response_type(self, response_type: ResponseType) -> Self {
        Self {
            response_type: Some(response_type),
            ..self
        }
    }
}

/// The resolved configuration of one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    /// Target URL as given.
    pub url: String,
    /// Request method.
    pub method: Method,
    /// Prefix for a relative `url`.
    pub base_url: String,
    /// Merged headers.
    pub headers: Headers,
    /// Query parameters.
    pub params: Map<String, Value>,
    /// JSON body.
    pub data: Option<Value>,
    /// Scheduling mode.
    pub mode: Mode,
    /// Number of re-sends after a failed attempt.
    pub retry_limit: u32,
    /// Fixed delay before each re-send.
    pub retry_buffer: Duration,
    /// Quiet period for debounce.
    pub debounce_time: Duration,
    /// Window for throttle.
    pub throttle_time: Duration,
    /// Whether credentials accompany the request.
    pub with_credentials: bool,
    /// Upper bound for each transport attempt.
    pub timeout: Option<Duration>,
    /// How the response body is decoded.
    pub response_type: ResponseType,
}

impl RequestConfig {
    /// Overlays `options` on `defaults`.
    pub fn resolve(defaults: &ClientConfig, options: RequestOptions) -> Self {
        let mut headers = defaults.headers.clone();
        if let Some(extra) = &options.headers {
            headers.merge(extra);
        }

        let mode = match options.mode.as_deref().map(Mode::from_str) {
            None => defaults.mode,
            Some(Ok(mode)) => mode,
            Some(Err(error)) => {
                warn!(%error, "dropping invalid request mode");
                Mode::None
            }
        };

        Self {
            url: options.url.unwrap_or_else(|| defaults.url.clone()),
            method: options.method.unwrap_or(defaults.method),
            base_url: options.base_url.unwrap_or_else(|| defaults.base_url.clone()),
            headers,
            params: options.params.unwrap_or_default(),
            data: options.data,
            mode,
            retry_limit: options.retry_limit.unwrap_or(defaults.retry_limit),
            retry_buffer: options.retry_buffer.unwrap_or(defaults.retry_buffer),
            debounce_time: options.debounce_time.unwrap_or(defaults.debounce_time),
            throttle_time: options.throttle_time.unwrap_or(defaults.throttle_time),
            with_credentials: options.with_credentials.unwrap_or(defaults.with_credentials),
            timeout: options
                .timeout
                .or(defaults.timeout)
                .filter(|timeout| !timeout.is_zero()),
            response_type: options.response_type.unwrap_or(defaults.response_type),
        }
    }

    /// The resolved URL: base, path and query string. This is the cache key.
    pub fn full_url(&self) -> String {
        let params = (!self.params.is_empty()).then_some(&self.params);
        callbox_core::format_url(&self.base_url, &self.url, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_option_keys_are_ignored() {
        let options = json!({"url": "/x", "retries": 3, "retry_limit": 2, "timeout": "1s"});
        let Value::Object(options) = options else {
            unreachable!()
        };
        let options = RequestOptions::from_json(options).unwrap();
        assert_eq!(options.url.as_deref(), Some("/x"));
        assert_eq!(options.retry_limit, Some(2));
        assert_eq!(options.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "/");
        assert_eq!(config.headers.get("Content-Type"), Some("application/json"));
        assert_eq!(config.retry_limit, 0);
        assert_eq!(config.retry_buffer, Duration::from_millis(3000));
        assert_eq!(config.debounce_time, Duration::from_millis(300));
        assert_eq!(config.throttle_time, Duration::from_millis(3000));
        assert!(!config.with_credentials);
        assert_eq!(config.timeout, None);
        assert_eq!(config.response_type, ResponseType::Json);
    }

    #[test]
    fn options_override_defaults_and_merge_headers() {
        let defaults = ClientConfig {
            headers: Headers::from([("Content-Type", "application/json"), ("X-App", "demo")]),
            ..ClientConfig::default()
        };
        let options = RequestOptions::new("/users")
            .method(Method::Post)
            .header("X-App", "override")
            .header("X-Trace", "1")
            .param("page", 2)
            .retry_limit(3)
            .data(json!({"name": "a"}));

        let config = RequestConfig::resolve(&defaults, options);
        assert_eq!(config.method, Method::Post);
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.headers.get("Content-Type"), Some("application/json"));
        assert_eq!(config.headers.get("X-App"), Some("override"));
        assert_eq!(config.headers.get("X-Trace"), Some("1"));
        assert_eq!(config.full_url(), "/users?page=2");
        assert_eq!(config.data, Some(json!({"name": "a"})));
    }

    #[test]
    fn invalid_mode_is_dropped() {
        let options = RequestOptions {
            mode: Some("sometimes".to_owned()),
            ..RequestOptions::new("/x")
        };
        let config = RequestConfig::resolve(&ClientConfig::default(), options);
        assert_eq!(config.mode, Mode::None);

        let config = RequestConfig::resolve(
            &ClientConfig::default(),
            RequestOptions::new("/x").mode(Mode::Throttle),
        );
        assert_eq!(config.mode, Mode::Throttle);
    }

    #[test]
    fn zero_timeout_disables_the_bound() {
        let config = RequestConfig::resolve(
            &ClientConfig::default(),
            RequestOptions::new("/x").timeout(Duration::ZERO),
        );
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn client_config_from_yaml() {
        let yaml = r#"
        base_url: "http://api.test/v1"
        retry_limit: 2
        retry_buffer: 500ms
        mode: throttle
        timeout: 2s
        headers:
          Accept: text/plain
        strategies:
          - url: "/users"
            ttl: 1m
        "#;

        let config: ClientConfig = serde_saphyr::from_str(yaml).unwrap();
        assert_eq!(config.base_url, "http://api.test/v1");
        assert_eq!(config.retry_limit, 2);
        assert_eq!(config.retry_buffer, Duration::from_millis(500));
        assert_eq!(config.mode, Mode::Throttle);
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.headers.get("Accept"), Some("text/plain"));
        assert_eq!(config.headers.get("Content-Type"), None);
        assert_eq!(config.debounce_time, Duration::from_millis(300));
        assert!(config.strategies.find_match("/users").is_some());
    }
}
