//! The public facade: call creation, method aliases, interceptors, cache
//! strategy management and aggregate helpers.

use std::sync::Arc;

use callbox_core::{Method, Strategies, Strategy, Transport, Ttl, UrlMatcher};
use futures::future::{select_all, try_join_all};
use serde_json::Value;
use tracing::debug;

use crate::call::Call;
use crate::config::{ClientConfig, RequestConfig, RequestOptions};
use crate::engine::Engine;
use crate::error::Error;
use crate::response::{Failure, Outcome, Response};

/// An isolated call orchestrator.
///
/// Every client owns its own pipelines, gate timers, in-flight pool, cache
/// store and strategies. Clones share them; [`Client::create`] makes a new,
/// independent instance over the same transport.
///
/// Calls must be issued from within a tokio runtime. The first call starts a
/// driver task on that runtime, and the client keeps using it afterwards.
///
/// # Example
///
/// ```no_run
/// use callbox::{Client, RequestOptions};
/// # use callbox_core::{RawResponse, Transport, TransportError, TransportRequest};
/// # struct Http;
/// # #[async_trait::async_trait]
/// # impl Transport for Http {
/// #     async fn send(&self, _: TransportRequest) -> Result<RawResponse, TransportError> {
/// #         Ok(RawResponse::new(200, "{}"))
/// #     }
/// # }
///
/// # async fn run() -> Result<(), callbox::Error> {
/// let client = Client::new(Http);
/// client
///     .get("/users", RequestOptions::default().param("page", 1))?
///     .then(|response| println!("{:?}", response.json()))
///     .catch(|failure| eprintln!("{failure}"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    engine: Arc<Engine>,
}

impl Client {
    /// A client with default configuration over `transport`.
    pub fn new<T: Transport>(transport: T) -> Self {
        Self::builder().transport(transport).build()
    }

    /// Creates a new [`ClientBuilder`].
    pub fn builder() -> ClientBuilder<NotSet> {
        ClientBuilder::new()
    }

    /// Instance defaults.
    pub fn config(&self) -> &ClientConfig {
        &self.engine.defaults
    }

    /// A new, isolated client sharing this client's transport.
    pub fn create(&self, config: ClientConfig) -> Client {
        Client {
            engine: Engine::new(self.engine.transport(), config),
        }
    }

    /// Creates a call and submits it for dispatch on a later scheduler turn.
    ///
    /// Subscribers may be attached to the returned call right away; an
    /// outcome that arrives first is kept for them.
    pub fn request(&self, options: RequestOptions) -> Result<Call, Error> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::NoRuntime);
        }
        let config = RequestConfig::resolve(&self.engine.defaults, options);
        let call = Call::new(config, Arc::downgrade(&self.engine));
        {
            let config = call.config();
            debug!(
                call = %call.id(),
                method = config.method.as_str(),
                url = %config.url,
                mode = config.mode.as_str(),
                "call created"
            );
        }
        self.engine.submit(call.clone());
        Ok(call)
    }

    /// Like [`request`](Self::request), with options given as a JSON object
    /// (`{"url": "/users", "method": "post", "retry_limit": 2}`).
    pub fn request_json(&self, options: Value) -> Result<Call, Error> {
        let options = match options {
            Value::Object(options) => RequestOptions::from_json(options)?,
            other => {
                return Err(Error::InvalidOptions {
                    found: json_type(&other),
                });
            }
        };
        self.request(options)
    }

    fn with_method(
        &self,
        method: Method,
        url: &str,
        data: Option<Value>,
        options: RequestOptions,
    ) -> Result<Call, Error> {
        self.request(RequestOptions {
            url: Some(url.to_owned()),
            method: Some(method),
            data: data.or(options.data),
            ..options
        })
    }

    /// GET `url`.
    pub fn get(&self, url: &str, options: RequestOptions) -> Result<Call, Error> {
        self.with_method(Method::Get, url, None, options)
    }

    /// HEAD `url`.
    pub fn head(&self, url: &str, options: RequestOptions) -> Result<Call, Error> {
        self.with_method(Method::Head, url, None, options)
    }

    /// OPTIONS `url`.
    pub fn options(&self, url: &str, options: RequestOptions) -> Result<Call, Error> {
        self.with_method(Method::Options, url, None, options)
    }

    /// POST `data` to `url`.
    pub fn post(
        &self,
        url: &str,
        data: impl Into<Value>,
        options: RequestOptions,
    ) -> Result<Call, Error> {
        self.with_method(Method::Post, url, Some(data.into()), options)
    }

    /// PUT `data` to `url`.
    pub fn put(
        &self,
        url: &str,
        data: impl Into<Value>,
        options: RequestOptions,
    ) -> Result<Call, Error> {
        self.with_method(Method::Put, url, Some(data.into()), options)
    }

    /// PATCH `data` to `url`.
    pub fn patch(
        &self,
        url: &str,
        data: impl Into<Value>,
        options: RequestOptions,
    ) -> Result<Call, Error> {
        self.with_method(Method::Patch, url, Some(data.into()), options)
    }

    /// DELETE `url`, with an optional body.
    pub fn delete(
        &self,
        url: &str,
        data: impl Into<Value>,
        options: RequestOptions,
    ) -> Result<Call, Error> {
        let data = match data.into() {
            Value::Null => None,
            data => Some(data),
        };
        self.with_method(Method::Delete, url, data, options)
    }

    /// Installs the request interceptor, replacing any previous one.
    ///
    /// It runs once per call, at hand-off, in submission order, and may edit
    /// the call's configuration before the URL is resolved.
    pub fn set_request_interceptor<F>(&self, interceptor: F)
    where
        F: Fn(&mut RequestConfig) + Send + Sync + 'static,
    {
        self.engine.set_request_interceptor(Arc::new(interceptor));
    }

    /// Installs the response interceptor, replacing any previous one.
    ///
    /// It runs once per delivered response, before success is decided, and
    /// may edit the response (including its status).
    pub fn set_response_interceptor<F>(&self, interceptor: F)
    where
        F: Fn(&mut Response) + Send + Sync + 'static,
    {
        self.engine.set_response_interceptor(Arc::new(interceptor));
    }

    /// Builds a cache rule. An empty exact matcher never matches and is
    /// skipped with a warning when rules are evaluated.
    pub fn create_strategy(
        matcher: impl Into<UrlMatcher>,
        ttl: impl Into<Ttl>,
        auto_retry: bool,
    ) -> Strategy {
        Strategy::new(matcher, ttl, auto_retry)
    }

    /// Replaces the active cache rules. Earlier rules win when several match.
    ///
    /// Entries cached under the previous rules stay in the store, but calls
    /// only reach them again while a current rule matches their URL.
    pub fn set_strategy(&self, rules: impl Into<Strategies>) {
        let rules = rules.into();
        self.engine.update_strategies(|current| *current = rules);
    }

    /// Current cache rules, in evaluation order.
    pub fn strategies(&self) -> Strategies {
        self.engine.strategies()
    }

    /// Removes the rules with `matcher`, or all rules when `None`.
    ///
    /// Existing cache entries stay; use [`evict`](Self::evict) to drop them.
    pub fn clear_store(&self, matcher: Option<&UrlMatcher>) {
        self.engine.update_strategies(|rules| match matcher {
            Some(matcher) => rules.remove(matcher),
            None => rules.clear(),
        });
    }

    /// Drops the cache entry for a resolved URL. Returns whether one existed.
    ///
    /// Calls already waiting on that entry's leader are still answered when
    /// the leader's attempt completes; later calls start a new leader.
    pub fn evict(&self, url: &str) -> bool {
        self.engine.store.remove(url)
    }

    /// Drops every cache entry.
    pub fn evict_all(&self) {
        self.engine.store.clear();
    }

    /// Number of calls handed to dispatch that have not been delivered yet.
    pub fn in_flight(&self) -> usize {
        self.engine.dispatcher.in_flight()
    }

    /// Waits for every call to succeed, or for the first failure.
    ///
    /// Responses come back in input order. Pending forever if a call never
    /// settles.
    pub async fn all<I>(calls: I) -> Result<Vec<Response>, Failure>
    where
        I: IntoIterator<Item = Call>,
    {
        let calls: Vec<Call> = calls.into_iter().collect();
        try_join_all(calls.iter().map(Call::outcome)).await
    }

    /// The first outcome among `calls`, or `None` when there are none.
    pub async fn race<I>(calls: I) -> Option<Outcome>
    where
        I: IntoIterator<Item = Call>,
    {
        let calls: Vec<Call> = calls.into_iter().collect();
        if calls.is_empty() {
            return None;
        }
        let (outcome, _, _) = select_all(calls.iter().map(|call| Box::pin(call.outcome()))).await;
        Some(outcome)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("engine", &self.engine).finish()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Marker type for an unset builder field.
///
/// When you see `NotSet` in a compiler error, the transport has not been
/// given to the builder yet.
pub struct NotSet;

/// Builder for [`Client`].
pub struct ClientBuilder<T> {
    transport: T,
    config: ClientConfig,
}

impl ClientBuilder<NotSet> {
    /// Creates a new builder with default configuration and no transport.
    pub fn new() -> Self {
        Self {
            transport: NotSet,
            config: ClientConfig::default(),
        }
    }
}

impl Default for ClientBuilder<NotSet> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClientBuilder<T> {
    /// Sets the transport.
    pub fn transport<U: Transport>(self, transport: U) -> ClientBuilder<U> {
        ClientBuilder {
            transport,
            config: self.config,
        }
    }

    /// Sets the instance defaults, cache rules included.
    pub fn config(self, config: ClientConfig) -> Self {
        Self { config, ..self }
    }
}

impl<T: Transport> ClientBuilder<T> {
    /// Builds the [`Client`].
    pub fn build(self) -> Client {
        Client {
            engine: Engine::new(Arc::new(self.transport), self.config),
        }
    }
}
