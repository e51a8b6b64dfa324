//! Shared state behind a [`Client`](crate::Client) and the driver task that
//! moves submitted calls into the rate gate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use bytes::Bytes;
use callbox_core::{
    CachePolicy, Method, RawResponse, Strategies, Strategy, Transport, TransportError,
    TransportRequest,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{Instrument, debug, debug_span, warn};

use crate::call::Call;
use crate::completion::Completions;
use crate::config::{ClientConfig, RequestConfig};
use crate::dispatch::Dispatcher;
use crate::gate::RateController;
use crate::metrics;
use crate::response::Response;
use crate::retry::RetryController;
use crate::store::CacheStore;
use crate::sync::{read, write};

pub(crate) type RequestInterceptor = Arc<dyn Fn(&mut RequestConfig) + Send + Sync>;
pub(crate) type ResponseInterceptor = Arc<dyn Fn(&mut Response) + Send + Sync>;

/// Identity of one transport attempt. A retry is a new attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AttemptId(u64);

impl AttemptId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct Engine {
    pub(crate) defaults: ClientConfig,
    transport: Arc<dyn Transport>,
    request_interceptor: RwLock<Option<RequestInterceptor>>,
    response_interceptor: RwLock<Option<ResponseInterceptor>>,
    strategies: RwLock<Strategies>,
    pub(crate) gate: RateController,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) completions: Completions,
    pub(crate) store: CacheStore,
    pub(crate) retry: RetryController,
    submissions: OnceLock<mpsc::UnboundedSender<Call>>,
    attempts: AtomicU64,
}

impl Engine {
    pub(crate) fn new(transport: Arc<dyn Transport>, defaults: ClientConfig) -> Arc<Self> {
        let strategies = defaults.strategies.clone();
        Arc::new(Self {
            defaults,
            transport,
            request_interceptor: RwLock::new(None),
            response_interceptor: RwLock::new(None),
            strategies: RwLock::new(strategies),
            gate: RateController::new(),
            dispatcher: Dispatcher::new(),
            completions: Completions::new(),
            store: CacheStore::new(),
            retry: RetryController::new(),
            submissions: OnceLock::new(),
            attempts: AtomicU64::new(1),
        })
    }

    pub(crate) fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Queues a call for the driver. Calls reach the rate gate in submission
    /// order, on a later scheduler turn than the one that submitted them.
    pub(crate) fn submit(self: &Arc<Self>, call: Call) {
        let sender = self.submissions.get_or_init(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            tokio::spawn(drive(Arc::downgrade(self), receiver));
            sender
        });
        if let Err(error) = sender.send(call) {
            warn!(call = %error.0.id(), "call driver has stopped, dropping call");
        }
    }

    fn admit(self: &Arc<Self>, call: Call) {
        let engine = Arc::clone(self);
        let admitted = call.clone();
        self.gate.admit(&call, move || {
            engine.dispatcher.enqueue(&engine, admitted);
        });
    }

    pub(crate) fn request_interceptor(&self) -> Option<RequestInterceptor> {
        read(&self.request_interceptor).clone()
    }

    pub(crate) fn response_interceptor(&self) -> Option<ResponseInterceptor> {
        read(&self.response_interceptor).clone()
    }

    pub(crate) fn set_request_interceptor(&self, interceptor: RequestInterceptor) {
        *write(&self.request_interceptor) = Some(interceptor);
    }

    pub(crate) fn set_response_interceptor(&self, interceptor: ResponseInterceptor) {
        *write(&self.response_interceptor) = Some(interceptor);
    }

    pub(crate) fn strategies(&self) -> Strategies {
        read(&self.strategies).clone()
    }

    pub(crate) fn update_strategies(&self, update: impl FnOnce(&mut Strategies)) {
        update(&mut write(&self.strategies));
    }

    /// The cache rule for a call, cloned out so no lock outlives the lookup.
    pub(crate) fn rule_for(&self, method: Method, url: &str) -> CachePolicy<Strategy, ()> {
        let strategies = read(&self.strategies);
        match CachePolicy::for_call(&strategies, method, url) {
            CachePolicy::Cacheable(rule) => CachePolicy::Cacheable(rule.clone()),
            CachePolicy::NonCacheable(()) => CachePolicy::NonCacheable(()),
        }
    }

    pub(crate) fn next_attempt(&self) -> AttemptId {
        AttemptId(self.attempts.fetch_add(1, Ordering::Relaxed))
    }

    /// Sends a call that is not routed through the cache.
    pub(crate) fn send(self: &Arc<Self>, call: &Call) -> AttemptId {
        let attempt = self.next_attempt();
        self.spawn_attempt(call, attempt);
        attempt
    }

    /// Starts one transport attempt for `call`. The attempt task is the only
    /// place a response enters the engine.
    pub(crate) fn spawn_attempt(self: &Arc<Self>, call: &Call, attempt: AttemptId) {
        let config = call.config();
        let url = call.resolve_url();
        let request = transport_request(&config, url.as_str());
        let timeout = request.timeout;
        let transport = Arc::clone(&self.transport);
        let engine = Arc::clone(self);
        let owner = call.clone();
        let span = debug_span!(
            "callbox.attempt",
            call = %call.id(),
            %attempt,
            method = config.method.as_str(),
            url = %url,
        );

        let task = tokio::spawn(
            async move {
                let started = Instant::now();
                let sent = transport.send(request);
                let result = match timeout {
                    Some(limit) => tokio::time::timeout(limit, sent)
                        .await
                        .unwrap_or(Err(TransportError::Timeout(limit))),
                    None => sent.await,
                };
                metrics::transport_send(started.elapsed());
                engine.attempt_finished(owner, attempt, result);
            }
            .instrument(span),
        );
        call.set_attempt(task.abort_handle());
    }

    fn attempt_finished(
        self: &Arc<Self>,
        call: Call,
        attempt: AttemptId,
        result: Result<RawResponse, TransportError>,
    ) {
        let raw = result.unwrap_or_else(|error| {
            debug!(%error, "transport attempt failed");
            RawResponse::from_error(&error)
        });

        if !raw.is_success() && call.retries_left() > 0 {
            self.retry.schedule(self, call, attempt);
            return;
        }
        self.completions.finish_attempt(self, call, attempt, raw);
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("defaults", &self.defaults)
            .field("strategies", &*read(&self.strategies))
            .field("in_flight", &self.dispatcher.in_flight())
            .field("cache_entries", &self.store.len())
            .finish_non_exhaustive()
    }
}

async fn drive(engine: Weak<Engine>, mut submissions: mpsc::UnboundedReceiver<Call>) {
    while let Some(call) = submissions.recv().await {
        let Some(engine) = engine.upgrade() else {
            break;
        };
        engine.admit(call);
    }
    debug!("call driver stopped");
}

fn transport_request(config: &RequestConfig, url: &str) -> TransportRequest {
    TransportRequest {
        method: config.method,
        url: url.to_owned(),
        headers: config.headers.clone(),
        body: config
            .data
            .as_ref()
            .map(|data| Bytes::from(data.to_string())),
        timeout: config.timeout,
        with_credentials: config.with_credentials,
        response_type: config.response_type,
    }
}
