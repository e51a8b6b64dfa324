//! Call descriptors.
//!
//! A [`Call`] is a cheap handle to the state of one logical request. Its
//! outcome is latched: subscribers attached after the call settled fire
//! immediately with the stored outcome, so attaching callbacks after
//! [`Client::request`](crate::Client::request) returns never races the
//! transport.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use smol_str::SmolStr;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, trace};

use crate::config::RequestConfig;
use crate::engine::{Engine, RequestInterceptor};
use crate::response::{Failure, Outcome, Response};
use crate::sync::{lock, read, write};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(u64);

impl CallId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The numeric value of the id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type SuccessHandler = Box<dyn FnOnce(&Response) + Send>;
type FailureHandler = Box<dyn FnOnce(&Failure) + Send>;

#[derive(Default)]
struct Subscribers {
    on_success: Vec<SuccessHandler>,
    on_failure: Vec<FailureHandler>,
}

struct CallState {
    id: CallId,
    config: RwLock<Arc<RequestConfig>>,
    url: OnceLock<SmolStr>,
    retries: AtomicU32,
    aborted: AtomicBool,
    uses_cached_leader: AtomicBool,
    attempt: Mutex<Option<AbortHandle>>,
    engine: Weak<Engine>,
    subscribers: Mutex<Subscribers>,
    outcome: watch::Sender<Option<Outcome>>,
}

/// Handle to one logical request.
///
/// Clones share the same state. A call delivers at most one outcome; it may
/// deliver none when it is dropped by the rate gate or aborted before its
/// response arrives.
#[derive(Clone)]
pub struct Call {
    state: Arc<CallState>,
}

impl Call {
    pub(crate) fn new(config: RequestConfig, engine: Weak<Engine>) -> Self {
        let retries = config.retry_limit;
        let (outcome, _) = watch::channel(None);
        Self {
            state: Arc::new(CallState {
                id: CallId::next(),
                config: RwLock::new(Arc::new(config)),
                url: OnceLock::new(),
                retries: AtomicU32::new(retries),
                aborted: AtomicBool::new(false),
                uses_cached_leader: AtomicBool::new(false),
                attempt: Mutex::new(None),
                engine,
                subscribers: Mutex::new(Subscribers::default()),
                outcome,
            }),
        }
    }

    /// Identity of the call.
    pub fn id(&self) -> CallId {
        self.state.id
    }

    /// Current configuration. Frozen once the call was handed to dispatch.
    pub fn config(&self) -> Arc<RequestConfig> {
        Arc::clone(&read(&self.state.config))
    }

    /// Resolved URL, available once the call was handed to dispatch.
    pub fn url(&self) -> Option<&str> {
        self.state.url.get().map(SmolStr::as_str)
    }

    /// Whether [`abort`](Self::abort) was called.
    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }

    /// Whether the call leads a cache entry other calls may be waiting on.
    pub fn uses_cached_leader(&self) -> bool {
        self.state.uses_cached_leader.load(Ordering::SeqCst)
    }

    /// Re-sends left before a failure is delivered.
    pub fn retries_left(&self) -> u32 {
        self.state.retries.load(Ordering::SeqCst)
    }

    /// Whether the call has settled.
    pub fn is_settled(&self) -> bool {
        self.state.outcome.borrow().is_some()
    }

    /// Registers a success subscriber.
    ///
    /// Subscribers run in registration order on the task that delivers the
    /// outcome. Registering after the call succeeded runs `f` right away.
    pub fn then<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Response) + Send + 'static,
    {
        let mut subscribers = lock(&self.state.subscribers);
        let settled = Option::clone(&self.state.outcome.borrow());
        match settled {
            None => subscribers.on_success.push(Box::new(f)),
            Some(Ok(response)) => {
                drop(subscribers);
                f(&response);
            }
            Some(Err(_)) => {}
        }
        self
    }

    /// Registers a failure subscriber. Same ordering rules as [`then`](Self::then).
    pub fn catch<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Failure) + Send + 'static,
    {
        let mut subscribers = lock(&self.state.subscribers);
        let settled = Option::clone(&self.state.outcome.borrow());
        match settled {
            None => subscribers.on_failure.push(Box::new(f)),
            Some(Err(failure)) => {
                drop(subscribers);
                f(&failure);
            }
            Some(Ok(_)) => {}
        }
        self
    }

    /// Waits for the outcome.
    ///
    /// Stays pending forever for a call that never settles (dropped by the
    /// rate gate, or aborted).
    pub async fn outcome(&self) -> Outcome {
        let mut receiver = self.state.outcome.subscribe();
        loop {
            let settled = Option::clone(&receiver.borrow_and_update());
            if let Some(outcome) = settled {
                return outcome;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Cancels the call. No subscriber will run afterwards.
    ///
    /// An in-flight attempt is cancelled at the transport unless the call
    /// leads a cache entry; a leader keeps running so its waiters still get
    /// the response.
    pub fn abort(&self) {
        if self.state.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(call = %self.id(), "call aborted");
        if self.uses_cached_leader() {
            return;
        }
        let attempt = lock(&self.state.attempt).take();
        if let Some(attempt) = attempt {
            attempt.abort();
            trace!(call = %self.id(), "in-flight attempt cancelled");
            if let Some(engine) = self.state.engine.upgrade() {
                engine.dispatcher.forget(self.id());
            }
        }
    }

    pub(crate) fn intercept(&self, interceptor: &RequestInterceptor) {
        let mut config = RequestConfig::clone(&self.config());
        interceptor(&mut config);
        *write(&self.state.config) = Arc::new(config);
    }

    pub(crate) fn resolve_url(&self) -> SmolStr {
        self.state
            .url
            .get_or_init(|| SmolStr::from(self.config().full_url()))
            .clone()
    }

    pub(crate) fn set_uses_cached_leader(&self, leader: bool) {
        self.state
            .uses_cached_leader
            .store(leader, Ordering::SeqCst);
    }

    pub(crate) fn add_retry(&self) {
        self.state.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn consume_retry(&self) {
        let _ = self
            .state
            .retries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            });
    }

    pub(crate) fn set_attempt(&self, attempt: AbortHandle) {
        *lock(&self.state.attempt) = Some(attempt);
    }

    /// Stores the outcome and runs the matching subscribers. Only the first
    /// delivery counts.
    pub(crate) fn resolve(&self, outcome: Outcome) {
        let subscribers = {
            let mut subscribers = lock(&self.state.subscribers);
            if self.is_settled() {
                debug!(call = %self.id(), "call already settled, ignoring delivery");
                return;
            }
            self.state.outcome.send_replace(Some(outcome.clone()));
            std::mem::take(&mut *subscribers)
        };
        match &outcome {
            Ok(response) => subscribers
                .on_success
                .into_iter()
                .for_each(|subscriber| subscriber(response)),
            Err(failure) => subscribers
                .on_failure
                .into_iter()
                .for_each(|subscriber| subscriber(failure)),
        }
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id())
            .field("url", &self.url())
            .field("aborted", &self.is_aborted())
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClientConfig, RequestOptions};
    use crate::response::{ResponseSource, classify};
    use callbox_core::RawResponse;
    use std::sync::atomic::AtomicUsize;

    fn call(options: RequestOptions) -> Call {
        Call::new(
            RequestConfig::resolve(&ClientConfig::default(), options),
            Weak::new(),
        )
    }

    fn outcome_for(call: &Call, status: u16) -> Outcome {
        let (response, error) = Response::decode(
            &RawResponse::new(status, "{}"),
            call.config(),
            call.id(),
            ResponseSource::Transport,
        );
        classify(response, error)
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(CallId::next(), CallId::next());
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let call = call(RequestOptions::new("/x"));
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            call.then(move |_| order.lock().unwrap().push(n));
        }
        call.resolve(outcome_for(&call, 200));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn late_subscriber_fires_immediately() {
        let call = call(RequestOptions::new("/x"));
        call.resolve(outcome_for(&call, 500));

        let failures = Arc::new(AtomicUsize::new(0));
        let successes = Arc::new(AtomicUsize::new(0));
        let (f, s) = (Arc::clone(&failures), Arc::clone(&successes));
        call.catch(move |failure| {
            assert_eq!(failure.status(), 500);
            f.fetch_add(1, Ordering::SeqCst);
        })
        .then(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(successes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn only_the_first_delivery_counts() {
        let call = call(RequestOptions::new("/x"));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        call.then(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        call.resolve(outcome_for(&call, 200));
        call.resolve(outcome_for(&call, 200));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retry_budget_starts_at_limit_and_saturates() {
        let call = call(RequestOptions::new("/x").retry_limit(1));
        assert_eq!(call.retries_left(), 1);
        call.consume_retry();
        call.consume_retry();
        assert_eq!(call.retries_left(), 0);
        call.add_retry();
        assert_eq!(call.retries_left(), 1);
    }

    #[test]
    fn resolved_url_is_computed_once() {
        let call = call(RequestOptions::new("/users").param("page", 1));
        assert_eq!(call.url(), None);
        assert_eq!(call.resolve_url(), "/users?page=1");
        assert_eq!(call.url(), Some("/users?page=1"));
    }

    #[tokio::test]
    async fn outcome_resolves_after_delivery() {
        let call = call(RequestOptions::new("/x"));
        let waiter = {
            let call = call.clone();
            tokio::spawn(async move { call.outcome().await })
        };
        tokio::task::yield_now().await;
        call.resolve(outcome_for(&call, 201));
        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.request, call.id());
    }
}
