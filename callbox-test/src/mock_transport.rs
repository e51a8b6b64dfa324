use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use callbox_core::{RawResponse, Transport, TransportError, TransportRequest};
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Complete with this response.
    Response(RawResponse),
    /// Fail at the transport level with a connection error.
    ConnectionError(String),
}

impl Reply {
    /// A response with a text body.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Reply::Response(RawResponse::new(status, body.into()))
    }

    /// A response with a JSON body.
    pub fn json(status: u16, body: Value) -> Self {
        Reply::Response(RawResponse::new(status, body.to_string()))
    }

    /// A connection failure.
    pub fn connection_error(message: impl Into<String>) -> Self {
        Reply::ConnectionError(message.into())
    }
}

impl From<RawResponse> for Reply {
    fn from(response: RawResponse) -> Self {
        Reply::Response(response)
    }
}

/// A request the mock received.
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub request: TransportRequest,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct TransportCounters {
    pub send_count: AtomicUsize,
    pub completed_count: AtomicUsize,
}

impl TransportCounters {
    pub fn send_count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.send_count.store(0, Ordering::SeqCst);
        self.completed_count.store(0, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct Script {
    replies: Vec<Reply>,
    next: usize,
    delay: Option<Duration>,
}

impl Script {
    fn empty() -> Self {
        Self {
            replies: Vec::new(),
            next: 0,
            delay: None,
        }
    }

    fn next_reply(&mut self) -> Option<Reply> {
        let reply = self
            .replies
            .get(self.next)
            .or_else(|| self.replies.last())
            .cloned();
        self.next = (self.next + 1).min(self.replies.len());
        reply
    }
}

/// In-memory transport with per-URL scripted replies.
///
/// A sequence of replies is played in order, the last one repeating. URLs
/// without a script get `404` with an empty body. Sends are counted when they
/// start; completions when the (possibly delayed) reply is returned, so an
/// attempt cancelled mid-flight is sent but never completed.
#[derive(Clone, Debug)]
pub struct MockTransport {
    scripts: Arc<DashMap<String, Script>>,
    default_delay: Duration,
    sent: Arc<Mutex<Vec<SentRequest>>>,
    per_url: Arc<DashMap<String, usize>>,
    pub counters: Arc<TransportCounters>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(DashMap::new()),
            default_delay: Duration::ZERO,
            sent: Arc::new(Mutex::new(Vec::new())),
            per_url: Arc::new(DashMap::new()),
            counters: Arc::new(TransportCounters::default()),
        }
    }

    /// Delays every reply that has no per-URL delay.
    pub fn with_delay(self, delay: Duration) -> Self {
        Self {
            default_delay: delay,
            ..self
        }
    }

    /// Always answers `url` with `reply`.
    pub fn reply(&self, url: impl Into<String>, reply: impl Into<Reply>) -> &Self {
        self.reply_sequence(url, [reply.into()])
    }

    /// Answers `url` with `replies` in order; the last one repeats.
    pub fn reply_sequence(
        &self,
        url: impl Into<String>,
        replies: impl IntoIterator<Item = Reply>,
    ) -> &Self {
        let mut script = self.scripts.entry(url.into()).or_insert_with(Script::empty);
        script.replies = replies.into_iter().collect();
        script.next = 0;
        self
    }

    /// Delays replies for `url`.
    pub fn delay(&self, url: impl Into<String>, delay: Duration) -> &Self {
        self.scripts
            .entry(url.into())
            .or_insert_with(Script::empty)
            .delay = Some(delay);
        self
    }

    pub fn send_count(&self) -> usize {
        self.counters.send_count()
    }

    pub fn completed_count(&self) -> usize {
        self.counters.completed_count()
    }

    /// Sends that targeted `url`.
    pub fn send_count_for(&self, url: &str) -> usize {
        self.per_url.get(url).map(|count| *count).unwrap_or(0)
    }

    /// Every request received so far, in arrival order.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Arrival instants of the requests for `url`.
    pub fn sent_at(&self, url: &str) -> Vec<Instant> {
        self.sent()
            .into_iter()
            .filter(|sent| sent.request.url == url)
            .map(|sent| sent.at)
            .collect()
    }

    /// URLs in arrival order.
    pub fn sent_urls(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|sent| sent.request.url)
            .collect()
    }

    pub fn reset(&self) {
        self.counters.reset();
        self.per_url.clear();
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn next_reply(&self, url: &str) -> (Reply, Duration) {
        match self.scripts.get_mut(url) {
            Some(mut script) => {
                let delay = script.delay.unwrap_or(self.default_delay);
                let reply = script
                    .next_reply()
                    .unwrap_or_else(|| Reply::status(404, ""));
                (reply, delay)
            }
            None => (Reply::status(404, ""), self.default_delay),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        self.counters.send_count.fetch_add(1, Ordering::SeqCst);
        *self.per_url.entry(request.url.clone()).or_insert(0) += 1;
        let (reply, delay) = self.next_reply(&request.url);
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(SentRequest {
                request,
                at: Instant::now(),
            });

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.counters.completed_count.fetch_add(1, Ordering::SeqCst);

        match reply {
            Reply::Response(response) => Ok(response),
            Reply::ConnectionError(message) => Err(TransportError::Connection(message.into())),
        }
    }
}
