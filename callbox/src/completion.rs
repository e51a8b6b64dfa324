//! Completion pipeline: delivers finished attempts to calls one at a time,
//! in the order they finished.

use std::sync::Arc;

use callbox_core::RawResponse;
use tracing::{debug, trace};

use crate::call::Call;
use crate::engine::{AttemptId, Engine};
use crate::metrics;
use crate::pipeline::Serial;
use crate::response::{Response, ResponseSource, classify};

/// A raw response on its way to one call.
#[derive(Debug)]
pub(crate) struct Completion {
    call: Call,
    raw: Arc<RawResponse>,
    source: ResponseSource,
}

impl Completion {
    pub(crate) fn new(call: Call, raw: Arc<RawResponse>, source: ResponseSource) -> Self {
        Self { call, raw, source }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Completions {
    pipeline: Serial<Completion>,
}

impl Completions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, engine: &Arc<Engine>, completion: Completion) {
        self.pipeline
            .push(completion, |completion| deliver(engine, completion));
    }

    /// Final response of a transport attempt: the call itself first, then
    /// the waiters of the cache entry it leads.
    pub(crate) fn finish_attempt(
        &self,
        engine: &Arc<Engine>,
        call: Call,
        attempt: AttemptId,
        raw: RawResponse,
    ) {
        let raw = Arc::new(raw);
        let leader = call.uses_cached_leader();
        let url = call.resolve_url();

        if call.is_aborted() {
            trace!(call = %call.id(), "aborted call skipped at completion");
            engine.dispatcher.forget(call.id());
        } else {
            self.push(
                engine,
                Completion::new(call, Arc::clone(&raw), ResponseSource::Transport),
            );
        }

        if leader {
            let waiters = engine.store.settle(&url, attempt, &raw);
            if !waiters.is_empty() {
                debug!(
                    %attempt,
                    url = %url,
                    waiters = waiters.len(),
                    "fanning out leader response"
                );
            }
            for waiter in waiters {
                if waiter.is_aborted() {
                    engine.dispatcher.forget(waiter.id());
                    continue;
                }
                self.push(
                    engine,
                    Completion::new(waiter, Arc::clone(&raw), ResponseSource::Leader),
                );
            }
        }
    }
}

fn deliver(engine: &Engine, completion: Completion) {
    let Completion { call, raw, source } = completion;
    if call.is_aborted() {
        engine.dispatcher.forget(call.id());
        return;
    }

    let (mut response, decode_error) = Response::decode(&raw, call.config(), call.id(), source);
    if let Some(interceptor) = engine.response_interceptor() {
        interceptor(&mut response);
    }
    engine.dispatcher.forget(call.id());

    let outcome = classify(response, decode_error);
    metrics::delivery(source, outcome.is_ok());
    debug!(
        call = %call.id(),
        source = source.as_str(),
        status = raw.status,
        success = outcome.is_ok(),
        "delivering outcome"
    );
    call.resolve(outcome);
}
