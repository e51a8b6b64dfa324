//! Request pipeline: hands admitted calls to the transport or the cache in
//! submission order, and tracks in-flight calls.

use std::sync::Arc;

use callbox_core::CachePolicy;
use dashmap::DashMap;
use tracing::{debug, trace};

use crate::call::{Call, CallId};
use crate::engine::Engine;
use crate::pipeline::Serial;

#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    pipeline: Serial<Call>,
    in_flight: DashMap<CallId, Call>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enqueue(&self, engine: &Arc<Engine>, call: Call) {
        self.pipeline.push(call, |call| self.hand_off(engine, call));
    }

    fn hand_off(&self, engine: &Arc<Engine>, call: Call) {
        if let Some(interceptor) = engine.request_interceptor() {
            call.intercept(&interceptor);
        }
        self.in_flight.insert(call.id(), call.clone());

        if call.is_aborted() {
            debug!(call = %call.id(), "aborted call skipped at hand-off");
            self.forget(call.id());
            return;
        }

        let url = call.resolve_url();
        let method = call.config().method;
        match engine.rule_for(method, &url) {
            CachePolicy::Cacheable(rule) => {
                trace!(call = %call.id(), url = %url, "cacheable call");
                engine.store.route(engine, &rule, call);
            }
            CachePolicy::NonCacheable(()) => {
                engine.send(&call);
            }
        }
    }

    /// Drops a call from the in-flight pool.
    pub(crate) fn forget(&self, id: CallId) {
        self.in_flight.remove(&id);
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
