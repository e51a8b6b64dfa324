//! Fixed-delay re-sends of failed attempts.

use std::sync::Arc;

use tracing::{Instrument, debug, debug_span};

use crate::call::Call;
use crate::engine::{AttemptId, Engine};
use crate::metrics;

#[derive(Debug, Default)]
pub(crate) struct RetryController;

impl RetryController {
    pub(crate) fn new() -> Self {
        Self
    }

    /// Re-sends `call` after its `retry_buffer`, spending one unit of its
    /// budget. A cache entry still pointing at `stale` is moved to the new
    /// attempt so its waiters follow the retry.
    pub(crate) fn schedule(&self, engine: &Arc<Engine>, call: Call, stale: AttemptId) {
        let delay = call.config().retry_buffer;
        let engine = Arc::clone(engine);
        let span = debug_span!("callbox.retry", call = %call.id(), attempt = %stale);
        debug!(
            call = %call.id(),
            attempt = %stale,
            delay = ?delay,
            retries_left = call.retries_left(),
            "attempt failed, scheduling retry"
        );
        metrics::retry();

        tokio::spawn(
            async move {
                tokio::time::sleep(delay).await;
                if call.is_aborted() && !call.uses_cached_leader() {
                    debug!("call aborted while waiting to retry");
                    engine.dispatcher.forget(call.id());
                    return;
                }
                call.consume_retry();
                let fresh = engine.next_attempt();
                if call.uses_cached_leader() {
                    engine
                        .store
                        .replace_attempt(&call.resolve_url(), call.id(), stale, fresh);
                }
                engine.spawn_attempt(&call, fresh);
            }
            .instrument(span),
        );
    }
}
