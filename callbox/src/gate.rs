//! Debounce and throttle admission, keyed by the call's `url` field.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use smol_str::SmolStr;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span};

use crate::call::Call;
use crate::config::Mode;
use crate::metrics;

/// Decides whether and when a call proceeds to dispatch.
///
/// Calls the gate drops are never dispatched and never deliver an outcome.
#[derive(Debug, Default)]
pub(crate) struct RateController {
    debounce: Arc<DashMap<SmolStr, JoinHandle<()>>>,
    throttle: Arc<DashSet<SmolStr>>,
}

impl RateController {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Runs `release` now, later, or never, depending on the call's mode.
    pub(crate) fn admit<F>(&self, call: &Call, release: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let config = call.config();
        let key = SmolStr::from(config.url.as_str());
        match config.mode {
            Mode::None => release(),
            Mode::Debounce => self.debounce(call, key, config.debounce_time, release),
            Mode::Throttle => self.throttle(call, key, config.throttle_time, release),
        }
    }

    fn debounce<F>(&self, call: &Call, key: SmolStr, window: std::time::Duration, release: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some((_, pending)) = self.debounce.remove(&key) {
            pending.abort();
            metrics::gate_drop(Mode::Debounce);
            debug!(url = %key, "debounced call superseded");
        }

        let timers = Arc::clone(&self.debounce);
        let timer_key = key.clone();
        let span = debug_span!("callbox.debounce", call = %call.id(), url = %key);
        let timer = tokio::spawn(
            async move {
                tokio::time::sleep(window).await;
                if let Some(id) = tokio::task::try_id() {
                    timers.remove_if(&timer_key, |_, timer| timer.id() == id);
                }
                release();
            }
            .instrument(span),
        );
        self.debounce.insert(key, timer);
    }

    fn throttle<F>(&self, call: &Call, key: SmolStr, window: std::time::Duration, release: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.throttle.insert(key.clone()) {
            metrics::gate_drop(Mode::Throttle);
            debug!(call = %call.id(), url = %key, "throttled call dropped");
            return;
        }

        let bans = Arc::clone(&self.throttle);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            bans.remove(&key);
        });
        release();
    }

    #[cfg(test)]
    fn pending_debounce(&self) -> usize {
        self.debounce.len()
    }
}
