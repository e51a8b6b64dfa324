//! Single-flight cache entries keyed by resolved URL.
//!
//! Each entry has one leader: the call whose transport attempt feeds every
//! waiter buffered on the entry. A call routed to a fresh entry with data is
//! served from the stored snapshot. Otherwise it is buffered until the
//! leader's attempt completes. A call arriving after the entry expired
//! becomes the new leader ("rush"). Waiters that were buffered before the
//! rush then receive the new leader's response, because only the newest
//! attempt may fan out.
//!
//! Evicting an entry keeps its waiters attached to the leader's attempt, so
//! they are still answered when that attempt completes.

use std::sync::Arc;

use callbox_core::{Queue, RawResponse, Strategy, Ttl};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use smol_str::SmolStr;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::call::{Call, CallId};
use crate::completion::Completion;
use crate::engine::{AttemptId, Engine};
use crate::response::ResponseSource;

#[derive(Debug)]
struct CacheEntry {
    has_data: bool,
    expires_at: Option<Instant>,
    ttl: Ttl,
    attempt: AttemptId,
    snapshot: Option<Arc<RawResponse>>,
    leader: Call,
    auto_retry: bool,
    waiters: Queue<Call>,
}

/// What a call routed to an existing entry does.
#[derive(Debug)]
enum Routing {
    Lead,
    Replay(Arc<RawResponse>),
    Wait,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        match self.ttl {
            Ttl::Forever => false,
            Ttl::Window(_) => self.expires_at.is_none_or(|at| now > at),
        }
    }

    /// Decided from a single clock reading: an expired entry is always
    /// re-led, so nothing waits on a leader that already settled.
    fn routing(&self, now: Instant) -> Routing {
        if self.is_expired(now) {
            return Routing::Lead;
        }
        match self.snapshot.as_ref().filter(|_| self.has_data) {
            Some(snapshot) => Routing::Replay(Arc::clone(snapshot)),
            None => Routing::Wait,
        }
    }

    fn lead(&mut self, rule: &Strategy, leader: Call, attempt: AttemptId, now: Instant) {
        self.expires_at = expiry(rule.ttl, now);
        self.ttl = rule.ttl;
        self.auto_retry = rule.auto_retry;
        self.attempt = attempt;
        self.leader = leader;
    }
}

fn expiry(ttl: Ttl, now: Instant) -> Option<Instant> {
    match ttl {
        Ttl::Forever => None,
        Ttl::Window(window) => Some(now + window),
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheStore {
    entries: DashMap<SmolStr, CacheEntry>,
    // Waiters of evicted entries, keyed by the attempt they wait on.
    detached: DashMap<AttemptId, Vec<Call>>,
}

impl CacheStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Routes a cacheable call: lead, replay or wait.
    pub(crate) fn route(&self, engine: &Arc<Engine>, rule: &Strategy, call: Call) {
        let url = call.resolve_url();
        let now = Instant::now();

        let routing = match self.entries.get_mut(&url) {
            None => Routing::Lead,
            Some(mut entry) => {
                let routing = entry.routing(now);
                if !matches!(routing, Routing::Lead) && entry.auto_retry {
                    entry.leader.add_retry();
                }
                if let Routing::Wait = routing {
                    trace!(
                        call = %call.id(),
                        leader = %entry.leader.id(),
                        url = %url,
                        "waiting on cache leader"
                    );
                    entry.waiters.enqueue(call.clone());
                }
                routing
            }
        };

        match routing {
            Routing::Lead => self.lead(engine, rule, url, call, now),
            Routing::Replay(snapshot) => {
                debug!(call = %call.id(), url = %url, "served from cache");
                engine
                    .completions
                    .push(engine, Completion::new(call, snapshot, ResponseSource::Cache));
            }
            Routing::Wait => {}
        }
    }

    fn lead(
        &self,
        engine: &Arc<Engine>,
        rule: &Strategy,
        url: SmolStr,
        call: Call,
        now: Instant,
    ) {
        let attempt = engine.next_attempt();
        call.set_uses_cached_leader(true);
        match self.entries.entry(url.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().lead(rule, call.clone(), attempt, now);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    has_data: false,
                    expires_at: expiry(rule.ttl, now),
                    ttl: rule.ttl,
                    attempt,
                    snapshot: None,
                    leader: call.clone(),
                    auto_retry: rule.auto_retry,
                    waiters: Queue::new(),
                });
            }
        }
        debug!(call = %call.id(), %attempt, url = %url, "call leads cache entry");
        engine.spawn_attempt(&call, attempt);
    }

    /// Records the leader's final response and hands back the waiters to
    /// fan out to. A completion from a superseded attempt only releases the
    /// waiters of entries evicted while it was in flight.
    pub(crate) fn settle(
        &self,
        url: &str,
        attempt: AttemptId,
        raw: &Arc<RawResponse>,
    ) -> Vec<Call> {
        let mut waiters = self
            .detached
            .remove(&attempt)
            .map(|(_, waiters)| waiters)
            .unwrap_or_default();

        if let Some(mut entry) = self.entries.get_mut(url) {
            if entry.attempt == attempt {
                entry.has_data = true;
                entry.snapshot = Some(Arc::clone(raw));
                waiters.extend(entry.waiters.drain());
            } else {
                trace!(
                    %attempt,
                    current = %entry.attempt,
                    url,
                    "superseded leader attempt completed"
                );
            }
        }
        waiters
    }

    /// Points the entry, or the waiters detached from it, at a retry
    /// attempt if `leader` still leads it with the `stale` attempt.
    pub(crate) fn replace_attempt(
        &self,
        url: &str,
        leader: CallId,
        stale: AttemptId,
        fresh: AttemptId,
    ) -> bool {
        if let Some((_, waiters)) = self.detached.remove(&stale) {
            self.detached.insert(fresh, waiters);
        }
        match self.entries.get_mut(url) {
            Some(mut entry) if entry.attempt == stale && entry.leader.id() == leader => {
                entry.attempt = fresh;
                true
            }
            _ => false,
        }
    }

    /// Drops the entry for `url`. Its waiters stay attached to the leader's
    /// attempt.
    pub(crate) fn remove(&self, url: &str) -> bool {
        match self.entries.remove(url) {
            Some((_, entry)) => {
                self.detach(entry);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&self) {
        let urls: Vec<SmolStr> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        for url in urls {
            self.remove(&url);
        }
    }

    fn detach(&self, mut entry: CacheEntry) {
        if entry.waiters.is_empty() {
            return;
        }
        debug!(
            attempt = %entry.attempt,
            waiters = entry.waiters.len(),
            "evicted entry keeps waiting on its leader"
        );
        self.detached
            .entry(entry.attempt)
            .or_default()
            .extend(entry.waiters.drain());
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
