//! Serial drain shared by the request dispatcher and the completion pipeline.
//!
//! Items are handled one at a time in push order. Whoever pushes into an
//! idle pipeline becomes the drainer and keeps handling items until the
//! queue is empty; pushes that arrive meanwhile (from other tasks, or
//! re-entrantly from inside a handler) only enqueue. No lock is held while a
//! handler runs.

use std::sync::Mutex;

use callbox_core::Queue;

use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Busy,
}

#[derive(Debug)]
struct SerialState<T> {
    queue: Queue<T>,
    stage: Stage,
}

#[derive(Debug)]
pub(crate) struct Serial<T> {
    state: Mutex<SerialState<T>>,
}

impl<T> Serial<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SerialState {
                queue: Queue::new(),
                stage: Stage::Idle,
            }),
        }
    }

    /// Enqueues `item` and, if the pipeline was idle, drains it with `handle`.
    pub(crate) fn push(&self, item: T, mut handle: impl FnMut(T)) {
        {
            let mut state = lock(&self.state);
            state.queue.enqueue(item);
            if state.stage == Stage::Busy {
                return;
            }
            state.stage = Stage::Busy;
        }

        let _unstick = Unstick(&self.state);
        loop {
            let next = {
                let mut state = lock(&self.state);
                match state.queue.dequeue() {
                    Some(item) => item,
                    None => {
                        state.stage = Stage::Idle;
                        return;
                    }
                }
            };
            handle(next);
        }
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        lock(&self.state).stage == Stage::Idle
    }
}

impl<T> Default for Serial<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the pipeline to `Idle` if a handler panics, so the next push
/// drains whatever is left.
struct Unstick<'a, T>(&'a Mutex<SerialState<T>>);

impl<T> Drop for Unstick<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).stage = Stage::Idle;
        }
    }
}
