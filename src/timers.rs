//! Virtual-clock timers
//!
//! `setTimeout`/`setInterval` callbacks are queued while the script runs and
//! fired afterwards in due-time order. Time is simulated: a callback due in
//! 500ms fires immediately after everything due earlier, without waiting.

use std::collections::BTreeSet;

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, AST, INT};

use crate::engine::register_denied_fn;
use crate::environment::ConsoleSink;
use crate::shared::{new_shared, with_shared, Shared};
use crate::types::ConsoleLevel;

/// Upper bound on firings of a single interval
pub const MAX_INTERVAL_RUNS: u32 = 1_000;

struct Timer {
    id: INT,
    due: u64,
    seq: u64,
    callback: FnPtr,
    interval: Option<u64>,
    runs: u32,
}

#[derive(Default)]
struct QueueState {
    now: u64,
    next_id: INT,
    next_seq: u64,
    pending: Vec<Timer>,
    cancelled: BTreeSet<INT>,
}

/// Pending timers for one execution
#[derive(Clone, Default)]
pub struct TimerQueue {
    state: Shared<QueueState>,
}

fn delay_of(delay: INT) -> u64 {
    u64::try_from(delay).unwrap_or(0)
}

impl TimerQueue {
    pub fn new() -> Self {
        Self {
            state: new_shared(QueueState::default()),
        }
    }

    /// Queue `callback`; returns the timer id
    pub fn schedule(&self, callback: FnPtr, delay: INT, repeat: bool) -> INT {
        let delay = delay_of(delay);
        with_shared(&self.state, |state| {
            state.next_id += 1;
            state.next_seq += 1;
            let timer = Timer {
                id: state.next_id,
                due: state.now + delay,
                seq: state.next_seq,
                callback,
                interval: repeat.then_some(delay),
                runs: 0,
            };
            state.pending.push(timer);
            state.next_id
        })
    }

    pub fn cancel(&self, id: INT) {
        with_shared(&self.state, |state| {
            state.pending.retain(|t| t.id != id);
            state.cancelled.insert(id);
        });
    }

    pub fn pending(&self) -> usize {
        with_shared(&self.state, |state| state.pending.len())
    }

    /// Remove the earliest timer and advance the clock to it
    fn pop_next(&self) -> Option<Timer> {
        with_shared(&self.state, |state| {
            let index = state
                .pending
                .iter()
                .enumerate()
                .min_by_key(|(_, t)| (t.due, t.seq))
                .map(|(i, _)| i)?;
            let timer = state.pending.swap_remove(index);
            state.now = state.now.max(timer.due);
            Some(timer)
        })
    }

    fn rearm(&self, mut timer: Timer, every: u64) {
        with_shared(&self.state, |state| {
            if state.cancelled.contains(&timer.id) {
                return;
            }
            state.next_seq += 1;
            timer.due = state.now + every;
            timer.seq = state.next_seq;
            state.pending.push(timer);
        });
    }

    /// Fire every queued callback in (due, insertion) order
    ///
    /// A failing callback is reported on the console and draining continues.
    /// Termination (timeout or instruction limit) stops the drain and is returned.
    pub fn drain(
        &self,
        engine: &Engine,
        ast: &AST,
        console: Option<&ConsoleSink>,
    ) -> Result<(), Box<EvalAltResult>> {
        while let Some(mut timer) = self.pop_next() {
            timer.runs += 1;
            if let Err(err) = timer.callback.call::<Dynamic>(engine, ast, ()) {
                if matches!(*err, EvalAltResult::ErrorTerminated(..)) {
                    return Err(err);
                }
                let message = format!("Timer callback failed: {err}");
                match console {
                    Some(sink) => sink.emit(ConsoleLevel::Error, message),
                    None => tracing::warn!(timer = timer.id, "{message}"),
                }
            }

            if let Some(every) = timer.interval {
                if timer.runs < MAX_INTERVAL_RUNS {
                    self.rearm(timer, every);
                } else {
                    tracing::debug!(timer = timer.id, "interval reached its run limit");
                }
            }
        }
        Ok(())
    }
}

/// Register the four timer functions
///
/// Each one is backed by `queue` when `enabled` lets it through; the rest raise
/// an access violation when called.
pub(crate) fn register(engine: &mut Engine, queue: &TimerQueue, enabled: &dyn Fn(&str) -> bool) {
    if enabled("setTimeout") {
        let q = queue.clone();
        engine.register_fn("setTimeout", move |callback: FnPtr| q.schedule(callback, 0, false));
        let q = queue.clone();
        engine.register_fn("setTimeout", move |callback: FnPtr, delay: INT| {
            q.schedule(callback, delay, false)
        });
    } else {
        register_denied_fn(engine, "setTimeout");
    }

    if enabled("setInterval") {
        let q = queue.clone();
        engine.register_fn("setInterval", move |callback: FnPtr, delay: INT| {
            q.schedule(callback, delay, true)
        });
    } else {
        register_denied_fn(engine, "setInterval");
    }

    for name in ["clearTimeout", "clearInterval"] {
        if enabled(name) {
            let q = queue.clone();
            engine.register_fn(name, move |id: INT| q.cancel(id));
            engine.register_fn(name, |_: ()| {});
        } else {
            register_denied_fn(engine, name);
        }
    }
}
