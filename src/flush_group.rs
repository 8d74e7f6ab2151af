//! A barrier that batches many concurrent flush requests into one payload run.
//!
//! Writers call [`FlushGroup::run`] to be included in the next flush and block
//! until it happens. A dedicated flusher calls [`FlushGroup::flush`] at a
//! bounded cadence; the payload executes at most once per flush no matter how
//! many requesters are waiting. Any `run` that registered before a flush
//! started fencing is honored by that flush; later arrivals wait for the next
//! one.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct State {
    /// A request has been registered and not yet consumed by a flush.
    pending: bool,
    /// A flush is fencing or executing; new arrivals must wait it out.
    flushing: bool,
    /// Incremented after every completed flush.
    epoch: u64,
    /// Once set, all waiters return immediately and no new ones block.
    shutdown: bool,
}

pub struct FlushGroup {
    state: Mutex<State>,
    cv: Condvar,
}

impl FlushGroup {
    pub fn new() -> Self {
        FlushGroup {
            state: Mutex::new(State {
                pending: false,
                flushing: false,
                epoch: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Register for the next flush and block until it has completed.
    ///
    /// Returns `false` if the group was shut down before a flush ran on the
    /// caller's behalf.
    pub fn run(&self) -> bool {
        let mut state = self.state.lock();

        // Serialize against an in-progress flush: requests arriving while one
        // is fencing or executing belong to the next flush.
        self.cv.wait_while(&mut state, |s| s.flushing && !s.shutdown);
        if state.shutdown {
            return false;
        }

        state.pending = true;
        let registered_at = state.epoch;
        self.cv
            .wait_while(&mut state, |s| s.epoch == registered_at && !s.shutdown);
        state.epoch != registered_at
    }

    /// Execute one flush cycle, invoking `payload` if any request is pending.
    ///
    /// Must not be called concurrently with itself; the store runs it from a
    /// single flusher thread.
    pub fn flush(&self, payload: impl FnOnce()) {
        let mut state = self.state.lock();
        debug_assert!(!state.flushing);
        state.flushing = true;
        let run_payload = state.pending;
        state.pending = false;
        drop(state);

        // The payload runs without the lock so that new requesters only block
        // on the state mutex for the fence itself, not the whole operation.
        if run_payload {
            payload();
        }

        let mut state = self.state.lock();
        state.epoch += 1;
        state.flushing = false;
        self.cv.notify_all();
    }

    /// Wake every current and future waiter. Used when the owning record
    /// closes, so that a late `run` cannot block forever.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.cv.notify_all();
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        self.state.lock().pending
    }
}
