//! In-place stage restart requests.
//!
//! A supervisor thread installs a [`RestartRequest`] on a stage and
//! waits on the request's own condition variable; the stage's worker
//! services the request at the top of its next iteration. Lock order
//! is fixed: the ring mutex is always acquired before a request mutex.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tsflow_core::Report;

struct RequestState {
    completed: bool,
    success: bool,
}

/// One pending restart operation on a stage.
pub(crate) struct RestartRequest {
    /// New argument vector (ignored when `same_args`).
    pub(crate) args: Vec<String>,
    /// Restart with the current arguments, skipping re-analysis.
    pub(crate) same_args: bool,
    /// Sink receiving diagnostics of this restart.
    pub(crate) report: Arc<dyn Report>,
    state: Mutex<RequestState>,
    completed: Condvar,
}

impl RestartRequest {
    pub(crate) fn new(args: Vec<String>, same_args: bool, report: Arc<dyn Report>) -> Self {
        Self {
            args,
            same_args,
            report,
            state: Mutex::new(RequestState {
                completed: false,
                success: false,
            }),
            completed: Condvar::new(),
        }
    }

    /// Mark the request completed and wake the waiting supervisor.
    pub(crate) fn complete(&self, success: bool) {
        let mut state = self.state.lock();
        state.completed = true;
        state.success = success;
        self.completed.notify_one();
    }

    /// Block until the request completes; returns its success status.
    ///
    /// There is no timeout: the wait ends when the stage services the
    /// request or when a newer restart supersedes it.
    pub(crate) fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while !state.completed {
            self.completed.wait(&mut state);
        }
        state.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tsflow_core::NullReport;

    #[test]
    fn test_complete_releases_waiter() {
        let request = Arc::new(RestartRequest::new(vec![], true, Arc::new(NullReport)));

        let waiter = {
            let request = request.clone();
            thread::spawn(move || request.wait())
        };

        thread::sleep(Duration::from_millis(10));
        request.complete(true);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_wait_after_complete_returns_immediately() {
        let request = RestartRequest::new(vec![], false, Arc::new(NullReport));
        request.complete(false);
        assert!(!request.wait());
    }
}
