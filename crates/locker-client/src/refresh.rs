//! Single-flight coordination for access-token refresh.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Refreshed,
    Failed,
    /// The leader was dropped before finishing; a waiter should take over.
    Abandoned,
}

pub(crate) enum RefreshFailure {
    /// This caller ran the refresh and it failed. It owns the session teardown.
    Leader(ApiError),
    /// This caller waited on someone else's refresh, which failed.
    Follower,
}

/// `None` means no refresh is in flight. `Some` holds the queued waiters in arrival order.
#[derive(Default)]
pub(crate) struct RefreshGate {
    waiters: Mutex<Option<Vec<oneshot::Sender<Outcome>>>>,
}

impl RefreshGate {
    /// Runs `refresh` unless another caller already is, in which case waits for its outcome.
    pub(crate) async fn run<F, Fut>(&self, refresh: F) -> Result<(), RefreshFailure>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), ApiError>>,
    {
        loop {
            let waiter = {
                let mut waiters = self.waiters.lock();
                match waiters.as_mut() {
                    Some(queue) => {
                        let (tx, rx) = oneshot::channel();
                        queue.push(tx);
                        debug!(queued = queue.len(), "Refresh in flight, waiting");
                        Some(rx)
                    }
                    None => {
                        *waiters = Some(Vec::new());
                        None
                    }
                }
            };

            let Some(rx) = waiter else {
                let mut lead = Lead { gate: self, finished: false };
                let result = refresh().await;
                lead.finish(if result.is_ok() { Outcome::Refreshed } else { Outcome::Failed });
                return result.map_err(RefreshFailure::Leader);
            };

            match rx.await {
                Ok(Outcome::Refreshed) => return Ok(()),
                Ok(Outcome::Failed) => return Err(RefreshFailure::Follower),
                Ok(Outcome::Abandoned) | Err(_) => continue,
            }
        }
    }

    fn release(&self, outcome: Outcome) {
        let waiters = self.waiters.lock().take().unwrap_or_default();
        if !waiters.is_empty() {
            debug!(count = waiters.len(), ?outcome, "Releasing queued requests");
        }
        for waiter in waiters {
            let _ = waiter.send(outcome);
        }
    }
}

/// Marks the refresh as in flight for as long as it lives.
struct Lead<'a> {
    gate: &'a RefreshGate,
    finished: bool,
}

impl Lead<'_> {
    fn finish(&mut self, outcome: Outcome) {
        self.finished = true;
        self.gate.release(outcome);
    }
}

impl Drop for Lead<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.gate.release(Outcome::Abandoned);
        }
    }
}
