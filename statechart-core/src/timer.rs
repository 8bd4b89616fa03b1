//! C7 — `after` timer scheduling (§4.4.6). A timer is a `tokio::time::sleep`
//! raced against a `CancelToken`; firing runs the caller's future, which for
//! every caller in this crate is "push a `TimerFired` message into this
//! instance's own mailbox" so the timer never touches interpreter state
//! directly.

use crate::cancel::CancelToken;
use std::future::Future;
use std::time::Duration;

pub struct TimerHandle {
    cancel: CancelToken,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Spawns a timer that fires `on_fire` after `delay_ms`, unless cancelled
/// first. `on_fire` is only invoked on a genuine expiry, never on cancel.
pub fn spawn<F, Fut>(delay_ms: u64, on_fire: F) -> TimerHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let cancel = CancelToken::new();
    let guard = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                on_fire().await;
            }
            _ = guard.cancelled() => {}
        }
    });
    TimerHandle { cancel }
}
