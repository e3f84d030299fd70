//! Background sweep tasks shared by the cache and the registry.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Owns a periodic sweep task and aborts it when dropped.
///
/// The task holds only a `Weak` reference to the swept state, so it also
/// exits on its own once every strong handle is gone.
pub(crate) struct SweepGuard {
    handle: JoinHandle<()>,
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a task that invokes `pass` on `target` every `period`.
///
/// Must be called from within a tokio runtime.
pub(crate) fn spawn<T, F>(period: Duration, target: &Arc<T>, pass: F) -> SweepGuard
where
    T: Send + Sync + 'static,
    F: Fn(&T) + Send + 'static,
{
    let weak: Weak<T> = Arc::downgrade(target);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick of a tokio interval completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(target) = weak.upgrade() else { break };
            pass(&target);
        }
    });
    SweepGuard { handle }
}
