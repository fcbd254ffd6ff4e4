//! Cancellable change subscriptions.

use super::model::{ConfigEntry, ServiceRegistration};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Invoked with the full current membership of a service on every change.
///
/// Delivery is at-least-once: the same snapshot may arrive twice, so callbacks must
/// treat each call as an idempotent snapshot, never as a delta.
pub type ServiceCallback = Arc<dyn Fn(Vec<ServiceRegistration>) + Send + Sync>;

/// Invoked with the current value of a KV key (`None` once deleted) on every change.
pub type ConfigCallback = Arc<dyn Fn(Option<ConfigEntry>) + Send + Sync>;

/// Handle to a running watch.
///
/// Cancelling stops callback delivery immediately. Dropping the handle cancels too.
#[derive(Debug)]
pub struct WatchHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Spawns the watch loop on the current tokio runtime.
    ///
    /// The loop receives the handle's token and must stop as soon as it is cancelled.
    pub fn spawn<F, Fut>(watch_loop: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task = tokio::spawn(watch_loop(token.clone()));
        Self {
            token,
            task: Some(task),
        }
    }

    /// Stops delivery. No callback starts after this returns.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the watch loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Cancels and waits for the watch loop to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Invokes `callback` unless `token` has been cancelled. Returns false when cancelled.
pub fn notify_unless_cancelled<T>(
    token: &CancellationToken,
    callback: &Arc<dyn Fn(T) + Send + Sync>,
    value: T,
) -> bool {
    if token.is_cancelled() {
        return false;
    }
    callback(value);
    true
}
