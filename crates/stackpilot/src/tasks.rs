//! Fire-and-forget background work.
//!
//! Work spawned here is detached from the caller: it keeps running if the
//! triggering request is dropped, is bounded by its own timeout, and a panic
//! inside it is caught and logged instead of propagating.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinHandle;

/// Default ceiling for detached work such as audit writes.
pub const DEFAULT_DETACHED_TIMEOUT: Duration = Duration::from_secs(30);

/// How a detached task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachedOutcome {
    Completed,
    TimedOut,
    Panicked,
}

/// Spawns `fut` on the current runtime with a timeout and panic containment.
///
/// The returned handle may be ignored; it exists so tests can await completion.
pub fn spawn_detached<F>(name: &'static str, timeout: Duration, fut: F) -> JoinHandle<DetachedOutcome>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, AssertUnwindSafe(fut).catch_unwind()).await {
            Ok(Ok(())) => DetachedOutcome::Completed,
            Ok(Err(panic)) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                log::error!("Background task '{}' panicked: {}", name, message);
                DetachedOutcome::Panicked
            }
            Err(_) => {
                log::warn!(
                    "Background task '{}' timed out after {}s",
                    name,
                    timeout.as_secs()
                );
                DetachedOutcome::TimedOut
            }
        }
    })
}
