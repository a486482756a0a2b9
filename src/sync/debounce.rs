use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type Action = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs an async action once a burst of triggers has been quiet for `delay`.
///
/// Only the wait is cancellable. Once the delay elapses the action runs on
/// its own task, so neither a later `trigger` nor `cancel` interrupts it.
pub struct DebouncedAction {
    delay: Duration,
    action: Action,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl DebouncedAction {
    pub fn new<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            delay,
            action: Arc::new(move || Box::pin(action())),
            pending: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Restart the wait; the previous pending invocation is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self) {
        let action = Arc::clone(&self.action);
        let delay = self.delay;

        let mut pending = self.pending.lock();
        if let Some(handle) = pending.take() {
            handle.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(action());
        }));
    }

    /// Drop the pending invocation, if any.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for DebouncedAction {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(delay_ms: u64) -> (DebouncedAction, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let action = DebouncedAction::new(Duration::from_millis(delay_ms), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (action, calls)
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_call() {
        let (action, calls) = counting(500);
        for _ in 0..5 {
            action.trigger();
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert!(action.is_pending());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_millis(700)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!action.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_drops_pending_call() {
        let (action, calls) = counting(500);
        action.trigger();
        action.cancel();
        assert!(!action.is_pending());

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
