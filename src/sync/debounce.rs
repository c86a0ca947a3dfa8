use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// An owned, cancellable "run this after a quiet period" slot.
///
/// Scheduling replaces whatever was scheduled before. Only the waiting phase
/// is cancellable: once the quiet period elapses the commit is detached, so a
/// request that has already been issued always runs to completion. Dropping
/// the debouncer cancels a commit that has not fired yet.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    timer: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, timer: None }
    }

    pub fn quiet(&self) -> Duration {
        self.quiet
    }

    pub fn schedule<F>(&mut self, commit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule_after(self.quiet, commit);
    }

    pub fn schedule_after<F>(&mut self, delay: Duration, commit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(commit);
        }));
    }

    /// Returns true when a commit was still waiting to fire.
    pub fn cancel(&mut self) -> bool {
        let Some(timer) = self.timer.take() else {
            return false;
        };
        let was_waiting = !timer.is_finished();
        timer.abort();
        was_waiting
    }

    pub fn is_pending(&self) -> bool {
        self.timer
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = Arc::clone(counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_quiet_period() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        debouncer.schedule(counting(&fired));
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_resets_the_window() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut debouncer = Debouncer::new(Duration::from_millis(500));

        for _ in 0..5 {
            debouncer.schedule(counting(&fired));
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_drop_prevent_firing() {
        let fired = Arc::new(AtomicUsize::new(0));

        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.schedule(counting(&fired));
        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());

        let mut dropped = Debouncer::new(Duration::from_millis(100));
        dropped.schedule(counting(&fired));
        drop(dropped);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
