//! Background refresh task.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shortest accepted period; `tokio::time::interval` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Owns at most one periodic task; starting again replaces it, and dropping
/// the poller aborts it.
#[derive(Debug, Default)]
pub struct Poller {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    /// Create an idle poller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `tick` immediately and then every `every` until stopped.
    ///
    /// `tick` returns `false` to end the loop, e.g. when its owner is gone.
    /// A zero period is raised to one millisecond.
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, every: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send,
    {
        if every < MIN_PERIOD {
            warn!(?every, "poll period too short, using {MIN_PERIOD:?}");
        }
        let every = every.max(MIN_PERIOD);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !tick().await {
                    debug!("poller owner dropped, stopping");
                    break;
                }
            }
        });

        if let Some(previous) = self.slot().replace(handle) {
            previous.abort();
        }
    }

    /// Abort the running task, if any.
    pub fn stop(&self) {
        if let Some(handle) = self.slot().take() {
            handle.abort();
        }
    }

    /// Whether a task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(|h| !h.is_finished())
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_on_start_and_every_interval() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new();
        let counter = Arc::clone(&ticks);
        poller.start(Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        poller.stop();
        assert!(!poller.is_running());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_keeps_ticking() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let poller = Poller::new();
        let counter = Arc::clone(&ticks);
        poller.start(Duration::ZERO, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                true
            }
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(poller.is_running());
        assert!(ticks.load(Ordering::SeqCst) >= 2);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_tick_returns_false() {
        let poller = Poller::new();
        poller.start(Duration::from_secs(1), || async { false });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!poller.is_running());
    }
}
