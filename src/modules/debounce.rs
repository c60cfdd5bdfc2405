//! Per-path debounce timers.
//!
//! Build tools and copies emit several write events for one logical update.
//! Each event pushes the path's deadline out by the debounce window; the
//! callback runs once the window passes without another event.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::trace;

/// Quiet period before a reload is triggered.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(200);

type Callback = Arc<dyn Fn(PathBuf) + Send + Sync>;

struct Inner {
    /// Pending deadline per path. A path is present iff a timer task is
    /// alive for it.
    deadlines: Mutex<HashMap<PathBuf, Instant>>,
    delay: Duration,
    callback: Callback,
    runtime: Handle,
}

#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

impl Debouncer {
    /// Timers are spawned on `runtime`.
    pub fn new(runtime: Handle, delay: Duration, callback: impl Fn(PathBuf) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadlines: Mutex::new(HashMap::new()),
                delay,
                callback: Arc::new(callback),
                runtime,
            }),
        }
    }

    /// Start or restart the timer for `path`.
    pub fn reset(&self, path: PathBuf) {
        let deadline = Instant::now() + self.inner.delay;
        let mut deadlines = self.inner.deadlines.lock();
        if let Some(existing) = deadlines.get_mut(&path) {
            *existing = deadline;
            trace!(path = %path.display(), "Debounce timer reset");
            return;
        }
        deadlines.insert(path.clone(), deadline);
        drop(deadlines);

        trace!(path = %path.display(), "Debounce timer started");
        let inner = self.inner.clone();
        self.inner.runtime.spawn(run_timer(inner, path, deadline));
    }

    /// Number of paths with a timer still pending.
    pub fn pending(&self) -> usize {
        self.inner.deadlines.lock().len()
    }
}

async fn run_timer(inner: Arc<Inner>, path: PathBuf, mut deadline: Instant) {
    loop {
        tokio::time::sleep_until(deadline).await;

        let mut deadlines = inner.deadlines.lock();
        let current = deadlines.get(&path).copied();
        match current {
            Some(later) if later > deadline => {
                deadline = later;
                continue;
            }
            _ => {
                deadlines.remove(&path);
            }
        }
        drop(deadlines);

        (inner.callback)(path);
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    fn counting(delay: Duration) -> (Debouncer, Arc<AtomicUsize>, Arc<Mutex<Vec<PathBuf>>>) {
        let count = Arc::new(AtomicUsize::new(0));
        let paths = Arc::new(Mutex::new(Vec::new()));
        let (c, p) = (count.clone(), paths.clone());
        let debouncer = Debouncer::new(Handle::current(), delay, move |path| {
            c.fetch_add(1, Ordering::SeqCst);
            p.lock().push(path);
        });
        (debouncer, count, paths)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_fires_once_after_window() {
        let (debouncer, count, _) = counting(DEBOUNCE_DELAY);

        for _ in 0..5 {
            debouncer.reset(PathBuf::from("/m/a.so"));
            sleep(Duration::from_millis(40)).await;
        }
        // 40ms since the last event.
        sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.pending(), 1);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paths_are_independent() {
        let (debouncer, count, paths) = counting(DEBOUNCE_DELAY);

        debouncer.reset(PathBuf::from("/m/a.so"));
        sleep(Duration::from_millis(150)).await;
        debouncer.reset(PathBuf::from("/m/b.so"));
        sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(paths.lock().as_slice(), &[PathBuf::from("/m/a.so")]);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_after_fire_starts_new_timer() {
        let (debouncer, count, _) = counting(DEBOUNCE_DELAY);

        debouncer.reset(PathBuf::from("/m/a.so"));
        sleep(Duration::from_millis(300)).await;
        debouncer.reset(PathBuf::from("/m/a.so"));
        sleep(Duration::from_millis(300)).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
