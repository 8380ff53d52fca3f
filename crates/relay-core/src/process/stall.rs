use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Fires a callback once if [`touch`](Self::touch) is not called for
/// `threshold`.
///
/// The timer lives in its own task. Every touch restarts the window;
/// after firing the detector is spent and further touches do nothing.
/// Dropping the detector cancels it.
#[derive(Debug)]
pub struct StallDetector {
    threshold: Duration,
    touched: Arc<Notify>,
    cancel: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl StallDetector {
    /// Arm a detector. Must be called from within a tokio runtime.
    pub fn spawn<F>(threshold: Duration, on_stall: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let touched = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));

        let task_touched = Arc::clone(&touched);
        let task_cancel = cancel.clone();
        let task_fired = Arc::clone(&fired);
        let mut on_stall = Some(on_stall);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => return,
                    _ = task_touched.notified() => continue,
                    _ = tokio::time::sleep(threshold) => {
                        task_fired.store(true, Ordering::SeqCst);
                        if let Some(f) = on_stall.take() {
                            f();
                        }
                        return;
                    }
                }
            }
        });

        Self {
            threshold,
            touched,
            cancel,
            fired,
        }
    }

    /// Record activity, restarting the window.
    pub fn touch(&self) {
        if !self.has_fired() && !self.cancel.is_cancelled() {
            self.touched.notify_one();
        }
    }

    /// Disarm without firing. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl Drop for StallDetector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
