use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// A one-shot, cancellable deadline.
///
/// [`expired`](Self::expired) is cancel-safe and can be polled from a
/// `select!` loop repeatedly. A cancelled timer drops its timer entry and
/// never completes.
#[derive(Debug)]
pub struct TimeoutTimer {
    duration: Duration,
    deadline: Instant,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TimeoutTimer {
    pub fn new(duration: Duration) -> Self {
        let deadline = Instant::now() + duration;
        Self {
            duration,
            deadline,
            sleep: Some(Box::pin(tokio::time::sleep_until(deadline))),
        }
    }

    /// Completes when the deadline passes; pends forever once cancelled.
    pub async fn expired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().await,
            None => pending().await,
        }
    }

    pub fn cancel(&mut self) {
        self.sleep = None;
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time left before the deadline, `None` once cancelled.
    pub fn remaining(&self) -> Option<Duration> {
        self.sleep
            .as_ref()
            .map(|_| self.deadline.saturating_duration_since(Instant::now()))
    }
}
