//! Backoff for failed reconciles.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use kube::runtime::controller::Action;
use tracing::{debug, warn};

const BASE_DELAY_SECS: u64 = 5;
const MAX_DELAY_SECS: u64 = 300;

/// Consecutive failures per owner UID.
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, uid: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|p| p.into_inner());
        let count = attempts.entry(uid.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn reset(&self, uid: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(uid);
    }

    pub fn get(&self, uid: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(uid)
            .copied()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    /// Will not recover until the owner changes.
    Permanent,
}

pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let secs = BASE_DELAY_SECS.saturating_mul(2u64.pow(exp));
    Duration::from_secs(secs.min(MAX_DELAY_SECS))
}

/// 5s, 10s, 20s ... capped at five minutes; permanent errors wait for a
/// change to the owner.
pub fn compute_backoff(attempt: u32, kind: ErrorKind) -> Action {
    match kind {
        ErrorKind::Transient => {
            let delay = backoff_delay(attempt);
            debug!(attempt, delay_secs = delay.as_secs(), "scheduling retry");
            Action::requeue(delay)
        }
        ErrorKind::Permanent => {
            warn!("permanent error, waiting for resource change");
            Action::await_change()
        }
    }
}
