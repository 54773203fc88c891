//! Per-item time budget shared between a worker and the orchestrator.
//!
//! Every outbound request caps its timeout with [`Deadline::cap`], so once the
//! budget is spent (or the orchestrator cancels the item) no new request is
//! started and in-flight requests end at the deadline instead of outliving it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const SLEEP_SLICE: Duration = Duration::from_millis(50);
/// Budgets too large for `Instant` arithmetic expire this far out instead.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Instant,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(budget)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self {
            expires_at,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn is_expired(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.expires_at
    }

    pub fn remaining(&self) -> Duration {
        if self.is_cancelled() {
            return Duration::ZERO;
        }
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Shortens `timeout` to the remaining budget. `None` once nothing is left.
    pub fn cap(&self, timeout: Duration) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            None
        } else {
            Some(timeout.min(remaining))
        }
    }

    /// Sleeps up to `duration`, waking early on cancellation or expiry.
    /// Returns `false` if the budget ran out before the full sleep elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let wake_at = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if wake_at.is_some_and(|wake_at| now >= wake_at) {
                return true;
            }
            if now >= self.expires_at {
                return false;
            }
            let slice = wake_at
                .map_or(self.expires_at, |wake_at| wake_at.min(self.expires_at))
                .saturating_duration_since(now)
                .min(SLEEP_SLICE);
            std::thread::sleep(slice);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Deadline;

    #[test]
    fn test_cap_never_exceeds_remaining_budget() {
        let deadline = Deadline::after(Duration::from_millis(200));
        let capped = deadline.cap(Duration::from_secs(10)).expect("budget left");
        assert!(capped <= Duration::from_millis(200));
        assert_eq!(
            deadline.cap(Duration::from_millis(1)),
            Some(Duration::from_millis(1))
        );
    }

    #[test]
    fn test_cancel_exhausts_budget_for_all_clones() {
        let deadline = Deadline::after(Duration::from_secs(60));
        let worker_view = deadline.clone();
        deadline.cancel();
        assert!(worker_view.is_expired());
        assert_eq!(worker_view.cap(Duration::from_secs(1)), None);
        assert!(!worker_view.sleep(Duration::from_millis(10)));
    }

    #[test]
    fn test_unrepresentable_budget_does_not_overflow() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.is_expired());
        assert_eq!(
            deadline.cap(Duration::from_secs(1)),
            Some(Duration::from_secs(1))
        );
        let short = Deadline::after(Duration::from_millis(30));
        assert!(!short.sleep(Duration::MAX));
    }

    #[test]
    fn test_sleep_stops_at_expiry() {
        let deadline = Deadline::after(Duration::from_millis(30));
        assert!(!deadline.sleep(Duration::from_secs(5)));
        assert!(deadline.is_expired());
        let roomy = Deadline::after(Duration::from_secs(5));
        assert!(roomy.sleep(Duration::from_millis(5)));
    }
}
