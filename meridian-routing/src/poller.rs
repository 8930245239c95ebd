//! Periodic task timer owned by its user.

/// Fires at a fixed period while started.
///
/// The poller does not read a clock; the owner passes the current time to
/// [`Poller::poll`] and runs the task when it returns true. Missed periods
/// collapse into one firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    period_us: u64,
    next_due_us: Option<u64>,
}

impl Poller {
    /// Creates a stopped poller.
    ///
    /// # Panics
    /// Panics if `period_us` is zero.
    #[must_use]
    pub const fn new(period_us: u64) -> Self {
        assert!(period_us > 0, "poller period must be positive");
        Self {
            period_us,
            next_due_us: None,
        }
    }

    /// Starts the poller. The first firing is one period from `now_us`.
    pub fn start(&mut self, now_us: u64) {
        self.next_due_us = Some(now_us.saturating_add(self.period_us));
    }

    /// Stops the poller.
    pub fn stop(&mut self) {
        self.next_due_us = None;
    }

    /// True while started.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.next_due_us.is_some()
    }

    /// The period in microseconds.
    #[must_use]
    pub const fn period_us(&self) -> u64 {
        self.period_us
    }

    /// Returns true if the task is due, and schedules the next firing.
    pub fn poll(&mut self, now_us: u64) -> bool {
        match self.next_due_us {
            Some(due) if now_us >= due => {
                let behind = (now_us - due) / self.period_us;
                self.next_due_us = Some(due + (behind + 1) * self.period_us);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_each_period() {
        let mut poller = Poller::new(10_000);
        poller.start(0);
        assert!(!poller.poll(9_999));
        assert!(poller.poll(10_000));
        assert!(!poller.poll(15_000));
        assert!(poller.poll(20_000));
    }

    #[test]
    fn test_missed_periods_collapse() {
        let mut poller = Poller::new(10_000);
        poller.start(0);
        assert!(poller.poll(55_000));
        assert!(!poller.poll(59_999));
        assert!(poller.poll(60_000));
    }

    #[test]
    fn test_stopped_never_fires() {
        let mut poller = Poller::new(10_000);
        assert!(!poller.poll(1_000_000));
        poller.start(0);
        poller.stop();
        assert!(!poller.is_running());
        assert!(!poller.poll(1_000_000));
    }
}
