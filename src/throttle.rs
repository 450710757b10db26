//! Leading and trailing edge throttle for viewport-driven updates.
//!
//! The first call in a quiet period runs immediately and opens a window of
//! `wait`. Calls inside the window are coalesced into a single trailing run
//! at the end of it.

use instant::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Throttle {
    wait: Duration,
    window_end: Option<Instant>,
    pending: bool,
}

impl Throttle {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            window_end: None,
            pending: false,
        }
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }

    /// Registers a call. Returns true when the work should run now.
    pub fn call(&mut self, now: Instant) -> bool {
        if self.wait.is_zero() {
            return true;
        }
        match self.window_end {
            Some(end) if now < end => {
                self.pending = true;
                false
            }
            _ => {
                self.pending = false;
                self.window_end = Some(now + self.wait);
                true
            }
        }
    }

    /// Returns true when a coalesced trailing run is due at `now`
    pub fn poll_trailing(&mut self, now: Instant) -> bool {
        let Some(end) = self.window_end else {
            return false;
        };
        if now < end {
            return false;
        }
        if self.pending {
            self.pending = false;
            self.window_end = Some(now + self.wait);
            true
        } else {
            self.window_end = None;
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// When the pending trailing run is due
    pub fn deadline(&self) -> Option<Instant> {
        self.window_end.filter(|_| self.pending)
    }

    pub fn cancel(&mut self) {
        self.pending = false;
        self.window_end = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_leading_call_runs_immediately() {
        let start = Instant::now();
        let mut throttle = Throttle::new(ms(500));
        assert!(throttle.call(start));
        assert!(!throttle.is_pending());
        assert!(!throttle.poll_trailing(start + ms(600)));
    }

    #[test]
    fn test_burst_coalesces_into_one_trailing_run() {
        let start = Instant::now();
        let mut throttle = Throttle::new(ms(500));
        assert!(throttle.call(start));
        for i in 1..10 {
            assert!(!throttle.call(start + ms(i * 20)));
        }
        assert_eq!(throttle.deadline(), Some(start + ms(500)));

        assert!(!throttle.poll_trailing(start + ms(499)));
        assert!(throttle.poll_trailing(start + ms(500)));
        assert!(!throttle.poll_trailing(start + ms(501)));

        // The trailing run opened a new window
        assert!(!throttle.call(start + ms(700)));
        assert!(throttle.poll_trailing(start + ms(1000)));
    }

    #[test]
    fn test_quiet_period_resets() {
        let start = Instant::now();
        let mut throttle = Throttle::new(ms(100));
        assert!(throttle.call(start));
        assert!(!throttle.poll_trailing(start + ms(150)));
        assert!(throttle.call(start + ms(160)));
    }

    #[test]
    fn test_cancel_drops_trailing_run() {
        let start = Instant::now();
        let mut throttle = Throttle::new(ms(100));
        throttle.call(start);
        throttle.call(start + ms(20));
        assert!(throttle.is_pending());
        throttle.cancel();
        assert!(throttle.deadline().is_none());
        assert!(throttle.call(start + ms(30)));
    }

    #[test]
    fn test_zero_wait_never_throttles() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::ZERO);
        assert!(throttle.call(start));
        assert!(throttle.call(start));
        assert!(!throttle.poll_trailing(start));
    }
}
