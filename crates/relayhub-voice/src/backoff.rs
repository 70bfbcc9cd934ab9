//! Linear reconnect backoff for upstream ASR/dialog sessions (§4.8, §4.9):
//! delay = 1s × attempt, up to 3 attempts.

use std::time::Duration;

pub const MAX_ATTEMPTS: u32 = 3;

pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Returns the delay for the next attempt, or `None` once `MAX_ATTEMPTS`
    /// has been exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= MAX_ATTEMPTS {
            return None;
        }
        self.attempt += 1;
        Some(Duration::from_secs(self.attempt as u64))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_linearly() {
        let mut b = Backoff::new();
        assert_eq!(b.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(b.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(b.next_delay(), Some(Duration::from_secs(3)));
        assert_eq!(b.next_delay(), None);
    }

    #[test]
    fn reset_restarts_sequence() {
        let mut b = Backoff::new();
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Some(Duration::from_secs(1)));
    }
}
