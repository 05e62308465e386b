use std::time::Duration;

use tokio::time::Instant;

/// Lets an event through at most once per `interval`.
#[derive(Debug)]
pub struct Debounce {
    interval: Duration,
    last: Option<Instant>,
}

impl Debounce {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True if the previous accepted call is at least `interval` old. An
    /// accepted call restarts the window.
    pub fn check(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_suppresses_within_interval() {
        let mut db = Debounce::new(Duration::from_secs(1));
        assert!(db.check());
        assert!(!db.check());

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!db.check());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(db.check());
        assert!(!db.check());
    }
}
