//! The session's single recovery deadline.

use std::time::Duration;

use tokio::time::Instant;

/// One optional expiry instant with a fixed period.
///
/// The dispatcher restarts it on every buffer mutation and dispatch, then
/// reconciles it with [`Deadline::sync`] at the end of each event.
#[derive(Debug)]
pub(crate) struct Deadline {
    period: Duration,
    at: Option<Instant>,
}

impl Deadline {
    pub(crate) fn new(period: Duration) -> Self {
        Deadline { period, at: None }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// Arm for a fresh full period from now.
    pub(crate) fn restart(&mut self) {
        self.at = Some(Instant::now() + self.period);
    }

    pub(crate) fn disarm(&mut self) {
        self.at = None;
    }

    /// Armed iff `needed`. Keeps an existing expiry rather than extending it.
    pub(crate) fn sync(&mut self, needed: bool) {
        match (needed, self.is_armed()) {
            (false, _) => self.disarm(),
            (true, false) => self.restart(),
            (true, true) => {}
        }
    }

    /// Resolves at the expiry instant; never resolves while disarmed.
    pub(crate) async fn expired(&self) {
        match self.at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disarmed() {
        assert!(!Deadline::new(Duration::from_millis(50)).is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_arms_and_disarms() {
        let mut deadline = Deadline::new(Duration::from_millis(50));
        deadline.sync(true);
        assert!(deadline.is_armed());
        deadline.sync(false);
        assert!(!deadline.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_period() {
        let mut deadline = Deadline::new(Duration::from_millis(50));
        let start = Instant::now();
        deadline.restart();
        deadline.expired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_does_not_extend_armed_deadline() {
        let mut deadline = Deadline::new(Duration::from_millis(50));
        let start = Instant::now();
        deadline.restart();
        tokio::time::advance(Duration::from_millis(30)).await;
        deadline.sync(true);
        deadline.expired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_extends_deadline() {
        let mut deadline = Deadline::new(Duration::from_millis(50));
        let start = Instant::now();
        deadline.restart();
        tokio::time::advance(Duration::from_millis(30)).await;
        deadline.restart();
        deadline.expired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(80));
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_never_expires() {
        let deadline = Deadline::new(Duration::from_millis(50));
        let waited = tokio::time::timeout(Duration::from_secs(10), deadline.expired()).await;
        assert!(waited.is_err());
    }
}
