//! Change detection for the request slot: one signal per newer modification time.

use std::time::SystemTime;

/// Tracks the last processed modification time of the request slot.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    /// `None` sorts before every real timestamp.
    last_seen: Option<SystemTime>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self { last_seen: None }
    }

    /// Feed one observation (`None` when the slot does not exist).
    /// Returns true exactly once per strictly newer timestamp.
    pub fn observe(&mut self, modified: Option<SystemTime>) -> bool {
        let Some(t) = modified else {
            return false;
        };
        if self.last_seen.map_or(true, |seen| t > seen) {
            self.last_seen = Some(t);
            return true;
        }
        false
    }

    pub fn last_seen(&self) -> Option<SystemTime> {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_slot_never_signals() {
        let mut d = ChangeDetector::new();
        assert!(!d.observe(None));
        assert!(!d.observe(None));
        assert_eq!(d.last_seen(), None);
    }

    #[test]
    fn first_observation_signals_once() {
        let mut d = ChangeDetector::new();
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        assert!(d.observe(Some(t)));
        assert!(!d.observe(Some(t)));
        assert!(!d.observe(Some(t)));
        assert_eq!(d.last_seen(), Some(t));
    }

    #[test]
    fn epoch_timestamp_still_counts_as_new() {
        let mut d = ChangeDetector::new();
        assert!(d.observe(Some(SystemTime::UNIX_EPOCH)));
    }

    #[test]
    fn newer_signals_older_does_not() {
        let mut d = ChangeDetector::new();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        let t1 = t0 + Duration::from_millis(1);
        assert!(d.observe(Some(t0)));
        assert!(d.observe(Some(t1)));
        assert!(!d.observe(Some(t0)));
        assert_eq!(d.last_seen(), Some(t1));
    }

    #[test]
    fn slot_removed_then_recreated() {
        let mut d = ChangeDetector::new();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(10);
        assert!(d.observe(Some(t0)));
        assert!(!d.observe(None));
        assert!(d.observe(Some(t0 + Duration::from_secs(1))));
    }
}
