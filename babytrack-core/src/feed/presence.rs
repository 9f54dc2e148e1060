//! Caregiver presence with heartbeat expiry.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::protocol::PresenceInfo;

/// Tracks which caregivers are online on one channel. A caregiver not heard
/// from within the timeout is pruned.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    timeout: Duration,
    last_seen: HashMap<String, DateTime<Utc>>,
}

impl PresenceTracker {
    pub fn new(timeout: std::time::Duration) -> Self {
        Self {
            timeout: Duration::from_std(timeout).unwrap_or_else(|_| Duration::seconds(90)),
            last_seen: HashMap::new(),
        }
    }

    /// Records a heartbeat. Returns true if the caregiver was not online.
    pub fn heartbeat(&mut self, caregiver_id: &str, at: DateTime<Utc>) -> bool {
        match self.last_seen.get_mut(caregiver_id) {
            Some(seen) => {
                if at > *seen {
                    *seen = at;
                }
                false
            }
            None => {
                self.last_seen.insert(caregiver_id.to_string(), at);
                true
            }
        }
    }

    /// Returns true if the caregiver was online.
    pub fn leave(&mut self, caregiver_id: &str) -> bool {
        self.last_seen.remove(caregiver_id).is_some()
    }

    /// Drops everyone whose last heartbeat is older than the timeout and
    /// returns their ids.
    pub fn prune(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let cutoff = now - self.timeout;
        let expired: Vec<String> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| **seen < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.last_seen.remove(id);
        }
        expired
    }

    pub fn is_online(&self, caregiver_id: &str) -> bool {
        self.last_seen.contains_key(caregiver_id)
    }

    /// Online caregivers sorted by id.
    pub fn online(&self) -> Vec<PresenceInfo> {
        let mut online: Vec<PresenceInfo> = self
            .last_seen
            .iter()
            .map(|(id, seen)| PresenceInfo {
                caregiver_id: id.clone(),
                last_seen: *seen,
            })
            .collect();
        online.sort_by(|a, b| a.caregiver_id.cmp(&b.caregiver_id));
        online
    }

    /// Replaces the tracked set with a snapshot.
    pub fn reset(&mut self, online: &[PresenceInfo]) {
        self.last_seen = online
            .iter()
            .map(|p| (p.caregiver_id.clone(), p.last_seen))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_heartbeat_and_leave() {
        let mut tracker = PresenceTracker::new(std::time::Duration::from_secs(90));
        assert!(tracker.heartbeat("a", t(0)));
        assert!(!tracker.heartbeat("a", t(30)));
        assert!(tracker.is_online("a"));
        assert!(tracker.leave("a"));
        assert!(!tracker.leave("a"));
        assert!(tracker.online().is_empty());
    }

    #[test]
    fn test_prune_after_timeout() {
        let mut tracker = PresenceTracker::new(std::time::Duration::from_secs(90));
        tracker.heartbeat("a", t(0));
        tracker.heartbeat("b", t(60));

        assert!(tracker.prune(t(90)).is_empty());
        assert_eq!(tracker.prune(t(91)), vec!["a".to_string()]);
        assert!(tracker.is_online("b"));
        assert_eq!(tracker.online().len(), 1);
    }

    #[test]
    fn test_older_heartbeat_does_not_rewind() {
        let mut tracker = PresenceTracker::new(std::time::Duration::from_secs(90));
        tracker.heartbeat("a", t(100));
        tracker.heartbeat("a", t(10));
        assert!(tracker.prune(t(150)).is_empty());
    }
}
