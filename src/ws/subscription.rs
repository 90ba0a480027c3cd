//! Per-connection channel subscriptions.
//!
//! Tracks which notification channels a WebSocket client has subscribed
//! to. Only the connection's own RPC calls mutate the set; broadcasts read
//! it.

use std::collections::HashSet;

/// Set of channels a single connection listens to.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    channels: HashSet<String>,
}

impl SubscriptionManager {
    /// Creates a new empty subscription set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a channel. Returns `false` if it was already present.
    pub fn subscribe(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_string())
    }

    /// Removes a channel. Returns `false` if it was not present.
    pub fn unsubscribe(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    /// Returns `true` if notifications on `channel` should be delivered.
    #[must_use]
    pub fn matches(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    /// Returns the number of subscribed channels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.channels.len()
    }

    /// Subscribed channels, sorted.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.iter().cloned().collect();
        channels.sort_unstable();
        channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_matches_nothing() {
        let mgr = SubscriptionManager::new();
        assert!(!mgr.matches("prices"));
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut mgr = SubscriptionManager::new();
        assert!(mgr.subscribe("prices"));
        assert!(!mgr.subscribe("prices"));
        assert_eq!(mgr.count(), 1);
        assert!(mgr.matches("prices"));
        assert!(!mgr.matches("news"));
    }

    #[test]
    fn unsubscribe_removes_channel() {
        let mut mgr = SubscriptionManager::new();
        mgr.subscribe("prices");
        assert!(mgr.unsubscribe("prices"));
        assert!(!mgr.unsubscribe("prices"));
        assert!(!mgr.matches("prices"));
    }

    #[test]
    fn channels_are_sorted() {
        let mut mgr = SubscriptionManager::new();
        mgr.subscribe("b");
        mgr.subscribe("a");
        assert_eq!(mgr.channels(), vec!["a".to_string(), "b".to_string()]);
    }
}
