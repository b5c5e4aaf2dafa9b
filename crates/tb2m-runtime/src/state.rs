//! Poll loop state: last published values and online hysteresis

use std::collections::HashMap;

/// Consecutive non-online readings needed before going offline
pub const HYSTERESIS_DEPTH: u8 = 3;

/// Debounces online → offline transitions
///
/// An online reading arms the counter; every other reading counts it down.
/// While it is still above zero the reading is held back.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OnlineHysteresis {
    remaining: u8,
}

impl OnlineHysteresis {
    /// Record a reading. Returns whether it may be published.
    pub fn observe(&mut self, online: bool) -> bool {
        if online {
            self.remaining = HYSTERESIS_DEPTH;
            true
        } else {
            self.remaining = self.remaining.saturating_sub(1);
            self.remaining == 0
        }
    }

    pub fn remaining(&self) -> u8 {
        self.remaining
    }
}

/// Last value published per topic
#[derive(Debug, Default)]
pub struct PublishedState {
    values: HashMap<String, String>,
}

impl PublishedState {
    pub fn changed(&self, topic: &str, value: &str) -> bool {
        self.values.get(topic).map(String::as_str) != Some(value)
    }

    pub fn record(&mut self, topic: &str, value: String) {
        self.values.insert(topic.to_string(), value);
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hysteresis_counts_down() {
        let mut h = OnlineHysteresis::default();
        assert!(h.observe(true));
        assert_eq!(h.remaining(), 3);
        assert!(!h.observe(false));
        assert_eq!(h.remaining(), 2);
        assert!(!h.observe(false));
        assert_eq!(h.remaining(), 1);
        assert!(h.observe(false));
        assert_eq!(h.remaining(), 0);
        assert!(h.observe(false));
        assert_eq!(h.remaining(), 0);
    }

    #[test]
    fn test_hysteresis_reset_by_online() {
        let mut h = OnlineHysteresis::default();
        h.observe(true);
        h.observe(false);
        h.observe(false);
        assert!(h.observe(true));
        assert_eq!(h.remaining(), 3);
    }

    #[test]
    fn test_offline_at_start_publishes() {
        let mut h = OnlineHysteresis::default();
        assert!(h.observe(false));
    }

    #[test]
    fn test_published_state() {
        let mut state = PublishedState::default();
        assert!(state.changed("t/a", "1"));
        state.record("t/a", "1".to_string());
        assert!(!state.changed("t/a", "1"));
        assert!(state.changed("t/a", "2"));
        state.clear();
        assert!(state.is_empty());
        assert!(state.changed("t/a", "1"));
    }
}
