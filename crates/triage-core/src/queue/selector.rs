//! Tier selection: strict priority with bounded starvation.

use crate::domain::{Priority, PriorityTable};

/// Lower tiers HIGH yields to, in rotation order.
const LOWER_TIERS: [Priority; 2] = [Priority::Normal, Priority::Low];

/// Picks which tier the next dispatch comes from.
///
/// - CRITICAL is served whenever it is non-empty and never counts as a streak.
/// - HIGH is served next, but after `threshold` consecutive HIGH picks while
///   NORMAL or LOW waits, one pick goes to a lower tier. The lower tier is
///   chosen by a rotating cursor so NORMAL and LOW take turns.
/// - NORMAL over LOW follows the same rule one level down.
///
/// Pure state machine: no locks, no clock.
#[derive(Debug, Clone)]
pub(crate) struct Selector {
    threshold: u32,
    high_streak: u32,
    normal_streak: u32,
    lower_cursor: usize,
}

impl Selector {
    pub(crate) fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            high_streak: 0,
            normal_streak: 0,
            lower_cursor: 0,
        }
    }

    pub(crate) fn set_threshold(&mut self, threshold: u32) {
        self.threshold = threshold.max(1);
    }

    /// `ready[p]` is true when tier `p` has at least one task.
    pub(crate) fn pick(&mut self, ready: &PriorityTable<bool>) -> Option<Priority> {
        if ready[Priority::Critical] {
            return Some(Priority::Critical);
        }

        let lower_waiting = ready[Priority::Normal] || ready[Priority::Low];

        if ready[Priority::High] {
            if !lower_waiting {
                self.high_streak = 0;
                return Some(Priority::High);
            }
            if self.high_streak >= self.threshold {
                self.high_streak = 0;
                return self.next_lower(ready);
            }
            self.high_streak += 1;
            return Some(Priority::High);
        }
        self.high_streak = 0;

        if ready[Priority::Normal] {
            if !ready[Priority::Low] {
                self.normal_streak = 0;
                return Some(Priority::Normal);
            }
            if self.normal_streak >= self.threshold {
                self.normal_streak = 0;
                return Some(Priority::Low);
            }
            self.normal_streak += 1;
            return Some(Priority::Normal);
        }
        self.normal_streak = 0;

        ready[Priority::Low].then_some(Priority::Low)
    }

    fn next_lower(&mut self, ready: &PriorityTable<bool>) -> Option<Priority> {
        for offset in 0..LOWER_TIERS.len() {
            let slot = (self.lower_cursor + offset) % LOWER_TIERS.len();
            let tier = LOWER_TIERS[slot];
            if ready[tier] {
                self.lower_cursor = (slot + 1) % LOWER_TIERS.len();
                return Some(tier);
            }
        }
        None
    }
}
