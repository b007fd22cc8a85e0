//! Priority tiers and a small per-tier table helper.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::{Index, IndexMut};

/// The four fixed priority classes, ordered from most to least urgent.
///
/// The derived `Ord` follows declaration order, so `Critical < High < Normal < Low`
/// means "is more urgent than".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    /// All tiers, most urgent first.
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];

    /// Stable index for per-tier arrays.
    pub const fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    /// Urgent tiers make room by evicting their own oldest entry when full;
    /// best-effort tiers reject the newcomer instead.
    pub const fn evicts_on_overflow(self) -> bool {
        matches!(self, Priority::Critical | Priority::High)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per [`Priority`], indexed by tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityTable<T> {
    values: [T; 4],
}

impl<T> PriorityTable<T> {
    pub fn from_fn(mut f: impl FnMut(Priority) -> T) -> Self {
        Self {
            values: Priority::ALL.map(&mut f),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Priority, &T)> {
        Priority::ALL.into_iter().zip(self.values.iter())
    }

    pub fn map<U>(&self, mut f: impl FnMut(Priority, &T) -> U) -> PriorityTable<U> {
        PriorityTable::from_fn(|p| f(p, &self.values[p.index()]))
    }
}

impl<T> Index<Priority> for PriorityTable<T> {
    type Output = T;

    fn index(&self, priority: Priority) -> &T {
        &self.values[priority.index()]
    }
}

impl<T> IndexMut<Priority> for PriorityTable<T> {
    fn index_mut(&mut self, priority: Priority) -> &mut T {
        &mut self.values[priority.index()]
    }
}

/// Serialized as a map keyed by tier name (`{"critical": .., "high": ..}`).
impl<T: Serialize> Serialize for PriorityTable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Priority::ALL.len()))?;
        for (priority, value) in self.iter() {
            map.serialize_entry(priority.as_str(), value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn ordering_puts_critical_first() {
        let mut tiers = vec![Priority::Low, Priority::Critical, Priority::Normal, Priority::High];
        tiers.sort();
        assert_eq!(tiers, Priority::ALL.to_vec());
    }

    #[rstest]
    #[case::critical(Priority::Critical, true)]
    #[case::high(Priority::High, true)]
    #[case::normal(Priority::Normal, false)]
    #[case::low(Priority::Low, false)]
    fn overflow_policy_by_tier(#[case] priority: Priority, #[case] evicts: bool) {
        assert_eq!(priority.evicts_on_overflow(), evicts);
    }

    #[test]
    fn table_indexes_by_priority() {
        let mut table = PriorityTable::from_fn(|p| p.index() * 10);
        assert_eq!(table[Priority::Normal], 20);
        table[Priority::Low] += 1;
        assert_eq!(table[Priority::Low], 31);
    }

    #[test]
    fn table_serializes_as_named_map() {
        let table = PriorityTable::from_fn(|p| p.index());
        let v = serde_json::to_value(&table).unwrap();
        assert_eq!(v["critical"], 0);
        assert_eq!(v["low"], 3);
    }

    #[test]
    fn priority_serializes_screaming_case() {
        let s = serde_json::to_string(&Priority::Critical).unwrap();
        assert_eq!(s, "\"CRITICAL\"");
    }
}
