use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A firmware boot progress code. Identity is the (primary, secondary) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostCode {
    pub primary: u64,
    #[serde(default)]
    pub secondary: Vec<u8>,
}

impl PostCode {
    pub fn new(primary: u64, secondary: Vec<u8>) -> Self {
        Self { primary, secondary }
    }
}

impl fmt::Display for PostCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.primary)?;
        if !self.secondary.is_empty() {
            write!(f, ":{}", hex::encode(&self.secondary))?;
        }
        Ok(())
    }
}

/// Codes of one boot cycle keyed by microseconds since the epoch.
///
/// Keys are unique and ascend in insertion order, so iterating the map
/// replays the codes in the order they were received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BootCycle {
    entries: BTreeMap<u64, PostCode>,
}

impl BootCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Last timestamp handed out, if any
    pub fn last_timestamp(&self) -> Option<u64> {
        self.entries.last_key_value().map(|(ts, _)| *ts)
    }

    /// Inserts `code` at `timestamp`, bumping the key past the newest entry
    /// when it would collide with or precede it. Returns the key used.
    pub fn insert(&mut self, timestamp: u64, code: PostCode) -> u64 {
        let timestamp = match self.last_timestamp() {
            Some(last) if timestamp <= last => last.saturating_add(1),
            _ => timestamp,
        };
        self.entries.insert(timestamp, code);
        timestamp
    }

    /// Drops the oldest entries until at most `max` remain.
    /// Returns how many were dropped.
    pub fn evict_to(&mut self, max: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > max {
            self.entries.pop_first();
            evicted += 1;
        }
        evicted
    }

    pub fn codes(&self) -> Vec<PostCode> {
        self.entries.values().cloned().collect()
    }

    pub fn into_map(self) -> BTreeMap<u64, PostCode> {
        self.entries
    }
}

impl FromIterator<(u64, PostCode)> for BootCycle {
    fn from_iter<T: IntoIterator<Item = (u64, PostCode)>>(iter: T) -> Self {
        let mut cycle = BootCycle::new();
        for (ts, code) in iter {
            cycle.insert(ts, code);
        }
        cycle
    }
}

/// Ring position of the cycle being written and how many cycles were ever recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    /// Slot of the cycle currently being written, `0` before the first cycle
    pub index: u16,
    /// Saturates at the ring size
    pub count: u16,
}

impl RotationState {
    /// Moves to the next slot, wrapping to `1` after `max`
    pub fn advance(&mut self, max: u16) {
        self.index = if self.index >= max { 1 } else { self.index + 1 };
        self.count = self.count.saturating_add(1).min(max);
    }

    /// Forces both counters into `[0, max]`
    pub fn clamped(self, max: u16) -> Self {
        Self {
            index: self.index.min(max),
            count: self.count.min(max),
        }
    }

    /// Slot holding the cycle `requested` cycles back (1 = current).
    ///
    /// Returns `None` for a request outside `[1, max]` or when nothing was recorded yet.
    pub fn slot_for(&self, requested: u16, max: u16) -> Option<u16> {
        if requested == 0 || requested > max || self.index == 0 {
            return None;
        }
        Some(boot_num(self.index, requested, max))
    }
}

/// Maps a backward-counting cycle request onto a ring slot in `1..=max`
pub fn boot_num(index: u16, requested: u16, max: u16) -> u16 {
    if requested > index {
        // wrap around the ring
        (u32::from(max) + u32::from(index) - u32::from(requested) + 1) as u16
    } else {
        index - requested + 1
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    fn code(primary: u64) -> PostCode {
        PostCode::new(primary, vec![])
    }

    #[test]
    fn test_insert_keeps_keys_unique_and_ordered() {
        let mut cycle = BootCycle::new();
        assert_eq!(cycle.insert(100, code(1)), 100);
        assert_eq!(cycle.insert(100, code(2)), 101);
        assert_eq!(cycle.insert(50, code(3)), 102);
        assert_eq!(cycle.insert(500, code(4)), 500);

        let primaries: Vec<u64> = cycle.codes().iter().map(|c| c.primary).collect();
        assert_eq!(primaries, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_evict_drops_oldest() {
        let mut cycle: BootCycle = (0..10).map(|i| (i * 10, code(i))).collect();
        assert_eq!(cycle.evict_to(4), 6);
        assert_eq!(cycle.len(), 4);

        let primaries: Vec<u64> = cycle.codes().iter().map(|c| c.primary).collect();
        assert_eq!(primaries, vec![6, 7, 8, 9]);

        assert_eq!(cycle.evict_to(4), 0);
    }

    #[test]
    fn test_advance_wraps_and_saturates() {
        let mut state = RotationState::default();
        for _ in 0..3 {
            state.advance(3);
        }
        assert_eq!(state, RotationState { index: 3, count: 3 });

        state.advance(3);
        assert_eq!(state, RotationState { index: 1, count: 3 });

        for _ in 0..1000 {
            state.advance(3);
            assert!(state.count <= 3);
            assert!((1..=3).contains(&state.index));
        }
    }

    #[test]
    fn test_boot_num_is_a_bijection() {
        for max in [1u16, 2, 7, 100] {
            for index in 1..=max {
                let slots: HashSet<u16> = (1..=max).map(|r| boot_num(index, r, max)).collect();
                assert_eq!(slots.len(), max as usize);
                assert!(slots.iter().all(|s| (1..=max).contains(s)));
                assert_eq!(boot_num(index, 1, max), index);
            }
        }
    }

    #[test]
    fn test_boot_num_walks_backwards() {
        assert_eq!(boot_num(3, 1, 5), 3);
        assert_eq!(boot_num(3, 2, 5), 2);
        assert_eq!(boot_num(3, 3, 5), 1);
        assert_eq!(boot_num(3, 4, 5), 5);
        assert_eq!(boot_num(3, 5, 5), 4);
    }

    #[test]
    fn test_slot_for_rejects_out_of_range() {
        let state = RotationState { index: 2, count: 2 };
        assert_eq!(state.slot_for(0, 5), None);
        assert_eq!(state.slot_for(6, 5), None);
        assert_eq!(state.slot_for(1, 5), Some(2));
        assert_eq!(RotationState::default().slot_for(1, 5), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(code(1).to_string(), "0x01");
        assert_eq!(PostCode::new(0xab, vec![0xde, 0xad]).to_string(), "0xab:dead");
    }
}
