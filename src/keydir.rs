//! In-memory index from key to record location.

use std::collections::HashMap;

/// Where a record lives on disk: the segment number (1-based) and the byte
/// position of the record header within that segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub segment: u64,
    pub pos: u64,
}

impl Location {
    pub fn new(segment: u64, pos: u64) -> Self {
        Self { segment, pos }
    }

    /// The packed logical offset `(N - 1) * B + P` for a segment size bound
    /// B. Only the stale-segment fall-back still uses this form; the index
    /// itself stores locations structurally.
    pub fn to_offset(self, segment_size: u64) -> u64 {
        (self.segment - 1) * segment_size + self.pos
    }
}

/// The key directory: every live key mapped to the location of its most
/// recent record. Fully in memory, rebuilt from disk on open. Mutated only
/// by the owner task.
#[derive(Clone, Debug, Default)]
pub struct KeyDir {
    entries: HashMap<String, Location>,
}

impl KeyDir {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Location> {
        self.entries.get(key).copied()
    }

    /// Inserts or overwrites unconditionally; the latest put wins.
    pub fn insert(&mut self, key: impl Into<String>, loc: Location) {
        self.entries.insert(key.into(), loc);
    }

    pub fn remove(&mut self, key: &str) -> Option<Location> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// A deep copy for the compactor to rewrite against while the live
    /// index keeps taking puts.
    pub fn snapshot(&self) -> KeyDir {
        self.clone()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut Location)> {
        self.entries.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_overwrites() {
        let mut keydir = KeyDir::new();
        keydir.insert("key", Location::new(1, 0));
        keydir.insert("key", Location::new(2, 64));
        assert_eq!(keydir.get("key"), Some(Location::new(2, 64)));
        assert_eq!(keydir.len(), 1);
    }

    #[test]
    fn test_absent_key() {
        let keydir = KeyDir::new();
        assert_eq!(keydir.get("missing"), None);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut keydir = KeyDir::new();
        keydir.insert("a", Location::new(1, 0));

        let mut snapshot = keydir.snapshot();
        snapshot.insert("a", Location::new(1, 32));
        snapshot.insert("b", Location::new(2, 0));

        // The live index is untouched by snapshot mutation.
        assert_eq!(keydir.get("a"), Some(Location::new(1, 0)));
        assert_eq!(keydir.get("b"), None);
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_packed_offset() {
        assert_eq!(Location::new(1, 0).to_offset(100), 0);
        assert_eq!(Location::new(1, 96).to_offset(100), 96);
        assert_eq!(Location::new(3, 40).to_offset(100), 240);
    }
}
