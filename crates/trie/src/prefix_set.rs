//! Ordered sets of changed nibble-key prefixes.

/// An ordered, deduplicated set of nibble-unpacked key prefixes, each with
/// a flag recording whether the key was created (rather than modified).
///
/// The set answers one question for the loader: does any changed key live
/// under a given prefix? Queries arrive in ascending order, so a cursor
/// into the sorted key list makes the whole walk linear.
#[derive(Debug, Default, Clone)]
pub struct PrefixSet {
    keys: Vec<(Vec<u8>, bool)>,
    sorted: bool,
    cursor: usize,
}

impl PrefixSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a nibble key; `created` marks keys that did not exist
    /// before the change.
    pub fn insert(&mut self, key: Vec<u8>, created: bool) {
        self.keys.push((key, created));
        self.sorted = false;
    }

    /// Number of distinct keys.
    pub fn len(&mut self) -> usize {
        self.ensure_sorted();
        self.keys.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn ensure_sorted(&mut self) {
        if !self.sorted {
            self.keys.sort();
            self.keys.dedup_by(|a, b| a.0 == b.0);
            self.sorted = true;
            self.cursor = 0;
        }
    }

    /// Whether any key in the set starts with `prefix`. Successive calls
    /// must pass non-decreasing prefixes.
    pub fn contains(&mut self, prefix: &[u8]) -> bool {
        if self.keys.is_empty() {
            return false;
        }
        self.ensure_sorted();
        // rewind while the cursor overshot the queried prefix
        while self.cursor > 0 && self.keys[self.cursor].0.as_slice() > prefix {
            self.cursor -= 1;
        }
        loop {
            let (key, _) = &self.keys[self.cursor];
            if key.starts_with(prefix) {
                return true;
            }
            if key.as_slice() > prefix {
                return false;
            }
            if self.cursor + 1 == self.keys.len() {
                return false;
            }
            self.cursor += 1;
        }
    }

    /// Whether `key` itself is in the set and flagged as created.
    pub fn is_created(&mut self, key: &[u8]) -> bool {
        self.ensure_sorted();
        self.keys
            .binary_search_by(|(candidate, _)| candidate.as_slice().cmp(key))
            .map(|i| self.keys[i].1)
            .unwrap_or(false)
    }

    /// Iterates the sorted keys.
    pub fn iter(&mut self) -> impl Iterator<Item = &[u8]> {
        self.ensure_sorted();
        self.keys.iter().map(|(key, _)| key.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_matches_prefixes_in_ascending_order() {
        let mut set = PrefixSet::new();
        set.insert(vec![1, 2, 3], false);
        set.insert(vec![4, 5], true);
        set.insert(vec![1, 2, 3], false); // duplicate

        assert_eq!(set.len(), 2);
        assert!(set.contains(&[]));
        assert!(set.contains(&[1]));
        assert!(set.contains(&[1, 2]));
        assert!(set.contains(&[1, 2, 3]));
        assert!(!set.contains(&[2]));
        assert!(set.contains(&[4]));
        assert!(set.contains(&[4, 5]));
        assert!(!set.contains(&[7]));
    }

    #[test]
    fn cursor_rewinds_for_repeated_queries() {
        let mut set = PrefixSet::new();
        set.insert(vec![0, 1], false);
        set.insert(vec![8, 2], false);

        assert!(set.contains(&[8]));
        // going back to an earlier prefix still answers correctly
        assert!(set.contains(&[0]));
        assert!(set.contains(&[0, 1]));
        assert!(set.contains(&[8, 2]));
    }

    #[test]
    fn created_flag_survives_dedup() {
        let mut set = PrefixSet::new();
        set.insert(vec![9, 9], true);
        set.insert(vec![3], false);
        assert!(set.is_created(&[9, 9]));
        assert!(!set.is_created(&[3]));
        assert!(!set.is_created(&[1]));
    }

    #[test]
    fn empty_set_contains_nothing() {
        let mut set = PrefixSet::new();
        assert!(!set.contains(&[]));
        assert!(!set.contains(&[1]));
    }
}
