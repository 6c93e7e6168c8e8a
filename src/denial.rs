//! Denial-of-existence bookkeeping for DNSSEC.
//!
//! A lexicographically sorted, reference-counted list of the owner names
//! that exist in the registry. NSEC answers need the names surrounding a
//! missing key; [`DenialIndex::neighbors`] produces them.

/// One owner name and how many live services reference it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct OwnerRef {
    name: String,
    refs: usize,
}

/// Sorted owner-name index. Empty and unused unless DNSSEC is enabled.
#[derive(Debug, Default)]
pub struct DenialIndex {
    entries: Vec<OwnerRef>,
}

impl DenialIndex {
    /// A new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct owner names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no owner names are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reference `name`, inserting it in sorted position on first use.
    pub fn add(&mut self, name: &str) {
        match self.entries.binary_search_by(|e| e.name.as_str().cmp(name)) {
            Ok(i) => self.entries[i].refs += 1,
            Err(i) => self.entries.insert(
                i,
                OwnerRef {
                    name: name.to_string(),
                    refs: 1,
                },
            ),
        }
    }

    /// Drop one reference to `name`, removing the entry when none remain.
    pub fn remove(&mut self, name: &str) {
        if let Ok(i) = self.entries.binary_search_by(|e| e.name.as_str().cmp(name)) {
            self.entries[i].refs -= 1;
            if self.entries[i].refs == 0 {
                self.entries.remove(i);
            }
        }
    }

    /// The owner names enclosing `key` for an NSEC pair, dot-suffixed and
    /// ready to be joined onto the zone name.
    ///
    /// Empty index yields `("", "")`. An exact hit yields the name itself
    /// (no dot) and its dot-suffixed successor, or `""` at the end of the
    /// list. A miss yields the dot-suffixed predecessor and successor, `""`
    /// standing in for the zone apex at either edge.
    pub fn neighbors(&self, key: &str) -> (String, String) {
        if self.entries.is_empty() {
            return (String::new(), String::new());
        }
        match self.entries.binary_search_by(|e| e.name.as_str().cmp(key)) {
            Ok(i) => {
                let next = match self.entries.get(i + 1) {
                    Some(e) => format!("{}.", e.name),
                    None => String::new(),
                };
                (self.entries[i].name.clone(), next)
            }
            Err(0) => (String::new(), format!("{}.", self.entries[0].name)),
            Err(i) => {
                let next = match self.entries.get(i) {
                    Some(e) => format!("{}.", e.name),
                    None => String::new(),
                };
                (format!("{}.", self.entries[i - 1].name), next)
            }
        }
    }

    #[cfg(test)]
    fn refs(&self, name: &str) -> usize {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.refs)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_sorted_unique() {
        let mut idx = DenialIndex::new();
        idx.add("production");
        idx.add("a.production");
        idx.add("m.production");
        idx.add("a.production");
        assert_eq!(idx.len(), 3);
        let names: Vec<&str> = idx.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.production", "m.production", "production"]);
        assert_eq!(idx.refs("a.production"), 2);
    }

    #[test]
    fn test_remove_drops_entry_at_zero_refs() {
        let mut idx = DenialIndex::new();
        idx.add("production");
        idx.add("production");
        idx.remove("production");
        assert_eq!(idx.refs("production"), 1);
        idx.remove("production");
        assert!(idx.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut idx = DenialIndex::new();
        idx.add("production");
        idx.remove("staging");
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_neighbors_empty() {
        let idx = DenialIndex::new();
        assert_eq!(idx.neighbors("anything"), (String::new(), String::new()));
    }

    #[test]
    fn test_neighbors_exact_hit() {
        let mut idx = DenialIndex::new();
        idx.add("a");
        idx.add("b");
        idx.add("c");
        assert_eq!(idx.neighbors("b"), ("b".to_string(), "c.".to_string()));
        // Hit on the last entry: no successor.
        assert_eq!(idx.neighbors("c"), ("c".to_string(), String::new()));
    }

    #[test]
    fn test_neighbors_before_first() {
        let mut idx = DenialIndex::new();
        idx.add("m");
        assert_eq!(idx.neighbors("a"), (String::new(), "m.".to_string()));
    }

    #[test]
    fn test_neighbors_between() {
        let mut idx = DenialIndex::new();
        idx.add("a");
        idx.add("z");
        assert_eq!(idx.neighbors("m"), ("a.".to_string(), "z.".to_string()));
    }

    #[test]
    fn test_neighbors_after_last() {
        let mut idx = DenialIndex::new();
        idx.add("a");
        idx.add("b");
        assert_eq!(idx.neighbors("z"), ("b.".to_string(), String::new()));
    }
}
