//! Name normalization and the mirror set
//!
//! Source object names and destination entry names are compared through the
//! same [`NameNormalizer`], so separators and (optionally) case never cause a
//! false deletion or a false retention.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Canonical form applied to every name before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NameNormalizer {
    /// Fold names to lowercase (for case-insensitive shares)
    pub case_insensitive: bool,
}

impl NameNormalizer {
    /// Create a normalizer
    pub fn new(case_insensitive: bool) -> Self {
        Self { case_insensitive }
    }

    /// Normalize a name: `\` becomes `/`, empty segments and leading or
    /// trailing separators are dropped, case is folded when configured.
    pub fn normalize(&self, name: &str) -> String {
        let joined = name
            .split(|c| c == '/' || c == '\\')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");

        if self.case_insensitive {
            joined.to_lowercase()
        } else {
            joined
        }
    }
}

/// Names successfully transferred during the current run
#[derive(Debug, Clone, Default)]
pub struct MirrorSet {
    names: HashSet<String>,
    normalizer: NameNormalizer,
}

impl MirrorSet {
    /// Create an empty set using `normalizer` for every lookup
    pub fn new(normalizer: NameNormalizer) -> Self {
        Self {
            names: HashSet::new(),
            normalizer,
        }
    }

    /// Record a transferred name; returns false if it was already present
    pub fn insert(&mut self, name: &str) -> bool {
        self.names.insert(self.normalizer.normalize(name))
    }

    /// Check whether a destination name is covered by the set
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&self.normalizer.normalize(name))
    }

    /// Number of distinct names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if no names were recorded
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Normalizer used by this set
    pub fn normalizer(&self) -> NameNormalizer {
        self.normalizer
    }

    /// Iterate over normalized names
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_separators() {
        let n = NameNormalizer::default();
        assert_eq!(n.normalize("a\\b\\c.txt"), "a/b/c.txt");
        assert_eq!(n.normalize("/a//b/"), "a/b");
        assert_eq!(n.normalize("Data.CSV"), "Data.CSV");
    }

    #[test]
    fn test_normalize_case_insensitive() {
        let n = NameNormalizer::new(true);
        assert_eq!(n.normalize("Reports\\Q1.PDF"), "reports/q1.pdf");
    }

    #[test]
    fn test_mirror_set_membership() {
        let mut set = MirrorSet::new(NameNormalizer::default());
        assert!(set.insert("dir/a.txt"));
        assert!(!set.insert("dir\\a.txt"));
        assert_eq!(set.len(), 1);

        assert!(set.contains("/dir/a.txt"));
        assert!(!set.contains("dir/A.txt"));

        let folded = {
            let mut s = MirrorSet::new(NameNormalizer::new(true));
            s.insert("dir/a.txt");
            s
        };
        assert!(folded.contains("DIR/A.TXT"));
    }
}
