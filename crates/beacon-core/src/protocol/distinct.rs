//! Hash-set based de-duplication.

use std::collections::HashSet;
use std::hash::Hash;

/// Remembers every value it has seen and lets only the first occurrence through.
#[derive(Debug)]
pub struct Distinct<T> {
    seen: HashSet<T>,
}

impl<T: Hash + Eq + Clone> Distinct<T> {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self {
            seen: HashSet::new(),
        }
    }

    /// Returns `true` the first time `value` is offered, `false` afterwards.
    pub fn first_seen(&mut self, value: &T) -> bool {
        if self.seen.contains(value) {
            return false;
        }
        self.seen.insert(value.clone());
        true
    }

    /// Number of distinct values seen so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if nothing has been offered yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl<T: Hash + Eq + Clone> Default for Distinct<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_seen_accepts_only_first_occurrence() {
        // Arrange
        let mut distinct = Distinct::new();

        // Act
        let first = distinct.first_seen(&"uuid:a");
        let again = distinct.first_seen(&"uuid:a");
        let other = distinct.first_seen(&"uuid:b");

        // Assert
        assert!(first);
        assert!(!again);
        assert!(other);
        assert_eq!(distinct.len(), 2);
    }

    #[test]
    fn test_new_filter_is_empty() {
        let distinct: Distinct<u32> = Distinct::default();
        assert!(distinct.is_empty());
    }
}
