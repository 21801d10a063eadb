//! Keyed record storage with merge-on-write.

use std::collections::HashMap;

/// Process-wide record store. Entries are only ever added or merged into;
/// nothing is removed implicitly.
#[derive(Clone, Debug)]
pub struct MetadataRegistry<V> {
    entries: HashMap<String, V>,
}

impl<V> Default for MetadataRegistry<V> {
    fn default() -> Self {
        MetadataRegistry {
            entries: HashMap::new(),
        }
    }
}

impl<V> MetadataRegistry<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `key` with `default` if absent, then apply `mutator` to the stored
    /// value. Contributions from independent registrations never clobber each
    /// other as long as each mutator only touches its own part of the record.
    pub fn change_with_default<F>(&mut self, key: &str, default: V, mutator: F) -> &mut Self
    where
        F: FnOnce(&mut V),
    {
        let entry = self.entries.entry(key.to_string()).or_insert(default);
        mutator(entry);
        self
    }

    /// Apply `mutator` only when `key` is present.
    pub fn change_if_present<F>(&mut self, key: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        match self.entries.get_mut(key) {
            Some(v) => {
                mutator(v);
                true
            }
            None => false,
        }
    }

    pub fn put(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut V)> {
        self.entries.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_default_then_mutates() {
        let mut reg: MetadataRegistry<Vec<u32>> = MetadataRegistry::new();
        reg.change_with_default("A", vec![1], |v| v.push(2));
        assert_eq!(reg.get("A"), Some(&vec![1, 2]));
    }

    #[test]
    fn later_contributions_merge_instead_of_replacing() {
        let mut reg: MetadataRegistry<Vec<u32>> = MetadataRegistry::new();
        reg.change_with_default("A", Vec::new(), |v| v.push(1));
        // The default is ignored once the key exists.
        reg.change_with_default("A", vec![99], |v| v.push(2));
        assert_eq!(reg.get("A"), Some(&vec![1, 2]));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn keys_are_case_sensitive() {
        let mut reg: MetadataRegistry<u8> = MetadataRegistry::new();
        reg.change_with_default("Helper", 0, |v| *v += 1);
        reg.change_with_default("helper", 0, |v| *v += 1);
        assert_eq!(reg.len(), 2);
        assert!(!reg.change_if_present("HELPER", |v| *v += 1));
    }
}
