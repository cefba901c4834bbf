// Named resource arena
//
// Resources live in a `SlotMap` and are addressed by its versioned keys.
// String names are only resolved at the API boundary; a key whose entry was
// removed no longer resolves, even if its slot is reused.

use slotmap::{Key, SlotMap};
use std::collections::HashMap;

pub struct NamedArena<K: Key, T> {
    entries: SlotMap<K, T>,
    names: HashMap<String, K>,
}

impl<K: Key, T> Default for NamedArena<K, T> {
    fn default() -> Self {
        Self {
            entries: SlotMap::with_key(),
            names: HashMap::new(),
        }
    }
}

impl<K: Key, T> NamedArena<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `name`. An existing entry with the same name is
    /// swapped out in place and returned; its key stays valid.
    pub fn insert(&mut self, name: &str, value: T) -> (K, Option<T>) {
        if let Some(&key) = self.names.get(name) {
            if let Some(slot) = self.entries.get_mut(key) {
                return (key, Some(std::mem::replace(slot, value)));
            }
        }

        let key = self.entries.insert(value);
        self.names.insert(name.to_owned(), key);
        (key, None)
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        let key = self.names.remove(name)?;
        self.entries.remove(key)
    }

    pub fn lookup(&self, name: &str) -> Option<K> {
        self.names.get(name).copied()
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.entries.get(key)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&T> {
        self.lookup(name).and_then(|key| self.get(key))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry; outstanding keys go stale.
    pub fn drain(&mut self) -> Vec<T> {
        self.names.clear();
        self.entries.drain().map(|(_, value)| value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    slotmap::new_key_type! {
        struct TestKey;
    }

    fn arena() -> NamedArena<TestKey, u32> {
        NamedArena::new()
    }

    #[test]
    fn lookup_resolves_inserted_name() {
        let mut arena = arena();
        let (key, replaced) = arena.insert("cube", 7);

        assert!(replaced.is_none());
        assert_eq!(arena.lookup("cube"), Some(key));
        assert_eq!(arena.get(key), Some(&7));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn reinserting_a_name_replaces_in_place() {
        let mut arena = arena();
        let (old, _) = arena.insert("cube", 1);
        let (new, replaced) = arena.insert("cube", 2);

        assert_eq!(replaced, Some(1));
        assert_eq!(old, new);
        assert_eq!(arena.get(old), Some(&2));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn stale_key_does_not_resolve_after_slot_reuse() {
        let mut arena = arena();
        let (first, _) = arena.insert("a", 1);
        assert_eq!(arena.remove("a"), Some(1));

        let (second, _) = arena.insert("b", 2);
        assert_ne!(first, second);
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.get(second), Some(&2));
    }

    #[test]
    fn removing_twice_is_harmless() {
        let mut arena = arena();
        arena.insert("a", 1);

        assert_eq!(arena.remove("a"), Some(1));
        assert_eq!(arena.remove("a"), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn drain_empties_and_stales_keys() {
        let mut arena = arena();
        let (a, _) = arena.insert("a", 1);
        arena.insert("b", 2);

        let mut values = arena.drain();
        values.sort();
        assert_eq!(values, vec![1, 2]);
        assert!(arena.is_empty());
        assert_eq!(arena.get(a), None);
        assert!(!arena.contains("a"));
    }
}
