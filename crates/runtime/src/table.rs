//! Open-addressed hash table keyed by interned string identity.
//!
//! Every table in the VM -- globals, instance fields, class method tables,
//! and the string interner itself -- is this same structure. Keys are raw
//! pointers to [`LoxString`](crate::objects::LoxString) objects; because
//! strings are interned, pointer equality is content equality, so probing
//! never needs to compare bytes once the hash matches.
//!
//! Deletions leave a tombstone (`key = None`, `value = true`) rather than
//! shrinking the probe chain, so that a lookup which probes past a deleted
//! slot still finds entries placed after it. `count` includes tombstones
//! for the purpose of the load-factor check, matching the source algorithm.

use crate::objects::LoxString;
use lox_core::Value;

const TABLE_MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
struct Entry {
    key: Option<*mut LoxString>,
    value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry {
            key: None,
            value: Value::nil(),
        }
    }
}

pub struct Table {
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Insert or overwrite `key -> value`. Returns `true` if this created a
    /// brand-new entry (as opposed to overwriting an existing key or
    /// reusing a tombstone).
    pub fn set(&mut self, key: *mut LoxString, value: Value) -> bool {
        if self.entries.is_empty()
            || (self.count + 1) as f64 > self.entries.len() as f64 * TABLE_MAX_LOAD
        {
            self.grow();
        }

        let index = self.find_entry_index(key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        // Only bump count for a fresh slot, not when reusing a tombstone.
        if is_new_key && entry.value.is_nil() {
            self.count += 1;
        }
        entry.key = Some(key);
        entry.value = value;
        is_new_key
    }

    pub fn get(&self, key: *mut LoxString) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let index = self.find_entry_index(key);
        let entry = &self.entries[index];
        entry.key.map(|_| entry.value)
    }

    /// Remove `key`, leaving a tombstone so later probes still traverse
    /// past this slot. Returns whether the key was present.
    pub fn delete(&mut self, key: *mut LoxString) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = self.find_entry_index(key);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        entry.key = None;
        entry.value = Value::bool(true);
        true
    }

    /// Look up an interned string by content, bypassing identity
    /// comparison. Used by the interner to find an existing canonical
    /// string before allocating a new one.
    pub fn find_string(&self, text: &str, hash: u32) -> Option<*mut LoxString> {
        if self.entries.is_empty() {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = (hash as usize) & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    // A true empty slot (not a tombstone) ends the probe.
                    if entry.value.is_nil() {
                        return None;
                    }
                }
                Some(key_ptr) => {
                    let s = unsafe { &*key_ptr };
                    if s.hash == hash && s.as_str() == text {
                        return Some(key_ptr);
                    }
                }
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    /// Remove every entry whose key is white (unreachable), used by the
    /// collector to unlink interned strings before they are swept.
    pub fn remove_white(&mut self, is_white: impl Fn(*mut LoxString) -> bool) {
        for entry in self.entries.iter_mut() {
            if let Some(key) = entry.key
                && is_white(key)
            {
                entry.key = None;
                entry.value = Value::bool(true);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut LoxString, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.key.map(|k| (k, e.value)))
    }

    fn find_entry_index(&self, key: *mut LoxString) -> usize {
        let capacity = self.entries.len();
        let hash = unsafe { (*key).hash };
        let mut index = (hash as usize) & (capacity - 1);
        let mut first_tombstone: Option<usize> = None;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                None => {
                    if entry.value.is_nil() {
                        // Genuinely empty: reuse an earlier tombstone if we saw one.
                        return first_tombstone.unwrap_or(index);
                    } else if first_tombstone.is_none() {
                        first_tombstone = Some(index);
                    }
                }
                Some(k) if k == key => return index,
                Some(_) => {}
            }
            index = (index + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self) {
        let new_capacity = if self.entries.is_empty() {
            8
        } else {
            self.entries.len() * 2
        };
        let old_entries = std::mem::replace(&mut self.entries, vec![Entry::empty(); new_capacity]);
        self.count = 0;
        for entry in old_entries {
            if let Some(key) = entry.key {
                self.set(key, entry.value);
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::LoxString;

    fn make_string(s: &str) -> *mut LoxString {
        Box::into_raw(Box::new(LoxString::new_unlinked(s)))
    }

    #[test]
    fn set_then_get() {
        let mut table = Table::new();
        let key = make_string("hello");
        assert!(table.set(key, Value::number(1.0)));
        assert_eq!(table.get(key), Some(Value::number(1.0)));
    }

    #[test]
    fn overwrite_returns_false_for_new_key() {
        let mut table = Table::new();
        let key = make_string("x");
        assert!(table.set(key, Value::number(1.0)));
        assert!(!table.set(key, Value::number(2.0)));
        assert_eq!(table.get(key), Some(Value::number(2.0)));
    }

    #[test]
    fn delete_leaves_tombstone_that_does_not_break_probing() {
        let mut table = Table::new();
        let a = make_string("a");
        let b = make_string("b");
        table.set(a, Value::number(1.0));
        table.set(b, Value::number(2.0));
        assert!(table.delete(a));
        // b must still be reachable even if it probed past a's slot.
        assert_eq!(table.get(b), Some(Value::number(2.0)));
        assert_eq!(table.get(a), None);
    }

    #[test]
    fn rehash_preserves_all_entries() {
        let mut table = Table::new();
        let mut keys = Vec::new();
        for i in 0..100 {
            let key = make_string(&format!("key{i}"));
            keys.push(key);
            table.set(key, Value::number(i as f64));
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(table.get(*key), Some(Value::number(i as f64)));
        }
    }

    #[test]
    fn find_string_matches_by_content_not_identity() {
        let mut table = Table::new();
        let key = make_string("shared");
        table.set(key, Value::nil());
        let found = table.find_string("shared", unsafe { (*key).hash });
        assert_eq!(found, Some(key));
    }
}
