//! Open-addressed cache table living on the managed heap.
//!
//! Growth allocates a new table object, so every mutating entry point that can
//! grow returns the handle of the table to keep using. The old table is left
//! for the collector.

use otterc_config::table_capacity;

use crate::compilation_cache::key::CacheKey;
use crate::error::HeapError;
use crate::memory::{Forwarding, Heap, HeapObject, HeapRef, Root, RootVisitor};

const WORD: usize = 8;
const ENTRY_WORDS: usize = 4;

/// Value stored under a cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// Top-level script artifact
    Artifact(HeapRef),
    /// Eval artifact with the feedback cell it was compiled against
    Eval {
        shared: HeapRef,
        feedback_cell: Option<HeapRef>,
    },
    /// Compiled regular expression
    RegExpData(HeapRef),
    /// Remaining lifetime of an eval sentinel, in major collections
    Countdown(u32),
}

impl CacheValue {
    /// The artifact this value caches, if any
    pub fn artifact(&self) -> Option<HeapRef> {
        match self {
            CacheValue::Artifact(shared) | CacheValue::Eval { shared, .. } => Some(*shared),
            CacheValue::RegExpData(_) | CacheValue::Countdown(_) => None,
        }
    }

    fn trace(&self, visit: &mut dyn FnMut(HeapRef)) {
        match self {
            CacheValue::Artifact(shared) | CacheValue::RegExpData(shared) => visit(*shared),
            CacheValue::Eval {
                shared,
                feedback_cell,
            } => {
                visit(*shared);
                if let Some(cell) = feedback_cell {
                    visit(*cell);
                }
            }
            CacheValue::Countdown(_) => {}
        }
    }

    fn relocate(&mut self, forwarding: &Forwarding) {
        match self {
            CacheValue::Artifact(shared) | CacheValue::RegExpData(shared) => {
                forwarding.update(shared);
            }
            CacheValue::Eval {
                shared,
                feedback_cell,
            } => {
                forwarding.update(shared);
                if let Some(cell) = feedback_cell.as_mut() {
                    forwarding.update(cell);
                }
            }
            CacheValue::Countdown(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub hash: u32,
    pub value: CacheValue,
}

#[derive(Debug, Clone)]
enum Slot {
    Empty,
    Deleted,
    Occupied(CacheEntry),
}

/// Linear-probing hash table keyed by [`CacheKey`]
#[derive(Debug, Clone)]
pub struct CacheTable {
    slots: Vec<Slot>,
    len: usize,
    deleted: usize,
}

impl CacheTable {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = table_capacity(capacity);
        Self {
            slots: vec![Slot::Empty; capacity],
            len: 0,
            deleted: 0,
        }
    }

    /// Allocate an empty table on the heap
    pub fn allocate(heap: &mut Heap, capacity: usize) -> Result<HeapRef, HeapError> {
        heap.ensure_room(Self::footprint_for(table_capacity(capacity)))?;
        heap.allocate(HeapObject::CacheTable(Self::with_capacity(capacity)))
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn footprint(&self) -> usize {
        Self::footprint_for(self.capacity())
    }

    /// Heap bytes a table of `capacity` slots accounts for
    pub const fn footprint_for(capacity: usize) -> usize {
        WORD * 3 + capacity.saturating_mul(ENTRY_WORDS * WORD)
    }

    /// Position of the first live entry with `hash` whose key satisfies `matches`
    pub fn find<F>(&self, hash: u32, matches: F) -> Option<usize>
    where
        F: Fn(&CacheKey) -> bool,
    {
        let mask = self.capacity() - 1;
        let mut index = hash as usize & mask;

        for _ in 0..self.capacity() {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied(entry) if entry.hash == hash && matches(&entry.key) => {
                    return Some(index);
                }
                Slot::Occupied(_) | Slot::Deleted => {}
            }
            index = (index + 1) & mask;
        }

        None
    }

    pub fn find_key(&self, key: &CacheKey) -> Option<usize> {
        self.find(key.hash(), |candidate| candidate == key)
    }

    pub fn find_sentinel(&self, hash: u32) -> Option<usize> {
        self.find(hash, |candidate| *candidate == CacheKey::Sentinel(hash))
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<&CacheValue> {
        self.find_key(key)
            .and_then(|index| self.entry(index))
            .map(|entry| &entry.value)
    }

    pub fn entry(&self, index: usize) -> Option<&CacheEntry> {
        match self.slots.get(index)? {
            Slot::Occupied(entry) => Some(entry),
            Slot::Empty | Slot::Deleted => None,
        }
    }

    pub fn set_value(&mut self, index: usize, value: CacheValue) -> bool {
        match self.slots.get_mut(index) {
            Some(Slot::Occupied(entry)) => {
                entry.value = value;
                true
            }
            _ => false,
        }
    }

    /// Overwrite key and value of a live entry; the new key must hash the same
    pub fn replace_entry(&mut self, index: usize, key: CacheKey, value: CacheValue) -> bool {
        match self.slots.get_mut(index) {
            Some(Slot::Occupied(entry)) => {
                debug_assert_eq!(entry.hash, key.hash());
                entry.key = key;
                entry.value = value;
                true
            }
            _ => false,
        }
    }

    pub fn remove_entry(&mut self, index: usize) -> Option<CacheEntry> {
        let slot = self.slots.get_mut(index)?;
        if !matches!(slot, Slot::Occupied(_)) {
            return None;
        }
        match std::mem::replace(slot, Slot::Deleted) {
            Slot::Occupied(entry) => {
                self.len -= 1;
                self.deleted += 1;
                Some(entry)
            }
            Slot::Empty | Slot::Deleted => None,
        }
    }

    /// Live entries with their positions
    pub fn iter(&self) -> impl Iterator<Item = (usize, &CacheEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied(entry) => Some((index, entry)),
                Slot::Empty | Slot::Deleted => None,
            })
    }

    /// Remove every entry caching `artifact`
    pub fn remove_value(&mut self, artifact: HeapRef) -> usize {
        let doomed: Vec<usize> = self
            .iter()
            .filter(|(_, entry)| entry.value.artifact() == Some(artifact))
            .map(|(index, _)| index)
            .collect();
        for index in &doomed {
            self.remove_entry(*index);
        }
        doomed.len()
    }

    fn has_room_for(&self, additional: usize) -> bool {
        (self.len + self.deleted + additional) * 4 <= self.capacity() * 3
    }

    fn insert_unchecked(&mut self, entry: CacheEntry) {
        let mask = self.capacity() - 1;
        let mut index = entry.hash as usize & mask;

        loop {
            match self.slots[index] {
                Slot::Empty => break,
                Slot::Deleted => {
                    self.deleted -= 1;
                    break;
                }
                Slot::Occupied(_) => index = (index + 1) & mask,
            }
        }

        self.slots[index] = Slot::Occupied(entry);
        self.len += 1;
    }

    fn rehashed(&self, capacity: usize) -> Self {
        let mut table = Self::with_capacity(capacity);
        for (_, entry) in self.iter() {
            table.insert_unchecked(entry.clone());
        }
        table
    }

    /// Make room for `additional` new entries, reallocating if needed.
    ///
    /// Doubles when more than half the table is live, otherwise rebuilds at the
    /// same size to drop tombstones.
    pub fn ensure_capacity(
        heap: &mut Heap,
        table: HeapRef,
        additional: usize,
    ) -> Result<HeapRef, HeapError> {
        let current = heap.try_table(table)?;
        if current.has_room_for(additional) {
            return Ok(table);
        }

        let mut capacity = current.capacity();
        while (current.len + additional) * 2 > capacity {
            capacity *= 2;
        }
        heap.ensure_room(Self::footprint_for(capacity))?;
        let grown = current.rehashed(capacity);
        heap.allocate(HeapObject::CacheTable(grown))
    }

    /// Insert or replace; returns the table to use from now on
    pub fn put(
        heap: &mut Heap,
        table: HeapRef,
        key: CacheKey,
        value: CacheValue,
    ) -> Result<HeapRef, HeapError> {
        if let Some(index) = heap.try_table(table)?.find_key(&key) {
            heap.try_table_mut(table)?.set_value(index, value);
            return Ok(table);
        }

        let table = Self::ensure_capacity(heap, table, 1)?;
        let hash = key.hash();
        heap.try_table_mut(table)?
            .insert_unchecked(CacheEntry { key, hash, value });
        Ok(table)
    }

    pub(crate) fn trace(&self, visit: &mut dyn FnMut(HeapRef)) {
        for (_, entry) in self.iter() {
            entry.key.trace(visit);
            entry.value.trace(visit);
        }
    }

    pub(crate) fn relocate(&mut self, forwarding: &Forwarding) {
        for slot in &mut self.slots {
            if let Slot::Occupied(entry) = slot {
                entry.key.relocate(forwarding);
                entry.value.relocate(forwarding);
            }
        }
    }
}

/// Lazily allocated single-table slot shared by the script and eval regions
#[derive(Debug)]
pub struct TableSlot {
    table: Option<HeapRef>,
    initial_capacity: usize,
}

impl TableSlot {
    pub fn new(initial_capacity: usize) -> Self {
        Self {
            table: None,
            initial_capacity,
        }
    }

    pub fn get(&self) -> Option<HeapRef> {
        self.table
    }

    pub fn get_or_allocate(&mut self, heap: &mut Heap) -> Result<HeapRef, HeapError> {
        if let Some(table) = self.table {
            return Ok(table);
        }
        let table = CacheTable::allocate(heap, self.initial_capacity)?;
        self.table = Some(table);
        Ok(table)
    }

    pub fn put(&mut self, heap: &mut Heap, key: CacheKey, value: CacheValue) -> Result<(), HeapError> {
        let table = self.get_or_allocate(heap)?;
        self.table = Some(CacheTable::put(heap, table, key, value)?);
        Ok(())
    }

    pub fn remove_value(&mut self, heap: &mut Heap, artifact: HeapRef) -> usize {
        self.table
            .and_then(|table| heap.table_mut(table))
            .map_or(0, |table| table.remove_value(artifact))
    }

    pub fn len(&self, heap: &Heap) -> usize {
        self.table
            .and_then(|table| heap.table(table))
            .map_or(0, CacheTable::len)
    }

    pub fn clear(&mut self) {
        self.table = None;
    }

    pub fn iterate(&mut self, visitor: &mut dyn RootVisitor) {
        if let Some(table) = self.table.as_mut() {
            visitor.visit_root(Root::CompilationCache, table);
        }
    }
}

/// Whether a cached value's artifact has bytecode that went old
pub(crate) fn is_stale(heap: &Heap, value: &CacheValue) -> bool {
    value
        .artifact()
        .and_then(|artifact| heap.artifact(artifact))
        .is_some_and(|artifact| artifact.has_bytecode() && artifact.is_old(heap.bytecode_old_age()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::compilation_cache::key::{LanguageMode, ScriptKey};
    use crate::memory::GcConfig;
    use otterc_config::MAX_TABLE_CAPACITY;

    fn script_key(source: &str) -> CacheKey {
        CacheKey::Script(ScriptKey {
            source: Arc::from(source),
            language_mode: LanguageMode::Sloppy,
        })
    }

    #[test]
    fn test_put_replaces_existing_key() {
        let mut heap = Heap::default();
        let table = CacheTable::allocate(&mut heap, 8).unwrap();
        let first = heap.new_feedback_cell().unwrap();
        let second = heap.new_feedback_cell().unwrap();

        let table =
            CacheTable::put(&mut heap, table, script_key("a"), CacheValue::Artifact(first)).unwrap();
        let table =
            CacheTable::put(&mut heap, table, script_key("a"), CacheValue::Artifact(second)).unwrap();

        let cached = heap.table(table).unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(
            cached.lookup(&script_key("a")),
            Some(&CacheValue::Artifact(second))
        );
    }

    #[test]
    fn test_growth_returns_new_table_with_all_entries() {
        let mut heap = Heap::default();
        let original = CacheTable::allocate(&mut heap, 4).unwrap();
        let value = heap.new_feedback_cell().unwrap();

        let mut table = original;
        for i in 0..20 {
            table = CacheTable::put(
                &mut heap,
                table,
                script_key(&format!("s{i}")),
                CacheValue::Artifact(value),
            )
            .unwrap();
        }

        assert_ne!(table, original);
        let grown = heap.table(table).unwrap();
        assert_eq!(grown.len(), 20);
        assert!(grown.capacity() >= 32);
        for i in 0..20 {
            assert!(grown.find_key(&script_key(&format!("s{i}"))).is_some());
        }
        assert_eq!(heap.table(original).unwrap().len(), 3);
    }

    #[test]
    fn test_remove_leaves_probe_chain_intact() {
        let mut table = CacheTable::with_capacity(8);
        let hash = 5;
        for countdown in 0..3 {
            table.insert_unchecked(CacheEntry {
                key: CacheKey::Sentinel(hash),
                hash,
                value: CacheValue::Countdown(countdown),
            });
        }
        assert_eq!(table.len(), 3);

        let first = table.find(hash, |_| true).unwrap();
        assert!(table.remove_entry(first).is_some());
        assert!(table.remove_entry(first).is_none());

        assert_eq!(table.iter().count(), 2);
        let next = table.find(hash, |_| true).unwrap();
        assert_eq!(
            table.entry(next).map(|entry| &entry.value),
            Some(&CacheValue::Countdown(1))
        );
    }

    #[test]
    fn test_tombstones_are_reused_and_purged() {
        let mut heap = Heap::default();
        let value = heap.new_feedback_cell().unwrap();
        let mut table = CacheTable::allocate(&mut heap, 8).unwrap();

        for round in 0..10 {
            let key = script_key(&format!("r{round}"));
            table = CacheTable::put(&mut heap, table, key.clone(), CacheValue::Artifact(value))
                .unwrap();
            let cached = heap.table_mut(table).unwrap();
            let index = cached.find_key(&key).unwrap();
            cached.remove_entry(index);
        }

        let cached = heap.table(table).unwrap();
        assert!(cached.is_empty());
        assert_eq!(cached.capacity(), 8);
    }

    #[test]
    fn test_remove_value_drops_every_matching_entry() {
        let mut heap = Heap::default();
        let doomed = heap.new_feedback_cell().unwrap();
        let kept = heap.new_feedback_cell().unwrap();
        let mut table = CacheTable::with_capacity(8);
        for (source, value) in [("a", doomed), ("b", kept), ("c", doomed)] {
            let key = script_key(source);
            let hash = key.hash();
            table.insert_unchecked(CacheEntry {
                key,
                hash,
                value: CacheValue::Artifact(value),
            });
        }

        assert_eq!(table.remove_value(doomed), 2);
        assert_eq!(table.len(), 1);
        assert!(table.find_key(&script_key("b")).is_some());
    }

    #[test]
    fn test_table_slot_allocates_lazily() {
        let mut heap = Heap::default();
        let mut slot = TableSlot::new(16);
        assert!(slot.get().is_none());
        assert_eq!(slot.len(&heap), 0);

        let value = heap.new_feedback_cell().unwrap();
        slot.put(&mut heap, script_key("x"), CacheValue::Artifact(value)).unwrap();
        assert_eq!(slot.len(&heap), 1);
        assert_eq!(heap.table(slot.get().unwrap()).unwrap().capacity(), 16);

        slot.clear();
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_oversized_table_fails_before_building() {
        let mut heap = Heap::new(&GcConfig {
            max_heap_size: 1024,
            ..GcConfig::default()
        });

        let err = CacheTable::allocate(&mut heap, usize::MAX).unwrap_err();
        assert!(matches!(
            err,
            HeapError::OutOfMemory { requested, limit: 1024, .. }
                if requested == CacheTable::footprint_for(MAX_TABLE_CAPACITY)
        ));
        assert_eq!(heap.used_bytes(), 0);
        assert_eq!(CacheTable::with_capacity(usize::MAX).capacity(), MAX_TABLE_CAPACITY);
    }

    #[test]
    fn test_growth_checks_limit_first() {
        let limit = CacheTable::footprint_for(4) + CacheTable::footprint_for(8) / 2;
        let mut heap = Heap::new(&GcConfig {
            max_heap_size: limit,
            ..GcConfig::default()
        });
        let mut table = CacheTable::allocate(&mut heap, 4).unwrap();
        for countdown in 0..3 {
            table = CacheTable::put(
                &mut heap,
                table,
                CacheKey::Sentinel(countdown),
                CacheValue::Countdown(countdown),
            )
            .unwrap();
        }

        let err = CacheTable::put(&mut heap, table, CacheKey::Sentinel(9), CacheValue::Countdown(9))
            .unwrap_err();
        assert!(matches!(err, HeapError::OutOfMemory { .. }));
        assert_eq!(heap.table(table).unwrap().capacity(), 4);
        assert_eq!(heap.table(table).unwrap().len(), 3);
        assert_eq!(heap.used_bytes(), CacheTable::footprint_for(4));
    }
}
