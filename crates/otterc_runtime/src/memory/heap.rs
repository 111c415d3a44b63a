//! Managed heap with relocatable handles
//!
//! Objects are addressed by [`HeapRef`], an index into the heap's cell array.
//! Compaction may change the index of every object, so a `HeapRef` held
//! outside the heap stays valid only if it is reported to the collector as a
//! root (see [`crate::memory::gc::RootVisitor`]). [`ObjectId`] is the stable
//! identity of an object and survives relocation.

use std::fmt;
use std::sync::Arc;

use crate::compilation_cache::{CacheTable, RegExpFlags, ScriptDetails};
use crate::error::HeapError;
use crate::memory::config::GcConfig;
use crate::memory::objects::{
    Artifact, Context, FeedbackCell, HeapObject, RegExpData, Script,
};

/// Relocatable handle to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeapRef(u32);

impl HeapRef {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap#{}", self.0)
    }
}

/// Stable identity of a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Old-index to new-index mapping produced by compaction
#[derive(Debug, Default)]
pub struct Forwarding {
    targets: Vec<Option<u32>>,
}

impl Forwarding {
    pub fn forward(&self, reference: HeapRef) -> Option<HeapRef> {
        self.targets
            .get(reference.index())
            .copied()
            .flatten()
            .map(HeapRef)
    }

    /// Rewrite a slot in place; slots to dead objects are left untouched
    pub fn update(&self, slot: &mut HeapRef) {
        if let Some(target) = self.forward(*slot) {
            *slot = target;
        }
    }
}

struct HeapCell {
    id: ObjectId,
    size: usize,
    object: HeapObject,
}

/// Outcome of reclaiming unmarked cells
#[derive(Debug, Default)]
pub(crate) struct Reclaimed {
    pub objects: usize,
    pub bytes: usize,
    pub moved: usize,
    pub forwarding: Option<Forwarding>,
}

pub struct Heap {
    cells: Vec<Option<HeapCell>>,
    free: Vec<u32>,
    used_bytes: usize,
    max_heap_size: usize,
    bytecode_old_age: u8,
    next_id: u64,
}

impl Heap {
    pub fn new(config: &GcConfig) -> Self {
        Self {
            cells: Vec::new(),
            free: Vec::new(),
            used_bytes: 0,
            max_heap_size: config.max_heap_size,
            bytecode_old_age: config.bytecode_old_age.max(1),
            next_id: 1,
        }
    }

    /// Fail with `OutOfMemory` unless `size` more bytes fit under the limit
    pub fn ensure_room(&self, size: usize) -> Result<(), HeapError> {
        let exceeds = self
            .used_bytes
            .checked_add(size)
            .is_none_or(|total| total > self.max_heap_size);
        if self.max_heap_size > 0 && exceeds {
            return Err(HeapError::OutOfMemory {
                requested: size,
                used: self.used_bytes,
                limit: self.max_heap_size,
            });
        }
        Ok(())
    }

    pub fn allocate(&mut self, object: HeapObject) -> Result<HeapRef, HeapError> {
        let size = object.size();
        self.ensure_room(size)?;

        let cell = HeapCell {
            id: ObjectId(self.next_id),
            size,
            object,
        };
        self.next_id += 1;
        self.used_bytes += size;

        let reference = match self.free.pop() {
            Some(index) => {
                self.cells[index as usize] = Some(cell);
                HeapRef(index)
            }
            None => {
                self.cells.push(Some(cell));
                HeapRef::from_index(self.cells.len() - 1)
            }
        };
        Ok(reference)
    }

    pub fn get(&self, reference: HeapRef) -> Option<&HeapObject> {
        self.cells
            .get(reference.index())?
            .as_ref()
            .map(|cell| &cell.object)
    }

    pub fn get_mut(&mut self, reference: HeapRef) -> Option<&mut HeapObject> {
        self.cells
            .get_mut(reference.index())?
            .as_mut()
            .map(|cell| &mut cell.object)
    }

    pub fn contains(&self, reference: HeapRef) -> bool {
        self.get(reference).is_some()
    }

    pub fn id_of(&self, reference: HeapRef) -> Option<ObjectId> {
        self.cells.get(reference.index())?.as_ref().map(|cell| cell.id)
    }

    /// Current handle of the object with the given identity
    pub fn find_by_id(&self, id: ObjectId) -> Option<HeapRef> {
        self.cells.iter().enumerate().find_map(|(index, cell)| {
            cell.as_ref()
                .filter(|cell| cell.id == id)
                .map(|_| HeapRef::from_index(index))
        })
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn max_heap_size(&self) -> usize {
        self.max_heap_size
    }

    pub fn object_count(&self) -> usize {
        self.cells.iter().flatten().count()
    }

    pub fn bytecode_old_age(&self) -> u8 {
        self.bytecode_old_age
    }

    pub fn script(&self, reference: HeapRef) -> Option<&Script> {
        match self.get(reference)? {
            HeapObject::Script(script) => Some(script),
            _ => None,
        }
    }

    pub fn artifact(&self, reference: HeapRef) -> Option<&Artifact> {
        match self.get(reference)? {
            HeapObject::Artifact(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn artifact_mut(&mut self, reference: HeapRef) -> Option<&mut Artifact> {
        match self.get_mut(reference)? {
            HeapObject::Artifact(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn context(&self, reference: HeapRef) -> Option<&Context> {
        match self.get(reference)? {
            HeapObject::Context(context) => Some(context),
            _ => None,
        }
    }

    pub fn feedback_cell(&self, reference: HeapRef) -> Option<&FeedbackCell> {
        match self.get(reference)? {
            HeapObject::FeedbackCell(cell) => Some(cell),
            _ => None,
        }
    }

    pub fn regexp_data(&self, reference: HeapRef) -> Option<&RegExpData> {
        match self.get(reference)? {
            HeapObject::RegExpData(data) => Some(data),
            _ => None,
        }
    }

    pub fn table(&self, reference: HeapRef) -> Option<&CacheTable> {
        match self.get(reference)? {
            HeapObject::CacheTable(table) => Some(table),
            _ => None,
        }
    }

    pub fn table_mut(&mut self, reference: HeapRef) -> Option<&mut CacheTable> {
        match self.get_mut(reference)? {
            HeapObject::CacheTable(table) => Some(table),
            _ => None,
        }
    }

    pub fn try_table(&self, reference: HeapRef) -> Result<&CacheTable, HeapError> {
        self.table(reference).ok_or(HeapError::InvalidReference {
            reference,
            expected: "cache table",
        })
    }

    pub fn try_table_mut(&mut self, reference: HeapRef) -> Result<&mut CacheTable, HeapError> {
        self.table_mut(reference).ok_or(HeapError::InvalidReference {
            reference,
            expected: "cache table",
        })
    }

    pub fn try_artifact(&self, reference: HeapRef) -> Result<&Artifact, HeapError> {
        self.artifact(reference).ok_or(HeapError::InvalidReference {
            reference,
            expected: "artifact",
        })
    }

    /// The native context a context belongs to (itself if it is native)
    pub fn native_context_of(&self, context: HeapRef) -> Option<HeapRef> {
        let ctx = self.context(context)?;
        Some(ctx.native_context.unwrap_or(context))
    }

    pub fn new_script(
        &mut self,
        source: impl Into<Arc<str>>,
        details: &ScriptDetails,
    ) -> Result<HeapRef, HeapError> {
        self.allocate(HeapObject::Script(Script::new(source, details)))
    }

    pub fn new_artifact(&mut self, artifact: Artifact) -> Result<HeapRef, HeapError> {
        self.allocate(HeapObject::Artifact(artifact))
    }

    pub fn new_native_context(&mut self) -> Result<HeapRef, HeapError> {
        self.allocate(HeapObject::Context(Context::native()))
    }

    pub fn new_nested_context(&mut self, native_context: HeapRef) -> Result<HeapRef, HeapError> {
        self.allocate(HeapObject::Context(Context::nested(native_context)))
    }

    pub fn new_feedback_cell(&mut self) -> Result<HeapRef, HeapError> {
        self.allocate(HeapObject::FeedbackCell(FeedbackCell::default()))
    }

    pub fn new_regexp_data(
        &mut self,
        pattern: impl Into<Arc<str>>,
        flags: RegExpFlags,
        bytecode: Vec<u8>,
    ) -> Result<HeapRef, HeapError> {
        self.allocate(HeapObject::RegExpData(RegExpData::new(pattern, flags, bytecode)))
    }

    /// Mark phase: every object reachable from `roots`
    pub(crate) fn mark(&self, roots: Vec<HeapRef>) -> Vec<bool> {
        let mut marked = vec![false; self.cells.len()];
        let mut stack = roots;

        while let Some(reference) = stack.pop() {
            let index = reference.index();
            let Some(Some(cell)) = self.cells.get(index) else {
                continue;
            };
            if marked[index] {
                continue;
            }

            marked[index] = true;
            cell.object.trace(&mut |child| stack.push(child));
        }

        marked
    }

    /// Bytecode of every surviving artifact gets one collection older
    pub(crate) fn age_bytecode(&mut self, marked: &[bool]) {
        for (index, cell) in self.cells.iter_mut().enumerate() {
            if !marked.get(index).copied().unwrap_or(false) {
                continue;
            }
            if let Some(HeapCell {
                object: HeapObject::Artifact(artifact),
                ..
            }) = cell
                && let Some(bytecode) = artifact.bytecode.as_mut()
            {
                bytecode.make_older();
            }
        }
    }

    /// Free unmarked cells in place; nothing moves
    pub(crate) fn sweep(&mut self, marked: &[bool]) -> Reclaimed {
        let mut reclaimed = Reclaimed::default();

        for (index, slot) in self.cells.iter_mut().enumerate() {
            if marked.get(index).copied().unwrap_or(false) {
                continue;
            }
            if let Some(cell) = slot.take() {
                reclaimed.objects += 1;
                reclaimed.bytes += cell.size;
                self.free.push(index as u32);
            }
        }

        self.used_bytes -= reclaimed.bytes;
        reclaimed
    }

    /// Slide marked cells to the front and rewrite interior references
    pub(crate) fn compact(&mut self, marked: &[bool]) -> Reclaimed {
        let mut reclaimed = Reclaimed::default();
        let old_cells = std::mem::take(&mut self.cells);
        let mut targets = vec![None; old_cells.len()];
        let mut cells = Vec::with_capacity(old_cells.len());

        for (index, slot) in old_cells.into_iter().enumerate() {
            let Some(cell) = slot else {
                continue;
            };
            if marked.get(index).copied().unwrap_or(false) {
                if cells.len() != index {
                    reclaimed.moved += 1;
                }
                targets[index] = Some(cells.len() as u32);
                cells.push(Some(cell));
            } else {
                reclaimed.objects += 1;
                reclaimed.bytes += cell.size;
            }
        }

        let forwarding = Forwarding { targets };
        for cell in cells.iter_mut().flatten() {
            cell.object.relocate(&forwarding);
        }

        self.cells = cells;
        self.free.clear();
        self.used_bytes -= reclaimed.bytes;
        reclaimed.forwarding = Some(forwarding);
        reclaimed
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(&GcConfig::default())
    }
}
