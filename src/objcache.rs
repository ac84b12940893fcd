//! Object cache / memory manager.
//!
//! Owns every interpreter object, keyed by 16-bit object number.  Objects
//! compiled into the game file are *reserved* with a load handle (a seek
//! position) and loaded on demand the first time they are locked; clean,
//! unlocked, file-backed objects may be evicted again when the resident
//! budget is exceeded.  Dynamically created objects live only in memory.
//!
//! All mutation goes through the cache so dirty tracking and the undo log
//! observe it.  Locks are exclusive and must be paired; the guard types do
//! the pairing, and a leftover manual `unlock` exists for the odd protocol
//! corner.

use std::collections::{HashMap, VecDeque};

use log::{debug, trace, warn};

use crate::errors::TadsError;
use crate::object;
use crate::value::{ObjNum, PropNum, Value, OBJ_INVALID};
use crate::vocab::VocabUndo;

/// Loader callback: fetch an object image from the backing store.
pub trait ObjectSource {
    fn load(&mut self, handle: u64, size: u16) -> Result<Vec<u8>, TadsError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backing {
    /// Backed by the game file at the given load handle.
    File { handle: u64, size: u16 },
    /// Created at runtime; no backing store.
    Dynamic,
}

struct Entry {
    backing: Backing,
    bytes: Option<Vec<u8>>,
    locks: u32,
    dirty: bool,
    stamp: u64,
}

/// Pre-change object state captured in a savepoint.
enum UndoImage {
    /// The object's full image before the first change after the savepoint.
    Image(Vec<u8>),
    /// The object did not exist at the savepoint (it was created after).
    Created,
}

struct Savepoint {
    objs: HashMap<ObjNum, UndoImage>,
    vocab: Vec<VocabUndo>,
}

/// Read lock on a resident object.
pub struct LockRef<'a> {
    entry: &'a mut Entry,
}

impl LockRef<'_> {
    pub fn bytes(&self) -> &[u8] {
        self.entry.bytes.as_deref().expect("locked object resident")
    }
}

impl Drop for LockRef<'_> {
    fn drop(&mut self) {
        self.entry.locks -= 1;
    }
}

/// Write lock on a resident object; taking one marks the object dirty and
/// records its pre-change image in the current savepoint.
pub struct LockMut<'a> {
    entry: &'a mut Entry,
}

impl LockMut<'_> {
    pub fn bytes(&self) -> &[u8] {
        self.entry.bytes.as_deref().expect("locked object resident")
    }

    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        self.entry.bytes.as_mut().expect("locked object resident")
    }
}

impl Drop for LockMut<'_> {
    fn drop(&mut self) {
        self.entry.locks -= 1;
    }
}

pub struct ObjectCache {
    entries: HashMap<ObjNum, Entry>,
    source: Option<Box<dyn ObjectSource>>,
    /// Resident-byte budget for eviction; locked, dirty, and dynamic
    /// objects are pinned regardless.
    budget: usize,
    resident: usize,
    clock: u64,
    undo: VecDeque<Savepoint>,
    undo_depth: usize,
    next_dynamic: ObjNum,
}

impl ObjectCache {
    pub fn new(budget: usize, undo_depth: usize) -> Self {
        ObjectCache {
            entries: HashMap::new(),
            source: None,
            budget,
            resident: 0,
            clock: 0,
            undo: VecDeque::new(),
            undo_depth: undo_depth.max(1),
            next_dynamic: OBJ_INVALID - 1,
        }
    }

    pub fn set_source(&mut self, source: Box<dyn ObjectSource>) {
        self.source = Some(source);
    }

    /// Register a file-backed object.  Re-reserving with identical
    /// parameters is a no-op; conflicting parameters indicate a corrupt
    /// image.
    pub fn reserve(&mut self, obj: ObjNum, size: u16, handle: u64) -> Result<(), TadsError> {
        if let Some(e) = self.entries.get(&obj) {
            if e.backing == (Backing::File { handle, size }) {
                return Ok(());
            }
            warn!("object {obj} re-reserved with conflicting parameters");
            return Err(TadsError::InvalidObject(obj));
        }
        self.entries.insert(
            obj,
            Entry {
                backing: Backing::File { handle, size },
                bytes: None,
                locks: 0,
                dirty: false,
                stamp: 0,
            },
        );
        Ok(())
    }

    pub fn exists(&self, obj: ObjNum) -> bool {
        self.entries.contains_key(&obj)
    }

    pub fn is_dirty(&self, obj: ObjNum) -> bool {
        self.entries.get(&obj).map(|e| e.dirty).unwrap_or(false)
    }

    pub fn is_dynamic(&self, obj: ObjNum) -> bool {
        self.entries
            .get(&obj)
            .map(|e| e.backing == Backing::Dynamic)
            .unwrap_or(false)
    }

    /// Mark an object changed without re-locking it.  The pre-change image
    /// must be captured before the mutation, so `touch` is only correct
    /// immediately before the change; `lock_mut` folds the two together.
    pub fn touch(&mut self, obj: ObjNum) -> Result<(), TadsError> {
        self.ensure_resident(obj)?;
        self.capture_undo(obj);
        let e = self.entries.get_mut(&obj).ok_or(TadsError::InvalidObject(obj))?;
        e.dirty = true;
        Ok(())
    }

    /// Current size in bytes of the object's payload.
    pub fn object_size(&mut self, obj: ObjNum) -> Result<usize, TadsError> {
        self.ensure_resident(obj)?;
        Ok(self
            .entries
            .get(&obj)
            .and_then(|e| e.bytes.as_ref())
            .map(|b| b.len())
            .unwrap_or(0))
    }

    /// Lock for reading.  Loads on demand; may evict to make room.
    pub fn lock(&mut self, obj: ObjNum) -> Result<LockRef<'_>, TadsError> {
        self.ensure_resident(obj)?;
        self.clock += 1;
        let clock = self.clock;
        let e = self.entries.get_mut(&obj).ok_or(TadsError::InvalidObject(obj))?;
        e.locks += 1;
        e.stamp = clock;
        Ok(LockRef { entry: e })
    }

    /// Lock for writing: marks dirty and records the undo pre-image.
    pub fn lock_mut(&mut self, obj: ObjNum) -> Result<LockMut<'_>, TadsError> {
        self.ensure_resident(obj)?;
        self.capture_undo(obj);
        self.clock += 1;
        let clock = self.clock;
        let e = self.entries.get_mut(&obj).ok_or(TadsError::InvalidObject(obj))?;
        e.locks += 1;
        e.stamp = clock;
        e.dirty = true;
        Ok(LockMut { entry: e })
    }

    /// Manual unlock for the rare path that cannot use a guard.
    pub fn unlock(&mut self, obj: ObjNum) {
        if let Some(e) = self.entries.get_mut(&obj) {
            if e.locks > 0 {
                e.locks -= 1;
            }
        }
    }

    /// Create a dynamic object with the given payload; numbers are handed
    /// out from the top of the space, below the invalid sentinel, so they
    /// never collide with compiler-assigned numbers.
    pub fn alloc_new(&mut self, payload: Vec<u8>) -> Result<ObjNum, TadsError> {
        let mut obj = self.next_dynamic;
        while self.entries.contains_key(&obj) {
            if obj == 0 {
                return Err(TadsError::CacheFull);
            }
            obj -= 1;
        }
        self.next_dynamic = obj.saturating_sub(1);
        self.insert_dynamic(obj, payload);
        Ok(obj)
    }

    /// Create a dynamic object under a specific number (restore path).
    pub fn alloc_with_num(&mut self, obj: ObjNum, payload: Vec<u8>) {
        self.insert_dynamic(obj, payload);
    }

    fn insert_dynamic(&mut self, obj: ObjNum, payload: Vec<u8>) {
        self.resident += payload.len();
        self.entries.insert(
            obj,
            Entry {
                backing: Backing::Dynamic,
                bytes: Some(payload),
                locks: 0,
                dirty: true,
                stamp: 0,
            },
        );
        if let Some(sp) = self.undo.back_mut() {
            sp.objs.entry(obj).or_insert(UndoImage::Created);
        }
        debug!("allocated dynamic object {obj}");
    }

    /// Grow an object's payload by `add` zero bytes.  Any previously
    /// obtained guard is gone by construction (the borrow rules retire it),
    /// which is the whole point of going through the cache here.
    pub fn expand(&mut self, obj: ObjNum, add: usize) -> Result<usize, TadsError> {
        self.ensure_resident(obj)?;
        self.capture_undo(obj);
        let e = self.entries.get_mut(&obj).ok_or(TadsError::InvalidObject(obj))?;
        let bytes = e.bytes.as_mut().expect("resident");
        bytes.resize(bytes.len() + add, 0);
        e.dirty = true;
        self.resident += add;
        Ok(self.entries[&obj].bytes.as_ref().unwrap().len())
    }

    /// Remove an object outright (undo of a creation, or explicit delete).
    pub fn free(&mut self, obj: ObjNum) {
        if let Some(e) = self.entries.remove(&obj) {
            if let Some(b) = &e.bytes {
                self.resident -= b.len();
            }
        }
    }

    // -- property conveniences -------------------------------------------

    pub fn get_prop_direct(
        &mut self,
        obj: ObjNum,
        prop: PropNum,
    ) -> Result<Option<Value>, TadsError> {
        let guard = self.lock(obj)?;
        let p = guard.bytes();
        match object::find_prop(p, prop) {
            Some(rec) => Ok(Some(object::decode_prop_value(p, &rec)?)),
            None => Ok(None),
        }
    }

    pub fn set_prop(&mut self, obj: ObjNum, prop: PropNum, val: &Value) -> Result<(), TadsError> {
        let before;
        let after;
        {
            let mut guard = self.lock_mut(obj)?;
            let bytes = guard.bytes_mut();
            before = bytes.len();
            object::set_prop(bytes, prop, val);
            after = bytes.len();
        }
        self.resident = self.resident + after - before;
        Ok(())
    }

    pub fn del_prop(&mut self, obj: ObjNum, prop: PropNum) -> Result<bool, TadsError> {
        let before;
        let after;
        let hit;
        {
            let mut guard = self.lock_mut(obj)?;
            let bytes = guard.bytes_mut();
            before = bytes.len();
            hit = object::del_prop(bytes, prop);
            after = bytes.len();
        }
        self.resident = self.resident - before + after;
        Ok(hit)
    }

    // -- undo -------------------------------------------------------------

    /// Open a new undo generation.  The oldest savepoint is discarded once
    /// the configured depth is exceeded.
    pub fn savepoint(&mut self) {
        if self.undo.len() == self.undo_depth {
            self.undo.pop_front();
        }
        self.undo.push_back(Savepoint {
            objs: HashMap::new(),
            vocab: Vec::new(),
        });
        trace!("savepoint ({} retained)", self.undo.len());
    }

    fn capture_undo(&mut self, obj: ObjNum) {
        let Some(sp) = self.undo.back_mut() else {
            return;
        };
        if sp.objs.contains_key(&obj) {
            return;
        }
        if let Some(bytes) = self.entries.get(&obj).and_then(|e| e.bytes.clone()) {
            sp.objs.insert(obj, UndoImage::Image(bytes));
        }
    }

    /// Record a vocabulary-side change in the current savepoint.
    pub fn push_vocab_undo(&mut self, rec: VocabUndo) {
        if let Some(sp) = self.undo.back_mut() {
            sp.vocab.push(rec);
        }
    }

    /// Roll back to the previous savepoint.  Returns the vocabulary undo
    /// records, newest first, for the caller to replay.  The two expected
    /// failure kinds are `NoUndo` (no savepoint retained) and
    /// `IncompleteUndo` (a record references an object that is gone).
    pub fn undo(&mut self) -> Result<Vec<VocabUndo>, TadsError> {
        let sp = self.undo.pop_back().ok_or(TadsError::NoUndo)?;
        for (obj, image) in sp.objs {
            match image {
                UndoImage::Created => self.free(obj),
                UndoImage::Image(bytes) => {
                    let e = self
                        .entries
                        .get_mut(&obj)
                        .ok_or(TadsError::IncompleteUndo)?;
                    if let Some(old) = &e.bytes {
                        self.resident -= old.len();
                    }
                    self.resident += bytes.len();
                    e.bytes = Some(bytes);
                    e.dirty = true;
                }
            }
        }
        let mut vocab = sp.vocab;
        vocab.reverse();
        Ok(vocab)
    }

    pub fn savepoint_count(&self) -> usize {
        self.undo.len()
    }

    /// Revert every object to its post-compilation state: dynamic objects
    /// are dropped, file-backed objects lose their mutable regions.  The
    /// undo history is cleared; it describes a world that no longer exists.
    /// Returns the dropped dynamic object numbers.
    pub fn revert_all(&mut self) -> Vec<ObjNum> {
        let dynamic: Vec<ObjNum> = self
            .entries
            .iter()
            .filter(|(_, e)| e.backing == Backing::Dynamic)
            .map(|(o, _)| *o)
            .collect();
        for obj in &dynamic {
            self.free(*obj);
        }
        for e in self.entries.values_mut() {
            if let Some(bytes) = e.bytes.as_mut() {
                let before = bytes.len();
                object::revert_payload(bytes);
                self.resident = self.resident - before + bytes.len();
            }
            e.dirty = false;
        }
        self.undo.clear();
        self.next_dynamic = OBJ_INVALID - 1;
        debug!("reverted all objects ({} dynamic dropped)", dynamic.len());
        dynamic
    }

    /// Every object number currently known, in ascending order.
    pub fn object_numbers(&self) -> Vec<ObjNum> {
        let mut nums: Vec<ObjNum> = self.entries.keys().copied().collect();
        nums.sort_unstable();
        nums
    }

    // -- residency --------------------------------------------------------

    fn ensure_resident(&mut self, obj: ObjNum) -> Result<(), TadsError> {
        let e = self.entries.get(&obj).ok_or(TadsError::InvalidObject(obj))?;
        if e.bytes.is_some() {
            return Ok(());
        }
        let (handle, size) = match e.backing {
            Backing::File { handle, size } => (handle, size),
            Backing::Dynamic => return Err(TadsError::NotReserved(obj)),
        };
        let source = self.source.as_mut().ok_or(TadsError::NotReserved(obj))?;
        let bytes = source.load(handle, size)?;
        if bytes.len() > u16::MAX as usize {
            return Err(TadsError::LoadTooBig);
        }
        trace!("loaded object {obj} ({} bytes)", bytes.len());
        self.resident += bytes.len();
        let e = self.entries.get_mut(&obj).expect("entry exists");
        e.bytes = Some(bytes);
        if self.resident > self.budget {
            self.evict(obj);
        }
        Ok(())
    }

    /// Swap out least-recently-used clean, unlocked, file-backed objects
    /// until the resident set fits the budget.  Never evicts `keep`.
    fn evict(&mut self, keep: ObjNum) {
        let mut candidates: Vec<(u64, ObjNum, usize)> = self
            .entries
            .iter()
            .filter(|(o, e)| {
                **o != keep
                    && e.locks == 0
                    && !e.dirty
                    && e.bytes.is_some()
                    && matches!(e.backing, Backing::File { .. })
            })
            .map(|(o, e)| (e.stamp, *o, e.bytes.as_ref().unwrap().len()))
            .collect();
        candidates.sort_unstable();
        for (_, obj, size) in candidates {
            if self.resident <= self.budget {
                break;
            }
            let e = self.entries.get_mut(&obj).expect("candidate exists");
            e.bytes = None;
            self.resident -= size;
            trace!("evicted object {obj} ({size} bytes)");
        }
    }
}
