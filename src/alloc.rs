use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{Result, StoreError};
use crate::leaf::ColumnLeaf;

/// Opaque handle to a slab in the arena; zero is the null ref.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct Ref(pub(crate) u64);

impl Ref {
    pub(crate) const NULL: Ref = Ref(0);

    pub(crate) fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Cluster tree top: ordered cluster refs plus the total row count.
#[derive(Clone, Debug)]
pub(crate) struct TreeTop {
    pub clusters: Vec<Ref>,
    pub size: u64,
}

/// A unit of arena storage.
///
/// `Cluster` is a row payload block: slot 0 references the keys leaf,
/// column `idx` lives at slot `idx + 1`. `KeyList` is the payload of a
/// link-list cell.
#[derive(Clone, Debug)]
pub(crate) enum Slab {
    Top(TreeTop),
    Cluster(Vec<Ref>),
    Leaf(ColumnLeaf),
    KeyList(Vec<i64>),
}

struct Slot {
    slab: Option<Slab>,
    read_only: bool,
}

#[derive(Default)]
struct Slots {
    entries: Vec<Slot>,
    free: Vec<usize>,
}

/// Copy-on-write slab arena.
///
/// Tracks two monotonic counters used by accessors as optimistic
/// invalidation tokens: `storage_version` advances on structural
/// change (allocation layout, copy-on-write duplication, commit) and
/// `content_version` on any value change. `freeze` marks every live
/// slab read-only, which is the commit boundary: the next write to a
/// frozen slab must duplicate it.
pub(crate) struct Alloc {
    slots: Mutex<Slots>,
    storage_version: AtomicU64,
    content_version: AtomicU64,
}

impl Alloc {
    pub fn new() -> Self {
        Alloc {
            slots: Mutex::new(Slots::default()),
            storage_version: AtomicU64::new(1),
            content_version: AtomicU64::new(1),
        }
    }

    pub fn storage_version(&self) -> u64 {
        self.storage_version.load(Ordering::Acquire)
    }

    pub fn content_version(&self) -> u64 {
        self.content_version.load(Ordering::Acquire)
    }

    pub fn bump_storage_version(&self) {
        self.storage_version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn bump_content_version(&self) {
        self.content_version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn alloc(&self, slab: Slab) -> Ref {
        let mut slots = self.slots.lock();
        let slot = Slot {
            slab: Some(slab),
            read_only: false,
        };
        let index = match slots.free.pop() {
            Some(index) => {
                slots.entries[index] = slot;
                index
            }
            None => {
                slots.entries.push(slot);
                slots.entries.len() - 1
            }
        };
        Ref(index as u64 + 1)
    }

    pub fn free(&self, r: Ref) {
        if r.is_null() {
            return;
        }
        let mut slots = self.slots.lock();
        let index = (r.0 - 1) as usize;
        if let Some(slot) = slots.entries.get_mut(index) {
            // Frozen slabs belong to the prior snapshot and stay put.
            if !slot.read_only && slot.slab.take().is_some() {
                slots.free.push(index);
            }
        }
    }

    pub fn is_read_only(&self, r: Ref) -> bool {
        let slots = self.slots.lock();
        slots
            .entries
            .get(r.0.wrapping_sub(1) as usize)
            .map(|slot| slot.read_only)
            .unwrap_or(false)
    }

    /// Reads a slab. The callback must not call back into the arena.
    pub fn read<R>(&self, r: Ref, f: impl FnOnce(&Slab) -> R) -> Result<R> {
        let slots = self.slots.lock();
        let slab = slots
            .entries
            .get((r.0.wrapping_sub(1)) as usize)
            .and_then(|slot| slot.slab.as_ref())
            .ok_or(StoreError::Corruption("dangling ref"))?;
        Ok(f(slab))
    }

    /// Mutates a writable slab. The callback must not call back into
    /// the arena.
    pub fn write<R>(&self, r: Ref, f: impl FnOnce(&mut Slab) -> R) -> Result<R> {
        let mut slots = self.slots.lock();
        let slot = slots
            .entries
            .get_mut((r.0.wrapping_sub(1)) as usize)
            .ok_or(StoreError::Corruption("dangling ref"))?;
        if slot.read_only {
            return Err(StoreError::Corruption("write to read-only slab"));
        }
        let slab = slot
            .slab
            .as_mut()
            .ok_or(StoreError::Corruption("dangling ref"))?;
        Ok(f(slab))
    }

    /// Clones a slab into a fresh writable slot.
    pub fn dup(&self, r: Ref) -> Result<Ref> {
        let slab = self.read(r, |slab| slab.clone())?;
        Ok(self.alloc(slab))
    }

    /// Commit boundary: every live slab becomes read-only and both
    /// version counters advance.
    pub fn freeze(&self) {
        let mut slots = self.slots.lock();
        for slot in &mut slots.entries {
            if slot.slab.is_some() {
                slot.read_only = true;
            }
        }
        drop(slots);
        self.bump_storage_version();
        self.bump_content_version();
    }
}
