use crate::alloc::{Alloc, Ref, Slab, TreeTop};
use crate::error::{Result, StoreError};
use crate::keys::ObjKey;
use crate::leaf::{ColumnLeaf, LeafKind};
use crate::value::Mixed;

/// Position of one row: the cluster slab holding it plus the row's
/// index within that cluster's leaves.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) struct RowHandle {
    pub mem: Ref,
    pub index: usize,
}

/// Ordered map `ObjKey -> row payload`, stored entirely in the arena.
///
/// The top slab lists cluster refs in key order; each cluster holds up
/// to `fanout` rows as parallel column leaves (keys at slot 0, column
/// `idx` at slot `idx + 1`). Owners cache the top ref and persist it
/// after every mutating call, since copy-on-write may relocate it.
#[derive(Clone)]
pub(crate) struct ClusterTree {
    top: Ref,
    layout: Vec<LeafKind>,
    fanout: usize,
}

impl ClusterTree {
    pub fn create(alloc: &Alloc, layout: Vec<LeafKind>, fanout: usize) -> Self {
        let top = alloc.alloc(Slab::Top(TreeTop {
            clusters: Vec::new(),
            size: 0,
        }));
        ClusterTree {
            top,
            layout,
            fanout,
        }
    }

    pub fn attach(top: Ref, layout: Vec<LeafKind>, fanout: usize) -> Self {
        ClusterTree {
            top,
            layout,
            fanout,
        }
    }

    pub fn top(&self) -> Ref {
        self.top
    }

    pub fn column_count(&self) -> usize {
        self.layout.len()
    }

    fn read_top(&self, alloc: &Alloc) -> Result<TreeTop> {
        alloc.read(self.top, |slab| match slab {
            Slab::Top(top) => Ok(top.clone()),
            _ => Err(StoreError::Corruption("top slab kind mismatch")),
        })?
    }

    pub fn size(&self, alloc: &Alloc) -> Result<u64> {
        Ok(self.read_top(alloc)?.size)
    }

    pub fn is_valid(&self, alloc: &Alloc, key: ObjKey) -> bool {
        matches!(self.locate(alloc, key), Ok(Some(_)))
    }

    fn keys_of(alloc: &Alloc, cluster: Ref) -> Result<Vec<i64>> {
        let keys_ref = cluster_slot(alloc, cluster, 0)?;
        alloc.read(keys_ref, |slab| match slab {
            Slab::Leaf(ColumnLeaf::Key(keys)) => Ok(keys.clone()),
            _ => Err(StoreError::Corruption("keys leaf kind mismatch")),
        })?
    }

    /// Finds the cluster position and row index of `key`.
    fn locate(&self, alloc: &Alloc, key: ObjKey) -> Result<Option<(usize, usize)>> {
        let top = self.read_top(alloc)?;
        for (pos, cluster) in top.clusters.iter().enumerate() {
            let keys = Self::keys_of(alloc, *cluster)?;
            match keys.last() {
                Some(last) if key.raw() <= *last => {
                    return Ok(keys.binary_search(&key.raw()).ok().map(|ndx| (pos, ndx)));
                }
                _ => continue,
            }
        }
        Ok(None)
    }

    pub fn get(&self, alloc: &Alloc, key: ObjKey) -> Result<RowHandle> {
        let (pos, index) = self
            .locate(alloc, key)?
            .ok_or(StoreError::KeyNotFound)?;
        let top = self.read_top(alloc)?;
        Ok(RowHandle {
            mem: top.clusters[pos],
            index,
        })
    }

    /// Global ordinal of `key` within the tree.
    pub fn get_ndx(&self, alloc: &Alloc, key: ObjKey) -> Result<u64> {
        let top = self.read_top(alloc)?;
        let mut before = 0u64;
        for cluster in &top.clusters {
            let keys = Self::keys_of(alloc, *cluster)?;
            match keys.last() {
                Some(last) if key.raw() <= *last => {
                    let ndx = keys
                        .binary_search(&key.raw())
                        .map_err(|_| StoreError::KeyNotFound)?;
                    return Ok(before + ndx as u64);
                }
                _ => before += keys.len() as u64,
            }
        }
        Err(StoreError::KeyNotFound)
    }

    /// Row at global ordinal `pos`, in key order.
    pub fn get_at(&self, alloc: &Alloc, pos: u64) -> Result<(ObjKey, RowHandle)> {
        let top = self.read_top(alloc)?;
        let mut remaining = pos;
        for cluster in &top.clusters {
            let keys = Self::keys_of(alloc, *cluster)?;
            if (remaining as usize) < keys.len() {
                return Ok((
                    ObjKey::from_raw(keys[remaining as usize]),
                    RowHandle {
                        mem: *cluster,
                        index: remaining as usize,
                    },
                ));
            }
            remaining -= keys.len() as u64;
        }
        Err(StoreError::KeyNotFound)
    }

    fn make_top_writable(&mut self, alloc: &Alloc) -> Result<()> {
        if alloc.is_read_only(self.top) {
            self.top = alloc.dup(self.top)?;
            alloc.bump_storage_version();
        }
        Ok(())
    }

    /// Copy-on-write duplication of a cluster and its leaves.
    fn make_cluster_writable(&mut self, alloc: &Alloc, pos: usize, cluster: Ref) -> Result<Ref> {
        if !alloc.is_read_only(cluster) {
            return Ok(cluster);
        }
        let slots = read_cluster(alloc, cluster)?;
        let mut new_slots = Vec::with_capacity(slots.len());
        for leaf in slots {
            if alloc.is_read_only(leaf) {
                new_slots.push(alloc.dup(leaf)?);
            } else {
                new_slots.push(leaf);
            }
        }
        let new_cluster = alloc.alloc(Slab::Cluster(new_slots));
        self.make_top_writable(alloc)?;
        alloc.write(self.top, |slab| {
            if let Slab::Top(top) = slab {
                top.clusters[pos] = new_cluster;
            }
        })?;
        alloc.bump_storage_version();
        Ok(new_cluster)
    }

    fn new_cluster(&self, alloc: &Alloc) -> Ref {
        let mut slots = Vec::with_capacity(self.layout.len() + 1);
        slots.push(alloc.alloc(Slab::Leaf(ColumnLeaf::new(LeafKind::Key))));
        for kind in &self.layout {
            slots.push(alloc.alloc(Slab::Leaf(ColumnLeaf::new(*kind))));
        }
        alloc.alloc(Slab::Cluster(slots))
    }

    /// Inserts a row. `values` pairs column indexes with initial
    /// values; unmentioned columns take their defaults.
    pub fn insert(
        &mut self,
        alloc: &Alloc,
        key: ObjKey,
        values: &[(u32, Mixed)],
    ) -> Result<RowHandle> {
        let top = self.read_top(alloc)?;
        // Pick the first cluster whose range can hold the key; append
        // to the last one otherwise.
        let mut pos = None;
        for (ci, cluster) in top.clusters.iter().enumerate() {
            let keys = Self::keys_of(alloc, *cluster)?;
            if matches!(keys.last(), Some(last) if key.raw() <= *last) {
                pos = Some(ci);
                break;
            }
        }
        let (pos, cluster) = match pos {
            Some(ci) => (ci, top.clusters[ci]),
            None => match top.clusters.last() {
                Some(last) => (top.clusters.len() - 1, *last),
                None => {
                    let cluster = self.new_cluster(alloc);
                    self.make_top_writable(alloc)?;
                    alloc.write(self.top, |slab| {
                        if let Slab::Top(t) = slab {
                            t.clusters.push(cluster);
                        }
                    })?;
                    (0, cluster)
                }
            },
        };

        let keys = Self::keys_of(alloc, cluster)?;
        let row_ndx = match keys.binary_search(&key.raw()) {
            Ok(_) => return Err(StoreError::KeyAlreadyUsed),
            Err(ndx) => ndx,
        };

        let cluster = self.make_cluster_writable(alloc, pos, cluster)?;
        let slot_count = self.layout.len() + 1;
        for slot in 0..slot_count {
            let leaf = writable_leaf(alloc, cluster, slot)?;
            alloc.write(leaf, |slab| {
                if let Slab::Leaf(leaf) = slab {
                    if slot == 0 {
                        if let ColumnLeaf::Key(keys) = leaf {
                            keys.insert(row_ndx, key.raw());
                        }
                    } else {
                        leaf.insert_default(row_ndx);
                    }
                }
            })?;
        }
        for (idx, value) in values {
            let leaf = writable_leaf(alloc, cluster, *idx as usize + 1)?;
            alloc.write(leaf, |slab| match slab {
                Slab::Leaf(leaf) => leaf.set(row_ndx, value),
                _ => Err(StoreError::Corruption("cluster slot kind mismatch")),
            })??;
        }
        self.make_top_writable(alloc)?;
        alloc.write(self.top, |slab| {
            if let Slab::Top(top) = slab {
                top.size += 1;
            }
        })?;

        let handle = if keys.len() + 1 > self.fanout {
            self.split(alloc, pos, cluster, row_ndx)?
        } else {
            RowHandle {
                mem: cluster,
                index: row_ndx,
            }
        };
        alloc.bump_storage_version();
        alloc.bump_content_version();
        Ok(handle)
    }

    /// Splits an over-full cluster in half, returning the handle of
    /// the row that was just inserted at `row_ndx`.
    fn split(
        &mut self,
        alloc: &Alloc,
        pos: usize,
        cluster: Ref,
        row_ndx: usize,
    ) -> Result<RowHandle> {
        let slots = read_cluster(alloc, cluster)?;
        let len = Self::keys_of(alloc, cluster)?.len();
        let mid = len / 2;
        let mut tail_slots = Vec::with_capacity(slots.len());
        for slot in 0..slots.len() {
            let leaf = writable_leaf(alloc, cluster, slot)?;
            let tail = alloc.write(leaf, |slab| match slab {
                Slab::Leaf(leaf) => Ok(leaf.split_off(mid)),
                _ => Err(StoreError::Corruption("cluster slot kind mismatch")),
            })??;
            tail_slots.push(alloc.alloc(Slab::Leaf(tail)));
        }
        let tail_cluster = alloc.alloc(Slab::Cluster(tail_slots));
        self.make_top_writable(alloc)?;
        alloc.write(self.top, |slab| {
            if let Slab::Top(top) = slab {
                top.clusters.insert(pos + 1, tail_cluster);
            }
        })?;
        Ok(if row_ndx >= mid {
            RowHandle {
                mem: tail_cluster,
                index: row_ndx - mid,
            }
        } else {
            RowHandle {
                mem: cluster,
                index: row_ndx,
            }
        })
    }

    /// Removes a row. Container cells referenced from the row are the
    /// caller's responsibility to tear down beforehand.
    pub fn erase(&mut self, alloc: &Alloc, key: ObjKey) -> Result<()> {
        let (pos, row_ndx) = self
            .locate(alloc, key)?
            .ok_or(StoreError::KeyNotFound)?;
        let top = self.read_top(alloc)?;
        let cluster = self.make_cluster_writable(alloc, pos, top.clusters[pos])?;
        let slots = read_cluster(alloc, cluster)?;
        let mut remaining = 0;
        for slot in 0..slots.len() {
            let leaf = writable_leaf(alloc, cluster, slot)?;
            remaining = alloc.write(leaf, |slab| {
                if let Slab::Leaf(leaf) = slab {
                    leaf.erase(row_ndx);
                    leaf.len()
                } else {
                    0
                }
            })?;
        }
        self.make_top_writable(alloc)?;
        alloc.write(self.top, |slab| {
            if let Slab::Top(top) = slab {
                top.size -= 1;
                if remaining == 0 {
                    top.clusters.remove(pos);
                }
            }
        })?;
        if remaining == 0 {
            for leaf in read_cluster(alloc, cluster)? {
                alloc.free(leaf);
            }
            alloc.free(cluster);
        }
        alloc.bump_storage_version();
        alloc.bump_content_version();
        Ok(())
    }

    pub fn clear(&mut self, alloc: &Alloc) -> Result<()> {
        let top = self.read_top(alloc)?;
        for cluster in &top.clusters {
            for leaf in read_cluster(alloc, *cluster)? {
                alloc.free(leaf);
            }
            alloc.free(*cluster);
        }
        self.make_top_writable(alloc)?;
        alloc.write(self.top, |slab| {
            if let Slab::Top(top) = slab {
                top.clusters.clear();
                top.size = 0;
            }
        })?;
        alloc.bump_storage_version();
        alloc.bump_content_version();
        Ok(())
    }

    /// Duplicates the row's cluster if a shared snapshot still owns
    /// it, returning the (possibly relocated) row position.
    pub fn ensure_writeable(&mut self, alloc: &Alloc, key: ObjKey) -> Result<RowHandle> {
        let (pos, index) = self
            .locate(alloc, key)?
            .ok_or(StoreError::KeyNotFound)?;
        let top = self.read_top(alloc)?;
        let mem = self.make_cluster_writable(alloc, pos, top.clusters[pos])?;
        Ok(RowHandle { mem, index })
    }

    /// Appends a column leaf to every cluster; returns the new
    /// column's leaf index.
    pub fn insert_column(&mut self, alloc: &Alloc, kind: LeafKind) -> Result<u32> {
        let idx = self.layout.len() as u32;
        self.layout.push(kind);
        let top = self.read_top(alloc)?;
        for (pos, cluster) in top.clusters.iter().enumerate() {
            let len = Self::keys_of(alloc, *cluster)?.len();
            let cluster = self.make_cluster_writable(alloc, pos, *cluster)?;
            let leaf = alloc.alloc(Slab::Leaf(ColumnLeaf::with_len(kind, len)));
            alloc.write(cluster, |slab| {
                if let Slab::Cluster(slots) = slab {
                    slots.push(leaf);
                }
            })?;
        }
        alloc.bump_storage_version();
        Ok(idx)
    }
}

pub(crate) fn read_cluster(alloc: &Alloc, cluster: Ref) -> Result<Vec<Ref>> {
    alloc.read(cluster, |slab| match slab {
        Slab::Cluster(slots) => Ok(slots.clone()),
        _ => Err(StoreError::Corruption("cluster slab kind mismatch")),
    })?
}

fn cluster_slot(alloc: &Alloc, cluster: Ref, slot: usize) -> Result<Ref> {
    alloc.read(cluster, |slab| match slab {
        Slab::Cluster(slots) => slots
            .get(slot)
            .copied()
            .ok_or(StoreError::Corruption("cluster slot out of range")),
        _ => Err(StoreError::Corruption("cluster slab kind mismatch")),
    })?
}

/// Resolves the leaf at `slot`, duplicating it first if a shared
/// snapshot still owns it. The cluster itself must be writable.
fn writable_leaf(alloc: &Alloc, cluster: Ref, slot: usize) -> Result<Ref> {
    let leaf = cluster_slot(alloc, cluster, slot)?;
    if !alloc.is_read_only(leaf) {
        return Ok(leaf);
    }
    let new_leaf = alloc.dup(leaf)?;
    alloc.write(cluster, |slab| {
        if let Slab::Cluster(slots) = slab {
            slots[slot] = new_leaf;
        }
    })?;
    Ok(new_leaf)
}

/// Reads the key stored at a row position.
pub(crate) fn row_key(alloc: &Alloc, handle: RowHandle) -> Result<ObjKey> {
    let keys_ref = cluster_slot(alloc, handle.mem, 0)?;
    alloc.read(keys_ref, |slab| match slab {
        Slab::Leaf(leaf) => leaf.get_key(handle.index),
        _ => Err(StoreError::Corruption("keys leaf kind mismatch")),
    })?
}

/// Reads the cell of column `idx` at a row position, null surfaced
/// uniformly and links unfiltered.
pub(crate) fn read_cell(alloc: &Alloc, handle: RowHandle, idx: u32) -> Result<Mixed> {
    let leaf = cluster_slot(alloc, handle.mem, idx as usize + 1)?;
    alloc.read(leaf, |slab| match slab {
        Slab::Leaf(leaf) => Ok(leaf.get(handle.index)),
        _ => Err(StoreError::Corruption("cluster slot kind mismatch")),
    })?
}

pub(crate) fn cell_is_null(alloc: &Alloc, handle: RowHandle, idx: u32) -> Result<bool> {
    let leaf = cluster_slot(alloc, handle.mem, idx as usize + 1)?;
    alloc.read(leaf, |slab| match slab {
        Slab::Leaf(leaf) => Ok(leaf.is_null(handle.index)),
        _ => Err(StoreError::Corruption("cluster slot kind mismatch")),
    })?
}

fn with_writable_cell<R>(
    alloc: &Alloc,
    handle: RowHandle,
    idx: u32,
    f: impl FnOnce(&mut ColumnLeaf) -> Result<R>,
) -> Result<R> {
    let leaf = writable_leaf(alloc, handle.mem, idx as usize + 1)?;
    alloc.write(leaf, |slab| match slab {
        Slab::Leaf(leaf) => f(leaf),
        _ => Err(StoreError::Corruption("cluster slot kind mismatch")),
    })?
}

pub(crate) fn write_cell(alloc: &Alloc, handle: RowHandle, idx: u32, value: &Mixed) -> Result<()> {
    with_writable_cell(alloc, handle, idx, |leaf| leaf.set(handle.index, value))
}

pub(crate) fn write_cell_null(alloc: &Alloc, handle: RowHandle, idx: u32) -> Result<()> {
    with_writable_cell(alloc, handle, idx, |leaf| leaf.set_null(handle.index))
}

pub(crate) fn read_ref_cell(alloc: &Alloc, handle: RowHandle, idx: u32) -> Result<Ref> {
    let leaf = cluster_slot(alloc, handle.mem, idx as usize + 1)?;
    let raw = alloc.read(leaf, |slab| match slab {
        Slab::Leaf(leaf) => leaf.get_ref(handle.index),
        _ => Err(StoreError::Corruption("cluster slot kind mismatch")),
    })??;
    Ok(Ref(raw))
}

pub(crate) fn write_ref_cell(alloc: &Alloc, handle: RowHandle, idx: u32, r: Ref) -> Result<()> {
    with_writable_cell(alloc, handle, idx, |leaf| leaf.set_ref(handle.index, r.0))
}

pub(crate) fn backlink_count(alloc: &Alloc, handle: RowHandle, idx: u32) -> Result<usize> {
    let leaf = cluster_slot(alloc, handle.mem, idx as usize + 1)?;
    alloc.read(leaf, |slab| match slab {
        Slab::Leaf(leaf) => leaf.backlink_count(handle.index),
        _ => Err(StoreError::Corruption("cluster slot kind mismatch")),
    })?
}

pub(crate) fn backlink_get(
    alloc: &Alloc,
    handle: RowHandle,
    idx: u32,
    backlink_ndx: usize,
) -> Result<ObjKey> {
    let leaf = cluster_slot(alloc, handle.mem, idx as usize + 1)?;
    alloc.read(leaf, |slab| match slab {
        Slab::Leaf(leaf) => leaf.backlink_get(handle.index, backlink_ndx),
        _ => Err(StoreError::Corruption("cluster slot kind mismatch")),
    })?
}

pub(crate) fn backlink_all(alloc: &Alloc, handle: RowHandle, idx: u32) -> Result<Vec<ObjKey>> {
    let leaf = cluster_slot(alloc, handle.mem, idx as usize + 1)?;
    alloc.read(leaf, |slab| match slab {
        Slab::Leaf(leaf) => leaf.backlink_all(handle.index),
        _ => Err(StoreError::Corruption("cluster slot kind mismatch")),
    })?
}

pub(crate) fn backlink_add(
    alloc: &Alloc,
    handle: RowHandle,
    idx: u32,
    origin: ObjKey,
) -> Result<()> {
    with_writable_cell(alloc, handle, idx, |leaf| {
        leaf.backlink_add(handle.index, origin)
    })
}

pub(crate) fn backlink_remove_one(
    alloc: &Alloc,
    handle: RowHandle,
    idx: u32,
    origin: ObjKey,
) -> Result<bool> {
    with_writable_cell(alloc, handle, idx, |leaf| {
        leaf.backlink_remove_one(handle.index, origin)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_tree(alloc: &Alloc, fanout: usize) -> ClusterTree {
        ClusterTree::create(alloc, vec![LeafKind::Int], fanout)
    }

    #[test]
    fn insert_get_erase_roundtrip() {
        let alloc = Alloc::new();
        let mut tree = int_tree(&alloc, 4);
        for raw in [5i64, 1, 3, 2, 4] {
            tree.insert(&alloc, ObjKey::from_raw(raw), &[(0, Mixed::Int(raw * 10))])
                .unwrap();
        }
        assert_eq!(tree.size(&alloc).unwrap(), 5);
        let handle = tree.get(&alloc, ObjKey::from_raw(3)).unwrap();
        assert_eq!(read_cell(&alloc, handle, 0).unwrap(), Mixed::Int(30));

        // Iteration comes back in key order regardless of insert order.
        let keys: Vec<i64> = (0..5)
            .map(|pos| tree.get_at(&alloc, pos).unwrap().0.raw())
            .collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);

        tree.erase(&alloc, ObjKey::from_raw(3)).unwrap();
        assert!(matches!(
            tree.get(&alloc, ObjKey::from_raw(3)),
            Err(StoreError::KeyNotFound)
        ));
        assert_eq!(tree.size(&alloc).unwrap(), 4);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let alloc = Alloc::new();
        let mut tree = int_tree(&alloc, 4);
        tree.insert(&alloc, ObjKey::from_raw(1), &[]).unwrap();
        assert!(matches!(
            tree.insert(&alloc, ObjKey::from_raw(1), &[]),
            Err(StoreError::KeyAlreadyUsed)
        ));
    }

    #[test]
    fn split_keeps_rows_reachable() {
        let alloc = Alloc::new();
        let mut tree = int_tree(&alloc, 4);
        for raw in 0..64 {
            tree.insert(&alloc, ObjKey::from_raw(raw), &[(0, Mixed::Int(raw))])
                .unwrap();
        }
        for raw in 0..64 {
            let handle = tree.get(&alloc, ObjKey::from_raw(raw)).unwrap();
            assert_eq!(read_cell(&alloc, handle, 0).unwrap(), Mixed::Int(raw));
        }
    }

    #[test]
    fn freeze_then_write_relocates_cluster() {
        let alloc = Alloc::new();
        let mut tree = int_tree(&alloc, 8);
        let before = tree
            .insert(&alloc, ObjKey::from_raw(1), &[(0, Mixed::Int(1))])
            .unwrap();
        alloc.freeze();
        let after = tree.ensure_writeable(&alloc, ObjKey::from_raw(1)).unwrap();
        assert_ne!(before.mem, after.mem);
        write_cell(&alloc, after, 0, &Mixed::Int(2)).unwrap();
        // The frozen snapshot still sees the old value.
        assert_eq!(read_cell(&alloc, before, 0).unwrap(), Mixed::Int(1));
        assert_eq!(read_cell(&alloc, after, 0).unwrap(), Mixed::Int(2));
    }

    #[test]
    fn insert_column_extends_existing_rows() {
        let alloc = Alloc::new();
        let mut tree = int_tree(&alloc, 8);
        tree.insert(&alloc, ObjKey::from_raw(1), &[]).unwrap();
        let idx = tree.insert_column(&alloc, LeafKind::String).unwrap();
        assert_eq!(idx, 1);
        let handle = tree.get(&alloc, ObjKey::from_raw(1)).unwrap();
        assert_eq!(read_cell(&alloc, handle, idx).unwrap(), Mixed::Null);
    }
}
