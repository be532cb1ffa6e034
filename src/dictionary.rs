use std::cell::{Cell, RefCell};

use crate::cascade::{CascadeMode, CascadeState};
use crate::cluster::{self, ClusterTree};
use crate::error::{Result, StoreError};
use crate::keys::{ColKey, ObjKey, ObjLink};
use crate::leaf::LeafKind;
use crate::obj::Obj;
use crate::value::{ColumnType, Mixed};

const KEY_COL: u32 = 0;
const VALUE_COL: u32 = 1;
const INNER_KEY_MASK: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// Key/value map stored as the payload of a single column cell.
///
/// The cell holds a ref to a nested cluster tree with two leaf
/// columns per row: the user key (`Int` or `String`, matching the
/// column's declared key type) and a `Mixed` value. Rows are keyed by
/// the 63-bit hash of the user key, so iteration runs in hash order,
/// not insertion order — and two distinct keys whose hashes collide
/// share one slot: the later insert overwrites the earlier entry.
pub struct Dictionary {
    obj: Obj,
    col: ColKey,
    tree: RefCell<Option<ClusterTree>>,
    content_version: Cell<u64>,
}

fn inner_key(user_key: &Mixed) -> ObjKey {
    ObjKey::from_raw((user_key.hash() & INNER_KEY_MASK) as i64)
}

impl Dictionary {
    pub(crate) fn new(obj: Obj, col: ColKey) -> Self {
        Dictionary {
            obj,
            col,
            tree: RefCell::new(None),
            content_version: Cell::new(0),
        }
    }

    pub fn obj(&self) -> &Obj {
        &self.obj
    }

    /// Declared key type of this dictionary.
    pub fn key_type(&self) -> ColumnType {
        self.col.column_type()
    }

    fn layout(&self) -> Vec<LeafKind> {
        let key_kind = match self.col.column_type() {
            ColumnType::String => LeafKind::String,
            _ => LeafKind::Int,
        };
        vec![key_kind, LeafKind::Mixed]
    }

    /// Re-reads the root ref from the owning cell when the content
    /// version moved; the cell may have been rewritten or the row
    /// copied under us.
    fn update_if_needed(&self) -> Result<()> {
        let store = self.obj.store()?;
        let version = store.alloc.content_version();
        if version != self.content_version.get() {
            self.init_from_parent()?;
            self.content_version.set(version);
        }
        Ok(())
    }

    fn init_from_parent(&self) -> Result<()> {
        let r = self.obj.get_ref_cell(self.col)?;
        *self.tree.borrow_mut() = if r.is_null() {
            None
        } else {
            let store = self.obj.store()?;
            Some(ClusterTree::attach(
                r,
                self.layout(),
                store.opts.cluster_fanout,
            ))
        };
        Ok(())
    }

    /// Lazily creates the inner tree on first insert.
    fn create(&self) -> Result<()> {
        if self.tree.borrow().is_some() {
            return Ok(());
        }
        let store = self.obj.store()?;
        let tree = ClusterTree::create(&store.alloc, self.layout(), store.opts.cluster_fanout);
        self.obj.set_ref_cell(self.col, tree.top())?;
        *self.tree.borrow_mut() = Some(tree);
        self.content_version.set(store.alloc.content_version());
        Ok(())
    }

    fn tree(&self) -> Result<Option<ClusterTree>> {
        self.update_if_needed()?;
        Ok(self.tree.borrow().clone())
    }

    /// Writes back a possibly relocated root and refreshes the stamp.
    fn persist(&self, tree: ClusterTree) -> Result<()> {
        let store = self.obj.store()?;
        let current = self.obj.get_ref_cell(self.col)?;
        if current != tree.top() {
            self.obj.set_ref_cell(self.col, tree.top())?;
        }
        *self.tree.borrow_mut() = Some(tree);
        store.alloc.bump_content_version();
        self.content_version.set(store.alloc.content_version());
        Ok(())
    }

    fn check_key(&self, key: &Mixed) -> Result<()> {
        if key.column_type() != Some(self.col.column_type()) {
            return Err(StoreError::WrongType);
        }
        Ok(())
    }

    fn check_value(&self, value: &Mixed) -> Result<()> {
        let store = self.obj.store()?;
        match value {
            // A mixed value cannot name a table by itself.
            Mixed::Link(_) => Err(StoreError::IllegalType),
            Mixed::TypedLink(link) => store.validate_link(*link),
            _ => Ok(()),
        }
    }

    pub fn len(&self) -> Result<u64> {
        let store = self.obj.store()?;
        match self.tree()? {
            Some(tree) => tree.size(&store.alloc),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Inserts or overwrites; returns the entry's position and whether
    /// a new entry was created. Link values keep the reverse edge on
    /// their target in step.
    pub fn insert(
        &self,
        key: impl Into<Mixed>,
        value: impl Into<Mixed>,
    ) -> Result<(u64, bool)> {
        let key = key.into();
        let value = value.into();
        self.obj.check_valid()?;
        self.check_key(&key)?;
        self.check_value(&value)?;
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        self.update_if_needed()?;
        self.create()?;
        let mut tree = self
            .tree
            .borrow()
            .clone()
            .ok_or(StoreError::Corruption("inner tree missing"))?;
        let k = inner_key(&key);
        let inserted = match tree.insert(
            alloc,
            k,
            &[(KEY_COL, key.clone()), (VALUE_COL, value.clone())],
        ) {
            Ok(_) => {
                if let Mixed::TypedLink(link) = value {
                    self.obj.set_backlink(self.col, link)?;
                }
                true
            }
            // The documented duplicate-key path: overwrite in place.
            Err(StoreError::KeyAlreadyUsed) => {
                let handle = tree.ensure_writeable(alloc, k)?;
                let old = cluster::read_cell(alloc, handle, VALUE_COL)?;
                if let Mixed::TypedLink(old_link) = old {
                    let mut state = CascadeState::new(CascadeMode::None);
                    self.obj.remove_backlink(self.col, old_link, &mut state)?;
                }
                cluster::write_cell(alloc, handle, VALUE_COL, &value)?;
                if let Mixed::TypedLink(link) = value {
                    self.obj.set_backlink(self.col, link)?;
                }
                false
            }
            Err(err) => return Err(err),
        };
        let pos = tree.get_ndx(alloc, k)?;
        self.persist(tree)?;
        Ok((pos, inserted))
    }

    /// Looks a key up; `KeyNotFound` when absent.
    pub fn get(&self, key: &Mixed) -> Result<Mixed> {
        self.check_key(key)?;
        let store = self.obj.store()?;
        let tree = self.tree()?.ok_or(StoreError::KeyNotFound)?;
        let handle = tree.get(&store.alloc, inner_key(key))?;
        cluster::read_cell(&store.alloc, handle, VALUE_COL)
    }

    /// Get-or-insert-null: returns the stored value, inserting (and
    /// returning) null when the key was absent.
    pub fn get_or_insert_null(&self, key: impl Into<Mixed>) -> Result<Mixed> {
        let key = key.into();
        match self.get(&key) {
            Ok(value) => Ok(value),
            Err(StoreError::KeyNotFound) => {
                self.insert(key, Mixed::Null)?;
                Ok(Mixed::Null)
            }
            Err(err) => Err(err),
        }
    }

    /// Position of a key, `None` when absent.
    pub fn find(&self, key: &Mixed) -> Result<Option<u64>> {
        self.check_key(key)?;
        let store = self.obj.store()?;
        match self.tree()? {
            Some(tree) => match tree.get_ndx(&store.alloc, inner_key(key)) {
                Ok(pos) => Ok(Some(pos)),
                Err(StoreError::KeyNotFound) => Ok(None),
                Err(err) => Err(err),
            },
            None => Ok(None),
        }
    }

    fn erase_inner(&self, k: ObjKey) -> Result<()> {
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        let mut tree = self.tree()?.ok_or(StoreError::KeyNotFound)?;
        let handle = tree.get(alloc, k)?;
        let old = cluster::read_cell(alloc, handle, VALUE_COL)?;
        if let Mixed::TypedLink(old_link) = old {
            // Dictionary values never trigger cascade.
            let mut state = CascadeState::new(CascadeMode::None);
            self.obj.remove_backlink(self.col, old_link, &mut state)?;
        }
        tree.erase(alloc, k)?;
        self.persist(tree)
    }

    pub fn erase(&self, key: &Mixed) -> Result<()> {
        self.obj.check_valid()?;
        self.check_key(key)?;
        self.erase_inner(inner_key(key))
    }

    /// Erases the entry at a position previously returned by `find`
    /// or `insert`.
    pub fn erase_at(&self, pos: u64) -> Result<()> {
        self.obj.check_valid()?;
        let store = self.obj.store()?;
        let tree = self.tree()?.ok_or(StoreError::KeyNotFound)?;
        let (k, _) = tree.get_at(&store.alloc, pos)?;
        self.erase_inner(k)
    }

    pub fn clear(&self) -> Result<()> {
        self.obj.check_valid()?;
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        let Some(mut tree) = self.tree()? else {
            return Ok(());
        };
        let size = tree.size(alloc)?;
        for pos in 0..size {
            let (_, handle) = tree.get_at(alloc, pos)?;
            if let Mixed::TypedLink(old_link) = cluster::read_cell(alloc, handle, VALUE_COL)? {
                let mut state = CascadeState::new(CascadeMode::None);
                self.obj.remove_backlink(self.col, old_link, &mut state)?;
            }
        }
        tree.clear(alloc)?;
        self.persist(tree)
    }

    /// Sets the value under `key` to null without removing the entry.
    pub fn nullify(&self, key: &Mixed) -> Result<()> {
        self.obj.check_valid()?;
        self.check_key(key)?;
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        let mut tree = self.tree()?.ok_or(StoreError::KeyNotFound)?;
        let k = inner_key(key);
        let handle = tree.ensure_writeable(alloc, k)?;
        if let Mixed::TypedLink(old_link) = cluster::read_cell(alloc, handle, VALUE_COL)? {
            let mut state = CascadeState::new(CascadeMode::None);
            self.obj.remove_backlink(self.col, old_link, &mut state)?;
        }
        cluster::write_cell(alloc, handle, VALUE_COL, &Mixed::Null)?;
        self.persist(tree)
    }

    /// Iterates `(key, value)` pairs in cluster order (derived-hash
    /// order, not insertion order).
    pub fn iter(&self) -> Result<DictionaryIter<'_>> {
        let size = self.len()?;
        Ok(DictionaryIter {
            dict: self,
            pos: 0,
            size,
        })
    }

    fn entry_at(&self, pos: u64) -> Result<(Mixed, Mixed)> {
        let store = self.obj.store()?;
        let tree = self.tree()?.ok_or(StoreError::KeyNotFound)?;
        let (_, handle) = tree.get_at(&store.alloc, pos)?;
        let key = cluster::read_cell(&store.alloc, handle, KEY_COL)?;
        let value = cluster::read_cell(&store.alloc, handle, VALUE_COL)?;
        Ok((key, value))
    }

    /// Clears every value equal to `target` without reverse-edge
    /// upkeep; used when the target row is going away.
    pub(crate) fn nullify_links_to(&self, target: ObjLink) -> Result<()> {
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        let Some(mut tree) = self.tree()? else {
            return Ok(());
        };
        let size = tree.size(alloc)?;
        let expected = Mixed::TypedLink(target);
        let mut touched = false;
        for pos in 0..size {
            let (k, handle) = tree.get_at(alloc, pos)?;
            if cluster::read_cell(alloc, handle, VALUE_COL)? == expected {
                let handle = tree.ensure_writeable(alloc, k)?;
                cluster::write_cell(alloc, handle, VALUE_COL, &Mixed::Null)?;
                touched = true;
            }
        }
        if touched {
            self.persist(tree)?;
        }
        Ok(())
    }

    /// Re-points every value equal to `old` at `new`; the reverse
    /// edges follow through the regular insert path.
    pub(crate) fn repoint_links(&self, old: ObjLink, new: ObjLink) -> Result<()> {
        let expected = Mixed::TypedLink(old);
        let mut keys = Vec::new();
        for entry in self.iter()? {
            let (key, value) = entry?;
            if value == expected {
                keys.push(key);
            }
        }
        for key in keys {
            self.insert(key, Mixed::TypedLink(new))?;
        }
        Ok(())
    }

    /// Frees the inner tree storage; for rows that are being erased.
    /// Reverse edges of link values are the caller's concern.
    pub(crate) fn free_storage(&self) -> Result<()> {
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        let Some(mut tree) = self.tree()? else {
            return Ok(());
        };
        tree.clear(alloc)?;
        alloc.free(tree.top());
        *self.tree.borrow_mut() = None;
        Ok(())
    }
}

pub struct DictionaryIter<'a> {
    dict: &'a Dictionary,
    pos: u64,
    size: u64,
}

impl Iterator for DictionaryIter<'_> {
    type Item = Result<(Mixed, Mixed)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.size {
            return None;
        }
        let entry = self.dict.entry_at(self.pos);
        self.pos += 1;
        Some(entry)
    }
}
