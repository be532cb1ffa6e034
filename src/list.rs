use crate::alloc::{Ref, Slab};
use crate::cascade::{CascadeMode, CascadeState};
use crate::error::{Result, StoreError};
use crate::keys::{ColKey, ObjKey, ObjLink};
use crate::obj::Obj;
use crate::replication::Instruction;
use crate::table::Table;

use std::sync::Arc;

/// Accessor for a link-list column cell.
///
/// The cell stores a ref to a key-list slab, created lazily on first
/// insertion. Every mutation keeps the reverse edges on the target
/// table in step and cascades orphaned embedded targets.
pub struct LinkList {
    obj: Obj,
    col: ColKey,
}

impl LinkList {
    pub(crate) fn new(obj: Obj, col: ColKey) -> Self {
        LinkList { obj, col }
    }

    pub fn obj(&self) -> &Obj {
        &self.obj
    }

    fn target_table(&self) -> Result<Arc<Table>> {
        self.obj.target_table(self.col)
    }

    fn keys_raw(&self) -> Result<Vec<i64>> {
        let store = self.obj.store()?;
        let r = self.obj.get_ref_cell(self.col)?;
        if r.is_null() {
            return Ok(Vec::new());
        }
        store.alloc.read(r, |slab| match slab {
            Slab::KeyList(keys) => Ok(keys.clone()),
            _ => Err(StoreError::Corruption("list slab kind mismatch")),
        })?
    }

    /// Resolves the list slab for writing, creating it on first use
    /// and duplicating it when a shared snapshot still owns it.
    fn writable_list(&self) -> Result<Ref> {
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        let r = self.obj.get_ref_cell(self.col)?;
        if r.is_null() {
            let fresh = alloc.alloc(Slab::KeyList(Vec::new()));
            self.obj.set_ref_cell(self.col, fresh)?;
            return Ok(fresh);
        }
        if alloc.is_read_only(r) {
            let copy = alloc.dup(r)?;
            self.obj.set_ref_cell(self.col, copy)?;
            return Ok(copy);
        }
        Ok(r)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.keys_raw()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.keys_raw()?.is_empty())
    }

    /// The key at `ndx`; a tombstone entry reads as the null key.
    pub fn get(&self, ndx: usize) -> Result<ObjKey> {
        let keys = self.keys_raw()?;
        let raw = *keys.get(ndx).ok_or(StoreError::KeyNotFound)?;
        let key = ObjKey::from_raw(raw);
        Ok(if key.is_unresolved() { ObjKey::NULL } else { key })
    }

    /// The object at `ndx`, if the entry is not a tombstone.
    pub fn get_object(&self, ndx: usize) -> Result<Option<Obj>> {
        let key = self.get(ndx)?;
        if key.is_null() {
            return Ok(None);
        }
        Ok(Some(self.target_table()?.get_object(key)?))
    }

    /// First position holding `key`, unfiltered.
    pub fn find_first(&self, key: ObjKey) -> Result<Option<usize>> {
        Ok(self
            .keys_raw()?
            .iter()
            .position(|raw| *raw == key.raw()))
    }

    pub(crate) fn unfiltered_keys(&self) -> Result<Vec<ObjKey>> {
        Ok(self
            .keys_raw()?
            .iter()
            .map(|raw| ObjKey::from_raw(*raw))
            .collect())
    }

    fn validate_target(&self, target: ObjKey) -> Result<Arc<Table>> {
        let target_table = self.target_table()?;
        if target.is_null() {
            return Err(StoreError::NotNullable);
        }
        if !target_table.is_valid(target) {
            return Err(StoreError::TargetOutOfRange);
        }
        if target_table.is_embedded() {
            let obj = target_table.get_object(target)?;
            if obj.backlink_count()? > 0 {
                return Err(StoreError::WrongTableKind);
            }
        }
        Ok(target_table)
    }

    pub fn add(&self, target: ObjKey) -> Result<()> {
        let len = self.len()?;
        self.insert(len, target)
    }

    /// Allocates a row in the link target and inserts it at `ndx`;
    /// the entry point for putting embedded rows into a list.
    pub fn create_and_insert_linked_object(&self, ndx: usize) -> Result<Obj> {
        let target_table = self.target_table()?;
        let result = if target_table.is_embedded() {
            target_table.create_linked_object()?
        } else {
            target_table.create_object()?
        };
        self.insert(ndx, result.key())?;
        Ok(result)
    }

    pub fn insert(&self, ndx: usize, target: ObjKey) -> Result<()> {
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        self.obj.check_valid()?;
        let target_table = self.validate_target(target)?;
        if ndx > self.len()? {
            return Err(StoreError::KeyNotFound);
        }
        self.obj.ensure_writeable()?;
        self.obj
            .set_backlink(self.col, ObjLink::new(target_table.key(), target))?;
        let list = self.writable_list()?;
        alloc.write(list, |slab| {
            if let Slab::KeyList(keys) = slab {
                keys.insert(ndx, target.raw());
            }
        })?;
        alloc.bump_content_version();
        Ok(())
    }

    /// Replaces the entry at `ndx`, cascading an orphaned embedded
    /// target of the old entry.
    pub fn set(&self, ndx: usize, target: ObjKey) -> Result<()> {
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        self.obj.check_valid()?;
        let target_table = self.validate_target(target)?;
        let keys = self.keys_raw()?;
        let old = ObjKey::from_raw(*keys.get(ndx).ok_or(StoreError::KeyNotFound)?);
        if old == target {
            return Ok(());
        }
        let mut state = CascadeState::new(CascadeMode::Strong);
        self.obj.ensure_writeable()?;
        let table_key = target_table.key();
        let recurse = self.obj.replace_backlink(
            self.col,
            ObjLink::new(table_key, old),
            ObjLink::new(table_key, target),
            &mut state,
        )?;
        let list = self.writable_list()?;
        alloc.write(list, |slab| {
            if let Slab::KeyList(keys) = slab {
                keys[ndx] = target.raw();
            }
        })?;
        alloc.bump_content_version();
        if recurse {
            store.remove_recursive(&mut state)?;
        }
        Ok(())
    }

    /// Removes the entry at `ndx`, cascading an orphaned embedded
    /// target.
    pub fn remove(&self, ndx: usize) -> Result<()> {
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        self.obj.check_valid()?;
        let keys = self.keys_raw()?;
        let old = ObjKey::from_raw(*keys.get(ndx).ok_or(StoreError::KeyNotFound)?);
        let target_table = self.target_table()?;
        let mut state = CascadeState::new(CascadeMode::Strong);
        self.obj.ensure_writeable()?;
        let recurse = self.obj.remove_backlink(
            self.col,
            ObjLink::new(target_table.key(), old),
            &mut state,
        )?;
        let list = self.writable_list()?;
        alloc.write(list, |slab| {
            if let Slab::KeyList(keys) = slab {
                keys.remove(ndx);
            }
        })?;
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            repl.emit(Instruction::ListErase {
                table: self.obj.table().key(),
                col: self.col,
                key: self.obj.key(),
                ndx,
            });
        }
        if recurse {
            store.remove_recursive(&mut state)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        let mut len = self.len()?;
        while len > 0 {
            self.remove(len - 1)?;
            len -= 1;
        }
        Ok(())
    }

    /// Erases the entry at `ndx` without reverse-edge upkeep; used
    /// when the target itself is going away.
    pub(crate) fn nullify(&self, ndx: usize) -> Result<()> {
        let store = self.obj.store()?;
        let alloc = &store.alloc;
        let list = self.writable_list()?;
        alloc.write(list, |slab| {
            if let Slab::KeyList(keys) = slab {
                keys.remove(ndx);
            }
        })?;
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            repl.emit(Instruction::LinkListNullify {
                table: self.obj.table().key(),
                col: self.col,
                key: self.obj.key(),
                ndx,
            });
        }
        Ok(())
    }

    /// Frees the list slab; for rows that are being erased.
    pub(crate) fn free_storage(&self) -> Result<()> {
        let store = self.obj.store()?;
        let r = self.obj.get_ref_cell(self.col)?;
        if !r.is_null() {
            store.alloc.free(r);
        }
        Ok(())
    }
}
