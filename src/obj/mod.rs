use std::cell::Cell;
use std::sync::Arc;

use crate::alloc::Ref;
use crate::cascade::{CascadeMode, CascadeState};
use crate::cluster::{self, RowHandle};
use crate::dictionary::Dictionary;
use crate::error::{Result, StoreError};
use crate::keys::{ColKey, ObjKey, ObjLink};
use crate::list::LinkList;
use crate::replication::Instruction;
use crate::store::StoreInner;
use crate::table::Table;
use crate::value::{ColumnType, Decimal, Mixed, ObjectId, Timestamp};

mod json;
mod links;
mod path;

pub use json::UNLIMITED_LINK_DEPTH;
pub use path::{FatPathElement, Path, PathElement};

/// Conversion from a stored cell to a typed value.
///
/// `Option<T>` maps null to `None`; bare types fail with `NullValue`
/// on a null cell. Link cells convert to `ObjKey` (the null key for a
/// null cell), typed links to `ObjLink`.
pub trait Property: Sized {
    fn column_type() -> ColumnType;
    fn from_mixed(value: Mixed) -> Result<Self>;
}

macro_rules! scalar_property {
    ($ty:ty, $col:ident, $variant:ident) => {
        impl Property for $ty {
            fn column_type() -> ColumnType {
                ColumnType::$col
            }

            fn from_mixed(value: Mixed) -> Result<Self> {
                match value {
                    Mixed::$variant(v) => Ok(v),
                    Mixed::Null => Err(StoreError::NullValue),
                    _ => Err(StoreError::WrongType),
                }
            }
        }
    };
}

scalar_property!(i64, Int, Int);
scalar_property!(bool, Bool, Bool);
scalar_property!(f32, Float, Float);
scalar_property!(f64, Double, Double);
scalar_property!(String, String, String);
scalar_property!(Vec<u8>, Binary, Binary);
scalar_property!(Timestamp, Timestamp, Timestamp);
scalar_property!(Decimal, Decimal, Decimal);
scalar_property!(ObjectId, ObjectId, ObjectId);

impl Property for ObjKey {
    fn column_type() -> ColumnType {
        ColumnType::Link
    }

    fn from_mixed(value: Mixed) -> Result<Self> {
        match value {
            Mixed::Link(key) => Ok(key),
            Mixed::Null => Ok(ObjKey::NULL),
            _ => Err(StoreError::WrongType),
        }
    }
}

impl Property for ObjLink {
    fn column_type() -> ColumnType {
        ColumnType::TypedLink
    }

    fn from_mixed(value: Mixed) -> Result<Self> {
        match value {
            Mixed::TypedLink(link) => Ok(link),
            Mixed::Null => Ok(ObjLink::NULL),
            _ => Err(StoreError::WrongType),
        }
    }
}

impl Property for Mixed {
    fn column_type() -> ColumnType {
        ColumnType::Mixed
    }

    fn from_mixed(value: Mixed) -> Result<Self> {
        Ok(value)
    }
}

impl<T: Property> Property for Option<T> {
    fn column_type() -> ColumnType {
        T::column_type()
    }

    fn from_mixed(value: Mixed) -> Result<Self> {
        match value {
            Mixed::Null => Ok(None),
            other => T::from_mixed(other).map(Some),
        }
    }
}

/// Accessor for a single row.
///
/// The accessor is a view: the authoritative state lives in the
/// table's cluster tree, and the cached row position revalidates
/// against the arena's storage version before every operation. An
/// accessor whose row disappears reports `ObjectNotAlive` and never
/// becomes valid again.
#[derive(Clone)]
pub struct Obj {
    table: Arc<Table>,
    key: ObjKey,
    mem: Cell<Ref>,
    row_ndx: Cell<usize>,
    storage_version: Cell<u64>,
    valid: Cell<bool>,
}

impl Obj {
    pub(crate) fn new(table: Arc<Table>, key: ObjKey, handle: RowHandle, version: u64) -> Self {
        Obj {
            table,
            key,
            mem: Cell::new(handle.mem),
            row_ndx: Cell::new(handle.index),
            storage_version: Cell::new(version),
            valid: Cell::new(true),
        }
    }

    pub fn key(&self) -> ObjKey {
        self.key
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// This row as a global link.
    pub fn get_link(&self) -> ObjLink {
        ObjLink::new(self.table.key(), self.key)
    }

    pub(crate) fn store(&self) -> Result<Arc<StoreInner>> {
        self.table.store()
    }

    pub(crate) fn handle(&self) -> RowHandle {
        RowHandle {
            mem: self.mem.get(),
            index: self.row_ndx.get(),
        }
    }

    /// Whether the row is still reachable. Once false, always false.
    pub fn is_valid(&self) -> bool {
        if !self.valid.get() {
            return false;
        }
        let alive = match self.store() {
            Ok(store) => {
                store.alloc.storage_version() == self.storage_version.get()
                    || self.table.is_valid(self.key)
            }
            Err(_) => false,
        };
        self.valid.set(alive);
        alive
    }

    pub(crate) fn check_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(StoreError::ObjectNotAlive)
        }
    }

    /// Re-resolves the cached row position when the arena has been
    /// reshaped since it was cached.
    pub(crate) fn update_if_needed(&self) -> Result<bool> {
        let store = self.store()?;
        if store.alloc.storage_version() == self.storage_version.get() {
            return Ok(false);
        }
        let tree = self.table.tree_for(self.key);
        let handle = tree.get(&store.alloc, self.key).map_err(|_| {
            self.valid.set(false);
            StoreError::ObjectNotAlive
        })?;
        let changed = handle.mem != self.mem.get() || handle.index != self.row_ndx.get();
        self.mem.set(handle.mem);
        self.row_ndx.set(handle.index);
        self.storage_version.set(store.alloc.storage_version());
        Ok(changed)
    }

    /// Copy-on-write step: when the cached cluster belongs to a shared
    /// snapshot, duplicate it and re-point the cache at the copy.
    pub(crate) fn ensure_writeable(&self) -> Result<()> {
        let store = self.store()?;
        let alloc = &store.alloc;
        if alloc.is_read_only(self.mem.get()) {
            let mut tree = self.table.tree_for(self.key);
            let handle = tree.ensure_writeable(alloc, self.key)?;
            self.table.save_tree(self.key, &tree);
            self.mem.set(handle.mem);
            self.row_ndx.set(handle.index);
            self.storage_version.set(alloc.storage_version());
        }
        Ok(())
    }

    fn check_column(&self, col: ColKey) -> Result<()> {
        self.table.spec.read().check(col).map(|_| ())
    }

    // ---- reads ------------------------------------------------------

    /// Typed read. Fails with `WrongType` when the column's type does
    /// not match `T` and with `NullValue` when a bare type meets a
    /// null cell; `get::<Option<_>>` surfaces null as `None`. Reading
    /// a link that points at a tombstone yields the null key.
    pub fn get<T: Property>(&self, col: ColKey) -> Result<T> {
        self.check_valid()?;
        self.check_column(col)?;
        if col.is_list() || col.is_dictionary() {
            return Err(StoreError::IllegalType);
        }
        if col.ty != T::column_type() {
            return Err(StoreError::WrongType);
        }
        T::from_mixed(self.read_filtered(col)?)
    }

    /// Polymorphic read; null cells come back as `Mixed::Null`.
    pub fn get_any(&self, col: ColKey) -> Result<Mixed> {
        self.check_valid()?;
        self.check_column(col)?;
        if col.is_list() || col.is_dictionary() || col.ty == ColumnType::BackLink {
            return Err(StoreError::IllegalType);
        }
        self.read_filtered(col)
    }

    /// Reads the cell, hiding tombstones behind link columns.
    fn read_filtered(&self, col: ColKey) -> Result<Mixed> {
        let value = self.read_cell(col)?;
        match value {
            Mixed::Link(key) if key.is_unresolved() => Ok(Mixed::Null),
            other => Ok(other),
        }
    }

    pub(crate) fn read_cell(&self, col: ColKey) -> Result<Mixed> {
        let store = self.store()?;
        self.update_if_needed()?;
        cluster::read_cell(&store.alloc, self.handle(), col.idx)
    }

    /// Only meaningful on nullable, non-list columns; false otherwise.
    pub fn is_null(&self, col: ColKey) -> Result<bool> {
        self.check_valid()?;
        self.check_column(col)?;
        if !col.is_nullable() || col.is_list() {
            return Ok(false);
        }
        let store = self.store()?;
        self.update_if_needed()?;
        cluster::cell_is_null(&store.alloc, self.handle(), col.idx)
    }

    /// True when a link column stores a tombstone key. Such links read
    /// as null through the typed accessors.
    pub fn is_unresolved(&self, col: ColKey) -> Result<bool> {
        Ok(self.get_unfiltered_link(col)?.is_unresolved())
    }

    /// The stored link, tombstones included.
    pub fn get_unfiltered_link(&self, col: ColKey) -> Result<ObjKey> {
        self.check_valid()?;
        self.check_column(col)?;
        if col.ty != ColumnType::Link || col.is_list() {
            return Err(StoreError::IllegalType);
        }
        match self.read_cell(col)? {
            Mixed::Link(key) => Ok(key),
            Mixed::Null => Ok(ObjKey::NULL),
            _ => Err(StoreError::Corruption("link cell kind mismatch")),
        }
    }

    /// The object a link column points at, if any.
    pub fn get_linked_object(&self, col: ColKey) -> Result<Option<Obj>> {
        let key: ObjKey = self.get(col)?;
        if key.is_null() {
            return Ok(None);
        }
        let target = self.target_table(col)?;
        Ok(Some(target.get_object(key)?))
    }

    pub fn get_linklist(&self, col: ColKey) -> Result<LinkList> {
        self.check_valid()?;
        self.check_column(col)?;
        if col.ty != ColumnType::LinkList {
            return Err(StoreError::IllegalType);
        }
        Ok(LinkList::new(self.clone(), col))
    }

    pub fn get_link_count(&self, col: ColKey) -> Result<usize> {
        self.get_linklist(col)?.len()
    }

    pub fn get_dictionary(&self, col: ColKey) -> Result<Dictionary> {
        self.check_valid()?;
        self.check_column(col)?;
        if !col.is_dictionary() {
            return Err(StoreError::IllegalType);
        }
        self.update_if_needed()?;
        Ok(Dictionary::new(self.clone(), col))
    }

    pub(crate) fn target_table(&self, col: ColKey) -> Result<Arc<Table>> {
        let store = self.store()?;
        let target = self
            .table
            .spec
            .read()
            .check(col)?
            .target
            .ok_or(StoreError::IllegalType)?;
        store.table(target)
    }

    // ---- container cells --------------------------------------------

    pub(crate) fn get_ref_cell(&self, col: ColKey) -> Result<Ref> {
        let store = self.store()?;
        self.update_if_needed()?;
        cluster::read_ref_cell(&store.alloc, self.handle(), col.idx)
    }

    /// Writes a container root ref. No instruction is emitted: the
    /// container's own mutations carry the replication story.
    pub(crate) fn set_ref_cell(&self, col: ColKey, r: Ref) -> Result<()> {
        let store = self.store()?;
        self.update_if_needed()?;
        self.ensure_writeable()?;
        cluster::write_ref_cell(&store.alloc, self.handle(), col.idx, r)?;
        store.alloc.bump_content_version();
        Ok(())
    }

    // ---- writes -----------------------------------------------------

    /// Type-checked write; null dispatches to `set_null`.
    pub fn set(&self, col: ColKey, value: impl Into<Mixed>) -> Result<&Self> {
        self.do_set(col, value.into(), false)?;
        Ok(self)
    }

    /// Like `set`, but replicated as a default-value assignment.
    pub fn set_default(&self, col: ColKey, value: impl Into<Mixed>) -> Result<&Self> {
        self.do_set(col, value.into(), true)?;
        Ok(self)
    }

    fn do_set(&self, col: ColKey, value: Mixed, is_default: bool) -> Result<()> {
        self.check_valid()?;
        self.check_column(col)?;
        if col.is_list() || col.is_dictionary() {
            return Err(StoreError::IllegalType);
        }
        self.update_if_needed()?;
        match col.ty {
            ColumnType::Link => {
                let key = ObjKey::from_mixed(value)?;
                self.set_link(col, key, is_default)
            }
            ColumnType::TypedLink => {
                let link = ObjLink::from_mixed(value)?;
                self.set_typed_link(col, link, is_default)
            }
            ColumnType::Mixed => self.set_mixed(col, value, is_default),
            ColumnType::BackLink | ColumnType::LinkList => Err(StoreError::IllegalType),
            _ => {
                if value.is_null() {
                    if !col.is_nullable() {
                        return Err(StoreError::NotNullable);
                    }
                    return self.do_set_null(col, is_default);
                }
                if value.column_type() != Some(col.ty) {
                    return Err(StoreError::WrongType);
                }
                self.check_size(&value)?;
                self.write_scalar(col, value, is_default)
            }
        }
    }

    fn check_size(&self, value: &Mixed) -> Result<()> {
        let store = self.store()?;
        match value {
            Mixed::String(s) if s.len() > store.opts.max_string_size => {
                Err(StoreError::StringTooBig)
            }
            Mixed::Binary(b) if b.len() > store.opts.max_binary_size => {
                Err(StoreError::BinaryTooBig)
            }
            _ => Ok(()),
        }
    }

    fn write_scalar(&self, col: ColKey, value: Mixed, is_default: bool) -> Result<()> {
        let store = self.store()?;
        let alloc = &store.alloc;
        self.ensure_writeable()?;
        self.update_index(col, &value)?;
        cluster::write_cell(alloc, self.handle(), col.idx, &value)?;
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            repl.emit(if is_default {
                Instruction::SetDefault {
                    table: self.table.key(),
                    col,
                    key: self.key,
                    value,
                }
            } else {
                Instruction::Set {
                    table: self.table.key(),
                    col,
                    key: self.key,
                    value,
                }
            });
        }
        Ok(())
    }

    /// Keeps the column's search index in step, except for tombstone
    /// rows, which are invisible to queries.
    fn update_index(&self, col: ColKey, new: &Mixed) -> Result<()> {
        if self.key.is_unresolved() {
            return Ok(());
        }
        if let Some(index) = self.table.index_for(col) {
            let old = self.read_cell(col)?;
            index.update(&old, new, self.key);
        }
        Ok(())
    }

    fn set_link(&self, col: ColKey, target_key: ObjKey, is_default: bool) -> Result<()> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let target_table = self.target_table(col)?;
        if !target_key.is_null() {
            if !target_table.is_valid(target_key) {
                return Err(StoreError::TargetOutOfRange);
            }
            // An embedded row accepts a direct link only while it is
            // still an orphan; its one owner comes from that link.
            if target_table.is_embedded() {
                let target = target_table.get_object(target_key)?;
                if target.backlink_count()? > 0 {
                    return Err(StoreError::WrongTableKind);
                }
            }
        }
        let old_key = self.get_unfiltered_link(col)?;
        if old_key == target_key {
            return Ok(());
        }
        let mut state = CascadeState::new(CascadeMode::Strong);
        self.ensure_writeable()?;
        let table_key = target_table.key();
        let recurse = self.replace_backlink(
            col,
            ObjLink::new(table_key, old_key),
            ObjLink::new(table_key, target_key),
            &mut state,
        )?;
        cluster::write_cell(alloc, self.handle(), col.idx, &Mixed::from(target_key))?;
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            let value = Mixed::from(target_key);
            repl.emit(if is_default {
                Instruction::SetDefault {
                    table: self.table.key(),
                    col,
                    key: self.key,
                    value,
                }
            } else {
                Instruction::Set {
                    table: self.table.key(),
                    col,
                    key: self.key,
                    value,
                }
            });
        }
        if recurse {
            store.remove_recursive(&mut state)?;
        }
        Ok(())
    }

    fn set_typed_link(&self, col: ColKey, target_link: ObjLink, is_default: bool) -> Result<()> {
        let store = self.store()?;
        let alloc = &store.alloc;
        store.validate_link(target_link)?;
        let old_link: ObjLink = match self.read_cell(col)? {
            Mixed::TypedLink(link) => link,
            _ => ObjLink::NULL,
        };
        if old_link == target_link {
            return Ok(());
        }
        let mut state = CascadeState::new(if old_link.key.is_unresolved() {
            CascadeMode::All
        } else {
            CascadeMode::Strong
        });
        self.ensure_writeable()?;
        let recurse = self.replace_backlink(col, old_link, target_link, &mut state)?;
        cluster::write_cell(alloc, self.handle(), col.idx, &Mixed::from(target_link))?;
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            let value = Mixed::from(target_link);
            repl.emit(if is_default {
                Instruction::SetDefault {
                    table: self.table.key(),
                    col,
                    key: self.key,
                    value,
                }
            } else {
                Instruction::Set {
                    table: self.table.key(),
                    col,
                    key: self.key,
                    value,
                }
            });
        }
        if recurse {
            store.remove_recursive(&mut state)?;
        }
        Ok(())
    }

    fn set_mixed(&self, col: ColKey, value: Mixed, is_default: bool) -> Result<()> {
        let store = self.store()?;
        let alloc = &store.alloc;
        if value.is_null() && !col.is_nullable() {
            return Err(StoreError::NotNullable);
        }
        if matches!(value, Mixed::Link(_)) {
            // A mixed cell cannot name a table; only typed links fit.
            return Err(StoreError::IllegalType);
        }
        self.check_size(&value)?;
        let old = self.read_cell(col)?;
        let old_link = match old {
            Mixed::TypedLink(link) => link,
            _ => ObjLink::NULL,
        };
        let new_link = match value {
            Mixed::TypedLink(link) => link,
            _ => ObjLink::NULL,
        };
        if !new_link.is_null() {
            if new_link == old_link {
                return Ok(());
            }
            store.validate_link(new_link)?;
        }
        let mut state = CascadeState::new(if old_link.key.is_unresolved() {
            CascadeMode::All
        } else {
            CascadeMode::Strong
        });
        self.ensure_writeable()?;
        let recurse = if old_link.is_null() && new_link.is_null() {
            false
        } else {
            self.replace_backlink(col, old_link, new_link, &mut state)?
        };
        self.update_index(col, &value)?;
        cluster::write_cell(alloc, self.handle(), col.idx, &value)?;
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            repl.emit(if is_default {
                Instruction::SetDefault {
                    table: self.table.key(),
                    col,
                    key: self.key,
                    value,
                }
            } else {
                Instruction::Set {
                    table: self.table.key(),
                    col,
                    key: self.key,
                    value,
                }
            });
        }
        if recurse {
            store.remove_recursive(&mut state)?;
        }
        Ok(())
    }

    /// Sets a nullable column to null; link columns become the null
    /// key instead.
    pub fn set_null(&self, col: ColKey) -> Result<&Self> {
        self.check_valid()?;
        self.check_column(col)?;
        if col.is_list() || col.is_dictionary() {
            return Err(StoreError::IllegalType);
        }
        self.update_if_needed()?;
        match col.ty {
            ColumnType::Link => self.set_link(col, ObjKey::NULL, false)?,
            ColumnType::TypedLink => self.set_typed_link(col, ObjLink::NULL, false)?,
            ColumnType::Mixed => self.set_mixed(col, Mixed::Null, false)?,
            _ => {
                if !col.is_nullable() {
                    return Err(StoreError::NotNullable);
                }
                self.do_set_null(col, false)?;
            }
        }
        Ok(self)
    }

    fn do_set_null(&self, col: ColKey, is_default: bool) -> Result<()> {
        let store = self.store()?;
        let alloc = &store.alloc;
        self.ensure_writeable()?;
        self.update_index(col, &Mixed::Null)?;
        cluster::write_cell_null(alloc, self.handle(), col.idx)?;
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            repl.emit(Instruction::SetNull {
                table: self.table.key(),
                col,
                key: self.key,
                is_default,
            });
        }
        Ok(())
    }

    /// Wrapping 64-bit add on an integer column. Replicated as a
    /// dedicated instruction so replay stays commutative.
    pub fn add_int(&self, col: ColKey, delta: i64) -> Result<&Self> {
        self.check_valid()?;
        self.check_column(col)?;
        if col.ty != ColumnType::Int || col.is_list() || col.is_dictionary() {
            return Err(StoreError::IllegalType);
        }
        let store = self.store()?;
        let alloc = &store.alloc;
        self.update_if_needed()?;
        self.ensure_writeable()?;
        let old = match self.read_cell(col)? {
            Mixed::Int(v) => v,
            Mixed::Null => return Err(StoreError::IllegalCombination),
            _ => return Err(StoreError::Corruption("int cell kind mismatch")),
        };
        let new = (old as u64).wrapping_add(delta as u64) as i64;
        let value = Mixed::Int(new);
        self.update_index(col, &value)?;
        cluster::write_cell(alloc, self.handle(), col.idx, &value)?;
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            repl.emit(Instruction::AddInt {
                table: self.table.key(),
                col,
                key: self.key,
                value: delta,
            });
        }
        Ok(self)
    }

    /// Allocates a new row in the link target and points `col` at it.
    /// For an embedded target the current child (if any) is cascaded
    /// away first; for a non-embedded target the column must be empty.
    pub fn create_and_set_linked_object(&self, col: ColKey) -> Result<Obj> {
        self.check_valid()?;
        self.check_column(col)?;
        if col.ty != ColumnType::Link || col.is_list() {
            return Err(StoreError::IllegalType);
        }
        let store = self.store()?;
        let alloc = &store.alloc;
        self.update_if_needed()?;
        let target_table = self.target_table(col)?;
        let old_key = self.get_unfiltered_link(col)?;
        if !target_table.is_embedded() && !old_key.is_null() {
            return Err(StoreError::WrongTableKind);
        }
        let result = if target_table.is_embedded() {
            target_table.create_linked_object()?
        } else {
            target_table.create_object()?
        };
        let target_key = result.key();
        let table_key = target_table.key();
        let mut state = CascadeState::new(CascadeMode::Strong);
        self.ensure_writeable()?;
        let recurse = self.replace_backlink(
            col,
            ObjLink::new(table_key, old_key),
            ObjLink::new(table_key, target_key),
            &mut state,
        )?;
        cluster::write_cell(alloc, self.handle(), col.idx, &Mixed::Link(target_key))?;
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            repl.emit(Instruction::Set {
                table: self.table.key(),
                col,
                key: self.key,
                value: Mixed::Link(target_key),
            });
        }
        if recurse {
            store.remove_recursive(&mut state)?;
        }
        Ok(result)
    }

    // ---- lifecycle --------------------------------------------------

    /// Cascade-deletes the row. The accessor is invalid afterwards.
    pub fn remove(&self) -> Result<()> {
        self.check_valid()?;
        self.table.remove_object(self.key)?;
        self.valid.set(false);
        Ok(())
    }

    /// Turns the row into a tombstone if links to it remain, deletes
    /// it otherwise.
    pub fn invalidate(&self) -> Result<ObjKey> {
        self.check_valid()?;
        let result = self.table.invalidate_object(self.key)?;
        self.valid.set(false);
        Ok(result)
    }

    // ---- equality ---------------------------------------------------

    /// Field-wise comparison over public columns. Link lists compare
    /// element-wise; dictionaries compare as key/value sets.
    pub fn equals(&self, other: &Obj) -> Result<bool> {
        self.check_valid()?;
        other.check_valid()?;
        if !Arc::ptr_eq(&self.table, &other.table) {
            return Ok(false);
        }
        let cols: Vec<ColKey> = self
            .table
            .spec
            .read()
            .public_columns()
            .map(|spec| spec.key)
            .collect();
        for col in cols {
            if col.is_list() {
                let a = self.get_linklist(col)?;
                let b = other.get_linklist(col)?;
                if a.len()? != b.len()? {
                    return Ok(false);
                }
                for ndx in 0..a.len()? {
                    if a.get(ndx)? != b.get(ndx)? {
                        return Ok(false);
                    }
                }
            } else if col.is_dictionary() {
                let a = self.get_dictionary(col)?;
                let b = other.get_dictionary(col)?;
                if a.len()? != b.len()? {
                    return Ok(false);
                }
                for entry in a.iter()? {
                    let (key, value) = entry?;
                    match b.find(&key)? {
                        Some(_) if b.get(&key)? == value => {}
                        _ => return Ok(false),
                    }
                }
            } else if self.get_any(col)? != other.get_any(col)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

impl std::fmt::Debug for Obj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Obj")
            .field("table", &self.table.key())
            .field("key", &self.key)
            .field("valid", &self.valid.get())
            .finish()
    }
}
