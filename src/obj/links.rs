use std::sync::Arc;

use crate::cascade::{CascadeMode, CascadeState};
use crate::cluster;
use crate::error::{Result, StoreError};
use crate::keys::{ColKey, ObjKey, ObjLink};
use crate::obj::Obj;
use crate::replication::Instruction;
use crate::table::Table;
use crate::value::{ColumnType, Mixed};

/// Reverse-edge maintenance.
///
/// Every forward link has a counterpart backlink column on the target
/// table. Static link columns know their opposite from the schema;
/// typed-link, mixed and dictionary origins resolve (and lazily
/// create) theirs through a lookup keyed on the origin column and
/// table.
impl Obj {
    fn backlink_col_on(&self, col: ColKey, target_table: &Arc<Table>) -> Result<ColKey> {
        if matches!(col.ty, ColumnType::TypedLink | ColumnType::Mixed) || col.is_dictionary() {
            target_table.find_or_add_backlink_column(self.table().key(), col)
        } else {
            self.table()
                .spec
                .read()
                .check(col)?
                .opposite
                .ok_or(StoreError::Corruption("missing opposite column"))
        }
    }

    fn backlink_col_from(&self, origin_table: &Arc<Table>, origin_col: ColKey) -> Result<ColKey> {
        if matches!(origin_col.ty, ColumnType::TypedLink | ColumnType::Mixed)
            || origin_col.is_dictionary()
        {
            self.table()
                .spec
                .read()
                .find_backlink_column(origin_table.key(), origin_col)
                .ok_or(StoreError::KeyNotFound)
        } else {
            origin_table
                .spec
                .read()
                .check(origin_col)?
                .opposite
                .ok_or(StoreError::Corruption("missing opposite column"))
        }
    }

    /// Appends `origin` to this row's backlink leaf.
    pub(crate) fn add_backlink(&self, back_col: ColKey, origin: ObjKey) -> Result<()> {
        let store = self.store()?;
        self.update_if_needed()?;
        self.ensure_writeable()?;
        cluster::backlink_add(&store.alloc, self.handle(), back_col.idx, origin)?;
        store.alloc.bump_content_version();
        Ok(())
    }

    /// Removes one occurrence of `origin`; true when the leaf is now
    /// empty.
    pub(crate) fn remove_one_backlink(&self, back_col: ColKey, origin: ObjKey) -> Result<bool> {
        let store = self.store()?;
        self.update_if_needed()?;
        self.ensure_writeable()?;
        let last = cluster::backlink_remove_one(&store.alloc, self.handle(), back_col.idx, origin)?;
        store.alloc.bump_content_version();
        Ok(last)
    }

    /// Records the reverse edge of a new forward link.
    pub(crate) fn set_backlink(&self, col: ColKey, new_link: ObjLink) -> Result<()> {
        if new_link.is_null() {
            return Ok(());
        }
        let store = self.store()?;
        let target = store.get_object(new_link)?;
        let back_col = self.backlink_col_on(col, target.table())?;
        target.add_backlink(back_col, self.key())
    }

    /// Drops the reverse edge of a removed forward link. The orphaned
    /// target is queued for cascade when the edge was strong, unless
    /// it is a tombstone, which is erased outright once its last
    /// reference disappears.
    pub(crate) fn remove_backlink(
        &self,
        col: ColKey,
        old_link: ObjLink,
        state: &mut CascadeState,
    ) -> Result<bool> {
        if old_link.is_null() {
            return Ok(false);
        }
        let store = self.store()?;
        let target = store.get_object(old_link)?;
        let target_table = Arc::clone(target.table());
        let back_col = self.backlink_col_on(col, &target_table)?;
        let strong = target_table.is_embedded() || col.has_strong_links();
        let last_removed = target.remove_one_backlink(back_col, self.key())?;
        if old_link.key.is_unresolved() {
            if last_removed && !target.has_backlinks(false)? {
                target_table.erase_tombstone(old_link.key)?;
            }
            Ok(false)
        } else {
            let remaining = target.has_backlinks(state.mode == CascadeMode::Strong)?;
            Ok(state.enqueue_for_cascade(old_link, strong, last_removed, remaining))
        }
    }

    /// `remove_backlink` for the old edge, then `set_backlink` for the
    /// new one. True when cascade recursion is needed.
    pub(crate) fn replace_backlink(
        &self,
        col: ColKey,
        old_link: ObjLink,
        new_link: ObjLink,
        state: &mut CascadeState,
    ) -> Result<bool> {
        let recurse = self.remove_backlink(col, old_link, state)?;
        self.set_backlink(col, new_link)?;
        Ok(recurse)
    }

    /// Clears this row's forward reference to a target that is being
    /// removed. The matching backlink entry is gone already, so the
    /// cell (or list/dictionary entry) is cleared without reverse-edge
    /// upkeep.
    pub(crate) fn nullify_link(&self, origin_col: ColKey, target_link: ObjLink) -> Result<()> {
        let store = self.store()?;
        let alloc = &store.alloc;
        self.update_if_needed()?;
        self.ensure_writeable()?;
        if origin_col.is_list() {
            let list = self.get_linklist(origin_col)?;
            let ndx = list
                .find_first(target_link.key)?
                .ok_or(StoreError::Corruption("nullified link not in list"))?;
            return list.nullify(ndx);
        }
        if origin_col.is_dictionary() {
            let dict = self.get_dictionary(origin_col)?;
            return dict.nullify_links_to(target_link);
        }
        match origin_col.ty {
            ColumnType::Link => {
                cluster::write_cell_null(alloc, self.handle(), origin_col.idx)?;
            }
            ColumnType::TypedLink | ColumnType::Mixed => {
                cluster::write_cell_null(alloc, self.handle(), origin_col.idx)?;
            }
            _ => return Err(StoreError::Corruption("nullify on non-link column")),
        }
        alloc.bump_content_version();
        if let Some(repl) = store.repl() {
            repl.emit(Instruction::NullifyLink {
                table: self.table().key(),
                col: origin_col,
                key: self.key(),
            });
        }
        Ok(())
    }

    // ---- introspection ----------------------------------------------

    /// Whether any backlinks exist; with `only_strong` set, only edges
    /// that would own this row count.
    pub fn has_backlinks(&self, only_strong: bool) -> Result<bool> {
        if only_strong && !self.table().is_embedded() {
            return Ok(false);
        }
        Ok(self.backlink_count()? > 0)
    }

    /// Total number of incoming edges across all backlink columns.
    pub fn backlink_count(&self) -> Result<usize> {
        let store = self.store()?;
        self.update_if_needed()?;
        let back_cols: Vec<ColKey> = self
            .table()
            .spec
            .read()
            .backlink_columns()
            .map(|spec| spec.key)
            .collect();
        let mut count = 0;
        for col in back_cols {
            count += cluster::backlink_count(&store.alloc, self.handle(), col.idx)?;
        }
        Ok(count)
    }

    /// Number of incoming edges from one origin column.
    pub fn get_backlink_count(&self, origin_table: &Arc<Table>, origin_col: ColKey) -> Result<usize> {
        let store = self.store()?;
        self.update_if_needed()?;
        let back_col = match self.backlink_col_from(origin_table, origin_col) {
            Ok(col) => col,
            Err(StoreError::KeyNotFound) => return Ok(0),
            Err(err) => return Err(err),
        };
        cluster::backlink_count(&store.alloc, self.handle(), back_col.idx)
    }

    /// One incoming edge from one origin column.
    pub fn get_backlink(
        &self,
        origin_table: &Arc<Table>,
        origin_col: ColKey,
        backlink_ndx: usize,
    ) -> Result<ObjKey> {
        let store = self.store()?;
        self.update_if_needed()?;
        let back_col = self.backlink_col_from(origin_table, origin_col)?;
        cluster::backlink_get(&store.alloc, self.handle(), back_col.idx, backlink_ndx)
    }

    /// All incoming edges from one origin column.
    pub fn get_all_backlinks(
        &self,
        origin_table: &Arc<Table>,
        origin_col: ColKey,
    ) -> Result<Vec<ObjKey>> {
        let back_col = match self.backlink_col_from(origin_table, origin_col) {
            Ok(col) => col,
            Err(StoreError::KeyNotFound) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        self.backlinks_of(back_col)
    }

    pub(crate) fn backlinks_of(&self, back_col: ColKey) -> Result<Vec<ObjKey>> {
        let store = self.store()?;
        self.update_if_needed()?;
        cluster::backlink_all(&store.alloc, self.handle(), back_col.idx)
    }

    // ---- whole-row link maintenance ---------------------------------

    /// Unwinds every outgoing reference of a row that is about to be
    /// erased, queueing strong-linked targets for cascade. Container
    /// slabs are freed along the way; dictionary values never cascade.
    pub(crate) fn unlink_targets(&self, state: &mut CascadeState) -> Result<()> {
        let cols: Vec<ColKey> = self
            .table()
            .spec
            .read()
            .public_columns()
            .map(|spec| spec.key)
            .collect();
        for col in cols {
            if col.is_dictionary() {
                let dict = self.get_dictionary(col)?;
                let mut dict_state = CascadeState::new(CascadeMode::None);
                for entry in dict.iter()? {
                    let (_, value) = entry?;
                    if let Mixed::TypedLink(link) = value {
                        self.remove_backlink(col, link, &mut dict_state)?;
                    }
                }
                dict.free_storage()?;
                continue;
            }
            match col.ty {
                ColumnType::Link => {
                    let old = self.get_unfiltered_link(col)?;
                    if !old.is_null() {
                        let target = self.target_table(col)?;
                        self.remove_backlink(col, ObjLink::new(target.key(), old), state)?;
                    }
                }
                ColumnType::LinkList => {
                    let list = self.get_linklist(col)?;
                    let target = self.target_table(col)?;
                    for key in list.unfiltered_keys()? {
                        self.remove_backlink(col, ObjLink::new(target.key(), key), state)?;
                    }
                    list.free_storage()?;
                }
                ColumnType::TypedLink | ColumnType::Mixed => {
                    if let Mixed::TypedLink(link) = self.read_cell(col)? {
                        self.remove_backlink(col, link, state)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Clears every forward link that still points at this row, by
    /// walking its backlink columns to the origins.
    pub(crate) fn nullify_origin_links(&self) -> Result<()> {
        let store = self.store()?;
        let self_link = self.get_link();
        let back_specs: Vec<(ColKey, crate::keys::TableKey, ColKey)> = self
            .table()
            .spec
            .read()
            .backlink_columns()
            .filter_map(|spec| {
                Some((
                    spec.key,
                    spec.target?,
                    spec.opposite?,
                ))
            })
            .collect();
        for (back_col, origin_table_key, origin_col) in back_specs {
            let origin_table = store.table(origin_table_key)?;
            for origin_key in self.backlinks_of(back_col)? {
                let origin = origin_table.get_object(origin_key)?;
                origin.nullify_link(origin_col, self_link)?;
            }
        }
        Ok(())
    }

    /// Drops this row's values from every search index before erase.
    pub(crate) fn erase_index_entries(&self) -> Result<()> {
        if self.key().is_unresolved() {
            return Ok(());
        }
        let cols: Vec<ColKey> = self
            .table()
            .spec
            .read()
            .public_columns()
            .filter(|spec| spec.key.is_indexed())
            .map(|spec| spec.key)
            .collect();
        for col in cols {
            if let Some(index) = self.table().index_for(col) {
                let old = self.read_cell(col)?;
                index.erase(&old, self.key());
            }
        }
        Ok(())
    }

    // ---- copying ----------------------------------------------------

    /// Deep-copies all public fields from `other` and re-points every
    /// link that named `other` at this row.
    pub fn assign(&self, other: &Obj) -> Result<()> {
        self.check_valid()?;
        other.check_valid()?;
        if !Arc::ptr_eq(self.table(), other.table()) {
            return Err(StoreError::IllegalCombination);
        }
        let cols: Vec<ColKey> = self
            .table()
            .spec
            .read()
            .public_columns()
            .map(|spec| spec.key)
            .collect();
        for col in cols {
            if col.is_list() {
                let src = other.get_linklist(col)?;
                let dst = self.get_linklist(col)?;
                dst.clear()?;
                for ndx in 0..src.len()? {
                    dst.add(src.get(ndx)?)?;
                }
            } else if col.is_dictionary() {
                let src = other.get_dictionary(col)?;
                let dst = self.get_dictionary(col)?;
                dst.clear()?;
                for entry in src.iter()? {
                    let (key, value) = entry?;
                    dst.insert(key, value)?;
                }
            } else {
                match other.get_any(col)? {
                    Mixed::Null => {
                        self.set_null(col)?;
                    }
                    value => {
                        self.do_set_any(col, value)?;
                    }
                }
            }
        }
        self.steal_backlinks(other)
    }

    fn do_set_any(&self, col: ColKey, value: Mixed) -> Result<()> {
        self.set(col, value)?;
        Ok(())
    }

    /// Copies the primary key from `other` and re-points incoming
    /// links; the resurrection path for tombstones and primary-key
    /// conflicts.
    pub fn assign_pk_and_backlinks(&self, other: &Obj) -> Result<()> {
        if !Arc::ptr_eq(self.table(), other.table()) {
            return Err(StoreError::IllegalCombination);
        }
        if let Some(pk_col) = self.table().primary_key_column() {
            let value = other.get_any(pk_col)?;
            if value.is_null() {
                self.set_null(pk_col)?;
            } else {
                self.set(pk_col, value)?;
            }
        }
        self.steal_backlinks(other)
    }

    /// Re-points every incoming link from `other` to this row.
    fn steal_backlinks(&self, other: &Obj) -> Result<()> {
        let store = self.store()?;
        let back_specs: Vec<(ColKey, crate::keys::TableKey, ColKey)> = self
            .table()
            .spec
            .read()
            .backlink_columns()
            .filter_map(|spec| {
                Some((
                    spec.key,
                    spec.target?,
                    spec.opposite?,
                ))
            })
            .collect();
        for (back_col, origin_table_key, origin_col) in back_specs {
            let origin_table = store.table(origin_table_key)?;
            for origin_key in other.backlinks_of(back_col)? {
                let origin = origin_table.get_object(origin_key)?;
                if origin_col.is_dictionary() {
                    let dict = origin.get_dictionary(origin_col)?;
                    dict.repoint_links(other.get_link(), self.get_link())?;
                } else if origin_col.is_list() {
                    let list = origin.get_linklist(origin_col)?;
                    let ndx = list
                        .find_first(other.key())?
                        .ok_or(StoreError::Corruption("backlink without list entry"))?;
                    list.set(ndx, self.key())?;
                } else {
                    match origin_col.ty {
                        ColumnType::Link => {
                            origin.set(origin_col, self.key())?;
                        }
                        ColumnType::TypedLink => {
                            origin.set(origin_col, self.get_link())?;
                        }
                        ColumnType::Mixed => {
                            origin.set(origin_col, Mixed::TypedLink(self.get_link()))?;
                        }
                        _ => return Err(StoreError::Corruption("backlink from non-link column")),
                    }
                }
            }
        }
        Ok(())
    }
}
