use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::alloc::{Alloc, Ref};
use crate::cascade::{CascadeMode, CascadeState};
use crate::cluster::ClusterTree;
use crate::error::{Result, StoreError};
use crate::index::SearchIndex;
use crate::keys::{ColAttrs, ColKey, ObjKey, TableKey};
use crate::leaf::LeafKind;
use crate::obj::Obj;
use crate::replication::Instruction;
use crate::schema::TableSpec;
use crate::store::StoreInner;
use crate::value::ColumnType;

/// A table: schema plus two cluster trees, one for live rows and one
/// for tombstones. Tree roots are cached here and refreshed after
/// every mutating tree call, since copy-on-write may relocate them.
pub struct Table {
    store: Weak<StoreInner>,
    key: TableKey,
    name: String,
    embedded: bool,
    fanout: usize,
    pub(crate) spec: RwLock<TableSpec>,
    clusters_top: AtomicU64,
    tombstones_top: AtomicU64,
    next_key: AtomicU64,
    indexes: Mutex<FxHashMap<u32, Arc<SearchIndex>>>,
}

impl Table {
    pub(crate) fn new(
        store: Weak<StoreInner>,
        alloc: &Alloc,
        key: TableKey,
        name: String,
        embedded: bool,
        fanout: usize,
    ) -> Self {
        let clusters = ClusterTree::create(alloc, Vec::new(), fanout);
        let tombstones = ClusterTree::create(alloc, Vec::new(), fanout);
        Table {
            store,
            key,
            name,
            embedded,
            fanout,
            spec: RwLock::new(TableSpec::new()),
            clusters_top: AtomicU64::new(clusters.top().0),
            tombstones_top: AtomicU64::new(tombstones.top().0),
            next_key: AtomicU64::new(0),
            indexes: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn key(&self) -> TableKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    pub(crate) fn store(&self) -> Result<Arc<StoreInner>> {
        self.store.upgrade().ok_or(StoreError::ObjectNotAlive)
    }

    pub(crate) fn live_tree(&self) -> ClusterTree {
        ClusterTree::attach(
            Ref(self.clusters_top.load(Ordering::Acquire)),
            self.spec.read().layout(),
            self.fanout,
        )
    }

    pub(crate) fn tombstone_tree(&self) -> ClusterTree {
        ClusterTree::attach(
            Ref(self.tombstones_top.load(Ordering::Acquire)),
            self.spec.read().layout(),
            self.fanout,
        )
    }

    pub(crate) fn tree_for(&self, key: ObjKey) -> ClusterTree {
        if key.is_unresolved() {
            self.tombstone_tree()
        } else {
            self.live_tree()
        }
    }

    pub(crate) fn save_tree(&self, key: ObjKey, tree: &ClusterTree) {
        if key.is_unresolved() {
            self.tombstones_top.store(tree.top().0, Ordering::Release);
        } else {
            self.clusters_top.store(tree.top().0, Ordering::Release);
        }
    }

    // ---- schema -----------------------------------------------------

    fn add_column_impl(
        &self,
        name: &str,
        ty: ColumnType,
        attrs: ColAttrs,
        target: Option<TableKey>,
    ) -> Result<ColKey> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let mut spec = self.spec.write();
        if spec.col_by_name(name).is_some() {
            return Err(StoreError::KeyAlreadyUsed);
        }
        let kind = LeafKind::for_column(ty, attrs);
        let mut live = ClusterTree::attach(
            Ref(self.clusters_top.load(Ordering::Acquire)),
            spec.layout(),
            self.fanout,
        );
        live.insert_column(alloc, kind)?;
        self.clusters_top.store(live.top().0, Ordering::Release);
        let mut tombstones = ClusterTree::attach(
            Ref(self.tombstones_top.load(Ordering::Acquire)),
            spec.layout(),
            self.fanout,
        );
        tombstones.insert_column(alloc, kind)?;
        self.tombstones_top
            .store(tombstones.top().0, Ordering::Release);
        Ok(spec.add_column(name, ty, attrs, target))
    }

    /// Adds a scalar column. Link-bearing columns have their own entry
    /// points that wire up the reverse edge.
    pub fn add_column(&self, name: &str, ty: ColumnType, nullable: bool) -> Result<ColKey> {
        match ty {
            ColumnType::Link | ColumnType::LinkList | ColumnType::BackLink => {
                return Err(StoreError::IllegalType)
            }
            _ => {}
        }
        let mut attrs = ColAttrs::empty();
        if nullable {
            attrs = attrs.with(ColAttrs::NULLABLE);
        }
        self.add_column_impl(name, ty, attrs, None)
    }

    /// Adds a scalar column with a search index attached.
    pub fn add_indexed_column(&self, name: &str, ty: ColumnType, nullable: bool) -> Result<ColKey> {
        match ty {
            ColumnType::Link | ColumnType::LinkList | ColumnType::BackLink => {
                return Err(StoreError::IllegalType)
            }
            _ => {}
        }
        let mut attrs = ColAttrs::INDEXED;
        if nullable {
            attrs = attrs.with(ColAttrs::NULLABLE);
        }
        let col = self.add_column_impl(name, ty, attrs, None)?;
        self.indexes
            .lock()
            .insert(col.tag, Arc::new(SearchIndex::new()));
        Ok(col)
    }

    fn add_link_column_impl(
        self: &Arc<Self>,
        name: &str,
        ty: ColumnType,
        extra: ColAttrs,
        target: &Arc<Table>,
    ) -> Result<ColKey> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let mut attrs = extra;
        if target.is_embedded() {
            attrs = attrs.with(ColAttrs::STRONG_LINKS);
        }
        let col = self.add_column_impl(name, ty, attrs, Some(target.key()))?;
        let back = if Arc::ptr_eq(self, target) {
            let mut spec = self.spec.write();
            let mut live = ClusterTree::attach(
                Ref(self.clusters_top.load(Ordering::Acquire)),
                spec.layout(),
                self.fanout,
            );
            live.insert_column(alloc, LeafKind::Backlink)?;
            self.clusters_top.store(live.top().0, Ordering::Release);
            let mut tombstones = ClusterTree::attach(
                Ref(self.tombstones_top.load(Ordering::Acquire)),
                spec.layout(),
                self.fanout,
            );
            tombstones.insert_column(alloc, LeafKind::Backlink)?;
            self.tombstones_top
                .store(tombstones.top().0, Ordering::Release);
            spec.add_backlink_column(self.key, col)
        } else {
            target.add_backlink_column_for(self.key, col)?
        };
        self.spec.write().set_opposite(col, back);
        Ok(col)
    }

    /// Adds a single-link column pointing at `target`. Links into an
    /// embedded table carry strong-link semantics.
    pub fn add_link_column(self: &Arc<Self>, name: &str, target: &Arc<Table>) -> Result<ColKey> {
        self.add_link_column_impl(name, ColumnType::Link, ColAttrs::NULLABLE, target)
    }

    /// Adds a link-list column pointing at `target`.
    pub fn add_linklist_column(
        self: &Arc<Self>,
        name: &str,
        target: &Arc<Table>,
    ) -> Result<ColKey> {
        self.add_link_column_impl(name, ColumnType::LinkList, ColAttrs::LIST, target)
    }

    /// Adds a dictionary column. `key_type` must be `Int` or `String`.
    pub fn add_dictionary_column(&self, name: &str, key_type: ColumnType) -> Result<ColKey> {
        if !matches!(key_type, ColumnType::Int | ColumnType::String) {
            return Err(StoreError::IllegalType);
        }
        self.add_column_impl(
            name,
            key_type,
            ColAttrs::DICTIONARY.with(ColAttrs::NULLABLE),
            None,
        )
    }

    fn add_backlink_column_for(&self, origin_table: TableKey, origin_col: ColKey) -> Result<ColKey> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let mut spec = self.spec.write();
        let mut live = ClusterTree::attach(
            Ref(self.clusters_top.load(Ordering::Acquire)),
            spec.layout(),
            self.fanout,
        );
        live.insert_column(alloc, LeafKind::Backlink)?;
        self.clusters_top.store(live.top().0, Ordering::Release);
        let mut tombstones = ClusterTree::attach(
            Ref(self.tombstones_top.load(Ordering::Acquire)),
            spec.layout(),
            self.fanout,
        );
        tombstones.insert_column(alloc, LeafKind::Backlink)?;
        self.tombstones_top
            .store(tombstones.top().0, Ordering::Release);
        Ok(spec.add_backlink_column(origin_table, origin_col))
    }

    /// Backlink column for a dynamic origin (typed link, mixed or
    /// dictionary), created on first use.
    pub(crate) fn find_or_add_backlink_column(
        &self,
        origin_table: TableKey,
        origin_col: ColKey,
    ) -> Result<ColKey> {
        if let Some(col) = self
            .spec
            .read()
            .find_backlink_column(origin_table, origin_col)
        {
            return Ok(col);
        }
        self.add_backlink_column_for(origin_table, origin_col)
    }

    pub fn column(&self, name: &str) -> Option<ColKey> {
        self.spec.read().col_by_name(name)
    }

    /// Marks a column as the table's primary key.
    pub fn set_primary_key_column(&self, col: ColKey) -> Result<()> {
        let mut spec = self.spec.write();
        spec.check(col)?;
        spec.primary_key = Some(col);
        Ok(())
    }

    pub fn primary_key_column(&self) -> Option<ColKey> {
        self.spec.read().primary_key
    }

    pub(crate) fn index_for(&self, col: ColKey) -> Option<Arc<SearchIndex>> {
        self.indexes.lock().get(&col.tag).cloned()
    }

    /// Keys of rows whose indexed column equals `value`. Index hits
    /// are verified against the cells before being returned.
    pub fn find_all_indexed(
        self: &Arc<Self>,
        col: ColKey,
        value: &crate::value::Mixed,
    ) -> Result<Vec<ObjKey>> {
        let index = self.index_for(col).ok_or(StoreError::IllegalCombination)?;
        let mut keys = Vec::new();
        for key in index.candidates(value) {
            let obj = self.get_object(key)?;
            if obj.get_any(col)? == *value {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    // ---- rows -------------------------------------------------------

    fn create_row(self: &Arc<Self>) -> Result<Obj> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let key = ObjKey::from_raw(self.next_key.fetch_add(1, Ordering::AcqRel) as i64);
        let mut tree = self.live_tree();
        let handle = tree.insert(alloc, key, &[])?;
        self.save_tree(key, &tree);
        debug!(table = self.key.0, key = key.raw(), "object created");
        if let Some(repl) = store.repl() {
            repl.emit(Instruction::CreateObject {
                table: self.key,
                key,
            });
        }
        Ok(Obj::new(
            Arc::clone(self),
            key,
            handle,
            alloc.storage_version(),
        ))
    }

    /// Creates a top-level object. Embedded tables only receive rows
    /// through an owning link.
    pub fn create_object(self: &Arc<Self>) -> Result<Obj> {
        if self.embedded {
            return Err(StoreError::WrongTableKind);
        }
        self.create_row()
    }

    /// Creates an orphan row that the caller links immediately; the
    /// entry point for embedded rows.
    pub(crate) fn create_linked_object(self: &Arc<Self>) -> Result<Obj> {
        self.create_row()
    }

    pub fn get_object(self: &Arc<Self>, key: ObjKey) -> Result<Obj> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let tree = self.tree_for(key);
        let handle = tree.get(alloc, key)?;
        Ok(Obj::new(
            Arc::clone(self),
            key,
            handle,
            alloc.storage_version(),
        ))
    }

    pub fn is_valid(&self, key: ObjKey) -> bool {
        match self.store() {
            Ok(store) => self.tree_for(key).is_valid(&store.alloc, key),
            Err(_) => false,
        }
    }

    pub fn size(&self) -> u64 {
        self.store()
            .ok()
            .and_then(|store| self.live_tree().size(&store.alloc).ok())
            .unwrap_or(0)
    }

    pub fn tombstone_count(&self) -> u64 {
        self.store()
            .ok()
            .and_then(|store| self.tombstone_tree().size(&store.alloc).ok())
            .unwrap_or(0)
    }

    /// Keys of all live rows in key order.
    pub fn keys(self: &Arc<Self>) -> Result<Vec<ObjKey>> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let tree = self.live_tree();
        let size = tree.size(alloc)?;
        let mut keys = Vec::with_capacity(size as usize);
        for pos in 0..size {
            keys.push(tree.get_at(alloc, pos)?.0);
        }
        Ok(keys)
    }

    /// Cascade-deletes a row: strong-linked descendants die with it.
    pub fn remove_object(self: &Arc<Self>, key: ObjKey) -> Result<()> {
        let store = self.store()?;
        let mut state = CascadeState::new(CascadeMode::Strong);
        self.remove_object_with_state(key, &mut state)?;
        store.remove_recursive(&mut state)
    }

    pub(crate) fn remove_object_with_state(
        self: &Arc<Self>,
        key: ObjKey,
        state: &mut CascadeState,
    ) -> Result<()> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let obj = self.get_object(key)?;
        obj.unlink_targets(state)?;
        obj.nullify_origin_links()?;
        obj.erase_index_entries()?;
        let mut tree = self.tree_for(key);
        tree.erase(alloc, key)?;
        self.save_tree(key, &tree);
        debug!(table = self.key.0, key = key.raw(), "object removed");
        if let Some(repl) = store.repl() {
            repl.emit(Instruction::RemoveObject {
                table: self.key,
                key,
            });
        }
        Ok(())
    }

    /// Converts a row into a tombstone when links to it remain,
    /// deletes it outright otherwise. Returns the tombstone key, or
    /// the null key when the row was simply deleted.
    pub fn invalidate_object(self: &Arc<Self>, key: ObjKey) -> Result<ObjKey> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let obj = self.get_object(key)?;
        if !obj.has_backlinks(false)? {
            self.remove_object(key)?;
            return Ok(ObjKey::NULL);
        }
        let ts_key = key.into_unresolved();
        let mut tombstones = self.tombstone_tree();
        tombstones.insert(alloc, ts_key, &[])?;
        self.save_tree(ts_key, &tombstones);
        debug!(table = self.key.0, key = key.raw(), "object invalidated");
        let tombstone = self.get_object(ts_key)?;
        tombstone.assign_pk_and_backlinks(&obj)?;
        let mut state = CascadeState::new(CascadeMode::All);
        self.remove_object_with_state(key, &mut state)?;
        store.remove_recursive(&mut state)?;
        Ok(ts_key)
    }

    /// Erases a tombstone whose last backlink just disappeared.
    pub(crate) fn erase_tombstone(self: &Arc<Self>, key: ObjKey) -> Result<()> {
        let store = self.store()?;
        let alloc = &store.alloc;
        let mut tree = self.tombstone_tree();
        tree.erase(alloc, key)?;
        self.save_tree(key, &tree);
        debug!(table = self.key.0, key = key.raw(), "tombstone erased");
        Ok(())
    }
}
