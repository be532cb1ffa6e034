use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::alloc::Alloc;
use crate::cascade::CascadeState;
use crate::error::{Result, StoreError};
use crate::keys::{ObjLink, TableKey};
use crate::obj::Obj;
use crate::replication::Replication;
use crate::table::Table;

pub const DEFAULT_CLUSTER_FANOUT: usize = 256;
pub const MAX_STRING_SIZE: usize = 0xFF_FFF8;
pub const MAX_BINARY_SIZE: usize = 0xFF_FFF8;

/// Store configuration.
#[derive(Clone)]
pub struct StoreOptions {
    pub cluster_fanout: usize,
    pub max_string_size: usize,
    pub max_binary_size: usize,
    pub replication: Option<Arc<dyn Replication>>,
}

impl StoreOptions {
    pub fn new() -> Self {
        StoreOptions::default()
    }

    pub fn cluster_fanout(mut self, fanout: usize) -> Self {
        self.cluster_fanout = fanout.max(2);
        self
    }

    pub fn replication(mut self, sink: Arc<dyn Replication>) -> Self {
        self.replication = Some(sink);
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            cluster_fanout: DEFAULT_CLUSTER_FANOUT,
            max_string_size: MAX_STRING_SIZE,
            max_binary_size: MAX_BINARY_SIZE,
            replication: None,
        }
    }
}

pub(crate) struct StoreInner {
    pub(crate) alloc: Alloc,
    pub(crate) opts: StoreOptions,
    tables: RwLock<Vec<Arc<Table>>>,
}

impl StoreInner {
    pub fn table(&self, key: TableKey) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(key.0.wrapping_sub(1) as usize)
            .cloned()
            .ok_or(StoreError::NoSuchTable)
    }

    pub fn repl(&self) -> Option<Arc<dyn Replication>> {
        self.opts.replication.clone()
    }

    /// Resolves a link to an object accessor; the target may be live
    /// or a tombstone.
    pub fn get_object(&self, link: ObjLink) -> Result<Obj> {
        self.table(link.table)?.get_object(link.key)
    }

    /// Fails with `TargetOutOfRange` when the link names a row that is
    /// not alive in its table (live or tombstone cluster).
    pub fn validate_link(&self, link: ObjLink) -> Result<()> {
        if link.is_null() {
            return Ok(());
        }
        if self.table(link.table)?.is_valid(link.key) {
            Ok(())
        } else {
            Err(StoreError::TargetOutOfRange)
        }
    }

    /// Drains the cascade worklist, deleting every queued row that is
    /// still alive. Removals may enqueue further rows.
    pub fn remove_recursive(&self, state: &mut CascadeState) -> Result<()> {
        while let Some(link) = state.pop() {
            let table = self.table(link.table)?;
            if table.is_valid(link.key) {
                table.remove_object_with_state(link.key, state)?;
            }
        }
        Ok(())
    }
}

/// An in-memory object store: a registry of tables sharing one
/// copy-on-write arena and an optional replication sink.
///
/// Within a transaction all accessors share the arena; `commit`
/// freezes the current slabs as a shared snapshot, so later writes
/// copy on write and stale accessors re-resolve through their version
/// stamps.
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn new(opts: StoreOptions) -> Self {
        Store {
            inner: Arc::new(StoreInner {
                alloc: Alloc::new(),
                opts,
                tables: RwLock::new(Vec::new()),
            }),
        }
    }

    fn add_table_impl(&self, name: &str, embedded: bool) -> Result<Arc<Table>> {
        let mut tables = self.inner.tables.write();
        if tables.iter().any(|table| table.name() == name) {
            return Err(StoreError::KeyAlreadyUsed);
        }
        let key = TableKey(tables.len() as u32 + 1);
        let table = Arc::new(Table::new(
            Arc::downgrade(&self.inner),
            &self.inner.alloc,
            key,
            name.to_owned(),
            embedded,
            self.inner.opts.cluster_fanout,
        ));
        tables.push(Arc::clone(&table));
        debug!(table = key.0, name, embedded, "table added");
        Ok(table)
    }

    pub fn add_table(&self, name: &str) -> Result<Arc<Table>> {
        self.add_table_impl(name, false)
    }

    /// Adds a table whose rows are owned by exactly one strong link
    /// and die with it.
    pub fn add_embedded_table(&self, name: &str) -> Result<Arc<Table>> {
        self.add_table_impl(name, true)
    }

    pub fn table(&self, key: TableKey) -> Result<Arc<Table>> {
        self.inner.table(key)
    }

    pub fn table_by_name(&self, name: &str) -> Option<Arc<Table>> {
        self.inner
            .tables
            .read()
            .iter()
            .find(|table| table.name() == name)
            .cloned()
    }

    pub fn get_object(&self, link: ObjLink) -> Result<Obj> {
        self.inner.get_object(link)
    }

    /// Commit boundary: the current slabs become a shared read-only
    /// snapshot and the storage version advances. Accessors created
    /// before the commit keep working; they re-resolve on next use.
    pub fn commit(&self) {
        self.inner.alloc.freeze();
        debug!(
            storage_version = self.inner.alloc.storage_version(),
            "commit"
        );
    }

    /// Current structural version of the arena; advances on commit and
    /// on copy-on-write reshaping.
    pub fn storage_version(&self) -> u64 {
        self.inner.alloc.storage_version()
    }

    /// Current content version of the arena; advances on every value
    /// change.
    pub fn content_version(&self) -> u64 {
        self.inner.alloc.content_version()
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new(StoreOptions::default())
    }
}
