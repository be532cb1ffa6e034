use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::keys::ObjKey;
use crate::value::Mixed;

/// Minimal search index: value hash to candidate keys.
///
/// Buckets are keyed by `Mixed::hash`, so a lookup returns candidates
/// that still need verification against the stored value. The write
/// paths of indexed columns keep this in step with the column cells.
#[derive(Default)]
pub(crate) struct SearchIndex {
    buckets: Mutex<FxHashMap<u64, SmallVec<[ObjKey; 4]>>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        SearchIndex::default()
    }

    pub fn insert(&self, value: &Mixed, key: ObjKey) {
        let mut buckets = self.buckets.lock();
        buckets.entry(value.hash()).or_default().push(key);
    }

    pub fn erase(&self, value: &Mixed, key: ObjKey) {
        let mut buckets = self.buckets.lock();
        let hash = value.hash();
        if let Some(keys) = buckets.get_mut(&hash) {
            if let Some(pos) = keys.iter().position(|k| *k == key) {
                keys.remove(pos);
            }
            if keys.is_empty() {
                buckets.remove(&hash);
            }
        }
    }

    pub fn update(&self, old: &Mixed, new: &Mixed, key: ObjKey) {
        self.erase(old, key);
        self.insert(new, key);
    }

    /// Unverified candidates for `value`; the caller re-checks each
    /// hit against the actual cell.
    pub fn candidates(&self, value: &Mixed) -> Vec<ObjKey> {
        let buckets = self.buckets.lock();
        buckets
            .get(&value.hash())
            .map(|keys| keys.to_vec())
            .unwrap_or_default()
    }
}
