use std::fmt;

use crate::value::ColumnType;

/// Identifies a table within a store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TableKey(pub u32);

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row identifier: a 63-bit integer.
///
/// Live keys are non-negative and below 2^62. Bit 62 tags a key as
/// unresolved, meaning the row lives in the table's tombstone cluster
/// rather than the live cluster. The null key is a negative sentinel
/// and never resolves to a row.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ObjKey(i64);

impl ObjKey {
    pub(crate) const NULL_VALUE: i64 = -1;
    const UNRES_BIT: i64 = 1 << 62;

    pub const NULL: ObjKey = ObjKey(Self::NULL_VALUE);

    pub(crate) const fn from_raw(value: i64) -> Self {
        ObjKey(value)
    }

    pub(crate) const fn raw(self) -> i64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == Self::NULL_VALUE
    }

    /// True when the key names a tombstone row.
    pub const fn is_unresolved(self) -> bool {
        self.0 >= 0 && (self.0 & Self::UNRES_BIT) != 0
    }

    /// Returns the tombstone form of a live key.
    pub(crate) const fn into_unresolved(self) -> Self {
        ObjKey(self.0 | Self::UNRES_BIT)
    }
}

impl fmt::Display for ObjKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A global link: names a target table and a row within it.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ObjLink {
    pub table: TableKey,
    pub key: ObjKey,
}

impl ObjLink {
    pub const NULL: ObjLink = ObjLink {
        table: TableKey(0),
        key: ObjKey::NULL,
    };

    pub fn new(table: TableKey, key: ObjKey) -> Self {
        ObjLink { table, key }
    }

    pub fn is_null(self) -> bool {
        self.key.is_null()
    }
}

impl fmt::Display for ObjLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table, self.key)
    }
}

/// Column attribute bitset.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct ColAttrs(u8);

impl ColAttrs {
    pub const NULLABLE: ColAttrs = ColAttrs(0x01);
    pub const LIST: ColAttrs = ColAttrs(0x02);
    pub const DICTIONARY: ColAttrs = ColAttrs(0x04);
    pub const INDEXED: ColAttrs = ColAttrs(0x08);
    pub const STRONG_LINKS: ColAttrs = ColAttrs(0x10);

    pub const fn empty() -> Self {
        ColAttrs(0)
    }

    pub const fn with(self, other: ColAttrs) -> Self {
        ColAttrs(self.0 | other.0)
    }

    pub const fn test(self, other: ColAttrs) -> bool {
        self.0 & other.0 != 0
    }
}

/// Column identifier.
///
/// Carries the physical leaf index (the column's leaf lives at slot
/// `idx + 1` of the row payload), the column type tag, the attribute
/// bitset and a stable per-table tag that survives schema growth.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ColKey {
    pub(crate) idx: u32,
    pub(crate) ty: ColumnType,
    pub(crate) attrs: ColAttrs,
    pub(crate) tag: u32,
}

impl ColKey {
    pub(crate) fn new(idx: u32, ty: ColumnType, attrs: ColAttrs, tag: u32) -> Self {
        ColKey {
            idx,
            ty,
            attrs,
            tag,
        }
    }

    pub fn column_type(self) -> ColumnType {
        self.ty
    }

    pub fn attrs(self) -> ColAttrs {
        self.attrs
    }

    pub fn is_nullable(self) -> bool {
        self.attrs.test(ColAttrs::NULLABLE)
    }

    pub fn is_list(self) -> bool {
        self.attrs.test(ColAttrs::LIST)
    }

    pub fn is_dictionary(self) -> bool {
        self.attrs.test(ColAttrs::DICTIONARY)
    }

    pub fn is_indexed(self) -> bool {
        self.attrs.test(ColAttrs::INDEXED)
    }

    pub fn has_strong_links(self) -> bool {
        self.attrs.test(ColAttrs::STRONG_LINKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_tagging_roundtrip() {
        let key = ObjKey::from_raw(17);
        let unres = key.into_unresolved();
        assert!(!key.is_unresolved());
        assert!(unres.is_unresolved());
        assert!(!unres.is_null());
        assert_ne!(key, unres);
    }

    #[test]
    fn null_key_is_not_unresolved() {
        assert!(ObjKey::NULL.is_null());
        assert!(!ObjKey::NULL.is_unresolved());
    }
}
