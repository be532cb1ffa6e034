use rustc_hash::FxHashMap;

use crate::error::{Result, StoreError};
use crate::keys::{ColAttrs, ColKey, TableKey};
use crate::leaf::LeafKind;
use crate::value::ColumnType;

/// One column of a table, public or backlink.
///
/// For link-bearing columns `target` names the table the links point
/// at and `opposite` the backlink column over there (static links
/// only; typed-link, mixed and dictionary origins resolve their
/// backlink column dynamically). For backlink columns `target` names
/// the origin table, `opposite` the origin column and `origin_tag`
/// its stable tag.
#[derive(Clone, Debug)]
pub(crate) struct ColumnSpec {
    pub key: ColKey,
    pub name: String,
    pub target: Option<TableKey>,
    pub opposite: Option<ColKey>,
    pub origin_tag: Option<u32>,
}

/// Column layout of one table.
///
/// Columns are never removed, so the leaf index doubles as the
/// position in `cols`. Backlink columns are appended past the public
/// ones and never surface through name lookup.
#[derive(Debug, Default)]
pub(crate) struct TableSpec {
    cols: Vec<ColumnSpec>,
    by_name: FxHashMap<String, u32>,
    pub primary_key: Option<ColKey>,
    next_tag: u32,
}

impl TableSpec {
    pub fn new() -> Self {
        TableSpec::default()
    }

    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        ty: ColumnType,
        attrs: ColAttrs,
        target: Option<TableKey>,
    ) -> ColKey {
        let name = name.into();
        let idx = self.cols.len() as u32;
        let tag = self.next_tag;
        self.next_tag += 1;
        let key = ColKey::new(idx, ty, attrs, tag);
        if ty != ColumnType::BackLink {
            self.by_name.insert(name.clone(), idx);
        }
        self.cols.push(ColumnSpec {
            key,
            name,
            target,
            opposite: None,
            origin_tag: None,
        });
        key
    }

    pub fn add_backlink_column(
        &mut self,
        origin_table: TableKey,
        origin_col: ColKey,
    ) -> ColKey {
        let key = self.add_column(
            format!("<backlink:{}:{}>", origin_table.0, origin_col.tag),
            ColumnType::BackLink,
            ColAttrs::empty(),
            Some(origin_table),
        );
        let spec = &mut self.cols[key.idx as usize];
        spec.opposite = Some(origin_col);
        spec.origin_tag = Some(origin_col.tag);
        key
    }

    pub fn set_opposite(&mut self, col: ColKey, opposite: ColKey) {
        self.cols[col.idx as usize].opposite = Some(opposite);
    }

    /// Validates that the key belongs to this table's current layout.
    pub fn check(&self, col: ColKey) -> Result<&ColumnSpec> {
        self.cols
            .get(col.idx as usize)
            .filter(|spec| spec.key.tag == col.tag)
            .ok_or(StoreError::IllegalType)
    }

    pub fn col(&self, idx: u32) -> &ColumnSpec {
        &self.cols[idx as usize]
    }

    pub fn col_by_name(&self, name: &str) -> Option<ColKey> {
        self.by_name.get(name).map(|idx| self.cols[*idx as usize].key)
    }

    pub fn public_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.cols
            .iter()
            .filter(|spec| spec.key.ty != ColumnType::BackLink)
    }

    pub fn backlink_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.cols
            .iter()
            .filter(|spec| spec.key.ty == ColumnType::BackLink)
    }

    pub fn find_backlink_column(
        &self,
        origin_table: TableKey,
        origin_col: ColKey,
    ) -> Option<ColKey> {
        self.backlink_columns()
            .find(|spec| {
                spec.target == Some(origin_table) && spec.origin_tag == Some(origin_col.tag)
            })
            .map(|spec| spec.key)
    }

    /// Leaf kinds in leaf-index order, used to attach cluster trees.
    pub fn layout(&self) -> Vec<LeafKind> {
        self.cols
            .iter()
            .map(|spec| LeafKind::for_column(spec.key.ty, spec.key.attrs))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlink_columns_stay_private() {
        let mut spec = TableSpec::new();
        let age = spec.add_column("age", ColumnType::Int, ColAttrs::NULLABLE, None);
        let link = spec.add_column(
            "owner",
            ColumnType::Link,
            ColAttrs::empty(),
            Some(TableKey(2)),
        );
        let back = spec.add_backlink_column(TableKey(1), link);
        assert_eq!(spec.public_columns().count(), 2);
        assert_eq!(spec.col_by_name("age"), Some(age));
        assert_eq!(spec.find_backlink_column(TableKey(1), link), Some(back));
        assert!(spec.check(age).is_ok());
        let stale = ColKey::new(9, ColumnType::Int, ColAttrs::empty(), 42);
        assert!(spec.check(stale).is_err());
    }
}
