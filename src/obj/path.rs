use std::cell::{Cell, RefCell};

use crate::error::{Result, StoreError};
use crate::keys::{ColKey, ObjKey, TableKey};
use crate::obj::Obj;

/// One step on the ownership path: the link column on the parent and,
/// for list columns, the position within the list.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct PathElement {
    pub col: ColKey,
    pub index: usize,
}

/// Minimal path from the top-level owner down to (but excluding) an
/// embedded object.
#[derive(Clone, Debug)]
pub struct Path {
    pub top_table: TableKey,
    pub top_objkey: ObjKey,
    pub path_from_top: Vec<PathElement>,
}

/// Path step carrying the parent accessor for cheap follow-up reads.
#[derive(Clone)]
pub struct FatPathElement {
    pub obj: Obj,
    pub col: ColKey,
    pub index: usize,
}

impl Obj {
    /// Walks the unique chain of strong backlinks from an embedded
    /// object up to its top-level owner. The sizer runs first with
    /// the path depth, letting callers preallocate; the visitor then
    /// runs once per ancestor, top-most first. A top-level object has
    /// depth zero.
    pub fn traverse_path(
        &self,
        visitor: &mut dyn FnMut(&Obj, ColKey, usize),
        sizer: &mut dyn FnMut(usize),
    ) -> Result<()> {
        self.check_valid()?;
        self.traverse_path_inner(visitor, sizer, 0)
    }

    fn traverse_path_inner(
        &self,
        visitor: &mut dyn FnMut(&Obj, ColKey, usize),
        sizer: &mut dyn FnMut(usize),
        depth: usize,
    ) -> Result<()> {
        if !self.table().is_embedded() {
            sizer(depth);
            return Ok(());
        }
        let store = self.store()?;
        let back_specs: Vec<(ColKey, TableKey, ColKey)> = self
            .table()
            .spec
            .read()
            .backlink_columns()
            .filter_map(|spec| Some((spec.key, spec.target?, spec.opposite?)))
            .collect();
        for (back_col, origin_table_key, origin_col) in back_specs {
            let backlinks = self.backlinks_of(back_col)?;
            // An embedded row has exactly one owner; the column that
            // holds it is the one with a single backlink.
            if backlinks.len() == 1 {
                let origin_table = store.table(origin_table_key)?;
                let origin = origin_table.get_object(backlinks[0])?;
                let index = if origin_col.is_list() {
                    origin
                        .get_linklist(origin_col)?
                        .find_first(self.key())?
                        .ok_or(StoreError::Corruption("owner list entry missing"))?
                } else {
                    0
                };
                origin.traverse_path_inner(visitor, sizer, depth + 1)?;
                visitor(&origin, origin_col, index);
                return Ok(());
            }
        }
        Err(StoreError::Corruption("embedded row without owner"))
    }

    /// The ownership path in minimal form. For a top-level object the
    /// path is empty and the object is its own top.
    pub fn get_path(&self) -> Result<Path> {
        let elements = RefCell::new(Vec::new());
        let top = Cell::new(None);
        let mut sizer = |size: usize| elements.borrow_mut().reserve(size);
        let mut visitor = |obj: &Obj, col: ColKey, index: usize| {
            if top.get().is_none() {
                top.set(Some((obj.table().key(), obj.key())));
            }
            elements.borrow_mut().push(PathElement { col, index });
        };
        self.traverse_path(&mut visitor, &mut sizer)?;
        let (top_table, top_objkey) = top.get().unwrap_or((self.table().key(), self.key()));
        Ok(Path {
            top_table,
            top_objkey,
            path_from_top: elements.into_inner(),
        })
    }

    /// The ownership path with parent accessors included. Empty for a
    /// top-level object.
    pub fn get_fat_path(&self) -> Result<Vec<FatPathElement>> {
        let elements = RefCell::new(Vec::new());
        let mut sizer = |size: usize| elements.borrow_mut().reserve(size);
        let mut visitor = |obj: &Obj, col: ColKey, index: usize| {
            elements.borrow_mut().push(FatPathElement {
                obj: obj.clone(),
                col,
                index,
            });
        };
        self.traverse_path(&mut visitor, &mut sizer)?;
        Ok(elements.into_inner())
    }
}
