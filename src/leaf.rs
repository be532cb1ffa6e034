use smallvec::SmallVec;

use crate::error::{Result, StoreError};
use crate::keys::{ColAttrs, ObjKey, ObjLink};
use crate::value::{ColumnType, Decimal, Mixed, ObjectId, Timestamp};

/// Per-row backlink storage; nearly all rows carry 0-2 backlinks.
pub(crate) type BacklinkRow = SmallVec<[i64; 2]>;

/// The leaf array kind backing one column of one cluster.
///
/// Nullable int, bool, float, double and object-id columns use leaf
/// kinds distinct from their non-nullable forms; string, binary,
/// timestamp, decimal and mixed leaves can hold null inherently. The
/// accessor layer surfaces null uniformly regardless of which encoding
/// the leaf uses.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum LeafKind {
    Int,
    IntNull,
    Bool,
    BoolNull,
    Float,
    FloatNull,
    Double,
    DoubleNull,
    String,
    Binary,
    Timestamp,
    Decimal,
    ObjectId,
    ObjectIdNull,
    Mixed,
    Key,
    TypedLink,
    Backlink,
    Ref,
}

impl LeafKind {
    /// Maps a column's type and attributes to its leaf kind.
    pub fn for_column(ty: ColumnType, attrs: ColAttrs) -> LeafKind {
        if attrs.test(ColAttrs::LIST) || attrs.test(ColAttrs::DICTIONARY) {
            return LeafKind::Ref;
        }
        let nullable = attrs.test(ColAttrs::NULLABLE);
        match ty {
            ColumnType::Int => {
                if nullable {
                    LeafKind::IntNull
                } else {
                    LeafKind::Int
                }
            }
            ColumnType::Bool => {
                if nullable {
                    LeafKind::BoolNull
                } else {
                    LeafKind::Bool
                }
            }
            ColumnType::Float => {
                if nullable {
                    LeafKind::FloatNull
                } else {
                    LeafKind::Float
                }
            }
            ColumnType::Double => {
                if nullable {
                    LeafKind::DoubleNull
                } else {
                    LeafKind::Double
                }
            }
            ColumnType::String => LeafKind::String,
            ColumnType::Binary => LeafKind::Binary,
            ColumnType::Mixed => LeafKind::Mixed,
            ColumnType::Timestamp => LeafKind::Timestamp,
            ColumnType::Decimal => LeafKind::Decimal,
            ColumnType::ObjectId => {
                if nullable {
                    LeafKind::ObjectIdNull
                } else {
                    LeafKind::ObjectId
                }
            }
            ColumnType::Link => LeafKind::Key,
            ColumnType::TypedLink => LeafKind::TypedLink,
            ColumnType::LinkList => LeafKind::Ref,
            ColumnType::BackLink => LeafKind::Backlink,
        }
    }
}

/// Width-typed parallel array holding one column's values for the rows
/// of a single cluster.
#[derive(Clone, Debug)]
pub(crate) enum ColumnLeaf {
    Int(Vec<i64>),
    IntNull(Vec<Option<i64>>),
    Bool(Vec<bool>),
    BoolNull(Vec<Option<bool>>),
    Float(Vec<f32>),
    FloatNull(Vec<Option<f32>>),
    Double(Vec<f64>),
    DoubleNull(Vec<Option<f64>>),
    String(Vec<Option<String>>),
    Binary(Vec<Option<Vec<u8>>>),
    Timestamp(Vec<Option<Timestamp>>),
    Decimal(Vec<Option<Decimal>>),
    ObjectId(Vec<ObjectId>),
    ObjectIdNull(Vec<Option<ObjectId>>),
    Mixed(Vec<Mixed>),
    Key(Vec<i64>),
    TypedLink(Vec<ObjLink>),
    Backlink(Vec<BacklinkRow>),
    Ref(Vec<u64>),
}

macro_rules! per_leaf {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            ColumnLeaf::Int($v) => $body,
            ColumnLeaf::IntNull($v) => $body,
            ColumnLeaf::Bool($v) => $body,
            ColumnLeaf::BoolNull($v) => $body,
            ColumnLeaf::Float($v) => $body,
            ColumnLeaf::FloatNull($v) => $body,
            ColumnLeaf::Double($v) => $body,
            ColumnLeaf::DoubleNull($v) => $body,
            ColumnLeaf::String($v) => $body,
            ColumnLeaf::Binary($v) => $body,
            ColumnLeaf::Timestamp($v) => $body,
            ColumnLeaf::Decimal($v) => $body,
            ColumnLeaf::ObjectId($v) => $body,
            ColumnLeaf::ObjectIdNull($v) => $body,
            ColumnLeaf::Mixed($v) => $body,
            ColumnLeaf::Key($v) => $body,
            ColumnLeaf::TypedLink($v) => $body,
            ColumnLeaf::Backlink($v) => $body,
            ColumnLeaf::Ref($v) => $body,
        }
    };
}

impl ColumnLeaf {
    pub fn new(kind: LeafKind) -> Self {
        match kind {
            LeafKind::Int => ColumnLeaf::Int(Vec::new()),
            LeafKind::IntNull => ColumnLeaf::IntNull(Vec::new()),
            LeafKind::Bool => ColumnLeaf::Bool(Vec::new()),
            LeafKind::BoolNull => ColumnLeaf::BoolNull(Vec::new()),
            LeafKind::Float => ColumnLeaf::Float(Vec::new()),
            LeafKind::FloatNull => ColumnLeaf::FloatNull(Vec::new()),
            LeafKind::Double => ColumnLeaf::Double(Vec::new()),
            LeafKind::DoubleNull => ColumnLeaf::DoubleNull(Vec::new()),
            LeafKind::String => ColumnLeaf::String(Vec::new()),
            LeafKind::Binary => ColumnLeaf::Binary(Vec::new()),
            LeafKind::Timestamp => ColumnLeaf::Timestamp(Vec::new()),
            LeafKind::Decimal => ColumnLeaf::Decimal(Vec::new()),
            LeafKind::ObjectId => ColumnLeaf::ObjectId(Vec::new()),
            LeafKind::ObjectIdNull => ColumnLeaf::ObjectIdNull(Vec::new()),
            LeafKind::Mixed => ColumnLeaf::Mixed(Vec::new()),
            LeafKind::Key => ColumnLeaf::Key(Vec::new()),
            LeafKind::TypedLink => ColumnLeaf::TypedLink(Vec::new()),
            LeafKind::Backlink => ColumnLeaf::Backlink(Vec::new()),
            LeafKind::Ref => ColumnLeaf::Ref(Vec::new()),
        }
    }

    pub fn with_len(kind: LeafKind, len: usize) -> Self {
        let mut leaf = Self::new(kind);
        for _ in 0..len {
            leaf.push_default();
        }
        leaf
    }

    pub fn len(&self) -> usize {
        per_leaf!(self, v => v.len())
    }

    pub fn push_default(&mut self) {
        self.insert_default(self.len());
    }

    /// Inserts the column's default at `at`: null for nullable
    /// encodings, zero/empty/false otherwise, the null key for links.
    pub fn insert_default(&mut self, at: usize) {
        match self {
            ColumnLeaf::Int(v) => v.insert(at, 0),
            ColumnLeaf::IntNull(v) => v.insert(at, None),
            ColumnLeaf::Bool(v) => v.insert(at, false),
            ColumnLeaf::BoolNull(v) => v.insert(at, None),
            ColumnLeaf::Float(v) => v.insert(at, 0.0),
            ColumnLeaf::FloatNull(v) => v.insert(at, None),
            ColumnLeaf::Double(v) => v.insert(at, 0.0),
            ColumnLeaf::DoubleNull(v) => v.insert(at, None),
            ColumnLeaf::String(v) => v.insert(at, None),
            ColumnLeaf::Binary(v) => v.insert(at, None),
            ColumnLeaf::Timestamp(v) => v.insert(at, None),
            ColumnLeaf::Decimal(v) => v.insert(at, None),
            ColumnLeaf::ObjectId(v) => v.insert(at, ObjectId::default()),
            ColumnLeaf::ObjectIdNull(v) => v.insert(at, None),
            ColumnLeaf::Mixed(v) => v.insert(at, Mixed::Null),
            ColumnLeaf::Key(v) => v.insert(at, ObjKey::NULL_VALUE),
            ColumnLeaf::TypedLink(v) => v.insert(at, ObjLink::NULL),
            ColumnLeaf::Backlink(v) => v.insert(at, BacklinkRow::new()),
            ColumnLeaf::Ref(v) => v.insert(at, 0),
        }
    }

    pub fn erase(&mut self, at: usize) {
        per_leaf!(self, v => {
            v.remove(at);
        })
    }

    pub fn split_off(&mut self, at: usize) -> ColumnLeaf {
        match self {
            ColumnLeaf::Int(v) => ColumnLeaf::Int(v.split_off(at)),
            ColumnLeaf::IntNull(v) => ColumnLeaf::IntNull(v.split_off(at)),
            ColumnLeaf::Bool(v) => ColumnLeaf::Bool(v.split_off(at)),
            ColumnLeaf::BoolNull(v) => ColumnLeaf::BoolNull(v.split_off(at)),
            ColumnLeaf::Float(v) => ColumnLeaf::Float(v.split_off(at)),
            ColumnLeaf::FloatNull(v) => ColumnLeaf::FloatNull(v.split_off(at)),
            ColumnLeaf::Double(v) => ColumnLeaf::Double(v.split_off(at)),
            ColumnLeaf::DoubleNull(v) => ColumnLeaf::DoubleNull(v.split_off(at)),
            ColumnLeaf::String(v) => ColumnLeaf::String(v.split_off(at)),
            ColumnLeaf::Binary(v) => ColumnLeaf::Binary(v.split_off(at)),
            ColumnLeaf::Timestamp(v) => ColumnLeaf::Timestamp(v.split_off(at)),
            ColumnLeaf::Decimal(v) => ColumnLeaf::Decimal(v.split_off(at)),
            ColumnLeaf::ObjectId(v) => ColumnLeaf::ObjectId(v.split_off(at)),
            ColumnLeaf::ObjectIdNull(v) => ColumnLeaf::ObjectIdNull(v.split_off(at)),
            ColumnLeaf::Mixed(v) => ColumnLeaf::Mixed(v.split_off(at)),
            ColumnLeaf::Key(v) => ColumnLeaf::Key(v.split_off(at)),
            ColumnLeaf::TypedLink(v) => ColumnLeaf::TypedLink(v.split_off(at)),
            ColumnLeaf::Backlink(v) => ColumnLeaf::Backlink(v.split_off(at)),
            ColumnLeaf::Ref(v) => ColumnLeaf::Ref(v.split_off(at)),
        }
    }

    /// Reads a cell as `Mixed`, surfacing null uniformly. Link cells
    /// come back unfiltered: an unresolved key is reported as stored.
    pub fn get(&self, ndx: usize) -> Mixed {
        match self {
            ColumnLeaf::Int(v) => Mixed::Int(v[ndx]),
            ColumnLeaf::IntNull(v) => v[ndx].map(Mixed::Int).unwrap_or_default(),
            ColumnLeaf::Bool(v) => Mixed::Bool(v[ndx]),
            ColumnLeaf::BoolNull(v) => v[ndx].map(Mixed::Bool).unwrap_or_default(),
            ColumnLeaf::Float(v) => Mixed::Float(v[ndx]),
            ColumnLeaf::FloatNull(v) => v[ndx].map(Mixed::Float).unwrap_or_default(),
            ColumnLeaf::Double(v) => Mixed::Double(v[ndx]),
            ColumnLeaf::DoubleNull(v) => v[ndx].map(Mixed::Double).unwrap_or_default(),
            ColumnLeaf::String(v) => v[ndx].clone().map(Mixed::String).unwrap_or_default(),
            ColumnLeaf::Binary(v) => v[ndx].clone().map(Mixed::Binary).unwrap_or_default(),
            ColumnLeaf::Timestamp(v) => v[ndx].map(Mixed::Timestamp).unwrap_or_default(),
            ColumnLeaf::Decimal(v) => v[ndx].map(Mixed::Decimal).unwrap_or_default(),
            ColumnLeaf::ObjectId(v) => Mixed::ObjectId(v[ndx]),
            ColumnLeaf::ObjectIdNull(v) => v[ndx].map(Mixed::ObjectId).unwrap_or_default(),
            ColumnLeaf::Mixed(v) => v[ndx].clone(),
            ColumnLeaf::Key(v) => {
                let key = ObjKey::from_raw(v[ndx]);
                if key.is_null() {
                    Mixed::Null
                } else {
                    Mixed::Link(key)
                }
            }
            ColumnLeaf::TypedLink(v) => {
                let link = v[ndx];
                if link.is_null() {
                    Mixed::Null
                } else {
                    Mixed::TypedLink(link)
                }
            }
            ColumnLeaf::Backlink(_) => Mixed::Null,
            ColumnLeaf::Ref(v) => Mixed::Int(v[ndx] as i64),
        }
    }

    /// Writes a cell. The caller has already type-checked the value
    /// against the column, so a mismatch here is structural.
    pub fn set(&mut self, ndx: usize, value: &Mixed) -> Result<()> {
        if value.is_null() {
            return self.set_null(ndx);
        }
        match (self, value) {
            (ColumnLeaf::Int(v), Mixed::Int(val)) => v[ndx] = *val,
            (ColumnLeaf::IntNull(v), Mixed::Int(val)) => v[ndx] = Some(*val),
            (ColumnLeaf::Bool(v), Mixed::Bool(val)) => v[ndx] = *val,
            (ColumnLeaf::BoolNull(v), Mixed::Bool(val)) => v[ndx] = Some(*val),
            (ColumnLeaf::Float(v), Mixed::Float(val)) => v[ndx] = *val,
            (ColumnLeaf::FloatNull(v), Mixed::Float(val)) => v[ndx] = Some(*val),
            (ColumnLeaf::Double(v), Mixed::Double(val)) => v[ndx] = *val,
            (ColumnLeaf::DoubleNull(v), Mixed::Double(val)) => v[ndx] = Some(*val),
            (ColumnLeaf::String(v), Mixed::String(val)) => v[ndx] = Some(val.clone()),
            (ColumnLeaf::Binary(v), Mixed::Binary(val)) => v[ndx] = Some(val.clone()),
            (ColumnLeaf::Timestamp(v), Mixed::Timestamp(val)) => v[ndx] = Some(*val),
            (ColumnLeaf::Decimal(v), Mixed::Decimal(val)) => v[ndx] = Some(*val),
            (ColumnLeaf::ObjectId(v), Mixed::ObjectId(val)) => v[ndx] = *val,
            (ColumnLeaf::ObjectIdNull(v), Mixed::ObjectId(val)) => v[ndx] = Some(*val),
            (ColumnLeaf::Mixed(v), val) => v[ndx] = val.clone(),
            (ColumnLeaf::Key(v), Mixed::Link(val)) => v[ndx] = val.raw(),
            (ColumnLeaf::TypedLink(v), Mixed::TypedLink(val)) => v[ndx] = *val,
            _ => return Err(StoreError::Corruption("leaf type mismatch")),
        }
        Ok(())
    }

    pub fn set_null(&mut self, ndx: usize) -> Result<()> {
        match self {
            ColumnLeaf::IntNull(v) => v[ndx] = None,
            ColumnLeaf::BoolNull(v) => v[ndx] = None,
            ColumnLeaf::FloatNull(v) => v[ndx] = None,
            ColumnLeaf::DoubleNull(v) => v[ndx] = None,
            ColumnLeaf::String(v) => v[ndx] = None,
            ColumnLeaf::Binary(v) => v[ndx] = None,
            ColumnLeaf::Timestamp(v) => v[ndx] = None,
            ColumnLeaf::Decimal(v) => v[ndx] = None,
            ColumnLeaf::ObjectIdNull(v) => v[ndx] = None,
            ColumnLeaf::Mixed(v) => v[ndx] = Mixed::Null,
            ColumnLeaf::Key(v) => v[ndx] = ObjKey::NULL_VALUE,
            ColumnLeaf::TypedLink(v) => v[ndx] = ObjLink::NULL,
            _ => return Err(StoreError::Corruption("null in non-nullable leaf")),
        }
        Ok(())
    }

    pub fn is_null(&self, ndx: usize) -> bool {
        match self {
            ColumnLeaf::IntNull(v) => v[ndx].is_none(),
            ColumnLeaf::BoolNull(v) => v[ndx].is_none(),
            ColumnLeaf::FloatNull(v) => v[ndx].is_none(),
            ColumnLeaf::DoubleNull(v) => v[ndx].is_none(),
            ColumnLeaf::String(v) => v[ndx].is_none(),
            ColumnLeaf::Binary(v) => v[ndx].is_none(),
            ColumnLeaf::Timestamp(v) => v[ndx].is_none(),
            ColumnLeaf::Decimal(v) => v[ndx].is_none(),
            ColumnLeaf::ObjectIdNull(v) => v[ndx].is_none(),
            ColumnLeaf::Mixed(v) => v[ndx].is_null(),
            ColumnLeaf::Key(v) => ObjKey::from_raw(v[ndx]).is_null(),
            ColumnLeaf::TypedLink(v) => v[ndx].is_null(),
            _ => false,
        }
    }

    pub fn get_key(&self, ndx: usize) -> Result<ObjKey> {
        match self {
            ColumnLeaf::Key(v) => Ok(ObjKey::from_raw(v[ndx])),
            _ => Err(StoreError::Corruption("expected key leaf")),
        }
    }

    pub fn get_ref(&self, ndx: usize) -> Result<u64> {
        match self {
            ColumnLeaf::Ref(v) => Ok(v[ndx]),
            _ => Err(StoreError::Corruption("expected ref leaf")),
        }
    }

    pub fn set_ref(&mut self, ndx: usize, value: u64) -> Result<()> {
        match self {
            ColumnLeaf::Ref(v) => {
                v[ndx] = value;
                Ok(())
            }
            _ => Err(StoreError::Corruption("expected ref leaf")),
        }
    }

    fn backlinks(&self, ndx: usize) -> Result<&BacklinkRow> {
        match self {
            ColumnLeaf::Backlink(v) => Ok(&v[ndx]),
            _ => Err(StoreError::Corruption("expected backlink leaf")),
        }
    }

    pub fn backlink_count(&self, ndx: usize) -> Result<usize> {
        Ok(self.backlinks(ndx)?.len())
    }

    pub fn backlink_get(&self, ndx: usize, backlink_ndx: usize) -> Result<ObjKey> {
        let row = self.backlinks(ndx)?;
        row.get(backlink_ndx)
            .map(|raw| ObjKey::from_raw(*raw))
            .ok_or(StoreError::KeyNotFound)
    }

    pub fn backlink_all(&self, ndx: usize) -> Result<Vec<ObjKey>> {
        Ok(self
            .backlinks(ndx)?
            .iter()
            .map(|raw| ObjKey::from_raw(*raw))
            .collect())
    }

    pub fn backlink_add(&mut self, ndx: usize, origin: ObjKey) -> Result<()> {
        match self {
            ColumnLeaf::Backlink(v) => {
                v[ndx].push(origin.raw());
                Ok(())
            }
            _ => Err(StoreError::Corruption("expected backlink leaf")),
        }
    }

    /// Removes one occurrence of `origin`; true when the row's list is
    /// now empty.
    pub fn backlink_remove_one(&mut self, ndx: usize, origin: ObjKey) -> Result<bool> {
        match self {
            ColumnLeaf::Backlink(v) => {
                let row = &mut v[ndx];
                let pos = row
                    .iter()
                    .position(|raw| *raw == origin.raw())
                    .ok_or(StoreError::Corruption("backlink missing"))?;
                row.remove(pos);
                Ok(row.is_empty())
            }
            _ => Err(StoreError::Corruption("expected backlink leaf")),
        }
    }
}
