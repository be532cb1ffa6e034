use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the accessor layer.
///
/// The first group are contract violations: the caller used a column,
/// value or target the schema does not permit. `KeyNotFound` and
/// `KeyAlreadyUsed` are lookup outcomes. `ObjectNotAlive` marks a stale
/// accessor. `Corruption` is reserved for structural invariant
/// violations and must abort the enclosing transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wrong type for column")]
    WrongType,
    #[error("operation is illegal for this column type")]
    IllegalType,
    #[error("column is not nullable")]
    NotNullable,
    #[error("cannot return null value")]
    NullValue,
    #[error("illegal combination of arguments")]
    IllegalCombination,
    #[error("link target is not alive")]
    TargetOutOfRange,
    #[error("wrong kind of table")]
    WrongTableKind,
    #[error("string too big")]
    StringTooBig,
    #[error("binary too big")]
    BinaryTooBig,
    #[error("key not found")]
    KeyNotFound,
    #[error("key already used")]
    KeyAlreadyUsed,
    #[error("object is not alive")]
    ObjectNotAlive,
    #[error("no such table")]
    NoSuchTable,
    #[error("corruption: {0}")]
    Corruption(&'static str),
}

impl From<std::fmt::Error> for StoreError {
    fn from(_: std::fmt::Error) -> Self {
        StoreError::Corruption("formatter failure")
    }
}
