use parking_lot::Mutex;

use crate::keys::{ColKey, ObjKey, TableKey};
use crate::value::Mixed;

/// One entry of the mutation instruction stream.
///
/// Every mutation emits exactly one instruction, after the in-memory
/// state transition it describes and before any cascade recursion it
/// triggers, so a replayed log reproduces the same cascade outcomes.
/// `AddInt` stays distinct from `Set` so replay remains commutative
/// under concurrent merges.
#[derive(Clone, PartialEq, Debug)]
pub enum Instruction {
    CreateObject {
        table: TableKey,
        key: ObjKey,
    },
    RemoveObject {
        table: TableKey,
        key: ObjKey,
    },
    Set {
        table: TableKey,
        col: ColKey,
        key: ObjKey,
        value: Mixed,
    },
    SetDefault {
        table: TableKey,
        col: ColKey,
        key: ObjKey,
        value: Mixed,
    },
    SetNull {
        table: TableKey,
        col: ColKey,
        key: ObjKey,
        is_default: bool,
    },
    AddInt {
        table: TableKey,
        col: ColKey,
        key: ObjKey,
        value: i64,
    },
    NullifyLink {
        table: TableKey,
        col: ColKey,
        key: ObjKey,
    },
    LinkListNullify {
        table: TableKey,
        col: ColKey,
        key: ObjKey,
        ndx: usize,
    },
    ListErase {
        table: TableKey,
        col: ColKey,
        key: ObjKey,
        ndx: usize,
    },
}

/// Sink for the instruction stream. Implementations receive each
/// instruction synchronously on the mutating thread.
pub trait Replication: Send + Sync {
    fn emit(&self, instr: Instruction);
}

/// In-memory sink that records the stream for inspection and replay.
#[derive(Default)]
pub struct InstructionLog {
    entries: Mutex<Vec<Instruction>>,
}

impl InstructionLog {
    pub fn new() -> Self {
        InstructionLog::default()
    }

    pub fn snapshot(&self) -> Vec<Instruction> {
        self.entries.lock().clone()
    }

    pub fn take(&self) -> Vec<Instruction> {
        std::mem::take(&mut self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Replication for InstructionLog {
    fn emit(&self, instr: Instruction) {
        self.entries.lock().push(instr);
    }
}
