use crate::keys::ObjLink;

/// How far a mutation follows links when rows become unreachable.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CascadeMode {
    /// Never follow; for in-place replacement where no cascade occurs.
    None,
    /// Follow strong links (embedded targets).
    Strong,
    /// Follow everything; for removing or unresolving rows that may
    /// themselves be the unresolved side of a relationship.
    All,
}

/// Transaction-local worklist of rows to delete transitively.
#[derive(Debug)]
pub struct CascadeState {
    pub mode: CascadeMode,
    pub(crate) to_delete: Vec<ObjLink>,
}

impl CascadeState {
    pub fn new(mode: CascadeMode) -> Self {
        CascadeState {
            mode,
            to_delete: Vec::new(),
        }
    }

    /// Queues a target that just lost an incoming edge. The target
    /// goes on the worklist only when the removed edge was its last
    /// one in that column, no backlinks that matter for this mode
    /// remain, and the edge was strong (or the mode follows all
    /// edges). Returns true when recursion will be needed.
    pub(crate) fn enqueue_for_cascade(
        &mut self,
        target: ObjLink,
        strong: bool,
        last_removed: bool,
        remaining_backlinks: bool,
    ) -> bool {
        if self.mode == CascadeMode::None || !last_removed {
            return false;
        }
        if !remaining_backlinks && (strong || self.mode == CascadeMode::All) {
            self.to_delete.push(target);
            return true;
        }
        false
    }

    pub(crate) fn pop(&mut self) -> Option<ObjLink> {
        self.to_delete.pop()
    }
}

impl Default for CascadeState {
    fn default() -> Self {
        CascadeState::new(CascadeMode::Strong)
    }
}
