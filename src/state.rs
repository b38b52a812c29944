//! Execution states as seen by the searchers. The engine owns the states;
//! searchers key their containers on [`StateId`] and never on state content.

use std::fmt;

use crate::ptree::NodeId;

/// Identity of an execution state. Identifiers are assigned monotonically
/// and never reused, so a dangling id can only resolve to a dead slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(pub(crate) u32);

impl StateId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Scheduling priority of a recovery state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecoveryPriority {
    Low,
    High,
}

/// Attributes carried only by recovery states: their depth in the stack of
/// nested recovery subtrees, their scheduling priority, whether their owner
/// has already resumed, and who that owner is.
#[derive(Copy, Clone, Debug)]
pub struct RecoveryInfo {
    pub level: u32,
    pub priority: RecoveryPriority,
    pub resumed: bool,
    pub owner: StateId,
}

/// One frame of a state's call stack.
#[derive(Clone, Debug, Default)]
pub struct StackFrame {
    /// Instructions executed under this frame's call path.
    pub call_path_insts: u64,
    pub min_dist_to_uncovered_on_return: u64,
}

/// A single symbolic execution path's snapshot, reduced to the attributes
/// the selection strategies consume.
#[derive(Clone, Debug)]
pub struct ExecutionState {
    pub id: StateId,
    /// Index of the next instruction in the engine's program.
    pub pc: usize,
    /// Never empty.
    pub stack: Vec<StackFrame>,
    /// Depth-derived heuristic seed, halved on every fork.
    pub weight: f64,
    /// Cumulative solver cost in seconds.
    pub query_cost: f64,
    pub insts_since_cov_new: u64,
    pub ptree_node: NodeId,
    pub(crate) suspended: bool,
    pub(crate) recovery_delegate: Option<StateId>,
    pub(crate) recovery: Option<RecoveryInfo>,
}

impl ExecutionState {
    pub(crate) fn new(id: StateId, pc: usize, ptree_node: NodeId) -> Self {
        ExecutionState {
            id,
            pc,
            stack: vec![StackFrame::default()],
            weight: 1.0,
            query_cost: 0.0,
            insts_since_cov_new: 0,
            ptree_node,
            suspended: false,
            recovery_delegate: None,
            recovery: None,
        }
    }

    pub fn is_recovery_state(&self) -> bool {
        self.recovery.is_some()
    }

    /// A state is suspended while one of its recovery states runs on its
    /// behalf; the delegate is the state to advance instead.
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn recovery_state(&self) -> Option<StateId> {
        self.recovery_delegate
    }

    pub fn priority(&self) -> RecoveryPriority {
        self.recovery
            .as_ref()
            .expect("priority of a non-recovery state")
            .priority
    }

    pub fn set_priority(&mut self, priority: RecoveryPriority) {
        self.recovery
            .as_mut()
            .expect("priority of a non-recovery state")
            .priority = priority;
    }

    /// Depth of this recovery state in the stack of nested subtrees.
    pub fn level(&self) -> u32 {
        self.recovery
            .as_ref()
            .expect("level of a non-recovery state")
            .level
    }

    pub fn is_resumed(&self) -> bool {
        self.recovery.map_or(false, |r| r.resumed)
    }
}
