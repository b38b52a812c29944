//! The engine facade: owns the states, the process tree, the statistics and
//! the shared RNG, and exposes the narrow surface the searchers consume.
//! The engine is the sole source of truth for the set of live states;
//! searchers keep derived views that the update protocol keeps coherent.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::code::{FunctionId, Instr, InstructionId, KInstruction};
use crate::ptree::ProcessTree;
use crate::search::Searcher;
use crate::state::{ExecutionState, RecoveryInfo, RecoveryPriority, StateId};
use crate::stats::Stats;

/// Monotonic time source shared by every time-budgeted searcher.
pub trait WallClock {
    fn now(&self) -> Duration;
}

/// Counts from its creation.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> SystemClock {
        SystemClock { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// A clock driven by hand, for exercising time-budgeted searchers. Clones
/// share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl WallClock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Coverage distance oracle consumed by the distance-directed weight
/// functions. A distance of zero means unknown, which the weight functions
/// treat as far away.
pub trait DistanceOracle {
    fn distance_to_uncovered(&self, pc: InstructionId, on_return: u64) -> u64;
    fn distance_to_call(&self, pc: InstructionId, on_return: u64) -> u64;
}

/// Oracle for engines without coverage information.
pub struct NoCoverageInfo;

impl DistanceOracle for NoCoverageInfo {
    fn distance_to_uncovered(&self, _pc: InstructionId, _on_return: u64) -> u64 {
        0
    }

    fn distance_to_call(&self, _pc: InstructionId, _on_return: u64) -> u64 {
        0
    }
}

pub struct EngineBuilder {
    code: Vec<KInstruction>,
    seed: u64,
    clock: Box<dyn WallClock>,
    distances: Box<dyn DistanceOracle>,
    merge_function: Option<FunctionId>,
}

impl EngineBuilder {
    pub fn new(code: Vec<KInstruction>) -> EngineBuilder {
        EngineBuilder {
            code,
            seed: 0x5eed,
            clock: Box::new(SystemClock::new()),
            distances: Box::new(NoCoverageInfo),
            merge_function: None,
        }
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn clock(mut self, clock: impl WallClock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn distances(mut self, oracle: impl DistanceOracle + 'static) -> Self {
        self.distances = Box::new(oracle);
        self
    }

    pub fn merge_function(mut self, function: FunctionId) -> Self {
        self.merge_function = Some(function);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            code: self.code,
            states: Vec::new(),
            live: Vec::new(),
            ptree: ProcessTree::new(),
            stats: Stats::new(),
            rng: SmallRng::seed_from_u64(self.seed),
            clock: self.clock,
            distances: self.distances,
            merge_function: self.merge_function,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

pub struct Engine {
    code: Vec<KInstruction>,
    /// Slot per ever-created state, indexed by id. Slots are never reused,
    /// so ids stay unique over the whole run.
    states: Vec<Option<ExecutionState>>,
    live: Vec<StateId>,
    pub ptree: ProcessTree,
    pub stats: Stats,
    pub rng: SmallRng,
    clock: Box<dyn WallClock>,
    distances: Box<dyn DistanceOracle>,
    merge_function: Option<FunctionId>,
    added: Vec<StateId>,
    removed: Vec<StateId>,
}

impl Engine {
    pub fn builder(code: Vec<KInstruction>) -> EngineBuilder {
        EngineBuilder::new(code)
    }

    pub fn state(&self, id: StateId) -> &ExecutionState {
        self.states[id.index()]
            .as_ref()
            .expect("reference to a dead state")
    }

    pub fn state_mut(&mut self, id: StateId) -> &mut ExecutionState {
        self.states[id.index()]
            .as_mut()
            .expect("reference to a dead state")
    }

    pub fn live_states(&self) -> &[StateId] {
        &self.live
    }

    pub fn kinst(&self, pc: usize) -> &KInstruction {
        &self.code[pc]
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn merge_function(&self) -> Option<FunctionId> {
        self.merge_function
    }

    /// The merge point of a state: the call instruction it is about to
    /// execute, when that call targets the designated merge function.
    pub fn merge_point(&self, state: StateId) -> Option<InstructionId> {
        let function = self.merge_function?;
        let ki = self.kinst(self.state(state).pc);
        match ki.instr {
            Instr::Call(target) if target == function => Some(ki.id),
            _ => None,
        }
    }

    /// Steps a state past the merge call it is parked on.
    pub fn advance_past_merge(&mut self, state: StateId) {
        self.state_mut(state).pc += 1;
    }

    /// Attempts to absorb `from` into `into`. States are compatible when
    /// they sit at the same program point with the same stack depth; the
    /// survivor accumulates the absorbed weight.
    pub fn try_merge(&mut self, into: StateId, from: StateId) -> bool {
        let (from_pc, from_depth, from_weight) = {
            let s = self.state(from);
            (s.pc, s.stack.len(), s.weight)
        };
        let target = self.state_mut(into);
        if target.pc != from_pc || target.stack.len() != from_depth {
            return false;
        }
        target.weight += from_weight;
        true
    }

    pub fn min_dist_to_uncovered(&self, state: &ExecutionState) -> u64 {
        let frame = state.stack.last().expect("state with an empty stack");
        self.distances
            .distance_to_uncovered(self.kinst(state.pc).id, frame.min_dist_to_uncovered_on_return)
    }

    pub fn min_dist_to_call(&self, state: &ExecutionState) -> u64 {
        let frame = state.stack.last().expect("state with an empty stack");
        self.distances
            .distance_to_call(self.kinst(state.pc).id, frame.min_dist_to_uncovered_on_return)
    }

    fn next_id(&self) -> StateId {
        StateId(self.states.len() as u32)
    }

    /// Registers a fresh state at the given program point. The searcher sees
    /// it in the `added` set of the next update.
    pub fn add_state(&mut self, pc: usize) -> StateId {
        let id = self.next_id();
        let node = self.ptree.insert(id);
        self.states.push(Some(ExecutionState::new(id, pc, node)));
        self.live.push(id);
        self.added.push(id);
        id
    }

    /// Forks `parent`, splitting its weight with the new sibling. A fork of
    /// a recovery state is a recovery state at the same level.
    pub fn fork(&mut self, parent: StateId) -> StateId {
        let id = self.next_id();
        let (parent_node, mut child) = {
            let p = self.state_mut(parent);
            p.weight *= 0.5;
            (p.ptree_node, p.clone())
        };
        child.id = id;
        let (left, right) = self.ptree.fork(parent_node, parent, id);
        self.state_mut(parent).ptree_node = left;
        child.ptree_node = right;
        self.states.push(Some(child));
        self.live.push(id);
        self.added.push(id);
        id
    }

    /// Spawns a recovery state on behalf of `owner`, which is suspended
    /// behind it until `resume`.
    pub fn spawn_recovery(
        &mut self,
        owner: StateId,
        level: u32,
        priority: RecoveryPriority,
    ) -> StateId {
        let id = self.next_id();
        let (owner_node, pc) = {
            let o = self.state(owner);
            (o.ptree_node, o.pc)
        };
        let (left, right) = self.ptree.fork(owner_node, owner, id);
        {
            let o = self.state_mut(owner);
            o.ptree_node = left;
            o.suspended = true;
            o.recovery_delegate = Some(id);
        }
        let mut recovery = ExecutionState::new(id, pc, right);
        recovery.recovery = Some(RecoveryInfo {
            level,
            priority,
            resumed: false,
            owner,
        });
        self.states.push(Some(recovery));
        self.live.push(id);
        self.added.push(id);
        id
    }

    /// Marks a recovery state as done: its owner resumes and the recovery
    /// state is flagged resumed (the caller typically terminates it next).
    pub fn resume(&mut self, recovery: StateId) {
        let owner = {
            let r = self.state_mut(recovery);
            let info = r.recovery.as_mut().expect("resume of a non-recovery state");
            info.resumed = true;
            info.owner
        };
        let o = self.state_mut(owner);
        o.suspended = false;
        o.recovery_delegate = None;
    }

    /// Schedules a state for removal. The searcher sees it in the `removed`
    /// set of the next update; a state still sitting in the pending-add
    /// buffer was never shown to the searcher and dies immediately.
    pub fn terminate_state(&mut self, state: StateId) {
        if let Some(pos) = self.added.iter().position(|&s| s == state) {
            self.added.remove(pos);
            self.reap(state);
            return;
        }
        if !self.removed.contains(&state) {
            self.removed.push(state);
        }
    }

    /// Flushes the pending add/remove buffers into a single `update` call,
    /// then reaps the removed states and their process tree leaves. Removed
    /// states remain readable for the duration of the update.
    pub fn dispatch_updates(&mut self, searcher: &mut dyn Searcher, current: Option<StateId>) {
        let added = std::mem::take(&mut self.added);
        let removed = std::mem::take(&mut self.removed);
        searcher.update(self, current, &added, &removed);
        for state in removed {
            self.reap(state);
        }
    }

    /// Records one executed instruction on behalf of a state.
    pub fn record_step(&mut self, state: StateId) {
        let id = self.kinst(self.state(state).pc).id;
        self.stats.record_step(id);
        let s = self.state_mut(state);
        s.insts_since_cov_new += 1;
        let frame = s.stack.last_mut().expect("state with an empty stack");
        frame.call_path_insts += 1;
    }

    fn reap(&mut self, state: StateId) {
        let node = self.state(state).ptree_node;
        self.ptree.remove(node);
        self.live.retain(|&s| s != state);
        self.states[state.index()] = None;
    }
}
