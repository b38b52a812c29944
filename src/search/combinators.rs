//! Searchers that wrap other searchers: batching, iterative deepening over
//! wall-clock time, and round-robin interleaving.

use std::collections::HashSet;
use std::time::Duration;

use itertools::Itertools;
use log::info;

use crate::engine::Engine;
use crate::search::{BoxedSearcher, Searcher};
use crate::state::StateId;

/// Sticks with one base-chosen state until a time or instruction budget
/// runs out, so the engine does not pay a strategy switch on every step.
/// The cached choice survives intervening updates unless the state itself
/// is removed.
pub struct BatchingSearcher {
    base: BoxedSearcher,
    time_budget: Duration,
    instruction_budget: u32,
    last_state: Option<StateId>,
    last_start_time: Duration,
    last_start_instructions: u64,
}

impl BatchingSearcher {
    pub fn new(
        base: BoxedSearcher,
        time_budget: Duration,
        instruction_budget: u32,
    ) -> BatchingSearcher {
        BatchingSearcher {
            base,
            time_budget,
            instruction_budget,
            last_state: None,
            last_start_time: Duration::ZERO,
            last_start_instructions: 0,
        }
    }
}

impl Searcher for BatchingSearcher {
    fn select_state(&mut self, engine: &mut Engine) -> StateId {
        let now = engine.now();
        let instructions = engine.stats.instructions;
        if let Some(last) = self.last_state {
            let elapsed = now - self.last_start_time;
            if elapsed <= self.time_budget
                && instructions - self.last_start_instructions
                    <= u64::from(self.instruction_budget)
            {
                return last;
            }
            // a slow solver call can blow far past a tight budget; widen it
            if elapsed > self.time_budget.mul_f64(1.1) {
                info!(
                    "batching: raised time budget from {:?} to {:?}",
                    self.time_budget, elapsed
                );
                self.time_budget = elapsed;
            }
        }
        let fresh = self.base.select_state(engine);
        self.last_state = Some(fresh);
        self.last_start_time = now;
        self.last_start_instructions = instructions;
        fresh
    }

    fn update(
        &mut self,
        engine: &mut Engine,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        if self.last_state.map_or(false, |s| removed.contains(&s)) {
            self.last_state = None;
        }
        self.base.update(engine, current, added, removed);
    }

    fn is_empty(&self, engine: &Engine) -> bool {
        self.base.is_empty(engine)
    }

    fn tracks_removals(&self) -> bool {
        self.base.tracks_removals()
    }
}

/// Advances states under a per-round wall-clock allowance. States that blow
/// the allowance are paused out of the base searcher; once the base stalls,
/// the allowance doubles and every paused state is taken back.
pub struct IterativeDeepeningTimeSearcher {
    base: BoxedSearcher,
    paused: HashSet<StateId>,
    budget: Duration,
    start: Option<Duration>,
}

impl IterativeDeepeningTimeSearcher {
    pub fn new(base: BoxedSearcher) -> IterativeDeepeningTimeSearcher {
        IterativeDeepeningTimeSearcher {
            base,
            paused: HashSet::new(),
            budget: Duration::from_secs(1),
            start: None,
        }
    }
}

impl Searcher for IterativeDeepeningTimeSearcher {
    fn select_state(&mut self, engine: &mut Engine) -> StateId {
        let res = self.base.select_state(engine);
        self.start = Some(engine.now());
        res
    }

    fn update(
        &mut self,
        engine: &mut Engine,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        let elapsed = self.start.map(|start| engine.now() - start);

        let mut forwarded = Vec::with_capacity(removed.len());
        for &es in removed {
            if self.paused.remove(&es) {
                continue;
            }
            forwarded.push(es);
        }
        self.base.update(engine, current, added, &forwarded);

        if let (Some(cur), Some(elapsed)) = (current, elapsed) {
            if !removed.contains(&cur) && elapsed > self.budget {
                self.paused.insert(cur);
                self.base.remove_state(engine, cur);
            }
        }

        if self.base.is_empty(engine) && !self.paused.is_empty() {
            self.budget *= 2;
            info!("iterative deepening: raised time budget to {:?}", self.budget);
            let paused = self.paused.drain().sorted().collect_vec();
            self.base.update(engine, None, &paused, &[]);
        }
    }

    fn is_empty(&self, engine: &Engine) -> bool {
        self.base.is_empty(engine) && self.paused.is_empty()
    }

    fn tracks_removals(&self) -> bool {
        self.base.tracks_removals()
    }
}

/// Round-robin over several searchers that each track the full state set.
pub struct InterleavedSearcher {
    searchers: Vec<BoxedSearcher>,
    index: usize,
}

impl InterleavedSearcher {
    pub fn new(searchers: Vec<BoxedSearcher>) -> InterleavedSearcher {
        assert!(
            !searchers.is_empty(),
            "interleaved searcher needs at least one sub-searcher"
        );
        let index = searchers.len();
        InterleavedSearcher { searchers, index }
    }
}

impl Searcher for InterleavedSearcher {
    fn select_state(&mut self, engine: &mut Engine) -> StateId {
        self.index -= 1;
        let chosen = self.index;
        if self.index == 0 {
            self.index = self.searchers.len();
        }
        self.searchers[chosen].select_state(engine)
    }

    fn update(
        &mut self,
        engine: &mut Engine,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        for searcher in &mut self.searchers {
            searcher.update(engine, current, added, removed);
        }
    }

    fn is_empty(&self, engine: &Engine) -> bool {
        self.searchers[0].is_empty(engine)
    }

    fn tracks_removals(&self) -> bool {
        self.searchers.iter().all(|s| s.tracks_removals())
    }
}
