//! Depth-first, breadth-first and uniform random selection over a flat view
//! of the live states.

use std::collections::VecDeque;

use rand::Rng;

use crate::engine::Engine;
use crate::search::Searcher;
use crate::state::StateId;

/// Selects the most recently added state.
#[derive(Default)]
pub struct DFSSearcher {
    states: Vec<StateId>,
}

impl DFSSearcher {
    pub fn new() -> DFSSearcher {
        DFSSearcher::default()
    }
}

impl Searcher for DFSSearcher {
    fn select_state(&mut self, _engine: &mut Engine) -> StateId {
        *self.states.last().expect("select on an empty searcher")
    }

    fn update(
        &mut self,
        _engine: &mut Engine,
        _current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        self.states.extend_from_slice(added);
        for &es in removed {
            if self.states.last() == Some(&es) {
                self.states.pop();
            } else {
                let pos = self
                    .states
                    .iter()
                    .position(|&s| s == es)
                    .expect("invalid state removed");
                self.states.remove(pos);
            }
        }
    }

    fn is_empty(&self, _engine: &Engine) -> bool {
        self.states.is_empty()
    }
}

/// Selects the oldest known state. When the current state forks, it is
/// rotated to the tail so its siblings get their turn first.
#[derive(Default)]
pub struct BFSSearcher {
    states: VecDeque<StateId>,
}

impl BFSSearcher {
    pub fn new() -> BFSSearcher {
        BFSSearcher::default()
    }
}

impl Searcher for BFSSearcher {
    fn select_state(&mut self, _engine: &mut Engine) -> StateId {
        *self.states.front().expect("select on an empty searcher")
    }

    fn update(
        &mut self,
        _engine: &mut Engine,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        // a non-empty `added` set means the current state forked
        if !added.is_empty() {
            if let Some(cur) = current {
                if !removed.contains(&cur) {
                    if self.states.front() == Some(&cur) {
                        self.states.pop_front();
                    } else {
                        // another interleaved searcher advanced it past us
                        let pos = self
                            .states
                            .iter()
                            .position(|&s| s == cur)
                            .expect("current state unknown to breadth-first searcher");
                        self.states.remove(pos);
                    }
                    self.states.push_back(cur);
                }
            }
        }

        self.states.extend(added.iter().copied());
        for &es in removed {
            if self.states.front() == Some(&es) {
                self.states.pop_front();
            } else {
                let pos = self
                    .states
                    .iter()
                    .position(|&s| s == es)
                    .expect("invalid state removed");
                self.states.remove(pos);
            }
        }
    }

    fn is_empty(&self, _engine: &Engine) -> bool {
        self.states.is_empty()
    }
}

/// Selects uniformly at random.
#[derive(Default)]
pub struct RandomSearcher {
    states: Vec<StateId>,
}

impl RandomSearcher {
    pub fn new() -> RandomSearcher {
        RandomSearcher::default()
    }
}

impl Searcher for RandomSearcher {
    fn select_state(&mut self, engine: &mut Engine) -> StateId {
        assert!(!self.states.is_empty(), "select on an empty searcher");
        self.states[engine.rng.gen_range(0..self.states.len())]
    }

    fn update(
        &mut self,
        _engine: &mut Engine,
        _current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        self.states.extend_from_slice(added);
        for &es in removed {
            let pos = self
                .states
                .iter()
                .position(|&s| s == es)
                .expect("invalid state removed");
            self.states.remove(pos);
        }
    }

    fn is_empty(&self, _engine: &Engine) -> bool {
        self.states.is_empty()
    }
}
