//! Selection by a biased coin walk down the live process tree.

use rand::rngs::SmallRng;
use rand::Rng;

use crate::engine::Engine;
use crate::ptree::{NodeId, ProcessTree};
use crate::search::Searcher;
use crate::state::StateId;

/// Walks the process tree from `root` to a leaf, spending one bit of a
/// 32-bit coin word per two-child fork point and refilling the word after
/// 32 flips. Single-child chains are followed without consuming bits.
pub(crate) fn walk(tree: &ProcessTree, rng: &mut SmallRng, root: NodeId) -> StateId {
    let mut flips: u32 = 0;
    let mut bits = 0u32;
    let mut n = root;
    loop {
        let node = tree.node(n);
        if let Some(state) = node.data {
            return state;
        }
        n = match (node.left, node.right) {
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (Some(l), Some(r)) => {
                if bits == 0 {
                    flips = rng.gen();
                    bits = 32;
                }
                bits -= 1;
                if flips & (1 << bits) != 0 {
                    l
                } else {
                    r
                }
            }
            (None, None) => panic!("interior process tree node without children"),
        };
    }
}

/// Follows the recovery chain of a suspended state down to the state that
/// can actually be advanced.
pub(crate) fn skip_suspended(engine: &Engine, mut state: StateId) -> StateId {
    while engine.state(state).is_suspended() {
        state = engine
            .state(state)
            .recovery_state()
            .expect("suspended state without a recovery delegate");
    }
    state
}

/// Selects by walking the engine's process tree, which weights states by
/// the depth of the fork history above them. The tree is maintained by the
/// engine, so updates are no-ops and removals are invisible.
#[derive(Default)]
pub struct RandomPathSearcher;

impl RandomPathSearcher {
    pub fn new() -> RandomPathSearcher {
        RandomPathSearcher
    }
}

impl Searcher for RandomPathSearcher {
    fn select_state(&mut self, engine: &mut Engine) -> StateId {
        let root = engine.ptree.root().expect("select on an empty searcher");
        let leaf = walk(&engine.ptree, &mut engine.rng, root);
        skip_suspended(engine, leaf)
    }

    fn update(
        &mut self,
        _engine: &mut Engine,
        _current: Option<StateId>,
        _added: &[StateId],
        _removed: &[StateId],
    ) {
    }

    fn is_empty(&self, engine: &Engine) -> bool {
        engine.live_states().is_empty()
    }

    fn tracks_removals(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{program, Instr};
    use crate::state::RecoveryPriority;
    use std::collections::HashSet;

    fn engine() -> Engine {
        Engine::builder(program(vec![Instr::Other; 4])).seed(17).build()
    }

    #[test]
    fn reaches_every_leaf() {
        let mut engine = engine();
        let mut searcher = RandomPathSearcher::new();
        let a = engine.add_state(0);
        let b = engine.fork(a);
        let c = engine.fork(a);
        let d = engine.fork(b);
        engine.dispatch_updates(&mut searcher, None);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(searcher.select_state(&mut engine));
        }
        assert_eq!(seen, HashSet::from([a, b, c, d]));
    }

    #[test]
    fn follows_single_child_chains() {
        let mut engine = engine();
        let mut searcher = RandomPathSearcher::new();
        let a = engine.add_state(0);
        let b = engine.fork(a);
        engine.dispatch_updates(&mut searcher, None);

        // pruning leaves a single-child chain above the survivor
        engine.terminate_state(b);
        engine.dispatch_updates(&mut searcher, None);
        for _ in 0..10 {
            assert_eq!(searcher.select_state(&mut engine), a);
        }
    }

    #[test]
    fn descends_recovery_chains_of_suspended_states() {
        let mut engine = engine();
        let mut searcher = RandomPathSearcher::new();
        let owner = engine.add_state(0);
        let rec = engine.spawn_recovery(owner, 0, RecoveryPriority::Low);
        let deeper = engine.spawn_recovery(rec, 1, RecoveryPriority::Low);
        engine.dispatch_updates(&mut searcher, None);

        for _ in 0..20 {
            assert_eq!(searcher.select_state(&mut engine), deeper);
        }
    }

    #[test]
    fn emptiness_mirrors_the_engine() {
        let mut engine = engine();
        let searcher = RandomPathSearcher::new();
        assert!(searcher.is_empty(&engine));
        let a = engine.add_state(0);
        assert!(!searcher.is_empty(&engine));
        engine.terminate_state(a);
        let mut probe = RandomPathSearcher::new();
        engine.dispatch_updates(&mut probe, None);
        assert!(searcher.is_empty(&engine));
    }
}
