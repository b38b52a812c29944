//! The searcher contract shared by all selection strategies, and the
//! construction of the stock strategy stacks.

pub mod basic;
pub mod combinators;
pub mod merging;
pub mod random_path;
pub mod recovery;
pub mod weighted;

use std::time::Duration;

use env_param::EnvParam;
use thiserror::Error;

use crate::engine::Engine;
use crate::state::StateId;

pub static BATCH_TIME: EnvParam<f64> = EnvParam::new("SYMPATH_BATCH_TIME", "5.0");
pub static BATCH_INSTRUCTIONS: EnvParam<u32> = EnvParam::new("SYMPATH_BATCH_INSTRUCTIONS", "10000");
pub static RECOVERY_RATIO: EnvParam<u32> = EnvParam::new("SYMPATH_RECOVERY_RATIO", "75");
pub static DEBUG_LOG_MERGE: EnvParam<bool> = EnvParam::new("SYMPATH_DEBUG_LOG_MERGE", "false");

/// An owning handle to a searcher, as held by composite searchers.
pub type BoxedSearcher = Box<dyn Searcher>;

/// Rejected searcher stack configurations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown weight mode `{0}`")]
    UnknownWeightMode(String),
    #[error("recovery ratio must lie in 0..=100, got {0}")]
    RatioOutOfRange(u32),
    #[error("a merging searcher requires a base searcher that tracks removals")]
    UntrackedMergeBase,
}

/// A selection strategy over the engine's live states.
///
/// The engine drives every searcher through the same protocol: after each
/// step it reports the advanced state and the states it created and
/// destroyed through [`Searcher::update`], then asks for the next state
/// through [`Searcher::select_state`]. A searcher's view must stay equal to
/// the engine's live set, except for states it deliberately parks out of
/// its base searcher's sight.
pub trait Searcher {
    /// Returns the next state to advance.
    ///
    /// Precondition: `!self.is_empty(engine)`. The returned state has been
    /// added and not removed; repeated calls need not agree.
    fn select_state(&mut self, engine: &mut Engine) -> StateId;

    /// Informs the searcher of the last advanced state and of the states
    /// the engine added and removed since the previous update. The two sets
    /// are disjoint; `current` is `None` when no step was taken.
    fn update(
        &mut self,
        engine: &mut Engine,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    );

    fn is_empty(&self, engine: &Engine) -> bool;

    /// Whether `remove_state` actually shrinks this searcher's view.
    /// Random-path searchers derive their view from the process tree and
    /// return false; merging searchers refuse such bases, since their drain
    /// loop would never terminate.
    fn tracks_removals(&self) -> bool {
        true
    }

    fn add_state(&mut self, engine: &mut Engine, state: StateId) {
        self.update(engine, None, &[state], &[]);
    }

    fn remove_state(&mut self, engine: &mut Engine, state: StateId) {
        self.update(engine, None, &[], &[state]);
    }
}

/// The stock strategy: coverage-guided weighted selection interleaved with
/// random path walks, batched to limit state switching.
pub fn default_searcher() -> BoxedSearcher {
    let interleaved = combinators::InterleavedSearcher::new(vec![
        Box::new(random_path::RandomPathSearcher::new()),
        Box::new(weighted::WeightedRandomSearcher::new(
            weighted::WeightMode::CoveringNew,
        )),
    ]);
    Box::new(combinators::BatchingSearcher::new(
        Box::new(interleaved),
        Duration::from_secs_f64(BATCH_TIME.get()),
        BATCH_INSTRUCTIONS.get(),
    ))
}

/// The stock strategy for engines that spawn recovery states: ordinary
/// states go to the default stack, low-priority recovery states to a random
/// recovery path, high-priority ones to a depth-first bypass.
pub fn recovery_searcher() -> Result<BoxedSearcher, ConfigError> {
    Ok(Box::new(recovery::OptimizedSplittedSearcher::new(
        default_searcher(),
        Box::new(recovery::RandomRecoveryPath::new()),
        Box::new(basic::DFSSearcher::new()),
        RECOVERY_RATIO.get(),
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{program, Instr};

    #[test]
    fn stock_stacks_assemble_and_select() {
        let mut engine = Engine::builder(program(vec![Instr::Other; 4])).seed(41).build();
        let mut searcher = recovery_searcher().unwrap();
        assert!(searcher.is_empty(&engine));

        let a = engine.add_state(0);
        engine.dispatch_updates(searcher.as_mut(), None);
        assert!(!searcher.is_empty(&engine));
        assert_eq!(searcher.select_state(&mut engine), a);

        // the default stack walks the process tree, so it cannot back a
        // merging searcher
        assert!(!searcher.tracks_removals());
    }
}
