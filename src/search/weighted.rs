//! Selection proportional to a per-state weight, backed by a discrete PDF.

use std::str::FromStr;

use rand::Rng;

use crate::collections::pdf::DiscretePdf;
use crate::engine::Engine;
use crate::search::{ConfigError, Searcher};
use crate::state::{ExecutionState, StateId};

/// Weight functions available to [`WeightedRandomSearcher`]. All of them
/// yield positive weights.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WeightMode {
    /// The state's depth-derived weight, cached at insertion.
    Depth,
    /// Penalizes globally hot instructions, quadratically.
    InstCount,
    /// Penalizes hot call paths.
    CPInstCount,
    /// Penalizes states with expensive solver queries.
    QueryCost,
    /// Favors states close to uncovered code.
    MinDistToUncovered,
    /// Distance to uncovered code plus a coverage freshness bonus.
    CoveringNew,
    /// Like `CoveringNew`, with the distance taken to call sites.
    PatchTesting,
}

impl WeightMode {
    /// Whether weights depend on evolving statistics and must be recomputed
    /// on every step.
    fn updates_weights(self) -> bool {
        !matches!(self, WeightMode::Depth)
    }
}

impl FromStr for WeightMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<WeightMode, ConfigError> {
        match s {
            "depth" => Ok(WeightMode::Depth),
            "inst-count" => Ok(WeightMode::InstCount),
            "cp-inst-count" => Ok(WeightMode::CPInstCount),
            "query-cost" => Ok(WeightMode::QueryCost),
            "min-dist-to-uncovered" => Ok(WeightMode::MinDistToUncovered),
            "covering-new" => Ok(WeightMode::CoveringNew),
            "patch-testing" => Ok(WeightMode::PatchTesting),
            other => Err(ConfigError::UnknownWeightMode(other.to_string())),
        }
    }
}

pub struct WeightedRandomSearcher {
    states: DiscretePdf<StateId>,
    mode: WeightMode,
    update_weights: bool,
}

impl WeightedRandomSearcher {
    pub fn new(mode: WeightMode) -> WeightedRandomSearcher {
        WeightedRandomSearcher {
            states: DiscretePdf::new(),
            mode,
            update_weights: mode.updates_weights(),
        }
    }

    fn weight(&self, engine: &Engine, es: &ExecutionState) -> f64 {
        match self.mode {
            WeightMode::Depth => es.weight,
            WeightMode::InstCount => {
                let count = engine.stats.indexed_instructions(engine.kinst(es.pc).id);
                let inv = 1.0 / count.max(1) as f64;
                inv * inv
            }
            WeightMode::CPInstCount => {
                let frame = es.stack.last().expect("state with an empty stack");
                1.0 / frame.call_path_insts.max(1) as f64
            }
            WeightMode::QueryCost => {
                if es.query_cost < 0.1 {
                    1.0
                } else {
                    1.0 / es.query_cost
                }
            }
            WeightMode::MinDistToUncovered => {
                let dist = engine.min_dist_to_uncovered(es);
                let inv = 1.0 / if dist == 0 { 10_000 } else { dist } as f64;
                inv * inv
            }
            WeightMode::CoveringNew | WeightMode::PatchTesting => {
                let dist = if self.mode == WeightMode::PatchTesting {
                    engine.min_dist_to_call(es)
                } else {
                    engine.min_dist_to_uncovered(es)
                };
                let inv_dist = 1.0 / if dist == 0 { 10_000 } else { dist } as f64;
                let inv_fresh = if es.insts_since_cov_new > 0 {
                    1.0 / (es.insts_since_cov_new as i64 - 1000).max(1) as f64
                } else {
                    0.0
                };
                inv_fresh * inv_fresh + inv_dist * inv_dist
            }
        }
    }
}

impl Searcher for WeightedRandomSearcher {
    fn select_state(&mut self, engine: &mut Engine) -> StateId {
        let u = engine.rng.gen::<f64>();
        self.states.choose(u)
    }

    fn update(
        &mut self,
        engine: &mut Engine,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        if self.update_weights {
            if let Some(cur) = current {
                if !removed.contains(&cur) {
                    let weight = self.weight(engine, engine.state(cur));
                    self.states.update(cur, weight);
                }
            }
        }
        for &es in added {
            let weight = self.weight(engine, engine.state(es));
            self.states.insert(es, weight);
        }
        for &es in removed {
            self.states.remove(es);
        }
    }

    fn is_empty(&self, _engine: &Engine) -> bool {
        self.states.is_empty()
    }
}
