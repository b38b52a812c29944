//! Coalescing of states parked at calls to a designated merge function.
//!
//! Both searchers intercept states whose next instruction is such a call,
//! hold them aside, and try to absorb compatible states into one another.
//! States absorbed this way are terminated by the searcher itself and are
//! stripped from the removal sets forwarded to the base, which never held
//! them at that point.

use std::collections::{BTreeMap, HashSet};

use itertools::Itertools;
use log::debug;

use crate::code::InstructionId;
use crate::engine::Engine;
use crate::search::{BoxedSearcher, ConfigError, Searcher, DEBUG_LOG_MERGE};
use crate::state::StateId;

/// Parks at most one state per merge point. A second arrival is either
/// absorbed into the parked state or bumps it out, so at any time only one
/// state waits at each merge call.
pub struct BumpMergingSearcher {
    base: BoxedSearcher,
    parked: BTreeMap<InstructionId, StateId>,
    /// States this searcher absorbed and terminated itself.
    absorbed: HashSet<StateId>,
}

impl BumpMergingSearcher {
    pub fn new(base: BoxedSearcher) -> Result<BumpMergingSearcher, ConfigError> {
        if !base.tracks_removals() {
            return Err(ConfigError::UntrackedMergeBase);
        }
        Ok(BumpMergingSearcher {
            base,
            parked: BTreeMap::new(),
            absorbed: HashSet::new(),
        })
    }
}

impl Searcher for BumpMergingSearcher {
    fn select_state(&mut self, engine: &mut Engine) -> StateId {
        loop {
            if self.base.is_empty(engine) {
                // out of running states: unpark one and step it past its
                // merge call
                let (&mp, &es) = self
                    .parked
                    .iter()
                    .next()
                    .expect("select on an empty searcher");
                self.parked.remove(&mp);
                engine.advance_past_merge(es);
                self.base.add_state(engine, es);
            }

            let es = self.base.select_state(engine);
            let Some(mp) = engine.merge_point(es) else {
                return es;
            };
            self.base.remove_state(engine, es);
            match self.parked.get(&mp).copied() {
                None => {
                    self.parked.insert(mp, es);
                }
                Some(parked) => {
                    if engine.try_merge(parked, es) {
                        if DEBUG_LOG_MERGE.get() {
                            debug!("merged {es} into parked {parked} at {mp}");
                        }
                        self.absorbed.insert(es);
                        engine.terminate_state(es);
                    } else {
                        // the bump: the newcomer takes the slot, the old
                        // occupant steps past the merge call and runs on
                        self.parked.insert(mp, es);
                        engine.advance_past_merge(parked);
                        self.base.add_state(engine, parked);
                    }
                }
            }
        }
    }

    fn update(
        &mut self,
        engine: &mut Engine,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        let mut forwarded = Vec::with_capacity(removed.len());
        for &es in removed {
            if self.absorbed.remove(&es) {
                continue;
            }
            let parked_at = self
                .parked
                .iter()
                .find(|(_, &s)| s == es)
                .map(|(&mp, _)| mp);
            if let Some(mp) = parked_at {
                self.parked.remove(&mp);
                continue;
            }
            forwarded.push(es);
        }
        self.base.update(engine, current, added, &forwarded);
    }

    fn is_empty(&self, engine: &Engine) -> bool {
        self.base.is_empty(engine) && self.parked.is_empty()
    }
}

/// Drains the base searcher into the parked set until a state not at a
/// merge point turns up, then merges each parked group wholesale and
/// releases the survivors past their merge calls.
pub struct MergingSearcher {
    base: BoxedSearcher,
    parked: HashSet<StateId>,
    absorbed: HashSet<StateId>,
}

impl MergingSearcher {
    pub fn new(base: BoxedSearcher) -> Result<MergingSearcher, ConfigError> {
        if !base.tracks_removals() {
            return Err(ConfigError::UntrackedMergeBase);
        }
        Ok(MergingSearcher {
            base,
            parked: HashSet::new(),
            absorbed: HashSet::new(),
        })
    }
}

impl Searcher for MergingSearcher {
    fn select_state(&mut self, engine: &mut Engine) -> StateId {
        loop {
            while !self.base.is_empty(engine) {
                let es = self.base.select_state(engine);
                if engine.merge_point(es).is_some() {
                    self.base.remove_state(engine, es);
                    self.parked.insert(es);
                } else {
                    return es;
                }
            }
            assert!(!self.parked.is_empty(), "select on an empty searcher");

            let mut groups: BTreeMap<InstructionId, Vec<StateId>> = BTreeMap::new();
            for &es in self.parked.iter().sorted() {
                let mp = engine
                    .merge_point(es)
                    .expect("parked state moved off its merge point");
                groups.entry(mp).or_default().push(es);
            }
            if DEBUG_LOG_MERGE.get() {
                debug!(
                    "merging {} parked states at {} merge points",
                    self.parked.len(),
                    groups.len()
                );
            }

            for (mp, mut group) in groups {
                while !group.is_empty() {
                    let survivor = group.remove(0);
                    group.retain(|&other| {
                        if engine.try_merge(survivor, other) {
                            if DEBUG_LOG_MERGE.get() {
                                debug!("merged {other} into {survivor} at {mp}");
                            }
                            self.absorbed.insert(other);
                            self.parked.remove(&other);
                            engine.terminate_state(other);
                            false
                        } else {
                            true
                        }
                    });
                    self.parked.remove(&survivor);
                    engine.advance_past_merge(survivor);
                    self.base.add_state(engine, survivor);
                }
            }
        }
    }

    fn update(
        &mut self,
        engine: &mut Engine,
        current: Option<StateId>,
        added: &[StateId],
        removed: &[StateId],
    ) {
        let mut forwarded = Vec::with_capacity(removed.len());
        for &es in removed {
            if self.absorbed.remove(&es) {
                continue;
            }
            if self.parked.remove(&es) {
                continue;
            }
            forwarded.push(es);
        }
        self.base.update(engine, current, added, &forwarded);
    }

    fn is_empty(&self, engine: &Engine) -> bool {
        self.base.is_empty(engine) && self.parked.is_empty()
    }
}
