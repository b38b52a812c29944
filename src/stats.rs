//! Execution counters consumed by the weight functions.

use crate::code::InstructionId;

/// Global execution statistics. `instructions` is monotone; the table counts
/// visits per dense instruction id and grows on demand.
#[derive(Clone, Debug, Default)]
pub struct Stats {
    pub instructions: u64,
    per_instruction: Vec<u64>,
}

impl Stats {
    pub fn new() -> Stats {
        Stats::default()
    }

    /// Records one executed instruction.
    pub fn record_step(&mut self, id: InstructionId) {
        self.instructions += 1;
        let idx = id.0 as usize;
        if idx >= self.per_instruction.len() {
            self.per_instruction.resize(idx + 1, 0);
        }
        self.per_instruction[idx] += 1;
    }

    /// How many times the given instruction has been executed, over all
    /// states.
    pub fn indexed_instructions(&self, id: InstructionId) -> u64 {
        self.per_instruction.get(id.0 as usize).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters() {
        let mut stats = Stats::new();
        assert_eq!(stats.indexed_instructions(InstructionId(3)), 0);
        stats.record_step(InstructionId(3));
        stats.record_step(InstructionId(3));
        stats.record_step(InstructionId(0));
        assert_eq!(stats.instructions, 3);
        assert_eq!(stats.indexed_instructions(InstructionId(3)), 2);
        assert_eq!(stats.indexed_instructions(InstructionId(1)), 0);
    }
}
