//! The minimal view of the program under execution: instructions are opaque
//! except for being calls (to recognize merge points) and carry a dense
//! identifier (to index per-instruction statistics).

use std::fmt;

/// Dense identifier of an instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstructionId(pub u32);

impl fmt::Display for InstructionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i{}", self.0)
    }
}

/// Identifier of a function symbol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instr {
    Call(FunctionId),
    Other,
}

/// An instruction together with its dense identifier.
#[derive(Copy, Clone, Debug)]
pub struct KInstruction {
    pub id: InstructionId,
    pub instr: Instr,
}

/// Builds a program from raw instructions, assigning identifiers in order.
pub fn program(instrs: impl IntoIterator<Item = Instr>) -> Vec<KInstruction> {
    instrs
        .into_iter()
        .enumerate()
        .map(|(i, instr)| KInstruction {
            id: InstructionId(i as u32),
            instr,
        })
        .collect()
}
