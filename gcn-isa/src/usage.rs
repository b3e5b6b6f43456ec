//! Per-instruction records stored into section side tables.
//!
//! The assembler core appends these while encoding; the register
//! allocator and wait scheduler consume them after the last line.

use bitflags::bitflags;

use crate::encoding::GcnField;
use gcn_types::RegIndex;

/// Index of a register variable in the assembler's regvar registry.
///
/// Usage records referring to real (pre-allocated) registers carry no
/// regvar id and use hardware indices directly.
pub type RegVarId = usize;

bitflags! {
    /// Access direction of a usage record.
    pub struct RwFlags: u8 {
        /// Register range is read.
        const READ = 1;
        /// Register range is written.
        const WRITE = 2;
    }
}

/// Instruction-encoding field a usage record flows through.
///
/// `None` marks accesses that cannot receive a new SSA id (implicit
/// operands, user-declared `.usereg` accesses).
pub type RegField = Option<GcnField>;

/// One virtual-register access of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegVarUsage {
    /// Byte offset of the instruction inside its section.
    pub offset: usize,
    /// Register variable, or `None` for a hardware register range.
    pub reg_var: Option<RegVarId>,
    /// First register lane used.
    pub rstart: RegIndex,
    /// One past the last register lane used.
    pub rend: RegIndex,
    /// Encoding field the range occupies.
    pub reg_field: RegField,
    /// Read/write direction.
    pub rw: RwFlags,
    /// Required alignment of the allocated physical range (0 or 1 = none).
    pub align: u8,
}

/// Kind of a recorded code-flow event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeFlowKind {
    /// Start of a reachable region (`.cf_start`).
    Start,
    /// End of code (`.cf_end`).
    End,
    /// Unconditional jump.
    Jump,
    /// Conditional jump (fall-through successor exists).
    CJump,
    /// Subroutine call.
    Call,
    /// Subroutine return.
    Return,
}

/// One code-flow event: `kind` at `offset`, optionally targeting `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeFlowEntry {
    /// Byte offset of the controlling instruction.
    pub offset: usize,
    /// Jump/call target offset; unused for end/return.
    pub target: usize,
    /// Event kind.
    pub kind: CodeFlowKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rw_flags_combine() {
        let rw = RwFlags::READ | RwFlags::WRITE;
        assert!(rw.contains(RwFlags::READ));
        assert!(rw.contains(RwFlags::WRITE));
    }
}
