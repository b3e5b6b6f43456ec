//! Output sections and kernels.

use bitflags::bitflags;

use crate::handlers::{UsageHandler, WaitHandler};
use crate::source::{SourcePos, SourcePosHandler};
use gcn_isa::{CodeFlowEntry, RegVarId};
use gcn_types::{KernelId, RegIndex, SectionId};

bitflags! {
    /// Section capability flags.
    pub struct SectionFlags: u8 {
        /// Bytes can be written into the section.
        const WRITEABLE = 1;
        /// The section occupies addresses (labels allowed).
        const ADDRESSABLE = 2;
        /// Addresses are absolute (`.org`-positioned raw code).
        const ABS_ADDRESSABLE = 4;
        /// Section may record unresolved expressions.
        const UNRESOLVABLE = 8;
    }
}

/// Explicit linear-dependency record from `.rvlin`: the lanes
/// `[rstart, rend)` of `reg_var` must be allocated consecutively with
/// the record preceding it at the same offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearDepRecord {
    /// Instruction offset the constraint belongs to.
    pub offset: usize,
    /// Constrained register variable.
    pub reg_var: RegVarId,
    /// First lane.
    pub rstart: RegIndex,
    /// One past the last lane.
    pub rend: RegIndex,
}

/// One output section.
#[derive(Debug)]
pub struct Section {
    /// Section name (`.text`, `.data`, user names).
    pub name: String,
    /// Owning kernel, or [`gcn_types::GLOBAL_KERNEL`].
    pub kernel_id: KernelId,
    /// Capability flags.
    pub flags: SectionFlags,
    /// Required alignment of the section start.
    pub alignment: u64,
    /// Raw content bytes.
    pub content: Vec<u8>,
    /// Recorded control-flow events for the register allocator.
    pub code_flow: Vec<CodeFlowEntry>,
    /// Per-instruction register usage records.
    pub usages: UsageHandler,
    /// `.rvlin` records.
    pub linear_deps: Vec<LinearDepRecord>,
    /// Delayed ops and wait instructions.
    pub waits: WaitHandler,
    /// Statement positions for offsets (diagnostics).
    pub source_positions: SourcePosHandler,
    /// Relocation space the section belongs to, if any.
    pub rel_space: Option<usize>,
    /// Address inside the relocation space once laid out.
    pub rel_address: u64,
}

impl Section {
    /// Fresh writable, addressable section.
    pub fn new(name: impl Into<String>, kernel_id: KernelId, flags: SectionFlags) -> Self {
        Section {
            name: name.into(),
            kernel_id,
            flags,
            alignment: 0,
            content: Vec::new(),
            code_flow: Vec::new(),
            usages: UsageHandler::default(),
            linear_deps: Vec::new(),
            waits: WaitHandler::default(),
            source_positions: SourcePosHandler::default(),
            rel_space: None,
            rel_address: 0,
        }
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// True when instructions were recorded (drives back-end passes).
    pub fn has_code(&self) -> bool {
        !self.code_flow.is_empty()
            || !self.usages.is_empty()
            || !self.waits.is_empty()
            || !self.linear_deps.is_empty()
    }
}

/// One kernel and its code regions.
#[derive(Debug)]
pub struct Kernel {
    /// Kernel name.
    pub name: String,
    /// Where `.kernel` appeared.
    pub source_pos: SourcePos,
    /// `[start, end)` slices of the code section belonging to this
    /// kernel; `end == usize::MAX` marks a still-open region.
    pub code_regions: Vec<(usize, usize)>,
}

impl Kernel {
    /// New kernel declared at `source_pos`.
    pub fn new(name: impl Into<String>, source_pos: SourcePos) -> Self {
        Kernel { name: name.into(), source_pos, code_regions: Vec::new() }
    }

    /// Open a code region at `offset` unless one is already open.
    pub fn open_code_region(&mut self, offset: usize) {
        if let Some(&(_, end)) = self.code_regions.last() {
            if end == usize::MAX {
                return;
            }
            // collapse an immediately re-opened region
            if let Some(last) = self.code_regions.last_mut() {
                if last.1 == offset {
                    last.1 = usize::MAX;
                    return;
                }
            }
        }
        self.code_regions.push((offset, usize::MAX));
    }

    /// Close the open code region at `offset`.
    pub fn close_code_region(&mut self, offset: usize) {
        match self.code_regions.last_mut() {
            Some(last) if last.1 == usize::MAX => last.1 = offset,
            _ => {
                // no open region: treat whole tail as a region
                self.code_regions.push((0, offset));
            }
        }
    }

    /// Drop zero-length regions (open/close at the same offset).
    pub fn prune_empty_regions(&mut self) {
        self.code_regions.retain(|&(s, e)| e > s);
    }
}

/// Identifier of the pseudo-section for absolute `.org` output.
pub const ABS_SECTION_NAME: &str = ".abs";

/// Common section id type re-export for call sites.
pub type SectionIdType = SectionId;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;
    use std::rc::Rc;

    fn pos() -> SourcePos {
        SourcePos::new(Rc::new(Source::File { parent: None, path: Default::default() }), 1, 1)
    }

    #[test]
    fn code_regions_open_close() {
        let mut k = Kernel::new("k", pos());
        k.open_code_region(0);
        k.close_code_region(16);
        k.open_code_region(32);
        k.close_code_region(48);
        assert_eq!(k.code_regions, vec![(0, 16), (32, 48)]);
    }

    #[test]
    fn reopening_at_close_offset_merges() {
        let mut k = Kernel::new("k", pos());
        k.open_code_region(0);
        k.close_code_region(16);
        k.open_code_region(16);
        k.close_code_region(24);
        assert_eq!(k.code_regions, vec![(0, 24)]);
    }
}
