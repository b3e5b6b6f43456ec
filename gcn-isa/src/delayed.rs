//! Delayed-operation descriptors and the hardware wait-queue model.
//!
//! Every memory-class instruction completes asynchronously; it enqueues
//! onto one of the hardware counters (`vmcnt`, `lgkmcnt`, `expcnt`). A
//! `s_waitcnt` instruction names, per counter, the maximum number of
//! still-outstanding operations the program tolerates at that point.

use crate::usage::{RegVarId, RwFlags};
use gcn_types::RegIndex;

/// Maximum number of wait queues any architecture exposes.
pub const MAX_WAIT_QUEUES: usize = 4;

/// Hardware wait counter a delayed op retires through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WaitQueueKind {
    /// Vector memory operations (`vmcnt`).
    VmCnt = 0,
    /// Scalar memory, LDS and GDS operations (`lgkmcnt`).
    LgkmCnt = 1,
    /// Export and GDS-done operations (`expcnt`).
    ExpCnt = 2,
}

/// Kind of delayed operation an instruction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DelayedOpKind {
    /// Vector memory load (ordered within `vmcnt`).
    VectorMemLoad = 0,
    /// Vector memory store (ordered within `vmcnt`).
    VectorMemStore = 1,
    /// Scalar memory load (completes in unspecified order).
    ScalarMemLoad = 2,
    /// LDS access (ordered within `lgkmcnt`).
    LdsOp = 3,
    /// Export (ordered within `expcnt`).
    Export = 4,
    /// FLAT access; counts on `vmcnt` and additionally on `lgkmcnt`.
    FlatOp = 5,
}

/// Static behavior of one delayed-op kind.
#[derive(Debug, Clone, Copy)]
pub struct DelayedOpProfile {
    /// Counter the op retires through.
    pub queue: WaitQueueKind,
    /// Whether ops of this kind retire in issue order.
    pub ordered: bool,
    /// Whether the op is complete once its registers are read out
    /// (loads), as opposed to complete on data visibility (stores).
    pub finish_on_reg_read_out: bool,
    /// Bytes per queue entry, or `None` for one entry per op.
    pub counting: Option<u8>,
}

impl DelayedOpKind {
    /// Behavior profile of this kind.
    pub fn profile(self) -> DelayedOpProfile {
        match self {
            DelayedOpKind::VectorMemLoad => DelayedOpProfile {
                queue: WaitQueueKind::VmCnt,
                ordered: true,
                finish_on_reg_read_out: true,
                counting: None,
            },
            DelayedOpKind::VectorMemStore => DelayedOpProfile {
                queue: WaitQueueKind::VmCnt,
                ordered: true,
                finish_on_reg_read_out: false,
                counting: None,
            },
            DelayedOpKind::ScalarMemLoad => DelayedOpProfile {
                queue: WaitQueueKind::LgkmCnt,
                ordered: false,
                finish_on_reg_read_out: true,
                counting: None,
            },
            DelayedOpKind::LdsOp => DelayedOpProfile {
                queue: WaitQueueKind::LgkmCnt,
                ordered: true,
                finish_on_reg_read_out: true,
                counting: None,
            },
            DelayedOpKind::Export => DelayedOpProfile {
                queue: WaitQueueKind::ExpCnt,
                ordered: true,
                finish_on_reg_read_out: false,
                counting: None,
            },
            DelayedOpKind::FlatOp => DelayedOpProfile {
                queue: WaitQueueKind::VmCnt,
                ordered: true,
                finish_on_reg_read_out: true,
                counting: None,
            },
        }
    }

    /// Second counter the op also occupies, if any (FLAT counts on both
    /// `vmcnt` and `lgkmcnt`).
    pub fn second_queue(self) -> Option<WaitQueueKind> {
        match self {
            DelayedOpKind::FlatOp => Some(WaitQueueKind::LgkmCnt),
            _ => None,
        }
    }
}

/// One delayed operation recorded at assembly time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayedOp {
    /// Byte offset of the issuing instruction.
    pub offset: usize,
    /// Kind, selecting queue membership and ordering.
    pub kind: DelayedOpKind,
    /// Register variable of the result/data range, or `None` for a
    /// hardware range.
    pub reg_var: Option<RegVarId>,
    /// First register lane.
    pub rstart: RegIndex,
    /// One past the last register lane.
    pub rend: RegIndex,
    /// Access direction on the primary queue.
    pub rw: RwFlags,
    /// Access direction on the second queue, if the kind has one.
    pub rw2: RwFlags,
}

/// User-supplied or generated wait instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitInstr {
    /// Byte offset of the `s_waitcnt` word.
    pub offset: usize,
    /// Maximum allowed outstanding ops per queue.
    pub waits: [u16; MAX_WAIT_QUEUES],
}

/// Per-architecture wait-queue configuration.
#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    /// Number of live queues.
    pub queue_count: usize,
    /// In-flight capacity per queue (maximum counter value plus one).
    pub queue_sizes: [u16; MAX_WAIT_QUEUES],
}

impl WaitConfig {
    /// Configuration for the GCN 1.0–1.2 generations: `vmcnt` 0..=15,
    /// `lgkmcnt` 0..=15, `expcnt` 0..=7.
    pub fn gcn() -> Self {
        WaitConfig { queue_count: 3, queue_sizes: [16, 16, 8, 0] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_loads_are_unordered() {
        assert!(!DelayedOpKind::ScalarMemLoad.profile().ordered);
        assert!(DelayedOpKind::LdsOp.profile().ordered);
    }

    #[test]
    fn flat_occupies_two_queues() {
        assert_eq!(DelayedOpKind::FlatOp.profile().queue, WaitQueueKind::VmCnt);
        assert_eq!(DelayedOpKind::FlatOp.second_queue(), Some(WaitQueueKind::LgkmCnt));
        assert_eq!(DelayedOpKind::LdsOp.second_queue(), None);
    }
}
