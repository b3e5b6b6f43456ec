//! Per-section side tables filled while encoding instructions and
//! consumed by the register allocator and wait scheduler.

use gcn_isa::{DelayedOp, RegVarUsage, WaitInstr};

/// Offset-ordered store of register-variable usage records.
///
/// Records arrive in nondecreasing offset order as instructions are
/// encoded; consumers walk them with a cursor.
#[derive(Debug, Default)]
pub struct UsageHandler {
    usages: Vec<RegVarUsage>,
}

/// Cursor into a [`UsageHandler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageReadPos {
    /// Index of the next record.
    pub pos: usize,
}

impl UsageHandler {
    /// Append a record; `offset` must be nondecreasing.
    pub fn push(&mut self, usage: RegVarUsage) {
        debug_assert!(self.usages.last().map(|u| u.offset <= usage.offset).unwrap_or(true));
        self.usages.push(usage);
    }

    /// True when no records were stored.
    pub fn is_empty(&self) -> bool {
        self.usages.is_empty()
    }

    /// Whether `rpos` has another record.
    pub fn has_next(&self, rpos: UsageReadPos) -> bool {
        rpos.pos < self.usages.len()
    }

    /// Read the record at `rpos`, advancing it.
    pub fn next_usage(&self, rpos: &mut UsageReadPos) -> RegVarUsage {
        let u = self.usages[rpos.pos];
        rpos.pos += 1;
        u
    }

    /// Cursor to the first record at or after `offset`.
    pub fn find_position_by_offset(&self, offset: usize) -> UsageReadPos {
        UsageReadPos { pos: self.usages.partition_point(|u| u.offset < offset) }
    }

    /// All records (tests, dumps).
    pub fn records(&self) -> &[RegVarUsage] {
        &self.usages
    }
}

/// Store of delayed ops and explicit wait instructions, merged by
/// offset on iteration.
#[derive(Debug, Default)]
pub struct WaitHandler {
    delayed_ops: Vec<DelayedOp>,
    wait_instrs: Vec<WaitInstr>,
}

/// Cursor into a [`WaitHandler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitReadPos {
    /// Index of the next delayed op.
    pub del_op_pos: usize,
    /// Index of the next wait instruction.
    pub wait_instr_pos: usize,
}

/// One merged item from a [`WaitHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitItem {
    /// A delayed operation.
    DelayedOp(DelayedOp),
    /// A user wait instruction.
    WaitInstr(WaitInstr),
}

impl WaitItem {
    /// Offset of the underlying record.
    pub fn offset(&self) -> usize {
        match self {
            WaitItem::DelayedOp(d) => d.offset,
            WaitItem::WaitInstr(w) => w.offset,
        }
    }
}

impl WaitHandler {
    /// Record a delayed op; offsets must be nondecreasing.
    pub fn push_delayed_op(&mut self, op: DelayedOp) {
        debug_assert!(self.delayed_ops.last().map(|d| d.offset <= op.offset).unwrap_or(true));
        self.delayed_ops.push(op);
    }

    /// Record an explicit wait instruction; offsets must be
    /// nondecreasing.
    pub fn push_wait_instr(&mut self, instr: WaitInstr) {
        debug_assert!(self.wait_instrs.last().map(|w| w.offset <= instr.offset).unwrap_or(true));
        self.wait_instrs.push(instr);
    }

    /// True when nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.delayed_ops.is_empty() && self.wait_instrs.is_empty()
    }

    /// Whether `rpos` has another item.
    pub fn has_next(&self, rpos: WaitReadPos) -> bool {
        rpos.del_op_pos < self.delayed_ops.len() || rpos.wait_instr_pos < self.wait_instrs.len()
    }

    /// Read the item with the lowest offset, delayed ops first on ties.
    pub fn next_item(&self, rpos: &mut WaitReadPos) -> WaitItem {
        let del_offset =
            self.delayed_ops.get(rpos.del_op_pos).map(|d| d.offset).unwrap_or(usize::MAX);
        let wait_offset =
            self.wait_instrs.get(rpos.wait_instr_pos).map(|w| w.offset).unwrap_or(usize::MAX);
        if del_offset < wait_offset {
            let d = self.delayed_ops[rpos.del_op_pos];
            rpos.del_op_pos += 1;
            WaitItem::DelayedOp(d)
        } else {
            let w = self.wait_instrs[rpos.wait_instr_pos];
            rpos.wait_instr_pos += 1;
            WaitItem::WaitInstr(w)
        }
    }

    /// Cursor to the first items at or after `offset`.
    pub fn find_position_by_offset(&self, offset: usize) -> WaitReadPos {
        WaitReadPos {
            del_op_pos: self.delayed_ops.partition_point(|d| d.offset < offset),
            wait_instr_pos: self.wait_instrs.partition_point(|w| w.offset < offset),
        }
    }

    /// Stored wait instructions (tests, rewriting).
    pub fn wait_instrs(&self) -> &[WaitInstr] {
        &self.wait_instrs
    }

    /// Stored delayed ops (tests).
    pub fn delayed_ops(&self) -> &[DelayedOp] {
        &self.delayed_ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcn_isa::{DelayedOpKind, RwFlags, MAX_WAIT_QUEUES};

    fn del(offset: usize) -> DelayedOp {
        DelayedOp {
            offset,
            kind: DelayedOpKind::ScalarMemLoad,
            reg_var: None,
            rstart: 0,
            rend: 2,
            rw: RwFlags::WRITE,
            rw2: RwFlags::empty(),
        }
    }

    #[test]
    fn wait_handler_merges_by_offset() {
        let mut h = WaitHandler::default();
        h.push_delayed_op(del(0));
        h.push_wait_instr(WaitInstr { offset: 4, waits: [0; MAX_WAIT_QUEUES] });
        h.push_delayed_op(del(8));
        let mut rpos = WaitReadPos::default();
        assert!(matches!(h.next_item(&mut rpos), WaitItem::DelayedOp(d) if d.offset == 0));
        assert!(matches!(h.next_item(&mut rpos), WaitItem::WaitInstr(w) if w.offset == 4));
        assert!(matches!(h.next_item(&mut rpos), WaitItem::DelayedOp(d) if d.offset == 8));
        assert!(!h.has_next(rpos));
    }

    #[test]
    fn find_position_skips_earlier_records() {
        let mut h = WaitHandler::default();
        h.push_delayed_op(del(0));
        h.push_delayed_op(del(8));
        let rpos = h.find_position_by_offset(4);
        assert_eq!(rpos.del_op_pos, 1);
    }
}
