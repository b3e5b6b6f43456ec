//! Wait-state scheduling.
//!
//! Per queue (`vmcnt`, `lgkmcnt`, `expcnt`) the scheduler tracks which
//! registers each in-flight operation completes, walks the code blocks
//! inserting the minimum wait counts before every dependent access, and
//! joins queue states across control-flow edges. Finally the computed
//! `s_waitcnt` instructions are spliced into the code, with branch
//! immediates rebased over the shifted offsets.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::asm::Assembler;
use crate::error::AsmResult;
use crate::handlers::WaitItem;
use crate::regalloc::{ssa_id_for_index, RegAllocator, SingleVReg};
use gcn_isa::{
    encode_sopp, encode_waitcnt, CodeFlowKind, RwFlags, WaitConfig, WaitInstr, MAX_WAIT_QUEUES,
};
use gcn_types::{bytes as le, SectionId};

/// Queue register: physical register index plus access direction.
type QReg = u32;

fn qreg(reg: u16, write: bool) -> QReg {
    u32::from(reg) | if write { 0x8000_0000 } else { 0 }
}

/// One in-flight entry of an ordered queue.
#[derive(Debug, Clone, Default)]
struct QueueEntry {
    regs: HashSet<QReg>,
    have_delayed_op: bool,
}

impl QueueEntry {
    fn is_filled(&self) -> bool {
        self.have_delayed_op || !self.regs.is_empty()
    }

    fn join(&mut self, other: &QueueEntry) {
        self.regs.extend(other.regs.iter().copied());
        self.have_delayed_op |= other.have_delayed_op;
    }
}

/// Tracking state of one hardware wait counter.
#[derive(Debug, Clone, Default)]
struct QueueState {
    max_queue_size: u16,
    ordered_start_pos: u16,
    ordered: VecDeque<QueueEntry>,
    random: QueueEntry,
    /// Newest queue position of each register.
    reg_places: HashMap<QReg, u16>,
    requested_queue_size: u16,
    first_flush: bool,
    really_flushed: bool,
}

impl QueueState {
    fn new(max_queue_size: u16) -> Self {
        QueueState { max_queue_size, first_flush: true, ..QueueState::default() }
    }

    fn push_ordered(&mut self, reg: Option<QReg>) {
        match reg {
            Some(r) => {
                self.reg_places
                    .insert(r, self.ordered_start_pos.wrapping_add(self.ordered.len() as u16).wrapping_sub(1));
                if let Some(back) = self.ordered.back_mut() {
                    back.regs.insert(r);
                }
            }
            None => {
                if let Some(back) = self.ordered.back_mut() {
                    back.have_delayed_op = true;
                }
            }
        }
    }

    fn push_random(&mut self, reg: Option<QReg>) {
        match reg {
            Some(r) => {
                self.random.regs.insert(r);
            }
            None => self.random.have_delayed_op = true,
        }
    }

    fn next_entry(&mut self) {
        if self.ordered.is_empty() || self.ordered.back().map(QueueEntry::is_filled).unwrap_or(false) {
            self.ordered.push_back(QueueEntry::default());
        }
        if self.ordered.len() as u16 == self.max_queue_size {
            // merge the two oldest entries
            if let Some(first) = self.ordered.pop_front() {
                for &r in &first.regs {
                    if let Some(place) = self.reg_places.get_mut(&r) {
                        if *place == self.ordered_start_pos {
                            *place = place.wrapping_add(1);
                        }
                    }
                }
                if let Some(second) = self.ordered.front_mut() {
                    second.join(&first);
                }
                self.ordered_start_pos = self.ordered_start_pos.wrapping_add(1);
            }
        }
        self.requested_queue_size = (self.requested_queue_size + 1).min(self.max_queue_size);
    }

    fn flush_to(&mut self, size: u16) {
        if self.first_flush && self.requested_queue_size < size {
            self.requested_queue_size = size;
            self.first_flush = false;
            return;
        }
        self.really_flushed = true;
        self.first_flush = false;
        if size == 0 {
            self.random = QueueEntry::default();
        }
        while (size as usize) < self.ordered.len() {
            if let Some(front) = self.ordered.pop_front() {
                for r in &front.regs {
                    if self.reg_places.get(r) == Some(&self.ordered_start_pos) {
                        self.reg_places.remove(r);
                    }
                }
            }
            self.ordered_start_pos = self.ordered_start_pos.wrapping_add(1);
        }
        self.requested_queue_size = self.requested_queue_size.min(size);
    }

    /// Entries that must drain for `reg` to be complete, or `None` when
    /// the register is not in flight.
    fn min_queue_size_for_reg(&self, reg: QReg) -> Option<u16> {
        match self.reg_places.get(&reg) {
            Some(&place) => {
                let pos = place.wrapping_sub(self.ordered_start_pos);
                Some((self.ordered.len() as u16).saturating_sub(1).saturating_sub(pos))
            }
            None => {
                if self.random.regs.contains(&reg) {
                    Some(0)
                } else {
                    None
                }
            }
        }
    }

    /// Join the queue state flowing in from a predecessor. True when
    /// this block's state changed.
    fn join_prev(&mut self, prev: &QueueState) -> bool {
        if self.really_flushed {
            return false;
        }
        let mut changed = false;
        // prepend missing depth from the predecessor
        let prev_extra =
            prev.ordered.len().saturating_sub(self.ordered.len()).min(prev.ordered.len());
        if prev_extra > 0 {
            for entry in prev.ordered.iter().take(prev_extra).rev() {
                self.ordered.push_front(entry.clone());
                self.ordered_start_pos = self.ordered_start_pos.wrapping_sub(1);
                changed = true;
            }
            // rebuild positions for the prepended entries
            let start = self.ordered_start_pos;
            for (i, entry) in self.ordered.iter().enumerate().take(prev_extra) {
                for &r in &entry.regs {
                    self.reg_places.entry(r).or_insert(start.wrapping_add(i as u16));
                }
            }
        }
        // merge overlapping entries
        let offset = self.ordered.len().saturating_sub(prev.ordered.len());
        for (i, prev_entry) in prev.ordered.iter().enumerate() {
            if let Some(entry) = self.ordered.get_mut(offset + i) {
                let before = entry.regs.len();
                entry.join(prev_entry);
                if entry.regs.len() != before {
                    changed = true;
                    let place = self.ordered_start_pos.wrapping_add((offset + i) as u16);
                    for &r in &prev_entry.regs {
                        self.reg_places.entry(r).or_insert(place);
                    }
                }
            }
        }
        if (self.ordered.len() as u16) > self.max_queue_size {
            let to_merge = self.ordered.len() - self.max_queue_size as usize;
            for _ in 0..to_merge {
                if let Some(front) = self.ordered.pop_front() {
                    if let Some(new_front) = self.ordered.front_mut() {
                        new_front.join(&front);
                    }
                    self.ordered_start_pos = self.ordered_start_pos.wrapping_add(1);
                }
            }
        }
        let before = self.random.regs.len();
        self.random.join(&prev.random);
        changed |= self.random.regs.len() != before;
        let req = self.requested_queue_size.max(prev.requested_queue_size);
        changed |= req != self.requested_queue_size;
        self.requested_queue_size = req;
        self.first_flush |= prev.first_flush;
        changed
    }
}

#[derive(Debug, Clone)]
struct WaitBlock {
    queues: Vec<QueueState>,
    wait_instrs: Vec<WaitInstr>,
}

/// Schedule waits for one section and splice the computed `s_waitcnt`
/// instructions into the code. `ra` is the allocator state from
/// [`crate::regalloc::allocate_registers`] on the same section.
pub fn schedule_waits(asm: &mut Assembler, section_id: SectionId, ra: &RegAllocator) -> AsmResult<()> {
    if asm.sections[section_id as usize].waits.is_empty() {
        return Ok(());
    }
    let config = WaitConfig::gcn();
    if ra.code_blocks.is_empty() {
        return Ok(());
    }

    let only_warnings = asm.config.test_run;
    let mut wblocks: Vec<WaitBlock> = (0..ra.code_blocks.len())
        .map(|_| WaitBlock {
            queues: (0..config.queue_count).map(|q| QueueState::new(config.queue_sizes[q])).collect(),
            wait_instrs: Vec::new(),
        })
        .collect();

    // fill queue states per block from empty entry states
    let empty_entry: Vec<QueueState> =
        (0..config.queue_count).map(|q| QueueState::new(config.queue_sizes[q])).collect();
    let mut entry_states: Vec<Vec<QueueState>> = vec![empty_entry; ra.code_blocks.len()];
    for bi in 0..ra.code_blocks.len() {
        wblocks[bi].queues = entry_states[bi].clone();
        wblocks[bi].wait_instrs.clear();
        fill_block(asm, &ra, section_id, &config, bi, &mut wblocks[bi], only_warnings);
    }

    // discovery pass: count how often each block is entered
    let mut visited = vec![false; ra.code_blocks.len()];
    let mut visited_count: HashMap<usize, usize> = HashMap::new();
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    let mut on_stack: HashSet<usize> = HashSet::new();
    on_stack.insert(0);
    while let Some(&(block, next_index)) = stack.last() {
        if next_index == 0 {
            if !visited[block] {
                visited[block] = true;
            } else {
                *visited_count.entry(block).or_insert(1) += 1;
                on_stack.remove(&block);
                stack.pop();
                continue;
            }
        }
        let cblock = &ra.code_blocks[block];
        if next_index < cblock.nexts.len() {
            let next = cblock.nexts[next_index].block;
            stack.last_mut().expect("entry present").1 += 1;
            if !on_stack.contains(&next) {
                on_stack.insert(next);
                stack.push((next, 0));
            } else {
                *visited_count.entry(next).or_insert(1) += 1;
            }
        } else if (cblock.nexts.is_empty() || cblock.have_calls)
            && next_index == cblock.nexts.len()
            && !cblock.have_return
            && !cblock.have_end
            && block + 1 < ra.code_blocks.len()
        {
            let next = block + 1;
            stack.last_mut().expect("entry present").1 += 1;
            if !on_stack.contains(&next) {
                on_stack.insert(next);
                stack.push((next, 0));
            }
        } else {
            on_stack.remove(&block);
            stack.pop();
        }
    }

    // join pass: merge predecessor queue states, re-walk on change
    let mut worklist: Vec<(usize, usize)> = Vec::new();
    for (bi, cblock) in ra.code_blocks.iter().enumerate() {
        for next in &cblock.nexts {
            worklist.push((bi, next.block));
        }
        let falls = (cblock.nexts.is_empty() || cblock.have_calls)
            && !cblock.have_return
            && !cblock.have_end;
        if falls && bi + 1 < ra.code_blocks.len() {
            worklist.push((bi, bi + 1));
        }
    }
    // a block is re-filled from its joined entry state when a join
    // actually changed it
    let mut rounds = 0usize;
    while rounds < ra.code_blocks.len() * 4 {
        rounds += 1;
        let mut changed = false;
        for &(pred, block) in &worklist {
            if rounds > 1 && !visited_count.contains_key(&block) {
                // only join points can keep changing after the first pass
                continue;
            }
            let exit = wblocks[pred].queues.clone();
            let mut block_changed = false;
            for (q, exit_q) in exit.iter().enumerate() {
                block_changed |= entry_states[block][q].join_prev(exit_q);
            }
            if block_changed {
                wblocks[block].queues = entry_states[block].clone();
                wblocks[block].wait_instrs.clear();
                fill_block(asm, &ra, section_id, &config, block, &mut wblocks[block], only_warnings);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    debug!(rounds, "wait scheduler joins converged");

    // collect generated waits, merge with user waits at equal offsets
    let mut generated: Vec<WaitInstr> = Vec::new();
    for wblock in &wblocks {
        generated.extend_from_slice(&wblock.wait_instrs);
    }
    generated.sort_by_key(|w| w.offset);
    generated.dedup_by_key(|w| w.offset);
    if generated.is_empty() || only_warnings {
        return Ok(());
    }
    splice_waits(asm, section_id, &config, &generated);
    Ok(())
}

/// Walk one block's usage records against its wait handler slice.
fn fill_block(
    asm: &Assembler,
    ra: &RegAllocator,
    section_id: SectionId,
    config: &WaitConfig,
    bi: usize,
    wblock: &mut WaitBlock,
    only_warnings: bool,
) {
    let section = &asm.sections[section_id as usize];
    let cblock = &ra.code_blocks[bi];
    let mut usage_pos = cblock.usage_pos;
    let mut wait_pos = section.waits.find_position_by_offset(cblock.start);
    let mut ssa_id_idx: HashMap<SingleVReg, usize> = HashMap::new();
    let mut write_offsets: HashMap<SingleVReg, usize> = HashMap::new();

    let mut next_item = if section.waits.has_next(wait_pos) {
        let item = section.waits.next_item(&mut wait_pos);
        Some(item)
    } else {
        None
    };

    loop {
        let usage_offset = if section.usages.has_next(usage_pos) {
            section.usages.records()[usage_pos.pos].offset
        } else {
            usize::MAX
        };
        let item_offset = next_item.map(|i| i.offset()).unwrap_or(usize::MAX);
        if usage_offset >= cblock.end && item_offset >= cblock.end {
            break;
        }
        if usage_offset < cblock.end && usage_offset <= item_offset {
            // one instruction's worth of usages at this offset
            let offset = usage_offset;
            let mut gwait = WaitInstr { offset, waits: [0; MAX_WAIT_QUEUES] };
            for q in 0..config.queue_count {
                gwait.waits[q] = config.queue_sizes[q] - 1;
            }
            let mut gen_wait = false;
            while section.usages.has_next(usage_pos)
                && section.usages.records()[usage_pos.pos].offset == offset
            {
                let rvu = section.usages.next_usage(&mut usage_pos);
                for lane in rvu.rstart..rvu.rend {
                    let svreg: SingleVReg = (rvu.reg_var, lane);
                    let write_with_ssa = rvu.rw == RwFlags::WRITE && rvu.reg_field.is_some();
                    let out_idx = if write_with_ssa {
                        let e = ssa_id_idx.entry(svreg).or_insert(0);
                        *e += 1;
                        write_offsets.insert(svreg, rvu.offset);
                        *e
                    } else {
                        let mut idx = *ssa_id_idx.entry(svreg).or_insert(0);
                        if write_offsets.get(&svreg) == Some(&rvu.offset) && idx > 0 {
                            idx -= 1;
                        }
                        idx
                    };
                    let rreg = physical_reg(asm, ra, cblock, &svreg, out_idx);
                    // reads wait on in-flight writes; writes wait on
                    // in-flight writes and in-flight reads
                    let mut check = |keys: &[QReg], queues: &[QueueState], gw: &mut WaitInstr, gen: &mut bool| {
                        for &key in keys {
                            for (q, queue) in queues.iter().enumerate() {
                                if let Some(cnt) = queue.min_queue_size_for_reg(key) {
                                    if !only_warnings {
                                        gw.waits[q] = gw.waits[q].min(cnt);
                                        *gen = true;
                                    }
                                }
                            }
                        }
                    };
                    if rvu.rw.contains(RwFlags::READ) {
                        check(&[qreg(rreg, true)], &wblock.queues, &mut gwait, &mut gen_wait);
                    }
                    if rvu.rw.contains(RwFlags::WRITE) {
                        check(
                            &[qreg(rreg, true), qreg(rreg, false)],
                            &wblock.queues,
                            &mut gwait,
                            &mut gen_wait,
                        );
                    }
                }
            }
            if gen_wait && offset != item_offset {
                wblock.wait_instrs.push(gwait);
                for q in 0..config.queue_count {
                    wblock.queues[q].flush_to(gwait.waits[q]);
                }
            } else if gen_wait {
                // combine with the user wait at the same offset
                if let Some(WaitItem::WaitInstr(user)) = next_item {
                    let mut combined = gwait;
                    for q in 0..config.queue_count {
                        combined.waits[q] = combined.waits[q].min(user.waits[q]);
                    }
                    wblock.wait_instrs.push(combined);
                    for q in 0..config.queue_count {
                        wblock.queues[q].flush_to(combined.waits[q]);
                    }
                    // the user wait is folded into the combined one
                    next_item = if section.waits.has_next(wait_pos) {
                        Some(section.waits.next_item(&mut wait_pos))
                    } else {
                        None
                    };
                }
            }
            continue;
        }
        if item_offset < cblock.end {
            match next_item.expect("item offset came from an item") {
                WaitItem::WaitInstr(user) => {
                    for q in 0..config.queue_count {
                        wblock.queues[q].flush_to(user.waits[q]);
                    }
                }
                WaitItem::DelayedOp(op) => {
                    let profile = op.kind.profile();
                    let q1 = profile.queue as usize;
                    let q2 = op.kind.second_queue().map(|q| q as usize);
                    wblock.queues[q1].next_entry();
                    if let Some(q2) = q2 {
                        wblock.queues[q2].next_entry();
                    }
                    for lane in op.rstart..op.rend {
                        let svreg: SingleVReg = (op.reg_var, lane);
                        let idx = ssa_id_idx.get(&svreg).copied().unwrap_or(0);
                        let rreg = physical_reg(asm, ra, cblock, &svreg, idx);
                        // register reads are tracked only when the op
                        // holds them past issue (stores); ops that
                        // finish reading at issue release them early
                        if op.rw.contains(RwFlags::READ) && !profile.finish_on_reg_read_out {
                            push(&mut wblock.queues[q1], profile.ordered, qreg(rreg, false));
                        }
                        if op.rw.contains(RwFlags::WRITE) {
                            push(&mut wblock.queues[q1], profile.ordered, qreg(rreg, true));
                        }
                        if let Some(q2) = q2 {
                            let profile2 = op.kind.profile();
                            if op.rw2.contains(RwFlags::READ) && !profile2.finish_on_reg_read_out {
                                push(&mut wblock.queues[q2], profile2.ordered, qreg(rreg, false));
                            }
                            if op.rw2.contains(RwFlags::WRITE) {
                                push(&mut wblock.queues[q2], profile2.ordered, qreg(rreg, true));
                            }
                        }
                    }
                }
            }
            next_item = if section.waits.has_next(wait_pos) {
                Some(section.waits.next_item(&mut wait_pos))
            } else {
                None
            };
            continue;
        }
        break;
    }
}

fn push(queue: &mut QueueState, ordered: bool, reg: QReg) {
    if ordered {
        queue.push_ordered(Some(reg));
    } else {
        queue.push_random(Some(reg));
    }
}

/// Physical register index of one lane (post-allocation).
fn physical_reg(
    asm: &Assembler,
    ra: &RegAllocator,
    cblock: &crate::regalloc::CodeBlock,
    svreg: &SingleVReg,
    out_idx: usize,
) -> u16 {
    match svreg.0 {
        None => svreg.1,
        Some(rv) => {
            let regtype = asm.reg_vars[rv].class.index();
            let sinfo = match cblock.ssa_info.get(svreg) {
                Some(s) => *s,
                None => return svreg.1,
            };
            let ssa_id = ssa_id_for_index(out_idx, &sinfo);
            let ids = match ra.vreg_index_maps[regtype].get(svreg) {
                Some(ids) => ids,
                None => return svreg.1,
            };
            match ids.get(ssa_id).copied() {
                Some(vidx) if vidx != usize::MAX && vidx < ra.color_maps[regtype].len() => {
                    let ranges = crate::isa::register_ranges(asm.arch);
                    ranges[regtype].0 + ra.color_maps[regtype][vidx] as u16
                }
                _ => svreg.1,
            }
        }
    }
}

/// Insert generated `s_waitcnt` words, rebasing code-flow targets and
/// branch immediates over the shifted offsets.
fn splice_waits(
    asm: &mut Assembler,
    section_id: SectionId,
    config: &WaitConfig,
    generated: &[WaitInstr],
) {
    let old_content = asm.sections[section_id as usize].content.clone();
    let mut new_content = Vec::with_capacity(old_content.len() + generated.len() * 4);
    let mut shift_points: Vec<(usize, usize)> = Vec::new(); // (old offset, inserted before)
    let mut gi = 0usize;
    let mut offset = 0usize;
    while offset < old_content.len() {
        if gi < generated.len() && generated[gi].offset == offset {
            let imm = encode_waitcnt(config, &generated[gi].waits);
            new_content.extend_from_slice(&encode_sopp(12, imm).to_le_bytes());
            shift_points.push((offset, new_content.len() - 4));
            gi += 1;
        }
        let size = crate::isa::get_instruction_size(&old_content, offset);
        new_content.extend_from_slice(&old_content[offset..offset + size]);
        offset += size;
    }
    let new_offset = |old: usize| -> usize {
        let inserted = shift_points.iter().take_while(|&&(o, _)| o <= old).count();
        old + inserted * 4
    };
    // rebase code-flow entries and patch branch immediates
    let code_flow = asm.sections[section_id as usize].code_flow.clone();
    for entry in &code_flow {
        if !matches!(entry.kind, CodeFlowKind::Jump | CodeFlowKind::CJump) {
            continue;
        }
        if entry.target == usize::MAX {
            continue;
        }
        let new_branch = new_offset(entry.offset);
        let new_target = {
            // the target's own inserted wait must execute too
            let inserted = shift_points.iter().take_while(|&&(o, _)| o < entry.target).count();
            entry.target + inserted * 4
        };
        let delta = (new_target as i64 - (new_branch as i64 + 4)) / 4;
        let word = le::read_u32(&new_content, new_branch);
        le::write_u32(
            &mut new_content,
            new_branch,
            (word & 0xffff_0000) | (delta as i16 as u16 as u32),
        );
    }
    let section = &mut asm.sections[section_id as usize];
    for entry in &mut section.code_flow {
        let inserted = shift_points.iter().take_while(|&&(o, _)| o <= entry.offset).count();
        entry.offset += inserted * 4;
        if entry.target != usize::MAX {
            let inserted = shift_points.iter().take_while(|&&(o, _)| o < entry.target).count();
            entry.target += inserted * 4;
        }
    }
    section.content = new_content;
}
