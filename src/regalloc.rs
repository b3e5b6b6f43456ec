//! Register allocation over recorded code-flow and usage side tables.
//!
//! Stages: build the code-block graph from code-flow entries, construct
//! SSA numbering per single virtual register, resolve SSA conflicts
//! from merged paths, compute liveness intervals, build the
//! interference graph (with linear dependencies from multi-lane
//! operands and `.rvlin`), color it with the SDO/LDO heuristic, and
//! finally rewrite encoded instruction fields to physical registers.

mod liveness;
mod ssa;

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::asm::Assembler;
use crate::error::{AsmError, AsmResult};
use crate::handlers::UsageReadPos;
use gcn_isa::{CodeFlowKind, GcnField, RegClass, RwFlags, SRC_VGPR_BASE};
use gcn_types::{RegIndex, SectionId, MAX_REG_TYPES};

/// Finest-grained SSA tracking unit: one lane of a regvar, or one
/// hardware register (`None` regvar).
pub type SingleVReg = (Option<crate::symbol::RegVarId>, RegIndex);

/// Successor edge of a code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextBlock {
    /// Successor block index.
    pub block: usize,
    /// Edge is a subroutine call.
    pub is_call: bool,
}

/// Per-block SSA summary of one single vreg.
#[derive(Debug, Clone, Copy, Default)]
pub struct SsaInfo {
    /// Version visible at block entry (for read-before-write).
    pub ssa_id_before: usize,
    /// Version assigned by the first write in the block.
    pub ssa_id_first: usize,
    /// Base version of intermediate writes.
    pub ssa_id: usize,
    /// Version assigned by the last write.
    pub ssa_id_last: usize,
    /// Number of writes in the block.
    pub ssa_id_change: usize,
    /// A read precedes every write in the block.
    pub read_before_write: bool,
    /// Offset of the first access.
    pub first_pos: usize,
    /// Offset of the last access.
    pub last_pos: usize,
}

/// One code block of the control-flow graph.
#[derive(Debug, Clone, Default)]
pub struct CodeBlock {
    /// Start offset (inclusive).
    pub start: usize,
    /// End offset (exclusive).
    pub end: usize,
    /// Successors, non-call edges first.
    pub nexts: Vec<NextBlock>,
    /// Any successor is a call.
    pub have_calls: bool,
    /// Terminated by a return.
    pub have_return: bool,
    /// Terminated by an unconditional jump or `.cf_end`.
    pub have_end: bool,
    /// Per-vreg SSA info.
    pub ssa_info: BTreeMap<SingleVReg, SsaInfo>,
    /// Usage cursor at block start.
    pub usage_pos: UsageReadPos,
}

/// `(orig ssa id, replacement ssa id)`.
pub type SsaReplace = (usize, usize);

/// Replaces collected per vreg during conflict resolution.
pub type SsaReplacesMap = HashMap<SingleVReg, Vec<SsaReplace>>;

/// Allocation state threaded through the stages.
#[derive(Default)]
pub struct RegAllocator {
    /// Code blocks sorted by start offset.
    pub code_blocks: Vec<CodeBlock>,
    /// SSA replaces per vreg.
    pub ssa_replaces: SsaReplacesMap,
    /// Per-type map vreg → per-ssa-id graph indices.
    pub vreg_index_maps: [HashMap<SingleVReg, Vec<usize>>; MAX_REG_TYPES],
    /// Per-type interference graph (adjacency sets).
    pub inter_graphs: [Vec<HashSet<usize>>; MAX_REG_TYPES],
    /// Per-type linear-dependency adjacency (consecutive allocation).
    pub linear_deps: [Vec<Vec<usize>>; MAX_REG_TYPES],
    /// Per-type color assignment.
    pub color_maps: [Vec<usize>; MAX_REG_TYPES],
    /// Per-type node count.
    pub vreg_counts: [usize; MAX_REG_TYPES],
}

/// Register class of a single vreg. Hardware lanes carry the global
/// numbering: indices at or above the VGPR base are vector registers.
fn reg_type_of(asm: &Assembler, svreg: &SingleVReg) -> usize {
    match svreg.0 {
        Some(rv) => asm.reg_vars[rv].class.index(),
        None => {
            if svreg.1 >= SRC_VGPR_BASE {
                RegClass::Vgpr.index()
            } else {
                RegClass::Sgpr.index()
            }
        }
    }
}

/// Entry point: allocate registers for one section and rewrite its
/// encoded instructions. The returned allocator state carries the code
/// blocks, SSA maps and colors the wait scheduler consumes afterwards.
pub fn allocate_registers(asm: &mut Assembler, section_id: SectionId) -> AsmResult<RegAllocator> {
    let mut ra = RegAllocator::default();
    ra.create_code_structure(asm, section_id);
    if ra.code_blocks.is_empty() {
        return Ok(ra);
    }
    ra.create_ssa_data(asm, section_id);
    ra.apply_ssa_replaces();
    let has_regvars = asm.sections[section_id as usize]
        .usages
        .records()
        .iter()
        .any(|u| u.reg_var.is_some());
    if has_regvars {
        ra.create_interference_graph(asm, section_id);
        ra.color_interference_graph(asm)?;
        ra.rewrite_registers(asm, section_id);
    }
    Ok(ra)
}

impl RegAllocator {
    /// Stage (a): block boundaries from code-flow entries.
    pub fn create_code_structure(&mut self, asm: &Assembler, section_id: SectionId) {
        let section = &asm.sections[section_id as usize];
        let code_size = section.content.len();
        if code_size == 0 {
            return;
        }
        let code_flow = &section.code_flow;
        let mut splits: Vec<usize> = Vec::new();
        let mut code_starts: Vec<usize> = vec![0];
        let mut code_ends: Vec<usize> = vec![code_size];
        for entry in code_flow {
            let instr_after = match entry.kind {
                CodeFlowKind::Jump | CodeFlowKind::CJump | CodeFlowKind::Call
                | CodeFlowKind::Return => {
                    entry.offset + crate::isa::get_instruction_size(&section.content, entry.offset)
                }
                _ => 0,
            };
            match entry.kind {
                CodeFlowKind::Start => code_starts.push(entry.offset),
                CodeFlowKind::End => code_ends.push(entry.offset),
                CodeFlowKind::Jump => {
                    splits.push(entry.target);
                    code_ends.push(instr_after);
                }
                CodeFlowKind::CJump | CodeFlowKind::Call => {
                    splits.push(entry.target);
                    splits.push(instr_after);
                }
                CodeFlowKind::Return => code_ends.push(instr_after),
            }
        }
        splits.sort_unstable();
        splits.dedup();
        code_ends.sort_unstable();
        code_ends.dedup();
        // keep only starts outside already-covered regions
        let mut kept_starts = Vec::new();
        let mut ei = 0usize;
        let mut i = 0usize;
        code_starts.sort_unstable();
        code_starts.dedup();
        while i < code_starts.len() {
            let end = code_ends.get(ei).copied().unwrap_or(usize::MAX);
            if ei < code_ends.len() {
                ei += 1;
            }
            kept_starts.push(code_starts[i]);
            i += 1;
            while i < code_starts.len() && code_starts[i] < end {
                i += 1;
            }
        }
        // jump targets after an end reopen code
        let mut split_it = 0usize;
        for &code_end in &code_ends {
            let idx = splits[split_it..].partition_point(|&s| s < code_end) + split_it;
            if idx < splits.len() {
                kept_starts.push(splits[idx]);
                split_it = idx;
            } else {
                break;
            }
        }
        kept_starts.sort_unstable();
        kept_starts.dedup();
        // emit blocks between consecutive boundaries
        let mut split_it = 0usize;
        for &code_start in &kept_starts {
            let code_end = match code_ends.iter().find(|&&e| e > code_start) {
                Some(&e) => e,
                None => continue,
            };
            split_it += splits[split_it..].partition_point(|&s| s < code_start);
            if split_it < splits.len() && splits[split_it] == code_start {
                split_it += 1;
            }
            let mut start = code_start;
            while start < code_end {
                let mut end = code_end;
                if split_it < splits.len() {
                    end = end.min(splits[split_it]);
                    split_it += 1;
                }
                self.code_blocks.push(CodeBlock { start, end, ..CodeBlock::default() });
                start = end;
            }
        }
        // trailing empty block when something jumps to the very end
        if let (Some(&last_end), Some(&last_split)) = (code_ends.last(), splits.last()) {
            if kept_starts.last() == Some(&last_end) && last_end == last_split {
                self.code_blocks.push(CodeBlock {
                    start: last_end,
                    end: last_end,
                    ..CodeBlock::default()
                });
            }
        }
        // connect the flow graph
        for entry in code_flow {
            let is_branch = matches!(
                entry.kind,
                CodeFlowKind::Jump | CodeFlowKind::CJump | CodeFlowKind::Call | CodeFlowKind::Return
            );
            if !is_branch {
                continue;
            }
            let instr_after =
                entry.offset + crate::isa::get_instruction_size(&section.content, entry.offset);
            if entry.kind == CodeFlowKind::Return {
                if let Some(block) = self.code_blocks.iter_mut().find(|b| b.end == instr_after) {
                    block.have_end = true;
                    block.have_return = true;
                }
                continue;
            }
            let target_block = self.code_blocks.iter().position(|b| b.start == entry.target);
            let target_block = match target_block {
                Some(t) => t,
                None => continue,
            };
            let after_idx = self.code_blocks.partition_point(|b| b.start < instr_after);
            if after_idx == 0 {
                continue;
            }
            let cur = after_idx - 1;
            let is_call = entry.kind == CodeFlowKind::Call;
            self.code_blocks[cur].nexts.push(NextBlock { block: target_block, is_call });
            self.code_blocks[cur].have_calls |= is_call;
            if entry.kind == CodeFlowKind::CJump || entry.kind == CodeFlowKind::Call {
                self.code_blocks[cur].have_end = false;
                if after_idx < self.code_blocks.len() && entry.kind == CodeFlowKind::CJump {
                    self.code_blocks[cur].nexts.push(NextBlock { block: after_idx, is_call: false });
                }
            } else if entry.kind == CodeFlowKind::Jump {
                self.code_blocks[cur].have_end = true;
            }
        }
        for entry in code_flow {
            if entry.kind == CodeFlowKind::End {
                if let Some(block) = self.code_blocks.iter_mut().find(|b| b.end == entry.offset) {
                    block.have_end = true;
                }
            }
        }
        if let Some(last) = self.code_blocks.last_mut() {
            last.have_end = true;
        }
        // non-call nexts first, dedup
        for block in &mut self.code_blocks {
            block
                .nexts
                .sort_by(|a, b| (a.is_call, a.block).cmp(&(b.is_call, b.block)));
            block.nexts.dedup();
        }
        // usage cursors at block starts
        let section = &asm.sections[section_id as usize];
        for block in &mut self.code_blocks {
            block.usage_pos = section.usages.find_position_by_offset(block.start);
        }
        debug!(blocks = self.code_blocks.len(), "code structure created");
    }

    /// Graph index of `(svreg, ssa_id)`, present after SSA numbering.
    fn vidx(&self, asm: &Assembler, svreg: &SingleVReg, ssa_id: usize) -> Option<usize> {
        let regtype = reg_type_of(asm, svreg);
        let ids = self.vreg_index_maps[regtype].get(svreg)?;
        ids.get(ssa_id).copied().filter(|&v| v != usize::MAX)
    }

    /// Stage (e): liveness intervals → interference edges; linear deps
    /// from multi-lane operands and `.rvlin` records.
    pub fn create_interference_graph(&mut self, asm: &Assembler, section_id: SectionId) {
        // assign graph indices per vreg version
        for block in &self.code_blocks {
            for (svreg, sinfo) in &block.ssa_info {
                let regtype = reg_type_of(asm, svreg);
                let count = &mut self.vreg_counts[regtype];
                let ids = self.vreg_index_maps[regtype].entry(*svreg).or_default();
                let mut ssa_id_count = 0usize;
                if sinfo.read_before_write {
                    ssa_id_count = sinfo.ssa_id_before + 1;
                }
                if sinfo.ssa_id_change != 0 {
                    ssa_id_count = ssa_id_count.max(sinfo.ssa_id_last + 1).max(sinfo.ssa_id_first + 1);
                }
                if ids.len() < ssa_id_count {
                    ids.resize(ssa_id_count, usize::MAX);
                }
                if sinfo.read_before_write && ids[sinfo.ssa_id_before] == usize::MAX {
                    ids[sinfo.ssa_id_before] = *count;
                    *count += 1;
                }
                if sinfo.ssa_id_change != 0 {
                    if ids[sinfo.ssa_id_first] == usize::MAX {
                        ids[sinfo.ssa_id_first] = *count;
                        *count += 1;
                    }
                    for ssa_id in sinfo.ssa_id + 1..sinfo.ssa_id + sinfo.ssa_id_change.saturating_sub(1) {
                        if ids[ssa_id] == usize::MAX {
                            ids[ssa_id] = *count;
                            *count += 1;
                        }
                    }
                    if ids[sinfo.ssa_id_last] == usize::MAX {
                        ids[sinfo.ssa_id_last] = *count;
                        *count += 1;
                    }
                }
            }
        }
        let live_blocks = liveness::create_livenesses(self, asm, section_id);
        for regtype in 0..MAX_REG_TYPES {
            self.inter_graphs[regtype] = vec![HashSet::new(); self.vreg_counts[regtype]];
            self.linear_deps[regtype] = vec![Vec::new(); self.vreg_counts[regtype]];
        }
        // sweep intervals: overlapping intervals of one type interfere
        for regtype in 0..MAX_REG_TYPES {
            let mut blocks: Vec<(usize, usize, usize)> = live_blocks[regtype].clone();
            blocks.sort_unstable();
            for (i, &(start, end, vidx)) in blocks.iter().enumerate() {
                for &(start2, _end2, vidx2) in blocks[i + 1..].iter() {
                    if start2 >= end {
                        break;
                    }
                    if vidx != vidx2 {
                        self.inter_graphs[regtype][vidx].insert(vidx2);
                        self.inter_graphs[regtype][vidx2].insert(vidx);
                    }
                    let _ = (start, start2);
                }
            }
        }
        // linear dependencies: consecutive lanes of multi-register
        // operands must land on consecutive physical registers
        self.add_linear_deps(asm, section_id);
    }

    fn add_linear_deps(&mut self, asm: &Assembler, section_id: SectionId) {
        let section = &asm.sections[section_id as usize];
        let mut pairs: Vec<(usize, Option<crate::symbol::RegVarId>, RegIndex, RegIndex)> = Vec::new();
        for usage in section.usages.records() {
            if usage.reg_var.is_some() && usage.rend - usage.rstart > 1 {
                pairs.push((usage.offset, usage.reg_var, usage.rstart, usage.rend));
            }
        }
        for dep in &section.linear_deps {
            pairs.push((dep.offset, Some(dep.reg_var), dep.rstart, dep.rend));
        }
        for (offset, reg_var, rstart, rend) in pairs {
            let block = match self.block_of_offset(offset) {
                Some(b) => b,
                None => continue,
            };
            for lane in rstart..rend.saturating_sub(1) {
                let svreg_a: SingleVReg = (reg_var, lane);
                let svreg_b: SingleVReg = (reg_var, lane + 1);
                let regtype = reg_type_of(asm, &svreg_a);
                let (ida, idb) = {
                    let info_a = self.code_blocks[block].ssa_info.get(&svreg_a).copied();
                    let info_b = self.code_blocks[block].ssa_info.get(&svreg_b).copied();
                    (self.last_vidx(asm, &svreg_a, info_a), self.last_vidx(asm, &svreg_b, info_b))
                };
                if let (Some(a), Some(b)) = (ida, idb) {
                    if !self.linear_deps[regtype][a].contains(&b) {
                        self.linear_deps[regtype][a].push(b);
                    }
                }
            }
        }
    }

    fn last_vidx(
        &self,
        asm: &Assembler,
        svreg: &SingleVReg,
        info: Option<SsaInfo>,
    ) -> Option<usize> {
        let info = info?;
        let ssa_id = if info.ssa_id_change != 0 {
            info.ssa_id_last
        } else {
            info.ssa_id_before
        };
        self.vidx(asm, svreg, ssa_id)
    }

    fn block_of_offset(&self, offset: usize) -> Option<usize> {
        let idx = self.code_blocks.partition_point(|b| b.end <= offset);
        self.code_blocks.get(idx).filter(|b| b.start <= offset).map(|_| idx)
    }

    /// Stage (f): SDO/LDO graph coloring.
    pub fn color_interference_graph(&mut self, asm: &Assembler) -> AsmResult<()> {
        let ranges = crate::isa::register_ranges(asm.arch);
        for regtype in 0..MAX_REG_TYPES {
            let nodes_num = self.vreg_counts[regtype];
            let inter_graph = &self.inter_graphs[regtype];
            let max_colors = (ranges[regtype].1 - ranges[regtype].0) as usize;
            let mut gc_map = vec![usize::MAX; nodes_num];
            let mut sdo_counts = vec![0usize; nodes_num];

            // pre-color hardware registers with their own indices
            for (svreg, ids) in &self.vreg_index_maps[regtype] {
                if svreg.0.is_none() {
                    for &v in ids {
                        if v != usize::MAX {
                            gc_map[v] = (svreg.1 - ranges[regtype].0) as usize;
                        }
                    }
                }
            }
            // linear-dependency equal chains colored as consecutive runs
            let chains = self.linear_chains(regtype);

            let mut order: Vec<usize> = (0..nodes_num).collect();
            let mut colored = 0usize;
            while colored < nodes_num {
                // saturation-descending, degree-descending order
                order.sort_by(|&a, &b| {
                    (sdo_counts[b], inter_graph[b].len()).cmp(&(sdo_counts[a], inter_graph[a].len()))
                });
                let node = match order.iter().find(|&&n| gc_map[n] == usize::MAX) {
                    Some(&n) => n,
                    None => break,
                };
                let chain = chains.get(&node).cloned().unwrap_or_else(|| vec![node]);
                // lowest color run free for the whole chain
                let mut color = 0usize;
                'search: loop {
                    for (lane, &member) in chain.iter().enumerate() {
                        let candidate = color + lane;
                        if candidate >= max_colors {
                            return Err(AsmError::TooManyRegisters);
                        }
                        let conflict = self.inter_graphs[regtype][member]
                            .iter()
                            .any(|&nb| gc_map[nb] == candidate)
                            || gc_map
                                .iter()
                                .enumerate()
                                .any(|(other, &c)| c == candidate && chain.contains(&other) && other != member);
                        if conflict {
                            color += 1;
                            continue 'search;
                        }
                    }
                    break;
                }
                for (lane, &member) in chain.iter().enumerate() {
                    if gc_map[member] == usize::MAX {
                        gc_map[member] = color + lane;
                        colored += 1;
                    }
                    // update neighbor saturation
                    let nbs: Vec<usize> = self.inter_graphs[regtype][member].iter().copied().collect();
                    for nb in nbs {
                        sdo_counts[nb] += 1;
                    }
                }
            }
            self.color_maps[regtype] = gc_map;
        }
        Ok(())
    }

    /// Build maximal consecutive chains from linear-dependency edges.
    fn linear_chains(&self, regtype: usize) -> HashMap<usize, Vec<usize>> {
        let deps = &self.linear_deps[regtype];
        let mut has_pred = vec![false; deps.len()];
        for nexts in deps {
            for &n in nexts {
                has_pred[n] = true;
            }
        }
        let mut chains = HashMap::new();
        for start in 0..deps.len() {
            if has_pred[start] || deps[start].is_empty() {
                continue;
            }
            let mut chain = vec![start];
            let mut cur = start;
            while let Some(&next) = deps[cur].first() {
                if chain.contains(&next) {
                    break;
                }
                chain.push(next);
                cur = next;
            }
            for &member in &chain {
                chains.insert(member, chain.clone());
            }
        }
        chains
    }

    /// Rewrite instruction register fields with allocated registers.
    pub fn rewrite_registers(&self, asm: &mut Assembler, section_id: SectionId) {
        let ranges = crate::isa::register_ranges(asm.arch);
        let mut patches: Vec<(usize, GcnField, u16)> = Vec::new();
        for block in &self.code_blocks {
            let mut ssa_id_idx: HashMap<SingleVReg, usize> = HashMap::new();
            let mut write_offsets: HashMap<SingleVReg, usize> = HashMap::new();
            let section = &asm.sections[section_id as usize];
            let mut rpos = block.usage_pos;
            while section.usages.has_next(rpos) {
                let rvu = section.usages.next_usage(&mut rpos);
                if rvu.offset >= block.end {
                    break;
                }
                let reg_var = match rvu.reg_var {
                    Some(rv) => rv,
                    None => continue,
                };
                let svreg0: SingleVReg = (Some(reg_var), rvu.rstart);
                let write_with_ssa = rvu.rw == RwFlags::WRITE && rvu.reg_field.is_some();
                let out_idx = if write_with_ssa {
                    let e = ssa_id_idx.entry(svreg0).or_insert(0);
                    *e += 1;
                    write_offsets.insert(svreg0, rvu.offset);
                    *e
                } else {
                    let mut idx = *ssa_id_idx.entry(svreg0).or_insert(0);
                    if write_offsets.get(&svreg0) == Some(&rvu.offset) && idx > 0 {
                        idx -= 1;
                    }
                    idx
                };
                let sinfo = match block.ssa_info.get(&svreg0) {
                    Some(s) => *s,
                    None => continue,
                };
                let ssa_id = ssa_id_for_index(out_idx, &sinfo);
                let vidx = match self.vidx(asm, &svreg0, ssa_id) {
                    Some(v) => v,
                    None => continue,
                };
                let regtype = reg_type_of(asm, &svreg0);
                let color = self.color_maps[regtype][vidx];
                let phys = ranges[regtype].0 + color as u16;
                if let Some(field) = rvu.reg_field {
                    // the shared 9-bit source field takes the global
                    // index directly; plain VGPR fields drop the base
                    let value = match (field, asm.reg_vars[reg_var].class) {
                        (GcnField::VopSrc0, RegClass::Vgpr) => phys,
                        (_, RegClass::Vgpr) => phys - SRC_VGPR_BASE,
                        _ => phys,
                    };
                    patches.push((rvu.offset, field, value));
                }
            }
        }
        let content = &mut asm.sections[section_id as usize].content;
        for (offset, field, value) in patches {
            crate::isa::patch_field(content, offset, field, value);
        }
    }
}

/// SSA id selected by the per-instruction index walk (0 = before the
/// first write, 1 = first write, then intermediate, then last).
pub fn ssa_id_for_index(idx: usize, sinfo: &SsaInfo) -> usize {
    if idx == 0 {
        sinfo.ssa_id_before
    } else if idx == 1 {
        sinfo.ssa_id_first
    } else if idx < sinfo.ssa_id_change {
        sinfo.ssa_id + idx - 1
    } else {
        sinfo.ssa_id_last
    }
}
