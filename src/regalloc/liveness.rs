//! Liveness computation over the code-block graph.
//!
//! Every block occupies a contiguous slice of a monotonic live-time
//! axis (code order). In-block accesses produce precise intervals;
//! values read before any write propagate backward across predecessors
//! until their defining writes.

use std::collections::{HashMap, HashSet};

use super::{reg_type_of, ssa_id_for_index, RegAllocator, SingleVReg};
use crate::asm::Assembler;
use gcn_isa::RwFlags;
use gcn_types::{SectionId, MAX_REG_TYPES};

/// `(start, end, vidx)` interval on the live-time axis.
pub type LiveBlock = (usize, usize, usize);

pub(super) fn create_livenesses(
    ra: &RegAllocator,
    asm: &Assembler,
    section_id: SectionId,
) -> [Vec<LiveBlock>; MAX_REG_TYPES] {
    let section = &asm.sections[section_id as usize];
    // live-time base per block: prefix sums over code order
    let mut base = vec![0usize; ra.code_blocks.len() + 1];
    for (i, block) in ra.code_blocks.iter().enumerate() {
        base[i + 1] = base[i] + (block.end - block.start).max(1);
    }
    let mut intervals: [HashMap<usize, Vec<(usize, usize)>>; MAX_REG_TYPES] = Default::default();
    let mut extend = |regtype: usize, vidx: usize, from: usize, to: usize| {
        let list = intervals[regtype].entry(vidx).or_default();
        // merge with a trailing adjacent interval when possible
        if let Some(last) = list.last_mut() {
            if from <= last.1 && last.0 <= from {
                last.1 = last.1.max(to);
                return;
            }
        }
        list.push((from, to));
    };

    // in-block intervals
    for (bi, block) in ra.code_blocks.iter().enumerate() {
        let mut rpos = block.usage_pos;
        let mut ssa_id_idx: HashMap<SingleVReg, usize> = HashMap::new();
        let mut write_offsets: HashMap<SingleVReg, usize> = HashMap::new();
        // live region start per active version
        let mut region_start: HashMap<(SingleVReg, usize), usize> = HashMap::new();
        while section.usages.has_next(rpos) {
            let rvu = section.usages.next_usage(&mut rpos);
            if rvu.offset >= block.end {
                break;
            }
            let lt = base[bi] + (rvu.offset - block.start);
            let write_with_ssa = rvu.rw == RwFlags::WRITE && rvu.reg_field.is_some();
            for lane in rvu.rstart..rvu.rend {
                let svreg: SingleVReg = (rvu.reg_var, lane);
                let sinfo = match block.ssa_info.get(&svreg) {
                    Some(s) => *s,
                    None => continue,
                };
                let regtype = reg_type_of(asm, &svreg);
                if write_with_ssa {
                    let idx = ssa_id_idx.entry(svreg).or_insert(0);
                    *idx += 1;
                    write_offsets.insert(svreg, rvu.offset);
                    let ssa_id = ssa_id_for_index(*idx, &sinfo);
                    if let Some(vidx) = ra.vidx(asm, &svreg, ssa_id) {
                        region_start.insert((svreg, vidx), lt);
                        // a write is live at least through its own slot
                        extend(regtype, vidx, lt, lt + 1);
                    }
                } else {
                    let mut idx = ssa_id_idx.get(&svreg).copied().unwrap_or(0);
                    if write_offsets.get(&svreg) == Some(&rvu.offset) && idx > 0 {
                        idx -= 1;
                    }
                    let ssa_id = ssa_id_for_index(idx, &sinfo);
                    if let Some(vidx) = ra.vidx(asm, &svreg, ssa_id) {
                        let from = region_start
                            .get(&(svreg, vidx))
                            .copied()
                            .unwrap_or(base[bi]);
                        extend(regtype, vidx, from, lt + 1);
                    }
                }
            }
        }
    }

    // cross-block propagation for values read before any write
    let preds = predecessors(ra);
    for (bi, block) in ra.code_blocks.iter().enumerate() {
        for (svreg, sinfo) in &block.ssa_info {
            if !sinfo.read_before_write {
                continue;
            }
            let version = sinfo.ssa_id_before;
            let regtype = reg_type_of(asm, svreg);
            let vidx = match ra.vidx(asm, svreg, version) {
                Some(v) => v,
                None => continue,
            };
            // the value is live from block entry to its first read
            let first_lt = base[bi] + (sinfo.first_pos - block.start);
            extend(regtype, vidx, base[bi], first_lt + 1);
            // walk back to the defining blocks
            let mut work: Vec<usize> = preds.get(&bi).cloned().unwrap_or_default();
            let mut seen: HashSet<usize> = HashSet::new();
            seen.insert(bi);
            while let Some(p) = work.pop() {
                if !seen.insert(p) {
                    continue;
                }
                let pblock = &ra.code_blocks[p];
                let defines = pblock
                    .ssa_info
                    .get(svreg)
                    .map(|s| s.ssa_id_change != 0 && s.ssa_id_last == version)
                    .unwrap_or(false);
                if defines {
                    let def = pblock.ssa_info[svreg];
                    let def_lt = base[p] + (def.last_pos - pblock.start);
                    extend(regtype, vidx, def_lt, base[p + 1]);
                } else {
                    // live across the whole predecessor
                    extend(regtype, vidx, base[p], base[p + 1]);
                    work.extend(preds.get(&p).cloned().unwrap_or_default());
                }
            }
        }
    }

    let mut out: [Vec<LiveBlock>; MAX_REG_TYPES] = Default::default();
    for regtype in 0..MAX_REG_TYPES {
        for (vidx, list) in &intervals[regtype] {
            // normalize overlapping pieces
            let mut list = list.clone();
            list.sort_unstable();
            let mut merged: Vec<(usize, usize)> = Vec::new();
            for (s, e) in list {
                match merged.last_mut() {
                    Some(last) if s <= last.1 => last.1 = last.1.max(e),
                    _ => merged.push((s, e)),
                }
            }
            for (s, e) in merged {
                if e > s {
                    out[regtype].push((s, e, *vidx));
                }
            }
        }
        out[regtype].sort_unstable();
    }
    out
}

/// Predecessor lists including fall-through edges.
fn predecessors(ra: &RegAllocator) -> HashMap<usize, Vec<usize>> {
    let mut preds: HashMap<usize, Vec<usize>> = HashMap::new();
    for (bi, block) in ra.code_blocks.iter().enumerate() {
        for next in &block.nexts {
            preds.entry(next.block).or_default().push(bi);
        }
        let falls_through = (block.nexts.is_empty() || block.have_calls)
            && !block.have_return
            && !block.have_end;
        if falls_through && bi + 1 < ra.code_blocks.len() {
            preds.entry(bi + 1).or_default().push(bi);
        }
    }
    preds
}
