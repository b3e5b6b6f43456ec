//! SSA construction over the code-block graph and conflict resolution.

use std::collections::{HashMap, HashSet};

use super::{RegAllocator, SingleVReg, SsaReplace};
use crate::asm::Assembler;
use gcn_isa::RwFlags;
use gcn_types::SectionId;
use tracing::trace;

/// Write that can receive a fresh SSA id: a plain write through a real
/// encoding field. Read-write and field-less accesses count as reads.
fn is_write_with_ssa(rw: RwFlags, has_field: bool) -> bool {
    rw == RwFlags::WRITE && has_field
}

struct FlowEntry {
    block: usize,
    next_index: usize,
    is_call: bool,
    /// `(svreg, previous id)` changes to undo on backtrack.
    saved: Vec<(SingleVReg, Option<usize>)>,
}

impl RegAllocator {
    /// Stage (b): per-block SSA info and globally consistent ids.
    pub fn create_ssa_data(&mut self, asm: &Assembler, section_id: SectionId) {
        let section = &asm.sections[section_id as usize];
        // local pass: reads-before-writes and write counts per block
        for block in &mut self.code_blocks {
            let mut rpos = block.usage_pos;
            let mut written: HashSet<SingleVReg> = HashSet::new();
            while section.usages.has_next(rpos) {
                let rvu = section.usages.next_usage(&mut rpos);
                if rvu.offset >= block.end {
                    break;
                }
                for lane in rvu.rstart..rvu.rend {
                    let svreg: SingleVReg = (rvu.reg_var, lane);
                    let entry = block.ssa_info.entry(svreg).or_insert_with(|| {
                        let mut s = super::SsaInfo::default();
                        s.first_pos = rvu.offset;
                        s
                    });
                    entry.last_pos = rvu.offset;
                    if is_write_with_ssa(rvu.rw, rvu.reg_field.is_some()) {
                        entry.ssa_id_change += 1;
                        written.insert(svreg);
                    } else if !written.contains(&svreg) {
                        entry.read_before_write = true;
                    }
                }
            }
        }

        // global numbering: DFS with call stack; callee changes are kept
        // on return so subroutine writes flow into post-call paths
        let mut total_ids: HashMap<SingleVReg, usize> = HashMap::new();
        let mut cur_ids: HashMap<SingleVReg, usize> = HashMap::new();
        let mut entry_ids: Vec<HashMap<SingleVReg, usize>> = vec![HashMap::new(); self.code_blocks.len()];
        let mut visited = vec![false; self.code_blocks.len()];
        let mut on_stack: HashSet<usize> = HashSet::new();
        let mut stack: Vec<FlowEntry> = vec![FlowEntry {
            block: 0,
            next_index: 0,
            is_call: false,
            saved: Vec::new(),
        }];
        on_stack.insert(0);

        while let Some(top) = stack.last_mut() {
            let block_idx = top.block;
            if top.next_index == 0 && !visited[block_idx] {
                visited[block_idx] = true;
                // number this block's accesses
                let infos: Vec<(SingleVReg, super::SsaInfo)> = self.code_blocks[block_idx]
                    .ssa_info
                    .iter()
                    .map(|(k, v)| (*k, *v))
                    .collect();
                let mut saved = Vec::new();
                let mut entry_map = HashMap::new();
                for (svreg, mut sinfo) in infos {
                    let before = cur_ids.get(&svreg).copied().unwrap_or(0);
                    entry_map.insert(svreg, before);
                    sinfo.ssa_id_before = before;
                    if sinfo.ssa_id_change != 0 {
                        let total = total_ids.entry(svreg).or_insert(0);
                        *total += 1;
                        sinfo.ssa_id_first = *total;
                        sinfo.ssa_id = *total;
                        *total += sinfo.ssa_id_change - 1;
                        sinfo.ssa_id_last = *total;
                        saved.push((svreg, cur_ids.insert(svreg, sinfo.ssa_id_last)));
                    }
                    self.code_blocks[block_idx].ssa_info.insert(svreg, sinfo);
                }
                entry_ids[block_idx] = entry_map;
                top.saved = saved;
            } else if top.next_index == 0 && visited[block_idx] {
                // joined an already-numbered block: record conflicts
                let recorded = entry_ids[block_idx].clone();
                for (svreg, before) in recorded {
                    let incoming = cur_ids.get(&svreg).copied().unwrap_or(0);
                    if incoming != before {
                        insert_replace(&mut self.ssa_replaces, svreg, incoming, before);
                        insert_replace(&mut self.ssa_replaces, svreg, before, incoming);
                        trace!(?svreg, incoming, before, "ssa conflict recorded");
                    }
                }
                let entry = stack.pop().expect("entry just inspected");
                if !entry.is_call {
                    for (svreg, old) in entry.saved.into_iter().rev() {
                        restore(&mut cur_ids, svreg, old);
                    }
                }
                on_stack.remove(&block_idx);
                continue;
            }

            let block = self.code_blocks[block_idx].clone();
            if top.next_index < block.nexts.len() {
                let next = block.nexts[top.next_index];
                top.next_index += 1;
                if on_stack.contains(&next.block) {
                    // loop back-edge: conflicts against the loop head
                    let recorded = entry_ids[next.block].clone();
                    for (svreg, before) in recorded {
                        let incoming = cur_ids.get(&svreg).copied().unwrap_or(0);
                        if incoming != before {
                            insert_replace(&mut self.ssa_replaces, svreg, incoming, before);
                            insert_replace(&mut self.ssa_replaces, svreg, before, incoming);
                        }
                    }
                    continue;
                }
                on_stack.insert(next.block);
                stack.push(FlowEntry {
                    block: next.block,
                    next_index: 0,
                    is_call: next.is_call,
                    saved: Vec::new(),
                });
            } else if (block.nexts.is_empty() || block.have_calls)
                && top.next_index <= block.nexts.len()
                && !block.have_return
                && !block.have_end
            {
                top.next_index = block.nexts.len() + 1;
                let fallthrough = block_idx + 1;
                if fallthrough < self.code_blocks.len() && !on_stack.contains(&fallthrough) {
                    on_stack.insert(fallthrough);
                    stack.push(FlowEntry {
                        block: fallthrough,
                        next_index: 0,
                        is_call: false,
                        saved: Vec::new(),
                    });
                }
            } else {
                let entry = stack.pop().expect("active entry");
                if !entry.is_call {
                    for (svreg, old) in entry.saved.into_iter().rev() {
                        restore(&mut cur_ids, svreg, old);
                    }
                }
                on_stack.remove(&entry.block);
            }
        }
    }

    /// Stage (c): minimize SSA replacement classes and rewrite ids.
    pub fn apply_ssa_replaces(&mut self) {
        struct MinNode {
            min_ssa_id: usize,
            visited: bool,
            nexts: HashSet<usize>,
        }
        for replaces in self.ssa_replaces.values_mut() {
            replaces.sort_unstable();
            replaces.dedup();
            let mut nodes: HashMap<usize, MinNode> = HashMap::new();
            for &(orig, dest) in replaces.iter() {
                let node = nodes.entry(orig).or_insert(MinNode {
                    min_ssa_id: orig,
                    visited: false,
                    nexts: HashSet::new(),
                });
                node.min_ssa_id = node.min_ssa_id.min(dest);
                node.nexts.insert(dest);
            }
            // propagate minimum over the replacement graph
            let keys: Vec<usize> = nodes.keys().copied().collect();
            for start in keys {
                if nodes[&start].visited {
                    continue;
                }
                // iterative DFS carrying the running minimum
                let mut order = vec![start];
                let mut seen = HashSet::new();
                seen.insert(start);
                let mut i = 0;
                while i < order.len() {
                    let cur = order[i];
                    i += 1;
                    let nexts: Vec<usize> = nodes
                        .get(&cur)
                        .map(|n| n.nexts.iter().copied().collect())
                        .unwrap_or_default();
                    for n in nexts {
                        if nodes.contains_key(&n) && seen.insert(n) {
                            order.push(n);
                        }
                    }
                }
                let min_id = order
                    .iter()
                    .filter_map(|k| nodes.get(k).map(|n| n.min_ssa_id))
                    .min()
                    .unwrap_or(start);
                for k in order {
                    if let Some(n) = nodes.get_mut(&k) {
                        n.min_ssa_id = min_id;
                        n.visited = true;
                    }
                }
            }
            let mut new_replaces: Vec<SsaReplace> =
                nodes.iter().map(|(&k, n)| (k, n.min_ssa_id)).collect();
            new_replaces.sort_unstable();
            *replaces = new_replaces;
        }
        // rewrite block ssa info through the minimized map
        for block in &mut self.code_blocks {
            for (svreg, sinfo) in block.ssa_info.iter_mut() {
                let replaces = match self.ssa_replaces.get(svreg) {
                    Some(r) => r,
                    None => continue,
                };
                let lookup = |id: usize| -> usize {
                    match replaces.binary_search_by_key(&id, |&(o, _)| o) {
                        Ok(i) => replaces[i].1,
                        Err(_) => id,
                    }
                };
                if sinfo.read_before_write {
                    sinfo.ssa_id_before = lookup(sinfo.ssa_id_before);
                }
                if sinfo.ssa_id_change != 0 {
                    sinfo.ssa_id_first = lookup(sinfo.ssa_id_first);
                    sinfo.ssa_id_last = lookup(sinfo.ssa_id_last);
                }
            }
        }
    }
}

fn insert_replace(
    map: &mut super::SsaReplacesMap,
    svreg: SingleVReg,
    orig: usize,
    dest: usize,
) {
    map.entry(svreg).or_default().push((orig, dest));
}

fn restore(cur_ids: &mut HashMap<SingleVReg, usize>, svreg: SingleVReg, old: Option<usize>) {
    match old {
        Some(v) => {
            cur_ids.insert(svreg, v);
        }
        None => {
            cur_ids.remove(&svreg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::SsaReplacesMap;
    use super::*;

    #[test]
    fn replace_minimization_is_idempotent() {
        let mut ra = RegAllocator::default();
        let svreg: SingleVReg = (Some(0), 0);
        let mut map = SsaReplacesMap::new();
        insert_replace(&mut map, svreg, 3, 1);
        insert_replace(&mut map, svreg, 1, 3);
        insert_replace(&mut map, svreg, 5, 3);
        insert_replace(&mut map, svreg, 3, 5);
        ra.ssa_replaces = map;
        ra.apply_ssa_replaces();
        let replaces = &ra.ssa_replaces[&svreg];
        // every id in the class maps to the minimum
        for &(_, dest) in replaces {
            assert_eq!(dest, 1);
        }
        // idempotent: applying the mapping twice changes nothing
        let lookup = |id: usize| -> usize {
            match replaces.binary_search_by_key(&id, |&(o, _)| o) {
                Ok(i) => replaces[i].1,
                Err(_) => id,
            }
        };
        for &(orig, dest) in replaces {
            assert_eq!(lookup(lookup(orig)), dest);
        }
    }
}
