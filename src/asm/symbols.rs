//! Symbol assignment and the resolution worklist.

use super::Assembler;
use crate::error::TryStatus;
use crate::expr::{ExprArg, ExprTarget};
use crate::parse_utils::skip_spaces;
use crate::symbol::{ScopeId, Symbol, SymbolId};
use gcn_types::{bytes as le, SectionId, Word, ABS_SECTION};

impl Assembler {
    /// Detach the symbol into a clone when pending occurrences would
    /// otherwise observe the new value. The clone keeps the occurrence
    /// list and prior expression; the live entry is cleared for the new
    /// definition.
    pub fn clone_sym_entry_if_needed(&mut self, sym_id: SymbolId) {
        let needs_clone = {
            let sym = &self.symbols[sym_id].sym;
            if sym.occurrences.is_empty() || sym.base || sym.reg_range {
                false
            } else if let Some(expr) = sym.expression {
                (sym.with_uneval_expr && !self.sect_diffs_prepared)
                    || self.exprs[expr].sym_occurs_num != 0
            } else {
                !self.resolving_relocs
                    && !sym.has_value
                    && !self.is_resolvable_section(sym.section_id)
            }
        };
        if !needs_clone {
            return;
        }
        let name = self.symbols[sym_id].name.clone();
        let old = self.symbols[sym_id].sym.clone();
        let clone_sym = if let Some(expr) = old.expression {
            let mut s = Symbol::with_expression(expr, old.base);
            s.once_defined = old.once_defined;
            s
        } else {
            let mut s = Symbol::with_value(old.section_id, old.value);
            s.once_defined = old.once_defined;
            s.resolving = old.resolving;
            s.has_value = old.has_value;
            s
        };
        let clone_id = self.put_symbol_entry(&name, clone_sym);
        if let Some(expr) = old.expression {
            self.exprs[expr].target = ExprTarget::Symbol(clone_id);
        }
        // move occurrences onto the clone, rewriting the expressions'
        // argument slots to point at it
        let occurrences = std::mem::take(&mut self.symbols[sym_id].sym.occurrences);
        for occ in &occurrences {
            if let ExprArg::Symbol(s) = &mut self.exprs[occ.expr].args[occ.arg_index] {
                if *s == sym_id {
                    *s = clone_id;
                }
            }
        }
        self.symbols[clone_id].sym.occurrences = occurrences;
        self.symbols[clone_id].sym.detached = true;
        self.symbol_clones.insert(clone_id);

        let live = &mut self.symbols[sym_id].sym;
        live.expression = None;
        live.has_value = false;
        live.with_uneval_expr = false;
    }

    /// Give `sym_id` a value and propagate through its occurrence
    /// chains, resolving dependent expressions and symbols.
    pub fn set_symbol(&mut self, sym_id: SymbolId, value: Word, section_id: SectionId) -> bool {
        self.clone_sym_entry_if_needed(sym_id);
        {
            let resolvable = self.is_resolvable_section(section_id) || self.resolving_relocs;
            let sym = &mut self.symbols[sym_id].sym;
            sym.value = value;
            sym.expression = None;
            sym.section_id = section_id;
            sym.has_value = resolvable;
            sym.reg_range = false;
            sym.base = false;
            sym.with_uneval_expr = false;
            if !sym.has_value {
                return true;
            }
            sym.resolving = true;
        }
        let mut good = true;
        let mut stack: Vec<(SymbolId, usize)> = vec![(sym_id, 0)];
        while let Some(&mut (cur_id, ref mut occ_index)) = stack.last_mut() {
            if *occ_index < self.symbols[cur_id].sym.occurrences.len() {
                let occ = self.symbols[cur_id].sym.occurrences[*occ_index];
                *occ_index += 1;
                let (cur_value, cur_section) = {
                    let sym = &self.symbols[cur_id].sym;
                    let abs = self.is_absolute_symbol(sym);
                    (sym.value, if abs { ABS_SECTION } else { sym.section_id })
                };
                let remaining = self.exprs[occ.expr].substitute_occurrence(
                    occ.arg_index,
                    occ.op_index,
                    cur_value,
                    cur_section,
                );
                if remaining != 0 {
                    continue;
                }
                // expression fully resolved
                let target = self.exprs[occ.expr].target;
                let symbol_target = matches!(target, ExprTarget::Symbol(_));
                let (status, value, section_id) = if !self.resolving_relocs || symbol_target {
                    self.evaluate_expr_id(occ.expr)
                } else {
                    // relocation resolution would go through the format
                    // handler here; none of the supported handlers
                    // carries relocations
                    (TryStatus::Failed, 0, ABS_SECTION)
                };
                match status {
                    TryStatus::Failed => {
                        good = false;
                        continue;
                    }
                    TryStatus::TryLater => {
                        self.uneval_expressions.push(occ.expr);
                        if let ExprTarget::Symbol(target_sym) = target {
                            self.symbols[target_sym].sym.with_uneval_expr = true;
                        }
                        continue;
                    }
                    TryStatus::Success => {}
                }
                match target {
                    ExprTarget::Symbol(target_sym) => {
                        let proceed = {
                            let t = &self.symbols[target_sym].sym;
                            !t.resolving && !t.reg_range && t.expression == Some(occ.expr)
                        };
                        if proceed {
                            let resolvable =
                                self.is_resolvable_section(section_id) || self.resolving_relocs;
                            let t = &mut self.symbols[target_sym].sym;
                            t.value = value;
                            t.section_id = section_id;
                            t.with_uneval_expr = false;
                            t.has_value = resolvable;
                            stack.push((target_sym, 0));
                            if resolvable {
                                let t = &mut self.symbols[target_sym].sym;
                                t.resolving = true;
                                t.expression = None;
                            }
                        }
                        // circular dependencies are ignored
                    }
                    _ => {
                        good &= self.resolve_expr_target(occ.expr, value, section_id);
                    }
                }
            } else {
                let (snapshot, detached) = {
                    let sym = &mut self.symbols[cur_id].sym;
                    sym.resolving = false;
                    sym.occurrences.clear();
                    let snap = sym.snapshot && {
                        sym.ref_count = sym.ref_count.saturating_sub(1);
                        sym.ref_count == 0
                    };
                    (snap, sym.detached)
                };
                if snapshot {
                    self.symbol_snapshots.remove(&cur_id);
                }
                if !self.do_not_remove_from_clones && detached {
                    self.symbol_clones.remove(&cur_id);
                }
                stack.pop();
            }
        }
        good
    }

    /// Apply a fully evaluated expression to its non-symbol target.
    pub fn resolve_expr_target(&mut self, expr_id: usize, value: Word, section_id: SectionId) -> bool {
        let target = self.exprs[expr_id].target;
        let pos = self.exprs[expr_id].source_pos.clone();
        match target {
            ExprTarget::None | ExprTarget::Symbol(_) => true,
            ExprTarget::Data { section, offset, size } => {
                if section_id != ABS_SECTION {
                    self.print_error_at(&pos, "Relative value is illegal in data expressions");
                    return false;
                }
                if size < 8 {
                    self.print_warning_for_range(u32::from(size) * 8, value, &pos);
                }
                let content = &mut self.sections[section as usize].content;
                match size {
                    1 => content[offset] = value as u8,
                    2 => le::write_u16(content, offset, value as u16),
                    4 => le::write_u32(content, offset, value as u32),
                    _ => le::write_u64(content, offset, value),
                }
                true
            }
            ExprTarget::Branch { section, offset } => {
                crate::isa::resolve_branch_target(self, &pos, section, offset, value, section_id)
            }
            ExprTarget::CodeFlow { section, index } => {
                if !crate::isa::section_matches(self, section, section_id) {
                    self.print_error_at(&pos, "Jump over current section!");
                    return false;
                }
                self.sections[section as usize].code_flow[index].target = value as usize;
                true
            }
        }
    }

    /// Assign `symbol_name` from the expression at `pos` (`=`, `.set`,
    /// `.equ`, `.eqv`, `.equiv`).
    pub fn assign_symbol(
        &mut self,
        symbol_name: &str,
        symbol_place: usize,
        pos: &mut usize,
        reassign: bool,
        base_expr: bool,
    ) -> bool {
        let line = self.line.clone();
        let bytes = line.as_bytes();
        skip_spaces(bytes, pos);
        if symbol_name.len() >= 3 && symbol_name.ends_with("::.") {
            self.print_error(symbol_place, "Symbol '.' can be only in global scope");
            return false;
        }
        if *pos < bytes.len() && bytes[*pos] == b'%' {
            // register-range assignment
            if symbol_name == "." {
                self.print_error(symbol_place, "Symbol '.' requires a resolved expression");
                return false;
            }
            self.initialize_output_format();
            *pos += 1;
            let range = match crate::isa::parse_register_range(self, pos) {
                Some(r) => r,
                None => return false,
            };
            skip_spaces(bytes, pos);
            if *pos != bytes.len() {
                self.print_error(*pos, "Garbages at end of expression");
                return false;
            }
            let (sym_id, inserted) = self.insert_symbol_in_scope(symbol_name, Symbol::undefined());
            if !inserted {
                let sym = &self.symbols[sym_id].sym;
                if (sym.once_defined || !reassign) && sym.is_defined() {
                    self.print_error(
                        symbol_place,
                        &format!("Symbol '{}' is already defined", symbol_name),
                    );
                    return false;
                }
            }
            self.clone_sym_entry_if_needed(sym_id);
            if !self.symbols[sym_id].sym.occurrences.is_empty() {
                let positions: Vec<_> = self.symbols[sym_id]
                    .sym
                    .occurrences
                    .iter()
                    .map(|o| self.exprs[o.expr].source_pos.clone())
                    .collect();
                for p in positions {
                    self.print_error_at(&p, "Expression have register symbol");
                }
                self.print_error(
                    symbol_place,
                    &format!(
                        "Register range symbol '{}' was used in some expressions",
                        symbol_name
                    ),
                );
                return false;
            }
            let sym = &mut self.symbols[sym_id].sym;
            sym.expression = None;
            sym.once_defined = !reassign;
            sym.base = false;
            sym.section_id = ABS_SECTION;
            sym.reg_range = true;
            sym.reg_var = range.reg_var;
            sym.has_value = true;
            sym.value = crate::isa::pack_reg_range(&range);
            sym.with_uneval_expr = false;
            return true;
        }

        let expr_place = *pos;
        let make_base = base_expr && symbol_name != ".";
        let mut value = 0u64;
        let mut section_id = ABS_SECTION;
        let mut expr_id = None;
        let fast = !make_base && {
            match self.fast_expr_evaluate(pos) {
                Some(v) => {
                    value = v;
                    true
                }
                None => false,
            }
        };
        if !fast {
            *pos = expr_place;
            expr_id = self.parse_expr(pos, make_base, false);
            if expr_id.is_none() {
                return false;
            }
        }
        skip_spaces(bytes, pos);
        if *pos != bytes.len() {
            self.print_error(*pos, "Garbages at end of expression");
            return false;
        }
        if let Some(id) = expr_id {
            if self.exprs[id].ops.is_empty() {
                self.print_error(expr_place, "Expected assignment expression");
                return false;
            }
        }

        if symbol_name == "." {
            if let Some(id) = expr_id {
                if self.exprs[id].sym_occurs_num != 0 {
                    self.print_error(symbol_place, "Symbol '.' requires a resolved expression");
                    return false;
                }
                let (status, v, s) = self.evaluate_expr_id(id);
                if status != TryStatus::Success {
                    return false;
                }
                value = v;
                section_id = s;
            }
            return self.assign_output_counter(symbol_place, value, section_id, 0);
        }

        let (sym_id, inserted) = self.insert_symbol_in_scope(symbol_name, Symbol::undefined());
        if !inserted {
            let sym = &self.symbols[sym_id].sym;
            if (sym.once_defined || !reassign) && sym.is_defined() {
                self.print_error(
                    symbol_place,
                    &format!("Symbol '{}' is already defined", symbol_name),
                );
                return false;
            }
        }

        let mut try_later = false;
        match expr_id {
            None => {
                self.set_symbol(sym_id, value, section_id);
                self.symbols[sym_id].sym.once_defined = !reassign;
            }
            Some(id) if self.exprs[id].sym_occurs_num == 0 && !make_base => {
                let (status, v, s) = self.evaluate_expr_id(id);
                match status {
                    TryStatus::Failed => return false,
                    TryStatus::TryLater => try_later = true,
                    TryStatus::Success => {
                        self.set_symbol(sym_id, v, s);
                        self.symbols[sym_id].sym.once_defined = !reassign;
                    }
                }
            }
            Some(_) => try_later = true,
        }
        if try_later {
            let id = expr_id.expect("deferred assignment always has an expression");
            self.clone_sym_entry_if_needed(sym_id);
            self.exprs[id].target = ExprTarget::Symbol(sym_id);
            let complete = self.exprs[id].sym_occurs_num == 0;
            if complete && !make_base {
                self.uneval_expressions.push(id);
            }
            {
                let sym = &mut self.symbols[sym_id].sym;
                sym.with_uneval_expr = complete && !make_base;
                sym.expression = Some(id);
                sym.reg_range = false;
                sym.has_value = false;
                sym.once_defined = !reassign;
                sym.base = base_expr;
            }
            if base_expr && !self.symbols[sym_id].sym.occurrences.is_empty() {
                // in-flight occurrences see the base through a snapshot
                // made at this point
                let parent_pos = {
                    let occ = self.symbols[sym_id].sym.occurrences[0];
                    self.exprs[occ.expr].source_pos.clone()
                };
                let snapshot = match self.make_symbol_snapshot(sym_id, Some(&parent_pos)) {
                    Some(s) => s,
                    None => return false,
                };
                let occurrences = std::mem::take(&mut self.symbols[sym_id].sym.occurrences);
                for occ in &occurrences {
                    if let ExprArg::Symbol(s) = &mut self.exprs[occ.expr].args[occ.arg_index] {
                        if *s == sym_id {
                            *s = snapshot;
                        }
                    }
                }
                self.symbols[snapshot].sym.occurrences = occurrences;
                if self.symbols[snapshot].sym.has_value {
                    let v = self.symbols[snapshot].sym.value;
                    let s = self.symbols[snapshot].sym.section_id;
                    self.set_symbol(snapshot, v, s);
                }
            }
        }
        true
    }

    /// `. = expr` / `.org`: move the output counter forward.
    pub fn assign_output_counter(
        &mut self,
        symbol_place: usize,
        value: Word,
        section_id: SectionId,
        fill_value: u8,
    ) -> bool {
        self.initialize_output_format();
        if self.current_section != section_id && section_id != ABS_SECTION {
            self.print_error(symbol_place, "Illegal section change for symbol '.'");
            return false;
        }
        if self.current_section != ABS_SECTION && (self.current_out_pos as u64) > value {
            self.print_error(symbol_place, "Attempt to move backwards");
            return false;
        }
        if !self.is_addressable_section() {
            self.print_error(
                symbol_place,
                "Symbol '.' can be defined only in addressable section",
            );
            return false;
        }
        if self.current_section == ABS_SECTION {
            self.current_out_pos = value as usize;
            return true;
        }
        let grow = (value as usize).saturating_sub(self.current_out_pos);
        if grow != 0 {
            let section = &mut self.sections[self.current_section as usize];
            let new_len = section.content.len() + grow;
            section.content.resize(new_len, fill_value);
        }
        self.current_out_pos = value as usize;
        true
    }

    /// Undefine a symbol (`.undef`).
    pub fn undefine_symbol(&mut self, sym_id: SymbolId) {
        self.clone_sym_entry_if_needed(sym_id);
        self.symbols[sym_id].sym.undefine();
    }

    /// Attempt final resolution of one symbol (end-of-assembly pass).
    pub fn try_to_resolve_symbol(&mut self, sym_id: SymbolId) {
        let needs = {
            let e = &self.symbols[sym_id];
            !e.sym.occurrences.is_empty()
                || (e.name != "." && !self.is_resolvable_section(e.sym.section_id))
        };
        if needs {
            if let Some((value, section_id)) = crate::format::FormatHandler::resolve_symbol(self, sym_id) {
                self.set_symbol(sym_id, value, section_id);
            }
        }
    }

    /// Resolve every symbol of `scope` and its children.
    pub fn try_to_resolve_symbols(&mut self, scope: ScopeId) {
        let ids: Vec<SymbolId> = self.scopes[scope].symbols.values().copied().collect();
        for id in ids {
            self.try_to_resolve_symbol(id);
        }
        let children: Vec<ScopeId> = self.scopes[scope].scopes.values().copied().collect();
        for child in children {
            self.try_to_resolve_symbols(child);
        }
    }

    /// Report symbols that never resolved, once per occurrence, with
    /// the path of enclosing scope names.
    pub fn print_unresolved_symbols(&mut self, scope: ScopeId) {
        if self.config.test_run && !self.config.test_resolve {
            return;
        }
        let path = self.scope_path(scope);
        let ids: Vec<(String, SymbolId)> = self.scopes[scope]
            .symbols
            .iter()
            .map(|(n, &i)| (n.clone(), i))
            .collect();
        for (name, id) in ids {
            if self.symbols[id].sym.occurrences.is_empty() {
                continue;
            }
            let full_name =
                if path.is_empty() { name.clone() } else { format!("{}::{}", path, name) };
            let positions: Vec<_> = self.symbols[id]
                .sym
                .occurrences
                .iter()
                .map(|o| self.exprs[o.expr].source_pos.clone())
                .collect();
            for pos in positions {
                self.print_error_at(&pos, &format!("Unresolved symbol '{}'", full_name));
            }
        }
        let children: Vec<ScopeId> = self.scopes[scope].scopes.values().copied().collect();
        for child in children {
            self.print_unresolved_symbols(child);
        }
    }

    fn scope_path(&self, mut scope: ScopeId) -> String {
        let mut parts: Vec<&str> = Vec::new();
        while let Some(parent) = self.scopes[scope].parent {
            parts.push(&self.scopes[scope].name);
            scope = parent;
        }
        parts.reverse();
        parts.join("::")
    }
}

