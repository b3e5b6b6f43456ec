//! Symbol, register-variable and code-flow pseudo-ops.

use super::{check_garbages_at_end, get_absolute_value_arg, get_name_arg, skip_comma};
use crate::asm::Assembler;
use crate::expr::ExprTarget;
use crate::parse_utils::{extract_scoped_sym_name, skip_spaces};
use crate::symbol::{RegVar, Symbol, SymbolBind};
use gcn_isa::{CodeFlowEntry, CodeFlowKind, RegClass, RegVarUsage, RwFlags};
use gcn_types::ABS_SECTION;

/// `.set` / `.equ` / `.equiv` / `.eqv`.
pub fn set_symbol_op(
    asm: &mut Assembler,
    _stmt_place: usize,
    pos: &mut usize,
    reassign: bool,
    base_expr: bool,
) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let name_place = *pos;
    let name = match extract_scoped_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => n,
        _ => {
            asm.print_error(*pos, "Expected symbol");
            return;
        }
    };
    if !super::skip_required_comma(asm, pos) {
        return;
    }
    skip_spaces(bytes, pos);
    asm.assign_symbol(&name, name_place, pos, reassign, base_expr);
}

/// `.enum [start],  name[, name ...]` — sequential constants.
pub fn do_enum(asm: &mut Assembler, _stmt_place: usize, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let mut counter: u64 = 0;
    if *pos < bytes.len() && bytes[*pos] == b'>' {
        // explicit start value: `.enum >10, a, b`
        *pos += 1;
        match get_absolute_value_arg(asm, pos, true) {
            Some(Some(v)) => counter = v,
            _ => return,
        }
        if skip_comma(asm, pos) != Some(true) {
            return;
        }
    }
    loop {
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() {
            break;
        }
        let name_place = *pos;
        let name = match extract_scoped_sym_name(bytes, pos, false) {
            Some(n) if !n.is_empty() => n,
            _ => {
                asm.print_error(*pos, "Expected symbol");
                return;
            }
        };
        let (sym_id, inserted) = asm.insert_symbol_in_scope(&name, Symbol::undefined());
        if !inserted && asm.symbols[sym_id].sym.is_defined() {
            asm.print_error(name_place, &format!("Symbol '{}' is already defined", name));
            return;
        }
        asm.set_symbol(sym_id, counter, ABS_SECTION);
        asm.symbols[sym_id].sym.once_defined = true;
        counter += 1;
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

/// `.global` / `.local` / `.weak`.
pub fn set_symbol_bind(asm: &mut Assembler, pos: &mut usize, bind: SymbolBind) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    loop {
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() {
            break;
        }
        let name = match extract_scoped_sym_name(bytes, pos, false) {
            Some(n) if !n.is_empty() => n,
            _ => {
                asm.print_error(*pos, "Expected symbol name");
                return;
            }
        };
        let (sym_id, _) = asm.insert_symbol_in_scope(&name, Symbol::undefined());
        asm.symbols[sym_id].sym.bind = bind;
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

/// `.size symbol, expr` — parsed, recorded, not used by raw output.
pub fn ignore_symbol_and_expr(asm: &mut Assembler, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let name = match extract_scoped_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => n,
        _ => {
            asm.print_error(*pos, "Expected symbol name");
            return;
        }
    };
    if !super::skip_required_comma(asm, pos) {
        return;
    }
    let value = match get_absolute_value_arg(asm, pos, true) {
        Some(Some(v)) => v,
        _ => return,
    };
    if let Some(sym_id) = asm.find_symbol_in_scope(&name) {
        asm.symbols[sym_id].sym.size = value;
    }
}

/// `.undef`.
pub fn undef_symbol(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let name = match extract_scoped_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => n,
        _ => {
            asm.print_error(*pos, "Expected symbol name");
            return;
        }
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    if name == "." {
        asm.print_error(stmt_place, "Symbol '.' can not be undefined");
        return;
    }
    match asm.find_symbol_in_scope(&name) {
        Some(sym_id) if asm.symbols[sym_id].sym.is_defined() => {
            asm.undefine_symbol(sym_id);
        }
        _ => {
            asm.print_warning(stmt_place, &format!("Symbol '{}' already doesn't exist", name));
        }
    }
}

/// `.regvar name:type[:size][, ...]` where type is `s` or `v`.
pub fn def_reg_var(asm: &mut Assembler, _stmt_place: usize, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    loop {
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() {
            break;
        }
        let name_place = *pos;
        let name = match crate::parse_utils::extract_sym_name(bytes, pos, false) {
            Some(n) if !n.is_empty() => n,
            _ => {
                asm.print_error(*pos, "Expected reg-var name");
                return;
            }
        };
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() || bytes[*pos] != b':' {
            asm.print_error(*pos, "Expected ':' after reg-var name");
            return;
        }
        *pos += 1;
        skip_spaces(bytes, pos);
        let type_place = *pos;
        let class = match crate::parse_utils::extract_sym_name(bytes, pos, false).as_deref() {
            Some("s") => RegClass::Sgpr,
            Some("v") => RegClass::Vgpr,
            _ => {
                asm.print_error(type_place, "Expected 's' or 'v' reg-var type");
                return;
            }
        };
        let mut size = 1u64;
        skip_spaces(bytes, pos);
        if *pos < bytes.len() && bytes[*pos] == b':' {
            *pos += 1;
            match get_absolute_value_arg(asm, pos, true) {
                Some(Some(v)) => size = v,
                _ => return,
            }
        }
        if size == 0 || size > u64::from(u16::MAX) {
            asm.print_error(name_place, "Size of reg-var out of range");
            return;
        }
        if asm.scopes[asm.current_scope].reg_vars.contains_key(&name) {
            asm.print_error(name_place, &format!("Reg-var '{}' is already defined", name));
            return;
        }
        asm.reg_vars.push(RegVar { name: name.clone(), class, size: size as u16 });
        let id = asm.reg_vars.len() - 1;
        asm.scopes[asm.current_scope].reg_vars.insert(name, id);
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

/// `.rvlin` / `.rvlin_once`: linear dependency between reg-var lanes.
pub fn do_rvlin(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, _used_once: bool) {
    asm.initialize_output_format();
    if !asm.is_writeable_section() {
        asm.print_error(stmt_place, "Linear deps can be defined only in code section");
        return;
    }
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let offset = asm.sections[asm.current_section as usize].size();
    loop {
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() {
            break;
        }
        let range_place = *pos;
        let range = match crate::isa::parse_register_range(asm, pos) {
            Some(r) => r,
            None => return,
        };
        match range.reg_var {
            Some(rv) => {
                asm.sections[asm.current_section as usize].linear_deps.push(
                    crate::section::LinearDepRecord {
                        offset,
                        reg_var: rv,
                        rstart: range.start,
                        rend: range.end,
                    },
                );
            }
            None => {
                asm.print_error(range_place, "Linear deps applies only to reg-vars");
                return;
            }
        }
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

/// `.usereg range:rw[, ...]`: explicit usage record.
pub fn do_use_reg(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    asm.initialize_output_format();
    if !asm.is_writeable_section() {
        asm.print_error(stmt_place, "Usage can be defined only in code section");
        return;
    }
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let offset = asm.sections[asm.current_section as usize].size();
    loop {
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() {
            break;
        }
        let range = match crate::isa::parse_register_range(asm, pos) {
            Some(r) => r,
            None => return,
        };
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() || bytes[*pos] != b':' {
            asm.print_error(*pos, "Expected ':' and access mode");
            return;
        }
        *pos += 1;
        let mode_place = *pos;
        let mut rw = RwFlags::empty();
        while *pos < bytes.len() && (bytes[*pos] == b'r' || bytes[*pos] == b'w') {
            if bytes[*pos] == b'r' {
                rw |= RwFlags::READ;
            } else {
                rw |= RwFlags::WRITE;
            }
            *pos += 1;
        }
        if rw.is_empty() {
            asm.print_error(mode_place, "Expected access mode 'r', 'w' or 'rw'");
            return;
        }
        // hardware VGPR lanes use the global numbering in side tables
        let (rstart, rend) = if range.reg_var.is_none() && range.class == RegClass::Vgpr {
            (range.start + gcn_isa::SRC_VGPR_BASE, range.end + gcn_isa::SRC_VGPR_BASE)
        } else {
            (range.start, range.end)
        };
        asm.sections[asm.current_section as usize].usages.push(RegVarUsage {
            offset,
            reg_var: range.reg_var,
            rstart,
            rend,
            reg_field: None,
            rw,
            align: 0,
        });
        match skip_comma(asm, pos) {
            Some(true) => continue,
            Some(false) => break,
            None => return,
        }
    }
}

/// `.cf_*`: record a code-flow event at the current position.
pub fn add_code_flow(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, kind: CodeFlowKind) {
    asm.initialize_output_format();
    if !asm.is_writeable_section() {
        asm.print_error(stmt_place, "Code flow can be defined only in code section");
        return;
    }
    let section = asm.current_section;
    let offset = asm.sections[section as usize].size();
    let needs_target = matches!(kind, CodeFlowKind::Jump | CodeFlowKind::CJump | CodeFlowKind::Call);
    if !needs_target {
        if !check_garbages_at_end(asm, *pos) {
            return;
        }
        asm.sections[section as usize].code_flow.push(CodeFlowEntry {
            offset,
            target: usize::MAX,
            kind,
        });
        return;
    }
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let expr_place = *pos;
    let expr_id = match asm.parse_expr(pos, false, false) {
        Some(e) => e,
        None => return,
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    let index = asm.sections[section as usize].code_flow.len();
    asm.sections[section as usize].code_flow.push(CodeFlowEntry {
        offset,
        target: usize::MAX,
        kind,
    });
    if asm.exprs[expr_id].sym_occurs_num == 0 {
        let (status, value, value_section) = asm.evaluate_expr_id(expr_id);
        if status != crate::error::TryStatus::Success {
            return;
        }
        if !crate::isa::section_matches(asm, section, value_section) {
            asm.print_error(expr_place, "Jump over current section!");
            return;
        }
        asm.sections[section as usize].code_flow[index].target = value as usize;
    } else {
        asm.exprs[expr_id].target = ExprTarget::CodeFlow { section, index };
    }
}

/// `.using scope` / `.unusing [scope]`.
pub fn start_using(asm: &mut Assembler, _stmt_place: usize, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let name_place = *pos;
    let name = match extract_scoped_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => n,
        _ => {
            asm.print_error(*pos, "Expected scope name");
            return;
        }
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    match find_scope_by_path(asm, &name) {
        Some(scope) => {
            let cur = asm.current_scope;
            asm.scopes[cur].start_using(scope);
        }
        None => asm.print_error(name_place, &format!("Scope '{}' doesn't exist", name)),
    }
}

/// `.unusing [scope]`.
pub fn stop_using(asm: &mut Assembler, _stmt_place: usize, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos >= bytes.len() {
        let cur = asm.current_scope;
        asm.scopes[cur].stop_using_all();
        return;
    }
    let name_place = *pos;
    let name = match extract_scoped_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => n,
        _ => {
            asm.print_error(*pos, "Expected scope name");
            return;
        }
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    match find_scope_by_path(asm, &name) {
        Some(scope) => {
            let cur = asm.current_scope;
            asm.scopes[cur].stop_using(scope);
        }
        None => asm.print_error(name_place, &format!("Scope '{}' doesn't exist", name)),
    }
}

fn find_scope_by_path(asm: &Assembler, name: &str) -> Option<crate::symbol::ScopeId> {
    let (global, parts) = crate::asm::parse::split_scoped_name(name);
    if !global {
        // resolve the first component walking outward
        let mut cur = asm.current_scope;
        let mut scope = loop {
            if let Some(&s) = asm.scopes[cur].scopes.get(parts[0]) {
                break s;
            }
            match asm.scopes[cur].parent {
                Some(p) => cur = p,
                None => return None,
            }
        };
        for part in &parts[1..] {
            scope = *asm.scopes[scope].scopes.get(*part)?;
        }
        return Some(scope);
    }
    let mut scope = 0;
    for part in parts {
        scope = *asm.scopes[scope].scopes.get(part)?;
    }
    Some(scope)
}

/// Predefined value selected by a `.get_*` pseudo-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predefined {
    /// `.get_arch`.
    Arch,
    /// `.get_64bit`.
    Bit64,
    /// `.get_format`.
    Format,
    /// `.get_gpu`.
    Gpu,
    /// `.get_version`.
    Version,
}

/// `.get_*  symbol`: define a symbol from assembler state.
pub fn get_predefined(asm: &mut Assembler, _stmt_place: usize, pos: &mut usize, what: Predefined) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let name_place = *pos;
    let name = match extract_scoped_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => n,
        _ => {
            asm.print_error(*pos, "Expected symbol");
            return;
        }
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    let value = match what {
        Predefined::Arch => asm.arch as u64,
        Predefined::Bit64 => u64::from(asm.config.bits64),
        Predefined::Format => asm.config.format as u64,
        Predefined::Gpu => asm.config.device as u64,
        Predefined::Version => {
            // major*10000 + minor*100 + patch
            20600
        }
    };
    let (sym_id, inserted) = asm.insert_symbol_in_scope(&name, Symbol::undefined());
    if !inserted && asm.symbols[sym_id].sym.once_defined && asm.symbols[sym_id].sym.is_defined() {
        asm.print_error(name_place, &format!("Symbol '{}' is already defined", name));
        return;
    }
    asm.set_symbol(sym_id, value, ABS_SECTION);
}
