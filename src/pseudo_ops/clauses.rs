//! Clause pseudo-ops: conditionals, macro and repetition definitions,
//! scopes.

use std::rc::Rc;

use super::{check_garbages_at_end, find_pseudo_op, get_absolute_value_arg, get_name_arg, PseudoOp};
use crate::asm::{Assembler, ClauseKind};
use crate::filter::{ForData, IrpData, MacroArg, MacroData, RepeatData};
use crate::parse_utils::{extract_sym_name, skip_spaces, skip_spaces_and_labels};
use gcn_types::ABS_SECTION;

/// Comparison selected by an `.if*` pseudo-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfIntComp {
    /// `.if`: nonzero.
    NonZero,
    /// `.ifeq`.
    Equal,
    /// `.ifne`.
    NotEqual,
    /// `.ifge`.
    GreaterEqual,
    /// `.ifgt`.
    Greater,
    /// `.ifle`.
    LessEqual,
    /// `.iflt`.
    Less,
}

fn push_condition(asm: &mut Assembler, stmt_place: usize, satisfied: bool, else_if: bool) {
    let kind = if else_if { ClauseKind::ElseIf } else { ClauseKind::If };
    let (ok, included) = asm.push_clause(stmt_place, kind, satisfied);
    if ok && !included {
        skip_clauses(asm);
    }
}

/// `.if` family over integer comparisons.
pub fn do_if_int(
    asm: &mut Assembler,
    stmt_place: usize,
    pos: &mut usize,
    comp: IfIntComp,
    else_if: bool,
) {
    let value = match get_absolute_value_arg(asm, pos, true) {
        Some(Some(v)) => v as i64,
        _ => return,
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    let satisfied = match comp {
        IfIntComp::NonZero => value != 0,
        IfIntComp::Equal => value == 0,
        IfIntComp::NotEqual => value != 0,
        IfIntComp::GreaterEqual => value >= 0,
        IfIntComp::Greater => value > 0,
        IfIntComp::LessEqual => value <= 0,
        IfIntComp::Less => value < 0,
    };
    push_condition(asm, stmt_place, satisfied, else_if);
}

/// `.ifdef` / `.ifndef`.
pub fn do_if_def(
    asm: &mut Assembler,
    stmt_place: usize,
    pos: &mut usize,
    negation: bool,
    else_if: bool,
) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let name = match crate::parse_utils::extract_scoped_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => n,
        _ => {
            asm.print_error(*pos, "Expected symbol");
            return;
        }
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    let defined = asm
        .find_symbol_in_scope(&name)
        .map(|id| asm.symbols[id].sym.is_defined())
        .unwrap_or(false);
    push_condition(asm, stmt_place, defined != negation, else_if);
}

/// `.ifb` / `.ifnb`: blank rest of line.
pub fn do_if_blank(
    asm: &mut Assembler,
    stmt_place: usize,
    pos: &mut usize,
    negation: bool,
    else_if: bool,
) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let blank = *pos == bytes.len();
    *pos = bytes.len();
    push_condition(asm, stmt_place, blank != negation, else_if);
}

/// `.ifc` / `.ifnc`: compare two unquoted strings up to a comma.
pub fn do_if_cmp_str(
    asm: &mut Assembler,
    stmt_place: usize,
    pos: &mut usize,
    negation: bool,
    else_if: bool,
) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let first_start = *pos;
    while *pos < bytes.len() && bytes[*pos] != b',' {
        *pos += 1;
    }
    if *pos == bytes.len() {
        asm.print_error(*pos, "Expected ',' before second string");
        return;
    }
    let first = String::from_utf8_lossy(&bytes[first_start..*pos]).trim().to_owned();
    *pos += 1;
    skip_spaces(bytes, pos);
    let second = String::from_utf8_lossy(&bytes[*pos..]).trim_end().to_owned();
    *pos = bytes.len();
    push_condition(asm, stmt_place, (first == second) != negation, else_if);
}

/// `.ifeqs` / `.ifnes`: compare two quoted strings.
pub fn do_if_str_equal(
    asm: &mut Assembler,
    stmt_place: usize,
    pos: &mut usize,
    negation: bool,
    else_if: bool,
) {
    let first = match asm.parse_string(pos) {
        Some(s) => s,
        None => return,
    };
    if !super::skip_required_comma(asm, pos) {
        return;
    }
    let second = match asm.parse_string(pos) {
        Some(s) => s,
        None => return,
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    push_condition(asm, stmt_place, (first == second) != negation, else_if);
}

/// `.if64` / `.if32`.
pub fn do_if64_bit(
    asm: &mut Assembler,
    stmt_place: usize,
    pos: &mut usize,
    negation: bool,
    else_if: bool,
) {
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    push_condition(asm, stmt_place, asm.config.bits64 != negation, else_if);
}

/// `.ifarch` / `.ifnarch`.
pub fn do_if_arch(
    asm: &mut Assembler,
    stmt_place: usize,
    pos: &mut usize,
    negation: bool,
    else_if: bool,
) {
    use std::str::FromStr;
    let name = match get_name_arg(asm, pos, "architecture name") {
        Some(n) => n,
        None => return,
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    match gcn_types::GpuArchitecture::from_str(&name) {
        Ok(arch) => push_condition(asm, stmt_place, (arch == asm.arch) != negation, else_if),
        Err(_) => asm.print_error(stmt_place, &format!("Unknown architecture '{}'", name)),
    }
}

/// `.ifgpu` / `.ifngpu`.
pub fn do_if_gpu(
    asm: &mut Assembler,
    stmt_place: usize,
    pos: &mut usize,
    negation: bool,
    else_if: bool,
) {
    use std::str::FromStr;
    let name = match get_name_arg(asm, pos, "GPU device name") {
        Some(n) => n,
        None => return,
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    match gcn_types::GpuDevice::from_str(&name) {
        Ok(device) => {
            push_condition(asm, stmt_place, (device == asm.config.device) != negation, else_if)
        }
        Err(_) => asm.print_error(stmt_place, &format!("Unknown GPU device '{}'", name)),
    }
}

/// `.iffmt` / `.ifnfmt`.
pub fn do_if_fmt(
    asm: &mut Assembler,
    stmt_place: usize,
    pos: &mut usize,
    negation: bool,
    else_if: bool,
) {
    use std::str::FromStr;
    let name = match get_name_arg(asm, pos, "output format type") {
        Some(n) => n,
        None => return,
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    match crate::config::BinaryFormat::from_str(&name) {
        Ok(format) => {
            push_condition(asm, stmt_place, (format == asm.config.format) != negation, else_if)
        }
        Err(_) => asm.print_error(stmt_place, &format!("Unknown output format '{}'", name)),
    }
}

/// `.else`.
pub fn do_else(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    let (ok, included) = asm.push_clause(stmt_place, ClauseKind::Else, true);
    if ok && !included {
        skip_clauses(asm);
    }
}

/// `.endif`.
pub fn end_if(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    asm.pop_clause(stmt_place, ClauseKind::If);
}

/// First statement token of the current line, lower-cased.
fn first_statement_token(asm: &Assembler) -> (usize, Option<String>) {
    let bytes = asm.line.as_bytes();
    let mut pos = 0usize;
    skip_spaces_and_labels(bytes, &mut pos);
    let place = pos;
    let name = extract_sym_name(bytes, &mut pos, false).map(|mut n| {
        n.make_ascii_lowercase();
        n
    });
    (place, name)
}

fn is_if_opener(op: PseudoOp) -> bool {
    use PseudoOp::*;
    matches!(
        op,
        If | If32
            | If64
            | IfArch
            | IfB
            | IfC
            | IfDef
            | IfEq
            | IfEqs
            | IfFmt
            | IfGe
            | IfGpu
            | IfGt
            | IfLe
            | IfLt
            | IfNArch
            | IfNb
            | IfNc
            | IfNDef
            | IfNe
            | IfNes
            | IfNFmt
            | IfNGpu
            | IfNotDef
    )
}

fn is_else_if(op: PseudoOp) -> bool {
    use PseudoOp::*;
    matches!(
        op,
        ElseIf
            | ElseIf32
            | ElseIf64
            | ElseIfArch
            | ElseIfB
            | ElseIfC
            | ElseIfDef
            | ElseIfEq
            | ElseIfEqs
            | ElseIfFmt
            | ElseIfGe
            | ElseIfGpu
            | ElseIfGt
            | ElseIfLe
            | ElseIfLt
            | ElseIfNArch
            | ElseIfNb
            | ElseIfNc
            | ElseIfNDef
            | ElseIfNe
            | ElseIfNes
            | ElseIfNFmt
            | ElseIfNGpu
            | ElseIfNotDef
    )
}

fn is_container_opener(op: PseudoOp) -> bool {
    use PseudoOp::*;
    matches!(op, Macro | Rept | Irp | Irpc | For | While)
}

/// Skip statements of an unsatisfied conditional branch until the
/// matching `.else`/`.elseif`/`.endif` redirects control.
pub fn skip_clauses(asm: &mut Assembler) {
    let mut if_depth = 0usize;
    let mut container_depth = 0usize;
    loop {
        if !asm.read_line() {
            return; // unterminated; reported at end of assembly
        }
        let (place, name) = first_statement_token(asm);
        let op = match name.as_deref().and_then(find_pseudo_op) {
            Some(op) => op,
            None => continue,
        };
        if container_depth > 0 {
            match op {
                _ if is_container_opener(op) => container_depth += 1,
                PseudoOp::EndM | PseudoOp::EndR => container_depth -= 1,
                _ => {}
            }
            continue;
        }
        if is_container_opener(op) {
            container_depth += 1;
            continue;
        }
        if is_if_opener(op) {
            if_depth += 1;
            continue;
        }
        match op {
            PseudoOp::EndIf => {
                if if_depth == 0 {
                    asm.pop_clause(place, ClauseKind::If);
                    return;
                }
                if_depth -= 1;
            }
            PseudoOp::Else if if_depth == 0 => {
                let (ok, included) = asm.push_clause(place, ClauseKind::Else, true);
                if !ok || included {
                    return;
                }
            }
            op if is_else_if(op) && if_depth == 0 => {
                // re-dispatch: the elseif evaluates its own condition
                // and re-enters skipping when not taken
                let bytes = asm.line.clone();
                let mut pos = place;
                let _ = extract_sym_name(bytes.as_bytes(), &mut pos, false);
                let name = name.expect("pseudo-op token present");
                super::dispatch(asm, &name, place, pos);
                return;
            }
            _ => {}
        }
    }
}

/// Collect lines until the terminator matching `opener`, feeding each
/// body line to `add`. True when the terminator was found.
fn collect_until_end(
    asm: &mut Assembler,
    opener: ClauseKind,
    mut add: impl FnMut(&mut Assembler),
) -> bool {
    let mut nested: Vec<ClauseKind> = Vec::new();
    loop {
        if !asm.read_line() {
            return false; // unterminated; clause remains on the stack
        }
        let (place, name) = first_statement_token(asm);
        if let Some(op) = name.as_deref().and_then(find_pseudo_op) {
            match op {
                PseudoOp::Macro => nested.push(ClauseKind::Macro),
                PseudoOp::Rept | PseudoOp::Irp | PseudoOp::Irpc | PseudoOp::For
                | PseudoOp::While => nested.push(ClauseKind::Repeat),
                PseudoOp::EndM => match nested.last() {
                    Some(ClauseKind::Macro) => {
                        nested.pop();
                    }
                    None if opener == ClauseKind::Macro => {
                        asm.pop_clause(place, ClauseKind::Macro);
                        return true;
                    }
                    _ => {
                        asm.print_error(place, "Ending macro across repetition");
                        return false;
                    }
                },
                PseudoOp::EndR => match nested.last() {
                    Some(ClauseKind::Repeat) => {
                        nested.pop();
                    }
                    None if opener == ClauseKind::Repeat => {
                        asm.pop_clause(place, ClauseKind::Repeat);
                        return true;
                    }
                    _ => {
                        asm.print_error(place, "Ending repetition across macro");
                        return false;
                    }
                },
                _ => {}
            }
        }
        add(asm);
    }
}

/// `.macro`: parse the header, collect the body, register the macro.
pub fn do_macro(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let mut name = match extract_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => n,
        _ => {
            asm.print_error(*pos, "Expected macro name");
            return;
        }
    };
    if asm.macro_case {
        name.make_ascii_lowercase();
    }
    if asm.macros.contains_key(&name) && asm.config.warnings {
        asm.print_warning(stmt_place, &format!("Macro '{}' is already defined", name));
    }
    // argument declarations
    let mut args: Vec<MacroArg> = Vec::new();
    loop {
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() {
            break;
        }
        if bytes[*pos] == b',' {
            *pos += 1;
            skip_spaces(bytes, pos);
        }
        let arg_place = *pos;
        let arg_name = match extract_sym_name(bytes, pos, false) {
            Some(n) if !n.is_empty() => n,
            _ => {
                asm.print_error(*pos, "Expected macro argument name");
                return;
            }
        };
        if args.iter().any(|a| a.name == arg_name) {
            asm.print_error(arg_place, &format!("Duplicated macro argument '{}'", arg_name));
            return;
        }
        let mut vararg = false;
        let mut required = false;
        let mut def_value = String::new();
        skip_spaces(bytes, pos);
        if *pos < bytes.len() && bytes[*pos] == b':' {
            *pos += 1;
            let qual_place = *pos;
            match extract_sym_name(bytes, pos, false).as_deref() {
                Some("vararg") => vararg = true,
                Some("req") => required = true,
                _ => {
                    asm.print_error(qual_place, "Expected 'req' or 'vararg'");
                    return;
                }
            }
        } else if *pos < bytes.len() && bytes[*pos] == b'=' {
            *pos += 1;
            if !asm.parse_macro_arg_value(pos, &mut def_value) {
                return;
            }
        }
        args.push(MacroArg { name: arg_name, def_value, vararg, required });
    }
    let (ok, _) = asm.push_clause(stmt_place, ClauseKind::Macro, true);
    if !ok {
        return;
    }
    let source_pos = asm.get_source_pos(stmt_place);
    let mut data = MacroData::new(source_pos, args);
    let found = collect_until_end(asm, ClauseKind::Macro, |asm| {
        let common = asm.filters.last().expect("reading requires a filter").common();
        let macro_subst = common.macro_subst.clone();
        let source = common.source.clone();
        let trans = common.col_translations.clone();
        let line = asm.line.clone();
        data.add_line(macro_subst, source, &trans, &line);
    });
    if found {
        asm.macros.insert(name, Rc::new(data));
    }
}

/// `.purgem`.
pub fn do_purge_macro(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let mut name = match get_name_arg(asm, pos, "macro name") {
        Some(n) => n,
        None => return,
    };
    if asm.macro_case {
        name.make_ascii_lowercase();
    }
    if asm.macros.remove(&name).is_none() {
        asm.print_error(stmt_place, &format!("Macro '{}' already doesn't exist", name));
    }
}

/// `.exitm`: abandon the current macro expansion.
pub fn do_exitm(asm: &mut Assembler, stmt_place: usize) {
    let has_macro = asm.filters.iter().any(|f| f.is_macro_subst());
    if !has_macro {
        asm.print_error(stmt_place, "'.exitm' is in not macro");
        return;
    }
    while let Some(filter) = asm.filters.pop() {
        if filter.is_macro_subst() {
            asm.macro_subst_level -= 1;
            break;
        }
    }
}

/// `.rept`.
pub fn do_repeat(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let repeats = match get_absolute_value_arg(asm, pos, true) {
        Some(Some(v)) => v,
        _ => return,
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    let (ok, _) = asm.push_clause(stmt_place, ClauseKind::Repeat, true);
    if !ok {
        return;
    }
    let source_pos = asm.get_source_pos(stmt_place);
    let mut data = RepeatData::new(source_pos, repeats);
    let found = collect_until_end(asm, ClauseKind::Repeat, |asm| {
        let common = asm.filters.last().expect("reading requires a filter").common();
        let macro_subst = common.macro_subst.clone();
        let source = common.source.clone();
        let trans = common.col_translations.clone();
        let line = asm.line.clone();
        data.add_line(macro_subst, source, &trans, &line);
    });
    if found && repeats != 0 {
        asm.push_repeat_filter(Rc::new(data));
    }
}

/// `.irp` / `.irpc`.
pub fn do_irp(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, per_char: bool) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let symbol = match extract_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => n,
        _ => {
            asm.print_error(*pos, "Expected argument name");
            return;
        }
    };
    let mut values: Vec<String> = Vec::new();
    loop {
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() {
            break;
        }
        if bytes[*pos] == b',' {
            *pos += 1;
            skip_spaces(bytes, pos);
        }
        if *pos >= bytes.len() {
            break;
        }
        let mut value = String::new();
        if !asm.parse_macro_arg_value(pos, &mut value) {
            return;
        }
        values.push(value);
    }
    let repeats = if per_char {
        values.first().map(|v| v.chars().count().max(1)).unwrap_or(1) as u64
    } else {
        values.len().max(1) as u64
    };
    let (ok, _) = asm.push_clause(stmt_place, ClauseKind::Repeat, true);
    if !ok {
        return;
    }
    let source_pos = asm.get_source_pos(stmt_place);
    let mut data = IrpData {
        repeat: RepeatData::new(source_pos, repeats),
        symbol,
        values,
        irpc: per_char,
    };
    let found = collect_until_end(asm, ClauseKind::Repeat, |asm| {
        let common = asm.filters.last().expect("reading requires a filter").common();
        let macro_subst = common.macro_subst.clone();
        let source = common.source.clone();
        let trans = common.col_translations.clone();
        let line = asm.line.clone();
        data.repeat.add_line(macro_subst, source, &trans, &line);
    });
    if found {
        asm.push_irp_filter(Rc::new(data));
    }
}

/// `.for sym = init, cond, next` and `.while cond`.
pub fn do_for(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, is_while: bool) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let mut iter_sym = None;
    if !is_while {
        skip_spaces(bytes, pos);
        let name_place = *pos;
        let name = match crate::parse_utils::extract_scoped_sym_name(bytes, pos, false) {
            Some(n) if !n.is_empty() => n,
            _ => {
                asm.print_error(*pos, "Expected iteration symbol");
                return;
            }
        };
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() || bytes[*pos] != b'=' {
            asm.print_error(*pos, "Expected '=' after iteration symbol");
            return;
        }
        *pos += 1;
        skip_spaces(bytes, pos);
        // initial value, evaluated now
        let init_place = *pos;
        let init_expr = match asm.parse_expr(pos, false, true) {
            Some(e) => e,
            None => return,
        };
        if asm.exprs[init_expr].ops.is_empty() {
            asm.print_error(init_place, "Expected expression");
            return;
        }
        let (status, value, section_id) = asm.evaluate_expr_id(init_expr);
        if status != crate::error::TryStatus::Success {
            return;
        }
        let (sym_id, inserted) =
            asm.insert_symbol_in_scope(&name, crate::symbol::Symbol::undefined());
        if !inserted && asm.symbols[sym_id].sym.once_defined && asm.symbols[sym_id].sym.is_defined()
        {
            asm.print_error(name_place, &format!("Symbol '{}' is already defined", name));
            return;
        }
        asm.set_symbol(sym_id, value, section_id);
        iter_sym = Some(sym_id);
        if !super::skip_required_comma(asm, pos) {
            return;
        }
    }
    // condition (re-evaluated each pass)
    skip_spaces(bytes, pos);
    let cond_place = *pos;
    let cond_expr = match asm.parse_expr(pos, true, false) {
        Some(e) => e,
        None => return,
    };
    if asm.exprs[cond_expr].ops.is_empty() {
        asm.print_error(cond_place, "Expected expression");
        return;
    }
    let next_expr = if !is_while {
        if !super::skip_required_comma(asm, pos) {
            return;
        }
        skip_spaces(bytes, pos);
        let next_place = *pos;
        let e = match asm.parse_expr(pos, true, false) {
            Some(e) => e,
            None => return,
        };
        if asm.exprs[e].ops.is_empty() {
            asm.print_error(next_place, "Expected expression");
            return;
        }
        Some(e)
    } else {
        None
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    let (ok, _) = asm.push_clause(stmt_place, ClauseKind::Repeat, true);
    if !ok {
        return;
    }
    let source_pos = asm.get_source_pos(stmt_place);
    let mut data =
        ForData { repeat: RepeatData::new(source_pos, 0), iter_sym, cond_expr, next_expr };
    let found = collect_until_end(asm, ClauseKind::Repeat, |asm| {
        let common = asm.filters.last().expect("reading requires a filter").common();
        let macro_subst = common.macro_subst.clone();
        let source = common.source.clone();
        let trans = common.col_translations.clone();
        let line = asm.line.clone();
        data.repeat.add_line(macro_subst, source, &trans, &line);
    });
    if !found {
        return;
    }
    // run only if the condition holds at entry
    let evaluable = asm.create_expr_to_evaluate(cond_expr);
    let run = match evaluable {
        Some(id) => {
            let (status, value, section_id) = asm.evaluate_expr_id(id);
            if status != crate::error::TryStatus::Success {
                false
            } else if section_id != ABS_SECTION {
                let p = asm.exprs[cond_expr].source_pos.clone();
                asm.print_error_at(&p, "Value of conditional expression is not absolute");
                false
            } else {
                value != 0
            }
        }
        None => false,
    };
    if run {
        asm.push_for_filter(Rc::new(data));
    }
}

/// `.scope [name]`.
pub fn open_scope(asm: &mut Assembler, _stmt_place: usize, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let name = if *pos < bytes.len() {
        match extract_sym_name(bytes, pos, false) {
            Some(n) => n,
            None => String::new(),
        }
    } else {
        String::new()
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    asm.push_scope(&name);
}

/// `.ends` / `.endscope`.
pub fn close_scope(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    asm.pop_scope(stmt_place);
}
