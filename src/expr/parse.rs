//! Expression parsing: shunting-yard over the infix source, the
//! literal fast path, and `.eqv` snapshot construction.

use std::collections::HashMap;

use super::{ExprArg, ExprOp, ExprTarget, Expression};
use crate::asm::{Assembler, ParseState};
use crate::filter::LineCol;
use crate::parse_utils::skip_spaces;
use crate::symbol::{Symbol, SymbolId};

#[derive(Clone, Copy)]
struct OpEntry {
    op: ExprOp,
    priority: u32,
    line_col_pos: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Expected {
    First,
    Op,
    Arg,
}

impl Assembler {
    /// Parse an expression starting at `pos`, stopping at the first
    /// token that cannot continue it. Returns the arena id, or `None`
    /// after reported errors.
    ///
    /// `make_base` builds an `.eqv` base expression: symbols are stored
    /// unresolved even when they currently have values.
    /// `dont_resolve_later` makes unresolved symbols an immediate error.
    pub fn parse_expr(
        &mut self,
        pos: &mut usize,
        make_base: bool,
        dont_resolve_later: bool,
    ) -> Option<super::ExprId> {
        let line = self.line.clone();
        let bytes = line.as_bytes();

        let mut stack: Vec<OpEntry> = Vec::new();
        let mut ops: Vec<ExprOp> = Vec::new();
        let mut args: Vec<ExprArg> = Vec::new();
        let mut message_positions: Vec<LineCol> = Vec::new();
        let mut out_msg_positions: Vec<LineCol> = Vec::new();
        let mut snapshot_map: HashMap<String, SymbolId> = HashMap::new();

        let mut parenthesis_count: usize = 0;
        let mut sym_occurs_num: usize = 0;
        let mut good = true;
        let mut relative_sym_occurs = false;
        let mut expected = Expected::First;
        let start_pos = self.get_source_pos(*pos);

        // deferred occurrence registrations (arg slot, op slot, symbol)
        let mut sym_slots: Vec<(usize, usize, SymbolId)> = Vec::new();

        while *pos < bytes.len() {
            skip_spaces(bytes, pos);
            if *pos >= bytes.len() {
                break;
            }
            let before_token = *pos;
            let mut line_col: Option<LineCol> = None;
            let mut op: Option<ExprOp> = None;
            let mut expected_primary_expr = false;
            let mut do_exit = false;

            match bytes[*pos] {
                b'(' => {
                    if expected == Expected::Op {
                        self.print_error(*pos, "Expected operator");
                        good = false;
                    } else {
                        expected = Expected::First;
                        parenthesis_count += 1;
                    }
                    *pos += 1;
                }
                b')' => {
                    if expected != Expected::Op {
                        self.print_error(*pos, "Expected operator or value or symbol");
                        good = false;
                        *pos += 1;
                    } else if parenthesis_count == 0 {
                        do_exit = true;
                    } else {
                        parenthesis_count -= 1;
                        *pos += 1;
                    }
                }
                b'+' => {
                    op = Some(if expected == Expected::Op { ExprOp::Addition } else { ExprOp::Plus });
                    *pos += 1;
                }
                b'-' => {
                    op = Some(if expected == Expected::Op { ExprOp::Subtract } else { ExprOp::Negate });
                    *pos += 1;
                }
                b'*' => {
                    op = Some(ExprOp::Multiply);
                    *pos += 1;
                }
                b'/' => {
                    line_col = Some(self.translate_pos(*pos));
                    if bytes.get(*pos + 1) == Some(&b'/') {
                        op = Some(ExprOp::Division);
                        *pos += 1;
                    } else {
                        // GNU as style signed division
                        op = Some(ExprOp::SignedDivision);
                    }
                    *pos += 1;
                }
                b'%' => {
                    line_col = Some(self.translate_pos(*pos));
                    if bytes.get(*pos + 1) == Some(&b'%') {
                        op = Some(ExprOp::Modulo);
                        *pos += 1;
                    } else {
                        op = Some(ExprOp::SignedModulo);
                    }
                    *pos += 1;
                }
                b'&' => {
                    if bytes.get(*pos + 1) == Some(&b'&') {
                        op = Some(ExprOp::LogicalAnd);
                        *pos += 1;
                    } else {
                        op = Some(ExprOp::BitAnd);
                    }
                    *pos += 1;
                }
                b'|' => {
                    if bytes.get(*pos + 1) == Some(&b'|') {
                        op = Some(ExprOp::LogicalOr);
                        *pos += 1;
                    } else {
                        op = Some(ExprOp::BitOr);
                    }
                    *pos += 1;
                }
                b'!' => {
                    if expected == Expected::Op {
                        if bytes.get(*pos + 1) == Some(&b'=') {
                            op = Some(ExprOp::NotEqual);
                            *pos += 1;
                        } else {
                            op = Some(ExprOp::BitOrNot);
                        }
                    } else {
                        op = Some(ExprOp::LogicalNot);
                    }
                    *pos += 1;
                }
                b'~' => {
                    if expected != Expected::Op {
                        op = Some(ExprOp::BitNot);
                    } else {
                        self.print_error(
                            *pos,
                            "Expected non-unary operator, '(', or end of expression",
                        );
                        good = false;
                    }
                    *pos += 1;
                }
                b'^' => {
                    op = Some(ExprOp::BitXor);
                    *pos += 1;
                }
                b'<' => {
                    match bytes.get(*pos + 1) {
                        Some(b'<') => {
                            line_col = Some(self.translate_pos(*pos));
                            op = Some(ExprOp::ShiftLeft);
                            *pos += 1;
                        }
                        Some(b'>') => {
                            op = Some(ExprOp::NotEqual);
                            *pos += 1;
                        }
                        Some(b'=') => {
                            if bytes.get(*pos + 2) == Some(&b'@') {
                                op = Some(ExprOp::BelowEq);
                                *pos += 1;
                            } else {
                                op = Some(ExprOp::LessEq);
                            }
                            *pos += 1;
                        }
                        Some(b'@') => {
                            op = Some(ExprOp::Below);
                            *pos += 1;
                        }
                        _ => op = Some(ExprOp::Less),
                    }
                    *pos += 1;
                }
                b'>' => {
                    match bytes.get(*pos + 1) {
                        Some(b'>') => {
                            line_col = Some(self.translate_pos(*pos));
                            if bytes.get(*pos + 2) == Some(&b'>') {
                                op = Some(ExprOp::SignedShiftRight);
                                *pos += 1;
                            } else {
                                op = Some(ExprOp::ShiftRight);
                            }
                            *pos += 1;
                        }
                        Some(b'=') => {
                            if bytes.get(*pos + 2) == Some(&b'@') {
                                op = Some(ExprOp::AboveEq);
                                *pos += 1;
                            } else {
                                op = Some(ExprOp::GreaterEq);
                            }
                            *pos += 1;
                        }
                        Some(b'@') => {
                            op = Some(ExprOp::Above);
                            *pos += 1;
                        }
                        _ => op = Some(ExprOp::Greater),
                    }
                    *pos += 1;
                }
                b'=' => {
                    if bytes.get(*pos + 1) == Some(&b'=') {
                        op = Some(ExprOp::Equal);
                        *pos += 1;
                    } else {
                        expected_primary_expr = true;
                    }
                    *pos += 1;
                }
                b'?' => {
                    line_col = Some(self.translate_pos(*pos));
                    op = Some(ExprOp::ChoiceStart);
                    *pos += 1;
                }
                b':' if bytes.get(*pos + 1) != Some(&b':') => {
                    op = Some(ExprOp::Choice);
                    *pos += 1;
                }
                _ => {
                    // symbol or literal
                    if expected != Expected::Op {
                        let old_expected = expected;
                        expected = Expected::Op;
                        let mut sym_pos = *pos;
                        let (parse_state, sym_entry) = if dont_resolve_later {
                            // forward references are not allowed here
                            let probe = self.parse_symbol(&mut sym_pos, true);
                            match probe {
                                (ParseState::Missing, _) => {
                                    // re-scan to emit the proper error if
                                    // it still looks like a symbol
                                    let mut p2 = *pos;
                                    match crate::parse_utils::extract_scoped_sym_name(
                                        bytes, &mut p2, true,
                                    ) {
                                        Some(name) if !name.is_empty() => {
                                            self.print_error(
                                                *pos,
                                                &format!(
                                                    "Expression have unresolved symbol '{}'",
                                                    name
                                                ),
                                            );
                                            good = false;
                                            sym_pos = p2;
                                            (ParseState::Failed, None)
                                        }
                                        _ => (ParseState::Missing, None),
                                    }
                                }
                                other => other,
                            }
                        } else {
                            self.parse_symbol(&mut sym_pos, false)
                        };
                        if let Some(id) = sym_entry {
                            if self.symbols[id].sym.reg_range {
                                self.print_error(*pos, "Expression have register symbol");
                                good = false;
                                *pos = sym_pos;
                                continue;
                            }
                        }
                        if parse_state == ParseState::Failed {
                            good = false;
                        }
                        if parse_state != ParseState::Missing {
                            if let Some(id) = sym_entry {
                                if dont_resolve_later && !self.symbols[id].sym.has_value {
                                    let name = self.symbols[id].name.clone();
                                    self.print_error(
                                        before_token,
                                        &format!("Expression have unresolved symbol '{}'", name),
                                    );
                                    good = false;
                                    *pos = sym_pos;
                                    continue;
                                }
                            }
                            if let Some(mut id) = sym_entry {
                                if self.symbols[id].sym.base && !make_base {
                                    // base symbol: snapshot before use
                                    match self.make_symbol_snapshot_in(
                                        id,
                                        &mut snapshot_map,
                                        Some(&start_pos),
                                    ) {
                                        Some(snap) => id = snap,
                                        None => good = false,
                                    }
                                }
                                let sym = &self.symbols[id].sym;
                                if sym.has_value && !make_base {
                                    // place the current value directly
                                    if !self.is_absolute_symbol(sym) {
                                        relative_sym_occurs = true;
                                        args.push(ExprArg::Rel {
                                            value: sym.value,
                                            section: sym.section_id,
                                        });
                                    } else {
                                        args.push(ExprArg::Value(sym.value));
                                    }
                                    ops.push(ExprOp::ArgValue);
                                } else {
                                    sym_occurs_num += 1;
                                    sym_slots.push((args.len(), ops.len(), id));
                                    args.push(ExprArg::Symbol(id));
                                    ops.push(ExprOp::ArgSymbol);
                                }
                            } else if parse_state == ParseState::Failed {
                                // error already printed; continue scan
                            }
                            *pos = sym_pos;
                        } else if parenthesis_count != 0
                            || (bytes[*pos].is_ascii_digit() || bytes[*pos] == b'\'')
                        {
                            let old = *pos;
                            match self.parse_literal(pos) {
                                Some(value) => {
                                    args.push(ExprArg::Value(value));
                                    ops.push(ExprOp::ArgValue);
                                }
                                None => {
                                    args.push(ExprArg::Value(0));
                                    ops.push(ExprOp::ArgValue);
                                    if *pos < bytes.len() && old == *pos {
                                        *pos += 1;
                                    }
                                    good = false;
                                }
                            }
                        } else {
                            expected = old_expected;
                            do_exit = true;
                        }
                    } else if parenthesis_count == 0 {
                        do_exit = true;
                    } else {
                        *pos += 1;
                        self.print_error(*pos, "Garbages at end of expression");
                        good = false;
                    }
                }
            }

            let mut op = op;
            if let Some(o) = op {
                if !o.is_unary() && expected != Expected::Op {
                    expected_primary_expr = true;
                    op = None;
                }
            }
            if expected_primary_expr {
                self.print_error(before_token, "Expected primary expression before operator");
                good = false;
                continue;
            }
            if let Some(o) = op {
                if !o.is_unary() {
                    expected = if expected == Expected::Op { Expected::Arg } else { Expected::Op };
                }
            }

            let line_col_pos = match line_col {
                Some(lc) => {
                    message_positions.push(lc);
                    Some(message_positions.len() - 1)
                }
                None => None,
            };

            if let Some(o) = op {
                let unary = o.is_unary();
                let priority = (parenthesis_count as u32 * 8) + o.priority();
                if o == ExprOp::Choice {
                    // second part of ternary: pop to the '?' marker
                    let mut found = false;
                    while let Some(&entry) = stack.last() {
                        if priority > entry.priority
                            || (priority == entry.priority && entry.op == ExprOp::ChoiceStart)
                        {
                            found = true;
                            break;
                        }
                        if entry.op != ExprOp::Plus {
                            ops.push(entry.op);
                        }
                        if entry.line_col_pos != usize::MAX && entry.op != ExprOp::ChoiceStart {
                            out_msg_positions.push(message_positions[entry.line_col_pos]);
                        }
                        stack.pop();
                    }
                    if stack.is_empty() {
                        *pos -= 1; // back to ':'
                        expected = Expected::Op;
                        do_exit = true;
                    } else if !found
                        || stack.last().expect("checked non-empty").op != ExprOp::ChoiceStart
                        || stack.last().expect("checked non-empty").priority != priority
                    {
                        self.print_error(before_token, "Missing '?' before ':'");
                        good = false;
                        continue;
                    } else {
                        let entry = stack.last_mut().expect("checked non-empty");
                        entry.op = ExprOp::Choice;
                        entry.line_col_pos = usize::MAX;
                    }
                } else {
                    while let Some(&entry) = stack.last() {
                        let bump = u32::from(o == ExprOp::ChoiceStart) + u32::from(unary);
                        if priority + bump > entry.priority {
                            break;
                        }
                        if entry.op == ExprOp::ChoiceStart {
                            // unfinished choice
                            stack.pop();
                            let lc = message_positions[entry.line_col_pos];
                            let p = crate::source::SourcePos {
                                line_no: lc.line_no,
                                col_no: lc.col_no,
                                ..start_pos.clone()
                            };
                            self.print_error_at(&p, "Missing ':' for '?'");
                            good = false;
                            break;
                        }
                        if entry.op != ExprOp::Plus {
                            ops.push(entry.op);
                        }
                        if entry.line_col_pos != usize::MAX {
                            out_msg_positions.push(message_positions[entry.line_col_pos]);
                        }
                        stack.pop();
                    }
                    stack.push(OpEntry {
                        op: o,
                        priority,
                        line_col_pos: line_col_pos.unwrap_or(usize::MAX),
                    });
                }
            }
            if do_exit {
                break;
            }
        }
        if parenthesis_count != 0 {
            self.print_error(*pos, "Missing ')'");
            good = false;
        }
        if expected != Expected::Op {
            if !ops.is_empty() || !stack.is_empty() {
                self.print_error(*pos, "Unterminated expression");
                good = false;
            }
        } else {
            while let Some(entry) = stack.pop() {
                if entry.op == ExprOp::ChoiceStart {
                    let lc = message_positions[entry.line_col_pos];
                    let p = crate::source::SourcePos {
                        line_no: lc.line_no,
                        col_no: lc.col_no,
                        ..start_pos.clone()
                    };
                    self.print_error_at(&p, "Missing ':' for '?'");
                    good = false;
                    break;
                }
                if entry.op != ExprOp::Plus {
                    ops.push(entry.op);
                }
                if entry.line_col_pos != usize::MAX {
                    out_msg_positions.push(message_positions[entry.line_col_pos]);
                }
            }
        }

        if good {
            let mut expr = Expression::new(start_pos);
            expr.ops = ops;
            expr.args = args;
            expr.message_positions = out_msg_positions;
            expr.sym_occurs_num = sym_occurs_num;
            expr.relative_sym_occurs = relative_sym_occurs;
            expr.base_expr = make_base;
            let expr_id = self.add_expr(expr);
            if !make_base {
                for (arg_index, op_index, sym_id) in sym_slots {
                    self.symbols[sym_id].sym.add_occurrence(expr_id, arg_index, op_index);
                }
            }
            for (_, snap_id) in snapshot_map {
                if !self.symbols[snap_id].sym.has_value {
                    self.symbol_snapshots.insert(snap_id);
                }
            }
            Some(expr_id)
        } else {
            None
        }
    }

    /// Fast path for pure-literal `+`/`-` chains.
    pub fn fast_expr_evaluate(&mut self, pos: &mut usize) -> Option<u64> {
        let line = self.line.clone();
        let bytes = line.as_bytes();
        let mut p = *pos;
        skip_spaces(bytes, &mut p);
        let mut value: u64 = 0;
        let mut first = true;
        let mut negate = false;
        loop {
            skip_spaces(bytes, &mut p);
            if p < bytes.len() && bytes[p] == b'-' && !first {
                negate = true;
                p += 1;
                skip_spaces(bytes, &mut p);
            } else if p < bytes.len() && bytes[p] == b'+' && !first {
                p += 1;
                skip_spaces(bytes, &mut p);
            } else if !first {
                break;
            }
            if p >= bytes.len() || !(bytes[p].is_ascii_digit() || bytes[p] == b'\'') {
                return None;
            }
            let term = self.parse_literal_no_error(&mut p)?;
            value =
                if negate { value.wrapping_sub(term) } else { value.wrapping_add(term) };
            negate = false;
            first = false;
            skip_spaces(bytes, &mut p);
            if p >= bytes.len() || (bytes[p] != b'+' && bytes[p] != b'-') {
                break;
            }
        }
        // must end at a delimiter to count as a plain chain
        skip_spaces(bytes, &mut p);
        if p < bytes.len() && bytes[p] != b',' && bytes[p] != b';' {
            return None;
        }
        *pos = p;
        Some(value)
    }

    /// Snapshot a base (`.eqv`) symbol and everything it transitively
    /// references, returning the snapshot symbol.
    pub fn make_symbol_snapshot(
        &mut self,
        sym_id: SymbolId,
        parent_pos: Option<&crate::source::SourcePos>,
    ) -> Option<SymbolId> {
        let mut map = HashMap::new();
        let out = self.make_symbol_snapshot_in(sym_id, &mut map, parent_pos);
        for (_, snap) in map {
            if Some(snap) == out || !self.symbols[snap].sym.has_value {
                self.symbol_snapshots.insert(snap);
            }
        }
        out
    }

    /// Snapshot construction with an explicit per-parse dedup map.
    pub(crate) fn make_symbol_snapshot_in(
        &mut self,
        sym_id: SymbolId,
        snapshot_map: &mut HashMap<String, SymbolId>,
        parent_pos: Option<&crate::source::SourcePos>,
    ) -> Option<SymbolId> {
        let mut good = true;
        // (snapshot symbol, op index, arg index)
        let mut stack: Vec<(SymbolId, usize, usize)> = Vec::new();
        match self.create_snapshot_entry(sym_id, snapshot_map, parent_pos) {
            SnapshotEntry::Existing(id) => {
                self.symbols[id].sym.ref_count += 1;
                return Some(id);
            }
            SnapshotEntry::New(id) => stack.push((id, 0, 0)),
        }
        let mut out = None;
        'outer: while let Some(&(entry_id, op_start, arg_start)) = stack.last() {
            let expr_id =
                self.symbols[entry_id].sym.expression.expect("snapshot symbols carry expressions");
            let ops_len = self.exprs[expr_id].ops.len();
            let mut op_index = op_start;
            let mut arg_index = arg_start;
            while op_index < ops_len {
                let op = self.exprs[expr_id].ops[op_index];
                if op == ExprOp::ArgSymbol {
                    let mut next_sym = match self.exprs[expr_id].args[arg_index] {
                        ExprArg::Symbol(s) => s,
                        _ => unreachable!("symbol op with non-symbol arg"),
                    };
                    if self.symbols[next_sym].sym.base {
                        let pos = self.exprs[expr_id].source_pos.clone();
                        match self.create_snapshot_entry(next_sym, snapshot_map, Some(&pos)) {
                            SnapshotEntry::Existing(id) => {
                                next_sym = id;
                                self.exprs[expr_id].args[arg_index] = ExprArg::Symbol(id);
                                self.symbols[id].sym.ref_count += 1;
                            }
                            SnapshotEntry::New(id) => {
                                // remember where to resume, then recurse
                                let top = stack.last_mut().expect("walking stack entry");
                                top.1 = op_index;
                                top.2 = arg_index;
                                stack.push((id, 0, 0));
                                continue 'outer;
                            }
                        }
                    }
                    if self.symbols[next_sym].sym.has_value {
                        if self.symbols[next_sym].sym.reg_range {
                            let pos = self.exprs[expr_id].source_pos.clone();
                            self.print_error_at(&pos, "Expression have register symbol");
                            good = false;
                        }
                        let value = self.symbols[next_sym].sym.value;
                        let absolute = self.is_absolute_symbol(&self.symbols[next_sym].sym);
                        let section_id = self.symbols[next_sym].sym.section_id;
                        let expr = &mut self.exprs[expr_id];
                        expr.ops[op_index] = ExprOp::ArgValue;
                        if absolute {
                            expr.args[arg_index] = ExprArg::Value(value);
                        } else {
                            expr.relative_sym_occurs = true;
                            expr.args[arg_index] = ExprArg::Rel { value, section: section_id };
                        }
                    } else {
                        self.exprs[expr_id].args[arg_index] = ExprArg::Symbol(next_sym);
                        self.symbols[next_sym].sym.add_occurrence(expr_id, arg_index, op_index);
                        self.exprs[expr_id].sym_occurs_num += 1;
                    }
                    arg_index += 1;
                } else if op == ExprOp::ArgValue {
                    arg_index += 1;
                }
                op_index += 1;
            }
            // finished walking this snapshot's expression
            let (finished_id, _, _) = stack.pop().expect("processing stack entry");
            if self.exprs[expr_id].sym_occurs_num == 0 {
                let (status, value, section_id) = self.evaluate_expr_id(expr_id);
                if status != crate::error::TryStatus::Success {
                    good = false;
                }
                let sym = &mut self.symbols[finished_id].sym;
                sym.value = value;
                sym.section_id = section_id;
                sym.has_value = true;
                sym.expression = None;
            }
            let sym = &mut self.symbols[finished_id].sym;
            sym.base = false;
            sym.snapshot = true;
            match stack.last() {
                Some(&(parent_id, parent_op, parent_arg)) => {
                    let parent_expr = self.symbols[parent_id]
                        .sym
                        .expression
                        .expect("snapshot symbols carry expressions");
                    self.exprs[parent_expr].args[parent_arg] = ExprArg::Symbol(finished_id);
                    self.exprs[parent_expr].ops[parent_op] = ExprOp::ArgSymbol;
                }
                None => {
                    out = Some(finished_id);
                    break;
                }
            }
        }
        if good {
            out
        } else {
            None
        }
    }

    fn create_snapshot_entry(
        &mut self,
        sym_id: SymbolId,
        snapshot_map: &mut HashMap<String, SymbolId>,
        parent_pos: Option<&crate::source::SourcePos>,
    ) -> SnapshotEntry {
        let name = self.symbols[sym_id].name.clone();
        if let Some(&existing) = snapshot_map.get(&name) {
            return SnapshotEntry::Existing(existing);
        }
        // deep-copy the base expression
        let base_expr = self.symbols[sym_id].sym.expression.expect("base symbols carry expressions");
        let mut expr = self.exprs[base_expr].clone();
        expr.sym_occurs_num = 0;
        expr.relative_sym_occurs = false;
        expr.base_expr = false;
        expr.source_pos.expr_source_pos = parent_pos.map(|p| std::rc::Rc::new(p.clone()));
        let expr_id = self.add_expr(expr);
        let mut sym = Symbol::with_expression(expr_id, false);
        sym.ref_count = 1;
        let snap_id = self.put_symbol_entry(&name, sym);
        self.exprs[expr_id].target = ExprTarget::Symbol(snap_id);
        snapshot_map.insert(name, snap_id);
        SnapshotEntry::New(snap_id)
    }

    /// Copy `expr_id` into an immediately evaluable expression,
    /// substituting current symbol values ( `.for` condition/step).
    pub fn create_expr_to_evaluate(&mut self, expr_id: super::ExprId) -> Option<super::ExprId> {
        let mut snapshot_map = HashMap::new();
        let mut expr = self.exprs[expr_id].clone();
        let mut good = true;
        let mut arg_index = 0usize;
        for op_index in 0..expr.ops.len() {
            let op = expr.ops[op_index];
            if !op.is_arg() {
                continue;
            }
            if op == ExprOp::ArgSymbol {
                let mut sym_id = match expr.args[arg_index] {
                    ExprArg::Symbol(s) => s,
                    _ => unreachable!("symbol op with non-symbol arg"),
                };
                if self.symbols[sym_id].sym.base {
                    let pos = expr.source_pos.clone();
                    match self.make_symbol_snapshot_in(sym_id, &mut snapshot_map, Some(&pos)) {
                        Some(s) => sym_id = s,
                        None => good = false,
                    }
                }
                if !self.symbols[sym_id].sym.has_value {
                    let pos = expr.source_pos.clone();
                    let name = self.symbols[sym_id].name.clone();
                    self.print_error_at(
                        &pos,
                        &format!("Expression have unresolved symbol '{}'", name),
                    );
                    good = false;
                } else {
                    let sym = &self.symbols[sym_id].sym;
                    let absolute = self.is_absolute_symbol(sym);
                    if absolute {
                        expr.args[arg_index] = ExprArg::Value(sym.value);
                    } else {
                        expr.relative_sym_occurs = true;
                        expr.args[arg_index] =
                            ExprArg::Rel { value: sym.value, section: sym.section_id };
                    }
                    expr.ops[op_index] = ExprOp::ArgValue;
                    expr.sym_occurs_num -= 1;
                }
            }
            arg_index += 1;
        }
        for (_, snap) in snapshot_map {
            if !self.symbols[snap].sym.has_value {
                self.symbol_snapshots.insert(snap);
            }
        }
        if good {
            Some(self.add_expr(expr))
        } else {
            None
        }
    }
}

enum SnapshotEntry {
    Existing(SymbolId),
    New(SymbolId),
}
