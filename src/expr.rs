//! Expression engine: stored operator/argument arrays and the
//! stack-machine evaluator with mixed absolute/relative values.
//!
//! Parsing lives in [`parse`] as methods on the assembler (it needs
//! symbol scopes); evaluation here is a pure function over the stored
//! arrays plus a read-only view of the section table, with diagnostics
//! collected into a list the caller prints.

pub mod parse;

use crate::error::TryStatus;
use crate::filter::LineCol;
use crate::section::Section;
use crate::source::SourcePos;
use crate::symbol::SymbolId;
use gcn_types::{SectionId, Word, ABS_SECTION};

/// Index of an expression in the assembler's expression arena.
pub type ExprId = usize;

/// Operator or argument marker in the stored operator array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExprOp {
    /// Literal argument slot.
    ArgValue,
    /// Symbol argument slot.
    ArgSymbol,
    /// Unary minus.
    Negate,
    /// Unary `~`.
    BitNot,
    /// Unary `!`.
    LogicalNot,
    /// Unary plus (parsed, never stored).
    Plus,
    /// Binary `+`.
    Addition,
    /// Binary `-`.
    Subtract,
    /// `*`.
    Multiply,
    /// `//` (unsigned).
    Division,
    /// `/` (signed, GNU-as dialect).
    SignedDivision,
    /// `%%` (unsigned).
    Modulo,
    /// `%` (signed).
    SignedModulo,
    /// `&`.
    BitAnd,
    /// `|`.
    BitOr,
    /// `^`.
    BitXor,
    /// `!` as binary or-not.
    BitOrNot,
    /// `<<`.
    ShiftLeft,
    /// `>>`.
    ShiftRight,
    /// `>>>`.
    SignedShiftRight,
    /// `&&`.
    LogicalAnd,
    /// `||`.
    LogicalOr,
    /// `==`.
    Equal,
    /// `!=` / `<>`.
    NotEqual,
    /// `<` (signed).
    Less,
    /// `<=` (signed).
    LessEq,
    /// `>` (signed).
    Greater,
    /// `>=` (signed).
    GreaterEq,
    /// `<@` (unsigned).
    Below,
    /// `<=@` (unsigned).
    BelowEq,
    /// `>@` (unsigned).
    Above,
    /// `>=@` (unsigned).
    AboveEq,
    /// Ternary `?:` (stored form).
    Choice,
    /// `?` marker during parsing.
    ChoiceStart,
}

impl ExprOp {
    /// Parser priority; higher binds tighter.
    pub fn priority(self) -> u32 {
        use ExprOp::*;
        match self {
            ArgValue | ArgSymbol => 7,
            Negate | BitNot | LogicalNot | Plus => 6,
            Addition | Subtract => 3,
            Multiply | Division | SignedDivision | Modulo | SignedModulo | ShiftLeft
            | ShiftRight | SignedShiftRight => 5,
            BitAnd | BitOr | BitXor | BitOrNot => 4,
            LogicalAnd | LogicalOr => 1,
            Equal | NotEqual | Less | LessEq | Greater | GreaterEq | Below | BelowEq | Above
            | AboveEq => 2,
            Choice | ChoiceStart => 0,
        }
    }

    /// Unary operators.
    pub fn is_unary(self) -> bool {
        matches!(self, ExprOp::Negate | ExprOp::BitNot | ExprOp::LogicalNot | ExprOp::Plus)
    }

    /// Binary operators.
    pub fn is_binary(self) -> bool {
        use ExprOp::*;
        matches!(
            self,
            Addition
                | Subtract
                | Multiply
                | Division
                | SignedDivision
                | Modulo
                | SignedModulo
                | BitAnd
                | BitOr
                | BitXor
                | BitOrNot
                | ShiftLeft
                | ShiftRight
                | SignedShiftRight
                | LogicalAnd
                | LogicalOr
                | Equal
                | NotEqual
                | Less
                | LessEq
                | Greater
                | GreaterEq
                | Below
                | BelowEq
                | Above
                | AboveEq
        )
    }

    /// Argument markers.
    pub fn is_arg(self) -> bool {
        matches!(self, ExprOp::ArgValue | ExprOp::ArgSymbol)
    }

    /// Operators that carry a source position for diagnostics
    /// (divisions, modulos, shifts).
    pub fn with_message(self) -> bool {
        use ExprOp::*;
        matches!(
            self,
            Division
                | SignedDivision
                | Modulo
                | SignedModulo
                | ShiftLeft
                | ShiftRight
                | SignedShiftRight
        )
    }
}

/// One argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprArg {
    /// Absolute literal.
    Value(Word),
    /// Resolved section-relative value.
    Rel {
        /// Offset within the section.
        value: Word,
        /// Owning section.
        section: SectionId,
    },
    /// Unresolved symbol reference.
    Symbol(SymbolId),
}

/// Where an expression's final value lands once all symbols resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprTarget {
    /// No target; driver evaluates and drops.
    None,
    /// Assign to a symbol.
    Symbol(SymbolId),
    /// Write `size` bytes little-endian into a section.
    Data {
        /// Target section.
        section: SectionId,
        /// Byte offset of the slot.
        offset: usize,
        /// 1, 2, 4 or 8.
        size: u8,
    },
    /// Patch a branch immediate of an encoded instruction.
    Branch {
        /// Target section.
        section: SectionId,
        /// Byte offset of the instruction word.
        offset: usize,
    },
    /// Fill in a recorded code-flow entry's target offset.
    CodeFlow {
        /// Target section.
        section: SectionId,
        /// Index into the section's code-flow list.
        index: usize,
    },
}

/// One diagnostic produced during evaluation.
#[derive(Debug, Clone)]
pub struct EvalDiag {
    /// Position to report.
    pub pos: SourcePos,
    /// Message text.
    pub message: String,
    /// Error (true) or warning.
    pub error: bool,
}

/// Read-only context evaluation runs against.
pub struct EvalContext<'a> {
    /// Section table (for relocation spaces).
    pub sections: &'a [Section],
    /// Per-relocation-space section lists, address-sorted.
    pub rel_spaces_sections: &'a [Vec<SectionId>],
    /// Format handler supports deferred section differences.
    pub with_section_diffs: bool,
    /// Section differences have been laid out.
    pub sect_diffs_prepared: bool,
}

/// A parsed expression.
#[derive(Debug, Clone)]
pub struct Expression {
    /// Position of the whole expression.
    pub source_pos: SourcePos,
    /// Operators in evaluation order.
    pub ops: Vec<ExprOp>,
    /// Argument slots, in `ArgValue`/`ArgSymbol` order.
    pub args: Vec<ExprArg>,
    /// Positions of message-carrying operators, in order.
    pub message_positions: Vec<LineCol>,
    /// Count of still-unresolved symbol slots.
    pub sym_occurs_num: usize,
    /// Any argument is section-relative.
    pub relative_sym_occurs: bool,
    /// This is an `.eqv` base expression (snapshot source).
    pub base_expr: bool,
    /// Target of the final value.
    pub target: ExprTarget,
}

#[derive(Clone)]
struct RelMultiply {
    multiply: Word,
    section_id: SectionId,
}

#[derive(Clone)]
struct RelValue {
    value: Word,
    relatives: Vec<RelMultiply>,
}

impl RelValue {
    fn abs(value: Word) -> Self {
        RelValue { value, relatives: Vec::new() }
    }

    fn rel(value: Word, section_id: SectionId) -> Self {
        RelValue { value, relatives: vec![RelMultiply { multiply: 1, section_id }] }
    }
}

impl Expression {
    /// New empty expression at `source_pos`.
    pub fn new(source_pos: SourcePos) -> Self {
        Expression {
            source_pos,
            ops: Vec::new(),
            args: Vec::new(),
            message_positions: Vec::new(),
            sym_occurs_num: 0,
            relative_sym_occurs: false,
            base_expr: false,
            target: ExprTarget::None,
        }
    }

    /// Position of the `index`-th message-carrying operator, with the
    /// expression's own position as fallback.
    pub fn message_pos(&self, index: usize) -> SourcePos {
        match self.message_positions.get(index) {
            Some(lc) => SourcePos {
                line_no: lc.line_no,
                col_no: lc.col_no,
                ..self.source_pos.clone()
            },
            None => self.source_pos.clone(),
        }
    }

    /// Substitute the value of an occurrence slot and decrement the
    /// pending-symbol count. Returns the new count.
    pub fn substitute_occurrence(
        &mut self,
        arg_index: usize,
        op_index: usize,
        value: Word,
        section_id: SectionId,
    ) -> usize {
        self.ops[op_index] = ExprOp::ArgValue;
        if section_id == ABS_SECTION {
            self.args[arg_index] = ExprArg::Value(value);
        } else {
            self.args[arg_index] = ExprArg::Rel { value, section: section_id };
            self.relative_sym_occurs = true;
        }
        self.sym_occurs_num -= 1;
        self.sym_occurs_num
    }

    /// Evaluate the whole expression.
    pub fn try_evaluate(&self, ctx: &EvalContext, diags: &mut Vec<EvalDiag>) -> (TryStatus, Word, SectionId) {
        self.try_evaluate_part(ctx, 0, self.ops.len(), diags)
    }

    /// Evaluate operators `[op_start, op_end)` — used to split `?:`
    /// alternatives and for partial evaluation in the parser tests.
    pub fn try_evaluate_part(
        &self,
        ctx: &EvalContext,
        op_start: usize,
        op_end: usize,
        diags: &mut Vec<EvalDiag>,
    ) -> (TryStatus, Word, SectionId) {
        assert!(self.sym_occurs_num == 0, "expression still has unresolved symbols");
        if !self.relative_sym_occurs {
            self.evaluate_absolute(ctx, op_start, op_end, diags)
        } else {
            self.evaluate_relative(ctx, op_start, op_end, diags)
        }
    }

    fn skip_to(&self, op_start: usize) -> (usize, usize) {
        let mut arg_pos = 0;
        let mut msg_pos = 0;
        for &op in &self.ops[..op_start] {
            if op.is_arg() {
                arg_pos += 1;
            }
            if op.with_message() {
                msg_pos += 1;
            }
        }
        (arg_pos, msg_pos)
    }

    fn arg_value(&self, arg_pos: usize) -> RelValue {
        match self.args[arg_pos] {
            ExprArg::Value(v) => RelValue::abs(v),
            ExprArg::Rel { value, section } => RelValue::rel(value, section),
            ExprArg::Symbol(_) => unreachable!("unresolved symbol in evaluation"),
        }
    }

    fn evaluate_absolute(
        &self,
        _ctx: &EvalContext,
        op_start: usize,
        op_end: usize,
        diags: &mut Vec<EvalDiag>,
    ) -> (TryStatus, Word, SectionId) {
        let mut failed = false;
        let (mut arg_pos, mut msg_pos) = self.skip_to(op_start);
        let mut stack: Vec<Word> = Vec::new();
        let mut op_pos = op_start;
        while op_pos < op_end {
            let op = self.ops[op_pos];
            op_pos += 1;
            if op == ExprOp::ArgValue || op == ExprOp::ArgSymbol {
                match self.args[arg_pos] {
                    ExprArg::Value(v) => stack.push(v),
                    _ => unreachable!("relative arg in absolute evaluation"),
                }
                arg_pos += 1;
                continue;
            }
            let mut value = stack.pop().unwrap_or(0);
            if op.is_unary() {
                value = match op {
                    ExprOp::Negate => value.wrapping_neg(),
                    ExprOp::BitNot => !value,
                    ExprOp::LogicalNot => Word::from(value == 0),
                    _ => value,
                };
            } else if op.is_binary() {
                let value2 = stack.pop().unwrap_or(0);
                value = match op {
                    ExprOp::Addition => value2.wrapping_add(value),
                    ExprOp::Subtract => value2.wrapping_sub(value),
                    ExprOp::Multiply => value2.wrapping_mul(value),
                    ExprOp::Division => {
                        let r = if value != 0 {
                            value2 / value
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Division by zero".into(),
                                error: true,
                            });
                            failed = true;
                            0
                        };
                        msg_pos += 1;
                        r
                    }
                    ExprOp::SignedDivision => {
                        let r = if value != 0 {
                            (value2 as i64).wrapping_div(value as i64) as Word
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Division by zero".into(),
                                error: true,
                            });
                            failed = true;
                            0
                        };
                        msg_pos += 1;
                        r
                    }
                    ExprOp::Modulo => {
                        let r = if value != 0 {
                            value2 % value
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Division by zero".into(),
                                error: true,
                            });
                            failed = true;
                            0
                        };
                        msg_pos += 1;
                        r
                    }
                    ExprOp::SignedModulo => {
                        let r = if value != 0 {
                            (value2 as i64).wrapping_rem(value as i64) as Word
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Division by zero".into(),
                                error: true,
                            });
                            failed = true;
                            0
                        };
                        msg_pos += 1;
                        r
                    }
                    ExprOp::BitAnd => value2 & value,
                    ExprOp::BitOr => value2 | value,
                    ExprOp::BitXor => value2 ^ value,
                    ExprOp::BitOrNot => value2 | !value,
                    ExprOp::ShiftLeft => {
                        let r = if value < 64 {
                            value2 << value
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Shift count out of range (between 0 and 63)".into(),
                                error: false,
                            });
                            0
                        };
                        msg_pos += 1;
                        r
                    }
                    ExprOp::ShiftRight => {
                        let r = if value < 64 {
                            value2 >> value
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Shift count out of range (between 0 and 63)".into(),
                                error: false,
                            });
                            0
                        };
                        msg_pos += 1;
                        r
                    }
                    ExprOp::SignedShiftRight => {
                        let r = if value < 64 {
                            ((value2 as i64) >> value) as Word
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Shift count out of range (between 0 and 63)".into(),
                                error: false,
                            });
                            if value2 >= 1 << 63 {
                                Word::MAX
                            } else {
                                0
                            }
                        };
                        msg_pos += 1;
                        r
                    }
                    ExprOp::LogicalAnd => Word::from(value2 != 0 && value != 0),
                    ExprOp::LogicalOr => Word::from(value2 != 0 || value != 0),
                    ExprOp::Equal => bool_word(value2 == value),
                    ExprOp::NotEqual => bool_word(value2 != value),
                    ExprOp::Less => bool_word((value2 as i64) < value as i64),
                    ExprOp::LessEq => bool_word(value2 as i64 <= value as i64),
                    ExprOp::Greater => bool_word(value2 as i64 > value as i64),
                    ExprOp::GreaterEq => bool_word(value2 as i64 >= value as i64),
                    ExprOp::Below => bool_word(value2 < value),
                    ExprOp::BelowEq => bool_word(value2 <= value),
                    ExprOp::Above => bool_word(value2 > value),
                    ExprOp::AboveEq => bool_word(value2 >= value),
                    _ => value,
                };
            } else if op == ExprOp::Choice {
                let value2 = stack.pop().unwrap_or(0);
                let value3 = stack.pop().unwrap_or(0);
                value = if value3 != 0 { value2 } else { value };
            }
            stack.push(value);
        }
        let value = stack.pop().unwrap_or(0);
        if failed {
            (TryStatus::Failed, 0, ABS_SECTION)
        } else {
            (TryStatus::Success, value, ABS_SECTION)
        }
    }

    fn evaluate_relative(
        &self,
        ctx: &EvalContext,
        op_start: usize,
        op_end: usize,
        diags: &mut Vec<EvalDiag>,
    ) -> (TryStatus, Word, SectionId) {
        let mut failed = false;
        let mut try_later = false;
        let (mut arg_pos, mut msg_pos) = self.skip_to(op_start);
        let mut stack: Vec<RelValue> = Vec::new();
        let mut op_pos = op_start;

        // section in a prepared relocation space resolves to the space's
        // first section plus the address delta
        let resolve_arg = |rv: RelValue| -> RelValue {
            if !ctx.sect_diffs_prepared || rv.relatives.is_empty() {
                return rv;
            }
            let section_id = rv.relatives[0].section_id;
            match ctx.sections[section_id as usize].rel_space {
                Some(space) => {
                    let first = ctx.rel_spaces_sections[space][0];
                    let delta = ctx.sections[section_id as usize].rel_address
                        - ctx.sections[first as usize].rel_address;
                    RelValue::rel(rv.value.wrapping_add(delta), first)
                }
                None => rv,
            }
        };
        // true when the relatives are all inside one resolvable
        // relocation space, so the operation may be deferred
        let chksrel = |relatives: &[RelMultiply], try_later: &mut bool| -> bool {
            if relatives.is_empty() {
                return true;
            }
            if !ctx.with_section_diffs || ctx.sect_diffs_prepared {
                return false;
            }
            for r in relatives {
                if ctx.sections[r.section_id as usize].rel_space.is_none() {
                    return false;
                }
            }
            *try_later = true;
            true
        };

        while op_pos < op_end {
            let op = self.ops[op_pos];
            op_pos += 1;
            if op.is_arg() {
                let rv = self.arg_value(arg_pos);
                stack.push(resolve_arg(rv));
                arg_pos += 1;
                continue;
            }
            let top = stack.pop().unwrap_or_else(|| RelValue::abs(0));
            let mut value = top.value;
            let mut relatives = top.relatives;
            if op.is_unary() {
                match op {
                    ExprOp::Negate => {
                        for r in &mut relatives {
                            r.multiply = r.multiply.wrapping_neg();
                        }
                        value = value.wrapping_neg();
                    }
                    ExprOp::BitNot => {
                        for r in &mut relatives {
                            r.multiply = r.multiply.wrapping_neg();
                        }
                        value = !value;
                    }
                    ExprOp::LogicalNot => {
                        if !relatives.is_empty() {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "Logical negation is not allowed to relative values"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        }
                        value = Word::from(value == 0);
                    }
                    _ => {}
                }
            } else if op.is_binary() {
                let second = stack.pop().unwrap_or_else(|| RelValue::abs(0));
                let value2 = second.value;
                let relatives2 = second.relatives;
                match op {
                    ExprOp::Addition | ExprOp::Subtract => {
                        if op == ExprOp::Subtract {
                            for r in &mut relatives {
                                r.multiply = r.multiply.wrapping_neg();
                            }
                            value = value.wrapping_neg();
                        }
                        for r2 in &relatives2 {
                            let mut found = false;
                            for r in &mut relatives {
                                if r.section_id == r2.section_id {
                                    r.multiply = r.multiply.wrapping_add(r2.multiply);
                                    found = true;
                                }
                            }
                            if !found {
                                relatives.push(r2.clone());
                            }
                        }
                        relatives.retain(|r| r.multiply != 0);
                        value = value2.wrapping_add(value);
                    }
                    ExprOp::Multiply => {
                        if !chksrel(&relatives, &mut try_later) && !chksrel(&relatives2, &mut try_later) {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "Multiplication is not allowed for two relative values"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        }
                        if relatives2.is_empty() {
                            if value2 != 0 {
                                for r in &mut relatives {
                                    r.multiply = r.multiply.wrapping_mul(value2);
                                }
                            } else {
                                relatives.clear();
                            }
                        } else if value != 0 {
                            relatives = relatives2.clone();
                            for r in &mut relatives {
                                r.multiply = r.multiply.wrapping_mul(value);
                            }
                        } else {
                            relatives.clear();
                        }
                        value = value2.wrapping_mul(value);
                    }
                    ExprOp::Division
                    | ExprOp::SignedDivision
                    | ExprOp::Modulo
                    | ExprOp::SignedModulo => {
                        if !chksrel(&relatives, &mut try_later) || !chksrel(&relatives2, &mut try_later) {
                            let opname = match op {
                                ExprOp::Division => "Division",
                                ExprOp::SignedDivision => "Signed division",
                                ExprOp::Modulo => "Modulo",
                                _ => "Signed Modulo",
                            };
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: format!(
                                    "{} is not allowed for any relative value",
                                    opname
                                ),
                                error: true,
                            });
                            failed = true;
                        }
                        if value != 0 {
                            value = match op {
                                ExprOp::Division => value2 / value,
                                ExprOp::SignedDivision => {
                                    (value2 as i64).wrapping_div(value as i64) as Word
                                }
                                ExprOp::Modulo => value2 % value,
                                _ => (value2 as i64).wrapping_rem(value as i64) as Word,
                            };
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Division by zero".into(),
                                error: true,
                            });
                            failed = true;
                            value = 0;
                        }
                        msg_pos += 1;
                        relatives.clear();
                    }
                    ExprOp::BitAnd => {
                        let norel1 = chksrel(&relatives, &mut try_later);
                        let norel2 = chksrel(&relatives2, &mut try_later);
                        if (norel1 && value == 0) || (norel2 && value2 == 0) {
                            relatives.clear();
                            value = 0;
                        } else if norel1 && value == Word::MAX {
                            relatives = relatives2.clone();
                            value = value2;
                        } else if norel2 && value2 == Word::MAX {
                            // keep
                        } else if !norel1 || !norel2 {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "Binary AND is not allowed for any relative value \
except special cases"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        } else {
                            value = value2 & value;
                        }
                    }
                    ExprOp::BitOr => {
                        let norel1 = chksrel(&relatives, &mut try_later);
                        let norel2 = chksrel(&relatives2, &mut try_later);
                        if (norel1 && value == Word::MAX) || (norel2 && value2 == Word::MAX) {
                            relatives.clear();
                            value = Word::MAX;
                        } else if norel1 && value == 0 {
                            relatives = relatives2.clone();
                            value = value2;
                        } else if norel2 && value2 == 0 {
                            // keep
                        } else if !norel1 || !norel2 {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "Binary OR is not allowed for any relative value \
except special cases"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        } else {
                            value = value2 | value;
                        }
                    }
                    ExprOp::BitXor => {
                        let norel1 = chksrel(&relatives, &mut try_later);
                        let norel2 = chksrel(&relatives2, &mut try_later);
                        if norel1 && value == 0 {
                            relatives = relatives2.clone();
                            value = value2;
                        } else if norel2 && value2 == 0 {
                            // keep
                        } else if !norel1 || !norel2 {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "Binary XOR is not allowed for any relative value \
except special cases"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        } else {
                            value = value2 ^ value;
                        }
                    }
                    ExprOp::BitOrNot => {
                        let norel1 = chksrel(&relatives, &mut try_later);
                        let norel2 = chksrel(&relatives2, &mut try_later);
                        if (norel1 && value == 0) || (norel2 && value2 == Word::MAX) {
                            relatives.clear();
                            value = Word::MAX;
                        } else if norel1 && value == Word::MAX {
                            relatives = relatives2.clone();
                            value = value2;
                        } else if norel2 && value2 == 0 {
                            for r in &mut relatives {
                                r.multiply = r.multiply.wrapping_neg();
                            }
                            value = !value;
                        } else if !norel1 || !norel2 {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "Binary ORNOT is not allowed for any relative value \
except special cases"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        } else {
                            value = value2 | !value;
                        }
                    }
                    ExprOp::ShiftLeft => {
                        if !chksrel(&relatives, &mut try_later) {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "Shift left is not allowed for any for relative \
second value"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        } else if value < 64 {
                            relatives = relatives2.clone();
                            for r in &mut relatives {
                                r.multiply <<= value;
                            }
                            value = value2 << value;
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Shift count out of range (between 0 and 63)".into(),
                                error: false,
                            });
                            value = 0;
                        }
                        msg_pos += 1;
                    }
                    ExprOp::ShiftRight | ExprOp::SignedShiftRight => {
                        if !chksrel(&relatives, &mut try_later) || !chksrel(&relatives2, &mut try_later) {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: if op == ExprOp::ShiftRight {
                                    "Shift right is not allowed for any relative value".into()
                                } else {
                                    "Signed shift right is not allowed for any relative value"
                                        .into()
                                },
                                error: true,
                            });
                            failed = true;
                        }
                        if value < 64 {
                            value = if op == ExprOp::ShiftRight {
                                value2 >> value
                            } else {
                                ((value2 as i64) >> value) as Word
                            };
                        } else {
                            diags.push(EvalDiag {
                                pos: self.message_pos(msg_pos),
                                message: "Shift count out of range (between 0 and 63)".into(),
                                error: false,
                            });
                            value = if op == ExprOp::SignedShiftRight && value2 >= 1 << 63 {
                                Word::MAX
                            } else {
                                0
                            };
                        }
                        msg_pos += 1;
                        relatives.clear();
                    }
                    ExprOp::LogicalAnd => {
                        let norel1 = chksrel(&relatives, &mut try_later);
                        let norel2 = chksrel(&relatives2, &mut try_later);
                        if (norel1 && value == 0) || (norel2 && value2 == 0) {
                            relatives.clear();
                            value = 0;
                        } else if !norel1 || !norel2 {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "Logical AND is not allowed for any relative value \
except special cases"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        } else {
                            value = Word::from(value2 != 0 && value != 0);
                        }
                    }
                    ExprOp::LogicalOr => {
                        let norel1 = chksrel(&relatives, &mut try_later);
                        let norel2 = chksrel(&relatives2, &mut try_later);
                        if (norel1 && value != 0) || (norel2 && value2 != 0) {
                            relatives.clear();
                            value = 1;
                        } else if !norel1 || !norel2 {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "Logical OR is not allowed for any relative value \
except special cases"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        } else {
                            value = Word::from(value2 != 0 || value != 0);
                        }
                    }
                    _ => {
                        // comparisons: both sides must share relatives
                        if !check_relatives_equality(
                            ctx,
                            &mut relatives,
                            &relatives2,
                            &mut try_later,
                        ) {
                            diags.push(EvalDiag {
                                pos: self.source_pos.clone(),
                                message: "For comparisons two values must have this same \
relatives!"
                                    .into(),
                                error: true,
                            });
                            failed = true;
                        }
                        relatives.clear();
                        value = match op {
                            ExprOp::Equal => bool_word(value2 == value),
                            ExprOp::NotEqual => bool_word(value2 != value),
                            ExprOp::Less => bool_word((value2 as i64) < value as i64),
                            ExprOp::LessEq => bool_word(value2 as i64 <= value as i64),
                            ExprOp::Greater => bool_word(value2 as i64 > value as i64),
                            ExprOp::GreaterEq => bool_word(value2 as i64 >= value as i64),
                            ExprOp::Below => bool_word(value2 < value),
                            ExprOp::BelowEq => bool_word(value2 <= value),
                            ExprOp::Above => bool_word(value2 > value),
                            _ => bool_word(value2 >= value),
                        };
                    }
                }
            } else if op == ExprOp::Choice {
                let second = stack.pop().unwrap_or_else(|| RelValue::abs(0));
                let third = stack.pop().unwrap_or_else(|| RelValue::abs(0));
                if !chksrel(&third.relatives, &mut try_later) {
                    diags.push(EvalDiag {
                        pos: self.source_pos.clone(),
                        message: "Choice is not allowed for first relative value".into(),
                        error: true,
                    });
                    failed = true;
                }
                if third.value != 0 {
                    relatives = second.relatives.clone();
                    value = second.value;
                }
            }
            stack.push(RelValue { value, relatives });
        }

        let top = stack.pop().unwrap_or_else(|| RelValue::abs(0));
        let mut value = top.value;
        let relatives = top.relatives;
        let mut section_id = ABS_SECTION;
        if relatives.is_empty() {
            section_id = ABS_SECTION;
        } else if relatives.len() == 1 && relatives[0].multiply == 1 {
            section_id = relatives[0].section_id;
        } else {
            let mut more_than_one_space = false;
            if ctx.with_section_diffs && !ctx.sect_diffs_prepared {
                let mut rel_space: Option<usize> = None;
                for r in &relatives {
                    match ctx.sections[r.section_id as usize].rel_space {
                        Some(space) => {
                            if rel_space.is_some() && rel_space != Some(space) {
                                more_than_one_space = true;
                                break;
                            }
                            rel_space = Some(space);
                        }
                        None => {
                            more_than_one_space = true;
                            break;
                        }
                    }
                }
            } else {
                more_than_one_space = true;
            }
            if more_than_one_space {
                diags.push(EvalDiag {
                    pos: self.source_pos.clone(),
                    message: "Only one relative=1 (section) can be result of expression".into(),
                    error: true,
                });
                failed = true;
            } else {
                try_later = true;
            }
        }
        if ctx.sect_diffs_prepared && section_id != ABS_SECTION {
            if let Some(space) = ctx.sections[section_id as usize].rel_space {
                // pick the section of the space whose address covers the value
                let rl_sections = &ctx.rel_spaces_sections[space];
                let val_addr = ctx.sections[section_id as usize].rel_address.wrapping_add(value);
                let mut idx =
                    rl_sections.partition_point(|&s| ctx.sections[s as usize].rel_address < val_addr);
                if (idx == rl_sections.len()
                    || ctx.sections[rl_sections[idx] as usize].rel_address != val_addr)
                    && idx != 0
                {
                    idx -= 1;
                }
                let new_section = rl_sections.get(idx).copied().unwrap_or(*rl_sections.last().expect("non-empty relocation space"));
                value = value
                    .wrapping_add(ctx.sections[section_id as usize].rel_address)
                    .wrapping_sub(ctx.sections[new_section as usize].rel_address);
                section_id = new_section;
            }
        }
        if try_later {
            return (TryStatus::TryLater, 0, ABS_SECTION);
        }
        if failed {
            (TryStatus::Failed, 0, ABS_SECTION)
        } else {
            (TryStatus::Success, value, section_id)
        }
    }
}

fn bool_word(b: bool) -> Word {
    if b {
        Word::MAX
    } else {
        0
    }
}

fn check_relatives_equality_int(relatives: &mut [RelMultiply], relatives2: &[RelMultiply]) -> bool {
    if relatives2.len() != relatives.len() {
        return false;
    }
    let mut requals = 0;
    for r2 in relatives2 {
        for r in relatives.iter_mut() {
            if r.multiply == r2.multiply && r.section_id == r2.section_id {
                r.section_id = ABS_SECTION; // consumed
                requals += 1;
                break;
            }
        }
    }
    requals == relatives2.len()
}

fn check_relatives_equality(
    ctx: &EvalContext,
    relatives: &mut Vec<RelMultiply>,
    relatives2: &[RelMultiply],
    try_later: &mut bool,
) -> bool {
    if !ctx.with_section_diffs || ctx.sect_diffs_prepared {
        return check_relatives_equality_int(relatives, relatives2);
    }
    // compare ignoring sections inside relocation spaces
    let no_space = |r: &RelMultiply| ctx.sections[r.section_id as usize].rel_space.is_none();
    let mut orels1: Vec<RelMultiply> = relatives.iter().filter(|r| no_space(r)).cloned().collect();
    let orels2: Vec<RelMultiply> = relatives2.iter().filter(|r| no_space(r)).cloned().collect();
    let equal = check_relatives_equality_int(&mut orels1, &orels2);
    if equal && (orels1.len() != relatives.len() || orels2.len() != relatives2.len()) {
        *try_later = true;
    }
    equal
}
