//! GCN instruction parsing and encoding.
//!
//! The tables and bit-level encoders live in `gcn-isa`; this module
//! parses operand text (which needs symbol scopes and regvars), records
//! usage/delayed-op/code-flow side tables and emits the encoded words.

use crate::asm::Assembler;
use crate::expr::{ExprArg, ExprOp, ExprTarget};
use crate::parse_utils::{extract_sym_name, skip_spaces};
use crate::source::SourcePos;
use gcn_isa::{
    encode_ds, encode_flat, encode_mubuf, encode_smrd, encode_sop1, encode_sop2, encode_sopc,
    encode_sopk, encode_sopp, encode_vop1, encode_vop2, encode_vopc, encode_waitcnt,
    find_instruction, instruction_size, patch_reg_field, CodeFlowEntry, CodeFlowKind, DelayedOp,
    DelayedOpKind, GcnEncoding, GcnField, GcnInstruction, InstrMode, RegClass, RegVarUsage,
    RwFlags, WaitConfig, WaitInstr, SPECIAL_REG_NAMES, SRC_LITERAL, SRC_VGPR_BASE,
};
use gcn_types::{bytes as le, RegIndex, SectionId, Word, ABS_SECTION, MAX_REG_TYPES};

/// A parsed register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRegRange {
    /// Register file.
    pub class: RegClass,
    /// Register variable for virtual ranges.
    pub reg_var: Option<crate::symbol::RegVarId>,
    /// First lane (hardware index, or lane within the regvar).
    pub start: RegIndex,
    /// One past the last lane.
    pub end: RegIndex,
    /// Raw source-operand field value for hardware specials, if the
    /// range denotes one (`vcc`, `exec`, `m0`).
    pub special: Option<u16>,
}

impl ParsedRegRange {
    fn len(&self) -> u16 {
        self.end - self.start
    }
}

/// Pack a range into a register-range symbol value. Hardware lanes are
/// stored in the global numbering so the register file survives the
/// round trip through the symbol.
pub fn pack_reg_range(range: &ParsedRegRange) -> Word {
    let (start, end) = if range.reg_var.is_none() && range.class == RegClass::Vgpr {
        (range.start + SRC_VGPR_BASE, range.end + SRC_VGPR_BASE)
    } else {
        (range.start, range.end)
    };
    u64::from(start) | (u64::from(end) << 32)
}

/// Unpack a register-range symbol value.
pub fn unpack_reg_range(value: Word) -> (RegIndex, RegIndex) {
    ((value & 0xffff) as RegIndex, ((value >> 32) & 0xffff) as RegIndex)
}

/// Physical index ranges per register type, `[start, end)` pairs
/// indexed by [`RegClass`]. The ranges partition one global register
/// numbering: SGPRs from 0, VGPRs from 256 (the shared source-operand
/// encoding), so a bare index always identifies its file.
pub fn register_ranges(arch: gcn_types::GpuArchitecture) -> [(u16, u16); MAX_REG_TYPES] {
    [(0, arch.max_sgprs()), (SRC_VGPR_BASE, SRC_VGPR_BASE + arch.max_vgprs())]
}

/// Parse a register or register-range operand: `s3`, `v[4:7]`, `vcc`,
/// a `.regvar` name (optionally `name[2:3]`), or a register-range
/// symbol.
pub fn parse_register_range(asm: &mut Assembler, pos: &mut usize) -> Option<ParsedRegRange> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let start_pos = *pos;
    let name = match extract_sym_name(bytes, pos, false) {
        Some(n) => n,
        None => {
            asm.print_error(*pos, "Expected register or register range");
            return None;
        }
    };
    let lower = name.to_ascii_lowercase();
    // hardware register file with index or [a:b]
    if lower == "s" || lower == "v" {
        let class = if lower == "s" { RegClass::Sgpr } else { RegClass::Vgpr };
        if *pos < bytes.len() && bytes[*pos] == b'[' {
            *pos += 1;
            let (a, b) = parse_bracket_range(asm, pos)?;
            return Some(ParsedRegRange { class, reg_var: None, start: a, end: b + 1, special: None });
        }
        asm.print_error(start_pos, "Expected register index");
        return None;
    }
    if let Some(rest) = lower.strip_prefix('s') {
        if let Ok(index) = rest.parse::<u16>() {
            return Some(ParsedRegRange {
                class: RegClass::Sgpr,
                reg_var: None,
                start: index,
                end: index + 1,
                special: None,
            });
        }
    }
    if let Some(rest) = lower.strip_prefix('v') {
        if let Ok(index) = rest.parse::<u16>() {
            return Some(ParsedRegRange {
                class: RegClass::Vgpr,
                reg_var: None,
                start: index,
                end: index + 1,
                special: None,
            });
        }
    }
    if let Ok(i) = SPECIAL_REG_NAMES.binary_search_by(|(n, _)| (*n).cmp(lower.as_str())) {
        let value = SPECIAL_REG_NAMES[i].1;
        let pair = lower == "vcc" || lower == "exec";
        return Some(ParsedRegRange {
            class: RegClass::Sgpr,
            reg_var: None,
            start: value,
            end: value + if pair { 2 } else { 1 },
            special: Some(value),
        });
    }
    // register variable
    if let Some(rv) = asm.find_reg_var(&name) {
        let size = asm.reg_vars[rv].size;
        let class = asm.reg_vars[rv].class;
        if *pos < bytes.len() && bytes[*pos] == b'[' {
            *pos += 1;
            let (a, b) = parse_bracket_range(asm, pos)?;
            if b + 1 > size {
                asm.print_error(start_pos, "Register range out of range");
                return None;
            }
            return Some(ParsedRegRange { class, reg_var: Some(rv), start: a, end: b + 1, special: None });
        }
        return Some(ParsedRegRange { class, reg_var: Some(rv), start: 0, end: size, special: None });
    }
    // register-range symbol
    if let Some(sym_id) = asm.find_symbol_in_scope(&name) {
        let sym = &asm.symbols[sym_id].sym;
        if sym.reg_range {
            let (mut start, mut end) = unpack_reg_range(sym.value);
            let reg_var = sym.reg_var;
            let class = match reg_var {
                Some(rv) => asm.reg_vars[rv].class,
                None if start >= SRC_VGPR_BASE => {
                    start -= SRC_VGPR_BASE;
                    end -= SRC_VGPR_BASE;
                    RegClass::Vgpr
                }
                None => RegClass::Sgpr,
            };
            return Some(ParsedRegRange { class, reg_var, start, end, special: None });
        }
    }
    asm.print_error(start_pos, &format!("Unknown register or register variable '{}'", name));
    None
}

fn parse_bracket_range(asm: &mut Assembler, pos: &mut usize) -> Option<(u16, u16)> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let a = asm.parse_literal(pos)? as u16;
    skip_spaces(bytes, pos);
    let b = if *pos < bytes.len() && bytes[*pos] == b':' {
        *pos += 1;
        skip_spaces(bytes, pos);
        let b = asm.parse_literal(pos)? as u16;
        skip_spaces(bytes, pos);
        b
    } else {
        a
    };
    if *pos >= bytes.len() || bytes[*pos] != b']' {
        asm.print_error(*pos, "Unterminated register range, expected ']'");
        return None;
    }
    *pos += 1;
    if b < a {
        asm.print_error(*pos, "Register range end before start");
        return None;
    }
    Some((a, b))
}

struct InstrBuilder {
    offset: usize,
    usages: Vec<RegVarUsage>,
    delayed: Vec<DelayedOp>,
    literal: Option<u32>,
}

impl InstrBuilder {
    fn new(offset: usize) -> Self {
        InstrBuilder { offset, usages: Vec::new(), delayed: Vec::new(), literal: None }
    }

    /// Hardware VGPR lanes are recorded in the global numbering
    /// (offset by 256) so the side tables identify the register file.
    fn record_lanes(range: &ParsedRegRange) -> (RegIndex, RegIndex) {
        if range.reg_var.is_none() && range.class == RegClass::Vgpr {
            (range.start + SRC_VGPR_BASE, range.end + SRC_VGPR_BASE)
        } else {
            (range.start, range.end)
        }
    }

    fn use_reg(&mut self, range: &ParsedRegRange, field: Option<GcnField>, rw: RwFlags, align: u8) {
        let (rstart, rend) = Self::record_lanes(range);
        self.usages.push(RegVarUsage {
            offset: self.offset,
            reg_var: range.reg_var,
            rstart,
            rend,
            reg_field: field,
            rw,
            align,
        });
    }

    fn delay(&mut self, kind: DelayedOpKind, range: &ParsedRegRange, rw: RwFlags) {
        let rw2 = if kind.second_queue().is_some() { rw } else { RwFlags::empty() };
        let (rstart, rend) = Self::record_lanes(range);
        self.delayed.push(DelayedOp {
            offset: self.offset,
            kind,
            reg_var: range.reg_var,
            rstart,
            rend,
            rw,
            rw2,
        });
    }
}

/// Assemble one instruction statement.
pub fn assemble_instruction(asm: &mut Assembler, mnemonic: &str, stmt_place: usize, pos: usize) {
    let arch_mask = gcn_isa::arch_mask_for(asm.arch);
    let ins = match find_instruction(mnemonic, arch_mask) {
        Some(i) => *i,
        None => {
            asm.print_error(stmt_place, &format!("Unknown instruction '{}'", mnemonic));
            return;
        }
    };
    let mut pos = pos;
    let offset = asm.sections[asm.current_section as usize].size();
    let mut b = InstrBuilder::new(offset);
    let ok = match ins.encoding {
        GcnEncoding::Sop2 => assemble_sop2(asm, &ins, &mut pos, &mut b),
        GcnEncoding::Sopk => assemble_sopk(asm, &ins, stmt_place, &mut pos, &mut b),
        GcnEncoding::Sop1 => assemble_sop1(asm, &ins, &mut pos, &mut b),
        GcnEncoding::Sopc => assemble_sopc(asm, &ins, &mut pos, &mut b),
        GcnEncoding::Sopp => assemble_sopp(asm, &ins, stmt_place, &mut pos, &mut b),
        GcnEncoding::Smrd => assemble_smrd(asm, &ins, &mut pos, &mut b),
        GcnEncoding::Vop2 => assemble_vop2(asm, &ins, &mut pos, &mut b),
        GcnEncoding::Vop1 => assemble_vop1(asm, &ins, &mut pos, &mut b),
        GcnEncoding::Vopc => assemble_vopc(asm, &ins, &mut pos, &mut b),
        GcnEncoding::Ds => assemble_ds(asm, &ins, &mut pos, &mut b),
        GcnEncoding::Mubuf => assemble_mubuf(asm, &ins, &mut pos, &mut b),
        GcnEncoding::Flat => assemble_flat(asm, &ins, &mut pos, &mut b),
    };
    if !ok {
        return;
    }
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, &mut pos);
    if pos != bytes.len() {
        asm.print_error(pos, "Garbages at end of line");
        return;
    }
    let section = &mut asm.sections[asm.current_section as usize];
    for u in b.usages {
        section.usages.push(u);
    }
    for d in b.delayed {
        section.waits.push_delayed_op(d);
    }
}

fn emit_word(asm: &mut Assembler, word: u32, literal: Option<u32>) {
    let mut out = word.to_le_bytes().to_vec();
    if let Some(lit) = literal {
        out.extend_from_slice(&lit.to_le_bytes());
    }
    asm.put_data(&out);
}

fn expect_comma(asm: &mut Assembler, pos: &mut usize) -> bool {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos < bytes.len() && bytes[*pos] == b',' {
        *pos += 1;
        true
    } else {
        asm.print_error(*pos, "Expected ',' before argument");
        false
    }
}

fn reg_with_size(
    asm: &mut Assembler,
    pos: &mut usize,
    class: RegClass,
    size: u16,
) -> Option<ParsedRegRange> {
    let start = *pos;
    let range = parse_register_range(asm, pos)?;
    if range.class != class {
        asm.print_error(
            start,
            match class {
                RegClass::Sgpr => "Expected scalar register",
                RegClass::Vgpr => "Expected vector register",
            },
        );
        return None;
    }
    if range.len() != size {
        asm.print_error(start, &format!("Expected {}-register range", size));
        return None;
    }
    Some(range)
}

/// Encoded field value for a scalar register (or special) range.
fn sgpr_field_value(range: &ParsedRegRange) -> u16 {
    range.special.unwrap_or(range.start)
}

fn dst_size(mode: InstrMode) -> u16 {
    if mode.contains(InstrMode::DST_64) {
        2
    } else {
        1
    }
}

fn src_size(mode: InstrMode, second: bool) -> u16 {
    let flag = if second { InstrMode::SRC1_64 } else { InstrMode::SRC0_64 };
    if mode.contains(flag) {
        2
    } else {
        1
    }
}

/// Scalar source operand: register, inline constant or 32-bit literal.
fn parse_scalar_src(
    asm: &mut Assembler,
    pos: &mut usize,
    size: u16,
    b: &mut InstrBuilder,
    field: GcnField,
) -> Option<u16> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    // try a register first
    let save = *pos;
    if *pos < bytes.len() && !bytes[*pos].is_ascii_digit() && bytes[*pos] != b'-' && bytes[*pos] != b'\'' {
        let probe = {
            let mut p = *pos;
            let name = extract_sym_name(bytes, &mut p, false);
            name.map(|n| {
                let l = n.to_ascii_lowercase();
                l == "s"
                    || l == "v"
                    || l.strip_prefix('s').map(|r| r.parse::<u16>().is_ok()).unwrap_or(false)
                    || l.strip_prefix('v').map(|r| r.parse::<u16>().is_ok()).unwrap_or(false)
                    || SPECIAL_REG_NAMES.binary_search_by(|(sn, _)| (*sn).cmp(l.as_str())).is_ok()
                    || asm.find_reg_var(&n).is_some()
                    || asm
                        .find_symbol_in_scope(&n)
                        .map(|s| asm.symbols[s].sym.reg_range)
                        .unwrap_or(false)
            })
            .unwrap_or(false)
        };
        if probe {
            let range = reg_with_size(asm, pos, RegClass::Sgpr, size)?;
            b.use_reg(&range, Some(field), RwFlags::READ, if size > 1 { 2 } else { 0 });
            return Some(sgpr_field_value(&range));
        }
        *pos = save;
    }
    // constant expression
    if let Some(f) = try_parse_float_literal(asm, pos) {
        return Some(encode_float_src_constant(b, f));
    }
    let value = parse_imm_value(asm, pos)?;
    Some(encode_src_constant(b, value))
}

/// Inline-constant encoding for `value`, falling back to a literal.
fn encode_src_constant(b: &mut InstrBuilder, value: u64) -> u16 {
    let sval = value as i64;
    if (0..=64).contains(&sval) {
        return 128 + sval as u16;
    }
    if (-16..=-1).contains(&sval) {
        return (192 + (-sval)) as u16;
    }
    b.literal = Some(value as u32);
    SRC_LITERAL
}

/// Inline-constant encoding for a float immediate. The hardware set
/// covers 0.0 and the signed halves, ones, twos and fours; anything
/// else becomes a 32-bit literal.
fn encode_float_src_constant(b: &mut InstrBuilder, value: f32) -> u16 {
    match value {
        v if v == 0.0 => 128,
        v if v == 0.5 => 240,
        v if v == -0.5 => 241,
        v if v == 1.0 => 242,
        v if v == -1.0 => 243,
        v if v == 2.0 => 244,
        v if v == -2.0 => 245,
        v if v == 4.0 => 246,
        v if v == -4.0 => 247,
        v => {
            b.literal = Some(v.to_bits());
            SRC_LITERAL
        }
    }
}

/// Scan a float literal (`1.0`, `-0.5`, `2.5e1`) at `pos`. A decimal
/// point is required, so plain integers stay on the expression path.
fn try_parse_float_literal(asm: &Assembler, pos: &mut usize) -> Option<f32> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let mut p = *pos;
    if p < bytes.len() && (bytes[p] == b'-' || bytes[p] == b'+') {
        p += 1;
    }
    let digits_start = p;
    while p < bytes.len() && bytes[p].is_ascii_digit() {
        p += 1;
    }
    if p == digits_start || p >= bytes.len() || bytes[p] != b'.' {
        return None;
    }
    p += 1;
    while p < bytes.len() && bytes[p].is_ascii_digit() {
        p += 1;
    }
    if p < bytes.len() && (bytes[p] == b'e' || bytes[p] == b'E') {
        p += 1;
        if p < bytes.len() && (bytes[p] == b'-' || bytes[p] == b'+') {
            p += 1;
        }
        while p < bytes.len() && bytes[p].is_ascii_digit() {
            p += 1;
        }
    }
    let text = std::str::from_utf8(&bytes[*pos..p]).ok()?;
    let value = text.parse::<f32>().ok()?;
    *pos = p;
    Some(value)
}

/// Absolute immediate with immediate resolution required.
fn parse_imm_value(asm: &mut Assembler, pos: &mut usize) -> Option<u64> {
    let (value, section) = asm.parse_expr_value(pos)?;
    if section != ABS_SECTION {
        asm.print_error(*pos, "Expected absolute value");
        return None;
    }
    Some(value)
}

fn assemble_sop2(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    let dst = match reg_with_size(asm, pos, RegClass::Sgpr, dst_size(ins.mode)) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let src0 = match parse_scalar_src(asm, pos, src_size(ins.mode, false), b, GcnField::Sop2Src0) {
        Some(v) => v,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let src1 = match parse_scalar_src(asm, pos, src_size(ins.mode, true), b, GcnField::Sop2Src1) {
        Some(v) => v,
        None => return false,
    };
    b.use_reg(&dst, Some(GcnField::Sop2Sdst), RwFlags::WRITE, if dst.len() > 1 { 2 } else { 0 });
    let word = encode_sop2(ins.code, sgpr_field_value(&dst), src0, src1);
    emit_word(asm, word, b.literal);
    true
}

fn assemble_sop1(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    if ins.mode.contains(InstrMode::NO_DST) {
        // s_setpc_b64 and friends: single source operand
        let src0 = match parse_scalar_src(asm, pos, src_size(ins.mode, false), b, GcnField::Sop1Src0) {
            Some(v) => v,
            None => return false,
        };
        let word = encode_sop1(ins.code, 0, src0);
        emit_word(asm, word, b.literal);
        return true;
    }
    let dst = match reg_with_size(asm, pos, RegClass::Sgpr, dst_size(ins.mode)) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let src0 = match parse_scalar_src(asm, pos, src_size(ins.mode, false), b, GcnField::Sop1Src0) {
        Some(v) => v,
        None => return false,
    };
    b.use_reg(&dst, Some(GcnField::Sop1Sdst), RwFlags::WRITE, if dst.len() > 1 { 2 } else { 0 });
    let word = encode_sop1(ins.code, sgpr_field_value(&dst), src0);
    emit_word(asm, word, b.literal);
    true
}

fn assemble_sopc(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    let src0 = match parse_scalar_src(asm, pos, src_size(ins.mode, false), b, GcnField::SopcSrc0) {
        Some(v) => v,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let src1 = match parse_scalar_src(asm, pos, src_size(ins.mode, true), b, GcnField::SopcSrc1) {
        Some(v) => v,
        None => return false,
    };
    let word = encode_sopc(ins.code, src0, src1);
    emit_word(asm, word, b.literal);
    true
}

fn assemble_sopk(
    asm: &mut Assembler,
    ins: &GcnInstruction,
    _stmt_place: usize,
    pos: &mut usize,
    b: &mut InstrBuilder,
) -> bool {
    let dst = match reg_with_size(asm, pos, RegClass::Sgpr, dst_size(ins.mode)) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let value = match parse_imm_value(asm, pos) {
        Some(v) => v,
        None => return false,
    };
    let imm_source = asm.get_source_pos(*pos);
    asm.print_warning_for_range(16, value, &imm_source);
    let rw = if ins.mnemonic.starts_with("s_cmpk") { RwFlags::READ } else { RwFlags::WRITE };
    b.use_reg(&dst, Some(GcnField::SopkSdst), rw, 0);
    let word = encode_sopk(ins.code, sgpr_field_value(&dst), value as u16);
    emit_word(asm, word, b.literal);
    true
}

fn assemble_sopp(
    asm: &mut Assembler,
    ins: &GcnInstruction,
    stmt_place: usize,
    pos: &mut usize,
    b: &mut InstrBuilder,
) -> bool {
    if ins.mnemonic == "s_waitcnt" {
        return assemble_waitcnt(asm, ins, pos);
    }
    if ins.mode.contains(InstrMode::IMM_REL) {
        return assemble_branch(asm, ins, stmt_place, pos);
    }
    // optional immediate (s_nop count, s_endpgm, s_barrier)
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let imm = if *pos < bytes.len() {
        match parse_imm_value(asm, pos) {
            Some(v) => v as u16,
            None => return false,
        }
    } else {
        0
    };
    let word = encode_sopp(ins.code, imm);
    emit_word(asm, word, b.literal);
    true
}

fn assemble_waitcnt(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize) -> bool {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let config = WaitConfig::gcn();
    let mut waits = [u16::MAX; gcn_isa::MAX_WAIT_QUEUES];
    loop {
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() {
            break;
        }
        let name_place = *pos;
        let name = match extract_sym_name(bytes, pos, false) {
            Some(n) => n.to_ascii_lowercase(),
            None => {
                asm.print_error(*pos, "Expected counter name");
                return false;
            }
        };
        let queue = match name.as_str() {
            "vmcnt" => 0usize,
            "lgkmcnt" => 1,
            "expcnt" => 2,
            _ => {
                asm.print_error(name_place, &format!("Unknown wait counter '{}'", name));
                return false;
            }
        };
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() || bytes[*pos] != b'(' {
            asm.print_error(*pos, "Expected '(' after counter name");
            return false;
        }
        *pos += 1;
        let value = match parse_imm_value(asm, pos) {
            Some(v) => v as u16,
            None => return false,
        };
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() || bytes[*pos] != b')' {
            asm.print_error(*pos, "Expected ')' after counter value");
            return false;
        }
        *pos += 1;
        if value >= config.queue_sizes[queue] {
            asm.print_warning(name_place, "Wait count out of range");
        }
        waits[queue] = waits[queue].min(value);
        skip_spaces(bytes, pos);
        if *pos < bytes.len() && (bytes[*pos] == b'&' || bytes[*pos] == b',') {
            *pos += 1;
        }
    }
    let offset = asm.sections[asm.current_section as usize].size();
    // record for the scheduler with missing counters at their maxima
    let mut recorded = waits;
    for q in 0..config.queue_count {
        if recorded[q] == u16::MAX {
            recorded[q] = config.queue_sizes[q] - 1;
        }
    }
    asm.sections[asm.current_section as usize]
        .waits
        .push_wait_instr(WaitInstr { offset, waits: recorded });
    let imm = encode_waitcnt(&config, &recorded);
    let word = encode_sopp(ins.code, imm);
    emit_word(asm, word, None);
    true
}

fn assemble_branch(
    asm: &mut Assembler,
    ins: &GcnInstruction,
    stmt_place: usize,
    pos: &mut usize,
) -> bool {
    let offset = asm.sections[asm.current_section as usize].size();
    let section = asm.current_section;
    let expr_id = match asm.parse_expr(pos, false, false) {
        Some(e) => e,
        None => return false,
    };
    let kind = if ins.mnemonic == "s_branch" { CodeFlowKind::Jump } else { CodeFlowKind::CJump };
    let cflow_index = asm.sections[section as usize].code_flow.len();
    asm.sections[section as usize].code_flow.push(CodeFlowEntry {
        offset,
        target: usize::MAX,
        kind,
    });
    if asm.exprs[expr_id].sym_occurs_num == 0 {
        let (status, value, value_section) = asm.evaluate_expr_id(expr_id);
        if status != crate::error::TryStatus::Success {
            return false;
        }
        if !section_matches(asm, section, value_section) {
            asm.print_error(stmt_place, "Jump over current section!");
            return false;
        }
        let imm = match branch_imm(offset, value) {
            Some(i) => i,
            None => {
                asm.print_error(stmt_place, "Jump out of range");
                return false;
            }
        };
        asm.sections[section as usize].code_flow[cflow_index].target = value as usize;
        let word = encode_sopp(ins.code, imm);
        emit_word(asm, word, None);
        return true;
    }
    // forward reference: patch the immediate and the code-flow entry
    // once the symbols resolve
    asm.exprs[expr_id].target = ExprTarget::Branch { section, offset };
    let cf_expr = clone_expr_with_occurrences(asm, expr_id);
    asm.exprs[cf_expr].target = ExprTarget::CodeFlow { section, index: cflow_index };
    let word = encode_sopp(ins.code, 0);
    emit_word(asm, word, None);
    true
}

/// Relative branch immediate: word distance from the next instruction.
fn branch_imm(branch_offset: usize, target: Word) -> Option<u16> {
    let next = branch_offset as i64 + 4;
    let delta = target as i64 - next;
    if delta % 4 != 0 {
        return None;
    }
    let words = delta / 4;
    if !(-32768..=32767).contains(&words) {
        return None;
    }
    Some(words as i16 as u16)
}

/// True when a jump target in `value_section` lands in `section`
/// (absolute values match absolute-addressable sections).
pub fn section_matches(asm: &Assembler, section: SectionId, value_section: SectionId) -> bool {
    value_section == section
        || (value_section == ABS_SECTION
            && asm.sections[section as usize]
                .flags
                .contains(crate::section::SectionFlags::ABS_ADDRESSABLE))
}

/// Patch a branch instruction once its target expression resolves.
pub fn resolve_branch_target(
    asm: &mut Assembler,
    pos: &SourcePos,
    section: SectionId,
    offset: usize,
    value: Word,
    value_section: SectionId,
) -> bool {
    if !section_matches(asm, section, value_section) {
        asm.print_error_at(pos, "Jump over current section!");
        return false;
    }
    let imm = match branch_imm(offset, value) {
        Some(i) => i,
        None => {
            asm.print_error_at(pos, "Jump out of range");
            return false;
        }
    };
    let content = &mut asm.sections[section as usize].content;
    let word = le::read_u32(content, offset);
    le::write_u32(content, offset, (word & 0xffff_0000) | u32::from(imm));
    true
}

fn clone_expr_with_occurrences(asm: &mut Assembler, expr_id: usize) -> usize {
    let expr = asm.exprs[expr_id].clone();
    let new_id = asm.add_expr(expr);
    let mut arg_index = 0usize;
    for op_index in 0..asm.exprs[new_id].ops.len() {
        let op = asm.exprs[new_id].ops[op_index];
        if op == ExprOp::ArgSymbol {
            if let ExprArg::Symbol(sym) = asm.exprs[new_id].args[arg_index] {
                asm.symbols[sym].sym.add_occurrence(new_id, arg_index, op_index);
            }
            arg_index += 1;
        } else if op == ExprOp::ArgValue {
            arg_index += 1;
        }
    }
    new_id
}

fn assemble_smrd(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    let dst_regs = match ins.mnemonic.rsplit_once('x') {
        Some((_, n)) if ins.mnemonic.contains("dwordx") => n.parse::<u16>().unwrap_or(1),
        _ => 1,
    };
    let dst = match reg_with_size(asm, pos, RegClass::Sgpr, dst_regs) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let base_regs = if ins.mnemonic.starts_with("s_buffer") { 4 } else { 2 };
    let sbase = match reg_with_size(asm, pos, RegClass::Sgpr, base_regs) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    // offset: immediate or scalar register
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let (imm, offset_val) = if bytes.get(*pos).map(|c| c.is_ascii_digit()).unwrap_or(false) {
        match parse_imm_value(asm, pos) {
            Some(v) => (true, v as u16),
            None => return false,
        }
    } else {
        let soffset = match reg_with_size(asm, pos, RegClass::Sgpr, 1) {
            Some(r) => r,
            None => return false,
        };
        b.use_reg(&soffset, Some(GcnField::SmrdSoffset), RwFlags::READ, 0);
        (false, sgpr_field_value(&soffset))
    };
    b.use_reg(&dst, Some(GcnField::SmrdSdst), RwFlags::WRITE, if dst_regs > 1 { 2 } else { 0 });
    b.use_reg(&sbase, Some(GcnField::SmrdSbase), RwFlags::READ, 2);
    b.delay(DelayedOpKind::ScalarMemLoad, &dst, RwFlags::WRITE);
    // sbase is encoded in units of register pairs
    let word = encode_smrd(ins.code, sgpr_field_value(&dst), sgpr_field_value(&sbase) >> 1, imm, offset_val);
    emit_word(asm, word, b.literal);
    true
}

/// Shared 9-bit vector-encoding source: VGPR, SGPR, constant, literal.
fn parse_vop_src0(asm: &mut Assembler, pos: &mut usize, b: &mut InstrBuilder) -> Option<u16> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let save = *pos;
    if *pos < bytes.len() && !bytes[*pos].is_ascii_digit() && bytes[*pos] != b'-' && bytes[*pos] != b'\'' {
        if let Some(range) = try_parse_register(asm, pos) {
            b.use_reg(&range, Some(GcnField::VopSrc0), RwFlags::READ, 0);
            return Some(match range.class {
                RegClass::Vgpr => SRC_VGPR_BASE + range.start,
                RegClass::Sgpr => sgpr_field_value(&range),
            });
        }
        *pos = save;
    }
    if let Some(f) = try_parse_float_literal(asm, pos) {
        return Some(encode_float_src_constant(b, f));
    }
    let value = parse_imm_value(asm, pos)?;
    Some(encode_src_constant(b, value))
}

fn try_parse_register(asm: &mut Assembler, pos: &mut usize) -> Option<ParsedRegRange> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let mut probe = *pos;
    let name = extract_sym_name(bytes, &mut probe, false)?;
    let lower = name.to_ascii_lowercase();
    let is_reg = lower == "s"
        || lower == "v"
        || lower
            .strip_prefix('s')
            .map(|r| r.parse::<u16>().is_ok())
            .unwrap_or(false)
        || lower
            .strip_prefix('v')
            .map(|r| r.parse::<u16>().is_ok())
            .unwrap_or(false)
        || SPECIAL_REG_NAMES.binary_search_by(|(sn, _)| (*sn).cmp(lower.as_str())).is_ok()
        || asm.find_reg_var(&name).is_some()
        || asm
            .find_symbol_in_scope(&name)
            .map(|s| asm.symbols[s].sym.reg_range)
            .unwrap_or(false);
    if !is_reg {
        return None;
    }
    parse_register_range(asm, pos)
}

fn assemble_vop2(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    let dst = match reg_with_size(asm, pos, RegClass::Vgpr, dst_size(ins.mode)) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let src0 = match parse_vop_src0(asm, pos, b) {
        Some(v) => v,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let vsrc1 = match reg_with_size(asm, pos, RegClass::Vgpr, 1) {
        Some(r) => r,
        None => return false,
    };
    b.use_reg(&vsrc1, Some(GcnField::Vop2Vsrc1), RwFlags::READ, 0);
    b.use_reg(&dst, Some(GcnField::VopVdst), RwFlags::WRITE, 0);
    // carry-writing forms also touch VCC
    if matches!(ins.mnemonic, "v_add_i32" | "v_sub_i32" | "v_subrev_i32" | "v_addc_u32") {
        let vcc = ParsedRegRange {
            class: RegClass::Sgpr,
            reg_var: None,
            start: 106,
            end: 108,
            special: Some(106),
        };
        let rw = if ins.mnemonic == "v_addc_u32" { RwFlags::READ | RwFlags::WRITE } else { RwFlags::WRITE };
        b.use_reg(&vcc, None, rw, 2);
    }
    let word = encode_vop2(ins.code, dst.start, vsrc1.start, src0);
    emit_word(asm, word, b.literal);
    true
}

fn assemble_vop1(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    if ins.mode.contains(InstrMode::NO_DST) {
        let word = encode_vop1(ins.code, 0, 0);
        emit_word(asm, word, None);
        return true;
    }
    let dst = match reg_with_size(asm, pos, RegClass::Vgpr, dst_size(ins.mode)) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let src0 = match parse_vop_src0(asm, pos, b) {
        Some(v) => v,
        None => return false,
    };
    b.use_reg(&dst, Some(GcnField::VopVdst), RwFlags::WRITE, 0);
    let word = encode_vop1(ins.code, dst.start, src0);
    emit_word(asm, word, b.literal);
    true
}

fn assemble_vopc(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    // destination is VCC, written implicitly
    let vcc = ParsedRegRange {
        class: RegClass::Sgpr,
        reg_var: None,
        start: 106,
        end: 108,
        special: Some(106),
    };
    let vcc_place = *pos;
    let first = match try_parse_register(asm, pos) {
        Some(r) => r,
        None => {
            asm.print_error(vcc_place, "Expected 'vcc' destination");
            return false;
        }
    };
    if first.special != Some(106) {
        asm.print_error(vcc_place, "Expected 'vcc' destination");
        return false;
    }
    if !expect_comma(asm, pos) {
        return false;
    }
    let src0 = match parse_vop_src0(asm, pos, b) {
        Some(v) => v,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let vsrc1 = match reg_with_size(asm, pos, RegClass::Vgpr, 1) {
        Some(r) => r,
        None => return false,
    };
    b.use_reg(&vsrc1, Some(GcnField::VopcVsrc1), RwFlags::READ, 0);
    b.use_reg(&vcc, None, RwFlags::WRITE, 2);
    let word = encode_vopc(ins.code, vsrc1.start, src0);
    emit_word(asm, word, b.literal);
    true
}

fn parse_ds_offset(asm: &mut Assembler, pos: &mut usize) -> Option<u16> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if bytes[*pos..].starts_with(b"offset") {
        *pos += 6;
        skip_spaces(bytes, pos);
        if *pos < bytes.len() && bytes[*pos] == b':' {
            *pos += 1;
            let v = parse_imm_value(asm, pos)?;
            return Some(v as u16);
        }
        asm.print_error(*pos, "Expected ':' after 'offset'");
        return None;
    }
    Some(0)
}

fn assemble_ds(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    let is_read = ins.mnemonic.starts_with("ds_read");
    let data_size = if ins.mnemonic.ends_with("b64") { 2 } else { 1 };
    let (vdst, addr, data0) = if is_read {
        let vdst = match reg_with_size(asm, pos, RegClass::Vgpr, data_size) {
            Some(r) => r,
            None => return false,
        };
        if !expect_comma(asm, pos) {
            return false;
        }
        let addr = match reg_with_size(asm, pos, RegClass::Vgpr, 1) {
            Some(r) => r,
            None => return false,
        };
        (Some(vdst), addr, None)
    } else {
        let addr = match reg_with_size(asm, pos, RegClass::Vgpr, 1) {
            Some(r) => r,
            None => return false,
        };
        if !expect_comma(asm, pos) {
            return false;
        }
        let data = match reg_with_size(asm, pos, RegClass::Vgpr, data_size) {
            Some(r) => r,
            None => return false,
        };
        (None, addr, Some(data))
    };
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let offset = if *pos < bytes.len() { parse_ds_offset(asm, pos).unwrap_or(0) } else { 0 };
    b.use_reg(&addr, Some(GcnField::DsAddr), RwFlags::READ, 0);
    if let Some(vdst) = &vdst {
        b.use_reg(vdst, Some(GcnField::DsVdst), RwFlags::WRITE, if data_size > 1 { 2 } else { 0 });
        b.delay(DelayedOpKind::LdsOp, vdst, RwFlags::WRITE);
    }
    if let Some(data) = &data0 {
        b.use_reg(data, Some(GcnField::DsData0), RwFlags::READ, if data_size > 1 { 2 } else { 0 });
        b.delay(DelayedOpKind::LdsOp, data, RwFlags::READ);
    }
    let (w0, w1) = encode_ds(
        ins.code,
        (offset & 0xff) as u8,
        (offset >> 8) as u8,
        false,
        addr.start,
        data0.map(|d| d.start).unwrap_or(0),
        0,
        vdst.map(|d| d.start).unwrap_or(0),
    );
    let mut out = w0.to_le_bytes().to_vec();
    out.extend_from_slice(&w1.to_le_bytes());
    asm.put_data(&out);
    true
}

fn assemble_mubuf(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    let is_store = ins.mnemonic.starts_with("buffer_store");
    let data_size = match ins.mnemonic.rsplit_once('x') {
        Some((_, n)) if ins.mnemonic.contains("dwordx") => n.parse::<u16>().unwrap_or(1),
        _ => 1,
    };
    let vdata = match reg_with_size(asm, pos, RegClass::Vgpr, data_size) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let vaddr = match reg_with_size(asm, pos, RegClass::Vgpr, 1) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let srsrc = match reg_with_size(asm, pos, RegClass::Sgpr, 4) {
        Some(r) => r,
        None => return false,
    };
    if !expect_comma(asm, pos) {
        return false;
    }
    let soffset = match parse_scalar_src(asm, pos, 1, b, GcnField::MubufSoffset) {
        Some(v) => v,
        None => return false,
    };
    // modifiers
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let mut offen = false;
    let mut idxen = false;
    let mut glc = false;
    let mut offset12 = 0u16;
    loop {
        skip_spaces(bytes, pos);
        if *pos >= bytes.len() {
            break;
        }
        let place = *pos;
        let word = match extract_sym_name(bytes, pos, false) {
            Some(w) => w.to_ascii_lowercase(),
            None => break,
        };
        match word.as_str() {
            "offen" => offen = true,
            "idxen" => idxen = true,
            "glc" => glc = true,
            "offset" => {
                skip_spaces(bytes, pos);
                if *pos < bytes.len() && bytes[*pos] == b':' {
                    *pos += 1;
                    match parse_imm_value(asm, pos) {
                        Some(v) => offset12 = v as u16,
                        None => return false,
                    }
                } else {
                    asm.print_error(*pos, "Expected ':' after 'offset'");
                    return false;
                }
            }
            _ => {
                asm.print_error(place, &format!("Unknown MUBUF modifier '{}'", word));
                return false;
            }
        }
    }
    let rw = if is_store { RwFlags::READ } else { RwFlags::WRITE };
    b.use_reg(&vdata, Some(GcnField::MubufVdata), rw, if data_size > 1 { 2 } else { 0 });
    b.use_reg(&vaddr, Some(GcnField::MubufVaddr), RwFlags::READ, 0);
    b.use_reg(&srsrc, Some(GcnField::MubufSrsrc), RwFlags::READ, 4);
    let kind = if is_store { DelayedOpKind::VectorMemStore } else { DelayedOpKind::VectorMemLoad };
    b.delay(kind, &vdata, rw);
    let (w0, w1) = encode_mubuf(
        ins.code,
        offset12,
        offen,
        idxen,
        glc,
        vaddr.start,
        vdata.start,
        sgpr_field_value(&srsrc) >> 2,
        soffset,
    );
    let mut out = w0.to_le_bytes().to_vec();
    out.extend_from_slice(&w1.to_le_bytes());
    if let Some(lit) = b.literal {
        out.extend_from_slice(&lit.to_le_bytes());
    }
    asm.put_data(&out);
    true
}

fn assemble_flat(asm: &mut Assembler, ins: &GcnInstruction, pos: &mut usize, b: &mut InstrBuilder) -> bool {
    let is_store = ins.mnemonic.starts_with("flat_store");
    let data_size = match ins.mnemonic.rsplit_once('x') {
        Some((_, n)) if ins.mnemonic.contains("dwordx") => n.parse::<u16>().unwrap_or(1),
        _ => 1,
    };
    let (vdst, addr, data) = if is_store {
        let addr = match reg_with_size(asm, pos, RegClass::Vgpr, 2) {
            Some(r) => r,
            None => return false,
        };
        if !expect_comma(asm, pos) {
            return false;
        }
        let data = match reg_with_size(asm, pos, RegClass::Vgpr, data_size) {
            Some(r) => r,
            None => return false,
        };
        (None, addr, Some(data))
    } else {
        let vdst = match reg_with_size(asm, pos, RegClass::Vgpr, data_size) {
            Some(r) => r,
            None => return false,
        };
        if !expect_comma(asm, pos) {
            return false;
        }
        let addr = match reg_with_size(asm, pos, RegClass::Vgpr, 2) {
            Some(r) => r,
            None => return false,
        };
        (Some(vdst), addr, None)
    };
    b.use_reg(&addr, Some(GcnField::FlatAddr), RwFlags::READ, 2);
    if let Some(vdst) = &vdst {
        b.use_reg(vdst, Some(GcnField::FlatVdst), RwFlags::WRITE, if data_size > 1 { 2 } else { 0 });
        b.delay(DelayedOpKind::FlatOp, vdst, RwFlags::WRITE);
    }
    if let Some(data) = &data {
        b.use_reg(data, Some(GcnField::FlatData), RwFlags::READ, if data_size > 1 { 2 } else { 0 });
        b.delay(DelayedOpKind::FlatOp, data, RwFlags::READ);
    }
    let (w0, w1) = encode_flat(
        ins.code,
        false,
        false,
        addr.start,
        data.map(|d| d.start).unwrap_or(0),
        vdst.map(|d| d.start).unwrap_or(0),
    );
    let mut out = w0.to_le_bytes().to_vec();
    out.extend_from_slice(&w1.to_le_bytes());
    asm.put_data(&out);
    true
}

/// Byte length of the encoded instruction at `offset`.
pub fn get_instruction_size(content: &[u8], offset: usize) -> usize {
    if offset + 4 > content.len() {
        return content.len() - offset;
    }
    instruction_size(content, offset).min(content.len() - offset)
}

/// Rewrite a register field of an encoded instruction (allocator).
pub fn patch_field(content: &mut [u8], offset: usize, field: GcnField, value: u16) {
    patch_reg_field(content, offset, field, value);
}
