//! Pseudo-operation dispatcher.
//!
//! Names are resolved through a sorted table and a binary search, then
//! dispatched to the handlers in the submodules. Unknown `.`-names are
//! reported and the statement is skipped.

mod clauses;
mod data;
mod syms;

use crate::asm::{Assembler, ClauseKind};
use crate::parse_utils::skip_spaces;
use gcn_types::{SectionId, ABS_SECTION};
use std::str::FromStr;

/// Recognized pseudo-operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum PseudoOp {
    Bit32,
    Bit64,
    Abort,
    Align,
    AltMacro,
    Arch,
    Ascii,
    Asciz,
    Balign,
    BuggyFpLit,
    Byte,
    CfCall,
    CfCjump,
    CfEnd,
    CfJump,
    CfRet,
    CfStart,
    Data,
    Double,
    Else,
    ElseIf,
    ElseIf32,
    ElseIf64,
    ElseIfArch,
    ElseIfB,
    ElseIfC,
    ElseIfDef,
    ElseIfEq,
    ElseIfEqs,
    ElseIfFmt,
    ElseIfGe,
    ElseIfGpu,
    ElseIfGt,
    ElseIfLe,
    ElseIfLt,
    ElseIfNArch,
    ElseIfNb,
    ElseIfNc,
    ElseIfNDef,
    ElseIfNe,
    ElseIfNes,
    ElseIfNFmt,
    ElseIfNGpu,
    ElseIfNotDef,
    End,
    EndIf,
    EndM,
    EndR,
    Ends,
    EndScope,
    Enum,
    Equ,
    Equiv,
    Eqv,
    Err,
    Error,
    ExitM,
    Extern,
    Fail,
    File,
    Fill,
    FillQ,
    Float,
    For,
    Format,
    Get64Bit,
    GetArch,
    GetFormat,
    GetGpu,
    GetVersion,
    Global,
    Gpu,
    Half,
    HWord,
    If,
    If32,
    If64,
    IfArch,
    IfB,
    IfC,
    IfDef,
    IfEq,
    IfEqs,
    IfFmt,
    IfGe,
    IfGpu,
    IfGt,
    IfLe,
    IfLt,
    IfNArch,
    IfNb,
    IfNc,
    IfNDef,
    IfNe,
    IfNes,
    IfNFmt,
    IfNGpu,
    IfNotDef,
    IncBin,
    Include,
    Int,
    Irp,
    Irpc,
    Kernel,
    KCode,
    KCodeEnd,
    Local,
    Long,
    Macro,
    MacroCase,
    Main,
    NoAltMacro,
    NoBuggyFpLit,
    NoMacroCase,
    NoOldModParam,
    Octa,
    Offset,
    OldModParam,
    Org,
    P2Align,
    Print,
    PurgeM,
    Quad,
    RegVar,
    Rept,
    RoData,
    Rvlin,
    RvlinOnce,
    Scope,
    Section,
    Set,
    Short,
    Size,
    Skip,
    Space,
    String,
    String16,
    String32,
    String64,
    Struct,
    Text,
    Undef,
    UseReg,
    Using,
    Unusing,
    Warning,
    Weak,
    While,
    Word,
}

/// Sorted `(name, op)` rows; names carry the leading dot.
static PSEUDO_OP_NAMES: &[(&str, PseudoOp)] = &[
    (".32bit", PseudoOp::Bit32),
    (".64bit", PseudoOp::Bit64),
    (".abort", PseudoOp::Abort),
    (".align", PseudoOp::Align),
    (".altmacro", PseudoOp::AltMacro),
    (".arch", PseudoOp::Arch),
    (".ascii", PseudoOp::Ascii),
    (".asciz", PseudoOp::Asciz),
    (".balign", PseudoOp::Balign),
    (".buggyfplit", PseudoOp::BuggyFpLit),
    (".byte", PseudoOp::Byte),
    (".cf_call", PseudoOp::CfCall),
    (".cf_cjump", PseudoOp::CfCjump),
    (".cf_end", PseudoOp::CfEnd),
    (".cf_jump", PseudoOp::CfJump),
    (".cf_ret", PseudoOp::CfRet),
    (".cf_start", PseudoOp::CfStart),
    (".data", PseudoOp::Data),
    (".double", PseudoOp::Double),
    (".else", PseudoOp::Else),
    (".elseif", PseudoOp::ElseIf),
    (".elseif32", PseudoOp::ElseIf32),
    (".elseif64", PseudoOp::ElseIf64),
    (".elseifarch", PseudoOp::ElseIfArch),
    (".elseifb", PseudoOp::ElseIfB),
    (".elseifc", PseudoOp::ElseIfC),
    (".elseifdef", PseudoOp::ElseIfDef),
    (".elseifeq", PseudoOp::ElseIfEq),
    (".elseifeqs", PseudoOp::ElseIfEqs),
    (".elseiffmt", PseudoOp::ElseIfFmt),
    (".elseifge", PseudoOp::ElseIfGe),
    (".elseifgpu", PseudoOp::ElseIfGpu),
    (".elseifgt", PseudoOp::ElseIfGt),
    (".elseifle", PseudoOp::ElseIfLe),
    (".elseiflt", PseudoOp::ElseIfLt),
    (".elseifnarch", PseudoOp::ElseIfNArch),
    (".elseifnb", PseudoOp::ElseIfNb),
    (".elseifnc", PseudoOp::ElseIfNc),
    (".elseifndef", PseudoOp::ElseIfNDef),
    (".elseifne", PseudoOp::ElseIfNe),
    (".elseifnes", PseudoOp::ElseIfNes),
    (".elseifnfmt", PseudoOp::ElseIfNFmt),
    (".elseifngpu", PseudoOp::ElseIfNGpu),
    (".elseifnotdef", PseudoOp::ElseIfNotDef),
    (".end", PseudoOp::End),
    (".endif", PseudoOp::EndIf),
    (".endm", PseudoOp::EndM),
    (".endr", PseudoOp::EndR),
    (".ends", PseudoOp::Ends),
    (".endscope", PseudoOp::EndScope),
    (".enum", PseudoOp::Enum),
    (".equ", PseudoOp::Equ),
    (".equiv", PseudoOp::Equiv),
    (".eqv", PseudoOp::Eqv),
    (".err", PseudoOp::Err),
    (".error", PseudoOp::Error),
    (".exitm", PseudoOp::ExitM),
    (".extern", PseudoOp::Extern),
    (".fail", PseudoOp::Fail),
    (".file", PseudoOp::File),
    (".fill", PseudoOp::Fill),
    (".fillq", PseudoOp::FillQ),
    (".float", PseudoOp::Float),
    (".for", PseudoOp::For),
    (".format", PseudoOp::Format),
    (".get_64bit", PseudoOp::Get64Bit),
    (".get_arch", PseudoOp::GetArch),
    (".get_format", PseudoOp::GetFormat),
    (".get_gpu", PseudoOp::GetGpu),
    (".get_version", PseudoOp::GetVersion),
    (".global", PseudoOp::Global),
    (".globl", PseudoOp::Global),
    (".gpu", PseudoOp::Gpu),
    (".half", PseudoOp::Half),
    (".hword", PseudoOp::HWord),
    (".if", PseudoOp::If),
    (".if32", PseudoOp::If32),
    (".if64", PseudoOp::If64),
    (".ifarch", PseudoOp::IfArch),
    (".ifb", PseudoOp::IfB),
    (".ifc", PseudoOp::IfC),
    (".ifdef", PseudoOp::IfDef),
    (".ifeq", PseudoOp::IfEq),
    (".ifeqs", PseudoOp::IfEqs),
    (".iffmt", PseudoOp::IfFmt),
    (".ifge", PseudoOp::IfGe),
    (".ifgpu", PseudoOp::IfGpu),
    (".ifgt", PseudoOp::IfGt),
    (".ifle", PseudoOp::IfLe),
    (".iflt", PseudoOp::IfLt),
    (".ifnarch", PseudoOp::IfNArch),
    (".ifnb", PseudoOp::IfNb),
    (".ifnc", PseudoOp::IfNc),
    (".ifndef", PseudoOp::IfNDef),
    (".ifne", PseudoOp::IfNe),
    (".ifnes", PseudoOp::IfNes),
    (".ifnfmt", PseudoOp::IfNFmt),
    (".ifngpu", PseudoOp::IfNGpu),
    (".ifnotdef", PseudoOp::IfNotDef),
    (".incbin", PseudoOp::IncBin),
    (".include", PseudoOp::Include),
    (".int", PseudoOp::Int),
    (".irp", PseudoOp::Irp),
    (".irpc", PseudoOp::Irpc),
    (".kcode", PseudoOp::KCode),
    (".kcodeend", PseudoOp::KCodeEnd),
    (".kernel", PseudoOp::Kernel),
    (".local", PseudoOp::Local),
    (".long", PseudoOp::Long),
    (".macro", PseudoOp::Macro),
    (".macrocase", PseudoOp::MacroCase),
    (".main", PseudoOp::Main),
    (".noaltmacro", PseudoOp::NoAltMacro),
    (".nobuggyfplit", PseudoOp::NoBuggyFpLit),
    (".nomacrocase", PseudoOp::NoMacroCase),
    (".nooldmodparam", PseudoOp::NoOldModParam),
    (".octa", PseudoOp::Octa),
    (".offset", PseudoOp::Offset),
    (".oldmodparam", PseudoOp::OldModParam),
    (".org", PseudoOp::Org),
    (".p2align", PseudoOp::P2Align),
    (".print", PseudoOp::Print),
    (".purgem", PseudoOp::PurgeM),
    (".quad", PseudoOp::Quad),
    (".regvar", PseudoOp::RegVar),
    (".rept", PseudoOp::Rept),
    (".rodata", PseudoOp::RoData),
    (".rvlin", PseudoOp::Rvlin),
    (".rvlin_once", PseudoOp::RvlinOnce),
    (".scope", PseudoOp::Scope),
    (".section", PseudoOp::Section),
    (".set", PseudoOp::Set),
    (".short", PseudoOp::Short),
    (".size", PseudoOp::Size),
    (".skip", PseudoOp::Skip),
    (".space", PseudoOp::Space),
    (".string", PseudoOp::String),
    (".string16", PseudoOp::String16),
    (".string32", PseudoOp::String32),
    (".string64", PseudoOp::String64),
    (".struct", PseudoOp::Struct),
    (".text", PseudoOp::Text),
    (".undef", PseudoOp::Undef),
    (".unusing", PseudoOp::Unusing),
    (".usereg", PseudoOp::UseReg),
    (".using", PseudoOp::Using),
    (".warning", PseudoOp::Warning),
    (".weak", PseudoOp::Weak),
    (".while", PseudoOp::While),
    (".word", PseudoOp::Word),
];

/// Resolve a pseudo-op name (with leading dot).
pub fn find_pseudo_op(name: &str) -> Option<PseudoOp> {
    let idx = PSEUDO_OP_NAMES.partition_point(|(n, _)| *n < name);
    match PSEUDO_OP_NAMES.get(idx) {
        Some((n, op)) if *n == name => Some(*op),
        _ => None,
    }
}

/// Dispatch a statement whose first token is `name` (lower-cased).
pub fn dispatch(asm: &mut Assembler, name: &str, stmt_place: usize, pos: usize) {
    let op = match find_pseudo_op(name) {
        Some(op) => op,
        None => {
            asm.print_error(stmt_place, &format!("Unknown pseudo-op '{}'", name));
            return;
        }
    };
    let mut pos = pos;
    use PseudoOp::*;
    match op {
        Bit32 => set_bitness(asm, stmt_place, false),
        Bit64 => set_bitness(asm, stmt_place, true),
        Abort => {
            asm.print_error(stmt_place, "Aborted!");
            asm.end_of_assembly = true;
        }
        Align | Balign => data::do_align(asm, stmt_place, &mut pos, false),
        P2Align => data::do_align(asm, stmt_place, &mut pos, true),
        AltMacro => asm.alternate_macro = true,
        NoAltMacro => asm.alternate_macro = false,
        Arch | Gpu => set_gpu_device(asm, stmt_place, &mut pos, op == PseudoOp::Arch),
        Ascii => data::put_strings(asm, stmt_place, &mut pos, false),
        Asciz | String => data::put_strings(asm, stmt_place, &mut pos, true),
        String16 => data::put_strings_to_ints(asm, stmt_place, &mut pos, 2),
        String32 => data::put_strings_to_ints(asm, stmt_place, &mut pos, 4),
        String64 => data::put_strings_to_ints(asm, stmt_place, &mut pos, 8),
        BuggyFpLit => asm.buggy_fp_lit = true,
        NoBuggyFpLit => asm.buggy_fp_lit = false,
        MacroCase => asm.macro_case = true,
        NoMacroCase => asm.macro_case = false,
        OldModParam => asm.old_mod_param = true,
        NoOldModParam => asm.old_mod_param = false,
        Byte => data::put_integers(asm, stmt_place, &mut pos, 1),
        Short | HWord => data::put_integers(asm, stmt_place, &mut pos, 2),
        Int | Long | Word => data::put_integers(asm, stmt_place, &mut pos, 4),
        Quad => data::put_integers(asm, stmt_place, &mut pos, 8),
        Octa => data::put_uint128s(asm, stmt_place, &mut pos),
        Half => data::put_floats(asm, stmt_place, &mut pos, 2),
        Float => data::put_floats(asm, stmt_place, &mut pos, 4),
        Double => data::put_floats(asm, stmt_place, &mut pos, 8),
        CfCall => syms::add_code_flow(asm, stmt_place, &mut pos, gcn_isa::CodeFlowKind::Call),
        CfCjump => syms::add_code_flow(asm, stmt_place, &mut pos, gcn_isa::CodeFlowKind::CJump),
        CfEnd => syms::add_code_flow(asm, stmt_place, &mut pos, gcn_isa::CodeFlowKind::End),
        CfJump => syms::add_code_flow(asm, stmt_place, &mut pos, gcn_isa::CodeFlowKind::Jump),
        CfRet => syms::add_code_flow(asm, stmt_place, &mut pos, gcn_isa::CodeFlowKind::Return),
        CfStart => syms::add_code_flow(asm, stmt_place, &mut pos, gcn_isa::CodeFlowKind::Start),
        Data => switch_named_section(asm, stmt_place, ".data"),
        RoData => switch_named_section(asm, stmt_place, ".rodata"),
        Text => switch_named_section(asm, stmt_place, ".text"),
        Section => do_section(asm, stmt_place, &mut pos),
        Else => clauses::do_else(asm, stmt_place, &mut pos),
        ElseIf => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::NonZero, true),
        ElseIfEq => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::Equal, true),
        ElseIfNe => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::NotEqual, true),
        ElseIfGe => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::GreaterEqual, true),
        ElseIfGt => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::Greater, true),
        ElseIfLe => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::LessEqual, true),
        ElseIfLt => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::Less, true),
        ElseIfB => clauses::do_if_blank(asm, stmt_place, &mut pos, false, true),
        ElseIfNb => clauses::do_if_blank(asm, stmt_place, &mut pos, true, true),
        ElseIfC => clauses::do_if_cmp_str(asm, stmt_place, &mut pos, false, true),
        ElseIfNc => clauses::do_if_cmp_str(asm, stmt_place, &mut pos, true, true),
        ElseIfDef => clauses::do_if_def(asm, stmt_place, &mut pos, false, true),
        ElseIfNDef | ElseIfNotDef => clauses::do_if_def(asm, stmt_place, &mut pos, true, true),
        ElseIfEqs => clauses::do_if_str_equal(asm, stmt_place, &mut pos, false, true),
        ElseIfNes => clauses::do_if_str_equal(asm, stmt_place, &mut pos, true, true),
        ElseIf32 => clauses::do_if64_bit(asm, stmt_place, &mut pos, true, true),
        ElseIf64 => clauses::do_if64_bit(asm, stmt_place, &mut pos, false, true),
        ElseIfArch => clauses::do_if_arch(asm, stmt_place, &mut pos, false, true),
        ElseIfNArch => clauses::do_if_arch(asm, stmt_place, &mut pos, true, true),
        ElseIfGpu => clauses::do_if_gpu(asm, stmt_place, &mut pos, false, true),
        ElseIfNGpu => clauses::do_if_gpu(asm, stmt_place, &mut pos, true, true),
        ElseIfFmt => clauses::do_if_fmt(asm, stmt_place, &mut pos, false, true),
        ElseIfNFmt => clauses::do_if_fmt(asm, stmt_place, &mut pos, true, true),
        If => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::NonZero, false),
        IfEq => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::Equal, false),
        IfNe => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::NotEqual, false),
        IfGe => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::GreaterEqual, false),
        IfGt => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::Greater, false),
        IfLe => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::LessEqual, false),
        IfLt => clauses::do_if_int(asm, stmt_place, &mut pos, clauses::IfIntComp::Less, false),
        IfB => clauses::do_if_blank(asm, stmt_place, &mut pos, false, false),
        IfNb => clauses::do_if_blank(asm, stmt_place, &mut pos, true, false),
        IfC => clauses::do_if_cmp_str(asm, stmt_place, &mut pos, false, false),
        IfNc => clauses::do_if_cmp_str(asm, stmt_place, &mut pos, true, false),
        IfDef => clauses::do_if_def(asm, stmt_place, &mut pos, false, false),
        IfNDef | IfNotDef => clauses::do_if_def(asm, stmt_place, &mut pos, true, false),
        IfEqs => clauses::do_if_str_equal(asm, stmt_place, &mut pos, false, false),
        IfNes => clauses::do_if_str_equal(asm, stmt_place, &mut pos, true, false),
        If32 => clauses::do_if64_bit(asm, stmt_place, &mut pos, true, false),
        If64 => clauses::do_if64_bit(asm, stmt_place, &mut pos, false, false),
        IfArch => clauses::do_if_arch(asm, stmt_place, &mut pos, false, false),
        IfNArch => clauses::do_if_arch(asm, stmt_place, &mut pos, true, false),
        IfGpu => clauses::do_if_gpu(asm, stmt_place, &mut pos, false, false),
        IfNGpu => clauses::do_if_gpu(asm, stmt_place, &mut pos, true, false),
        IfFmt => clauses::do_if_fmt(asm, stmt_place, &mut pos, false, false),
        IfNFmt => clauses::do_if_fmt(asm, stmt_place, &mut pos, true, false),
        End => asm.end_of_assembly = true,
        EndIf => clauses::end_if(asm, stmt_place, &mut pos),
        EndM => {
            // macro bodies are consumed during collection; a reachable
            // '.endm' has no opener
            asm.pop_clause(stmt_place, ClauseKind::Macro);
        }
        EndR => {
            asm.pop_clause(stmt_place, ClauseKind::Repeat);
        }
        Ends | EndScope => clauses::close_scope(asm, stmt_place, &mut pos),
        Scope => clauses::open_scope(asm, stmt_place, &mut pos),
        Using => syms::start_using(asm, stmt_place, &mut pos),
        Unusing => syms::stop_using(asm, stmt_place, &mut pos),
        Enum => syms::do_enum(asm, stmt_place, &mut pos),
        Equ | Set => syms::set_symbol_op(asm, stmt_place, &mut pos, true, false),
        Equiv => syms::set_symbol_op(asm, stmt_place, &mut pos, false, false),
        Eqv => syms::set_symbol_op(asm, stmt_place, &mut pos, false, true),
        Err => asm.print_error(stmt_place, ".err encountered"),
        Error => do_error(asm, stmt_place, &mut pos),
        ExitM => clauses::do_exitm(asm, stmt_place),
        Extern => ignore_rest(asm, &mut pos),
        Fail => do_fail(asm, stmt_place, &mut pos),
        File => ignore_rest(asm, &mut pos),
        Fill => data::do_fill(asm, stmt_place, &mut pos, false),
        FillQ => data::do_fill(asm, stmt_place, &mut pos, true),
        For => clauses::do_for(asm, stmt_place, &mut pos, false),
        While => clauses::do_for(asm, stmt_place, &mut pos, true),
        Format => set_out_format(asm, stmt_place, &mut pos),
        Get64Bit => syms::get_predefined(asm, stmt_place, &mut pos, syms::Predefined::Bit64),
        GetArch => syms::get_predefined(asm, stmt_place, &mut pos, syms::Predefined::Arch),
        GetFormat => syms::get_predefined(asm, stmt_place, &mut pos, syms::Predefined::Format),
        GetGpu => syms::get_predefined(asm, stmt_place, &mut pos, syms::Predefined::Gpu),
        GetVersion => syms::get_predefined(asm, stmt_place, &mut pos, syms::Predefined::Version),
        Global => syms::set_symbol_bind(asm, &mut pos, crate::symbol::SymbolBind::Global),
        Local => syms::set_symbol_bind(asm, &mut pos, crate::symbol::SymbolBind::Local),
        Weak => syms::set_symbol_bind(asm, &mut pos, crate::symbol::SymbolBind::Weak),
        IncBin => do_incbin(asm, stmt_place, &mut pos),
        Include => do_include(asm, stmt_place, &mut pos),
        Irp => clauses::do_irp(asm, stmt_place, &mut pos, false),
        Irpc => clauses::do_irp(asm, stmt_place, &mut pos, true),
        Kernel => do_kernel(asm, stmt_place, &mut pos),
        KCode => do_kcode(asm, stmt_place, &mut pos, true),
        KCodeEnd => do_kcode(asm, stmt_place, &mut pos, false),
        Macro => clauses::do_macro(asm, stmt_place, &mut pos),
        Main => {
            crate::format::FormatHandler::switch_to_main(asm);
        }
        Offset | Struct | Org => do_organize(asm, stmt_place, &mut pos),
        Print => do_print(asm, stmt_place, &mut pos),
        PurgeM => clauses::do_purge_macro(asm, stmt_place, &mut pos),
        RegVar => syms::def_reg_var(asm, stmt_place, &mut pos),
        Rept => clauses::do_repeat(asm, stmt_place, &mut pos),
        Rvlin => syms::do_rvlin(asm, stmt_place, &mut pos, false),
        RvlinOnce => syms::do_rvlin(asm, stmt_place, &mut pos, true),
        Size => syms::ignore_symbol_and_expr(asm, &mut pos),
        Skip | Space => data::do_skip(asm, stmt_place, &mut pos),
        Undef => syms::undef_symbol(asm, stmt_place, &mut pos),
        UseReg => syms::do_use_reg(asm, stmt_place, &mut pos),
        Warning => do_warning(asm, stmt_place, &mut pos),
    }
}

// ---- argument helpers (shared by the submodules) ----

/// Error unless only spaces remain.
pub fn check_garbages_at_end(asm: &mut Assembler, pos: usize) -> bool {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let mut p = pos;
    skip_spaces(bytes, &mut p);
    if p != bytes.len() {
        asm.print_error(p, "Garbages at end of line");
        return false;
    }
    true
}

/// Parse an absolute expression argument resolved right away. With an
/// empty expression and `required == false`, yields `None` quietly.
pub fn get_absolute_value_arg(
    asm: &mut Assembler,
    pos: &mut usize,
    required: bool,
) -> Option<Option<u64>> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos == bytes.len() && !required {
        return Some(None);
    }
    let expr_place = *pos;
    let expr = asm.parse_expr(pos, false, true)?;
    if asm.exprs[expr].ops.is_empty() {
        if required {
            asm.print_error(expr_place, "Expected expression");
            return None;
        }
        return Some(None);
    }
    let (status, value, section) = asm.evaluate_expr_id(expr);
    if status != crate::error::TryStatus::Success {
        return None;
    }
    if section != ABS_SECTION {
        asm.print_error(expr_place, "Expression must be absolute!");
        return None;
    }
    Some(Some(value))
}

/// Parse any immediately resolvable value argument.
pub fn get_any_value_arg(asm: &mut Assembler, pos: &mut usize) -> Option<(u64, SectionId)> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    let expr_place = *pos;
    let expr = asm.parse_expr(pos, false, true)?;
    if asm.exprs[expr].ops.is_empty() {
        asm.print_error(expr_place, "Expected expression");
        return None;
    }
    let (status, value, section) = asm.evaluate_expr_id(expr);
    if status == crate::error::TryStatus::Success {
        Some((value, section))
    } else {
        None
    }
}

/// Parse a plain name argument.
pub fn get_name_arg(asm: &mut Assembler, pos: &mut usize, obj_name: &str) -> Option<String> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    match crate::parse_utils::extract_sym_name(bytes, pos, false) {
        Some(n) if !n.is_empty() => Some(n),
        _ => {
            asm.print_error(*pos, &format!("Expected {}", obj_name));
            None
        }
    }
}

/// Skip a comma if present; error when something else follows.
pub fn skip_comma(asm: &mut Assembler, pos: &mut usize) -> Option<bool> {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos == bytes.len() {
        return Some(false);
    }
    if bytes[*pos] != b',' {
        asm.print_error(*pos, "Expected ',' before next value");
        return None;
    }
    *pos += 1;
    skip_spaces(bytes, pos);
    Some(true)
}

/// Require a comma.
pub fn skip_required_comma(asm: &mut Assembler, pos: &mut usize) -> bool {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos == bytes.len() || bytes[*pos] != b',' {
        asm.print_error(*pos, "Expected ',' before argument");
        return false;
    }
    *pos += 1;
    true
}

// ---- small handlers kept here ----

fn set_bitness(asm: &mut Assembler, stmt_place: usize, bits64: bool) {
    if asm.format_initialized() {
        asm.print_error(stmt_place, "Bitness is already defined");
    } else {
        asm.config.bits64 = bits64;
    }
}

fn set_gpu_device(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, arch_only: bool) {
    let name = match get_name_arg(asm, pos, "GPU device name") {
        Some(n) => n,
        None => return,
    };
    if asm.format_initialized() {
        asm.print_error(stmt_place, "GPU device is already defined");
        return;
    }
    if arch_only {
        match gcn_types::GpuArchitecture::from_str(&name) {
            Ok(arch) => asm.arch = arch,
            Err(_) => asm.print_error(stmt_place, &format!("Unknown architecture '{}'", name)),
        }
    } else {
        match gcn_types::GpuDevice::from_str(&name) {
            Ok(device) => {
                asm.config.device = device;
                asm.arch = device.architecture();
            }
            Err(_) => asm.print_error(stmt_place, &format!("Unknown GPU device '{}'", name)),
        }
    }
    check_garbages_at_end(asm, *pos);
}

fn set_out_format(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let name = match get_name_arg(asm, pos, "output format type") {
        Some(n) => n,
        None => return,
    };
    if asm.format_initialized() {
        asm.print_error(stmt_place, "Output format type is already defined");
        return;
    }
    match crate::config::BinaryFormat::from_str(&name) {
        Ok(format) => {
            asm.config.format = format;
            asm.format_handler = crate::format::FormatHandler::new(format);
        }
        Err(_) => asm.print_error(stmt_place, &format!("Unknown output format '{}'", name)),
    }
    check_garbages_at_end(asm, *pos);
}

fn switch_named_section(asm: &mut Assembler, stmt_place: usize, name: &str) {
    asm.initialize_output_format();
    crate::format::FormatHandler::switch_section(asm, stmt_place, name);
}

fn do_section(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    asm.initialize_output_format();
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    // section names may carry dots; scan to space or comma
    let start = *pos;
    while *pos < bytes.len() && bytes[*pos] != b' ' && bytes[*pos] != b',' {
        *pos += 1;
    }
    if start == *pos {
        asm.print_error(start, "Expected section name");
        return;
    }
    let name = String::from_utf8_lossy(&bytes[start..*pos]).into_owned();
    // flags and type arguments are accepted and ignored for the
    // supported formats
    crate::format::FormatHandler::switch_section(asm, stmt_place, &name);
}

fn do_kernel(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    asm.initialize_output_format();
    let name = match get_name_arg(asm, pos, "kernel name") {
        Some(n) => n,
        None => return,
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    crate::format::FormatHandler::switch_to_kernel(asm, stmt_place, &name);
}

fn do_kcode(asm: &mut Assembler, stmt_place: usize, pos: &mut usize, open: bool) {
    asm.initialize_output_format();
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    let offset = asm
        .sections
        .iter()
        .find(|s| s.name == ".text")
        .map(|s| s.content.len())
        .unwrap_or(0);
    if open {
        loop {
            skip_spaces(bytes, pos);
            if *pos >= bytes.len() {
                break;
            }
            if bytes[*pos] == b'+' {
                // all kernels
                *pos += 1;
                for kernel in &mut asm.kernels {
                    kernel.open_code_region(offset);
                }
                continue;
            }
            let name = match get_name_arg(asm, pos, "kernel name") {
                Some(n) => n,
                None => return,
            };
            match asm.kernels.iter().position(|k| k.name == name) {
                Some(i) => asm.kernels[i].open_code_region(offset),
                None => {
                    asm.print_error(stmt_place, &format!("Kernel '{}' not found", name));
                    return;
                }
            }
            skip_spaces(bytes, pos);
            if *pos < bytes.len() && bytes[*pos] == b',' {
                *pos += 1;
            }
        }
    } else {
        for kernel in &mut asm.kernels {
            kernel.close_code_region(offset);
        }
    }
}

fn do_organize(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let (value, section_id) = match get_any_value_arg(asm, pos) {
        Some(v) => v,
        None => return,
    };
    let mut fill = 0u8;
    if let Some(true) = skip_comma(asm, pos) {
        match get_absolute_value_arg(asm, pos, true) {
            Some(Some(v)) => fill = v as u8,
            _ => return,
        }
    }
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    asm.assign_output_counter(stmt_place, value, section_id, fill);
}

fn do_include(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let filename = match asm.parse_string(pos) {
        Some(s) => s,
        None => return,
    };
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    asm.include_file(stmt_place, &filename);
}

fn do_incbin(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let filename = match asm.parse_string(pos) {
        Some(s) => s,
        None => return,
    };
    let mut offset = 0u64;
    let mut count: Option<u64> = None;
    if let Some(true) = skip_comma(asm, pos) {
        match get_absolute_value_arg(asm, pos, false) {
            Some(Some(v)) => offset = v,
            Some(None) => {}
            None => return,
        }
        if let Some(true) = skip_comma(asm, pos) {
            match get_absolute_value_arg(asm, pos, false) {
                Some(Some(v)) => count = Some(v),
                Some(None) => {}
                None => return,
            }
        }
    }
    if !check_garbages_at_end(asm, *pos) {
        return;
    }
    asm.initialize_output_format();
    if !asm.is_writeable_section() {
        asm.print_error(stmt_place, "Writing data into non-writeable section is illegal");
        return;
    }
    match std::fs::read(&filename) {
        Ok(data) => {
            let start = (offset as usize).min(data.len());
            let end = match count {
                Some(c) => (start + c as usize).min(data.len()),
                None => data.len(),
            };
            asm.put_data(&data[start..end]);
        }
        Err(e) => {
            asm.print_error(stmt_place, &format!("Can't open binary file '{}': {}", filename, e));
        }
    }
}

fn do_print(asm: &mut Assembler, _stmt_place: usize, pos: &mut usize) {
    if let Some(text) = asm.parse_string(pos) {
        if check_garbages_at_end(asm, *pos) {
            asm.messages.push(text);
        }
    }
}

fn do_error(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos < bytes.len() && bytes[*pos] == b'"' {
        if let Some(text) = asm.parse_string(pos) {
            asm.print_error(stmt_place, &text);
        }
    } else {
        asm.print_error(stmt_place, ".error directive invoked in source file");
    }
}

fn do_warning(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let line = asm.line.clone();
    let bytes = line.as_bytes();
    skip_spaces(bytes, pos);
    if *pos < bytes.len() && bytes[*pos] == b'"' {
        if let Some(text) = asm.parse_string(pos) {
            asm.print_warning(stmt_place, &text);
        }
    } else {
        asm.print_warning(stmt_place, ".warning directive invoked in source file");
    }
}

fn do_fail(asm: &mut Assembler, stmt_place: usize, pos: &mut usize) {
    let value = match get_absolute_value_arg(asm, pos, true) {
        Some(Some(v)) => v as i64,
        _ => return,
    };
    let message = format!(".fail {} encountered", value);
    if value >= 500 {
        asm.print_warning(stmt_place, &message);
    } else {
        asm.print_error(stmt_place, &message);
    }
}

fn ignore_rest(asm: &mut Assembler, pos: &mut usize) {
    let line = asm.line.clone();
    *pos = line.len();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_op_table_is_sorted() {
        assert!(PSEUDO_OP_NAMES.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn lookup_finds_exact_names_only() {
        assert_eq!(find_pseudo_op(".byte"), Some(PseudoOp::Byte));
        assert_eq!(find_pseudo_op(".bytes"), None);
        assert_eq!(find_pseudo_op(".if"), Some(PseudoOp::If));
        assert_eq!(find_pseudo_op(".ifx"), None);
    }
}
