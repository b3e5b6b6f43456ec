//! Instruction table for the GCN scalar/vector/memory encodings.

use bitflags::bitflags;

/// Architecture bit: Southern Islands (GCN 1.0).
pub const ARCH_GCN_1_0: u32 = 1;
/// Architecture bit: Sea Islands (GCN 1.1).
pub const ARCH_GCN_1_1: u32 = 2;
/// Architecture bit: Volcanic Islands (GCN 1.2).
pub const ARCH_GCN_1_2: u32 = 4;
/// Architecture bit: Vega (GCN 1.4).
pub const ARCH_GCN_1_4: u32 = 8;
/// All supported architectures.
pub const ARCH_ALL: u32 = ARCH_GCN_1_0 | ARCH_GCN_1_1 | ARCH_GCN_1_2 | ARCH_GCN_1_4;

const ARCH_GCN_1_1UP: u32 = ARCH_GCN_1_1 | ARCH_GCN_1_2 | ARCH_GCN_1_4;
const ARCH_GCN_1_01: u32 = ARCH_GCN_1_0 | ARCH_GCN_1_1;

/// Hardware encoding family an instruction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcnEncoding {
    /// Scalar two-operand ALU.
    Sop2,
    /// Scalar ALU with 16-bit immediate.
    Sopk,
    /// Scalar one-operand ALU.
    Sop1,
    /// Scalar compare.
    Sopc,
    /// Scalar program control (branches, waits).
    Sopp,
    /// Scalar memory read.
    Smrd,
    /// Vector two-operand ALU.
    Vop2,
    /// Vector one-operand ALU.
    Vop1,
    /// Vector compare.
    Vopc,
    /// Local data share.
    Ds,
    /// Untyped buffer memory.
    Mubuf,
    /// Flat address memory.
    Flat,
}

bitflags! {
    /// Operand-shape modifiers for a table row.
    pub struct InstrMode: u16 {
        /// Destination operand is a 64-bit register pair.
        const DST_64 = 1;
        /// First source operand is a 64-bit register pair.
        const SRC0_64 = 2;
        /// Second source operand is a 64-bit register pair.
        const SRC1_64 = 4;
        /// No destination operand (stores, compares to VCC/SCC).
        const NO_DST = 8;
        /// SOPK immediate is a jump-relative target.
        const IMM_REL = 16;
    }
}

/// All operands 32-bit.
pub const REG_ALL_32: InstrMode = InstrMode::empty();
/// All operands 64-bit.
pub const REG_ALL_64: InstrMode =
    InstrMode::from_bits_truncate(InstrMode::DST_64.bits() | InstrMode::SRC0_64.bits() | InstrMode::SRC1_64.bits());
/// 64-bit destination and first source, 32-bit second source.
pub const REG_DS0_64: InstrMode =
    InstrMode::from_bits_truncate(InstrMode::DST_64.bits() | InstrMode::SRC0_64.bits());
/// 64-bit destination only.
pub const REG_DST_64: InstrMode = InstrMode::DST_64;
/// 64-bit sources only (compares over pairs).
pub const REG_SRC_64: InstrMode =
    InstrMode::from_bits_truncate(InstrMode::SRC0_64.bits() | InstrMode::SRC1_64.bits());

/// One row of the instruction table.
#[derive(Debug, Clone, Copy)]
pub struct GcnInstruction {
    /// Encoding family.
    pub encoding: GcnEncoding,
    /// Lower-case mnemonic.
    pub mnemonic: &'static str,
    /// Operand-shape modifiers.
    pub mode: InstrMode,
    /// Opcode value inside the encoding.
    pub code: u16,
    /// Architectures the row is valid for.
    pub arch_mask: u32,
}

macro_rules! instr {
    ($enc:ident, $name:literal, $mode:expr, $code:literal, $arch:expr) => {
        GcnInstruction {
            encoding: GcnEncoding::$enc,
            mnemonic: $name,
            mode: $mode,
            code: $code,
            arch_mask: $arch,
        }
    };
}

/// Instruction rows, sorted by mnemonic for binary search. Rows sharing a
/// mnemonic are ordered by architecture mask; lookup filters by the
/// selected architecture.
static GCN_INSTR_TABLE: &[GcnInstruction] = &[
    instr!(Mubuf, "buffer_load_dword", REG_ALL_32, 12, ARCH_ALL),
    instr!(Mubuf, "buffer_load_dwordx2", REG_DST_64, 13, ARCH_ALL),
    instr!(Mubuf, "buffer_load_dwordx4", REG_DST_64, 14, ARCH_ALL),
    instr!(Mubuf, "buffer_load_sbyte", REG_ALL_32, 9, ARCH_ALL),
    instr!(Mubuf, "buffer_load_sshort", REG_ALL_32, 11, ARCH_ALL),
    instr!(Mubuf, "buffer_load_ubyte", REG_ALL_32, 8, ARCH_ALL),
    instr!(Mubuf, "buffer_load_ushort", REG_ALL_32, 10, ARCH_ALL),
    instr!(Mubuf, "buffer_store_byte", InstrMode::NO_DST, 24, ARCH_ALL),
    instr!(Mubuf, "buffer_store_dword", InstrMode::NO_DST, 28, ARCH_ALL),
    instr!(Mubuf, "buffer_store_dwordx2", InstrMode::NO_DST, 29, ARCH_ALL),
    instr!(Mubuf, "buffer_store_dwordx4", InstrMode::NO_DST, 30, ARCH_ALL),
    instr!(Mubuf, "buffer_store_short", InstrMode::NO_DST, 26, ARCH_ALL),
    instr!(Ds, "ds_add_u32", InstrMode::NO_DST, 0, ARCH_ALL),
    instr!(Ds, "ds_read_b32", REG_ALL_32, 54, ARCH_ALL),
    instr!(Ds, "ds_read_b64", REG_DST_64, 118, ARCH_ALL),
    instr!(Ds, "ds_sub_u32", InstrMode::NO_DST, 1, ARCH_ALL),
    instr!(Ds, "ds_write_b32", InstrMode::NO_DST, 13, ARCH_ALL),
    instr!(Ds, "ds_write_b64", InstrMode::NO_DST, 77, ARCH_ALL),
    instr!(Flat, "flat_load_dword", REG_ALL_32, 12, ARCH_GCN_1_1UP),
    instr!(Flat, "flat_load_dwordx2", REG_DST_64, 13, ARCH_GCN_1_1UP),
    instr!(Flat, "flat_load_dwordx4", REG_DST_64, 14, ARCH_GCN_1_1UP),
    instr!(Flat, "flat_load_sbyte", REG_ALL_32, 9, ARCH_GCN_1_1UP),
    instr!(Flat, "flat_load_ubyte", REG_ALL_32, 8, ARCH_GCN_1_1UP),
    instr!(Flat, "flat_store_byte", InstrMode::NO_DST, 24, ARCH_GCN_1_1UP),
    instr!(Flat, "flat_store_dword", InstrMode::NO_DST, 28, ARCH_GCN_1_1UP),
    instr!(Flat, "flat_store_dwordx2", InstrMode::NO_DST, 29, ARCH_GCN_1_1UP),
    instr!(Flat, "flat_store_dwordx4", InstrMode::NO_DST, 30, ARCH_GCN_1_1UP),
    instr!(Flat, "flat_store_short", InstrMode::NO_DST, 26, ARCH_GCN_1_1UP),
    instr!(Sop2, "s_absdiff_i32", REG_ALL_32, 44, ARCH_ALL),
    instr!(Sop2, "s_add_i32", REG_ALL_32, 2, ARCH_ALL),
    instr!(Sop2, "s_add_u32", REG_ALL_32, 0, ARCH_ALL),
    instr!(Sop2, "s_addc_u32", REG_ALL_32, 4, ARCH_ALL),
    instr!(Sopk, "s_addk_i32", REG_ALL_32, 15, ARCH_ALL),
    instr!(Sop2, "s_and_b32", REG_ALL_32, 14, ARCH_ALL),
    instr!(Sop2, "s_and_b64", REG_ALL_64, 15, ARCH_ALL),
    instr!(Sop2, "s_andn2_b32", REG_ALL_32, 20, ARCH_ALL),
    instr!(Sop2, "s_andn2_b64", REG_ALL_64, 21, ARCH_ALL),
    instr!(Sop2, "s_ashr_i32", REG_ALL_32, 34, ARCH_ALL),
    instr!(Sop2, "s_ashr_i64", REG_DS0_64, 35, ARCH_ALL),
    instr!(Sopp, "s_barrier", InstrMode::NO_DST, 10, ARCH_ALL),
    instr!(Sop2, "s_bfe_i32", REG_ALL_32, 40, ARCH_ALL),
    instr!(Sop2, "s_bfe_i64", REG_DST_64, 42, ARCH_ALL),
    instr!(Sop2, "s_bfe_u32", REG_ALL_32, 39, ARCH_ALL),
    instr!(Sop2, "s_bfe_u64", REG_DST_64, 41, ARCH_ALL),
    instr!(Sop2, "s_bfm_b32", REG_ALL_32, 36, ARCH_ALL),
    instr!(Sop2, "s_bfm_b64", REG_DST_64, 37, ARCH_ALL),
    instr!(Sopp, "s_branch", InstrMode::from_bits_truncate(InstrMode::NO_DST.bits() | InstrMode::IMM_REL.bits()), 2, ARCH_ALL),
    instr!(Sop1, "s_brev_b32", REG_ALL_32, 11, ARCH_ALL),
    instr!(Sop1, "s_brev_b64", REG_ALL_64, 12, ARCH_ALL),
    instr!(Smrd, "s_buffer_load_dword", REG_ALL_32, 8, ARCH_GCN_1_01),
    instr!(Smrd, "s_buffer_load_dwordx16", REG_DST_64, 12, ARCH_GCN_1_01),
    instr!(Smrd, "s_buffer_load_dwordx2", REG_DST_64, 9, ARCH_GCN_1_01),
    instr!(Smrd, "s_buffer_load_dwordx4", REG_DST_64, 10, ARCH_GCN_1_01),
    instr!(Smrd, "s_buffer_load_dwordx8", REG_DST_64, 11, ARCH_GCN_1_01),
    instr!(Sopp, "s_cbranch_execnz", InstrMode::from_bits_truncate(InstrMode::NO_DST.bits() | InstrMode::IMM_REL.bits()), 9, ARCH_ALL),
    instr!(Sopp, "s_cbranch_execz", InstrMode::from_bits_truncate(InstrMode::NO_DST.bits() | InstrMode::IMM_REL.bits()), 8, ARCH_ALL),
    instr!(Sopp, "s_cbranch_scc0", InstrMode::from_bits_truncate(InstrMode::NO_DST.bits() | InstrMode::IMM_REL.bits()), 4, ARCH_ALL),
    instr!(Sopp, "s_cbranch_scc1", InstrMode::from_bits_truncate(InstrMode::NO_DST.bits() | InstrMode::IMM_REL.bits()), 5, ARCH_ALL),
    instr!(Sopp, "s_cbranch_vccnz", InstrMode::from_bits_truncate(InstrMode::NO_DST.bits() | InstrMode::IMM_REL.bits()), 7, ARCH_ALL),
    instr!(Sopp, "s_cbranch_vccz", InstrMode::from_bits_truncate(InstrMode::NO_DST.bits() | InstrMode::IMM_REL.bits()), 6, ARCH_ALL),
    instr!(Sop1, "s_cmov_b32", REG_ALL_32, 5, ARCH_ALL),
    instr!(Sop1, "s_cmov_b64", REG_ALL_64, 6, ARCH_ALL),
    instr!(Sopk, "s_cmovk_i32", REG_ALL_32, 2, ARCH_ALL),
    instr!(Sopc, "s_cmp_eq_i32", InstrMode::NO_DST, 0, ARCH_ALL),
    instr!(Sopc, "s_cmp_eq_u32", InstrMode::NO_DST, 6, ARCH_ALL),
    instr!(Sopc, "s_cmp_ge_i32", InstrMode::NO_DST, 3, ARCH_ALL),
    instr!(Sopc, "s_cmp_ge_u32", InstrMode::NO_DST, 9, ARCH_ALL),
    instr!(Sopc, "s_cmp_gt_i32", InstrMode::NO_DST, 2, ARCH_ALL),
    instr!(Sopc, "s_cmp_gt_u32", InstrMode::NO_DST, 8, ARCH_ALL),
    instr!(Sopc, "s_cmp_le_i32", InstrMode::NO_DST, 5, ARCH_ALL),
    instr!(Sopc, "s_cmp_le_u32", InstrMode::NO_DST, 11, ARCH_ALL),
    instr!(Sopc, "s_cmp_lg_i32", InstrMode::NO_DST, 1, ARCH_ALL),
    instr!(Sopc, "s_cmp_lg_u32", InstrMode::NO_DST, 7, ARCH_ALL),
    instr!(Sopc, "s_cmp_lt_i32", InstrMode::NO_DST, 4, ARCH_ALL),
    instr!(Sopc, "s_cmp_lt_u32", InstrMode::NO_DST, 10, ARCH_ALL),
    instr!(Sopk, "s_cmpk_eq_i32", REG_ALL_32, 3, ARCH_ALL),
    instr!(Sopk, "s_cmpk_eq_u32", REG_ALL_32, 9, ARCH_ALL),
    instr!(Sopk, "s_cmpk_ge_i32", REG_ALL_32, 6, ARCH_ALL),
    instr!(Sopk, "s_cmpk_ge_u32", REG_ALL_32, 12, ARCH_ALL),
    instr!(Sopk, "s_cmpk_gt_i32", REG_ALL_32, 5, ARCH_ALL),
    instr!(Sopk, "s_cmpk_gt_u32", REG_ALL_32, 11, ARCH_ALL),
    instr!(Sopk, "s_cmpk_le_i32", REG_ALL_32, 8, ARCH_ALL),
    instr!(Sopk, "s_cmpk_le_u32", REG_ALL_32, 14, ARCH_ALL),
    instr!(Sopk, "s_cmpk_lg_i32", REG_ALL_32, 4, ARCH_ALL),
    instr!(Sopk, "s_cmpk_lg_u32", REG_ALL_32, 10, ARCH_ALL),
    instr!(Sopk, "s_cmpk_lt_i32", REG_ALL_32, 7, ARCH_ALL),
    instr!(Sopk, "s_cmpk_lt_u32", REG_ALL_32, 13, ARCH_ALL),
    instr!(Sop2, "s_cselect_b32", REG_ALL_32, 10, ARCH_ALL),
    instr!(Sop2, "s_cselect_b64", REG_ALL_64, 11, ARCH_ALL),
    instr!(Sopp, "s_endpgm", InstrMode::NO_DST, 1, ARCH_ALL),
    instr!(Sop1, "s_ff0_i32_b32", REG_ALL_32, 17, ARCH_ALL),
    instr!(Sop1, "s_ff1_i32_b32", REG_ALL_32, 19, ARCH_ALL),
    instr!(Sop1, "s_flbit_i32", REG_ALL_32, 23, ARCH_ALL),
    instr!(Sop1, "s_flbit_i32_b32", REG_ALL_32, 21, ARCH_ALL),
    instr!(Sop1, "s_getpc_b64", REG_DST_64, 31, ARCH_ALL),
    instr!(Smrd, "s_load_dword", REG_ALL_32, 0, ARCH_GCN_1_01),
    instr!(Smrd, "s_load_dwordx16", REG_DST_64, 4, ARCH_GCN_1_01),
    instr!(Smrd, "s_load_dwordx2", REG_DST_64, 1, ARCH_GCN_1_01),
    instr!(Smrd, "s_load_dwordx4", REG_DST_64, 2, ARCH_GCN_1_01),
    instr!(Smrd, "s_load_dwordx8", REG_DST_64, 3, ARCH_GCN_1_01),
    instr!(Sop2, "s_lshl_b32", REG_ALL_32, 30, ARCH_ALL),
    instr!(Sop2, "s_lshl_b64", REG_DS0_64, 31, ARCH_ALL),
    instr!(Sop2, "s_lshr_b32", REG_ALL_32, 32, ARCH_ALL),
    instr!(Sop2, "s_lshr_b64", REG_DS0_64, 33, ARCH_ALL),
    instr!(Sop2, "s_max_i32", REG_ALL_32, 8, ARCH_ALL),
    instr!(Sop2, "s_max_u32", REG_ALL_32, 9, ARCH_ALL),
    instr!(Sop2, "s_min_i32", REG_ALL_32, 6, ARCH_ALL),
    instr!(Sop2, "s_min_u32", REG_ALL_32, 7, ARCH_ALL),
    instr!(Sop1, "s_mov_b32", REG_ALL_32, 3, ARCH_ALL),
    instr!(Sop1, "s_mov_b64", REG_ALL_64, 4, ARCH_ALL),
    instr!(Sopk, "s_movk_i32", REG_ALL_32, 0, ARCH_ALL),
    instr!(Sop2, "s_mul_i32", REG_ALL_32, 38, ARCH_ALL),
    instr!(Sopk, "s_mulk_i32", REG_ALL_32, 16, ARCH_ALL),
    instr!(Sop2, "s_nand_b32", REG_ALL_32, 24, ARCH_ALL),
    instr!(Sop2, "s_nand_b64", REG_ALL_64, 25, ARCH_ALL),
    instr!(Sopp, "s_nop", InstrMode::NO_DST, 0, ARCH_ALL),
    instr!(Sop2, "s_nor_b32", REG_ALL_32, 26, ARCH_ALL),
    instr!(Sop2, "s_nor_b64", REG_ALL_64, 27, ARCH_ALL),
    instr!(Sop1, "s_not_b32", REG_ALL_32, 7, ARCH_ALL),
    instr!(Sop1, "s_not_b64", REG_ALL_64, 8, ARCH_ALL),
    instr!(Sop2, "s_or_b32", REG_ALL_32, 16, ARCH_ALL),
    instr!(Sop2, "s_or_b64", REG_ALL_64, 17, ARCH_ALL),
    instr!(Sop2, "s_orn2_b32", REG_ALL_32, 22, ARCH_ALL),
    instr!(Sop2, "s_orn2_b64", REG_ALL_64, 23, ARCH_ALL),
    instr!(Sop1, "s_setpc_b64", InstrMode::from_bits_truncate(InstrMode::NO_DST.bits() | InstrMode::SRC0_64.bits()), 32, ARCH_ALL),
    instr!(Sop1, "s_sext_i32_i16", REG_ALL_32, 26, ARCH_ALL),
    instr!(Sop1, "s_sext_i32_i8", REG_ALL_32, 25, ARCH_ALL),
    instr!(Sop2, "s_sub_i32", REG_ALL_32, 3, ARCH_ALL),
    instr!(Sop2, "s_sub_u32", REG_ALL_32, 1, ARCH_ALL),
    instr!(Sop2, "s_subb_u32", REG_ALL_32, 5, ARCH_ALL),
    instr!(Sop1, "s_swappc_b64", REG_ALL_64, 33, ARCH_ALL),
    instr!(Sopp, "s_waitcnt", InstrMode::NO_DST, 12, ARCH_ALL),
    instr!(Sop2, "s_xnor_b32", REG_ALL_32, 28, ARCH_ALL),
    instr!(Sop2, "s_xnor_b64", REG_ALL_64, 29, ARCH_ALL),
    instr!(Sop2, "s_xor_b32", REG_ALL_32, 18, ARCH_ALL),
    instr!(Sop2, "s_xor_b64", REG_ALL_64, 19, ARCH_ALL),
    instr!(Vop2, "v_add_f32", REG_ALL_32, 3, ARCH_ALL),
    instr!(Vop2, "v_add_i32", REG_ALL_32, 37, ARCH_GCN_1_01),
    instr!(Vop2, "v_addc_u32", REG_ALL_32, 40, ARCH_GCN_1_01),
    instr!(Vop2, "v_and_b32", REG_ALL_32, 27, ARCH_ALL),
    instr!(Vop2, "v_ashrrev_i32", REG_ALL_32, 24, ARCH_ALL),
    instr!(Vop1, "v_ceil_f32", REG_ALL_32, 34, ARCH_ALL),
    instr!(Vopc, "v_cmp_eq_f32", InstrMode::NO_DST, 2, ARCH_ALL),
    instr!(Vopc, "v_cmp_eq_i32", InstrMode::NO_DST, 0x82, ARCH_ALL),
    instr!(Vopc, "v_cmp_eq_u32", InstrMode::NO_DST, 0xc2, ARCH_ALL),
    instr!(Vopc, "v_cmp_ge_f32", InstrMode::NO_DST, 6, ARCH_ALL),
    instr!(Vopc, "v_cmp_ge_i32", InstrMode::NO_DST, 0x86, ARCH_ALL),
    instr!(Vopc, "v_cmp_gt_f32", InstrMode::NO_DST, 4, ARCH_ALL),
    instr!(Vopc, "v_cmp_gt_i32", InstrMode::NO_DST, 0x84, ARCH_ALL),
    instr!(Vopc, "v_cmp_gt_u32", InstrMode::NO_DST, 0xc4, ARCH_ALL),
    instr!(Vopc, "v_cmp_le_f32", InstrMode::NO_DST, 3, ARCH_ALL),
    instr!(Vopc, "v_cmp_lt_f32", InstrMode::NO_DST, 1, ARCH_ALL),
    instr!(Vopc, "v_cmp_lt_i32", InstrMode::NO_DST, 0x81, ARCH_ALL),
    instr!(Vopc, "v_cmp_lt_u32", InstrMode::NO_DST, 0xc1, ARCH_ALL),
    instr!(Vopc, "v_cmp_ne_i32", InstrMode::NO_DST, 0x85, ARCH_ALL),
    instr!(Vopc, "v_cmp_ne_u32", InstrMode::NO_DST, 0xc5, ARCH_ALL),
    instr!(Vop2, "v_cndmask_b32", REG_ALL_32, 0, ARCH_ALL),
    instr!(Vop1, "v_cvt_f32_i32", REG_ALL_32, 5, ARCH_ALL),
    instr!(Vop1, "v_cvt_f32_u32", REG_ALL_32, 6, ARCH_ALL),
    instr!(Vop1, "v_cvt_i32_f32", REG_ALL_32, 8, ARCH_ALL),
    instr!(Vop1, "v_cvt_u32_f32", REG_ALL_32, 7, ARCH_ALL),
    instr!(Vop1, "v_exp_f32", REG_ALL_32, 37, ARCH_ALL),
    instr!(Vop1, "v_floor_f32", REG_ALL_32, 36, ARCH_ALL),
    instr!(Vop1, "v_fract_f32", REG_ALL_32, 32, ARCH_ALL),
    instr!(Vop1, "v_log_f32", REG_ALL_32, 39, ARCH_ALL),
    instr!(Vop2, "v_lshlrev_b32", REG_ALL_32, 26, ARCH_ALL),
    instr!(Vop2, "v_lshrrev_b32", REG_ALL_32, 22, ARCH_ALL),
    instr!(Vop2, "v_mac_f32", REG_ALL_32, 31, ARCH_ALL),
    instr!(Vop2, "v_max_f32", REG_ALL_32, 16, ARCH_ALL),
    instr!(Vop2, "v_min_f32", REG_ALL_32, 15, ARCH_ALL),
    instr!(Vop1, "v_mov_b32", REG_ALL_32, 1, ARCH_ALL),
    instr!(Vop2, "v_mul_f32", REG_ALL_32, 8, ARCH_ALL),
    instr!(Vop2, "v_mul_i32_i24", REG_ALL_32, 9, ARCH_ALL),
    instr!(Vop1, "v_nop", InstrMode::NO_DST, 0, ARCH_ALL),
    instr!(Vop1, "v_not_b32", REG_ALL_32, 43, ARCH_ALL),
    instr!(Vop2, "v_or_b32", REG_ALL_32, 28, ARCH_ALL),
    instr!(Vop1, "v_rcp_f32", REG_ALL_32, 42, ARCH_ALL),
    instr!(Vop1, "v_readfirstlane_b32", REG_ALL_32, 2, ARCH_ALL),
    instr!(Vop2, "v_sub_f32", REG_ALL_32, 4, ARCH_ALL),
    instr!(Vop2, "v_sub_i32", REG_ALL_32, 38, ARCH_GCN_1_01),
    instr!(Vop2, "v_subrev_f32", REG_ALL_32, 5, ARCH_ALL),
    instr!(Vop2, "v_subrev_i32", REG_ALL_32, 39, ARCH_GCN_1_01),
    instr!(Vop1, "v_trunc_f32", REG_ALL_32, 33, ARCH_ALL),
    instr!(Vop2, "v_xor_b32", REG_ALL_32, 29, ARCH_ALL),
];

/// Look up the row for `mnemonic` valid on the architectures in
/// `arch_mask`. Mnemonics are matched exactly (callers lower-case first).
pub fn find_instruction(mnemonic: &str, arch_mask: u32) -> Option<&'static GcnInstruction> {
    let first = GCN_INSTR_TABLE.partition_point(|ins| ins.mnemonic < mnemonic);
    GCN_INSTR_TABLE[first..]
        .iter()
        .take_while(|ins| ins.mnemonic == mnemonic)
        .find(|ins| ins.arch_mask & arch_mask != 0)
}

/// All rows valid for `arch_mask`, in mnemonic order.
pub fn instructions_for_arch(arch_mask: u32) -> impl Iterator<Item = &'static GcnInstruction> {
    GCN_INSTR_TABLE.iter().filter(move |ins| ins.arch_mask & arch_mask != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted_by_mnemonic() {
        assert!(GCN_INSTR_TABLE.windows(2).all(|w| w[0].mnemonic <= w[1].mnemonic));
    }

    #[test]
    fn lookup_filters_by_architecture() {
        let ins = find_instruction("s_add_u32", ARCH_GCN_1_0).unwrap();
        assert_eq!(ins.code, 0);
        assert_eq!(ins.encoding, GcnEncoding::Sop2);
        // FLAT does not exist on Southern Islands
        assert!(find_instruction("flat_load_dword", ARCH_GCN_1_0).is_none());
        assert!(find_instruction("flat_load_dword", ARCH_GCN_1_1).is_some());
    }

    #[test]
    fn unknown_mnemonic_is_none() {
        assert!(find_instruction("s_frobnicate_b32", ARCH_ALL).is_none());
    }
}
