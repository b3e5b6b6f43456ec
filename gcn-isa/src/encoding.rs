//! Bit-level instruction encoders and field patching.
//!
//! The encoders build little-endian instruction words from already
//! numeric operand values; the field table below lets the register
//! allocator rewrite a register field of an encoded instruction in
//! place once physical registers are assigned.

use crate::delayed::{WaitConfig, MAX_WAIT_QUEUES};
use gcn_types::bytes;

/// Source-operand field value that selects a trailing 32-bit literal.
pub const SRC_LITERAL: u16 = 255;
/// First VGPR value in the shared 9-bit source field.
pub const SRC_VGPR_BASE: u16 = 256;

/// A patchable register field of an encoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcnField {
    /// SOP2 destination.
    Sop2Sdst,
    /// SOP2 first source.
    Sop2Src0,
    /// SOP2 second source.
    Sop2Src1,
    /// SOPK destination.
    SopkSdst,
    /// SOP1 destination.
    Sop1Sdst,
    /// SOP1 source.
    Sop1Src0,
    /// SOPC first source.
    SopcSrc0,
    /// SOPC second source.
    SopcSrc1,
    /// SMRD destination.
    SmrdSdst,
    /// SMRD base register pair.
    SmrdSbase,
    /// SMRD register offset.
    SmrdSoffset,
    /// VOP2/VOP1 destination.
    VopVdst,
    /// VOP2/VOP1/VOPC shared 9-bit source 0.
    VopSrc0,
    /// VOP2 vector source 1.
    Vop2Vsrc1,
    /// VOPC vector source 1.
    VopcVsrc1,
    /// DS address register.
    DsAddr,
    /// DS first data register.
    DsData0,
    /// DS second data register.
    DsData1,
    /// DS destination register.
    DsVdst,
    /// MUBUF data register(s).
    MubufVdata,
    /// MUBUF address register(s).
    MubufVaddr,
    /// MUBUF resource descriptor (4 SGPRs).
    MubufSrsrc,
    /// MUBUF scalar offset.
    MubufSoffset,
    /// FLAT address pair.
    FlatAddr,
    /// FLAT store data.
    FlatData,
    /// FLAT load destination.
    FlatVdst,
}

impl GcnField {
    /// `(byte offset of the containing word, bit position, width)`.
    fn placement(self) -> (usize, u32, u32) {
        use GcnField::*;
        match self {
            Sop2Sdst => (0, 16, 7),
            Sop2Src0 => (0, 0, 8),
            Sop2Src1 => (0, 8, 8),
            SopkSdst => (0, 16, 7),
            Sop1Sdst => (0, 16, 7),
            Sop1Src0 => (0, 0, 8),
            SopcSrc0 => (0, 0, 8),
            SopcSrc1 => (0, 8, 8),
            SmrdSdst => (0, 15, 7),
            SmrdSbase => (0, 9, 6),
            SmrdSoffset => (0, 0, 8),
            VopVdst => (0, 17, 8),
            VopSrc0 => (0, 0, 9),
            Vop2Vsrc1 => (0, 9, 8),
            VopcVsrc1 => (0, 9, 8),
            DsAddr => (4, 0, 8),
            DsData0 => (4, 8, 8),
            DsData1 => (4, 16, 8),
            DsVdst => (4, 24, 8),
            MubufVaddr => (4, 0, 8),
            MubufVdata => (4, 8, 8),
            MubufSrsrc => (4, 16, 5),
            MubufSoffset => (4, 24, 8),
            FlatAddr => (4, 0, 8),
            FlatData => (4, 8, 8),
            FlatVdst => (4, 24, 8),
        }
    }
}

/// Rewrite `field` of the instruction starting at `offset` with `value`.
///
/// `value` is the raw field encoding (an SGPR code, a 9-bit source value,
/// or a plain VGPR index, whichever the field takes).
pub fn patch_reg_field(code: &mut [u8], offset: usize, field: GcnField, value: u16) {
    let (word_off, pos, width) = field.placement();
    let mask = ((1u32 << width) - 1) << pos;
    let mut word = bytes::read_u32(code, offset + word_off);
    word = (word & !mask) | ((u32::from(value) << pos) & mask);
    bytes::write_u32(code, offset + word_off, word);
}

/// Byte length of the instruction starting at `offset` in `code`.
///
/// Literal-carrying scalar and vector ALU forms are 8 bytes; the memory
/// encodings are fixed 8-byte forms; everything else is 4 bytes.
pub fn instruction_size(code: &[u8], offset: usize) -> usize {
    let word = bytes::read_u32(code, offset);
    let top2 = word >> 30;
    if top2 == 0b10 {
        // scalar family
        let enc9 = word >> 23;
        if enc9 == 0b101111101 {
            // SOP1
            let src0 = word & 0xff;
            return if src0 as u16 == SRC_LITERAL { 8 } else { 4 };
        }
        if enc9 == 0b101111110 {
            // SOPC
            let src0 = word & 0xff;
            let src1 = (word >> 8) & 0xff;
            return if src0 as u16 == SRC_LITERAL || src1 as u16 == SRC_LITERAL { 8 } else { 4 };
        }
        if enc9 == 0b101111111 {
            return 4; // SOPP
        }
        if (word >> 28) == 0b1011 {
            return 4; // SOPK
        }
        // SOP2
        let src0 = word & 0xff;
        let src1 = (word >> 8) & 0xff;
        return if src0 as u16 == SRC_LITERAL || src1 as u16 == SRC_LITERAL { 8 } else { 4 };
    }
    if (word >> 27) == 0b11000 {
        return 4; // SMRD
    }
    if (word >> 26) == 0b110110 || (word >> 26) == 0b111000 || (word >> 26) == 0b110111 {
        return 8; // DS / MUBUF / FLAT
    }
    if (top2 & 0b10) == 0 {
        // vector family: VOP1/VOPC/VOP2 with shared 9-bit src0
        let src0 = (word & 0x1ff) as u16;
        return if src0 == SRC_LITERAL { 8 } else { 4 };
    }
    4
}

/// Build a SOP2 word.
pub fn encode_sop2(code: u16, sdst: u16, ssrc0: u16, ssrc1: u16) -> u32 {
    0b10 << 30 | u32::from(code) << 23 | u32::from(sdst) << 16 | u32::from(ssrc1) << 8 | u32::from(ssrc0)
}

/// Build a SOPK word.
pub fn encode_sopk(code: u16, sdst: u16, imm16: u16) -> u32 {
    0b1011 << 28 | u32::from(code) << 23 | u32::from(sdst) << 16 | u32::from(imm16)
}

/// Build a SOP1 word.
pub fn encode_sop1(code: u16, sdst: u16, ssrc0: u16) -> u32 {
    0b101111101 << 23 | u32::from(sdst) << 16 | u32::from(code) << 8 | u32::from(ssrc0)
}

/// Build a SOPC word.
pub fn encode_sopc(code: u16, ssrc0: u16, ssrc1: u16) -> u32 {
    0b101111110 << 23 | u32::from(code) << 16 | u32::from(ssrc1) << 8 | u32::from(ssrc0)
}

/// Build a SOPP word.
pub fn encode_sopp(code: u16, imm16: u16) -> u32 {
    0b101111111 << 23 | u32::from(code) << 16 | u32::from(imm16)
}

/// Build a SMRD word (GCN 1.0/1.1 form).
pub fn encode_smrd(code: u16, sdst: u16, sbase: u16, imm: bool, offset: u16) -> u32 {
    0b11000 << 27
        | u32::from(code) << 22
        | u32::from(sdst) << 15
        | u32::from(sbase) << 9
        | u32::from(imm) << 8
        | u32::from(offset & 0xff)
}

/// Build a VOP2 word.
pub fn encode_vop2(code: u16, vdst: u16, vsrc1: u16, src0: u16) -> u32 {
    u32::from(code) << 25 | u32::from(vdst) << 17 | u32::from(vsrc1) << 9 | u32::from(src0)
}

/// Build a VOP1 word.
pub fn encode_vop1(code: u16, vdst: u16, src0: u16) -> u32 {
    0b0111111 << 25 | u32::from(vdst) << 17 | u32::from(code) << 9 | u32::from(src0)
}

/// Build a VOPC word.
pub fn encode_vopc(code: u16, vsrc1: u16, src0: u16) -> u32 {
    0b0111110 << 25 | u32::from(code) << 17 | u32::from(vsrc1) << 9 | u32::from(src0)
}

/// Build the two DS words.
pub fn encode_ds(code: u16, offset0: u8, offset1: u8, gds: bool, addr: u16, data0: u16, data1: u16, vdst: u16) -> (u32, u32) {
    let w0 = 0b110110 << 26
        | u32::from(code) << 18
        | u32::from(gds) << 17
        | u32::from(offset1) << 8
        | u32::from(offset0);
    let w1 = u32::from(vdst) << 24 | u32::from(data1) << 16 | u32::from(data0) << 8 | u32::from(addr);
    (w0, w1)
}

/// Build the two MUBUF words.
#[allow(clippy::too_many_arguments)]
pub fn encode_mubuf(
    code: u16,
    offset12: u16,
    offen: bool,
    idxen: bool,
    glc: bool,
    vaddr: u16,
    vdata: u16,
    srsrc_quad: u16,
    soffset: u16,
) -> (u32, u32) {
    let w0 = 0b111000 << 26
        | u32::from(code) << 18
        | u32::from(glc) << 14
        | u32::from(idxen) << 13
        | u32::from(offen) << 12
        | u32::from(offset12 & 0xfff);
    let w1 = u32::from(soffset) << 24 | u32::from(srsrc_quad) << 16 | u32::from(vdata) << 8 | u32::from(vaddr);
    (w0, w1)
}

/// Build the two FLAT words.
pub fn encode_flat(code: u16, glc: bool, slc: bool, addr: u16, data: u16, vdst: u16) -> (u32, u32) {
    let w0 = 0b110111 << 26 | u32::from(code) << 18 | u32::from(slc) << 17 | u32::from(glc) << 16;
    let w1 = u32::from(vdst) << 24 | u32::from(data) << 8 | u32::from(addr);
    (w0, w1)
}

/// Encode per-queue wait counts into the `s_waitcnt` immediate.
///
/// Queue order matches [`crate::WaitQueueKind`]: `vmcnt` in bits 3:0,
/// `lgkmcnt` in bits 11:8, `expcnt` in bits 6:4. Counts are clamped to
/// each queue's maximum.
pub fn encode_waitcnt(config: &WaitConfig, waits: &[u16; MAX_WAIT_QUEUES]) -> u16 {
    let clamp = |q: usize| -> u16 { waits[q].min(config.queue_sizes[q].saturating_sub(1)) };
    clamp(0) | clamp(2) << 4 | clamp(1) << 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn sop2_layout() {
        // s_add_u32 s0, s1, s2
        let w = encode_sop2(0, 0, 1, 2);
        assert_eq!(w, 0x8000_0201);
    }

    #[test]
    fn sop1_layout() {
        // s_mov_b32 s5, s7
        let w = encode_sop1(3, 5, 7);
        assert_eq!(w >> 23, 0b101111101);
        assert_eq!((w >> 16) & 0x7f, 5);
        assert_eq!((w >> 8) & 0xff, 3);
        assert_eq!(w & 0xff, 7);
    }

    #[test]
    fn patch_rewrites_only_the_field() {
        let mut code = encode_sop2(0, 0, 1, 2).to_le_bytes().to_vec();
        patch_reg_field(&mut code, 0, GcnField::Sop2Sdst, 9);
        let w = u32::from_le_bytes(code[..4].try_into().unwrap());
        assert_eq!((w >> 16) & 0x7f, 9);
        assert_eq!(w & 0xff, 1);
        assert_eq!((w >> 8) & 0xff, 2);
        assert_eq!(w >> 23, 0b10 << 7);
    }

    #[rstest]
    #[case(encode_sop2(0, 0, SRC_LITERAL, 2), 8)]
    #[case(encode_sop2(0, 0, 1, 2), 4)]
    #[case(encode_sopp(1, 0), 4)]
    #[case(encode_vop1(1, 0, SRC_LITERAL), 8)]
    #[case(encode_vop2(3, 1, 2, 0x101), 4)]
    fn sizes(#[case] word: u32, #[case] size: usize) {
        let mut code = word.to_le_bytes().to_vec();
        code.extend_from_slice(&[0; 4]);
        assert_eq!(instruction_size(&code, 0), size);
    }

    #[test]
    fn ds_is_eight_bytes() {
        let (w0, w1) = encode_ds(54, 0, 0, false, 3, 0, 0, 4);
        let mut code = w0.to_le_bytes().to_vec();
        code.extend_from_slice(&w1.to_le_bytes());
        assert_eq!(instruction_size(&code, 0), 8);
    }

    #[test]
    fn waitcnt_encoding_clamps() {
        let cfg = WaitConfig::gcn();
        let imm = encode_waitcnt(&cfg, &[0, 15, 7, 0]);
        assert_eq!(imm & 0xf, 0);
        assert_eq!((imm >> 8) & 0xf, 15);
        assert_eq!((imm >> 4) & 0x7, 7);
        // counts beyond the counter maximum read as "no wait"
        let imm = encode_waitcnt(&cfg, &[100, 100, 100, 0]);
        assert_eq!(imm & 0xf, 15);
        assert_eq!((imm >> 4) & 0x7, 7);
    }
}
