//! GCN instruction encoding through the assembler.

mod common;

use common::{assemble, assert_message, words};

#[test]
fn scalar_alu_encodings() {
    let source = "s_add_u32 s0, s1, s2\ns_mov_b32 s5, s7\ns_endpgm\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(words(&binary), vec![0x8000_0201, 0xbe85_0307, 0xbf81_0000]);
}

#[test]
fn sop2_with_literal_source() {
    let (good, binary, messages) = assemble("s_add_u32 s0, 0x12345678, s2\n");
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    assert_eq!(w.len(), 2);
    assert_eq!(w[0] & 0xff, 255); // literal marker in src0
    assert_eq!(w[1], 0x1234_5678);
}

#[test]
fn inline_constants_avoid_literals() {
    let (good, binary, messages) = assemble("s_add_u32 s0, 5, s2\ns_add_u32 s0, -3, s2\n");
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    assert_eq!(w.len(), 2);
    assert_eq!(w[0] & 0xff, 128 + 5);
    assert_eq!(w[1] & 0xff, 195);
}

#[test]
fn float_inline_constants_avoid_literals() {
    let source = "v_add_f32 v1, 1.0, v2\nv_mul_f32 v3, -0.5, v4\nv_max_f32 v5, 4.0, v6\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    assert_eq!(w.len(), 3, "inline float constants emit no literal words");
    assert_eq!(w[0] & 0x1ff, 242); // 1.0
    assert_eq!(w[1] & 0x1ff, 241); // -0.5
    assert_eq!(w[2] & 0x1ff, 246); // 4.0
}

#[test]
fn non_inline_float_falls_back_to_a_literal() {
    let (good, binary, messages) = assemble("v_add_f32 v1, 1.5, v2\n");
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    assert_eq!(w.len(), 2);
    assert_eq!(w[0] & 0x1ff, 255); // literal marker in src0
    assert_eq!(w[1], 1.5f32.to_bits());
}

#[test]
fn sixty_four_bit_operands_use_register_pairs() {
    let (good, binary, messages) = assemble("s_mov_b64 s[2:3], s[4:5]\n");
    assert!(good, "{:?}", messages);
    let w = words(&binary)[0];
    assert_eq!((w >> 16) & 0x7f, 2);
    assert_eq!(w & 0xff, 4);
}

#[test]
fn mismatched_register_width_is_an_error() {
    let (good, _, messages) = assemble("s_mov_b64 s[2:4], s[4:5]\n");
    assert!(!good);
    assert_message(&messages, "Expected 2-register range");
}

#[test]
fn vector_alu_encodings() {
    let (good, binary, messages) = assemble("v_mov_b32 v1, v0\nv_add_f32 v2, v0, v1\n");
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    assert_eq!(w[0], 0x7e02_0300);
    // VOP2 v_add_f32: opcode 3, vdst 2, vsrc1 1, src0 = v0 (256)
    assert_eq!(w[1], 3 << 25 | 2 << 17 | 1 << 9 | 256);
}

#[test]
fn special_registers_in_scalar_operands() {
    let (good, binary, messages) = assemble("s_mov_b64 vcc, s[4:5]\n");
    assert!(good, "{:?}", messages);
    let w = words(&binary)[0];
    assert_eq!((w >> 16) & 0x7f, 106);
}

#[test]
fn branch_backward_encodes_negative_words() {
    let source = "lab:\ns_nop 0\ns_branch lab\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    // branch at offset 4, target 0: (0 - 8) / 4 = -2
    assert_eq!(w[1] & 0xffff, 0xfffe);
}

#[test]
fn branch_forward_patches_after_resolution() {
    let source = "s_branch done\ns_nop 0\ndone:\ns_endpgm\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    // branch at 0, target 8: (8 - 4) / 4 = 1
    assert_eq!(w[0] & 0xffff, 1);
}

#[test]
fn smrd_load_encoding() {
    let (good, binary, messages) = assemble("s_load_dword s4, s[0:1], 0x10\n");
    assert!(good, "{:?}", messages);
    let w = words(&binary)[0];
    assert_eq!(w >> 27, 0b11000);
    assert_eq!((w >> 15) & 0x7f, 4);
    assert_eq!(w & 0xff, 0x10);
    assert_eq!((w >> 8) & 1, 1); // immediate offset form
}

#[test]
fn ds_read_write_are_eight_bytes() {
    let (good, binary, messages) = assemble("ds_read_b32 v1, v2\nds_write_b32 v2, v3\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary.len(), 16);
    let w = words(&binary);
    assert_eq!(w[0] >> 26, 0b110110);
    assert_eq!((w[1] >> 24) & 0xff, 1); // vdst
    assert_eq!(w[1] & 0xff, 2); // addr
}

#[test]
fn unknown_instruction_is_an_error() {
    let (good, _, messages) = assemble("s_frobnicate s0, s1, s2\n");
    assert!(!good);
    assert_message(&messages, "Unknown instruction 's_frobnicate'");
}

#[test]
fn flat_requires_sea_islands_or_later() {
    let (good, _, messages) = assemble("flat_load_dword v0, v[2:3]\n");
    assert!(!good);
    assert_message(&messages, "Unknown instruction 'flat_load_dword'");

    use gcn_asm::prelude::*;
    let config = AsmConfig { device: GpuDevice::Bonaire, ..AsmConfig::default() };
    let (good, binary, messages) = common::assemble_with("flat_load_dword v0, v[2:3]\n", config);
    assert!(good, "{:?}", messages);
    assert_eq!(binary.len(), 8);
}

#[test]
fn garbage_after_operands_is_reported() {
    let (good, _, messages) = assemble("s_mov_b32 s0, s1 junk\n");
    assert!(!good);
    assert_message(&messages, "Garbages at end of line");
}
