//! Register allocation of `.regvar` virtual registers.

mod common;

use common::{assemble, assert_message, words};

#[test]
fn single_regvar_takes_a_free_scalar_register() {
    let source = "\
.regvar sx:s
s_mov_b32 sx, s1
s_add_u32 s2, sx, sx
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    // sx avoids s1 and s2; the lowest free register is s0
    assert_eq!((w[0] >> 16) & 0x7f, 0, "sx destination");
    assert_eq!(w[1] & 0xff, 0, "sx as src0");
    assert_eq!((w[1] >> 8) & 0xff, 0, "sx as src1");
    assert_eq!((w[1] >> 16) & 0x7f, 2, "hardware destination unchanged");
}

#[test]
fn interfering_regvars_take_distinct_registers() {
    let source = "\
.regvar a:s, b:s
s_mov_b32 a, 1
s_mov_b32 b, 2
s_add_u32 s10, a, b
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    let reg_a = (w[0] >> 16) & 0x7f;
    let reg_b = (w[1] >> 16) & 0x7f;
    assert_ne!(reg_a, reg_b, "live ranges overlap, registers must differ");
    // the add reads both through its source fields
    assert_eq!(w[2] & 0xff, reg_a);
    assert_eq!((w[2] >> 8) & 0xff, reg_b);
}

#[test]
fn non_overlapping_regvars_may_share_a_register() {
    let source = "\
.regvar a:s, b:s
s_mov_b32 a, 1
s_mov_b32 s10, a
s_mov_b32 b, 2
s_mov_b32 s11, b
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    let reg_a = (w[0] >> 16) & 0x7f;
    let reg_b = (w[2] >> 16) & 0x7f;
    assert_eq!(reg_a, reg_b, "disjoint live ranges reuse the color");
}

#[test]
fn multi_lane_regvar_gets_consecutive_registers() {
    let source = "\
.regvar pair:s:2
s_mov_b64 pair, s[4:5]
s_mov_b64 s[6:7], pair
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    let dst = (w[0] >> 16) & 0x7f;
    let src = w[1] & 0xff;
    assert_eq!(dst, src, "same physical base for both uses");
    assert_eq!(dst % 2, 0, "64-bit operands are even-aligned in the encoding");
}

#[test]
fn vector_regvars_allocate_in_the_vgpr_file() {
    let source = "\
.regvar vx:v
v_mov_b32 vx, v3
v_add_f32 v4, vx, v3
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    let dst = (w[0] >> 17) & 0xff;
    // src0 of the VOP2 add carries the VGPR-base offset
    let src0 = w[1] & 0x1ff;
    assert_eq!(u32::from(dst) + 256, src0, "same vgpr through both fields");
    assert_ne!(dst, 3, "must avoid the hardware v3");
    assert_ne!(dst, 4, "must avoid the hardware v4");
}

#[test]
fn branch_joined_paths_keep_one_register_per_value() {
    let source = "\
.regvar x:s
s_mov_b32 x, 1
s_cbranch_scc0 skip
s_mov_b32 x, 2
skip:
s_add_u32 s10, x, x
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    let def1 = (w[0] >> 16) & 0x7f;
    let def2 = (w[2] >> 16) & 0x7f;
    let use1 = w[3] & 0xff;
    assert_eq!(def1, def2, "both definitions merge at the join");
    assert_eq!(def1, use1, "the read sees the merged register");
}

#[test]
fn too_many_registers_is_a_fatal_error() {
    // 60 simultaneously-live register pairs exceed the SGPR file
    let mut source = String::new();
    for i in 0..60 {
        source.push_str(&format!(".regvar w{}:s:2\n", i));
    }
    for i in 0..60 {
        source.push_str(&format!("s_mov_b64 w{}, s[4:5]\n", i));
    }
    // keep all of them live until here
    for i in 0..60 {
        source.push_str(&format!("s_mov_b64 s[6:7], w{}\n", i));
    }
    source.push_str("s_endpgm\n");
    let mut asm = gcn_asm::prelude::Assembler::from_string(
        "many.s",
        source,
        gcn_asm::prelude::AsmConfig::default(),
    );
    let result = asm.assemble();
    assert!(matches!(result, Err(gcn_asm::prelude::AsmError::TooManyRegisters)));
    let _ = assert_message;
}
