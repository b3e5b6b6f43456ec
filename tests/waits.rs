//! Wait-state scheduling.

mod common;

use common::{assemble, words};

/// `s_waitcnt` opcode word with the given immediate.
fn waitcnt_word(imm: u16) -> u32 {
    0b101111111 << 23 | 12 << 16 | u32::from(imm)
}

#[test]
fn scalar_load_read_gets_lgkmcnt_zero() {
    let source = "\
s_load_dword s4, s[0:1], 0
s_add_u32 s5, s4, s4
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    assert_eq!(w.len(), 4, "one wait inserted");
    // vmcnt 15, expcnt 7, lgkmcnt 0
    assert_eq!(w[1], waitcnt_word(0x7f));
    // the add follows the wait
    assert_eq!(w[2] >> 30, 0b10);
}

#[test]
fn unrelated_instructions_get_no_wait() {
    let source = "\
s_load_dword s4, s[0:1], 0
s_add_u32 s5, s6, s7
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(words(&binary).len(), 3, "no wait needed");
}

#[test]
fn vector_load_read_waits_on_vmcnt() {
    let source = "\
buffer_load_dword v1, v0, s[4:7], 0
v_add_f32 v2, v1, v3
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    // 8-byte MUBUF + wait + add + endpgm
    assert_eq!(w.len(), 5);
    // vmcnt 0, expcnt 7, lgkmcnt 15
    assert_eq!(w[2], waitcnt_word(0xf70));
}

#[test]
fn two_ordered_loads_allow_vmcnt_one_for_the_first_result() {
    let source = "\
buffer_load_dword v1, v0, s[4:7], 0
buffer_load_dword v2, v0, s[4:7], 0
v_add_f32 v3, v1, v4
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    assert_eq!(w.len(), 7);
    // v1 completes once the younger load may still be outstanding
    assert_eq!(w[4], waitcnt_word(0xf71));
}

#[test]
fn user_waitcnt_is_respected_not_duplicated() {
    let source = "\
s_load_dword s4, s[0:1], 0
s_waitcnt lgkmcnt(0)
s_add_u32 s5, s4, s4
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    assert_eq!(w.len(), 4, "no extra wait beyond the user one");
    assert_eq!(w[1], waitcnt_word(0x7f));
}

#[test]
fn store_data_read_back_waits() {
    let source = "\
buffer_store_dword v1, v0, s[4:7], 0
v_mov_b32 v1, v2
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    // overwriting the store's data register waits for the store
    assert_eq!(w.len(), 5);
    assert_eq!(w[2], waitcnt_word(0xf70));
}

#[test]
fn waits_propagate_across_the_block_join() {
    let source = "\
s_load_dword s4, s[0:1], 0
s_cbranch_scc0 other
s_nop 0
other:
s_add_u32 s5, s4, s4
s_endpgm
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    let w = words(&binary);
    // load, cbranch, nop, wait, add, endpgm
    assert_eq!(w.len(), 6);
    assert_eq!(w[3], waitcnt_word(0x7f));
    // the branch now lands on the inserted wait so the dependent add
    // still observes it
    let imm = w[1] & 0xffff;
    assert_eq!(imm, 1, "branch target rebased onto the wait");
}
