//! Expression engine behavior through the data directives.

mod common;

use common::{assemble, assert_message, words};

#[test]
fn same_section_difference_resolves_forward() {
    let (good, binary, messages) = assemble(".long .L0 - .\n.L0:\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [4, 0, 0, 0]);
}

#[test]
fn division_by_zero_is_an_error() {
    let (good, _, messages) = assemble(".set x, 5/0\n");
    assert!(!good);
    assert_message(&messages, "Division by zero");
}

#[test]
fn shift_out_of_range_warns_and_yields_zero() {
    let (good, binary, messages) = assemble(".long 1 << 64\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0, 0, 0, 0]);
    assert_message(&messages, "Shift count out of range (between 0 and 63)");
}

#[test]
fn operator_priorities_follow_the_dialect() {
    // '/' is signed division; '*' binds tighter than '+'
    let (good, binary, messages) = assemble(".long 2+3*4\n.long 7/2\n.long 1+2==3\n");
    assert!(good, "{:?}", messages);
    assert_eq!(words(&binary), vec![14, 3, 0xffff_ffff]);
}

#[test]
fn unsigned_and_signed_division_differ() {
    // -6 / 2: signed -3; '//' unsigned divides the wrapped value
    let (good, binary, messages) = assemble(".long (0-6)/2\n.byte (0-8)//0x2000000000000000\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary[..4], (-3i32 as u32).to_le_bytes());
    assert_eq!(binary[4], 7);
}

#[test]
fn ternary_choice_and_comparisons() {
    let (good, binary, messages) = assemble(".byte 2<3 ? 0x11 : 0x22\n.byte 2>3 ? 0x11 : 0x22\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0x11, 0x22]);
}

#[test]
fn unsigned_comparison_operators() {
    // -1 is the largest unsigned value
    let (good, binary, messages) = assemble(".byte (0-1) >@ 1 ? 1 : 0\n.byte (0-1) > 1 ? 1 : 0\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 0]);
}

#[test]
fn forward_reference_chain_resolves_at_definition() {
    let (good, binary, messages) = assemble(".long a+b\n.set a, 5\n.set b, 7\n");
    assert!(good, "{:?}", messages);
    assert_eq!(words(&binary), vec![12]);
}

#[test]
fn unresolved_symbol_is_reported_at_the_end() {
    let (good, _, messages) = assemble(".long never_defined\n");
    assert!(!good);
    assert_message(&messages, "Unresolved symbol 'never_defined'");
}

#[test]
fn character_literals_and_radixes() {
    let (good, binary, messages) = assemble(".byte 'A', 0x2a, 0b101, 017\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0x41, 0x2a, 5, 15]);
}

#[test]
fn eqv_snapshot_sees_values_at_first_use() {
    let source = ".eqv e, a*2\n.set a, 5\n.long e\n.set a, 7\n.long e\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(words(&binary), vec![10, 14]);
}

#[test]
fn register_symbol_in_expression_is_rejected() {
    let (good, _, messages) = assemble("rng = %s[4:7]\n.long rng+1\n");
    assert!(!good);
    assert_message(&messages, "Expression have register symbol");
}

#[test]
fn parenthesised_subexpressions_nest() {
    let (good, binary, messages) = assemble(".long ((2+3)*(4+1)) % 7\n");
    assert!(good, "{:?}", messages);
    assert_eq!(words(&binary), vec![4]);
}
