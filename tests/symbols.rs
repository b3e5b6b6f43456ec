//! Symbols, labels, scopes.

mod common;

use common::{assemble, assert_message, words};

#[test]
fn labels_take_output_offsets() {
    let (good, binary, messages) = assemble(".byte 1, 2\nhere:\n.long here\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 2, 2, 0, 0, 0]);
}

#[test]
fn duplicate_label_is_an_error() {
    let (good, _, messages) = assemble("l:\n.byte 0\nl:\n");
    assert!(!good);
    assert_message(&messages, "Symbol 'l' is already defined");
}

#[test]
fn set_allows_reassignment_equiv_does_not() {
    let (good, binary, messages) = assemble(".set v, 1\n.set v, 2\n.byte v\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [2]);

    let (good, _, messages) = assemble(".equiv w, 1\n.equiv w, 2\n");
    assert!(!good);
    assert_message(&messages, "Symbol 'w' is already defined");
}

#[test]
fn plain_assignment_statement() {
    let (good, binary, messages) = assemble("v = 3+4\n.byte v\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [7]);
}

#[test]
fn local_numeric_labels_resolve_directionally() {
    let source = "1: .long 1b\n   .long 1f\n1: .long 1b\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(words(&binary), vec![0, 8, 8]);
}

#[test]
fn undefined_backward_local_label_is_an_error() {
    let (good, _, messages) = assemble(".long 2b\n");
    assert!(!good);
    assert_message(&messages, "Undefined previous local label '2'");
}

#[test]
fn named_scopes_qualify_symbols() {
    let source = ".scope ns\n.set v, 42\n.ends\n.byte ns::v\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [42]);
}

#[test]
fn using_imports_scope_symbols() {
    let source = ".scope a\n.set x, 7\n.ends\n.using a\n.byte x\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [7]);
}

#[test]
fn unusing_removes_the_import() {
    let source = ".scope a\n.set x, 7\n.ends\n.using a\n.unusing a\n.byte x\n";
    let (good, _, messages) = assemble(source);
    assert!(!good);
    assert_message(&messages, "Unresolved symbol 'x'");
}

#[test]
fn nested_scopes_walk_outward() {
    let source = ".set outer_v, 9\n.scope inner\n.byte outer_v\n.ends\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [9]);
}

#[test]
fn undef_forgets_a_symbol() {
    let source = ".set t, 1\n.undef t\n.byte t\n";
    let (good, _, messages) = assemble(source);
    assert!(!good);
    assert_message(&messages, "Unresolved symbol 't'");
}

#[test]
fn dot_reads_the_output_counter() {
    let (good, binary, messages) = assemble(".byte 1, 2, 3\n.byte .\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 2, 3, 3]);
}

#[test]
fn defsyms_seed_the_global_scope() {
    use gcn_asm::prelude::*;
    let config = AsmConfig { def_syms: vec![("seed".into(), 0x2a)], ..AsmConfig::default() };
    let (good, binary, messages) = common::assemble_with(".byte seed\n", config);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0x2a]);
}

#[test]
fn enum_assigns_sequential_values() {
    let (good, binary, messages) = assemble(".enum zero, one, two\n.byte zero, one, two\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0, 1, 2]);
}

#[test]
fn print_appends_message() {
    let (good, _, messages) = assemble(".print \"hello from source\"\n");
    assert!(good, "{:?}", messages);
    assert_message(&messages, "hello from source");
}

#[test]
fn error_directive_fails_assembly() {
    let (good, _, messages) = assemble(".error \"bad configuration\"\n");
    assert!(!good);
    assert_message(&messages, "bad configuration");
}
