//! Macros, repetitions, IRP and FOR loops, conditionals.

mod common;

use common::{assemble, assert_message, words};

#[test]
fn macro_with_vararg_reparses_comma_list() {
    let source = "\
.macro m a, b:vararg
    .long \\a
    .long \\b
.endm
m 1, 2, 3, 4
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(words(&binary), vec![1, 2, 3, 4]);
}

#[test]
fn macro_default_values_apply_when_omitted() {
    let source = "\
.macro put x=0x55
    .byte \\x
.endm
put
put 0x66
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0x55, 0x66]);
}

#[test]
fn macro_required_argument_reports_missing_value() {
    let source = ".macro need v:req\n.byte \\v\n.endm\nneed\n";
    let (good, _, messages) = assemble(source);
    assert!(!good);
    assert_message(&messages, "Value required for macro argument 'v'");
}

#[test]
fn macro_invocation_counter_expands() {
    let source = "\
.macro tag
    .byte 10+\\@
.endm
tag
tag
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [10, 11]);
}

#[test]
fn nested_macro_definitions_collect() {
    let source = "\
.macro outer
.macro inner
    .byte 7
.endm
.endm
outer
inner
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [7]);
}

#[test]
fn rept_replays_content() {
    let (good, binary, messages) = assemble(".rept 3\n.byte 0xAA\n.endr\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0xaa, 0xaa, 0xaa]);
}

#[test]
fn rept_zero_emits_nothing() {
    let (good, binary, messages) = assemble(".rept 0\n.byte 0xAA\n.endr\n.byte 1\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1]);
}

#[test]
fn irp_substitutes_each_value() {
    let (good, binary, messages) = assemble(".irp x, 1, 2, 3\n.byte \\x\n.endr\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 2, 3]);
}

#[test]
fn irpc_substitutes_each_character() {
    let (good, binary, messages) = assemble(".irpc c, 123\n.byte 0x\\c\n.endr\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0x1, 0x2, 0x3]);
}

#[test]
fn for_loop_steps_symbol() {
    let source = ".for i = 0, i<3, i+1\n.byte 0x10\n.endr\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0x10, 0x10, 0x10]);
}

#[test]
fn while_loop_runs_until_condition_clears() {
    let source = ".set n, 2\n.while n\n.byte 0x20\n.set n, n-1\n.endr\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0x20, 0x20]);
}

#[test]
fn conditionals_select_branches() {
    let source = "\
.if 0
.byte 1
.elseif 1
.byte 2
.else
.byte 3
.endif
";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [2]);
}

#[test]
fn ifdef_checks_symbol_definitions() {
    let source = ".set here, 1\n.ifdef here\n.byte 1\n.endif\n.ifndef absent\n.byte 2\n.endif\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 2]);
}

#[test]
fn unterminated_macro_is_reported() {
    let (good, _, messages) = assemble(".macro broken\n.byte 1\n");
    assert!(!good);
    assert_message(&messages, "Unterminated macro definition");
}

#[test]
fn unterminated_if_is_reported() {
    let (good, _, messages) = assemble(".if 1\n.byte 1\n");
    assert!(!good);
    assert_message(&messages, "Unterminated '.if'");
}

#[test]
fn statements_split_at_semicolons() {
    let (good, binary, messages) = assemble(".byte 1; .byte 2; .byte 3\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 2, 3]);
}

#[test]
fn continuation_joins_lines() {
    let (good, binary, messages) = assemble(".byte \\\n1, 2\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 2]);
}

#[test]
fn purgem_removes_macro() {
    let source = ".macro gone\n.byte 9\n.endm\n.purgem gone\ngone\n";
    let (good, _, messages) = assemble(source);
    assert!(!good);
    assert_message(&messages, "Unknown instruction 'gone'");
}
