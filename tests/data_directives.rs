//! Data-emitting directives.

mod common;

use common::{assemble, assert_message, words};

#[test]
fn byte_short_long_quad_emit_little_endian() {
    let source = ".byte 0x12\n.short 0x3456\n.long 0x789abcde\n.quad 0x1122334455667788\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert_eq!(
        binary,
        [
            0x12, 0x56, 0x34, 0xde, 0xbc, 0x9a, 0x78, 0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22,
            0x11
        ]
    );
}

#[test]
fn comma_separated_lists() {
    let (good, binary, messages) = assemble(".byte 1, 2, 3, 4\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 2, 3, 4]);
}

#[test]
fn value_truncation_warns() {
    let (good, binary, messages) = assemble(".byte 0x1ff\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0xff]);
    assert_message(&messages, "truncated");
}

#[test]
fn ascii_and_asciz() {
    let (good, binary, messages) = assemble(".ascii \"ab\"\n.asciz \"cd\"\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [b'a', b'b', b'c', b'd', 0]);
}

#[test]
fn string_escapes() {
    let (good, binary, messages) = assemble(".ascii \"a\\n\\t\\x41\\101\"\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [b'a', b'\n', b'\t', 0x41, 0o101]);
}

#[test]
fn fill_repeats_patterns() {
    let (good, binary, messages) = assemble(".fill 3, 2, 0x1234\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [0x34, 0x12, 0x34, 0x12, 0x34, 0x12]);
}

#[test]
fn skip_emits_fill_bytes() {
    let (good, binary, messages) = assemble(".byte 1\n.skip 3, 0xcc\n.byte 2\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 0xcc, 0xcc, 0xcc, 2]);
}

#[test]
fn align_pads_to_boundary() {
    let (good, binary, messages) = assemble(".byte 1\n.align 4\n.byte 2\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 0, 0, 0, 2]);
}

#[test]
fn p2align_uses_exponent() {
    let (good, binary, messages) = assemble(".byte 1\n.p2align 2\n.byte 2\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary.len(), 5);
}

#[test]
fn org_moves_forward_only() {
    let (good, binary, messages) = assemble(".byte 1\n.org 4\n.byte 2\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [1, 0, 0, 0, 2]);

    let (good, _, messages) = assemble(".byte 1, 2, 3\n.org 1\n");
    assert!(!good);
    assert_message(&messages, "Attempt to move backwards");
}

#[test]
fn float_and_double_bit_patterns() {
    let (good, binary, messages) = assemble(".float 1.0\n.double 2.0\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary[..4], 1.0f32.to_bits().to_le_bytes());
    assert_eq!(binary[4..], 2.0f64.to_bits().to_le_bytes());
}

#[test]
fn octa_emits_sixteen_bytes() {
    let (good, binary, messages) = assemble(".octa 0x102\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary.len(), 16);
    assert_eq!(binary[..4], [0x02, 0x01, 0, 0]);
    assert!(binary[4..].iter().all(|&b| b == 0));
}

#[test]
fn string16_zero_extends_characters() {
    let (good, binary, messages) = assemble(".string16 \"ab\"\n");
    assert!(good, "{:?}", messages);
    assert_eq!(binary, [b'a', 0, b'b', 0, 0, 0]);
}

#[test]
fn empty_pipeline_emits_nothing() {
    let source = "# only comments\n/* and a block\ncomment */\n.if 0\n.byte 1\n.endif\n";
    let (good, binary, messages) = assemble(source);
    assert!(good, "{:?}", messages);
    assert!(binary.is_empty());
    let _ = words(&binary);
}
