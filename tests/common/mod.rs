//! Shared helpers for the integration tests.

use gcn_asm::prelude::*;

/// Assemble `source` as raw code; returns `(good, binary, messages)`.
pub fn assemble(source: &str) -> (bool, Vec<u8>, Vec<String>) {
    assemble_with(source, AsmConfig::default())
}

/// Assemble with a custom configuration.
pub fn assemble_with(source: &str, config: AsmConfig) -> (bool, Vec<u8>, Vec<String>) {
    let mut asm = Assembler::from_string("test.s", source, config);
    let good = asm.assemble().expect("assembly must not fail fatally");
    let binary = if good { asm.write_binary().expect("good run serializes") } else { Vec::new() };
    (good, binary, asm.messages)
}

/// Assert a diagnostic containing `needle` was produced.
#[allow(dead_code)]
pub fn assert_message(messages: &[String], needle: &str) {
    assert!(
        messages.iter().any(|m| m.contains(needle)),
        "no message containing {:?} in {:?}",
        needle,
        messages
    );
}

/// Little-endian u32 words of a binary.
#[allow(dead_code)]
pub fn words(binary: &[u8]) -> Vec<u32> {
    binary.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect()
}
