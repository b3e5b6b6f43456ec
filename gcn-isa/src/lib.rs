#![warn(missing_docs)]
//! GCN instruction set description for the assembler.
//!
//! This crate is the data half of the ISA back-end: the opcode tables,
//! the bit-level encoders, the wait-queue configuration and the plain
//! record types (`RegVarUsage`, `DelayedOp`, `WaitInstr`, `CodeFlowEntry`)
//! that the assembler core stores into per-section side tables. The text
//! half — parsing operands, resolving regvar names, recording usages —
//! lives in the core crate, which owns symbol scopes.

mod delayed;
mod encoding;
mod instruction;
mod registers;
mod usage;

pub use delayed::{DelayedOp, DelayedOpKind, DelayedOpProfile, WaitConfig, WaitInstr, WaitQueueKind, MAX_WAIT_QUEUES};
pub use encoding::{encode_ds, encode_flat, encode_mubuf, encode_smrd, encode_sop1, encode_sop2, encode_sopc, encode_sopk, encode_sopp, encode_vop1, encode_vop2, encode_vopc, encode_waitcnt, instruction_size, patch_reg_field, GcnField, SRC_LITERAL, SRC_VGPR_BASE};
pub use instruction::{find_instruction, instructions_for_arch, GcnEncoding, GcnInstruction, InstrMode, ARCH_ALL, ARCH_GCN_1_0, ARCH_GCN_1_1, ARCH_GCN_1_2, ARCH_GCN_1_4, REG_ALL_32, REG_ALL_64, REG_DS0_64, REG_DST_64, REG_SRC_64};
pub use registers::{arch_mask_for, RegClass, RegRange, SPECIAL_REG_NAMES};
pub use usage::{CodeFlowEntry, CodeFlowKind, RegField, RegVarId, RegVarUsage, RwFlags};
