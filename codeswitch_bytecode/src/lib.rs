//! CodeSwitch bytecode catalogue and instruction stream codec.
//!
//! This crate defines the stack-machine instruction set shared by the
//! package loader, the interpreter, and the pointer map builder:
//!
//! - [`Opcode`] - Enumeration of all bytecode operations
//! - [`BytecodeReader`] - Bounds-checked cursor over an instruction stream
//! - [`BytecodeWriter`] - Append-only assembler for instruction streams
//!
//! # Encoding
//!
//! Instructions are byte-oriented: a one-byte opcode followed by zero or
//! more immediates. Integer immediates are variable-byte signed numbers
//! (base-128 little-endian groups, continuation in bit 7, sign-extended
//! from the most significant bit of the final group). Floating immediates
//! are fixed-width little-endian (4 or 8 bytes).

#![warn(missing_docs)]
#![warn(clippy::all)]

mod opcode;
mod reader;
mod writer;

pub use opcode::Opcode;
pub use reader::{BytecodeReader, DecodeError, DecodeResult};
pub use writer::BytecodeWriter;
