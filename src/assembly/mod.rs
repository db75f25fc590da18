//! CIL instruction model and method body rewriting.
//!
//! - [`ILRewriter`] decodes a method body into an editable, linked instruction list and
//!   encodes it back, recomputing branch displacements, the header format and exception
//!   clause offsets.
//! - [`InstructionCursor`] inserts common instruction sequences at a position.
//! - [`opcodes`] names the opcodes the crate emits or inspects.
//!
//! # Examples
//!
//! ```rust
//! use dotweave::assembly::{opcodes, ILRewriter, InstructionCursor};
//! use dotweave::metadata::token::Token;
//!
//! // tiny header, `call 0x0A000001; ret`
//! let body = [0x1A, 0x28, 0x01, 0x00, 0x00, 0x0A, 0x2A];
//!
//! let mut rewriter = ILRewriter::new();
//! rewriter.import(&body)?;
//!
//! let call = rewriter.first().unwrap();
//! let mut cursor = InstructionCursor::new(&mut rewriter, call);
//! cursor.load_int32(42)?;
//! cursor.pop()?;
//!
//! let exported = rewriter.export()?;
//! assert_eq!(&exported[1..4], &[0x1F, 42, opcodes::POP as u8]);
//! # Ok::<(), dotweave::Error>(())
//! ```

mod cursor;
mod instruction;
pub mod opcodes;
mod rewriter;

pub use cursor::InstructionCursor;
pub use instruction::{operand_kind, InstrId, Instruction, Operand, OperandKind, SENTINEL};
pub use rewriter::{ExceptionClause, ILRewriter, RewriterState, MAX_CODE_SIZE};
