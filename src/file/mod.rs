//! Low-level byte access used by the signature parser and the IL rewriter.
//!
//! - [`io`] - little-endian primitive reads and writes over byte buffers
//! - [`parser`] - a cursor-based [`parser::Parser`] with ECMA-335 compressed encodings

pub mod io;
pub mod parser;
