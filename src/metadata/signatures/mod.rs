//! Method signature blobs.
//!
//! Only the parts of a signature needed to match call targets are decoded: the calling
//! convention, generic arity, parameter count, and a printable name for the return type and
//! each parameter. Everything else in the blob is skipped.

mod parser;
mod types;

pub use parser::{parse_method_header, parse_method_spec_arity, SignatureParser};
pub use types::{MethodSignature, SignatureHeader, CALLING_CONVENTION, ELEMENT_TYPE};
