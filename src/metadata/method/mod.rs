//! Method body headers, flags and exception-handling clauses.

mod body;
mod exceptions;
mod types;

pub use body::{MethodBody, FAT_HEADER_SIZE, TINY_MAX_CODE_SIZE, TINY_MAX_STACK};
pub use exceptions::{ExceptionHandler, ExceptionHandlerFlags};
pub use types::{MethodBodyFlags, SectionFlags};
