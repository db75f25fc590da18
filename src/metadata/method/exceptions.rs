//! Exception-handling clauses of CIL method bodies (ECMA-335 II.25.4.6).

use bitflags::bitflags;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause; `class_token_or_filter` holds the caught type token.
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause; `class_token_or_filter` holds the filter offset.
        const FILTER = 0x0001;
        /// A finally clause.
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

/// One try/handler region of a method body, expressed in byte offsets into the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Kind of the clause.
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of the try block from the start of the code.
    pub try_offset: u32,
    /// Length in bytes of the try block.
    pub try_length: u32,
    /// Offset in bytes of the handler block.
    pub handler_offset: u32,
    /// Length in bytes of the handler block.
    pub handler_length: u32,
    /// Type token for typed clauses, filter offset for filter clauses, zero otherwise.
    pub class_token_or_filter: u32,
}

impl ExceptionHandler {
    /// Returns true if this clause uses `class_token_or_filter` as a code offset.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.flags.contains(ExceptionHandlerFlags::FILTER)
    }

    /// Returns true if the clause can be stored in the 12-byte small layout.
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= 0xFFFF
            && self.try_length <= 0xFF
            && self.handler_offset <= 0xFFFF
            && self.handler_length <= 0xFF
    }
}
