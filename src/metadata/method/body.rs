//! Decoding and encoding of CIL method body headers and their data sections.
//!
//! Supports both tiny and fat method headers as well as small and fat exception-handling
//! sections, as specified by ECMA-335. The encoder writes the canonical layout: a 12-byte fat
//! header and all clauses in one exception section. A body already in that layout re-encodes to
//! the same bytes; a larger fat header or a chain of exception sections is normalised.
//!
//! # Examples
//!
//! ```rust
//! use dotweave::metadata::method::MethodBody;
//!
//! // Tiny header: 2 bytes of code (ldarg.0, ret)
//! let data = [0x0A, 0x02, 0x2A];
//! let body = MethodBody::from(&data)?;
//! assert!(!body.is_fat);
//! assert_eq!(body.size_code, 2);
//! assert_eq!(body.code(&data)?, &[0x02, 0x2A]);
//! # Ok::<(), dotweave::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use crate::{
    file::io::{read_le, read_le_at, write_le},
    metadata::method::{ExceptionHandler, ExceptionHandlerFlags, MethodBodyFlags, SectionFlags},
    Error::{Empty, OutOfBounds},
    Result,
};

/// Size of a fat header in bytes.
pub const FAT_HEADER_SIZE: usize = 12;

/// Largest code size a tiny header can describe.
pub const TINY_MAX_CODE_SIZE: usize = 63;

/// Implicit max stack of a tiny header.
pub const TINY_MAX_STACK: usize = 8;

/// Largest number of clauses a single small exception section can hold.
const SMALL_SECTION_MAX_CLAUSES: usize = 20;

/// Header and exception data of one method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Size of the code (length of all instructions, not counting the header) in bytes
    pub size_code: usize,
    /// Size of the method header in bytes
    pub size_header: usize,
    /// Token of the local variable signature, 0 if the method has no locals
    pub local_var_sig_token: u32,
    /// Maximum number of items on the operand stack
    pub max_stack: usize,
    /// Flag, indicating the type of the method header
    pub is_fat: bool,
    /// Flag, indicating to zero-initialize all local variables
    pub is_init_local: bool,
    /// Raw fat header flags, kept so unknown bits survive re-encoding
    pub flags: MethodBodyFlags,
    /// Flag, indicating that the exception handlers were stored in small sections
    pub small_sections: bool,
    /// A list of exception handlers this method has
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Decode a method body from the start of `data`.
    ///
    /// # Arguments
    /// * `data` - The bytes of the method body, starting with the header
    ///
    /// # Errors
    /// Returns an error if the data is empty, truncated or the header format is unknown.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(Empty);
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_0000_0011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(OutOfBounds);
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: TINY_MAX_STACK,
                    is_fat: false,
                    is_init_local: false,
                    flags: MethodBodyFlags::TINY_FORMAT,
                    small_sections: true,
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < FAT_HEADER_SIZE {
                    return Err(OutOfBounds);
                }

                let first_duo = read_le::<u16>(data)?;
                let size_header = usize::from(first_duo >> 12) * 4;
                if size_header < FAT_HEADER_SIZE {
                    return Err(malformed_error!(
                        "Fat header declares size {} which is smaller than the header",
                        size_header
                    ));
                }

                let mut cursor = 2;
                let max_stack = usize::from(read_le_at::<u16>(data, &mut cursor)?);
                let size_code = read_le_at::<u32>(data, &mut cursor)? as usize;
                let local_var_sig_token = read_le_at::<u32>(data, &mut cursor)?;
                if data.len() < size_header + size_code {
                    return Err(OutOfBounds);
                }

                let flags = MethodBodyFlags::from_bits_retain(first_duo & 0x0FFF);
                let (exception_handlers, small_sections) =
                    if flags.contains(MethodBodyFlags::MORE_SECTS) {
                        Self::read_sections(data, size_header + size_code)?
                    } else {
                        (Vec::new(), true)
                    };

                Ok(MethodBody {
                    size_code,
                    size_header,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local: flags.contains(MethodBodyFlags::INIT_LOCALS),
                    flags,
                    small_sections,
                    exception_handlers,
                })
            }
            _ => Err(malformed_error!(
                "MethodHeader is neither FAT nor TINY - {}",
                first_byte
            )),
        }
    }

    // Exception Handling -> II.25.4.5 / II.25.4.6
    fn read_sections(data: &[u8], code_end: usize) -> Result<(Vec<ExceptionHandler>, bool)> {
        let mut handlers = Vec::new();
        let mut all_small = true;
        let mut cursor = (code_end + 3) & !3;

        loop {
            let section_flags = SectionFlags::from_bits_retain(read_le::<u8>(
                data.get(cursor..).ok_or(OutOfBounds)?,
            )?);
            if !section_flags.contains(SectionFlags::EHTABLE) {
                return Err(malformed_error!(
                    "Unsupported method data section - 0x{:02x}",
                    section_flags.bits()
                ));
            }

            let section_start = cursor;
            if section_flags.contains(SectionFlags::FAT_FORMAT) {
                all_small = false;
                let section_size = (read_le_at::<u32>(data, &mut cursor)? >> 8) as usize;
                if section_size < 4 || data.len() < section_start + section_size {
                    return Err(malformed_error!("Invalid fat EH section size - {}", section_size));
                }

                for _ in 0..(section_size - 4) / 24 {
                    #[allow(clippy::cast_possible_truncation)]
                    let flags = ExceptionHandlerFlags::from_bits_retain(
                        read_le_at::<u32>(data, &mut cursor)? as u16,
                    );
                    handlers.push(ExceptionHandler {
                        flags,
                        try_offset: read_le_at::<u32>(data, &mut cursor)?,
                        try_length: read_le_at::<u32>(data, &mut cursor)?,
                        handler_offset: read_le_at::<u32>(data, &mut cursor)?,
                        handler_length: read_le_at::<u32>(data, &mut cursor)?,
                        class_token_or_filter: read_le_at::<u32>(data, &mut cursor)?,
                    });
                }
                cursor = section_start + section_size;
            } else {
                cursor += 1;
                let section_size = usize::from(read_le_at::<u8>(data, &mut cursor)?);
                cursor += 2;
                if section_size < 4 || data.len() < section_start + section_size {
                    return Err(malformed_error!(
                        "Invalid small EH section size - {}",
                        section_size
                    ));
                }

                for _ in 0..(section_size - 4) / 12 {
                    handlers.push(ExceptionHandler {
                        flags: ExceptionHandlerFlags::from_bits_retain(read_le_at::<u16>(
                            data,
                            &mut cursor,
                        )?),
                        try_offset: u32::from(read_le_at::<u16>(data, &mut cursor)?),
                        try_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                        handler_offset: u32::from(read_le_at::<u16>(data, &mut cursor)?),
                        handler_length: u32::from(read_le_at::<u8>(data, &mut cursor)?),
                        class_token_or_filter: read_le_at::<u32>(data, &mut cursor)?,
                    });
                }
                cursor = section_start + section_size;
            }

            if !section_flags.contains(SectionFlags::MORE_SECTS) {
                break;
            }
            cursor = (cursor + 3) & !3;
        }

        Ok((handlers, all_small))
    }

    /// Get the size of header plus code
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// The code bytes of this body within `data`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the described body.
    pub fn code<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        data.get(self.size_header..self.size()).ok_or(OutOfBounds)
    }

    /// Returns true if a body with these properties can use the one-byte tiny header.
    #[must_use]
    pub fn fits_tiny(&self) -> bool {
        self.size_code <= TINY_MAX_CODE_SIZE
            && self.max_stack <= TINY_MAX_STACK
            && self.local_var_sig_token == 0
            && !self.is_init_local
            && self.exception_handlers.is_empty()
    }

    /// Encode header, `code` and exception sections into `out`.
    ///
    /// `size_code` is taken from `code`. A tiny header is only written if `is_fat` is unset
    /// and the body still fits; small exception sections only if `small_sections` is set and
    /// every clause fits the small layout. A fat header is always [`FAT_HEADER_SIZE`] bytes
    /// and every clause goes into a single exception section, whatever `size_header` and the
    /// decoded section layout were.
    ///
    /// # Errors
    /// Returns an error if the code does not fit the 32-bit size field.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_to(&self, out: &mut Vec<u8>, code: &[u8]) -> Result<()> {
        let size_code = u32::try_from(code.len())
            .map_err(|_| malformed_error!("Code size {} does not fit u32", code.len()))?;

        let tiny = !self.is_fat
            && MethodBody {
                size_code: code.len(),
                ..self.clone()
            }
            .fits_tiny();

        if tiny {
            out.push(((code.len() as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8);
            out.extend_from_slice(code);
            return Ok(());
        }

        let start = out.len();
        let mut flags = self.flags;
        flags.remove(MethodBodyFlags::FAT_FORMAT | MethodBodyFlags::MORE_SECTS);
        flags.insert(MethodBodyFlags::FAT_FORMAT);
        flags.set(MethodBodyFlags::INIT_LOCALS, self.is_init_local);
        if !self.exception_handlers.is_empty() {
            flags.insert(MethodBodyFlags::MORE_SECTS);
        }

        let max_stack = u16::try_from(self.max_stack)
            .map_err(|_| malformed_error!("Max stack {} does not fit u16", self.max_stack))?;

        write_le(out, flags.bits() | (3 << 12));
        write_le(out, max_stack);
        write_le(out, size_code);
        write_le(out, self.local_var_sig_token);
        out.extend_from_slice(code);

        if self.exception_handlers.is_empty() {
            return Ok(());
        }

        while (out.len() - start) % 4 != 0 {
            out.push(0);
        }

        let small = self.small_sections
            && self.exception_handlers.len() <= SMALL_SECTION_MAX_CLAUSES
            && self.exception_handlers.iter().all(ExceptionHandler::fits_small);

        if small {
            out.push(SectionFlags::EHTABLE.bits());
            out.push((4 + self.exception_handlers.len() * 12) as u8);
            write_le(out, 0_u16);
            for handler in &self.exception_handlers {
                write_le(out, handler.flags.bits());
                write_le(out, handler.try_offset as u16);
                write_le(out, handler.try_length as u8);
                write_le(out, handler.handler_offset as u16);
                write_le(out, handler.handler_length as u8);
                write_le(out, handler.class_token_or_filter);
            }
        } else {
            let section_size = 4 + self.exception_handlers.len() * 24;
            if section_size > 0x00FF_FFFF {
                return Err(malformed_error!(
                    "Too many exception handlers - {}",
                    self.exception_handlers.len()
                ));
            }
            let kind = (SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits();
            write_le(out, u32::from(kind) | ((section_size as u32) << 8));
            for handler in &self.exception_handlers {
                write_le(out, u32::from(handler.flags.bits()));
                write_le(out, handler.try_offset);
                write_le(out, handler.try_length);
                write_le(out, handler.handler_offset);
                write_le(out, handler.handler_length);
                write_le(out, handler.class_token_or_filter);
            }
        }

        Ok(())
    }
}
