use crate::{
    file::parser::Parser,
    metadata::{
        signatures::{SignatureHeader, CALLING_CONVENTION, ELEMENT_TYPE},
        token::Token,
    },
    Error::{NotSupported, RecursionLimit},
    Result,
};

const MAX_RECURSION_DEPTH: usize = 50;

/// Parses method signature blobs into their header and printable type names.
///
/// Class and value type tokens are turned into names through a caller-supplied lookup, which
/// lets the parser stay independent of the metadata source. Type names are rendered the way
/// integration rules spell them: primitives use their `System.*` names, arrays append `[]`,
/// generic instantiations append their arguments in angle brackets and generic parameters
/// are written `!n` (type) or `!!n` (method).
pub struct SignatureParser<'a, F>
where
    F: Fn(Token) -> Option<String>,
{
    parser: Parser<'a>,
    depth: usize,
    type_name: F,
}

impl<'a, F> SignatureParser<'a, F>
where
    F: Fn(Token) -> Option<String>,
{
    /// Create a parser over `data` that resolves type tokens with `type_name`.
    #[must_use]
    pub fn new(data: &'a [u8], type_name: F) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
            type_name,
        }
    }

    /// Parse the whole method signature.
    ///
    /// Returns the header and the type names of the return type followed by every parameter.
    ///
    /// # Errors
    /// Returns an error on truncated or malformed blobs, on unsupported element types such as
    /// function pointers, and when a type token cannot be named.
    pub fn parse_method_types(&mut self) -> Result<(SignatureHeader, Vec<String>)> {
        let header = read_header(&mut self.parser)?;

        let mut types = Vec::with_capacity(header.param_count as usize + 1);
        types.push(self.parse_type()?);
        for _ in 0..header.param_count {
            if self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                self.parser.advance_by(1)?;
            }
            self.depth = 0;
            types.push(self.parse_type()?);
        }

        Ok((header, types))
    }

    fn parse_type(&mut self) -> Result<String> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let current_byte = self.parser.read_le::<u8>()?;
        let name = match current_byte {
            ELEMENT_TYPE::VOID => "System.Void".to_string(),
            ELEMENT_TYPE::BOOLEAN => "System.Boolean".to_string(),
            ELEMENT_TYPE::CHAR => "System.Char".to_string(),
            ELEMENT_TYPE::I1 => "System.SByte".to_string(),
            ELEMENT_TYPE::U1 => "System.Byte".to_string(),
            ELEMENT_TYPE::I2 => "System.Int16".to_string(),
            ELEMENT_TYPE::U2 => "System.UInt16".to_string(),
            ELEMENT_TYPE::I4 => "System.Int32".to_string(),
            ELEMENT_TYPE::U4 => "System.UInt32".to_string(),
            ELEMENT_TYPE::I8 => "System.Int64".to_string(),
            ELEMENT_TYPE::U8 => "System.UInt64".to_string(),
            ELEMENT_TYPE::R4 => "System.Single".to_string(),
            ELEMENT_TYPE::R8 => "System.Double".to_string(),
            ELEMENT_TYPE::STRING => "System.String".to_string(),
            ELEMENT_TYPE::I => "System.IntPtr".to_string(),
            ELEMENT_TYPE::U => "System.UIntPtr".to_string(),
            ELEMENT_TYPE::OBJECT => "System.Object".to_string(),
            ELEMENT_TYPE::TYPEDBYREF => "System.TypedReference".to_string(),
            ELEMENT_TYPE::PTR => format!("{}*", self.parse_type()?),
            ELEMENT_TYPE::BYREF => format!("{}&", self.parse_type()?),
            ELEMENT_TYPE::SZARRAY => format!("{}[]", self.parse_type()?),
            ELEMENT_TYPE::PINNED => self.parse_type()?,
            ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                self.parser.read_compressed_token()?;
                self.parse_type()?
            }
            ELEMENT_TYPE::CLASS | ELEMENT_TYPE::VALUETYPE => self.named_type()?,
            ELEMENT_TYPE::VAR => format!("!{}", self.parser.read_compressed_uint()?),
            ELEMENT_TYPE::MVAR => format!("!!{}", self.parser.read_compressed_uint()?),
            ELEMENT_TYPE::ARRAY => {
                let element = self.parse_type()?;
                let rank = self.parser.read_compressed_uint()?;
                let num_sizes = self.parser.read_compressed_uint()?;
                for _ in 0..num_sizes {
                    self.parser.read_compressed_uint()?;
                }
                let num_lo_bounds = self.parser.read_compressed_uint()?;
                for _ in 0..num_lo_bounds {
                    self.parser.read_compressed_int()?;
                }

                let commas = ",".repeat(rank.saturating_sub(1) as usize);
                format!("{}[{}]", element, commas)
            }
            ELEMENT_TYPE::GENERICINST => {
                let kind = self.parser.read_le::<u8>()?;
                if kind != ELEMENT_TYPE::CLASS && kind != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        kind
                    ));
                }

                let base = self.named_type()?;
                let arg_count = self.parser.read_compressed_uint()?;
                let mut args = Vec::with_capacity(arg_count as usize);
                for _ in 0..arg_count {
                    args.push(self.parse_type()?);
                }
                format!("{}<{}>", base, args.join(","))
            }
            ELEMENT_TYPE::FNPTR => return Err(NotSupported),
            _ => {
                return Err(malformed_error!(
                    "Unsupported ELEMENT_TYPE - {}",
                    current_byte
                ))
            }
        };

        self.depth -= 1;
        Ok(name)
    }

    fn named_type(&mut self) -> Result<String> {
        let token = self.parser.read_compressed_token()?;
        (self.type_name)(token)
            .ok_or_else(|| malformed_error!("Could not resolve type token {}", token))
    }
}

fn read_header(parser: &mut Parser<'_>) -> Result<SignatureHeader> {
    let calling_convention = parser.read_le::<u8>()?;
    let generic_param_count = if calling_convention & CALLING_CONVENTION::GENERIC != 0 {
        parser.read_compressed_uint()?
    } else {
        0
    };
    let param_count = parser.read_compressed_uint()?;

    Ok(SignatureHeader {
        calling_convention,
        generic_param_count,
        param_count,
    })
}

/// Decode only the fixed prefix of a method signature.
///
/// # Errors
/// Returns an error if the blob is too short to hold the prefix.
///
/// # Examples
///
/// ```rust
/// use dotweave::metadata::signatures::parse_method_header;
///
/// // GENERIC | HASTHIS, 1 generic parameter, 2 parameters
/// let header = parse_method_header(&[0x30, 0x01, 0x02, 0x01, 0x08, 0x1E, 0x00])?;
/// assert!(header.is_instance_method());
/// assert_eq!(header.generic_param_count, 1);
/// assert_eq!(header.param_count, 2);
/// # Ok::<(), dotweave::Error>(())
/// ```
pub fn parse_method_header(data: &[u8]) -> Result<SignatureHeader> {
    let mut parser = Parser::new(data);
    read_header(&mut parser)
}

/// Count the type arguments of a method spec instantiation blob.
///
/// # Errors
/// Returns an error if the blob does not start with the instantiation prolog.
pub fn parse_method_spec_arity(data: &[u8]) -> Result<u32> {
    let mut parser = Parser::new(data);
    let prolog = parser.read_le::<u8>()?;
    if prolog != CALLING_CONVENTION::GENERICINST {
        return Err(malformed_error!(
            "MethodSpec blob has invalid prolog - 0x{:02x}",
            prolog
        ));
    }
    parser.read_compressed_uint()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(token: Token) -> Option<String> {
        match token.value() {
            0x0100_0005 => Some("System.Collections.Generic.List`1".to_string()),
            0x0200_0002 => Some("MyApp.Order".to_string()),
            _ => None,
        }
    }

    fn parse(data: &[u8]) -> Result<(SignatureHeader, Vec<String>)> {
        SignatureParser::new(data, names).parse_method_types()
    }

    #[test]
    fn static_primitives() {
        // static int32 M(int32, int32)
        let (header, types) = parse(&[0x00, 0x02, 0x08, 0x08, 0x08]).unwrap();

        assert!(!header.is_instance_method());
        assert_eq!(header.param_count, 2);
        assert_eq!(types, ["System.Int32", "System.Int32", "System.Int32"]);
    }

    #[test]
    fn instance_with_classes() {
        // instance void M(string, MyApp.Order, List`1<int32>, object[])
        let data = [
            0x20, 0x04, 0x01, 0x0E, 0x12, 0x08, 0x15, 0x12, 0x15, 0x01, 0x08, 0x1D, 0x1C,
        ];
        let (header, types) = parse(&data).unwrap();

        assert!(header.is_instance_method());
        assert_eq!(
            types,
            [
                "System.Void",
                "System.String",
                "MyApp.Order",
                "System.Collections.Generic.List`1<System.Int32>",
                "System.Object[]",
            ]
        );
    }

    #[test]
    fn generic_method() {
        // !!0 M<T>(!!0&, int32[,])
        let data = [0x10, 0x01, 0x02, 0x1E, 0x00, 0x10, 0x1E, 0x00, 0x14, 0x08, 0x02, 0x00, 0x00];
        let (header, types) = parse(&data).unwrap();

        assert!(header.is_generic());
        assert_eq!(header.generic_param_count, 1);
        assert_eq!(types, ["!!0", "!!0&", "System.Int32[,]"]);
    }

    #[test]
    fn custom_modifiers_are_skipped() {
        // void M(modreq(MyApp.Order) int32)
        let (_, types) = parse(&[0x00, 0x01, 0x01, 0x1F, 0x08, 0x08]).unwrap();
        assert_eq!(types, ["System.Void", "System.Int32"]);
    }

    #[test]
    fn failures() {
        // truncated parameter list
        assert!(parse(&[0x00, 0x02, 0x01, 0x08]).is_err());
        // unresolvable class token
        assert!(parse(&[0x00, 0x01, 0x01, 0x12, 0x0D]).is_err());
        // function pointer
        assert!(matches!(
            parse(&[0x00, 0x01, 0x01, 0x1B, 0x00, 0x00, 0x01]),
            Err(NotSupported)
        ));
        // unknown element type
        assert!(parse(&[0x00, 0x00, 0x17]).is_err());
        assert!(parse(&[]).is_err());
    }

    #[test]
    fn method_spec_arity() {
        assert_eq!(parse_method_spec_arity(&[0x0A, 0x02, 0x08, 0x0E]).unwrap(), 2);
        assert!(parse_method_spec_arity(&[0x00, 0x01, 0x08]).is_err());
    }
}
