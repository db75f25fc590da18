#[allow(non_snake_case, dead_code, missing_docs)]
/// Bytes that represent the various 'Types' in a signature blob - from coreclr
pub mod ELEMENT_TYPE {
    //Marks end of a list
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by type
    pub const PTR: u8 = 0x0f;
    // Followed by type
    pub const BYREF: u8 = 0x10;
    // Followed by TypeDef or TypeRef token
    pub const VALUETYPE: u8 = 0x11;
    // Followed by TypeDef or TypeRef token
    pub const CLASS: u8 = 0x12;
    // Generic parameter in a generic type definition, represented as number
    pub const VAR: u8 = 0x13;
    // type rank boundsCount bound1 … loCount lo1 …
    pub const ARRAY: u8 = 0x14;
    // Generic type instantiation. Followed by type type-arg-count type-1 ... type-n
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    // System.IntPtr
    pub const I: u8 = 0x18;
    // System.UIntPtr
    pub const U: u8 = 0x19;
    // Followed by full method signature
    pub const FNPTR: u8 = 0x1b;
    // System.Object
    pub const OBJECT: u8 = 0x1c;
    // Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    // Generic parameter in a generic method definition, represented as number
    pub const MVAR: u8 = 0x1e;
    // Required modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_REQD: u8 = 0x1f;
    // Optional modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_OPT: u8 = 0x20;
    // Implemented within the CLI
    pub const INTERNAL: u8 = 0x21;
    // Sentinel for vararg method signature
    pub const SENTINEL: u8 = 0x41;
    // Denotes a local variable that points at a pinned object
    pub const PINNED: u8 = 0x45;
}

#[allow(non_snake_case, dead_code, missing_docs)]
/// Calling convention byte of a method signature
pub mod CALLING_CONVENTION {
    pub const DEFAULT: u8 = 0x00;
    pub const C: u8 = 0x01;
    pub const STDCALL: u8 = 0x02;
    pub const THISCALL: u8 = 0x03;
    pub const FASTCALL: u8 = 0x04;
    pub const VARARG: u8 = 0x05;
    // Low nibble mask selecting the convention kind
    pub const KIND_MASK: u8 = 0x0f;
    // Method spec instantiation blob
    pub const GENERICINST: u8 = 0x0a;
    pub const GENERIC: u8 = 0x10;
    pub const HASTHIS: u8 = 0x20;
    pub const EXPLICITTHIS: u8 = 0x40;
}

/// The fixed prefix of a method signature blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureHeader {
    /// Raw calling convention byte
    pub calling_convention: u8,
    /// Number of generic parameters, 0 for non-generic methods
    pub generic_param_count: u32,
    /// Number of declared parameters, not counting `this`
    pub param_count: u32,
}

impl SignatureHeader {
    /// Returns true if the method takes an implicit `this`.
    #[must_use]
    pub fn is_instance_method(&self) -> bool {
        self.calling_convention & CALLING_CONVENTION::HASTHIS != 0
    }

    /// Returns true if the signature declares generic parameters.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.calling_convention & CALLING_CONVENTION::GENERIC != 0
    }
}

/// An owned method signature blob.
///
/// Accessors decode the header on demand and report `0` / `false` for blobs too short to
/// carry one, so callers comparing arities never see a malformed signature as a match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    data: Vec<u8>,
}

impl MethodSignature {
    /// Wrap a raw signature blob.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        MethodSignature { data }
    }

    /// The raw blob.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Blob length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for an empty blob.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the signature prefix.
    ///
    /// # Errors
    /// Returns an error if the blob is truncated.
    pub fn header(&self) -> crate::Result<SignatureHeader> {
        super::parse_method_header(&self.data)
    }

    /// Declared parameter count, excluding `this`.
    #[must_use]
    pub fn argument_count(&self) -> u32 {
        self.header().map_or(0, |header| header.param_count)
    }

    /// Number of generic method parameters.
    #[must_use]
    pub fn type_argument_count(&self) -> u32 {
        self.header().map_or(0, |header| header.generic_param_count)
    }

    /// Returns true if the calling convention has `HASTHIS` set.
    #[must_use]
    pub fn is_instance_method(&self) -> bool {
        self.header().is_ok_and(|header| header.is_instance_method())
    }
}

impl From<Vec<u8>> for MethodSignature {
    fn from(data: Vec<u8>) -> Self {
        MethodSignature::new(data)
    }
}

impl From<&[u8]> for MethodSignature {
    fn from(data: &[u8]) -> Self {
        MethodSignature::new(data.to_vec())
    }
}
