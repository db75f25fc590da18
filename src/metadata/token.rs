//! Metadata tokens as exchanged with the runtime's metadata interfaces.
//!
//! A token is a 32-bit value whose high byte selects the metadata table and whose low 24 bits
//! hold the 1-based row. A row of zero is the "nil" token of that table; the runtime returns
//! such tokens from lookups that found nothing.

use std::fmt;

use strum::{Display, EnumIter};

/// Metadata tables a token can point into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u8)]
pub enum TokenType {
    /// `Module` table
    Module = 0x00,
    /// `TypeRef` table
    TypeRef = 0x01,
    /// `TypeDef` table
    TypeDef = 0x02,
    /// `Field` table
    FieldDef = 0x04,
    /// `MethodDef` table
    MethodDef = 0x06,
    /// `Param` table
    ParamDef = 0x08,
    /// `MemberRef` table
    MemberRef = 0x0A,
    /// `StandAloneSig` table
    Signature = 0x11,
    /// `ModuleRef` table
    ModuleRef = 0x1A,
    /// `TypeSpec` table
    TypeSpec = 0x1B,
    /// `Assembly` table
    Assembly = 0x20,
    /// `AssemblyRef` table
    AssemblyRef = 0x23,
    /// `MethodSpec` table
    MethodSpec = 0x2B,
    /// `#US` heap, used by `ldstr`
    String = 0x70,
}

impl TokenType {
    /// Map a table byte to the known token type, if any.
    #[must_use]
    pub fn from_table(table: u8) -> Option<TokenType> {
        Some(match table {
            0x00 => TokenType::Module,
            0x01 => TokenType::TypeRef,
            0x02 => TokenType::TypeDef,
            0x04 => TokenType::FieldDef,
            0x06 => TokenType::MethodDef,
            0x08 => TokenType::ParamDef,
            0x0A => TokenType::MemberRef,
            0x11 => TokenType::Signature,
            0x1A => TokenType::ModuleRef,
            0x1B => TokenType::TypeSpec,
            0x20 => TokenType::Assembly,
            0x23 => TokenType::AssemblyRef,
            0x2B => TokenType::MethodSpec,
            0x70 => TokenType::String,
            _ => return None,
        })
    }
}

/// A metadata token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Token(pub u32);

impl Token {
    /// Create a token from its raw value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Create the token for `row` in `table`.
    #[must_use]
    pub fn from_parts(table: TokenType, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// The nil token of `table`.
    #[must_use]
    pub fn nil(table: TokenType) -> Self {
        Token::from_parts(table, 0)
    }

    /// Raw 32-bit value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Table byte (high 8 bits).
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Table this token points into, if it is a known one.
    #[must_use]
    pub fn token_type(&self) -> Option<TokenType> {
        TokenType::from_table(self.table())
    }

    /// Returns true if this token points into `table`.
    #[must_use]
    pub fn is_type(&self, table: TokenType) -> bool {
        self.table() == table as u8
    }

    /// Row index (low 24 bits).
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true for the all-zero token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Returns true if the row is zero, i.e. the token refers to nothing in its table.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.row() == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token_type() {
            Some(kind) => write!(f, "Token(0x{:08x}, {}, row: {})", self.0, kind, self.row()),
            None => write!(
                f,
                "Token(0x{:08x}, table: 0x{:02x}, row: {})",
                self.0,
                self.table(),
                self.row()
            ),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
