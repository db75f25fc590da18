use crate::{
    assembly::opcodes::{self, FE_PREFIX},
    metadata::token::Token,
};

/// Index of an instruction inside an [`ILRewriter`](crate::assembly::ILRewriter).
///
/// Ids stay valid for the lifetime of the rewriter; inserting instructions never moves
/// existing ones.
pub type InstrId = usize;

/// The list head. Used as a branch target it means "end of code".
pub const SENTINEL: InstrId = 0;

/// The encoding of an instruction's inline operand (ECMA-335 III.1.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand
    None,
    /// Signed 8-bit immediate (`ldc.i4.s`)
    Int8,
    /// Unsigned 8-bit index or alignment (`ldarg.s`, `unaligned.`)
    UInt8,
    /// Unsigned 16-bit argument or local index (`ldarg`, `stloc`)
    UInt16,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Metadata token
    Token,
    /// Signed 8-bit branch displacement
    ShortBranch,
    /// Signed 32-bit branch displacement
    Branch,
    /// Jump table
    Switch,
}

impl OperandKind {
    /// Fixed encoded size of the operand; a switch table is sized by [`Operand::encoded_size`].
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            OperandKind::None => 0,
            OperandKind::Int8 | OperandKind::UInt8 | OperandKind::ShortBranch => 1,
            OperandKind::UInt16 => 2,
            OperandKind::Int32
            | OperandKind::Float32
            | OperandKind::Token
            | OperandKind::Branch
            | OperandKind::Switch => 4,
            OperandKind::Int64 | OperandKind::Float64 => 8,
        }
    }
}

/// Operand kind of `opcode`, or `None` if the opcode is not defined.
#[must_use]
pub fn operand_kind(opcode: u16) -> Option<OperandKind> {
    use OperandKind as K;

    if opcodes::is_prefixed(opcode) {
        return Some(match opcode & 0xFF {
            0x00..=0x05 | 0x0F | 0x11 | 0x13 | 0x14 | 0x17 | 0x18 | 0x1A | 0x1D | 0x1E => K::None,
            0x06 | 0x07 | 0x15 | 0x16 | 0x1C => K::Token,
            0x09..=0x0E => K::UInt16,
            0x12 | 0x19 => K::UInt8,
            _ => return None,
        });
    }

    Some(match opcode {
        0x00..=0x0D | 0x14..=0x1E | 0x25 | 0x26 | 0x2A => K::None,
        0x0E..=0x13 => K::UInt8,
        0x1F => K::Int8,
        0x20 => K::Int32,
        0x21 => K::Int64,
        0x22 => K::Float32,
        0x23 => K::Float64,
        0x27..=0x29 => K::Token,
        0x2B..=0x37 | 0xDE => K::ShortBranch,
        0x38..=0x44 | 0xDD => K::Branch,
        0x45 => K::Switch,
        0x46..=0x6E | 0x76 | 0x7A | 0x82..=0x8B | 0x8E | 0x90..=0xA2 | 0xB3..=0xBA | 0xC3 => {
            K::None
        }
        0xD1..=0xDC | 0xDF | 0xE0 => K::None,
        0x6F..=0x75 | 0x79 | 0x7B..=0x81 | 0x8C | 0x8D | 0x8F | 0xA3..=0xA5 | 0xC2 | 0xC6 | 0xD0 => {
            K::Token
        }
        _ => return None,
    })
}

/// The decoded inline operand of an instruction.
///
/// Branch operands hold instruction ids rather than offsets; offsets are recomputed when the
/// method is exported.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// `Int8` operand
    Int8(i8),
    /// `UInt8` operand
    UInt8(u8),
    /// `UInt16` operand
    UInt16(u16),
    /// `Int32` operand
    Int32(i32),
    /// `Int64` operand
    Int64(i64),
    /// `Float32` operand
    Float32(f32),
    /// `Float64` operand
    Float64(f64),
    /// Metadata token operand
    Token(Token),
    /// Branch target, short or long
    Branch(InstrId),
    /// Switch targets
    Switch(Vec<InstrId>),
}

impl Operand {
    /// Returns true if this operand can be encoded as `kind`.
    #[must_use]
    pub fn fits(&self, kind: OperandKind) -> bool {
        matches!(
            (self, kind),
            (Operand::None, OperandKind::None)
                | (Operand::Int8(_), OperandKind::Int8)
                | (Operand::UInt8(_), OperandKind::UInt8)
                | (Operand::UInt16(_), OperandKind::UInt16)
                | (Operand::Int32(_), OperandKind::Int32)
                | (Operand::Int64(_), OperandKind::Int64)
                | (Operand::Float32(_), OperandKind::Float32)
                | (Operand::Float64(_), OperandKind::Float64)
                | (Operand::Token(_), OperandKind::Token)
                | (
                    Operand::Branch(_),
                    OperandKind::ShortBranch | OperandKind::Branch
                )
                | (Operand::Switch(_), OperandKind::Switch)
        )
    }

    /// The token operand, if this is one.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self {
            Operand::Token(token) => Some(*token),
            _ => None,
        }
    }

    /// Encoded operand size for an instruction of kind `kind`.
    #[must_use]
    pub fn encoded_size(&self, kind: OperandKind) -> usize {
        match self {
            Operand::Switch(targets) => 4 + 4 * targets.len(),
            _ => kind.size(),
        }
    }
}

/// One node of the instruction list.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Opcode, `0xFE`-prefixed opcodes as `0xFExx`
    pub opcode: u16,
    /// Inline operand
    pub operand: Operand,
    /// Offset within the code as of the last import or export
    pub offset: u32,
    pub(crate) prev: InstrId,
    pub(crate) next: InstrId,
    /// Where references to this instruction land after code was inserted in front of it
    pub(crate) label: InstrId,
}

impl Instruction {
    pub(crate) fn new(opcode: u16, operand: Operand) -> Self {
        Instruction {
            opcode,
            operand,
            offset: 0,
            prev: SENTINEL,
            next: SENTINEL,
            label: SENTINEL,
        }
    }

    /// Operand kind of this instruction's opcode.
    #[must_use]
    pub fn operand_kind(&self) -> OperandKind {
        operand_kind(self.opcode).unwrap_or(OperandKind::None)
    }

    /// Encoded size of opcode plus operand.
    #[must_use]
    pub fn size(&self) -> usize {
        let opcode_size = if opcodes::is_prefixed(self.opcode) { 2 } else { 1 };
        opcode_size + self.operand.encoded_size(self.operand_kind())
    }

    /// Returns true for `call` and `callvirt`.
    #[must_use]
    pub fn is_call(&self) -> bool {
        opcodes::is_call(self.opcode)
    }

    pub(crate) fn write_opcode(&self, out: &mut Vec<u8>) {
        if opcodes::is_prefixed(self.opcode) {
            out.push(FE_PREFIX);
        }
        out.push((self.opcode & 0xFF) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes::*;

    #[test]
    fn operand_kinds() {
        assert_eq!(operand_kind(NOP), Some(OperandKind::None));
        assert_eq!(operand_kind(LDARG_S), Some(OperandKind::UInt8));
        assert_eq!(operand_kind(LDC_I4_S), Some(OperandKind::Int8));
        assert_eq!(operand_kind(LDC_I4), Some(OperandKind::Int32));
        assert_eq!(operand_kind(LDC_I8), Some(OperandKind::Int64));
        assert_eq!(operand_kind(LDC_R4), Some(OperandKind::Float32));
        assert_eq!(operand_kind(LDC_R8), Some(OperandKind::Float64));
        assert_eq!(operand_kind(CALL), Some(OperandKind::Token));
        assert_eq!(operand_kind(CALLVIRT), Some(OperandKind::Token));
        assert_eq!(operand_kind(LDSTR), Some(OperandKind::Token));
        assert_eq!(operand_kind(BR_S), Some(OperandKind::ShortBranch));
        assert_eq!(operand_kind(LEAVE_S), Some(OperandKind::ShortBranch));
        assert_eq!(operand_kind(BLT_UN), Some(OperandKind::Branch));
        assert_eq!(operand_kind(LEAVE), Some(OperandKind::Branch));
        assert_eq!(operand_kind(SWITCH), Some(OperandKind::Switch));
        assert_eq!(operand_kind(ENDFINALLY), Some(OperandKind::None));
        assert_eq!(operand_kind(LDTOKEN), Some(OperandKind::Token));
        assert_eq!(operand_kind(0x24), None);
        assert_eq!(operand_kind(0xA6), None);
    }

    #[test]
    fn prefixed_operand_kinds() {
        assert_eq!(operand_kind(CEQ), Some(OperandKind::None));
        assert_eq!(operand_kind(LDFTN), Some(OperandKind::Token));
        assert_eq!(operand_kind(LDARG), Some(OperandKind::UInt16));
        assert_eq!(operand_kind(STLOC), Some(OperandKind::UInt16));
        assert_eq!(operand_kind(UNALIGNED), Some(OperandKind::UInt8));
        assert_eq!(operand_kind(CONSTRAINED), Some(OperandKind::Token));
        assert_eq!(operand_kind(SIZEOF), Some(OperandKind::Token));
        assert_eq!(operand_kind(READONLY), Some(OperandKind::None));
        assert_eq!(operand_kind(0xFE08), None);
        assert_eq!(operand_kind(0xFE1F), None);
    }

    #[test]
    fn sizes() {
        assert_eq!(Instruction::new(RET, Operand::None).size(), 1);
        assert_eq!(Instruction::new(CALL, Operand::Token(Token::new(0x0A00_0001))).size(), 5);
        assert_eq!(Instruction::new(BR_S, Operand::Branch(1)).size(), 2);
        assert_eq!(Instruction::new(LDARG, Operand::UInt16(300)).size(), 4);
        assert_eq!(Instruction::new(SWITCH, Operand::Switch(vec![1, 2, 3])).size(), 17);
    }

    #[test]
    fn operand_fits() {
        assert!(Operand::Branch(3).fits(OperandKind::ShortBranch));
        assert!(Operand::Branch(3).fits(OperandKind::Branch));
        assert!(!Operand::Int32(3).fits(OperandKind::Token));
        assert!(!Operand::None.fits(OperandKind::Int8));
    }
}
