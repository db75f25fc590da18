//! Positional insertion helper on top of [`ILRewriter`].

use crate::{
    assembly::{
        instruction::{InstrId, Operand},
        opcodes::{
            CALL, CALLVIRT, LDARG, LDARG_0, LDARG_S, LDC_I4, LDC_I4_0, LDC_I4_M1, LDC_I4_S, LDNULL,
            POP, RET,
        },
        rewriter::ILRewriter,
    },
    metadata::token::Token,
    Result,
};

/// Inserts instructions in front of a position of an [`ILRewriter`].
///
/// Every insertion lands directly before the current position, so a sequence of calls emits
/// instructions in the order they were made.
pub struct InstructionCursor<'a> {
    rewriter: &'a mut ILRewriter,
    position: InstrId,
}

impl<'a> InstructionCursor<'a> {
    /// Create a cursor inserting in front of `position`.
    pub fn new(rewriter: &'a mut ILRewriter, position: InstrId) -> Self {
        InstructionCursor { rewriter, position }
    }

    /// The instruction new code is inserted in front of.
    #[must_use]
    pub fn position(&self) -> InstrId {
        self.position
    }

    /// Move the cursor.
    pub fn set_position(&mut self, position: InstrId) {
        self.position = position;
    }

    /// Insert a raw instruction.
    ///
    /// # Errors
    /// Propagates the errors of [`ILRewriter::insert_before`].
    pub fn emit(&mut self, opcode: u16, operand: Operand) -> Result<InstrId> {
        self.rewriter.insert_before(self.position, opcode, operand)
    }

    /// Push a 32-bit constant using the most compact encoding.
    ///
    /// # Errors
    /// Propagates the errors of [`ILRewriter::insert_before`].
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn load_int32(&mut self, value: i32) -> Result<InstrId> {
        match value {
            -1 => self.emit(LDC_I4_M1, Operand::None),
            0..=8 => self.emit(LDC_I4_0 + value as u16, Operand::None),
            -128..=127 => self.emit(LDC_I4_S, Operand::Int8(value as i8)),
            _ => self.emit(LDC_I4, Operand::Int32(value)),
        }
    }

    /// Push `null`.
    ///
    /// # Errors
    /// Propagates the errors of [`ILRewriter::insert_before`].
    pub fn load_null(&mut self) -> Result<InstrId> {
        self.emit(LDNULL, Operand::None)
    }

    /// Push argument `index`.
    ///
    /// # Errors
    /// Propagates the errors of [`ILRewriter::insert_before`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn load_argument(&mut self, index: u16) -> Result<InstrId> {
        match index {
            0..=3 => self.emit(LDARG_0 + index, Operand::None),
            4..=255 => self.emit(LDARG_S, Operand::UInt8(index as u8)),
            _ => self.emit(LDARG, Operand::UInt16(index)),
        }
    }

    /// Call the method `token`.
    ///
    /// # Errors
    /// Propagates the errors of [`ILRewriter::insert_before`].
    pub fn call_member(&mut self, token: Token, is_virtual: bool) -> Result<InstrId> {
        let opcode = if is_virtual { CALLVIRT } else { CALL };
        self.emit(opcode, Operand::Token(token))
    }

    /// Discard the top of the stack.
    ///
    /// # Errors
    /// Propagates the errors of [`ILRewriter::insert_before`].
    pub fn pop(&mut self) -> Result<InstrId> {
        self.emit(POP, Operand::None)
    }

    /// Return from the method.
    ///
    /// # Errors
    /// Propagates the errors of [`ILRewriter::insert_before`].
    pub fn ret(&mut self) -> Result<InstrId> {
        self.emit(RET, Operand::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembly::opcodes::*;

    fn emitted(build: impl FnOnce(&mut InstructionCursor)) -> Vec<(u16, Operand)> {
        let mut rewriter = ILRewriter::new();
        rewriter.import(&[0x06, 0x2A]).unwrap();
        let ret = rewriter.first().unwrap();

        build(&mut InstructionCursor::new(&mut rewriter, ret));

        rewriter
            .ids()
            .into_iter()
            .filter(|&id| id != ret)
            .map(|id| {
                let instruction = rewriter.instruction(id).unwrap();
                (instruction.opcode, instruction.operand.clone())
            })
            .collect()
    }

    #[test]
    fn compact_int32() {
        let emitted = emitted(|cursor| {
            for value in [-1, 0, 8, 9, -128, 127, 128, -129, 0x2800_0001] {
                cursor.load_int32(value).unwrap();
            }
        });

        assert_eq!(
            emitted,
            [
                (LDC_I4_M1, Operand::None),
                (LDC_I4_0, Operand::None),
                (LDC_I4_8, Operand::None),
                (LDC_I4_S, Operand::Int8(9)),
                (LDC_I4_S, Operand::Int8(-128)),
                (LDC_I4_S, Operand::Int8(127)),
                (LDC_I4, Operand::Int32(128)),
                (LDC_I4, Operand::Int32(-129)),
                (LDC_I4, Operand::Int32(0x2800_0001)),
            ]
        );
    }

    #[test]
    fn arguments_and_calls() {
        let token = Token::new(0x0A00_0003);
        let emitted = emitted(|cursor| {
            cursor.load_argument(2).unwrap();
            cursor.load_argument(7).unwrap();
            cursor.load_argument(300).unwrap();
            cursor.load_null().unwrap();
            cursor.call_member(token, false).unwrap();
            cursor.call_member(token, true).unwrap();
            cursor.pop().unwrap();
        });

        assert_eq!(
            emitted,
            [
                (LDARG_2, Operand::None),
                (LDARG_S, Operand::UInt8(7)),
                (LDARG, Operand::UInt16(300)),
                (LDNULL, Operand::None),
                (CALL, Operand::Token(token)),
                (CALLVIRT, Operand::Token(token)),
                (POP, Operand::None),
            ]
        );
    }
}
