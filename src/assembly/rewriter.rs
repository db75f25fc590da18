//! Editable instruction list of one method body.
//!
//! [`ILRewriter`] decodes a method body into an arena of [`Instruction`]s linked in code order,
//! lets callers insert and overwrite instructions, and encodes the result back into a method
//! body with branch displacements, header format and exception clauses recomputed.
//!
//! # Lifecycle
//!
//! ```text
//! Unparsed --import--> Imported --edit--> Modified --export--> Exported
//!                          |                                     ^
//!                          +----------------export---------------+
//! ```
//!
//! Edits are only accepted between import and export; a rewriter is used for exactly one
//! method body and discarded after export.
//!
//! # Examples
//!
//! ```rust
//! use dotweave::assembly::{opcodes, ILRewriter, Operand};
//!
//! // tiny header, `ldc.i4.1; ret`
//! let body = [0x0A, 0x17, 0x2A];
//!
//! let mut rewriter = ILRewriter::new();
//! rewriter.import(&body)?;
//!
//! let ret = rewriter.last().unwrap();
//! rewriter.insert_before(ret, opcodes::POP, Operand::None)?;
//! rewriter.insert_before(ret, opcodes::LDC_I4_2, Operand::None)?;
//!
//! assert_eq!(rewriter.export()?, [0x12, 0x17, 0x26, 0x18, 0x2A]);
//! # Ok::<(), dotweave::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{operand_kind, InstrId, Instruction, Operand, OperandKind, SENTINEL},
        opcodes::{self, FE_PREFIX},
    },
    file::{io::write_le, parser::Parser},
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody},
        token::Token,
    },
    Error::{InvalidInstruction, InvalidState, MethodTooLarge},
    Result,
};

/// Largest code size the runtime accepts for a method body.
pub const MAX_CODE_SIZE: usize = 0x3FFF_FFFF;

/// Lifecycle state of an [`ILRewriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriterState {
    /// Nothing imported yet
    Unparsed,
    /// A body was imported and not changed
    Imported,
    /// At least one edit was made
    Modified,
    /// The body was exported; the rewriter is spent
    Exported,
}

/// An exception clause whose boundaries are instructions.
///
/// End boundaries are exclusive: they name the first instruction after the region, or
/// [`SENTINEL`] if the region runs to the end of the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionClause {
    /// Kind of the clause
    pub flags: ExceptionHandlerFlags,
    /// First instruction of the protected region
    pub try_begin: InstrId,
    /// First instruction after the protected region
    pub try_end: InstrId,
    /// First instruction of the handler
    pub handler_begin: InstrId,
    /// First instruction after the handler
    pub handler_end: InstrId,
    /// First instruction of the filter, for filter clauses
    pub filter: Option<InstrId>,
    /// Caught type token, for typed clauses
    pub class_token: u32,
}

/// Editable instruction list of one method body.
pub struct ILRewriter {
    state: RewriterState,
    instructions: Vec<Instruction>,
    clauses: Vec<ExceptionClause>,
    header: Option<MethodBody>,
    max_stack: usize,
    local_var_sig_token: Token,
}

impl Default for ILRewriter {
    fn default() -> Self {
        ILRewriter::new()
    }
}

impl ILRewriter {
    /// Create an empty rewriter in the [`RewriterState::Unparsed`] state.
    #[must_use]
    pub fn new() -> Self {
        let mut sentinel = Instruction::new(opcodes::NOP, Operand::None);
        sentinel.label = SENTINEL;

        ILRewriter {
            state: RewriterState::Unparsed,
            instructions: vec![sentinel],
            clauses: Vec::new(),
            header: None,
            max_stack: 0,
            local_var_sig_token: Token::default(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RewriterState {
        self.state
    }

    /// Decode a method body (header, code and exception sections).
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] if a body was already imported, and a decode
    /// error for corrupt headers, unknown opcodes, truncated operands or branch targets that
    /// do not land on an instruction boundary.
    pub fn import(&mut self, data: &[u8]) -> Result<()> {
        if self.state != RewriterState::Unparsed {
            return Err(InvalidState("a method body was already imported"));
        }

        let body = MethodBody::from(data)?;
        let code = body.code(data)?;
        let boundaries = self.decode(code)?;

        let boundary = |offset: u32| -> Result<InstrId> {
            boundaries
                .get(offset as usize)
                .copied()
                .flatten()
                .ok_or_else(|| {
                    malformed_error!("Exception clause offset {} is not an instruction", offset)
                })
        };
        let end = |offset: u32, length: u32| -> Result<InstrId> {
            boundary(offset.checked_add(length).ok_or_else(|| {
                malformed_error!("Exception clause range overflows - {} + {}", offset, length)
            })?)
        };

        let mut clauses = Vec::with_capacity(body.exception_handlers.len());
        for handler in &body.exception_handlers {
            clauses.push(ExceptionClause {
                flags: handler.flags,
                try_begin: boundary(handler.try_offset)?,
                try_end: end(handler.try_offset, handler.try_length)?,
                handler_begin: boundary(handler.handler_offset)?,
                handler_end: end(handler.handler_offset, handler.handler_length)?,
                filter: if handler.is_filter() {
                    Some(boundary(handler.class_token_or_filter)?)
                } else {
                    None
                },
                class_token: if handler.is_filter() {
                    0
                } else {
                    handler.class_token_or_filter
                },
            });
        }

        self.clauses = clauses;
        self.max_stack = body.max_stack;
        self.local_var_sig_token = Token::new(body.local_var_sig_token);
        self.header = Some(body);
        self.state = RewriterState::Imported;
        Ok(())
    }

    /// Decode `code` into the instruction list and return the offset-to-instruction map.
    ///
    /// The map has one entry per code byte plus one for the end of the code, which maps to
    /// [`SENTINEL`].
    fn decode(&mut self, code: &[u8]) -> Result<Vec<Option<InstrId>>> {
        let mut boundaries: Vec<Option<InstrId>> = vec![None; code.len() + 1];
        boundaries[code.len()] = Some(SENTINEL);

        let mut pending: Vec<(InstrId, Vec<i64>)> = Vec::new();
        let mut parser = Parser::new(code);

        while parser.has_more_data() {
            let offset = parser.pos();
            let first = parser.read_le::<u8>()?;
            let opcode = if first == FE_PREFIX {
                0xFE00 | u16::from(parser.read_le::<u8>()?)
            } else {
                u16::from(first)
            };

            let kind = operand_kind(opcode).ok_or_else(|| {
                malformed_error!("Invalid opcode 0x{:x} at offset {}", opcode, offset)
            })?;

            let mut targets = Vec::new();
            let operand = match kind {
                OperandKind::None => Operand::None,
                OperandKind::Int8 => Operand::Int8(parser.read_le::<i8>()?),
                OperandKind::UInt8 => Operand::UInt8(parser.read_le::<u8>()?),
                OperandKind::UInt16 => Operand::UInt16(parser.read_le::<u16>()?),
                OperandKind::Int32 => Operand::Int32(parser.read_le::<i32>()?),
                OperandKind::Int64 => Operand::Int64(parser.read_le::<i64>()?),
                OperandKind::Float32 => Operand::Float32(parser.read_le::<f32>()?),
                OperandKind::Float64 => Operand::Float64(parser.read_le::<f64>()?),
                OperandKind::Token => Operand::Token(Token::new(parser.read_le::<u32>()?)),
                OperandKind::ShortBranch => {
                    let displacement = i64::from(parser.read_le::<i8>()?);
                    targets.push(parser.pos() as i64 + displacement);
                    Operand::Branch(SENTINEL)
                }
                OperandKind::Branch => {
                    let displacement = i64::from(parser.read_le::<i32>()?);
                    targets.push(parser.pos() as i64 + displacement);
                    Operand::Branch(SENTINEL)
                }
                OperandKind::Switch => {
                    let count = parser.read_le::<u32>()? as usize;
                    let table_size = count
                        .checked_mul(4)
                        .filter(|size| parser.pos() + size <= parser.len())
                        .ok_or_else(|| {
                            malformed_error!("Switch at offset {} has {} targets", offset, count)
                        })?;
                    let base = (parser.pos() + table_size) as i64;
                    for _ in 0..count {
                        targets.push(base + i64::from(parser.read_le::<i32>()?));
                    }
                    Operand::Switch(vec![SENTINEL; count])
                }
            };

            let mut instruction = Instruction::new(opcode, operand);
            instruction.offset = offset as u32;
            let id = self.push_back(instruction);
            boundaries[offset] = Some(id);

            if kind == OperandKind::ShortBranch
                || kind == OperandKind::Branch
                || kind == OperandKind::Switch
            {
                pending.push((id, targets));
            }
        }

        for (id, targets) in pending {
            let resolved = targets
                .iter()
                .map(|&target| {
                    usize::try_from(target)
                        .ok()
                        .and_then(|target| boundaries.get(target).copied().flatten())
                        .ok_or_else(|| {
                            malformed_error!(
                                "Branch at offset {} targets {} which is not an instruction",
                                self.instructions[id].offset,
                                target
                            )
                        })
                })
                .collect::<Result<Vec<InstrId>>>()?;

            self.instructions[id].operand = match self.instructions[id].operand {
                Operand::Switch(_) => Operand::Switch(resolved),
                _ => Operand::Branch(resolved[0]),
            };
        }

        Ok(boundaries)
    }

    fn push_back(&mut self, mut instruction: Instruction) -> InstrId {
        let id = self.instructions.len();
        let last = self.instructions[SENTINEL].prev;

        instruction.prev = last;
        instruction.next = SENTINEL;
        instruction.label = id;
        self.instructions.push(instruction);

        self.instructions[last].next = id;
        self.instructions[SENTINEL].prev = id;
        id
    }

    fn check_editable(&self) -> Result<()> {
        match self.state {
            RewriterState::Imported | RewriterState::Modified => Ok(()),
            RewriterState::Unparsed => Err(InvalidState("no method body imported")),
            RewriterState::Exported => Err(InvalidState("method body already exported")),
        }
    }

    fn check_instruction(&self, opcode: u16, operand: &Operand) -> Result<()> {
        let kind = operand_kind(opcode)
            .ok_or_else(|| malformed_error!("Invalid opcode 0x{:x}", opcode))?;
        if !operand.fits(kind) {
            return Err(malformed_error!(
                "Operand {:?} does not fit opcode 0x{:x}",
                operand,
                opcode
            ));
        }

        let targets: &[InstrId] = match operand {
            Operand::Branch(target) => std::slice::from_ref(target),
            Operand::Switch(targets) => targets,
            _ => &[],
        };
        if let Some(&target) = targets.iter().find(|&&target| target >= self.instructions.len()) {
            return Err(InvalidInstruction(target));
        }
        Ok(())
    }

    /// Insert a new instruction in front of `at` and return its id.
    ///
    /// Branches and exception clause boundaries that referred to `at` now refer to the
    /// inserted instruction, so the new code runs whenever `at` would have. Passing
    /// [`SENTINEL`] appends at the end of the code.
    ///
    /// # Errors
    /// Returns an error if the rewriter is not editable, `at` does not exist, or the operand
    /// does not fit the opcode.
    pub fn insert_before(&mut self, at: InstrId, opcode: u16, operand: Operand) -> Result<InstrId> {
        self.check_editable()?;
        if at >= self.instructions.len() {
            return Err(InvalidInstruction(at));
        }
        self.check_instruction(opcode, &operand)?;

        let id = self.instructions.len();
        let prev = self.instructions[at].prev;

        let mut instruction = Instruction::new(opcode, operand);
        instruction.prev = prev;
        instruction.next = at;
        instruction.label = id;
        self.instructions.push(instruction);

        self.instructions[prev].next = id;
        self.instructions[at].prev = id;
        if self.instructions[at].label == at {
            self.instructions[at].label = id;
        }

        self.state = RewriterState::Modified;
        Ok(id)
    }

    /// Overwrite the opcode and operand of `id` in place.
    ///
    /// # Errors
    /// Returns an error if the rewriter is not editable, `id` does not exist, or the operand
    /// does not fit the opcode.
    pub fn set_instruction(&mut self, id: InstrId, opcode: u16, operand: Operand) -> Result<()> {
        self.check_editable()?;
        if id == SENTINEL || id >= self.instructions.len() {
            return Err(InvalidInstruction(id));
        }
        self.check_instruction(opcode, &operand)?;

        let instruction = &mut self.instructions[id];
        instruction.opcode = opcode;
        instruction.operand = operand;
        self.state = RewriterState::Modified;
        Ok(())
    }

    /// The instruction with id `id`.
    #[must_use]
    pub fn instruction(&self, id: InstrId) -> Option<&Instruction> {
        if id == SENTINEL {
            return None;
        }
        self.instructions.get(id)
    }

    /// First instruction in code order.
    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.next_of(SENTINEL)
    }

    /// Last instruction in code order.
    #[must_use]
    pub fn last(&self) -> Option<InstrId> {
        self.prev_of(SENTINEL)
    }

    /// Instruction following `id` in code order.
    #[must_use]
    pub fn next_of(&self, id: InstrId) -> Option<InstrId> {
        let next = self.instructions.get(id)?.next;
        (next != SENTINEL).then_some(next)
    }

    /// Instruction preceding `id` in code order.
    #[must_use]
    pub fn prev_of(&self, id: InstrId) -> Option<InstrId> {
        let prev = self.instructions.get(id)?.prev;
        (prev != SENTINEL).then_some(prev)
    }

    /// Ids of all instructions in code order.
    #[must_use]
    pub fn ids(&self) -> Vec<InstrId> {
        let mut ids = Vec::with_capacity(self.instructions.len() - 1);
        let mut current = self.instructions[SENTINEL].next;
        while current != SENTINEL {
            ids.push(current);
            current = self.instructions[current].next;
        }
        ids
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len() - 1
    }

    /// Returns true if there are no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exception clauses of the body.
    #[must_use]
    pub fn exception_clauses(&self) -> &[ExceptionClause] {
        &self.clauses
    }

    /// Maximum evaluation stack depth written to the header.
    #[must_use]
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// Set the maximum evaluation stack depth.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] if the rewriter is not editable.
    pub fn set_max_stack(&mut self, max_stack: usize) -> Result<()> {
        self.check_editable()?;
        self.max_stack = max_stack;
        self.state = RewriterState::Modified;
        Ok(())
    }

    /// Raise the maximum evaluation stack depth by `delta`.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] if the rewriter is not editable.
    pub fn raise_max_stack(&mut self, delta: usize) -> Result<()> {
        let max_stack = self.max_stack.saturating_add(delta);
        self.set_max_stack(max_stack)
    }

    /// Token of the local variable signature, nil if the method has no locals.
    #[must_use]
    pub fn local_var_sig_token(&self) -> Token {
        self.local_var_sig_token
    }

    /// Replace the local variable signature. A non-nil token forces a fat header.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] if the rewriter is not editable.
    pub fn set_local_var_sig_token(&mut self, token: Token) -> Result<()> {
        self.check_editable()?;
        self.local_var_sig_token = token;
        self.state = RewriterState::Modified;
        Ok(())
    }

    /// Follow insertion labels to the instruction that references to `id` land on.
    fn resolve(&self, mut id: InstrId) -> InstrId {
        while self.instructions[id].label != id {
            id = self.instructions[id].label;
        }
        id
    }

    fn target_offset(&self, id: InstrId) -> i64 {
        i64::from(self.instructions[self.resolve(id)].offset)
    }

    /// Assign offsets to every instruction, widening short branches until the layout is
    /// stable. Returns the code size.
    fn layout(&mut self, order: &[InstrId]) -> Result<usize> {
        loop {
            let mut offset = 0_usize;
            for &id in order {
                self.instructions[id].offset = offset as u32;
                offset += self.instructions[id].size();
                if offset > MAX_CODE_SIZE {
                    return Err(MethodTooLarge(offset));
                }
            }
            self.instructions[SENTINEL].offset = offset as u32;

            let mut widened = false;
            for &id in order {
                let instruction = &self.instructions[id];
                if instruction.operand_kind() != OperandKind::ShortBranch {
                    continue;
                }
                let Operand::Branch(target) = instruction.operand else {
                    continue;
                };

                let next = i64::from(instruction.offset) + instruction.size() as i64;
                let displacement = self.target_offset(target) - next;
                if i8::try_from(displacement).is_err() {
                    if let Some(long) = opcodes::long_branch_form(instruction.opcode) {
                        self.instructions[id].opcode = long;
                        widened = true;
                    }
                }
            }

            if !widened {
                return Ok(offset);
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn emit_code(&self, order: &[InstrId], code_size: usize) -> Vec<u8> {
        let mut code = Vec::with_capacity(code_size);

        for &id in order {
            let instruction = &self.instructions[id];
            instruction.write_opcode(&mut code);
            let next = i64::from(instruction.offset) + instruction.size() as i64;

            match &instruction.operand {
                Operand::None => {}
                Operand::Int8(value) => write_le(&mut code, *value),
                Operand::UInt8(value) => write_le(&mut code, *value),
                Operand::UInt16(value) => write_le(&mut code, *value),
                Operand::Int32(value) => write_le(&mut code, *value),
                Operand::Int64(value) => write_le(&mut code, *value),
                Operand::Float32(value) => write_le(&mut code, *value),
                Operand::Float64(value) => write_le(&mut code, *value),
                Operand::Token(token) => write_le(&mut code, token.value()),
                Operand::Branch(target) => {
                    let displacement = self.target_offset(*target) - next;
                    if instruction.operand_kind() == OperandKind::ShortBranch {
                        write_le(&mut code, displacement as i8);
                    } else {
                        write_le(&mut code, displacement as i32);
                    }
                }
                Operand::Switch(targets) => {
                    write_le(&mut code, targets.len() as u32);
                    for target in targets {
                        write_le(&mut code, (self.target_offset(*target) - next) as i32);
                    }
                }
            }
        }

        code
    }

    fn exception_handlers(&self) -> Result<Vec<ExceptionHandler>> {
        let offset = |id: InstrId| self.instructions[self.resolve(id)].offset;
        let length = |begin: InstrId, end: InstrId| {
            offset(end).checked_sub(offset(begin)).ok_or_else(|| {
                malformed_error!("Exception clause ends before it begins")
            })
        };

        self.clauses
            .iter()
            .map(|clause| {
                Ok(ExceptionHandler {
                    flags: clause.flags,
                    try_offset: offset(clause.try_begin),
                    try_length: length(clause.try_begin, clause.try_end)?,
                    handler_offset: offset(clause.handler_begin),
                    handler_length: length(clause.handler_begin, clause.handler_end)?,
                    class_token_or_filter: match clause.filter {
                        Some(filter) => offset(filter),
                        None => clause.class_token,
                    },
                })
            })
            .collect()
    }

    /// Encode the method body.
    ///
    /// The header stays tiny if the body was imported tiny and still qualifies, exception
    /// sections stay small if they were imported small and every clause still fits.
    ///
    /// # Errors
    /// Returns [`crate::Error::InvalidState`] before import or after a previous export, and
    /// [`crate::Error::MethodTooLarge`] if the code exceeds [`MAX_CODE_SIZE`].
    pub fn export(&mut self) -> Result<Vec<u8>> {
        self.check_editable()?;
        let Some(mut body) = self.header.clone() else {
            return Err(InvalidState("no method body imported"));
        };

        let order = self.ids();
        let code_size = self.layout(&order)?;
        let code = self.emit_code(&order, code_size);

        body.max_stack = self.max_stack;
        body.local_var_sig_token = self.local_var_sig_token.value();
        body.exception_handlers = self.exception_handlers()?;
        body.size_code = code.len();

        let mut out = Vec::with_capacity(code.len() + 64);
        body.write_to(&mut out, &code)?;

        self.state = RewriterState::Exported;
        Ok(out)
    }
}
