//! CIL opcode values (ECMA-335 Partition III).
//!
//! Opcodes are stored as `u16`: single-byte opcodes keep their byte value, two-byte opcodes
//! that use the `0xFE` prefix are stored as `0xFE00 | second_byte` (e.g. [`CEQ`] = `0xFE01`).
//! [`is_prefixed`] tells the two apart when encoding.
#![allow(missing_docs)]

// ── Single-byte opcodes ────────────────────────────────────────────────────

pub const NOP: u16 = 0x00;
pub const BREAK: u16 = 0x01;

pub const LDARG_0: u16 = 0x02;
pub const LDARG_1: u16 = 0x03;
pub const LDARG_2: u16 = 0x04;
pub const LDARG_3: u16 = 0x05;
pub const LDLOC_0: u16 = 0x06;
pub const STLOC_0: u16 = 0x0A;
pub const LDARG_S: u16 = 0x0E;
pub const LDLOC_S: u16 = 0x11;
pub const STLOC_S: u16 = 0x13;

pub const LDNULL: u16 = 0x14;
pub const LDC_I4_M1: u16 = 0x15;
pub const LDC_I4_0: u16 = 0x16;
pub const LDC_I4_1: u16 = 0x17;
pub const LDC_I4_2: u16 = 0x18;
pub const LDC_I4_3: u16 = 0x19;
pub const LDC_I4_4: u16 = 0x1A;
pub const LDC_I4_5: u16 = 0x1B;
pub const LDC_I4_6: u16 = 0x1C;
pub const LDC_I4_7: u16 = 0x1D;
pub const LDC_I4_8: u16 = 0x1E;
pub const LDC_I4_S: u16 = 0x1F;
pub const LDC_I4: u16 = 0x20;
pub const LDC_I8: u16 = 0x21;
pub const LDC_R4: u16 = 0x22;
pub const LDC_R8: u16 = 0x23;

pub const DUP: u16 = 0x25;
pub const POP: u16 = 0x26;
pub const JMP: u16 = 0x27;
pub const CALL: u16 = 0x28;
pub const CALLI: u16 = 0x29;
pub const RET: u16 = 0x2A;

// Short branches, each paired with the long form at +0x0D
pub const BR_S: u16 = 0x2B;
pub const BRFALSE_S: u16 = 0x2C;
pub const BRTRUE_S: u16 = 0x2D;
pub const BEQ_S: u16 = 0x2E;
pub const BLT_UN_S: u16 = 0x37;

pub const BR: u16 = 0x38;
pub const BRFALSE: u16 = 0x39;
pub const BRTRUE: u16 = 0x3A;
pub const BEQ: u16 = 0x3B;
pub const BLT_UN: u16 = 0x44;

pub const SWITCH: u16 = 0x45;

pub const ADD: u16 = 0x58;
pub const CALLVIRT: u16 = 0x6F;
pub const LDSTR: u16 = 0x72;
pub const NEWOBJ: u16 = 0x73;
pub const THROW: u16 = 0x7A;
pub const LDFLD: u16 = 0x7B;
pub const BOX: u16 = 0x8C;
pub const LDTOKEN: u16 = 0xD0;
pub const ENDFINALLY: u16 = 0xDC;
pub const LEAVE: u16 = 0xDD;
pub const LEAVE_S: u16 = 0xDE;

// ── Two-byte opcodes (0xFE prefix) ─────────────────────────────────────────

pub const FE_PREFIX: u8 = 0xFE;

pub const ARGLIST: u16 = 0xFE00;
pub const CEQ: u16 = 0xFE01;
pub const LDFTN: u16 = 0xFE06;
pub const LDVIRTFTN: u16 = 0xFE07;
pub const LDARG: u16 = 0xFE09;
pub const LDLOC: u16 = 0xFE0C;
pub const STLOC: u16 = 0xFE0E;
pub const ENDFILTER: u16 = 0xFE11;
pub const UNALIGNED: u16 = 0xFE12;
pub const TAIL: u16 = 0xFE14;
pub const CONSTRAINED: u16 = 0xFE16;
pub const RETHROW: u16 = 0xFE1A;
pub const SIZEOF: u16 = 0xFE1C;
pub const READONLY: u16 = 0xFE1E;

/// Returns true if `opcode` is encoded with the `0xFE` prefix byte.
#[must_use]
pub fn is_prefixed(opcode: u16) -> bool {
    opcode >> 8 == u16::from(FE_PREFIX)
}

/// Returns true for `call` and `callvirt`.
#[must_use]
pub fn is_call(opcode: u16) -> bool {
    opcode == CALL || opcode == CALLVIRT
}

/// Long form of a short branch, or `None` if `opcode` is not a short branch.
#[must_use]
pub fn long_branch_form(opcode: u16) -> Option<u16> {
    match opcode {
        BR_S..=BLT_UN_S => Some(opcode + (BR - BR_S)),
        LEAVE_S => Some(LEAVE),
        _ => None,
    }
}
