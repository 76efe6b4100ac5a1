//! Instruction bytes and the static dispatch table
//!
//! Each defined opcode has an `OpInfo` entry: mnemonic, required operand
//! count, produced word count, static gas, and whether it mutates state.
//! Dynamic costs (memory growth, copies, hashing, storage writes, logs,
//! call/create surcharges) are charged by the instruction handlers; the
//! static portion is charged once by the dispatch loop before the handler
//! runs. Undefined bytes have no entry and fault as `InvalidOpcode`.

use once_cell::sync::Lazy;

use crate::gas::{
    GAS_BASE, GAS_CALL, GAS_CREATE, GAS_EXT, GAS_HIGH, GAS_LOW, GAS_MID,
    GAS_SELFDESTRUCT, GAS_SLOAD, GAS_VERYLOW, GAS_ZERO,
};
use crate::types::Gas;

pub const STOP: u8 = 0x00;
pub const ADD: u8 = 0x01;
pub const MUL: u8 = 0x02;
pub const SUB: u8 = 0x03;
pub const DIV: u8 = 0x04;
pub const SDIV: u8 = 0x05;
pub const MOD: u8 = 0x06;
pub const SMOD: u8 = 0x07;
pub const ADDMOD: u8 = 0x08;
pub const MULMOD: u8 = 0x09;
pub const EXP: u8 = 0x0a;
pub const SIGNEXTEND: u8 = 0x0b;

pub const LT: u8 = 0x10;
pub const GT: u8 = 0x11;
pub const SLT: u8 = 0x12;
pub const SGT: u8 = 0x13;
pub const EQ: u8 = 0x14;
pub const ISZERO: u8 = 0x15;
pub const AND: u8 = 0x16;
pub const OR: u8 = 0x17;
pub const XOR: u8 = 0x18;
pub const NOT: u8 = 0x19;
pub const BYTE: u8 = 0x1a;
pub const SHL: u8 = 0x1b;
pub const SHR: u8 = 0x1c;
pub const SAR: u8 = 0x1d;

pub const KECCAK256: u8 = 0x20;

pub const ADDRESS: u8 = 0x30;
pub const BALANCE: u8 = 0x31;
pub const ORIGIN: u8 = 0x32;
pub const CALLER: u8 = 0x33;
pub const CALLVALUE: u8 = 0x34;
pub const CALLDATALOAD: u8 = 0x35;
pub const CALLDATASIZE: u8 = 0x36;
pub const CALLDATACOPY: u8 = 0x37;
pub const CODESIZE: u8 = 0x38;
pub const CODECOPY: u8 = 0x39;
pub const EXTCODESIZE: u8 = 0x3b;
pub const RETURNDATASIZE: u8 = 0x3d;
pub const RETURNDATACOPY: u8 = 0x3e;

pub const TIMESTAMP: u8 = 0x42;
pub const NUMBER: u8 = 0x43;

pub const POP: u8 = 0x50;
pub const MLOAD: u8 = 0x51;
pub const MSTORE: u8 = 0x52;
pub const MSTORE8: u8 = 0x53;
pub const SLOAD: u8 = 0x54;
pub const SSTORE: u8 = 0x55;
pub const JUMP: u8 = 0x56;
pub const JUMPI: u8 = 0x57;
pub const PC: u8 = 0x58;
pub const MSIZE: u8 = 0x59;
pub const GAS: u8 = 0x5a;
pub const JUMPDEST: u8 = 0x5b;

pub const PUSH1: u8 = 0x60;
pub const PUSH32: u8 = 0x7f;
pub const DUP1: u8 = 0x80;
pub const DUP16: u8 = 0x8f;
pub const SWAP1: u8 = 0x90;
pub const SWAP16: u8 = 0x9f;
pub const LOG0: u8 = 0xa0;
pub const LOG4: u8 = 0xa4;

pub const CREATE: u8 = 0xf0;
pub const CALL: u8 = 0xf1;
pub const RETURN: u8 = 0xf3;
pub const CREATE2: u8 = 0xf5;
pub const STATICCALL: u8 = 0xfa;
pub const REVERT: u8 = 0xfd;
pub const SELFDESTRUCT: u8 = 0xff;

/// True for PUSH1 through PUSH32.
pub fn is_push(op: u8) -> bool {
    (PUSH1..=PUSH32).contains(&op)
}

/// Immediate operand width of a PUSH instruction (0 for non-push bytes).
pub fn push_bytes(op: u8) -> usize {
    if is_push(op) {
        (op - PUSH1) as usize + 1
    } else {
        0
    }
}

/// Static metadata for one defined instruction.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    /// Mnemonic for tracing.
    pub name: &'static str,
    /// Words consumed from the stack.
    pub stack_in: usize,
    /// Words pushed back (net growth is `stack_out - stack_in`).
    pub stack_out: usize,
    /// Fixed gas charged before the handler runs.
    pub gas: Gas,
    /// Mutates state; rejected in static frames.
    pub writes: bool,
}

const fn op(
    name: &'static str,
    stack_in: usize,
    stack_out: usize,
    gas: Gas,
    writes: bool,
) -> Option<OpInfo> {
    Some(OpInfo {
        name,
        stack_in,
        stack_out,
        gas,
        writes,
    })
}

/// Metadata for the defined instruction at `byte`, if any.
pub fn info(byte: u8) -> Option<&'static OpInfo> {
    INSTRUCTION_TABLE[byte as usize].as_ref()
}

/// Process-wide instruction table, indexed by opcode byte.
pub static INSTRUCTION_TABLE: Lazy<[Option<OpInfo>; 256]> = Lazy::new(|| {
    let mut t: [Option<OpInfo>; 256] = [None; 256];

    t[STOP as usize] = op("STOP", 0, 0, GAS_ZERO, false);
    t[ADD as usize] = op("ADD", 2, 1, GAS_VERYLOW, false);
    t[MUL as usize] = op("MUL", 2, 1, GAS_LOW, false);
    t[SUB as usize] = op("SUB", 2, 1, GAS_VERYLOW, false);
    t[DIV as usize] = op("DIV", 2, 1, GAS_LOW, false);
    t[SDIV as usize] = op("SDIV", 2, 1, GAS_LOW, false);
    t[MOD as usize] = op("MOD", 2, 1, GAS_LOW, false);
    t[SMOD as usize] = op("SMOD", 2, 1, GAS_LOW, false);
    t[ADDMOD as usize] = op("ADDMOD", 3, 1, GAS_MID, false);
    t[MULMOD as usize] = op("MULMOD", 3, 1, GAS_MID, false);
    // EXP cost scales with the exponent width; handled dynamically.
    t[EXP as usize] = op("EXP", 2, 1, GAS_ZERO, false);
    t[SIGNEXTEND as usize] = op("SIGNEXTEND", 2, 1, GAS_LOW, false);

    t[LT as usize] = op("LT", 2, 1, GAS_VERYLOW, false);
    t[GT as usize] = op("GT", 2, 1, GAS_VERYLOW, false);
    t[SLT as usize] = op("SLT", 2, 1, GAS_VERYLOW, false);
    t[SGT as usize] = op("SGT", 2, 1, GAS_VERYLOW, false);
    t[EQ as usize] = op("EQ", 2, 1, GAS_VERYLOW, false);
    t[ISZERO as usize] = op("ISZERO", 1, 1, GAS_VERYLOW, false);
    t[AND as usize] = op("AND", 2, 1, GAS_VERYLOW, false);
    t[OR as usize] = op("OR", 2, 1, GAS_VERYLOW, false);
    t[XOR as usize] = op("XOR", 2, 1, GAS_VERYLOW, false);
    t[NOT as usize] = op("NOT", 1, 1, GAS_VERYLOW, false);
    t[BYTE as usize] = op("BYTE", 2, 1, GAS_VERYLOW, false);
    t[SHL as usize] = op("SHL", 2, 1, GAS_VERYLOW, false);
    t[SHR as usize] = op("SHR", 2, 1, GAS_VERYLOW, false);
    t[SAR as usize] = op("SAR", 2, 1, GAS_VERYLOW, false);

    t[KECCAK256 as usize] = op("KECCAK256", 2, 1, GAS_ZERO, false);

    t[ADDRESS as usize] = op("ADDRESS", 0, 1, GAS_BASE, false);
    t[BALANCE as usize] = op("BALANCE", 1, 1, GAS_EXT, false);
    t[ORIGIN as usize] = op("ORIGIN", 0, 1, GAS_BASE, false);
    t[CALLER as usize] = op("CALLER", 0, 1, GAS_BASE, false);
    t[CALLVALUE as usize] = op("CALLVALUE", 0, 1, GAS_BASE, false);
    t[CALLDATALOAD as usize] = op("CALLDATALOAD", 1, 1, GAS_VERYLOW, false);
    t[CALLDATASIZE as usize] = op("CALLDATASIZE", 0, 1, GAS_BASE, false);
    t[CALLDATACOPY as usize] = op("CALLDATACOPY", 3, 0, GAS_VERYLOW, false);
    t[CODESIZE as usize] = op("CODESIZE", 0, 1, GAS_BASE, false);
    t[CODECOPY as usize] = op("CODECOPY", 3, 0, GAS_VERYLOW, false);
    t[EXTCODESIZE as usize] = op("EXTCODESIZE", 1, 1, GAS_EXT, false);
    t[RETURNDATASIZE as usize] = op("RETURNDATASIZE", 0, 1, GAS_BASE, false);
    t[RETURNDATACOPY as usize] = op("RETURNDATACOPY", 3, 0, GAS_VERYLOW, false);

    t[TIMESTAMP as usize] = op("TIMESTAMP", 0, 1, GAS_BASE, false);
    t[NUMBER as usize] = op("NUMBER", 0, 1, GAS_BASE, false);

    t[POP as usize] = op("POP", 1, 0, GAS_BASE, false);
    t[MLOAD as usize] = op("MLOAD", 1, 1, GAS_VERYLOW, false);
    t[MSTORE as usize] = op("MSTORE", 2, 0, GAS_VERYLOW, false);
    t[MSTORE8 as usize] = op("MSTORE8", 2, 0, GAS_VERYLOW, false);
    t[SLOAD as usize] = op("SLOAD", 1, 1, GAS_SLOAD, false);
    t[SSTORE as usize] = op("SSTORE", 2, 0, GAS_ZERO, true);
    t[JUMP as usize] = op("JUMP", 1, 0, GAS_MID, false);
    t[JUMPI as usize] = op("JUMPI", 2, 0, GAS_HIGH, false);
    t[PC as usize] = op("PC", 0, 1, GAS_BASE, false);
    t[MSIZE as usize] = op("MSIZE", 0, 1, GAS_BASE, false);
    t[GAS as usize] = op("GAS", 0, 1, GAS_BASE, false);
    t[JUMPDEST as usize] = op("JUMPDEST", 0, 0, 1, false);

    let mut i = PUSH1;
    while i <= PUSH32 {
        t[i as usize] = op("PUSH", 0, 1, GAS_VERYLOW, false);
        i += 1;
    }
    for n in 1..=16usize {
        t[DUP1 as usize + n - 1] = op("DUP", n, n + 1, GAS_VERYLOW, false);
        t[SWAP1 as usize + n - 1] = op("SWAP", n + 1, n + 1, GAS_VERYLOW, false);
    }
    for n in 0..=4usize {
        t[LOG0 as usize + n] = op("LOG", 2 + n, 0, GAS_ZERO, true);
    }

    t[CREATE as usize] = op("CREATE", 3, 1, GAS_CREATE, true);
    t[CALL as usize] = op("CALL", 7, 1, GAS_CALL, false);
    t[RETURN as usize] = op("RETURN", 2, 0, GAS_ZERO, false);
    t[CREATE2 as usize] = op("CREATE2", 4, 1, GAS_CREATE, true);
    t[STATICCALL as usize] = op("STATICCALL", 6, 1, GAS_CALL, false);
    t[REVERT as usize] = op("REVERT", 2, 0, GAS_ZERO, false);
    t[SELFDESTRUCT as usize] = op("SELFDESTRUCT", 1, 0, GAS_SELFDESTRUCT, true);

    t
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_helpers() {
        assert!(is_push(PUSH1));
        assert!(is_push(PUSH32));
        assert!(!is_push(ADD));
        assert_eq!(push_bytes(PUSH1), 1);
        assert_eq!(push_bytes(PUSH32), 32);
        assert_eq!(push_bytes(STOP), 0);
    }

    #[test]
    fn test_undefined_bytes_have_no_entry() {
        assert!(info(0x0c).is_none());
        assert!(info(0xfe).is_none());
        // DELEGATECALL and CALLCODE are not carried.
        assert!(info(0xf4).is_none());
        assert!(info(0xf2).is_none());
    }

    #[test]
    fn test_table_shape() {
        let add = info(ADD).unwrap();
        assert_eq!(add.stack_in, 2);
        assert_eq!(add.stack_out, 1);

        let call = info(CALL).unwrap();
        assert_eq!(call.stack_in, 7);
        assert_eq!(call.stack_out, 1);

        let log2 = info(LOG0 + 2).unwrap();
        assert_eq!(log2.stack_in, 4);
        assert!(log2.writes);

        assert!(info(SSTORE).unwrap().writes);
        assert!(!info(SLOAD).unwrap().writes);
    }

    #[test]
    fn test_dup_swap_ranges() {
        assert_eq!(info(DUP16).unwrap().stack_in, 16);
        assert_eq!(info(SWAP16).unwrap().stack_in, 17);
    }
}
