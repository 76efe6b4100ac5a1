//! Bytecode dispatch loop for a single execution frame
//!
//! A `Frame` owns the code, calldata, program counter, stack, memory, and gas
//! meter of one call. `Frame::step` executes exactly one instruction against
//! a `Host` (state plus block context) and returns a `Control` value; the
//! orchestrator in `evm` drives frames to completion and services the
//! `Call`/`Create` requests a frame emits, so no host recursion happens here.
//!
//! Validation order per instruction: table lookup, static-frame write check,
//! stack bounds, static gas, then the handler. Handlers charge their dynamic
//! gas (memory growth, copies, hashing, storage, logs) before mutating
//! anything.

use std::collections::HashSet;

use log::trace;

use crate::errors::{Result, VmError};
use crate::gas::{self, GasMeter, GAS_CALL_VALUE};
use crate::hashing::keccak256;
use crate::memory::Memory;
use crate::opcode::{self, OpInfo};
use crate::stack::Stack;
use crate::state::StateDb;
use crate::types::{Address, BlockNumber, Bytes, Gas, Timestamp, B256, U256};

/// State handle plus block-level context, shared by every frame of one
/// top-level execution.
pub struct Host<'a> {
    pub state: &'a mut StateDb,
    pub block_number: BlockNumber,
    pub timestamp: Timestamp,
    /// Sender of the top-level operation.
    pub origin: Address,
}

/// A sub-call requested by CALL or STATICCALL. The requested gas has already
/// been deducted from the parent meter; unused gas comes back through
/// `Frame::apply_call_result`.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub address: Address,
    pub value: U256,
    pub input: Vec<u8>,
    pub gas: Gas,
    pub is_static: bool,
    pub ret_offset: usize,
    pub ret_size: usize,
}

/// A deploy requested by CREATE or CREATE2. The gas has already been
/// deducted from the parent meter.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub value: U256,
    pub init_code: Vec<u8>,
    pub salt: Option<B256>,
    pub gas: Gas,
}

/// Outcome of one `Frame::step`.
#[derive(Debug, Clone)]
pub enum Control {
    /// Keep stepping.
    Continue,
    /// Frame halted successfully with no output.
    Stop,
    /// Frame halted successfully with output.
    Return(Vec<u8>),
    /// Frame requested rollback; carries the reason payload.
    Revert(Vec<u8>),
    /// Frame is suspended on a sub-call.
    Call(CallRequest),
    /// Frame is suspended on a deploy.
    Create(CreateRequest),
}

/// One execution frame.
pub struct Frame {
    pub(crate) code: Bytes,
    pub(crate) input: Bytes,
    /// Account whose storage this frame reads and writes.
    pub(crate) address: Address,
    pub(crate) caller: Address,
    pub(crate) value: U256,
    pub(crate) gas: GasMeter,
    pub(crate) is_static: bool,
    pub(crate) depth: usize,
    pc: usize,
    stack: Stack,
    memory: Memory,
    /// Output of the most recent completed sub-call.
    return_data: Vec<u8>,
    jumpdests: HashSet<usize>,
}

/// Valid JUMPDEST positions: a 0x5b byte that is not push immediate data.
fn analyze_jumpdests(code: &[u8]) -> HashSet<usize> {
    let mut dests = HashSet::new();
    let mut i = 0;
    while i < code.len() {
        let op = code[i];
        if op == opcode::JUMPDEST {
            dests.insert(i);
        }
        i += 1 + opcode::push_bytes(op);
    }
    dests
}

fn is_neg(x: &U256) -> bool {
    x.bit(255)
}

fn twos_neg(x: U256) -> U256 {
    (!x).wrapping_add(U256::from(1u64))
}

fn bool_word(b: bool) -> U256 {
    if b {
        U256::from(1u64)
    } else {
        U256::ZERO
    }
}

fn word_to_address(word: U256) -> Address {
    Address::from_word(B256::from(word))
}

fn address_to_word(address: Address) -> U256 {
    U256::from_be_bytes(address.into_word().0)
}

/// Memory offsets and sizes must fit usize; anything larger cannot be paid
/// for, so the conversion failure surfaces as `OutOfGas`.
fn to_usize(x: U256) -> Result<usize> {
    usize::try_from(x).map_err(|_| VmError::OutOfGas)
}

/// Zero-padded 32-byte read from an arbitrary byte source.
fn read_padded_word(src: &[u8], offset: U256) -> U256 {
    let mut buf = [0u8; 32];
    if let Ok(offset) = usize::try_from(offset) {
        if offset < src.len() {
            let n = (src.len() - offset).min(32);
            buf[..n].copy_from_slice(&src[offset..offset + n]);
        }
    }
    U256::from_be_bytes(buf)
}

/// Zero-padded slice read from an arbitrary byte source.
fn read_padded_slice(src: &[u8], offset: U256, size: usize) -> Vec<u8> {
    let mut out = vec![0u8; size];
    if let Ok(offset) = usize::try_from(offset) {
        if offset < src.len() {
            let n = (src.len() - offset).min(size);
            out[..n].copy_from_slice(&src[offset..offset + n]);
        }
    }
    out
}

impl Frame {
    /// Build a frame ready to execute `code`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        code: Bytes,
        input: Bytes,
        address: Address,
        caller: Address,
        value: U256,
        gas_limit: Gas,
        is_static: bool,
        depth: usize,
    ) -> Self {
        let jumpdests = analyze_jumpdests(&code);
        Self {
            code,
            input,
            address,
            caller,
            value,
            gas: GasMeter::new(gas_limit),
            is_static,
            depth,
            pc: 0,
            stack: Stack::new(),
            memory: Memory::new(),
            return_data: Vec::new(),
            jumpdests,
        }
    }

    /// Gas still available to this frame.
    pub fn gas_remaining(&self) -> Gas {
        self.gas.remaining()
    }

    /// Drop the whole remaining budget (frame fault).
    pub(crate) fn consume_all_gas(&mut self) {
        self.gas.consume_all();
    }

    fn charge_memory(&mut self, offset: usize, size: usize) -> Result<()> {
        // A range whose end wraps the address space can never be paid for.
        let words = Memory::words_for(offset, size).ok_or(VmError::OutOfGas)?;
        self.gas.charge_memory(words)
    }

    /// Execute one instruction.
    pub fn step(&mut self, host: &mut Host<'_>) -> Result<Control> {
        // Running off the end of the code is an implicit STOP.
        let Some(&op) = self.code.get(self.pc) else {
            return Ok(Control::Stop);
        };
        let info: &OpInfo =
            opcode::info(op).ok_or(VmError::InvalidOpcode(op))?;
        if info.writes && self.is_static {
            return Err(VmError::WriteProtection);
        }
        if self.stack.len() < info.stack_in {
            return Err(VmError::StackUnderflow);
        }
        if self.stack.len() - info.stack_in + info.stack_out > crate::types::STACK_LIMIT {
            return Err(VmError::StackOverflow);
        }
        self.gas.charge(info.gas)?;
        trace!(
            "depth={} pc={} {} gas={}",
            self.depth,
            self.pc,
            info.name,
            self.gas.remaining()
        );
        self.pc += 1;
        self.exec(op, host)
    }

    fn exec(&mut self, op: u8, host: &mut Host<'_>) -> Result<Control> {
        use opcode::*;

        match op {
            STOP => return Ok(Control::Stop),

            // ---- arithmetic ----
            ADD => self.binary(|a, b| a.wrapping_add(b))?,
            MUL => self.binary(|a, b| a.wrapping_mul(b))?,
            SUB => self.binary(|a, b| a.wrapping_sub(b))?,
            DIV => self.binary(|a, b| {
                if b.is_zero() {
                    U256::ZERO
                } else {
                    a / b
                }
            })?,
            SDIV => self.binary(sdiv)?,
            MOD => self.binary(|a, b| {
                if b.is_zero() {
                    U256::ZERO
                } else {
                    a % b
                }
            })?,
            SMOD => self.binary(smod)?,
            ADDMOD => {
                let a = self.stack.pop()?;
                let b = self.stack.pop()?;
                let m = self.stack.pop()?;
                let r = if m.is_zero() {
                    U256::ZERO
                } else {
                    a.add_mod(b, m)
                };
                self.stack.push(r)?;
            }
            MULMOD => {
                let a = self.stack.pop()?;
                let b = self.stack.pop()?;
                let m = self.stack.pop()?;
                let r = if m.is_zero() {
                    U256::ZERO
                } else {
                    a.mul_mod(b, m)
                };
                self.stack.push(r)?;
            }
            EXP => {
                let base = self.stack.pop()?;
                let exponent = self.stack.pop()?;
                let exp_bytes = (256 - exponent.leading_zeros() + 7) / 8;
                self.gas.charge(gas::exp_cost(exp_bytes))?;
                self.stack.push(base.wrapping_pow(exponent))?;
            }
            SIGNEXTEND => {
                let b = self.stack.pop()?;
                let x = self.stack.pop()?;
                self.stack.push(sign_extend(b, x))?;
            }

            // ---- comparison and bitwise ----
            LT => self.binary(|a, b| bool_word(a < b))?,
            GT => self.binary(|a, b| bool_word(a > b))?,
            SLT => self.binary(|a, b| bool_word(signed_lt(&a, &b)))?,
            SGT => self.binary(|a, b| bool_word(signed_lt(&b, &a)))?,
            EQ => self.binary(|a, b| bool_word(a == b))?,
            ISZERO => {
                let a = self.stack.pop()?;
                self.stack.push(bool_word(a.is_zero()))?;
            }
            AND => self.binary(|a, b| a & b)?,
            OR => self.binary(|a, b| a | b)?,
            XOR => self.binary(|a, b| a ^ b)?,
            NOT => {
                let a = self.stack.pop()?;
                self.stack.push(!a)?;
            }
            BYTE => {
                let i = self.stack.pop()?;
                let x = self.stack.pop()?;
                let r = match usize::try_from(i) {
                    Ok(i) if i < 32 => {
                        U256::from(x.to_be_bytes::<32>()[i] as u64)
                    }
                    _ => U256::ZERO,
                };
                self.stack.push(r)?;
            }
            SHL => self.binary(|s, x| {
                if s >= U256::from(256u64) {
                    U256::ZERO
                } else {
                    x << s.to::<usize>()
                }
            })?,
            SHR => self.binary(|s, x| {
                if s >= U256::from(256u64) {
                    U256::ZERO
                } else {
                    x >> s.to::<usize>()
                }
            })?,
            SAR => self.binary(sar)?,

            // ---- hashing ----
            KECCAK256 => {
                let offset = to_usize(self.stack.pop()?)?;
                let size = to_usize(self.stack.pop()?)?;
                self.charge_memory(offset, size)?;
                self.gas.charge(gas::keccak_cost(size))?;
                let data = self.memory.load_slice(offset, size);
                self.stack.push(U256::from_be_bytes(keccak256(&data).0))?;
            }

            // ---- environment ----
            ADDRESS => self.stack.push(address_to_word(self.address))?,
            BALANCE => {
                let address = word_to_address(self.stack.pop()?);
                let balance = host.state.balance(address)?;
                self.stack.push(balance)?;
            }
            ORIGIN => self.stack.push(address_to_word(host.origin))?,
            CALLER => self.stack.push(address_to_word(self.caller))?,
            CALLVALUE => self.stack.push(self.value)?,
            CALLDATALOAD => {
                let offset = self.stack.pop()?;
                let word = read_padded_word(&self.input, offset);
                self.stack.push(word)?;
            }
            CALLDATASIZE => self.stack.push(U256::from(self.input.len()))?,
            CALLDATACOPY => {
                let (dest, src, size) = self.copy_operands()?;
                let data = read_padded_slice(&self.input, src, size);
                self.memory.store_padded(dest, &data, size);
            }
            CODESIZE => self.stack.push(U256::from(self.code.len()))?,
            CODECOPY => {
                let (dest, src, size) = self.copy_operands()?;
                let data = read_padded_slice(&self.code, src, size);
                self.memory.store_padded(dest, &data, size);
            }
            EXTCODESIZE => {
                let address = word_to_address(self.stack.pop()?);
                let code = host.state.code(address)?;
                self.stack.push(U256::from(code.len()))?;
            }
            RETURNDATASIZE => {
                self.stack.push(U256::from(self.return_data.len()))?
            }
            RETURNDATACOPY => {
                let (dest, src, size) = self.copy_operands()?;
                let data = read_padded_slice(&self.return_data, src, size);
                self.memory.store_padded(dest, &data, size);
            }
            TIMESTAMP => self.stack.push(U256::from(host.timestamp))?,
            NUMBER => self.stack.push(U256::from(host.block_number))?,

            // ---- stack, memory, storage, flow ----
            POP => {
                self.stack.pop()?;
            }
            MLOAD => {
                let offset = to_usize(self.stack.pop()?)?;
                self.charge_memory(offset, 32)?;
                let word = self.memory.load_word(offset);
                self.stack.push(word)?;
            }
            MSTORE => {
                let offset = to_usize(self.stack.pop()?)?;
                let value = self.stack.pop()?;
                self.charge_memory(offset, 32)?;
                self.memory.store_word(offset, value);
            }
            MSTORE8 => {
                let offset = to_usize(self.stack.pop()?)?;
                let value = self.stack.pop()?;
                self.charge_memory(offset, 1)?;
                self.memory.store_byte(offset, value.to_be_bytes::<32>()[31]);
            }
            SLOAD => {
                let key = self.stack.pop()?;
                let value = host.state.storage(self.address, key)?;
                self.stack.push(value)?;
            }
            SSTORE => {
                let key = self.stack.pop()?;
                let value = self.stack.pop()?;
                let current = host.state.storage(self.address, key)?;
                self.gas
                    .charge(gas::sstore_cost(current.is_zero(), value.is_zero()))?;
                host.state.set_storage(self.address, key, value)?;
            }
            JUMP => {
                let dest = self.stack.pop()?;
                return self.jump_to(dest);
            }
            JUMPI => {
                let dest = self.stack.pop()?;
                let cond = self.stack.pop()?;
                if !cond.is_zero() {
                    return self.jump_to(dest);
                }
            }
            PC => self.stack.push(U256::from(self.pc - 1))?,
            MSIZE => self.stack.push(U256::from(self.memory.len()))?,
            GAS => self.stack.push(U256::from(self.gas.remaining()))?,
            JUMPDEST => {}

            op if is_push(op) => {
                let n = push_bytes(op);
                let end = (self.pc + n).min(self.code.len());
                let mut buf = [0u8; 32];
                // Truncated immediates at the end of code read as zero.
                buf[32 - n..32 - n + (end - self.pc)]
                    .copy_from_slice(&self.code[self.pc..end]);
                self.pc += n;
                self.stack.push(U256::from_be_bytes(buf))?;
            }
            op if (DUP1..=DUP16).contains(&op) => {
                self.stack.dup((op - DUP1) as usize + 1)?;
            }
            op if (SWAP1..=SWAP16).contains(&op) => {
                self.stack.swap((op - SWAP1) as usize + 1)?;
            }
            op if (LOG0..=LOG4).contains(&op) => {
                let topic_count = (op - LOG0) as usize;
                let offset = to_usize(self.stack.pop()?)?;
                let size = to_usize(self.stack.pop()?)?;
                let mut topics = Vec::with_capacity(topic_count);
                for _ in 0..topic_count {
                    topics.push(B256::from(self.stack.pop()?));
                }
                self.charge_memory(offset, size)?;
                self.gas.charge(gas::log_cost(topic_count, size))?;
                let data = self.memory.load_slice(offset, size);
                host.state.add_log(self.address, topics, data);
            }

            // ---- calls and creates ----
            CREATE | CREATE2 => {
                let value = self.stack.pop()?;
                let offset = to_usize(self.stack.pop()?)?;
                let size = to_usize(self.stack.pop()?)?;
                let salt = if op == CREATE2 {
                    Some(B256::from(self.stack.pop()?))
                } else {
                    None
                };
                self.charge_memory(offset, size)?;
                if salt.is_some() {
                    // CREATE2 hashes the init code for the address.
                    self.gas.charge(gas::keccak_cost(size))?;
                }
                let init_code = self.memory.load_slice(offset, size);
                // The child receives everything left; unused gas comes back.
                let gas = self.gas.remaining();
                self.gas.charge(gas)?;
                return Ok(Control::Create(CreateRequest {
                    value,
                    init_code,
                    salt,
                    gas,
                }));
            }
            CALL | STATICCALL => {
                let gas_word = self.stack.pop()?;
                let address = word_to_address(self.stack.pop()?);
                let value = if op == CALL {
                    self.stack.pop()?
                } else {
                    U256::ZERO
                };
                let args_offset = to_usize(self.stack.pop()?)?;
                let args_size = to_usize(self.stack.pop()?)?;
                let ret_offset = to_usize(self.stack.pop()?)?;
                let ret_size = to_usize(self.stack.pop()?)?;

                if !value.is_zero() {
                    if self.is_static {
                        return Err(VmError::WriteProtection);
                    }
                    self.gas.charge(GAS_CALL_VALUE)?;
                }
                self.charge_memory(args_offset, args_size)?;
                self.charge_memory(ret_offset, ret_size)?;

                let input = self.memory.load_slice(args_offset, args_size);
                let requested =
                    Gas::try_from(gas_word).unwrap_or(Gas::MAX);
                let gas = requested.min(self.gas.remaining());
                self.gas.charge(gas)?;

                return Ok(Control::Call(CallRequest {
                    address,
                    value,
                    input,
                    gas,
                    is_static: self.is_static || op == STATICCALL,
                    ret_offset,
                    ret_size,
                }));
            }

            RETURN => {
                let offset = to_usize(self.stack.pop()?)?;
                let size = to_usize(self.stack.pop()?)?;
                self.charge_memory(offset, size)?;
                return Ok(Control::Return(self.memory.load_slice(offset, size)));
            }
            REVERT => {
                let offset = to_usize(self.stack.pop()?)?;
                let size = to_usize(self.stack.pop()?)?;
                self.charge_memory(offset, size)?;
                return Ok(Control::Revert(self.memory.load_slice(offset, size)));
            }
            SELFDESTRUCT => {
                let beneficiary = word_to_address(self.stack.pop()?);
                let balance = host.state.balance(self.address)?;
                host.state.add_balance(beneficiary, balance)?;
                host.state.set_balance(self.address, U256::ZERO)?;
                host.state.mark_removed(self.address)?;
                return Ok(Control::Stop);
            }

            other => return Err(VmError::InvalidOpcode(other)),
        }
        Ok(Control::Continue)
    }

    fn binary(&mut self, f: impl FnOnce(U256, U256) -> U256) -> Result<()> {
        let a = self.stack.pop()?;
        let b = self.stack.pop()?;
        self.stack.push(f(a, b))
    }

    fn copy_operands(&mut self) -> Result<(usize, U256, usize)> {
        let dest = to_usize(self.stack.pop()?)?;
        let src = self.stack.pop()?;
        let size = to_usize(self.stack.pop()?)?;
        self.charge_memory(dest, size)?;
        self.gas.charge(gas::copy_cost(size))?;
        Ok((dest, src, size))
    }

    fn jump_to(&mut self, dest: U256) -> Result<Control> {
        let dest = usize::try_from(dest).map_err(|_| VmError::InvalidJump)?;
        if !self.jumpdests.contains(&dest) {
            return Err(VmError::InvalidJump);
        }
        self.pc = dest;
        Ok(Control::Continue)
    }

    /// Resume after a sub-call: refund unused gas, copy the child output into
    /// the return region reserved at call time, expose it through
    /// RETURNDATA*, and push the success flag.
    pub(crate) fn apply_call_result(
        &mut self,
        success: bool,
        output: Vec<u8>,
        unused_gas: Gas,
        ret_offset: usize,
        ret_size: usize,
    ) -> Result<()> {
        self.gas.refund(unused_gas);
        let n = ret_size.min(output.len());
        if n > 0 {
            // Region already expanded and billed by the call instruction.
            self.memory.store_padded(ret_offset, &output[..n], n);
        }
        self.return_data = output;
        self.stack.push(bool_word(success))
    }

    /// Resume after a deploy: refund unused gas and push the new address, or
    /// zero on failure. Only a revert carries output into RETURNDATA*.
    pub(crate) fn apply_create_result(
        &mut self,
        created: Option<Address>,
        revert_output: Vec<u8>,
        unused_gas: Gas,
    ) -> Result<()> {
        self.gas.refund(unused_gas);
        self.return_data = revert_output;
        match created {
            Some(address) => self.stack.push(address_to_word(address)),
            None => self.stack.push(U256::ZERO),
        }
    }
}

fn sdiv(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let neg = is_neg(&a) != is_neg(&b);
    let a_mag = if is_neg(&a) { twos_neg(a) } else { a };
    let b_mag = if is_neg(&b) { twos_neg(b) } else { b };
    let q = a_mag / b_mag;
    if neg {
        twos_neg(q)
    } else {
        q
    }
}

fn smod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::ZERO;
    }
    let a_mag = if is_neg(&a) { twos_neg(a) } else { a };
    let b_mag = if is_neg(&b) { twos_neg(b) } else { b };
    let r = a_mag % b_mag;
    // Result takes the sign of the dividend.
    if is_neg(&a) {
        twos_neg(r)
    } else {
        r
    }
}

fn signed_lt(a: &U256, b: &U256) -> bool {
    match (is_neg(a), is_neg(b)) {
        (true, false) => true,
        (false, true) => false,
        // Same sign: two's-complement order matches unsigned order.
        _ => a < b,
    }
}

fn sar(shift: U256, x: U256) -> U256 {
    let neg = is_neg(&x);
    if shift >= U256::from(256u64) {
        return if neg { U256::MAX } else { U256::ZERO };
    }
    let s = shift.to::<usize>();
    let shifted = x >> s;
    if neg && s > 0 {
        // Fill vacated high bits with the sign.
        shifted | (U256::MAX << (256 - s))
    } else {
        shifted
    }
}

fn sign_extend(byte_index: U256, x: U256) -> U256 {
    let Ok(b) = usize::try_from(byte_index) else {
        return x;
    };
    if b >= 31 {
        return x;
    }
    let bit = b * 8 + 7;
    let mask = (U256::from(1u64) << (bit + 1)).wrapping_sub(U256::from(1u64));
    if x.bit(bit) {
        x | !mask
    } else {
        x & mask
    }
}
