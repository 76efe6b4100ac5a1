//! Call and create orchestration
//!
//! Frames run on an explicit stack: a `Control::Call`/`Control::Create` from
//! the interpreter suspends the parent, pushes a child, and the child's
//! outcome is applied back when it finishes. Depth is therefore bounded by
//! `MAX_CALL_DEPTH` alone, never by the host stack.
//!
//! Every frame opens a journal snapshot. A successful frame keeps its
//! mutations; a revert returns unused gas and rolls the snapshot back; a
//! fault rolls back and forfeits the frame's whole budget.

use log::debug;

use crate::errors::{Result, VmError};
use crate::gas::{GAS_CALL_STIPEND, GAS_CODE_DEPOSIT_BYTE, GAS_CREATE};
use crate::hashing::{keccak256, KECCAK_EMPTY};
use crate::interpreter::{CallRequest, Control, CreateRequest, Frame, Host};
use crate::journal::SnapshotId;
use crate::precompile::Precompile;
use crate::state::StateDb;
use crate::types::{Address, BlockNumber, Gas, Timestamp, B256, U256, MAX_CALL_DEPTH};

/// Terminal result of a top-level call or create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Execution halted normally; state changes are kept.
    Success { output: Vec<u8>, gas_left: Gas },
    /// Execution requested rollback; unused gas is returned.
    Revert { output: Vec<u8>, gas_left: Gas },
    /// Execution faulted; the frame's whole budget is gone.
    Fault { error: VmError },
}

impl Outcome {
    /// True for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// Internal frame result before delivery to the parent.
enum RawOutcome {
    Success(Vec<u8>),
    Revert(Vec<u8>),
    Fault(VmError),
}

/// How a finished frame reports back.
enum Resume {
    /// Top-level frame; its outcome is the operation's outcome.
    Root,
    /// CALL/STATICCALL site in the parent.
    Call { ret_offset: usize, ret_size: usize },
    /// CREATE/CREATE2 site in the parent.
    Create,
}

struct PendingFrame {
    frame: Frame,
    snapshot: SnapshotId,
    /// Deploy target; runtime code is stored here on success.
    created: Option<Address>,
    resume: Resume,
}

/// Executes calls and creates against one state view and block context.
pub struct Evm<'a> {
    state: &'a mut StateDb,
    block_number: BlockNumber,
    timestamp: Timestamp,
    origin: Address,
}

impl<'a> Evm<'a> {
    pub fn new(
        state: &'a mut StateDb,
        block_number: BlockNumber,
        timestamp: Timestamp,
        origin: Address,
    ) -> Self {
        Self {
            state,
            block_number,
            timestamp,
            origin,
        }
    }

    /// Call `address` with `input`, transferring `value` from `caller`.
    ///
    /// A codeless target is a plain transfer; precompile addresses dispatch
    /// natively. `InsufficientBalance` is rejected before any interpreter
    /// gas is spent.
    pub fn call(
        &mut self,
        caller: Address,
        address: Address,
        input: Vec<u8>,
        value: U256,
        gas_limit: Gas,
    ) -> Result<Outcome> {
        if self.state.balance(caller)? < value {
            return Err(VmError::InsufficientBalance(caller));
        }
        let snapshot = self.state.snapshot();
        self.state.transfer(caller, address, value)?;

        if let Some(precompile) = Precompile::lookup(address) {
            return Ok(match precompile.run(&input, gas_limit) {
                Ok((output, used)) => Outcome::Success {
                    output,
                    gas_left: gas_limit - used,
                },
                Err(error) => {
                    self.state.revert_to_snapshot(snapshot);
                    Outcome::Fault { error }
                }
            });
        }

        let code = self.state.code(address)?;
        if code.is_empty() {
            return Ok(Outcome::Success {
                output: Vec::new(),
                gas_left: gas_limit,
            });
        }

        let frame = Frame::new(
            code,
            input.into(),
            address,
            caller,
            value,
            gas_limit,
            false,
            0,
        );
        self.run(vec![PendingFrame {
            frame,
            snapshot,
            created: None,
            resume: Resume::Root,
        }])
    }

    /// Deploy `init_code` from `caller`, returning the outcome and the
    /// derived contract address. On success the outcome output is the
    /// stored runtime code.
    pub fn create(
        &mut self,
        caller: Address,
        init_code: Vec<u8>,
        value: U256,
        gas_limit: Gas,
    ) -> Result<(Outcome, Address)> {
        self.create_at(caller, init_code, None, value, gas_limit)
    }

    /// Salted deploy (CREATE2 address scheme).
    pub fn create2(
        &mut self,
        caller: Address,
        init_code: Vec<u8>,
        salt: B256,
        value: U256,
        gas_limit: Gas,
    ) -> Result<(Outcome, Address)> {
        self.create_at(caller, init_code, Some(salt), value, gas_limit)
    }

    fn create_at(
        &mut self,
        caller: Address,
        init_code: Vec<u8>,
        salt: Option<B256>,
        value: U256,
        gas_limit: Gas,
    ) -> Result<(Outcome, Address)> {
        if self.state.balance(caller)? < value {
            return Err(VmError::InsufficientBalance(caller));
        }
        let nonce = self.state.nonce(caller)?;
        let address = match salt {
            None => derive_address(caller, nonce),
            Some(salt) => derive_create2_address(caller, salt, &init_code),
        };
        if gas_limit < GAS_CREATE {
            return Ok((
                Outcome::Fault {
                    error: VmError::OutOfGas,
                },
                address,
            ));
        }
        // The creator nonce advances even when the deploy later fails.
        self.state.increment_nonce(caller)?;
        if self.state.nonce(address)? != 0
            || self.state.code_hash(address)? != KECCAK_EMPTY
        {
            return Err(VmError::ContractAddressCollision(address));
        }

        let snapshot = self.state.snapshot();
        self.state.set_nonce(address, 1)?;
        self.state.transfer(caller, address, value)?;

        let frame = Frame::new(
            init_code.into(),
            crate::types::Bytes::new(),
            address,
            caller,
            value,
            gas_limit - GAS_CREATE,
            false,
            0,
        );
        let outcome = self.run(vec![PendingFrame {
            frame,
            snapshot,
            created: Some(address),
            resume: Resume::Root,
        }])?;
        Ok((outcome, address))
    }

    /// Drive the frame stack until the root frame finishes.
    fn run(&mut self, mut stack: Vec<PendingFrame>) -> Result<Outcome> {
        loop {
            let top = stack.last_mut().expect("frame stack never empty");
            let mut host = Host {
                state: &mut *self.state,
                block_number: self.block_number,
                timestamp: self.timestamp,
                origin: self.origin,
            };
            match top.frame.step(&mut host) {
                Ok(Control::Continue) => {}
                Ok(Control::Stop) => {
                    if let Some(outcome) =
                        self.finish(&mut stack, RawOutcome::Success(Vec::new()))?
                    {
                        return Ok(outcome);
                    }
                }
                Ok(Control::Return(output)) => {
                    if let Some(outcome) =
                        self.finish(&mut stack, RawOutcome::Success(output))?
                    {
                        return Ok(outcome);
                    }
                }
                Ok(Control::Revert(output)) => {
                    if let Some(outcome) =
                        self.finish(&mut stack, RawOutcome::Revert(output))?
                    {
                        return Ok(outcome);
                    }
                }
                Ok(Control::Call(request)) => self.begin_call(&mut stack, request)?,
                Ok(Control::Create(request)) => {
                    self.begin_create(&mut stack, request)?
                }
                Err(error) => {
                    // Anything that is not a frame fault (notably storage
                    // failures) aborts the whole operation.
                    if !error.consumes_all_gas() {
                        return Err(error);
                    }
                    stack
                        .last_mut()
                        .expect("frame stack never empty")
                        .frame
                        .consume_all_gas();
                    if let Some(outcome) =
                        self.finish(&mut stack, RawOutcome::Fault(error))?
                    {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    /// Settle the top frame and deliver its outcome. Returns the operation
    /// outcome when the root frame finished.
    fn finish(
        &mut self,
        stack: &mut Vec<PendingFrame>,
        raw: RawOutcome,
    ) -> Result<Option<Outcome>> {
        let mut finished = stack.pop().expect("frame stack never empty");

        // Deploy frames pay the per-byte deposit for their runtime code.
        let raw = match (finished.created, raw) {
            (Some(address), RawOutcome::Success(runtime_code)) => {
                let cost = runtime_code.len() as Gas * GAS_CODE_DEPOSIT_BYTE;
                match finished.frame.gas.charge(cost) {
                    Ok(()) => {
                        self.state.set_code(address, runtime_code.clone())?;
                        RawOutcome::Success(runtime_code)
                    }
                    Err(error) => RawOutcome::Fault(error),
                }
            }
            (_, raw) => raw,
        };

        if !matches!(raw, RawOutcome::Success(_)) {
            self.state.revert_to_snapshot(finished.snapshot);
        }
        let gas_left = finished.frame.gas_remaining();
        debug!(
            "frame exit depth={} success={} gas_left={}",
            finished.frame.depth,
            matches!(raw, RawOutcome::Success(_)),
            gas_left
        );

        match finished.resume {
            Resume::Root => Ok(Some(match raw {
                RawOutcome::Success(output) => Outcome::Success { output, gas_left },
                RawOutcome::Revert(output) => Outcome::Revert { output, gas_left },
                RawOutcome::Fault(error) => Outcome::Fault { error },
            })),
            Resume::Call {
                ret_offset,
                ret_size,
            } => {
                let parent = stack.last_mut().expect("call frame has a parent");
                match raw {
                    RawOutcome::Success(output) => parent.frame.apply_call_result(
                        true, output, gas_left, ret_offset, ret_size,
                    )?,
                    RawOutcome::Revert(output) => parent.frame.apply_call_result(
                        false, output, gas_left, ret_offset, ret_size,
                    )?,
                    RawOutcome::Fault(_) => parent.frame.apply_call_result(
                        false,
                        Vec::new(),
                        0,
                        ret_offset,
                        ret_size,
                    )?,
                }
                Ok(None)
            }
            Resume::Create => {
                let parent = stack.last_mut().expect("create frame has a parent");
                match raw {
                    RawOutcome::Success(_) => parent.frame.apply_create_result(
                        finished.created,
                        Vec::new(),
                        gas_left,
                    )?,
                    RawOutcome::Revert(output) => {
                        parent.frame.apply_create_result(None, output, gas_left)?
                    }
                    RawOutcome::Fault(_) => {
                        parent.frame.apply_create_result(None, Vec::new(), 0)?
                    }
                }
                Ok(None)
            }
        }
    }

    /// Screen a sub-frame before any state is touched. A `Some` refusal
    /// names the reason the parent sees a zero flag; only state-store
    /// failures propagate as hard errors.
    fn subframe_rejection(
        &mut self,
        depth: usize,
        caller: Address,
        value: U256,
    ) -> Result<Option<VmError>> {
        if depth > MAX_CALL_DEPTH {
            return Ok(Some(VmError::MaxCallDepthExceeded));
        }
        if !value.is_zero() && self.state.balance(caller)? < value {
            return Ok(Some(VmError::InsufficientBalance(caller)));
        }
        Ok(None)
    }

    /// Service a CALL/STATICCALL request from the top frame.
    fn begin_call(
        &mut self,
        stack: &mut Vec<PendingFrame>,
        request: CallRequest,
    ) -> Result<()> {
        let parent = stack.last_mut().expect("frame stack never empty");
        let caller = parent.frame.address;
        let depth = parent.frame.depth + 1;
        let CallRequest {
            address,
            value,
            input,
            gas,
            is_static,
            ret_offset,
            ret_size,
        } = request;

        // Rejected before any sub-execution; the earmarked gas goes back.
        if let Some(reason) = self.subframe_rejection(depth, caller, value)? {
            debug!("call rejected at depth {depth}: {reason}");
            return parent
                .frame
                .apply_call_result(false, Vec::new(), gas, ret_offset, ret_size);
        }

        let snapshot = self.state.snapshot();
        self.state.transfer(caller, address, value)?;

        if let Some(precompile) = Precompile::lookup(address) {
            return match precompile.run(&input, gas) {
                Ok((output, used)) => parent.frame.apply_call_result(
                    true,
                    output,
                    gas - used,
                    ret_offset,
                    ret_size,
                ),
                Err(_) => {
                    self.state.revert_to_snapshot(snapshot);
                    parent
                        .frame
                        .apply_call_result(false, Vec::new(), 0, ret_offset, ret_size)
                }
            };
        }

        let code = self.state.code(address)?;
        if code.is_empty() {
            // Plain transfer.
            return parent
                .frame
                .apply_call_result(true, Vec::new(), gas, ret_offset, ret_size);
        }

        let gas = if value.is_zero() {
            gas
        } else {
            gas + GAS_CALL_STIPEND
        };
        debug!("frame enter depth={depth} address={address} gas={gas}");
        let frame = Frame::new(code, input.into(), address, caller, value, gas, is_static, depth);
        stack.push(PendingFrame {
            frame,
            snapshot,
            created: None,
            resume: Resume::Call {
                ret_offset,
                ret_size,
            },
        });
        Ok(())
    }

    /// Service a CREATE/CREATE2 request from the top frame.
    fn begin_create(
        &mut self,
        stack: &mut Vec<PendingFrame>,
        request: CreateRequest,
    ) -> Result<()> {
        let parent = stack.last_mut().expect("frame stack never empty");
        let caller = parent.frame.address;
        let depth = parent.frame.depth + 1;
        let CreateRequest {
            value,
            init_code,
            salt,
            gas,
        } = request;

        if let Some(reason) = self.subframe_rejection(depth, caller, value)? {
            debug!("create rejected at depth {depth}: {reason}");
            return parent.frame.apply_create_result(None, Vec::new(), gas);
        }

        let nonce = self.state.nonce(caller)?;
        self.state.increment_nonce(caller)?;
        let address = match salt {
            None => derive_address(caller, nonce),
            Some(salt) => derive_create2_address(caller, salt, &init_code),
        };

        // A collision forfeits the earmarked gas.
        if self.state.nonce(address)? != 0
            || self.state.code_hash(address)? != KECCAK_EMPTY
        {
            return parent.frame.apply_create_result(None, Vec::new(), 0);
        }

        let snapshot = self.state.snapshot();
        self.state.set_nonce(address, 1)?;
        self.state.transfer(caller, address, value)?;

        debug!("frame enter depth={depth} create={address} gas={gas}");
        let frame = Frame::new(
            init_code.into(),
            crate::types::Bytes::new(),
            address,
            caller,
            value,
            gas,
            false,
            depth,
        );
        stack.push(PendingFrame {
            frame,
            snapshot,
            created: Some(address),
            resume: Resume::Create,
        });
        Ok(())
    }
}

/// Minimal RLP of `[sender, nonce]` for the create address scheme. The
/// payload never exceeds 30 bytes, so the short-list form always applies.
fn rlp_sender_nonce(sender: &Address, nonce: u64) -> Vec<u8> {
    let mut payload = Vec::with_capacity(30);
    payload.push(0x80 + 20);
    payload.extend_from_slice(sender.as_slice());
    if nonce == 0 {
        payload.push(0x80);
    } else if nonce < 0x80 {
        payload.push(nonce as u8);
    } else {
        let be = nonce.to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count();
        payload.push(0x80 + (8 - skip) as u8);
        payload.extend_from_slice(&be[skip..]);
    }
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(0xc0 + payload.len() as u8);
    out.extend_from_slice(&payload);
    out
}

/// Contract address for a plain create: `keccak256(rlp([sender, nonce]))[12..]`.
pub fn derive_address(sender: Address, nonce: u64) -> Address {
    let hash = keccak256(&rlp_sender_nonce(&sender, nonce));
    Address::from_slice(&hash[12..])
}

/// Contract address for a salted create:
/// `keccak256(0xff ++ sender ++ salt ++ keccak256(init_code))[12..]`.
pub fn derive_create2_address(sender: Address, salt: B256, init_code: &[u8]) -> Address {
    let mut buf = Vec::with_capacity(1 + 20 + 32 + 32);
    buf.push(0xff);
    buf.extend_from_slice(sender.as_slice());
    buf.extend_from_slice(salt.as_slice());
    buf.extend_from_slice(keccak256(init_code).as_slice());
    Address::from_slice(&keccak256(&buf)[12..])
}
