//! Public execution harness
//!
//! `Config` bundles a state view with the block context; `create` and `call`
//! run one operation against it. `commit_state` makes the session durable:
//! commit the trie, flush dirty nodes, then advance the root pointer under
//! `ROOT_KEY`. The pointer only moves after a successful flush, so a storage
//! failure leaves the previously persisted state intact.

use log::debug;

use crate::errors::{Result, VmError};
use crate::evm::{Evm, Outcome};
use crate::kv::{KeyValueStore, ROOT_KEY};
use crate::state::{LogEntry, StateDb};
use crate::trie::EMPTY_ROOT;
use crate::types::{Address, BlockNumber, Gas, Timestamp, Wei, B256, U256};

/// Execution context for `create`/`call`.
pub struct Config {
    pub block_number: BlockNumber,
    pub timestamp: Timestamp,
    /// Sender of the operation.
    pub origin: Address,
    /// Gas budget per operation.
    pub gas_limit: Gas,
    pub gas_price: Wei,
    /// Value transferred with the operation.
    pub value: Wei,
    pub state: StateDb,
}

impl Config {
    /// Open a config over `kv`, resuming from the root persisted under
    /// `ROOT_KEY` (a fresh store starts from the empty state).
    pub fn open(kv: Box<dyn KeyValueStore>) -> Result<Self> {
        let root = match kv
            .get(ROOT_KEY)
            .map_err(|e| VmError::PersistentStore(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 32 => B256::from_slice(&bytes),
            _ => EMPTY_ROOT,
        };
        debug!("opening state at root {root}");
        Ok(Self {
            block_number: 0,
            timestamp: 0,
            origin: Address::ZERO,
            gas_limit: 10_000_000,
            gas_price: U256::ZERO,
            value: U256::ZERO,
            state: StateDb::new(root, kv),
        })
    }

    /// Logs emitted so far in this session.
    pub fn logs(&self) -> &[LogEntry] {
        self.state.logs()
    }
}

/// Deploy `init_code` from the configured origin. Returns the stored runtime
/// code, the contract address, and the leftover gas.
pub fn create(init_code: Vec<u8>, cfg: &mut Config) -> Result<(Vec<u8>, Address, Gas)> {
    let origin = cfg.origin;
    let mut evm = Evm::new(&mut cfg.state, cfg.block_number, cfg.timestamp, origin);
    let (outcome, address) = evm.create(origin, init_code, cfg.value, cfg.gas_limit)?;
    match outcome {
        Outcome::Success { output, gas_left } => Ok((output, address, gas_left)),
        Outcome::Revert { .. } => Err(VmError::Revert),
        Outcome::Fault { error } => Err(error),
    }
}

/// Call the contract at `address` with `input` from the configured origin.
/// Returns the output and the leftover gas.
pub fn call(address: Address, input: Vec<u8>, cfg: &mut Config) -> Result<(Vec<u8>, Gas)> {
    let origin = cfg.origin;
    let mut evm = Evm::new(&mut cfg.state, cfg.block_number, cfg.timestamp, origin);
    let outcome = evm.call(origin, address, input, cfg.value, cfg.gas_limit)?;
    match outcome {
        Outcome::Success { output, gas_left } => Ok((output, gas_left)),
        Outcome::Revert { .. } => Err(VmError::Revert),
        Outcome::Fault { error } => Err(error),
    }
}

/// Commit the session to the trie, flush dirty nodes, and advance the
/// persisted root pointer. Returns the new root.
pub fn commit_state(cfg: &mut Config) -> Result<B256> {
    let root = cfg.state.commit()?;
    cfg.state.flush()?;
    cfg.state
        .kv_mut()
        .put(ROOT_KEY, root.as_slice())
        .map_err(|e| VmError::PersistentStore(e.to_string()))?;
    debug!("advanced root pointer to {root}");
    Ok(root)
}
