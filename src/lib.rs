//! # Kiln EVM
//!
//! A gas-metered bytecode execution engine with a versioned world state.
//!
//! This crate provides contract deployment (`create`), contract invocation
//! (`call`), and speculative execution over a journaled state store whose
//! committed form is a Merkle trie persisted in an opaque key/value store.
//! It is designed to be:
//! - **Deterministic**: identical operations over identical state always
//!   produce the same output and the same root hash
//! - **Revertible**: journal snapshots make any span of mutations undoable,
//!   logs included
//! - **Durable**: a committed root reopens to identical logical state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ runtime::Config │ ── block context, origin, gas budget
//! └────────┬────────┘
//!          │ create / call
//!          ▼
//! ┌─────────────────┐
//! │      Evm        │ ── explicit frame stack, depth limit,
//! └────────┬────────┘    value transfer, precompile dispatch
//!          │ step
//!          ▼
//! ┌─────────────────┐
//! │     Frame       │ ── stack, memory, gas meter, dispatch loop
//! └────────┬────────┘
//!          │ reads / journaled writes
//!          ▼
//! ┌─────────────────┐
//! │    StateDb      │ ── snapshot / revert, commit → root
//! └────────┬────────┘
//!          │ flush
//!          ▼
//! ┌─────────────────┐
//! │ TrieDb over KV  │ ── nodes keyed by their own hash
//! └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kiln_evm::prelude::*;
//!
//! let mut cfg = Config::open(Box::new(MemoryKv::new()))?;
//! cfg.state.set_balance(cfg.origin, U256::from(1_000_000u64))?;
//!
//! let (_, address, _) = create(init_code, &mut cfg)?;
//! let (output, gas_left) = call(address, input, &mut cfg)?;
//!
//! let root = commit_state(&mut cfg)?;
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Core type definitions (Address, B256, U256, aliases)
//! - [`errors`] - Error taxonomy and Result alias
//! - [`hashing`] - Keccak256 and SHA-256 helpers
//! - [`opcode`] - Instruction bytes and the static dispatch table
//! - [`stack`] / [`memory`] / [`gas`] - Frame-local machinery
//! - [`journal`] / [`state`] - Journaled world-state store
//! - [`kv`] / [`trie`] - Persistence layer
//! - [`precompile`] - Built-in contracts at reserved addresses
//! - [`interpreter`] / [`evm`] - Dispatch loop and orchestration
//! - [`runtime`] - Public execution harness

pub mod errors;
pub mod evm;
pub mod gas;
pub mod hashing;
pub mod interpreter;
pub mod journal;
pub mod kv;
pub mod memory;
pub mod opcode;
pub mod precompile;
pub mod runtime;
pub mod stack;
pub mod state;
pub mod trie;
pub mod types;

// Re-exports for convenience
pub use errors::{Result, VmError};
pub use evm::{derive_address, derive_create2_address, Evm, Outcome};
pub use gas::GasMeter;
pub use hashing::{keccak256, sha256, KECCAK_EMPTY};
pub use interpreter::{Control, Frame, Host};
pub use kv::{KeyValueStore, MemoryKv, SharedKv, ROOT_KEY};
pub use runtime::{call, commit_state, create, Config};
pub use state::{AccountRecord, LogEntry, StateDb};
pub use trie::{TrieDb, EMPTY_ROOT};
pub use types::{Address, BlockNumber, Bytes, Gas, Hash, Nonce, Timestamp, Wei, B256, U256};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        call, commit_state, create, derive_address, Address, Bytes, Config,
        Evm, Gas, Hash, KeyValueStore, LogEntry, MemoryKv, Outcome, Result,
        SharedKv, StateDb, VmError, B256, U256,
    };
}

#[cfg(test)]
mod integration_tests {
    use super::prelude::*;
    use crate::hashing::keccak256;

    const EVENT_SIGNATURE: &[u8] = b"Test(int256,string,int256)";

    /// Init code for a counter contract. The constructor stores 1 at slot 0.
    /// The runtime adds the calldata word at offset 4 to the counter, stores
    /// the sum back, emits `Test` with a constant payload of 1, and returns
    /// the sum.
    fn counter_contract() -> Vec<u8> {
        let topic = keccak256(EVENT_SIGNATURE);

        let mut runtime = vec![
            0x60, 0x04, 0x35, // PUSH1 4, CALLDATALOAD
            0x60, 0x00, 0x54, // PUSH1 0, SLOAD
            0x01, // ADD
            0x80, // DUP1
            0x60, 0x00, 0x55, // PUSH1 0, SSTORE
            0x60, 0x01, 0x60, 0x00, 0x52, // MSTORE 1 at offset 0
            0x7f, // PUSH32 <topic>
        ];
        runtime.extend_from_slice(topic.as_slice());
        runtime.extend_from_slice(&[
            0x60, 0x20, 0x60, 0x00, 0xa1, // LOG1(offset 0, size 32, topic)
            0x60, 0x20, 0x52, // MSTORE sum at offset 32
            0x60, 0x20, 0x60, 0x20, 0xf3, // RETURN mem[32..64]
        ]);
        assert_eq!(runtime.len(), 0x3e);

        let mut init = vec![
            0x60, 0x01, 0x60, 0x00, 0x55, // SSTORE 1 at slot 0
            0x60, 0x3e, // PUSH1 runtime length
            0x60, 0x11, // PUSH1 runtime offset within init code
            0x60, 0x00, 0x39, // PUSH1 0, CODECOPY
            0x60, 0x3e, 0x60, 0x00, 0xf3, // RETURN the runtime
        ];
        init.extend_from_slice(&runtime);
        init
    }

    /// ABI-shaped calldata: a 4-byte selector then one 32-byte argument.
    fn add_input(amount: u64) -> Vec<u8> {
        let mut input = vec![0u8; 4];
        input.extend_from_slice(&U256::from(amount).to_be_bytes::<32>());
        input
    }

    fn funded_config(kv: Box<dyn KeyValueStore>) -> Config {
        let mut cfg = Config::open(kv).unwrap();
        cfg.state
            .set_balance(cfg.origin, U256::from(1_000_000_000u64))
            .unwrap();
        cfg
    }

    /// End-to-end: deploy the counter, add to it, inspect the emitted log.
    #[test]
    fn test_counter_deploy_add_log() {
        let mut cfg = funded_config(Box::new(MemoryKv::new()));

        let (code, address, _) = create(counter_contract(), &mut cfg).unwrap();
        assert_eq!(code.len(), 0x3e, "runtime code should be stored");
        // The constructor ran: the counter starts at 1.
        assert_eq!(
            cfg.state.storage(address, U256::ZERO).unwrap(),
            U256::from(1u64)
        );

        let (output, _) = call(address, add_input(2), &mut cfg).unwrap();
        assert_eq!(U256::from_be_slice(&output), U256::from(3u64));

        let logs = cfg.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].address, address);
        assert_eq!(logs[0].topics.len(), 1);
        assert_eq!(logs[0].topics[0], keccak256(EVENT_SIGNATURE));
        assert_eq!(U256::from_be_slice(&logs[0].data), U256::from(1u64));

        // A second add accumulates on the stored counter.
        let (output, _) = call(address, add_input(5), &mut cfg).unwrap();
        assert_eq!(U256::from_be_slice(&output), U256::from(8u64));
        assert_eq!(cfg.logs().len(), 2);
    }

    /// The first topic is the hash of the canonical signature and is the
    /// same on every run.
    #[test]
    fn test_event_topic_is_stable() {
        let run = || {
            let mut cfg = funded_config(Box::new(MemoryKv::new()));
            let (_, address, _) = create(counter_contract(), &mut cfg).unwrap();
            call(address, add_input(2), &mut cfg).unwrap();
            cfg.logs()[0].topics[0]
        };
        let topic = run();
        assert_eq!(topic, run());
        assert_eq!(topic, keccak256(EVENT_SIGNATURE));
    }

    /// A snapshot taken before a call undoes the call's storage writes and
    /// its logs.
    #[test]
    fn test_snapshot_call_revert_restores_counter() {
        let mut cfg = funded_config(Box::new(MemoryKv::new()));
        let (_, address, _) = create(counter_contract(), &mut cfg).unwrap();

        call(address, add_input(2), &mut cfg).unwrap();
        assert_eq!(
            cfg.state.storage(address, U256::ZERO).unwrap(),
            U256::from(3u64)
        );
        let logs_before = cfg.logs().len();

        let snapshot = cfg.state.snapshot();
        call(address, add_input(10), &mut cfg).unwrap();
        assert_eq!(
            cfg.state.storage(address, U256::ZERO).unwrap(),
            U256::from(13u64)
        );

        cfg.state.revert_to_snapshot(snapshot);
        assert_eq!(
            cfg.state.storage(address, U256::ZERO).unwrap(),
            U256::from(3u64)
        );
        assert_eq!(cfg.logs().len(), logs_before);
    }

    /// Identical sessions commit to identical roots, and a committed root
    /// reopens to the same logical state.
    #[test]
    fn test_commit_determinism_and_durability() {
        let session = |kv: Box<dyn KeyValueStore>| {
            let mut cfg = funded_config(kv);
            let (_, address, _) = create(counter_contract(), &mut cfg).unwrap();
            call(address, add_input(2), &mut cfg).unwrap();
            (commit_state(&mut cfg).unwrap(), address)
        };

        let (root_a, _) = session(Box::new(MemoryKv::new()));
        let shared = SharedKv::new();
        let (root_b, address) = session(Box::new(shared.clone()));
        assert_eq!(root_a, root_b);

        // Reopen at the persisted root: the counter is still 3.
        let mut cfg = funded_config(Box::new(shared));
        assert_eq!(cfg.state.root(), root_b);
        let (output, _) = call(address, add_input(4), &mut cfg).unwrap();
        assert_eq!(U256::from_be_slice(&output), U256::from(7u64));
    }

    /// Value moved into the deploy sticks to the contract account.
    #[test]
    fn test_create_transfers_value() {
        let mut cfg = funded_config(Box::new(MemoryKv::new()));
        cfg.value = U256::from(1_234u64);
        let (_, address, _) = create(counter_contract(), &mut cfg).unwrap();
        assert_eq!(
            cfg.state.balance(address).unwrap(),
            U256::from(1_234u64)
        );
    }
}
