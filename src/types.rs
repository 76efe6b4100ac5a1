//! Shared primitive types and engine limits
//!
//! Re-exports the alloy-primitives value types and names the scalar roles
//! they play at module boundaries. The two hard limits that bound a frame
//! live here so the interpreter and the orchestrator agree on them.

pub use alloy_primitives::{Address, Bytes, B256, U256};

/// Keccak256 digest, as produced by `hashing`.
pub type Hash = B256;

/// Account nonce; also the creation counter in the contract address scheme.
pub type Nonce = u64;

/// Gas units, metered per frame.
pub type Gas = u64;

/// Block height supplied by the execution context.
pub type BlockNumber = u64;

/// Block timestamp, seconds since epoch.
pub type Timestamp = u64;

/// Value transferred with a call or create.
pub type Wei = U256;

/// Deepest nesting a CALL/CREATE chain may reach. Frames past this limit
/// are refused before any state is touched.
pub const MAX_CALL_DEPTH: usize = 1024;

/// Operand stack capacity of a single frame.
pub const STACK_LIMIT: usize = 1024;
