//! Append-only undo log for the state store
//!
//! Every mutation appends one tagged entry carrying the prior value before
//! the cache is touched; reverting to a snapshot folds the suffix in reverse.
//! Entries are applied and undone in strict LIFO order.

use crate::types::{Address, Bytes, Nonce, B256, U256};

/// Opaque marker for a journal position; strictly increasing per session.
pub type SnapshotId = usize;

/// One reversible mutation with enough prior state to undo it.
#[derive(Debug, Clone)]
pub enum JournalEntry {
    /// Account came into existence; undo removes it entirely.
    CreateObject { address: Address },
    /// Balance changed; undo restores `prev`.
    BalanceChange { address: Address, prev: U256 },
    /// Nonce changed; undo restores `prev`.
    NonceChange { address: Address, prev: Nonce },
    /// Storage slot written; undo restores `prev`.
    StorageChange {
        address: Address,
        key: U256,
        prev: U256,
    },
    /// Code assigned; undo restores the previous code and hash.
    CodeChange {
        address: Address,
        prev_code: Bytes,
        prev_hash: B256,
    },
    /// Self-destruct mark toggled; undo restores `prev`.
    RemovalMark { address: Address, prev: bool },
    /// Log appended; undo pops the newest log entry.
    LogAppend,
}

/// The undo log itself. Mutation logic lives in `StateDb`, which walks the
/// suffix in reverse on revert; this type only guards the LIFO discipline.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current length, used as the snapshot marker.
    pub fn len(&self) -> SnapshotId {
        self.entries.len()
    }

    /// True when no mutations are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a mutation. Must be called before the cache is modified.
    pub fn push(&mut self, entry: JournalEntry) {
        self.entries.push(entry);
    }

    /// Pop entries newer than `snapshot`, newest first.
    pub fn drain_since(&mut self, snapshot: SnapshotId) -> Vec<JournalEntry> {
        let mut undone = self.entries.split_off(snapshot);
        undone.reverse();
        undone
    }

    /// Drop all entries (commit boundary; outstanding snapshots become stale).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
