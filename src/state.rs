//! Journaled state store over the trie-backed database
//!
//! `StateDb` is the in-memory view of accounts and storage that execution
//! mutates. Every account is cached as a `StateObject` with a dirty-storage
//! overlay, lazily loaded from the account trie on first access and flushed
//! back on `commit`. Every mutating operation first appends a journal entry
//! carrying the prior value, which makes `snapshot`/`revert_to_snapshot`
//! exact: balances, nonces, storage, code, created accounts, removal marks,
//! and emitted logs all roll back in strict LIFO order.
//!
//! Not safe for concurrent mutation; one writer per state root.

use std::collections::HashMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, VmError};
use crate::hashing::{keccak256, KECCAK_EMPTY};
use crate::journal::{Journal, JournalEntry, SnapshotId};
use crate::kv::KeyValueStore;
use crate::trie::{TrieDb, EMPTY_ROOT};
use crate::types::{Address, Bytes, Nonce, B256, U256};

/// The account record as persisted in the account trie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// Transaction/deploy counter.
    pub nonce: Nonce,
    /// Balance in wei.
    pub balance: U256,
    /// Keccak hash of the contract code (`KECCAK_EMPTY` for none).
    pub code_hash: B256,
    /// Root of this account's storage trie.
    pub storage_root: B256,
}

impl Default for AccountRecord {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            code_hash: KECCAK_EMPTY,
            storage_root: EMPTY_ROOT,
        }
    }
}

impl AccountRecord {
    /// True when balance, nonce, and code are all empty.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0 && self.code_hash == KECCAK_EMPTY
    }
}

/// In-memory cache of one account plus its dirty-storage overlay.
#[derive(Debug, Clone, Default)]
struct StateObject {
    record: AccountRecord,
    /// Contract code, loaded on first use.
    code: Option<Bytes>,
    /// Committed slot values read this session.
    origin_storage: HashMap<U256, U256>,
    /// Slot writes not yet committed.
    dirty_storage: HashMap<U256, U256>,
    /// Marked for removal (self-destruct); physically deleted at commit.
    removed: bool,
}

impl StateObject {
    fn clean(record: AccountRecord) -> Self {
        Self {
            record,
            ..Default::default()
        }
    }
}

/// One emitted event record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Contract that emitted the log.
    pub address: Address,
    /// Ordered topic hashes; by convention `topics[0]` is the keccak hash of
    /// the event's canonical signature string.
    pub topics: Vec<B256>,
    /// Packed non-indexed payload.
    pub data: Vec<u8>,
    /// Position in the session's log sequence.
    pub index: u32,
}

/// Journaled world-state view. See the module docs.
pub struct StateDb {
    trie: TrieDb,
    /// Account trie root as of the last commit.
    root: B256,
    objects: HashMap<Address, StateObject>,
    journal: Journal,
    logs: Vec<LogEntry>,
}

impl StateDb {
    /// Open a state view at `root` (use `EMPTY_ROOT` for a fresh state).
    pub fn new(root: B256, kv: Box<dyn KeyValueStore>) -> Self {
        Self {
            trie: TrieDb::new(kv),
            root,
            objects: HashMap::new(),
            journal: Journal::new(),
            logs: Vec::new(),
        }
    }

    /// Account trie root as of the last commit.
    pub fn root(&self) -> B256 {
        self.root
    }

    fn account_path(address: &Address) -> B256 {
        keccak256(address.as_slice())
    }

    fn slot_path(key: &U256) -> B256 {
        keccak256(&key.to_be_bytes::<32>())
    }

    /// Pull the account into the cache if it exists. Returns presence.
    fn ensure_loaded(&mut self, address: Address) -> Result<bool> {
        if self.objects.contains_key(&address) {
            return Ok(true);
        }
        let path = Self::account_path(&address);
        let Some(bytes) = self.trie.get(self.root, path.as_slice())? else {
            return Ok(false);
        };
        let record: AccountRecord = bincode::deserialize(&bytes)
            .map_err(|e| VmError::PersistentStore(e.to_string()))?;
        self.objects.insert(address, StateObject::clean(record));
        Ok(true)
    }

    /// Pull the account into the cache, creating it (journaled) if absent.
    fn ensure_created(&mut self, address: Address) -> Result<()> {
        if self.ensure_loaded(address)? {
            return Ok(());
        }
        self.journal.push(JournalEntry::CreateObject { address });
        self.objects.insert(address, StateObject::default());
        Ok(())
    }

    /// Whether any account state exists at `address`.
    pub fn exists(&mut self, address: Address) -> Result<bool> {
        self.ensure_loaded(address)
    }

    // ---- balances ----

    /// Balance of `address`; zero when the account does not exist.
    pub fn balance(&mut self, address: Address) -> Result<U256> {
        Ok(if self.ensure_loaded(address)? {
            self.objects[&address].record.balance
        } else {
            U256::ZERO
        })
    }

    /// Set the balance, creating the account on first assignment.
    pub fn set_balance(&mut self, address: Address, balance: U256) -> Result<()> {
        self.ensure_created(address)?;
        let obj = self.objects.get_mut(&address).expect("just created");
        self.journal.push(JournalEntry::BalanceChange {
            address,
            prev: obj.record.balance,
        });
        obj.record.balance = balance;
        Ok(())
    }

    /// Credit `amount` to `address`.
    pub fn add_balance(&mut self, address: Address, amount: U256) -> Result<()> {
        let balance = self.balance(address)?;
        self.set_balance(address, balance.wrapping_add(amount))
    }

    /// Move `value` between accounts, failing without mutation when the
    /// sender balance is insufficient.
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<()> {
        if value.is_zero() {
            return Ok(());
        }
        let from_balance = self.balance(from)?;
        if from_balance < value {
            return Err(VmError::InsufficientBalance(from));
        }
        self.set_balance(from, from_balance - value)?;
        self.add_balance(to, value)
    }

    // ---- nonces ----

    /// Nonce of `address`; zero when the account does not exist.
    pub fn nonce(&mut self, address: Address) -> Result<Nonce> {
        Ok(if self.ensure_loaded(address)? {
            self.objects[&address].record.nonce
        } else {
            0
        })
    }

    /// Set the nonce, creating the account if needed.
    pub fn set_nonce(&mut self, address: Address, nonce: Nonce) -> Result<()> {
        self.ensure_created(address)?;
        let obj = self.objects.get_mut(&address).expect("just created");
        self.journal.push(JournalEntry::NonceChange {
            address,
            prev: obj.record.nonce,
        });
        obj.record.nonce = nonce;
        Ok(())
    }

    /// Bump the nonce by one.
    pub fn increment_nonce(&mut self, address: Address) -> Result<()> {
        let nonce = self.nonce(address)?;
        self.set_nonce(address, nonce + 1)
    }

    // ---- code ----

    /// Code hash of `address` (`KECCAK_EMPTY` when codeless or absent).
    pub fn code_hash(&mut self, address: Address) -> Result<B256> {
        Ok(if self.ensure_loaded(address)? {
            self.objects[&address].record.code_hash
        } else {
            KECCAK_EMPTY
        })
    }

    /// Contract code at `address`; empty for codeless accounts.
    pub fn code(&mut self, address: Address) -> Result<Bytes> {
        if !self.ensure_loaded(address)? {
            return Ok(Bytes::new());
        }
        let hash = self.objects[&address].record.code_hash;
        if hash == KECCAK_EMPTY {
            return Ok(Bytes::new());
        }
        if let Some(code) = &self.objects[&address].code {
            return Ok(code.clone());
        }
        let code: Bytes = self
            .trie
            .code(hash)?
            .ok_or_else(|| VmError::PersistentStore(format!("missing code {hash}")))?
            .into();
        self.objects
            .get_mut(&address)
            .expect("loaded above")
            .code = Some(code.clone());
        Ok(code)
    }

    /// Assign contract code to `address`.
    pub fn set_code(&mut self, address: Address, code: Vec<u8>) -> Result<()> {
        let prev_code = self.code(address)?;
        self.ensure_created(address)?;
        let obj = self.objects.get_mut(&address).expect("just created");
        self.journal.push(JournalEntry::CodeChange {
            address,
            prev_code,
            prev_hash: obj.record.code_hash,
        });
        obj.record.code_hash = keccak256(&code);
        obj.code = Some(code.into());
        Ok(())
    }

    // ---- storage ----

    /// Read a storage slot; absent keys read as zero.
    pub fn storage(&mut self, address: Address, key: U256) -> Result<U256> {
        if !self.ensure_loaded(address)? {
            return Ok(U256::ZERO);
        }
        if let Some(value) = self.objects[&address].dirty_storage.get(&key) {
            return Ok(*value);
        }
        if let Some(value) = self.objects[&address].origin_storage.get(&key) {
            return Ok(*value);
        }
        let storage_root = self.objects[&address].record.storage_root;
        let path = Self::slot_path(&key);
        let value = match self.trie.get(storage_root, path.as_slice())? {
            Some(bytes) => U256::from_be_slice(&bytes),
            None => U256::ZERO,
        };
        self.objects
            .get_mut(&address)
            .expect("loaded above")
            .origin_storage
            .insert(key, value);
        Ok(value)
    }

    /// Write a storage slot; writing zero clears the slot at commit.
    pub fn set_storage(&mut self, address: Address, key: U256, value: U256) -> Result<()> {
        let prev = self.storage(address, key)?;
        if prev == value {
            return Ok(());
        }
        self.ensure_created(address)?;
        self.journal.push(JournalEntry::StorageChange {
            address,
            key,
            prev,
        });
        self.objects
            .get_mut(&address)
            .expect("just created")
            .dirty_storage
            .insert(key, value);
        Ok(())
    }

    // ---- removal ----

    /// Mark `address` for physical deletion at commit (self-destruct).
    pub fn mark_removed(&mut self, address: Address) -> Result<()> {
        if !self.ensure_loaded(address)? {
            return Ok(());
        }
        let obj = self.objects.get_mut(&address).expect("loaded above");
        self.journal.push(JournalEntry::RemovalMark {
            address,
            prev: obj.removed,
        });
        obj.removed = true;
        Ok(())
    }

    // ---- logs ----

    /// Append an event record (journaled, so reverts remove it).
    pub fn add_log(&mut self, address: Address, topics: Vec<B256>, data: Vec<u8>) {
        self.journal.push(JournalEntry::LogAppend);
        let index = self.logs.len() as u32;
        self.logs.push(LogEntry {
            address,
            topics,
            data,
            index,
        });
    }

    /// Logs emitted so far, in emission order.
    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    // ---- snapshots ----

    /// Capture the current journal position.
    pub fn snapshot(&self) -> SnapshotId {
        self.journal.len()
    }

    /// Undo every mutation recorded after `snapshot`, newest first.
    pub fn revert_to_snapshot(&mut self, snapshot: SnapshotId) {
        for entry in self.journal.drain_since(snapshot) {
            match entry {
                JournalEntry::CreateObject { address } => {
                    self.objects.remove(&address);
                }
                JournalEntry::BalanceChange { address, prev } => {
                    if let Some(obj) = self.objects.get_mut(&address) {
                        obj.record.balance = prev;
                    }
                }
                JournalEntry::NonceChange { address, prev } => {
                    if let Some(obj) = self.objects.get_mut(&address) {
                        obj.record.nonce = prev;
                    }
                }
                JournalEntry::StorageChange { address, key, prev } => {
                    if let Some(obj) = self.objects.get_mut(&address) {
                        obj.dirty_storage.insert(key, prev);
                    }
                }
                JournalEntry::CodeChange {
                    address,
                    prev_code,
                    prev_hash,
                } => {
                    if let Some(obj) = self.objects.get_mut(&address) {
                        obj.record.code_hash = prev_hash;
                        obj.code = Some(prev_code);
                    }
                }
                JournalEntry::RemovalMark { address, prev } => {
                    if let Some(obj) = self.objects.get_mut(&address) {
                        obj.removed = prev;
                    }
                }
                JournalEntry::LogAppend => {
                    self.logs.pop();
                }
            }
        }
    }

    // ---- commit ----

    /// Write every cached account back into the trie and return the new root.
    ///
    /// Removal-marked accounts are physically deleted here, once no snapshot
    /// can resurrect them. The journal is cleared: outstanding snapshot ids
    /// from before the commit become invalid.
    pub fn commit(&mut self) -> Result<B256> {
        let mut addresses: Vec<Address> = self.objects.keys().copied().collect();
        addresses.sort();

        let mut root = self.root;
        for address in addresses {
            let obj = self.objects.remove(&address).expect("collected above");
            let path = Self::account_path(&address);

            if obj.removed {
                debug!("commit: deleting {address}");
                root = self.trie.remove(root, path.as_slice())?;
                continue;
            }

            let mut record = obj.record;

            let mut slots: Vec<(U256, U256)> =
                obj.dirty_storage.into_iter().collect();
            slots.sort_by_key(|(key, _)| *key);
            for (key, value) in slots {
                let slot = Self::slot_path(&key);
                record.storage_root = if value.is_zero() {
                    self.trie.remove(record.storage_root, slot.as_slice())?
                } else {
                    self.trie.insert(
                        record.storage_root,
                        slot.as_slice(),
                        value.to_be_bytes::<32>().to_vec(),
                    )?
                };
            }

            if record.code_hash != KECCAK_EMPTY {
                if let Some(code) = &obj.code {
                    self.trie.put_code(code);
                }
            }

            let bytes = bincode::serialize(&record)
                .map_err(|e| VmError::PersistentStore(e.to_string()))?;
            root = self.trie.insert(root, path.as_slice(), bytes)?;
        }

        self.root = root;
        self.journal.clear();
        debug!("commit: new root {root}");
        Ok(root)
    }

    /// Persist every node modified since the last flush into the key/value
    /// store. Call after `commit`; on error the previous root stays valid.
    pub fn flush(&mut self) -> Result<()> {
        self.trie
            .flush()
            .map_err(|e| VmError::PersistentStore(e.to_string()))
    }

    /// Access the underlying store (e.g. to persist the root pointer).
    pub fn kv_mut(&mut self) -> &mut dyn KeyValueStore {
        self.trie.kv_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryKv, SharedKv};

    fn fresh() -> StateDb {
        StateDb::new(EMPTY_ROOT, Box::new(MemoryKv::new()))
    }

    fn addr(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    #[test]
    fn test_absent_account_reads_defaults() {
        let mut state = fresh();
        assert_eq!(state.balance(addr(1)).unwrap(), U256::ZERO);
        assert_eq!(state.nonce(addr(1)).unwrap(), 0);
        assert_eq!(state.code(addr(1)).unwrap(), Bytes::new());
        assert_eq!(state.storage(addr(1), U256::ZERO).unwrap(), U256::ZERO);
        assert!(!state.exists(addr(1)).unwrap());
    }

    #[test]
    fn test_snapshot_revert_restores_everything() {
        let mut state = fresh();
        let a = addr(1);

        state.set_balance(a, U256::from(100u64)).unwrap();
        state.set_nonce(a, 3).unwrap();
        state.set_storage(a, U256::from(1u64), U256::from(11u64)).unwrap();
        state.set_code(a, vec![0xfe]).unwrap();
        state.add_log(a, vec![B256::repeat_byte(1)], vec![1]);

        let snap = state.snapshot();

        state.set_balance(a, U256::from(999u64)).unwrap();
        state.increment_nonce(a).unwrap();
        state.set_storage(a, U256::from(1u64), U256::from(22u64)).unwrap();
        state.set_storage(a, U256::from(2u64), U256::from(33u64)).unwrap();
        state.set_code(a, vec![0xaa, 0xbb]).unwrap();
        state.add_log(a, vec![B256::repeat_byte(2)], vec![2]);
        state.set_balance(addr(9), U256::from(5u64)).unwrap(); // creates account

        state.revert_to_snapshot(snap);

        assert_eq!(state.balance(a).unwrap(), U256::from(100u64));
        assert_eq!(state.nonce(a).unwrap(), 3);
        assert_eq!(state.storage(a, U256::from(1u64)).unwrap(), U256::from(11u64));
        assert_eq!(state.storage(a, U256::from(2u64)).unwrap(), U256::ZERO);
        assert_eq!(state.code(a).unwrap().as_ref(), &[0xfe]);
        assert_eq!(state.logs().len(), 1);
        assert_eq!(state.logs()[0].data, vec![1]);
        assert!(!state.exists(addr(9)).unwrap());
    }

    #[test]
    fn test_nested_snapshots_unwind_in_order() {
        let mut state = fresh();
        let a = addr(1);

        state.set_balance(a, U256::from(1u64)).unwrap();
        let s1 = state.snapshot();
        state.set_balance(a, U256::from(2u64)).unwrap();
        let s2 = state.snapshot();
        state.set_balance(a, U256::from(3u64)).unwrap();

        state.revert_to_snapshot(s2);
        assert_eq!(state.balance(a).unwrap(), U256::from(2u64));
        state.revert_to_snapshot(s1);
        assert_eq!(state.balance(a).unwrap(), U256::from(1u64));
    }

    #[test]
    fn test_transfer_insufficient_balance() {
        let mut state = fresh();
        state.set_balance(addr(1), U256::from(10u64)).unwrap();

        let err = state
            .transfer(addr(1), addr(2), U256::from(11u64))
            .unwrap_err();
        assert!(matches!(err, VmError::InsufficientBalance(_)));
        // Nothing moved.
        assert_eq!(state.balance(addr(1)).unwrap(), U256::from(10u64));
        assert_eq!(state.balance(addr(2)).unwrap(), U256::ZERO);

        state.transfer(addr(1), addr(2), U256::from(4u64)).unwrap();
        assert_eq!(state.balance(addr(1)).unwrap(), U256::from(6u64));
        assert_eq!(state.balance(addr(2)).unwrap(), U256::from(4u64));
    }

    #[test]
    fn test_commit_determinism() {
        let run = || {
            let mut state = fresh();
            state.set_balance(addr(1), U256::from(100u64)).unwrap();
            state.set_nonce(addr(1), 1).unwrap();
            state.set_storage(addr(1), U256::from(0u64), U256::from(7u64)).unwrap();
            state.set_code(addr(2), vec![0x60, 0x00]).unwrap();
            state.commit().unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_commit_and_reopen() {
        let kv = SharedKv::new();
        let root = {
            let mut state = StateDb::new(EMPTY_ROOT, Box::new(kv.clone()));
            state.set_balance(addr(1), U256::from(42u64)).unwrap();
            state.set_code(addr(1), vec![0x00]).unwrap();
            state
                .set_storage(addr(1), U256::from(5u64), U256::from(55u64))
                .unwrap();
            let root = state.commit().unwrap();
            state.flush().unwrap();
            root
        };

        let mut reopened = StateDb::new(root, Box::new(kv));
        assert_eq!(reopened.balance(addr(1)).unwrap(), U256::from(42u64));
        assert_eq!(reopened.code(addr(1)).unwrap().as_ref(), &[0x00]);
        assert_eq!(
            reopened.storage(addr(1), U256::from(5u64)).unwrap(),
            U256::from(55u64)
        );
        assert_eq!(reopened.root(), root);
    }

    #[test]
    fn test_removal_deletes_at_commit() {
        let mut state = fresh();
        state.set_balance(addr(1), U256::from(1u64)).unwrap();
        state.set_balance(addr(2), U256::from(2u64)).unwrap();
        let root_both = state.commit().unwrap();

        state.set_balance(addr(1), U256::ZERO).unwrap();
        state.mark_removed(addr(1)).unwrap();
        let root_after = state.commit().unwrap();

        assert_ne!(root_both, root_after);
        assert!(!state.exists(addr(1)).unwrap());
        assert_eq!(state.balance(addr(2)).unwrap(), U256::from(2u64));
    }

    #[test]
    fn test_removal_mark_reverts() {
        let mut state = fresh();
        state.set_balance(addr(1), U256::from(1u64)).unwrap();

        let snap = state.snapshot();
        state.mark_removed(addr(1)).unwrap();
        state.revert_to_snapshot(snap);

        state.commit().unwrap();
        assert!(state.exists(addr(1)).unwrap());
    }

    #[test]
    fn test_zero_write_clears_slot_at_commit() {
        let mut state = fresh();
        state
            .set_storage(addr(1), U256::from(1u64), U256::from(9u64))
            .unwrap();
        let root_set = state.commit().unwrap();

        state.set_storage(addr(1), U256::from(1u64), U256::ZERO).unwrap();
        let root_cleared = state.commit().unwrap();

        assert_ne!(root_set, root_cleared);
        assert_eq!(state.storage(addr(1), U256::from(1u64)).unwrap(), U256::ZERO);

        // Clearing the slot restores the storage-free shape of the account:
        // writing the same value again reproduces the first root.
        state
            .set_storage(addr(1), U256::from(1u64), U256::from(9u64))
            .unwrap();
        assert_eq!(state.commit().unwrap(), root_set);
    }
}
