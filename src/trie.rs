//! Hash-addressed Merkle trie over the key/value store
//!
//! Maps fixed-length hashed paths (account and storage keys are keccak-hashed
//! before lookup) to value bytes through leaf/extension/branch nodes. Every
//! node is serialized with bincode and keyed by the keccak256 of its own
//! encoding, so the 32-byte root hash is a pure function of the mapping.
//! Modified nodes accumulate in a dirty set and reach the key/value store only
//! on `flush`; reopening at a previously flushed root reconstructs the same
//! logical state.
//!
//! The node encoding is this crate's own versioned scheme, not Ethereum RLP.

use std::collections::HashMap;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, VmError};
use crate::hashing::keccak256;
use crate::kv::{KeyValueStore, KvError};
use crate::types::B256;

/// Root hash of the empty trie.
pub const EMPTY_ROOT: B256 = B256::ZERO;

/// One trie node. Paths are nibble sequences (values 0..=15).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Node {
    /// Terminal node holding the remaining path and the value bytes.
    Leaf { path: Vec<u8>, value: Vec<u8> },
    /// Shared-prefix node pointing at a single child.
    Extension { path: Vec<u8>, child: B256 },
    /// 16-way fan-out, plus a value for paths terminating here.
    Branch {
        children: [Option<B256>; 16],
        value: Option<Vec<u8>>,
    },
}

/// Split bytes into high/low nibbles.
fn to_nibbles(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(byte >> 4);
        out.push(byte & 0x0f);
    }
    out
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Node database shared by the account trie and all storage tries.
///
/// Decoded nodes are cached in memory; encodings pending persistence sit in
/// the dirty map until `flush` batches them into the key/value store. Raw
/// contract code is stored through the same hash-keyed namespace.
pub struct TrieDb {
    kv: Box<dyn KeyValueStore>,
    /// Decoded nodes by hash, both clean (read from kv) and freshly built.
    nodes: HashMap<B256, Node>,
    /// Encoded payloads (nodes and code) not yet persisted.
    dirty: HashMap<B256, Vec<u8>>,
}

impl TrieDb {
    /// Open a node database over `kv`.
    pub fn new(kv: Box<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            nodes: HashMap::new(),
            dirty: HashMap::new(),
        }
    }

    /// Look up `key_bytes` (already hashed by the caller) under `root`.
    pub fn get(&mut self, root: B256, key_bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        if root == EMPTY_ROOT {
            return Ok(None);
        }
        let path = to_nibbles(key_bytes);
        self.get_at(root, &path)
    }

    /// Insert `value` under `key_bytes`, returning the new root.
    pub fn insert(&mut self, root: B256, key_bytes: &[u8], value: Vec<u8>) -> Result<B256> {
        let path = to_nibbles(key_bytes);
        let existing = if root == EMPTY_ROOT { None } else { Some(root) };
        self.insert_at(existing, &path, value)
    }

    /// Remove `key_bytes` if present, returning the new root.
    pub fn remove(&mut self, root: B256, key_bytes: &[u8]) -> Result<B256> {
        if root == EMPTY_ROOT {
            return Ok(root);
        }
        let path = to_nibbles(key_bytes);
        match self.remove_at(root, &path)? {
            None => Ok(root),
            Some(None) => Ok(EMPTY_ROOT),
            Some(Some(node)) => self.store_node(node),
        }
    }

    /// Store raw contract code keyed by its keccak hash.
    pub fn put_code(&mut self, code: &[u8]) -> B256 {
        let hash = keccak256(code);
        self.dirty.insert(hash, code.to_vec());
        hash
    }

    /// Fetch contract code by hash.
    pub fn code(&mut self, hash: B256) -> Result<Option<Vec<u8>>> {
        if let Some(bytes) = self.dirty.get(&hash) {
            return Ok(Some(bytes.clone()));
        }
        self.kv
            .get(hash.as_slice())
            .map_err(|e| VmError::PersistentStore(e.to_string()))
    }

    /// Persist every dirty node and code blob, keyed by its own hash.
    ///
    /// On failure the dirty set is left intact so the previously persisted
    /// root remains the recoverable state.
    pub fn flush(&mut self) -> std::result::Result<(), KvError> {
        debug!("flushing {} trie nodes", self.dirty.len());
        for (hash, bytes) in &self.dirty {
            self.kv.put(hash.as_slice(), bytes)?;
        }
        self.dirty.clear();
        Ok(())
    }

    /// Access the underlying store (e.g. to persist the root pointer).
    pub fn kv_mut(&mut self) -> &mut dyn KeyValueStore {
        &mut *self.kv
    }

    fn store_node(&mut self, node: Node) -> Result<B256> {
        let bytes = bincode::serialize(&node)
            .map_err(|e| VmError::PersistentStore(e.to_string()))?;
        let hash = keccak256(&bytes);
        self.dirty.insert(hash, bytes);
        self.nodes.insert(hash, node);
        Ok(hash)
    }

    fn node(&mut self, hash: B256) -> Result<Node> {
        if let Some(node) = self.nodes.get(&hash) {
            return Ok(node.clone());
        }
        let bytes = self
            .kv
            .get(hash.as_slice())
            .map_err(|e| VmError::PersistentStore(e.to_string()))?
            .ok_or_else(|| VmError::PersistentStore(format!("missing trie node {hash}")))?;
        let node: Node = bincode::deserialize(&bytes)
            .map_err(|e| VmError::PersistentStore(e.to_string()))?;
        self.nodes.insert(hash, node.clone());
        Ok(node)
    }

    fn get_at(&mut self, hash: B256, path: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.node(hash)? {
            Node::Leaf { path: lpath, value } => {
                Ok(if lpath == path { Some(value) } else { None })
            }
            Node::Extension { path: epath, child } => {
                if path.len() >= epath.len() && path[..epath.len()] == epath[..] {
                    self.get_at(child, &path[epath.len()..])
                } else {
                    Ok(None)
                }
            }
            Node::Branch { children, value } => {
                if path.is_empty() {
                    return Ok(value);
                }
                match children[path[0] as usize] {
                    Some(child) => self.get_at(child, &path[1..]),
                    None => Ok(None),
                }
            }
        }
    }

    fn insert_at(&mut self, node: Option<B256>, path: &[u8], value: Vec<u8>) -> Result<B256> {
        let Some(hash) = node else {
            return self.store_node(Node::Leaf {
                path: path.to_vec(),
                value,
            });
        };
        match self.node(hash)? {
            Node::Leaf {
                path: lpath,
                value: lvalue,
            } => {
                if lpath == path {
                    return self.store_node(Node::Leaf {
                        path: path.to_vec(),
                        value,
                    });
                }
                let common = common_prefix_len(&lpath, path);
                let mut children: [Option<B256>; 16] = Default::default();
                let mut branch_value = None;

                if lpath.len() == common {
                    branch_value = Some(lvalue);
                } else {
                    let idx = lpath[common] as usize;
                    children[idx] = Some(self.store_node(Node::Leaf {
                        path: lpath[common + 1..].to_vec(),
                        value: lvalue,
                    })?);
                }
                if path.len() == common {
                    branch_value = Some(value);
                } else {
                    let idx = path[common] as usize;
                    children[idx] = Some(self.store_node(Node::Leaf {
                        path: path[common + 1..].to_vec(),
                        value,
                    })?);
                }

                let mut hash = self.store_node(Node::Branch {
                    children,
                    value: branch_value,
                })?;
                if common > 0 {
                    hash = self.store_node(Node::Extension {
                        path: path[..common].to_vec(),
                        child: hash,
                    })?;
                }
                Ok(hash)
            }
            Node::Extension { path: epath, child } => {
                let common = common_prefix_len(&epath, path);
                if common == epath.len() {
                    let new_child = self.insert_at(Some(child), &path[common..], value)?;
                    return self.store_node(Node::Extension {
                        path: epath,
                        child: new_child,
                    });
                }

                // Split the extension at the divergence point.
                let mut children: [Option<B256>; 16] = Default::default();
                let mut branch_value = None;

                let eidx = epath[common] as usize;
                children[eidx] = Some(if epath.len() == common + 1 {
                    child
                } else {
                    self.store_node(Node::Extension {
                        path: epath[common + 1..].to_vec(),
                        child,
                    })?
                });

                if path.len() == common {
                    branch_value = Some(value);
                } else {
                    let idx = path[common] as usize;
                    children[idx] = Some(self.store_node(Node::Leaf {
                        path: path[common + 1..].to_vec(),
                        value,
                    })?);
                }

                let mut hash = self.store_node(Node::Branch {
                    children,
                    value: branch_value,
                })?;
                if common > 0 {
                    hash = self.store_node(Node::Extension {
                        path: epath[..common].to_vec(),
                        child: hash,
                    })?;
                }
                Ok(hash)
            }
            Node::Branch {
                mut children,
                value: branch_value,
            } => {
                if path.is_empty() {
                    return self.store_node(Node::Branch {
                        children,
                        value: Some(value),
                    });
                }
                let idx = path[0] as usize;
                let new_child = self.insert_at(children[idx], &path[1..], value)?;
                children[idx] = Some(new_child);
                self.store_node(Node::Branch {
                    children,
                    value: branch_value,
                })
            }
        }
    }

    /// Remove `path` below the node at `hash`.
    ///
    /// `Ok(None)` means the key was absent; `Ok(Some(None))` means the whole
    /// subtree vanished; `Ok(Some(Some(node)))` is the (unhashed) replacement.
    fn remove_at(&mut self, hash: B256, path: &[u8]) -> Result<Option<Option<Node>>> {
        match self.node(hash)? {
            Node::Leaf { path: lpath, .. } => {
                if lpath == path {
                    trace!("trie: removed leaf");
                    Ok(Some(None))
                } else {
                    Ok(None)
                }
            }
            Node::Extension { path: epath, child } => {
                if path.len() < epath.len() || path[..epath.len()] != epath[..] {
                    return Ok(None);
                }
                match self.remove_at(child, &path[epath.len()..])? {
                    None => Ok(None),
                    Some(None) => Ok(Some(None)),
                    Some(Some(replacement)) => {
                        Ok(Some(Some(self.splice_extension(epath, replacement)?)))
                    }
                }
            }
            Node::Branch {
                mut children,
                mut value,
            } => {
                if path.is_empty() {
                    if value.is_none() {
                        return Ok(None);
                    }
                    value = None;
                } else {
                    let idx = path[0] as usize;
                    let Some(child) = children[idx] else {
                        return Ok(None);
                    };
                    match self.remove_at(child, &path[1..])? {
                        None => return Ok(None),
                        Some(None) => children[idx] = None,
                        Some(Some(replacement)) => {
                            children[idx] = Some(self.store_node(replacement)?);
                        }
                    }
                }
                self.normalize_branch(children, value).map(Some)
            }
        }
    }

    /// Re-attach an extension prefix onto the replacement for its child.
    fn splice_extension(&mut self, mut epath: Vec<u8>, child: Node) -> Result<Node> {
        Ok(match child {
            Node::Leaf { path, value } => {
                epath.extend_from_slice(&path);
                Node::Leaf { path: epath, value }
            }
            Node::Extension { path, child } => {
                epath.extend_from_slice(&path);
                Node::Extension { path: epath, child }
            }
            branch @ Node::Branch { .. } => {
                let child = self.store_node(branch)?;
                Node::Extension { path: epath, child }
            }
        })
    }

    /// Collapse a branch that lost children back to its canonical form.
    fn normalize_branch(
        &mut self,
        children: [Option<B256>; 16],
        value: Option<Vec<u8>>,
    ) -> Result<Option<Node>> {
        let live: Vec<usize> = (0..16).filter(|&i| children[i].is_some()).collect();

        if live.is_empty() {
            return Ok(value.map(|v| Node::Leaf {
                path: Vec::new(),
                value: v,
            }));
        }
        if live.len() == 1 && value.is_none() {
            let idx = live[0];
            let child_hash = children[idx].expect("live index");
            let merged = match self.node(child_hash)? {
                Node::Leaf { mut path, value } => {
                    path.insert(0, idx as u8);
                    Node::Leaf { path, value }
                }
                Node::Extension { mut path, child } => {
                    path.insert(0, idx as u8);
                    Node::Extension { path, child }
                }
                Node::Branch { .. } => Node::Extension {
                    path: vec![idx as u8],
                    child: child_hash,
                },
            };
            return Ok(Some(merged));
        }
        Ok(Some(Node::Branch { children, value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn fresh() -> TrieDb {
        TrieDb::new(Box::new(MemoryKv::new()))
    }

    fn key(n: u8) -> B256 {
        keccak256(&[n])
    }

    #[test]
    fn test_insert_get_roundtrip() {
        let mut trie = fresh();
        let root = trie.insert(EMPTY_ROOT, key(1).as_slice(), b"one".to_vec()).unwrap();
        let root = trie.insert(root, key(2).as_slice(), b"two".to_vec()).unwrap();

        assert_eq!(trie.get(root, key(1).as_slice()).unwrap(), Some(b"one".to_vec()));
        assert_eq!(trie.get(root, key(2).as_slice()).unwrap(), Some(b"two".to_vec()));
        assert_eq!(trie.get(root, key(3).as_slice()).unwrap(), None);
    }

    #[test]
    fn test_update_changes_root() {
        let mut trie = fresh();
        let r1 = trie.insert(EMPTY_ROOT, key(1).as_slice(), b"a".to_vec()).unwrap();
        let r2 = trie.insert(r1, key(1).as_slice(), b"b".to_vec()).unwrap();

        assert_ne!(r1, r2);
        assert_eq!(trie.get(r2, key(1).as_slice()).unwrap(), Some(b"b".to_vec()));
        // The old root still resolves the old value.
        assert_eq!(trie.get(r1, key(1).as_slice()).unwrap(), Some(b"a".to_vec()));
    }

    #[test]
    fn test_root_independent_of_insertion_order() {
        let mut t1 = fresh();
        let mut t2 = fresh();

        let mut r1 = EMPTY_ROOT;
        for n in [1u8, 2, 3, 4, 5] {
            r1 = t1.insert(r1, key(n).as_slice(), vec![n]).unwrap();
        }
        let mut r2 = EMPTY_ROOT;
        for n in [5u8, 3, 1, 4, 2] {
            r2 = t2.insert(r2, key(n).as_slice(), vec![n]).unwrap();
        }
        assert_eq!(r1, r2);
    }

    #[test]
    fn test_remove_restores_previous_root() {
        let mut trie = fresh();
        let r1 = trie.insert(EMPTY_ROOT, key(1).as_slice(), b"a".to_vec()).unwrap();
        let r2 = trie.insert(r1, key(2).as_slice(), b"b".to_vec()).unwrap();

        let r3 = trie.remove(r2, key(2).as_slice()).unwrap();
        assert_eq!(r3, r1);
        assert_eq!(trie.get(r3, key(2).as_slice()).unwrap(), None);

        // Removing the last key empties the trie.
        let r4 = trie.remove(r3, key(1).as_slice()).unwrap();
        assert_eq!(r4, EMPTY_ROOT);
    }

    #[test]
    fn test_remove_absent_key_is_noop() {
        let mut trie = fresh();
        let root = trie.insert(EMPTY_ROOT, key(1).as_slice(), b"a".to_vec()).unwrap();
        assert_eq!(trie.remove(root, key(9).as_slice()).unwrap(), root);
    }

    #[test]
    fn test_flush_and_reopen() {
        let kv = crate::kv::SharedKv::new();
        let root = {
            let mut trie = TrieDb::new(Box::new(kv.clone()));
            let root = trie
                .insert(EMPTY_ROOT, key(7).as_slice(), b"persisted".to_vec())
                .unwrap();
            trie.flush().unwrap();
            root
        };

        // A fresh TrieDb over the same store resolves the flushed root.
        let mut reopened = TrieDb::new(Box::new(kv));
        assert_eq!(
            reopened.get(root, key(7).as_slice()).unwrap(),
            Some(b"persisted".to_vec())
        );
    }

    #[test]
    fn test_code_storage() {
        let mut trie = fresh();
        let code = vec![0x60, 0x01, 0x60, 0x02];
        let hash = trie.put_code(&code);
        assert_eq!(hash, keccak256(&code));
        assert_eq!(trie.code(hash).unwrap(), Some(code));
        assert_eq!(trie.code(B256::repeat_byte(9)).unwrap(), None);
    }

    #[test]
    fn test_many_keys() {
        let mut trie = fresh();
        let mut root = EMPTY_ROOT;
        for n in 0..50u8 {
            root = trie.insert(root, key(n).as_slice(), vec![n, n]).unwrap();
        }
        for n in 0..50u8 {
            assert_eq!(trie.get(root, key(n).as_slice()).unwrap(), Some(vec![n, n]));
        }
        // Delete half and verify the rest survives.
        for n in 0..25u8 {
            root = trie.remove(root, key(n).as_slice()).unwrap();
        }
        for n in 0..25u8 {
            assert_eq!(trie.get(root, key(n).as_slice()).unwrap(), None);
        }
        for n in 25..50u8 {
            assert_eq!(trie.get(root, key(n).as_slice()).unwrap(), Some(vec![n, n]));
        }
    }
}
