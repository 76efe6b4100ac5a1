//! Growable byte memory for execution frames
//!
//! Addressed from zero, zero-extended on growth, and sized in 32-byte words
//! for expansion billing. The gas meter charges for growth before any resize
//! happens here.

use crate::types::U256;

/// Byte memory of a single execution frame.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Create an empty memory.
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Current size in bytes (always a multiple of 32).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when nothing has been touched yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current size in 32-byte words.
    pub fn word_count(&self) -> u64 {
        (self.data.len() as u64) / 32
    }

    /// Number of 32-byte words needed to cover `offset + size`, or `None`
    /// when the range does not fit the address space. Callers treat `None`
    /// as unpayable, so no growth request with a wrapped end ever reaches
    /// `expand`.
    pub fn words_for(offset: usize, size: usize) -> Option<u64> {
        if size == 0 {
            return Some(0);
        }
        let end = offset.checked_add(size)?;
        Some((end.checked_add(31)? / 32) as u64)
    }

    /// Grow to cover `offset + size`, zero-filling new space. The gas meter
    /// has already rejected ranges whose word count overflows.
    pub fn expand(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let needed = offset
            .saturating_add(size)
            .saturating_add(31)
            / 32
            * 32;
        if needed > self.data.len() {
            self.data.resize(needed, 0);
        }
    }

    /// Read a 32-byte word at `offset`.
    pub fn load_word(&mut self, offset: usize) -> U256 {
        self.expand(offset, 32);
        U256::from_be_slice(&self.data[offset..offset + 32])
    }

    /// Write a 32-byte big-endian word at `offset`.
    pub fn store_word(&mut self, offset: usize, value: U256) {
        self.expand(offset, 32);
        self.data[offset..offset + 32].copy_from_slice(&value.to_be_bytes::<32>());
    }

    /// Write a single byte at `offset`.
    pub fn store_byte(&mut self, offset: usize, value: u8) {
        self.expand(offset, 1);
        self.data[offset] = value;
    }

    /// Copy `size` bytes out of memory starting at `offset`.
    pub fn load_slice(&mut self, offset: usize, size: usize) -> Vec<u8> {
        if size == 0 {
            return Vec::new();
        }
        self.expand(offset, size);
        self.data[offset..offset + size].to_vec()
    }

    /// Copy `src` into memory at `offset`, zero-padding to `size` bytes.
    ///
    /// Used by the COPY family: reads past the end of the source read zeroes.
    pub fn store_padded(&mut self, offset: usize, src: &[u8], size: usize) {
        if size == 0 {
            return;
        }
        self.expand(offset, size);
        let copy_len = src.len().min(size);
        self.data[offset..offset + copy_len].copy_from_slice(&src[..copy_len]);
        for b in &mut self.data[offset + copy_len..offset + size] {
            *b = 0;
        }
    }
}
