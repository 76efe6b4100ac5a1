//! Built-in contracts at reserved low addresses
//!
//! Precompiles execute natively instead of through the interpreter. Gas is a
//! fixed base plus a per-word rate over the input length; an underfunded call
//! fails like any out-of-gas frame.

use crate::errors::{Result, VmError};
use crate::gas::{
    GAS_IDENTITY_BASE, GAS_IDENTITY_WORD, GAS_SHA256_BASE, GAS_SHA256_WORD,
};
use crate::hashing::sha256;
use crate::types::{Address, Gas};

/// SHA-256 hash of the input.
pub const SHA256_ADDRESS: Address = Address::with_last_byte(0x02);
/// Copies input to output unchanged.
pub const IDENTITY_ADDRESS: Address = Address::with_last_byte(0x04);

/// A natively executed contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precompile {
    Sha256,
    Identity,
}

impl Precompile {
    /// Look up the precompile at `address`, if any.
    pub fn lookup(address: Address) -> Option<Self> {
        if address == SHA256_ADDRESS {
            Some(Self::Sha256)
        } else if address == IDENTITY_ADDRESS {
            Some(Self::Identity)
        } else {
            None
        }
    }

    /// Gas required to process `input`.
    pub fn required_gas(&self, input: &[u8]) -> Gas {
        let words = (input.len() as Gas + 31) / 32;
        match self {
            Self::Sha256 => GAS_SHA256_BASE + GAS_SHA256_WORD * words,
            Self::Identity => GAS_IDENTITY_BASE + GAS_IDENTITY_WORD * words,
        }
    }

    /// Run the precompile. Returns the output and gas consumed, or
    /// `OutOfGas` when `gas_limit` does not cover `required_gas`.
    pub fn run(&self, input: &[u8], gas_limit: Gas) -> Result<(Vec<u8>, Gas)> {
        let cost = self.required_gas(input);
        if cost > gas_limit {
            return Err(VmError::OutOfGas);
        }
        let output = match self {
            Self::Sha256 => sha256(input).to_vec(),
            Self::Identity => input.to_vec(),
        };
        Ok((output, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_lookup() {
        assert_eq!(Precompile::lookup(SHA256_ADDRESS), Some(Precompile::Sha256));
        assert_eq!(
            Precompile::lookup(IDENTITY_ADDRESS),
            Some(Precompile::Identity)
        );
        assert_eq!(Precompile::lookup(Address::with_last_byte(0x01)), None);
        assert_eq!(Precompile::lookup(Address::repeat_byte(0x42)), None);
    }

    #[test]
    fn test_sha256_known_vector() {
        let (out, used) = Precompile::Sha256.run(b"abc", 1_000_000).unwrap();
        assert_eq!(
            out,
            hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        // 3 bytes round up to one word.
        assert_eq!(used, GAS_SHA256_BASE + GAS_SHA256_WORD);
    }

    #[test]
    fn test_identity_echoes_input() {
        let input = vec![1u8, 2, 3, 4, 5];
        let (out, used) = Precompile::Identity.run(&input, 1_000_000).unwrap();
        assert_eq!(out, input);
        assert_eq!(used, GAS_IDENTITY_BASE + GAS_IDENTITY_WORD);
    }

    #[test]
    fn test_underfunded_call_fails() {
        let cost = Precompile::Sha256.required_gas(b"abc");
        let err = Precompile::Sha256.run(b"abc", cost - 1).unwrap_err();
        assert!(matches!(err, VmError::OutOfGas));
    }

    #[test]
    fn test_empty_input_charges_base_only() {
        let (out, used) = Precompile::Identity.run(&[], 1_000_000).unwrap();
        assert!(out.is_empty());
        assert_eq!(used, GAS_IDENTITY_BASE);
    }
}
