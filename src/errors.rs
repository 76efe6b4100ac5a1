/*
Error types for kiln-evm execution
Covers frame-local faults, call-boundary rejections, and storage failures.
*/

use crate::types::Address;
use thiserror::Error;

/// Errors that can occur during kiln-evm execution
///
/// Frame-local faults (`OutOfGas`, stack bounds, `InvalidJump`,
/// `InvalidOpcode`, `WriteProtection`) consume all gas supplied to the
/// faulting frame. `Revert` returns the unused portion. Only
/// `PersistentStore` is unrecoverable for the enclosing operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// Gas insufficient for the next charge
    #[error("out of gas")]
    OutOfGas,

    /// Operand count below the instruction's requirement
    #[error("stack underflow")]
    StackUnderflow,

    /// Stack would exceed its fixed limit
    #[error("stack overflow")]
    StackOverflow,

    /// Jump target is not a valid destination
    #[error("invalid jump destination")]
    InvalidJump,

    /// Unrecognized instruction byte
    #[error("invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),

    /// Mutating instruction inside a read-only (static) call
    #[error("write protection")]
    WriteProtection,

    /// Value transfer exceeds the sender balance
    #[error("insufficient balance for transfer from {0}")]
    InsufficientBalance(Address),

    /// Nested call exceeds the depth limit
    #[error("max call depth exceeded")]
    MaxCallDepthExceeded,

    /// Deploy target already occupied
    #[error("contract address collision at {0}")]
    ContractAddressCollision(Address),

    /// Contract requested rollback; reason payload is in the call output
    #[error("execution reverted")]
    Revert,

    /// Commit/flush I/O error; the root pointer must not be advanced
    #[error("persistent store failure: {0}")]
    PersistentStore(String),
}

impl VmError {
    /// Frame faults forfeit all gas supplied to the frame; reverts and
    /// call-boundary rejections do not.
    pub fn consumes_all_gas(&self) -> bool {
        matches!(
            self,
            VmError::OutOfGas
                | VmError::StackUnderflow
                | VmError::StackOverflow
                | VmError::InvalidJump
                | VmError::InvalidOpcode(_)
                | VmError::WriteProtection
        )
    }
}

/// Result type for kiln-evm operations
pub type Result<T> = core::result::Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VmError::InvalidOpcode(0xfe);
        assert!(err.to_string().contains("0xfe"));

        let err = VmError::ContractAddressCollision(Address::ZERO);
        assert!(err.to_string().contains("collision"));
    }

    #[test]
    fn test_gas_forfeiture_classification() {
        assert!(VmError::OutOfGas.consumes_all_gas());
        assert!(VmError::InvalidJump.consumes_all_gas());
        assert!(!VmError::Revert.consumes_all_gas());
        assert!(!VmError::InsufficientBalance(Address::ZERO).consumes_all_gas());
    }
}
