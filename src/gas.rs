//! Gas metering and the pinned cost schedule
//!
//! One versioned schedule, chosen once and kept stable: static per-opcode
//! tiers live in the instruction table (`opcode`), dynamic formulas live here.
//! There is no refund counter.

use crate::errors::{Result, VmError};
use crate::types::Gas;

/// Static cost tiers.
pub const GAS_ZERO: Gas = 0;
pub const GAS_BASE: Gas = 2;
pub const GAS_VERYLOW: Gas = 3;
pub const GAS_LOW: Gas = 5;
pub const GAS_MID: Gas = 8;
pub const GAS_HIGH: Gas = 10;
pub const GAS_EXT: Gas = 20;

/// Storage.
pub const GAS_SLOAD: Gas = 200;
pub const GAS_SSTORE_SET: Gas = 20_000;
pub const GAS_SSTORE_RESET: Gas = 5_000;

/// Hashing.
pub const GAS_KECCAK: Gas = 30;
pub const GAS_KECCAK_WORD: Gas = 6;

/// Logs.
pub const GAS_LOG: Gas = 375;
pub const GAS_LOG_TOPIC: Gas = 375;
pub const GAS_LOG_DATA: Gas = 8;

/// Copies (per 32-byte word moved).
pub const GAS_COPY_WORD: Gas = 3;

/// Calls and creation.
pub const GAS_CALL: Gas = 700;
pub const GAS_CALL_VALUE: Gas = 9_000;
pub const GAS_CALL_STIPEND: Gas = 2_300;
pub const GAS_CREATE: Gas = 32_000;
pub const GAS_CODE_DEPOSIT_BYTE: Gas = 200;
pub const GAS_SELFDESTRUCT: Gas = 5_000;

/// EXP.
pub const GAS_EXP: Gas = 10;
pub const GAS_EXP_BYTE: Gas = 50;

/// Precompile formulas.
pub const GAS_SHA256_BASE: Gas = 60;
pub const GAS_SHA256_WORD: Gas = 12;
pub const GAS_IDENTITY_BASE: Gas = 15;
pub const GAS_IDENTITY_WORD: Gas = 3;

/// Tracks remaining gas for one execution frame.
#[derive(Debug, Clone)]
pub struct GasMeter {
    limit: Gas,
    remaining: Gas,
    /// Highest memory word count already paid for.
    mem_words: u64,
}

impl GasMeter {
    /// Create a meter with a fixed budget.
    pub fn new(limit: Gas) -> Self {
        Self {
            limit,
            remaining: limit,
            mem_words: 0,
        }
    }

    /// Gas still available.
    pub fn remaining(&self) -> Gas {
        self.remaining
    }

    /// Gas spent so far.
    pub fn used(&self) -> Gas {
        self.limit - self.remaining
    }

    /// Charge a fixed amount, failing with `OutOfGas` when short.
    pub fn charge(&mut self, amount: Gas) -> Result<()> {
        if self.remaining < amount {
            self.remaining = 0;
            return Err(VmError::OutOfGas);
        }
        self.remaining -= amount;
        Ok(())
    }

    /// Drop the whole remaining budget (frame fault).
    pub fn consume_all(&mut self) {
        self.remaining = 0;
    }

    /// Return unused gas from a completed sub-call.
    pub fn refund(&mut self, amount: Gas) {
        self.remaining = (self.remaining + amount).min(self.limit);
    }

    /// Charge for growing memory to cover `new_words` 32-byte words.
    ///
    /// Total cost of a memory of `w` words is `3*w + w*w/512`; only the delta
    /// over the highest size already billed is charged.
    pub fn charge_memory(&mut self, new_words: u64) -> Result<()> {
        if new_words <= self.mem_words {
            return Ok(());
        }
        let delta = memory_cost(new_words).saturating_sub(memory_cost(self.mem_words));
        self.charge(delta)?;
        self.mem_words = new_words;
        Ok(())
    }
}

/// Quadratic-plus-linear total memory cost for `words` 32-byte words.
///
/// Computed in 128 bits and saturated: a cost past `Gas::MAX` is unpayable
/// by any meter, so the cap never changes what a frame can afford.
pub fn memory_cost(words: u64) -> Gas {
    let w = words as u128;
    let total = 3 * w + (w * w) / 512;
    total.min(Gas::MAX as u128) as Gas
}

/// KECCAK256 dynamic cost for hashing `size` bytes.
pub fn keccak_cost(size: usize) -> Gas {
    GAS_KECCAK + GAS_KECCAK_WORD * ((size as Gas + 31) / 32)
}

/// COPY-family dynamic cost for moving `size` bytes.
pub fn copy_cost(size: usize) -> Gas {
    GAS_COPY_WORD * ((size as Gas + 31) / 32)
}

/// LOGn dynamic cost.
pub fn log_cost(topics: usize, data_len: usize) -> Gas {
    GAS_LOG + GAS_LOG_TOPIC * topics as Gas + GAS_LOG_DATA * data_len as Gas
}

/// EXP dynamic cost, scaled by the byte length of the exponent.
pub fn exp_cost(exponent_bytes: usize) -> Gas {
    GAS_EXP + GAS_EXP_BYTE * exponent_bytes as Gas
}

/// SSTORE dynamic cost: setting a zero slot to non-zero is the expensive case.
pub fn sstore_cost(current_is_zero: bool, new_is_zero: bool) -> Gas {
    if current_is_zero && !new_is_zero {
        GAS_SSTORE_SET
    } else {
        GAS_SSTORE_RESET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_and_out_of_gas() {
        let mut meter = GasMeter::new(10);
        meter.charge(4).unwrap();
        assert_eq!(meter.remaining(), 6);
        assert_eq!(meter.used(), 4);

        assert!(matches!(meter.charge(7), Err(VmError::OutOfGas)));
        // A failed charge forfeits the rest of the frame's budget.
        assert_eq!(meter.remaining(), 0);
    }

    #[test]
    fn test_memory_cost_is_quadratic_plus_linear() {
        assert_eq!(memory_cost(0), 0);
        assert_eq!(memory_cost(1), 3);
        assert_eq!(memory_cost(32), 98); // 96 + 1024/512
        assert_eq!(memory_cost(1024), 5120); // 3072 + 2048
    }

    #[test]
    fn test_memory_billed_only_for_growth() {
        let mut meter = GasMeter::new(1_000);
        meter.charge_memory(2).unwrap();
        let after_first = meter.remaining();
        // Same size again: free.
        meter.charge_memory(2).unwrap();
        assert_eq!(meter.remaining(), after_first);
        // Growth bills only the delta.
        meter.charge_memory(3).unwrap();
        assert_eq!(
            after_first - meter.remaining(),
            memory_cost(3) - memory_cost(2)
        );
    }

    #[test]
    fn test_memory_cost_saturates_for_huge_sizes() {
        assert_eq!(memory_cost(u64::MAX), Gas::MAX);
        // Any meter rejects a saturated request outright.
        let mut meter = GasMeter::new(1_000_000);
        assert!(matches!(
            meter.charge_memory(u64::MAX),
            Err(VmError::OutOfGas)
        ));
    }

    #[test]
    fn test_sstore_cost_cases() {
        assert_eq!(sstore_cost(true, false), GAS_SSTORE_SET);
        assert_eq!(sstore_cost(false, false), GAS_SSTORE_RESET);
        assert_eq!(sstore_cost(false, true), GAS_SSTORE_RESET);
    }

    #[test]
    fn test_refund_capped_at_limit() {
        let mut meter = GasMeter::new(100);
        meter.charge(30).unwrap();
        meter.refund(1_000);
        assert_eq!(meter.remaining(), 100);
    }

    #[test]
    fn test_log_cost() {
        assert_eq!(log_cost(0, 0), 375);
        assert_eq!(log_cost(1, 32), 375 + 375 + 8 * 32);
    }
}
