//! Credit cost of a generation.

use serde::{Deserialize, Serialize};

use crate::constants::{
    INPUT_MICROCREDITS_PER_TOKEN, MICROCREDITS_PER_CREDIT, OUTPUT_MICROCREDITS_PER_TOKEN,
};

/// Token counts reported by the text API at the end of a generation.
/// Missing counts are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// `ceil(max(1, in/1000 * 0.35 + out/1000 * 1.05))`, in integer
    /// arithmetic so the rounding is exact.
    pub fn credit_cost(&self) -> u64 {
        let micro = self
            .input_tokens
            .saturating_mul(INPUT_MICROCREDITS_PER_TOKEN)
            .saturating_add(self.output_tokens.saturating_mul(OUTPUT_MICROCREDITS_PER_TOKEN));
        micro.div_ceil(MICROCREDITS_PER_CREDIT).max(1)
    }
}

/// Balance after charging `cost`, floored at zero.
pub fn apply_deduction(balance: i64, cost: u64) -> i64 {
    let cost = i64::try_from(cost).unwrap_or(i64::MAX);
    balance.saturating_sub(cost).max(0)
}
