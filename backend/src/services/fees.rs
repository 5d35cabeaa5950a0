//! # Fee Estimator
//!
//! Estimates what a transaction will cost before the user signs it:
//!
//! ```text
//! compute_unit_limit = simulated units * 1.2   (capped at 1.4M, 200k if unknown)
//! compute_unit_price = median recent prioritization fee (micro-lamports / CU)
//! total_fee          = 5000 + price * limit / 1_000_000   (lamports)
//! ```
//!
//! Simulation and the fee lookup are independent reads and are issued
//! concurrently, each under the backoff retry policy.

use std::sync::Arc;

use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
};
use tracing::debug;

use super::retry::RetryPolicy;
use super::transaction_builder::compile_unsigned;
use crate::errors::ServiceError;
use crate::solana::LedgerClient;

/// Fee charged per signature, in lamports.
pub const BASE_SIGNATURE_FEE_LAMPORTS: u64 = 5_000;

pub const MICRO_LAMPORTS_PER_LAMPORT: u64 = 1_000_000;

/// Compute unit limit used when simulation reports nothing.
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 200_000;

/// Hard cap on compute units per transaction.
pub const MAX_COMPUTE_UNIT_LIMIT: u32 = 1_400_000;

/// Estimated compute budget and fee of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub compute_unit_limit: u32,
    /// Micro-lamports per compute unit.
    pub compute_unit_price: u64,
    pub total_fee_lamports: u64,
}

impl FeeEstimate {
    pub fn new(compute_unit_limit: u32, compute_unit_price: u64) -> Self {
        let priority_fee = u64::try_from(
            compute_unit_price as u128 * compute_unit_limit as u128
                / MICRO_LAMPORTS_PER_LAMPORT as u128,
        )
        .unwrap_or(u64::MAX);

        Self {
            compute_unit_limit,
            compute_unit_price,
            total_fee_lamports: BASE_SIGNATURE_FEE_LAMPORTS.saturating_add(priority_fee),
        }
    }

    /// Compute budget instructions to prepend to the transaction.
    pub fn instructions(&self) -> Vec<Instruction> {
        vec![
            ComputeBudgetInstruction::set_compute_unit_limit(self.compute_unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(self.compute_unit_price),
        ]
    }
}

/// Compute unit limit with a 20% margin over the simulated usage.
pub fn compute_unit_limit(simulated_units: Option<u64>) -> u32 {
    match simulated_units {
        Some(units) if units > 0 => {
            let padded = units.saturating_mul(12) / 10;
            padded.min(MAX_COMPUTE_UNIT_LIMIT as u64) as u32
        }
        _ => DEFAULT_COMPUTE_UNIT_LIMIT,
    }
}

/// Median of recent prioritization fees, 0 when there are none.
pub fn compute_unit_price(mut fees: Vec<u64>) -> u64 {
    if fees.is_empty() {
        return 0;
    }
    fees.sort_unstable();
    let mid = fees.len() / 2;
    if fees.len() % 2 == 0 {
        fees[mid - 1] / 2 + fees[mid] / 2 + (fees[mid - 1] % 2 + fees[mid] % 2) / 2
    } else {
        fees[mid]
    }
}

/// Fee estimation against the live ledger.
#[derive(Clone)]
pub struct FeeEstimator {
    ledger: Arc<dyn LedgerClient>,
    retry: RetryPolicy,
}

impl FeeEstimator {
    pub fn new(ledger: Arc<dyn LedgerClient>, retry: RetryPolicy) -> Self {
        Self { ledger, retry }
    }

    /// Estimate the compute budget for `instructions` paid by `payer`.
    ///
    /// ## Arguments
    ///
    /// * `payer` - Fee payer
    /// * `instructions` - Instructions without compute budget instructions
    /// * `lookup_tables` - Tables the final message will be compiled with
    /// * `blockhash` - Any recent blockhash (the simulation replaces it)
    pub async fn estimate(
        &self,
        payer: &Pubkey,
        instructions: &[Instruction],
        lookup_tables: &[AddressLookupTableAccount],
        blockhash: Hash,
    ) -> Result<FeeEstimate, ServiceError> {
        let mut simulation_ixs =
            vec![ComputeBudgetInstruction::set_compute_unit_limit(MAX_COMPUTE_UNIT_LIMIT)];
        simulation_ixs.extend_from_slice(instructions);
        let simulation_tx = compile_unsigned(payer, &simulation_ixs, lookup_tables, blockhash)?;

        let writable: Vec<Pubkey> = writable_accounts(instructions);

        let (units, fees) = tokio::try_join!(
            self.retry.run(|| self.ledger.simulate_compute_units(&simulation_tx)),
            self.retry.run(|| self.ledger.get_recent_prioritization_fees(&writable)),
        )?;

        let estimate = FeeEstimate::new(compute_unit_limit(units), compute_unit_price(fees));
        debug!(
            "Fee estimate: {} CU at {} micro-lamports, {} lamports total",
            estimate.compute_unit_limit, estimate.compute_unit_price, estimate.total_fee_lamports
        );

        Ok(estimate)
    }
}

fn writable_accounts(instructions: &[Instruction]) -> Vec<Pubkey> {
    let mut keys: Vec<Pubkey> = Vec::new();
    for meta in instructions.iter().flat_map(|ix| ix.accounts.iter()) {
        if meta.is_writable && !keys.contains(&meta.pubkey) {
            keys.push(meta.pubkey);
        }
    }
    keys
}
