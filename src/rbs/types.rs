//! Core data structures for the buyback engine
//!
//! Amounts and prices are fixed-point integers. Prices carry 18 decimals
//! (`PRICE_SCALE`), ratios are basis points (`BPS_DENOMINATOR`).

use serde::{Deserialize, Serialize};

/// Token amount in the token's smallest unit
pub type Amount = u128;

/// Unix timestamp in seconds
pub type Timestamp = i64;

/// Token identifier (symbol or address, opaque to the engine)
pub type TokenId = String;

/// Account identifier (treasury, executor, router, callers)
pub type AccountId = String;

/// 100% in basis points
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Fixed-point scale for prices (18 decimals)
pub const PRICE_SCALE: Amount = 1_000_000_000_000_000_000;

/// Upper bound for deviation / trigger / utilization thresholds (50%)
pub const MAX_THRESHOLD_BPS: u32 = 5_000;

/// Swap deadline offset passed to the router
pub const SWAP_DEADLINE_SECS: i64 = 300;

/// Snapshot of the monitored price against its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviationState {
    pub target_price: Amount,
    pub current_price: Amount,
    pub deviation_bps: u32,
}

/// Snapshot of the treasury reserves as seen by the reserve checker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveState {
    pub total_reserves: Amount,
    pub protected_reserves: Amount,
    pub max_utilization_bps: u32,
    pub available_reserves: Amount,
    /// True when the protected amount came from the configured fallback
    pub protected_from_fallback: bool,
}

/// Fixed rate-limit window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub period_start: Timestamp,
    pub period_duration: i64,
    pub usage_in_period: Amount,
    pub max_per_period: Amount,
}

impl RateLimitWindow {
    /// Window has run its full duration and resets on next use
    pub fn is_elapsed(&self, now: Timestamp) -> bool {
        now >= self.period_start.saturating_add(self.period_duration)
    }
}

/// Cooldown bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CooldownState {
    /// None until the first successful buyback
    pub last_buyback_time: Option<Timestamp>,
    pub cooldown_period: i64,
}

/// Immutable record of one buyback attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuybackRecord {
    pub id: u64,
    pub timestamp: Timestamp,
    pub input_amount: Amount,
    pub output_amount: Amount,
    /// input × 1e18 / output, 0 when nothing was received
    pub effective_price: Amount,
    /// Oracle price at the time of the attempt
    pub market_price: Amount,
    pub deviation_bps: u32,
    pub executor: AccountId,
    pub success: bool,
    pub reason: String,
}

/// Fields supplied by the caller when appending a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBuybackRecord {
    pub input_amount: Amount,
    pub output_amount: Amount,
    pub market_price: Amount,
    pub deviation_bps: u32,
    pub executor: AccountId,
    pub success: bool,
    pub reason: String,
}

/// Last trigger seen by the trigger evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub deviation_bps: u32,
    pub timestamp: Timestamp,
}

/// Result of one engine cycle that did not hit a safety/config error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuybackOutcome {
    /// Deviation too small, nothing attempted
    NotTriggered { deviation_bps: u32 },
    /// Swap went through and all safety state advanced
    Executed {
        record_id: u64,
        amount_in: Amount,
        amount_out: Amount,
        deviation_bps: u32,
    },
    /// Swap attempted and failed; only the audit record was written
    Failed {
        record_id: u64,
        amount_in: Amount,
        reason: String,
    },
}

impl BuybackOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, BuybackOutcome::Executed { .. })
    }

    pub fn record_id(&self) -> Option<u64> {
        match self {
            BuybackOutcome::NotTriggered { .. } => None,
            BuybackOutcome::Executed { record_id, .. } | BuybackOutcome::Failed { record_id, .. } => {
                Some(*record_id)
            }
        }
    }
}

/// Non-mutating dry run of one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuybackPreview {
    pub deviation: DeviationState,
    pub would_trigger: bool,
    pub amount_in: Amount,
    pub expected_output: Amount,
    pub min_output: Amount,
    pub within_rate_limit: bool,
    pub sufficient_reserves: bool,
}

/// Engine-wide status snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub paused: bool,
    pub rate_limit: RateLimitWindow,
    pub cooldown: CooldownState,
    pub last_trigger: Option<TriggerRecord>,
    pub trigger_count: u64,
    pub audit_record_count: usize,
    pub backtest_record_count: usize,
}
