//! Engine configuration from environment variables

use super::error::BuybackError;
use super::types::{Amount, MAX_THRESHOLD_BPS, PRICE_SCALE};
use super::swap::MAX_SLIPPAGE_BPS;
use super::volume::MAX_SCALING_FACTOR_BPS;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Named parameters of the buyback engine
///
/// Set at construction; afterwards only the owner may change them through
/// the engine's admin setters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Target price (18 decimals, quote token per protocol token)
    pub target_price: Amount,

    /// Deviation the monitor treats as significant
    pub deviation_threshold_bps: u32,

    /// Deviation the trigger requires (defaults to the monitor threshold)
    pub trigger_threshold_bps: u32,

    pub cooldown_period_seconds: i64,

    pub max_amount_per_period: Amount,

    pub period_duration_seconds: i64,

    /// Protected amount assumed when the treasury cannot report one
    pub min_reserves_threshold: Amount,

    pub max_reserves_percentage_bps: u32,

    pub min_buyback_amount: Amount,

    pub max_buyback_amount: Amount,

    pub scaling_factor_bps: u32,

    pub slippage_tolerance_bps: u32,

    /// Token spent on buybacks
    pub reserve_token: String,

    /// Protocol token bought back
    pub protocol_token: String,

    /// Account the swap executor holds funds under
    pub executor_account: String,

    /// Capacity of the backtest ring buffer
    pub backtest_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_price: PRICE_SCALE,
            deviation_threshold_bps: 500,
            trigger_threshold_bps: 500,
            cooldown_period_seconds: 3_600,
            max_amount_per_period: 100_000 * PRICE_SCALE,
            period_duration_seconds: 86_400,
            min_reserves_threshold: 10_000 * PRICE_SCALE,
            max_reserves_percentage_bps: 1_000,
            min_buyback_amount: 1_000 * PRICE_SCALE,
            max_buyback_amount: 50_000 * PRICE_SCALE,
            scaling_factor_bps: 10_000,
            slippage_tolerance_bps: 100,
            reserve_token: "USDC".to_string(),
            protocol_token: "RBS".to_string(),
            executor_account: "buyback_executor".to_string(),
            backtest_capacity: 10_000,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (amounts in smallest units, prices 18 decimals):
    /// - `RBS_TARGET_PRICE` (default: 1e18)
    /// - `RBS_DEVIATION_THRESHOLD_BPS` (default: 500)
    /// - `RBS_TRIGGER_THRESHOLD_BPS` (default: deviation threshold)
    /// - `RBS_COOLDOWN_PERIOD_SECONDS` (default: 3600)
    /// - `RBS_MAX_AMOUNT_PER_PERIOD` (default: 100k tokens)
    /// - `RBS_PERIOD_DURATION_SECONDS` (default: 86400)
    /// - `RBS_MIN_RESERVES_THRESHOLD` (default: 10k tokens)
    /// - `RBS_MAX_RESERVES_PERCENTAGE_BPS` (default: 1000)
    /// - `RBS_MIN_BUYBACK_AMOUNT` / `RBS_MAX_BUYBACK_AMOUNT` (default: 1k / 50k tokens)
    /// - `RBS_SCALING_FACTOR_BPS` (default: 10000)
    /// - `RBS_SLIPPAGE_TOLERANCE_BPS` (default: 100)
    /// - `RBS_RESERVE_TOKEN` / `RBS_PROTOCOL_TOKEN` / `RBS_EXECUTOR_ACCOUNT`
    /// - `RBS_BACKTEST_CAPACITY` (default: 10000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let deviation_threshold_bps =
            env_or("RBS_DEVIATION_THRESHOLD_BPS", defaults.deviation_threshold_bps);

        Self {
            target_price: env_or("RBS_TARGET_PRICE", defaults.target_price),
            deviation_threshold_bps,
            trigger_threshold_bps: env_or("RBS_TRIGGER_THRESHOLD_BPS", deviation_threshold_bps),
            cooldown_period_seconds: env_or(
                "RBS_COOLDOWN_PERIOD_SECONDS",
                defaults.cooldown_period_seconds,
            ),
            max_amount_per_period: env_or("RBS_MAX_AMOUNT_PER_PERIOD", defaults.max_amount_per_period),
            period_duration_seconds: env_or(
                "RBS_PERIOD_DURATION_SECONDS",
                defaults.period_duration_seconds,
            ),
            min_reserves_threshold: env_or(
                "RBS_MIN_RESERVES_THRESHOLD",
                defaults.min_reserves_threshold,
            ),
            max_reserves_percentage_bps: env_or(
                "RBS_MAX_RESERVES_PERCENTAGE_BPS",
                defaults.max_reserves_percentage_bps,
            ),
            min_buyback_amount: env_or("RBS_MIN_BUYBACK_AMOUNT", defaults.min_buyback_amount),
            max_buyback_amount: env_or("RBS_MAX_BUYBACK_AMOUNT", defaults.max_buyback_amount),
            scaling_factor_bps: env_or("RBS_SCALING_FACTOR_BPS", defaults.scaling_factor_bps),
            slippage_tolerance_bps: env_or(
                "RBS_SLIPPAGE_TOLERANCE_BPS",
                defaults.slippage_tolerance_bps,
            ),
            reserve_token: env::var("RBS_RESERVE_TOKEN").unwrap_or(defaults.reserve_token),
            protocol_token: env::var("RBS_PROTOCOL_TOKEN").unwrap_or(defaults.protocol_token),
            executor_account: env::var("RBS_EXECUTOR_ACCOUNT").unwrap_or(defaults.executor_account),
            backtest_capacity: env_or("RBS_BACKTEST_CAPACITY", defaults.backtest_capacity),
        }
    }

    /// Reject values that must never enter engine state
    pub fn validate(&self) -> Result<(), BuybackError> {
        let invalid = |msg: String| -> Result<(), BuybackError> { Err(BuybackError::InvalidConfig(msg)) };

        if self.target_price == 0 {
            return invalid("target_price must be > 0".to_string());
        }
        for (name, bps) in [
            ("deviation_threshold_bps", self.deviation_threshold_bps),
            ("trigger_threshold_bps", self.trigger_threshold_bps),
            ("max_reserves_percentage_bps", self.max_reserves_percentage_bps),
        ] {
            if bps == 0 || bps > MAX_THRESHOLD_BPS {
                return invalid(format!("{} = {} outside (0, {}]", name, bps, MAX_THRESHOLD_BPS));
            }
        }
        if self.scaling_factor_bps == 0 || self.scaling_factor_bps > MAX_SCALING_FACTOR_BPS {
            return invalid(format!(
                "scaling_factor_bps = {} outside (0, {}]",
                self.scaling_factor_bps, MAX_SCALING_FACTOR_BPS
            ));
        }
        if self.slippage_tolerance_bps > MAX_SLIPPAGE_BPS {
            return invalid(format!(
                "slippage_tolerance_bps = {} above {}",
                self.slippage_tolerance_bps, MAX_SLIPPAGE_BPS
            ));
        }
        if self.cooldown_period_seconds < 0 {
            return invalid("cooldown_period_seconds must be >= 0".to_string());
        }
        if self.period_duration_seconds <= 0 {
            return invalid("period_duration_seconds must be > 0".to_string());
        }
        if self.max_amount_per_period == 0 {
            return invalid("max_amount_per_period must be > 0".to_string());
        }
        if self.min_buyback_amount == 0 || self.min_buyback_amount > self.max_buyback_amount {
            return invalid(format!(
                "buyback bounds [{}, {}] invalid",
                self.min_buyback_amount, self.max_buyback_amount
            ));
        }
        if self.reserve_token.is_empty() || self.protocol_token.is_empty() || self.executor_account.is_empty() {
            return invalid("token and executor identifiers must be non-empty".to_string());
        }
        if self.reserve_token == self.protocol_token {
            return invalid("reserve and protocol token are identical".to_string());
        }
        if self.backtest_capacity == 0 {
            return invalid("backtest_capacity must be > 0".to_string());
        }
        Ok(())
    }
}
