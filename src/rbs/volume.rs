//! Buyback sizing
//!
//! Amount scales linearly from `min_buyback_amount` at the threshold to
//! `max_buyback_amount` at full deviation, then is capped by available
//! reserves. Every division floors.

use super::auth::{AuthorizationPolicy, Capability};
use super::deviation::{validate_threshold, DeviationMonitor};
use super::error::BuybackError;
use super::math::mul_div;
use super::reserves::ReserveChecker;
use super::types::{Amount, BPS_DENOMINATOR};
use std::sync::Arc;

/// Upper bound for the scaling factor (2x)
pub const MAX_SCALING_FACTOR_BPS: u32 = 20_000;

pub struct VolumeCalculator {
    auth: Arc<AuthorizationPolicy>,
    threshold_bps: u32,
    min_buyback_amount: Amount,
    max_buyback_amount: Amount,
    scaling_factor_bps: u32,
}

impl VolumeCalculator {
    pub fn new(
        auth: Arc<AuthorizationPolicy>,
        threshold_bps: u32,
        min_buyback_amount: Amount,
        max_buyback_amount: Amount,
        scaling_factor_bps: u32,
    ) -> Result<Self, BuybackError> {
        validate_threshold(threshold_bps)?;
        validate_bounds(min_buyback_amount, max_buyback_amount)?;
        validate_scaling(scaling_factor_bps)?;
        Ok(Self {
            auth,
            threshold_bps,
            min_buyback_amount,
            max_buyback_amount,
            scaling_factor_bps,
        })
    }

    pub fn threshold_bps(&self) -> u32 {
        self.threshold_bps
    }

    pub fn bounds(&self) -> (Amount, Amount) {
        (self.min_buyback_amount, self.max_buyback_amount)
    }

    pub fn scaling_factor_bps(&self) -> u32 {
        self.scaling_factor_bps
    }

    /// Uncapped-by-reserves amount for a deviation
    pub fn scaled_amount(&self, deviation_bps: u32) -> Amount {
        if deviation_bps < self.threshold_bps {
            return self.min_buyback_amount;
        }

        let denominator = BPS_DENOMINATOR as Amount;
        let excess = (deviation_bps - self.threshold_bps) as Amount;
        let max_excess = (BPS_DENOMINATOR - self.threshold_bps) as Amount;

        // Deviations past 100% would push the ratio above 1; hold it at 1
        let ratio = mul_div(excess, denominator, max_excess).min(denominator);
        let scaled = mul_div(ratio, self.scaling_factor_bps as Amount, denominator);

        let range = self.max_buyback_amount - self.min_buyback_amount;
        let amount = self
            .min_buyback_amount
            .saturating_add(mul_div(range, scaled, denominator));
        amount.min(self.max_buyback_amount)
    }

    /// Amount to buy back for `deviation_bps` given current reserves
    pub fn calculate_buyback_amount(
        &self,
        deviation_bps: u32,
        reserves: &ReserveChecker,
    ) -> Result<Amount, BuybackError> {
        let available = reserves.available_reserves()?;
        let amount = self.scaled_amount(deviation_bps).min(available);
        log::debug!(
            "📐 Buyback size {} for {} bps (available reserves {})",
            amount,
            deviation_bps,
            available
        );
        Ok(amount)
    }

    /// Convenience wrapper reading the deviation from the monitor
    pub fn current_buyback_amount(
        &self,
        monitor: &DeviationMonitor,
        reserves: &ReserveChecker,
    ) -> Result<Amount, BuybackError> {
        let deviation_bps = monitor.current_deviation_bps()?;
        self.calculate_buyback_amount(deviation_bps, reserves)
    }

    pub fn set_amount_bounds(
        &mut self,
        caller: &str,
        min_buyback_amount: Amount,
        max_buyback_amount: Amount,
    ) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_bounds(min_buyback_amount, max_buyback_amount)?;
        log::info!(
            "📐 Buyback bounds [{}, {}] -> [{}, {}]",
            self.min_buyback_amount,
            self.max_buyback_amount,
            min_buyback_amount,
            max_buyback_amount
        );
        self.min_buyback_amount = min_buyback_amount;
        self.max_buyback_amount = max_buyback_amount;
        Ok(())
    }

    pub fn set_scaling_factor(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_scaling(bps)?;
        log::info!("📐 Scaling factor {} -> {} bps", self.scaling_factor_bps, bps);
        self.scaling_factor_bps = bps;
        Ok(())
    }

    pub fn set_threshold(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_threshold(bps)?;
        self.threshold_bps = bps;
        Ok(())
    }
}

fn validate_bounds(min: Amount, max: Amount) -> Result<(), BuybackError> {
    if min == 0 {
        return Err(BuybackError::InvalidConfig("min buyback amount must be > 0".to_string()));
    }
    if min > max {
        return Err(BuybackError::InvalidConfig(format!(
            "min buyback amount {} exceeds max {}",
            min, max
        )));
    }
    Ok(())
}

fn validate_scaling(bps: u32) -> Result<(), BuybackError> {
    if bps == 0 || bps > MAX_SCALING_FACTOR_BPS {
        return Err(BuybackError::InvalidConfig(format!(
            "scaling factor {} bps outside (0, {}]",
            bps, MAX_SCALING_FACTOR_BPS
        )));
    }
    Ok(())
}
