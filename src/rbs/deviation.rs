//! Price deviation monitor
//!
//! Deviation is always an unsigned basis-point distance from the target;
//! callers that need the direction use `is_below_target`.

use super::auth::{AuthorizationPolicy, Capability};
use super::collaborators::PriceOracle;
use super::error::BuybackError;
use super::math::deviation_bps;
use super::types::{Amount, DeviationState, MAX_THRESHOLD_BPS};
use std::sync::Arc;

pub struct DeviationMonitor {
    oracle: Arc<dyn PriceOracle>,
    auth: Arc<AuthorizationPolicy>,
    target_price: Amount,
    threshold_bps: u32,
}

impl DeviationMonitor {
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        auth: Arc<AuthorizationPolicy>,
        target_price: Amount,
        threshold_bps: u32,
    ) -> Result<Self, BuybackError> {
        validate_target_price(target_price)?;
        validate_threshold(threshold_bps)?;
        Ok(Self {
            oracle,
            auth,
            target_price,
            threshold_bps,
        })
    }

    pub fn target_price(&self) -> Amount {
        self.target_price
    }

    pub fn threshold_bps(&self) -> u32 {
        self.threshold_bps
    }

    fn current_price(&self) -> Result<Amount, BuybackError> {
        self.oracle
            .get_price()
            .map_err(|e| BuybackError::Oracle(e.to_string()))
    }

    /// Fresh deviation snapshot (one oracle read)
    pub fn deviation_state(&self) -> Result<DeviationState, BuybackError> {
        let current_price = self.current_price()?;
        Ok(DeviationState {
            target_price: self.target_price,
            current_price,
            deviation_bps: deviation_bps(current_price, self.target_price),
        })
    }

    pub fn current_deviation_bps(&self) -> Result<u32, BuybackError> {
        Ok(self.deviation_state()?.deviation_bps)
    }

    pub fn is_significant(&self) -> Result<bool, BuybackError> {
        Ok(self.is_significant_deviation(self.current_deviation_bps()?))
    }

    /// Threshold test against an already-read deviation
    pub fn is_significant_deviation(&self, deviation_bps: u32) -> bool {
        deviation_bps >= self.threshold_bps
    }

    /// Market trades under target (the case a buyback supports)
    pub fn is_below_target(&self) -> Result<bool, BuybackError> {
        Ok(self.current_price()? < self.target_price)
    }

    pub fn set_target_price(&mut self, caller: &str, price: Amount) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_target_price(price)?;
        log::info!("🎯 Target price {} -> {}", self.target_price, price);
        self.target_price = price;
        Ok(())
    }

    pub fn set_threshold(&mut self, caller: &str, threshold_bps: u32) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_threshold(threshold_bps)?;
        log::info!("📏 Deviation threshold {} -> {} bps", self.threshold_bps, threshold_bps);
        self.threshold_bps = threshold_bps;
        Ok(())
    }
}

fn validate_target_price(price: Amount) -> Result<(), BuybackError> {
    if price == 0 {
        return Err(BuybackError::InvalidConfig("target price must be > 0".to_string()));
    }
    Ok(())
}

/// Thresholds live in (0, MAX_THRESHOLD_BPS]
pub(crate) fn validate_threshold(threshold_bps: u32) -> Result<(), BuybackError> {
    if threshold_bps == 0 || threshold_bps > MAX_THRESHOLD_BPS {
        return Err(BuybackError::InvalidConfig(format!(
            "threshold {} bps outside (0, {}]",
            threshold_bps, MAX_THRESHOLD_BPS
        )));
    }
    Ok(())
}
