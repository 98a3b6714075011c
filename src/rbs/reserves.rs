//! Treasury reserve checks

use super::auth::{AuthorizationPolicy, Capability};
use super::collaborators::Treasury;
use super::error::BuybackError;
use super::math::apply_bps;
use super::types::{Amount, ReserveState, TokenId, MAX_THRESHOLD_BPS};
use std::sync::Arc;

pub struct ReserveChecker {
    treasury: Arc<dyn Treasury>,
    auth: Arc<AuthorizationPolicy>,
    /// Token spent on buybacks
    reserve_token: TokenId,
    /// Protected amount assumed when the treasury cannot report one
    min_reserves_threshold: Amount,
    max_utilization_bps: u32,
}

impl ReserveChecker {
    pub fn new(
        treasury: Arc<dyn Treasury>,
        auth: Arc<AuthorizationPolicy>,
        reserve_token: impl Into<TokenId>,
        min_reserves_threshold: Amount,
        max_utilization_bps: u32,
    ) -> Result<Self, BuybackError> {
        validate_utilization(max_utilization_bps)?;
        Ok(Self {
            treasury,
            auth,
            reserve_token: reserve_token.into(),
            min_reserves_threshold,
            max_utilization_bps,
        })
    }

    pub fn reserve_token(&self) -> &str {
        &self.reserve_token
    }

    pub fn max_utilization_bps(&self) -> u32 {
        self.max_utilization_bps
    }

    pub fn min_reserves_threshold(&self) -> Amount {
        self.min_reserves_threshold
    }

    /// Current reserve snapshot
    ///
    /// available = min(total − protected, total × utilization).
    pub fn reserve_state(&self) -> Result<ReserveState, BuybackError> {
        let total_reserves = self.treasury.reserve_balance(&self.reserve_token)?;

        let (protected_reserves, protected_from_fallback) =
            match self.treasury.protected_reserves(&self.reserve_token) {
                Ok(amount) => (amount, false),
                Err(e) => {
                    log::warn!(
                        "⚠️  Protected reserves unavailable ({}), using threshold {}",
                        e,
                        self.min_reserves_threshold
                    );
                    (self.min_reserves_threshold, true)
                }
            };

        let unprotected = total_reserves.saturating_sub(protected_reserves);
        let utilization_cap = apply_bps(total_reserves, self.max_utilization_bps);

        Ok(ReserveState {
            total_reserves,
            protected_reserves,
            max_utilization_bps: self.max_utilization_bps,
            available_reserves: unprotected.min(utilization_cap),
            protected_from_fallback,
        })
    }

    pub fn available_reserves(&self) -> Result<Amount, BuybackError> {
        Ok(self.reserve_state()?.available_reserves)
    }

    pub fn has_sufficient_reserves(&self, amount: Amount) -> Result<bool, BuybackError> {
        Ok(amount <= self.available_reserves()?)
    }

    pub fn set_min_reserves_threshold(
        &mut self,
        caller: &str,
        amount: Amount,
    ) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        log::info!("🛡️  Min reserves threshold {} -> {}", self.min_reserves_threshold, amount);
        self.min_reserves_threshold = amount;
        Ok(())
    }

    pub fn set_max_utilization_bps(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_utilization(bps)?;
        log::info!("🛡️  Max utilization {} -> {} bps", self.max_utilization_bps, bps);
        self.max_utilization_bps = bps;
        Ok(())
    }
}

fn validate_utilization(bps: u32) -> Result<(), BuybackError> {
    if bps == 0 || bps > MAX_THRESHOLD_BPS {
        return Err(BuybackError::InvalidConfig(format!(
            "max utilization {} bps outside (0, {}]",
            bps, MAX_THRESHOLD_BPS
        )));
    }
    Ok(())
}
