//! Minimum spacing between executed buybacks

use super::auth::{AuthorizationPolicy, Capability};
use super::error::BuybackError;
use super::types::{CooldownState, Timestamp};
use std::sync::Arc;

pub struct CooldownManager {
    auth: Arc<AuthorizationPolicy>,
    state: CooldownState,
}

impl CooldownManager {
    pub fn new(auth: Arc<AuthorizationPolicy>, cooldown_period: i64) -> Result<Self, BuybackError> {
        validate_period(cooldown_period)?;
        Ok(Self {
            auth,
            state: CooldownState {
                last_buyback_time: None,
                cooldown_period,
            },
        })
    }

    pub fn state(&self) -> CooldownState {
        self.state
    }

    pub fn can_execute_buyback(&self, now: Timestamp) -> bool {
        match self.state.last_buyback_time {
            None => true,
            Some(last) => now >= last.saturating_add(self.state.cooldown_period),
        }
    }

    /// Seconds left before the next buyback is allowed
    pub fn remaining_cooldown(&self, now: Timestamp) -> i64 {
        match self.state.last_buyback_time {
            None => 0,
            Some(last) => (last.saturating_add(self.state.cooldown_period) - now).max(0),
        }
    }

    pub fn record_buyback(&mut self, now: Timestamp) -> Result<(), BuybackError> {
        if !self.can_execute_buyback(now) {
            return Err(BuybackError::InCooldownPeriod {
                remaining_secs: self.remaining_cooldown(now),
            });
        }
        self.state.last_buyback_time = Some(now);
        Ok(())
    }

    pub fn set_cooldown_period(&mut self, caller: &str, period: i64) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_period(period)?;
        log::info!("⏱️  Cooldown {}s -> {}s", self.state.cooldown_period, period);
        self.state.cooldown_period = period;
        Ok(())
    }
}

fn validate_period(period: i64) -> Result<(), BuybackError> {
    if period < 0 {
        return Err(BuybackError::InvalidConfig("cooldown period must be >= 0".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(period: i64) -> CooldownManager {
        CooldownManager::new(AuthorizationPolicy::shared("owner"), period).unwrap()
    }

    #[test]
    fn test_never_executed_is_allowed() {
        let manager = manager(3_600);
        assert!(manager.can_execute_buyback(0));
        assert_eq!(manager.remaining_cooldown(0), 0);
    }

    #[test]
    fn test_blocked_until_period_elapses() {
        let mut manager = manager(3_600);
        manager.record_buyback(10_000).unwrap();

        assert!(!manager.can_execute_buyback(10_000));
        assert!(!manager.can_execute_buyback(13_599));
        assert!(manager.can_execute_buyback(13_600));
        assert_eq!(manager.remaining_cooldown(12_000), 1_600);

        let err = manager.record_buyback(12_000).unwrap_err();
        assert_eq!(err, BuybackError::InCooldownPeriod { remaining_secs: 1_600 });
        assert_eq!(manager.state().last_buyback_time, Some(10_000));

        manager.record_buyback(13_600).unwrap();
        assert_eq!(manager.state().last_buyback_time, Some(13_600));
    }

    #[test]
    fn test_zero_cooldown_allows_back_to_back() {
        let mut manager = manager(0);
        manager.record_buyback(5).unwrap();
        assert!(manager.can_execute_buyback(5));
        manager.record_buyback(5).unwrap();
    }

    #[test]
    fn test_set_cooldown_period() {
        let mut manager = manager(3_600);
        assert!(manager.set_cooldown_period("stranger", 60).is_err());
        assert!(manager.set_cooldown_period("owner", -1).is_err());
        manager.set_cooldown_period("owner", 60).unwrap();
        assert_eq!(manager.state().cooldown_period, 60);
    }
}
