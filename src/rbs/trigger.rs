//! Trigger evaluation
//!
//! Evaluation is side-effect free so a trigger can be checked speculatively.
//! `record_trigger` only stores the triggering deviation; cooldown state is
//! advanced by the engine after the swap succeeds.

use super::auth::{AuthorizationPolicy, Capability};
use super::cooldown::CooldownManager;
use super::deviation::{validate_threshold, DeviationMonitor};
use super::error::BuybackError;
use super::types::{Timestamp, TriggerRecord};
use std::sync::Arc;

/// Why a trigger did or did not fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Fire { deviation_bps: u32 },
    InCooldown { deviation_bps: u32, remaining_secs: i64 },
    BelowThreshold { deviation_bps: u32 },
}

impl TriggerDecision {
    pub fn fires(&self) -> bool {
        matches!(self, TriggerDecision::Fire { .. })
    }

    pub fn deviation_bps(&self) -> u32 {
        match self {
            TriggerDecision::Fire { deviation_bps }
            | TriggerDecision::InCooldown { deviation_bps, .. }
            | TriggerDecision::BelowThreshold { deviation_bps } => *deviation_bps,
        }
    }
}

pub struct TriggerEvaluator {
    auth: Arc<AuthorizationPolicy>,
    /// May differ from the monitor's alert threshold
    trigger_threshold_bps: u32,
    last_trigger: Option<TriggerRecord>,
    trigger_count: u64,
}

impl TriggerEvaluator {
    pub fn new(auth: Arc<AuthorizationPolicy>, trigger_threshold_bps: u32) -> Result<Self, BuybackError> {
        validate_threshold(trigger_threshold_bps)?;
        Ok(Self {
            auth,
            trigger_threshold_bps,
            last_trigger: None,
            trigger_count: 0,
        })
    }

    pub fn trigger_threshold_bps(&self) -> u32 {
        self.trigger_threshold_bps
    }

    pub fn last_trigger(&self) -> Option<TriggerRecord> {
        self.last_trigger
    }

    pub fn trigger_count(&self) -> u64 {
        self.trigger_count
    }

    /// Decide against an already-read deviation
    pub fn decide(
        &self,
        deviation_bps: u32,
        monitor: &DeviationMonitor,
        cooldown: &CooldownManager,
        now: Timestamp,
    ) -> TriggerDecision {
        if !cooldown.can_execute_buyback(now) {
            return TriggerDecision::InCooldown {
                deviation_bps,
                remaining_secs: cooldown.remaining_cooldown(now),
            };
        }
        if monitor.is_significant_deviation(deviation_bps)
            && deviation_bps >= self.trigger_threshold_bps
        {
            TriggerDecision::Fire { deviation_bps }
        } else {
            TriggerDecision::BelowThreshold { deviation_bps }
        }
    }

    /// Read the oracle once and decide
    pub fn evaluate(
        &self,
        monitor: &DeviationMonitor,
        cooldown: &CooldownManager,
        now: Timestamp,
    ) -> Result<TriggerDecision, BuybackError> {
        let deviation_bps = monitor.current_deviation_bps()?;
        Ok(self.decide(deviation_bps, monitor, cooldown, now))
    }

    pub fn should_trigger_buyback(
        &self,
        monitor: &DeviationMonitor,
        cooldown: &CooldownManager,
        now: Timestamp,
    ) -> Result<bool, BuybackError> {
        Ok(self.evaluate(monitor, cooldown, now)?.fires())
    }

    pub fn record_trigger(&mut self, deviation_bps: u32, now: Timestamp) {
        log::info!("🔔 Buyback triggered at {} bps deviation", deviation_bps);
        self.last_trigger = Some(TriggerRecord {
            deviation_bps,
            timestamp: now,
        });
        self.trigger_count += 1;
    }

    pub fn set_trigger_threshold(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_threshold(bps)?;
        log::info!("🔔 Trigger threshold {} -> {} bps", self.trigger_threshold_bps, bps);
        self.trigger_threshold_bps = bps;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimOracle;

    struct Fixture {
        oracle: Arc<SimOracle>,
        monitor: DeviationMonitor,
        cooldown: CooldownManager,
        trigger: TriggerEvaluator,
    }

    fn fixture(current: u128, monitor_threshold: u32, trigger_threshold: u32) -> Fixture {
        let auth = AuthorizationPolicy::shared("owner");
        let oracle = Arc::new(SimOracle::new(current));
        Fixture {
            monitor: DeviationMonitor::new(oracle.clone(), auth.clone(), 100, monitor_threshold).unwrap(),
            cooldown: CooldownManager::new(auth.clone(), 3_600).unwrap(),
            trigger: TriggerEvaluator::new(auth, trigger_threshold).unwrap(),
            oracle,
        }
    }

    #[test]
    fn test_at_target_does_not_fire() {
        let f = fixture(100, 500, 500);
        let decision = f.trigger.evaluate(&f.monitor, &f.cooldown, 0).unwrap();
        assert_eq!(decision, TriggerDecision::BelowThreshold { deviation_bps: 0 });
        assert!(!f.trigger.should_trigger_buyback(&f.monitor, &f.cooldown, 0).unwrap());
    }

    #[test]
    fn test_significant_deviation_fires_after_cooldown() {
        let mut f = fixture(90, 500, 500);
        assert!(f.trigger.should_trigger_buyback(&f.monitor, &f.cooldown, 0).unwrap());

        f.cooldown.record_buyback(1_000).unwrap();
        let decision = f.trigger.evaluate(&f.monitor, &f.cooldown, 1_500).unwrap();
        assert_eq!(
            decision,
            TriggerDecision::InCooldown {
                deviation_bps: 1_000,
                remaining_secs: 3_100
            }
        );
        assert!(f.trigger.should_trigger_buyback(&f.monitor, &f.cooldown, 4_600).unwrap());
    }

    #[test]
    fn test_trigger_threshold_stricter_than_alert() {
        let f = fixture(93, 500, 1_000);
        // 700 bps: significant for the monitor, below the trigger threshold
        assert!(f.monitor.is_significant().unwrap());
        assert!(!f.trigger.should_trigger_buyback(&f.monitor, &f.cooldown, 0).unwrap());

        f.oracle.set_price(90);
        assert!(f.trigger.should_trigger_buyback(&f.monitor, &f.cooldown, 0).unwrap());
    }

    #[test]
    fn test_record_trigger_leaves_cooldown_alone() {
        let mut f = fixture(90, 500, 500);
        f.trigger.record_trigger(1_000, 42);

        assert_eq!(f.trigger.trigger_count(), 1);
        assert_eq!(
            f.trigger.last_trigger(),
            Some(TriggerRecord {
                deviation_bps: 1_000,
                timestamp: 42
            })
        );
        assert!(f.cooldown.can_execute_buyback(43));
    }

    #[test]
    fn test_set_trigger_threshold() {
        let mut f = fixture(90, 500, 500);
        assert!(f.trigger.set_trigger_threshold("stranger", 800).is_err());
        assert!(f.trigger.set_trigger_threshold("owner", 6_000).is_err());
        f.trigger.set_trigger_threshold("owner", 1_500).unwrap();
        assert!(!f.trigger.should_trigger_buyback(&f.monitor, &f.cooldown, 0).unwrap());
    }
}
