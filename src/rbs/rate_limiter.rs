//! Fixed-window buyback volume limiter
//!
//! The window resets lazily: the first check or record at or after
//! `period_start + period_duration` starts a new window at `now`.

use super::auth::{AuthorizationPolicy, Capability};
use super::error::BuybackError;
use super::types::{Amount, RateLimitWindow, Timestamp};
use std::sync::Arc;

pub struct RateLimiter {
    auth: Arc<AuthorizationPolicy>,
    window: RateLimitWindow,
}

impl RateLimiter {
    pub fn new(
        auth: Arc<AuthorizationPolicy>,
        max_per_period: Amount,
        period_duration: i64,
        now: Timestamp,
    ) -> Result<Self, BuybackError> {
        validate_max(max_per_period)?;
        validate_duration(period_duration)?;
        Ok(Self {
            auth,
            window: RateLimitWindow {
                period_start: now,
                period_duration,
                usage_in_period: 0,
                max_per_period,
            },
        })
    }

    pub fn window(&self) -> RateLimitWindow {
        self.window
    }

    /// Would `amount` fit right now? No state change.
    pub fn check_rate_limit(&self, amount: Amount, now: Timestamp) -> bool {
        if self.window.is_elapsed(now) {
            amount <= self.window.max_per_period
        } else {
            self.window
                .usage_in_period
                .checked_add(amount)
                .map_or(false, |total| total <= self.window.max_per_period)
        }
    }

    /// Commit `amount` against the window
    ///
    /// Only called after a successful swap. Usage is left untouched on error.
    pub fn record_buyback(&mut self, amount: Amount, now: Timestamp) -> Result<(), BuybackError> {
        if self.window.is_elapsed(now) {
            log::debug!(
                "🔄 Rate window reset (used {} of {})",
                self.window.usage_in_period,
                self.window.max_per_period
            );
            self.window.period_start = now;
            self.window.usage_in_period = 0;
        }

        let new_usage = self
            .window
            .usage_in_period
            .checked_add(amount)
            .filter(|total| *total <= self.window.max_per_period)
            .ok_or(BuybackError::RateLimitExceeded {
                requested: amount,
                usage: self.window.usage_in_period,
                max_per_period: self.window.max_per_period,
            })?;

        self.window.usage_in_period = new_usage;
        Ok(())
    }

    /// Volume still available in the current window
    pub fn remaining_capacity(&self, now: Timestamp) -> Amount {
        if self.window.is_elapsed(now) {
            self.window.max_per_period
        } else {
            self.window
                .max_per_period
                .saturating_sub(self.window.usage_in_period)
        }
    }

    pub fn time_until_reset(&self, now: Timestamp) -> i64 {
        let reset_at = self
            .window
            .period_start
            .saturating_add(self.window.period_duration);
        (reset_at - now).max(0)
    }

    pub fn set_max_per_period(&mut self, caller: &str, amount: Amount) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_max(amount)?;
        log::info!("🚦 Max per period {} -> {}", self.window.max_per_period, amount);
        self.window.max_per_period = amount;
        Ok(())
    }

    /// Change the window length; the current window restarts with zero usage
    pub fn set_period_duration(
        &mut self,
        caller: &str,
        period_duration: i64,
        now: Timestamp,
    ) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_duration(period_duration)?;
        log::info!(
            "🚦 Period duration {}s -> {}s (window reset)",
            self.window.period_duration,
            period_duration
        );
        self.window.period_duration = period_duration;
        self.window.period_start = now;
        self.window.usage_in_period = 0;
        Ok(())
    }
}

fn validate_max(amount: Amount) -> Result<(), BuybackError> {
    if amount == 0 {
        return Err(BuybackError::InvalidConfig("max per period must be > 0".to_string()));
    }
    Ok(())
}

fn validate_duration(secs: i64) -> Result<(), BuybackError> {
    if secs <= 0 {
        return Err(BuybackError::InvalidConfig("period duration must be > 0".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: Timestamp = 1_700_000_000;

    fn limiter(max: Amount, period: i64) -> RateLimiter {
        RateLimiter::new(AuthorizationPolicy::shared("owner"), max, period, START).unwrap()
    }

    #[test]
    fn test_second_record_over_cap_fails() {
        let mut limiter = limiter(1_000, 3_600);

        limiter.record_buyback(600, START + 10).unwrap();
        let err = limiter.record_buyback(500, START + 20).unwrap_err();

        assert!(matches!(err, BuybackError::RateLimitExceeded { usage: 600, .. }));
        assert_eq!(limiter.window().usage_in_period, 600);
    }

    #[test]
    fn test_check_matches_record_semantics() {
        let mut limiter = limiter(1_000, 3_600);
        limiter.record_buyback(600, START).unwrap();

        assert!(limiter.check_rate_limit(400, START + 1));
        assert!(!limiter.check_rate_limit(401, START + 1));

        // Window elapsed: amount alone is compared to the cap
        assert!(limiter.check_rate_limit(1_000, START + 3_600));
        assert!(!limiter.check_rate_limit(1_001, START + 3_600));
    }

    #[test]
    fn test_lazy_window_reset() {
        let mut limiter = limiter(1_000, 3_600);
        limiter.record_buyback(1_000, START).unwrap();
        assert_eq!(limiter.remaining_capacity(START + 100), 0);
        assert_eq!(limiter.time_until_reset(START + 100), 3_500);

        limiter.record_buyback(700, START + 3_600).unwrap();
        let window = limiter.window();
        assert_eq!(window.period_start, START + 3_600);
        assert_eq!(window.usage_in_period, 700);
    }

    #[test]
    fn test_usage_never_exceeds_cap() {
        let mut limiter = limiter(1_000, 60);
        let amounts = [300u128, 450, 400, 250, 1_001, 10, 999];
        for (i, amount) in amounts.iter().enumerate() {
            let now = START + i as i64 * 17;
            let expected_ok = limiter.check_rate_limit(*amount, now);
            let result = limiter.record_buyback(*amount, now);
            assert_eq!(result.is_ok(), expected_ok);
            assert!(limiter.window().usage_in_period <= 1_000);
        }
    }

    #[test]
    fn test_period_change_resets_window() {
        let mut limiter = limiter(1_000, 3_600);
        limiter.record_buyback(900, START).unwrap();

        assert!(limiter.set_period_duration("stranger", 60, START + 5).is_err());
        assert!(limiter.set_period_duration("owner", 0, START + 5).is_err());
        assert_eq!(limiter.window().usage_in_period, 900);

        limiter.set_period_duration("owner", 60, START + 5).unwrap();
        let window = limiter.window();
        assert_eq!(window.usage_in_period, 0);
        assert_eq!(window.period_start, START + 5);
        assert_eq!(window.period_duration, 60);
    }

    #[test]
    fn test_max_per_period_validation() {
        let mut limiter = limiter(1_000, 3_600);
        assert!(limiter.set_max_per_period("owner", 0).is_err());
        limiter.set_max_per_period("owner", 2_000).unwrap();
        assert!(limiter.check_rate_limit(2_000, START));
        assert!(RateLimiter::new(AuthorizationPolicy::shared("o"), 0, 10, START).is_err());
    }
}
