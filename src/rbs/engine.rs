//! Buyback Engine - coordinator for one intervention cycle
//!
//! ```text
//! execute_buyback(caller)
//!     ↓
//! AuthorizationPolicy (AUTHORIZED) → pause check
//!     ↓
//! DeviationMonitor (one oracle read)
//!     ↓
//! TriggerEvaluator (cooldown + thresholds)
//!     ↓
//! VolumeCalculator → ReserveChecker → RateLimiter
//!     ↓
//! SwapExecutor (quote, min-out, swap)
//!     ↓
//! success: trigger + rate usage + cooldown + audit record
//! failure: audit record only
//! ```
//!
//! The engine is a plain struct with `&mut self` entry points. Serializing
//! concurrent callers is the job of `runtime::start_engine_loop`.

use super::audit::{AuditLogger, BacktestRecorder};
use super::auth::{AuthorizationPolicy, Capability};
use super::collaborators::{DexRouter, PriceOracle, TokenLedger, Treasury};
use super::config::EngineConfig;
use super::cooldown::CooldownManager;
use super::deviation::DeviationMonitor;
use super::error::{BuybackError, SwapError};
use super::rate_limiter::RateLimiter;
use super::reserves::ReserveChecker;
use super::swap::{SwapExecutor, SwapVenue};
use super::trigger::{TriggerDecision, TriggerEvaluator};
use super::types::{
    Amount, BuybackOutcome, BuybackPreview, DeviationState, EngineStatus, NewBuybackRecord,
};
use super::volume::VolumeCalculator;
use std::sync::Arc;

/// External systems the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn PriceOracle>,
    pub treasury: Arc<dyn Treasury>,
    pub ledger: Arc<dyn TokenLedger>,
    pub router: Arc<dyn DexRouter>,
}

pub struct BuybackEngine {
    auth: Arc<AuthorizationPolicy>,
    monitor: DeviationMonitor,
    reserves: ReserveChecker,
    rate_limiter: RateLimiter,
    cooldown: CooldownManager,
    trigger: TriggerEvaluator,
    volume: VolumeCalculator,
    swap: SwapExecutor,

    /// Unbounded audit trail
    audit: AuditLogger,

    /// Bounded history for backtest statistics
    recorder: BacktestRecorder,

    paused: bool,

    /// Timestamp function (for testing and simulation with mock time)
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl BuybackEngine {
    /// Create an engine using system time
    pub fn new(
        config: &EngineConfig,
        collaborators: Collaborators,
        auth: Arc<AuthorizationPolicy>,
    ) -> Result<Self, BuybackError> {
        Self::new_with_timestamp_fn(
            config,
            collaborators,
            auth,
            Box::new(|| chrono::Utc::now().timestamp()),
        )
    }

    /// Create an engine with a custom timestamp function
    pub fn new_with_timestamp_fn(
        config: &EngineConfig,
        collaborators: Collaborators,
        auth: Arc<AuthorizationPolicy>,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Result<Self, BuybackError> {
        config.validate()?;
        let now = now_fn();

        let monitor = DeviationMonitor::new(
            collaborators.oracle.clone(),
            auth.clone(),
            config.target_price,
            config.deviation_threshold_bps,
        )?;
        let reserves = ReserveChecker::new(
            collaborators.treasury.clone(),
            auth.clone(),
            config.reserve_token.clone(),
            config.min_reserves_threshold,
            config.max_reserves_percentage_bps,
        )?;
        let rate_limiter = RateLimiter::new(
            auth.clone(),
            config.max_amount_per_period,
            config.period_duration_seconds,
            now,
        )?;
        let cooldown = CooldownManager::new(auth.clone(), config.cooldown_period_seconds)?;
        let trigger = TriggerEvaluator::new(auth.clone(), config.trigger_threshold_bps)?;
        let volume = VolumeCalculator::new(
            auth.clone(),
            config.trigger_threshold_bps,
            config.min_buyback_amount,
            config.max_buyback_amount,
            config.scaling_factor_bps,
        )?;
        let swap = SwapExecutor::new(
            SwapVenue {
                treasury: collaborators.treasury,
                ledger: collaborators.ledger,
                router: collaborators.router,
            },
            auth.clone(),
            config.executor_account.clone(),
            config.reserve_token.clone(),
            config.protocol_token.clone(),
            config.slippage_tolerance_bps,
        )?;
        let audit = AuditLogger::new(auth.clone());
        let recorder = BacktestRecorder::ring_buffer(auth.clone(), config.backtest_capacity)?;

        log::info!(
            "✅ BuybackEngine created (target {}, threshold {} bps, owner {})",
            config.target_price,
            config.deviation_threshold_bps,
            auth.owner()
        );

        Ok(Self {
            auth,
            monitor,
            reserves,
            rate_limiter,
            cooldown,
            trigger,
            volume,
            swap,
            audit,
            recorder,
            paused: false,
            now_fn,
        })
    }

    pub fn now(&self) -> i64 {
        (self.now_fn)()
    }

    /// Run one full buyback cycle
    ///
    /// # Returns
    /// * `Ok(NotTriggered)` - deviation below thresholds, nothing recorded
    /// * `Ok(Executed)` - swap succeeded, all safety state advanced
    /// * `Ok(Failed)` - swap failed, failure recorded, safety state untouched
    /// * `Err(...)` - authorization, pause, oracle or safety-limit rejection
    pub fn execute_buyback(&mut self, caller: &str) -> Result<BuybackOutcome, BuybackError> {
        self.auth.check(caller, Capability::Authorized)?;
        if self.paused {
            return Err(BuybackError::Paused);
        }

        let now = self.now();
        let deviation = self.monitor.deviation_state()?;

        let deviation_bps = match self
            .trigger
            .decide(deviation.deviation_bps, &self.monitor, &self.cooldown, now)
        {
            TriggerDecision::Fire { deviation_bps } => deviation_bps,
            TriggerDecision::InCooldown { remaining_secs, .. } => {
                log::debug!("⏳ Buyback skipped: {}s of cooldown left", remaining_secs);
                return Err(BuybackError::InCooldownPeriod { remaining_secs });
            }
            TriggerDecision::BelowThreshold { deviation_bps } => {
                log::debug!("😴 No buyback: deviation {} bps below threshold", deviation_bps);
                return Ok(BuybackOutcome::NotTriggered { deviation_bps });
            }
        };

        let amount = self
            .volume
            .calculate_buyback_amount(deviation_bps, &self.reserves)?;
        if amount == 0 || !self.reserves.has_sufficient_reserves(amount)? {
            let available = self.reserves.available_reserves()?;
            log::warn!("🛑 Buyback blocked: reserves {} for request {}", available, amount);
            return Err(BuybackError::InsufficientReserves {
                requested: self.volume.scaled_amount(deviation_bps),
                available,
            });
        }

        if !self.rate_limiter.check_rate_limit(amount, now) {
            let window = self.rate_limiter.window();
            log::warn!(
                "🛑 Buyback blocked: rate limit ({} used of {})",
                window.usage_in_period,
                window.max_per_period
            );
            return Err(BuybackError::RateLimitExceeded {
                requested: amount,
                usage: window.usage_in_period,
                max_per_period: window.max_per_period,
            });
        }

        let expected_output = self.swap.get_expected_output(amount);
        let swap_result = if expected_output == 0 {
            Err(SwapError::QuoteUnavailable)
        } else {
            let min_output = self.swap.calculate_min_output(expected_output);
            self.swap.execute_swap(amount, min_output, now)
        };

        match swap_result {
            Ok(amount_out) => {
                self.trigger.record_trigger(deviation_bps, now);
                self.rate_limiter.record_buyback(amount, now)?;
                self.cooldown.record_buyback(now)?;
                let record_id = self.append_record(
                    caller,
                    &deviation,
                    amount,
                    amount_out,
                    true,
                    String::new(),
                    now,
                );
                log::info!(
                    "✅ Buyback #{} executed: {} in, {} out at {} bps",
                    record_id,
                    amount,
                    amount_out,
                    deviation_bps
                );
                Ok(BuybackOutcome::Executed {
                    record_id,
                    amount_in: amount,
                    amount_out,
                    deviation_bps,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                let record_id =
                    self.append_record(caller, &deviation, amount, 0, false, reason.clone(), now);
                log::warn!("❌ Buyback #{} failed: {}", record_id, reason);
                Ok(BuybackOutcome::Failed {
                    record_id,
                    amount_in: amount,
                    reason,
                })
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn append_record(
        &mut self,
        caller: &str,
        deviation: &DeviationState,
        input_amount: Amount,
        output_amount: Amount,
        success: bool,
        reason: String,
        now: i64,
    ) -> u64 {
        let entry = NewBuybackRecord {
            input_amount,
            output_amount,
            market_price: deviation.current_price,
            deviation_bps: deviation.deviation_bps,
            executor: caller.to_string(),
            success,
            reason,
        };
        self.recorder.log_buyback(entry.clone(), now);
        self.audit.log_buyback(entry, now)
    }

    /// Dry run of the next cycle; no state changes
    pub fn preview(&self) -> Result<BuybackPreview, BuybackError> {
        let now = self.now();
        let deviation = self.monitor.deviation_state()?;
        let decision = self
            .trigger
            .decide(deviation.deviation_bps, &self.monitor, &self.cooldown, now);
        let amount_in = self
            .volume
            .calculate_buyback_amount(deviation.deviation_bps, &self.reserves)?;
        let expected_output = self.swap.get_expected_output(amount_in);

        Ok(BuybackPreview {
            deviation,
            would_trigger: decision.fires() && !self.paused,
            amount_in,
            expected_output,
            min_output: self.swap.calculate_min_output(expected_output),
            within_rate_limit: self.rate_limiter.check_rate_limit(amount_in, now),
            sufficient_reserves: amount_in > 0 && self.reserves.has_sufficient_reserves(amount_in)?,
        })
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            paused: self.paused,
            rate_limit: self.rate_limiter.window(),
            cooldown: self.cooldown.state(),
            last_trigger: self.trigger.last_trigger(),
            trigger_count: self.trigger.trigger_count(),
            audit_record_count: self.audit.get_record_count(),
            backtest_record_count: self.recorder.get_record_count(),
        }
    }

    pub fn auth(&self) -> &Arc<AuthorizationPolicy> {
        &self.auth
    }

    pub fn monitor(&self) -> &DeviationMonitor {
        &self.monitor
    }

    pub fn reserves(&self) -> &ReserveChecker {
        &self.reserves
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn cooldown(&self) -> &CooldownManager {
        &self.cooldown
    }

    pub fn trigger(&self) -> &TriggerEvaluator {
        &self.trigger
    }

    pub fn volume(&self) -> &VolumeCalculator {
        &self.volume
    }

    pub fn swap_executor(&self) -> &SwapExecutor {
        &self.swap
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn recorder(&self) -> &BacktestRecorder {
        &self.recorder
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    // Admin surface. Each call is checked by the component it reaches.

    pub fn pause(&mut self, caller: &str) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        log::warn!("⏸️  Buyback engine paused by {}", caller);
        self.paused = true;
        Ok(())
    }

    pub fn unpause(&mut self, caller: &str) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        log::info!("▶️  Buyback engine resumed by {}", caller);
        self.paused = false;
        Ok(())
    }

    pub fn set_target_price(&mut self, caller: &str, price: Amount) -> Result<(), BuybackError> {
        self.monitor.set_target_price(caller, price)
    }

    pub fn set_deviation_threshold(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.monitor.set_threshold(caller, bps)
    }

    /// Trigger and volume scaling share the trigger threshold
    pub fn set_trigger_threshold(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.trigger.set_trigger_threshold(caller, bps)?;
        self.volume.set_threshold(caller, bps)
    }

    pub fn set_cooldown_period(&mut self, caller: &str, secs: i64) -> Result<(), BuybackError> {
        self.cooldown.set_cooldown_period(caller, secs)
    }

    pub fn set_max_amount_per_period(&mut self, caller: &str, amount: Amount) -> Result<(), BuybackError> {
        self.rate_limiter.set_max_per_period(caller, amount)
    }

    pub fn set_period_duration(&mut self, caller: &str, secs: i64) -> Result<(), BuybackError> {
        let now = self.now();
        self.rate_limiter.set_period_duration(caller, secs, now)
    }

    pub fn set_min_reserves_threshold(&mut self, caller: &str, amount: Amount) -> Result<(), BuybackError> {
        self.reserves.set_min_reserves_threshold(caller, amount)
    }

    pub fn set_max_reserves_percentage(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.reserves.set_max_utilization_bps(caller, bps)
    }

    pub fn set_buyback_bounds(&mut self, caller: &str, min: Amount, max: Amount) -> Result<(), BuybackError> {
        self.volume.set_amount_bounds(caller, min, max)
    }

    pub fn set_scaling_factor(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.volume.set_scaling_factor(caller, bps)
    }

    pub fn set_slippage_tolerance(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.swap.set_slippage_tolerance(caller, bps)
    }

    /// Clear the audit trail (owner only); returns the number of records removed
    pub fn clear_history(&mut self, caller: &str) -> Result<usize, BuybackError> {
        let now = self.now();
        self.audit.clear_history(caller, now)
    }

    pub fn clear_backtest_history(&mut self, caller: &str) -> Result<usize, BuybackError> {
        let now = self.now();
        self.recorder.clear_history(caller, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbs::types::PRICE_SCALE;
    use crate::sim::{ConstantProductRouter, RouterFault, SimClock, SimLedger, SimOracle, SimTreasury};

    const START: i64 = 1_700_000_000;
    const UNIT: Amount = PRICE_SCALE;

    struct Harness {
        clock: SimClock,
        ledger: Arc<SimLedger>,
        oracle: Arc<SimOracle>,
        router: Arc<ConstantProductRouter>,
        engine: BuybackEngine,
    }

    fn config() -> EngineConfig {
        EngineConfig {
            target_price: UNIT,
            deviation_threshold_bps: 500,
            trigger_threshold_bps: 500,
            cooldown_period_seconds: 3_600,
            max_amount_per_period: 5_000 * UNIT,
            period_duration_seconds: 86_400,
            min_reserves_threshold: 0,
            max_reserves_percentage_bps: 5_000,
            min_buyback_amount: 100 * UNIT,
            max_buyback_amount: 2_000 * UNIT,
            scaling_factor_bps: 10_000,
            slippage_tolerance_bps: 100,
            reserve_token: "USD".to_string(),
            protocol_token: "RBS".to_string(),
            executor_account: "executor".to_string(),
            backtest_capacity: 100,
        }
    }

    fn harness() -> Harness {
        let clock = SimClock::new(START);
        let ledger = SimLedger::shared();
        ledger.mint("USD", "treasury", 100_000 * UNIT);
        let treasury = Arc::new(SimTreasury::new(ledger.clone(), "treasury"));
        let oracle = Arc::new(SimOracle::new(UNIT));
        let router = Arc::new(ConstantProductRouter::new(ledger.clone(), "router", clock.clone(), 30));
        router.add_liquidity("USD", 900_000 * UNIT, "RBS", 1_000_000 * UNIT);

        let auth = AuthorizationPolicy::shared("owner");
        auth.grant("owner", "keeper").unwrap();

        let engine = BuybackEngine::new_with_timestamp_fn(
            &config(),
            Collaborators {
                oracle: oracle.clone(),
                treasury,
                ledger: ledger.clone(),
                router: router.clone(),
            },
            auth,
            clock.as_now_fn(),
        )
        .unwrap();

        Harness {
            clock,
            ledger,
            oracle,
            router,
            engine,
        }
    }

    #[test]
    fn test_no_trigger_at_target() {
        let mut h = harness();
        let outcome = h.engine.execute_buyback("keeper").unwrap();
        assert_eq!(outcome, BuybackOutcome::NotTriggered { deviation_bps: 0 });
        assert_eq!(h.engine.audit().get_record_count(), 0);
    }

    #[test]
    fn test_executed_cycle_advances_all_state() {
        let mut h = harness();
        h.oracle.set_price(9 * UNIT / 10);

        let outcome = h.engine.execute_buyback("keeper").unwrap();

        let BuybackOutcome::Executed {
            record_id,
            amount_in,
            amount_out,
            deviation_bps,
        } = outcome
        else {
            panic!("expected executed outcome, got {:?}", outcome);
        };
        assert_eq!(deviation_bps, 1_000);
        // excess 500 / 9500 -> ratio 526 -> 100 + 1900 * 526 / 10000
        assert_eq!(amount_in, 100 * UNIT + 1_900 * UNIT * 526 / 10_000);
        assert_eq!(h.ledger.balance("RBS", "treasury"), amount_out);

        let status = h.engine.status();
        assert_eq!(status.rate_limit.usage_in_period, amount_in);
        assert_eq!(status.cooldown.last_buyback_time, Some(START));
        assert_eq!(status.trigger_count, 1);

        let record = h.engine.audit().get_record(record_id).unwrap();
        assert!(record.success);
        assert_eq!(record.executor, "keeper");
        assert_eq!(record.market_price, 9 * UNIT / 10);
        assert_eq!(h.engine.recorder().get_record_count(), 1);
    }

    #[test]
    fn test_cooldown_blocks_second_cycle() {
        let mut h = harness();
        h.oracle.set_price(9 * UNIT / 10);
        h.engine.execute_buyback("keeper").unwrap();

        h.clock.advance(60);
        let err = h.engine.execute_buyback("keeper").unwrap_err();
        assert_eq!(err, BuybackError::InCooldownPeriod { remaining_secs: 3_540 });

        h.clock.advance(3_540);
        assert!(h.engine.execute_buyback("keeper").unwrap().is_executed());
    }

    #[test]
    fn test_failed_swap_only_appends_record() {
        let mut h = harness();
        h.oracle.set_price(9 * UNIT / 10);
        h.router.set_fault(Some(RouterFault::Revert("pool locked".to_string())));
        let treasury_before = h.ledger.balance("USD", "treasury");

        let outcome = h.engine.execute_buyback("keeper").unwrap();

        assert!(matches!(outcome, BuybackOutcome::Failed { ref reason, .. } if reason.contains("pool locked")));
        let status = h.engine.status();
        assert_eq!(status.rate_limit.usage_in_period, 0);
        assert_eq!(status.cooldown.last_buyback_time, None);
        assert_eq!(status.trigger_count, 0);
        assert_eq!(h.ledger.balance("USD", "treasury"), treasury_before);

        let record = &h.engine.audit().get_recent_records(1)[0];
        assert!(!record.success);
        assert_eq!(record.output_amount, 0);
        assert_eq!(record.effective_price, 0);
    }

    #[test]
    fn test_quote_failure_recorded_as_failed_attempt() {
        let mut h = harness();
        h.oracle.set_price(9 * UNIT / 10);
        h.router.set_fault(Some(RouterFault::Offline));

        let outcome = h.engine.execute_buyback("keeper").unwrap();
        assert!(matches!(outcome, BuybackOutcome::Failed { .. }));
        assert_eq!(h.engine.audit().get_success_rate(), 0);
    }

    #[test]
    fn test_rate_limit_blocks_before_swap() {
        let mut h = harness();
        h.engine.set_max_amount_per_period("owner", 50 * UNIT).unwrap();
        h.oracle.set_price(9 * UNIT / 10);

        let err = h.engine.execute_buyback("keeper").unwrap_err();
        assert!(matches!(err, BuybackError::RateLimitExceeded { usage: 0, .. }));
        assert_eq!(h.engine.audit().get_record_count(), 0);
        assert_eq!(h.ledger.balance("RBS", "treasury"), 0);
    }

    #[test]
    fn test_insufficient_reserves_blocks_before_swap() {
        let mut h = harness();
        h.ledger.set_balance("USD", "treasury", 0);
        h.oracle.set_price(9 * UNIT / 10);

        let err = h.engine.execute_buyback("keeper").unwrap_err();
        let expected = h.engine.volume().scaled_amount(1_000);
        assert_eq!(
            err,
            BuybackError::InsufficientReserves {
                requested: expected,
                available: 0
            }
        );
        assert!(expected > 0);
    }

    #[test]
    fn test_authorization_and_pause() {
        let mut h = harness();
        h.oracle.set_price(9 * UNIT / 10);

        assert!(matches!(
            h.engine.execute_buyback("stranger"),
            Err(BuybackError::Unauthorized { .. })
        ));
        assert!(h.engine.pause("keeper").is_err());

        h.engine.pause("owner").unwrap();
        assert_eq!(h.engine.execute_buyback("keeper"), Err(BuybackError::Paused));
        assert!(!h.engine.preview().unwrap().would_trigger);

        h.engine.unpause("owner").unwrap();
        assert!(h.engine.execute_buyback("keeper").unwrap().is_executed());
    }

    #[test]
    fn test_oracle_outage_aborts_without_record() {
        let mut h = harness();
        h.oracle.set_unavailable();
        assert!(matches!(h.engine.execute_buyback("keeper"), Err(BuybackError::Oracle(_))));
        assert_eq!(h.engine.audit().get_record_count(), 0);
    }

    #[test]
    fn test_preview_does_not_mutate() {
        let h = harness();
        h.oracle.set_price(9 * UNIT / 10);

        let preview = h.engine.preview().unwrap();
        assert!(preview.would_trigger);
        assert!(preview.within_rate_limit);
        assert!(preview.sufficient_reserves);
        assert_eq!(preview.deviation.deviation_bps, 1_000);
        assert_eq!(preview.min_output, preview.expected_output * 9_900 / 10_000);
        assert_eq!(h.engine.status().trigger_count, 0);
        assert_eq!(h.engine.audit().get_record_count(), 0);
    }

    #[test]
    fn test_trigger_threshold_updates_volume_threshold() {
        let mut h = harness();
        h.engine.set_trigger_threshold("owner", 2_000).unwrap();
        assert_eq!(h.engine.volume().threshold_bps(), 2_000);
        assert!(h.engine.set_trigger_threshold("keeper", 1_000).is_err());

        h.oracle.set_price(9 * UNIT / 10);
        assert_eq!(
            h.engine.execute_buyback("keeper").unwrap(),
            BuybackOutcome::NotTriggered { deviation_bps: 1_000 }
        );
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let mut bad = config();
        bad.min_buyback_amount = bad.max_buyback_amount + 1;
        let ledger = SimLedger::shared();
        let clock = SimClock::new(START);
        let result = BuybackEngine::new_with_timestamp_fn(
            &bad,
            Collaborators {
                oracle: Arc::new(SimOracle::new(UNIT)),
                treasury: Arc::new(SimTreasury::new(ledger.clone(), "treasury")),
                ledger: ledger.clone(),
                router: Arc::new(ConstantProductRouter::new(ledger, "router", clock.clone(), 30)),
            },
            AuthorizationPolicy::shared("owner"),
            clock.as_now_fn(),
        );
        assert!(matches!(result, Err(BuybackError::InvalidConfig(_))));
    }
}
