//! Backtesting - replay a price series through the buyback engine
//!
//! Each price point moves the simulated clock, the oracle and the pool spot
//! price, then runs one buyback cycle. Between points the pool is re-centred
//! on the series price (arbitrage), so the series stays exogenous.

use crate::rbs::auth::AuthorizationPolicy;
use crate::rbs::config::EngineConfig;
use crate::rbs::engine::{BuybackEngine, Collaborators};
use crate::rbs::error::BuybackError;
use crate::rbs::runtime::EngineHandle;
use crate::rbs::types::{Amount, BuybackOutcome, Timestamp, BPS_DENOMINATOR, PRICE_SCALE};
use crate::sim::{ConstantProductRouter, SimClock, SimLedger, SimOracle, SimTreasury};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub type BacktestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const TREASURY_ACCOUNT: &str = "treasury";
const ROUTER_ACCOUNT: &str = "router";

/// One observation of the protocol token price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: Timestamp,
    /// Quote per protocol token, 18 decimals
    pub price: Amount,
}

/// Load a JSON array of `PricePoint`s, sorted by timestamp
pub fn load_price_series(path: &str) -> BacktestResult<Vec<PricePoint>> {
    let json = fs::read_to_string(path)?;
    let mut series: Vec<PricePoint> = serde_json::from_str(&json)?;

    if let Some(bad) = series.iter().find(|p| p.price == 0) {
        return Err(format!("zero price at timestamp {} in {}", bad.timestamp, path).into());
    }
    series.sort_by_key(|p| p.timestamp);

    log::info!("📈 Loaded {} price points from {}", series.len(), path);
    Ok(series)
}

/// Parameters for a synthetic price walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomWalk {
    pub seed: u64,
    pub start_timestamp: Timestamp,
    pub steps: usize,
    pub step_seconds: i64,
    pub start_price: Amount,
    /// Max per-step move in either direction
    pub volatility_bps: u32,
    /// Per-step bias (negative pushes the price down)
    pub drift_bps: i32,
}

/// Seeded multiplicative random walk; same seed, same series
pub fn generate_random_walk(walk: &RandomWalk) -> Vec<PricePoint> {
    let mut rng = StdRng::seed_from_u64(walk.seed);
    let volatility = walk.volatility_bps.min(BPS_DENOMINATOR - 1) as i64;
    let denominator = BPS_DENOMINATOR as i64;

    let mut price = walk.start_price.max(1);
    let mut series = Vec::with_capacity(walk.steps);
    for step in 0..walk.steps {
        series.push(PricePoint {
            timestamp: walk.start_timestamp + step as i64 * walk.step_seconds,
            price,
        });
        let shock = rng.gen_range(-volatility..=volatility) + walk.drift_bps as i64;
        let factor = (denominator + shock).clamp(1, 2 * denominator) as Amount;
        price = (price.saturating_mul(factor) / denominator as Amount).max(1);
    }
    series
}

/// Backtest runtime configuration
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    /// Master switch
    pub enabled: bool,
    pub db_path: String,
    pub schema_dir: String,
    /// JSON price series; a random walk is generated when unset
    pub price_series_path: Option<String>,
    pub walk: RandomWalk,
    pub report_path: String,
    pub owner: String,
    pub keeper: String,
    pub initial_reserves: Amount,
    pub protected_reserves: Amount,
    /// Protocol-token side of the pool
    pub pool_base_liquidity: Amount,
    pub pool_fee_bps: u32,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl BacktestConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `RBS_BACKTEST_ENABLED` (default: true)
    /// - `RBS_DB_PATH` (default: rbs_backtest.db)
    /// - `RBS_SCHEMA_DIR` (default: sql)
    /// - `RBS_PRICE_SERIES_PATH` (default: unset, random walk)
    /// - `RBS_WALK_SEED`, `RBS_WALK_STEPS`, `RBS_WALK_STEP_SECONDS`,
    ///   `RBS_WALK_VOLATILITY_BPS`, `RBS_WALK_DRIFT_BPS`
    /// - `RBS_REPORT_PATH` (default: backtest_report.json)
    /// - `RBS_OWNER`, `RBS_KEEPER`
    /// - `RBS_INITIAL_RESERVES`, `RBS_PROTECTED_RESERVES`
    /// - `RBS_POOL_BASE_LIQUIDITY`, `RBS_POOL_FEE_BPS`
    pub fn from_env(engine: &EngineConfig) -> Self {
        let enabled = env::var("RBS_BACKTEST_ENABLED")
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        Self {
            enabled,
            db_path: env::var("RBS_DB_PATH").unwrap_or_else(|_| "rbs_backtest.db".to_string()),
            schema_dir: env::var("RBS_SCHEMA_DIR").unwrap_or_else(|_| "sql".to_string()),
            price_series_path: env::var("RBS_PRICE_SERIES_PATH").ok().filter(|p| !p.is_empty()),
            walk: RandomWalk {
                seed: env_or("RBS_WALK_SEED", 42),
                start_timestamp: env_or("RBS_WALK_START_TIMESTAMP", 1_700_000_000),
                steps: env_or("RBS_WALK_STEPS", 720),
                step_seconds: env_or("RBS_WALK_STEP_SECONDS", 3_600),
                start_price: engine.target_price,
                volatility_bps: env_or("RBS_WALK_VOLATILITY_BPS", 300),
                drift_bps: env_or("RBS_WALK_DRIFT_BPS", -10),
            },
            report_path: env::var("RBS_REPORT_PATH")
                .unwrap_or_else(|_| "backtest_report.json".to_string()),
            owner: env::var("RBS_OWNER").unwrap_or_else(|_| "owner".to_string()),
            keeper: env::var("RBS_KEEPER").unwrap_or_else(|_| "keeper".to_string()),
            initial_reserves: env_or("RBS_INITIAL_RESERVES", 5_000_000 * PRICE_SCALE),
            protected_reserves: env_or("RBS_PROTECTED_RESERVES", 1_000_000 * PRICE_SCALE),
            pool_base_liquidity: env_or("RBS_POOL_BASE_LIQUIDITY", 10_000_000 * PRICE_SCALE),
            pool_fee_bps: env_or("RBS_POOL_FEE_BPS", 30),
        }
    }

    /// Price series from file, or the configured random walk
    pub fn price_series(&self) -> BacktestResult<Vec<PricePoint>> {
        match &self.price_series_path {
            Some(path) => load_price_series(path),
            None => {
                log::info!(
                    "🎲 Generating random walk (seed {}, {} steps)",
                    self.walk.seed,
                    self.walk.steps
                );
                Ok(generate_random_walk(&self.walk))
            }
        }
    }
}

/// Per-run outcome counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestTally {
    pub steps: usize,
    pub executed: usize,
    pub failed: usize,
    pub not_triggered: usize,
    pub in_cooldown: usize,
    pub rate_limited: usize,
    pub insufficient_reserves: usize,
    pub other_errors: usize,
    pub total_input: Amount,
    pub total_output: Amount,
}

impl BacktestTally {
    fn record(&mut self, result: &Result<BuybackOutcome, BuybackError>) {
        self.steps += 1;
        match result {
            Ok(BuybackOutcome::Executed {
                amount_in,
                amount_out,
                ..
            }) => {
                self.executed += 1;
                self.total_input = self.total_input.saturating_add(*amount_in);
                self.total_output = self.total_output.saturating_add(*amount_out);
            }
            Ok(BuybackOutcome::Failed { .. }) => self.failed += 1,
            Ok(BuybackOutcome::NotTriggered { .. }) => self.not_triggered += 1,
            Err(BuybackError::InCooldownPeriod { .. }) => self.in_cooldown += 1,
            Err(BuybackError::RateLimitExceeded { .. }) => self.rate_limited += 1,
            Err(BuybackError::InsufficientReserves { .. }) => self.insufficient_reserves += 1,
            Err(e) => {
                log::warn!("⚠️  Backtest step rejected: {}", e);
                self.other_errors += 1;
            }
        }
    }
}

/// Summary written at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub start_timestamp: Timestamp,
    pub end_timestamp: Timestamp,
    pub tally: BacktestTally,
    /// Successful / recorded attempts, basis points
    pub success_rate_bps: u32,
    /// Mean effective price of successful buybacks, 18 decimals
    pub average_price: Amount,
    pub min_price: Amount,
    pub max_price: Amount,
    pub final_reserve_balance: Amount,
    pub final_protocol_balance: Amount,
    pub generated_at: i64,
}

/// Simulated market plus an engine wired to it
pub struct Backtester {
    clock: SimClock,
    ledger: Arc<SimLedger>,
    oracle: Arc<SimOracle>,
    router: Arc<ConstantProductRouter>,
    engine: Arc<Mutex<BuybackEngine>>,
    reserve_token: String,
    protocol_token: String,
    keeper: String,
    tally: BacktestTally,
    price_range: Option<(Amount, Amount)>,
}

impl Backtester {
    pub fn new(engine_config: &EngineConfig, config: &BacktestConfig) -> Result<Self, BuybackError> {
        let start = config.walk.start_timestamp;
        let clock = SimClock::new(start);
        let ledger = SimLedger::shared();
        let reserve_token = engine_config.reserve_token.clone();
        let protocol_token = engine_config.protocol_token.clone();

        ledger.mint(&reserve_token, TREASURY_ACCOUNT, config.initial_reserves);
        let treasury = Arc::new(SimTreasury::new(ledger.clone(), TREASURY_ACCOUNT));
        treasury.set_protected(&reserve_token, config.protected_reserves);

        let oracle = Arc::new(SimOracle::new(engine_config.target_price));
        let router = Arc::new(ConstantProductRouter::new(
            ledger.clone(),
            ROUTER_ACCOUNT,
            clock.clone(),
            config.pool_fee_bps,
        ));
        router.add_liquidity(&protocol_token, config.pool_base_liquidity, &reserve_token, 0);
        router.set_spot_price(&reserve_token, &protocol_token, engine_config.target_price);

        let auth = AuthorizationPolicy::shared(config.owner.clone());
        auth.grant(&config.owner, config.keeper.clone())?;

        let engine = BuybackEngine::new_with_timestamp_fn(
            engine_config,
            Collaborators {
                oracle: oracle.clone(),
                treasury,
                ledger: ledger.clone(),
                router: router.clone(),
            },
            auth,
            clock.as_now_fn(),
        )?;

        Ok(Self {
            clock,
            ledger,
            oracle,
            router,
            engine: Arc::new(Mutex::new(engine)),
            reserve_token,
            protocol_token,
            keeper: config.keeper.clone(),
            tally: BacktestTally::default(),
            price_range: None,
        })
    }

    /// Shared engine, e.g. for `EngineHandle::spawn`
    pub fn engine(&self) -> Arc<Mutex<BuybackEngine>> {
        self.engine.clone()
    }

    fn lock_engine(&self) -> MutexGuard<'_, BuybackEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tally(&self) -> &BacktestTally {
        &self.tally
    }

    /// Move the simulated market to `point`
    pub fn step_market(&mut self, point: &PricePoint) {
        self.clock.set(point.timestamp);
        self.oracle.set_price(point.price);
        self.router
            .set_spot_price(&self.reserve_token, &self.protocol_token, point.price);
        self.price_range = Some(match self.price_range {
            Some((lo, hi)) => (lo.min(point.price), hi.max(point.price)),
            None => (point.price, point.price),
        });
    }

    /// Replay `series` synchronously
    pub fn run(&mut self, series: &[PricePoint]) -> BacktestReport {
        log::info!("🚀 Backtest started ({} price points)", series.len());
        for point in series {
            self.step_market(point);
            let result = self.lock_engine().execute_buyback(&self.keeper);
            self.tally.record(&result);
        }
        self.report(series)
    }

    /// Replay `series` through a running engine loop
    pub async fn run_with_handle(
        &mut self,
        series: &[PricePoint],
        handle: &EngineHandle,
    ) -> BacktestReport {
        log::info!("🚀 Backtest started via engine loop ({} price points)", series.len());
        for point in series {
            self.step_market(point);
            let result = handle.execute_buyback(&self.keeper).await;
            self.tally.record(&result);
        }
        self.report(series)
    }

    pub fn report(&self, series: &[PricePoint]) -> BacktestReport {
        let (success_rate_bps, average_price) = {
            let engine = self.lock_engine();
            (
                engine.recorder().get_success_rate(),
                engine.recorder().get_average_price(),
            )
        };
        let (min_price, max_price) = self.price_range.unwrap_or((0, 0));

        let report = BacktestReport {
            start_timestamp: series.first().map(|p| p.timestamp).unwrap_or(0),
            end_timestamp: series.last().map(|p| p.timestamp).unwrap_or(0),
            tally: self.tally.clone(),
            success_rate_bps,
            average_price,
            min_price,
            max_price,
            final_reserve_balance: self.ledger.balance(&self.reserve_token, TREASURY_ACCOUNT),
            final_protocol_balance: self.ledger.balance(&self.protocol_token, TREASURY_ACCOUNT),
            generated_at: chrono::Utc::now().timestamp(),
        };

        log::info!("📊 Backtest complete");
        log::info!("   ├─ Steps: {}", report.tally.steps);
        log::info!(
            "   ├─ Executed: {} | Failed: {} | Idle: {}",
            report.tally.executed,
            report.tally.failed,
            report.tally.not_triggered
        );
        log::info!(
            "   ├─ Blocked: cooldown {} | rate {} | reserves {}",
            report.tally.in_cooldown,
            report.tally.rate_limited,
            report.tally.insufficient_reserves
        );
        log::info!(
            "   └─ Spent {} {} for {} {}",
            report.tally.total_input,
            self.reserve_token,
            report.tally.total_output,
            self.protocol_token
        );
        report
    }
}
