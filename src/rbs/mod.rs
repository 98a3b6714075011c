//! # Reserve-Backed Buyback Engine
//!
//! Monitors the market price of the protocol token against a target and,
//! when the price trades far enough away, spends treasury reserves on an
//! exchange swap to buy the token back.
//!
//! ## Architecture
//!
//! Every cycle passes through a chain of guards before any tokens move:
//!
//! 1. `DeviationMonitor` reads the oracle once
//! 2. `CooldownManager` / `TriggerEvaluator` decide whether to act
//! 3. `VolumeCalculator` sizes the buyback, capped by `ReserveChecker`
//! 4. `RateLimiter` bounds spend per fixed window
//! 5. `SwapExecutor` swaps with slippage protection and refunds on failure
//! 6. `AuditLogger` keeps an immutable record of every attempt
//!
//! Safety state (rate usage, cooldown, trigger history) only advances after a
//! successful swap. Failed swaps are recorded and leave it untouched.
//!
//! ## Module Organization
//!
//! - `types` - Shared data structures and fixed-point constants
//! - `math` - Overflow-safe fixed-point helpers
//! - `error` - `BuybackError` and `SwapError`
//! - `collaborators` - Oracle, treasury, ledger and router traits
//! - `auth` - Owner / authorized / public capability policy
//! - `deviation`, `reserves`, `rate_limiter`, `cooldown`, `trigger`, `volume`, `swap`, `audit` - Components
//! - `engine` - `BuybackEngine` coordinator
//! - `config` - `EngineConfig` from environment
//! - `db` - SQLite audit writer
//! - `runtime` - Single-writer command loop

pub mod types;
pub mod math;
pub mod error;
pub mod collaborators;
pub mod auth;
pub mod deviation;
pub mod reserves;
pub mod rate_limiter;
pub mod cooldown;
pub mod trigger;
pub mod volume;
pub mod swap;
pub mod audit;
pub mod engine;
pub mod config;
pub mod db;
pub mod runtime;

// Re-export commonly used types
pub use types::{Amount, BuybackOutcome, BuybackPreview, BuybackRecord, EngineStatus, Timestamp};
pub use error::{BuybackError, SwapError};
pub use collaborators::{CollaboratorError, DexRouter, PriceOracle, TokenLedger, Treasury};
pub use auth::{AuthorizationPolicy, Capability};
pub use audit::{AuditLogger, BacktestRecorder};
pub use engine::{BuybackEngine, Collaborators};
pub use config::EngineConfig;
pub use db::{AuditDbWriter, SqliteAuditWriter};
pub use runtime::{EngineCommand, EngineHandle};
