//! Backtest Runtime
//!
//! Replays a price series through the buyback engine:
//! - Loads engine and backtest configuration from the environment
//! - Initializes the SQLite audit database with schema
//! - Spawns the engine command loop with the database writer
//! - Drives every price point through the loop and writes a JSON report
//!
//! Usage:
//!   cargo run --release --bin backtest_runtime
//!
//! Environment variables:
//!   RBS_BACKTEST_ENABLED - Master switch (default: true)
//!   RBS_DB_PATH - SQLite database path (default: rbs_backtest.db)
//!   RBS_PRICE_SERIES_PATH - JSON price series (default: seeded random walk)
//!   RBS_REPORT_PATH - Report output (default: backtest_report.json)
//!   RBS_* - Engine parameters, see `EngineConfig::from_env`

use dotenv::dotenv;
use log::{error, info};
use rbsflow::backtest::{BacktestConfig, Backtester};
use rbsflow::persistence::save_report;
use rbsflow::rbs::{
    config::EngineConfig,
    db::{AuditDbWriter, SqliteAuditWriter},
    runtime::EngineHandle,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Buyback Backtest Runtime");

    let engine_config = EngineConfig::from_env();
    let config = BacktestConfig::from_env(&engine_config);

    if !config.enabled {
        info!("⚠️  Backtest is DISABLED (set RBS_BACKTEST_ENABLED=true to activate)");
        info!("   └─ Exiting gracefully...");
        return Ok(());
    }

    engine_config.validate()?;
    info!("✅ Configuration loaded");
    info!("   ├─ Target price: {}", engine_config.target_price);
    info!("   ├─ Deviation threshold: {} bps", engine_config.deviation_threshold_bps);
    info!("   ├─ Cooldown: {}s", engine_config.cooldown_period_seconds);
    info!(
        "   ├─ Rate limit: {} per {}s",
        engine_config.max_amount_per_period, engine_config.period_duration_seconds
    );
    info!("   ├─ Database: {}", config.db_path);
    info!("   └─ Report: {}", config.report_path);

    // Initialize database
    info!("🔧 Initializing database...");
    let db_writer: Arc<dyn AuditDbWriter> =
        Arc::new(SqliteAuditWriter::open(&config.db_path, &config.schema_dir)?);
    info!("✅ Database initialized");

    let series = config.price_series()?;
    if series.is_empty() {
        error!("❌ Price series is empty, nothing to replay");
        return Ok(());
    }

    let mut backtester = Backtester::new(&engine_config, &config)?;
    let (handle, engine_task) = EngineHandle::spawn(backtester.engine(), Some(db_writer));
    info!("✅ Engine loop spawned");

    let report = backtester.run_with_handle(&series, &handle).await;

    handle.shutdown().await?;
    if let Err(e) = engine_task.await {
        error!("❌ Engine loop panicked: {}", e);
    }

    save_report(&engine_config, &report, &config.report_path)?;
    info!("✅ Report written to {}", config.report_path);
    info!("✅ Backtest runtime stopped");
    Ok(())
}
