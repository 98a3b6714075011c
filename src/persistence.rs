use {
    crate::{backtest::BacktestReport, rbs::config::EngineConfig},
    serde::{Deserialize, Serialize},
    std::{fs, path::Path},
};

/// Backtest report together with the parameters that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub config: EngineConfig,
    pub report: BacktestReport,
    pub saved_at: i64,
}

/// Save a report snapshot to a JSON file
pub fn save_report(
    config: &EngineConfig,
    report: &BacktestReport,
    file_path: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let snapshot = ReportSnapshot {
        config: config.clone(),
        report: report.clone(),
        saved_at: chrono::Utc::now().timestamp(),
    };

    let json = serde_json::to_string_pretty(&snapshot)?;
    fs::write(file_path, json)?;

    log::debug!("Saved backtest report ({} steps) to {}", report.tally.steps, file_path);
    Ok(())
}

/// Load a report snapshot from a JSON file
pub fn load_report(
    file_path: &str,
) -> Result<Option<ReportSnapshot>, Box<dyn std::error::Error + Send + Sync>> {
    if !Path::new(file_path).exists() {
        log::info!("No existing report file found: {}", file_path);
        return Ok(None);
    }

    let json = fs::read_to_string(file_path)?;
    let snapshot: ReportSnapshot = serde_json::from_str(&json)?;

    log::info!("Loaded backtest report from {}", file_path);
    Ok(Some(snapshot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::BacktestTally;
    use crate::rbs::types::PRICE_SCALE;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_report() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let path = path.to_str().unwrap();

        assert!(load_report(path).unwrap().is_none());

        let report = BacktestReport {
            start_timestamp: 1_700_000_000,
            end_timestamp: 1_700_086_400,
            tally: BacktestTally {
                steps: 24,
                executed: 3,
                not_triggered: 18,
                in_cooldown: 3,
                total_input: 12_000 * PRICE_SCALE,
                total_output: 14_100 * PRICE_SCALE,
                ..BacktestTally::default()
            },
            success_rate_bps: 10_000,
            average_price: 851_063_829_787_234_042,
            min_price: 820_000_000_000_000_000,
            max_price: PRICE_SCALE,
            final_reserve_balance: 4_988_000 * PRICE_SCALE,
            final_protocol_balance: 14_100 * PRICE_SCALE,
            generated_at: 1_700_090_000,
        };
        let config = EngineConfig::default();

        save_report(&config, &report, path).unwrap();
        let snapshot = load_report(path).unwrap().unwrap();

        // u128 amounts above u64::MAX survive the JSON file
        assert_eq!(snapshot.report, report);
        assert_eq!(snapshot.config, config);
    }

    #[test]
    fn test_corrupt_report_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(load_report(path.to_str().unwrap()).is_err());
    }
}
