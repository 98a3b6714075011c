//! Database writer for the buyback audit trail
//!
//! Tables written (see `/sql/` directory):
//! - `buyback_records` - INSERT OR IGNORE on id (append-only)
//! - `history_events` - INSERT (administrative events)

use super::types::{Amount, BuybackRecord, Timestamp};
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type DbResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Trait for persisting buyback records to SQLite
#[async_trait]
pub trait AuditDbWriter: Send + Sync {
    /// Append records to `buyback_records`
    ///
    /// SQL reference: `/sql/01_buyback_records.sql`
    ///
    /// Records already present (same id) are skipped, so replaying a batch
    /// after a crash is safe.
    async fn write_records(&self, records: Vec<BuybackRecord>) -> DbResult<usize>;

    /// Record that the in-memory history was cleared
    ///
    /// SQL reference: `/sql/02_history_events.sql`
    async fn write_history_cleared(
        &self,
        count: usize,
        cleared_by: &str,
        timestamp: Timestamp,
    ) -> DbResult<()>;
}

/// Run schema migrations from SQL files
///
/// Reads every `.sql` file in `schema_dir` in filename order and executes it.
/// All files use `IF NOT EXISTS`, so running twice is a no-op.
pub fn run_schema_migrations(conn: &mut Connection, schema_dir: &str) -> DbResult<()> {
    let schema_path = Path::new(schema_dir);

    if !schema_path.exists() {
        return Err(format!("Schema directory not found: {}", schema_dir).into());
    }

    conn.pragma_update(None, "journal_mode", "WAL")?;
    log::info!("📊 Enabled WAL mode for SQLite database");

    let mut sql_files: Vec<_> = fs::read_dir(schema_path)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("sql"))
        .collect();

    sql_files.sort_by_key(|entry| entry.file_name());

    log::info!("🔧 Running schema migrations from: {}", schema_dir);

    for entry in sql_files {
        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().into_owned();

        log::info!("   ├─ Executing: {}", filename);
        let sql_content = fs::read_to_string(&path)?;
        conn.execute_batch(&sql_content)?;
        log::info!("   └─ ✅ Success: {}", filename);
    }

    log::info!("✅ All schema migrations completed successfully");
    Ok(())
}

/// SQLite implementation of AuditDbWriter
pub struct SqliteAuditWriter {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditWriter {
    /// Open `db_path` and apply the schema from `schema_dir`
    pub fn open(db_path: &str, schema_dir: &str) -> DbResult<Self> {
        let mut conn = Connection::open(db_path)?;
        run_schema_migrations(&mut conn, schema_dir)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Wrap a connection that already carries the schema
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> DbResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| "SQLite connection mutex poisoned".into())
    }

    pub fn record_count(&self) -> DbResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM buyback_records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All persisted records, ordered by id
    pub fn load_records(&self) -> DbResult<Vec<BuybackRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, input_amount, output_amount, effective_price,
                    market_price, deviation_bps, executor, success, reason
             FROM buyback_records ORDER BY id",
        )?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Highest persisted id (0 when empty)
    pub fn last_record_id(&self) -> DbResult<u64> {
        let conn = self.lock()?;
        let id: Option<i64> =
            conn.query_row("SELECT MAX(id) FROM buyback_records", [], |row| row.get(0))?;
        Ok(id.unwrap_or(0) as u64)
    }
}

fn amount_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Amount> {
    let text: String = row.get(idx)?;
    text.parse::<Amount>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<BuybackRecord> {
    Ok(BuybackRecord {
        id: row.get::<_, i64>(0)? as u64,
        timestamp: row.get(1)?,
        input_amount: amount_column(row, 2)?,
        output_amount: amount_column(row, 3)?,
        effective_price: amount_column(row, 4)?,
        market_price: amount_column(row, 5)?,
        deviation_bps: row.get(6)?,
        executor: row.get(7)?,
        success: row.get(8)?,
        reason: row.get(9)?,
    })
}

#[async_trait]
impl AuditDbWriter for SqliteAuditWriter {
    /// Single transaction per batch
    async fn write_records(&self, records: Vec<BuybackRecord>) -> DbResult<usize> {
        let mut conn = self.lock()?;
        let created_at = chrono::Utc::now().timestamp();
        let tx = conn.transaction()?;

        let mut written = 0;
        for record in &records {
            written += tx.execute(
                r#"
                INSERT OR IGNORE INTO buyback_records (
                    id, timestamp, input_amount, output_amount, effective_price,
                    market_price, deviation_bps, executor, success, reason, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    record.id as i64,
                    record.timestamp,
                    record.input_amount.to_string(),
                    record.output_amount.to_string(),
                    record.effective_price.to_string(),
                    record.market_price.to_string(),
                    record.deviation_bps,
                    record.executor,
                    record.success,
                    record.reason,
                    created_at,
                ],
            )?;
        }
        tx.commit()?;

        log::debug!("💾 Persisted {} of {} buyback records", written, records.len());
        Ok(written)
    }

    async fn write_history_cleared(
        &self,
        count: usize,
        cleared_by: &str,
        timestamp: Timestamp,
    ) -> DbResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO history_events (event_type, record_count, actor, timestamp)
             VALUES ('HISTORY_CLEARED', ?, ?, ?)",
            params![count as i64, cleared_by, timestamp],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbs::types::PRICE_SCALE;
    use tempfile::TempDir;

    fn schema_dir() -> String {
        format!("{}/sql", env!("CARGO_MANIFEST_DIR"))
    }

    fn record(id: u64, success: bool) -> BuybackRecord {
        BuybackRecord {
            id,
            timestamp: 1_700_000_000 + id as i64,
            input_amount: 1_500 * PRICE_SCALE,
            output_amount: if success { 1_600 * PRICE_SCALE } else { 0 },
            effective_price: if success { 937_500_000_000_000_000 } else { 0 },
            market_price: 930_000_000_000_000_000,
            deviation_bps: 700,
            executor: "keeper".to_string(),
            success,
            reason: if success { String::new() } else { "router reverted".to_string() },
        }
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("rbs.db");
        let mut conn = Connection::open(&db_path).unwrap();

        run_schema_migrations(&mut conn, &schema_dir()).unwrap();
        run_schema_migrations(&mut conn, &schema_dir()).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('buyback_records', 'history_events')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_missing_schema_dir() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(run_schema_migrations(&mut conn, "/nonexistent/sql").is_err());
    }

    #[tokio::test]
    async fn test_write_and_load_records() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("rbs.db");
        let writer = SqliteAuditWriter::open(db_path.to_str().unwrap(), &schema_dir()).unwrap();

        let written = writer
            .write_records(vec![record(1, true), record(2, false)])
            .await
            .unwrap();
        assert_eq!(written, 2);

        // Replayed batch is ignored
        let written = writer
            .write_records(vec![record(2, false), record(3, true)])
            .await
            .unwrap();
        assert_eq!(written, 1);

        assert_eq!(writer.record_count().unwrap(), 3);
        assert_eq!(writer.last_record_id().unwrap(), 3);

        let loaded = writer.load_records().unwrap();
        assert_eq!(loaded[0], record(1, true));
        assert_eq!(loaded[1], record(2, false));
    }

    #[tokio::test]
    async fn test_history_cleared_event() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("rbs.db");
        let writer = SqliteAuditWriter::open(db_path.to_str().unwrap(), &schema_dir()).unwrap();

        writer.write_records(vec![record(1, true)]).await.unwrap();
        writer.write_history_cleared(1, "owner", 1_700_000_100).await.unwrap();

        // Persisted records survive an in-memory clear
        assert_eq!(writer.record_count().unwrap(), 1);

        let conn = writer.lock().unwrap();
        let (event, count, actor): (String, i64, String) = conn
            .query_row(
                "SELECT event_type, record_count, actor FROM history_events",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(event, "HISTORY_CLEARED");
        assert_eq!(count, 1);
        assert_eq!(actor, "owner");
    }
}
