//! Engine command loop - single writer over the buyback engine
//!
//! All mutating calls from keepers and admins go through one mpsc channel, so
//! two buyback cycles can never interleave. New audit records are persisted
//! after the engine lock is released.

use super::db::AuditDbWriter;
use super::engine::BuybackEngine;
use super::error::BuybackError;
use super::types::{BuybackOutcome, BuybackPreview, BuybackRecord, EngineStatus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, oneshot};

/// Default capacity for the command channel
pub const COMMAND_CHANNEL_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, BuybackError>>;

pub enum EngineCommand {
    ExecuteBuyback { caller: String, respond: Reply<BuybackOutcome> },
    Preview { respond: Reply<BuybackPreview> },
    Status { respond: oneshot::Sender<EngineStatus> },
    Pause { caller: String, respond: Reply<()> },
    Unpause { caller: String, respond: Reply<()> },
    ClearHistory { caller: String, respond: Reply<usize> },
    Shutdown,
}

fn lock_engine(engine: &Mutex<BuybackEngine>) -> MutexGuard<'_, BuybackEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn persist(writer: &Option<Arc<dyn AuditDbWriter>>, records: Vec<BuybackRecord>) {
    let Some(writer) = writer else { return };
    if records.is_empty() {
        return;
    }
    let count = records.len();
    match writer.write_records(records).await {
        Ok(written) => log::debug!("✅ Persisted {}/{} buyback records", written, count),
        Err(e) => log::error!("❌ Failed to persist buyback records: {}", e),
    }
}

/// Start the engine command loop
///
/// Runs until a `Shutdown` command arrives or every sender is dropped.
///
/// Arguments:
/// - `rx`: Receiver end of the command channel
/// - `engine`: Shared engine (Arc<Mutex<>>); other readers may lock it between commands
/// - `db_writer`: Optional writer for the audit trail
pub async fn start_engine_loop(
    mut rx: mpsc::Receiver<EngineCommand>,
    engine: Arc<Mutex<BuybackEngine>>,
    db_writer: Option<Arc<dyn AuditDbWriter>>,
) {
    log::info!("🚀 Starting buyback engine loop");
    log::info!(
        "   └─ Persistence: {}",
        if db_writer.is_some() { "SQLite" } else { "disabled" }
    );

    let mut last_persisted = lock_engine(&engine).audit().last_record_id();
    let mut cycles = 0u64;

    while let Some(command) = rx.recv().await {
        match command {
            EngineCommand::ExecuteBuyback { caller, respond } => {
                let (result, new_records) = {
                    let mut guard = lock_engine(&engine);
                    let result = guard.execute_buyback(&caller);
                    let new_records = guard.audit().records_after(last_persisted);
                    last_persisted = guard.audit().last_record_id();
                    (result, new_records)
                }; // Lock released here

                cycles += 1;
                persist(&db_writer, new_records).await;

                if respond.send(result).is_err() {
                    log::debug!("⚠️  Caller dropped before buyback result #{} was delivered", cycles);
                }
            }
            EngineCommand::Preview { respond } => {
                let result = lock_engine(&engine).preview();
                let _ = respond.send(result);
            }
            EngineCommand::Status { respond } => {
                let status = lock_engine(&engine).status();
                let _ = respond.send(status);
            }
            EngineCommand::Pause { caller, respond } => {
                let result = lock_engine(&engine).pause(&caller);
                let _ = respond.send(result);
            }
            EngineCommand::Unpause { caller, respond } => {
                let result = lock_engine(&engine).unpause(&caller);
                let _ = respond.send(result);
            }
            EngineCommand::ClearHistory { caller, respond } => {
                let (result, now) = {
                    let mut guard = lock_engine(&engine);
                    let now = guard.now();
                    (guard.clear_history(&caller), now)
                };
                if let (Ok(count), Some(writer)) = (&result, &db_writer) {
                    if let Err(e) = writer.write_history_cleared(*count, &caller, now).await {
                        log::error!("❌ Failed to persist history clear: {}", e);
                    }
                }
                let _ = respond.send(result);
            }
            EngineCommand::Shutdown => {
                log::info!("🛑 Shutdown requested");
                break;
            }
        }
    }

    log::info!("✅ Buyback engine loop stopped after {} cycles", cycles);
}

/// Cloneable client for the engine loop
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    /// Spawn the loop on the current tokio runtime and return a handle to it
    pub fn spawn(
        engine: Arc<Mutex<BuybackEngine>>,
        db_writer: Option<Arc<dyn AuditDbWriter>>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let join = tokio::spawn(start_engine_loop(rx, engine, db_writer));
        (Self { tx }, join)
    }

    pub fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, BuybackError> {
        let (respond, response) = oneshot::channel();
        self.tx
            .send(build(respond))
            .await
            .map_err(|_| BuybackError::EngineStopped)?;
        response.await.map_err(|_| BuybackError::EngineStopped)
    }

    pub async fn execute_buyback(&self, caller: &str) -> Result<BuybackOutcome, BuybackError> {
        let caller = caller.to_string();
        self.request(|respond| EngineCommand::ExecuteBuyback { caller, respond })
            .await?
    }

    pub async fn preview(&self) -> Result<BuybackPreview, BuybackError> {
        self.request(|respond| EngineCommand::Preview { respond }).await?
    }

    pub async fn status(&self) -> Result<EngineStatus, BuybackError> {
        self.request(|respond| EngineCommand::Status { respond }).await
    }

    pub async fn pause(&self, caller: &str) -> Result<(), BuybackError> {
        let caller = caller.to_string();
        self.request(|respond| EngineCommand::Pause { caller, respond }).await?
    }

    pub async fn unpause(&self, caller: &str) -> Result<(), BuybackError> {
        let caller = caller.to_string();
        self.request(|respond| EngineCommand::Unpause { caller, respond }).await?
    }

    pub async fn clear_history(&self, caller: &str) -> Result<usize, BuybackError> {
        let caller = caller.to_string();
        self.request(|respond| EngineCommand::ClearHistory { caller, respond })
            .await?
    }

    pub async fn shutdown(&self) -> Result<(), BuybackError> {
        self.tx
            .send(EngineCommand::Shutdown)
            .await
            .map_err(|_| BuybackError::EngineStopped)
    }
}
