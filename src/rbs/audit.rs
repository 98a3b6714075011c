//! Append-only buyback log
//!
//! One log type serves both the unbounded audit trail and the bounded
//! backtest recorder (ring buffer that evicts the oldest record). Records are
//! immutable once written; `clear_history` is the only destructive call and
//! it leaves a `HistoryCleared` event behind. The event list follows the same
//! retention as the records.

use super::auth::{AuthorizationPolicy, Capability};
use super::error::BuybackError;
use super::math::mul_div;
use super::types::{Amount, BuybackRecord, NewBuybackRecord, Timestamp, BPS_DENOMINATOR, PRICE_SCALE};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Retention policy for the record log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Retention {
    /// Audit trail: keep everything
    Unbounded,
    /// Backtest recorder: keep the newest `capacity` records and events
    RingBuffer(usize),
}

/// Events emitted by the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEvent {
    BuybackLogged { id: u64, success: bool },
    RecordEvicted { id: u64 },
    HistoryCleared { count: usize, cleared_by: String, timestamp: Timestamp },
}

pub struct AuditLogger {
    auth: Arc<AuthorizationPolicy>,
    retention: Retention,
    records: VecDeque<BuybackRecord>,
    next_id: u64,
    events: VecDeque<LogEvent>,
}

/// Ring-buffer flavour used by backtests
pub type BacktestRecorder = AuditLogger;

impl AuditLogger {
    /// Unbounded audit trail
    pub fn new(auth: Arc<AuthorizationPolicy>) -> Self {
        Self::with_retention(auth, Retention::Unbounded)
    }

    /// Bounded recorder keeping the newest `capacity` records
    pub fn ring_buffer(auth: Arc<AuthorizationPolicy>, capacity: usize) -> Result<Self, BuybackError> {
        if capacity == 0 {
            return Err(BuybackError::InvalidConfig("record capacity must be > 0".to_string()));
        }
        Ok(Self::with_retention(auth, Retention::RingBuffer(capacity)))
    }

    fn with_retention(auth: Arc<AuthorizationPolicy>, retention: Retention) -> Self {
        Self {
            auth,
            retention,
            records: VecDeque::new(),
            next_id: 1,
            events: VecDeque::new(),
        }
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Append one attempt and return its id
    pub fn log_buyback(&mut self, entry: NewBuybackRecord, now: Timestamp) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let effective_price = if entry.output_amount == 0 {
            0
        } else {
            mul_div(entry.input_amount, PRICE_SCALE, entry.output_amount)
        };

        let record = BuybackRecord {
            id,
            timestamp: now,
            input_amount: entry.input_amount,
            output_amount: entry.output_amount,
            effective_price,
            market_price: entry.market_price,
            deviation_bps: entry.deviation_bps,
            executor: entry.executor,
            success: entry.success,
            reason: entry.reason,
        };

        if let Retention::RingBuffer(capacity) = self.retention {
            while self.records.len() >= capacity {
                if let Some(evicted) = self.records.pop_front() {
                    self.push_event(LogEvent::RecordEvicted { id: evicted.id });
                }
            }
        }

        log::debug!(
            "📝 Buyback record #{} (success={}, in={}, out={})",
            id,
            record.success,
            record.input_amount,
            record.output_amount
        );
        self.push_event(LogEvent::BuybackLogged {
            id,
            success: record.success,
        });
        self.records.push_back(record);
        id
    }

    /// Ids are sequential, so the position is `id - first_id`
    pub fn get_record(&self, id: u64) -> Result<&BuybackRecord, BuybackError> {
        let first_id = self.records.front().map(|r| r.id).ok_or(BuybackError::RecordNotFound(id))?;
        id.checked_sub(first_id)
            .and_then(|offset| usize::try_from(offset).ok())
            .and_then(|offset| self.records.get(offset))
            .filter(|record| record.id == id)
            .ok_or(BuybackError::RecordNotFound(id))
    }

    pub fn get_record_count(&self) -> usize {
        self.records.len()
    }

    /// Last `n` records, oldest first
    pub fn get_recent_records(&self, n: usize) -> Vec<BuybackRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    /// Records with `start <= timestamp <= end`
    pub fn get_records_by_time_range(&self, start: Timestamp, end: Timestamp) -> Vec<BuybackRecord> {
        self.records
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect()
    }

    /// Records appended after `id` (used for incremental persistence)
    pub fn records_after(&self, id: u64) -> Vec<BuybackRecord> {
        let Some(first_id) = self.records.front().map(|r| r.id) else {
            return Vec::new();
        };
        let skip = usize::try_from(id.saturating_add(1).saturating_sub(first_id)).unwrap_or(usize::MAX);
        let start = skip.min(self.records.len());
        self.records.range(start..).cloned().collect()
    }

    pub fn last_record_id(&self) -> u64 {
        self.next_id - 1
    }

    /// Successful / total in basis points (0 for an empty log)
    pub fn get_success_rate(&self) -> u32 {
        let total = self.records.len() as u128;
        if total == 0 {
            return 0;
        }
        let successes = self.records.iter().filter(|r| r.success).count() as u128;
        mul_div(successes, BPS_DENOMINATOR as u128, total) as u32
    }

    /// Mean effective price of successful buybacks (floored)
    pub fn get_average_price(&self) -> Amount {
        let (sum, count) = self
            .priced()
            .fold((Some(0u128), 0u128), |(sum, count), p| {
                (sum.and_then(|s| s.checked_add(p)), count + 1)
            });
        if count == 0 {
            return 0;
        }
        match sum {
            Some(sum) => sum / count,
            // Sum overflowed: carry quotient and remainder per price instead
            None => {
                let (quotient, _) = self.priced().fold((0u128, 0u128), |(q, r), p| {
                    let r = r + p % count;
                    if r >= count {
                        (q + p / count + 1, r - count)
                    } else {
                        (q + p / count, r)
                    }
                });
                quotient
            }
        }
    }

    fn priced(&self) -> impl Iterator<Item = Amount> + '_ {
        self.successful()
            .filter(|r| r.effective_price > 0)
            .map(|r| r.effective_price)
    }

    /// Input actually spent (failed attempts are refunded)
    pub fn get_total_input_amount(&self) -> Amount {
        self.successful()
            .fold(0u128, |acc, r| acc.saturating_add(r.input_amount))
    }

    pub fn get_total_output_amount(&self) -> Amount {
        self.successful()
            .fold(0u128, |acc, r| acc.saturating_add(r.output_amount))
    }

    fn successful(&self) -> impl Iterator<Item = &BuybackRecord> {
        self.records.iter().filter(|r| r.success)
    }

    /// Retained events, oldest first
    pub fn events(&self) -> impl DoubleEndedIterator<Item = &LogEvent> + '_ {
        self.events.iter()
    }

    fn push_event(&mut self, event: LogEvent) {
        if let Retention::RingBuffer(capacity) = self.retention {
            while self.events.len() >= capacity {
                self.events.pop_front();
            }
        }
        self.events.push_back(event);
    }

    /// Drop every record (owner only); ids keep counting up
    pub fn clear_history(&mut self, caller: &str, now: Timestamp) -> Result<usize, BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        let count = self.records.len();
        self.records.clear();
        log::warn!("🧹 Buyback history cleared by {} ({} records)", caller, count);
        self.push_event(LogEvent::HistoryCleared {
            count,
            cleared_by: caller.to_string(),
            timestamp: now,
        });
        Ok(count)
    }
}
