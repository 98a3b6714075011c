//! Error types for the buyback engine
//!
//! `BuybackError` is surfaced to callers and aborts a cycle before any swap.
//! `SwapError` stays inside the executor boundary and ends up in the audit
//! log as a failed record.

use super::collaborators::CollaboratorError;
use super::types::{Amount, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuybackError {
    /// Caller lacks the capability tier required by the operation
    Unauthorized { caller: String, required: &'static str },
    /// Rejected admin input, never stored
    InvalidConfig(String),
    /// Engine paused by the owner
    Paused,
    RateLimitExceeded {
        requested: Amount,
        usage: Amount,
        max_per_period: Amount,
    },
    InCooldownPeriod { remaining_secs: i64 },
    InsufficientReserves { requested: Amount, available: Amount },
    /// Price feed could not be read; the cycle is aborted
    Oracle(String),
    /// Required collaborator call failed outside the swap boundary
    Collaborator(CollaboratorError),
    RecordNotFound(u64),
    /// Engine command loop is no longer running
    EngineStopped,
}

impl From<CollaboratorError> for BuybackError {
    fn from(err: CollaboratorError) -> Self {
        BuybackError::Collaborator(err)
    }
}

impl std::fmt::Display for BuybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuybackError::Unauthorized { caller, required } => {
                write!(f, "Unauthorized: {} lacks {} capability", caller, required)
            }
            BuybackError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            BuybackError::Paused => write!(f, "Buyback engine is paused"),
            BuybackError::RateLimitExceeded {
                requested,
                usage,
                max_per_period,
            } => write!(
                f,
                "Rate limit exceeded: requested {} with {} of {} already used",
                requested, usage, max_per_period
            ),
            BuybackError::InCooldownPeriod { remaining_secs } => {
                write!(f, "In cooldown period: {}s remaining", remaining_secs)
            }
            BuybackError::InsufficientReserves { requested, available } => write!(
                f,
                "Insufficient reserves: requested {}, available {}",
                requested, available
            ),
            BuybackError::Oracle(msg) => write!(f, "Oracle error: {}", msg),
            BuybackError::Collaborator(e) => write!(f, "Collaborator error: {}", e),
            BuybackError::RecordNotFound(id) => write!(f, "Record not found: {}", id),
            BuybackError::EngineStopped => write!(f, "Engine command loop stopped"),
        }
    }
}

impl std::error::Error for BuybackError {}

/// Execution failure caught at the swap executor boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapError {
    InsufficientOutput { min_amount_out: Amount, received: Amount },
    /// Router reverted or was unreachable
    Router(String),
    /// Treasury or token movement failed
    Transfer(String),
    /// Router quote returned nothing to protect the swap with
    QuoteUnavailable,
    DeadlineExpired { deadline: Timestamp },
    ZeroAmount,
}

impl std::fmt::Display for SwapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapError::InsufficientOutput {
                min_amount_out,
                received,
            } => write!(
                f,
                "InsufficientOutput: received {} below minimum {}",
                received, min_amount_out
            ),
            SwapError::Router(msg) => write!(f, "Router failure: {}", msg),
            SwapError::Transfer(msg) => write!(f, "Transfer failure: {}", msg),
            SwapError::QuoteUnavailable => write!(f, "Router quote unavailable"),
            SwapError::DeadlineExpired { deadline } => {
                write!(f, "Swap deadline {} expired", deadline)
            }
            SwapError::ZeroAmount => write!(f, "Swap amount is zero"),
        }
    }
}

impl std::error::Error for SwapError {}
