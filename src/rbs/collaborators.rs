//! Collaborator interfaces consumed by the engine
//!
//! Oracle, treasury, token ledger and exchange router live outside the
//! engine. Every call is synchronous and returns a `Result`; the engine
//! decides per call site whether a failure aborts the cycle, falls back to a
//! configured value, or is recorded as a failed attempt.

use super::types::{AccountId, Amount, Timestamp, TokenId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Call could not be served (offline, timed out, missing method)
    Unavailable(String),
    /// Call was served and reverted
    Rejected(String),
    InsufficientBalance {
        account: AccountId,
        token: TokenId,
        required: Amount,
        available: Amount,
    },
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
        required: Amount,
        allowed: Amount,
    },
    /// Router output below the caller's minimum
    InsufficientOutputAmount { min_amount_out: Amount, amount_out: Amount },
    Expired { deadline: Timestamp, now: Timestamp },
}

impl std::fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollaboratorError::Unavailable(msg) => write!(f, "unavailable: {}", msg),
            CollaboratorError::Rejected(msg) => write!(f, "rejected: {}", msg),
            CollaboratorError::InsufficientBalance {
                account,
                token,
                required,
                available,
            } => write!(
                f,
                "insufficient {} balance for {}: required {}, available {}",
                token, account, required, available
            ),
            CollaboratorError::InsufficientAllowance {
                owner,
                spender,
                required,
                allowed,
            } => write!(
                f,
                "insufficient allowance {} -> {}: required {}, allowed {}",
                owner, spender, required, allowed
            ),
            CollaboratorError::InsufficientOutputAmount {
                min_amount_out,
                amount_out,
            } => write!(
                f,
                "insufficient output amount: {} < {}",
                amount_out, min_amount_out
            ),
            CollaboratorError::Expired { deadline, now } => {
                write!(f, "expired: deadline {} passed at {}", deadline, now)
            }
        }
    }
}

impl std::error::Error for CollaboratorError {}

/// Price feed for the protocol token (18-decimal fixed point)
pub trait PriceOracle: Send + Sync {
    fn get_price(&self) -> Result<Amount, CollaboratorError>;
}

/// Treasury holding the buyback reserves
pub trait Treasury: Send + Sync {
    /// Account the treasury holds its balances under
    fn account(&self) -> AccountId;

    /// Total balance of `token` held by the treasury
    fn reserve_balance(&self, token: &str) -> Result<Amount, CollaboratorError>;

    /// Floor of `token` that must never be spent
    fn protected_reserves(&self, token: &str) -> Result<Amount, CollaboratorError>;

    /// Move `amount` of `token` from the treasury to `to`
    fn withdraw(&self, token: &str, amount: Amount, to: &str) -> Result<(), CollaboratorError>;

    /// Move `amount` of `token` from `from` back into the treasury
    fn deposit(&self, token: &str, amount: Amount, from: &str) -> Result<(), CollaboratorError>;
}

/// Token balances and allowances
pub trait TokenLedger: Send + Sync {
    fn balance_of(&self, token: &str, account: &str) -> Result<Amount, CollaboratorError>;

    fn approve(
        &self,
        token: &str,
        owner: &str,
        spender: &str,
        amount: Amount,
    ) -> Result<(), CollaboratorError>;

    fn transfer(
        &self,
        token: &str,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), CollaboratorError>;
}

/// Exchange router (constant-function AMM style interface)
pub trait DexRouter: Send + Sync {
    /// Account that pulls approved input tokens
    fn account(&self) -> AccountId;

    /// Quote for every hop of `path`; last element is the final output
    fn get_amounts_out(
        &self,
        amount_in: Amount,
        path: &[TokenId],
    ) -> Result<Vec<Amount>, CollaboratorError>;

    /// Pull `amount_in` from `from` (needs allowance) and send the output to `to`
    fn swap_exact_tokens_for_tokens(
        &self,
        amount_in: Amount,
        min_amount_out: Amount,
        path: &[TokenId],
        from: &str,
        to: &str,
        deadline: Timestamp,
    ) -> Result<Vec<Amount>, CollaboratorError>;
}
