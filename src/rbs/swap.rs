//! Swap execution through the exchange router
//!
//! Failures never escape as panics or partial state: on any router error the
//! approval is revoked and the unspent input goes back to the treasury before
//! a `SwapError` is returned for the audit log. A swap that settles below the
//! minimum output is reversed against the router first.

use super::auth::{AuthorizationPolicy, Capability};
use super::collaborators::{CollaboratorError, DexRouter, TokenLedger, Treasury};
use super::error::{BuybackError, SwapError};
use super::math::apply_bps;
use super::types::{AccountId, Amount, Timestamp, TokenId, BPS_DENOMINATOR, SWAP_DEADLINE_SECS};
use std::sync::Arc;

/// Upper bound for slippage tolerance (10%)
pub const MAX_SLIPPAGE_BPS: u32 = 1_000;

/// Collaborators the executor moves tokens through
#[derive(Clone)]
pub struct SwapVenue {
    pub treasury: Arc<dyn Treasury>,
    pub ledger: Arc<dyn TokenLedger>,
    pub router: Arc<dyn DexRouter>,
}

pub struct SwapExecutor {
    venue: SwapVenue,
    auth: Arc<AuthorizationPolicy>,
    /// Account holding input tokens for the duration of a swap
    account: AccountId,
    input_token: TokenId,
    output_token: TokenId,
    slippage_tolerance_bps: u32,
}

impl SwapExecutor {
    pub fn new(
        venue: SwapVenue,
        auth: Arc<AuthorizationPolicy>,
        account: impl Into<AccountId>,
        input_token: impl Into<TokenId>,
        output_token: impl Into<TokenId>,
        slippage_tolerance_bps: u32,
    ) -> Result<Self, BuybackError> {
        let account = account.into();
        let input_token = input_token.into();
        let output_token = output_token.into();
        if account.is_empty() || input_token.is_empty() || output_token.is_empty() {
            return Err(BuybackError::InvalidConfig("zero address for swap executor".to_string()));
        }
        if input_token == output_token {
            return Err(BuybackError::InvalidConfig("input and output token are identical".to_string()));
        }
        validate_slippage(slippage_tolerance_bps)?;
        Ok(Self {
            venue,
            auth,
            account,
            input_token,
            output_token,
            slippage_tolerance_bps,
        })
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn slippage_tolerance_bps(&self) -> u32 {
        self.slippage_tolerance_bps
    }

    fn path(&self) -> Vec<TokenId> {
        vec![self.input_token.clone(), self.output_token.clone()]
    }

    /// Router quote for `amount_in`; 0 when the router cannot quote
    pub fn get_expected_output(&self, amount_in: Amount) -> Amount {
        match self.venue.router.get_amounts_out(amount_in, &self.path()) {
            Ok(amounts) => amounts.last().copied().unwrap_or(0),
            Err(e) => {
                log::warn!("⚠️  Router quote failed for {}: {}", amount_in, e);
                0
            }
        }
    }

    pub fn calculate_min_output(&self, expected_output: Amount) -> Amount {
        apply_bps(expected_output, BPS_DENOMINATOR - self.slippage_tolerance_bps)
    }

    /// Swap `amount_in` treasury input tokens for output tokens
    ///
    /// The router settles into the executor account; the returned amount is
    /// that account's measured output-token balance delta, forwarded to the
    /// treasury. A settlement below `min_amount_out` is rolled back so the
    /// treasury ends where it started.
    pub fn execute_swap(
        &self,
        amount_in: Amount,
        min_amount_out: Amount,
        now: Timestamp,
    ) -> Result<Amount, SwapError> {
        if amount_in == 0 {
            return Err(SwapError::ZeroAmount);
        }

        let router_account = self.venue.router.account();
        let output_before = self.held(&self.output_token)?;
        let input_before = self.held(&self.input_token)?;

        self.venue
            .treasury
            .withdraw(&self.input_token, amount_in, &self.account)
            .map_err(|e| SwapError::Transfer(e.to_string()))?;

        if let Err(e) =
            self.venue
                .ledger
                .approve(&self.input_token, &self.account, &router_account, amount_in)
        {
            self.unwind(&router_account);
            return Err(SwapError::Transfer(e.to_string()));
        }

        let deadline = now + SWAP_DEADLINE_SECS;
        let swap_result = self.venue.router.swap_exact_tokens_for_tokens(
            amount_in,
            min_amount_out,
            &self.path(),
            &self.account,
            &self.account,
            deadline,
        );

        if let Err(e) = swap_result {
            log::warn!("⚠️  Swap of {} {} failed: {}", amount_in, self.input_token, e);
            self.unwind(&router_account);
            return Err(map_router_error(e, deadline));
        }

        let settlement = self.held(&self.input_token).and_then(|input_after| {
            let output_after = self.held(&self.output_token)?;
            let pulled = input_before.saturating_add(amount_in).saturating_sub(input_after);
            Ok((pulled, output_after.saturating_sub(output_before)))
        });
        let (pulled, received) = match settlement {
            Ok(settlement) => settlement,
            Err(e) => {
                self.unwind(&router_account);
                return Err(e);
            }
        };

        if received < min_amount_out {
            log::warn!(
                "⚠️  Swap settled {} {} below minimum {}, rolling back",
                received,
                self.output_token,
                min_amount_out
            );
            self.roll_back(&router_account, pulled, received);
            self.unwind(&router_account);
            return Err(SwapError::InsufficientOutput {
                min_amount_out,
                received,
            });
        }

        // Anything the router did not pull goes back as well
        self.unwind(&router_account);

        if let Err(e) = self
            .venue
            .treasury
            .deposit(&self.output_token, received, &self.account)
        {
            log::error!("❌ Forwarding {} {} to treasury failed: {}", received, self.output_token, e);
            self.roll_back(&router_account, pulled, received);
            self.unwind(&router_account);
            return Err(SwapError::Transfer(e.to_string()));
        }

        log::info!(
            "💱 Swapped {} {} -> {} {}",
            amount_in,
            self.input_token,
            received,
            self.output_token
        );
        Ok(received)
    }

    fn held(&self, token: &str) -> Result<Amount, SwapError> {
        self.venue
            .ledger
            .balance_of(token, &self.account)
            .map_err(|e| SwapError::Transfer(e.to_string()))
    }

    /// Reverse a settled swap: output back to the router, pulled input back here
    fn roll_back(&self, router_account: &str, pulled: Amount, received: Amount) {
        if received > 0 {
            if let Err(e) =
                self.venue
                    .ledger
                    .transfer(&self.output_token, &self.account, router_account, received)
            {
                log::error!("❌ Returning {} {} to router failed: {}", received, self.output_token, e);
                return;
            }
        }
        if pulled > 0 {
            match self
                .venue
                .ledger
                .transfer(&self.input_token, router_account, &self.account, pulled)
            {
                Ok(()) => log::debug!("↩️  Rolled back swap of {} {}", pulled, self.input_token),
                Err(e) => log::error!("❌ Recovering {} {} from router failed: {}", pulled, self.input_token, e),
            }
        }
    }

    /// Revoke the router approval and return held input to the treasury
    fn unwind(&self, router_account: &str) {
        if let Err(e) = self
            .venue
            .ledger
            .approve(&self.input_token, &self.account, router_account, 0)
        {
            log::warn!("⚠️  Failed to revoke router approval: {}", e);
        }

        let held = match self.held(&self.input_token) {
            Ok(held) => held,
            Err(e) => {
                log::error!("❌ Cannot read executor balance for refund: {}", e);
                return;
            }
        };
        if held == 0 {
            return;
        }
        match self.venue.treasury.deposit(&self.input_token, held, &self.account) {
            Ok(()) => log::debug!("↩️  Refunded {} {} to treasury", held, self.input_token),
            Err(e) => log::error!("❌ Refund of {} {} failed: {}", held, self.input_token, e),
        }
    }

    pub fn set_slippage_tolerance(&mut self, caller: &str, bps: u32) -> Result<(), BuybackError> {
        self.auth.check(caller, Capability::Owner)?;
        validate_slippage(bps)?;
        log::info!("💱 Slippage tolerance {} -> {} bps", self.slippage_tolerance_bps, bps);
        self.slippage_tolerance_bps = bps;
        Ok(())
    }
}

fn map_router_error(err: CollaboratorError, deadline: Timestamp) -> SwapError {
    match err {
        CollaboratorError::InsufficientOutputAmount {
            min_amount_out,
            amount_out,
        } => SwapError::InsufficientOutput {
            min_amount_out,
            received: amount_out,
        },
        CollaboratorError::Expired { .. } => SwapError::DeadlineExpired { deadline },
        other => SwapError::Router(other.to_string()),
    }
}

fn validate_slippage(bps: u32) -> Result<(), BuybackError> {
    if bps > MAX_SLIPPAGE_BPS {
        return Err(BuybackError::InvalidConfig(format!(
            "slippage tolerance {} bps above {}",
            bps, MAX_SLIPPAGE_BPS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ConstantProductRouter, RouterFault, SimClock, SimLedger, SimTreasury};

    struct Fixture {
        ledger: Arc<SimLedger>,
        clock: SimClock,
        router: Arc<ConstantProductRouter>,
        executor: SwapExecutor,
    }

    /// Pool of 1_000 USD / 440 RBS with no fee: 100 USD buys exactly 40 RBS
    fn fixture() -> Fixture {
        let ledger = SimLedger::shared();
        let clock = SimClock::new(1_000);
        ledger.mint("USD", "treasury", 1_000);
        let treasury = Arc::new(SimTreasury::new(ledger.clone(), "treasury"));
        let router = Arc::new(ConstantProductRouter::new(ledger.clone(), "router", clock.clone(), 0));
        router.add_liquidity("USD", 1_000, "RBS", 440);

        let venue = SwapVenue {
            treasury,
            ledger: ledger.clone(),
            router: router.clone(),
        };
        let executor = SwapExecutor::new(
            venue,
            AuthorizationPolicy::shared("owner"),
            "executor",
            "USD",
            "RBS",
            50,
        )
        .unwrap();
        Fixture {
            ledger,
            clock,
            router,
            executor,
        }
    }

    #[test]
    fn test_successful_swap_measures_delta() {
        let f = fixture();
        assert_eq!(f.executor.get_expected_output(100), 40);

        let out = f.executor.execute_swap(100, 40, f.clock.now()).unwrap();

        assert_eq!(out, 40);
        assert_eq!(f.ledger.balance("RBS", "treasury"), 40);
        assert_eq!(f.ledger.balance("USD", "treasury"), 900);
        assert_eq!(f.ledger.balance("USD", "executor"), 0);
        assert_eq!(f.ledger.balance("RBS", "executor"), 0);
        assert_eq!(f.ledger.allowance("USD", "executor", "router"), 0);
    }

    #[test]
    fn test_insufficient_output_refunds_treasury() {
        let f = fixture();

        let err = f.executor.execute_swap(100, 50, f.clock.now()).unwrap_err();

        assert_eq!(
            err,
            SwapError::InsufficientOutput {
                min_amount_out: 50,
                received: 40
            }
        );
        assert_eq!(f.ledger.balance("USD", "treasury"), 1_000);
        assert_eq!(f.ledger.balance("USD", "executor"), 0);
        assert_eq!(f.ledger.balance("RBS", "treasury"), 0);
    }

    #[test]
    fn test_router_revert_refunds_treasury() {
        let f = fixture();
        f.router.set_fault(Some(RouterFault::Revert("paused pool".to_string())));

        let err = f.executor.execute_swap(100, 0, f.clock.now()).unwrap_err();

        assert!(matches!(err, SwapError::Router(ref msg) if msg.contains("paused pool")));
        assert_eq!(f.ledger.balance("USD", "treasury"), 1_000);
        assert_eq!(f.ledger.allowance("USD", "executor", "router"), 0);
    }

    #[test]
    fn test_shortfall_detected_by_balance_delta() {
        let f = fixture();
        f.router.set_fault(Some(RouterFault::Shortfall(5_000)));

        let err = f.executor.execute_swap(100, 40, f.clock.now()).unwrap_err();

        assert_eq!(
            err,
            SwapError::InsufficientOutput {
                min_amount_out: 40,
                received: 20
            }
        );
        // Settlement reversed: treasury and pool are back where they started
        assert_eq!(f.ledger.balance("USD", "treasury"), 1_000);
        assert_eq!(f.ledger.balance("RBS", "treasury"), 0);
        assert_eq!(f.ledger.balance("USD", "executor"), 0);
        assert_eq!(f.ledger.balance("RBS", "executor"), 0);
        assert_eq!(f.router.reserve("USD"), 1_000);
        assert_eq!(f.router.reserve("RBS"), 440);
        assert_eq!(f.ledger.allowance("USD", "executor", "router"), 0);
    }

    #[test]
    fn test_quote_failure_defaults_to_zero() {
        let f = fixture();
        f.router.set_fault(Some(RouterFault::Offline));
        assert_eq!(f.executor.get_expected_output(100), 0);
    }

    #[test]
    fn test_treasury_shortfall_is_transfer_error() {
        let f = fixture();
        let err = f.executor.execute_swap(5_000, 0, f.clock.now()).unwrap_err();
        assert!(matches!(err, SwapError::Transfer(_)));
        assert_eq!(f.ledger.balance("USD", "treasury"), 1_000);
    }

    #[test]
    fn test_min_output_and_slippage_setter() {
        let mut f = fixture();
        assert_eq!(f.executor.calculate_min_output(10_000), 9_950);

        assert!(f.executor.set_slippage_tolerance("owner", 1_001).is_err());
        assert!(f.executor.set_slippage_tolerance("stranger", 100).is_err());
        f.executor.set_slippage_tolerance("owner", 100).unwrap();
        assert_eq!(f.executor.calculate_min_output(10_000), 9_900);
        assert_eq!(f.executor.execute_swap(0, 0, 0), Err(SwapError::ZeroAmount));
    }
}
