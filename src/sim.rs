//! In-memory collaborators for simulation and backtesting
//!
//! A shared `SimLedger` holds every balance and allowance. The treasury and
//! the constant-product router keep their funds in it under their own
//! account ids, so balance-delta measurement in the swap executor sees the
//! same numbers the router moved.

use crate::rbs::collaborators::{
    CollaboratorError, DexRouter, PriceOracle, TokenLedger, Treasury,
};
use crate::rbs::math::mul_div;
use crate::rbs::types::{AccountId, Amount, Timestamp, TokenId, BPS_DENOMINATOR, PRICE_SCALE};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared simulated clock (Unix seconds)
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    now: Arc<AtomicI64>,
}

impl SimClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }

    pub fn set(&self, ts: Timestamp) {
        self.now.store(ts, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Timestamp function for `BuybackEngine::new_with_timestamp_fn`
    pub fn as_now_fn(&self) -> Box<dyn Fn() -> i64 + Send + Sync> {
        let clock = self.clone();
        Box::new(move || clock.now())
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<(TokenId, AccountId), Amount>,
    allowances: HashMap<(TokenId, AccountId, AccountId), Amount>,
}

/// Balances and allowances for every simulated account
#[derive(Debug, Default)]
pub struct SimLedger {
    state: Mutex<LedgerState>,
}

impl SimLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create `amount` of `token` out of thin air
    pub fn mint(&self, token: &str, account: &str, amount: Amount) {
        let mut state = self.lock();
        let balance = state
            .balances
            .entry((token.to_string(), account.to_string()))
            .or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    pub fn set_balance(&self, token: &str, account: &str, amount: Amount) {
        self.lock()
            .balances
            .insert((token.to_string(), account.to_string()), amount);
    }

    pub fn balance(&self, token: &str, account: &str) -> Amount {
        self.lock()
            .balances
            .get(&(token.to_string(), account.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn allowance(&self, token: &str, owner: &str, spender: &str) -> Amount {
        self.lock()
            .allowances
            .get(&(token.to_string(), owner.to_string(), spender.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Move tokens on behalf of `owner`, consuming `spender`'s allowance
    pub fn transfer_from(
        &self,
        token: &str,
        spender: &str,
        owner: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), CollaboratorError> {
        let mut state = self.lock();
        let key = (token.to_string(), owner.to_string(), spender.to_string());
        let allowed = state.allowances.get(&key).copied().unwrap_or(0);
        if allowed < amount {
            return Err(CollaboratorError::InsufficientAllowance {
                owner: owner.to_string(),
                spender: spender.to_string(),
                required: amount,
                allowed,
            });
        }
        Self::move_balance(&mut state, token, owner, to, amount)?;
        state.allowances.insert(key, allowed - amount);
        Ok(())
    }

    fn move_balance(
        state: &mut LedgerState,
        token: &str,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), CollaboratorError> {
        let from_key = (token.to_string(), from.to_string());
        let available = state.balances.get(&from_key).copied().unwrap_or(0);
        if available < amount {
            return Err(CollaboratorError::InsufficientBalance {
                account: from.to_string(),
                token: token.to_string(),
                required: amount,
                available,
            });
        }
        state.balances.insert(from_key, available - amount);
        let to_balance = state
            .balances
            .entry((token.to_string(), to.to_string()))
            .or_insert(0);
        *to_balance = to_balance.saturating_add(amount);
        Ok(())
    }
}

impl TokenLedger for SimLedger {
    fn balance_of(&self, token: &str, account: &str) -> Result<Amount, CollaboratorError> {
        Ok(self.balance(token, account))
    }

    fn approve(
        &self,
        token: &str,
        owner: &str,
        spender: &str,
        amount: Amount,
    ) -> Result<(), CollaboratorError> {
        self.lock().allowances.insert(
            (token.to_string(), owner.to_string(), spender.to_string()),
            amount,
        );
        Ok(())
    }

    fn transfer(
        &self,
        token: &str,
        from: &str,
        to: &str,
        amount: Amount,
    ) -> Result<(), CollaboratorError> {
        let mut state = self.lock();
        Self::move_balance(&mut state, token, from, to, amount)
    }
}

/// Treasury backed by the simulated ledger
#[derive(Debug)]
pub struct SimTreasury {
    ledger: Arc<SimLedger>,
    account: AccountId,
    protected: Mutex<HashMap<TokenId, Amount>>,
    protected_query_fails: AtomicBool,
}

impl SimTreasury {
    pub fn new(ledger: Arc<SimLedger>, account: impl Into<AccountId>) -> Self {
        Self {
            ledger,
            account: account.into(),
            protected: Mutex::new(HashMap::new()),
            protected_query_fails: AtomicBool::new(false),
        }
    }

    pub fn set_protected(&self, token: &str, amount: Amount) {
        self.protected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_string(), amount);
    }

    /// Make `protected_reserves` fail (exercises the fallback path)
    pub fn set_protected_query_fails(&self, fails: bool) {
        self.protected_query_fails.store(fails, Ordering::SeqCst);
    }
}

impl Treasury for SimTreasury {
    fn account(&self) -> AccountId {
        self.account.clone()
    }

    fn reserve_balance(&self, token: &str) -> Result<Amount, CollaboratorError> {
        Ok(self.ledger.balance(token, &self.account))
    }

    fn protected_reserves(&self, token: &str) -> Result<Amount, CollaboratorError> {
        if self.protected_query_fails.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable(
                "protected reserves query not supported".to_string(),
            ));
        }
        Ok(self
            .protected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .copied()
            .unwrap_or(0))
    }

    fn withdraw(&self, token: &str, amount: Amount, to: &str) -> Result<(), CollaboratorError> {
        self.ledger.transfer(token, &self.account, to, amount)
    }

    fn deposit(&self, token: &str, amount: Amount, from: &str) -> Result<(), CollaboratorError> {
        self.ledger.transfer(token, from, &self.account, amount)
    }
}

/// Settable price feed; `None` means the feed is down
#[derive(Debug, Default)]
pub struct SimOracle {
    price: Mutex<Option<Amount>>,
}

impl SimOracle {
    pub fn new(price: Amount) -> Self {
        Self {
            price: Mutex::new(Some(price)),
        }
    }

    pub fn set_price(&self, price: Amount) {
        *self.price.lock().unwrap_or_else(PoisonError::into_inner) = Some(price);
    }

    pub fn set_unavailable(&self) {
        *self.price.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl PriceOracle for SimOracle {
    fn get_price(&self) -> Result<Amount, CollaboratorError> {
        self.price
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ok_or_else(|| CollaboratorError::Unavailable("price feed offline".to_string()))
    }
}

/// Injected router misbehaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterFault {
    /// Every swap reverts with this message
    Revert(String),
    /// Quotes and swaps are unreachable
    Offline,
    /// Swaps settle `bps` below the quote without reverting
    Shortfall(u32),
}

/// Constant-product (x·y = k) pool router
///
/// Pool reserves are the router account's ledger balances.
pub struct ConstantProductRouter {
    ledger: Arc<SimLedger>,
    account: AccountId,
    clock: SimClock,
    fee_bps: u32,
    fault: Mutex<Option<RouterFault>>,
}

impl ConstantProductRouter {
    pub fn new(
        ledger: Arc<SimLedger>,
        account: impl Into<AccountId>,
        clock: SimClock,
        fee_bps: u32,
    ) -> Self {
        Self {
            ledger,
            account: account.into(),
            clock,
            fee_bps: fee_bps.min(BPS_DENOMINATOR),
            fault: Mutex::new(None),
        }
    }

    pub fn set_fault(&self, fault: Option<RouterFault>) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = fault;
    }

    fn fault(&self) -> Option<RouterFault> {
        self.fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reserve(&self, token: &str) -> Amount {
        self.ledger.balance(token, &self.account)
    }

    /// Seed both sides of the pool
    pub fn add_liquidity(&self, token_a: &str, amount_a: Amount, token_b: &str, amount_b: Amount) {
        self.ledger.mint(token_a, &self.account, amount_a);
        self.ledger.mint(token_b, &self.account, amount_b);
    }

    /// Quote-per-base spot price (18 decimals)
    pub fn spot_price(&self, quote: &str, base: &str) -> Amount {
        mul_div(self.reserve(quote), PRICE_SCALE, self.reserve(base))
    }

    /// Re-centre the pool on `price` by resizing the quote side
    ///
    /// Models arbitrageurs pulling the pool back to the external market price
    /// between simulation steps.
    pub fn set_spot_price(&self, quote: &str, base: &str, price: Amount) {
        let base_reserve = self.reserve(base);
        let quote_reserve = mul_div(base_reserve, price, PRICE_SCALE);
        self.ledger.set_balance(quote, &self.account, quote_reserve);
    }

    fn amount_out(&self, amount_in: Amount, reserve_in: Amount, reserve_out: Amount) -> Amount {
        if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
            return 0;
        }
        let denominator_bps = BPS_DENOMINATOR as Amount;
        let in_with_fee = amount_in.saturating_mul(denominator_bps - self.fee_bps as Amount);
        let denominator = reserve_in
            .saturating_mul(denominator_bps)
            .saturating_add(in_with_fee);
        mul_div(in_with_fee, reserve_out, denominator)
    }

    fn quote_path(&self, amount_in: Amount, path: &[TokenId]) -> Result<Vec<Amount>, CollaboratorError> {
        if path.len() < 2 {
            return Err(CollaboratorError::Rejected("invalid path".to_string()));
        }
        let mut amounts = Vec::with_capacity(path.len());
        amounts.push(amount_in);
        for hop in path.windows(2) {
            let last = *amounts.last().unwrap_or(&0);
            let out = self.amount_out(last, self.reserve(&hop[0]), self.reserve(&hop[1]));
            amounts.push(out);
        }
        Ok(amounts)
    }
}

impl DexRouter for ConstantProductRouter {
    fn account(&self) -> AccountId {
        self.account.clone()
    }

    fn get_amounts_out(
        &self,
        amount_in: Amount,
        path: &[TokenId],
    ) -> Result<Vec<Amount>, CollaboratorError> {
        if self.fault() == Some(RouterFault::Offline) {
            return Err(CollaboratorError::Unavailable("router offline".to_string()));
        }
        self.quote_path(amount_in, path)
    }

    fn swap_exact_tokens_for_tokens(
        &self,
        amount_in: Amount,
        min_amount_out: Amount,
        path: &[TokenId],
        from: &str,
        to: &str,
        deadline: Timestamp,
    ) -> Result<Vec<Amount>, CollaboratorError> {
        let fault = self.fault();
        match &fault {
            Some(RouterFault::Offline) => {
                return Err(CollaboratorError::Unavailable("router offline".to_string()))
            }
            Some(RouterFault::Revert(msg)) => return Err(CollaboratorError::Rejected(msg.clone())),
            _ => {}
        }

        let now = self.clock.now();
        if now > deadline {
            return Err(CollaboratorError::Expired { deadline, now });
        }

        let mut amounts = self.quote_path(amount_in, path)?;
        let quoted = *amounts.last().unwrap_or(&0);
        let amount_out = match fault {
            Some(RouterFault::Shortfall(bps)) => {
                let bps = bps.min(BPS_DENOMINATOR);
                mul_div(quoted, (BPS_DENOMINATOR - bps) as Amount, BPS_DENOMINATOR as Amount)
            }
            _ => {
                if quoted < min_amount_out {
                    return Err(CollaboratorError::InsufficientOutputAmount {
                        min_amount_out,
                        amount_out: quoted,
                    });
                }
                quoted
            }
        };
        if let Some(last) = amounts.last_mut() {
            *last = amount_out;
        }

        let token_in = &path[0];
        let token_out = &path[path.len() - 1];
        self.ledger
            .transfer_from(token_in, &self.account, from, &self.account, amount_in)?;
        self.ledger.transfer(token_out, &self.account, to, amount_out)?;

        log::debug!(
            "🔁 Router swap {} {} -> {} {} (to {})",
            amount_in,
            token_in,
            amount_out,
            token_out,
            to
        );
        Ok(amounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<SimLedger>, SimClock, ConstantProductRouter) {
        let ledger = SimLedger::shared();
        let clock = SimClock::new(1_000);
        let router = ConstantProductRouter::new(ledger.clone(), "router", clock.clone(), 0);
        router.add_liquidity("USD", 1_000, "RBS", 440);
        (ledger, clock, router)
    }

    fn path() -> Vec<TokenId> {
        vec!["USD".to_string(), "RBS".to_string()]
    }

    #[test]
    fn test_constant_product_quote() {
        let (_ledger, _clock, router) = setup();

        // 100 * 440 / (1000 + 100) = 40
        let amounts = router.get_amounts_out(100, &path()).unwrap();
        assert_eq!(amounts, vec![100, 40]);
    }

    #[test]
    fn test_swap_moves_ledger_balances() {
        let (ledger, _clock, router) = setup();
        ledger.mint("USD", "buyer", 100);
        ledger.approve("USD", "buyer", "router", 100).unwrap();

        let amounts = router
            .swap_exact_tokens_for_tokens(100, 40, &path(), "buyer", "buyer", 2_000)
            .unwrap();

        assert_eq!(amounts[1], 40);
        assert_eq!(ledger.balance("RBS", "buyer"), 40);
        assert_eq!(ledger.balance("USD", "buyer"), 0);
        assert_eq!(router.reserve("USD"), 1_100);
        assert_eq!(router.reserve("RBS"), 400);
        assert_eq!(ledger.allowance("USD", "buyer", "router"), 0);
    }

    #[test]
    fn test_swap_enforces_min_out_and_deadline() {
        let (ledger, clock, router) = setup();
        ledger.mint("USD", "buyer", 100);
        ledger.approve("USD", "buyer", "router", 100).unwrap();

        let err = router
            .swap_exact_tokens_for_tokens(100, 50, &path(), "buyer", "buyer", 2_000)
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::InsufficientOutputAmount { amount_out: 40, .. }));

        clock.set(3_000);
        let err = router
            .swap_exact_tokens_for_tokens(100, 0, &path(), "buyer", "buyer", 2_000)
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Expired { .. }));

        // Nothing moved on revert
        assert_eq!(ledger.balance("USD", "buyer"), 100);
    }

    #[test]
    fn test_swap_requires_allowance() {
        let (ledger, _clock, router) = setup();
        ledger.mint("USD", "buyer", 100);

        let err = router
            .swap_exact_tokens_for_tokens(100, 0, &path(), "buyer", "buyer", 2_000)
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::InsufficientAllowance { .. }));
    }

    #[test]
    fn test_set_spot_price() {
        let ledger = SimLedger::shared();
        let router = ConstantProductRouter::new(ledger, "router", SimClock::new(0), 30);
        router.add_liquidity("USD", 0, "RBS", 1_000 * PRICE_SCALE);

        router.set_spot_price("USD", "RBS", 2 * PRICE_SCALE);
        assert_eq!(router.reserve("USD"), 2_000 * PRICE_SCALE);
        assert_eq!(router.spot_price("USD", "RBS"), 2 * PRICE_SCALE);
    }

    #[test]
    fn test_oracle_and_treasury_faults() {
        let oracle = SimOracle::new(5);
        assert_eq!(oracle.get_price().unwrap(), 5);
        oracle.set_unavailable();
        assert!(oracle.get_price().is_err());

        let ledger = SimLedger::shared();
        let treasury = SimTreasury::new(ledger.clone(), "treasury");
        ledger.mint("USD", "treasury", 500);
        treasury.set_protected("USD", 100);
        assert_eq!(treasury.reserve_balance("USD").unwrap(), 500);
        assert_eq!(treasury.protected_reserves("USD").unwrap(), 100);

        treasury.set_protected_query_fails(true);
        assert!(treasury.protected_reserves("USD").is_err());
    }
}
