//! Authorization policy shared by every component
//!
//! One policy instance is injected into each component and checked at the
//! start of every mutating call. Tiers: Owner ⊃ Authorized ⊃ Public.

use super::error::BuybackError;
use super::types::AccountId;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Capability tier required by an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Owner,
    Authorized,
    Public,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Owner => "OWNER",
            Capability::Authorized => "AUTHORIZED",
            Capability::Public => "PUBLIC",
        }
    }
}

#[derive(Debug)]
struct PolicyState {
    owner: AccountId,
    authorized: HashSet<AccountId>,
}

/// Owner plus an authorized-caller set
#[derive(Debug)]
pub struct AuthorizationPolicy {
    state: RwLock<PolicyState>,
}

impl AuthorizationPolicy {
    pub fn new(owner: impl Into<AccountId>) -> Self {
        Self {
            state: RwLock::new(PolicyState {
                owner: owner.into(),
                authorized: HashSet::new(),
            }),
        }
    }

    /// Shared handle for injecting into components
    pub fn shared(owner: impl Into<AccountId>) -> Arc<Self> {
        Arc::new(Self::new(owner))
    }

    pub fn owner(&self) -> AccountId {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .owner
            .clone()
    }

    /// Does `caller` hold `capability`?
    pub fn has(&self, caller: &str, capability: Capability) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match capability {
            Capability::Public => true,
            Capability::Owner => state.owner == caller,
            Capability::Authorized => state.owner == caller || state.authorized.contains(caller),
        }
    }

    /// Fail with `Unauthorized` unless `caller` holds `capability`
    pub fn check(&self, caller: &str, capability: Capability) -> Result<(), BuybackError> {
        if self.has(caller, capability) {
            Ok(())
        } else {
            log::warn!("🚫 {} denied {} operation", caller, capability.as_str());
            Err(BuybackError::Unauthorized {
                caller: caller.to_string(),
                required: capability.as_str(),
            })
        }
    }

    pub fn grant(&self, caller: &str, account: impl Into<AccountId>) -> Result<(), BuybackError> {
        self.check(caller, Capability::Owner)?;
        let account = account.into();
        if account.is_empty() {
            return Err(BuybackError::InvalidConfig("empty account".to_string()));
        }
        log::info!("🔑 Granted AUTHORIZED to {}", account);
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .authorized
            .insert(account);
        Ok(())
    }

    pub fn revoke(&self, caller: &str, account: &str) -> Result<(), BuybackError> {
        self.check(caller, Capability::Owner)?;
        log::info!("🔒 Revoked AUTHORIZED from {}", account);
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .authorized
            .remove(account);
        Ok(())
    }

    pub fn transfer_ownership(
        &self,
        caller: &str,
        new_owner: impl Into<AccountId>,
    ) -> Result<(), BuybackError> {
        self.check(caller, Capability::Owner)?;
        let new_owner = new_owner.into();
        if new_owner.is_empty() {
            return Err(BuybackError::InvalidConfig("zero owner address".to_string()));
        }
        log::info!("👑 Ownership transferred {} -> {}", caller, new_owner);
        self.state.write().unwrap_or_else(PoisonError::into_inner).owner = new_owner;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_tiers() {
        let policy = AuthorizationPolicy::new("owner");
        policy.grant("owner", "keeper").unwrap();

        assert!(policy.has("owner", Capability::Owner));
        assert!(policy.has("owner", Capability::Authorized));
        assert!(policy.has("keeper", Capability::Authorized));
        assert!(!policy.has("keeper", Capability::Owner));
        assert!(!policy.has("stranger", Capability::Authorized));
        assert!(policy.has("stranger", Capability::Public));
    }

    #[test]
    fn test_non_owner_cannot_grant() {
        let policy = AuthorizationPolicy::new("owner");

        let result = policy.grant("stranger", "stranger");
        assert!(matches!(result, Err(BuybackError::Unauthorized { .. })));
        assert!(!policy.has("stranger", Capability::Authorized));
    }

    #[test]
    fn test_revoke_and_transfer() {
        let policy = AuthorizationPolicy::new("owner");
        policy.grant("owner", "keeper").unwrap();
        policy.revoke("owner", "keeper").unwrap();
        assert!(!policy.has("keeper", Capability::Authorized));

        assert!(policy.transfer_ownership("owner", "").is_err());
        policy.transfer_ownership("owner", "new_owner").unwrap();
        assert_eq!(policy.owner(), "new_owner");
        assert!(!policy.has("owner", Capability::Owner));
    }
}
