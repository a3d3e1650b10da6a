//! Entity persistence contract and the in-memory implementation

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{StarchatError, StarchatResult};
use crate::types::{
    select_free_plan, Account, AccountChanges, AccountId, Address, AddressId, Company, Plan,
    PlanId, PriceSlot, SupportLink,
};

/// Persistence for plans, accounts and their satellites.
///
/// Implementations keep two invariants: at most one favorite plan, and at
/// most one default address per (account, kind).
pub trait EntityStore: Send + Sync {
    // Plans

    fn get_plan(&self, id: PlanId) -> impl Future<Output = StarchatResult<Option<Plan>>> + Send;

    /// All plans ordered by id
    fn list_plans(&self) -> impl Future<Output = StarchatResult<Vec<Plan>>> + Send;

    /// Insert a plan, assigning a new id
    fn create_plan(&self, plan: &Plan) -> impl Future<Output = StarchatResult<Plan>> + Send;

    /// Overwrite the stored plan with the same id
    fn update_plan(&self, plan: &Plan) -> impl Future<Output = StarchatResult<Plan>> + Send;

    /// Targeted write of the remote product id
    fn set_plan_product_id(
        &self,
        id: PlanId,
        product_id: Option<&str>,
    ) -> impl Future<Output = StarchatResult<()>> + Send;

    /// Targeted write of one remote price id
    fn set_plan_price_id(
        &self,
        id: PlanId,
        slot: PriceSlot,
        price_id: Option<&str>,
    ) -> impl Future<Output = StarchatResult<()>> + Send;

    /// Remove a plan; fails with `Conflict` while accounts still reference it
    fn delete_plan(&self, id: PlanId)
        -> impl Future<Output = StarchatResult<Option<Plan>>> + Send;

    // Accounts

    fn get_account(
        &self,
        id: AccountId,
    ) -> impl Future<Output = StarchatResult<Option<Account>>> + Send;

    fn find_account_by_customer(
        &self,
        customer_id: &str,
    ) -> impl Future<Output = StarchatResult<Option<Account>>> + Send;

    fn find_account_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = StarchatResult<Option<Account>>> + Send;

    /// Insert an account, assigning id and timestamps
    fn create_account(&self, account: &Account)
        -> impl Future<Output = StarchatResult<Account>> + Send;

    fn update_account(&self, account: &Account)
        -> impl Future<Output = StarchatResult<Account>> + Send;

    /// Write only the fields set in `changes`
    fn apply_account_changes(
        &self,
        id: AccountId,
        changes: &AccountChanges,
    ) -> impl Future<Output = StarchatResult<Option<Account>>> + Send;

    /// Delete an account together with its company, addresses and support link
    fn delete_account(
        &self,
        id: AccountId,
    ) -> impl Future<Output = StarchatResult<Option<Account>>> + Send;

    // Satellites

    fn get_company(
        &self,
        account_id: AccountId,
    ) -> impl Future<Output = StarchatResult<Option<Company>>> + Send;

    fn save_company(&self, company: &Company)
        -> impl Future<Output = StarchatResult<Company>> + Send;

    fn list_addresses(
        &self,
        account_id: AccountId,
    ) -> impl Future<Output = StarchatResult<Vec<Address>>> + Send;

    /// Insert (id 0) or update an address
    fn save_address(&self, address: &Address)
        -> impl Future<Output = StarchatResult<Address>> + Send;

    fn get_support_link(
        &self,
        account_id: AccountId,
    ) -> impl Future<Output = StarchatResult<Option<SupportLink>>> + Send;

    fn save_support_link(
        &self,
        link: &SupportLink,
    ) -> impl Future<Output = StarchatResult<()>> + Send;

    fn delete_support_link(
        &self,
        account_id: AccountId,
    ) -> impl Future<Output = StarchatResult<()>> + Send;
}

/// Resolve the free plan from the store
pub async fn free_plan<S: EntityStore + ?Sized>(store: &S) -> StarchatResult<Option<Plan>> {
    let plans = store.list_plans().await?;
    Ok(select_free_plan(&plans).cloned())
}

#[derive(Debug, Default)]
struct MemoryState {
    next_plan_id: i64,
    next_account_id: i64,
    next_address_id: i64,
    plans: BTreeMap<PlanId, Plan>,
    accounts: BTreeMap<AccountId, Account>,
    companies: HashMap<AccountId, Company>,
    addresses: BTreeMap<AddressId, Address>,
    support_links: HashMap<AccountId, SupportLink>,
}

impl MemoryState {
    fn clear_other_favorites(&mut self, keep: PlanId) {
        for plan in self.plans.values_mut() {
            if plan.id != keep {
                plan.is_favorite = false;
            }
        }
    }
}

/// In-memory store for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for MemoryStore {
    async fn get_plan(&self, id: PlanId) -> StarchatResult<Option<Plan>> {
        Ok(self.state.read().await.plans.get(&id).cloned())
    }

    async fn list_plans(&self) -> StarchatResult<Vec<Plan>> {
        Ok(self.state.read().await.plans.values().cloned().collect())
    }

    async fn create_plan(&self, plan: &Plan) -> StarchatResult<Plan> {
        let mut state = self.state.write().await;
        if state.plans.values().any(|p| p.name == plan.name) {
            return Err(StarchatError::Conflict(format!(
                "plan named {} already exists",
                plan.name
            )));
        }
        state.next_plan_id += 1;
        let mut stored = plan.clone();
        stored.id = PlanId(state.next_plan_id);
        if stored.is_favorite {
            state.clear_other_favorites(stored.id);
        }
        state.plans.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_plan(&self, plan: &Plan) -> StarchatResult<Plan> {
        let mut state = self.state.write().await;
        if !state.plans.contains_key(&plan.id) {
            return Err(StarchatError::NotFound(format!("plan {}", plan.id)));
        }
        if plan.is_favorite {
            state.clear_other_favorites(plan.id);
        }
        state.plans.insert(plan.id, plan.clone());
        Ok(plan.clone())
    }

    async fn set_plan_product_id(&self, id: PlanId, product_id: Option<&str>) -> StarchatResult<()> {
        let mut state = self.state.write().await;
        let plan = state
            .plans
            .get_mut(&id)
            .ok_or_else(|| StarchatError::NotFound(format!("plan {id}")))?;
        plan.stripe_product_id = product_id.map(str::to_string);
        Ok(())
    }

    async fn set_plan_price_id(
        &self,
        id: PlanId,
        slot: PriceSlot,
        price_id: Option<&str>,
    ) -> StarchatResult<()> {
        let mut state = self.state.write().await;
        let plan = state
            .plans
            .get_mut(&id)
            .ok_or_else(|| StarchatError::NotFound(format!("plan {id}")))?;
        plan.prices.set(slot, price_id.map(str::to_string));
        Ok(())
    }

    async fn delete_plan(&self, id: PlanId) -> StarchatResult<Option<Plan>> {
        let mut state = self.state.write().await;
        if state.accounts.values().any(|a| a.plan_id == Some(id)) {
            return Err(StarchatError::Conflict(format!(
                "plan {id} is still assigned to accounts"
            )));
        }
        Ok(state.plans.remove(&id))
    }

    async fn get_account(&self, id: AccountId) -> StarchatResult<Option<Account>> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn find_account_by_customer(&self, customer_id: &str) -> StarchatResult<Option<Account>> {
        Ok(self
            .state
            .read()
            .await
            .accounts
            .values()
            .find(|a| a.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn find_account_by_email(&self, email: &str) -> StarchatResult<Option<Account>> {
        Ok(self
            .state
            .read()
            .await
            .accounts
            .values()
            .find(|a| a.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_account(&self, account: &Account) -> StarchatResult<Account> {
        let mut state = self.state.write().await;
        if state
            .accounts
            .values()
            .any(|a| a.email.eq_ignore_ascii_case(&account.email))
        {
            return Err(StarchatError::Conflict(format!(
                "account with email {} already exists",
                account.email
            )));
        }
        state.next_account_id += 1;
        let now = OffsetDateTime::now_utc();
        let mut stored = account.clone();
        stored.id = AccountId(state.next_account_id);
        stored.created_at = now;
        stored.updated_at = now;
        state.accounts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_account(&self, account: &Account) -> StarchatResult<Account> {
        let mut state = self.state.write().await;
        let stored = state
            .accounts
            .get_mut(&account.id)
            .ok_or_else(|| StarchatError::NotFound(format!("account {}", account.id)))?;
        *stored = account.clone();
        stored.updated_at = OffsetDateTime::now_utc();
        Ok(stored.clone())
    }

    async fn apply_account_changes(
        &self,
        id: AccountId,
        changes: &AccountChanges,
    ) -> StarchatResult<Option<Account>> {
        let mut state = self.state.write().await;
        let Some(stored) = state.accounts.get_mut(&id) else {
            return Ok(None);
        };
        if !changes.is_empty() {
            changes.apply_to(stored);
            stored.updated_at = OffsetDateTime::now_utc();
        }
        Ok(Some(stored.clone()))
    }

    async fn delete_account(&self, id: AccountId) -> StarchatResult<Option<Account>> {
        let mut state = self.state.write().await;
        let removed = state.accounts.remove(&id);
        state.companies.remove(&id);
        state.support_links.remove(&id);
        state.addresses.retain(|_, a| a.account_id != id);
        Ok(removed)
    }

    async fn get_company(&self, account_id: AccountId) -> StarchatResult<Option<Company>> {
        Ok(self.state.read().await.companies.get(&account_id).cloned())
    }

    async fn save_company(&self, company: &Company) -> StarchatResult<Company> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&company.account_id) {
            return Err(StarchatError::NotFound(format!(
                "account {}",
                company.account_id
            )));
        }
        state.companies.insert(company.account_id, company.clone());
        Ok(company.clone())
    }

    async fn list_addresses(&self, account_id: AccountId) -> StarchatResult<Vec<Address>> {
        Ok(self
            .state
            .read()
            .await
            .addresses
            .values()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn save_address(&self, address: &Address) -> StarchatResult<Address> {
        let mut state = self.state.write().await;
        if !state.accounts.contains_key(&address.account_id) {
            return Err(StarchatError::NotFound(format!(
                "account {}",
                address.account_id
            )));
        }

        let mut stored = address.clone();
        if stored.id.0 == 0 {
            state.next_address_id += 1;
            stored.id = AddressId(state.next_address_id);
        } else if !state.addresses.contains_key(&stored.id) {
            return Err(StarchatError::NotFound(format!("address {}", stored.id)));
        }

        if stored.is_default {
            for other in state.addresses.values_mut() {
                if other.account_id == stored.account_id
                    && other.kind == stored.kind
                    && other.id != stored.id
                {
                    other.is_default = false;
                }
            }
        }
        state.addresses.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_support_link(&self, account_id: AccountId) -> StarchatResult<Option<SupportLink>> {
        Ok(self.state.read().await.support_links.get(&account_id).copied())
    }

    async fn save_support_link(&self, link: &SupportLink) -> StarchatResult<()> {
        self.state
            .write()
            .await
            .support_links
            .insert(link.account_id, *link);
        Ok(())
    }

    async fn delete_support_link(&self, account_id: AccountId) -> StarchatResult<()> {
        self.state.write().await.support_links.remove(&account_id);
        Ok(())
    }
}
