//! Account, company and address administration

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use starchat_billing::{DomainEvent, Outbox};
use starchat_shared::{
    free_plan, Account, AccountId, AccountStatus, Address, AddressId, AddressKind, Company,
    EntityStore, PlanId,
};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Defaults to the free plan
    #[serde(default)]
    pub plan_id: Option<PlanId>,
}

/// Partial account update; absent fields are left alone
#[derive(Debug, Default, Deserialize)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    #[serde(default)]
    pub extra_agents: Option<i32>,
    #[serde(default)]
    pub extra_inboxes: Option<i32>,
    #[serde(default)]
    pub status: Option<AccountStatus>,
}

impl UpdateAccountRequest {
    pub fn apply(&self, account: &mut Account) -> ApiResult<()> {
        for (field, value) in [
            ("extra_agents", self.extra_agents),
            ("extra_inboxes", self.extra_inboxes),
        ] {
            if value.is_some_and(|v| v < 0) {
                return Err(ApiError::Validation(format!("{field} cannot be negative")));
            }
        }
        let email = self.email.as_deref().map(valid_email).transpose()?;

        if let Some(email) = email {
            account.email = email;
        }
        if let Some(phone) = &self.phone {
            account.phone = Some(phone.trim().to_string()).filter(|p| !p.is_empty());
        }
        if let Some(plan_id) = self.plan_id {
            account.plan_id = Some(plan_id);
        }
        if let Some(extra) = self.extra_agents {
            account.extra_agents = extra;
        }
        if let Some(extra) = self.extra_inboxes {
            account.extra_inboxes = extra;
        }
        if let Some(status) = self.status {
            account.status = status;
        }
        Ok(())
    }
}

fn valid_email(email: &str) -> ApiResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(ApiError::Validation("a valid email is required".to_string())),
    }
}

async fn load_account(state: &AppState, account_id: i64) -> ApiResult<Account> {
    state
        .store
        .get_account(AccountId(account_id))
        .await?
        .ok_or(ApiError::NotFound)
}

async fn ensure_plan(state: &AppState, plan_id: PlanId) -> ApiResult<()> {
    match state.store.get_plan(plan_id).await? {
        Some(_) => Ok(()),
        None => Err(ApiError::Validation(format!("plan {plan_id} does not exist"))),
    }
}

/// POST /api/v1/accounts
pub async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    let email = valid_email(&request.email)?;
    if state.store.find_account_by_email(&email).await?.is_some() {
        return Err(ApiError::Conflict(format!("account {email} already exists")));
    }

    let plan_id = match request.plan_id {
        Some(plan_id) => {
            ensure_plan(&state, plan_id).await?;
            Some(plan_id)
        }
        None => free_plan(&state.store).await?.map(|plan| plan.id),
    };

    let mut account = Account::new(email, plan_id);
    account.phone = request.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
    let account = state.store.create_account(&account).await?;
    tracing::info!(account_id = %account.id, plan_id = ?account.plan_id, "Account created");

    let mut outbox = Outbox::new();
    outbox.push(DomainEvent::AccountSaved {
        account: account.clone(),
        created: true,
    });
    state.commit(outbox).await;

    let account = state
        .store
        .get_account(account.id)
        .await?
        .unwrap_or(account);
    Ok((StatusCode::CREATED, Json(account)))
}

/// PATCH /api/v1/accounts/:account_id
pub async fn update_account(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    Json(request): Json<UpdateAccountRequest>,
) -> ApiResult<Json<Account>> {
    let mut account = load_account(&state, account_id).await?;
    if let Some(plan_id) = request.plan_id {
        ensure_plan(&state, plan_id).await?;
    }
    request.apply(&mut account)?;
    let account = state.store.update_account(&account).await?;
    tracing::info!(account_id = %account.id, "Account updated");

    let mut outbox = Outbox::new();
    outbox.push(DomainEvent::AccountSaved {
        account: account.clone(),
        created: false,
    });
    state.commit(outbox).await;

    Ok(Json(account))
}

/// DELETE /api/v1/accounts/:account_id
pub async fn delete_account(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let account = state
        .store
        .delete_account(AccountId(account_id))
        .await?
        .ok_or(ApiError::NotFound)?;
    tracing::info!(account_id = %account.id, "Account deleted");

    let mut outbox = Outbox::new();
    outbox.push(DomainEvent::AccountDeleted(account));
    state.commit(outbox).await;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CompanyRequest {
    pub name: String,
    #[serde(default)]
    pub tax_id: Option<String>,
    #[serde(default)]
    pub company_type: Option<String>,
}

/// PUT /api/v1/accounts/:account_id/company
///
/// The company name becomes the customer name, so the account is resynced.
pub async fn save_company(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    Json(request): Json<CompanyRequest>,
) -> ApiResult<Json<Company>> {
    let account = load_account(&state, account_id).await?;
    let name = request.name.trim();
    if name.is_empty() {
        return Err(ApiError::Validation("company name is required".to_string()));
    }

    let company = state
        .store
        .save_company(&Company {
            account_id: account.id,
            name: name.to_string(),
            tax_id: request.tax_id,
            company_type: request.company_type,
        })
        .await?;

    let mut outbox = Outbox::new();
    outbox.push(DomainEvent::AccountSaved {
        account,
        created: false,
    });
    state.commit(outbox).await;

    Ok(Json(company))
}

#[derive(Debug, Deserialize)]
pub struct AddressRequest {
    #[serde(default)]
    pub kind: AddressKind,
    #[serde(default)]
    pub is_default: bool,
    pub line1: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub line2: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "BR".to_string()
}

impl AddressRequest {
    pub fn into_address(self, account_id: AccountId) -> ApiResult<Address> {
        for (field, value) in [
            ("line1", &self.line1),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::Validation(format!("{field} is required")));
            }
        }
        Ok(Address {
            id: AddressId::default(),
            account_id,
            kind: self.kind,
            is_default: self.is_default,
            line1: self.line1,
            number: self.number,
            line2: self.line2,
            neighborhood: self.neighborhood,
            city: self.city,
            state: self.state,
            postal_code: self.postal_code,
            country: self.country.trim().to_uppercase(),
        })
    }
}

/// POST /api/v1/accounts/:account_id/addresses
pub async fn add_address(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    Json(request): Json<AddressRequest>,
) -> ApiResult<(StatusCode, Json<Address>)> {
    let account = load_account(&state, account_id).await?;
    let address = state
        .store
        .save_address(&request.into_address(account.id)?)
        .await?;
    tracing::info!(account_id = %account.id, address_id = %address.id, kind = address.kind.as_str(), "Address saved");

    let mut outbox = Outbox::new();
    outbox.push(DomainEvent::AddressSaved(address.clone()));
    state.commit(outbox).await;

    Ok((StatusCode::CREATED, Json(address)))
}
