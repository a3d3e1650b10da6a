//! Startup seeding of the internal plans and the operator account

use starchat_billing::{DomainEvent, Outbox};
use starchat_shared::{
    free_plan, Account, Company, EntityStore, Plan, PlanId, PlanPriceIds, StarchatResult,
    ADMIN_PLAN_NAME, FREE_PLAN_NAME,
};

use crate::config::Config;

/// What bootstrap seeds besides the plans
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub admin_email: Option<String>,
    pub company_name: String,
    pub company_tax_id: Option<String>,
}

impl From<&Config> for BootstrapOptions {
    fn from(config: &Config) -> Self {
        Self {
            admin_email: config.default_admin_email.clone(),
            company_name: config.default_company_name.clone(),
            company_tax_id: config.default_company_tax_id.clone(),
        }
    }
}

fn zero_priced(name: &str, description: &str, staff: bool) -> Plan {
    Plan {
        id: PlanId(0),
        name: name.to_string(),
        description: description.to_string(),
        included_agents: 1,
        included_inboxes: 1,
        monthly_price_cents: 0,
        yearly_price_cents: 0,
        extra_agent_price_cents: 0,
        extra_inbox_price_cents: 0,
        extra_agent_yearly_price_cents: None,
        extra_inbox_yearly_price_cents: None,
        is_active: true,
        is_plan_staff: staff,
        is_favorite: false,
        requires_payment: false,
        stripe_product_id: None,
        prices: PlanPriceIds::default(),
    }
}

/// Ensure the admin and free plans exist and, when configured, the operator
/// account on the admin plan. Returns the events for whatever was created.
pub async fn run<S: EntityStore>(store: &S, options: &BootstrapOptions) -> StarchatResult<Outbox> {
    let mut outbox = Outbox::new();
    let plans = store.list_plans().await?;

    let admin_plan = match plans.iter().find(|p| p.is_admin()) {
        Some(plan) => plan.clone(),
        None => {
            let plan = store
                .create_plan(&zero_priced(ADMIN_PLAN_NAME, "Internal staff plan", true))
                .await?;
            tracing::info!(plan_id = %plan.id, "Created admin plan");
            // never synced, so no event
            plan
        }
    };

    if free_plan(store).await?.is_none() {
        let plan = store
            .create_plan(&zero_priced(FREE_PLAN_NAME, "Free plan", false))
            .await?;
        tracing::info!(plan_id = %plan.id, "Created free plan");
        outbox.push(DomainEvent::PlanSaved {
            previous: None,
            current: plan,
        });
    }

    let Some(email) = options.admin_email.as_deref() else {
        return Ok(outbox);
    };
    let email = email.trim().to_lowercase();

    let account = match store.find_account_by_email(&email).await? {
        Some(account) => account,
        None => {
            let account = store
                .create_account(&Account::new(email, Some(admin_plan.id)))
                .await?;
            tracing::info!(account_id = %account.id, "Created default admin account");
            outbox.push(DomainEvent::AccountSaved {
                account: account.clone(),
                created: true,
            });
            account
        }
    };

    if store.get_company(account.id).await?.is_none() {
        store
            .save_company(&Company {
                account_id: account.id,
                name: options.company_name.clone(),
                tax_id: options.company_tax_id.clone(),
                company_type: Some("others".to_string()),
            })
            .await?;
        tracing::info!(account_id = %account.id, "Created default admin company");
    }

    Ok(outbox)
}
