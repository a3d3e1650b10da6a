//! PostgreSQL-backed entity store

use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;

use crate::error::{StarchatError, StarchatResult};
use crate::store::EntityStore;
use crate::types::{
    Account, AccountChanges, AccountId, AccountStatus, Address, AddressId, AddressKind, Company,
    Plan, PlanId, PlanPriceIds, PriceSlot, SupportLink,
};

const PLAN_COLUMNS: &str = "id, name, description, included_agents, included_inboxes, \
    monthly_price_cents, yearly_price_cents, extra_agent_price_cents, extra_inbox_price_cents, \
    extra_agent_yearly_price_cents, extra_inbox_yearly_price_cents, is_active, is_plan_staff, \
    is_favorite, requires_payment, stripe_product_id, monthly_price_id, yearly_price_id, \
    extra_agent_price_id, extra_agent_price_id_yearly, extra_inbox_price_id, \
    extra_inbox_price_id_yearly";

const ACCOUNT_COLUMNS: &str = "id, email, phone, plan_id, extra_agents, extra_inboxes, status, \
    stripe_customer_id, stripe_subscription_id, created_at, updated_at";

const ADDRESS_COLUMNS: &str = "id, account_id, kind, is_default, line1, number, line2, \
    neighborhood, city, state, postal_code, country";

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: i64,
    name: String,
    description: String,
    included_agents: i32,
    included_inboxes: i32,
    monthly_price_cents: i64,
    yearly_price_cents: i64,
    extra_agent_price_cents: i64,
    extra_inbox_price_cents: i64,
    extra_agent_yearly_price_cents: Option<i64>,
    extra_inbox_yearly_price_cents: Option<i64>,
    is_active: bool,
    is_plan_staff: bool,
    is_favorite: bool,
    requires_payment: bool,
    stripe_product_id: Option<String>,
    monthly_price_id: Option<String>,
    yearly_price_id: Option<String>,
    extra_agent_price_id: Option<String>,
    extra_agent_price_id_yearly: Option<String>,
    extra_inbox_price_id: Option<String>,
    extra_inbox_price_id_yearly: Option<String>,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Plan {
            id: PlanId(row.id),
            name: row.name,
            description: row.description,
            included_agents: row.included_agents,
            included_inboxes: row.included_inboxes,
            monthly_price_cents: row.monthly_price_cents,
            yearly_price_cents: row.yearly_price_cents,
            extra_agent_price_cents: row.extra_agent_price_cents,
            extra_inbox_price_cents: row.extra_inbox_price_cents,
            extra_agent_yearly_price_cents: row.extra_agent_yearly_price_cents,
            extra_inbox_yearly_price_cents: row.extra_inbox_yearly_price_cents,
            is_active: row.is_active,
            is_plan_staff: row.is_plan_staff,
            is_favorite: row.is_favorite,
            requires_payment: row.requires_payment,
            stripe_product_id: row.stripe_product_id,
            prices: PlanPriceIds {
                monthly: row.monthly_price_id,
                yearly: row.yearly_price_id,
                extra_agent_monthly: row.extra_agent_price_id,
                extra_agent_yearly: row.extra_agent_price_id_yearly,
                extra_inbox_monthly: row.extra_inbox_price_id,
                extra_inbox_yearly: row.extra_inbox_price_id_yearly,
            },
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    email: String,
    phone: Option<String>,
    plan_id: Option<i64>,
    extra_agents: i32,
    extra_inboxes: i32,
    status: String,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<AccountRow> for Account {
    type Error = StarchatError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: AccountId(row.id),
            email: row.email,
            phone: row.phone,
            plan_id: row.plan_id.map(PlanId),
            extra_agents: row.extra_agents,
            extra_inboxes: row.extra_inboxes,
            status: row
                .status
                .parse::<AccountStatus>()
                .map_err(StarchatError::Storage)?,
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AddressRow {
    id: i64,
    account_id: i64,
    kind: String,
    is_default: bool,
    line1: String,
    number: Option<String>,
    line2: Option<String>,
    neighborhood: Option<String>,
    city: String,
    state: String,
    postal_code: String,
    country: String,
}

impl TryFrom<AddressRow> for Address {
    type Error = StarchatError;

    fn try_from(row: AddressRow) -> Result<Self, Self::Error> {
        Ok(Address {
            id: AddressId(row.id),
            account_id: AccountId(row.account_id),
            kind: row
                .kind
                .parse::<AddressKind>()
                .map_err(StarchatError::Storage)?,
            is_default: row.is_default,
            line1: row.line1,
            number: row.number,
            line2: row.line2,
            neighborhood: row.neighborhood,
            city: row.city,
            state: row.state,
            postal_code: row.postal_code,
            country: row.country,
        })
    }
}

/// Store backed by the application database
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn push_plan_values(qb: &mut QueryBuilder<'_, Postgres>, plan: &Plan) {
    let mut values = qb.separated(", ");
    values.push_bind(plan.name.clone());
    values.push_bind(plan.description.clone());
    values.push_bind(plan.included_agents);
    values.push_bind(plan.included_inboxes);
    values.push_bind(plan.monthly_price_cents);
    values.push_bind(plan.yearly_price_cents);
    values.push_bind(plan.extra_agent_price_cents);
    values.push_bind(plan.extra_inbox_price_cents);
    values.push_bind(plan.extra_agent_yearly_price_cents);
    values.push_bind(plan.extra_inbox_yearly_price_cents);
    values.push_bind(plan.is_active);
    values.push_bind(plan.is_plan_staff);
    values.push_bind(plan.is_favorite);
    values.push_bind(plan.requires_payment);
    values.push_bind(plan.stripe_product_id.clone());
    for slot in PriceSlot::ALL {
        values.push_bind(plan.prices.get(slot).map(str::to_string));
    }
}

impl EntityStore for PgStore {
    async fn get_plan(&self, id: PlanId) -> StarchatResult<Option<Plan>> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = $1");
        let row: Option<PlanRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Plan::from))
    }

    async fn list_plans(&self) -> StarchatResult<Vec<Plan>> {
        let sql = format!("SELECT {PLAN_COLUMNS} FROM plans ORDER BY id");
        let rows: Vec<PlanRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Plan::from).collect())
    }

    async fn create_plan(&self, plan: &Plan) -> StarchatResult<Plan> {
        let mut tx = self.pool.begin().await?;

        if plan.is_favorite {
            sqlx::query("UPDATE plans SET is_favorite = FALSE WHERE is_favorite")
                .execute(&mut *tx)
                .await?;
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO plans (name, description, included_agents, included_inboxes, \
             monthly_price_cents, yearly_price_cents, extra_agent_price_cents, \
             extra_inbox_price_cents, extra_agent_yearly_price_cents, \
             extra_inbox_yearly_price_cents, is_active, is_plan_staff, is_favorite, \
             requires_payment, stripe_product_id, monthly_price_id, yearly_price_id, \
             extra_agent_price_id, extra_agent_price_id_yearly, extra_inbox_price_id, \
             extra_inbox_price_id_yearly) VALUES (",
        );
        push_plan_values(&mut qb, plan);
        qb.push(") RETURNING ");
        qb.push(PLAN_COLUMNS);

        let row: PlanRow = qb.build_query_as().fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn update_plan(&self, plan: &Plan) -> StarchatResult<Plan> {
        let mut tx = self.pool.begin().await?;

        if plan.is_favorite {
            sqlx::query("UPDATE plans SET is_favorite = FALSE WHERE is_favorite AND id <> $1")
                .bind(plan.id.0)
                .execute(&mut *tx)
                .await?;
        }

        let mut qb = QueryBuilder::<Postgres>::new(
            "UPDATE plans SET (name, description, included_agents, included_inboxes, \
             monthly_price_cents, yearly_price_cents, extra_agent_price_cents, \
             extra_inbox_price_cents, extra_agent_yearly_price_cents, \
             extra_inbox_yearly_price_cents, is_active, is_plan_staff, is_favorite, \
             requires_payment, stripe_product_id, monthly_price_id, yearly_price_id, \
             extra_agent_price_id, extra_agent_price_id_yearly, extra_inbox_price_id, \
             extra_inbox_price_id_yearly) = (",
        );
        push_plan_values(&mut qb, plan);
        qb.push(") WHERE id = ");
        qb.push_bind(plan.id.0);
        qb.push(" RETURNING ");
        qb.push(PLAN_COLUMNS);

        let row: Option<PlanRow> = qb.build_query_as().fetch_optional(&mut *tx).await?;
        let Some(row) = row else {
            return Err(StarchatError::NotFound(format!("plan {}", plan.id)));
        };
        tx.commit().await?;
        Ok(row.into())
    }

    async fn set_plan_product_id(&self, id: PlanId, product_id: Option<&str>) -> StarchatResult<()> {
        sqlx::query("UPDATE plans SET stripe_product_id = $1 WHERE id = $2")
            .bind(product_id)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_plan_price_id(
        &self,
        id: PlanId,
        slot: PriceSlot,
        price_id: Option<&str>,
    ) -> StarchatResult<()> {
        let sql = format!("UPDATE plans SET {} = $1 WHERE id = $2", slot.column());
        sqlx::query(&sql)
            .bind(price_id)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_plan(&self, id: PlanId) -> StarchatResult<Option<Plan>> {
        let sql = format!("DELETE FROM plans WHERE id = $1 RETURNING {PLAN_COLUMNS}");
        let row: Option<PlanRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Plan::from))
    }

    async fn get_account(&self, id: AccountId) -> StarchatResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn find_account_by_customer(&self, customer_id: &str) -> StarchatResult<Option<Account>> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE stripe_customer_id = $1 ORDER BY id LIMIT 1"
        );
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(customer_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn find_account_by_email(&self, email: &str) -> StarchatResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE LOWER(email) = LOWER($1)");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn create_account(&self, account: &Account) -> StarchatResult<Account> {
        let sql = format!(
            "INSERT INTO accounts (email, phone, plan_id, extra_agents, extra_inboxes, status, \
             stripe_customer_id, stripe_subscription_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: AccountRow = sqlx::query_as(&sql)
            .bind(&account.email)
            .bind(&account.phone)
            .bind(account.plan_id.map(|p| p.0))
            .bind(account.extra_agents)
            .bind(account.extra_inboxes)
            .bind(account.status.as_str())
            .bind(&account.stripe_customer_id)
            .bind(&account.stripe_subscription_id)
            .fetch_one(&self.pool)
            .await?;
        row.try_into()
    }

    async fn update_account(&self, account: &Account) -> StarchatResult<Account> {
        let sql = format!(
            "UPDATE accounts SET email = $1, phone = $2, plan_id = $3, extra_agents = $4, \
             extra_inboxes = $5, status = $6, stripe_customer_id = $7, \
             stripe_subscription_id = $8, updated_at = NOW() \
             WHERE id = $9 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(&account.email)
            .bind(&account.phone)
            .bind(account.plan_id.map(|p| p.0))
            .bind(account.extra_agents)
            .bind(account.extra_inboxes)
            .bind(account.status.as_str())
            .bind(&account.stripe_customer_id)
            .bind(&account.stripe_subscription_id)
            .bind(account.id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| StarchatError::NotFound(format!("account {}", account.id)))?
            .try_into()
    }

    async fn apply_account_changes(
        &self,
        id: AccountId,
        changes: &AccountChanges,
    ) -> StarchatResult<Option<Account>> {
        if changes.is_empty() {
            return self.get_account(id).await;
        }

        let mut qb = QueryBuilder::<Postgres>::new("UPDATE accounts SET updated_at = NOW()");
        if let Some(status) = changes.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(plan_id) = changes.plan_id {
            qb.push(", plan_id = ").push_bind(plan_id.0);
        }
        if let Some(extra) = changes.extra_agents {
            qb.push(", extra_agents = ").push_bind(extra);
        }
        if let Some(extra) = changes.extra_inboxes {
            qb.push(", extra_inboxes = ").push_bind(extra);
        }
        if let Some(customer) = &changes.stripe_customer_id {
            qb.push(", stripe_customer_id = ").push_bind(customer.clone());
        }
        if let Some(subscription) = &changes.stripe_subscription_id {
            qb.push(", stripe_subscription_id = ")
                .push_bind(subscription.clone());
        }
        qb.push(" WHERE id = ").push_bind(id.0);
        qb.push(" RETURNING ").push(ACCOUNT_COLUMNS);

        let row: Option<AccountRow> = qb.build_query_as().fetch_optional(&self.pool).await?;
        row.map(Account::try_from).transpose()
    }

    async fn delete_account(&self, id: AccountId) -> StarchatResult<Option<Account>> {
        let sql = format!("DELETE FROM accounts WHERE id = $1 RETURNING {ACCOUNT_COLUMNS}");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Account::try_from).transpose()
    }

    async fn get_company(&self, account_id: AccountId) -> StarchatResult<Option<Company>> {
        let row: Option<(String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT name, tax_id, company_type FROM companies WHERE account_id = $1",
        )
        .bind(account_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(name, tax_id, company_type)| Company {
            account_id,
            name,
            tax_id,
            company_type,
        }))
    }

    async fn save_company(&self, company: &Company) -> StarchatResult<Company> {
        sqlx::query(
            r#"
            INSERT INTO companies (account_id, name, tax_id, company_type)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (account_id) DO UPDATE
            SET name = EXCLUDED.name, tax_id = EXCLUDED.tax_id, company_type = EXCLUDED.company_type
            "#,
        )
        .bind(company.account_id.0)
        .bind(&company.name)
        .bind(&company.tax_id)
        .bind(&company.company_type)
        .execute(&self.pool)
        .await?;
        Ok(company.clone())
    }

    async fn list_addresses(&self, account_id: AccountId) -> StarchatResult<Vec<Address>> {
        let sql = format!("SELECT {ADDRESS_COLUMNS} FROM addresses WHERE account_id = $1 ORDER BY id");
        let rows: Vec<AddressRow> = sqlx::query_as(&sql)
            .bind(account_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Address::try_from).collect()
    }

    async fn save_address(&self, address: &Address) -> StarchatResult<Address> {
        let mut tx = self.pool.begin().await?;

        if address.is_default {
            sqlx::query(
                "UPDATE addresses SET is_default = FALSE \
                 WHERE account_id = $1 AND kind = $2 AND is_default AND id <> $3",
            )
            .bind(address.account_id.0)
            .bind(address.kind.as_str())
            .bind(address.id.0)
            .execute(&mut *tx)
            .await?;
        }

        let row: Option<AddressRow> = if address.id.0 == 0 {
            let sql = format!(
                "INSERT INTO addresses (account_id, kind, is_default, line1, number, line2, \
                 neighborhood, city, state, postal_code, country) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {ADDRESS_COLUMNS}"
            );
            sqlx::query_as(&sql)
                .bind(address.account_id.0)
                .bind(address.kind.as_str())
                .bind(address.is_default)
                .bind(&address.line1)
                .bind(&address.number)
                .bind(&address.line2)
                .bind(&address.neighborhood)
                .bind(&address.city)
                .bind(&address.state)
                .bind(&address.postal_code)
                .bind(&address.country)
                .fetch_optional(&mut *tx)
                .await?
        } else {
            let sql = format!(
                "UPDATE addresses SET kind = $1, is_default = $2, line1 = $3, number = $4, \
                 line2 = $5, neighborhood = $6, city = $7, state = $8, postal_code = $9, \
                 country = $10 WHERE id = $11 AND account_id = $12 RETURNING {ADDRESS_COLUMNS}"
            );
            sqlx::query_as(&sql)
                .bind(address.kind.as_str())
                .bind(address.is_default)
                .bind(&address.line1)
                .bind(&address.number)
                .bind(&address.line2)
                .bind(&address.neighborhood)
                .bind(&address.city)
                .bind(&address.state)
                .bind(&address.postal_code)
                .bind(&address.country)
                .bind(address.id.0)
                .bind(address.account_id.0)
                .fetch_optional(&mut *tx)
                .await?
        };

        let Some(row) = row else {
            return Err(StarchatError::NotFound(format!("address {}", address.id)));
        };
        tx.commit().await?;
        row.try_into()
    }

    async fn get_support_link(&self, account_id: AccountId) -> StarchatResult<Option<SupportLink>> {
        let row: Option<(i64, Option<i64>)> = sqlx::query_as(
            "SELECT support_account_id, support_user_id FROM support_links WHERE account_id = $1",
        )
        .bind(account_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(support_account_id, support_user_id)| SupportLink {
            account_id,
            support_account_id,
            support_user_id,
        }))
    }

    async fn save_support_link(&self, link: &SupportLink) -> StarchatResult<()> {
        sqlx::query(
            r#"
            INSERT INTO support_links (account_id, support_account_id, support_user_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id) DO UPDATE
            SET support_account_id = EXCLUDED.support_account_id,
                support_user_id = EXCLUDED.support_user_id
            "#,
        )
        .bind(link.account_id.0)
        .bind(link.support_account_id)
        .bind(link.support_user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_support_link(&self, account_id: AccountId) -> StarchatResult<()> {
        sqlx::query("DELETE FROM support_links WHERE account_id = $1")
            .bind(account_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
