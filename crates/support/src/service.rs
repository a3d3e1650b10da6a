//! Support accounts kept in step with tenant accounts

use starchat_shared::{
    Account, AccountId, EntityStore, Plan, SeatKind, SeatUsage, StarchatError, StarchatResult,
    SupportDirectory, SupportLink,
};

use crate::client::{AccountUpdate, ChatwootClient, NewAccount, SeatLimits, SupportRole, SupportUser};
use crate::error::{SupportError, SupportResult};
use crate::features::enabled_features;

/// Limits pushed for an account on `plan`; never below one seat
pub fn seat_limits(account: &Account, plan: &Plan) -> SeatLimits {
    SeatLimits {
        agents: account.seat_limit(plan, SeatKind::Agents).max(1),
        inboxes: account.seat_limit(plan, SeatKind::Inboxes).max(1),
    }
}

/// Chatwoot-backed [`SupportDirectory`]
#[derive(Debug, Clone)]
pub struct ChatwootService<S> {
    client: ChatwootClient,
    store: S,
}

impl<S: EntityStore> ChatwootService<S> {
    pub fn new(client: ChatwootClient, store: S) -> Self {
        Self { client, store }
    }

    async fn link(&self, account_id: AccountId) -> StarchatResult<Option<SupportLink>> {
        self.store.get_support_link(account_id).await
    }

    /// Create a platform user and attach it to the account's support account.
    ///
    /// The first administrator becomes the owner whose token reads usage.
    pub async fn provision_member(
        &self,
        account_id: AccountId,
        name: &str,
        email: &str,
        password: &str,
        role: SupportRole,
    ) -> StarchatResult<SupportUser> {
        let mut link = self.link(account_id).await?.ok_or_else(|| {
            StarchatError::NotFound(format!("support account for account {account_id}"))
        })?;

        let display = if name.trim().is_empty() { email } else { name };
        let user = self.client.create_user(display, email, password).await?;
        self.client
            .create_account_user(link.support_account_id, user.id, role)
            .await?;

        if role == SupportRole::Administrator && link.support_user_id.is_none() {
            link.support_user_id = Some(user.id);
            self.store.save_support_link(&link).await?;
        }

        tracing::info!(
            account_id = %account_id,
            support_account_id = link.support_account_id,
            support_user_id = user.id,
            "Provisioned support member"
        );
        Ok(user)
    }

    async fn owner_token(&self, link: &SupportLink) -> SupportResult<String> {
        let user_id = link.support_user_id.ok_or_else(|| {
            SupportError::NotFound(format!(
                "owner user of support account {}",
                link.support_account_id
            ))
        })?;
        self.client
            .get_user(user_id)
            .await?
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SupportError::NotFound(format!("access token of user {user_id}")))
    }
}

impl<S: EntityStore> SupportDirectory for ChatwootService<S> {
    async fn provision(&self, account: &Account, plan: Option<&Plan>) -> StarchatResult<()> {
        if self.link(account.id).await?.is_some() {
            return Ok(());
        }

        let mut new_account = NewAccount::new(&account.email);
        new_account.status = account.status.as_str().to_string();
        new_account.features = Some(enabled_features());
        if let Some(plan) = plan {
            new_account.limits = seat_limits(account, plan);
        }

        let support_account_id = self.client.create_account(&new_account).await?;
        self.store
            .save_support_link(&SupportLink {
                account_id: account.id,
                support_account_id,
                support_user_id: None,
            })
            .await?;

        tracing::info!(account_id = %account.id, support_account_id, "Created support account");
        Ok(())
    }

    async fn sync_limits(&self, account: &Account, plan: &Plan) -> StarchatResult<()> {
        let Some(link) = self.link(account.id).await? else {
            tracing::warn!(account_id = %account.id, "No support account linked; skipping limit sync");
            return Ok(());
        };

        let limits = seat_limits(account, plan);
        let update = AccountUpdate {
            name: Some(account.email.clone()),
            status: Some(account.status.as_str().to_string()),
            limits: Some(limits),
            features: Some(enabled_features()),
            ..Default::default()
        };
        self.client
            .update_account(link.support_account_id, &update)
            .await?;

        tracing::info!(
            account_id = %account.id,
            support_account_id = link.support_account_id,
            agents = limits.agents,
            inboxes = limits.inboxes,
            "Updated support account limits"
        );
        Ok(())
    }

    async fn remove(&self, account_id: AccountId) -> StarchatResult<()> {
        let Some(link) = self.link(account_id).await? else {
            return Ok(());
        };

        match self.client.delete_account(link.support_account_id).await {
            Ok(()) | Err(SupportError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }
        self.store.delete_support_link(account_id).await?;

        tracing::info!(account_id = %account_id, support_account_id = link.support_account_id, "Deleted support account");
        Ok(())
    }

    async fn seat_usage(&self, account_id: AccountId) -> StarchatResult<SeatUsage> {
        let link = self.link(account_id).await?.ok_or_else(|| {
            StarchatError::Upstream(format!("no support account for account {account_id}"))
        })?;
        let token = self.owner_token(&link).await?;

        let agents = self
            .client
            .list_agents(link.support_account_id, &token)
            .await?;
        let inboxes = self
            .client
            .list_inboxes(link.support_account_id, &token)
            .await?;

        let count = |n: usize| i32::try_from(n).unwrap_or(i32::MAX);
        Ok(SeatUsage {
            agents: count(agents.len()),
            inboxes: count(inboxes.len()),
        })
    }
}
