//! Chatwoot REST client
//!
//! Platform endpoints (`/platform/api/v1/...`) authenticate with the platform
//! app token. Account-scoped reads (`/api/v1/accounts/{id}/...`) use the
//! access token of a user inside that account.

use std::collections::BTreeMap;

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ChatwootConfig;
use crate::error::{SupportError, SupportResult};

pub const DEFAULT_LOCALE: &str = "pt_BR";

/// Seat limits of a support account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatLimits {
    pub agents: i32,
    pub inboxes: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewAccount {
    pub name: String,
    pub locale: String,
    pub status: String,
    pub limits: SeatLimits,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<BTreeMap<String, bool>>,
}

impl NewAccount {
    /// New active account starting at one agent and one inbox
    pub fn new(name: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            locale: DEFAULT_LOCALE.to_string(),
            status: "active".to_string(),
            limits: SeatLimits {
                agents: 1,
                inboxes: 1,
            },
            domain: None,
            features: None,
        }
    }
}

/// Partial account update; unset fields are not sent
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<SeatLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<BTreeMap<String, bool>>,
}

impl AccountUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.domain.is_none()
            && self.status.is_none()
            && self.limits.is_none()
            && self.features.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub name: String,
    pub display_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Role of a user inside a support account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportRole {
    #[default]
    Agent,
    Administrator,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SupportUser {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Agent {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Inbox {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

/// Inbox listings come either bare or wrapped in `payload`
#[derive(Deserialize)]
#[serde(untagged)]
enum InboxList {
    Wrapped { payload: Vec<Inbox> },
    Plain(Vec<Inbox>),
}

#[derive(Deserialize)]
struct Created {
    id: i64,
}

fn require_id(id: i64, what: &str) -> SupportResult<()> {
    if id <= 0 {
        return Err(SupportError::Validation(format!("{what} id must be positive")));
    }
    Ok(())
}

/// Basic shape check: one `@`, non-empty local part, dotted domain with a 2+ letter TLD
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !local.is_empty()
        && !host.is_empty()
        && !domain.contains('@')
        && tld.len() >= 2
        && tld.chars().all(|c| c.is_ascii_alphabetic())
        && !email.chars().any(char::is_whitespace)
}

/// Client for the Chatwoot platform and account APIs
#[derive(Clone)]
pub struct ChatwootClient {
    http: Client,
    base_url: String,
    api_token: String,
}

impl std::fmt::Debug for ChatwootClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatwootClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ChatwootClient {
    pub fn new(config: &ChatwootConfig) -> SupportResult<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
        })
    }

    pub fn from_env() -> SupportResult<Self> {
        Self::new(&ChatwootConfig::from_env()?)
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        access_token: Option<&str>,
    ) -> SupportResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::debug!(method = %method, url = %url, "Sending Chatwoot request");

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("api_access_token", access_token.unwrap_or(&self.api_token));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(method = %method, url = %url, error = %e, "Chatwoot request failed");
            SupportError::Http(e)
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SupportError::NotFound(endpoint.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), endpoint = %endpoint, body = %body, "Chatwoot API returned error status");
            return Err(SupportError::Api {
                status: status.as_u16(),
                body,
                endpoint: endpoint.to_string(),
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        access_token: Option<&str>,
    ) -> SupportResult<T> {
        Ok(self
            .send(method, endpoint, body, access_token)
            .await?
            .json::<T>()
            .await?)
    }

    fn to_body<T: Serialize>(payload: &T) -> SupportResult<Value> {
        serde_json::to_value(payload).map_err(|e| SupportError::Validation(e.to_string()))
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    /// Returns the new account id
    pub async fn create_account(&self, account: &NewAccount) -> SupportResult<i64> {
        if account.name.trim().is_empty() {
            return Err(SupportError::Validation("account name is required".to_string()));
        }
        let created: Created = self
            .send_json(
                Method::POST,
                "/platform/api/v1/accounts",
                Some(Self::to_body(account)?),
                None,
            )
            .await?;
        require_id(created.id, "created account")?;
        Ok(created.id)
    }

    /// Returns `false` without calling out when there is nothing to change
    pub async fn update_account(&self, account_id: i64, update: &AccountUpdate) -> SupportResult<bool> {
        require_id(account_id, "account")?;
        if update.is_empty() {
            return Ok(false);
        }
        self.send(
            Method::PATCH,
            &format!("/platform/api/v1/accounts/{account_id}"),
            Some(Self::to_body(update)?),
            None,
        )
        .await?;
        Ok(true)
    }

    pub async fn delete_account(&self, account_id: i64) -> SupportResult<()> {
        require_id(account_id, "account")?;
        self.send(
            Method::DELETE,
            &format!("/platform/api/v1/accounts/{account_id}"),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Users
    // -------------------------------------------------------------------------

    pub async fn create_user(&self, name: &str, email: &str, password: &str) -> SupportResult<SupportUser> {
        if name.trim().is_empty() || password.is_empty() {
            return Err(SupportError::Validation(
                "name, email and password are required".to_string(),
            ));
        }
        if !is_valid_email(email.trim()) {
            return Err(SupportError::Validation(format!("invalid email: {email}")));
        }
        let user = NewUser {
            name: name.trim().to_string(),
            display_name: name.trim().to_string(),
            email: email.trim().to_lowercase(),
            password: password.to_string(),
        };
        self.send_json(
            Method::POST,
            "/platform/api/v1/users",
            Some(Self::to_body(&user)?),
            None,
        )
        .await
    }

    /// Attach an existing user to an account
    pub async fn create_account_user(
        &self,
        account_id: i64,
        user_id: i64,
        role: SupportRole,
    ) -> SupportResult<()> {
        require_id(account_id, "account")?;
        require_id(user_id, "user")?;
        self.send(
            Method::POST,
            &format!("/platform/api/v1/accounts/{account_id}/account_users"),
            Some(serde_json::json!({ "user_id": user_id, "role": role })),
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: i64) -> SupportResult<SupportUser> {
        require_id(user_id, "user")?;
        self.send_json(
            Method::GET,
            &format!("/platform/api/v1/users/{user_id}"),
            None,
            None,
        )
        .await
    }

    pub async fn update_user(&self, user_id: i64, update: &UserUpdate) -> SupportResult<bool> {
        require_id(user_id, "user")?;
        let mut update = update.clone();
        update.email = update.email.map(|e| e.trim().to_lowercase());
        if update.name.is_none() && update.email.is_none() && update.password.is_none() {
            return Ok(false);
        }
        update.display_name = update.name.clone();
        self.send(
            Method::PATCH,
            &format!("/platform/api/v1/users/{user_id}"),
            Some(Self::to_body(&update)?),
            None,
        )
        .await?;
        Ok(true)
    }

    pub async fn delete_user(&self, user_id: i64) -> SupportResult<()> {
        require_id(user_id, "user")?;
        self.send(
            Method::DELETE,
            &format!("/platform/api/v1/users/{user_id}"),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Account-scoped reads
    // -------------------------------------------------------------------------

    pub async fn list_agents(&self, account_id: i64, access_token: &str) -> SupportResult<Vec<Agent>> {
        require_id(account_id, "account")?;
        self.send_json(
            Method::GET,
            &format!("/api/v1/accounts/{account_id}/agents"),
            None,
            Some(access_token),
        )
        .await
    }

    pub async fn list_inboxes(&self, account_id: i64, access_token: &str) -> SupportResult<Vec<Inbox>> {
        require_id(account_id, "account")?;
        let list: InboxList = self
            .send_json(
                Method::GET,
                &format!("/api/v1/accounts/{account_id}/inboxes"),
                None,
                Some(access_token),
            )
            .await?;
        Ok(match list {
            InboxList::Wrapped { payload } => payload,
            InboxList::Plain(inboxes) => inboxes,
        })
    }
}
