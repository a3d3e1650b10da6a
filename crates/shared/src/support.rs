//! Seam between billing and the customer-support platform

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::StarchatResult;
use crate::types::{Account, AccountId, Plan, SeatKind};

/// Seats currently in use on the support platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatUsage {
    pub agents: i32,
    pub inboxes: i32,
}

impl SeatUsage {
    pub fn used(&self, kind: SeatKind) -> i32 {
        match kind {
            SeatKind::Agents => self.agents,
            SeatKind::Inboxes => self.inboxes,
        }
    }
}

/// Support-platform operations the billing side depends on
pub trait SupportDirectory: Send + Sync {
    /// Create the support account and owner user if the account has none yet
    fn provision(
        &self,
        account: &Account,
        plan: Option<&Plan>,
    ) -> impl Future<Output = StarchatResult<()>> + Send;

    /// Push seat limits derived from `plan` and the account's extras
    fn sync_limits(
        &self,
        account: &Account,
        plan: &Plan,
    ) -> impl Future<Output = StarchatResult<()>> + Send;

    /// Tear down the support account linked to `account_id`
    fn remove(&self, account_id: AccountId) -> impl Future<Output = StarchatResult<()>> + Send;

    /// Agents and inboxes currently in use
    fn seat_usage(
        &self,
        account_id: AccountId,
    ) -> impl Future<Output = StarchatResult<SeatUsage>> + Send;
}
