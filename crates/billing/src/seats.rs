//! Seat-limit guard
//!
//! A limit may never be lowered below what the tenant already uses on the
//! support platform.

use starchat_shared::{AccountId, SeatKind, SeatUsage, SupportDirectory};

use crate::error::{BillingError, BillingResult};

/// Requested seat totals for one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatTotals {
    pub agents: i32,
    pub inboxes: i32,
}

impl SeatTotals {
    pub fn get(&self, kind: SeatKind) -> i32 {
        match kind {
            SeatKind::Agents => self.agents,
            SeatKind::Inboxes => self.inboxes,
        }
    }
}

/// Permit `requested_total` only when current usage is known and fits
pub fn check_seat_limit(kind: SeatKind, used: Option<i32>, requested_total: i32) -> BillingResult<()> {
    let used = used.ok_or(BillingError::UsageUnavailable(kind))?;
    if used > requested_total {
        return Err(BillingError::SeatLimit {
            kind,
            used,
            total: requested_total,
        });
    }
    Ok(())
}

/// Check both seat kinds against live usage read from the support platform
pub async fn guard_seat_limits<D: SupportDirectory>(
    support: &D,
    account_id: AccountId,
    totals: SeatTotals,
) -> BillingResult<()> {
    let usage: Option<SeatUsage> = match support.seat_usage(account_id).await {
        Ok(usage) => Some(usage),
        Err(err) => {
            tracing::warn!(account_id = %account_id, error = %err, "Could not read seat usage");
            None
        }
    };

    for kind in [SeatKind::Agents, SeatKind::Inboxes] {
        check_seat_limit(kind, usage.map(|u| u.used(kind)), totals.get(kind))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSupport;

    #[test]
    fn test_usage_above_total_is_rejected() {
        let err = check_seat_limit(SeatKind::Agents, Some(5), 3).unwrap_err();
        assert_eq!(
            err.to_string(),
            "You already use 5 agents. To change the limit to 3, reduce usage first."
        );
    }

    #[test]
    fn test_usage_at_total_is_permitted() {
        assert!(check_seat_limit(SeatKind::Inboxes, Some(3), 3).is_ok());
        assert!(check_seat_limit(SeatKind::Inboxes, Some(0), 1).is_ok());
    }

    #[test]
    fn test_unreadable_usage_is_rejected() {
        assert!(matches!(
            check_seat_limit(SeatKind::Agents, None, 10),
            Err(BillingError::UsageUnavailable(SeatKind::Agents))
        ));
    }

    #[tokio::test]
    async fn test_guard_checks_both_kinds() {
        let support = FakeSupport::with_usage(2, 4);
        let totals = SeatTotals {
            agents: 2,
            inboxes: 3,
        };
        let err = guard_seat_limits(&support, AccountId(1), totals)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BillingError::SeatLimit {
                kind: SeatKind::Inboxes,
                used: 4,
                total: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_guard_without_usage_fails_closed() {
        let support = FakeSupport::default();
        let totals = SeatTotals {
            agents: 100,
            inboxes: 100,
        };
        assert!(guard_seat_limits(&support, AccountId(1), totals).await.is_err());
    }
}
