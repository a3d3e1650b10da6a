//! Starchat Billing
//!
//! Keeps Stripe and the local plan/account records in step:
//! - Plan products and prices mirrored into Stripe
//! - Account plan and add-on extras projected from subscriptions
//! - Subscribe, plan change and cancellation flows (card, boleto, pix)
//! - Customer records mirrored from accounts and billing addresses
//! - Saved card management and the customer invoice list
//! - After-commit event dispatch and webhook intake

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod checkout;
pub mod client;
pub mod customer;
pub mod error;
pub mod events;
pub mod gateway;
pub mod idempotency;
pub mod invoices;
pub mod payment_methods;
pub mod plan_sync;
pub mod portal;
pub mod seats;
pub mod stripe_api;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod testing;

pub use checkout::{
    CancelWhen, CheckoutOrchestrator, CheckoutOutcome, Notice, NoticeLevel, PayMode,
    SubscribeRequest,
};
pub use client::{PaymentMethodConfigurations, StripeClient, StripeConfig};
pub use customer::CustomerSync;
pub use error::{BillingError, BillingResult};
pub use events::{DomainEvent, Outbox, Reconciler};
pub use gateway::{
    BillingGateway, CardDetails, InvoiceState, RemoteInvoice, RemoteSubscription, SubscriptionStatus,
};
pub use invoices::{list_customer_invoices, InvoicePage, InvoiceQuery};
pub use payment_methods::{PaymentMethodService, PaymentMethodsOverview, SavedCard};
pub use plan_sync::{PlanSyncReport, PlanSynchronizer, ResyncSummary};
pub use portal::{PortalResponse, PortalService};
pub use seats::{check_seat_limit, guard_seat_limits, SeatTotals};
pub use subscriptions::SubscriptionProjector;
