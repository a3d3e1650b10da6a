//! Starchat Support
//!
//! Chatwoot platform integration: one support account per tenant, seat
//! limits pushed from the tenant's plan, and live agent/inbox usage read
//! back for the seat-limit guard.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod client;
pub mod config;
pub mod error;
pub mod features;
pub mod service;

pub use client::{ChatwootClient, SupportRole};
pub use config::ChatwootConfig;
pub use error::{SupportError, SupportResult};
pub use service::ChatwootService;
