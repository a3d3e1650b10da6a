//! Starchat Shared Types and Utilities
//!
//! Entities, persistence and the support-platform seam shared by the
//! billing, support and API crates.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod db;
pub mod error;
pub mod postgres;
pub mod store;
pub mod support;
pub mod types;

pub use db::*;
pub use error::*;
pub use postgres::PgStore;
pub use store::{free_plan, EntityStore, MemoryStore};
pub use support::{SeatUsage, SupportDirectory};
pub use types::*;
