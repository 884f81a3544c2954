//! AgentMart Types - Canonical domain types for the agent marketplace
//!
//! This crate contains all foundational types for AgentMart with zero
//! dependencies on other agentmart crates. It defines:
//!
//! - Identity types (UserId, AgentId, ListingId, RentalId, ...)
//! - Agent records and their statistics
//! - Marketplace listings, rentals and transactions
//! - Achievements, user progress and leaderboard entries
//! - Follow-up work derived from durable writes
//! - The error taxonomy shared by every crate
//!
//! # Bookkeeping Flow
//!
//! ```text
//! Task completion → Statistics → Achievements → Leaderboards
//! Sale / Rental   → Transaction log → Seller statistics → Achievements
//! ```

pub mod identity;
pub mod agent;
pub mod marketplace;
pub mod gamification;
pub mod followup;
pub mod error;

pub use identity::*;
pub use agent::*;
pub use marketplace::*;
pub use gamification::*;
pub use followup::*;
pub use error::*;

/// Money amounts are exact decimals.
pub use rust_decimal::Decimal;

/// Version of the AgentMart types schema
pub const TYPES_VERSION: &str = "0.1.0";
