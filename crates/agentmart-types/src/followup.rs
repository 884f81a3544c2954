//! Follow-up work derived from durable writes
//!
//! A transaction append is the durability boundary. Everything derived from
//! it is expressed as a [`FollowUp`] so it can be retried in the background
//! when it fails inline. Every variant is idempotent.

use crate::{AgentId, ListingId, TransactionId, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FollowUp {
    /// Close a sale listing that was bought
    MarkListingSold { listing_id: ListingId },
    /// Credit a logged transaction to the agent's earnings
    CreditEarnings {
        agent_id: AgentId,
        transaction_id: TransactionId,
        amount: Decimal,
    },
    /// Run an achievement pass for a user
    EvaluateAchievements { user_id: UserId },
    /// Push an agent's current statistics to the leaderboards
    RefreshLeaderboards { agent_id: AgentId },
}

impl FollowUp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MarkListingSold { .. } => "mark_listing_sold",
            Self::CreditEarnings { .. } => "credit_earnings",
            Self::EvaluateAchievements { .. } => "evaluate_achievements",
            Self::RefreshLeaderboards { .. } => "refresh_leaderboards",
        }
    }
}

impl fmt::Display for FollowUp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkListingSold { listing_id } => write!(f, "close {}", listing_id),
            Self::CreditEarnings {
                agent_id,
                transaction_id,
                amount,
            } => write!(f, "credit {} to {} for {}", amount, agent_id, transaction_id),
            Self::EvaluateAchievements { user_id } => write!(f, "evaluate {}", user_id),
            Self::RefreshLeaderboards { agent_id } => write!(f, "refresh {}", agent_id),
        }
    }
}
