//! Marketplace types for AgentMart
//!
//! Agents are listed for sale, rent or subscription. Every purchase or
//! rental start produces an immutable [`Transaction`] that is the source of
//! truth for seller earnings.

use crate::{AgentId, AgentMartError, ListingId, RentalId, TransactionId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How an agent is offered on the marketplace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    /// Ownership is transferred once
    Sale,
    /// Time-boxed exclusive use
    Rent,
    /// Recurring access
    Subscription,
}

impl fmt::Display for ListingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sale => "sale",
            Self::Rent => "rent",
            Self::Subscription => "subscription",
        };
        f.write_str(name)
    }
}

/// Standard rental periods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RentalDuration {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

/// Pricing structure of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingModel {
    /// Price charged for the sale or the rental start
    pub base_price: Decimal,
    /// Per-use fee for usage-based pricing
    pub usage_fee: Option<Decimal>,
    /// Recurring fee for subscriptions
    pub subscription_fee: Option<Decimal>,
    /// Rental period for time-based rentals
    pub duration: Option<RentalDuration>,
}

impl PricingModel {
    /// Flat price with no optional fees
    pub fn fixed(base_price: Decimal) -> Self {
        Self {
            base_price,
            usage_fee: None,
            subscription_fee: None,
            duration: None,
        }
    }

    pub fn with_usage_fee(mut self, fee: Decimal) -> Self {
        self.usage_fee = Some(fee);
        self
    }

    pub fn with_subscription_fee(mut self, fee: Decimal) -> Self {
        self.subscription_fee = Some(fee);
        self
    }

    pub fn with_duration(mut self, duration: RentalDuration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Reject negative prices
    pub fn validate(&self) -> Result<(), AgentMartError> {
        let fees = [
            ("base_price", Some(self.base_price)),
            ("usage_fee", self.usage_fee),
            ("subscription_fee", self.subscription_fee),
        ];
        for (field, value) in fees {
            if let Some(value) = value {
                if value < Decimal::ZERO {
                    return Err(AgentMartError::invalid_input(
                        field,
                        format!("must be non-negative, got {}", value),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Status of a marketplace listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListingStatus {
    /// Open for purchases and rentals
    Active,
    /// A sale listing that was bought
    Sold,
    /// Removed by the seller
    Withdrawn,
}

/// An agent offered on the marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub agent_id: AgentId,
    /// Owner of the agent at listing time
    pub seller_id: UserId,
    pub listing_type: ListingType,
    pub pricing: PricingModel,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }
}

/// Lifecycle state of a rental
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RentalStatus {
    Active,
    Cancelled,
    Completed,
}

/// Exclusive use of a rented agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rental {
    pub id: RentalId,
    pub listing_id: ListingId,
    pub renter_id: UserId,
    pub start_time: DateTime<Utc>,
    /// Set when the rental leaves the Active state
    pub end_time: Option<DateTime<Utc>>,
    pub usage_count: u64,
    pub status: RentalStatus,
}

impl Rental {
    /// Start a rental now
    pub fn start(listing_id: ListingId, renter_id: UserId) -> Self {
        Self {
            id: RentalId::new(),
            listing_id,
            renter_id,
            start_time: Utc::now(),
            end_time: None,
            usage_count: 0,
            status: RentalStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RentalStatus::Active
    }
}

/// Immutable record of a sale or rental start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub listing_id: ListingId,
    /// Agent whose earnings this transaction credits
    pub agent_id: AgentId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub amount: Decimal,
    pub transaction_type: ListingType,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Build the transaction for a purchase of `listing` at its current base price
    pub fn for_listing(listing: &Listing, buyer_id: UserId) -> Self {
        Self {
            id: TransactionId::new(),
            listing_id: listing.id.clone(),
            agent_id: listing.agent_id.clone(),
            buyer_id,
            seller_id: listing.seller_id.clone(),
            amount: listing.pricing.base_price,
            transaction_type: listing.listing_type,
            timestamp: Utc::now(),
        }
    }
}
