//! Listing book: create, read and withdraw marketplace listings

use std::sync::Arc;

use agentmart_db::{EntityLocks, Storage};
use agentmart_ledger::StatsLedger;
use agentmart_types::{
    AgentId, AgentMartError, Listing, ListingId, ListingStatus, ListingType, PricingModel, Result,
    UserId,
};
use chrono::Utc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ListingBook {
    storage: Storage,
    ledger: StatsLedger,
    locks: Arc<EntityLocks<ListingId>>,
}

impl ListingBook {
    pub fn new(storage: Storage, ledger: StatsLedger, locks: Arc<EntityLocks<ListingId>>) -> Self {
        Self {
            storage,
            ledger,
            locks,
        }
    }

    /// List an agent; the seller is the agent's owner. An agent that has
    /// already been sold cannot be listed again.
    pub async fn create_listing(
        &self,
        agent_id: &AgentId,
        listing_type: ListingType,
        pricing: PricingModel,
    ) -> Result<Listing> {
        pricing.validate()?;
        // held until the insert so a concurrent delete_agent sees the listing
        let _agent_guard = self.ledger.lock_agent(agent_id).await;
        let agent = self
            .storage
            .agents
            .find(agent_id)
            .await?
            .ok_or_else(|| AgentMartError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })?;
        if let Some(sold) = sale_of(&self.storage, agent_id, &agent.owner_id).await? {
            return Err(AgentMartError::AgentSold {
                agent_id: agent_id.to_string(),
                listing_id: sold.to_string(),
            });
        }

        let sequence = self.storage.listings.next_sequence().await?;
        let listing = Listing {
            id: ListingId::generate(sequence, agent_id),
            agent_id: agent_id.clone(),
            seller_id: agent.owner_id,
            listing_type,
            pricing,
            status: ListingStatus::Active,
            created_at: Utc::now(),
        };
        self.storage.listings.insert(&listing).await?;

        info!(
            listing = %listing.id,
            agent = %agent_id,
            seller = %listing.seller_id,
            listing_type = %listing_type,
            price = %listing.pricing.base_price,
            "Listing created"
        );
        Ok(listing)
    }

    pub async fn listing(&self, listing_id: &ListingId) -> Result<Listing> {
        self.storage
            .listings
            .find(listing_id)
            .await?
            .ok_or_else(|| AgentMartError::ListingNotFound {
                listing_id: listing_id.to_string(),
            })
    }

    pub async fn active_listings(&self) -> Result<Vec<Listing>> {
        Ok(self.storage.listings.list_active().await?)
    }

    /// Close a SALE listing whose sale is logged but whose Sold update was
    /// lost. Returns whether the listing changed.
    pub async fn mark_sold(&self, listing_id: &ListingId) -> Result<bool> {
        let _guard = self.locks.lock(listing_id).await;
        let Some(mut listing) = self.storage.listings.find(listing_id).await? else {
            debug!(listing = %listing_id, "Listing gone, nothing to close");
            return Ok(false);
        };
        if listing.listing_type != ListingType::Sale || listing.status == ListingStatus::Sold {
            return Ok(false);
        }
        listing.status = ListingStatus::Sold;
        self.storage.listings.update(&listing).await?;
        info!(listing = %listing_id, "Listing closed as sold");
        Ok(true)
    }

    /// Take a listing off the market. Withdrawing twice is a no-op; a sold
    /// listing cannot be withdrawn.
    pub async fn withdraw_listing(&self, listing_id: &ListingId) -> Result<Listing> {
        let _guard = self.locks.lock(listing_id).await;
        let mut listing = self.listing(listing_id).await?;

        match listing.status {
            ListingStatus::Withdrawn => {
                debug!(listing = %listing_id, "Listing already withdrawn");
                Ok(listing)
            }
            ListingStatus::Sold => Err(AgentMartError::ListingNotActive {
                listing_id: listing_id.to_string(),
            }),
            ListingStatus::Active => {
                listing.status = ListingStatus::Withdrawn;
                self.storage.listings.update(&listing).await?;
                info!(listing = %listing_id, "Listing withdrawn");
                Ok(listing)
            }
        }
    }
}

/// The listing through which `agent_id` was sold, if any. Checks listing
/// status first, then the transaction log, which is ahead of the listing
/// when a Sold update is still pending.
pub(crate) async fn sale_of(
    storage: &Storage,
    agent_id: &AgentId,
    owner_id: &UserId,
) -> Result<Option<ListingId>> {
    let listings = storage.listings.list_by_agent(agent_id).await?;
    if let Some(sold) = listings.iter().find(|l| l.status == ListingStatus::Sold) {
        return Ok(Some(sold.id.clone()));
    }
    let sold = storage
        .transactions
        .list_by_seller(owner_id)
        .await?
        .into_iter()
        .find(|tx| &tx.agent_id == agent_id && tx.transaction_type == ListingType::Sale)
        .map(|tx| tx.listing_id);
    Ok(sold)
}
