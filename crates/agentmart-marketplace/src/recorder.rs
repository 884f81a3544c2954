//! Transaction recorder
//!
//! The log append is the only step that can fail the caller. Everything
//! after it (closing a sold listing, seller earnings, achievement pass,
//! leaderboard refresh) is returned as follow-up work instead.
//!
//! The log is the source of truth for sales: a SALE listing whose Sold
//! update is still pending is refused here because its sale is already
//! logged.

use std::sync::Arc;

use agentmart_db::{EntityLocks, Storage};
use agentmart_ledger::StatsLedger;
use crate::listings::sale_of;
use agentmart_types::{
    AgentMartError, FollowUp, Listing, ListingId, ListingStatus, ListingType, Result, Transaction,
    UserId,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// A logged transaction plus the derived work still owed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedTransaction {
    pub transaction: Transaction,
    pub followups: Vec<FollowUp>,
}

#[derive(Clone)]
pub struct TransactionRecorder {
    storage: Storage,
    ledger: StatsLedger,
    locks: Arc<EntityLocks<ListingId>>,
}

impl TransactionRecorder {
    pub fn new(storage: Storage, ledger: StatsLedger, locks: Arc<EntityLocks<ListingId>>) -> Self {
        Self {
            storage,
            ledger,
            locks,
        }
    }

    /// Record a purchase of `listing_id` by `buyer_id` at the listing's base price
    pub async fn record_transaction(
        &self,
        listing_id: &ListingId,
        buyer_id: &UserId,
    ) -> Result<RecordedTransaction> {
        let _guard = self.locks.lock(listing_id).await;
        let listing = self
            .storage
            .listings
            .find(listing_id)
            .await?
            .ok_or_else(|| AgentMartError::ListingNotFound {
                listing_id: listing_id.to_string(),
            })?;
        if !listing.is_active() {
            return Err(AgentMartError::ListingNotActive {
                listing_id: listing_id.to_string(),
            });
        }
        self.record_locked(listing, buyer_id).await
    }

    /// Record against an already validated listing. The caller holds the
    /// listing lock.
    pub(crate) async fn record_locked(
        &self,
        mut listing: Listing,
        buyer_id: &UserId,
    ) -> Result<RecordedTransaction> {
        if listing.listing_type == ListingType::Sale {
            self.ensure_unsold(&mut listing).await?;
        }

        let transaction = Transaction::for_listing(&listing, buyer_id.clone());
        let sequence = self.storage.transactions.append(&transaction).await?;
        info!(
            tx = %transaction.id,
            sequence,
            listing = %listing.id,
            buyer = %buyer_id,
            seller = %transaction.seller_id,
            amount = %transaction.amount,
            kind = %transaction.transaction_type,
            "Transaction recorded"
        );

        let mut followups = Vec::with_capacity(4);
        if listing.listing_type == ListingType::Sale {
            listing.status = ListingStatus::Sold;
            if let Err(e) = self.storage.listings.update(&listing).await {
                warn!(listing = %listing.id, error = %e, "Listing close deferred");
                followups.push(FollowUp::MarkListingSold {
                    listing_id: listing.id.clone(),
                });
            }
        }

        if let Err(e) = self
            .ledger
            .credit_sale(&transaction.agent_id, &transaction.id, transaction.amount)
            .await
        {
            warn!(
                tx = %transaction.id,
                agent = %transaction.agent_id,
                error = %e,
                "Earnings credit deferred"
            );
            followups.push(FollowUp::CreditEarnings {
                agent_id: transaction.agent_id.clone(),
                transaction_id: transaction.id.clone(),
                amount: transaction.amount,
            });
        }
        followups.push(FollowUp::EvaluateAchievements {
            user_id: transaction.seller_id.clone(),
        });
        followups.push(FollowUp::RefreshLeaderboards {
            agent_id: transaction.agent_id.clone(),
        });

        Ok(RecordedTransaction {
            transaction,
            followups,
        })
    }

    /// Refuse a second sale of the same agent. A logged sale of this very
    /// listing means its Sold update never landed; close it now.
    async fn ensure_unsold(&self, listing: &mut Listing) -> Result<()> {
        let sold = sale_of(&self.storage, &listing.agent_id, &listing.seller_id).await?;
        let Some(sold) = sold else {
            return Ok(());
        };
        if sold != listing.id {
            return Err(AgentMartError::AgentSold {
                agent_id: listing.agent_id.to_string(),
                listing_id: sold.to_string(),
            });
        }
        if listing.status != ListingStatus::Sold {
            listing.status = ListingStatus::Sold;
            match self.storage.listings.update(listing).await {
                Ok(()) => info!(listing = %listing.id, "Closed listing with a logged sale"),
                Err(e) => warn!(listing = %listing.id, error = %e, "Failed to close sold listing"),
            }
        }
        Err(AgentMartError::ListingNotActive {
            listing_id: listing.id.to_string(),
        })
    }

    /// Every logged transaction in append order
    pub async fn transactions(&self) -> Result<Vec<Transaction>> {
        Ok(self.storage.transactions.list().await?)
    }
}
