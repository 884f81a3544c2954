//! Rental lifecycle
//!
//! ```text
//! create ──► Active ──► Cancelled
//!              │
//!              └──────► Completed
//! ```
//!
//! At most one Active rental exists per listing. The conflict check and the
//! insert run under the listing lock.

use std::sync::Arc;

use agentmart_db::{EntityLocks, Storage};
use agentmart_types::{
    AgentMartError, ListingId, ListingType, Rental, RentalId, RentalStatus, Result, UserId,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{RecordedTransaction, TransactionRecorder};

/// A new rental and the transaction that started it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedRental {
    pub rental: Rental,
    pub recorded: RecordedTransaction,
}

#[derive(Clone)]
pub struct RentalManager {
    storage: Storage,
    recorder: TransactionRecorder,
    listing_locks: Arc<EntityLocks<ListingId>>,
    rental_locks: Arc<EntityLocks<RentalId>>,
}

impl RentalManager {
    pub fn new(
        storage: Storage,
        recorder: TransactionRecorder,
        listing_locks: Arc<EntityLocks<ListingId>>,
    ) -> Self {
        Self {
            storage,
            recorder,
            listing_locks,
            rental_locks: Arc::new(EntityLocks::new()),
        }
    }

    /// Start renting an active RENT listing
    pub async fn create_rental(
        &self,
        listing_id: &ListingId,
        renter_id: &UserId,
    ) -> Result<StartedRental> {
        let _guard = self.listing_locks.lock(listing_id).await;

        let listing = self
            .storage
            .listings
            .find(listing_id)
            .await?
            .ok_or_else(|| AgentMartError::invalid_listing(listing_id, "listing does not exist"))?;
        if listing.listing_type != ListingType::Rent {
            return Err(AgentMartError::invalid_listing(
                listing_id,
                format!("{} listings cannot be rented", listing.listing_type),
            ));
        }
        if !listing.is_active() {
            return Err(AgentMartError::invalid_listing(listing_id, "listing is not active"));
        }
        if let Some(existing) = self.storage.rentals.find_active_for_listing(listing_id).await? {
            return Err(AgentMartError::RentalConflict {
                listing_id: listing_id.to_string(),
                rental_id: existing.id.to_string(),
            });
        }

        let rental = Rental::start(listing_id.clone(), renter_id.clone());
        self.storage.rentals.insert(&rental).await?;

        let recorded = match self.recorder.record_locked(listing, renter_id).await {
            Ok(recorded) => recorded,
            Err(e) => {
                if let Err(undo) = self.storage.rentals.delete(&rental.id).await {
                    error!(rental = %rental.id, error = %undo, "Failed to undo rental insert");
                }
                return Err(e);
            }
        };

        info!(
            rental = %rental.id,
            listing = %listing_id,
            renter = %renter_id,
            tx = %recorded.transaction.id,
            "Rental started"
        );
        Ok(StartedRental { rental, recorded })
    }

    /// Count one use of an active rental
    pub async fn record_usage(&self, rental_id: &RentalId) -> Result<Rental> {
        let _guard = self.rental_locks.lock(rental_id).await;
        let mut rental = self.rental(rental_id).await?;
        if !rental.is_active() {
            return Err(AgentMartError::RentalNotFound {
                rental_id: rental_id.to_string(),
            });
        }
        rental.usage_count += 1;
        self.storage.rentals.update(&rental).await?;
        debug!(rental = %rental_id, usage = rental.usage_count, "Rental usage recorded");
        Ok(rental)
    }

    /// End a rental early. Cancelling twice returns the same state, and a
    /// completed rental is returned unchanged.
    pub async fn cancel_rental(&self, rental_id: &RentalId) -> Result<Rental> {
        let _guard = self.rental_locks.lock(rental_id).await;
        let mut rental = self.rental(rental_id).await?;
        match rental.status {
            RentalStatus::Active => {
                rental.status = RentalStatus::Cancelled;
                rental.end_time = Some(Utc::now());
                self.storage.rentals.update(&rental).await?;
                info!(rental = %rental_id, usage = rental.usage_count, "Rental cancelled");
            }
            RentalStatus::Cancelled | RentalStatus::Completed => {
                debug!(rental = %rental_id, status = ?rental.status, "Rental already ended");
            }
        }
        Ok(rental)
    }

    /// End a rental normally. Completing twice returns the same state.
    pub async fn complete_rental(&self, rental_id: &RentalId) -> Result<Rental> {
        let _guard = self.rental_locks.lock(rental_id).await;
        let mut rental = self.rental(rental_id).await?;
        match rental.status {
            RentalStatus::Active => {
                rental.status = RentalStatus::Completed;
                rental.end_time = Some(Utc::now());
                self.storage.rentals.update(&rental).await?;
                info!(rental = %rental_id, usage = rental.usage_count, "Rental completed");
                Ok(rental)
            }
            RentalStatus::Completed => Ok(rental),
            RentalStatus::Cancelled => Err(AgentMartError::invalid_input(
                "rental_id",
                format!("rental {} was cancelled", rental_id),
            )),
        }
    }

    pub async fn rental(&self, rental_id: &RentalId) -> Result<Rental> {
        self.storage
            .rentals
            .find(rental_id)
            .await?
            .ok_or_else(|| AgentMartError::RentalNotFound {
                rental_id: rental_id.to_string(),
            })
    }

    pub async fn rentals_for_renter(&self, renter_id: &UserId) -> Result<Vec<Rental>> {
        Ok(self.storage.rentals.list_by_renter(renter_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FailingLog;
    use crate::Marketplace;
    use agentmart_ledger::StatsLedger;
    use agentmart_types::{AgentRecord, ErrorKind, Listing, PricingModel, RentalDuration};
    use rust_decimal_macros::dec;

    async fn market_with_listing(
        storage: Storage,
        listing_type: ListingType,
    ) -> (Marketplace, StatsLedger, AgentRecord, Listing) {
        let ledger = StatsLedger::new(storage.clone());
        let agent = ledger
            .register_agent(&UserId::new(), "Planner", "Plans trips")
            .await
            .unwrap();
        let market = Marketplace::new(storage, ledger.clone());
        let listing = market
            .listings
            .create_listing(
                &agent.id,
                listing_type,
                PricingModel::fixed(dec!(30))
                    .with_usage_fee(dec!(1))
                    .with_duration(RentalDuration::Weekly),
            )
            .await
            .unwrap();
        (market, ledger, agent, listing)
    }

    #[tokio::test]
    async fn test_rent_use_cancel() {
        let (market, ledger, agent, listing) =
            market_with_listing(Storage::in_memory(), ListingType::Rent).await;
        let renter = UserId::new();

        let started = market.rentals.create_rental(&listing.id, &renter).await.unwrap();
        assert_eq!(started.rental.status, RentalStatus::Active);
        assert_eq!(started.recorded.transaction.amount, dec!(30));
        assert_eq!(ledger.stats(&agent.id).await.unwrap().earnings(), dec!(30));

        let rental_id = started.rental.id.clone();
        market.rentals.record_usage(&rental_id).await.unwrap();
        let used = market.rentals.record_usage(&rental_id).await.unwrap();
        assert_eq!(used.usage_count, 2);

        let cancelled = market.rentals.cancel_rental(&rental_id).await.unwrap();
        assert_eq!(cancelled.status, RentalStatus::Cancelled);
        assert!(cancelled.end_time.is_some());

        let again = market.rentals.cancel_rental(&rental_id).await.unwrap();
        assert_eq!(again, cancelled);

        let err = market.rentals.record_usage(&rental_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(market.rentals.rentals_for_renter(&renter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_active_rental_conflicts() {
        let (market, _, _, listing) =
            market_with_listing(Storage::in_memory(), ListingType::Rent).await;

        let first = market
            .rentals
            .create_rental(&listing.id, &UserId::new())
            .await
            .unwrap();
        let err = market
            .rentals
            .create_rental(&listing.id, &UserId::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        market.rentals.complete_rental(&first.rental.id).await.unwrap();
        assert!(market
            .rentals
            .create_rental(&listing.id, &UserId::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_rentals_admit_one() {
        let (market, _, _, listing) =
            market_with_listing(Storage::in_memory(), ListingType::Rent).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let rentals = market.rentals.clone();
            let listing_id = listing.id.clone();
            handles.push(tokio::spawn(async move {
                rentals.create_rental(&listing_id, &UserId::new()).await
            }));
        }
        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_only_active_rent_listings_can_be_rented() {
        let (market, _, _, sale) =
            market_with_listing(Storage::in_memory(), ListingType::Sale).await;
        let err = market
            .rentals
            .create_rental(&sale.id, &UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentMartError::InvalidListing { .. }));

        let missing = ListingId::generate(404, &sale.agent_id);
        let err = market
            .rentals
            .create_rental(&missing, &UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentMartError::InvalidListing { .. }));

        let (market, _, _, rent) =
            market_with_listing(Storage::in_memory(), ListingType::Rent).await;
        market.listings.withdraw_listing(&rent.id).await.unwrap();
        let err = market
            .rentals
            .create_rental(&rent.id, &UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentMartError::InvalidListing { .. }));
    }

    #[tokio::test]
    async fn test_log_failure_undoes_rental() {
        let storage = Storage::in_memory().with_transaction_log(Arc::new(FailingLog));
        let (market, _, _, listing) = market_with_listing(storage.clone(), ListingType::Rent).await;
        let renter = UserId::new();

        let err = market
            .rentals
            .create_rental(&listing.id, &renter)
            .await
            .unwrap_err();
        assert!(err.is_retriable());
        assert!(storage
            .rentals
            .find_active_for_listing(&listing.id)
            .await
            .unwrap()
            .is_none());
        assert!(market.rentals.rentals_for_renter(&renter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_rental_transitions() {
        let (market, _, _, listing) =
            market_with_listing(Storage::in_memory(), ListingType::Rent).await;
        let started = market
            .rentals
            .create_rental(&listing.id, &UserId::new())
            .await
            .unwrap();

        let completed = market.rentals.complete_rental(&started.rental.id).await.unwrap();
        assert_eq!(completed.status, RentalStatus::Completed);
        assert_eq!(
            market.rentals.complete_rental(&started.rental.id).await.unwrap(),
            completed
        );
        // cancelling a completed rental leaves it completed
        assert_eq!(
            market.rentals.cancel_rental(&started.rental.id).await.unwrap(),
            completed
        );

        let second = market
            .rentals
            .create_rental(&listing.id, &UserId::new())
            .await
            .unwrap();
        market.rentals.cancel_rental(&second.rental.id).await.unwrap();
        let err = market
            .rentals
            .complete_rental(&second.rental.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = market.rentals.cancel_rental(&RentalId::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
