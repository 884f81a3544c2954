//! In-memory repositories backed by `dashmap`

use std::sync::atomic::{AtomicU64, Ordering};

use agentmart_types::{
    AgentId, AgentRecord, Listing, ListingId, Rental, RentalId, Transaction, TransactionId,
    UserId, UserProgress,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{AgentRepo, ListingRepo, ProgressRepo, RentalRepo, TransactionLog};
use crate::{DbError, DbResult};

#[derive(Default)]
pub struct MemoryAgentRepo {
    agents: DashMap<AgentId, AgentRecord>,
    /// transaction id -> credited agent
    credits: DashMap<TransactionId, AgentId>,
}

impl MemoryAgentRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepo for MemoryAgentRepo {
    async fn insert(&self, agent: &AgentRecord) -> DbResult<()> {
        if self.agents.contains_key(&agent.id) {
            return Err(DbError::Duplicate(agent.id.to_string()));
        }
        self.agents.insert(agent.id.clone(), agent.clone());
        Ok(())
    }

    async fn find(&self, id: &AgentId) -> DbResult<Option<AgentRecord>> {
        Ok(self.agents.get(id).map(|a| a.clone()))
    }

    async fn list(&self) -> DbResult<Vec<AgentRecord>> {
        let mut agents: Vec<AgentRecord> = self.agents.iter().map(|a| a.clone()).collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn list_by_owner(&self, owner_id: &UserId) -> DbResult<Vec<AgentRecord>> {
        let mut agents: Vec<AgentRecord> = self
            .agents
            .iter()
            .filter(|a| &a.owner_id == owner_id)
            .map(|a| a.clone())
            .collect();
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn update(&self, agent: &AgentRecord) -> DbResult<()> {
        match self.agents.get_mut(&agent.id) {
            Some(mut existing) => {
                *existing = agent.clone();
                Ok(())
            }
            None => Err(DbError::NotFound(agent.id.to_string())),
        }
    }

    async fn delete(&self, id: &AgentId) -> DbResult<bool> {
        Ok(self.agents.remove(id).is_some())
    }

    async fn update_credited(
        &self,
        agent: &AgentRecord,
        transaction_id: &TransactionId,
    ) -> DbResult<bool> {
        // the agent entry guard serializes credits to the same agent
        let Some(mut existing) = self.agents.get_mut(&agent.id) else {
            return Err(DbError::NotFound(agent.id.to_string()));
        };
        match self.credits.entry(transaction_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(marker) => {
                marker.insert(agent.id.clone());
                *existing = agent.clone();
                Ok(true)
            }
        }
    }

    async fn is_credited(&self, transaction_id: &TransactionId) -> DbResult<bool> {
        Ok(self.credits.contains_key(transaction_id))
    }
}

#[derive(Default)]
pub struct MemoryListingRepo {
    listings: DashMap<ListingId, Listing>,
    sequence: AtomicU64,
}

impl MemoryListingRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListingRepo for MemoryListingRepo {
    async fn next_sequence(&self) -> DbResult<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn insert(&self, listing: &Listing) -> DbResult<()> {
        if self.listings.contains_key(&listing.id) {
            return Err(DbError::Duplicate(listing.id.to_string()));
        }
        self.listings.insert(listing.id.clone(), listing.clone());
        Ok(())
    }

    async fn find(&self, id: &ListingId) -> DbResult<Option<Listing>> {
        Ok(self.listings.get(id).map(|l| l.clone()))
    }

    async fn update(&self, listing: &Listing) -> DbResult<()> {
        match self.listings.get_mut(&listing.id) {
            Some(mut existing) => {
                *existing = listing.clone();
                Ok(())
            }
            None => Err(DbError::NotFound(listing.id.to_string())),
        }
    }

    async fn list_active(&self) -> DbResult<Vec<Listing>> {
        let mut listings: Vec<Listing> = self
            .listings
            .iter()
            .filter(|l| l.is_active())
            .map(|l| l.clone())
            .collect();
        listings.sort_by_key(|l| l.created_at);
        Ok(listings)
    }

    async fn list_by_agent(&self, agent_id: &AgentId) -> DbResult<Vec<Listing>> {
        let mut listings: Vec<Listing> = self
            .listings
            .iter()
            .filter(|l| &l.agent_id == agent_id)
            .map(|l| l.clone())
            .collect();
        listings.sort_by_key(|l| l.created_at);
        Ok(listings)
    }
}

#[derive(Default)]
pub struct MemoryRentalRepo {
    rentals: DashMap<RentalId, Rental>,
}

impl MemoryRentalRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RentalRepo for MemoryRentalRepo {
    async fn insert(&self, rental: &Rental) -> DbResult<()> {
        if self.rentals.contains_key(&rental.id) {
            return Err(DbError::Duplicate(rental.id.to_string()));
        }
        self.rentals.insert(rental.id.clone(), rental.clone());
        Ok(())
    }

    async fn find(&self, id: &RentalId) -> DbResult<Option<Rental>> {
        Ok(self.rentals.get(id).map(|r| r.clone()))
    }

    async fn update(&self, rental: &Rental) -> DbResult<()> {
        match self.rentals.get_mut(&rental.id) {
            Some(mut existing) => {
                *existing = rental.clone();
                Ok(())
            }
            None => Err(DbError::NotFound(rental.id.to_string())),
        }
    }

    async fn delete(&self, id: &RentalId) -> DbResult<bool> {
        Ok(self.rentals.remove(id).is_some())
    }

    async fn find_active_for_listing(&self, listing_id: &ListingId) -> DbResult<Option<Rental>> {
        Ok(self
            .rentals
            .iter()
            .find(|r| &r.listing_id == listing_id && r.is_active())
            .map(|r| r.clone()))
    }

    async fn list_by_renter(&self, renter_id: &UserId) -> DbResult<Vec<Rental>> {
        let mut rentals: Vec<Rental> = self
            .rentals
            .iter()
            .filter(|r| &r.renter_id == renter_id)
            .map(|r| r.clone())
            .collect();
        rentals.sort_by_key(|r| r.start_time);
        Ok(rentals)
    }
}

#[derive(Default)]
pub struct MemoryTransactionLog {
    entries: RwLock<Vec<Transaction>>,
}

impl MemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLog for MemoryTransactionLog {
    async fn append(&self, transaction: &Transaction) -> DbResult<u64> {
        let mut entries = self.entries.write().await;
        if entries.iter().any(|t| t.id == transaction.id) {
            return Err(DbError::Duplicate(transaction.id.to_string()));
        }
        entries.push(transaction.clone());
        Ok(entries.len() as u64)
    }

    async fn find(&self, id: &TransactionId) -> DbResult<Option<Transaction>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|t| &t.id == id).cloned())
    }

    async fn len(&self) -> DbResult<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn list(&self) -> DbResult<Vec<Transaction>> {
        Ok(self.entries.read().await.clone())
    }

    async fn list_by_seller(&self, seller_id: &UserId) -> DbResult<Vec<Transaction>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|t| &t.seller_id == seller_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryProgressRepo {
    progress: DashMap<UserId, UserProgress>,
}

impl MemoryProgressRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressRepo for MemoryProgressRepo {
    async fn find(&self, user_id: &UserId) -> DbResult<Option<UserProgress>> {
        Ok(self.progress.get(user_id).map(|p| p.clone()))
    }

    async fn upsert(&self, progress: &UserProgress) -> DbResult<()> {
        self.progress.insert(progress.user_id.clone(), progress.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmart_types::{ListingStatus, ListingType, PricingModel, RentalStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn listing(agent: &AgentRecord, sequence: u64) -> Listing {
        Listing {
            id: ListingId::generate(sequence, &agent.id),
            agent_id: agent.id.clone(),
            seller_id: agent.owner_id.clone(),
            listing_type: ListingType::Rent,
            pricing: PricingModel::fixed(dec!(10)),
            status: ListingStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_agent_crud() {
        let repo = MemoryAgentRepo::new();
        let owner = UserId::new();
        let mut agent = AgentRecord::new(owner.clone(), "Scout", "");

        repo.insert(&agent).await.unwrap();
        assert!(matches!(repo.insert(&agent).await, Err(DbError::Duplicate(_))));

        agent.name = "Scout v2".to_string();
        repo.update(&agent).await.unwrap();
        assert_eq!(repo.find(&agent.id).await.unwrap().unwrap().name, "Scout v2");
        assert_eq!(repo.list_by_owner(&owner).await.unwrap().len(), 1);

        assert_eq!(repo.list().await.unwrap().len(), 1);

        assert!(repo.delete(&agent.id).await.unwrap());
        assert!(repo.find(&agent.id).await.unwrap().is_none());
        assert!(matches!(repo.update(&agent).await, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_credit_marker_is_written_once() {
        let repo = MemoryAgentRepo::new();
        let mut agent = AgentRecord::new(UserId::new(), "Scout", "");
        repo.insert(&agent).await.unwrap();
        let tx = TransactionId::new();

        agent.stats.record_earnings(dec!(10)).unwrap();
        assert!(repo.update_credited(&agent, &tx).await.unwrap());
        assert!(repo.is_credited(&tx).await.unwrap());

        // a second credit for the same transaction stores nothing
        let mut twice = agent.clone();
        twice.stats.record_earnings(dec!(10)).unwrap();
        assert!(!repo.update_credited(&twice, &tx).await.unwrap());
        let stored = repo.find(&agent.id).await.unwrap().unwrap();
        assert_eq!(stored.stats.earnings(), dec!(10));

        let ghost = AgentRecord::new(UserId::new(), "Ghost", "");
        let err = repo.update_credited(&ghost, &TransactionId::new()).await;
        assert!(matches!(err, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_listings_by_agent_include_closed() {
        let repo = MemoryListingRepo::new();
        let agent = AgentRecord::new(UserId::new(), "Scout", "");
        let other = AgentRecord::new(UserId::new(), "Other", "");

        let mut sold = listing(&agent, 1);
        sold.status = ListingStatus::Sold;
        repo.insert(&sold).await.unwrap();
        repo.insert(&listing(&agent, 2)).await.unwrap();
        repo.insert(&listing(&other, 3)).await.unwrap();

        let listings = repo.list_by_agent(&agent.id).await.unwrap();
        assert_eq!(listings.len(), 2);
        assert!(listings.iter().all(|l| l.agent_id == agent.id));
        assert_eq!(repo.list_active().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_listing_sequence_is_monotonic() {
        let repo = MemoryListingRepo::new();
        let first = repo.next_sequence().await.unwrap();
        let second = repo.next_sequence().await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_active_rental_lookup() {
        let repo = MemoryRentalRepo::new();
        let agent = AgentRecord::new(UserId::new(), "Scout", "");
        let listing = listing(&agent, 1);

        let mut rental = Rental::start(listing.id.clone(), UserId::new());
        repo.insert(&rental).await.unwrap();
        assert_eq!(
            repo.find_active_for_listing(&listing.id).await.unwrap().map(|r| r.id),
            Some(rental.id.clone())
        );

        rental.status = RentalStatus::Cancelled;
        repo.update(&rental).await.unwrap();
        assert!(repo.find_active_for_listing(&listing.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_keeps_append_order() {
        let log = MemoryTransactionLog::new();
        let agent = AgentRecord::new(UserId::new(), "Scout", "");
        let listing = listing(&agent, 1);

        let first = Transaction::for_listing(&listing, UserId::new());
        let second = Transaction::for_listing(&listing, UserId::new());
        assert_eq!(log.append(&first).await.unwrap(), 1);
        assert_eq!(log.append(&second).await.unwrap(), 2);
        assert!(log.append(&first).await.is_err());

        let ids: Vec<_> = log.list().await.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first.id.clone(), second.id]);
        assert_eq!(log.list_by_seller(&agent.owner_id).await.unwrap().len(), 2);
        assert_eq!(log.len().await.unwrap(), 2);
        assert!(log.find(&first.id).await.unwrap().is_some());
    }
}
