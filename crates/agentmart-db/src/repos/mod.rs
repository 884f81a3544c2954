//! Repository traits
//!
//! One trait per entity. Components receive them through [`crate::Storage`]
//! and never see the backend. Implementations only persist; invariants are
//! enforced by the callers holding the entity lock.

mod memory;
mod sled_store;

pub use self::memory::{
    MemoryAgentRepo, MemoryListingRepo, MemoryProgressRepo, MemoryRentalRepo,
    MemoryTransactionLog,
};
pub use self::sled_store::{
    SledAgentRepo, SledListingRepo, SledProgressRepo, SledRentalRepo, SledTransactionLog,
};

use agentmart_types::{
    AgentId, AgentRecord, Listing, ListingId, Rental, RentalId, Transaction, TransactionId,
    UserId, UserProgress,
};
use async_trait::async_trait;

use crate::DbResult;

#[async_trait]
pub trait AgentRepo: Send + Sync {
    /// Fails with `Duplicate` if the id is taken
    async fn insert(&self, agent: &AgentRecord) -> DbResult<()>;
    async fn find(&self, id: &AgentId) -> DbResult<Option<AgentRecord>>;
    /// Every agent, oldest first
    async fn list(&self) -> DbResult<Vec<AgentRecord>>;
    /// Agents of one owner, oldest first
    async fn list_by_owner(&self, owner_id: &UserId) -> DbResult<Vec<AgentRecord>>;
    /// Fails with `NotFound` if the agent does not exist
    async fn update(&self, agent: &AgentRecord) -> DbResult<()>;
    /// Returns whether an agent was removed
    async fn delete(&self, id: &AgentId) -> DbResult<bool>;

    /// Store `agent` and record `transaction_id` as credited to it, as one
    /// write. Returns `false` and stores nothing if the transaction already
    /// carries a credit marker.
    ///
    /// Markers are kept apart from the agent record, one entry per
    /// transaction, so the record does not grow with its sales.
    async fn update_credited(
        &self,
        agent: &AgentRecord,
        transaction_id: &TransactionId,
    ) -> DbResult<bool>;
    async fn is_credited(&self, transaction_id: &TransactionId) -> DbResult<bool>;
}

#[async_trait]
pub trait ListingRepo: Send + Sync {
    /// Monotonic sequence used to build listing ids
    async fn next_sequence(&self) -> DbResult<u64>;
    async fn insert(&self, listing: &Listing) -> DbResult<()>;
    async fn find(&self, id: &ListingId) -> DbResult<Option<Listing>>;
    async fn update(&self, listing: &Listing) -> DbResult<()>;
    /// Active listings, oldest first
    async fn list_active(&self) -> DbResult<Vec<Listing>>;
    /// Every listing of one agent whatever its status, oldest first
    async fn list_by_agent(&self, agent_id: &AgentId) -> DbResult<Vec<Listing>>;
}

#[async_trait]
pub trait RentalRepo: Send + Sync {
    async fn insert(&self, rental: &Rental) -> DbResult<()>;
    async fn find(&self, id: &RentalId) -> DbResult<Option<Rental>>;
    async fn update(&self, rental: &Rental) -> DbResult<()>;
    async fn delete(&self, id: &RentalId) -> DbResult<bool>;
    async fn find_active_for_listing(&self, listing_id: &ListingId) -> DbResult<Option<Rental>>;
    /// Rentals of one renter, oldest first
    async fn list_by_renter(&self, renter_id: &UserId) -> DbResult<Vec<Rental>>;
}

/// Append-only transaction log; there is no update or delete.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Append and return the entry's sequence number
    async fn append(&self, transaction: &Transaction) -> DbResult<u64>;
    async fn find(&self, id: &TransactionId) -> DbResult<Option<Transaction>>;
    async fn len(&self) -> DbResult<usize>;
    /// Every entry in append order
    async fn list(&self) -> DbResult<Vec<Transaction>>;
    async fn list_by_seller(&self, seller_id: &UserId) -> DbResult<Vec<Transaction>>;
}

#[async_trait]
pub trait ProgressRepo: Send + Sync {
    async fn find(&self, user_id: &UserId) -> DbResult<Option<UserProgress>>;
    async fn upsert(&self, progress: &UserProgress) -> DbResult<()>;
}
