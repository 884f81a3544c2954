//! Durable repositories on an embedded sled database
//!
//! Each entity lives in its own tree with JSON values. The transaction log
//! is keyed by big-endian sequence numbers so tree order is append order.
//! Every write awaits `flush_async` before it returns, so the tokio worker
//! is not blocked on disk I/O.

use agentmart_types::{
    AgentId, AgentRecord, Listing, ListingId, Rental, RentalId, Transaction, TransactionId,
    UserId, UserProgress,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};

use super::{AgentRepo, ListingRepo, ProgressRepo, RentalRepo, TransactionLog};
use crate::{DbError, DbResult};

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn values<T: DeserializeOwned>(tree: &Tree) -> DbResult<Vec<T>> {
    let mut out = Vec::new();
    for item in tree.iter() {
        let (_, value) = item?;
        out.push(decode(&value)?);
    }
    Ok(out)
}

async fn put(tree: &Tree, key: &[u8], value: Vec<u8>) -> DbResult<()> {
    tree.insert(key, value)?;
    tree.flush_async().await?;
    Ok(())
}

async fn remove(tree: &Tree, key: &[u8]) -> DbResult<bool> {
    let removed = tree.remove(key)?.is_some();
    tree.flush_async().await?;
    Ok(removed)
}

/// Insert only if `key` is vacant
async fn create(tree: &Tree, key: &str, value: Vec<u8>) -> DbResult<()> {
    let swapped = tree.compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?;
    swapped.map_err(|_| DbError::Duplicate(key.to_string()))?;
    tree.flush_async().await?;
    Ok(())
}

fn get<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> DbResult<Option<T>> {
    match tree.get(key)? {
        Some(value) => Ok(Some(decode(&value)?)),
        None => Ok(None),
    }
}

// ============================================================================
// Agents
// ============================================================================

pub struct SledAgentRepo {
    tree: Tree,
    /// transaction id -> credited agent id
    credits: Tree,
}

impl SledAgentRepo {
    pub fn open(db: &Db) -> DbResult<Self> {
        Ok(Self {
            tree: db.open_tree("agents")?,
            credits: db.open_tree("agent_credits")?,
        })
    }
}

#[async_trait]
impl AgentRepo for SledAgentRepo {
    async fn insert(&self, agent: &AgentRecord) -> DbResult<()> {
        create(&self.tree, &agent.id.to_string(), encode(agent)?).await
    }

    async fn find(&self, id: &AgentId) -> DbResult<Option<AgentRecord>> {
        get(&self.tree, id.to_string().as_bytes())
    }

    async fn list(&self) -> DbResult<Vec<AgentRecord>> {
        let mut agents: Vec<AgentRecord> = values(&self.tree)?;
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn list_by_owner(&self, owner_id: &UserId) -> DbResult<Vec<AgentRecord>> {
        let mut agents: Vec<AgentRecord> = values(&self.tree)?;
        agents.retain(|a| &a.owner_id == owner_id);
        agents.sort_by_key(|a| a.created_at);
        Ok(agents)
    }

    async fn update(&self, agent: &AgentRecord) -> DbResult<()> {
        let key = agent.id.to_string();
        if !self.tree.contains_key(key.as_bytes())? {
            return Err(DbError::NotFound(key));
        }
        put(&self.tree, key.as_bytes(), encode(agent)?).await
    }

    async fn delete(&self, id: &AgentId) -> DbResult<bool> {
        remove(&self.tree, id.to_string().as_bytes()).await
    }

    async fn update_credited(
        &self,
        agent: &AgentRecord,
        transaction_id: &TransactionId,
    ) -> DbResult<bool> {
        let agent_key = agent.id.to_string();
        let marker_key = transaction_id.to_string();
        let value = encode(agent)?;

        // both trees change together or not at all
        let stored = (&self.tree, &self.credits)
            .transaction(|(agents, credits)| {
                if agents.get(agent_key.as_bytes())?.is_none() {
                    return Err(ConflictableTransactionError::Abort(DbError::NotFound(
                        agent_key.clone(),
                    )));
                }
                if credits.get(marker_key.as_bytes())?.is_some() {
                    return Ok(false);
                }
                credits.insert(marker_key.as_bytes(), agent_key.as_bytes())?;
                agents.insert(agent_key.as_bytes(), value.clone())?;
                Ok(true)
            })
            .map_err(|e| match e {
                TransactionError::Abort(e) => e,
                TransactionError::Storage(e) => DbError::Sled(e),
            })?;
        if stored {
            self.tree.flush_async().await?;
        }
        Ok(stored)
    }

    async fn is_credited(&self, transaction_id: &TransactionId) -> DbResult<bool> {
        Ok(self.credits.contains_key(transaction_id.to_string().as_bytes())?)
    }
}

// ============================================================================
// Listings
// ============================================================================

pub struct SledListingRepo {
    db: Db,
    tree: Tree,
}

impl SledListingRepo {
    pub fn open(db: &Db) -> DbResult<Self> {
        Ok(Self {
            db: db.clone(),
            tree: db.open_tree("listings")?,
        })
    }
}

#[async_trait]
impl ListingRepo for SledListingRepo {
    async fn next_sequence(&self) -> DbResult<u64> {
        Ok(self.db.generate_id()? + 1)
    }

    async fn insert(&self, listing: &Listing) -> DbResult<()> {
        create(&self.tree, listing.id.as_str(), encode(listing)?).await
    }

    async fn find(&self, id: &ListingId) -> DbResult<Option<Listing>> {
        get(&self.tree, id.as_str().as_bytes())
    }

    async fn update(&self, listing: &Listing) -> DbResult<()> {
        let key = listing.id.as_str();
        if !self.tree.contains_key(key.as_bytes())? {
            return Err(DbError::NotFound(key.to_string()));
        }
        put(&self.tree, key.as_bytes(), encode(listing)?).await
    }

    async fn list_active(&self) -> DbResult<Vec<Listing>> {
        let mut listings: Vec<Listing> = values(&self.tree)?;
        listings.retain(|l| l.is_active());
        listings.sort_by_key(|l| l.created_at);
        Ok(listings)
    }

    async fn list_by_agent(&self, agent_id: &AgentId) -> DbResult<Vec<Listing>> {
        let mut listings: Vec<Listing> = values(&self.tree)?;
        listings.retain(|l| &l.agent_id == agent_id);
        listings.sort_by_key(|l| l.created_at);
        Ok(listings)
    }
}

// ============================================================================
// Rentals
// ============================================================================

pub struct SledRentalRepo {
    tree: Tree,
}

impl SledRentalRepo {
    pub fn open(db: &Db) -> DbResult<Self> {
        Ok(Self {
            tree: db.open_tree("rentals")?,
        })
    }
}

#[async_trait]
impl RentalRepo for SledRentalRepo {
    async fn insert(&self, rental: &Rental) -> DbResult<()> {
        create(&self.tree, &rental.id.to_string(), encode(rental)?).await
    }

    async fn find(&self, id: &RentalId) -> DbResult<Option<Rental>> {
        get(&self.tree, id.to_string().as_bytes())
    }

    async fn update(&self, rental: &Rental) -> DbResult<()> {
        let key = rental.id.to_string();
        if !self.tree.contains_key(key.as_bytes())? {
            return Err(DbError::NotFound(key));
        }
        put(&self.tree, key.as_bytes(), encode(rental)?).await
    }

    async fn delete(&self, id: &RentalId) -> DbResult<bool> {
        remove(&self.tree, id.to_string().as_bytes()).await
    }

    async fn find_active_for_listing(&self, listing_id: &ListingId) -> DbResult<Option<Rental>> {
        let rentals: Vec<Rental> = values(&self.tree)?;
        Ok(rentals
            .into_iter()
            .find(|r| &r.listing_id == listing_id && r.is_active()))
    }

    async fn list_by_renter(&self, renter_id: &UserId) -> DbResult<Vec<Rental>> {
        let mut rentals: Vec<Rental> = values(&self.tree)?;
        rentals.retain(|r| &r.renter_id == renter_id);
        rentals.sort_by_key(|r| r.start_time);
        Ok(rentals)
    }
}

// ============================================================================
// Transaction Log
// ============================================================================

pub struct SledTransactionLog {
    db: Db,
    entries: Tree,
    /// transaction id -> sequence key
    index: Tree,
}

impl SledTransactionLog {
    pub fn open(db: &Db) -> DbResult<Self> {
        Ok(Self {
            db: db.clone(),
            entries: db.open_tree("transactions")?,
            index: db.open_tree("transaction_index")?,
        })
    }
}

#[async_trait]
impl TransactionLog for SledTransactionLog {
    async fn append(&self, transaction: &Transaction) -> DbResult<u64> {
        let id = transaction.id.to_string();
        if self.index.contains_key(id.as_bytes())? {
            return Err(DbError::Duplicate(id));
        }
        let sequence = self.db.generate_id()? + 1;
        let key = sequence.to_be_bytes();
        self.entries.insert(key, encode(transaction)?)?;
        self.index.insert(id.as_bytes(), key.to_vec())?;
        self.db.flush_async().await?;
        Ok(sequence)
    }

    async fn find(&self, id: &TransactionId) -> DbResult<Option<Transaction>> {
        match self.index.get(id.to_string().as_bytes())? {
            Some(key) => get(&self.entries, &key),
            None => Ok(None),
        }
    }

    async fn len(&self) -> DbResult<usize> {
        Ok(self.entries.len())
    }

    async fn list(&self) -> DbResult<Vec<Transaction>> {
        values(&self.entries)
    }

    async fn list_by_seller(&self, seller_id: &UserId) -> DbResult<Vec<Transaction>> {
        let mut entries: Vec<Transaction> = values(&self.entries)?;
        entries.retain(|t| &t.seller_id == seller_id);
        Ok(entries)
    }
}

// ============================================================================
// User Progress
// ============================================================================

pub struct SledProgressRepo {
    tree: Tree,
}

impl SledProgressRepo {
    pub fn open(db: &Db) -> DbResult<Self> {
        Ok(Self {
            tree: db.open_tree("progress")?,
        })
    }
}

#[async_trait]
impl ProgressRepo for SledProgressRepo {
    async fn find(&self, user_id: &UserId) -> DbResult<Option<UserProgress>> {
        get(&self.tree, user_id.to_string().as_bytes())
    }

    async fn upsert(&self, progress: &UserProgress) -> DbResult<()> {
        put(&self.tree, progress.user_id.to_string().as_bytes(), encode(progress)?).await
    }
}
