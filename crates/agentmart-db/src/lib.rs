//! AgentMart Persistence Layer
//!
//! Repositories for agents, listings, rentals, the transaction log and user
//! progress, with two interchangeable backends.
//!
//! # Architecture
//!
//! - **Memory**: `dashmap` maps and a lock-guarded vector for the log
//! - **Sled**: one embedded database, one tree per entity, durable log
//!
//! # Repository Pattern
//!
//! Each entity has its own trait. [`Storage`] bundles one handle per entity
//! and is cloned into every component that needs persistence.

pub mod config;
pub mod error;
pub mod locks;
pub mod repos;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

pub use config::{StorageBackend, StorageConfig};
pub use error::{DbError, DbResult};
pub use locks::{EntityGuard, EntityLocks};
pub use repos::*;

/// One handle per entity repository
#[derive(Clone)]
pub struct Storage {
    pub agents: Arc<dyn AgentRepo>,
    pub listings: Arc<dyn ListingRepo>,
    pub rentals: Arc<dyn RentalRepo>,
    pub transactions: Arc<dyn TransactionLog>,
    pub progress: Arc<dyn ProgressRepo>,
}

impl Storage {
    /// Open the backend named by `config`
    pub fn open(config: &StorageConfig) -> DbResult<Self> {
        config.validate()?;
        match config.backend {
            StorageBackend::Memory => Ok(Self::in_memory()),
            StorageBackend::Sled => match &config.sled_path {
                Some(path) => Self::sled(path),
                None => Err(DbError::InvalidConfig(
                    "storage.sled_path is required for the sled backend".to_string(),
                )),
            },
        }
    }

    pub fn in_memory() -> Self {
        info!("Using in-memory storage");
        Self {
            agents: Arc::new(MemoryAgentRepo::new()),
            listings: Arc::new(MemoryListingRepo::new()),
            rentals: Arc::new(MemoryRentalRepo::new()),
            transactions: Arc::new(MemoryTransactionLog::new()),
            progress: Arc::new(MemoryProgressRepo::new()),
        }
    }

    /// Open or create a sled database at `path`
    pub fn sled(path: impl AsRef<Path>) -> DbResult<Self> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened sled storage");
        Ok(Self {
            agents: Arc::new(SledAgentRepo::open(&db)?),
            listings: Arc::new(SledListingRepo::open(&db)?),
            rentals: Arc::new(SledRentalRepo::open(&db)?),
            transactions: Arc::new(SledTransactionLog::open(&db)?),
            progress: Arc::new(SledProgressRepo::open(&db)?),
        })
    }

    /// Replace the transaction log, keeping the other repositories
    pub fn with_transaction_log(mut self, log: Arc<dyn TransactionLog>) -> Self {
        self.transactions = log;
        self
    }

    /// Replace the listing repository, keeping the others
    pub fn with_listing_repo(mut self, listings: Arc<dyn ListingRepo>) -> Self {
        self.listings = listings;
        self
    }
}
