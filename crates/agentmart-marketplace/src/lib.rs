//! AgentMart Marketplace - Listings, sales and rentals
//!
//! - Listing book: agents offered for sale, rent or subscription
//! - Transaction recorder: append-only log of purchases and rental starts
//! - Rental manager: single-active-rental lifecycle per listing
//!
//! All three share one set of per-listing locks so a purchase and a rental
//! of the same listing never interleave.

pub mod listings;
pub mod recorder;
pub mod rentals;

pub use listings::*;
pub use recorder::*;
pub use rentals::*;

use std::sync::Arc;

use agentmart_db::{EntityLocks, Storage};
use agentmart_ledger::StatsLedger;

/// The marketplace components wired over one storage
#[derive(Clone)]
pub struct Marketplace {
    pub listings: ListingBook,
    pub recorder: TransactionRecorder,
    pub rentals: RentalManager,
}

impl Marketplace {
    pub fn new(storage: Storage, ledger: StatsLedger) -> Self {
        let locks = Arc::new(EntityLocks::new());
        let recorder = TransactionRecorder::new(storage.clone(), ledger.clone(), locks.clone());
        Self {
            listings: ListingBook::new(storage.clone(), ledger, locks.clone()),
            rentals: RentalManager::new(storage, recorder.clone(), locks),
            recorder,
        }
    }
}
