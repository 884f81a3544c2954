use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use agentmart_db::{
    AgentRepo, DbError, DbResult, ListingRepo, MemoryAgentRepo, MemoryListingRepo, Storage,
};
use agentmart_engine::{
    AgentRuntime, EchoRuntime, Engine, EngineConfig, RetryConfig, RuntimeError, StorageConfig,
};
use agentmart_types::{
    AchievementId, AgentConfig, AgentId, AgentMartError, AgentRecord, AgentState, AgentUpdate,
    ErrorKind, LeaderboardCategory, Listing, ListingId, ListingStatus, ListingType, PricingModel,
    RentalStatus, TransactionId, UserId,
};

fn achievement(id: &str) -> AchievementId {
    AchievementId::new(id)
}

fn fast_retries() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        },
        ..EngineConfig::default()
    }
}

/// Agent repository whose updates fail while `failing` is set
struct FlakyAgents {
    inner: MemoryAgentRepo,
    failing: AtomicBool,
}

#[async_trait]
impl AgentRepo for FlakyAgents {
    async fn insert(&self, agent: &AgentRecord) -> DbResult<()> {
        self.inner.insert(agent).await
    }

    async fn find(&self, id: &AgentId) -> DbResult<Option<AgentRecord>> {
        self.inner.find(id).await
    }

    async fn list_by_owner(&self, owner_id: &UserId) -> DbResult<Vec<AgentRecord>> {
        self.inner.list_by_owner(owner_id).await
    }

    async fn list(&self) -> DbResult<Vec<AgentRecord>> {
        self.inner.list().await
    }

    async fn update(&self, agent: &AgentRecord) -> DbResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("agent store offline".to_string()));
        }
        self.inner.update(agent).await
    }

    async fn delete(&self, id: &AgentId) -> DbResult<bool> {
        self.inner.delete(id).await
    }

    async fn update_credited(
        &self,
        agent: &AgentRecord,
        transaction_id: &TransactionId,
    ) -> DbResult<bool> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("agent store offline".to_string()));
        }
        self.inner.update_credited(agent, transaction_id).await
    }

    async fn is_credited(&self, transaction_id: &TransactionId) -> DbResult<bool> {
        self.inner.is_credited(transaction_id).await
    }
}

/// Listing repository whose updates fail while `failing` is set
struct FlakyListings {
    inner: MemoryListingRepo,
    failing: AtomicBool,
}

#[async_trait]
impl ListingRepo for FlakyListings {
    async fn next_sequence(&self) -> DbResult<u64> {
        self.inner.next_sequence().await
    }

    async fn insert(&self, listing: &Listing) -> DbResult<()> {
        self.inner.insert(listing).await
    }

    async fn find(&self, id: &ListingId) -> DbResult<Option<Listing>> {
        self.inner.find(id).await
    }

    async fn update(&self, listing: &Listing) -> DbResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("listing store offline".to_string()));
        }
        self.inner.update(listing).await
    }

    async fn list_active(&self) -> DbResult<Vec<Listing>> {
        self.inner.list_active().await
    }

    async fn list_by_agent(&self, agent_id: &AgentId) -> DbResult<Vec<Listing>> {
        self.inner.list_by_agent(agent_id).await
    }
}

struct BrokenRuntime;

#[async_trait]
impl AgentRuntime for BrokenRuntime {
    async fn run(&self, _agent: &AgentRecord, _task: &str) -> Result<String, RuntimeError> {
        Err(RuntimeError::Failed("model offline".to_string()))
    }
}

#[tokio::test]
async fn test_sale_unlocks_first_sale_and_top_seller() {
    let engine = Engine::new(&EngineConfig::default()).unwrap();
    let seller = UserId::new();
    let buyer = UserId::new();

    let agent = engine
        .register_agent(&seller, "Ledger Bot", "Reconciles invoices")
        .await
        .unwrap();
    let listing = engine
        .create_listing(&agent.id, ListingType::Sale, PricingModel::fixed(dec!(1500)))
        .await
        .unwrap();
    assert_eq!(listing.seller_id, seller);

    let progress = engine.user_progress(&seller).await.unwrap();
    assert!(progress.has_achievement(&achievement("marketplace_pioneer")));
    assert_eq!(progress.total_points, 50);

    let tx = engine.record_transaction(&listing.id, &buyer).await.unwrap();
    assert_eq!(tx.amount, dec!(1500));
    assert_eq!(tx.seller_id, seller);

    let progress = engine.user_progress(&seller).await.unwrap();
    assert!(progress.has_achievement(&achievement("first_sale")));
    assert!(progress.has_achievement(&achievement("top_seller")));
    assert_eq!(progress.total_points, 650);
    assert_eq!(progress.level, 1);

    let stats = engine.agent(&agent.id).await.unwrap().stats;
    assert_eq!(stats.earnings(), dec!(1500));
    assert_eq!(
        engine.listing(&listing.id).await.unwrap().status,
        ListingStatus::Sold
    );

    let top = engine.leaderboard(&LeaderboardCategory::Earnings, 10).unwrap();
    assert_eq!(top[0].agent_id, agent.id);
    assert_eq!(top[0].score, 1500.0);
    assert_eq!(
        engine
            .leaderboard_rank(&LeaderboardCategory::Earnings, &agent.id)
            .unwrap(),
        Some(1)
    );

    // a sold listing cannot be bought again
    let err = engine.record_transaction(&listing.id, &buyer).await.unwrap_err();
    assert!(matches!(err, AgentMartError::ListingNotActive { .. }));
    assert_eq!(engine.transactions().await.unwrap().len(), 1);

    // a perfect rating pushes the seller past the first level
    engine.record_rating(&agent.id, 5.0).await.unwrap();
    let progress = engine.user_progress(&seller).await.unwrap();
    assert!(progress.has_achievement(&achievement("five_star")));
    assert_eq!(progress.total_points, 1650);
    assert_eq!(progress.level, 2);

    engine.shutdown().await;
    assert_eq!(engine.retry_stats().deferred, 0);
}

#[tokio::test]
async fn test_rent_use_cancel() {
    let engine = Engine::new(&EngineConfig::default()).unwrap();
    let owner = UserId::new();
    let renter = UserId::new();
    let other = UserId::new();

    let agent = engine
        .register_agent(&owner, "Translator", "EN to DE")
        .await
        .unwrap();
    let listing = engine
        .create_listing(
            &agent.id,
            ListingType::Rent,
            PricingModel::fixed(dec!(20)).with_usage_fee(dec!(0.5)),
        )
        .await
        .unwrap();

    let started = engine.create_rental(&listing.id, &renter).await.unwrap();
    let rental = started.rental;
    assert_eq!(rental.status, RentalStatus::Active);
    assert_eq!(started.recorded.transaction.transaction_type, ListingType::Rent);

    // the listing stays active but only one rental may run at a time
    assert_eq!(
        engine.listing(&listing.id).await.unwrap().status,
        ListingStatus::Active
    );
    let err = engine.create_rental(&listing.id, &other).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    engine.record_usage(&rental.id).await.unwrap();
    let used = engine.record_usage(&rental.id).await.unwrap();
    assert_eq!(used.usage_count, 2);

    let cancelled = engine.cancel_rental(&rental.id).await.unwrap();
    assert_eq!(cancelled.status, RentalStatus::Cancelled);
    assert!(cancelled.end_time.is_some());
    assert_eq!(cancelled.usage_count, 2);

    let again = engine.cancel_rental(&rental.id).await.unwrap();
    assert_eq!(again, cancelled);

    let err = engine.record_usage(&rental.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // renting the base price credits the owner
    assert_eq!(engine.agent(&agent.id).await.unwrap().stats.earnings(), dec!(20));
    let progress = engine.user_progress(&owner).await.unwrap();
    assert!(progress.has_achievement(&achievement("first_sale")));
    assert!(!progress.has_achievement(&achievement("top_seller")));

    // once cancelled, the listing can be rented again
    let next = engine.create_rental(&listing.id, &other).await.unwrap();
    let completed = engine.complete_rental(&next.rental.id).await.unwrap();
    assert_eq!(completed.status, RentalStatus::Completed);
    assert_eq!(engine.rentals_for_renter(&renter).await.unwrap().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_sale_listing_cannot_be_rented() {
    let engine = Engine::new(&EngineConfig::default()).unwrap();
    let owner = UserId::new();
    let agent = engine.register_agent(&owner, "Scout", "").await.unwrap();
    let listing = engine
        .create_listing(&agent.id, ListingType::Sale, PricingModel::fixed(dec!(5)))
        .await
        .unwrap();

    let err = engine.create_rental(&listing.id, &UserId::new()).await.unwrap_err();
    assert!(matches!(err, AgentMartError::InvalidListing { .. }));
    assert!(engine.transactions().await.unwrap().is_empty());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_failed_credit_is_dead_lettered_then_replayed_once() {
    let agents = Arc::new(FlakyAgents {
        inner: MemoryAgentRepo::new(),
        failing: AtomicBool::new(false),
    });
    let repo: Arc<dyn AgentRepo> = agents.clone();
    let mut storage = Storage::in_memory();
    storage.agents = repo;

    let engine = Engine::with_parts(
        storage,
        &fast_retries(),
        Arc::new(EchoRuntime),
    )
    .unwrap();
    let seller = UserId::new();
    let agent = engine.register_agent(&seller, "Broker", "").await.unwrap();
    let listing = engine
        .create_listing(&agent.id, ListingType::Sale, PricingModel::fixed(dec!(75)))
        .await
        .unwrap();

    agents.failing.store(true, Ordering::SeqCst);
    // the write still succeeds while its bookkeeping fails
    let tx = engine.record_transaction(&listing.id, &UserId::new()).await.unwrap();
    engine.wait_for_retries().await;

    let stats = engine.retry_stats();
    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(engine.agent(&agent.id).await.unwrap().stats.earnings(), dec!(0));

    // achievements read the log, so the seller is still recognised
    let progress = engine.user_progress(&seller).await.unwrap();
    assert!(progress.has_achievement(&achievement("first_sale")));

    agents.failing.store(false, Ordering::SeqCst);
    let summary = engine.replay_transactions().await.unwrap();
    assert_eq!(summary.transactions, 1);
    assert_eq!(summary.credited, 1);
    assert_eq!(summary.users_evaluated, 1);

    let summary = engine.replay_transactions().await.unwrap();
    assert_eq!(summary.credited, 0);

    let stats = engine.agent(&agent.id).await.unwrap().stats;
    assert_eq!(stats.earnings(), dec!(75));
    assert!(engine.is_credited(&tx.id).await.unwrap());
    let progress = engine.user_progress(&seller).await.unwrap();
    assert_eq!(
        progress
            .achievements
            .iter()
            .filter(|id| id.as_str() == "first_sale")
            .count(),
        1
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn test_run_task_counts_only_successes() {
    let engine = Engine::new(&EngineConfig::default()).unwrap();
    let owner = UserId::new();
    let agent = engine.register_agent(&owner, "Echo", "").await.unwrap();

    let outcome = engine.run_task(&agent.id, "summarize the report").await.unwrap();
    assert_eq!(outcome.output, "[Echo] summarize the report");
    assert_eq!(outcome.stats.tasks_completed(), 1);

    let err = engine.run_task(&agent.id, "").await.unwrap_err();
    assert!(matches!(err, AgentMartError::Execution { .. }));
    assert_eq!(engine.agent(&agent.id).await.unwrap().stats.tasks_completed(), 1);

    let tasks = engine.leaderboard(&LeaderboardCategory::Tasks, 5).unwrap();
    assert_eq!(tasks[0].score, 1.0);
    engine.shutdown().await;

    let broken = Engine::with_parts(
        Storage::in_memory(),
        &EngineConfig::default(),
        Arc::new(BrokenRuntime),
    )
    .unwrap();
    let agent = broken.register_agent(&owner, "Mute", "").await.unwrap();
    let err = broken.run_task(&agent.id, "anything").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(broken.agent(&agent.id).await.unwrap().stats.tasks_completed(), 0);
    broken.shutdown().await;
}

#[tokio::test]
async fn test_tool_created_milestone() {
    let engine = Engine::new(&EngineConfig::default()).unwrap();
    let owner = UserId::new();
    engine.register_agent(&owner, "Builder", "").await.unwrap();

    let evaluation = engine.record_tool_created(&owner).await.unwrap();
    assert_eq!(evaluation.granted.len(), 1);
    assert_eq!(evaluation.granted[0].id.as_str(), "tool_creator");

    // recording it again grants nothing new
    let evaluation = engine.record_tool_created(&owner).await.unwrap();
    assert!(evaluation.granted.is_empty());
    assert_eq!(evaluation.progress.total_points, 200);

    let err = engine.record_tool_created(&UserId::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_sled_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        storage: StorageConfig::sled(dir.path().join("agentmart")),
        ..EngineConfig::default()
    };
    let seller = UserId::new();

    let (agent_id, listing_id) = {
        let engine = Engine::new(&config).unwrap();
        let agent = engine.register_agent(&seller, "Archivist", "").await.unwrap();
        let listing = engine
            .create_listing(&agent.id, ListingType::Sale, PricingModel::fixed(dec!(300)))
            .await
            .unwrap();
        engine.record_transaction(&listing.id, &UserId::new()).await.unwrap();
        engine.shutdown().await;
        (agent.id, listing.id)
    };

    let engine = Engine::new(&config).unwrap();
    assert_eq!(engine.transactions().await.unwrap().len(), 1);
    assert_eq!(
        engine.listing(&listing_id).await.unwrap().status,
        ListingStatus::Sold
    );

    // leaderboards live in memory and come back through a replay
    assert!(engine.leaderboard(&LeaderboardCategory::Earnings, 5).is_err());
    let summary = engine.replay_transactions().await.unwrap();
    assert_eq!(summary.credited, 0);
    assert_eq!(engine.agent(&agent_id).await.unwrap().stats.earnings(), dec!(300));

    let top = engine.leaderboard(&LeaderboardCategory::Earnings, 5).unwrap();
    assert_eq!(top[0].agent_id, agent_id);
    let progress = engine.user_progress(&seller).await.unwrap();
    assert!(progress.has_achievement(&achievement("first_sale")));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_lost_sold_update_never_allows_a_second_sale() {
    let listings = Arc::new(FlakyListings {
        inner: MemoryListingRepo::new(),
        failing: AtomicBool::new(false),
    });
    let storage = Storage::in_memory().with_listing_repo(listings.clone());
    let engine = Engine::with_parts(storage, &fast_retries(), Arc::new(EchoRuntime)).unwrap();
    let seller = UserId::new();
    let agent = engine.register_agent(&seller, "Clerk", "").await.unwrap();
    let listing = engine
        .create_listing(&agent.id, ListingType::Sale, PricingModel::fixed(dec!(75)))
        .await
        .unwrap();

    listings.failing.store(true, Ordering::SeqCst);
    engine.record_transaction(&listing.id, &UserId::new()).await.unwrap();
    engine.wait_for_retries().await;

    let stats = engine.retry_stats();
    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.dead_lettered, 1);
    assert!(engine.listing(&listing.id).await.unwrap().is_active());

    // the log already holds the sale, so the stale Active status is ignored
    let err = engine
        .record_transaction(&listing.id, &UserId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentMartError::ListingNotActive { .. }));
    let err = engine
        .create_listing(&agent.id, ListingType::Sale, PricingModel::fixed(dec!(80)))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentMartError::AgentSold { .. }));

    listings.failing.store(false, Ordering::SeqCst);
    let summary = engine.replay_transactions().await.unwrap();
    assert_eq!(summary.credited, 0);
    assert_eq!(
        engine.listing(&listing.id).await.unwrap().status,
        ListingStatus::Sold
    );
    assert!(engine.active_listings().await.unwrap().is_empty());

    assert_eq!(engine.transactions().await.unwrap().len(), 1);
    assert_eq!(engine.agent(&agent.id).await.unwrap().stats.earnings(), dec!(75));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_sold_listing_is_closed_by_the_retry_queue() {
    let listings = Arc::new(FlakyListings {
        inner: MemoryListingRepo::new(),
        failing: AtomicBool::new(false),
    });
    let storage = Storage::in_memory().with_listing_repo(listings.clone());
    let config = EngineConfig {
        retry: RetryConfig {
            max_attempts: 50,
            initial_backoff_ms: 5,
            max_backoff_ms: 5,
        },
        ..EngineConfig::default()
    };
    let engine = Engine::with_parts(storage, &config, Arc::new(EchoRuntime)).unwrap();
    let agent = engine.register_agent(&UserId::new(), "Porter", "").await.unwrap();
    let listing = engine
        .create_listing(&agent.id, ListingType::Sale, PricingModel::fixed(dec!(12)))
        .await
        .unwrap();

    listings.failing.store(true, Ordering::SeqCst);
    engine.record_transaction(&listing.id, &UserId::new()).await.unwrap();
    listings.failing.store(false, Ordering::SeqCst);
    engine.wait_for_retries().await;

    let stats = engine.retry_stats();
    assert_eq!(stats.deferred, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(
        engine.listing(&listing.id).await.unwrap().status,
        ListingStatus::Sold
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_rental_at_base_price_ten() {
    let engine = Engine::new(&EngineConfig::default()).unwrap();
    let owner = UserId::new();
    let agent = engine.register_agent(&owner, "Summarizer", "").await.unwrap();
    let listing = engine
        .create_listing(&agent.id, ListingType::Rent, PricingModel::fixed(dec!(10.0)))
        .await
        .unwrap();

    let started = engine.create_rental(&listing.id, &UserId::new()).await.unwrap();
    assert_eq!(started.recorded.transaction.amount, dec!(10.0));
    let rental_id = started.rental.id;
    for _ in 0..3 {
        engine.record_usage(&rental_id).await.unwrap();
    }

    let cancelled = engine.cancel_rental(&rental_id).await.unwrap();
    assert_eq!(cancelled.status, RentalStatus::Cancelled);
    assert_eq!(cancelled.usage_count, 3);
    let again = engine.cancel_rental(&rental_id).await.unwrap();
    assert_eq!(again, cancelled);

    assert_eq!(engine.agent(&agent.id).await.unwrap().stats.earnings(), dec!(10));
    assert_eq!(engine.transactions().await.unwrap().len(), 1);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_agent_management_lifecycle() {
    let engine = Engine::new(&EngineConfig::default()).unwrap();
    let owner = UserId::new();
    let config = AgentConfig::new("local-7b")
        .with_tool("search")
        .with_allowed_import("json");
    let agent = engine
        .register_agent_with_config(&owner, "Analyst", "Reads filings", config.clone())
        .await
        .unwrap();
    assert_eq!(agent.config, config);
    assert_eq!(agent.state, AgentState::Created);
    assert_eq!(engine.list_agents().await.unwrap(), vec![agent.clone()]);

    engine.run_task(&agent.id, "read the 10-K").await.unwrap();
    let updated = engine
        .update_agent(&agent.id, AgentUpdate::default().name("Senior Analyst"))
        .await
        .unwrap();
    assert_eq!(updated.name, "Senior Analyst");
    assert_eq!(updated.stats.tasks_completed(), 1);

    let stopped = engine.stop_agent(&agent.id).await.unwrap();
    assert_eq!(stopped.state, AgentState::Stopped);
    let err = engine.run_task(&agent.id, "read the 10-Q").await.unwrap_err();
    assert!(matches!(err, AgentMartError::AgentStopped { .. }));
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let running = engine.start_agent(&agent.id).await.unwrap();
    assert_eq!(running.state, AgentState::Running);
    engine.run_task(&agent.id, "read the 10-Q").await.unwrap();
    assert_eq!(
        engine
            .leaderboard_rank(&LeaderboardCategory::Tasks, &agent.id)
            .unwrap(),
        Some(1)
    );

    // an agent on the market cannot be deleted
    let listing = engine
        .create_listing(&agent.id, ListingType::Rent, PricingModel::fixed(dec!(3)))
        .await
        .unwrap();
    let err = engine.delete_agent(&agent.id).await.unwrap_err();
    assert!(matches!(err, AgentMartError::AgentListed { .. }));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    engine.withdraw_listing(&listing.id).await.unwrap();
    let deleted = engine.delete_agent(&agent.id).await.unwrap();
    assert_eq!(deleted.id, agent.id);
    assert_eq!(
        engine.agent(&agent.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert!(engine.list_agents().await.unwrap().is_empty());
    assert_eq!(
        engine
            .leaderboard_rank(&LeaderboardCategory::Tasks, &agent.id)
            .unwrap(),
        None
    );
    engine.shutdown().await;
}

#[tokio::test]
async fn test_sold_agent_cannot_be_listed_again() {
    let engine = Engine::new(&EngineConfig::default()).unwrap();
    let agent = engine.register_agent(&UserId::new(), "Courier", "").await.unwrap();
    let listing = engine
        .create_listing(&agent.id, ListingType::Sale, PricingModel::fixed(dec!(40)))
        .await
        .unwrap();
    engine.record_transaction(&listing.id, &UserId::new()).await.unwrap();

    let err = engine
        .create_listing(&agent.id, ListingType::Rent, PricingModel::fixed(dec!(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentMartError::AgentSold { .. }));
    assert_eq!(engine.active_listings().await.unwrap().len(), 0);
    engine.shutdown().await;
}
