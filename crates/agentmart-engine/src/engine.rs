//! The engine facade
//!
//! Writes go through the ledger or the marketplace. The follow-up work they
//! produce runs inline right after; whatever fails there is deferred to the
//! retry queue and never fails the write that produced it.

use std::collections::HashSet;
use std::sync::Arc;

use agentmart_db::Storage;
use agentmart_gamification::{AchievementEvaluator, Evaluation, LeaderboardAggregator};
use agentmart_ledger::StatsLedger;
use agentmart_marketplace::{ListingBook, Marketplace, StartedRental};
use agentmart_types::{
    Achievement, AgentConfig, AgentId, AgentMartError, AgentRecord, AgentState, AgentStats,
    AgentUpdate, FollowUp, LeaderboardCategory, LeaderboardEntry, Listing, ListingId, ListingType,
    Milestone, PricingModel, Rental, RentalId, Result, Transaction, TransactionId, UserId,
    UserProgress,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::retry::{FollowUpHandler, RetryQueue, RetryStats};
use crate::runtime::{AgentRuntime, EchoRuntime};

/// Output of a task run through the agent runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub output: String,
    pub stats: AgentStats,
}

/// What a log replay touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub transactions: usize,
    /// Transactions credited for the first time by this replay
    pub credited: usize,
    pub users_evaluated: usize,
}

/// Runs follow-up work against the ledger, listings, evaluator and leaderboards
struct Bookkeeper {
    ledger: StatsLedger,
    listings: ListingBook,
    evaluator: AchievementEvaluator,
    leaderboards: Arc<LeaderboardAggregator>,
}

#[async_trait]
impl FollowUpHandler for Bookkeeper {
    async fn handle(&self, followup: &FollowUp) -> Result<()> {
        match followup {
            FollowUp::MarkListingSold { listing_id } => {
                self.listings.mark_sold(listing_id).await?;
            }
            FollowUp::CreditEarnings {
                agent_id,
                transaction_id,
                amount,
            } => {
                self.ledger
                    .credit_sale(agent_id, transaction_id, *amount)
                    .await?;
            }
            FollowUp::EvaluateAchievements { user_id } => {
                // sellers and owners always get a record, even if registration missed it
                self.evaluator.ensure_progress(user_id).await?;
                let evaluation = self.evaluator.evaluate(user_id).await?;
                for achievement in &evaluation.granted {
                    info!(user = %user_id, achievement = %achievement.id, "Achievement unlocked");
                }
            }
            FollowUp::RefreshLeaderboards { agent_id } => match self.ledger.stats(agent_id).await {
                Ok(stats) => self.leaderboards.refresh_agent(&stats)?,
                Err(AgentMartError::AgentNotFound { .. }) => {
                    self.leaderboards.remove_agent(agent_id);
                }
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }
}

pub struct Engine {
    storage: Storage,
    ledger: StatsLedger,
    marketplace: Marketplace,
    evaluator: AchievementEvaluator,
    leaderboards: Arc<LeaderboardAggregator>,
    bookkeeper: Arc<Bookkeeper>,
    retry: RetryQueue,
    runtime: Arc<dyn AgentRuntime>,
}

impl Engine {
    /// Open storage per `config` and start the engine with the echo runtime.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let storage = Storage::open(&config.storage)?;
        Self::with_parts(storage, config, Arc::new(EchoRuntime))
    }

    /// Start the engine over existing storage and a custom runtime
    pub fn with_parts(
        storage: Storage,
        config: &EngineConfig,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Result<Self> {
        config.validate()?;

        let ledger = StatsLedger::new(storage.clone());
        let marketplace = Marketplace::new(storage.clone(), ledger.clone());
        let evaluator =
            AchievementEvaluator::new(storage.clone(), config.gamification.points_per_level);
        let leaderboards = Arc::new(LeaderboardAggregator::new(
            config.gamification.leaderboard_capacity,
        ));
        let bookkeeper = Arc::new(Bookkeeper {
            ledger: ledger.clone(),
            listings: marketplace.listings.clone(),
            evaluator: evaluator.clone(),
            leaderboards: leaderboards.clone(),
        });
        let retry = RetryQueue::start(config.retry.clone(), bookkeeper.clone());

        info!(
            backend = ?config.storage.backend,
            leaderboard_capacity = config.gamification.leaderboard_capacity,
            points_per_level = config.gamification.points_per_level,
            "Engine started"
        );

        Ok(Self {
            storage,
            ledger,
            marketplace,
            evaluator,
            leaderboards,
            bookkeeper,
            retry,
            runtime,
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn catalog(&self) -> &[Achievement] {
        self.evaluator.catalog()
    }

    // ========================================================================
    // Agents
    // ========================================================================

    /// Register an agent with the default config and make sure its owner
    /// has a progress record
    pub async fn register_agent(
        &self,
        owner_id: &UserId,
        name: &str,
        description: &str,
    ) -> Result<AgentRecord> {
        self.register_agent_with_config(owner_id, name, description, AgentConfig::default())
            .await
    }

    pub async fn register_agent_with_config(
        &self,
        owner_id: &UserId,
        name: &str,
        description: &str,
        config: AgentConfig,
    ) -> Result<AgentRecord> {
        let agent = self
            .ledger
            .register_agent_with_config(owner_id, name, description, config)
            .await?;
        self.evaluator.ensure_progress(owner_id).await?;
        Ok(agent)
    }

    /// Change name, description or config; stats are untouched
    pub async fn update_agent(
        &self,
        agent_id: &AgentId,
        update: AgentUpdate,
    ) -> Result<AgentRecord> {
        self.ledger.update_agent(agent_id, update).await
    }

    pub async fn start_agent(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        self.ledger.set_state(agent_id, AgentState::Running).await
    }

    /// A stopped agent refuses tasks until started again
    pub async fn stop_agent(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        self.ledger.set_state(agent_id, AgentState::Stopped).await
    }

    /// Delete an agent with no active listing and drop it from every board.
    /// Its logged transactions and its owner's achievements stay.
    pub async fn delete_agent(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        let agent = self.ledger.delete_agent(agent_id).await?;
        self.leaderboards.remove_agent(agent_id);
        Ok(agent)
    }

    pub async fn agent(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        self.ledger.agent(agent_id).await
    }

    /// Every registered agent, oldest first
    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        self.ledger.list_agents().await
    }

    pub async fn agents_owned_by(&self, owner_id: &UserId) -> Result<Vec<AgentRecord>> {
        self.ledger.agents_owned_by(owner_id).await
    }

    /// Count one completed task
    pub async fn record_completion(&self, agent_id: &AgentId) -> Result<AgentStats> {
        let stats = self.ledger.record_task_completion(agent_id).await?;
        self.after_stats_change(agent_id).await;
        Ok(stats)
    }

    /// Fold a rating in [0, 5] into the agent's running mean
    pub async fn record_rating(&self, agent_id: &AgentId, rating: f64) -> Result<AgentStats> {
        let stats = self.ledger.record_rating(agent_id, rating).await?;
        self.after_stats_change(agent_id).await;
        Ok(stats)
    }

    /// Run `task` through the agent runtime; only a successful run counts.
    /// Stopped agents are refused.
    pub async fn run_task(&self, agent_id: &AgentId, task: &str) -> Result<TaskOutcome> {
        let agent = self.ledger.agent(agent_id).await?;
        if !agent.accepts_tasks() {
            return Err(AgentMartError::AgentStopped {
                agent_id: agent_id.to_string(),
            });
        }
        let output = self
            .runtime
            .run(&agent, task)
            .await
            .map_err(|e| AgentMartError::Execution {
                agent_id: agent_id.to_string(),
                reason: e.to_string(),
            })?;
        let stats = self.record_completion(agent_id).await?;
        debug!(agent = %agent_id, "Task completed");
        Ok(TaskOutcome { output, stats })
    }

    // ========================================================================
    // Marketplace
    // ========================================================================

    /// List an agent; the seller's `AgentListed` milestone is recorded after
    pub async fn create_listing(
        &self,
        agent_id: &AgentId,
        listing_type: ListingType,
        pricing: PricingModel,
    ) -> Result<Listing> {
        let listing = self
            .marketplace
            .listings
            .create_listing(agent_id, listing_type, pricing)
            .await?;

        if let Err(e) = self.record_milestone(&listing.seller_id, Milestone::AgentListed).await {
            warn!(
                seller = %listing.seller_id,
                listing = %listing.id,
                error = %e,
                "Failed to record listing milestone"
            );
        }
        Ok(listing)
    }

    pub async fn listing(&self, listing_id: &ListingId) -> Result<Listing> {
        self.marketplace.listings.listing(listing_id).await
    }

    pub async fn active_listings(&self) -> Result<Vec<Listing>> {
        self.marketplace.listings.active_listings().await
    }

    pub async fn withdraw_listing(&self, listing_id: &ListingId) -> Result<Listing> {
        self.marketplace.listings.withdraw_listing(listing_id).await
    }

    /// Start a rental; the starting transaction's follow-ups run before returning
    pub async fn create_rental(
        &self,
        listing_id: &ListingId,
        renter_id: &UserId,
    ) -> Result<StartedRental> {
        let started = self
            .marketplace
            .rentals
            .create_rental(listing_id, renter_id)
            .await?;
        self.run_followups(started.recorded.followups.clone()).await;
        Ok(started)
    }

    pub async fn record_usage(&self, rental_id: &RentalId) -> Result<Rental> {
        self.marketplace.rentals.record_usage(rental_id).await
    }

    pub async fn cancel_rental(&self, rental_id: &RentalId) -> Result<Rental> {
        self.marketplace.rentals.cancel_rental(rental_id).await
    }

    pub async fn complete_rental(&self, rental_id: &RentalId) -> Result<Rental> {
        self.marketplace.rentals.complete_rental(rental_id).await
    }

    pub async fn rental(&self, rental_id: &RentalId) -> Result<Rental> {
        self.marketplace.rentals.rental(rental_id).await
    }

    pub async fn rentals_for_renter(&self, renter_id: &UserId) -> Result<Vec<Rental>> {
        self.marketplace.rentals.rentals_for_renter(renter_id).await
    }

    /// Buy a listing at its base price
    pub async fn record_transaction(
        &self,
        listing_id: &ListingId,
        buyer_id: &UserId,
    ) -> Result<Transaction> {
        let recorded = self
            .marketplace
            .recorder
            .record_transaction(listing_id, buyer_id)
            .await?;
        self.run_followups(recorded.followups).await;
        Ok(recorded.transaction)
    }

    pub async fn transactions(&self) -> Result<Vec<Transaction>> {
        self.marketplace.recorder.transactions().await
    }

    /// Whether the seller's earnings already include `transaction_id`
    pub async fn is_credited(&self, transaction_id: &TransactionId) -> Result<bool> {
        self.ledger.is_credited(transaction_id).await
    }

    /// Re-apply earnings credit and achievement passes for the whole log,
    /// and close every SALE listing that has a logged sale.
    ///
    /// Safe to run any number of times; a transaction is credited once.
    pub async fn replay_transactions(&self) -> Result<ReplaySummary> {
        let transactions = self.transactions().await?;
        let mut summary = ReplaySummary {
            transactions: transactions.len(),
            ..ReplaySummary::default()
        };
        let mut seen = HashSet::new();
        let mut sold = Vec::new();
        let mut sellers = Vec::new();
        let mut agents = Vec::new();

        for tx in &transactions {
            if tx.transaction_type == ListingType::Sale {
                sold.push(tx.listing_id.clone());
            }
            match self.ledger.credit_sale(&tx.agent_id, &tx.id, tx.amount).await {
                Ok(true) => summary.credited += 1,
                Ok(false) => {}
                Err(e) => self.defer(
                    FollowUp::CreditEarnings {
                        agent_id: tx.agent_id.clone(),
                        transaction_id: tx.id.clone(),
                        amount: tx.amount,
                    },
                    &e,
                ),
            }
            if seen.insert(tx.seller_id.to_string()) {
                sellers.push(tx.seller_id.clone());
            }
            if seen.insert(tx.agent_id.to_string()) {
                agents.push(tx.agent_id.clone());
            }
        }
        summary.users_evaluated = sellers.len();

        let followups = sold
            .into_iter()
            .map(|listing_id| FollowUp::MarkListingSold { listing_id })
            .chain(
                sellers
                    .into_iter()
                    .map(|user_id| FollowUp::EvaluateAchievements { user_id }),
            )
            .chain(
                agents
                    .into_iter()
                    .map(|agent_id| FollowUp::RefreshLeaderboards { agent_id }),
            )
            .collect();
        self.run_followups(followups).await;

        info!(
            transactions = summary.transactions,
            credited = summary.credited,
            users = summary.users_evaluated,
            "Transaction log replayed"
        );
        Ok(summary)
    }

    // ========================================================================
    // Gamification
    // ========================================================================

    /// Record that `user_id` published a tool
    pub async fn record_tool_created(&self, user_id: &UserId) -> Result<Evaluation> {
        self.record_milestone(user_id, Milestone::ToolCreated).await
    }

    pub async fn user_progress(&self, user_id: &UserId) -> Result<UserProgress> {
        self.evaluator.progress(user_id).await
    }

    /// Top `n` entries of a leaderboard category
    pub fn leaderboard(
        &self,
        category: &LeaderboardCategory,
        n: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        self.leaderboards.top(category, n)
    }

    /// Append a custom-category score
    pub fn submit_score(
        &self,
        category: LeaderboardCategory,
        agent_id: &AgentId,
        score: f64,
    ) -> Result<()> {
        let entry = LeaderboardEntry::new(agent_id.clone(), category.clone(), score);
        self.leaderboards.update(category, entry)
    }

    pub fn leaderboard_categories(&self) -> Vec<LeaderboardCategory> {
        self.leaderboards.categories()
    }

    /// 1-based rank of `agent_id` in `category`, if it is on the board
    pub fn leaderboard_rank(
        &self,
        category: &LeaderboardCategory,
        agent_id: &AgentId,
    ) -> Result<Option<usize>> {
        self.leaderboards.rank_of(category, agent_id)
    }

    // ========================================================================
    // Retry queue
    // ========================================================================

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }

    /// Wait until every deferred follow-up has succeeded or been dead-lettered
    pub async fn wait_for_retries(&self) {
        self.retry.wait_idle().await
    }

    /// Stop the retry worker after draining its queue
    pub async fn shutdown(&self) {
        self.retry.shutdown().await;
        info!("Engine stopped");
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn record_milestone(&self, user_id: &UserId, milestone: Milestone) -> Result<Evaluation> {
        let evaluation = self.evaluator.record_milestone(user_id, milestone).await?;
        for achievement in &evaluation.granted {
            info!(user = %user_id, achievement = %achievement.id, "Achievement unlocked");
        }
        Ok(evaluation)
    }

    async fn after_stats_change(&self, agent_id: &AgentId) {
        let owner_id = match self.ledger.agent(agent_id).await {
            Ok(agent) => agent.owner_id,
            Err(e) => {
                warn!(agent = %agent_id, error = %e, "Owner lookup failed, skipping follow-ups");
                return;
            }
        };
        self.run_followups(vec![
            FollowUp::EvaluateAchievements { user_id: owner_id },
            FollowUp::RefreshLeaderboards {
                agent_id: agent_id.clone(),
            },
        ])
        .await;
    }

    async fn run_followups(&self, followups: Vec<FollowUp>) {
        for followup in followups {
            if let Err(e) = self.bookkeeper.handle(&followup).await {
                self.defer(followup, &e);
            }
        }
    }

    fn defer(&self, followup: FollowUp, error: &AgentMartError) {
        warn!(
            job = followup.name(),
            followup = %followup,
            error = %error,
            "Follow-up failed inline, deferring"
        );
        self.retry.defer(followup, error);
    }
}
