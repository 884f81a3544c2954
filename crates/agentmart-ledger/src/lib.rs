//! AgentMart Ledger - Agent records and per-agent performance statistics
//!
//! The ledger owns every mutation of an [`AgentRecord`]:
//! - Registration, partial updates, start/stop and deletion
//! - Task counts only grow
//! - Earnings only grow and are credited at most once per transaction
//! - Ratings fold into a running mean, history is not retained
//!
//! # Invariants
//!
//! 1. Every read-modify-write holds the agent's entity lock
//! 2. Rejected input never mutates the stored record
//! 3. Crediting the same transaction twice is a no-op, across restarts too:
//!    the credit marker and the new earnings are written in one step
//! 4. An agent with an active listing cannot be deleted

use std::sync::Arc;

use agentmart_db::{EntityGuard, EntityLocks, Storage};
use agentmart_types::{
    AgentConfig, AgentId, AgentMartError, AgentRecord, AgentState, AgentStats, AgentUpdate,
    Result, TransactionId, UserId,
};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// The statistics ledger
///
/// Cheap to clone; clones share storage and locks.
#[derive(Clone)]
pub struct StatsLedger {
    storage: Storage,
    locks: Arc<EntityLocks<AgentId>>,
}

impl StatsLedger {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            locks: Arc::new(EntityLocks::new()),
        }
    }

    /// Create an agent with the default configuration and zeroed statistics
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
        if name.trim().is_empty() {
            return Err(AgentMartError::invalid_input("name", "agent name cannot be empty"));
        }
        config.validate()?;
        let agent =
            AgentRecord::new(owner_id.clone(), name.trim(), description).with_config(config);
        self.storage.agents.insert(&agent).await?;
        info!(
            agent = %agent.id,
            owner = %owner_id,
            name = %agent.name,
            model = %agent.config.model,
            tools = agent.config.tools.len(),
            "Agent registered"
        );
        Ok(agent)
    }

    /// Apply a partial update to the agent's name, description or configuration
    pub async fn update_agent(
        &self,
        agent_id: &AgentId,
        update: AgentUpdate,
    ) -> Result<AgentRecord> {
        let _guard = self.locks.lock(agent_id).await;
        let mut agent = self.agent(agent_id).await?;
        if update.is_empty() {
            debug!(agent = %agent_id, "Empty agent update");
            return Ok(agent);
        }
        update.apply(&mut agent)?;
        self.storage.agents.update(&agent).await?;
        info!(agent = %agent_id, name = %agent.name, model = %agent.config.model, "Agent updated");
        Ok(agent)
    }

    /// Move the agent to `state`; repeating the current state is a no-op
    pub async fn set_state(&self, agent_id: &AgentId, state: AgentState) -> Result<AgentRecord> {
        let _guard = self.locks.lock(agent_id).await;
        let mut agent = self.agent(agent_id).await?;
        let from = agent.state;
        if !agent.transition(state) {
            debug!(agent = %agent_id, %state, "Agent already in state");
            return Ok(agent);
        }
        self.storage.agents.update(&agent).await?;
        info!(agent = %agent_id, %from, to = %state, "Agent state changed");
        Ok(agent)
    }

    /// Remove the agent record. Rejected while any of its listings is active.
    pub async fn delete_agent(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        let _guard = self.locks.lock(agent_id).await;
        let agent = self.agent(agent_id).await?;
        let listings = self.storage.listings.list_by_agent(agent_id).await?;
        if let Some(listing) = listings.iter().find(|l| l.is_active()) {
            return Err(AgentMartError::AgentListed {
                agent_id: agent_id.to_string(),
                listing_id: listing.id.to_string(),
            });
        }
        self.storage.agents.delete(agent_id).await?;
        info!(agent = %agent_id, owner = %agent.owner_id, "Agent deleted");
        Ok(agent)
    }

    /// Exclusive access to the agent record; held by callers whose checks
    /// must not race a deletion
    pub async fn lock_agent(&self, agent_id: &AgentId) -> EntityGuard {
        self.locks.lock(agent_id).await
    }

    pub async fn agent(&self, agent_id: &AgentId) -> Result<AgentRecord> {
        self.storage
            .agents
            .find(agent_id)
            .await?
            .ok_or_else(|| AgentMartError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })
    }

    pub async fn agents_owned_by(&self, owner_id: &UserId) -> Result<Vec<AgentRecord>> {
        Ok(self.storage.agents.list_by_owner(owner_id).await?)
    }

    /// Every registered agent, oldest first
    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        Ok(self.storage.agents.list().await?)
    }

    pub async fn stats(&self, agent_id: &AgentId) -> Result<AgentStats> {
        Ok(self.agent(agent_id).await?.stats)
    }

    /// Count one completed task
    pub async fn record_task_completion(&self, agent_id: &AgentId) -> Result<AgentStats> {
        let stats = self
            .mutate(agent_id, |stats| {
                stats.record_task();
                Ok(())
            })
            .await?;
        info!(agent = %agent_id, tasks = stats.tasks_completed(), "Task completion recorded");
        Ok(stats)
    }

    /// Add a non-negative amount to the agent's earnings
    pub async fn record_earnings(&self, agent_id: &AgentId, amount: Decimal) -> Result<AgentStats> {
        let stats = self
            .mutate(agent_id, |stats| stats.record_earnings(amount))
            .await?;
        info!(agent = %agent_id, %amount, earnings = %stats.earnings(), "Earnings recorded");
        Ok(stats)
    }

    /// Fold a rating in `[0, 5]` into the agent's running mean
    pub async fn record_rating(&self, agent_id: &AgentId, rating: f64) -> Result<AgentStats> {
        let stats = self
            .mutate(agent_id, |stats| stats.record_rating(rating))
            .await?;
        info!(
            agent = %agent_id,
            rating,
            mean = stats.rating(),
            count = stats.total_ratings(),
            "Rating recorded"
        );
        Ok(stats)
    }

    /// Credit a logged transaction to the agent's earnings.
    ///
    /// Returns `false` when the transaction was already credited.
    pub async fn credit_sale(
        &self,
        agent_id: &AgentId,
        transaction_id: &TransactionId,
        amount: Decimal,
    ) -> Result<bool> {
        let _guard = self.locks.lock(agent_id).await;
        // markers outlive the agent, so replaying a deleted agent's sales is quiet
        if self.storage.agents.is_credited(transaction_id).await? {
            debug!(agent = %agent_id, tx = %transaction_id, "Transaction already credited");
            return Ok(false);
        }

        let mut agent = self.agent(agent_id).await?;
        agent.stats.record_earnings(amount)?;
        if !self.storage.agents.update_credited(&agent, transaction_id).await? {
            debug!(agent = %agent_id, tx = %transaction_id, "Transaction already credited");
            return Ok(false);
        }

        info!(
            agent = %agent_id,
            tx = %transaction_id,
            %amount,
            earnings = %agent.stats.earnings(),
            "Sale credited"
        );
        Ok(true)
    }

    /// Whether `transaction_id` has been credited to its agent
    pub async fn is_credited(&self, transaction_id: &TransactionId) -> Result<bool> {
        Ok(self.storage.agents.is_credited(transaction_id).await?)
    }

    async fn mutate<F>(&self, agent_id: &AgentId, apply: F) -> Result<AgentStats>
    where
        F: FnOnce(&mut AgentStats) -> Result<()>,
    {
        let _guard = self.locks.lock(agent_id).await;
        let mut agent = self.agent(agent_id).await?;
        apply(&mut agent.stats)?;
        self.storage.agents.update(&agent).await?;
        Ok(agent.stats)
    }
}
