//! # Achievement Evaluator
//!
//! Grants achievements from accumulated statistics.
//!
//! ## Rules
//!
//! - **EARNINGS**: lifetime sales amount of the user, summed from the
//!   transaction log
//! - **TASKS**: tasks completed across every agent the user owns
//! - **RATING**: unweighted mean of the owned agents' ratings (needs at
//!   least one agent)
//! - **MARKETPLACE / INNOVATION**: one-shot milestones recorded by callers
//!
//! A pass walks the catalog in order, skips what the user already holds and
//! grants every rule that qualifies. Re-running a pass never grants twice.

use std::sync::Arc;

use agentmart_db::{EntityLocks, Storage};
use agentmart_types::{
    Achievement, AchievementType, AgentMartError, AgentRecord, BadgeRarity, Milestone, Result,
    UserId, UserProgress,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ============================================================================
// Catalog
// ============================================================================

/// The built-in achievements, in evaluation order
pub fn default_catalog() -> Vec<Achievement> {
    vec![
        Achievement::new("first_sale", "First Sale", AchievementType::Earnings, dec!(1))
            .with_description("Complete your first agent sale")
            .with_badge("💰", BadgeRarity::Common)
            .with_points(100),
        Achievement::new("top_seller", "Top Seller", AchievementType::Earnings, dec!(1000))
            .with_description("Earn over $1000 from agent sales")
            .with_badge("🏆", BadgeRarity::Epic)
            .with_points(500),
        Achievement::new("task_master", "Task Master", AchievementType::Tasks, dec!(100))
            .with_description("Complete 100 tasks successfully")
            .with_badge("⭐", BadgeRarity::Rare)
            .with_points(300),
        Achievement::new("five_star", "Five Star Agent", AchievementType::Rating, dec!(5.0))
            .with_description("Hold a perfect 5.0 average rating")
            .with_badge("⭐⭐⭐⭐⭐", BadgeRarity::Legendary)
            .with_points(1000),
        Achievement::new(
            "marketplace_pioneer",
            "Marketplace Pioneer",
            AchievementType::Marketplace,
            dec!(1),
        )
        .with_description("List an agent on the marketplace")
        .with_badge("🚀", BadgeRarity::Common)
        .with_points(50),
        Achievement::new("tool_creator", "Tool Creator", AchievementType::Innovation, dec!(1))
            .with_description("Create a custom tool for your agent")
            .with_badge("🛠️", BadgeRarity::Rare)
            .with_points(200),
    ]
}

// ============================================================================
// Evaluation
// ============================================================================

/// Outcome of one achievement pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub progress: UserProgress,
    /// Achievements granted by this pass, in catalog order
    pub granted: Vec<Achievement>,
}

/// Statistics a pass compares against thresholds, loaded on first use
#[derive(Default)]
struct Standing {
    earnings: Option<Decimal>,
    agents: Option<Vec<AgentRecord>>,
}

#[derive(Clone)]
pub struct AchievementEvaluator {
    storage: Storage,
    catalog: Arc<Vec<Achievement>>,
    points_per_level: u64,
    locks: Arc<EntityLocks<UserId>>,
}

impl AchievementEvaluator {
    pub fn new(storage: Storage, points_per_level: u64) -> Self {
        Self::with_catalog(storage, default_catalog(), points_per_level)
    }

    pub fn with_catalog(
        storage: Storage,
        catalog: Vec<Achievement>,
        points_per_level: u64,
    ) -> Self {
        Self {
            storage,
            catalog: Arc::new(catalog),
            points_per_level,
            locks: Arc::new(EntityLocks::new()),
        }
    }

    pub fn catalog(&self) -> &[Achievement] {
        &self.catalog
    }

    /// Create the user's progress record if it does not exist yet
    pub async fn ensure_progress(&self, user_id: &UserId) -> Result<UserProgress> {
        let _guard = self.locks.lock(user_id).await;
        if let Some(progress) = self.storage.progress.find(user_id).await? {
            return Ok(progress);
        }
        let progress = UserProgress::new(user_id.clone());
        self.storage.progress.upsert(&progress).await?;
        info!(user = %user_id, "User progress created");
        Ok(progress)
    }

    pub async fn progress(&self, user_id: &UserId) -> Result<UserProgress> {
        self.storage
            .progress
            .find(user_id)
            .await?
            .ok_or_else(|| AgentMartError::UserNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Run one achievement pass for `user_id`
    pub async fn evaluate(&self, user_id: &UserId) -> Result<Evaluation> {
        let _guard = self.locks.lock(user_id).await;
        let progress = self.progress(user_id).await?;
        self.evaluate_locked(progress, false).await
    }

    /// Record a one-shot milestone, then run a pass
    pub async fn record_milestone(
        &self,
        user_id: &UserId,
        milestone: Milestone,
    ) -> Result<Evaluation> {
        let _guard = self.locks.lock(user_id).await;
        let mut progress = self.progress(user_id).await?;
        let added = progress.record_milestone(milestone);
        if added {
            info!(user = %user_id, ?milestone, "Milestone recorded");
        }
        self.evaluate_locked(progress, added).await
    }

    async fn evaluate_locked(&self, mut progress: UserProgress, dirty: bool) -> Result<Evaluation> {
        let mut standing = Standing::default();
        let mut granted = Vec::new();

        for achievement in self.catalog.iter() {
            if progress.has_achievement(&achievement.id) {
                continue;
            }
            if !self.qualifies(achievement, &progress, &mut standing).await? {
                continue;
            }
            progress.grant(achievement, self.points_per_level)?;
            info!(
                user = %progress.user_id,
                achievement = %achievement.id,
                badge = %achievement.badge,
                points = achievement.points,
                total_points = progress.total_points,
                level = progress.level,
                "Achievement granted"
            );
            granted.push(achievement.clone());
        }

        if dirty || !granted.is_empty() {
            self.storage.progress.upsert(&progress).await?;
        } else {
            debug!(user = %progress.user_id, "No new achievements");
        }
        Ok(Evaluation { progress, granted })
    }

    async fn qualifies(
        &self,
        achievement: &Achievement,
        progress: &UserProgress,
        standing: &mut Standing,
    ) -> Result<bool> {
        let user_id = &progress.user_id;
        let met = match achievement.achievement_type {
            AchievementType::Earnings => {
                self.earnings(user_id, standing).await? >= achievement.threshold
            }
            AchievementType::Tasks => {
                let tasks: u64 = self
                    .agents(user_id, standing)
                    .await?
                    .iter()
                    .map(|a| a.stats.tasks_completed())
                    .sum();
                Decimal::from(tasks) >= achievement.threshold
            }
            AchievementType::Rating => {
                let agents = self.agents(user_id, standing).await?;
                if agents.is_empty() {
                    false
                } else {
                    let mean = agents.iter().map(|a| a.stats.rating()).sum::<f64>()
                        / agents.len() as f64;
                    Decimal::try_from(mean)
                        .map(|mean| mean >= achievement.threshold)
                        .unwrap_or(false)
                }
            }
            AchievementType::Marketplace | AchievementType::Innovation => achievement
                .achievement_type
                .milestone()
                .map(|m| progress.has_milestone(m))
                .unwrap_or(false),
        };
        Ok(met)
    }

    async fn earnings(&self, user_id: &UserId, standing: &mut Standing) -> Result<Decimal> {
        if let Some(earnings) = standing.earnings {
            return Ok(earnings);
        }
        let earnings = self
            .storage
            .transactions
            .list_by_seller(user_id)
            .await?
            .iter()
            .map(|t| t.amount)
            .sum();
        standing.earnings = Some(earnings);
        Ok(earnings)
    }

    async fn agents<'a>(
        &self,
        user_id: &UserId,
        standing: &'a mut Standing,
    ) -> Result<&'a [AgentRecord]> {
        if standing.agents.is_none() {
            standing.agents = Some(self.storage.agents.list_by_owner(user_id).await?);
        }
        Ok(standing.agents.as_deref().unwrap_or(&[]))
    }
}
