//! Gamification types: achievements, badges, user progress and leaderboards

use crate::{AchievementId, AgentId, AgentMartError, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// Achievements
// ============================================================================

/// Which statistic an achievement rule measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementType {
    /// Lifetime sales amount of the user
    Earnings,
    /// Tasks completed across the user's agents
    Tasks,
    /// Mean rating across the user's agents
    Rating,
    /// Listing an agent on the marketplace
    Marketplace,
    /// Creating a custom tool
    Innovation,
}

impl AchievementType {
    /// The one-shot milestone backing this rule, if any
    pub fn milestone(&self) -> Option<Milestone> {
        match self {
            Self::Marketplace => Some(Milestone::AgentListed),
            Self::Innovation => Some(Milestone::ToolCreated),
            Self::Earnings | Self::Tasks | Self::Rating => None,
        }
    }
}

impl fmt::Display for AchievementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Earnings => "EARNINGS",
            Self::Tasks => "TASKS",
            Self::Rating => "RATING",
            Self::Marketplace => "MARKETPLACE",
            Self::Innovation => "INNOVATION",
        };
        f.write_str(name)
    }
}

/// Badge rarity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BadgeRarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

impl BadgeRarity {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Common => "Common",
            Self::Rare => "Rare",
            Self::Epic => "Epic",
            Self::Legendary => "Legendary",
        }
    }
}

/// A rule that grants a badge and points once its threshold is reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: AchievementId,
    pub name: String,
    /// How to earn it
    pub description: String,
    pub achievement_type: AchievementType,
    pub threshold: Decimal,
    pub badge: String,
    pub rarity: BadgeRarity,
    pub points: u64,
}

impl Achievement {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        achievement_type: AchievementType,
        threshold: Decimal,
    ) -> Self {
        Self {
            id: AchievementId::new(id),
            name: name.into(),
            description: String::new(),
            achievement_type,
            threshold,
            badge: String::new(),
            rarity: BadgeRarity::Common,
            points: 0,
        }
    }

    /// Builder: set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder: set badge and its rarity
    pub fn with_badge(mut self, badge: impl Into<String>, rarity: BadgeRarity) -> Self {
        self.badge = badge.into();
        self.rarity = rarity;
        self
    }

    /// Builder: set points
    pub fn with_points(mut self, points: u64) -> Self {
        self.points = points;
        self
    }
}

// ============================================================================
// User Progress
// ============================================================================

/// Externally triggered one-shot events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Milestone {
    /// The user listed one of their agents
    AgentListed,
    /// The user created a custom tool
    ToolCreated,
}

/// A user's standing in the gamification system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: UserId,
    /// Granted achievements in grant order
    pub achievements: Vec<AchievementId>,
    pub badges: Vec<String>,
    pub total_points: u64,
    pub level: u64,
    pub milestones: BTreeSet<Milestone>,
    pub updated_at: DateTime<Utc>,
}

impl UserProgress {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            achievements: Vec::new(),
            badges: Vec::new(),
            total_points: 0,
            level: 1,
            milestones: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn has_achievement(&self, id: &AchievementId) -> bool {
        self.achievements.contains(id)
    }

    pub fn has_milestone(&self, milestone: Milestone) -> bool {
        self.milestones.contains(&milestone)
    }

    /// Returns false if the milestone was already recorded
    pub fn record_milestone(&mut self, milestone: Milestone) -> bool {
        let added = self.milestones.insert(milestone);
        if added {
            self.updated_at = Utc::now();
        }
        added
    }

    /// Grant an achievement: badge, points and recomputed level.
    ///
    /// `points_per_level` must be non-zero; configuration validation
    /// guarantees it.
    pub fn grant(
        &mut self,
        achievement: &Achievement,
        points_per_level: u64,
    ) -> Result<(), AgentMartError> {
        if self.has_achievement(&achievement.id) {
            return Err(AgentMartError::AchievementAlreadyGranted {
                user_id: self.user_id.to_string(),
                achievement_id: achievement.id.to_string(),
            });
        }
        self.achievements.push(achievement.id.clone());
        self.badges.push(achievement.badge.clone());
        self.total_points += achievement.points;
        self.level = level_for(self.total_points, points_per_level);
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// `1 + points / points_per_level`
pub fn level_for(total_points: u64, points_per_level: u64) -> u64 {
    1 + total_points.checked_div(points_per_level).unwrap_or(0)
}

// ============================================================================
// Leaderboards
// ============================================================================

/// Ranking dimension of a leaderboard
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeaderboardCategory {
    Earnings,
    Rating,
    Tasks,
    Custom(String),
}

impl LeaderboardCategory {
    /// Categories fed by agent statistics
    pub fn standard() -> [LeaderboardCategory; 3] {
        [Self::Earnings, Self::Rating, Self::Tasks]
    }

    pub fn parse(name: &str) -> Self {
        match name {
            "earnings" => Self::Earnings,
            "rating" => Self::Rating,
            "tasks" => Self::Tasks,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for LeaderboardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earnings => f.write_str("earnings"),
            Self::Rating => f.write_str("rating"),
            Self::Tasks => f.write_str("tasks"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// A ranked score of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub agent_id: AgentId,
    pub score: f64,
    pub category: LeaderboardCategory,
    pub timestamp: DateTime<Utc>,
}

impl LeaderboardEntry {
    pub fn new(agent_id: AgentId, category: LeaderboardCategory, score: f64) -> Self {
        Self {
            agent_id,
            score,
            category,
            timestamp: Utc::now(),
        }
    }
}
