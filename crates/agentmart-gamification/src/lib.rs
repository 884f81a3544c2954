//! AgentMart Gamification - Achievements, badges, levels and leaderboards
//!
//! # Features
//!
//! - **Achievements**: catalog of threshold rules evaluated against agent
//!   statistics, the transaction log and one-shot milestones
//! - **Progress**: badges, points and levels per user
//! - **Leaderboards**: bounded descending rankings per category
//!
//! # Example
//!
//! ```ignore
//! use agentmart_gamification::{AchievementEvaluator, LeaderboardAggregator};
//!
//! let evaluator = AchievementEvaluator::new(storage.clone(), 1000);
//! evaluator.ensure_progress(&owner).await?;
//! let evaluation = evaluator.evaluate(&owner).await?;
//! for achievement in &evaluation.granted {
//!     println!("Unlocked: {} {}", achievement.badge, achievement.name);
//! }
//!
//! let leaderboards = LeaderboardAggregator::new(100);
//! leaderboards.refresh_agent(&stats)?;
//! let top = leaderboards.top(&LeaderboardCategory::Earnings, 10)?;
//! ```

pub mod achievements;
pub mod leaderboard;

pub use achievements::{default_catalog, AchievementEvaluator, Evaluation};
pub use leaderboard::{LeaderboardAggregator, DEFAULT_CAPACITY};
