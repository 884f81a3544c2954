//! # Leaderboard Aggregator
//!
//! Bounded, descending per-category rankings.
//!
//! - `update` appends an entry, re-sorts (stable, so earlier entries win
//!   ties) and truncates to capacity
//! - `refresh_agent` replaces an agent's standing in the three standard
//!   categories with its current statistics
//!
//! Each category list sits behind its own lock; updates to different
//! categories never contend.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use agentmart_types::{
    AgentId, AgentMartError, AgentStats, LeaderboardCategory, LeaderboardEntry, Result,
};
use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use tracing::debug;

/// Default number of entries kept per category
pub const DEFAULT_CAPACITY: usize = 100;

type Board = Arc<RwLock<Vec<LeaderboardEntry>>>;

pub struct LeaderboardAggregator {
    capacity: usize,
    boards: RwLock<HashMap<LeaderboardCategory, Board>>,
}

impl LeaderboardAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            boards: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry to `category`, creating the category if needed
    pub fn update(&self, category: LeaderboardCategory, mut entry: LeaderboardEntry) -> Result<()> {
        if !entry.score.is_finite() {
            return Err(AgentMartError::invalid_input(
                "score",
                format!("leaderboard score must be finite, got {}", entry.score),
            ));
        }
        entry.category = category.clone();
        let board = self.board_or_create(&category);
        let mut entries = board.write();
        entries.push(entry);
        sort_descending(&mut entries);
        entries.truncate(self.capacity);
        Ok(())
    }

    /// First `n` entries of `category`
    pub fn top(&self, category: &LeaderboardCategory, n: usize) -> Result<Vec<LeaderboardEntry>> {
        let board = self.board(category)?;
        let entries = board.read();
        Ok(entries.iter().take(n).cloned().collect())
    }

    pub fn categories(&self) -> Vec<LeaderboardCategory> {
        let mut categories: Vec<_> = self.boards.read().keys().cloned().collect();
        categories.sort_by_key(|c| c.to_string());
        categories
    }

    /// 1-based rank of the agent's best entry, if ranked
    pub fn rank_of(
        &self,
        category: &LeaderboardCategory,
        agent_id: &AgentId,
    ) -> Result<Option<usize>> {
        let board = self.board(category)?;
        let entries = board.read();
        Ok(entries
            .iter()
            .position(|e| &e.agent_id == agent_id)
            .map(|p| p + 1))
    }

    /// Push the agent's current earnings, rating and task count into the
    /// standard categories, replacing its previous entries there
    pub fn refresh_agent(&self, stats: &AgentStats) -> Result<()> {
        let earnings = stats.earnings().to_f64().unwrap_or(0.0);
        let scores = [
            (LeaderboardCategory::Earnings, earnings),
            (LeaderboardCategory::Rating, stats.rating()),
            (LeaderboardCategory::Tasks, stats.tasks_completed() as f64),
        ];
        for (category, score) in scores {
            let board = self.board_or_create(&category);
            let mut entries = board.write();
            entries.retain(|e| &e.agent_id != stats.agent_id());
            entries.push(LeaderboardEntry::new(
                stats.agent_id().clone(),
                category.clone(),
                score,
            ));
            sort_descending(&mut entries);
            entries.truncate(self.capacity);
        }
        debug!(agent = %stats.agent_id(), "Leaderboards refreshed");
        Ok(())
    }

    /// Drop every entry of a deleted agent, in all categories
    pub fn remove_agent(&self, agent_id: &AgentId) {
        let boards: Vec<Board> = self.boards.read().values().cloned().collect();
        for board in boards {
            board.write().retain(|e| &e.agent_id != agent_id);
        }
        debug!(agent = %agent_id, "Agent removed from leaderboards");
    }

    fn board(&self, category: &LeaderboardCategory) -> Result<Board> {
        self.boards
            .read()
            .get(category)
            .cloned()
            .ok_or_else(|| AgentMartError::CategoryNotFound {
                category: category.to_string(),
            })
    }

    fn board_or_create(&self, category: &LeaderboardCategory) -> Board {
        if let Some(board) = self.boards.read().get(category) {
            return board.clone();
        }
        self.boards
            .write()
            .entry(category.clone())
            .or_default()
            .clone()
    }
}

impl Default for LeaderboardAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

fn sort_descending(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}
