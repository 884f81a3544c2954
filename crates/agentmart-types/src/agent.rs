//! Agent records, configuration, lifecycle state and accumulated statistics

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{AgentId, AgentMartError, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Highest rating a user can give an agent
pub const MAX_RATING: f64 = 5.0;

/// Model used when an agent is registered without one
pub const DEFAULT_MODEL: &str = "default";

/// What an agent runs with: model, tools and permitted imports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub tools: Vec<String>,
    pub allowed_imports: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            tools: Vec::new(),
            allowed_imports: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn with_allowed_import(mut self, module: impl Into<String>) -> Self {
        self.allowed_imports.push(module.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// A model is required; tool and import names must be non-blank and unique
    pub fn validate(&self) -> Result<(), AgentMartError> {
        if self.model.trim().is_empty() {
            return Err(AgentMartError::invalid_input("model", "model cannot be empty"));
        }
        for (field, names) in [("tools", &self.tools), ("allowed_imports", &self.allowed_imports)] {
            let mut seen = BTreeSet::new();
            for name in names {
                if name.trim().is_empty() {
                    return Err(AgentMartError::invalid_input(field, "names cannot be empty"));
                }
                if !seen.insert(name.as_str()) {
                    return Err(AgentMartError::invalid_input(
                        field,
                        format!("{} is listed twice", name),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Lifecycle state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    /// Registered, never started
    #[default]
    Created,
    Running,
    /// Stopped by its owner; tasks are refused until restarted
    Stopped,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// An AI agent owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub config: AgentConfig,
    #[serde(default)]
    pub state: AgentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stats: AgentStats,
}

impl AgentRecord {
    /// Create a fresh agent with the default configuration and zeroed statistics
    pub fn new(owner_id: UserId, name: impl Into<String>, description: impl Into<String>) -> Self {
        let id = AgentId::new();
        let now = Utc::now();
        Self {
            stats: AgentStats::new(id.clone()),
            id,
            owner_id,
            name: name.into(),
            description: description.into(),
            config: AgentConfig::default(),
            state: AgentState::Created,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Stopped agents refuse tasks
    pub fn accepts_tasks(&self) -> bool {
        self.state != AgentState::Stopped
    }

    /// Move to `state`. Returns `false` if the agent was already there.
    pub fn transition(&mut self, state: AgentState) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        self.updated_at = Utc::now();
        true
    }
}

/// Partial update of an agent's descriptive fields and configuration.
///
/// `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub config: Option<AgentConfig>,
}

impl AgentUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.config.is_none()
    }

    /// Validate everything first, then write; a rejected update changes nothing
    pub fn apply(self, agent: &mut AgentRecord) -> Result<(), AgentMartError> {
        let name = match self.name {
            Some(name) if name.trim().is_empty() => {
                return Err(AgentMartError::invalid_input("name", "agent name cannot be empty"))
            }
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };
        if let Some(config) = &self.config {
            config.validate()?;
        }

        if let Some(name) = name {
            agent.name = name;
        }
        if let Some(description) = self.description {
            agent.description = description;
        }
        if let Some(config) = self.config {
            agent.config = config;
        }
        agent.updated_at = Utc::now();
        Ok(())
    }
}

/// Performance statistics of one agent.
///
/// `tasks_completed` and `earnings` only grow, `rating` is the running mean
/// of every rating received and stays within `[0, 5]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    agent_id: AgentId,
    tasks_completed: u64,
    earnings: Decimal,
    rating: f64,
    total_ratings: u64,
    last_active: Option<DateTime<Utc>>,
}

impl AgentStats {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            tasks_completed: 0,
            earnings: Decimal::ZERO,
            rating: 0.0,
            total_ratings: 0,
            last_active: None,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }

    pub fn earnings(&self) -> Decimal {
        self.earnings
    }

    pub fn rating(&self) -> f64 {
        self.rating
    }

    pub fn total_ratings(&self) -> u64 {
        self.total_ratings
    }

    pub fn last_active(&self) -> Option<DateTime<Utc>> {
        self.last_active
    }

    /// Count one completed task
    pub fn record_task(&mut self) {
        self.tasks_completed += 1;
        self.last_active = Some(Utc::now());
    }

    /// Add a non-negative amount to lifetime earnings
    pub fn record_earnings(&mut self, amount: Decimal) -> Result<(), AgentMartError> {
        if amount < Decimal::ZERO {
            return Err(AgentMartError::invalid_input(
                "amount",
                format!("earnings must be non-negative, got {}", amount),
            ));
        }
        self.earnings += amount;
        Ok(())
    }

    /// Fold one rating into the running mean
    pub fn record_rating(&mut self, rating: f64) -> Result<(), AgentMartError> {
        if !rating.is_finite() || !(0.0..=MAX_RATING).contains(&rating) {
            return Err(AgentMartError::invalid_input(
                "rating",
                format!("rating must be between 0 and {}, got {}", MAX_RATING, rating),
            ));
        }
        let count = self.total_ratings as f64;
        let mean = (self.rating * count + rating) / (count + 1.0);
        // float drift must not push the mean outside the bounds
        self.rating = mean.clamp(0.0, MAX_RATING);
        self.total_ratings += 1;
        Ok(())
    }
}
