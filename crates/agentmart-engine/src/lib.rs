//! AgentMart Engine - one API over agents, marketplace and gamification
//!
//! The engine owns a [`Storage`](agentmart_db::Storage), the stats ledger, the
//! marketplace components, the achievement evaluator and the leaderboards.
//! Every write is followed by its bookkeeping (earnings credit, achievement
//! pass, leaderboard refresh); bookkeeping that fails is retried in the
//! background and never fails the write.
//!
//! # Example
//!
//! ```ignore
//! use agentmart_engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::load(None)?;
//! let engine = Engine::new(&config)?;
//!
//! let agent = engine.register_agent(&owner, "Scout", "finds deals").await?;
//! let listing = engine
//!     .create_listing(&agent.id, ListingType::Sale, PricingModel::fixed(dec!(100)))
//!     .await?;
//! engine.record_transaction(&listing.id, &buyer).await?;
//! let progress = engine.user_progress(&owner).await?;
//!
//! engine.shutdown().await;
//! ```

pub mod config;
pub mod engine;
pub mod retry;
pub mod runtime;

pub use config::{EngineConfig, GamificationConfig, LoggingConfig, RetryConfig};
pub use engine::{Engine, ReplaySummary, TaskOutcome};
pub use retry::{FollowUpHandler, RetryQueue, RetryStats};
pub use runtime::{AgentRuntime, EchoRuntime, RuntimeError};

pub use agentmart_db::{StorageBackend, StorageConfig};
