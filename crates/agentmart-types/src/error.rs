//! Error types for AgentMart
//!
//! Every rejected operation maps to one of four kinds: not found, invalid
//! input, conflict, or an internal/storage failure.

use thiserror::Error;

/// Result type for AgentMart operations
pub type Result<T> = std::result::Result<T, AgentMartError>;

/// Coarse classification surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown agent, listing, rental, user or category
    NotFound,
    /// Rejected input; nothing was mutated
    InvalidInput,
    /// The operation collides with existing state
    Conflict,
    /// Storage or computation failure, usually retriable
    Internal,
}

/// AgentMart error types
#[derive(Debug, Clone, Error)]
pub enum AgentMartError {
    // ========================================================================
    // Not Found
    // ========================================================================

    /// Agent not found
    #[error("Agent {agent_id} not found")]
    AgentNotFound { agent_id: String },

    /// Listing not found
    #[error("Marketplace listing {listing_id} not found")]
    ListingNotFound { listing_id: String },

    /// Rental not found (or no longer active)
    #[error("Rental {rental_id} not found")]
    RentalNotFound { rental_id: String },

    /// User has no progress record
    #[error("User {user_id} not found")]
    UserNotFound { user_id: String },

    /// Leaderboard category not found
    #[error("Leaderboard category {category} not found")]
    CategoryNotFound { category: String },

    // ========================================================================
    // Invalid Input
    // ========================================================================

    /// Invalid input
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Listing cannot be used for the requested operation
    #[error("Invalid listing {listing_id}: {reason}")]
    InvalidListing { listing_id: String, reason: String },

    /// Listing is no longer active
    #[error("Marketplace listing {listing_id} is not active")]
    ListingNotActive { listing_id: String },

    /// The agent was already sold through a sale listing
    #[error("Agent {agent_id} was sold with listing {listing_id}")]
    AgentSold { agent_id: String, listing_id: String },

    /// The agent is stopped and does not accept tasks
    #[error("Agent {agent_id} is stopped")]
    AgentStopped { agent_id: String },

    /// Configuration rejected at the boundary
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // ========================================================================
    // Conflict
    // ========================================================================

    /// Listing already has an active rental
    #[error("Listing {listing_id} already has active rental {rental_id}")]
    RentalConflict { listing_id: String, rental_id: String },

    /// Agent still has an active listing
    #[error("Agent {agent_id} is still listed as {listing_id}")]
    AgentListed { agent_id: String, listing_id: String },

    /// Achievement already held by the user
    #[error("Achievement {achievement_id} already granted to {user_id}")]
    AchievementAlreadyGranted { user_id: String, achievement_id: String },

    // ========================================================================
    // Internal
    // ========================================================================

    /// Persistence layer failure
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Agent runtime failure
    #[error("Agent {agent_id} execution failed: {reason}")]
    Execution { agent_id: String, reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AgentMartError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid listing error
    pub fn invalid_listing(listing_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidListing {
            listing_id: listing_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AgentNotFound { .. }
            | Self::ListingNotFound { .. }
            | Self::RentalNotFound { .. }
            | Self::UserNotFound { .. }
            | Self::CategoryNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidInput { .. }
            | Self::InvalidListing { .. }
            | Self::ListingNotActive { .. }
            | Self::AgentSold { .. }
            | Self::AgentStopped { .. }
            | Self::InvalidConfig { .. } => ErrorKind::InvalidInput,
            Self::RentalConflict { .. }
            | Self::AgentListed { .. }
            | Self::AchievementAlreadyGranted { .. } => ErrorKind::Conflict,
            Self::Storage { .. } | Self::Execution { .. } | Self::Internal { .. } => {
                ErrorKind::Internal
            }
        }
    }

    /// Check if this is a retriable error
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::Internal { .. })
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AgentNotFound { .. } => "AGENT_NOT_FOUND",
            Self::ListingNotFound { .. } => "LISTING_NOT_FOUND",
            Self::RentalNotFound { .. } => "RENTAL_NOT_FOUND",
            Self::UserNotFound { .. } => "USER_NOT_FOUND",
            Self::CategoryNotFound { .. } => "CATEGORY_NOT_FOUND",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::InvalidListing { .. } => "INVALID_LISTING",
            Self::ListingNotActive { .. } => "LISTING_NOT_ACTIVE",
            Self::AgentSold { .. } => "AGENT_SOLD",
            Self::AgentStopped { .. } => "AGENT_STOPPED",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::RentalConflict { .. } => "RENTAL_CONFLICT",
            Self::AgentListed { .. } => "AGENT_LISTED",
            Self::AchievementAlreadyGranted { .. } => "ACHIEVEMENT_ALREADY_GRANTED",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Execution { .. } => "EXECUTION_FAILED",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}
