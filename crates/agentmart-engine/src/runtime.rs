//! Agent runtime seam
//!
//! The engine never executes agent logic itself. A task is handed to an
//! [`AgentRuntime`]; only a successful run counts as a completed task.

use agentmart_types::AgentRecord;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Task rejected: {0}")]
    Rejected(String),

    #[error("Task execution failed: {0}")]
    Failed(String),
}

/// Executes tasks on behalf of registered agents
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Run `task` as `agent` and return its output
    async fn run(&self, agent: &AgentRecord, task: &str) -> Result<String, RuntimeError>;
}

/// Runtime that answers every task with the agent's name and the task text
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoRuntime;

#[async_trait]
impl AgentRuntime for EchoRuntime {
    async fn run(&self, agent: &AgentRecord, task: &str) -> Result<String, RuntimeError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(RuntimeError::Rejected("task is empty".to_string()));
        }
        Ok(format!("[{}] {}", agent.name, task))
    }
}
