//! Background retry of failed follow-up work
//!
//! A follow-up whose inline attempt failed is sent over an unbounded channel
//! to a worker task. Each job sleeps with exponential backoff between
//! attempts and is dead-lettered once `max_attempts` is reached or the
//! error is not retriable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentmart_types::{AgentMartError, FollowUp, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;

/// Executes follow-up work
#[async_trait]
pub trait FollowUpHandler: Send + Sync {
    async fn handle(&self, followup: &FollowUp) -> Result<()>;
}

/// Counters since the queue started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryStats {
    /// Follow-ups handed over after a failed inline attempt
    pub deferred: u64,
    /// Background attempts made
    pub retried: u64,
    pub succeeded: u64,
    pub dead_lettered: u64,
    /// Jobs still waiting for a retry
    pub pending: u64,
}

#[derive(Default)]
struct Counters {
    deferred: AtomicU64,
    retried: AtomicU64,
    succeeded: AtomicU64,
    dead_lettered: AtomicU64,
    pending: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RetryStats {
        RetryStats {
            deferred: self.deferred.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            dead_lettered: self.dead_lettered.load(Ordering::SeqCst),
            pending: self.pending.load(Ordering::SeqCst),
        }
    }

    fn dead_letter(&self, followup: &FollowUp, attempts: u32, reason: &str) {
        self.dead_lettered.fetch_add(1, Ordering::SeqCst);
        error!(
            job = followup.name(),
            followup = %followup,
            attempts,
            reason,
            "Follow-up dead-lettered"
        );
    }
}

struct Job {
    followup: FollowUp,
    /// Attempts already made, the inline one included
    attempts: u32,
}

pub struct RetryQueue {
    config: RetryConfig,
    counters: Arc<Counters>,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RetryQueue {
    /// Spawn the worker on the current tokio runtime
    pub fn start(config: RetryConfig, handler: Arc<dyn FollowUpHandler>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(
            receiver,
            handler,
            config.clone(),
            counters.clone(),
        ));
        Self {
            config,
            counters,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Hand over a follow-up whose inline attempt failed with `error`
    pub fn defer(&self, followup: FollowUp, error: &AgentMartError) {
        self.counters.deferred.fetch_add(1, Ordering::SeqCst);

        if !error.is_retriable() {
            self.counters.dead_letter(&followup, 1, &error.to_string());
            return;
        }
        if self.config.max_attempts <= 1 {
            self.counters
                .dead_letter(&followup, 1, "retries disabled by max_attempts");
            return;
        }

        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            self.counters
                .dead_letter(&followup, 1, "retry queue is shut down");
            return;
        };

        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        debug!(job = followup.name(), followup = %followup, "Follow-up queued for retry");
        if let Err(mpsc::error::SendError(job)) = sender.send(Job {
            followup,
            attempts: 1,
        }) {
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            self.counters
                .dead_letter(&job.followup, job.attempts, "retry worker stopped");
        }
    }

    pub fn stats(&self) -> RetryStats {
        self.counters.snapshot()
    }

    /// Wait until no job is pending
    pub async fn wait_idle(&self) {
        while self.counters.pending.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop accepting jobs and wait for the queued ones to finish
    pub async fn shutdown(&self) {
        // dropping the sender lets the worker drain and exit
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Retry worker panicked");
            }
            info!(stats = ?self.counters.snapshot(), "Retry queue stopped");
        }
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<Job>,
    handler: Arc<dyn FollowUpHandler>,
    config: RetryConfig,
    counters: Arc<Counters>,
) {
    let mut jobs = JoinSet::new();
    loop {
        tokio::select! {
            job = receiver.recv() => match job {
                Some(job) => {
                    jobs.spawn(retry_job(job, handler.clone(), config.clone(), counters.clone()));
                }
                None => break,
            },
            Some(_) = jobs.join_next(), if !jobs.is_empty() => {}
        }
    }
    while jobs.join_next().await.is_some() {}
}

async fn retry_job(
    mut job: Job,
    handler: Arc<dyn FollowUpHandler>,
    config: RetryConfig,
    counters: Arc<Counters>,
) {
    loop {
        tokio::time::sleep(config.backoff(job.attempts)).await;
        job.attempts += 1;
        counters.retried.fetch_add(1, Ordering::SeqCst);

        match handler.handle(&job.followup).await {
            Ok(()) => {
                counters.succeeded.fetch_add(1, Ordering::SeqCst);
                counters.pending.fetch_sub(1, Ordering::SeqCst);
                info!(
                    job = job.followup.name(),
                    followup = %job.followup,
                    attempts = job.attempts,
                    "Follow-up succeeded on retry"
                );
                return;
            }
            Err(e) if e.is_retriable() && job.attempts < config.max_attempts => {
                warn!(
                    job = job.followup.name(),
                    attempts = job.attempts,
                    error = %e,
                    "Follow-up retry failed"
                );
            }
            Err(e) => {
                counters.dead_letter(&job.followup, job.attempts, &e.to_string());
                counters.pending.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmart_types::UserId;
    use std::sync::atomic::AtomicU32;

    /// Fails with a storage error until `failures` attempts have been made
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FollowUpHandler for Flaky {
        async fn handle(&self, _followup: &FollowUp) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(AgentMartError::storage("disk unavailable"))
            } else {
                Ok(())
            }
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        }
    }

    fn evaluate() -> FollowUp {
        FollowUp::EvaluateAchievements {
            user_id: UserId::new(),
        }
    }

    #[tokio::test]
    async fn test_retry_eventually_succeeds() {
        let handler = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let queue = RetryQueue::start(fast(), handler.clone());

        queue.defer(evaluate(), &AgentMartError::storage("first attempt"));
        queue.wait_idle().await;

        let stats = queue.stats();
        assert_eq!(stats.deferred, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.dead_lettered, 0);
        assert_eq!(stats.pending, 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_dead_letter_after_max_attempts() {
        let handler = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let queue = RetryQueue::start(fast(), handler.clone());

        queue.defer(evaluate(), &AgentMartError::storage("first attempt"));
        queue.wait_idle().await;

        let stats = queue.stats();
        // inline attempt plus two background ones
        assert_eq!(stats.retried, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.succeeded, 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_retriable_error_is_dead_lettered_immediately() {
        let handler = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let queue = RetryQueue::start(fast(), handler.clone());

        let err = AgentMartError::UserNotFound {
            user_id: "user_gone".to_string(),
        };
        queue.defer(evaluate(), &err);

        let stats = queue.stats();
        assert_eq!(stats.dead_lettered, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_rejects() {
        let handler = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let queue = RetryQueue::start(fast(), handler.clone());

        queue.defer(evaluate(), &AgentMartError::storage("first attempt"));
        queue.shutdown().await;
        assert_eq!(queue.stats().succeeded, 1);
        assert_eq!(queue.stats().pending, 0);

        queue.defer(evaluate(), &AgentMartError::storage("too late"));
        assert_eq!(queue.stats().dead_lettered, 1);
        // second shutdown is a no-op
        queue.shutdown().await;
    }
}
