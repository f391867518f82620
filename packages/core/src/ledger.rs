//! Run ledger: append-only execution history.
//!
//! Each execution is written exactly once, at completion. A write that
//! fails with [`StoreError::Contention`] is retried with exponential backoff
//! (plus a little random jitter so concurrent writers spread out); any other
//! failure, or running out of retries, drops the record. Recording is
//! best-effort: the caller always gets a [`RecordOutcome`], never an error.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::store::{ModuleStore, RunRecord};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
    /// Upper bound of random jitter added to each delay, as a fraction of it.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }

    fn jittered_delay_for(&self, retry: u32) -> Duration {
        let delay = self.delay_for(retry);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(extra)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded { run_id: i64, attempts: u32 },
    Dropped { attempts: u32, reason: String },
}

impl RecordOutcome {
    pub fn run_id(&self) -> Option<i64> {
        match self {
            RecordOutcome::Recorded { run_id, .. } => Some(*run_id),
            RecordOutcome::Dropped { .. } => None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RecordOutcome::Recorded { attempts, .. } | RecordOutcome::Dropped { attempts, .. } => {
                *attempts
            }
        }
    }
}

#[derive(Clone)]
pub struct RunLedger {
    store: Arc<dyn ModuleStore>,
    policy: RetryPolicy,
}

impl RunLedger {
    pub fn new(store: Arc<dyn ModuleStore>) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn ModuleStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Append `run`, retrying only on contention.
    pub async fn record(&self, run: &RunRecord) -> RecordOutcome {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.store.insert_run(run).await {
                Ok(run_id) => {
                    if attempts > 1 {
                        tracing::info!(
                            module_id = %run.module_id,
                            run_id,
                            attempts,
                            "Run recorded after contention"
                        );
                    }
                    return RecordOutcome::Recorded { run_id, attempts };
                }
                Err(err) if err.is_contention() && attempts <= self.policy.max_retries => {
                    let delay = self.policy.jittered_delay_for(attempts);
                    tracing::warn!(
                        module_id = %run.module_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Run write contended, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        module_id = %run.module_id,
                        attempts,
                        "Failed to record run; continuing without a ledger entry: {}",
                        err
                    );
                    return RecordOutcome::Dropped {
                        attempts,
                        reason: err.to_string(),
                    };
                }
            }
        }
    }
}
