//! Scripted signal source with a declared latency/failure profile.
//!
//! Used by tests and demos to exercise the orchestrator without any
//! network: succeed after a delay, fail transiently a number of times,
//! fail permanently, or never return at all.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Observation, SignalRequest, SignalSource, SourceError};
use crate::domain::SourceId;

/// What a scripted source does when invoked
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Report the observation after `delay`
    Succeed { delay: Duration, observation: Observation },

    /// Fail transiently on the first `failures` calls, then succeed
    Flaky {
        failures: u32,
        delay: Duration,
        observation: Observation,
    },

    /// Fail transiently on every call
    AlwaysTransient { delay: Duration },

    /// Fail permanently
    Permanent { reason: String },

    /// Never return
    Hang,
}

/// Signal source driven by a `Behavior`
#[derive(Debug)]
pub struct ScriptedSource {
    id: SourceId,
    behavior: Behavior,
    nominal_cost: Duration,
    retryable: bool,
    calls: AtomicU32,
}

impl ScriptedSource {
    pub fn new(id: SourceId, behavior: Behavior) -> Self {
        Self {
            id,
            behavior,
            nominal_cost: Duration::from_millis(50),
            retryable: true,
            calls: AtomicU32::new(0),
        }
    }

    /// Succeed immediately with the given observation
    pub fn succeeding(id: SourceId, observation: Observation) -> Self {
        Self::new(
            id,
            Behavior::Succeed {
                delay: Duration::ZERO,
                observation,
            },
        )
    }

    pub fn with_nominal_cost(mut self, cost: Duration) -> Self {
        self.nominal_cost = cost;
        self
    }

    pub fn non_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// Number of times `invoke` was called
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalSource for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn nominal_cost(&self) -> Duration {
        self.nominal_cost
    }

    fn retryable(&self) -> bool {
        self.retryable
    }

    async fn invoke(&self, _request: &SignalRequest) -> Result<Observation, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        match &self.behavior {
            Behavior::Succeed { delay, observation } => {
                tokio::time::sleep(*delay).await;
                Ok(observation.clone())
            }
            Behavior::Flaky {
                failures,
                delay,
                observation,
            } => {
                tokio::time::sleep(*delay).await;
                if call <= *failures {
                    Err(SourceError::Transient(format!("scripted failure {}", call)))
                } else {
                    Ok(observation.clone())
                }
            }
            Behavior::AlwaysTransient { delay } => {
                tokio::time::sleep(*delay).await;
                Err(SourceError::Transient(format!("scripted failure {}", call)))
            }
            Behavior::Permanent { reason } => Err(SourceError::Permanent(reason.clone())),
            Behavior::Hang => std::future::pending().await,
        }
    }
}
