//! Convergence polling against the automation-status endpoint.
//!
//! After a successful write the management plane's agents apply the plan
//! asynchronously; the poller watches every process's last-achieved goal
//! version until all of them reach the target, or a bounded number of rounds
//! elapses. Timing out is informational, not a failure: the plan keeps
//! rolling out whether or not this caller observes it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::api::{endpoints, ApiTransport, OpsManagerClient};
use crate::error::OmResult;

/// Delay between polling rounds in the reference behavior.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Polling rounds before giving up in the reference behavior.
pub const DEFAULT_MAX_ROUNDS: u32 = 20;

/// Response of the automation-status endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatus {
    /// Monotonic counter the management plane increments on each accepted
    /// config write.
    pub goal_version: i64,
    #[serde(default)]
    pub processes: Vec<ProcessStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AutomationStatus {
    /// True when every process reports the current goal version.
    pub fn converged(&self) -> bool {
        self.processes
            .iter()
            .all(|p| p.last_goal_version_achieved == self.goal_version)
    }
}

/// Per-process rollout progress.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_goal_version_achieved: i64,
    /// Non-zero while the agent is stuck on an error; the plan may still
    /// recover.
    #[serde(default)]
    pub error_code: i64,
    #[serde(default)]
    pub error_code_description: String,
    #[serde(default)]
    pub error_code_human_readable: String,
    #[serde(default)]
    pub error_string: String,
    /// Remaining plan stages for this process.
    #[serde(default)]
    pub plan: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of waiting for a plan rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Every process reached the goal version.
    Converged {
        /// Rounds polled, including the one that observed convergence.
        rounds: u32,
    },
    /// The bound elapsed first. Non-fatal: the management plane continues
    /// applying the plan asynchronously.
    TimedOut {
        /// Goal version that was still being rolled out.
        goal_version: i64,
        rounds: u32,
    },
}

/// Polls the automation-status endpoint until the plan converges or the
/// round bound elapses.
pub struct ConvergencePoller<'a, T> {
    client: &'a OpsManagerClient<T>,
    group_id: String,
    interval: Duration,
    max_rounds: u32,
}

impl<'a, T: ApiTransport> ConvergencePoller<'a, T> {
    pub fn new(client: &'a OpsManagerClient<T>, group_id: impl Into<String>) -> Self {
        Self {
            client,
            group_id: group_id.into(),
            interval: DEFAULT_POLL_INTERVAL,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    /// Replaces the delay between rounds.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Replaces the round bound.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Blocks (sleep-then-recheck) until convergence or the bound.
    ///
    /// Processes stuck behind the goal version with a non-zero error code
    /// are surfaced as warnings; polling continues regardless.
    pub async fn wait_for_goal_state(&self) -> OmResult<PlanOutcome> {
        let endpoint = endpoints::automation_status(&self.group_id);
        let mut goal_version = 0;

        for round in 1..=self.max_rounds {
            let status: AutomationStatus = self.client.get(&endpoint).await?;
            goal_version = status.goal_version;

            if status.converged() {
                info!(goal_version, rounds = round, "automation plan converged");
                return Ok(PlanOutcome::Converged { rounds: round });
            }

            for process in &status.processes {
                if process.last_goal_version_achieved == status.goal_version {
                    continue;
                }
                if process.error_code != 0 {
                    warn!(
                        process = %process.name,
                        error_code = process.error_code,
                        description = %process.error_code_description,
                        detail = %process.error_string,
                        "process reports an error while behind the goal version"
                    );
                } else {
                    debug!(
                        process = %process.name,
                        achieved = process.last_goal_version_achieved,
                        goal = status.goal_version,
                        stages = process.plan.len(),
                        "process still applying plan"
                    );
                }
            }

            if round < self.max_rounds {
                tokio::time::sleep(self.interval).await;
            }
        }

        warn!(
            goal_version,
            rounds = self.max_rounds,
            "plan not observed converged within the polling bound; \
             the management plane continues applying it"
        );
        Ok(PlanOutcome::TimedOut {
            goal_version,
            rounds: self.max_rounds,
        })
    }
}
