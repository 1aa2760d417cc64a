//! Outcome of best-effort multi-step operations

use serde::{Deserialize, Serialize};

/// Result of a single cleanup step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step identifier, e.g. "floating_ip:fip1"
    pub step: String,

    pub success: bool,

    pub message: String,

    pub error: Option<String>,
}

/// Aggregated result of `finalize`
///
/// Every step is attempted; failures are collected instead of aborting the
/// remaining steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub succeeded: Vec<StepResult>,

    pub failed: Vec<StepResult>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl CleanupReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn add_success(&mut self, step: impl Into<String>, message: impl Into<String>) {
        self.succeeded.push(StepResult {
            step: step.into(),
            success: true,
            message: message.into(),
            error: None,
        });
    }

    pub fn add_failure(&mut self, step: impl Into<String>, error: impl ToString) {
        let step = step.into();
        let error = error.to_string();
        tracing::warn!(step = %step, error = %error, "Cleanup step failed");
        self.failed.push(StepResult {
            step,
            success: false,
            message: String::new(),
            error: Some(error),
        });
    }

    /// Records the outcome of a step; an already absent resource counts as done
    pub fn record<T>(&mut self, step: impl Into<String>, result: crate::Result<T>) -> bool {
        match result {
            Ok(_) => {
                self.add_success(step, "done");
                true
            }
            Err(e) if e.is_not_found() => {
                self.add_success(step, "already gone");
                true
            }
            Err(e) => {
                self.add_failure(step, e);
                false
            }
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.succeeded.iter().map(|s| s.step.as_str())
    }

    /// Summary line such as "6 steps done, 1 failed"
    pub fn summary(&self) -> String {
        format!(
            "{} steps done, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )
    }
}
