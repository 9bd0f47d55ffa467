//! Step orchestrator
//!
//! Provider operations are fixed, ordered lists of steps. Steps run one at a
//! time; the first failure stops the sequence and is returned annotated with
//! the step description.

use crate::error::{CloudError, Result};
use futures_util::future::BoxFuture;
use std::future::Future;

/// One named action against a resource or data source
pub struct Step<'a> {
    description: String,
    tolerate_not_found: bool,
    action: BoxFuture<'a, Result<()>>,
}

impl<'a> Step<'a> {
    pub fn new<F>(description: impl Into<String>, action: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        Self {
            description: description.into(),
            tolerate_not_found: false,
            action: Box::pin(action),
        }
    }

    /// Teardown step: `NotFound` counts as success
    pub fn teardown<F>(description: impl Into<String>, action: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'a,
    {
        Self {
            tolerate_not_found: true,
            ..Self::new(description, action)
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Run `steps` in order, stopping at the first error
pub async fn run_steps(steps: Vec<Step<'_>>) -> Result<()> {
    let total = steps.len();
    for (index, step) in steps.into_iter().enumerate() {
        tracing::info!("[{}/{}] {}", index + 1, total, step.description);
        match step.action.await {
            Ok(()) => {}
            Err(err) if step.tolerate_not_found && err.is_not_found() => {
                tracing::debug!("{}: already absent", step.description);
            }
            Err(err) => {
                return Err(CloudError::StepFailed {
                    description: step.description,
                    source: Box::new(err),
                });
            }
        }
    }
    Ok(())
}
