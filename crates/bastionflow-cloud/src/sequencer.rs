//! Provisioning sequencer
//!
//! Runs a fixed, ordered list of creation steps. Each step sees the ids
//! published by the steps before it. The first failure stops the run; the
//! ledger then holds exactly what has to be rolled back.

use crate::error::ProviderError;
use crate::ledger::{Metadata, ProvisioningLedger, ResourceKind};
use crate::provider::ResourceProvider;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Ids published so far, keyed by role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepContext {
    deployment_name: String,
    values: BTreeMap<String, String>,
}

impl StepContext {
    pub fn new(deployment_name: impl Into<String>) -> Self {
        Self {
            deployment_name: deployment_name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn deployment_name(&self) -> &str {
        &self.deployment_name
    }

    pub fn get(&self, role: &str) -> Option<&str> {
        self.values.get(role).map(|s| s.as_str())
    }

    /// Id published under `role` by an earlier step
    pub fn require(&self, role: &str) -> Result<&str, ProviderError> {
        self.get(role).ok_or_else(|| {
            ProviderError::InvalidResponse(format!("no '{}' was published by an earlier step", role))
        })
    }

    pub fn insert(&mut self, role: impl Into<String>, id: impl Into<String>) {
        self.values.insert(role.into(), id.into());
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

/// A resource a step created
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedResource {
    pub kind: ResourceKind,
    pub id: String,
    pub metadata: Metadata,
}

impl CreatedResource {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata
            .insert(key.to_string(), serde_json::Value::String(value.into()));
        self
    }
}

/// What a successful step produced
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutput {
    /// A new resource; recorded for rollback
    Created(CreatedResource),
    /// The resource already existed; usable but not ours to delete
    Existing(String),
    /// Nothing new was created
    Configured,
}

/// A failed step
///
/// `created` is set when the step's creation call succeeded but a follow-up
/// call (attach, wait, authorize) failed afterwards.
#[derive(Debug)]
pub struct StepFailure {
    pub created: Option<CreatedResource>,
    pub error: ProviderError,
}

impl StepFailure {
    pub fn after_create(created: CreatedResource, error: ProviderError) -> Self {
        Self {
            created: Some(created),
            error,
        }
    }
}

impl From<ProviderError> for StepFailure {
    fn from(error: ProviderError) -> Self {
        Self {
            created: None,
            error,
        }
    }
}

/// Error describing which step stopped a run
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Step '{step}' failed: {source}")]
pub struct StepError {
    pub step: String,
    #[source]
    pub source: ProviderError,
}

/// One resource-creation step of a workflow
#[async_trait]
pub trait ProvisioningStep: Send + Sync {
    /// Display name, e.g. "Create VPC"
    fn name(&self) -> &str;

    /// Role under which the produced id is published
    fn role(&self) -> &str;

    async fn execute(
        &self,
        provider: &dyn ResourceProvider,
        context: &StepContext,
    ) -> Result<StepOutput, StepFailure>;
}

/// Result of running a sequence
#[derive(Debug)]
pub struct SequenceRun {
    pub ledger: ProvisioningLedger,
    pub context: StepContext,
    pub steps_completed: usize,
    pub failure: Option<StepError>,
}

impl SequenceRun {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Runs steps one at a time against a provider
pub struct Sequencer<'a> {
    provider: &'a dyn ResourceProvider,
    steps: Vec<Box<dyn ProvisioningStep>>,
}

impl<'a> Sequencer<'a> {
    pub fn new(provider: &'a dyn ResourceProvider, steps: Vec<Box<dyn ProvisioningStep>>) -> Self {
        Self { provider, steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step in order, stopping at the first failure
    pub async fn run(self, mut ledger: ProvisioningLedger) -> SequenceRun {
        let mut context = StepContext::new(ledger.deployment_name.clone());
        let total = self.steps.len();
        let mut steps_completed = 0;

        for (index, step) in self.steps.iter().enumerate() {
            tracing::info!("[{}/{}] {}", index + 1, total, step.name());

            match step.execute(self.provider, &context).await {
                Ok(StepOutput::Created(created)) => {
                    context.insert(step.role(), created.id.clone());
                    ledger.append(created.kind, created.id, created.metadata);
                }
                Ok(StepOutput::Existing(id)) => {
                    tracing::warn!(
                        "{}: {} already exists; reusing it without recording it for rollback",
                        step.name(),
                        id
                    );
                    context.insert(step.role(), id);
                }
                Ok(StepOutput::Configured) => {}
                Err(failure) => {
                    if let Some(created) = failure.created {
                        ledger.append(created.kind, created.id, created.metadata);
                    }
                    tracing::error!("{} failed: {}", step.name(), failure.error);
                    ledger.mark_failed();
                    return SequenceRun {
                        ledger,
                        context,
                        steps_completed,
                        failure: Some(StepError {
                            step: step.name().to_string(),
                            source: failure.error,
                        }),
                    };
                }
            }
            steps_completed += 1;
        }

        ledger.mark_complete();
        SequenceRun {
            ledger,
            context,
            steps_completed,
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_require() {
        let mut context = StepContext::new("demo");
        context.insert("vpc_id", "vpc-1");

        assert_eq!(context.require("vpc_id"), Ok("vpc-1"));
        assert!(matches!(
            context.require("subnet_id"),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_step_error_message() {
        let err = StepError {
            step: "Create subnet".into(),
            source: ProviderError::api("InvalidSubnet.Conflict", "overlaps"),
        };
        assert_eq!(
            err.to_string(),
            "Step 'Create subnet' failed: API error [InvalidSubnet.Conflict]: overlaps"
        );
    }
}
