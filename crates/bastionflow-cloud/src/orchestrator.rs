//! Create and rollback entry points
//!
//! Ties a workflow, the sequencer, the rollback engine and the ledger store
//! together.

use crate::error::{CloudError, Result};
use crate::ledger::{self, ProvisioningLedger, ResourceRecord};
use crate::provider::ResourceProvider;
use crate::rollback::{InteractiveOutcome, Prompt, RollbackEngine, RollbackReport};
use crate::sequencer::{Sequencer, StepError};
use crate::store::{FileLedgerStore, LedgerStore};
use crate::workflow::Workflow;
use std::collections::BTreeMap;
use std::path::PathBuf;

const MAX_DEPLOYMENT_NAME_LEN: usize = 64;

/// Check that a deployment name is usable as a ledger key and a name prefix
pub fn validate_deployment_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CloudError::Validation(
            "deployment name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_DEPLOYMENT_NAME_LEN {
        return Err(CloudError::Validation(format!(
            "deployment name must be at most {} characters",
            MAX_DEPLOYMENT_NAME_LEN
        )));
    }
    if name.starts_with(['.', '-']) {
        return Err(CloudError::Validation(format!(
            "deployment name '{}' must not start with '.' or '-'",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(CloudError::Validation(format!(
            "deployment name '{}' may only contain letters, digits, '-', '_' and '.'",
            name
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Roll back automatically when a step fails
    pub auto_rollback: bool,
}

/// Terminal outcome of `create`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// Every step succeeded; the ledger is stored
    Complete,
    /// A step failed and everything created was removed
    FailedRolledBack,
    /// A step failed and the automatic rollback left resources behind
    FailedPartiallyRolledBack,
    /// A step failed; created resources remain and the ledger is stored
    FailedRetained,
}

impl std::fmt::Display for CreateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateOutcome::Complete => write!(f, "complete"),
            CreateOutcome::FailedRolledBack => write!(f, "failed, rolled back"),
            CreateOutcome::FailedPartiallyRolledBack => write!(f, "failed, partially rolled back"),
            CreateOutcome::FailedRetained => write!(f, "failed, resources retained"),
        }
    }
}

/// What `create` did
#[derive(Debug, Clone)]
pub struct CreateReport {
    pub deployment_name: String,
    pub outcome: CreateOutcome,

    /// Role to id for the workflow's main resources
    pub summary: BTreeMap<String, String>,

    /// Resources recorded during the run, in creation order
    pub resources: Vec<ResourceRecord>,

    pub failure: Option<StepError>,

    /// Present when an automatic rollback ran
    pub rollback: Option<RollbackReport>,

    /// Whether a ledger is stored for this deployment afterwards
    pub ledger_persisted: bool,
}

impl CreateReport {
    pub fn is_success(&self) -> bool {
        self.outcome == CreateOutcome::Complete
    }
}

/// Which ledger(s) to roll back
pub enum RollbackTarget<'p> {
    Name(String),
    File(PathBuf),
    Interactive(&'p mut dyn Prompt),
}

#[derive(Debug, Clone)]
pub enum RollbackResult {
    Single(RollbackReport),
    Interactive(InteractiveOutcome),
}

pub struct Orchestrator<'a> {
    provider: &'a dyn ResourceProvider,
    store: &'a dyn LedgerStore,
}

impl<'a> Orchestrator<'a> {
    pub fn new(provider: &'a dyn ResourceProvider, store: &'a dyn LedgerStore) -> Self {
        Self { provider, store }
    }

    pub fn engine(&self) -> RollbackEngine<'a> {
        RollbackEngine::new(self.provider, self.store)
    }

    /// Provision a workflow under `deployment_name`
    ///
    /// Errors are returned for problems that stop the run before anything
    /// is created and for ledger persistence failures. A failing step is
    /// not an error; it is reported through the returned outcome.
    pub async fn create(
        &self,
        workflow: &dyn Workflow,
        deployment_name: &str,
        options: &CreateOptions,
    ) -> Result<CreateReport> {
        validate_deployment_name(deployment_name)?;

        match self.store.read(deployment_name).await {
            Ok(_) => return Err(CloudError::DeploymentExists(deployment_name.to_string())),
            Err(CloudError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let steps = workflow.plan(self.provider, deployment_name).await?;
        tracing::info!(
            "Provisioning '{}' with the {} workflow ({} steps) on {}",
            deployment_name,
            workflow.name(),
            steps.len(),
            self.provider.name()
        );

        let run = Sequencer::new(self.provider, steps)
            .run(ProvisioningLedger::new(deployment_name))
            .await;
        let mut ledger = run.ledger;

        for role in workflow.summary_roles() {
            if let Some(id) = run.context.get(role) {
                ledger.set_summary(*role, id);
            }
        }

        let mut report = CreateReport {
            deployment_name: deployment_name.to_string(),
            outcome: CreateOutcome::Complete,
            summary: ledger.summary.clone(),
            resources: ledger.records().to_vec(),
            failure: run.failure,
            rollback: None,
            ledger_persisted: false,
        };

        if report.failure.is_none() {
            self.persist_loudly(&ledger).await?;
            report.ledger_persisted = true;
            tracing::info!("Deployment '{}' created", deployment_name);
            return Ok(report);
        }

        if options.auto_rollback {
            tracing::warn!(
                "Rolling back {} resource(s) of '{}'",
                ledger.len(),
                deployment_name
            );
            let rollback = self.engine().rollback(&ledger).await;
            if rollback.is_success() {
                self.store.delete(deployment_name).await?;
                report.outcome = CreateOutcome::FailedRolledBack;
            } else {
                ledger.mark_partially_rolled_back();
                self.persist_loudly(&ledger).await?;
                report.ledger_persisted = true;
                report.outcome = CreateOutcome::FailedPartiallyRolledBack;
            }
            report.rollback = Some(rollback);
        } else {
            self.persist_loudly(&ledger).await?;
            report.ledger_persisted = true;
            report.outcome = CreateOutcome::FailedRetained;
        }

        Ok(report)
    }

    /// Roll back by name, by ledger file or interactively
    pub async fn rollback(&self, target: RollbackTarget<'_>) -> Result<RollbackResult> {
        match target {
            RollbackTarget::Name(name) => {
                let report = self.engine().rollback_by_name(&name).await?;
                Ok(RollbackResult::Single(report))
            }
            RollbackTarget::File(path) => {
                if !path.is_file() {
                    return Err(CloudError::NotFound(path.display().to_string()));
                }
                let (store, key) = FileLedgerStore::for_file(&path)?;
                let ledger = ledger::load(&store, &key).await?;
                let report = RollbackEngine::new(self.provider, &store)
                    .rollback_from_source(&key, ledger)
                    .await?;
                Ok(RollbackResult::Single(report))
            }
            RollbackTarget::Interactive(prompt) => {
                let outcome = self.engine().interactive_rollback(prompt).await?;
                Ok(RollbackResult::Interactive(outcome))
            }
        }
    }

    /// Persist, and on failure dump the ledger to the log so it is not lost
    async fn persist_loudly(&self, ledger: &ProvisioningLedger) -> Result<()> {
        if let Err(e) = ledger::persist(self.store, ledger).await {
            tracing::error!(
                "Could not save the rollback ledger for '{}': {}",
                ledger.deployment_name,
                e
            );
            match ledger.to_durable_form() {
                Ok(document) => tracing::error!("Rollback ledger contents:\n{}", document),
                Err(_) => {
                    for record in ledger.records() {
                        tracing::error!("Unsaved resource: {} {}", record.kind, record.id);
                    }
                }
            }
            return Err(e);
        }
        Ok(())
    }
}
