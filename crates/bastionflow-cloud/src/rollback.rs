//! Rollback engine
//!
//! Deletes the resources of a ledger in strict reverse creation order.
//! Absent resources count as removed; other failures are recorded and the
//! loop carries on with the remaining resources.

use crate::error::{CloudError, Result};
use crate::ledger::{self, ProvisioningLedger, ResourceKind, ResourceRecord};
use crate::provider::ResourceProvider;
use crate::store::{self, LedgerListing, LedgerStore};
use crate::teardown::{self, TeardownOp, TeardownPhase};
use std::io;
use std::time::Instant;

/// Outcome for one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStatus {
    Deleted,
    AlreadyAbsent,
    Failed { reason: String },
}

impl RollbackStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, RollbackStatus::Failed { .. })
    }
}

impl std::fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackStatus::Deleted => write!(f, "deleted"),
            RollbackStatus::AlreadyAbsent => write!(f, "already absent"),
            RollbackStatus::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackEntry {
    pub kind: ResourceKind,
    pub id: String,
    pub status: RollbackStatus,

    /// Preparatory or local clean-up problems that did not fail the entry
    pub warnings: Vec<String>,
}

/// What happened to the stored ledger after a rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDisposition {
    /// Fully rolled back; the stored ledger was deleted
    Removed,
    /// Something is left; the stored ledger was kept for a retry
    Retained,
    /// The ledger was never stored
    Untracked,
}

/// Terminal state of a rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackState {
    RolledBack,
    PartiallyRolledBack,
}

/// Aggregated rollback result
#[derive(Debug, Clone)]
pub struct RollbackReport {
    pub deployment_name: String,

    /// Entries in the order they were attempted (newest resource first)
    pub entries: Vec<RollbackEntry>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,

    pub ledger_state: LedgerDisposition,
}

impl RollbackReport {
    pub fn new(deployment_name: impl Into<String>) -> Self {
        Self {
            deployment_name: deployment_name.into(),
            entries: Vec::new(),
            duration_ms: 0,
            ledger_state: LedgerDisposition::Untracked,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.entries.iter().any(|e| e.status.is_failed())
    }

    pub fn state(&self) -> RollbackState {
        if self.is_success() {
            RollbackState::RolledBack
        } else {
            RollbackState::PartiallyRolledBack
        }
    }

    pub fn failed(&self) -> impl Iterator<Item = &RollbackEntry> {
        self.entries.iter().filter(|e| e.status.is_failed())
    }

    pub fn count(&self, status: &RollbackStatus) -> usize {
        self.entries.iter().filter(|e| &e.status == status).count()
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }
}

/// Source of the interactive choice
pub trait Prompt: Send {
    /// Show the stored ledgers and read the user's answer
    ///
    /// `Ok(None)` means end of input.
    fn choose(&mut self, listings: &[LedgerListing]) -> io::Result<Option<String>>;
}

/// A parsed interactive answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Cancel,
    All,
    /// Zero-based index into the listing
    One(usize),
}

impl Selection {
    /// Parse an answer for a listing of `count` ledgers (numbered from 1)
    pub fn parse(input: &str, count: usize) -> Result<Self> {
        let answer = input.trim().to_ascii_lowercase();
        match answer.as_str() {
            "" | "q" | "quit" | "cancel" => Ok(Selection::Cancel),
            "a" | "all" => Ok(Selection::All),
            _ => match answer.parse::<usize>() {
                Ok(n) if (1..=count).contains(&n) => Ok(Selection::One(n - 1)),
                Ok(n) => Err(CloudError::InvalidSelection(format!(
                    "{} is not between 1 and {}",
                    n, count
                ))),
                Err(_) => Err(CloudError::InvalidSelection(format!(
                    "'{}' is not a number, 'all' or 'q'",
                    input.trim()
                ))),
            },
        }
    }
}

/// Rollback result for one selected ledger
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub key: String,
    pub outcome: std::result::Result<RollbackReport, String>,
}

#[derive(Debug, Clone)]
pub enum InteractiveOutcome {
    NothingToRollBack,
    Cancelled,
    Completed(Vec<SelectionResult>),
}

pub struct RollbackEngine<'a> {
    provider: &'a dyn ResourceProvider,
    store: &'a dyn LedgerStore,
}

impl<'a> RollbackEngine<'a> {
    pub fn new(provider: &'a dyn ResourceProvider, store: &'a dyn LedgerStore) -> Self {
        Self { provider, store }
    }

    /// Delete every recorded resource, newest first
    ///
    /// Never touches the store; the report's ledger state is `Untracked`.
    pub async fn rollback(&self, ledger: &ProvisioningLedger) -> RollbackReport {
        let start = Instant::now();
        let mut report = RollbackReport::new(&ledger.deployment_name);

        tracing::info!(
            "Rolling back '{}' ({} resources)",
            ledger.deployment_name,
            ledger.len()
        );

        for record in ledger.records().iter().rev() {
            let entry = self.tear_down(record).await;
            report.entries.push(entry);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        if report.is_success() {
            tracing::info!("Rollback of '{}' complete", ledger.deployment_name);
        } else {
            tracing::error!(
                "Rollback of '{}' left {} resource(s) behind",
                ledger.deployment_name,
                report.failed_count()
            );
        }
        report
    }

    /// Load the ledger stored under `deployment_name` and roll it back
    pub async fn rollback_by_name(&self, deployment_name: &str) -> Result<RollbackReport> {
        let ledger = ledger::load(self.store, deployment_name).await?;
        self.rollback_from_source(deployment_name, ledger).await
    }

    /// Roll back a ledger that was loaded from the store under `key`
    ///
    /// The stored ledger is deleted only when nothing failed; otherwise it
    /// is rewritten with status `partially_rolled_back`.
    pub async fn rollback_from_source(
        &self,
        key: &str,
        mut ledger: ProvisioningLedger,
    ) -> Result<RollbackReport> {
        let mut report = self.rollback(&ledger).await;

        if report.is_success() {
            self.store.delete(key).await?;
            tracing::info!("Removed rollback ledger {}", self.store.describe(key));
            report.ledger_state = LedgerDisposition::Removed;
        } else {
            ledger.mark_partially_rolled_back();
            match ledger.to_durable_form() {
                Ok(document) => {
                    if let Err(e) = self.store.write(key, &document).await {
                        // The previous document is still in place, so a retry works.
                        tracing::error!("Could not update rollback ledger '{}': {}", key, e);
                    }
                }
                Err(e) => tracing::error!("Could not update rollback ledger '{}': {}", key, e),
            }
            tracing::warn!(
                "Kept rollback ledger {} for a later retry",
                self.store.describe(key)
            );
            report.ledger_state = LedgerDisposition::Retained;
        }

        Ok(report)
    }

    /// List stored ledgers, ask which to roll back, and roll them back
    pub async fn interactive_rollback(&self, prompt: &mut dyn Prompt) -> Result<InteractiveOutcome> {
        let listings = store::list_ledgers(self.store).await?;
        if listings.is_empty() {
            return Ok(InteractiveOutcome::NothingToRollBack);
        }

        let answer = match prompt.choose(&listings)? {
            Some(answer) => answer,
            None => return Ok(InteractiveOutcome::Cancelled),
        };

        let selected: Vec<&LedgerListing> = match Selection::parse(&answer, listings.len())? {
            Selection::Cancel => return Ok(InteractiveOutcome::Cancelled),
            Selection::All => listings.iter().collect(),
            Selection::One(index) => vec![&listings[index]],
        };

        let mut results = Vec::with_capacity(selected.len());
        for listing in selected {
            let outcome = match self.rollback_by_name(&listing.key).await {
                Ok(report) => Ok(report),
                Err(e) => {
                    tracing::error!("Rollback of '{}' did not run: {}", listing.key, e);
                    Err(e.to_string())
                }
            };
            results.push(SelectionResult {
                key: listing.key.clone(),
                outcome,
            });
        }

        Ok(InteractiveOutcome::Completed(results))
    }

    async fn tear_down(&self, record: &ResourceRecord) -> RollbackEntry {
        let mut status: Option<RollbackStatus> = None;
        let mut warnings = Vec::new();

        for step in teardown::plan_for(record) {
            let description = step.op.describe();
            match step.phase {
                TeardownPhase::Prepare => {
                    if let Err(e) = self.provider.teardown(&step.op).await {
                        if e.is_not_found() {
                            tracing::debug!("{}: nothing to do ({})", description, e);
                        } else {
                            tracing::warn!("Could not {}: {}", description, e);
                            warnings.push(format!("could not {}: {}", description, e));
                        }
                    }
                }
                TeardownPhase::Delete => {
                    let result = match self.provider.teardown(&step.op).await {
                        Ok(()) => RollbackStatus::Deleted,
                        Err(e) if e.is_not_found() => RollbackStatus::AlreadyAbsent,
                        Err(e) => RollbackStatus::Failed {
                            reason: e.to_string(),
                        },
                    };
                    status = Some(result);
                }
                TeardownPhase::Settle => {
                    if status != Some(RollbackStatus::Deleted) {
                        continue;
                    }
                    match self.provider.teardown(&step.op).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => {
                            status = Some(RollbackStatus::Failed {
                                reason: format!("could not {}: {}", description, e),
                            });
                        }
                    }
                }
                TeardownPhase::Local => {
                    if matches!(status, Some(RollbackStatus::Failed { .. })) {
                        continue;
                    }
                    if let Err(e) = run_local(&step.op).await {
                        tracing::warn!("Could not {}: {}", description, e);
                        warnings.push(format!("could not {}: {}", description, e));
                    }
                }
            }
        }

        let status = status.unwrap_or(RollbackStatus::Deleted);
        match &status {
            RollbackStatus::Deleted => {
                tracing::info!("Deleted {} {}", record.kind.label(), record.id)
            }
            RollbackStatus::AlreadyAbsent => {
                tracing::warn!("{} {} was already gone", record.kind.label(), record.id)
            }
            RollbackStatus::Failed { reason } => {
                tracing::error!(
                    "Failed to delete {} {}: {}",
                    record.kind.label(),
                    record.id,
                    reason
                )
            }
        }

        RollbackEntry {
            kind: record.kind,
            id: record.id.clone(),
            status,
            warnings,
        }
    }
}

/// Local clean-up operations run by the engine itself
async fn run_local(op: &TeardownOp) -> io::Result<()> {
    match op {
        TeardownOp::RemoveKeyFile { path } => match tokio::fs::remove_file(path).await {
            Ok(()) => {
                tracing::info!("Removed key file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        },
        other => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("{} is not a local operation", other.describe()),
        )),
    }
}
