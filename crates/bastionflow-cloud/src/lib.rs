//! Bastionflow provisioning core
//!
//! Provisions an ordered chain of dependent cloud resources, records each
//! created resource in a rollback ledger, and tears everything down in
//! reverse order when a run fails or when asked to later.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                 bastion CLI                      │
//! │          (create / rollback / list)              │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │               bastionflow-cloud                  │
//! │  ┌──────────────┐  ┌──────────────────────────┐ │
//! │  │ Orchestrator │──│ Workflow (bastion)       │ │
//! │  └──────┬───────┘  └──────────────────────────┘ │
//! │  ┌──────▼───────┐  ┌──────────────┐             │
//! │  │  Sequencer   │  │ Rollback     │             │
//! │  │              │  │ engine       │             │
//! │  └──────┬───────┘  └──────┬───────┘             │
//! │  ┌──────▼─────────────────▼───────┐             │
//! │  │ Ledger + LedgerStore           │             │
//! │  └────────────────────────────────┘             │
//! │  trait ResourceProvider { ... }                  │
//! └───────┬─────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │      aws      │
//! │   provider    │
//! └───────────────┘
//! ```

pub mod cidr;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod provider;
pub mod rollback;
pub mod sequencer;
pub mod store;
pub mod teardown;
pub mod waiter;
pub mod workflow;

// Re-exports
pub use cidr::Ipv4Cidr;
pub use error::{CloudError, ProviderError, ProviderResult, Result};
pub use ledger::{LedgerStatus, Metadata, ProvisioningLedger, ResourceKind, ResourceRecord};
pub use orchestrator::{
    CreateOptions, CreateOutcome, CreateReport, Orchestrator, RollbackResult, RollbackTarget,
};
pub use provider::{
    DatabaseSpec, IngressRule, IngressSource, InstanceSpec, ResourceProvider, SecurityGroupSpec,
    SubnetSpec, SubnetTier, WaitConfig,
};
pub use rollback::{
    InteractiveOutcome, LedgerDisposition, Prompt, RollbackEngine, RollbackEntry, RollbackReport,
    RollbackState, RollbackStatus, SelectionResult,
};
pub use sequencer::{
    CreatedResource, ProvisioningStep, SequenceRun, Sequencer, StepContext, StepError,
    StepFailure, StepOutput,
};
pub use store::{FileLedgerStore, LedgerInfo, LedgerListing, LedgerStore, MemoryLedgerStore};
pub use teardown::{TeardownOp, TeardownPhase, TeardownStep};
pub use waiter::wait_until;
pub use workflow::{BastionRequest, BastionWorkflow, ComputeProfile, DatabaseProfile, Workflow};
