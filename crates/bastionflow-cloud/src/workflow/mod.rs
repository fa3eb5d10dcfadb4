//! Provisioning workflows
//!
//! A workflow validates its input, checks cheap external prerequisites and
//! hands the sequencer its fixed list of steps.

pub mod bastion;

use crate::error::Result;
use crate::provider::ResourceProvider;
use crate::sequencer::ProvisioningStep;
use async_trait::async_trait;

pub use bastion::{BastionRequest, BastionWorkflow, ComputeProfile, DatabaseProfile};

#[async_trait]
pub trait Workflow: Send + Sync {
    /// Workflow name, e.g. "bastion"
    fn name(&self) -> &str;

    /// Validate and build the ordered steps
    ///
    /// Fails with `CloudError::Validation` before anything is created.
    async fn plan(
        &self,
        provider: &dyn ResourceProvider,
        deployment_name: &str,
    ) -> Result<Vec<Box<dyn ProvisioningStep>>>;

    /// Roles copied from the run context into the ledger summary
    fn summary_roles(&self) -> &[&'static str];
}
