//! Resource provider trait definition
//!
//! The provider is the cloud API. Every call is awaited on its own; the
//! orchestrator never issues two provider calls at once.

use crate::error::ProviderResult;
use crate::teardown::TeardownOp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cloud resource provider abstraction
///
/// Creation calls return the provider-assigned id. Calls report
/// `ProviderError::AlreadyExists` for duplicates and
/// `ProviderError::NotFound` for absent resources so that callers can treat
/// both as idempotent successes where appropriate.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Returns the provider name (e.g. "aws")
    fn name(&self) -> &str;

    /// Availability zones currently in the `available` state
    async fn availability_zones(&self) -> ProviderResult<Vec<String>>;

    async fn create_vpc(&self, name: &str, cidr: &str) -> ProviderResult<String>;

    /// Block until the VPC is available
    async fn wait_vpc_available(&self, vpc_id: &str) -> ProviderResult<()>;

    async fn create_internet_gateway(&self, name: &str) -> ProviderResult<String>;

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ProviderResult<()>;

    async fn create_subnet(&self, spec: &SubnetSpec) -> ProviderResult<String>;

    /// Auto-assign public IPv4 addresses to instances launched in the subnet
    async fn enable_public_ip_on_launch(&self, subnet_id: &str) -> ProviderResult<()>;

    async fn create_route_table(&self, vpc_id: &str, name: &str) -> ProviderResult<String>;

    /// Route 0.0.0.0/0 through the internet gateway
    async fn create_default_route(&self, route_table_id: &str, gateway_id: &str)
    -> ProviderResult<()>;

    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str)
    -> ProviderResult<()>;

    async fn create_security_group(&self, spec: &SecurityGroupSpec) -> ProviderResult<String>;

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> ProviderResult<()>;

    /// Create a key pair and return its private key material
    async fn create_key_pair(&self, name: &str) -> ProviderResult<String>;

    async fn run_instance(&self, spec: &InstanceSpec) -> ProviderResult<String>;

    /// Block until the instance is running
    async fn wait_instance_running(&self, instance_id: &str) -> ProviderResult<()>;

    async fn create_db_subnet_group(
        &self,
        name: &str,
        description: &str,
        subnet_ids: &[String],
    ) -> ProviderResult<String>;

    async fn create_db_instance(&self, spec: &DatabaseSpec) -> ProviderResult<String>;

    /// Block until the database instance is available
    async fn wait_db_instance_available(&self, identifier: &str) -> ProviderResult<()>;

    /// Execute one teardown sub-operation
    async fn teardown(&self, op: &TeardownOp) -> ProviderResult<()>;
}

/// Whether a subnet routes to the internet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetTier {
    Public,
    Private,
}

impl std::fmt::Display for SubnetTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubnetTier::Public => write!(f, "public"),
            SubnetTier::Private => write!(f, "private"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetSpec {
    pub vpc_id: String,
    pub name: String,
    pub cidr: String,
    pub availability_zone: String,
    pub tier: SubnetTier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupSpec {
    pub vpc_id: String,
    pub name: String,
    pub description: String,
}

/// Where allowed traffic may come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngressSource {
    Cidr(String),
    SecurityGroup(String),
}

/// A single TCP ingress rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    pub port: u16,
    pub source: IngressSource,
}

impl IngressRule {
    pub fn tcp(port: u16, source: IngressSource) -> Self {
        Self { port, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub image_id: String,
    pub instance_type: String,
    pub key_name: String,
    pub security_group_id: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSpec {
    pub identifier: String,
    pub db_name: String,
    pub instance_class: String,
    pub engine: String,
    pub username: String,
    pub password: String,
    pub allocated_storage: i32,
    pub storage_type: String,
    pub port: u16,
    pub security_group_id: String,
    pub subnet_group_name: String,
}

/// Readiness polling configuration
///
/// A multiplier of 1.0 polls at a fixed interval.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitConfig {
    /// Maximum number of polls
    pub max_attempts: u32,

    /// Delay after the first poll
    pub initial_delay: Duration,

    /// Upper bound for any delay
    pub max_delay: Duration,

    /// Backoff multiplier
    pub multiplier: f64,
}

impl WaitConfig {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: interval,
            max_delay: interval,
            multiplier: 1.0,
        }
    }

    /// Delay to sleep after the given (zero-based) attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let delay = self.initial_delay.mul_f64(factor);
        delay.min(self.max_delay)
    }

    /// Upper bound of the total time spent sleeping
    pub fn max_wait(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::fixed(40, Duration::from_secs(15))
    }
}
