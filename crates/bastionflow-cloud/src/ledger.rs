//! Rollback ledger
//!
//! The ledger is the ordered record of every resource created during one
//! provisioning run. Its order is creation order; the rollback engine replays
//! it backwards. It is stored as `<deployment_name>_rollback.json`.

use crate::error::{CloudError, Result};
use crate::store::LedgerStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LEDGER_VERSION: u32 = 1;

/// Kind of a cloud resource recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vpc,
    InternetGateway,
    Subnet,
    RouteTable,
    SecurityGroup,
    KeyPair,
    Ec2Instance,
    DbSubnetGroup,
    RdsInstance,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::Subnet => "subnet",
            ResourceKind::RouteTable => "route_table",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::KeyPair => "key_pair",
            ResourceKind::Ec2Instance => "ec2_instance",
            ResourceKind::DbSubnetGroup => "db_subnet_group",
            ResourceKind::RdsInstance => "rds_instance",
        }
    }

    /// Human readable name for CLI output
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Vpc => "VPC",
            ResourceKind::InternetGateway => "Internet gateway",
            ResourceKind::Subnet => "Subnet",
            ResourceKind::RouteTable => "Route table",
            ResourceKind::SecurityGroup => "Security group",
            ResourceKind::KeyPair => "Key pair",
            ResourceKind::Ec2Instance => "EC2 instance",
            ResourceKind::DbSubnetGroup => "DB subnet group",
            ResourceKind::RdsInstance => "RDS instance",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific fields needed to tear a resource down
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One created resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    #[serde(rename = "type")]
    pub kind: ResourceKind,

    /// Provider-assigned identifier
    pub id: String,

    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(flatten)]
    pub metadata: Metadata,
}

impl ResourceRecord {
    pub fn new(kind: ResourceKind, id: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            kind,
            id: id.into(),
            created_at: Utc::now(),
            metadata,
        }
    }

    /// Get a string metadata field
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Lifecycle status of a stored ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// Steps are still running
    InProgress,
    /// Every step succeeded
    Complete,
    /// A step failed; the ledger holds the partial run
    Failed,
    /// A rollback ran but some resources could not be removed
    PartiallyRolledBack,
}

impl Default for LedgerStatus {
    // Ledgers without a status were only ever written after a successful run.
    fn default() -> Self {
        LedgerStatus::Complete
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerStatus::InProgress => write!(f, "in progress"),
            LedgerStatus::Complete => write!(f, "complete"),
            LedgerStatus::Failed => write!(f, "failed"),
            LedgerStatus::PartiallyRolledBack => write!(f, "partially rolled back"),
        }
    }
}

fn legacy_version() -> u32 {
    LEDGER_VERSION
}

/// Record of one provisioning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningLedger {
    /// Ledger format version
    #[serde(default = "legacy_version")]
    pub version: u32,

    /// Logical deployment name, also the storage key
    #[serde(alias = "vpc_name")]
    pub deployment_name: String,

    /// When the run started
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub status: LedgerStatus,

    /// Created resources in creation order
    #[serde(default)]
    resources: Vec<ResourceRecord>,

    /// Logical role (e.g. "vpc_id") to resource id, for callers
    #[serde(default, alias = "main_resources")]
    pub summary: BTreeMap<String, String>,
}

impl ProvisioningLedger {
    pub fn new(deployment_name: impl Into<String>) -> Self {
        Self {
            version: LEDGER_VERSION,
            deployment_name: deployment_name.into(),
            created_at: Utc::now(),
            status: LedgerStatus::InProgress,
            resources: Vec::new(),
            summary: BTreeMap::new(),
        }
    }

    /// Record a resource whose creation the provider has confirmed
    pub fn append(
        &mut self,
        kind: ResourceKind,
        id: impl Into<String>,
        metadata: Metadata,
    ) -> &ResourceRecord {
        let record = ResourceRecord::new(kind, id, metadata);
        tracing::info!("Recorded {} {} for rollback", record.kind, record.id);
        self.resources.push(record);
        &self.resources[self.resources.len() - 1]
    }

    /// Records in creation order
    pub fn records(&self) -> &[ResourceRecord] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn set_summary(&mut self, role: impl Into<String>, id: impl Into<String>) {
        self.summary.insert(role.into(), id.into());
    }

    pub fn mark_complete(&mut self) {
        self.status = LedgerStatus::Complete;
    }

    pub fn mark_failed(&mut self) {
        self.status = LedgerStatus::Failed;
    }

    pub fn mark_partially_rolled_back(&mut self) {
        self.status = LedgerStatus::PartiallyRolledBack;
    }

    /// Serialize to the stored JSON document
    pub fn to_durable_form(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| CloudError::Persistence {
            key: self.deployment_name.clone(),
            reason: e.to_string(),
        })
    }

    /// Parse a stored JSON document
    pub fn from_durable_form(key: &str, text: &str) -> Result<Self> {
        let ledger: ProvisioningLedger =
            serde_json::from_str(text).map_err(|e| CloudError::CorruptData {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        if ledger.version > LEDGER_VERSION {
            return Err(CloudError::CorruptData {
                key: key.to_string(),
                reason: format!(
                    "ledger version {} is newer than supported version {}",
                    ledger.version, LEDGER_VERSION
                ),
            });
        }

        Ok(ledger)
    }
}

/// Write a ledger to the store under its deployment name
pub async fn persist(store: &dyn LedgerStore, ledger: &ProvisioningLedger) -> Result<()> {
    let document = ledger.to_durable_form()?;
    store.write(&ledger.deployment_name, &document).await?;
    tracing::info!(
        "Saved rollback ledger '{}' ({} resources)",
        ledger.deployment_name,
        ledger.len()
    );
    Ok(())
}

/// Read the ledger stored under `key`
pub async fn load(store: &dyn LedgerStore, key: &str) -> Result<ProvisioningLedger> {
    let text = store.read(key).await?;
    ProvisioningLedger::from_durable_form(key, &text)
}

/// RFC 3339 timestamps; naive ISO 8601 timestamps are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
