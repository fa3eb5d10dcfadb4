//! Per-kind teardown strategies
//!
//! Each recorded resource maps to an ordered list of sub-operations. The
//! rollback engine runs them in order and interprets failures by phase, so a
//! resource kind that needs more than a single delete call never has to be
//! special-cased in the rollback loop.

use crate::ledger::{ResourceKind, ResourceRecord};
use std::path::PathBuf;

/// Metadata key holding the VPC an internet gateway is attached to
pub const META_VPC_ID: &str = "vpc_id";

/// Metadata key holding the local private key file of a key pair
pub const META_KEY_FILE: &str = "key_file";

/// One provider call (or local action) in a resource's teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOp {
    DeleteDbInstance { identifier: String },
    WaitDbInstanceDeleted { identifier: String },
    DeleteDbSubnetGroup { name: String },
    TerminateInstance { instance_id: String },
    WaitInstanceTerminated { instance_id: String },
    DeleteSecurityGroup { group_id: String },
    DeleteKeyPair { name: String },
    RemoveKeyFile { path: PathBuf },
    DisassociateRouteTable { route_table_id: String },
    DeleteRouteTable { route_table_id: String },
    DeleteSubnet { subnet_id: String },
    DetachInternetGateway { gateway_id: String, vpc_id: String },
    DeleteInternetGateway { gateway_id: String },
    DeleteVpc { vpc_id: String },
}

impl TeardownOp {
    /// Short description for logs and reports
    pub fn describe(&self) -> String {
        match self {
            TeardownOp::DeleteDbInstance { identifier } => {
                format!("delete RDS instance {}", identifier)
            }
            TeardownOp::WaitDbInstanceDeleted { identifier } => {
                format!("wait for RDS instance {} to be deleted", identifier)
            }
            TeardownOp::DeleteDbSubnetGroup { name } => format!("delete DB subnet group {}", name),
            TeardownOp::TerminateInstance { instance_id } => {
                format!("terminate EC2 instance {}", instance_id)
            }
            TeardownOp::WaitInstanceTerminated { instance_id } => {
                format!("wait for EC2 instance {} to terminate", instance_id)
            }
            TeardownOp::DeleteSecurityGroup { group_id } => {
                format!("delete security group {}", group_id)
            }
            TeardownOp::DeleteKeyPair { name } => format!("delete key pair {}", name),
            TeardownOp::RemoveKeyFile { path } => format!("remove key file {}", path.display()),
            TeardownOp::DisassociateRouteTable { route_table_id } => {
                format!("disassociate route table {}", route_table_id)
            }
            TeardownOp::DeleteRouteTable { route_table_id } => {
                format!("delete route table {}", route_table_id)
            }
            TeardownOp::DeleteSubnet { subnet_id } => format!("delete subnet {}", subnet_id),
            TeardownOp::DetachInternetGateway { gateway_id, vpc_id } => {
                format!("detach internet gateway {} from {}", gateway_id, vpc_id)
            }
            TeardownOp::DeleteInternetGateway { gateway_id } => {
                format!("delete internet gateway {}", gateway_id)
            }
            TeardownOp::DeleteVpc { vpc_id } => format!("delete VPC {}", vpc_id),
        }
    }
}

/// How a sub-operation's failure affects the resource's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownPhase {
    /// Failure is a warning; later operations still run
    Prepare,
    /// Decides the outcome; not-found means the resource is already gone
    Delete,
    /// Waits for the deletion to finish; failure fails the resource
    Settle,
    /// Local clean-up, best effort
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStep {
    pub phase: TeardownPhase,
    pub op: TeardownOp,
}

impl TeardownStep {
    fn new(phase: TeardownPhase, op: TeardownOp) -> Self {
        Self { phase, op }
    }
}

/// Ordered teardown for one recorded resource
pub fn plan_for(record: &ResourceRecord) -> Vec<TeardownStep> {
    use TeardownPhase::*;

    let id = record.id.clone();
    match record.kind {
        ResourceKind::RdsInstance => vec![
            TeardownStep::new(Delete, TeardownOp::DeleteDbInstance { identifier: id.clone() }),
            TeardownStep::new(Settle, TeardownOp::WaitDbInstanceDeleted { identifier: id }),
        ],
        ResourceKind::DbSubnetGroup => {
            vec![TeardownStep::new(Delete, TeardownOp::DeleteDbSubnetGroup { name: id })]
        }
        ResourceKind::Ec2Instance => vec![
            TeardownStep::new(Delete, TeardownOp::TerminateInstance { instance_id: id.clone() }),
            TeardownStep::new(Settle, TeardownOp::WaitInstanceTerminated { instance_id: id }),
        ],
        ResourceKind::SecurityGroup => {
            vec![TeardownStep::new(Delete, TeardownOp::DeleteSecurityGroup { group_id: id })]
        }
        ResourceKind::KeyPair => {
            let mut steps = vec![TeardownStep::new(Delete, TeardownOp::DeleteKeyPair { name: id })];
            if let Some(path) = record.metadata_str(META_KEY_FILE) {
                steps.push(TeardownStep::new(
                    Local,
                    TeardownOp::RemoveKeyFile { path: PathBuf::from(path) },
                ));
            }
            steps
        }
        ResourceKind::RouteTable => vec![
            TeardownStep::new(
                Prepare,
                TeardownOp::DisassociateRouteTable { route_table_id: id.clone() },
            ),
            TeardownStep::new(Delete, TeardownOp::DeleteRouteTable { route_table_id: id }),
        ],
        ResourceKind::Subnet => {
            vec![TeardownStep::new(Delete, TeardownOp::DeleteSubnet { subnet_id: id })]
        }
        ResourceKind::InternetGateway => {
            let mut steps = Vec::new();
            match record.metadata_str(META_VPC_ID) {
                Some(vpc_id) => steps.push(TeardownStep::new(
                    Prepare,
                    TeardownOp::DetachInternetGateway {
                        gateway_id: id.clone(),
                        vpc_id: vpc_id.to_string(),
                    },
                )),
                None => tracing::warn!(
                    "Internet gateway {} has no recorded VPC; skipping detach",
                    id
                ),
            }
            steps.push(TeardownStep::new(
                Delete,
                TeardownOp::DeleteInternetGateway { gateway_id: id },
            ));
            steps
        }
        ResourceKind::Vpc => vec![TeardownStep::new(Delete, TeardownOp::DeleteVpc { vpc_id: id })],
    }
}
