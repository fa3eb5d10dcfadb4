//! Bastion host workflow
//!
//! VPC → internet gateway → two private subnets and one public subnet →
//! public route table → key pair → bastion security group → EC2 instance →
//! DB subnet group → database security group → RDS instance.

use super::Workflow;
use crate::cidr::Ipv4Cidr;
use crate::error::{CloudError, ProviderError, Result};
use crate::ledger::ResourceKind;
use crate::provider::{
    DatabaseSpec, IngressRule, IngressSource, InstanceSpec, ResourceProvider, SecurityGroupSpec,
    SubnetSpec, SubnetTier,
};
use crate::sequencer::{CreatedResource, ProvisioningStep, StepContext, StepFailure, StepOutput};
use crate::teardown::{META_KEY_FILE, META_VPC_ID};
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DEFAULT_VPC_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_DB_NAME: &str = "bastiondb";
pub const DEFAULT_DB_USERNAME: &str = "admin";
pub const ANY_SOURCE: &str = "0.0.0.0/0";

const SSH_PORT: u16 = 22;
const MIN_VPC_PREFIX: u8 = 16;
const MAX_VPC_PREFIX: u8 = 26;
const MIN_PASSWORD_LEN: usize = 8;

/// Roles under which the steps publish their ids
pub mod roles {
    pub const VPC_ID: &str = "vpc_id";
    pub const INTERNET_GATEWAY_ID: &str = "internet_gateway_id";
    pub const PRIVATE_SUBNET_1_ID: &str = "private_subnet_1_id";
    pub const PRIVATE_SUBNET_2_ID: &str = "private_subnet_2_id";
    pub const PUBLIC_SUBNET_ID: &str = "public_subnet_id";
    pub const PUBLIC_ROUTE_TABLE_ID: &str = "public_route_table_id";
    pub const KEY_PAIR_NAME: &str = "key_pair_name";
    pub const BASTION_SECURITY_GROUP_ID: &str = "bastion_security_group_id";
    pub const EC2_INSTANCE_ID: &str = "ec2_instance_id";
    pub const DB_SUBNET_GROUP_NAME: &str = "db_subnet_group_name";
    pub const DATABASE_SECURITY_GROUP_ID: &str = "database_security_group_id";
    pub const RDS_INSTANCE_ID: &str = "rds_instance_id";
}

const SUMMARY_ROLES: &[&str] = &[
    roles::VPC_ID,
    roles::EC2_INSTANCE_ID,
    roles::RDS_INSTANCE_ID,
    roles::KEY_PAIR_NAME,
];

/// Bastion instance image and size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeProfile {
    pub ami_id: String,
    pub instance_type: String,
}

impl Default for ComputeProfile {
    fn default() -> Self {
        Self {
            ami_id: "ami-0c02fb55956c7d316".to_string(),
            instance_type: "t2.micro".to_string(),
        }
    }
}

/// Database instance shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseProfile {
    pub instance_class: String,
    pub engine: String,
    /// GiB
    pub allocated_storage: i32,
    pub storage_type: String,
    pub port: u16,
}

impl Default for DatabaseProfile {
    fn default() -> Self {
        Self {
            instance_class: "db.t3.micro".to_string(),
            engine: "postgres".to_string(),
            allocated_storage: 20,
            storage_type: "gp2".to_string(),
            port: 5432,
        }
    }
}

/// Input of the bastion workflow
#[derive(Debug, Clone)]
pub struct BastionRequest {
    pub vpc_cidr: String,
    pub key_pair_name: String,
    pub instance_name: String,
    pub db_name: String,
    pub db_username: String,
    pub db_password: String,
    /// CIDR allowed to reach the bastion over SSH
    pub allowed_ssh_cidr: String,
    /// Where the private key of a new key pair is written
    pub key_dir: PathBuf,
    pub compute: ComputeProfile,
    pub database: DatabaseProfile,
}

impl BastionRequest {
    pub fn new(
        key_pair_name: impl Into<String>,
        instance_name: impl Into<String>,
        db_password: impl Into<String>,
    ) -> Self {
        Self {
            vpc_cidr: DEFAULT_VPC_CIDR.to_string(),
            key_pair_name: key_pair_name.into(),
            instance_name: instance_name.into(),
            db_name: DEFAULT_DB_NAME.to_string(),
            db_username: DEFAULT_DB_USERNAME.to_string(),
            db_password: db_password.into(),
            allowed_ssh_cidr: ANY_SOURCE.to_string(),
            key_dir: PathBuf::from("."),
            compute: ComputeProfile::default(),
            database: DatabaseProfile::default(),
        }
    }
}

/// Turn a bare IPv4 address into a `/32`; validate CIDR input as is
pub fn normalize_ssh_source(input: &str) -> Result<String> {
    let input = input.trim();
    let cidr = if input.contains('/') {
        input
            .parse::<Ipv4Cidr>()
            .map_err(|e| CloudError::Validation(format!("allowed SSH source: {}", e)))?
    } else {
        let addr: Ipv4Addr = input.parse().map_err(|_| {
            CloudError::Validation(format!("allowed SSH source '{}' is not an IPv4 address", input))
        })?;
        Ipv4Cidr::host(addr)
    };
    Ok(cidr.to_string())
}

/// Subnets carved out of the VPC block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetLayout {
    pub private_1: Ipv4Cidr,
    pub private_2: Ipv4Cidr,
    pub public: Ipv4Cidr,
}

impl SubnetLayout {
    /// The first three blocks of prefix `max(vpc_prefix + 2, 24)`
    pub fn for_vpc(vpc: &Ipv4Cidr) -> Result<Self> {
        let prefix = (vpc.prefix() + 2).max(24);
        let mut blocks = vpc.subnets(prefix);
        match (blocks.next(), blocks.next(), blocks.next()) {
            (Some(private_1), Some(private_2), Some(public)) => Ok(Self {
                private_1,
                private_2,
                public,
            }),
            _ => Err(CloudError::Validation(format!(
                "VPC CIDR {} is too small for three subnets",
                vpc
            ))),
        }
    }
}

fn validate_name(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CloudError::Validation(format!("{} must not be empty", field)));
    }
    if value.len() > max_len {
        return Err(CloudError::Validation(format!(
            "{} must be at most {} characters",
            field, max_len
        )));
    }
    Ok(())
}

fn validate_identifier(field: &str, value: &str, allow_underscore: bool) -> Result<()> {
    validate_name(field, value, 63)?;
    let starts_with_letter = value.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || (allow_underscore && c == '_'));
    if !starts_with_letter || !valid_chars {
        return Err(CloudError::Validation(format!(
            "{} '{}' must start with a letter and contain only letters{}",
            field,
            value,
            if allow_underscore {
                ", digits and underscores"
            } else {
                " and digits"
            }
        )));
    }
    Ok(())
}

/// Bastion host workflow
#[derive(Debug, Clone)]
pub struct BastionWorkflow {
    request: BastionRequest,
}

impl BastionWorkflow {
    pub fn new(request: BastionRequest) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &BastionRequest {
        &self.request
    }

    /// Check the request without contacting the provider
    pub fn validate(&self) -> Result<SubnetLayout> {
        let request = &self.request;

        let vpc: Ipv4Cidr = request
            .vpc_cidr
            .parse()
            .map_err(|e| CloudError::Validation(format!("VPC CIDR: {}", e)))?;
        if vpc.prefix() < MIN_VPC_PREFIX || vpc.prefix() > MAX_VPC_PREFIX {
            return Err(CloudError::Validation(format!(
                "VPC CIDR {} must have a prefix between /{} and /{}",
                vpc, MIN_VPC_PREFIX, MAX_VPC_PREFIX
            )));
        }

        request
            .allowed_ssh_cidr
            .parse::<Ipv4Cidr>()
            .map_err(|e| CloudError::Validation(format!("allowed SSH source: {}", e)))?;

        validate_name("key pair name", &request.key_pair_name, 255)?;
        validate_name("instance name", &request.instance_name, 255)?;
        validate_identifier("database name", &request.db_name, false)?;
        validate_identifier("database username", &request.db_username, true)?;

        if request.db_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(CloudError::Validation(format!(
                "database password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if request
            .db_password
            .chars()
            .any(|c| matches!(c, '/' | '"' | '@' | ' '))
        {
            return Err(CloudError::Validation(
                "database password must not contain '/', '\"', '@' or spaces".to_string(),
            ));
        }

        SubnetLayout::for_vpc(&vpc)
    }

    fn steps(&self, layout: SubnetLayout, zones: &[String]) -> Vec<Box<dyn ProvisioningStep>> {
        let shared = Arc::new(self.request.clone());
        let step = |name: &str, role: &'static str, action: Action| -> Box<dyn ProvisioningStep> {
            Box::new(BastionStep {
                name: name.to_string(),
                role,
                action,
                request: Arc::clone(&shared),
            })
        };

        vec![
            step("Create VPC", roles::VPC_ID, Action::Vpc),
            step(
                "Create internet gateway",
                roles::INTERNET_GATEWAY_ID,
                Action::InternetGateway,
            ),
            step(
                "Create private subnet 1",
                roles::PRIVATE_SUBNET_1_ID,
                Action::Subnet(SubnetPlan {
                    suffix: "private-1",
                    cidr: layout.private_1,
                    availability_zone: zones[0].clone(),
                    tier: SubnetTier::Private,
                }),
            ),
            step(
                "Create private subnet 2",
                roles::PRIVATE_SUBNET_2_ID,
                Action::Subnet(SubnetPlan {
                    suffix: "private-2",
                    cidr: layout.private_2,
                    availability_zone: zones[1].clone(),
                    tier: SubnetTier::Private,
                }),
            ),
            step(
                "Create public subnet",
                roles::PUBLIC_SUBNET_ID,
                Action::Subnet(SubnetPlan {
                    suffix: "public-1",
                    cidr: layout.public,
                    availability_zone: zones[0].clone(),
                    tier: SubnetTier::Public,
                }),
            ),
            step(
                "Create public route table",
                roles::PUBLIC_ROUTE_TABLE_ID,
                Action::PublicRouteTable,
            ),
            step("Create key pair", roles::KEY_PAIR_NAME, Action::KeyPair),
            step(
                "Create bastion security group",
                roles::BASTION_SECURITY_GROUP_ID,
                Action::BastionSecurityGroup,
            ),
            step(
                "Launch bastion instance",
                roles::EC2_INSTANCE_ID,
                Action::Instance,
            ),
            step(
                "Create DB subnet group",
                roles::DB_SUBNET_GROUP_NAME,
                Action::DbSubnetGroup,
            ),
            step(
                "Create database security group",
                roles::DATABASE_SECURITY_GROUP_ID,
                Action::DatabaseSecurityGroup,
            ),
            step("Create RDS instance", roles::RDS_INSTANCE_ID, Action::Database),
        ]
    }
}

#[async_trait]
impl Workflow for BastionWorkflow {
    fn name(&self) -> &str {
        "bastion"
    }

    async fn plan(
        &self,
        provider: &dyn ResourceProvider,
        deployment_name: &str,
    ) -> Result<Vec<Box<dyn ProvisioningStep>>> {
        let layout = self.validate()?;

        let zones = provider.availability_zones().await?;
        if zones.len() < 2 {
            return Err(CloudError::Validation(format!(
                "at least 2 availability zones are required, {} available",
                zones.len()
            )));
        }

        tracing::info!(
            "Planning bastion deployment '{}' in {} and {}",
            deployment_name,
            zones[0],
            zones[1]
        );
        Ok(self.steps(layout, &zones))
    }

    fn summary_roles(&self) -> &[&'static str] {
        SUMMARY_ROLES
    }
}

#[derive(Debug, Clone)]
struct SubnetPlan {
    suffix: &'static str,
    cidr: Ipv4Cidr,
    availability_zone: String,
    tier: SubnetTier,
}

#[derive(Debug, Clone)]
enum Action {
    Vpc,
    InternetGateway,
    Subnet(SubnetPlan),
    PublicRouteTable,
    KeyPair,
    BastionSecurityGroup,
    Instance,
    DbSubnetGroup,
    DatabaseSecurityGroup,
    Database,
}

struct BastionStep {
    name: String,
    role: &'static str,
    action: Action,
    request: Arc<BastionRequest>,
}

type StepResult = std::result::Result<StepOutput, StepFailure>;

/// Run a follow-up call; on failure the already created resource is kept
/// in the failure so that it still gets recorded.
async fn follow_up<F>(created: &CreatedResource, call: F) -> std::result::Result<(), StepFailure>
where
    F: std::future::Future<Output = std::result::Result<(), ProviderError>>,
{
    call.await
        .map_err(|e| StepFailure::after_create(created.clone(), e))
}

#[async_trait]
impl ProvisioningStep for BastionStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn role(&self) -> &str {
        self.role
    }

    async fn execute(&self, provider: &dyn ResourceProvider, context: &StepContext) -> StepResult {
        let prefix = context.deployment_name();
        let request = self.request.as_ref();

        match &self.action {
            Action::Vpc => {
                let vpc_id = provider.create_vpc(prefix, &request.vpc_cidr).await?;
                let created = CreatedResource::new(ResourceKind::Vpc, vpc_id.clone());
                follow_up(&created, provider.wait_vpc_available(&vpc_id)).await?;
                Ok(StepOutput::Created(created))
            }
            Action::InternetGateway => {
                let vpc_id = context.require(roles::VPC_ID)?;
                let gateway_id = provider
                    .create_internet_gateway(&format!("{}-igw", prefix))
                    .await?;
                let created = CreatedResource::new(ResourceKind::InternetGateway, gateway_id.clone())
                    .with_metadata(META_VPC_ID, vpc_id);
                follow_up(&created, provider.attach_internet_gateway(&gateway_id, vpc_id)).await?;
                Ok(StepOutput::Created(created))
            }
            Action::Subnet(plan) => {
                let spec = SubnetSpec {
                    vpc_id: context.require(roles::VPC_ID)?.to_string(),
                    name: format!("{}-{}", prefix, plan.suffix),
                    cidr: plan.cidr.to_string(),
                    availability_zone: plan.availability_zone.clone(),
                    tier: plan.tier,
                };
                let subnet_id = provider.create_subnet(&spec).await?;
                let created = CreatedResource::new(ResourceKind::Subnet, subnet_id.clone());
                if plan.tier == SubnetTier::Public {
                    follow_up(&created, provider.enable_public_ip_on_launch(&subnet_id)).await?;
                }
                Ok(StepOutput::Created(created))
            }
            Action::PublicRouteTable => {
                let vpc_id = context.require(roles::VPC_ID)?;
                let gateway_id = context.require(roles::INTERNET_GATEWAY_ID)?;
                let subnet_id = context.require(roles::PUBLIC_SUBNET_ID)?;

                let route_table_id = provider
                    .create_route_table(vpc_id, &format!("{}-public-rt", prefix))
                    .await?;
                let created = CreatedResource::new(ResourceKind::RouteTable, route_table_id.clone());
                follow_up(
                    &created,
                    provider.create_default_route(&route_table_id, gateway_id),
                )
                .await?;
                follow_up(
                    &created,
                    provider.associate_route_table(&route_table_id, subnet_id),
                )
                .await?;
                Ok(StepOutput::Created(created))
            }
            Action::KeyPair => {
                let name = &request.key_pair_name;
                let path = key_file_path(&request.key_dir, name)?;
                match provider.create_key_pair(name).await {
                    Ok(material) => {
                        let created = CreatedResource::new(ResourceKind::KeyPair, name.clone())
                            .with_metadata(META_KEY_FILE, path.display().to_string());
                        write_private_key(&path, &material)
                            .await
                            .map_err(|e| StepFailure::after_create(created.clone(), e))?;
                        tracing::info!("Wrote private key to {}", path.display());
                        Ok(StepOutput::Created(created))
                    }
                    Err(e) if e.is_already_exists() => Ok(StepOutput::Existing(name.clone())),
                    Err(e) => Err(e.into()),
                }
            }
            Action::BastionSecurityGroup => {
                let spec = SecurityGroupSpec {
                    vpc_id: context.require(roles::VPC_ID)?.to_string(),
                    name: format!("{}-ec2-sg", prefix),
                    description: "Security group for bastion EC2".to_string(),
                };
                let group_id = provider.create_security_group(&spec).await?;
                let created = CreatedResource::new(ResourceKind::SecurityGroup, group_id.clone());
                let rule = IngressRule::tcp(
                    SSH_PORT,
                    IngressSource::Cidr(request.allowed_ssh_cidr.clone()),
                );
                follow_up(&created, authorize(provider, &group_id, &rule)).await?;
                Ok(StepOutput::Created(created))
            }
            Action::Instance => {
                let spec = InstanceSpec {
                    name: request.instance_name.clone(),
                    image_id: request.compute.ami_id.clone(),
                    instance_type: request.compute.instance_type.clone(),
                    key_name: context.require(roles::KEY_PAIR_NAME)?.to_string(),
                    security_group_id: context.require(roles::BASTION_SECURITY_GROUP_ID)?.to_string(),
                    subnet_id: context.require(roles::PUBLIC_SUBNET_ID)?.to_string(),
                };
                let instance_id = provider.run_instance(&spec).await?;
                let created = CreatedResource::new(ResourceKind::Ec2Instance, instance_id.clone());
                follow_up(&created, provider.wait_instance_running(&instance_id)).await?;
                Ok(StepOutput::Created(created))
            }
            Action::DbSubnetGroup => {
                let name = format!("{}-db-subnet-group", prefix).to_lowercase();
                let subnet_ids = vec![
                    context.require(roles::PRIVATE_SUBNET_1_ID)?.to_string(),
                    context.require(roles::PRIVATE_SUBNET_2_ID)?.to_string(),
                ];
                let description = format!("Subnet group for {}", name);
                match provider
                    .create_db_subnet_group(&name, &description, &subnet_ids)
                    .await
                {
                    Ok(id) => Ok(StepOutput::Created(CreatedResource::new(
                        ResourceKind::DbSubnetGroup,
                        id,
                    ))),
                    Err(e) if e.is_already_exists() => Ok(StepOutput::Existing(name)),
                    Err(e) => Err(e.into()),
                }
            }
            Action::DatabaseSecurityGroup => {
                let bastion_group_id = context.require(roles::BASTION_SECURITY_GROUP_ID)?;
                let spec = SecurityGroupSpec {
                    vpc_id: context.require(roles::VPC_ID)?.to_string(),
                    name: format!("{}-rds-sg", prefix),
                    description: "RDS security group".to_string(),
                };
                let group_id = provider.create_security_group(&spec).await?;
                let created = CreatedResource::new(ResourceKind::SecurityGroup, group_id.clone());
                let rule = IngressRule::tcp(
                    request.database.port,
                    IngressSource::SecurityGroup(bastion_group_id.to_string()),
                );
                follow_up(&created, authorize(provider, &group_id, &rule)).await?;
                Ok(StepOutput::Created(created))
            }
            Action::Database => {
                let spec = DatabaseSpec {
                    identifier: format!("{}-instance", request.db_name),
                    db_name: request.db_name.clone(),
                    instance_class: request.database.instance_class.clone(),
                    engine: request.database.engine.clone(),
                    username: request.db_username.clone(),
                    password: request.db_password.clone(),
                    allocated_storage: request.database.allocated_storage,
                    storage_type: request.database.storage_type.clone(),
                    port: request.database.port,
                    security_group_id: context
                        .require(roles::DATABASE_SECURITY_GROUP_ID)?
                        .to_string(),
                    subnet_group_name: context.require(roles::DB_SUBNET_GROUP_NAME)?.to_string(),
                };
                let identifier = provider.create_db_instance(&spec).await?;
                let created = CreatedResource::new(ResourceKind::RdsInstance, identifier.clone());
                follow_up(&created, provider.wait_db_instance_available(&identifier)).await?;
                Ok(StepOutput::Created(created))
            }
        }
    }
}

/// Authorize an ingress rule; a duplicate rule is already in place
async fn authorize(
    provider: &dyn ResourceProvider,
    group_id: &str,
    rule: &IngressRule,
) -> std::result::Result<(), ProviderError> {
    match provider.authorize_ingress(group_id, rule).await {
        Err(e) if e.is_already_exists() => {
            tracing::debug!("Ingress rule on {} already present", group_id);
            Ok(())
        }
        other => other,
    }
}

/// Absolute location of the private key file, so rollback finds it from any directory
pub fn key_file_path(
    key_dir: &Path,
    key_name: &str,
) -> std::result::Result<PathBuf, ProviderError> {
    let path = key_dir.join(format!("{}.pem", key_name));
    std::path::absolute(&path)
        .map_err(|e| ProviderError::LocalIo(format!("{}: {}", path.display(), e)))
}

/// Write private key material readable only by the owner
async fn write_private_key(path: &Path, material: &str) -> std::result::Result<(), ProviderError> {
    let local = |e: std::io::Error| ProviderError::LocalIo(format!("{}: {}", path.display(), e));

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(local)?;
        }
    }
    tokio::fs::write(path, material).await.map_err(local)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(local)?;
    }

    Ok(())
}
