//! EC2 and RDS backed `ResourceProvider`

use crate::error::{AwsError, Result, from_sdk, missing};
use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_ec2::types::{
    AttributeBooleanValue, Filter, InstanceStateName, InstanceType, IpPermission, IpRange,
    ResourceType, Tag, TagSpecification, UserIdGroupPair, VpcState,
};
use bastionflow_cloud::provider::{
    DatabaseSpec, IngressRule, IngressSource, InstanceSpec, ResourceProvider, SecurityGroupSpec,
    SubnetSpec, WaitConfig,
};
use bastionflow_cloud::{ProviderError, ProviderResult, TeardownOp, wait_until};
use std::time::Duration;

const DEFAULT_ROUTE: &str = "0.0.0.0/0";

#[derive(Debug, Clone)]
pub struct AwsProviderConfig {
    /// Falls back to the SDK's region chain when unset
    pub region: Option<String>,

    /// VPC and EC2 instance waits
    pub resource_wait: WaitConfig,

    /// RDS instance waits
    pub database_wait: WaitConfig,
}

impl Default for AwsProviderConfig {
    fn default() -> Self {
        Self {
            region: None,
            resource_wait: WaitConfig::fixed(40, Duration::from_secs(15)),
            database_wait: WaitConfig::fixed(60, Duration::from_secs(30)),
        }
    }
}

pub struct AwsProvider {
    ec2: aws_sdk_ec2::Client,
    rds: aws_sdk_rds::Client,
    region: String,
    resource_wait: WaitConfig,
    database_wait: WaitConfig,
}

impl AwsProvider {
    /// Load credentials and region from the environment
    pub async fn connect(config: AwsProviderConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = config.region {
            loader = loader.region(Region::new(region));
        }
        let sdk_config = loader.load().await;

        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .ok_or(AwsError::MissingRegion)?;
        tracing::debug!("Using AWS region {}", region);

        Ok(Self {
            ec2: aws_sdk_ec2::Client::new(&sdk_config),
            rds: aws_sdk_rds::Client::new(&sdk_config),
            region,
            resource_wait: config.resource_wait,
            database_wait: config.database_wait,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn instance_state(&self, instance_id: &str) -> ProviderResult<Option<InstanceStateName>> {
        let output = self
            .ec2
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|e| from_sdk(instance_id, e))?;

        Ok(output
            .reservations()
            .iter()
            .flat_map(|r| r.instances())
            .find(|i| i.instance_id() == Some(instance_id))
            .and_then(|i| i.state())
            .and_then(|s| s.name())
            .cloned())
    }

    async fn db_instance_status(&self, identifier: &str) -> ProviderResult<Option<String>> {
        let output = self
            .rds
            .describe_db_instances()
            .db_instance_identifier(identifier)
            .send()
            .await
            .map_err(|e| from_sdk(identifier, e))?;

        Ok(output
            .db_instances()
            .first()
            .and_then(|db| db.db_instance_status())
            .map(str::to_string))
    }

    async fn disassociate_route_table(&self, route_table_id: &str) -> ProviderResult<()> {
        let output = self
            .ec2
            .describe_route_tables()
            .route_table_ids(route_table_id)
            .send()
            .await
            .map_err(|e| from_sdk(route_table_id, e))?;

        let association_ids: Vec<String> = output
            .route_tables()
            .iter()
            .flat_map(|rt| rt.associations())
            .filter(|a| !a.main().unwrap_or(false))
            .filter_map(|a| a.route_table_association_id())
            .map(str::to_string)
            .collect();

        for association_id in association_ids {
            match self
                .ec2
                .disassociate_route_table()
                .association_id(&association_id)
                .send()
                .await
            {
                Ok(_) => tracing::debug!("Disassociated {} from {}", association_id, route_table_id),
                Err(e) => {
                    let err = from_sdk(&association_id, e);
                    if !err.is_not_found() {
                        return Err(err);
                    }
                }
            }
        }
        Ok(())
    }

    async fn wait_instance_terminated(&self, instance_id: &str) -> ProviderResult<()> {
        let what = format!("EC2 instance {} to terminate", instance_id);
        let this = self;
        wait_until(&what, &self.resource_wait, move || async move {
            match this.instance_state(instance_id).await {
                Ok(state) => Ok(matches!(state, None | Some(InstanceStateName::Terminated))),
                Err(e) if e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn wait_db_instance_deleted(&self, identifier: &str) -> ProviderResult<()> {
        let what = format!("RDS instance {} to be deleted", identifier);
        let this = self;
        wait_until(&what, &self.database_wait, move || async move {
            match this.db_instance_status(identifier).await {
                Ok(status) => Ok(status.is_none()),
                Err(e) if e.is_not_found() => Ok(true),
                Err(e) => Err(e),
            }
        })
        .await
    }
}

fn name_tag(resource_type: ResourceType, name: &str) -> TagSpecification {
    TagSpecification::builder()
        .resource_type(resource_type)
        .tags(Tag::builder().key("Name").value(name).build())
        .build()
}

fn ip_permission(rule: &IngressRule) -> IpPermission {
    let port = i32::from(rule.port);
    let builder = IpPermission::builder()
        .ip_protocol("tcp")
        .from_port(port)
        .to_port(port);
    match &rule.source {
        IngressSource::Cidr(cidr) => builder
            .ip_ranges(IpRange::builder().cidr_ip(cidr).build())
            .build(),
        IngressSource::SecurityGroup(group_id) => builder
            .user_id_group_pairs(UserIdGroupPair::builder().group_id(group_id).build())
            .build(),
    }
}

#[async_trait]
impl ResourceProvider for AwsProvider {
    fn name(&self) -> &str {
        "aws"
    }

    async fn availability_zones(&self) -> ProviderResult<Vec<String>> {
        let output = self
            .ec2
            .describe_availability_zones()
            .filters(Filter::builder().name("state").values("available").build())
            .send()
            .await
            .map_err(|e| from_sdk(&self.region, e))?;

        Ok(output
            .availability_zones()
            .iter()
            .filter_map(|az| az.zone_name())
            .map(str::to_string)
            .collect())
    }

    async fn create_vpc(&self, name: &str, cidr: &str) -> ProviderResult<String> {
        let output = self
            .ec2
            .create_vpc()
            .cidr_block(cidr)
            .tag_specifications(name_tag(ResourceType::Vpc, name))
            .send()
            .await
            .map_err(|e| from_sdk(name, e))?;

        let vpc_id = output
            .vpc()
            .and_then(|v| v.vpc_id())
            .ok_or_else(|| missing("VPC id", "CreateVpc"))?;
        tracing::info!("Created VPC {} ({})", vpc_id, cidr);
        Ok(vpc_id.to_string())
    }

    async fn wait_vpc_available(&self, vpc_id: &str) -> ProviderResult<()> {
        let what = format!("VPC {} to become available", vpc_id);
        let ec2 = &self.ec2;
        wait_until(&what, &self.resource_wait, move || async move {
            let output = match ec2.describe_vpcs().vpc_ids(vpc_id).send().await {
                Ok(output) => output,
                Err(e) => {
                    let err = from_sdk(vpc_id, e);
                    // A fresh VPC may not be visible yet
                    return if err.is_not_found() { Ok(false) } else { Err(err) };
                }
            };
            Ok(output
                .vpcs()
                .iter()
                .any(|v| v.state() == Some(&VpcState::Available)))
        })
        .await
    }

    async fn create_internet_gateway(&self, name: &str) -> ProviderResult<String> {
        let output = self
            .ec2
            .create_internet_gateway()
            .tag_specifications(name_tag(ResourceType::InternetGateway, name))
            .send()
            .await
            .map_err(|e| from_sdk(name, e))?;

        let gateway_id = output
            .internet_gateway()
            .and_then(|g| g.internet_gateway_id())
            .ok_or_else(|| missing("internet gateway id", "CreateInternetGateway"))?;
        tracing::info!("Created internet gateway {}", gateway_id);
        Ok(gateway_id.to_string())
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> ProviderResult<()> {
        self.ec2
            .attach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .map_err(|e| from_sdk(gateway_id, e))?;
        tracing::debug!("Attached {} to {}", gateway_id, vpc_id);
        Ok(())
    }

    async fn create_subnet(&self, spec: &SubnetSpec) -> ProviderResult<String> {
        let output = self
            .ec2
            .create_subnet()
            .vpc_id(&spec.vpc_id)
            .cidr_block(&spec.cidr)
            .availability_zone(&spec.availability_zone)
            .tag_specifications(name_tag(ResourceType::Subnet, &spec.name))
            .send()
            .await
            .map_err(|e| from_sdk(&spec.name, e))?;

        let subnet_id = output
            .subnet()
            .and_then(|s| s.subnet_id())
            .ok_or_else(|| missing("subnet id", "CreateSubnet"))?;
        tracing::info!(
            "Created {} subnet {} ({} in {})",
            spec.tier,
            subnet_id,
            spec.cidr,
            spec.availability_zone
        );
        Ok(subnet_id.to_string())
    }

    async fn enable_public_ip_on_launch(&self, subnet_id: &str) -> ProviderResult<()> {
        self.ec2
            .modify_subnet_attribute()
            .subnet_id(subnet_id)
            .map_public_ip_on_launch(AttributeBooleanValue::builder().value(true).build())
            .send()
            .await
            .map_err(|e| from_sdk(subnet_id, e))?;
        Ok(())
    }

    async fn create_route_table(&self, vpc_id: &str, name: &str) -> ProviderResult<String> {
        let output = self
            .ec2
            .create_route_table()
            .vpc_id(vpc_id)
            .tag_specifications(name_tag(ResourceType::RouteTable, name))
            .send()
            .await
            .map_err(|e| from_sdk(name, e))?;

        let route_table_id = output
            .route_table()
            .and_then(|rt| rt.route_table_id())
            .ok_or_else(|| missing("route table id", "CreateRouteTable"))?;
        tracing::info!("Created route table {}", route_table_id);
        Ok(route_table_id.to_string())
    }

    async fn create_default_route(
        &self,
        route_table_id: &str,
        gateway_id: &str,
    ) -> ProviderResult<()> {
        self.ec2
            .create_route()
            .route_table_id(route_table_id)
            .destination_cidr_block(DEFAULT_ROUTE)
            .gateway_id(gateway_id)
            .send()
            .await
            .map_err(|e| from_sdk(route_table_id, e))?;
        Ok(())
    }

    async fn associate_route_table(
        &self,
        route_table_id: &str,
        subnet_id: &str,
    ) -> ProviderResult<()> {
        self.ec2
            .associate_route_table()
            .route_table_id(route_table_id)
            .subnet_id(subnet_id)
            .send()
            .await
            .map_err(|e| from_sdk(route_table_id, e))?;
        Ok(())
    }

    async fn create_security_group(&self, spec: &SecurityGroupSpec) -> ProviderResult<String> {
        let output = self
            .ec2
            .create_security_group()
            .group_name(&spec.name)
            .description(&spec.description)
            .vpc_id(&spec.vpc_id)
            .tag_specifications(name_tag(ResourceType::SecurityGroup, &spec.name))
            .send()
            .await
            .map_err(|e| from_sdk(&spec.name, e))?;

        let group_id = output
            .group_id()
            .ok_or_else(|| missing("group id", "CreateSecurityGroup"))?;
        tracing::info!("Created security group {} ({})", group_id, spec.name);
        Ok(group_id.to_string())
    }

    async fn authorize_ingress(&self, group_id: &str, rule: &IngressRule) -> ProviderResult<()> {
        self.ec2
            .authorize_security_group_ingress()
            .group_id(group_id)
            .ip_permissions(ip_permission(rule))
            .send()
            .await
            .map_err(|e| from_sdk(group_id, e))?;
        Ok(())
    }

    async fn create_key_pair(&self, name: &str) -> ProviderResult<String> {
        let output = self
            .ec2
            .create_key_pair()
            .key_name(name)
            .send()
            .await
            .map_err(|e| from_sdk(name, e))?;

        let material = output
            .key_material()
            .ok_or_else(|| missing("key material", "CreateKeyPair"))?;
        tracing::info!("Created key pair {}", name);
        Ok(material.to_string())
    }

    async fn run_instance(&self, spec: &InstanceSpec) -> ProviderResult<String> {
        let output = self
            .ec2
            .run_instances()
            .image_id(&spec.image_id)
            .instance_type(InstanceType::from(spec.instance_type.as_str()))
            .key_name(&spec.key_name)
            .security_group_ids(&spec.security_group_id)
            .subnet_id(&spec.subnet_id)
            .min_count(1)
            .max_count(1)
            .tag_specifications(name_tag(ResourceType::Instance, &spec.name))
            .send()
            .await
            .map_err(|e| from_sdk(&spec.name, e))?;

        let instance_id = output
            .instances()
            .first()
            .and_then(|i| i.instance_id())
            .ok_or_else(|| missing("instance id", "RunInstances"))?;
        tracing::info!("Launched EC2 instance {} ({})", instance_id, spec.name);
        Ok(instance_id.to_string())
    }

    async fn wait_instance_running(&self, instance_id: &str) -> ProviderResult<()> {
        let what = format!("EC2 instance {} to be running", instance_id);
        let this = self;
        wait_until(&what, &self.resource_wait, move || async move {
            match this.instance_state(instance_id).await {
                Ok(Some(InstanceStateName::Running)) => Ok(true),
                Ok(Some(state @ (InstanceStateName::Terminated | InstanceStateName::ShuttingDown))) => {
                    Err(ProviderError::api(
                        "InstanceNotRunning",
                        format!("{} entered state {}", instance_id, state.as_str()),
                    ))
                }
                Ok(_) => Ok(false),
                // Freshly launched instances can be briefly invisible
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn create_db_subnet_group(
        &self,
        name: &str,
        description: &str,
        subnet_ids: &[String],
    ) -> ProviderResult<String> {
        let output = self
            .rds
            .create_db_subnet_group()
            .db_subnet_group_name(name)
            .db_subnet_group_description(description)
            .set_subnet_ids(Some(subnet_ids.to_vec()))
            .send()
            .await
            .map_err(|e| from_sdk(name, e))?;

        let group_name = output
            .db_subnet_group()
            .and_then(|g| g.db_subnet_group_name())
            .unwrap_or(name);
        tracing::info!("Created DB subnet group {}", group_name);
        Ok(group_name.to_string())
    }

    async fn create_db_instance(&self, spec: &DatabaseSpec) -> ProviderResult<String> {
        let output = self
            .rds
            .create_db_instance()
            .db_instance_identifier(&spec.identifier)
            .db_name(&spec.db_name)
            .db_instance_class(&spec.instance_class)
            .engine(&spec.engine)
            .master_username(&spec.username)
            .master_user_password(&spec.password)
            .allocated_storage(spec.allocated_storage)
            .storage_type(&spec.storage_type)
            .port(i32::from(spec.port))
            .vpc_security_group_ids(&spec.security_group_id)
            .db_subnet_group_name(&spec.subnet_group_name)
            .publicly_accessible(false)
            .send()
            .await
            .map_err(|e| from_sdk(&spec.identifier, e))?;

        let identifier = output
            .db_instance()
            .and_then(|db| db.db_instance_identifier())
            .unwrap_or(&spec.identifier);
        tracing::info!("Creating RDS instance {}", identifier);
        Ok(identifier.to_string())
    }

    async fn wait_db_instance_available(&self, identifier: &str) -> ProviderResult<()> {
        let what = format!("RDS instance {} to become available", identifier);
        let this = self;
        wait_until(&what, &self.database_wait, move || async move {
            match this.db_instance_status(identifier).await? {
                Some(status) if status == "available" => Ok(true),
                Some(status) if status == "failed" || status == "incompatible-parameters" => {
                    Err(ProviderError::api(
                        "DBInstanceNotAvailable",
                        format!("{} entered status {}", identifier, status),
                    ))
                }
                _ => Ok(false),
            }
        })
        .await
    }

    async fn teardown(&self, op: &TeardownOp) -> ProviderResult<()> {
        tracing::debug!("AWS: {}", op.describe());
        match op {
            TeardownOp::DeleteDbInstance { identifier } => {
                self.rds
                    .delete_db_instance()
                    .db_instance_identifier(identifier)
                    .skip_final_snapshot(true)
                    .send()
                    .await
                    .map_err(|e| from_sdk(identifier, e))?;
            }
            TeardownOp::WaitDbInstanceDeleted { identifier } => {
                self.wait_db_instance_deleted(identifier).await?;
            }
            TeardownOp::DeleteDbSubnetGroup { name } => {
                self.rds
                    .delete_db_subnet_group()
                    .db_subnet_group_name(name)
                    .send()
                    .await
                    .map_err(|e| from_sdk(name, e))?;
            }
            TeardownOp::TerminateInstance { instance_id } => {
                self.ec2
                    .terminate_instances()
                    .instance_ids(instance_id)
                    .send()
                    .await
                    .map_err(|e| from_sdk(instance_id, e))?;
            }
            TeardownOp::WaitInstanceTerminated { instance_id } => {
                self.wait_instance_terminated(instance_id).await?;
            }
            TeardownOp::DeleteSecurityGroup { group_id } => {
                self.ec2
                    .delete_security_group()
                    .group_id(group_id)
                    .send()
                    .await
                    .map_err(|e| from_sdk(group_id, e))?;
            }
            TeardownOp::DeleteKeyPair { name } => {
                self.ec2
                    .delete_key_pair()
                    .key_name(name)
                    .send()
                    .await
                    .map_err(|e| from_sdk(name, e))?;
            }
            // The private key lives on the local disk, not in AWS
            TeardownOp::RemoveKeyFile { .. } => {}
            TeardownOp::DisassociateRouteTable { route_table_id } => {
                self.disassociate_route_table(route_table_id).await?;
            }
            TeardownOp::DeleteRouteTable { route_table_id } => {
                self.ec2
                    .delete_route_table()
                    .route_table_id(route_table_id)
                    .send()
                    .await
                    .map_err(|e| from_sdk(route_table_id, e))?;
            }
            TeardownOp::DeleteSubnet { subnet_id } => {
                self.ec2
                    .delete_subnet()
                    .subnet_id(subnet_id)
                    .send()
                    .await
                    .map_err(|e| from_sdk(subnet_id, e))?;
            }
            TeardownOp::DetachInternetGateway { gateway_id, vpc_id } => {
                self.ec2
                    .detach_internet_gateway()
                    .internet_gateway_id(gateway_id)
                    .vpc_id(vpc_id)
                    .send()
                    .await
                    .map_err(|e| from_sdk(gateway_id, e))?;
            }
            TeardownOp::DeleteInternetGateway { gateway_id } => {
                self.ec2
                    .delete_internet_gateway()
                    .internet_gateway_id(gateway_id)
                    .send()
                    .await
                    .map_err(|e| from_sdk(gateway_id, e))?;
            }
            TeardownOp::DeleteVpc { vpc_id } => {
                self.ec2
                    .delete_vpc()
                    .vpc_id(vpc_id)
                    .send()
                    .await
                    .map_err(|e| from_sdk(vpc_id, e))?;
            }
        }
        Ok(())
    }
}
