//! Cloud capability interfaces used by the AWS provider
//!
//! Each trait covers the handful of calls the provisioner makes against one
//! AWS service. Implementations translate SDK failures into a
//! [`CloudError`] so that provisioning logic branches on [`CloudErrorKind`]
//! and never on message text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Closed set of failure kinds at the capability boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloudErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    /// The request can never succeed as issued (e.g. zone not offered)
    Unsupported,
    Transient,
}

struct Classifier {
    not_found: Regex,
    already_exists: Regex,
    unsupported: Regex,
    conflict: Regex,
}

static CLASSIFIER: OnceLock<Option<Classifier>> = OnceLock::new();

fn classifier() -> Option<&'static Classifier> {
    CLASSIFIER
        .get_or_init(|| {
            Some(Classifier {
                // S3 answers calls against a deleted bucket with the last two
                not_found: Regex::new(
                    r"(?i)not\s*found|does not exist|not attached|\b404\b|method is not allowed against this resource|authorization header is malformed",
                )
                .ok()?,
                already_exists: Regex::new(
                    r"(?i)duplicate|already\s+exists|already has an internet gateway attached",
                )
                .ok()?,
                unsupported: Regex::new(r"(?i)can currently only be created in").ok()?,
                conflict: Regex::new(r"(?i)dependencyviolation|\bin use\b").ok()?,
            })
        })
        .as_ref()
}

impl CloudErrorKind {
    /// Map provider error prose to a kind
    pub fn classify(message: &str) -> Self {
        let Some(c) = classifier() else {
            return CloudErrorKind::Transient;
        };
        if c.not_found.is_match(message) {
            CloudErrorKind::NotFound
        } else if c.already_exists.is_match(message) {
            CloudErrorKind::AlreadyExists
        } else if c.unsupported.is_match(message) {
            CloudErrorKind::Unsupported
        } else if c.conflict.is_match(message) {
            CloudErrorKind::Conflict
        } else {
            CloudErrorKind::Transient
        }
    }
}

/// Error returned by every capability call; displays as the provider message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CloudError {
    pub kind: CloudErrorKind,
    pub message: String,
}

impl CloudError {
    pub fn new(kind: CloudErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error whose kind is derived from the message
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: CloudErrorKind::classify(&message),
            message,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(CloudErrorKind::AlreadyExists, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == CloudErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == CloudErrorKind::AlreadyExists
    }
}

pub type CloudResult<T> = Result<T, CloudError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityZone {
    pub name: String,
    pub state: String,
}

impl AvailabilityZone {
    pub fn is_available(&self) -> bool {
        self.state == "available"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub name: String,
    /// ISO-8601 timestamp as reported by EC2
    pub creation_date: String,
}

/// Where a security group rule admits traffic from (or sends it to)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleSource {
    Cidr(String),
    Group(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    /// `tcp`, `udp` or `-1` for every protocol
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub source: RuleSource,
}

impl SecurityRule {
    pub fn all_from(source: RuleSource) -> Self {
        Self {
            protocol: "-1".to_string(),
            from_port: 0,
            to_port: 0,
            source,
        }
    }

    pub fn tcp(from_port: i32, to_port: i32, source: RuleSource) -> Self {
        Self {
            protocol: "tcp".to_string(),
            from_port,
            to_port,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInstanceRequest {
    pub image_id: String,
    pub instance_type: String,
    pub subnet_id: String,
    pub security_group_ids: Vec<String>,
    pub key_name: String,
    pub iam_instance_profile: String,
    pub userdata: String,
    /// Root volume size in GiB (gp2)
    pub volume_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub state: InstanceState,
    pub public_ip: Option<String>,
    pub private_ip: Option<String>,
    pub private_dns_name: Option<String>,
    pub launch_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub protocol: String,
    pub load_balancer_port: i32,
    pub instance_port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRequest {
    pub name: String,
    pub internal: bool,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub listeners: Vec<Listener>,
}

#[async_trait]
pub trait Ec2: Send + Sync {
    async fn describe_availability_zones(&self) -> CloudResult<Vec<AvailabilityZone>>;

    async fn describe_key_pairs(&self) -> CloudResult<Vec<String>>;

    /// Returns the private key material
    async fn create_key_pair(&self, name: &str) -> CloudResult<String>;

    async fn delete_key_pair(&self, name: &str) -> CloudResult<()>;

    async fn create_tags(
        &self,
        resource_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> CloudResult<()>;

    async fn create_vpc(&self, cidr_block: &str) -> CloudResult<String>;

    async fn enable_vpc_dns_hostnames(&self, vpc_id: &str) -> CloudResult<()>;

    async fn delete_vpc(&self, vpc_id: &str) -> CloudResult<()>;

    async fn create_internet_gateway(&self) -> CloudResult<String>;

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()>;

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> CloudResult<()>;

    async fn delete_internet_gateway(&self, gateway_id: &str) -> CloudResult<()>;

    async fn create_subnet(&self, vpc_id: &str, zone: &str, cidr_block: &str)
        -> CloudResult<String>;

    async fn enable_map_public_ip(&self, subnet_id: &str) -> CloudResult<()>;

    async fn delete_subnet(&self, subnet_id: &str) -> CloudResult<()>;

    async fn create_route_table(&self, vpc_id: &str) -> CloudResult<String>;

    /// Returns the association id
    async fn associate_route_table(&self, route_table_id: &str, subnet_id: &str)
        -> CloudResult<String>;

    async fn disassociate_route_table(&self, association_id: &str) -> CloudResult<()>;

    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        gateway_id: &str,
    ) -> CloudResult<()>;

    async fn delete_route_table(&self, route_table_id: &str) -> CloudResult<()>;

    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> CloudResult<String>;

    async fn authorize_ingress(&self, group_id: &str, rules: &[SecurityRule]) -> CloudResult<()>;

    async fn authorize_egress(&self, group_id: &str, rules: &[SecurityRule]) -> CloudResult<()>;

    async fn delete_security_group(&self, group_id: &str) -> CloudResult<()>;

    async fn describe_images(&self, owner: &str, name_pattern: &str) -> CloudResult<Vec<Image>>;

    async fn run_instance(&self, request: &RunInstanceRequest) -> CloudResult<Instance>;

    async fn describe_instance(&self, instance_id: &str) -> CloudResult<Instance>;

    async fn terminate_instance(&self, instance_id: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait Iam: Send + Sync {
    async fn get_role(&self, name: &str) -> CloudResult<()>;

    async fn create_role(&self, name: &str, assume_role_policy: &str) -> CloudResult<()>;

    async fn get_role_policy(&self, role: &str, policy_name: &str) -> CloudResult<()>;

    async fn put_role_policy(&self, role: &str, policy_name: &str, document: &str)
        -> CloudResult<()>;

    /// Returns the names of the roles attached to the profile
    async fn get_instance_profile(&self, name: &str) -> CloudResult<Vec<String>>;

    async fn create_instance_profile(&self, name: &str) -> CloudResult<()>;

    async fn add_role_to_instance_profile(&self, profile: &str, role: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait S3: Send + Sync {
    async fn create_bucket(&self, bucket: &str) -> CloudResult<()>;

    async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> CloudResult<()>;

    async fn tag_bucket(&self, bucket: &str, tags: &BTreeMap<String, String>) -> CloudResult<()>;

    async fn put_object(&self, bucket: &str, key: &str, body: &str) -> CloudResult<()>;

    async fn list_objects(&self, bucket: &str) -> CloudResult<Vec<String>>;

    async fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()>;

    async fn delete_bucket(&self, bucket: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait Elb: Send + Sync {
    /// Returns the DNS name of the new load balancer
    async fn create_load_balancer(&self, request: &LoadBalancerRequest) -> CloudResult<String>;

    async fn register_instances(&self, name: &str, instance_ids: &[String]) -> CloudResult<()>;

    async fn delete_load_balancer(&self, name: &str) -> CloudResult<()>;
}

#[async_trait]
pub trait Efs: Send + Sync {
    async fn create_file_system(&self, creation_token: &str) -> CloudResult<String>;

    async fn create_mount_target(
        &self,
        file_system_id: &str,
        subnet_id: &str,
        security_group_ids: &[String],
    ) -> CloudResult<String>;

    /// Lifecycle state, e.g. `creating` or `available`
    async fn describe_mount_target(&self, mount_target_id: &str) -> CloudResult<String>;

    async fn delete_mount_target(&self, mount_target_id: &str) -> CloudResult<()>;
}
