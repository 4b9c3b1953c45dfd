//! Core data models for the provisioner
//!
//! Every record here is persisted as JSON in the keyed store. Cloud
//! sub-resources carry an explicit [`ResourceState`] so that a resumed
//! procedure can tell what it already created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Default Kubernetes version installed on new Kubes
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.5.7";

/// Default VPC CIDR block
pub const DEFAULT_VPC_IP_RANGE: &str = "172.20.0.0/16";

/// Creation/update bookkeeping shared by all records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Provisioning state of a single cloud sub-resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "snake_case")]
pub enum ResourceState {
    /// Nothing has been created yet
    #[default]
    Unprovisioned,
    /// Created, with the provider-assigned identifier
    Provisioned(String),
}

impl ResourceState {
    pub fn id(&self) -> Option<&str> {
        match self {
            ResourceState::Provisioned(id) => Some(id),
            ResourceState::Unprovisioned => None,
        }
    }

    pub fn is_provisioned(&self) -> bool {
        matches!(self, ResourceState::Provisioned(_))
    }

    pub fn provision(&mut self, id: impl Into<String>) {
        *self = ResourceState::Provisioned(id.into());
    }

    /// Forget the identifier after the resource has been deleted
    pub fn clear(&mut self) {
        *self = ResourceState::Unprovisioned;
    }
}

/// Subnet CIDR assigned to one availability zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetAssignment {
    pub zone: String,
    pub ip_range: String,
    #[serde(default)]
    pub subnet: ResourceState,
}

/// EFS mount target created in a subnet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountTarget {
    pub subnet_id: String,
    pub id: String,
}

/// AWS-specific configuration and resource bookkeeping of a Kube
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsKubeConfig {
    pub region: String,
    pub availability_zone: String,
    pub multi_az: bool,
    pub vpc_ip_range: String,
    /// The VPC was supplied by the user and must never be deleted
    pub vpc_managed: bool,
    pub vpc: ResourceState,
    pub internet_gateway: ResourceState,
    pub route_table: ResourceState,
    pub route_table_associations: Vec<String>,
    pub subnets: Vec<SubnetAssignment>,
    pub elb_security_group: ResourceState,
    pub node_security_group: ResourceState,
    pub elastic_file_system: ResourceState,
    pub efs_mount_targets: Vec<MountTarget>,
    pub build_elastic_file_system: bool,
    /// Name of the master API load balancer once created
    pub master_load_balancer: ResourceState,
    pub master_nodes: Vec<String>,
    pub bucket_name: Option<String>,
    pub private_key: Option<String>,
    pub master_volume_size: u32,
    pub node_volume_size: u32,
    pub master_role_name: Option<String>,
    pub node_role_name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl Default for AwsKubeConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            availability_zone: "us-east-1b".to_string(),
            multi_az: false,
            vpc_ip_range: DEFAULT_VPC_IP_RANGE.to_string(),
            vpc_managed: false,
            vpc: ResourceState::default(),
            internet_gateway: ResourceState::default(),
            route_table: ResourceState::default(),
            route_table_associations: Vec::new(),
            subnets: Vec::new(),
            elb_security_group: ResourceState::default(),
            node_security_group: ResourceState::default(),
            elastic_file_system: ResourceState::default(),
            efs_mount_targets: Vec::new(),
            build_elastic_file_system: false,
            master_load_balancer: ResourceState::default(),
            master_nodes: Vec::new(),
            bucket_name: None,
            private_key: None,
            master_volume_size: 20,
            node_volume_size: 20,
            master_role_name: None,
            node_role_name: None,
            tags: BTreeMap::new(),
        }
    }
}

impl AwsKubeConfig {
    /// Names of the sub-resources that still have to be created
    pub fn pending_resources(&self) -> Vec<&'static str> {
        let mut pending = Vec::new();
        let states = [
            ("vpc", &self.vpc),
            ("internet_gateway", &self.internet_gateway),
            ("route_table", &self.route_table),
            ("elb_security_group", &self.elb_security_group),
            ("node_security_group", &self.node_security_group),
        ];
        for (name, state) in states {
            if !state.is_provisioned() {
                pending.push(name);
            }
        }
        if self.subnets.is_empty() || self.subnets.iter().any(|s| !s.subnet.is_provisioned()) {
            pending.push("subnets");
        }
        if self.master_nodes.is_empty() {
            pending.push("masters");
        }
        pending
    }

    /// Ids of every subnet created so far, in assignment order
    pub fn subnet_ids(&self) -> Vec<String> {
        self.subnets
            .iter()
            .filter_map(|s| s.subnet.id().map(str::to_string))
            .collect()
    }
}

/// A managed Kubernetes cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kube {
    pub name: String,
    #[serde(default)]
    pub cloud_account_name: String,
    #[serde(default)]
    pub master_node_size: String,
    #[serde(default)]
    pub node_sizes: Vec<String>,
    #[serde(default = "default_master_count")]
    pub kube_master_count: u32,
    #[serde(default)]
    pub kubernetes_version: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub ssh_pub_key: String,
    #[serde(default)]
    pub etcd_discovery_url: String,
    #[serde(default)]
    pub master_public_ip: String,
    #[serde(default)]
    pub master_private_ip: String,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub aws_config: AwsKubeConfig,
    #[serde(default)]
    pub meta: Meta,
}

fn default_master_count() -> u32 {
    1
}

impl Kube {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cloud_account_name: String::new(),
            master_node_size: "m4.large".to_string(),
            node_sizes: vec!["m4.large".to_string()],
            kube_master_count: 1,
            kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
            username: String::new(),
            password: String::new(),
            ssh_pub_key: String::new(),
            etcd_discovery_url: String::new(),
            master_public_ip: String::new(),
            master_private_ip: String::new(),
            ready: false,
            aws_config: AwsKubeConfig::default(),
            meta: Meta::default(),
        }
    }

    pub fn key_pair_name(&self) -> String {
        format!("{}-key", self.name)
    }
}

/// One VM of a Kube
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub kube_name: String,
    pub size: String,
    #[serde(default)]
    pub provider_id: ResourceState,
    #[serde(default)]
    pub private_dns_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meta: Meta,
}

impl Node {
    pub fn new(kube_name: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            kube_name: kube_name.into(),
            size: size.into(),
            provider_id: ResourceState::default(),
            private_dns_name: String::new(),
            provider_creation_timestamp: None,
            meta: Meta::default(),
        }
    }
}

/// Kind of asynchronous work a job carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    DeployComponent,
    CreateKube,
    DeleteKube,
    CreateNode,
    DeleteNode,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobType::DeployComponent => "deploy_component",
            JobType::CreateKube => "create_kube",
            JobType::DeleteKube => "delete_kube",
            JobType::CreateNode => "create_node",
            JobType::DeleteNode => "delete_node",
        };
        f.write_str(name)
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Started,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Started => "STARTED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A unit of asynchronous work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Assigned by the store; part of the key, never of the stored value
    #[serde(skip)]
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub data: String,
    pub status: JobStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    pub fn new(job_type: JobType, data: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            job_type,
            data: data.into(),
            status: JobStatus::Queued,
            attempts: 0,
            error: None,
        }
    }
}

/// Payload of Kube-scoped jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeJobData {
    pub kube_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
}

/// Payload of DeployComponent jobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployComponentData {
    pub app_name: String,
    pub component_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub name: String,
    #[serde(default)]
    pub meta: Meta,
}

/// Container port exposed through a Kubernetes service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub number: i32,
    #[serde(default)]
    pub public: bool,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub ports: Vec<Port>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_deploy_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_release_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_release_id: Option<String>,
    #[serde(default)]
    pub meta: Meta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub meta: Meta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default)]
    pub environment_name: String,
    #[serde(default)]
    pub meta: Meta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub instance_count: u32,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub meta: Meta,
}

/// Docker registry credentials, turned into image pull secrets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRepo {
    pub name: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub meta: Meta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_state_serialization() {
        let provisioned = ResourceState::Provisioned("vpc-1".to_string());
        let json = serde_json::to_value(&provisioned).unwrap();
        assert_eq!(json["state"], "provisioned");
        assert_eq!(json["id"], "vpc-1");

        let empty: ResourceState = serde_json::from_str(r#"{"state":"unprovisioned"}"#).unwrap();
        assert!(!empty.is_provisioned());
    }

    #[test]
    fn test_job_id_not_serialized() {
        let mut job = Job::new(JobType::DeployComponent, "{}");
        job.id = "00000000000000000001".to_string();

        let json = serde_json::to_string(&job).unwrap();
        assert!(!json.contains("00000000000000000001"));
        assert!(json.contains(r#""status":"QUEUED""#));
        assert!(json.contains(r#""type":"deploy_component""#));
    }

    #[test]
    fn test_kube_defaults_from_minimal_json() {
        let kube: Kube = serde_json::from_str(r#"{"name":"prod"}"#).unwrap();
        assert_eq!(kube.kube_master_count, 1);
        assert_eq!(kube.aws_config.vpc_ip_range, DEFAULT_VPC_IP_RANGE);
        assert!(kube.aws_config.master_nodes.is_empty());
    }

    #[test]
    fn test_pending_resources() {
        let mut config = AwsKubeConfig::default();
        assert!(config.pending_resources().contains(&"vpc"));

        config.vpc.provision("vpc-1");
        assert!(!config.pending_resources().contains(&"vpc"));
        assert!(config.pending_resources().contains(&"subnets"));
    }
}
