//! Kube creation procedure
//!
//! Every step checks the Kube's recorded state before calling AWS, so a
//! failed run is resumed by running the procedure again.

use super::capabilities::{CloudResult, Listener, LoadBalancerRequest, RuleSource, RunInstanceRequest, SecurityRule};
use super::iam::{self, MASTER_POLICY, MASTER_ROLE, MINION_POLICY, MINION_ROLE};
use super::node;
use super::{bucket_tags, Shared};
use crate::kubernetes::KubernetesClient;
use crate::models::{Kube, MountTarget, Node, SubnetAssignment, DEFAULT_KUBERNETES_VERSION};
use crate::procedure::{ActionStatus, Procedure};
use crate::provider::{minion_name, random_suffix};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Used when the user supplies no key; CoreOS refuses to boot without one
const PLACEHOLDER_SSH_KEY: &str = "ssh-rsa AAAAB3NzaC1yc2EAAAABIwAAAQEAklOUpkDHrfHY17SbrmTIpNLTGK9Tjom/BWDSUGPl+nafzlHDTYW7hdI4yZ5ew18JH4JW9jbhUFrviQzM7xlELEVf4h9lFX5QVkbPppSwg0cda3Pbv7kOdJ/MTyBlWXFCR+HAo3FXRitBqxiX1nKhXpHAZsMciLq8V6RjsNAQwdsdMFvSlVK/7XAt3FaoJoAsncM1Q9x5+3V0Ww68/eIFmb1zuUFljQJKprrX88XypNDvjYNby6vw/Pb0rwert/EnmZ+AW4OZPnTPI89ZPmVMLuayrD2cE86Z/il8b+gw3r3+1nKatmIkjn2so1d01QraTlMqVSsbxNrRFi9wrf+M7Q== placeholder@kubeprov";

const ZONE_SUFFIXES: [char; 5] = ['a', 'b', 'c', 'd', 'e'];

const ANYWHERE: &str = "0.0.0.0/0";

/// Mutable state threaded through the create and delete procedures
pub(crate) struct KubeContext {
    pub kube: Kube,
    pub shared: Arc<Shared>,
    pub status: ActionStatus,
    kubernetes: Option<Arc<dyn KubernetesClient>>,
}

impl KubeContext {
    pub fn new(kube: Kube, shared: Arc<Shared>, status: &ActionStatus) -> Self {
        Self {
            kube,
            shared,
            status: status.clone(),
            kubernetes: None,
        }
    }

    pub async fn persist(&self) -> Result<()> {
        self.shared.save_kube(&self.kube).await
    }

    fn node_security_group(&self) -> Result<String> {
        self.kube
            .aws_config
            .node_security_group
            .id()
            .map(str::to_string)
            .context("Node security group has not been created")
    }

    fn vpc_id(&self) -> Result<String> {
        self.kube
            .aws_config
            .vpc
            .id()
            .map(str::to_string)
            .context("VPC has not been created")
    }

    async fn prepare_defaults(&mut self) -> Result<()> {
        if self.kube.ssh_pub_key.is_empty() {
            self.kube.ssh_pub_key = PLACEHOLDER_SSH_KEY.to_string();
        }
        if self.kube.kubernetes_version.is_empty() {
            self.kube.kubernetes_version = DEFAULT_KUBERNETES_VERSION.to_string();
        }
        if self.kube.kube_master_count == 0 {
            self.kube.kube_master_count = 1;
        }
        Ok(())
    }

    async fn assign_subnets(&mut self) -> Result<()> {
        if !self.kube.aws_config.subnets.is_empty() {
            return Ok(());
        }

        let region = self.kube.aws_config.region.clone();
        let zones = self.shared.clients.ec2.describe_availability_zones().await?;

        let mut assignments = Vec::new();
        for zone in zones.iter().filter(|z| z.is_available()) {
            let default_range = ZONE_SUFFIXES.iter().enumerate().find_map(|(i, suffix)| {
                (zone.name == format!("{region}{suffix}")).then(|| format!("172.20.{i}.0/24"))
            });
            match default_range {
                Some(ip_range) => assignments.push(SubnetAssignment {
                    zone: zone.name.clone(),
                    ip_range,
                    subnet: Default::default(),
                }),
                None => debug!(zone = %zone.name, "No default subnet range for zone"),
            }
        }

        if !self.kube.aws_config.multi_az {
            let wanted = &self.kube.aws_config.availability_zone;
            assignments.retain(|a| &a.zone == wanted);
            if assignments.is_empty() {
                anyhow::bail!("Availability zone {wanted} is not available");
            }
        }

        if assignments.is_empty() {
            anyhow::bail!("No availability zones available in {region}");
        }

        self.kube.aws_config.subnets = assignments;
        self.persist().await
    }

    async fn prepare_iam(&mut self, role: &'static str, policy: &'static str) -> Result<()> {
        let iam = self.shared.clients.iam.as_ref();
        iam::ensure_role(iam, role).await?;
        iam::ensure_role_policy(iam, role, policy).await?;
        iam::ensure_instance_profile(iam, role).await
    }

    async fn create_file_system(&mut self) -> Result<()> {
        if self.kube.aws_config.elastic_file_system.is_provisioned() {
            return Ok(());
        }
        let id = self
            .shared
            .clients
            .efs
            .create_file_system(&self.kube.name)
            .await?;
        info!(kube = %self.kube.name, file_system = %id, "Created EFS file system");
        self.kube.aws_config.elastic_file_system.provision(id);
        self.persist().await
    }

    async fn create_key_pair(&mut self) -> Result<()> {
        if self.kube.aws_config.private_key.is_some() {
            return Ok(());
        }

        let ec2 = &self.shared.clients.ec2;
        let name = self.kube.key_pair_name();
        match ec2.create_key_pair(&name).await {
            Ok(material) => {
                self.kube.aws_config.private_key = Some(material);
                self.persist().await
            }
            Err(e) if e.is_already_exists() => {
                if let Err(e) = ec2.delete_key_pair(&name).await {
                    warn!(key_pair = %name, error = %e, "Failed to delete uncaptured key pair");
                }
                anyhow::bail!(
                    "KeyPair existed, but key material was not captured. Deleted KeyPair... will retry"
                )
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_bucket(&mut self) -> Result<()> {
        let s3 = self.shared.clients.s3.clone();
        let bucket = match self.kube.aws_config.bucket_name.clone() {
            Some(bucket) => bucket,
            None => {
                let bucket =
                    format!("kubernetes-{}-{}", self.kube.name, random_suffix(10)).to_lowercase();
                s3.create_bucket(&bucket).await?;
                self.kube.aws_config.bucket_name = Some(bucket.clone());
                self.persist().await?;

                if let Err(e) = s3.put_bucket_policy(&bucket, &bucket_policy(&bucket)).await {
                    warn!(bucket = %bucket, error = %e, "Failed to apply bucket policy");
                }
                bucket
            }
        };

        // Tags are reapplied on every run
        s3.tag_bucket(&bucket, &bucket_tags(&self.kube)).await?;
        Ok(())
    }

    async fn upload_assets(&mut self) -> Result<()> {
        if self.kube.etcd_discovery_url.is_empty() {
            self.kube.etcd_discovery_url = self
                .shared
                .collaborators
                .etcd
                .new_cluster_url(self.kube.kube_master_count)
                .await
                .context("Failed to obtain etcd discovery URL")?;
            self.persist().await?;
        }

        let bucket = self
            .kube
            .aws_config
            .bucket_name
            .clone()
            .context("Asset bucket has not been created")?;
        let userdata = self.shared.collaborators.userdata.master(&self.kube)?;
        self.shared
            .clients
            .s3
            .put_object(&bucket, "build/master.yaml", &userdata)
            .await?;
        Ok(())
    }

    async fn create_vpc(&mut self) -> Result<()> {
        let managed = self.kube.aws_config.vpc_managed;
        if !self.kube.aws_config.vpc.is_provisioned() {
            if managed {
                anyhow::bail!("VPC is externally managed but no VPC id was supplied");
            }
            let id = self
                .shared
                .clients
                .ec2
                .create_vpc(&self.kube.aws_config.vpc_ip_range)
                .await?;
            info!(kube = %self.kube.name, vpc = %id, "Created VPC");
            self.kube.aws_config.vpc.provision(id);
            self.persist().await?;
        } else if managed {
            info!(kube = %self.kube.name, "Using externally managed VPC");
        }

        let vpc = self.vpc_id()?;
        if !managed {
            self.shared
                .tag(&self.kube, &vpc, &[("Name", format!("{}-vpc", self.kube.name))])
                .await?;
        }
        self.shared.clients.ec2.enable_vpc_dns_hostnames(&vpc).await?;
        Ok(())
    }

    async fn create_internet_gateway(&mut self) -> Result<()> {
        if self.kube.aws_config.vpc_managed {
            return Ok(());
        }

        let ec2 = &self.shared.clients.ec2;
        if !self.kube.aws_config.internet_gateway.is_provisioned() {
            let id = ec2.create_internet_gateway().await?;
            self.kube.aws_config.internet_gateway.provision(id);
            self.persist().await?;
        }

        let gateway = self
            .kube
            .aws_config
            .internet_gateway
            .id()
            .map(str::to_string)
            .context("Internet gateway has not been created")?;
        self.shared
            .tag(&self.kube, &gateway, &[("Name", format!("{}-ig", self.kube.name))])
            .await?;
        tolerate_existing(ec2.attach_internet_gateway(&gateway, &self.vpc_id()?).await)?;
        Ok(())
    }

    async fn create_subnets(&mut self) -> Result<()> {
        if self.kube.aws_config.vpc_managed {
            return Ok(());
        }

        let vpc = self.vpc_id()?;
        let ec2 = self.shared.clients.ec2.clone();
        for index in 0..self.kube.aws_config.subnets.len() {
            let assignment = &self.kube.aws_config.subnets[index];
            if assignment.subnet.is_provisioned() {
                continue;
            }
            match ec2
                .create_subnet(&vpc, &assignment.zone, &assignment.ip_range)
                .await
            {
                Ok(id) => {
                    self.kube.aws_config.subnets[index].subnet.provision(id);
                    self.persist().await?;
                }
                Err(e) if e.kind == super::CloudErrorKind::Unsupported => {
                    warn!(zone = %assignment.zone, error = %e, "Skipping subnet in unsupported zone");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let subnets: Vec<(String, String)> = self
            .kube
            .aws_config
            .subnets
            .iter()
            .filter_map(|s| s.subnet.id().map(|id| (id.to_string(), s.zone.clone())))
            .collect();
        for (subnet, zone) in subnets {
            self.shared
                .tag(&self.kube, &subnet, &[("Name", format!("{}-{}-psub", self.kube.name, zone))])
                .await?;
            ec2.enable_map_public_ip(&subnet).await?;
        }
        Ok(())
    }

    async fn create_route_table(&mut self) -> Result<()> {
        if self.kube.aws_config.vpc_managed {
            return Ok(());
        }

        let ec2 = self.shared.clients.ec2.clone();
        if !self.kube.aws_config.route_table.is_provisioned() {
            let id = ec2.create_route_table(&self.vpc_id()?).await?;
            self.kube.aws_config.route_table.provision(id);
            self.persist().await?;
        }
        let route_table = self
            .kube
            .aws_config
            .route_table
            .id()
            .map(str::to_string)
            .context("Route table has not been created")?;
        self.shared
            .tag(&self.kube, &route_table, &[("Name", format!("{}-rt", self.kube.name))])
            .await?;

        if self.kube.aws_config.route_table_associations.is_empty() {
            for subnet in self.kube.aws_config.subnet_ids() {
                let association = ec2.associate_route_table(&route_table, &subnet).await?;
                self.kube.aws_config.route_table_associations.push(association);
            }
            self.persist().await?;
        }

        if let Some(gateway) = self.kube.aws_config.internet_gateway.id() {
            tolerate_existing(ec2.create_route(&route_table, ANYWHERE, gateway).await)?;
        }
        Ok(())
    }

    async fn create_elb_security_group(&mut self) -> Result<()> {
        let ec2 = self.shared.clients.ec2.clone();
        if !self.kube.aws_config.elb_security_group.is_provisioned() {
            let id = ec2
                .create_security_group(
                    &self.vpc_id()?,
                    &format!("{}_elb_sg", self.kube.name),
                    "Allow any external port through to internal 30-40k range",
                )
                .await?;
            self.kube.aws_config.elb_security_group.provision(id);
            self.persist().await?;
        }
        let group = self
            .kube
            .aws_config
            .elb_security_group
            .id()
            .map(str::to_string)
            .context("ELB security group has not been created")?;
        self.shared.tag(&self.kube, &group, &[]).await?;

        let anywhere = || RuleSource::Cidr(ANYWHERE.to_string());
        tolerate_existing(
            ec2.authorize_egress(&group, &[SecurityRule::all_from(anywhere())])
                .await,
        )?;
        tolerate_existing(
            ec2.authorize_ingress(
                &group,
                &[
                    SecurityRule::tcp(30000, 40000, anywhere()),
                    SecurityRule::tcp(10250, 10250, anywhere()),
                ],
            )
            .await,
        )?;
        Ok(())
    }

    async fn create_node_security_group(&mut self) -> Result<()> {
        let ec2 = self.shared.clients.ec2.clone();
        if !self.kube.aws_config.node_security_group.is_provisioned() {
            let id = ec2
                .create_security_group(
                    &self.vpc_id()?,
                    &format!("{}_sg", self.kube.name),
                    "Allow any traffic to 443 and 22, but only traffic from ELB for 10250 and 30k-40k",
                )
                .await?;
            self.kube.aws_config.node_security_group.provision(id);
            self.persist().await?;
        }
        let group = self.node_security_group()?;
        let elb_group = self
            .kube
            .aws_config
            .elb_security_group
            .id()
            .map(str::to_string)
            .context("ELB security group has not been created")?;
        self.shared.tag(&self.kube, &group, &[]).await?;

        let anywhere = || RuleSource::Cidr(ANYWHERE.to_string());
        let from_elb = || RuleSource::Group(elb_group.clone());
        tolerate_existing(
            ec2.authorize_ingress(
                &group,
                &[
                    SecurityRule::all_from(RuleSource::Group(group.clone())),
                    SecurityRule::tcp(22, 22, anywhere()),
                    SecurityRule::tcp(443, 443, anywhere()),
                    SecurityRule::tcp(30000, 40000, from_elb()),
                    SecurityRule::tcp(10250, 10250, from_elb()),
                ],
            )
            .await,
        )?;
        tolerate_existing(
            ec2.authorize_egress(&group, &[SecurityRule::all_from(anywhere())])
                .await,
        )?;
        Ok(())
    }

    async fn create_mount_targets(&mut self) -> Result<()> {
        let Some(file_system) = self
            .kube
            .aws_config
            .elastic_file_system
            .id()
            .map(str::to_string)
        else {
            return Ok(());
        };

        let efs = self.shared.clients.efs.clone();
        let groups = vec![self.node_security_group()?];
        let budget = self.shared.config.efs_mount_target;

        for subnet in self.kube.aws_config.subnet_ids() {
            if self
                .kube
                .aws_config
                .efs_mount_targets
                .iter()
                .any(|t| t.subnet_id == subnet)
            {
                continue;
            }

            let id = efs.create_mount_target(&file_system, &subnet, &groups).await?;
            self.kube.aws_config.efs_mount_targets.push(MountTarget {
                subnet_id: subnet.clone(),
                id: id.clone(),
            });
            self.persist().await?;

            let efs = efs.clone();
            self.status
                .wait_for(
                    "EFS target status",
                    budget.timeout,
                    budget.interval,
                    &mut (),
                    move |_| {
                        let efs = efs.clone();
                        let id = id.clone();
                        Box::pin(async move {
                            // Describe errors count as not yet available
                            let state = efs.describe_mount_target(&id).await;
                            Ok::<_, anyhow::Error>(matches!(state.as_deref(), Ok("available")))
                        })
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn create_masters(&mut self) -> Result<()> {
        let count = self.kube.kube_master_count.max(1) as usize;
        if self.kube.aws_config.master_nodes.len() >= count {
            return Ok(());
        }

        let subnets = self.kube.aws_config.subnet_ids();
        if subnets.is_empty() {
            anyhow::bail!("No subnets available for Kubernetes masters");
        }
        let image = self.shared.latest_ami().await?;
        let userdata = self.shared.collaborators.userdata.master(&self.kube)?;
        let profile = self
            .kube
            .aws_config
            .master_role_name
            .clone()
            .unwrap_or_else(|| MASTER_ROLE.to_string());
        let security_group = self.node_security_group()?;

        for i in self.kube.aws_config.master_nodes.len() + 1..=count {
            let subnet = &subnets[(i - 1) % subnets.len()];
            info!(kube = %self.kube.name, master = i, subnet = %subnet, "Launching master");

            let instance = self
                .shared
                .clients
                .ec2
                .run_instance(&RunInstanceRequest {
                    image_id: image.clone(),
                    instance_type: self.kube.master_node_size.clone(),
                    subnet_id: subnet.clone(),
                    security_group_ids: vec![security_group.clone()],
                    key_name: self.kube.key_pair_name(),
                    iam_instance_profile: profile.clone(),
                    userdata: userdata.clone(),
                    volume_size: self.kube.aws_config.master_volume_size,
                })
                .await?;
            self.kube.aws_config.master_nodes.push(instance.id);
            self.persist().await?;
        }

        let name = format!("{}-master", self.kube.name);
        for master in self.kube.aws_config.master_nodes.clone() {
            self.shared
                .tag(&self.kube, &master, &[("Name", name.clone()), ("Role", name.clone())])
                .await?;
        }
        Ok(())
    }

    async fn create_master_load_balancer(&mut self) -> Result<()> {
        if self.kube.kube_master_count <= 1
            || self.kube.aws_config.master_load_balancer.is_provisioned()
        {
            return Ok(());
        }

        let name = format!("{}-api", self.kube.name);
        let listener = |port| Listener {
            protocol: "TCP".to_string(),
            load_balancer_port: port,
            instance_port: port,
        };
        let elb = self.shared.clients.elb.clone();
        let dns_name = elb
            .create_load_balancer(&LoadBalancerRequest {
                name: name.clone(),
                internal: true,
                subnets: self.kube.aws_config.subnet_ids(),
                security_groups: vec![self.node_security_group()?],
                listeners: vec![listener(443), listener(2379)],
            })
            .await?;

        self.kube.master_private_ip = dns_name;
        self.kube.aws_config.master_load_balancer.provision(name.clone());
        self.persist().await?;

        elb.register_instances(&name, &self.kube.aws_config.master_nodes)
            .await?;
        Ok(())
    }

    /// One observation of the first master; records addresses as they appear
    async fn poll_master(&mut self) -> Result<bool> {
        let master = self
            .kube
            .aws_config
            .master_nodes
            .first()
            .cloned()
            .context("No Kubernetes master has been launched")?;
        let instance = self.shared.clients.ec2.describe_instance(&master).await?;

        let mut changed = false;
        if !self.kube.aws_config.master_load_balancer.is_provisioned() {
            if let Some(ip) = instance.private_ip.as_ref() {
                if &self.kube.master_private_ip != ip {
                    self.kube.master_private_ip = ip.clone();
                    changed = true;
                }
            }
        }
        if self.kube.master_public_ip.is_empty() {
            if let Some(ip) = instance.public_ip.as_ref() {
                self.kube.master_public_ip = ip.clone();
                changed = true;
            }
        }
        if changed {
            self.persist().await?;
        }

        Ok(instance.state == super::capabilities::InstanceState::Running
            && !self.kube.master_public_ip.is_empty())
    }

    async fn wait_for_master(&mut self) -> Result<()> {
        let status = self.status.clone();
        let budget = self.shared.config.master_launch;
        status
            .wait_for(
                "Kubernetes master launch",
                budget.timeout,
                budget.interval,
                self,
                |ctx: &mut KubeContext| Box::pin(ctx.poll_master()),
            )
            .await?;
        Ok(())
    }

    async fn create_first_minion(&mut self) -> Result<()> {
        let nodes = self
            .shared
            .storage
            .nodes
            .list(&[&self.kube.name])
            .await
            .context("Failed to list nodes")?;
        if !nodes.is_empty() {
            // A launch that failed on an earlier run left its record behind
            for mut minion in nodes {
                node::launch(&self.shared, &self.kube, &mut minion).await?;
            }
            return Ok(());
        }

        let size = self
            .kube
            .node_sizes
            .first()
            .cloned()
            .context("Kube has no node sizes")?;
        let mut minion = Node::new(self.kube.name.clone(), size);
        minion.name = minion_name(&self.kube.name);
        let mut minion = self
            .shared
            .storage
            .nodes
            .create(&[&self.kube.name], minion)
            .await
            .context("Failed to store first minion")?;

        node::launch(&self.shared, &self.kube, &mut minion).await
    }

    /// True once the API server lists a node; any failure counts as not ready
    async fn kubernetes_has_nodes(&mut self) -> Result<bool> {
        if self.kubernetes.is_none() {
            match self.shared.collaborators.kubernetes.connect(&self.kube).await {
                Ok(client) => self.kubernetes = Some(client),
                Err(e) => {
                    debug!(kube = %self.kube.name, error = %e, "Kubernetes API not reachable yet");
                    return Ok(false);
                }
            }
        }
        let Some(client) = self.kubernetes.as_ref() else {
            return Ok(false);
        };
        match client.list_nodes().await {
            Ok(nodes) => Ok(!nodes.is_empty()),
            Err(e) => {
                debug!(kube = %self.kube.name, error = %e, "Kubernetes API not ready yet");
                Ok(false)
            }
        }
    }

    async fn wait_for_kubernetes(&mut self) -> Result<()> {
        let status = self.status.clone();
        let budget = self.shared.config.kubernetes_api;
        status
            .wait_for(
                "Kubernetes API and first minion",
                budget.timeout,
                budget.interval,
                self,
                |ctx: &mut KubeContext| Box::pin(ctx.kubernetes_has_nodes()),
            )
            .await?;

        self.kube.ready = true;
        self.persist().await?;
        self.shared
            .logger
            .log_kube_ready(&self.kube.name, &self.kube.master_public_ip);
        Ok(())
    }
}

/// AlreadyExists means the desired state is in place
pub(crate) fn tolerate_existing(result: CloudResult<()>) -> CloudResult<()> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

fn bucket_policy(bucket: &str) -> String {
    serde_json::json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Sid": "DenyInsecureTransport",
            "Effect": "Deny",
            "Principal": "*",
            "Action": "s3:*",
            "Resource": [format!("arn:aws:s3:::{bucket}"), format!("arn:aws:s3:::{bucket}/*")],
            "Condition": { "Bool": { "aws:SecureTransport": "false" } },
        }],
    })
    .to_string()
}

/// Steps of Kube creation; IAM steps are omitted for user-supplied roles
pub(crate) fn procedure(kube: &Kube, status: &ActionStatus) -> Procedure<KubeContext> {
    let mut procedure = Procedure::new("create_kube").with_status(status.clone());

    procedure
        .add_step("preparing defaults", |ctx: &mut KubeContext| {
            Box::pin(ctx.prepare_defaults())
        })
        .add_step("assigning subnets", |ctx: &mut KubeContext| {
            Box::pin(ctx.assign_subnets())
        });

    if kube.aws_config.master_role_name.is_none() {
        procedure.add_step("preparing IAM kubernetes-master", |ctx: &mut KubeContext| {
            Box::pin(ctx.prepare_iam(MASTER_ROLE, MASTER_POLICY))
        });
    }
    if kube.aws_config.node_role_name.is_none() {
        procedure.add_step("preparing IAM kubernetes-minion", |ctx: &mut KubeContext| {
            Box::pin(ctx.prepare_iam(MINION_ROLE, MINION_POLICY))
        });
    }
    if kube.aws_config.build_elastic_file_system {
        procedure.add_step("creating EFS share", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_file_system())
        });
    }

    procedure
        .add_step("creating SSH Key Pair", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_key_pair())
        })
        .add_step("creating S3 bucket", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_bucket())
        })
        .add_step("uploading assets to S3", |ctx: &mut KubeContext| {
            Box::pin(ctx.upload_assets())
        })
        .add_step("creating VPC", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_vpc())
        })
        .add_step("creating Internet Gateway", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_internet_gateway())
        })
        .add_step("creating Subnets", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_subnets())
        })
        .add_step("creating Route Table", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_route_table())
        })
        .add_step("creating ELB Security Group", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_elb_security_group())
        })
        .add_step("creating Node Security Group", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_node_security_group())
        })
        .add_step("setting EFS share targets", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_mount_targets())
        })
        .add_step("creating Kubernetes master(s)", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_masters())
        })
        .add_step("creating master load balancer", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_master_load_balancer())
        })
        .add_step("waiting for Kubernetes master to launch", |ctx: &mut KubeContext| {
            Box::pin(ctx.wait_for_master())
        })
        .add_step("creating first minion", |ctx: &mut KubeContext| {
            Box::pin(ctx.create_first_minion())
        })
        .add_step("waiting for Kubernetes", |ctx: &mut KubeContext| {
            Box::pin(ctx.wait_for_kubernetes())
        });

    procedure
}
