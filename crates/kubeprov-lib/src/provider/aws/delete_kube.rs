//! Kube deletion procedure
//!
//! Deletes are best-effort and convergent: a resource that is already gone
//! counts as deleted, and each successful delete clears its recorded state
//! so that a re-run only retries what is left.

use super::capabilities::{CloudResult, InstanceState};
use super::create_kube::KubeContext;
use super::node;
use crate::procedure::{wait_for, Procedure};
use anyhow::{Context, Result};
use tracing::{info, warn};

fn ignore_not_found(result: CloudResult<()>) -> CloudResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

impl KubeContext {
    async fn delete_nodes(&mut self) -> Result<()> {
        let storage = &self.shared.storage;
        let nodes = storage
            .nodes
            .list(&[&self.kube.name])
            .await
            .context("Failed to list nodes")?;

        for mut minion in nodes {
            node::terminate(&self.shared, &mut minion).await?;
            match storage.nodes.delete(&[&self.kube.name], &minion.name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e).context("Failed to delete node record"),
            }
        }
        Ok(())
    }

    async fn delete_masters(&mut self) -> Result<()> {
        let ec2 = self.shared.clients.ec2.clone();
        let budget = self.shared.config.instance_terminate;

        while let Some(master) = self.kube.aws_config.master_nodes.first().cloned() {
            ignore_not_found(ec2.terminate_instance(&master).await)?;

            let ec2 = ec2.clone();
            let instance = master.clone();
            wait_for(
                "Kubernetes master termination",
                budget.timeout,
                budget.interval,
                &mut (),
                move |_| {
                    let ec2 = ec2.clone();
                    let instance = instance.clone();
                    Box::pin(async move {
                        match ec2.describe_instance(&instance).await {
                            Ok(found) => Ok(found.state == InstanceState::Terminated),
                            Err(e) if e.is_not_found() => Ok(true),
                            Err(e) => Err(anyhow::Error::from(e)),
                        }
                    })
                },
            )
            .await?;

            info!(kube = %self.kube.name, instance = %master, "Master terminated");
            self.kube.aws_config.master_nodes.remove(0);
            self.persist().await?;
        }
        Ok(())
    }

    async fn delete_master_load_balancer(&mut self) -> Result<()> {
        let name = format!("{}-api", self.kube.name);
        ignore_not_found(self.shared.clients.elb.delete_load_balancer(&name).await)?;
        if self.kube.aws_config.master_load_balancer.is_provisioned() {
            self.kube.aws_config.master_load_balancer.clear();
            self.persist().await?;
        }
        Ok(())
    }

    async fn delete_mount_targets(&mut self) -> Result<()> {
        let efs = self.shared.clients.efs.clone();
        while let Some(target) = self.kube.aws_config.efs_mount_targets.first().cloned() {
            ignore_not_found(efs.delete_mount_target(&target.id).await)?;
            self.kube.aws_config.efs_mount_targets.remove(0);
            self.persist().await?;
        }
        Ok(())
    }

    async fn disassociate_route_table(&mut self) -> Result<()> {
        if self.kube.aws_config.vpc_managed {
            return Ok(());
        }
        let ec2 = self.shared.clients.ec2.clone();
        while let Some(association) = self.kube.aws_config.route_table_associations.first().cloned() {
            ignore_not_found(ec2.disassociate_route_table(&association).await)?;
            self.kube.aws_config.route_table_associations.remove(0);
            self.persist().await?;
        }
        Ok(())
    }

    async fn delete_internet_gateway(&mut self) -> Result<()> {
        if self.kube.aws_config.vpc_managed {
            return Ok(());
        }
        let Some(gateway) = self.kube.aws_config.internet_gateway.id().map(str::to_string) else {
            return Ok(());
        };

        let ec2 = self.shared.clients.ec2.clone();
        if let Some(vpc) = self.kube.aws_config.vpc.id().map(str::to_string) {
            let budget = self.shared.config.gateway_detach;
            let detach_ec2 = ec2.clone();
            let detach_gateway = gateway.clone();
            // Detaching fails while instances in the VPC are still shutting down
            wait_for(
                "Internet Gateway to detach",
                budget.timeout,
                budget.interval,
                &mut (),
                move |_| {
                    let ec2 = detach_ec2.clone();
                    let gateway = detach_gateway.clone();
                    let vpc = vpc.clone();
                    Box::pin(async move {
                        match ec2.detach_internet_gateway(&gateway, &vpc).await {
                            Ok(()) => Ok(true),
                            Err(e) if e.is_not_found() => Ok(true),
                            Err(e) => {
                                warn!(gateway = %gateway, error = %e, "Internet Gateway not detached yet");
                                Ok(false)
                            }
                        }
                    })
                },
            )
            .await?;
        }

        ignore_not_found(ec2.delete_internet_gateway(&gateway).await)?;
        self.kube.aws_config.internet_gateway.clear();
        self.persist().await
    }

    async fn delete_route_table(&mut self) -> Result<()> {
        if self.kube.aws_config.vpc_managed {
            return Ok(());
        }
        let Some(route_table) = self.kube.aws_config.route_table.id().map(str::to_string) else {
            return Ok(());
        };
        ignore_not_found(self.shared.clients.ec2.delete_route_table(&route_table).await)?;
        self.kube.aws_config.route_table.clear();
        self.persist().await
    }

    async fn delete_subnets(&mut self) -> Result<()> {
        if self.kube.aws_config.vpc_managed {
            return Ok(());
        }

        let ec2 = self.shared.clients.ec2.clone();
        let budget = self.shared.config.subnet_delete;
        for index in 0..self.kube.aws_config.subnets.len() {
            let Some(subnet) = self.kube.aws_config.subnets[index].subnet.id().map(str::to_string)
            else {
                continue;
            };

            let ec2 = ec2.clone();
            let target = subnet.clone();
            wait_for(
                "Public Subnet to delete",
                budget.timeout,
                budget.interval,
                &mut (),
                move |_| {
                    let ec2 = ec2.clone();
                    let subnet = target.clone();
                    Box::pin(async move {
                        match ignore_not_found(ec2.delete_subnet(&subnet).await) {
                            Ok(()) => Ok(true),
                            Err(_) => Ok(false),
                        }
                    })
                },
            )
            .await?;

            self.kube.aws_config.subnets[index].subnet.clear();
            self.persist().await?;
        }
        Ok(())
    }

    async fn delete_security_groups(&mut self) -> Result<()> {
        let ec2 = self.shared.clients.ec2.clone();

        if let Some(group) = self.kube.aws_config.node_security_group.id().map(str::to_string) {
            ignore_not_found(ec2.delete_security_group(&group).await)?;
            self.kube.aws_config.node_security_group.clear();
            self.persist().await?;
        }
        if let Some(group) = self.kube.aws_config.elb_security_group.id().map(str::to_string) {
            ignore_not_found(ec2.delete_security_group(&group).await)?;
            self.kube.aws_config.elb_security_group.clear();
            self.persist().await?;
        }
        Ok(())
    }

    async fn delete_bucket(&mut self) -> Result<()> {
        let Some(bucket) = self.kube.aws_config.bucket_name.clone() else {
            return Ok(());
        };

        let s3 = self.shared.clients.s3.clone();
        match s3.list_objects(&bucket).await {
            Ok(keys) => {
                for key in keys {
                    ignore_not_found(s3.delete_object(&bucket, &key).await)?;
                }
                ignore_not_found(s3.delete_bucket(&bucket).await)?;
            }
            Err(e) if e.is_not_found() => {
                info!(bucket = %bucket, "Bucket already gone");
            }
            Err(e) => return Err(e.into()),
        }

        self.kube.aws_config.bucket_name = None;
        self.persist().await
    }

    async fn delete_vpc(&mut self) -> Result<()> {
        if self.kube.aws_config.vpc_managed {
            info!(kube = %self.kube.name, "VPC is externally managed, not deleting it");
            return Ok(());
        }
        let Some(vpc) = self.kube.aws_config.vpc.id().map(str::to_string) else {
            return Ok(());
        };
        ignore_not_found(self.shared.clients.ec2.delete_vpc(&vpc).await)?;
        self.kube.aws_config.vpc.clear();
        self.persist().await
    }

    async fn delete_key_pair(&mut self) -> Result<()> {
        let name = self.kube.key_pair_name();
        ignore_not_found(self.shared.clients.ec2.delete_key_pair(&name).await)?;
        if self.kube.aws_config.private_key.take().is_some() {
            self.persist().await?;
        }
        Ok(())
    }
}

pub(crate) fn procedure() -> Procedure<KubeContext> {
    let mut procedure = Procedure::new("delete_kube");
    procedure
        .add_step("deleting nodes", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_nodes())
        })
        .add_step("deleting master(s)", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_masters())
        })
        .add_step("destroying api load balancer", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_master_load_balancer())
        })
        .add_step("deleting EFS targets", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_mount_targets())
        })
        .add_step("disassociating Route Table", |ctx: &mut KubeContext| {
            Box::pin(ctx.disassociate_route_table())
        })
        .add_step("deleting Internet Gateway", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_internet_gateway())
        })
        .add_step("deleting Route Table", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_route_table())
        })
        .add_step("deleting Subnets", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_subnets())
        })
        .add_step("deleting Security Groups", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_security_groups())
        })
        .add_step("deleting S3 bucket", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_bucket())
        })
        .add_step("deleting VPC", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_vpc())
        })
        .add_step("deleting SSH Key Pair", |ctx: &mut KubeContext| {
            Box::pin(ctx.delete_key_pair())
        });
    procedure
}
