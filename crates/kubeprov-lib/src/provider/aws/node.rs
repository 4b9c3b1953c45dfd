//! Minion launch and termination

use super::capabilities::RunInstanceRequest;
use super::iam::MINION_ROLE;
use super::Shared;
use crate::models::{Kube, Node};
use crate::provider::minion_name;
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

/// Launch the instance backing `node` and persist its identity
pub(crate) async fn launch(shared: &Shared, kube: &Kube, node: &mut Node) -> Result<()> {
    if node.provider_id.is_provisioned() {
        return Ok(());
    }
    if node.name.is_empty() {
        node.name = minion_name(&kube.name);
    }

    let subnets = kube.aws_config.subnet_ids();
    if subnets.is_empty() {
        anyhow::bail!("Kube {} has no subnets to launch nodes in", kube.name);
    }
    let security_group = kube
        .aws_config
        .node_security_group
        .id()
        .map(str::to_string)
        .with_context(|| format!("Kube {} has no node security group", kube.name))?;

    let userdata = shared.collaborators.userdata.minion(kube, node)?;
    let image = shared.latest_ami().await?;

    let node_count = shared
        .storage
        .nodes
        .list(&[&kube.name])
        .await
        .context("Failed to list nodes")?
        .len();
    let subnet = &subnets[node_count.saturating_sub(1) % subnets.len()];

    let profile = kube
        .aws_config
        .node_role_name
        .clone()
        .unwrap_or_else(|| MINION_ROLE.to_string());

    let instance = shared
        .clients
        .ec2
        .run_instance(&RunInstanceRequest {
            image_id: image,
            instance_type: node.size.clone(),
            subnet_id: subnet.clone(),
            security_group_ids: vec![security_group],
            key_name: kube.key_pair_name(),
            iam_instance_profile: profile,
            userdata,
            volume_size: kube.aws_config.node_volume_size,
        })
        .await?;
    info!(kube = %kube.name, node = %node.name, instance = %instance.id, "Launched node");

    let role = format!("{}-minion", kube.name);
    if let Err(e) = shared
        .tag(kube, &instance.id, &[("Name", node.name.clone()), ("Role", role)])
        .await
    {
        warn!(instance = %instance.id, error = %e, "Failed to tag node instance");
    }

    node.provider_id.provision(instance.id);
    node.private_dns_name = instance.private_dns_name.unwrap_or_default();
    node.provider_creation_timestamp = Some(instance.launch_time.unwrap_or_else(Utc::now));
    shared.save_node(node).await
}

/// Terminate the instance backing `node`; a vanished instance counts as done
pub(crate) async fn terminate(shared: &Shared, node: &mut Node) -> Result<()> {
    let Some(instance) = node.provider_id.id().map(str::to_string) else {
        return Ok(());
    };

    match shared.clients.ec2.terminate_instance(&instance).await {
        Ok(()) => info!(node = %node.name, instance = %instance, "Terminated node"),
        Err(e) if e.is_not_found() => {
            info!(node = %node.name, instance = %instance, "Node instance already gone")
        }
        Err(e) => return Err(e.into()),
    }
    node.provider_id.clear();
    Ok(())
}
