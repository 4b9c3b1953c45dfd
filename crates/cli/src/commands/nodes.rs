//! Node commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{AddNodeRequest, ApiClient, Job, Node};
use crate::output::{or_dash, print_json, print_list, print_success, OutputFormat};

/// Row for nodes table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Private DNS")]
    private_dns: String,
}

fn rows(nodes: &[Node]) -> Vec<NodeRow> {
    nodes
        .iter()
        .map(|n| NodeRow {
            name: n.name.clone(),
            size: n.size.clone(),
            instance: or_dash(n.instance_id().unwrap_or("")),
            private_dns: or_dash(&n.private_dns_name),
        })
        .collect()
}

pub async fn list_nodes(client: &ApiClient, kube: &str, format: OutputFormat) -> Result<()> {
    let nodes: Vec<Node> = client.get(&format!("api/v1/kubes/{}/nodes", kube)).await?;
    print_list(&nodes, rows, &format!("Kube {} has no nodes", kube), format)
}

pub async fn add_node(client: &ApiClient, kube: &str, size: &str, format: OutputFormat) -> Result<()> {
    let request = AddNodeRequest {
        size: size.to_string(),
    };
    let node: Node = client
        .post(&format!("api/v1/kubes/{}/nodes", kube), &request)
        .await?;

    match format {
        OutputFormat::Json => print_json(&node),
        OutputFormat::Table => {
            print_success(&format!("Node {} ({}) queued for {}", node.name, node.size, kube));
            Ok(())
        }
    }
}

pub async fn remove_node(
    client: &ApiClient,
    kube: &str,
    node: &str,
    format: OutputFormat,
) -> Result<()> {
    let job: Job = client
        .delete(&format!("api/v1/kubes/{}/nodes/{}", kube, node))
        .await?;

    match format {
        OutputFormat::Json => print_json(&job),
        OutputFormat::Table => {
            print_success(&format!("Removal of node {} queued (job {})", node, job.id));
            Ok(())
        }
    }
}
