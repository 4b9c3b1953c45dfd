//! Kube commands

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use tabled::Tabled;

use crate::client::{ApiClient, Job, Kube};
use crate::output::{format_ready, or_dash, print_json, print_list, print_success, OutputFormat};

/// Row for kubes table
#[derive(Tabled)]
struct KubeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Masters")]
    masters: u32,
    #[tabled(rename = "Master Size")]
    master_size: String,
    #[tabled(rename = "Master IP")]
    master_ip: String,
    #[tabled(rename = "Status")]
    status: String,
}

fn rows(kubes: &[Kube]) -> Vec<KubeRow> {
    kubes
        .iter()
        .map(|k| KubeRow {
            name: k.name.clone(),
            region: or_dash(k.region()),
            masters: k.kube_master_count,
            master_size: or_dash(&k.master_node_size),
            master_ip: or_dash(&k.master_public_ip),
            status: format_ready(k.ready),
        })
        .collect()
}

pub async fn list_kubes(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let kubes: Vec<Kube> = client.get("api/v1/kubes").await?;
    print_list(&kubes, rows, "No kubes found", format)
}

pub async fn get_kube(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let kube: Kube = client.get(&format!("api/v1/kubes/{}", name)).await?;

    match format {
        OutputFormat::Json => print_json(&kube),
        OutputFormat::Table => print_list(std::slice::from_ref(&kube), rows, "", format),
    }
}

/// Read a Kube definition from a JSON file
pub fn read_definition(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let definition: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    match definition.get("name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => Ok(definition),
        _ => anyhow::bail!("{} has no kube name", path.display()),
    }
}

/// Store a Kube definition and queue its creation
pub async fn create_kube(client: &ApiClient, file: &Path, format: OutputFormat) -> Result<()> {
    let definition = read_definition(file)?;
    let kube: Kube = client.post("api/v1/kubes", &definition).await?;

    match format {
        OutputFormat::Json => print_json(&kube),
        OutputFormat::Table => {
            print_success(&format!("Kube {} created; provisioning queued", kube.name));
            Ok(())
        }
    }
}

pub async fn delete_kube(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let job: Job = client.delete(&format!("api/v1/kubes/{}", name)).await?;

    match format {
        OutputFormat::Json => print_json(&job),
        OutputFormat::Table => {
            print_success(&format!("Deletion of kube {} queued (job {})", name, job.id));
            Ok(())
        }
    }
}
