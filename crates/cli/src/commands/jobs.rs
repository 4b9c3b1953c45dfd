//! Job queue commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, EnqueueJobRequest, Job};
use crate::output::{color_status, print_json, print_list, print_success, truncate, OutputFormat};

/// Row for jobs table
#[derive(Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    job_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Data")]
    data: String,
    #[tabled(rename = "Error")]
    error: String,
}

fn rows(jobs: &[Job]) -> Vec<JobRow> {
    jobs.iter()
        .map(|j| JobRow {
            id: j.id.clone(),
            job_type: j.job_type.clone(),
            status: color_status(&j.status),
            attempts: j.attempts,
            data: truncate(&j.data, 48),
            error: truncate(j.error.as_deref().unwrap_or(""), 48),
        })
        .collect()
}

/// List every job in the queue
pub async fn list_jobs(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let jobs: Vec<Job> = client.get("api/v1/jobs").await?;
    print_list(&jobs, rows, "No jobs queued", format)?;
    if format == OutputFormat::Table && !jobs.is_empty() {
        println!("\nTotal: {} jobs", jobs.len());
    }
    Ok(())
}

/// Enqueue a raw job
pub async fn enqueue_job(
    client: &ApiClient,
    job_type: &str,
    data: &str,
    format: OutputFormat,
) -> Result<()> {
    let request = EnqueueJobRequest {
        job_type: job_type.to_string(),
        data: data.to_string(),
    };
    let job: Job = client.post("api/v1/jobs", &request).await?;

    match format {
        OutputFormat::Json => print_json(&job),
        OutputFormat::Table => {
            print_success(&format!("Enqueued {} job {}", job.job_type, job.id));
            Ok(())
        }
    }
}
