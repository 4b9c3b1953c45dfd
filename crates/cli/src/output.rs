//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a table, or `items` as JSON
pub fn print_list<T: Serialize, R: Tabled>(
    items: &[T],
    rows: impl FnOnce(&[T]) -> Vec<R>,
    empty: &str,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&items),
        OutputFormat::Table => {
            if items.is_empty() {
                print_warning(empty);
                return Ok(());
            }
            let table = Table::new(rows(items)).with(Style::rounded()).to_string();
            println!("{}", table);
            Ok(())
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Color a job status
pub fn color_status(status: &str) -> String {
    match status.to_uppercase().as_str() {
        "QUEUED" => status.yellow().to_string(),
        "STARTED" => status.blue().to_string(),
        "FAILED" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Ready flag of a Kube
pub fn format_ready(ready: bool) -> String {
    if ready {
        "ready".green().to_string()
    } else {
        "provisioning".yellow().to_string()
    }
}

/// Placeholder for empty values in tables
pub fn or_dash(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}

/// Shorten long values (job payloads, errors) for table cells
pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let head: String = value.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Timed out waiting for Kubernetes API", 12), "Timed out...");
    }

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash(""), "-");
        assert_eq!(or_dash("54.0.0.1"), "54.0.0.1");
    }

    #[test]
    fn test_format_parses_from_config() {
        let format: OutputFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, OutputFormat::Json);
    }
}
