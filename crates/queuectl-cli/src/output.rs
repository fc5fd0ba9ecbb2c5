use chrono::{DateTime, TimeZone, Utc};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, Table};
use queuectl_core::Job;
use queuectl_queue::QueueStatus;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// Serialize `value` for the machine-readable formats; `None` for tables
pub fn render_structured<T: Serialize + ?Sized>(
    format: OutputFormat,
    value: &T,
) -> anyhow::Result<Option<String>> {
    match format {
        OutputFormat::Json => Ok(Some(serde_json::to_string_pretty(value)?)),
        OutputFormat::Yaml => Ok(Some(serde_yaml::to_string(value)?)),
        OutputFormat::Table => Ok(None),
    }
}

fn format_run_after(run_after: i64) -> String {
    if run_after == 0 {
        return "-".to_string();
    }
    match Utc.timestamp_opt(run_after, 0).single() {
        Some(at) => at.to_rfc3339(),
        None => run_after.to_string(),
    }
}

fn format_time(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn jobs_table(jobs: &[Job]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "State", "Attempts", "Command", "Run After", "Updated"]);
    for job in jobs {
        table.add_row(vec![
            job.id.clone(),
            job.state.to_string(),
            format!("{}/{}", job.attempts, job.max_retries),
            job.command.clone(),
            format_run_after(job.run_after),
            format_time(&job.updated_at),
        ]);
    }
    table
}

pub fn job_table(job: &Job) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["ID", &job.id]);
    table.add_row(vec!["Command", &job.command]);
    table.add_row(vec!["State", job.state.as_str()]);
    table.add_row(vec!["Attempts", &job.attempts.to_string()]);
    table.add_row(vec!["Max Retries", &job.max_retries.to_string()]);
    table.add_row(vec!["Created", &job.created_at.to_rfc3339()]);
    table.add_row(vec!["Updated", &job.updated_at.to_rfc3339()]);
    table.add_row(vec!["Run After", &format_run_after(job.run_after)]);
    if let Some(worker) = &job.locked_by {
        table.add_row(vec!["Locked By", worker]);
    }
    if let Some(locked_at) = &job.locked_at {
        table.add_row(vec!["Locked At", &locked_at.to_rfc3339()]);
    }
    if let Some(error) = &job.last_error {
        table.add_row(vec!["Last Error", error]);
    }
    table
}

pub fn status_table(status: &QueueStatus) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["State", "Jobs"]);
    for (state, count) in &status.state_counts {
        table.add_row(vec![state.to_string(), count.to_string()]);
    }
    table.add_row(vec!["total".to_string(), status.total.to_string()]);

    let workers = if status.workers.is_empty() {
        "none".to_string()
    } else {
        status.workers.join(", ")
    };
    table.add_row(vec!["workers".to_string(), workers]);
    table
}
