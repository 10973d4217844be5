//! Human-readable output for the admin commands.
//!
//! None of this is machine-parseable contract; it mirrors what an operator
//! wants at a glance.

use chrono::{DateTime, Utc};
use queuectl_core::{Job, QueueStats};

/// Truncate to `max` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn short_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Columns sized to their content, header underlined with dashes.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&format!("{header:<width$}", width = widths[i]));
    }
    out.push('\n');
    for (i, width) in widths.iter().enumerate() {
        if i > 0 {
            out.push_str("  ");
        }
        out.push_str(&"-".repeat(*width));
    }
    for row in rows {
        out.push('\n');
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                out.push_str("  ");
            }
            out.push_str(&format!("{cell:<width$}", width = widths[i]));
        }
    }
    out
}

pub fn job_table(jobs: &[Job]) -> String {
    let headers = [
        "ID", "Command", "State", "Attempts", "Priority", "Wait", "Effective", "Created At",
    ];
    let rows: Vec<Vec<String>> = jobs
        .iter()
        .map(|job| {
            vec![
                job.id.clone(),
                truncate(&job.command, 40),
                job.state.to_string(),
                format!("{}/{}", job.attempts, job.max_retries),
                job.priority.to_string(),
                job.waiting_time.to_string(),
                job.effective_priority().to_string(),
                short_timestamp(job.created_at),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}

pub fn dlq_table(jobs: &[Job]) -> String {
    let headers = ["ID", "Command", "Attempts", "Error", "Failed At"];
    let rows: Vec<Vec<String>> = jobs
        .iter()
        .map(|job| {
            vec![
                job.id.clone(),
                truncate(&job.command, 30),
                job.attempts.to_string(),
                truncate(job.error_message.as_deref().unwrap_or(""), 40),
                short_timestamp(job.updated_at),
            ]
        })
        .collect();
    render_table(&headers, &rows)
}

pub fn show_job(job: &Job) -> String {
    let mut out = String::new();
    let rule = "=".repeat(60);
    out.push_str(&format!("{rule}\n  Job: {}\n{rule}\n", job.id));
    out.push_str(&format!("Command:      {}\n", job.command));
    out.push_str(&format!("State:        {}\n", job.state));
    out.push_str(&format!("Attempts:     {}/{}\n", job.attempts, job.max_retries));
    out.push_str(&format!("Priority:     {}\n", job.priority));
    out.push_str(&format!("Waiting Time: {}\n", job.waiting_time));
    out.push_str(&format!(
        "Effective:    {} (priority + waiting time)\n",
        job.effective_priority()
    ));
    out.push_str(&format!("Timeout:      {}s\n", job.timeout));
    if let Some(elapsed) = job.execution_time {
        out.push_str(&format!("Exec Time:    {elapsed:.3}s\n"));
    }
    if let Some(worker) = &job.locked_by {
        out.push_str(&format!("Locked By:    {worker}\n"));
    }
    if let Some(at) = job.next_retry_at {
        out.push_str(&format!("Next Retry:   {}\n", short_timestamp(at)));
    }
    out.push_str(&format!("Created:      {}\n", short_timestamp(job.created_at)));
    out.push_str(&format!("Updated:      {}\n", short_timestamp(job.updated_at)));
    if let Some(error) = &job.error_message {
        out.push_str(&format!("\nError:\n{error}\n"));
    }
    if let Some(output) = &job.output {
        out.push_str(&format!("\nOutput:\n{output}\n"));
    }
    out.push_str(&rule);
    out
}

pub fn status_view(stats: QueueStats, active_workers: usize) -> String {
    let rule = "=".repeat(50);
    format!(
        "{rule}\n  QueueCTL Status\n{rule}\n\n\
         Total Jobs:          {}\n\n\
         Jobs by State:\n\
         \x20 Pending:           {}\n\
         \x20 Processing:        {}\n\
         \x20 Completed:         {}\n\
         \x20 Failed:            {}\n\
         \x20 Dead (DLQ):        {}\n\n\
         Workers:\n\
         \x20 Active Processes:  {}\n\
         \x20 Currently Working: {} job(s)\n{rule}",
        stats.total,
        stats.pending,
        stats.processing,
        stats.completed,
        stats.failed,
        stats.dead,
        active_workers,
        stats.processing,
    )
}
