//! Plain-text rendering for CLI commands.

use intake::models::{IngestionLog, Pipeline};

pub fn print_pipelines(pipelines: &[Pipeline]) {
    if pipelines.is_empty() {
        println!("No pipelines configured.");
        return;
    }

    println!(
        "{:<38} {:<24} {:<6} {:<16} {:<8} SCHEDULE",
        "ID", "NAME", "MODE", "TARGET", "ENABLED"
    );
    for p in pipelines {
        println!(
            "{:<38} {:<24} {:<6} {:<16} {:<8} {}",
            p.id,
            truncate(&p.name, 24),
            p.mode,
            truncate(&p.target_object, 16),
            p.is_enabled,
            p.schedule.as_deref().unwrap_or("-"),
        );
    }
}

pub fn print_logs(logs: &[IngestionLog]) {
    if logs.is_empty() {
        println!("No runs recorded.");
        return;
    }

    println!(
        "{:<38} {:<10} {:<8} {:>9} {:>8} {:>8} {:>7} {:>11}",
        "ID", "STATUS", "TRIGGER", "RECEIVED", "CREATED", "UPDATED", "FAILED", "DURATION"
    );
    for log in logs {
        let duration = log
            .duration_ms
            .map(|ms| format!("{ms}ms"))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<10} {:<8} {:>9} {:>8} {:>8} {:>7} {:>11}",
            log.id,
            log.status.as_str(),
            log.trigger_type.to_string(),
            log.total_records_received,
            log.records_created,
            log.records_updated,
            log.records_failed,
            duration,
        );
    }
}

pub fn print_run_summary(log: &IngestionLog) {
    println!("run {}", log.id);
    println!("  status: {}", log.status.as_str());
    println!("  received: {}", log.total_records_received);
    println!("  created: {}", log.records_created);
    println!("  updated: {}", log.records_updated);
    println!("  failed: {}", log.records_failed);
    if let Some(errors) = &log.errors {
        for error in errors {
            println!("  error[{}]: {}", error.record_index, error.message);
        }
    }
    if let Some(ms) = log.duration_ms {
        println!("  duration: {ms}ms");
    }
    println!("ok");
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
