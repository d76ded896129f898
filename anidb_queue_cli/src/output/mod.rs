//! Rendering of operator command results

use crate::operator::{QueueReport, ServiceReport};
use anidb_queue_core::protocol::BanState;
use anidb_queue_core::{AddResult, CommandRequest};
use anyhow::Result;
use colored::*;

/// Output format of the reporting commands
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

pub fn add_result(identity: &str, result: AddResult) -> String {
    match result {
        AddResult::Queued(id) => format!("{} {identity} (#{id})", "queued".green()),
        AddResult::AlreadyQueued => format!("{} {identity}", "already queued".yellow()),
    }
}

pub fn ban(ban: &BanState) -> String {
    if !ban.banned {
        return format!("Ban: {}", "none".green());
    }
    let mut line = format!(
        "Ban: {} ({})",
        "active".red().bold(),
        ban.reason.as_deref().unwrap_or("no reason given")
    );
    if let Some(origin) = ban.origin {
        line.push_str(&format!(" via {origin:?}").to_lowercase());
    }
    if let Some(since) = ban.since {
        line.push_str(&format!(" since {}", since.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    line
}

pub fn queues(reports: &[QueueReport], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(reports)?);
    }

    let mut lines = vec![format!(
        "{:<8} {:<8} {:>8} {:>8} {:>8}",
        "QUEUE", "STATE", "PENDING", "RUNNING", "FAILED"
    )];
    for report in reports {
        let state = if report.paused {
            format!("{:<8}", "paused").yellow()
        } else {
            format!("{:<8}", "active").green()
        };
        lines.push(format!(
            "{:<8} {state} {:>8} {:>8} {:>8}",
            report.name.as_str(),
            report.counts.pending,
            report.counts.running,
            report.counts.failed
        ));
    }
    Ok(lines.join("\n"))
}

pub fn service(report: &ServiceReport, format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(report)?);
    }
    Ok(format!(
        "{}\n\n{}",
        ban(&report.ban),
        queues(&report.queues, format)?
    ))
}

pub fn failed(commands: &[CommandRequest], format: OutputFormat) -> Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(commands)?);
    }
    if commands.is_empty() {
        return Ok("No failed commands".to_string());
    }

    let lines: Vec<String> = commands
        .iter()
        .map(|command| {
            format!(
                "#{:<6} {} {} [{} attempts] {}",
                command.id,
                command.identity.cyan(),
                command.updated_at.format("%Y-%m-%d %H:%M:%S"),
                command.attempt_count,
                command
                    .last_error
                    .as_deref()
                    .unwrap_or("no error recorded")
                    .red()
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anidb_queue_core::protocol::BanOrigin;
    use anidb_queue_core::{QueueCounts, QueueName};

    fn plain() {
        colored::control::set_override(false);
    }

    #[test]
    fn test_add_result_lines() {
        plain();
        assert_eq!(
            add_result("GetReleaseGroup:3", AddResult::Queued(12)),
            "queued GetReleaseGroup:3 (#12)"
        );
        assert_eq!(
            add_result("GetReleaseGroup:3", AddResult::AlreadyQueued),
            "already queued GetReleaseGroup:3"
        );
    }

    #[test]
    fn test_ban_line() {
        plain();
        assert_eq!(ban(&BanState::default()), "Ban: none");
        let text = ban(&BanState {
            banned: true,
            origin: Some(BanOrigin::Udp),
            reason: Some("555 BANNED".to_string()),
            since: None,
        });
        assert_eq!(text, "Ban: active (555 BANNED) via udp");
    }

    #[test]
    fn test_queue_table_and_json() {
        plain();
        let reports = vec![QueueReport {
            name: QueueName::Hasher,
            paused: true,
            counts: QueueCounts {
                pending: 3,
                running: 1,
                failed: 0,
            },
        }];

        let table = queues(&reports, OutputFormat::Human).unwrap();
        let row = table.lines().nth(1).unwrap();
        assert!(row.starts_with("hasher"));
        assert!(row.contains("paused"));

        let json: serde_json::Value =
            serde_json::from_str(&queues(&reports, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json[0]["name"], "hasher");
        assert_eq!(json[0]["counts"]["pending"], 3);
    }

    #[test]
    fn test_no_failed_commands() {
        assert_eq!(
            failed(&[], OutputFormat::Human).unwrap(),
            "No failed commands"
        );
        assert_eq!(failed(&[], OutputFormat::Json).unwrap(), "[]");
    }
}
