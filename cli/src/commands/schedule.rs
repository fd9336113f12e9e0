use std::time::Duration;

use chrono::Utc;
use wiretap_core::schedule::{DueRun, ScheduledRun};

use super::cli::ScheduleCommand;
use super::{print_json, Runtime};
use crate::error::CliError;

pub async fn run(command: ScheduleCommand, rt: &Runtime, json: bool) -> Result<i32, CliError> {
    let scheduler = rt.service.scheduler();
    match command {
        ScheduleCommand::Add(args) => {
            let spec = args.to_spec()?;
            let schedule = rt
                .service
                .schedule_collection(&args.collection_id, spec)
                .await?;
            emit_one(&schedule, json)?;
        }
        ScheduleCommand::List => {
            let schedules = scheduler.list().await?;
            if json {
                print_json(&schedules)?;
            } else if schedules.is_empty() {
                println!("no schedules");
            } else {
                schedules.iter().for_each(print_line);
            }
        }
        ScheduleCommand::Enable { schedule_id } => {
            let schedule = scheduler.set_enabled(&schedule_id, true, Utc::now()).await?;
            emit_one(&schedule, json)?;
        }
        ScheduleCommand::Disable { schedule_id } => {
            let schedule = scheduler.set_enabled(&schedule_id, false, Utc::now()).await?;
            emit_one(&schedule, json)?;
        }
        ScheduleCommand::Remove { schedule_id } => {
            if !scheduler.delete_schedule(&schedule_id).await? {
                return Err(wiretap_core::RunnerError::ScheduleNotFound(schedule_id).into());
            }
            if json {
                print_json(&serde_json::json!({ "deleted": schedule_id }))?;
            } else {
                println!("removed {schedule_id}");
            }
        }
        ScheduleCommand::Poll => {
            let fired = rt.service.poll_due_schedules(Utc::now()).await?;
            emit_fired(&fired, json)?;
        }
        ScheduleCommand::Daemon { poll_ms } => {
            let period = Duration::from_millis(
                poll_ms
                    .unwrap_or(rt.cfg.scheduler.poll_interval_ms)
                    .max(1),
            );
            tracing::info!(
                target: "wiretap.schedule",
                stage = "daemon.start",
                poll_ms = period.as_millis() as u64
            );
            let driver = scheduler.spawn_driver(period);
            tokio::signal::ctrl_c().await?;
            driver.abort();
            tracing::info!(target: "wiretap.schedule", stage = "daemon.stop");
        }
    }
    Ok(0)
}

fn emit_one(schedule: &ScheduledRun, json: bool) -> Result<(), CliError> {
    if json {
        print_json(schedule)
    } else {
        print_line(schedule);
        Ok(())
    }
}

fn print_line(s: &ScheduledRun) {
    println!(
        "{} {} {:<8} next={} {}{}",
        s.id,
        s.collection_id,
        s.spec.kind(),
        s.next_run_at.to_rfc3339(),
        if s.enabled { "enabled" } else { "disabled" },
        s.last_status
            .map(|st| format!(" last={st}"))
            .unwrap_or_default()
    );
}

fn emit_fired(fired: &[DueRun], json: bool) -> Result<(), CliError> {
    if json {
        return print_json(&fired);
    }
    if fired.is_empty() {
        println!("nothing due");
    }
    for due in fired {
        println!(
            "{} -> {} {}{}",
            due.schedule_id,
            due.run_id.as_deref().unwrap_or("-"),
            due.status,
            due.error
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        );
    }
    Ok(())
}
