use wiretap_core::runner::RunnerCollection;
use wiretap_core::RunnerError;

use super::cli::CollectionsCommand;
use super::{print_json, read_templates, Runtime};
use crate::error::CliError;

pub async fn run(command: CollectionsCommand, rt: &Runtime, json: bool) -> Result<i32, CliError> {
    let store = rt.service.engine().store();
    match command {
        CollectionsCommand::List => {
            let collections = store.list_collections().await.map_err(RunnerError::Store)?;
            if json {
                print_json(&collections)?;
            } else if collections.is_empty() {
                println!("no collections");
            } else {
                collections.iter().for_each(print_line);
            }
        }
        CollectionsCommand::Show { collection_id } => {
            let collection = store
                .collection(&collection_id)
                .await
                .map_err(RunnerError::Store)?
                .ok_or(RunnerError::CollectionNotFound(collection_id))?;
            print_json(&collection)?;
        }
        CollectionsCommand::Create {
            name,
            file,
            description,
            mode,
        } => {
            let (templates, mut execution) = read_templates(&file)?;
            if let Some(mode) = mode {
                execution.mode = mode.into();
            }
            let collection = rt
                .service
                .create_collection(&name, &description, templates, execution)
                .await?;
            if json {
                print_json(&collection)?;
            } else {
                print_line(&collection);
            }
        }
        CollectionsCommand::Delete { collection_id } => {
            let (deleted, schedules_removed) = rt.service.delete_collection(&collection_id).await?;
            if !deleted {
                return Err(RunnerError::CollectionNotFound(collection_id).into());
            }
            if json {
                print_json(&serde_json::json!({
                    "deleted": collection_id,
                    "schedules_removed": schedules_removed,
                }))?;
            } else {
                println!("deleted {collection_id} ({schedules_removed} schedules removed)");
            }
        }
    }
    Ok(0)
}

fn print_line(c: &RunnerCollection) {
    println!(
        "{} {:<24} templates={} mode={} runs={}{}",
        c.id,
        c.name,
        c.templates.len(),
        c.execution_config.mode,
        c.run_count,
        c.last_run_at
            .map(|at| format!(" last={}", at.to_rfc3339()))
            .unwrap_or_default()
    );
}
