pub mod capture;
pub mod cli;
pub mod collections;
pub mod op;
pub mod run;
pub mod schedule;

use std::path::Path;

use serde::{Deserialize, Serialize};
use wiretap_core::persist::PersistQueue;
use wiretap_core::runner::{ExecutionConfig, ReplayTemplate};
use wiretap_core::{AppConfig, RunnerService};
use wiretap_plugins::factory;

use crate::error::CliError;

/// Runner-side collaborators shared by the `run`, `schedule`,
/// `collections` and `op` commands.
pub struct Runtime {
    pub cfg: AppConfig,
    pub persist: PersistQueue,
    pub service: RunnerService,
}

impl Runtime {
    pub async fn open(cfg: AppConfig) -> Result<Self, CliError> {
        let persist = factory::build_persist(&cfg).await?;
        let store = factory::build_store(&cfg).await?;
        let transport = factory::build_transport(&cfg)?;
        let service = factory::build_runner_service(&cfg, transport, store, persist.clone());
        Ok(Self {
            cfg,
            persist,
            service,
        })
    }

    /// Waits until every queued record reached the sink, then hands back
    /// the command's result.
    pub async fn close<T>(self, result: Result<T, CliError>) -> Result<T, CliError> {
        self.persist.flush().await;
        result
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TemplateFile {
    List(Vec<ReplayTemplate>),
    Batch {
        templates: Vec<ReplayTemplate>,
        #[serde(default)]
        execution_config: ExecutionConfig,
    },
}

pub fn read_templates(path: &Path) -> Result<(Vec<ReplayTemplate>, ExecutionConfig), CliError> {
    let text = std::fs::read_to_string(path)?;
    parse_templates(&text)
        .map_err(|e| CliError::command(format!("invalid templates file {}: {e}", path.display())))
}

fn parse_templates(text: &str) -> Result<(Vec<ReplayTemplate>, ExecutionConfig), serde_json::Error> {
    Ok(match serde_json::from_str::<TemplateFile>(text)? {
        TemplateFile::List(templates) => (templates, ExecutionConfig::default()),
        TemplateFile::Batch {
            templates,
            execution_config,
        } => (templates, execution_config),
    })
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::command(e.to_string()))?;
    println!("{text}");
    Ok(())
}
