use tokio::io::AsyncReadExt;
use wiretap_core::RunnerOperation;

use super::cli::OpArgs;
use super::{print_json, Runtime};
use crate::error::CliError;

/// Reads one [`RunnerOperation`] and prints its output as JSON.
pub async fn run(args: OpArgs, rt: &Runtime) -> Result<i32, CliError> {
    let text = match args.request {
        Some(text) => text,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    let op: RunnerOperation = serde_json::from_str(text.trim())
        .map_err(|e| CliError::command(format!("invalid operation: {e}")))?;
    let output = rt.service.dispatch(op).await?;
    print_json(&output)?;
    Ok(0)
}
