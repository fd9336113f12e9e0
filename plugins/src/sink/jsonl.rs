use std::path::Path;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use wiretap_core::persist::{Record, RecordSink};

pub const STDOUT_TARGET: &str = "stdout:";

/// Appends one JSON object per record. `stdout:` writes to standard output.
pub struct JsonlRecordSink {
    target: String,
    writer: Mutex<Box<dyn AsyncWrite + Unpin + Send>>,
}

impl JsonlRecordSink {
    pub async fn open(target: &str) -> anyhow::Result<Self> {
        let writer: Box<dyn AsyncWrite + Unpin + Send> = if target == STDOUT_TARGET {
            Box::new(tokio::io::stdout())
        } else {
            if let Some(parent) = Path::new(target).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(target)
                .await?;
            Box::new(file)
        };
        Ok(Self {
            target: target.to_string(),
            writer: Mutex::new(writer),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl RecordSink for JsonlRecordSink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn persist(&self, record: &Record) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiretap_core::capture::CapturedTransaction;

    #[tokio::test]
    async fn test_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.jsonl");
        let path_str = path.to_str().unwrap();

        let sink = JsonlRecordSink::open(path_str).await.unwrap();
        for id in ["a", "b"] {
            let tx = CapturedTransaction::new(
                id,
                "https://x.test/",
                "GET",
                "xmlhttprequest",
                None,
                Utc::now(),
            );
            sink.persist(&Record::Transaction(tx)).await.unwrap();
        }
        drop(sink);

        // Reopening appends rather than truncating.
        let again = JsonlRecordSink::open(path_str).await.unwrap();
        let tx = CapturedTransaction::new("c", "https://x.test/", "GET", "other", None, Utc::now());
        again.persist(&Record::Transaction(tx)).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "transaction");
        assert_eq!(first["id"], "a");
    }
}
