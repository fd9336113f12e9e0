use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use wiretap_core::runner::RunnerCollection;
use wiretap_core::schedule::ScheduledRun;
use wiretap_core::store::CollectionStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    collections: Vec<RunnerCollection>,
    #[serde(default)]
    schedules: Vec<ScheduledRun>,
}

/// Collections and schedules in a single pretty-printed JSON file. The whole
/// document is rewritten on every change through a temp file and rename.
/// Changes are applied to a copy and only become visible once written, all
/// under the document lock.
pub struct JsonFileCollectionStore {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl JsonFileCollectionStore {
    /// Loads `path`, or starts empty when it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => Document::default(),
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| anyhow::anyhow!("invalid store file {}: {}", path.display(), e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(
            target: "wiretap.persist",
            stage = "store.open",
            path = %path.display(),
            collections = doc.collections.len(),
            schedules = doc.schedules.len()
        );
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, doc: &Document) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let text = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn commit(
        &self,
        doc: &mut MutexGuard<'_, Document>,
        next: Document,
    ) -> anyhow::Result<()> {
        self.write(&next).await?;
        **doc = next;
        Ok(())
    }
}

fn upsert<T, F>(items: &mut Vec<T>, item: T, same: F)
where
    F: Fn(&T, &T) -> bool,
{
    match items.iter_mut().find(|existing| same(existing, &item)) {
        Some(slot) => *slot = item,
        None => items.push(item),
    }
}

#[async_trait]
impl CollectionStore for JsonFileCollectionStore {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn collection(&self, id: &str) -> anyhow::Result<Option<RunnerCollection>> {
        let doc = self.doc.lock().await;
        Ok(doc.collections.iter().find(|c| c.id == id).cloned())
    }

    async fn list_collections(&self) -> anyhow::Result<Vec<RunnerCollection>> {
        Ok(self.doc.lock().await.collections.clone())
    }

    async fn save_collection(&self, collection: RunnerCollection) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        upsert(&mut next.collections, collection, |a, b| a.id == b.id);
        self.commit(&mut doc, next).await
    }

    async fn delete_collection(&self, id: &str) -> anyhow::Result<bool> {
        let mut doc = self.doc.lock().await;
        if !doc.collections.iter().any(|c| c.id == id) {
            return Ok(false);
        }
        let mut next = doc.clone();
        next.collections.retain(|c| c.id != id);
        self.commit(&mut doc, next).await?;
        Ok(true)
    }

    async fn record_run(&self, collection_id: &str, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        let Some(collection) = next.collections.iter_mut().find(|c| c.id == collection_id) else {
            return Ok(false);
        };
        collection.record_run(at);
        self.commit(&mut doc, next).await?;
        Ok(true)
    }

    async fn edit_collection(
        &self,
        edited: RunnerCollection,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<RunnerCollection>> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        let Some(stored) = next.collections.iter_mut().find(|c| c.id == edited.id) else {
            return Ok(None);
        };
        stored.apply_edit(edited, at);
        let updated = stored.clone();
        self.commit(&mut doc, next).await?;
        Ok(Some(updated))
    }

    async fn schedule(&self, id: &str) -> anyhow::Result<Option<ScheduledRun>> {
        let doc = self.doc.lock().await;
        Ok(doc.schedules.iter().find(|s| s.id == id).cloned())
    }

    async fn list_schedules(&self) -> anyhow::Result<Vec<ScheduledRun>> {
        Ok(self.doc.lock().await.schedules.clone())
    }

    async fn save_schedule(&self, schedule: ScheduledRun) -> anyhow::Result<()> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        upsert(&mut next.schedules, schedule, |a, b| a.id == b.id);
        self.commit(&mut doc, next).await
    }

    async fn delete_schedule(&self, id: &str) -> anyhow::Result<bool> {
        let mut doc = self.doc.lock().await;
        if !doc.schedules.iter().any(|s| s.id == id) {
            return Ok(false);
        }
        let mut next = doc.clone();
        next.schedules.retain(|s| s.id != id);
        self.commit(&mut doc, next).await?;
        Ok(true)
    }
}
