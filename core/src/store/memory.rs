use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::r#trait::CollectionStore;
use crate::runner::RunnerCollection;
use crate::schedule::ScheduledRun;

#[derive(Default)]
struct Tables {
    collections: HashMap<String, RunnerCollection>,
    schedules: HashMap<String, ScheduledRun>,
}

/// Process-local store. Lists come back oldest first.
#[derive(Default)]
pub struct InMemoryCollectionStore {
    tables: Mutex<Tables>,
}

impl InMemoryCollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CollectionStore for InMemoryCollectionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn collection(&self, id: &str) -> anyhow::Result<Option<RunnerCollection>> {
        Ok(self.tables().collections.get(id).cloned())
    }

    async fn list_collections(&self) -> anyhow::Result<Vec<RunnerCollection>> {
        let mut out: Vec<RunnerCollection> = self.tables().collections.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn save_collection(&self, collection: RunnerCollection) -> anyhow::Result<()> {
        self.tables()
            .collections
            .insert(collection.id.clone(), collection);
        Ok(())
    }

    async fn delete_collection(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.tables().collections.remove(id).is_some())
    }

    async fn record_run(&self, collection_id: &str, at: DateTime<Utc>) -> anyhow::Result<bool> {
        match self.tables().collections.get_mut(collection_id) {
            Some(collection) => {
                collection.record_run(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn edit_collection(
        &self,
        edited: RunnerCollection,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<RunnerCollection>> {
        let mut tables = self.tables();
        Ok(tables.collections.get_mut(&edited.id).map(|stored| {
            stored.apply_edit(edited, at);
            stored.clone()
        }))
    }

    async fn schedule(&self, id: &str) -> anyhow::Result<Option<ScheduledRun>> {
        Ok(self.tables().schedules.get(id).cloned())
    }

    async fn list_schedules(&self) -> anyhow::Result<Vec<ScheduledRun>> {
        let mut out: Vec<ScheduledRun> = self.tables().schedules.values().cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn save_schedule(&self, schedule: ScheduledRun) -> anyhow::Result<()> {
        self.tables()
            .schedules
            .insert(schedule.id.clone(), schedule);
        Ok(())
    }

    async fn delete_schedule(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.tables().schedules.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ReplayTemplate;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_record_runs_are_all_counted() {
        let store = std::sync::Arc::new(InMemoryCollectionStore::new());
        let collection = RunnerCollection::new("c", Vec::new());
        store.save_collection(collection.clone()).await.unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                let id = collection.id.clone();
                tokio::spawn(async move { store.record_run(&id, chrono::Utc::now()).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }
        let stored = store.collection(&collection.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 20);
    }

    #[tokio::test]
    async fn test_edit_keeps_counters() {
        let store = InMemoryCollectionStore::new();
        let collection = RunnerCollection::new("before", Vec::new());
        store.save_collection(collection.clone()).await.unwrap();
        store.record_run(&collection.id, chrono::Utc::now()).await.unwrap();

        let mut edited = collection.clone();
        edited.name = "after".to_string();
        let at = chrono::Utc::now();
        let updated = store.edit_collection(edited, at).await.unwrap().unwrap();
        assert_eq!(updated.name, "after");
        assert_eq!(updated.run_count, 1);
        assert_eq!(updated.updated_at, at);

        let gone = RunnerCollection::new("gone", Vec::new());
        assert!(store.edit_collection(gone, at).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_run_bumps_counters() {
        let store = InMemoryCollectionStore::new();
        let collection = RunnerCollection::new("c", vec![ReplayTemplate::get("http://a.test/")]);
        store.save_collection(collection.clone()).await.unwrap();

        let at = chrono::Utc::now();
        assert!(store.record_run(&collection.id, at).await.unwrap());
        assert!(store.record_run(&collection.id, at).await.unwrap());
        assert!(!store.record_run("missing", at).await.unwrap());

        let stored = store.collection(&collection.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 2);
        assert_eq!(stored.last_run_at, Some(at));
    }

    #[test]
    fn test_delete_reports_presence() {
        tokio_test::block_on(async {
            let store = InMemoryCollectionStore::new();
            let collection = RunnerCollection::new("c", Vec::new());
            store.save_collection(collection.clone()).await.unwrap();
            assert!(store.delete_collection(&collection.id).await.unwrap());
            assert!(!store.delete_collection(&collection.id).await.unwrap());
            assert!(store.list_collections().await.unwrap().is_empty());
        });
    }
}
