use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::runner::RunnerCollection;
use crate::schedule::ScheduledRun;

/// Durable home of collections and schedules.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    fn name(&self) -> &str;

    async fn collection(&self, id: &str) -> anyhow::Result<Option<RunnerCollection>>;
    async fn list_collections(&self) -> anyhow::Result<Vec<RunnerCollection>>;
    /// Inserts or replaces by id.
    async fn save_collection(&self, collection: RunnerCollection) -> anyhow::Result<()>;
    async fn delete_collection(&self, id: &str) -> anyhow::Result<bool>;

    async fn schedule(&self, id: &str) -> anyhow::Result<Option<ScheduledRun>>;
    async fn list_schedules(&self) -> anyhow::Result<Vec<ScheduledRun>>;
    async fn save_schedule(&self, schedule: ScheduledRun) -> anyhow::Result<()>;
    async fn delete_schedule(&self, id: &str) -> anyhow::Result<bool>;

    /// Bumps `run_count` and `last_run_at`. False when the collection is gone.
    ///
    /// The default is a plain read then save. Stores shared between tasks
    /// override it to do both under their own lock.
    async fn record_run(&self, collection_id: &str, at: DateTime<Utc>) -> anyhow::Result<bool> {
        let Some(mut collection) = self.collection(collection_id).await? else {
            return Ok(false);
        };
        collection.record_run(at);
        self.save_collection(collection).await?;
        Ok(true)
    }

    /// Applies [`RunnerCollection::apply_edit`] to the stored copy and
    /// returns the result, or `None` when the collection is gone. Same
    /// locking note as [`CollectionStore::record_run`].
    async fn edit_collection(
        &self,
        edited: RunnerCollection,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<RunnerCollection>> {
        let Some(mut stored) = self.collection(&edited.id).await? else {
            return Ok(None);
        };
        stored.apply_edit(edited, at);
        self.save_collection(stored.clone()).await?;
        Ok(Some(stored))
    }
}
