//! SQLite-backed persistence for queues, downloads, and chunks.
//!
//! The store is the single collaborator through which the engine reads and
//! mutates durable state. Chunk positions are upserted on every progress
//! tick, which is what makes resumption after a pause or crash correct: a
//! restarted process re-reads the persisted `current_pointer` of each chunk
//! and continues from there.
//!
//! # Example
//!
//! ```ignore
//! use fetchq::db::Database;
//! use fetchq::store::{NewQueue, Store};
//!
//! let db = Database::open_in_memory().await?;
//! let store = Store::new(db);
//! let queue = store.create_queue(&NewQueue { /* ... */ }).await?;
//! ```

mod daytime;
mod error;
mod model;

pub use daytime::{DayTime, DayTimeError};
pub use error::StoreError;
pub use model::{
    Download, DownloadChunk, DownloadState, DownloadWithQueueName, NewQueue, Queue, QueueUpdate,
};

use tracing::instrument;

use crate::db::Database;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence facade over the SQLite database.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
}

impl Store {
    /// Creates a store backed by the given database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ---- queues ----

    /// Inserts a queue and returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self, params), fields(name = %params.name))]
    pub async fn create_queue(&self, params: &NewQueue) -> Result<Queue> {
        let queue = sqlx::query_as::<_, Queue>(
            r"INSERT INTO queues
                  (name, directory, max_bandwidth, start_download, end_download,
                   retry_limit, schedule_mode, max_concurrent)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING *",
        )
        .bind(&params.name)
        .bind(&params.directory)
        .bind(params.max_bandwidth)
        .bind(params.start_download)
        .bind(params.end_download)
        .bind(params.retry_limit)
        .bind(params.schedule_mode)
        .bind(params.max_concurrent)
        .fetch_one(self.db.pool())
        .await?;

        Ok(queue)
    }

    /// Fetches a queue by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueueNotFound`] if no such queue exists.
    #[instrument(skip(self))]
    pub async fn get_queue(&self, id: i64) -> Result<Queue> {
        sqlx::query_as::<_, Queue>(r"SELECT * FROM queues WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(StoreError::QueueNotFound(id))
    }

    /// Lists all queues.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_queues(&self) -> Result<Vec<Queue>> {
        let queues = sqlx::query_as::<_, Queue>(r"SELECT * FROM queues ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;
        Ok(queues)
    }

    /// Updates a queue and returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueueNotFound`] if no such queue exists.
    #[instrument(skip(self, params), fields(id = params.id))]
    pub async fn update_queue(&self, params: &QueueUpdate) -> Result<Queue> {
        sqlx::query_as::<_, Queue>(
            r"UPDATE queues
              SET name = ?, directory = ?, max_bandwidth = ?, start_download = ?,
                  end_download = ?, retry_limit = ?, schedule_mode = ?, max_concurrent = ?
              WHERE id = ?
              RETURNING *",
        )
        .bind(&params.name)
        .bind(&params.directory)
        .bind(params.max_bandwidth)
        .bind(params.start_download)
        .bind(params.end_download)
        .bind(params.retry_limit)
        .bind(params.schedule_mode)
        .bind(params.max_concurrent)
        .bind(params.id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or(StoreError::QueueNotFound(params.id))
    }

    /// Deletes a queue. Downloads and chunks cascade via foreign keys.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::QueueNotFound`] if no such queue exists.
    #[instrument(skip(self))]
    pub async fn delete_queue(&self, id: i64) -> Result<()> {
        let result = sqlx::query(r"DELETE FROM queues WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::QueueNotFound(id));
        }
        Ok(())
    }

    // ---- downloads ----

    /// Inserts a download and returns the stored row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails (including a
    /// dangling `queue_id`, rejected by the foreign key).
    #[instrument(skip(self, url, save_path), fields(url = %url))]
    pub async fn create_download(
        &self,
        queue_id: i64,
        url: &str,
        save_path: &str,
        state: DownloadState,
    ) -> Result<Download> {
        let download = sqlx::query_as::<_, Download>(
            r"INSERT INTO downloads (queue_id, url, save_path, state, retries)
              VALUES (?, ?, ?, ?, 0)
              RETURNING *",
        )
        .bind(queue_id)
        .bind(url)
        .bind(save_path)
        .bind(state)
        .fetch_one(self.db.pool())
        .await?;

        Ok(download)
    }

    /// Fetches a download by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] if no such download exists.
    #[instrument(skip(self))]
    pub async fn get_download(&self, id: i64) -> Result<Download> {
        sqlx::query_as::<_, Download>(r"SELECT * FROM downloads WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(StoreError::DownloadNotFound(id))
    }

    /// Lists all downloads joined with their queue names, for the UI.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_downloads_with_queue_name(&self) -> Result<Vec<DownloadWithQueueName>> {
        let rows = sqlx::query_as::<_, DownloadWithQueueName>(
            r"SELECT d.id, d.queue_id, d.url, d.save_path, d.state, d.retries,
                     q.name AS queue_name
              FROM downloads d
              JOIN queues q ON q.id = d.queue_id
              ORDER BY d.id",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Returns the oldest PENDING download of a queue, if any.
    ///
    /// Insertion order (ascending id) breaks ties, so dispatch is
    /// oldest-first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_pending_download_by_queue_id(&self, queue_id: i64) -> Result<Option<Download>> {
        let download = sqlx::query_as::<_, Download>(
            r"SELECT * FROM downloads
              WHERE queue_id = ? AND state = 'PENDING'
              ORDER BY id ASC
              LIMIT 1",
        )
        .bind(queue_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(download)
    }

    /// Returns all downloads in the given state. Used at startup to recover
    /// downloads that were IN_PROGRESS when the previous process exited.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_downloads_by_state(&self, state: DownloadState) -> Result<Vec<Download>> {
        let downloads =
            sqlx::query_as::<_, Download>(r"SELECT * FROM downloads WHERE state = ? ORDER BY id")
                .bind(state)
                .fetch_all(self.db.pool())
                .await?;
        Ok(downloads)
    }

    /// Sets a download's lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] if no such download exists.
    #[instrument(skip(self))]
    pub async fn set_download_state(&self, id: i64, state: DownloadState) -> Result<()> {
        let result = sqlx::query(r"UPDATE downloads SET state = ? WHERE id = ?")
            .bind(state)
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DownloadNotFound(id));
        }
        Ok(())
    }

    /// Sets a download's retry counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] if no such download exists.
    #[instrument(skip(self))]
    pub async fn set_download_retries(&self, id: i64, retries: i64) -> Result<()> {
        let result = sqlx::query(r"UPDATE downloads SET retries = ? WHERE id = ?")
            .bind(retries)
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DownloadNotFound(id));
        }
        Ok(())
    }

    /// Deletes a download. Its chunks cascade via foreign keys.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DownloadNotFound`] if no such download exists.
    #[instrument(skip(self))]
    pub async fn delete_download(&self, id: i64) -> Result<()> {
        let result = sqlx::query(r"DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DownloadNotFound(id));
        }
        Ok(())
    }

    /// Moves every IN_PROGRESS download of a queue back to PENDING.
    ///
    /// Used by the scheduler when a queue's activity window closes; the
    /// downloads re-dispatch when the window next opens.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the update fails.
    #[instrument(skip(self))]
    pub async fn update_in_progress_to_pending_in_queue(&self, queue_id: i64) -> Result<u64> {
        let result = sqlx::query(
            r"UPDATE downloads SET state = 'PENDING'
              WHERE queue_id = ? AND state = 'IN_PROGRESS'",
        )
        .bind(queue_id)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Counts IN_PROGRESS downloads of a queue.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_in_progress_downloads_in_queue(&self, queue_id: i64) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r"SELECT COUNT(*) FROM downloads WHERE queue_id = ? AND state = 'IN_PROGRESS'",
        )
        .bind(queue_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.0)
    }

    // ---- chunks ----

    /// Inserts a chunk, or updates its `current_pointer` when a row with the
    /// same id already exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the upsert fails.
    #[instrument(skip(self, chunk), fields(chunk_id = %chunk.id, download_id = chunk.download_id))]
    pub async fn upsert_download_chunk(&self, chunk: &DownloadChunk) -> Result<()> {
        sqlx::query(
            r"INSERT INTO download_chunks
                  (id, range_start, range_end, current_pointer, download_id, single_part)
              VALUES (?, ?, ?, ?, ?, ?)
              ON CONFLICT (id) DO UPDATE SET current_pointer = excluded.current_pointer",
        )
        .bind(&chunk.id)
        .bind(chunk.range_start)
        .bind(chunk.range_end)
        .bind(chunk.current_pointer)
        .bind(chunk.download_id)
        .bind(chunk.single_part)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Returns the chunks of a download ordered by range start.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get_download_chunks_by_download_id(
        &self,
        download_id: i64,
    ) -> Result<Vec<DownloadChunk>> {
        let chunks = sqlx::query_as::<_, DownloadChunk>(
            r"SELECT * FROM download_chunks WHERE download_id = ? ORDER BY range_start",
        )
        .bind(download_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(chunks)
    }

    /// Deletes a single chunk by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete_download_chunk(&self, id: &str) -> Result<()> {
        sqlx::query(r"DELETE FROM download_chunks WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Lists every chunk in the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_download_chunks(&self) -> Result<Vec<DownloadChunk>> {
        let chunks = sqlx::query_as::<_, DownloadChunk>(
            r"SELECT * FROM download_chunks ORDER BY download_id, range_start",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(chunks)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn test_store() -> Store {
        let db = Database::open_in_memory().await.unwrap();
        Store::new(db)
    }

    fn sample_queue() -> NewQueue {
        NewQueue {
            name: "default".into(),
            directory: "/tmp/downloads".into(),
            max_bandwidth: None,
            start_download: None,
            end_download: None,
            retry_limit: 3,
            schedule_mode: false,
            max_concurrent: 2,
        }
    }

    #[tokio::test]
    async fn queue_crud_round_trip() {
        let store = test_store().await;

        let queue = store.create_queue(&sample_queue()).await.unwrap();
        assert_eq!(queue.name, "default");
        assert_eq!(queue.max_bandwidth, None);

        let fetched = store.get_queue(queue.id).await.unwrap();
        assert_eq!(fetched.max_concurrent, 2);

        let updated = store
            .update_queue(&QueueUpdate {
                id: queue.id,
                name: "night".into(),
                directory: queue.directory.clone(),
                max_bandwidth: Some(500_000),
                start_download: Some("22:00:00".parse().unwrap()),
                end_download: Some("06:00:00".parse().unwrap()),
                retry_limit: 1,
                schedule_mode: true,
                max_concurrent: 4,
            })
            .await
            .unwrap();
        assert_eq!(updated.name, "night");
        assert_eq!(updated.max_bandwidth, Some(500_000));
        assert!(updated.schedule_mode);
        assert_eq!(
            updated.start_download.unwrap().to_string(),
            "22:00:00".to_string()
        );

        store.delete_queue(queue.id).await.unwrap();
        assert!(matches!(
            store.get_queue(queue.id).await,
            Err(StoreError::QueueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn get_missing_queue_reports_id() {
        let store = test_store().await;
        match store.get_queue(42).await {
            Err(StoreError::QueueNotFound(42)) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_dispatch_is_oldest_first() {
        let store = test_store().await;
        let queue = store.create_queue(&sample_queue()).await.unwrap();

        let first = store
            .create_download(queue.id, "https://example.com/a", "/tmp/a", DownloadState::Pending)
            .await
            .unwrap();
        store
            .create_download(queue.id, "https://example.com/b", "/tmp/b", DownloadState::Pending)
            .await
            .unwrap();

        let next = store
            .get_pending_download_by_queue_id(queue.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.id, first.id);

        store
            .set_download_state(first.id, DownloadState::InProgress)
            .await
            .unwrap();
        let next = store
            .get_pending_download_by_queue_id(queue.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.url, "https://example.com/b");
    }

    #[tokio::test]
    async fn empty_queue_has_no_pending_download() {
        let store = test_store().await;
        let queue = store.create_queue(&sample_queue()).await.unwrap();
        assert!(store
            .get_pending_download_by_queue_id(queue.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn chunk_upsert_updates_pointer_only() {
        let store = test_store().await;
        let queue = store.create_queue(&sample_queue()).await.unwrap();
        let download = store
            .create_download(queue.id, "https://example.com/f", "/tmp/f", DownloadState::Pending)
            .await
            .unwrap();

        let mut chunk = DownloadChunk {
            id: "chunk-0".into(),
            range_start: 0,
            range_end: 1000,
            current_pointer: 0,
            download_id: download.id,
            single_part: false,
        };
        store.upsert_download_chunk(&chunk).await.unwrap();

        chunk.current_pointer = 512;
        store.upsert_download_chunk(&chunk).await.unwrap();

        let stored = store
            .get_download_chunks_by_download_id(download.id)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].current_pointer, 512);
        assert_eq!(stored[0].range_end, 1000);
    }

    #[tokio::test]
    async fn deleting_queue_cascades_to_downloads_and_chunks() {
        let store = test_store().await;
        let queue = store.create_queue(&sample_queue()).await.unwrap();
        let download = store
            .create_download(queue.id, "https://example.com/f", "/tmp/f", DownloadState::Pending)
            .await
            .unwrap();
        store
            .upsert_download_chunk(&DownloadChunk {
                id: "c0".into(),
                range_start: 0,
                range_end: 10,
                current_pointer: 0,
                download_id: download.id,
                single_part: false,
            })
            .await
            .unwrap();

        store.delete_queue(queue.id).await.unwrap();

        assert!(matches!(
            store.get_download(download.id).await,
            Err(StoreError::DownloadNotFound(_))
        ));
        assert!(store.list_download_chunks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn window_close_moves_in_progress_back_to_pending() {
        let store = test_store().await;
        let queue = store.create_queue(&sample_queue()).await.unwrap();
        let other = store.create_queue(&sample_queue()).await.unwrap();

        let a = store
            .create_download(queue.id, "https://example.com/a", "/tmp/a", DownloadState::InProgress)
            .await
            .unwrap();
        let b = store
            .create_download(other.id, "https://example.com/b", "/tmp/b", DownloadState::InProgress)
            .await
            .unwrap();

        let moved = store
            .update_in_progress_to_pending_in_queue(queue.id)
            .await
            .unwrap();
        assert_eq!(moved, 1);

        assert_eq!(
            store.get_download(a.id).await.unwrap().state,
            DownloadState::Pending
        );
        assert_eq!(
            store.get_download(b.id).await.unwrap().state,
            DownloadState::InProgress
        );
    }

    #[tokio::test]
    async fn counts_in_progress_per_queue() {
        let store = test_store().await;
        let queue = store.create_queue(&sample_queue()).await.unwrap();
        for (url, state) in [
            ("https://example.com/1", DownloadState::InProgress),
            ("https://example.com/2", DownloadState::InProgress),
            ("https://example.com/3", DownloadState::Pending),
        ] {
            store
                .create_download(queue.id, url, "/tmp/x", state)
                .await
                .unwrap();
        }
        assert_eq!(
            store
                .count_in_progress_downloads_in_queue(queue.id)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn downloads_join_queue_names() {
        let store = test_store().await;
        let queue = store.create_queue(&sample_queue()).await.unwrap();
        store
            .create_download(queue.id, "https://example.com/x", "/tmp/x", DownloadState::Pending)
            .await
            .unwrap();

        let rows = store.list_downloads_with_queue_name().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].queue_name, "default");
        assert_eq!(rows[0].state, DownloadState::Pending);
    }
}
