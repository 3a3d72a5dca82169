//! The index of every published video, and everything that edits it.

pub mod dedupe;
pub mod record;
pub mod store;

pub use dedupe::{is_duplicate, normalize_origin_url, normalize_source_ref, ReindexReport};
pub use record::{new_video_id, RecordEdit, SourceKind, VideoRecord};
pub use store::{IndexError, IndexSnapshot, IndexStore};

use tokio::sync::Mutex;

/// How many times a read-modify-write is attempted when the index keeps
/// changing under us.
const CONFLICT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// Nothing was written; this record already covers the video.
    Duplicate(VideoRecord),
}

/// Serialized access to the index.
///
/// Every edit loads the index, checks and changes it, and saves it back
/// while holding one lock, so two edits in this process can never lose
/// each other's changes. Writers outside of this process are caught by
/// the version check on save.
pub struct VideoIndex {
    store: IndexStore,
    lock: Mutex<()>,
}

impl VideoIndex {
    pub fn new(store: IndexStore) -> VideoIndex {
        VideoIndex {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Run `modify` on a freshly loaded index and save the result if it
    /// reports a change. Re-runs with a fresh load on save conflicts.
    async fn read_modify_write<T>(
        &self,
        what: &str,
        mut modify: impl FnMut(&mut Vec<VideoRecord>) -> (T, bool),
    ) -> Result<T, IndexError> {
        let _guard = self.lock.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let IndexSnapshot {
                mut records,
                version,
            } = self.store.load().await?;

            let (result, changed) = modify(&mut records);
            if !changed {
                return Ok(result);
            }

            match self.store.save(&records, version.as_ref()).await {
                Ok(_) => return Ok(result),
                Err(IndexError::Conflict) if attempt < CONFLICT_ATTEMPTS => {
                    log::warn!("Index conflict during {what}, trying again ({attempt}/{CONFLICT_ATTEMPTS})");
                }
                Err(e) => {
                    log::error!("Failed to save index during {what}: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// Add a record, unless one for the same video is already there.
    ///
    /// New records go to the front. The stored source reference and origin
    /// URL are normalized.
    pub async fn insert(&self, mut record: VideoRecord) -> Result<InsertOutcome, IndexError> {
        record.source_ref = record.source_ref.as_deref().and_then(normalize_source_ref);
        record.origin_url = record.origin_url.as_deref().and_then(normalize_origin_url);

        let outcome = self
            .read_modify_write("insert", |records| {
                let current: &[VideoRecord] = records;
                let existing = current
                    .iter()
                    .find(|r| r.video_id == record.video_id)
                    .or_else(|| {
                        is_duplicate(
                            current,
                            record.source_ref.as_deref(),
                            record.origin_url.as_deref(),
                        )
                    })
                    .cloned();

                match existing {
                    Some(existing) => (InsertOutcome::Duplicate(existing), false),
                    None => {
                        records.insert(0, record.clone());
                        (InsertOutcome::Inserted, true)
                    }
                }
            })
            .await?;

        match &outcome {
            InsertOutcome::Inserted => log::info!("Indexed video {}", record.video_id),
            InsertOutcome::Duplicate(existing) => log::info!(
                "Not indexing {}: duplicate of {}",
                record.video_id,
                existing.video_id
            ),
        }
        Ok(outcome)
    }

    /// Apply an edit to one record. Returns the record as it is afterwards,
    /// or `None` if there's no such video.
    pub async fn update(
        &self,
        video_id: &str,
        edit: &RecordEdit,
    ) -> Result<Option<VideoRecord>, IndexError> {
        self.read_modify_write("update", |records| {
            match records.iter_mut().find(|r| r.video_id == video_id) {
                Some(record) => {
                    let changed = edit.apply(record);
                    (Some(record.clone()), changed)
                }
                None => (None, false),
            }
        })
        .await
    }

    /// Remove duplicates and normalize source references. Only saves if
    /// something changed.
    pub async fn reindex(&self) -> Result<ReindexReport, IndexError> {
        self.read_modify_write("reindex", |records| {
            let report = dedupe::reindex(records);
            (report, report.changed_anything())
        })
        .await
    }

    /// Read-only view of the index. Doesn't wait for edits in progress.
    pub async fn snapshot(&self) -> Result<Vec<VideoRecord>, IndexError> {
        Ok(self.store.load().await?.records)
    }

    pub async fn get(&self, video_id: &str) -> Result<Option<VideoRecord>, IndexError> {
        Ok(self
            .snapshot()
            .await?
            .into_iter()
            .find(|r| r.video_id == video_id))
    }

    pub async fn ensure(&self) -> Result<bool, IndexError> {
        self.store.ensure().await
    }
}
