//! In-memory result store with retention.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mediaq_models::{Job, JobId, JobState};

use crate::error::{StorageError, StorageResult};

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a finished job stays retrievable
    pub retention: Duration,
    /// How often expired entries are swept
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredJob {
    job: Job,
    stored_at: Instant,
}

/// A servable artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub content_type: &'static str,
    pub file_name: String,
}

/// Terminal jobs keyed by id.
#[derive(Debug)]
pub struct ResultStore {
    config: StoreConfig,
    entries: RwLock<HashMap<JobId, StoredJob>>,
}

impl ResultStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn is_expired(&self, entry: &StoredJob, now: Instant) -> bool {
        now.duration_since(entry.stored_at) >= self.config.retention
    }

    /// Store a terminal job.
    pub async fn insert(&self, job: Job) -> StorageResult<()> {
        if !job.is_terminal() {
            return Err(StorageError::InvalidState(format!(
                "job {} is {}",
                job.id, job.state
            )));
        }
        let id = job.id.clone();
        let entry = StoredJob {
            job,
            stored_at: Instant::now(),
        };
        self.entries.write().await.insert(id, entry);
        Ok(())
    }

    /// Look up a job. Expired entries are invisible even before the sweep.
    pub async fn get(&self, id: &JobId) -> Option<Job> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        entries
            .get(id)
            .filter(|e| !self.is_expired(e, now))
            .map(|e| e.job.clone())
    }

    /// All retained jobs, most recently submitted first.
    pub async fn list(&self) -> Vec<Job> {
        let entries = self.entries.read().await;
        let now = Instant::now();
        let mut jobs: Vec<Job> = entries
            .values()
            .filter(|e| !self.is_expired(e, now))
            .map(|e| e.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        jobs
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Resolve the artifact of a succeeded job.
    pub async fn artifact(&self, id: &JobId) -> StorageResult<Artifact> {
        let job = self
            .get(id)
            .await
            .ok_or_else(|| StorageError::not_found(id.as_str()))?;

        if job.state != JobState::Succeeded {
            return Err(StorageError::NotReady(job.state));
        }

        let path = job
            .output_ref
            .map(PathBuf::from)
            .ok_or_else(|| StorageError::artifact_missing("job produced no output"))?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(StorageError::artifact_missing("output is not a file")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::artifact_missing("output file was removed"))
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| id.to_string());

        Ok(Artifact {
            content_type: content_type_for(&path),
            size: metadata.len(),
            file_name,
            path,
        })
    }

    /// Delete a stored result and its artifact.
    pub async fn remove(&self, id: &JobId) -> StorageResult<Job> {
        let entry = self
            .entries
            .write()
            .await
            .remove(id)
            .ok_or_else(|| StorageError::not_found(id.as_str()))?;
        delete_artifact(&entry.job).await;
        Ok(entry.job)
    }

    /// Evict expired entries and delete their artifacts.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<StoredJob> = {
            let mut entries = self.entries.write().await;
            let ids: Vec<JobId> = entries
                .iter()
                .filter(|(_, e)| self.is_expired(e, now))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        for entry in &expired {
            delete_artifact(&entry.job).await;
        }
        if !expired.is_empty() {
            info!("Evicted {} expired job results", expired.len());
        }
        expired.len()
    }

    /// Periodically evict expired results until `shutdown` flips to true.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.evict_expired().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Result sweeper stopped");
                            break;
                        }
                    }
                }
            }
        })
    }
}

async fn delete_artifact(job: &Job) {
    let Some(path) = job.output_ref.as_deref() else {
        return;
    };
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(job_id = %job.id, "Deleted artifact {}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(job_id = %job.id, "Failed to delete artifact {}: {}", path, e),
    }
}

/// MIME type by file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "ts" => "video/mp2t",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "gif" => "image/gif",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaq_models::{JobError, JobParams};
    use tempfile::TempDir;

    fn succeeded(output: Option<&Path>) -> Job {
        let mut job = Job::new("/in/a.mp4", JobParams::default());
        job.mark_running();
        job.mark_succeeded(output.map(|p| p.to_string_lossy().to_string()));
        job
    }

    fn store(retention: Duration) -> ResultStore {
        ResultStore::new(StoreConfig {
            retention,
            sweep_interval: Duration::from_millis(20),
        })
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = store(Duration::from_secs(60));
        let job = succeeded(None);
        let id = job.id.clone();

        store.insert(job).await.unwrap();
        assert_eq!(store.get(&id).await.map(|j| j.state), Some(JobState::Succeeded));
        assert!(store.get(&JobId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_rejects_non_terminal_jobs() {
        let store = store(Duration::from_secs(60));
        let job = Job::new("/in/a.mp4", JobParams::default());
        assert!(matches!(
            store.insert(job).await,
            Err(StorageError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_entries_are_hidden_and_evicted() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("out.mp4");
        tokio::fs::write(&artifact, b"video").await.unwrap();

        let store = store(Duration::from_millis(30));
        let job = succeeded(Some(&artifact));
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get(&id).await.is_none());
        assert_eq!(store.evict_expired().await, 1);
        assert!(store.is_empty().await);
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_sweeper_evicts_in_background() {
        let store = Arc::new(store(Duration::from_millis(10)));
        store.insert(succeeded(None)).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = Arc::clone(&store).spawn_sweeper(rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty().await);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_deletes_artifact() {
        let dir = TempDir::new().unwrap();
        let artifact = dir.path().join("out.webm");
        tokio::fs::write(&artifact, b"video").await.unwrap();

        let store = store(Duration::from_secs(60));
        let job = succeeded(Some(&artifact));
        let id = job.id.clone();
        store.insert(job).await.unwrap();

        store.remove(&id).await.unwrap();
        assert!(!artifact.exists());
        assert!(matches!(store.remove(&id).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_artifact_resolution() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.webm");
        tokio::fs::write(&path, b"12345").await.unwrap();

        let store = store(Duration::from_secs(60));
        let ok = succeeded(Some(&path));
        let ok_id = ok.id.clone();
        store.insert(ok).await.unwrap();

        let artifact = store.artifact(&ok_id).await.unwrap();
        assert_eq!(artifact.size, 5);
        assert_eq!(artifact.content_type, "video/webm");
        assert_eq!(artifact.file_name, "out.webm");

        let mut failed = Job::new("/in/a.mp4", JobParams::default());
        failed.mark_running();
        failed.mark_failed(JobError::internal("boom"));
        let failed_id = failed.id.clone();
        store.insert(failed).await.unwrap();
        assert!(matches!(
            store.artifact(&failed_id).await,
            Err(StorageError::NotReady(JobState::Failed))
        ));

        let empty = succeeded(None);
        let empty_id = empty.id.clone();
        store.insert(empty).await.unwrap();
        assert!(matches!(
            store.artifact(&empty_id).await,
            Err(StorageError::ArtifactMissing(_))
        ));
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a.MP4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(content_type_for(Path::new("a")), "application/octet-stream");
    }
}
