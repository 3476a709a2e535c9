//! Write-once artifact store
//!
//! Layout: `<root>/<run id>/<stage key relative path>`. Each run owns its
//! own directory, so concurrent runs never contend. Within a run every
//! stage key can be written exactly once; the second write fails with
//! [`StoreError::AlreadyWritten`] instead of silently replacing audit data.
//!
//! Files are first written to a hidden temp file and then hard-linked into
//! place. The link fails if the target already exists, which makes the
//! write-once check atomic even if two writers race.

use crate::hash::{ContentHash, HashError};
use crate::key::{ArtifactKind, RunId, StageKey};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Reference to a persisted artifact, recorded in the run's stage history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Path relative to the run directory
    pub stage: String,
    /// Hash of the payload (for directories: hash of the stage path)
    pub content_hash: ContentHash,
}

/// On-disk wrapper around every JSON payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub run_id: RunId,
    pub stage: String,
    pub sequence: String,
    pub content_hash: ContentHash,
    pub written_at: DateTime<Utc>,
    pub payload: T,
}

/// Artifact store root
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root` (created lazily)
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory for a new run
    ///
    /// # Errors
    /// - `StoreError::RunExists` if the run directory already exists
    /// - `StoreError::Io` on filesystem failure
    pub async fn create_run(&self, run_id: RunId) -> Result<RunArtifacts, StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;

        let dir = self.root.join(run_id.to_string());
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::RunExists(run_id));
            }
            Err(e) => return Err(StoreError::io(&dir, e)),
        }

        tracing::debug!(run_id = %run_id, dir = %dir.display(), "created run directory");
        Ok(RunArtifacts { run_id, dir })
    }

    /// Open an existing run for reading (audit / resume)
    ///
    /// # Errors
    /// Returns `StoreError::RunNotFound` if the run directory does not exist
    pub async fn open_run(&self, run_id: RunId) -> Result<RunArtifacts, StoreError> {
        let dir = self.root.join(run_id.to_string());
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(RunArtifacts { run_id, dir }),
            Ok(_) => Err(StoreError::RunNotFound(run_id)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::RunNotFound(run_id)),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }
}

/// Handle to one run's artifacts
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    run_id: RunId,
    dir: PathBuf,
}

impl RunArtifacts {
    /// Open a run directly from its directory (e.g. from the CLI)
    ///
    /// # Errors
    /// Returns `StoreError::InvalidRunDir` if the directory name is not a run id
    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let run_id = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<RunId>().ok())
            .ok_or_else(|| StoreError::InvalidRunDir(dir.clone()))?;
        Ok(Self { run_id, dir })
    }

    /// Run identifier
    #[inline]
    #[must_use]
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Run directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path of a stage artifact
    #[inline]
    #[must_use]
    pub fn path_of(&self, key: &StageKey) -> PathBuf {
        self.dir.join(key.relative_path())
    }

    /// Persist a structured payload
    ///
    /// # Errors
    /// - `StoreError::KindMismatch` if `key` is not a JSON stage
    /// - `StoreError::AlreadyWritten` if the stage was persisted before
    pub async fn put_json<T: Serialize>(
        &self,
        key: &StageKey,
        payload: &T,
    ) -> Result<ArtifactRef, StoreError> {
        expect_kind(key, ArtifactKind::Json)?;

        let content_hash = ContentHash::compute_serializable(payload)?;
        let envelope = Envelope {
            run_id: self.run_id,
            stage: key.relative_path(),
            sequence: key.sequence().to_string(),
            content_hash,
            written_at: Utc::now(),
            payload,
        };
        let bytes = serde_json::to_vec_pretty(&envelope).map_err(HashError::from)?;
        self.write_once(key, &bytes).await?;

        tracing::info!(
            run_id = %self.run_id,
            stage = %key,
            hash = %content_hash.short(),
            "persisted stage artifact"
        );
        Ok(ArtifactRef {
            stage: key.relative_path(),
            content_hash,
        })
    }

    /// Persist a text artifact (reports)
    ///
    /// # Errors
    /// Same as [`RunArtifacts::put_json`]
    pub async fn put_markdown(&self, key: &StageKey, text: &str) -> Result<ArtifactRef, StoreError> {
        expect_kind(key, ArtifactKind::Markdown)?;
        self.write_once(key, text.as_bytes()).await?;
        let content_hash = ContentHash::compute(text.as_bytes());
        tracing::info!(run_id = %self.run_id, stage = %key, "persisted text artifact");
        Ok(ArtifactRef {
            stage: key.relative_path(),
            content_hash,
        })
    }

    /// Claim a directory stage and return its path
    ///
    /// # Errors
    /// Returns `StoreError::AlreadyWritten` if the directory exists
    pub async fn claim_dir(&self, key: &StageKey) -> Result<PathBuf, StoreError> {
        expect_kind(key, ArtifactKind::Directory)?;
        let path = self.path_of(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }
        match tokio::fs::create_dir(&path).await {
            Ok(()) => Ok(path),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyWritten(key.relative_path()))
            }
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Reference for a directory stage once its contents are complete
    #[must_use]
    pub fn dir_ref(&self, key: &StageKey) -> ArtifactRef {
        ArtifactRef {
            stage: key.relative_path(),
            content_hash: ContentHash::compute(key.relative_path().as_bytes()),
        }
    }

    /// Load and integrity-check a structured payload
    ///
    /// # Errors
    /// - `StoreError::NotFound` if the stage was never written
    /// - `StoreError::Corrupted` if the stored hash does not match the payload
    pub async fn get_json<T>(&self, key: &StageKey) -> Result<Envelope<T>, StoreError>
    where
        T: DeserializeOwned + Serialize,
    {
        expect_kind(key, ArtifactKind::Json)?;
        let path = self.path_of(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.relative_path()));
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let envelope: Envelope<T> = serde_json::from_slice(&bytes).map_err(HashError::from)?;
        let actual = ContentHash::compute_serializable(&envelope.payload)?;
        if actual != envelope.content_hash {
            return Err(StoreError::Corrupted {
                stage: key.relative_path(),
                expected: envelope.content_hash,
                actual,
            });
        }
        Ok(envelope)
    }

    /// Whether a stage has been persisted
    pub async fn exists(&self, key: &StageKey) -> bool {
        tokio::fs::try_exists(self.path_of(key)).await.unwrap_or(false)
    }

    /// Top-level stage entries in sequence order
    ///
    /// # Errors
    /// Returns `StoreError::Io` if the run directory cannot be read
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Most recently persisted top-level stage (resume point)
    ///
    /// # Errors
    /// Same as [`RunArtifacts::list`]
    pub async fn last_persisted(&self) -> Result<Option<String>, StoreError> {
        Ok(self.list().await?.pop())
    }

    async fn write_once(&self, key: &StageKey, bytes: &[u8]) -> Result<(), StoreError> {
        let target = self.path_of(key);
        let parent = target.parent().unwrap_or(&self.dir).to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| StoreError::io(&parent, e))?;

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(StoreError::AlreadyWritten(key.relative_path()));
        }

        let tmp = parent.join(format!(".{}.{}.tmp", key.stem(), ulid::Ulid::new()));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;

        let linked = tokio::fs::hard_link(&tmp, &target).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyWritten(key.relative_path()))
            }
            Err(e) => Err(StoreError::io(&target, e)),
        }
    }
}

fn expect_kind(key: &StageKey, kind: ArtifactKind) -> Result<(), StoreError> {
    if key.kind() == kind {
        Ok(())
    } else {
        Err(StoreError::KindMismatch {
            stage: key.relative_path(),
            expected: kind,
            actual: key.kind(),
        })
    }
}

/// Artifact store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("stage {0} already written for this run")]
    AlreadyWritten(String),

    #[error("stage {0} not found")]
    NotFound(String),

    #[error("run {0} already exists")]
    RunExists(RunId),

    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("not a run directory: {0}")]
    InvalidRunDir(PathBuf),

    #[error("stage {stage} is {actual:?}, expected {expected:?}")]
    KindMismatch {
        stage: String,
        expected: ArtifactKind,
        actual: ArtifactKind,
    },

    #[error("stage {stage} corrupted: expected hash {expected}, got {actual}")]
    Corrupted {
        stage: String,
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("encoding error: {0}")]
    Encoding(#[from] HashError),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        resources: Vec<String>,
    }

    fn key(seq: &str, slug: &str) -> StageKey {
        StageKey::new(seq, slug, ArtifactKind::Json).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_roundtrip_verifies_hash() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = store.create_run(RunId::new()).await.unwrap();

        let payload = Payload {
            resources: vec!["azurerm_virtual_network.vnet1".into()],
        };
        let reference = run.put_json(&key("01", "scan"), &payload).await.unwrap();
        assert_eq!(reference.stage, "01_scan.json");

        let envelope: Envelope<Payload> = run.get_json(&key("01", "scan")).await.unwrap();
        assert_eq!(envelope.payload, payload);
        assert_eq!(envelope.content_hash, reference.content_hash);
        assert_eq!(envelope.run_id, run.run_id());
    }

    #[tokio::test]
    async fn second_write_to_same_stage_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = store.create_run(RunId::new()).await.unwrap();
        let k = key("03", "mappings");

        run.put_json(&k, &Payload { resources: vec![] }).await.unwrap();
        let second = run
            .put_json(&k, &Payload { resources: vec!["x".into()] })
            .await;
        assert!(matches!(second, Err(StoreError::AlreadyWritten(_))));

        // original content survives
        let envelope: Envelope<Payload> = run.get_json(&k).await.unwrap();
        assert!(envelope.payload.resources.is_empty());
    }

    #[tokio::test]
    async fn tampered_payload_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = store.create_run(RunId::new()).await.unwrap();
        let k = key("02", "knowledge");
        run.put_json(&k, &Payload { resources: vec!["a".into()] })
            .await
            .unwrap();

        let path = run.path_of(&k);
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("\"a\"", "\"b\"")).unwrap();

        let result = run.get_json::<Payload>(&k).await;
        assert!(matches!(result, Err(StoreError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn list_is_in_stage_order_and_hides_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = store.create_run(RunId::new()).await.unwrap();

        let p = Payload { resources: vec![] };
        run.put_json(&key("03", "mappings"), &p).await.unwrap();
        run.put_json(&key("01", "scan"), &p).await.unwrap();
        run.put_json(&key("04_01", "retry_mappings"), &p).await.unwrap();
        let migrated = StageKey::new("08", "migrated", ArtifactKind::Directory).unwrap();
        run.claim_dir(&migrated).await.unwrap();

        let names = run.list().await.unwrap();
        assert_eq!(
            names,
            vec![
                "01_scan.json",
                "03_mappings.json",
                "04_01_retry_mappings.json",
                "08_migrated"
            ]
        );
        assert_eq!(run.last_persisted().await.unwrap().as_deref(), Some("08_migrated"));
    }

    #[tokio::test]
    async fn directory_stage_can_be_claimed_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = store.create_run(RunId::new()).await.unwrap();
        let plans = StageKey::new("06", "plans", ArtifactKind::Directory).unwrap();

        let dir = run.claim_dir(&plans).await.unwrap();
        assert!(dir.is_dir());
        assert!(matches!(
            run.claim_dir(&plans).await,
            Err(StoreError::AlreadyWritten(_))
        ));

        let item = plans.child("001", "azurerm_subnet.s", ArtifactKind::Json).unwrap();
        run.put_json(&item, &Payload { resources: vec![] }).await.unwrap();
        assert!(run.exists(&item).await);
    }

    #[tokio::test]
    async fn kind_mismatch_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let run = store.create_run(RunId::new()).await.unwrap();
        let report = StageKey::new("11", "report", ArtifactKind::Markdown).unwrap();
        let result = run.put_json(&report, &Payload { resources: vec![] }).await;
        assert!(matches!(result, Err(StoreError::KindMismatch { .. })));
        run.put_markdown(&report, "# Conversion Report\n").await.unwrap();
    }

    #[tokio::test]
    async fn runs_are_isolated_and_reopenable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let id = RunId::new();
        store.create_run(id).await.unwrap();
        assert!(matches!(store.create_run(id).await, Err(StoreError::RunExists(_))));

        let reopened = store.open_run(id).await.unwrap();
        assert_eq!(reopened.run_id(), id);
        assert!(matches!(
            store.open_run(RunId::new()).await,
            Err(StoreError::RunNotFound(_))
        ));

        let from_dir = RunArtifacts::from_dir(reopened.dir()).unwrap();
        assert_eq!(from_dir.run_id(), id);
    }
}
