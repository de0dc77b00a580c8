//! Durable, atomic checkpoint persistence for resumable runs.
//!
//! A checkpoint records which stages completed and with what result
//! data. Writes go to a temporary file first and are renamed over the
//! previous checkpoint, so a crash mid-write never leaves a
//! half-written file visible to a later load. A corrupt checkpoint
//! degrades to "start over", never to a crash.

use crate::errors::OrchestratorError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// The resumable state of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCheckpoint {
    /// Stage ids that have finished successfully.
    #[serde(default)]
    pub completed_steps: BTreeSet<String>,
    /// Result payload recorded at each completion, keyed by stage id.
    #[serde(default)]
    pub step_data: HashMap<String, serde_json::Value>,
    /// When the checkpoint was last modified.
    pub last_updated: DateTime<Utc>,
}

impl Default for PipelineCheckpoint {
    fn default() -> Self {
        Self {
            completed_steps: BTreeSet::new(),
            step_data: HashMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl PipelineCheckpoint {
    /// Creates an empty checkpoint stamped now.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a stage complete, optionally attaching its result data.
    pub fn mark_complete(&mut self, step_id: impl Into<String>, data: Option<serde_json::Value>) {
        let step_id = step_id.into();
        if let Some(value) = data {
            self.step_data.insert(step_id.clone(), value);
        }
        self.completed_steps.insert(step_id);
        self.last_updated = Utc::now();
    }

    /// Returns true if the stage has been recorded as complete.
    #[must_use]
    pub fn is_step_complete(&self, step_id: &str) -> bool {
        self.completed_steps.contains(step_id)
    }

    /// Returns the result data recorded for a stage, if any.
    #[must_use]
    pub fn step_data(&self, step_id: &str) -> Option<&serde_json::Value> {
        self.step_data.get(step_id)
    }

    /// Returns true if no stages have completed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.completed_steps.is_empty()
    }

    /// Validates the checkpoint against the given clock-skew tolerance.
    ///
    /// A `last_updated` further in the future than the tolerance allows
    /// marks the checkpoint as corrupt.
    fn validate(&self, skew_tolerance: Duration) -> Result<(), String> {
        let tolerance = chrono::Duration::from_std(skew_tolerance)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        if self.last_updated > Utc::now() + tolerance {
            return Err(format!(
                "checkpoint timestamp {} is in the future",
                self.last_updated
            ));
        }
        Ok(())
    }
}

/// Persists one checkpoint artifact per pipeline working directory.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    resume_enabled: bool,
    skew_tolerance: Duration,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    /// Creates a store writing to the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            resume_enabled: true,
            skew_tolerance: Duration::from_secs(60),
            write_lock: Mutex::new(()),
        }
    }

    /// Enables or disables resumption. When disabled, `load` always
    /// returns an empty checkpoint.
    #[must_use]
    pub fn with_resume_enabled(mut self, enabled: bool) -> Self {
        self.resume_enabled = enabled;
        self
    }

    /// Sets the clock-skew tolerance used when validating timestamps.
    #[must_use]
    pub fn with_skew_tolerance(mut self, tolerance: Duration) -> Self {
        self.skew_tolerance = tolerance;
        self
    }

    /// Returns the checkpoint file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Saves a checkpoint atomically.
    ///
    /// An invalid checkpoint is logged and dropped without touching the
    /// store. The write is serialized under a lock and lands via a
    /// temp-file-then-rename, so readers never observe a partial file.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O or serialization failures; callers
    /// treat those as "proceed without the checkpoint".
    pub fn save(&self, checkpoint: &PipelineCheckpoint) -> Result<(), OrchestratorError> {
        if let Err(reason) = checkpoint.validate(self.skew_tolerance) {
            warn!(path = %self.path.display(), reason, "Refusing to save invalid checkpoint");
            return Ok(());
        }

        let _guard = self.write_lock.lock();

        let bytes = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| OrchestratorError::Serialization(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let temp = self.temp_path();
        std::fs::write(&temp, &bytes)?;
        std::fs::rename(&temp, &self.path)?;

        debug!(
            path = %self.path.display(),
            completed = checkpoint.completed_steps.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Loads the persisted checkpoint.
    ///
    /// Returns an empty checkpoint when resumption is disabled, no file
    /// exists, or the file fails to parse or validate. Corruption is
    /// logged as a warning, never raised.
    #[must_use]
    pub fn load(&self) -> PipelineCheckpoint {
        if !self.resume_enabled {
            return PipelineCheckpoint::new();
        }

        let _guard = self.write_lock.lock();

        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return PipelineCheckpoint::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read checkpoint, starting over");
                return PipelineCheckpoint::new();
            }
        };

        let checkpoint: PipelineCheckpoint = match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Corrupt checkpoint discarded");
                return PipelineCheckpoint::new();
            }
        };

        if let Err(reason) = checkpoint.validate(self.skew_tolerance) {
            warn!(path = %self.path.display(), reason, "Invalid checkpoint discarded");
            return PipelineCheckpoint::new();
        }

        debug!(
            path = %self.path.display(),
            completed = checkpoint.completed_steps.len(),
            "Checkpoint loaded"
        );
        checkpoint
    }

    /// Returns true if a checkpoint file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Deletes the checkpoint file and any leftover temp artifact.
    ///
    /// Used once a run fully succeeds so a later run does not resume
    /// stale progress.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn delete(&self) -> Result<(), OrchestratorError> {
        let _guard = self.write_lock.lock();

        for path in [&self.path, &self.temp_path()] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_in(dir: &tempfile::TempDir) -> CheckpointStore {
        CheckpointStore::new(dir.path().join("checkpoint.json"))
    }

    #[test]
    fn test_mark_and_query_completion() {
        let mut checkpoint = PipelineCheckpoint::new();
        assert!(checkpoint.is_empty());

        checkpoint.mark_complete("story_idea", Some(serde_json::json!({"idea": "robots"})));
        checkpoint.mark_complete("script", None);

        assert!(checkpoint.is_step_complete("story_idea"));
        assert!(checkpoint.is_step_complete("script"));
        assert!(!checkpoint.is_step_complete("render"));
        assert_eq!(
            checkpoint.step_data("story_idea"),
            Some(&serde_json::json!({"idea": "robots"}))
        );
        assert_eq!(checkpoint.step_data("script"), None);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut checkpoint = PipelineCheckpoint::new();
        checkpoint.mark_complete("a", Some(serde_json::json!(1)));
        store.save(&checkpoint).unwrap();

        assert!(store.exists());
        let loaded = store.load();
        assert!(loaded.is_step_complete("a"));
        assert_eq!(loaded.step_data("a"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_load_missing_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let loaded = store.load();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_with_resume_disabled_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut checkpoint = PipelineCheckpoint::new();
        checkpoint.mark_complete("a", None);
        store.save(&checkpoint).unwrap();

        let disabled = CheckpointStore::new(store.path()).with_resume_enabled(false);
        assert!(disabled.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        std::fs::write(store.path(), b"{ not json").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_future_dated_checkpoint_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut checkpoint = PipelineCheckpoint::new();
        checkpoint.mark_complete("a", None);
        checkpoint.last_updated = Utc::now() + chrono::Duration::hours(1);

        let bytes = serde_json::to_vec(&checkpoint).unwrap();
        std::fs::write(store.path(), bytes).unwrap();

        assert!(store.load().is_empty());
    }

    #[test]
    fn test_future_dated_within_tolerance_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).with_skew_tolerance(Duration::from_secs(120));

        let mut checkpoint = PipelineCheckpoint::new();
        checkpoint.mark_complete("a", None);
        checkpoint.last_updated = Utc::now() + chrono::Duration::seconds(30);

        let bytes = serde_json::to_vec(&checkpoint).unwrap();
        std::fs::write(store.path(), bytes).unwrap();

        assert!(store.load().is_step_complete("a"));
    }

    #[test]
    fn test_save_refuses_invalid_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut checkpoint = PipelineCheckpoint::new();
        checkpoint.mark_complete("a", None);
        checkpoint.last_updated = Utc::now() + chrono::Duration::hours(1);

        store.save(&checkpoint).unwrap();
        assert!(!store.exists());
    }

    #[test]
    fn test_crash_before_rename_leaves_previous_readable() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut checkpoint = PipelineCheckpoint::new();
        checkpoint.mark_complete("a", None);
        store.save(&checkpoint).unwrap();

        // Simulate a crash between the temp write and the rename: a
        // stray temp file with newer content that never landed.
        let temp = PathBuf::from(format!("{}.tmp", store.path().display()));
        std::fs::write(&temp, b"half-written garbage").unwrap();

        let loaded = store.load();
        assert!(loaded.is_step_complete("a"));
        assert_eq!(loaded.completed_steps.len(), 1);
    }

    #[test]
    fn test_missing_collections_deserialize_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let json = format!(r#"{{"last_updated": "{}"}}"#, Utc::now().to_rfc3339());
        std::fs::write(store.path(), json).unwrap();

        let loaded = store.load();
        assert!(loaded.completed_steps.is_empty());
        assert!(loaded.step_data.is_empty());
    }

    #[test]
    fn test_delete_removes_file_and_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.save(&PipelineCheckpoint::new()).unwrap();
        let temp = PathBuf::from(format!("{}.tmp", store.path().display()));
        std::fs::write(&temp, b"leftover").unwrap();

        store.delete().unwrap();
        assert!(!store.exists());
        assert!(!temp.exists());

        // Deleting again is a no-op.
        store.delete().unwrap();
    }
}
