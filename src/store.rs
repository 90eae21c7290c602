//! Artifact registration.
//!
//! The CI job archives whatever this tool registers. Registrations are kept in
//! `artifacts.json` under the output directory so the job's archive step (or a
//! person reading the workspace) can see exactly what was kept and why.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::error::PipelineError;

pub const MANIFEST_FILE: &str = "artifacts.json";

/// Persists files produced by a build.
pub trait ArtifactStore {
    /// Register `path` for archiving. With `only_if_successful` the file is
    /// kept only when the overall CI run succeeds.
    fn register(&mut self, path: &Path, only_if_successful: bool) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file_name: String,
    pub path: String,
    pub only_if_successful: bool,
    pub registered_at: DateTime<Utc>,
}

/// [`ArtifactStore`] that records registrations in a JSON manifest.
pub struct ManifestStore {
    manifest_path: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl ManifestStore {
    /// Open the manifest in `output_dir`, creating the directory if needed.
    /// Entries from an earlier invocation in the same workspace are kept.
    pub fn open(output_dir: &Path) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;
        let manifest_path = output_dir.join(MANIFEST_FILE);

        let entries = if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)
                .map_err(|e| PipelineError::io(&manifest_path, e))?;
            serde_json::from_str(&content).map_err(|e| {
                PipelineError::Store(format!("Failed to parse {:?}: {}", manifest_path, e))
            })?
        } else {
            Vec::new()
        };

        Ok(Self {
            manifest_path,
            entries,
        })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.entries.iter().any(|e| e.file_name == file_name)
    }

    /// Write the manifest atomically: temp file in the same directory, then rename.
    fn persist(&self) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| PipelineError::Store(format!("Failed to serialize manifest: {}", e)))?;

        let parent = self
            .manifest_path
            .parent()
            .ok_or_else(|| PipelineError::Store("Manifest path has no parent".to_string()))?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| PipelineError::io(parent, e))?;
        temp.write_all(json.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| PipelineError::io(temp.path(), e))?;
        temp.persist(&self.manifest_path)
            .map_err(|e| PipelineError::io(&self.manifest_path, e.error))?;
        Ok(())
    }
}

impl ArtifactStore for ManifestStore {
    fn register(&mut self, path: &Path, only_if_successful: bool) -> Result<(), PipelineError> {
        if !path.is_file() {
            return Err(PipelineError::MissingOutput(path.to_path_buf()));
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| PipelineError::Store(format!("No file name in {:?}", path)))?;

        let entry = ManifestEntry {
            file_name: file_name.clone(),
            path: path.to_string_lossy().to_string(),
            only_if_successful,
            registered_at: Utc::now(),
        };

        // Re-registering the same file replaces the earlier entry.
        match self.entries.iter_mut().find(|e| e.path == entry.path) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        self.persist()?;

        info!("Registered artifact {}", file_name);
        Ok(())
    }
}
