use serde::Serialize;

use super::name::ArtifactName;

/// Outcome the CI server reported for a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildStatus {
    Success,
    Unstable,
    Failure,
    Aborted,
    /// Missing, still running, or a value we don't recognise.
    Unknown,
}

impl BuildStatus {
    pub fn from_result(result: Option<&str>) -> Self {
        match result.map(|r| r.trim().to_ascii_uppercase()).as_deref() {
            Some("SUCCESS") => BuildStatus::Success,
            Some("UNSTABLE") => BuildStatus::Unstable,
            Some("FAILURE") => BuildStatus::Failure,
            Some("ABORTED") => BuildStatus::Aborted,
            _ => BuildStatus::Unknown,
        }
    }
}

/// One file archived by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredArtifact {
    pub file_name: String,
    /// Path below the build's artifact root, used to build the fetch URL.
    pub relative_path: String,
}

/// Metadata for a finished build. Built once from the CI response and
/// only read afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildRecord {
    number: Option<u64>,
    status: BuildStatus,
    artifacts: Vec<StoredArtifact>,
}

impl BuildRecord {
    pub fn new(number: Option<u64>, status: BuildStatus, artifacts: Vec<StoredArtifact>) -> Self {
        Self {
            number,
            status,
            artifacts,
        }
    }

    pub fn number(&self) -> Option<u64> {
        self.number
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == BuildStatus::Success
    }

    pub fn artifacts(&self) -> &[StoredArtifact] {
        &self.artifacts
    }

    /// Artifacts that are `name` from some other build, in declaration order.
    /// Files whose names don't tokenize are never a match.
    pub fn matching(&self, name: &ArtifactName) -> Vec<&StoredArtifact> {
        self.artifacts
            .iter()
            .filter(|a| {
                ArtifactName::parse(&a.file_name)
                    .map(|parsed| parsed.same_artifact(name))
                    .unwrap_or(false)
            })
            .collect()
    }
}
