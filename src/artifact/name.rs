use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Qualifier appended to the build number of diff images.
pub const DIFF_QUALIFIER: &str = "diff";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArtifactNameError {
    #[error("Artifact name '{0}' has no file extension")]
    MissingExtension(String),

    #[error("Artifact name '{0}' has no numeric build suffix")]
    MissingBuildNumber(String),

    #[error("Artifact name '{0}' has an empty project name")]
    EmptyProject(String),
}

/// A stored file name split into its parts:
/// `<project>_<build>[_<qualifier>].<extension>`.
///
/// The build number is the LAST `_`-delimited segment that is entirely
/// digits, so a project called `panel_2` built as #17 is `panel_2_17.png`
/// and parses back to (`panel_2`, 17). Anything after the build number
/// (e.g. `diff`) is kept as the qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    project: String,
    build: u64,
    qualifier: Option<String>,
    extension: String,
}

impl ArtifactName {
    pub fn new(project: impl Into<String>, build: u64, extension: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            build,
            qualifier: None,
            extension: extension.into(),
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Tokenize a file name. Leading directories are ignored.
    pub fn parse(file_name: &str) -> Result<Self, ArtifactNameError> {
        let base = file_name.rsplit('/').next().unwrap_or(file_name);

        let (stem, extension) = match base.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, ext),
            _ => return Err(ArtifactNameError::MissingExtension(file_name.to_string())),
        };

        let segments: Vec<&str> = stem.split('_').collect();
        let (index, build) = segments
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, seg)| parse_build_segment(seg).map(|b| (i, b)))
            .ok_or_else(|| ArtifactNameError::MissingBuildNumber(file_name.to_string()))?;

        let project = segments[..index].join("_");
        if project.is_empty() {
            return Err(ArtifactNameError::EmptyProject(file_name.to_string()));
        }

        let trailing = &segments[index + 1..];
        let qualifier = if trailing.is_empty() {
            None
        } else {
            Some(trailing.join("_"))
        };

        Ok(Self {
            project,
            build,
            qualifier,
            extension: extension.to_string(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn build(&self) -> u64 {
        self.build
    }

    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// True when both names identify the same artifact, whatever build produced them.
    pub fn same_artifact(&self, other: &ArtifactName) -> bool {
        self.project == other.project
            && self.qualifier == other.qualifier
            && self.extension.eq_ignore_ascii_case(&other.extension)
    }

    /// Same artifact, different build.
    pub fn with_build(&self, build: u64) -> Self {
        Self {
            build,
            ..self.clone()
        }
    }

    /// Name of the diff image archived next to this artifact:
    /// `<project>_<build>_diff.png`.
    pub fn diff_image(&self) -> Self {
        Self::new(self.project.clone(), self.build, "png").with_qualifier(DIFF_QUALIFIER)
    }

    pub fn file_name(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}_{}_{}.{}", self.project, self.build, q, self.extension),
            None => format!("{}_{}.{}", self.project, self.build, self.extension),
        }
    }
}

fn parse_build_segment(segment: &str) -> Option<u64> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

impl FromStr for ArtifactName {
    type Err = ArtifactNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let name = ArtifactName::parse("part_17.png").unwrap();
        assert_eq!(name.project(), "part");
        assert_eq!(name.build(), 17);
        assert_eq!(name.qualifier(), None);
        assert_eq!(name.extension(), "png");
    }

    #[test]
    fn test_parse_project_with_digits() {
        let name = ArtifactName::parse("front_panel_2_17.gcode").unwrap();
        assert_eq!(name.project(), "front_panel_2");
        assert_eq!(name.build(), 17);
    }

    #[test]
    fn test_parse_diff_qualifier() {
        let name = ArtifactName::parse("part_17_diff.png").unwrap();
        assert_eq!(name.project(), "part");
        assert_eq!(name.build(), 17);
        assert_eq!(name.qualifier(), Some("diff"));
    }

    #[test]
    fn test_parse_engravings_family() {
        let name = ArtifactName::parse("lid_engravings_5.png").unwrap();
        assert_eq!(name.project(), "lid_engravings");
        assert_eq!(name.build(), 5);
    }

    #[test]
    fn test_parse_strips_directories() {
        let name = ArtifactName::parse("out/renders/part_3.png").unwrap();
        assert_eq!(name.project(), "part");
        assert_eq!(name.build(), 3);
    }

    #[test]
    fn test_parse_rejects_missing_build() {
        assert_eq!(
            ArtifactName::parse("part.png"),
            Err(ArtifactNameError::MissingBuildNumber("part.png".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_missing_extension() {
        assert!(matches!(
            ArtifactName::parse("part_17"),
            Err(ArtifactNameError::MissingExtension(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_project() {
        assert!(matches!(
            ArtifactName::parse("17.png"),
            Err(ArtifactNameError::EmptyProject(_))
        ));
    }

    #[test]
    fn test_same_artifact_ignores_build() {
        let a = ArtifactName::parse("part_17.png").unwrap();
        let b = ArtifactName::parse("part_42.png").unwrap();
        assert!(a.same_artifact(&b));
        assert!(b.same_artifact(&a));
    }

    #[test]
    fn test_same_artifact_distinguishes_variants() {
        let shot = ArtifactName::parse("part_17.png").unwrap();
        let diff = ArtifactName::parse("part_16_diff.png").unwrap();
        let gcode = ArtifactName::parse("part_16.gcode").unwrap();
        let engraving = ArtifactName::parse("part_engravings_16.png").unwrap();
        assert!(!shot.same_artifact(&diff));
        assert!(!shot.same_artifact(&gcode));
        assert!(!shot.same_artifact(&engraving));
    }

    #[test]
    fn test_file_name_round_trips() {
        for raw in ["part_17.png", "panel_2_9_diff.png", "lid_engravings_5.gcode"] {
            assert_eq!(ArtifactName::parse(raw).unwrap().file_name(), raw);
        }
    }

    #[test]
    fn test_diff_image_name() {
        let name = ArtifactName::new("part", 17, "png");
        assert_eq!(name.diff_image().to_string(), "part_17_diff.png");
    }

    #[test]
    fn test_with_build() {
        let name = ArtifactName::new("part", 17, "png").with_build(16);
        assert_eq!(name.to_string(), "part_16.png");
    }
}
