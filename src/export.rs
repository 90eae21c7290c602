//! Boundary to the CAD export step.
//!
//! The export itself (opening the design, generating the toolpath, rendering
//! the preview) is done by an external program. This module runs it, checks
//! that it left `<project>.gcode` and `<project>.png` behind, and copies those
//! into the output directory under their build-numbered names.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, info};

use crate::artifact::ArtifactName;
use crate::error::PipelineError;

/// Suffix of the secondary engravings export.
pub const ENGRAVINGS_SUFFIX: &str = "engravings";

pub const GCODE_EXTENSION: &str = "gcode";
pub const SCREENSHOT_EXTENSION: &str = "png";

/// A design to export, as listed in the configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProjectSpec {
    pub name: String,
    /// Design file handed to the export command; defaults to the project name.
    #[serde(default)]
    pub input: Option<PathBuf>,
}

impl ProjectSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input: None,
        }
    }

    fn input_arg(&self) -> String {
        match &self.input {
            Some(path) => path.display().to_string(),
            None => self.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Export command; `None` means outputs are produced by an earlier CI step.
    pub program: Option<String>,
    pub args: Vec<String>,
    /// Where the export writes `<project>.gcode` / `<project>.png`.
    pub work_dir: PathBuf,
    /// Where build-numbered copies, diff images and the manifest go.
    pub output_dir: PathBuf,
    /// Probe for and process `<project>_engravings.*` outputs.
    pub engravings: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            work_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            engravings: true,
        }
    }
}

/// Produces the raw export outputs for a project.
pub trait Exporter {
    fn export(&self, project: &ProjectSpec) -> Result<(), PipelineError>;
}

/// Runs an external command once per project.
///
/// Arguments may contain `{project}`, `{input}` and `{work_dir}`.
pub struct CommandExporter {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl CommandExporter {
    pub fn new(program: impl Into<String>, args: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            work_dir: work_dir.into(),
        }
    }

    fn expand_args(&self, project: &ProjectSpec) -> Vec<String> {
        let work_dir = self.work_dir.display().to_string();
        let input = project.input_arg();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{project}", &project.name)
                    .replace("{input}", &input)
                    .replace("{work_dir}", &work_dir)
            })
            .collect()
    }
}

impl Exporter for CommandExporter {
    fn export(&self, project: &ProjectSpec) -> Result<(), PipelineError> {
        let args = self.expand_args(project);
        info!("Exporting {} with {} {:?}", project.name, self.program, args);

        let status = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.work_dir)
            .status()
            .map_err(|e| PipelineError::Export {
                project: project.name.clone(),
                reason: format!("failed to launch '{}': {}", self.program, e),
            })?;

        if !status.success() {
            return Err(PipelineError::Export {
                project: project.name.clone(),
                reason: format!("'{}' exited with {}", self.program, status),
            });
        }
        Ok(())
    }
}

/// Exporter for runs where the outputs already exist (`--skip-export` or no
/// export program configured).
pub struct PrebuiltOutputs;

impl Exporter for PrebuiltOutputs {
    fn export(&self, project: &ProjectSpec) -> Result<(), PipelineError> {
        debug!("Using existing export outputs for {}", project.name);
        Ok(())
    }
}

/// The (gcode, screenshot) pair of one export variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutputs {
    /// Artifact project name: the project itself or `<project>_engravings`.
    pub variant: String,
    pub gcode: PathBuf,
    pub screenshot: PathBuf,
}

impl ExportOutputs {
    fn expected(work_dir: &Path, variant: String) -> Self {
        Self {
            gcode: work_dir.join(format!("{}.{}", variant, GCODE_EXTENSION)),
            screenshot: work_dir.join(format!("{}.{}", variant, SCREENSHOT_EXTENSION)),
            variant,
        }
    }

    fn require(self) -> Result<Self, PipelineError> {
        for path in [&self.gcode, &self.screenshot] {
            if !path.is_file() {
                return Err(PipelineError::MissingOutput(path.clone()));
            }
        }
        Ok(self)
    }
}

/// Collect the outputs the export left in `work_dir`.
///
/// The primary pair must exist. The engravings pair is optional and detected
/// by its gcode file; once that exists its screenshot is required too.
pub fn collect_outputs(
    work_dir: &Path,
    project: &str,
    engravings: bool,
) -> Result<Vec<ExportOutputs>, PipelineError> {
    let mut outputs = vec![ExportOutputs::expected(work_dir, project.to_string()).require()?];

    if engravings {
        let variant = format!("{}_{}", project, ENGRAVINGS_SUFFIX);
        let candidate = ExportOutputs::expected(work_dir, variant);
        if candidate.gcode.is_file() {
            info!("Found engravings export for {}", project);
            outputs.push(candidate.require()?);
        }
    }

    Ok(outputs)
}

/// Copy `source` into `output_dir` under the build-numbered `name`.
pub fn archive_copy(
    source: &Path,
    output_dir: &Path,
    name: &ArtifactName,
) -> Result<PathBuf, PipelineError> {
    std::fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;
    let target = output_dir.join(name.file_name());
    std::fs::copy(source, &target).map_err(|e| PipelineError::io(source, e))?;
    debug!("Copied {:?} -> {:?}", source, target);
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_collect_primary_outputs() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "part.gcode");
        touch(dir.path(), "part.png");

        let outputs = collect_outputs(dir.path(), "part", true).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].variant, "part");
        assert_eq!(outputs[0].screenshot, dir.path().join("part.png"));
    }

    #[test]
    fn test_collect_missing_screenshot() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "part.gcode");

        let result = collect_outputs(dir.path(), "part", true);
        match result {
            Err(PipelineError::MissingOutput(path)) => assert!(path.ends_with("part.png")),
            other => panic!("expected MissingOutput, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_engravings_variant() {
        let dir = TempDir::new().unwrap();
        for name in ["lid.gcode", "lid.png", "lid_engravings.gcode", "lid_engravings.png"] {
            touch(dir.path(), name);
        }

        let outputs = collect_outputs(dir.path(), "lid", true).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[1].variant, "lid_engravings");

        let without = collect_outputs(dir.path(), "lid", false).unwrap();
        assert_eq!(without.len(), 1);
    }

    #[test]
    fn test_engravings_gcode_without_screenshot_fails() {
        let dir = TempDir::new().unwrap();
        for name in ["lid.gcode", "lid.png", "lid_engravings.gcode"] {
            touch(dir.path(), name);
        }
        assert!(matches!(
            collect_outputs(dir.path(), "lid", true),
            Err(PipelineError::MissingOutput(_))
        ));
    }

    #[test]
    fn test_archive_copy_uses_build_number() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "part.gcode");
        let out = dir.path().join("out");

        let target = archive_copy(
            &dir.path().join("part.gcode"),
            &out,
            &ArtifactName::new("part", 12, "gcode"),
        )
        .unwrap();

        assert_eq!(target, out.join("part_12.gcode"));
        assert!(target.is_file());
    }

    #[test]
    fn test_expand_args() {
        let exporter = CommandExporter::new(
            "freecadcmd",
            vec!["{input}".to_string(), "--out={work_dir}/{project}".to_string()],
            "/tmp/work",
        );
        let mut project = ProjectSpec::new("part");
        assert_eq!(
            exporter.expand_args(&project),
            vec!["part".to_string(), "--out=/tmp/work/part".to_string()]
        );

        project.input = Some(PathBuf::from("designs/part.FCStd"));
        assert_eq!(exporter.expand_args(&project)[0], "designs/part.FCStd");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exporter_reports_failure() {
        let dir = TempDir::new().unwrap();
        let exporter = CommandExporter::new("false", Vec::new(), dir.path());
        assert!(matches!(
            exporter.export(&ProjectSpec::new("part")),
            Err(PipelineError::Export { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_exporter_success() {
        let dir = TempDir::new().unwrap();
        let exporter = CommandExporter::new("true", Vec::new(), dir.path());
        assert!(exporter.export(&ProjectSpec::new("part")).is_ok());
    }

    #[test]
    fn test_command_exporter_missing_program() {
        let dir = TempDir::new().unwrap();
        let exporter = CommandExporter::new("definitely-not-a-cad-exporter", Vec::new(), dir.path());
        assert!(matches!(
            exporter.export(&ProjectSpec::new("part")),
            Err(PipelineError::Export { .. })
        ));
    }
}
