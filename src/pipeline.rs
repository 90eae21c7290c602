//! The per-project regression run: export, archive, locate the previous
//! stable render, compare, and keep a diff image only when something changed.

use std::path::{Path, PathBuf};

use image::RgbaImage;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifact::ArtifactName;
use crate::config::{Config, ConfigError};
use crate::error::PipelineError;
use crate::export::{
    archive_copy, collect_outputs, ExportOutputs, Exporter, ProjectSpec, GCODE_EXTENSION,
    SCREENSHOT_EXTENSION,
};
use crate::imaging::{
    decide, decode_image, diff, load_image, normalize, save_png, Decision, DiffResult,
    DiffSettings, MaskingRules, Thresholds,
};
use crate::locator::{Located, NotFoundReason, ReferenceSource};
use crate::store::ArtifactStore;

/// Qualifier of the downloaded reference kept in the work directory.
pub const REFERENCE_QUALIFIER: &str = "reference";

/// Comparison and file-layout settings shared by every project of a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub masking: MaskingRules,
    pub diff: DiffSettings,
    pub thresholds: Thresholds,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub engravings: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            masking: config.masking.to_rules()?,
            diff: config.diff.clone(),
            thresholds: config.decision,
            work_dir: config.export.work_dir.clone(),
            output_dir: config.export.output_dir.clone(),
            engravings: config.export.engravings,
        })
    }
}

/// What happened to one export variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProjectOutcome {
    /// No usable reference; nothing was compared.
    NoReference { reason: String },
    Insignificant {
        added_fraction: f64,
        removed_fraction: f64,
    },
    /// The diff image was written and registered.
    Significant {
        diff_path: PathBuf,
        added_fraction: f64,
        removed_fraction: f64,
    },
}

impl ProjectOutcome {
    pub fn is_significant(&self) -> bool {
        matches!(self, ProjectOutcome::Significant { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectReport {
    /// Artifact project name (`<project>` or `<project>_engravings`).
    pub project: String,
    pub build: u64,
    pub gcode: PathBuf,
    pub screenshot: PathBuf,
    #[serde(flatten)]
    pub outcome: ProjectOutcome,
}

/// Normalize both renders with the same rules, diff them and decide.
pub fn evaluate(
    reference: &RgbaImage,
    candidate: &RgbaImage,
    masking: &MaskingRules,
    settings: &DiffSettings,
    thresholds: &Thresholds,
) -> (DiffResult, Decision) {
    let reference = normalize(reference, masking);
    let candidate = normalize(candidate, masking);
    let result = diff(&reference, &candidate, settings);
    let decision = decide(&result, thresholds);
    debug!(
        "Diff {}x{}: added {} px ({:.5}), removed {} px ({:.5}) -> {:?}",
        result.image.width(),
        result.image.height(),
        result.added_pixels,
        result.added_fraction,
        result.removed_pixels,
        result.removed_fraction,
        decision
    );
    (result, decision)
}

/// Runs projects one after another against a reference source and a store.
pub struct Pipeline<S, A> {
    source: S,
    store: A,
    exporter: Box<dyn Exporter>,
    settings: PipelineSettings,
    build: u64,
}

impl<S: ReferenceSource, A: ArtifactStore> Pipeline<S, A> {
    pub fn new(
        source: S,
        store: A,
        exporter: Box<dyn Exporter>,
        settings: PipelineSettings,
        build: u64,
    ) -> Self {
        Self {
            source,
            store,
            exporter,
            settings,
            build,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &A {
        &self.store
    }

    pub fn build(&self) -> u64 {
        self.build
    }

    /// Process `projects` in order. The first environment error stops the run;
    /// whatever was registered before it stays registered.
    pub async fn run(&mut self, projects: &[ProjectSpec]) -> Result<Vec<ProjectReport>, PipelineError> {
        let mut reports = Vec::new();
        for project in projects {
            info!("=== {} (build {}) ===", project.name, self.build);
            self.exporter.export(project)?;

            let outputs = collect_outputs(
                &self.settings.work_dir,
                &project.name,
                self.settings.engravings,
            )?;
            for output in outputs {
                reports.push(self.process_variant(output).await?);
            }
        }
        Ok(reports)
    }

    async fn process_variant(&mut self, output: ExportOutputs) -> Result<ProjectReport, PipelineError> {
        let gcode_name = ArtifactName::new(output.variant.as_str(), self.build, GCODE_EXTENSION);
        let screenshot_name =
            ArtifactName::new(output.variant.as_str(), self.build, SCREENSHOT_EXTENSION);

        let gcode = archive_copy(&output.gcode, &self.settings.output_dir, &gcode_name)?;
        self.store.register(&gcode, true)?;
        let screenshot =
            archive_copy(&output.screenshot, &self.settings.output_dir, &screenshot_name)?;
        self.store.register(&screenshot, true)?;

        let outcome = self.compare(&screenshot_name, &screenshot).await?;
        match &outcome {
            ProjectOutcome::NoReference { reason } => {
                info!("{}: no comparison ({})", output.variant, reason)
            }
            ProjectOutcome::Insignificant { .. } => {
                info!("{}: no meaningful change", output.variant)
            }
            ProjectOutcome::Significant { diff_path, .. } => {
                info!("{}: change detected, diff archived as {:?}", output.variant, diff_path)
            }
        }

        Ok(ProjectReport {
            project: output.variant,
            build: self.build,
            gcode,
            screenshot,
            outcome,
        })
    }

    /// Compare `candidate_path` with the last stable build's copy of `name`.
    ///
    /// The candidate is decoded first, so an unreadable render fails the
    /// project even when there is no history to compare against.
    pub async fn compare(
        &mut self,
        name: &ArtifactName,
        candidate_path: &Path,
    ) -> Result<ProjectOutcome, PipelineError> {
        let candidate = load_image(candidate_path)?;

        let url = match self.source.locate(name).await {
            Located::Found(url) => url,
            Located::NotFound(reason) => return Ok(no_reference(reason)),
        };
        let bytes = match self.source.fetch(&url).await {
            Ok(bytes) => bytes,
            Err(reason) => {
                warn!("Reference for {} unavailable: {}", name, reason);
                return Ok(no_reference(reason));
            }
        };

        let reference_path = self
            .settings
            .work_dir
            .join(name.clone().with_qualifier(REFERENCE_QUALIFIER).file_name());
        std::fs::write(&reference_path, &bytes).map_err(|e| PipelineError::io(&reference_path, e))?;

        let reference = match decode_image(&bytes) {
            Ok(img) => img,
            Err(e) => {
                warn!("Reference {} is not a usable image: {}", url, e);
                return Ok(no_reference(NotFoundReason::FetchFailed(e.to_string())));
            }
        };
        let (result, decision) = evaluate(
            &reference,
            &candidate,
            &self.settings.masking,
            &self.settings.diff,
            &self.settings.thresholds,
        );

        if !decision.is_significant() {
            return Ok(ProjectOutcome::Insignificant {
                added_fraction: result.added_fraction,
                removed_fraction: result.removed_fraction,
            });
        }

        let diff_path = self.settings.output_dir.join(name.diff_image().file_name());
        save_png(&result.image, &diff_path)?;
        self.store.register(&diff_path, true)?;

        Ok(ProjectOutcome::Significant {
            diff_path,
            added_fraction: result.added_fraction,
            removed_fraction: result.removed_fraction,
        })
    }
}

fn no_reference(reason: NotFoundReason) -> ProjectOutcome {
    ProjectOutcome::NoReference {
        reason: reason.to_string(),
    }
}
