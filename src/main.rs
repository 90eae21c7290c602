use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use previewdiff::export::{CommandExporter, Exporter, PrebuiltOutputs};
use previewdiff::imaging::{load_image, save_png};
use previewdiff::locator::ReferenceLocator;
use previewdiff::pipeline::evaluate;
use previewdiff::store::ManifestStore;
use previewdiff::{default_config, Config, Pipeline, PipelineSettings, ProjectOutcome};

#[derive(Parser)]
#[command(
    name = "previewdiff",
    version,
    about = "Visual regression check for CAD toolpath previews"
)]
struct Cli {
    /// Config file merged over the built-in defaults
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export, archive and compare every configured project against the last stable build
    Run(RunArgs),
    /// Compare two local renders with the configured masking and tolerances
    Compare(CompareArgs),
}

#[derive(Parser)]
struct RunArgs {
    /// Number of the build being produced
    #[arg(long, env = "BUILD_NUMBER")]
    build_number: u64,

    /// CI server base URL (overrides ci.base_url)
    #[arg(long, value_name = "URL")]
    ci_url: Option<String>,

    /// CI job name, `folder/job` for folder jobs (overrides ci.job_name)
    #[arg(long)]
    job: Option<String>,

    /// Only process these projects (repeatable or comma-separated)
    #[arg(long, value_delimiter = ',')]
    project: Vec<String>,

    /// Don't run the export command; use outputs already in the work directory
    #[arg(long)]
    skip_export: bool,

    /// Print the per-project reports as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Parser)]
struct CompareArgs {
    /// Render from the known-good build
    #[arg(value_name = "REFERENCE")]
    reference: PathBuf,

    /// Render to check
    #[arg(value_name = "CANDIDATE")]
    candidate: PathBuf,

    /// Where to write the diff image when the change is significant
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Exit with status 2 on a significant change
    #[arg(long)]
    fail_on_change: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    previewdiff::init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run(cli.config.as_deref(), args).await,
        Commands::Compare(args) => compare(cli.config.as_deref(), args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            Config::load(path).with_context(|| format!("Failed to load config {:?}", path))
        }
        None => default_config().context("Built-in config is invalid"),
    }
}

async fn run(config_path: Option<&Path>, args: RunArgs) -> Result<ExitCode> {
    let mut config = load_config(config_path)?;
    if let Some(url) = args.ci_url {
        config.ci.base_url = url;
    }
    if let Some(job) = args.job {
        config.ci.job_name = job;
    }

    for name in &args.project {
        if !config.projects.iter().any(|p| &p.name == name) {
            bail!("Unknown project '{}'", name);
        }
    }
    let projects = config.selected_projects(&args.project);
    if projects.is_empty() {
        bail!("No projects configured; add [[projects]] entries to the config");
    }

    let settings = PipelineSettings::from_config(&config)?;
    let locator = ReferenceLocator::new(&config.ci).context("Invalid [ci] settings")?;
    let store = ManifestStore::open(&settings.output_dir)
        .context("Failed to open the artifact manifest")?;
    let exporter: Box<dyn Exporter> = match (&config.export.program, args.skip_export) {
        (Some(program), false) => Box::new(CommandExporter::new(
            program.clone(),
            config.export.args.clone(),
            config.export.work_dir.clone(),
        )),
        _ => Box::new(PrebuiltOutputs),
    };

    let mut pipeline = Pipeline::new(locator, store, exporter, settings, args.build_number);
    let reports = pipeline
        .run(&projects)
        .await
        .with_context(|| format!("Build {} failed", args.build_number))?;

    let changed = reports.iter().filter(|r| r.outcome.is_significant()).count();
    let skipped = reports
        .iter()
        .filter(|r| matches!(r.outcome, ProjectOutcome::NoReference { .. }))
        .count();
    info!(
        "Build {}: {} render(s), {} changed, {} without reference",
        args.build_number,
        reports.len(),
        changed,
        skipped
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn compare(config_path: Option<&Path>, args: CompareArgs) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let settings = PipelineSettings::from_config(&config)?;

    let reference = load_image(&args.reference)?;
    let candidate = load_image(&args.candidate)?;
    let (result, decision) = evaluate(
        &reference,
        &candidate,
        &settings.masking,
        &settings.diff,
        &settings.thresholds,
    );

    println!(
        "added_fraction={:.6} removed_fraction={:.6} decision={:?}",
        result.added_fraction, result.removed_fraction, decision
    );

    if !decision.is_significant() {
        return Ok(ExitCode::SUCCESS);
    }
    if let Some(output) = &args.output {
        save_png(&result.image, output)?;
        info!("Diff written to {:?}", output);
    }
    Ok(if args.fail_on_change {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}
