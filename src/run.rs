//! The full run: environment, pipeline, solver and outputs.
use crate::command::CommandRunner;
use crate::config::RunConfig;
use crate::environment::{CONDA, check_tool_available, provision, resolve_env_name};
use crate::finance::annualise_capital;
use crate::lock::RunLock;
use crate::output::write_artifacts;
use crate::pipeline::{
    PatchedPipelineFile, Pipeline, ensure_dvc_repo, pull_if_remote, reproduce,
    restore_interrupted_patch,
};
use crate::scenario::{aggregate, discover_scenarios, process_scenario};
use crate::solver::check_solver_available;
use anyhow::{Context, Result, ensure};
use chrono::NaiveDate;
use derive_more::Display;
use log::{debug, info};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Options for a run which can be given on the command line
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Overrides the environment name
    pub env_name: Option<String>,
    /// Overrides the environment file
    pub env_file: Option<PathBuf>,
    /// Overrides the pipeline file
    pub pipeline_file: Option<PathBuf>,
    /// The date used for dated output files and substituted into the pipeline
    pub date: NaiveDate,
    /// Overrides the output folder
    pub output_dir: Option<PathBuf>,
}

impl RunOptions {
    /// Default options for the given date
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            env_name: None,
            env_file: None,
            pipeline_file: None,
            date,
            output_dir: None,
        }
    }
}

/// A duration split into whole hours, minutes and seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display("{hours}h {minutes}m {seconds}s")]
pub struct ElapsedTime {
    hours: u64,
    minutes: u64,
    seconds: u64,
}

impl From<Duration> for ElapsedTime {
    fn from(duration: Duration) -> Self {
        let total = duration.as_secs();
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
        }
    }
}

/// What a successful run did
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// The files written to the output folder
    pub artifacts: Vec<PathBuf>,
    /// The scenarios which were solved
    pub scenarios: Vec<String>,
    /// How long the run took
    pub elapsed: ElapsedTime,
}

/// The files a run reads, after applying command-line overrides
struct RunFiles {
    env_file: PathBuf,
    pipeline_file: PathBuf,
    output_dir: PathBuf,
}

impl RunFiles {
    fn new(config: &RunConfig, opts: &RunOptions) -> Self {
        let pick = |over: &Option<PathBuf>, default: &PathBuf| {
            over.clone().unwrap_or_else(|| config.resolve(default))
        };
        Self {
            env_file: pick(&opts.env_file, &config.environment.file),
            pipeline_file: pick(&opts.pipeline_file, &config.pipeline.file),
            output_dir: pick(&opts.output_dir, &config.output_dir),
        }
    }
}

/// Perform a full run, taking the project's run lock for its duration.
///
/// See [`run_pipeline_locked`].
pub fn run_pipeline(
    config: &RunConfig,
    opts: &RunOptions,
    runner: &dyn CommandRunner,
) -> Result<RunSummary> {
    let lock = RunLock::acquire(&config.state_dir())?;
    run_pipeline_locked(&lock, config, opts, runner)
}

/// Perform a full run while holding the project's run lock.
///
/// # Arguments
///
/// * `lock` - The run lock for the project
/// * `config` - The run configuration
/// * `opts` - Command-line overrides
/// * `runner` - Used to run every external program
///
/// # Returns
///
/// A summary of the run, or the first error encountered. The pipeline file is always restored.
pub fn run_pipeline_locked(
    lock: &RunLock,
    config: &RunConfig,
    opts: &RunOptions,
    runner: &dyn CommandRunner,
) -> Result<RunSummary> {
    let start = Instant::now();
    let files = RunFiles::new(config, opts);
    debug!("Holding run lock {}", lock.path().display());

    // Check everything which can be checked before anything is changed
    check_tool_available(runner, CONDA)?;
    check_solver_available(runner, config.solver)?;
    restore_interrupted_patch(&files.pipeline_file)?;
    let pipeline = Pipeline::from_path(&files.pipeline_file)?;
    let order = pipeline.execution_order()?;
    let env_name = resolve_env_name(opts.env_name.as_deref(), &config.environment, &files.env_file)?;
    info!(
        "Running {} stages with solver {} for {}",
        order.len(),
        config.solver,
        opts.date
    );

    let mut patched = PatchedPipelineFile::apply(
        &files.pipeline_file,
        &config.pipeline.date_placeholder,
        opts.date,
    )?;

    let env = provision(
        runner,
        &config.environment,
        env_name,
        &files.env_file,
        &config.state_dir(),
    )?;

    ensure_dvc_repo(&env, &config.project_dir)?;
    pull_if_remote(&env, &config.project_dir)?;
    reproduce(&env, &pipeline, &order, &config.project_dir)?;

    let executables_dir = config.resolve(&config.model.executables_dir);
    let runs = discover_scenarios(&executables_dir)?;
    ensure!(
        !runs.is_empty(),
        "The pipeline did not produce any scenarios in {}",
        executables_dir.display()
    );

    let mut results = Vec::with_capacity(runs.len());
    for run in runs {
        let tables = process_scenario(&env, config, &run)
            .with_context(|| format!("Failed to process scenario {}", run.name))?;
        results.push((run, tables));
    }

    let mut tables = aggregate(&results)?;
    if config.annualize_capital {
        annualise_capital(
            &mut tables.combined,
            config.annualization.discount_rate,
            config.annualization.asset_lifetime,
        )?;
    }

    let artifacts = write_artifacts(&files.output_dir, &config.output_prefix, opts.date, &tables)?;
    patched.restore()?;

    Ok(RunSummary {
        artifacts,
        scenarios: results.into_iter().map(|(run, _)| run.name).collect(),
        elapsed: start.elapsed().into(),
    })
}

/// What `validate` found
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// The environment which would be used
    pub env_name: String,
    /// The stages in the order they would run
    pub stage_order: Vec<String>,
}

/// Check the configuration, environment file and pipeline without running anything
pub fn validate_project(config: &RunConfig, opts: &RunOptions) -> Result<ValidationReport> {
    let files = RunFiles::new(config, opts);
    let env_name = resolve_env_name(opts.env_name.as_deref(), &config.environment, &files.env_file)?;
    let pipeline = Pipeline::from_path(&files.pipeline_file)?;
    let stage_order = pipeline
        .execution_order()?
        .into_iter()
        .map(|stage| stage.name.clone())
        .collect();

    Ok(ValidationReport {
        env_name,
        stage_order,
    })
}
