//! The command line interface.
use crate::command::SystemRunner;
use crate::config::RunConfig;
use crate::lock::RunLock;
use crate::log;
use crate::output::metadata::write_metadata;
use crate::run::{RunOptions, run_pipeline_locked, validate_project};
use crate::settings::Settings;
use ::log::info;
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

pub mod example;
use example::ExampleSubcommands;
pub mod settings;
use settings::SettingsSubcommands;
pub mod techs;
use techs::TechsSubcommands;

/// The command line interface for momf.
///
/// Without a command, the full run is performed using the configuration file in the current
/// folder.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// The available commands.
    #[command(subcommand)]
    command: Option<Commands>,
    /// Flag to provide the CLI docs as markdown
    #[arg(long, hide = true)]
    markdown_help: bool,
}

/// Parse a date given as YYYY-MM-DD
fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| format!("expected a date as YYYY-MM-DD: {err}"))
}

/// Options for the run and validate commands
#[derive(Args, Default)]
pub struct RunOpts {
    /// Path to the run configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Name of the conda environment to use
    #[arg(long)]
    pub env_name: Option<String>,
    /// Path to the conda environment file
    #[arg(long)]
    pub env_file: Option<PathBuf>,
    /// Path to the DVC pipeline file
    #[arg(long)]
    pub pipeline_file: Option<PathBuf>,
    /// Date used to name the dated output files (defaults to today)
    #[arg(long, value_parser = parse_date)]
    pub date: Option<NaiveDate>,
    /// Folder for the output files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,
}

impl RunOpts {
    /// The configuration file to use
    fn config_path(&self, settings: &Settings) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(&settings.config_file_name))
    }

    /// The run options, with the date defaulting to today
    fn run_options(&self) -> RunOptions {
        RunOptions {
            env_name: self.env_name.clone(),
            env_file: self.env_file.clone(),
            pipeline_file: self.pipeline_file.clone(),
            date: self.date.unwrap_or_else(|| Local::now().date_naive()),
            output_dir: self.output_dir.clone(),
        }
    }
}

/// The available commands.
#[derive(Subcommand)]
enum Commands {
    /// Provision the environment, run the pipeline and solve every scenario.
    Run {
        /// Run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Check the configuration and pipeline without running anything.
    Validate {
        /// Run options
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Edit Secondary-Techs parameters.
    Techs {
        /// The available subcommands for editing parameters.
        #[command(subcommand)]
        subcommand: TechsSubcommands,
    },
    /// Manage program settings.
    Settings {
        /// The subcommands for managing settings.
        #[command(subcommand)]
        subcommand: SettingsSubcommands,
    },
    /// Manage example projects.
    Example {
        /// The available subcommands for managing example projects.
        #[command(subcommand)]
        subcommand: ExampleSubcommands,
    },
}

impl Commands {
    /// Execute the supplied CLI command
    fn execute(self) -> Result<()> {
        match self {
            Self::Run { opts } => handle_run_command(&opts, None),
            Self::Validate { opts } => handle_validate_command(&opts, None),
            Self::Techs { subcommand } => subcommand.execute(),
            Self::Settings { subcommand } => subcommand.execute(),
            Self::Example { subcommand } => subcommand.execute(),
        }
    }
}

/// Parse CLI arguments and start momf
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Invoked as: `$ momf --markdown-help`
    if cli.markdown_help {
        clap_markdown::print_help_markdown::<Cli>();
        return Ok(());
    }

    match cli.command {
        Some(command) => command.execute(),
        None => handle_run_command(&RunOpts::default(), None),
    }
}

/// Handle the `run` command.
pub fn handle_run_command(opts: &RunOpts, settings: Option<Settings>) -> Result<()> {
    // Load program settings, if not provided
    let settings = if let Some(settings) = settings {
        settings
    } else {
        Settings::load().context("Failed to load settings.")?
    };

    let config_path = opts.config_path(&settings);
    let config = RunConfig::from_path(&config_path).context("Failed to load configuration.")?;

    // The log files and metadata belong to whichever run holds the lock
    let lock = RunLock::acquire(&config.state_dir())?;

    // Initialise program logger, keeping log files with the project's state
    let log_dir = config.log_dir();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log folder: {}", log_dir.display()))?;
    log::init(Some(&settings.log_level), Some(&log_dir))
        .context("Failed to initialise logging.")?;

    let run_opts = opts.run_options();
    write_metadata(&log_dir, &config_path, run_opts.date, config.solver)
        .context("Failed to save run metadata.")?;
    info!("Loaded configuration from {}", config_path.display());

    let runner = SystemRunner::with_interrupt_handler()?;
    let summary = run_pipeline_locked(&lock, &config, &run_opts, &runner)?;
    info!(
        "Solved {} scenarios: {}",
        summary.scenarios.len(),
        summary.scenarios.join(", ")
    );
    println!("Pipeline completed in {}!", summary.elapsed);

    Ok(())
}

/// Handle the `validate` command.
pub fn handle_validate_command(opts: &RunOpts, settings: Option<Settings>) -> Result<()> {
    // Load program settings, if not provided
    let settings = if let Some(settings) = settings {
        settings
    } else {
        Settings::load().context("Failed to load settings.")?
    };

    // Initialise program logger (we won't save log files when running the validate command)
    log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

    let config_path = opts.config_path(&settings);
    let config = RunConfig::from_path(&config_path).context("Failed to validate configuration.")?;
    let report = validate_project(&config, &opts.run_options())
        .context("Failed to validate project.")?;

    info!("Environment: {}", report.env_name);
    info!("Stage order: {}", report.stage_order.join(" -> "));
    info!("Project validation successful!");

    Ok(())
}
