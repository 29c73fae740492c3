//! The CLI commands for editing Secondary-Techs parameters.
use crate::config::load_techs_config;
use crate::input::resolve_path;
use crate::log;
use crate::settings::Settings;
use crate::techs::apply::{EditStatus, apply_edits};
use crate::techs::template::generate_template;
use ::log::info;
use anyhow::{Context, Result, ensure};
use chrono::Local;
use clap::Subcommand;
use std::path::{Path, PathBuf};

/// Subcommands for editing Secondary-Techs parameters
#[derive(Subcommand)]
pub enum TechsSubcommands {
    /// Write an editable template listing the valid choices.
    Template {
        /// Path to the run configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Whether to overwrite an existing template
        #[arg(long)]
        force: bool,
    },
    /// Apply an edited template to the parameter files.
    Apply {
        /// Path to the run configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// The edited template (defaults to the configured editor file)
        #[arg(long)]
        editor: Option<PathBuf>,
    },
}

impl TechsSubcommands {
    /// Execute the supplied techs subcommand
    pub fn execute(self) -> Result<()> {
        let settings = Settings::load().context("Failed to load settings.")?;
        log::init(Some(&settings.log_level), None).context("Failed to initialise logging.")?;

        match self {
            Self::Template { config, force } => {
                handle_template_command(&config_path(config, &settings), force)
            }
            Self::Apply { config, editor } => {
                handle_apply_command(&config_path(config, &settings), editor.as_deref())
            }
        }
    }
}

/// The configuration file given on the command line, or the one named in the settings
fn config_path(config: Option<PathBuf>, settings: &Settings) -> PathBuf {
    config.unwrap_or_else(|| PathBuf::from(&settings.config_file_name))
}

/// Handle the `techs template` command
fn handle_template_command(config_path: &Path, force: bool) -> Result<()> {
    let (techs, project_dir) = load_techs_config(config_path)?;
    let base_dir = resolve_path(&project_dir, &techs.base_dir);
    let files = generate_template(&techs, &base_dir, force)?;

    println!("Template: {}", files.editor.display());
    println!("Valid choices: {}", files.choices.display());

    Ok(())
}

/// Handle the `techs apply` command
fn handle_apply_command(config_path: &Path, editor: Option<&Path>) -> Result<()> {
    let (techs, project_dir) = load_techs_config(config_path)?;
    let base_dir = resolve_path(&project_dir, &techs.base_dir);
    let editor = editor.map_or_else(|| base_dir.join(&techs.editor_file), Path::to_path_buf);
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let summary = apply_edits(&techs, &base_dir, &editor, &timestamp)?;
    info!(
        "{} applied, {} invalid, {} failed, {} replaced by OLADE data",
        summary.count(EditStatus::Applied),
        summary.count(EditStatus::Invalid),
        summary.count(EditStatus::Failed),
        summary.count(EditStatus::Skipped)
    );
    println!("Update log: {}", summary.log_path.display());

    ensure!(
        summary.is_success(),
        "{} of {} edits could not be applied. See {} for details",
        summary.count(EditStatus::Invalid) + summary.count(EditStatus::Failed),
        summary.entries.len(),
        summary.log_path.display()
    );

    Ok(())
}
