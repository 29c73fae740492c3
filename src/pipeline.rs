//! The DVC pipeline which prepares the model data for each scenario.
//!
//! Stages are read from `dvc.yaml` and run one at a time in dependency order: a stage which
//! depends on a path another stage produces always runs after it.
use crate::command::run_checked;
use crate::environment::Environment;
use crate::error::RunError;
use crate::input::{input_err_msg, read_yaml};
use anyhow::{Context, Result, anyhow, bail};
use chrono::{Local, NaiveDate};
use indexmap::IndexMap;
use log::{debug, info, warn};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Separates the pipeline file name from the timestamp in the name of its backup
const BACKUP_INFIX: &str = ".bak.";

/// The program which runs the pipeline
pub const DVC: &str = "dvc";

/// One or more shell commands
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StageCommand {
    One(String),
    Many(Vec<String>),
}

/// A dependency or output, optionally with DVC options (e.g. `cache: false`)
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PathEntry {
    Plain(String),
    WithOptions(IndexMap<String, serde_yaml::Value>),
}

impl PathEntry {
    fn into_paths(self) -> Vec<String> {
        match self {
            Self::Plain(path) => vec![path],
            Self::WithOptions(map) => map.into_keys().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StageDefinition {
    cmd: StageCommand,
    #[serde(default)]
    deps: Vec<PathEntry>,
    #[serde(default)]
    outs: Vec<PathEntry>,
}

#[derive(Debug, Deserialize)]
struct PipelineFile {
    stages: IndexMap<String, StageDefinition>,
}

/// A stage of the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// The stage's name in the pipeline file
    pub name: String,
    /// The commands the stage runs
    pub commands: Vec<String>,
    /// Paths the stage reads
    pub deps: Vec<String>,
    /// Paths the stage produces
    pub outs: Vec<String>,
}

/// A pipeline definition
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// The pipeline file
    pub path: PathBuf,
    /// The stages, in the order they are declared
    pub stages: Vec<Stage>,
}

/// Normalise a path from the pipeline file so that paths can be compared
fn normalise(path: &str) -> String {
    let mut path = path.trim().replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    path.trim_end_matches('/').to_string()
}

/// Whether the output `out` provides the dependency `dep`
fn provides(out: &str, dep: &str) -> bool {
    out == dep
        || dep
            .strip_prefix(out)
            .is_some_and(|rest| rest.starts_with('/'))
        || out
            .strip_prefix(dep)
            .is_some_and(|rest| rest.starts_with('/'))
}

impl Pipeline {
    /// Read a pipeline file
    pub fn from_path(path: &Path) -> Result<Self> {
        let file: PipelineFile = read_yaml(path)?;
        if file.stages.is_empty() {
            bail!("{} does not define any stages", path.display());
        }

        let stages = file
            .stages
            .into_iter()
            .map(|(name, def)| Stage {
                name,
                commands: match def.cmd {
                    StageCommand::One(cmd) => vec![cmd],
                    StageCommand::Many(cmds) => cmds,
                },
                deps: def
                    .deps
                    .into_iter()
                    .flat_map(PathEntry::into_paths)
                    .map(|p| normalise(&p))
                    .collect(),
                outs: def
                    .outs
                    .into_iter()
                    .flat_map(PathEntry::into_paths)
                    .map(|p| normalise(&p))
                    .collect(),
            })
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            stages,
        })
    }

    /// The stages in an order where every stage runs after the stages it depends on
    pub fn execution_order(&self) -> Result<Vec<&Stage>> {
        let mut graph = DiGraph::<usize, ()>::new();
        let nodes: Vec<NodeIndex> = (0..self.stages.len()).map(|i| graph.add_node(i)).collect();

        let mut producers: IndexMap<&str, usize> = IndexMap::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            for out in &stage.outs {
                if let Some(other) = producers.insert(out, idx) {
                    bail!(
                        "Output {out} is produced by both stage '{}' and stage '{}'",
                        self.stages[other].name,
                        stage.name
                    );
                }
            }
        }

        for (consumer, stage) in self.stages.iter().enumerate() {
            for dep in &stage.deps {
                for (out, &producer) in &producers {
                    if producer != consumer && provides(out, dep) {
                        graph.update_edge(nodes[producer], nodes[consumer], ());
                    }
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let stage = &self.stages[graph[cycle.node_id()]];
            anyhow!(
                "Cycle detected in {} involving stage '{}'",
                self.path.display(),
                stage.name
            )
        })?;

        Ok(order.into_iter().map(|node| &self.stages[graph[node]]).collect())
    }
}

/// The pipeline file with the run date substituted in.
///
/// The original contents are put back when [`PatchedPipelineFile::restore`] is called or the
/// value is dropped, whichever happens first.
#[derive(Debug)]
pub struct PatchedPipelineFile {
    path: PathBuf,
    backup: Option<PathBuf>,
    original: String,
}

impl PatchedPipelineFile {
    /// Replace every occurrence of `placeholder` in the file with `date`.
    ///
    /// A backup is written to `<file>.bak.<YYYYmmdd_HHMMSS>` first.
    pub fn apply(path: &Path, placeholder: &str, date: NaiveDate) -> Result<Self> {
        let original = fs::read_to_string(path).with_context(|| input_err_msg(path))?;
        let mut patched = Self {
            path: path.to_path_buf(),
            backup: None,
            original,
        };

        if !patched.original.contains(placeholder) {
            debug!(
                "{} does not contain '{placeholder}'; leaving it unchanged",
                path.display()
            );
            return Ok(patched);
        }

        let mut backup = path.as_os_str().to_owned();
        backup.push(format!("{BACKUP_INFIX}{}", Local::now().format("%Y%m%d_%H%M%S")));
        let backup = PathBuf::from(backup);
        fs::copy(path, &backup)
            .with_context(|| format!("Failed to back up {}", path.display()))?;
        patched.backup = Some(backup);

        let date = date.format("%Y-%m-%d").to_string();
        fs::write(path, patched.original.replace(placeholder, &date))
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Set the pipeline date to {date}");

        Ok(patched)
    }

    /// Whether the file was changed
    pub fn is_patched(&self) -> bool {
        self.backup.is_some()
    }

    /// Put the original contents back and delete the backup
    pub fn restore(&mut self) -> Result<()> {
        let Some(backup) = self.backup.take() else {
            return Ok(());
        };

        fs::write(&self.path, &self.original)
            .with_context(|| format!("Failed to restore {}", self.path.display()))?;
        fs::remove_file(&backup)
            .with_context(|| format!("Failed to remove backup {}", backup.display()))?;
        debug!("Restored {}", self.path.display());

        Ok(())
    }
}

impl Drop for PatchedPipelineFile {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            warn!("{err:#}");
        }
    }
}

/// The backups of a pipeline file, oldest first
fn pipeline_backups(path: &Path) -> Result<Vec<PathBuf>> {
    let Some(file_name) = path.file_name() else {
        return Ok(Vec::new());
    };
    let prefix = format!("{}{BACKUP_INFIX}", file_name.to_string_lossy());
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut backups = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            backups.push(entry.path());
        }
    }
    backups.sort();

    Ok(backups)
}

/// Put back a pipeline file left patched by a run which was killed before it could restore it.
///
/// The oldest backup holds the file as it was before any interrupted run, so it is restored and
/// every backup is deleted.
///
/// # Returns
///
/// The backup which was restored, if there was one.
pub fn restore_interrupted_patch(path: &Path) -> Result<Option<PathBuf>> {
    let backups = pipeline_backups(path)?;
    let Some(oldest) = backups.first().cloned() else {
        return Ok(None);
    };

    warn!(
        "{} was left patched by an interrupted run; restoring it from {}",
        path.display(),
        oldest.display()
    );
    fs::copy(&oldest, path).with_context(|| format!("Failed to restore {}", path.display()))?;
    for backup in &backups {
        fs::remove_file(backup)
            .with_context(|| format!("Failed to remove backup {}", backup.display()))?;
    }

    Ok(Some(oldest))
}

/// Make sure `project_dir` is a DVC repository
pub fn ensure_dvc_repo(env: &Environment, project_dir: &Path) -> Result<()> {
    if project_dir.join(".dvc").is_dir() {
        return Ok(());
    }

    info!("Initialising DVC in {}", project_dir.display());
    let spec = env
        .command(DVC)
        .arg("init")
        .arg("--no-scm")
        .current_dir(project_dir);
    run_checked(env.runner(), &spec)?;

    Ok(())
}

/// Fetch cached data if the repository has a remote
pub fn pull_if_remote(env: &Environment, project_dir: &Path) -> Result<()> {
    let list = env.command(DVC).args(["remote", "list"]).current_dir(project_dir);
    let remotes = env.run(&list)?;
    if !remotes.success() {
        debug!(
            "Could not list DVC remotes ({}); skipping pull",
            remotes.stderr.trim()
        );
        return Ok(());
    }
    if remotes.stdout.trim().is_empty() {
        debug!("No DVC remote configured; skipping pull");
        return Ok(());
    }

    info!("Pulling data from DVC remote");
    let pull = env.command(DVC).arg("pull").current_dir(project_dir).inherit_output();
    run_checked(env.runner(), &pull)?;

    Ok(())
}

/// The target naming a stage on the `dvc` command line
fn stage_target(pipeline: &Pipeline, project_dir: &Path, stage: &Stage) -> String {
    let file = pipeline
        .path
        .strip_prefix(project_dir)
        .unwrap_or(&pipeline.path);
    format!("{}:{}", file.display(), stage.name)
}

/// Run the given stages in order, stopping at the first which fails
pub fn reproduce(
    env: &Environment,
    pipeline: &Pipeline,
    order: &[&Stage],
    project_dir: &Path,
) -> Result<()> {
    for (idx, stage) in order.iter().enumerate() {
        info!(
            "Running stage {}/{}: {}",
            idx + 1,
            order.len(),
            stage.name
        );
        let spec = env
            .command(DVC)
            .args(["repro", "--single-item"])
            .arg(stage_target(pipeline, project_dir, stage))
            .current_dir(project_dir)
            .inherit_output();
        let output = env.run(&spec)?;
        if !output.success() {
            Err(RunError::StageFailed {
                stage: stage.name.clone(),
                code: output.code,
            })?;
        }
    }

    Ok(())
}
