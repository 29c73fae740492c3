//! Provisioning the conda environment the pipeline runs in.
use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::EnvironmentConfig;
use crate::error::RunError;
use crate::input::read_yaml;
use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_string_enum::DeserializeLabeledStringEnum;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use unicase::UniCase;

/// The program used to manage environments
pub const CONDA: &str = "conda";

/// The environment name used when no other is given
pub const DEFAULT_ENV_NAME: &str = "OG-MOMF-env";

/// When an existing environment is brought up to date
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Use the environment as it is
    #[string = "never"]
    Never,
    /// Install any required packages which can't be imported
    #[default]
    #[string = "packages"]
    Packages,
    /// Update from the environment file whenever the file changes
    #[string = "hash"]
    Hash,
}

/// The parts of a conda environment file which are read
#[derive(Debug, Default, Deserialize)]
struct EnvironmentFile {
    name: Option<String>,
}

/// The output of `conda env list --json`
#[derive(Debug, Deserialize)]
struct EnvList {
    envs: Vec<PathBuf>,
}

/// Check that an external tool is installed
pub fn check_tool_available(runner: &dyn CommandRunner, tool: &str) -> Result<PathBuf> {
    let path = runner.find_program(tool).ok_or_else(|| RunError::MissingTool {
        tool: tool.to_string(),
    })?;
    debug!("Found {tool} at {}", path.display());

    Ok(path)
}

/// Work out which environment to use.
///
/// In order of preference: the name given on the command line, the name in the configuration
/// file, the `name` in the environment file and finally [`DEFAULT_ENV_NAME`].
pub fn resolve_env_name(
    cli_name: Option<&str>,
    config: &EnvironmentConfig,
    env_file: &Path,
) -> Result<String> {
    if let Some(name) = cli_name.or(config.name.as_deref()) {
        return Ok(name.to_string());
    }

    if env_file.is_file() {
        let file: EnvironmentFile = read_yaml(env_file)?;
        if let Some(name) = file.name.filter(|name| !name.trim().is_empty()) {
            return Ok(name);
        }
    }

    Ok(DEFAULT_ENV_NAME.to_string())
}

/// A provisioned environment in which commands can be run
pub struct Environment<'a> {
    runner: &'a dyn CommandRunner,
    name: String,
}

impl fmt::Debug for Environment<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<'a> Environment<'a> {
    /// Refer to an environment which is assumed to exist
    pub fn new(runner: &'a dyn CommandRunner, name: String) -> Self {
        Self { runner, name }
    }

    /// The name of the environment
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The runner used for commands in this environment
    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    /// A command which runs `program` inside the environment
    pub fn command(&self, program: &str) -> CommandSpec {
        CommandSpec::new(CONDA)
            .args(["run", "-n", &self.name, "--no-capture-output", program])
            .env("PYTHONHASHSEED", "0")
    }

    /// Run a command and return its output
    pub fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.runner.run(spec)
    }

    /// Whether a Python module can be imported in the environment
    fn has_module(&self, module: &str) -> Result<bool> {
        let script = format!(
            "import importlib.util,sys; sys.exit(0 if importlib.util.find_spec('{module}') else 1)"
        );
        let output = self.run(&self.command("python").arg("-c").arg(script))?;
        Ok(output.success())
    }

    fn error(&self, reason: String) -> RunError {
        RunError::Environment {
            env_name: self.name.clone(),
            reason,
        }
    }

    /// Run a conda command which changes the environment
    fn run_provisioning(&self, spec: &CommandSpec) -> Result<()> {
        let output = self.run(spec)?;
        if !output.success() {
            Err(self.error(failure_reason(spec, &output)))?;
        }

        Ok(())
    }
}

/// Describe why a provisioning command failed
fn failure_reason(spec: &CommandSpec, output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("`{spec}` exited with {:?}", output.code)
    } else {
        format!("`{spec}` failed: {stderr}")
    }
}

/// Whether an environment with the given name exists
pub fn env_exists(runner: &dyn CommandRunner, name: &str) -> Result<bool> {
    let wanted = UniCase::new(name);

    let json = runner.run(&CommandSpec::new(CONDA).args(["env", "list", "--json"]))?;
    if json.success() {
        match serde_json::from_str::<EnvList>(&json.stdout) {
            Ok(list) => {
                return Ok(list.envs.iter().any(|path| {
                    path.file_name()
                        .is_some_and(|file| UniCase::new(file.to_string_lossy().as_ref()) == wanted)
                }));
            }
            Err(err) => debug!("Could not parse conda environment list as JSON: {err}"),
        }
    }

    // Fall back to the plain listing: "name  [*]  path" per line
    let text = runner.run(&CommandSpec::new(CONDA).args(["env", "list"]))?;
    if !text.success() {
        Err(RunError::Environment {
            env_name: name.to_string(),
            reason: "could not list conda environments".into(),
        })?;
    }

    Ok(text
        .stdout
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .any(|first| UniCase::new(first) == wanted))
}

/// The SHA-256 digest of a file, as hex
fn file_digest(path: &Path) -> Result<String> {
    let contents = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{:x}", Sha256::digest(&contents)))
}

/// The file recording which version of the environment file an environment was built from
fn stamp_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(format!("env_{name}.sha256"))
}

/// Record the digest of the environment file
fn write_stamp(state_dir: &Path, name: &str, env_file: &Path) -> Result<()> {
    let digest = file_digest(env_file)?;
    fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create {}", state_dir.display()))?;
    let path = stamp_path(state_dir, name);
    fs::write(&path, digest).with_context(|| format!("Failed to write {}", path.display()))
}

/// Make sure the environment exists and is up to date.
///
/// # Arguments
///
/// * `runner` - Used to run conda
/// * `config` - The environment section of the run configuration
/// * `name` - Name of the environment
/// * `env_file` - The conda environment file
/// * `state_dir` - Where environment stamps are kept
pub fn provision<'a>(
    runner: &'a dyn CommandRunner,
    config: &EnvironmentConfig,
    name: String,
    env_file: &Path,
    state_dir: &Path,
) -> Result<Environment<'a>> {
    check_tool_available(runner, CONDA)?;
    let env = Environment::new(runner, name);

    if env_exists(runner, env.name())? {
        info!("Using existing environment '{}'", env.name());
        match config.update_policy {
            UpdatePolicy::Never => {}
            UpdatePolicy::Packages => install_missing_packages(&env, config)?,
            UpdatePolicy::Hash => update_if_changed(&env, env_file, state_dir)?,
        }
    } else {
        create(&env, env_file)?;
        if config.update_policy == UpdatePolicy::Hash {
            write_stamp(state_dir, env.name(), env_file)?;
        }
    }

    Ok(env)
}

/// Create the environment from the environment file
fn create(env: &Environment, env_file: &Path) -> Result<()> {
    if !env_file.is_file() {
        Err(env.error(format!(
            "it does not exist and the environment file {} was not found",
            env_file.display()
        )))?;
    }

    info!(
        "Creating environment '{}' from {}",
        env.name(),
        env_file.display()
    );
    let spec = CommandSpec::new(CONDA)
        .args(["env", "create", "-n", env.name(), "-f"])
        .path_arg(env_file)
        .arg("-y")
        .inherit_output();
    env.run_provisioning(&spec)
}

/// Update the environment if the environment file has changed since it was last applied
fn update_if_changed(env: &Environment, env_file: &Path, state_dir: &Path) -> Result<()> {
    if !env_file.is_file() {
        warn!(
            "Environment file {} not found; using '{}' as it is",
            env_file.display(),
            env.name()
        );
        return Ok(());
    }

    let digest = file_digest(env_file)?;
    let stamp = stamp_path(state_dir, env.name());
    if fs::read_to_string(&stamp).is_ok_and(|old| old.trim() == digest) {
        debug!("Environment file unchanged since last update");
        return Ok(());
    }

    info!(
        "Environment file has changed; updating '{}'",
        env.name()
    );
    let spec = CommandSpec::new(CONDA)
        .args(["env", "update", "-n", env.name(), "-f"])
        .path_arg(env_file)
        .arg("--prune")
        .inherit_output();
    env.run_provisioning(&spec)?;

    write_stamp(state_dir, env.name(), env_file)
}

/// Find the packages whose modules can't be imported
fn missing_packages<'c>(
    env: &Environment,
    packages: &'c IndexMap<String, String>,
) -> Result<Vec<&'c str>> {
    let mut missing = Vec::new();
    for (module, package) in packages {
        if !env.has_module(module)? {
            debug!("Module {module} is missing from '{}'", env.name());
            missing.push(package.as_str());
        }
    }

    Ok(missing)
}

/// Install required packages which are missing from the environment
fn install_missing_packages(env: &Environment, config: &EnvironmentConfig) -> Result<()> {
    let conda_missing = missing_packages(env, &config.conda_packages)?;
    if !conda_missing.is_empty() {
        info!("Installing {} with conda", conda_missing.join(", "));
        let spec = CommandSpec::new(CONDA)
            .args(["install", "-n", env.name(), "-c", "conda-forge", "-y"])
            .args(conda_missing)
            .inherit_output();
        env.run_provisioning(&spec)?;
    }

    let pip_missing = missing_packages(env, &config.pip_packages)?;
    if !pip_missing.is_empty() {
        ensure_pip(env)?;
        info!("Installing {} with pip", pip_missing.join(", "));
        let spec = env
            .command("python")
            .args(["-m", "pip", "install", "-U"])
            .args(pip_missing)
            .inherit_output();
        env.run_provisioning(&spec)?;
    }

    Ok(())
}

/// Install pip into the environment if it isn't there
fn ensure_pip(env: &Environment) -> Result<()> {
    let output = env.run(&env.command("python").args(["-m", "pip", "--version"]))?;
    if output.success() {
        return Ok(());
    }

    info!("Installing pip into '{}'", env.name());
    let spec = CommandSpec::new(CONDA).args(["install", "-n", env.name(), "pip", "-y"]);
    env.run_provisioning(&spec)
}
