//! Running external programs.
//!
//! Every external tool (conda, dvc, glpsol, the solvers, otoole) is run through the
//! [`CommandRunner`] trait, so that the orchestration logic doesn't depend on which programs are
//! installed on the machine.
use crate::error::RunError;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// What to do with the output of a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Capture stdout and stderr so they can be inspected
    Capture,
    /// Let the child write directly to the console
    Inherit,
}

/// A description of a command to run
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// The program to run
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Extra environment variables
    pub envs: Vec<(String, String)>,
    /// The working directory, if not the current one
    pub current_dir: Option<PathBuf>,
    /// What to do with the program's output
    pub output: OutputMode,
}

impl CommandSpec {
    /// Create a new command for the given program with no arguments
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            output: OutputMode::Capture,
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a path argument
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    /// Set an environment variable for the child
    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Set the working directory for the child
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Let the child write straight to the console
    pub fn inherit_output(mut self) -> Self {
        self.output = OutputMode::Inherit;
        self
    }

    /// Whether the arguments contain `needle` as a contiguous run
    pub fn has_args(&self, needle: &[&str]) -> bool {
        needle.is_empty()
            || self
                .args
                .windows(needle.len())
                .any(|window| window.iter().zip(needle).all(|(a, b)| a == b))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') || arg.is_empty() {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }

        Ok(())
    }
}

/// The result of running a command
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandOutput {
    /// The exit code (`None` if the process was killed by a signal)
    pub code: Option<i32>,
    /// Captured stdout (empty if output was inherited)
    pub stdout: String,
    /// Captured stderr (empty if output was inherited)
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout
    pub fn ok<S: Into<String>>(stdout: S) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr
    pub fn failed<S: Into<String>>(code: i32, stderr: S) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited successfully
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Something which can run external programs
pub trait CommandRunner {
    /// Run the command and wait for it to finish.
    ///
    /// An error is only returned if the process could not be started: a non-zero exit is reported
    /// through [`CommandOutput::code`].
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Look for a program on the search path
    fn find_program(&self, name: &str) -> Option<PathBuf>;
}

/// Runs commands as real child processes.
///
/// Once interrupted, no new command is started and the command in progress is reported as
/// [`RunError::Interrupted`] when it finishes, so that the run unwinds and cleans up after itself.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner {
    interrupted: Arc<AtomicBool>,
}

impl SystemRunner {
    /// A runner which is interrupted when the user presses Ctrl+C.
    ///
    /// The signal also reaches the child process, which normally stops straight away.
    pub fn with_interrupt_handler() -> Result<Self> {
        let runner = Self::default();
        let handle = runner.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupted; stopping after the current command");
            handle.interrupt();
        })
        .context("Failed to set Ctrl+C handler")?;

        Ok(runner)
    }

    /// Stop running commands
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Fail if the runner has been interrupted
    fn check_interrupted(&self) -> Result<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            Err(RunError::Interrupted)?;
        }

        Ok(())
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.check_interrupted()?;
        debug!("Running: {spec}");

        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        command.envs(spec.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let output = match spec.output {
            OutputMode::Capture => {
                let output = command
                    .stdin(Stdio::null())
                    .output()
                    .with_context(|| format!("Failed to start `{spec}`"))?;
                CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
            OutputMode::Inherit => {
                let status = command
                    .stdin(Stdio::null())
                    .status()
                    .with_context(|| format!("Failed to start `{spec}`"))?;
                CommandOutput {
                    code: status.code(),
                    ..Default::default()
                }
            }
        };

        debug!("`{}` finished with {:?}", spec.program, output.code);
        self.check_interrupted()?;

        Ok(output)
    }

    fn find_program(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }
}

/// Run a command, turning a non-zero exit into a [`RunError::CommandFailed`]
pub fn run_checked(runner: &dyn CommandRunner, spec: &CommandSpec) -> Result<CommandOutput> {
    let output = runner.run(spec)?;
    if !output.success() {
        Err(RunError::CommandFailed {
            command: spec.to_string(),
            code: output.code,
            stderr: output.stderr.clone(),
        })?;
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::ScriptedRunner;

    #[test]
    fn test_display_quotes_spaces() {
        let spec = CommandSpec::new("cplex").args(["-c", "read model.lp", "optimize"]);
        assert_eq!(spec.to_string(), "cplex -c \"read model.lp\" optimize");
    }

    #[test]
    fn test_has_args() {
        let spec = CommandSpec::new("conda").args(["env", "list", "--json"]);
        assert!(spec.has_args(&["list", "--json"]));
        assert!(!spec.has_args(&["--json", "list"]));
        assert!(spec.has_args(&[]));
    }

    #[test]
    fn test_run_checked_failure() {
        let runner = ScriptedRunner::new(|_| CommandOutput::failed(3, "boom"));
        let err = run_checked(&runner, &CommandSpec::new("dvc").arg("init")).unwrap_err();
        match err.downcast_ref::<RunError>() {
            Some(RunError::CommandFailed { code, stderr, .. }) => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "boom");
            }
            other => panic!("Unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_interrupted_runner_starts_nothing() {
        let runner = SystemRunner::default();
        let shared = runner.clone();
        shared.interrupt();

        let err = runner
            .run(&CommandSpec::new("a-program-which-does-not-exist"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::Interrupted)
        ));
    }

    #[test]
    fn test_run_checked_success() {
        let runner = ScriptedRunner::new(|_| CommandOutput::ok("done"));
        let output = run_checked(&runner, &CommandSpec::new("dvc").arg("init")).unwrap();
        assert_eq!(output.stdout, "done");
    }
}
