//! The kinds of failure a run can end with.
//!
//! Everything else is propagated as an [`anyhow::Error`] with context; these variants exist so
//! that callers can tell the categories apart (e.g. an infeasible model from a crashed solver).
use crate::solver::{SolverKind, SolverStatus};
use std::path::PathBuf;
use thiserror::Error;

/// Describe how a process exited
#[allow(clippy::ref_option)]
fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// The number of lines of a command's stderr included in its error message
const STDERR_TAIL_LINES: usize = 10;

/// The last few non-empty lines of a command's stderr, prefixed with a separator
fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<_> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return String::new();
    }

    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    format!(":\n{}", lines[start..].join("\n"))
}

/// Errors which end a run
#[derive(Debug, Error)]
pub enum RunError {
    /// A tool the run depends on is not available
    #[error("Required tool '{tool}' was not found on PATH. Install it or open a shell where it is available")]
    MissingTool {
        /// The name of the missing program
        tool: String,
    },

    /// The binary for the configured solver is not available
    #[error("Solver '{solver}' is not installed: could not find '{binary}' on PATH")]
    MissingSolver {
        /// The configured solver
        solver: SolverKind,
        /// The binary which was looked for
        binary: String,
    },

    /// The execution environment could not be created or updated
    #[error("Failed to provision environment '{env_name}': {reason}")]
    Environment {
        /// The name of the environment
        env_name: String,
        /// What went wrong
        reason: String,
    },

    /// A pipeline stage did not complete
    #[error("Pipeline stage '{stage}' failed ({})", describe_exit(.code))]
    StageFailed {
        /// The name of the stage
        stage: String,
        /// The exit code of the pipeline tool
        code: Option<i32>,
    },

    /// An external command did not complete
    #[error("Command `{command}` failed ({}){}", describe_exit(.code), stderr_tail(.stderr))]
    CommandFailed {
        /// The command line which was run
        command: String,
        /// The exit code of the command
        code: Option<i32>,
        /// Whatever the command wrote to stderr
        stderr: String,
    },

    /// The solver ran but did not find an optimal solution
    #[error("Solver {solver} did not solve scenario {scenario}: the model is {status}")]
    SolverOutcome {
        /// The solver which was used
        solver: SolverKind,
        /// The scenario being solved
        scenario: String,
        /// The status reported by the solver
        status: SolverStatus,
    },

    /// The solver stopped without reporting a result
    #[error("Solver {solver} crashed while solving scenario {scenario}: {reason}")]
    SolverCrashed {
        /// The solver which was used
        solver: SolverKind,
        /// The scenario being solved
        scenario: String,
        /// What went wrong
        reason: String,
    },

    /// An output file could not be written because of file permissions
    #[error(
        "Permission denied writing {}. Close any program using the file or run again with elevated (administrator) privileges",
        .path.display()
    )]
    OutputPermission {
        /// The file which could not be written
        path: PathBuf,
    },

    /// Another run holds the lock for this project
    #[error("Another run is already in progress for this project (lock file: {})", .lock_path.display())]
    RunInProgress {
        /// The path to the lock file
        lock_path: PathBuf,
    },

    /// The user interrupted the run
    #[error("The run was interrupted")]
    Interrupted,
}
