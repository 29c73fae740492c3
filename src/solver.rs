//! Routing a model to the configured solver and interpreting what it reports.
//!
//! Every solver other than GLPK reads an LP matrix, which is generated from the OSeMOSYS model
//! and data files with `glpsol` before solving. GLPK solves the model directly.
use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::RunError;
use anyhow::{Context, Result};
use derive_more::Display;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strum::EnumIter;

/// The program which generates LP matrices from OSeMOSYS models
const MATRIX_GENERATOR: &str = "glpsol";

/// The solvers which can be used
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SolverKind {
    /// The GNU Linear Programming Kit
    Glpk,
    /// COIN-OR Branch and Cut
    Cbc,
    /// IBM ILOG CPLEX
    Cplex,
    /// Gurobi
    Gurobi,
}

impl SolverKind {
    /// The name of the program which runs this solver
    pub fn binary_name(self) -> &'static str {
        match self {
            Self::Glpk => "glpsol",
            Self::Cbc => "cbc",
            Self::Cplex => "cplex",
            Self::Gurobi => "gurobi_cl",
        }
    }

    /// Whether the solver reads an LP matrix generated by `glpsol`
    pub fn needs_lp_matrix(self) -> bool {
        self != Self::Glpk
    }
}

/// Options passed to the solver.
///
/// Only the options which apply to the selected solver are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SolverOptions {
    /// Number of threads
    pub threads: Option<u32>,
    /// Random seed
    pub seed: Option<u32>,
    /// Time limit in seconds
    pub time_limit: Option<u32>,
}

/// The files involved in solving one model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    /// The OSeMOSYS model file
    pub model: PathBuf,
    /// The data file for the scenario
    pub data: PathBuf,
    /// Path (without extension) used for files written while solving
    pub stem: PathBuf,
}

impl ModelFiles {
    fn with_extension(&self, extension: &str) -> PathBuf {
        let mut path = self.stem.clone().into_os_string();
        path.push(".");
        path.push(extension);
        path.into()
    }

    /// The LP matrix
    pub fn lp(&self) -> PathBuf {
        self.with_extension("lp")
    }

    /// The GLPK model file written alongside a GLPK solution
    pub fn glp(&self) -> PathBuf {
        self.with_extension("glp")
    }

    /// The solution file
    pub fn sol(&self) -> PathBuf {
        self.with_extension("sol")
    }

    /// The file the solver's console output is saved to
    pub fn log(&self) -> PathBuf {
        self.with_extension("log")
    }
}

/// The outcome reported by a solver
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum SolverStatus {
    /// An optimal solution was found
    #[display("optimal")]
    Optimal,
    /// The model has no feasible solution
    #[display("infeasible")]
    Infeasible,
    /// The objective is unbounded
    #[display("unbounded")]
    Unbounded,
    /// The solver stopped before proving optimality
    #[display("not converged ({_0})")]
    NotConverged(String),
    /// The solver's output could not be interpreted
    #[display("unknown")]
    Unknown,
}

impl SolverStatus {
    /// Whether outputs may be produced from the solution
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Optimal | Self::Unknown)
    }
}

/// The commands needed to solve a model with the given solver, in the order they must be run
pub fn solve_commands(kind: SolverKind, opts: &SolverOptions, files: &ModelFiles) -> Vec<CommandSpec> {
    let mut commands = Vec::new();

    if kind.needs_lp_matrix() {
        commands.push(
            CommandSpec::new(MATRIX_GENERATOR)
                .arg("-m")
                .path_arg(&files.model)
                .arg("-d")
                .path_arg(&files.data)
                .arg("--wlp")
                .path_arg(&files.lp())
                .arg("--check"),
        );
    }

    let lp = files.lp().to_string_lossy().into_owned();
    let sol = files.sol().to_string_lossy().into_owned();
    let solve = match kind {
        SolverKind::Glpk => {
            let mut cmd = CommandSpec::new(kind.binary_name())
                .arg("-m")
                .path_arg(&files.model)
                .arg("-d")
                .path_arg(&files.data)
                .arg("--wglp")
                .path_arg(&files.glp())
                .arg("--write")
                .arg(sol);
            if let Some(limit) = opts.time_limit {
                cmd = cmd.arg("--tmlim").arg(limit.to_string());
            }
            cmd
        }
        SolverKind::Cbc => {
            let mut cmd = CommandSpec::new(kind.binary_name()).arg(lp);
            if let Some(seed) = opts.seed {
                cmd = cmd.arg("-randomCbcSeed").arg(seed.to_string());
            }
            if let Some(limit) = opts.time_limit {
                cmd = cmd.arg("-seconds").arg(limit.to_string());
            }
            cmd.args(["solve", "-solu"]).arg(sol)
        }
        SolverKind::Cplex => {
            let mut cmd = CommandSpec::new(kind.binary_name())
                .arg("-c")
                .arg(format!("read {lp}"));
            if let Some(threads) = opts.threads {
                cmd = cmd.arg(format!("set threads {threads}"));
            }
            if let Some(seed) = opts.seed {
                cmd = cmd.arg(format!("set randomseed {seed}"));
            }
            if let Some(limit) = opts.time_limit {
                cmd = cmd.arg(format!("set timelimit {limit}"));
            }
            cmd.arg("optimize").arg(format!("write {sol}"))
        }
        SolverKind::Gurobi => {
            let mut cmd = CommandSpec::new(kind.binary_name());
            if let Some(threads) = opts.threads {
                cmd = cmd.arg(format!("Threads={threads}"));
            }
            if let Some(seed) = opts.seed {
                cmd = cmd.arg(format!("Seed={seed}"));
            }
            if let Some(limit) = opts.time_limit {
                cmd = cmd.arg(format!("TimeLimit={limit}"));
            }
            cmd.arg(format!("ResultFile={sol}")).arg(lp)
        }
    };
    commands.push(solve);

    commands
}

/// Look for a line in `text` containing any of the given (lowercase) phrases
fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| text.contains(phrase))
}

/// Classify the status line of a GLPK solution file.
///
/// The line is `s bas m n p d obj` for simplex, `s ipt m n p d obj` for interior point and
/// `s mip m n p obj` for integer problems, where `p` and `d` are the primal and dual status.
fn classify_glpk_solution(solution: &str) -> Option<SolverStatus> {
    let line = solution.lines().find(|line| line.starts_with("s "))?;
    let fields: Vec<_> = line.split_whitespace().collect();

    match fields.as_slice() {
        ["s", "bas" | "ipt", _, _, primal, dual, ..] => Some(match (*primal, *dual) {
            ("f", "f") => SolverStatus::Optimal,
            ("n", _) => SolverStatus::Infeasible,
            ("f", "n") => SolverStatus::Unbounded,
            ("i", _) => SolverStatus::NotConverged("no feasible solution found".into()),
            ("f", _) => SolverStatus::NotConverged("feasible solution not proven optimal".into()),
            _ => SolverStatus::NotConverged("solution status undefined".into()),
        }),
        ["s", "mip", _, _, status, ..] => Some(match *status {
            "o" => SolverStatus::Optimal,
            "n" => SolverStatus::Infeasible,
            "f" => SolverStatus::NotConverged("feasible solution not proven optimal".into()),
            _ => SolverStatus::NotConverged("solution status undefined".into()),
        }),
        _ => None,
    }
}

/// Interpret the console output and solution file of a solver
pub fn classify(kind: SolverKind, console: &str, solution: &str) -> SolverStatus {
    let console = console.to_lowercase();

    match kind {
        SolverKind::Glpk => {
            if contains_any(
                &console,
                &[
                    "has no primal feasible solution",
                    "has no integer feasible solution",
                ],
            ) {
                SolverStatus::Infeasible
            } else if console.contains("has unbounded solution") {
                SolverStatus::Unbounded
            } else if console.contains("time limit exceeded") {
                SolverStatus::NotConverged("time limit exceeded".into())
            } else if let Some(status) = classify_glpk_solution(solution) {
                status
            } else if contains_any(
                &console,
                &["optimal lp solution found", "integer optimal solution found"],
            ) {
                SolverStatus::Optimal
            } else {
                SolverStatus::Unknown
            }
        }
        SolverKind::Cbc => {
            // The first line of a CBC solution file gives the status
            let first = solution.lines().next().unwrap_or_default().to_lowercase();
            let text = if first.is_empty() { &console } else { &first };
            if text.starts_with("optimal") || text.contains("optimal - objective value") {
                SolverStatus::Optimal
            } else if text.contains("infeasible") {
                SolverStatus::Infeasible
            } else if text.contains("unbounded") {
                SolverStatus::Unbounded
            } else if text.contains("stopped") {
                SolverStatus::NotConverged(first.trim().to_string())
            } else {
                SolverStatus::Unknown
            }
        }
        SolverKind::Cplex => {
            if console.contains("infeasible or unbounded") {
                SolverStatus::Infeasible
            } else if contains_any(&console, &[" - integer infeasible", " - infeasible"]) {
                SolverStatus::Infeasible
            } else if console.contains(" - unbounded") {
                SolverStatus::Unbounded
            } else if console.contains("time limit exceeded") {
                SolverStatus::NotConverged("time limit exceeded".into())
            } else if contains_any(&console, &[" - integer optimal", " - optimal"]) {
                SolverStatus::Optimal
            } else {
                SolverStatus::Unknown
            }
        }
        SolverKind::Gurobi => {
            if contains_any(&console, &["infeasible model", "infeasible or unbounded model"]) {
                SolverStatus::Infeasible
            } else if console.contains("unbounded model") {
                SolverStatus::Unbounded
            } else if console.contains("time limit reached") {
                SolverStatus::NotConverged("time limit reached".into())
            } else if console.contains("optimal solution found") {
                SolverStatus::Optimal
            } else {
                SolverStatus::Unknown
            }
        }
    }
}

/// Check that the programs needed to solve with `kind` are installed
pub fn check_solver_available(runner: &dyn CommandRunner, kind: SolverKind) -> Result<()> {
    let mut binaries = vec![kind.binary_name()];
    if kind.needs_lp_matrix() {
        binaries.push(MATRIX_GENERATOR);
    }

    for binary in binaries {
        if runner.find_program(binary).is_none() {
            Err(RunError::MissingSolver {
                solver: kind,
                binary: binary.to_string(),
            })?;
        }
    }

    Ok(())
}

/// Append the output of a command to the solver log
fn append_log(log: &mut String, spec: &CommandSpec, output: &CommandOutput) {
    log.push_str(&format!("$ {spec}\n"));
    log.push_str(&output.stdout);
    log.push_str(&output.stderr);
    log.push('\n');
}

/// Solve the model for one scenario.
///
/// # Arguments
///
/// * `runner` - Used to run the solver
/// * `kind` - The solver to use
/// * `opts` - Options for the solver
/// * `files` - The model files
/// * `scenario` - Name of the scenario (for messages)
///
/// # Returns
///
/// The solver status if a usable solution was written, otherwise an error.
pub fn solve(
    runner: &dyn CommandRunner,
    kind: SolverKind,
    opts: &SolverOptions,
    files: &ModelFiles,
    scenario: &str,
) -> Result<SolverStatus> {
    let sol_path = files.sol();
    if sol_path.exists() {
        // Don't let a stale solution be mistaken for a new one
        fs::remove_file(&sol_path)
            .with_context(|| format!("Failed to remove old solution {}", sol_path.display()))?;
    }

    let mut console = String::new();
    let commands = solve_commands(kind, opts, files);
    let last = commands.len() - 1;
    for (idx, spec) in commands.iter().enumerate() {
        info!("Scenario {scenario}: running {}", spec.program);
        let output = runner.run(spec)?;
        append_log(&mut console, spec, &output);

        if output.success() {
            continue;
        }

        if idx != last {
            // Matrix generation failed, so the solver never ran
            Err(RunError::CommandFailed {
                command: spec.to_string(),
                code: output.code,
                stderr: output.stderr,
            })?;
        }

        // Solvers may exit with an error for infeasible models
        let status = classify(kind, &console, "");
        save_log(files, &console);
        if matches!(status, SolverStatus::Optimal | SolverStatus::Unknown) {
            Err(RunError::SolverCrashed {
                solver: kind,
                scenario: scenario.to_string(),
                reason: format!("{} exited with {:?}", spec.program, output.code),
            })?;
        }
        Err(RunError::SolverOutcome {
            solver: kind,
            scenario: scenario.to_string(),
            status,
        })?;
    }
    save_log(files, &console);

    let solution = fs::read_to_string(&sol_path).unwrap_or_default();
    let status = classify(kind, &console, &solution);
    debug!("Scenario {scenario}: solver status is {status}");

    if !status.is_usable() {
        Err(RunError::SolverOutcome {
            solver: kind,
            scenario: scenario.to_string(),
            status: status.clone(),
        })?;
    }

    if solution.trim().is_empty() {
        Err(RunError::SolverCrashed {
            solver: kind,
            scenario: scenario.to_string(),
            reason: format!("no solution was written to {}", sol_path.display()),
        })?;
    }

    if status == SolverStatus::Unknown {
        warn!(
            "Scenario {scenario}: could not determine the {kind} solution status; see {}",
            files.log().display()
        );
    }

    Ok(status)
}

/// Save the solver's console output next to the solution, if there is any
fn save_log(files: &ModelFiles, console: &str) {
    let path = files.log();
    if let Err(err) = fs::write(&path, console) {
        warn!("Could not write solver log {}: {err}", path.display());
    }
}

/// The model files for a scenario folder
pub fn model_files_for(model: &Path, scenario_dir: &Path, name: &str) -> ModelFiles {
    ModelFiles {
        model: model.to_path_buf(),
        data: scenario_dir.join(format!("{name}.txt")),
        stem: scenario_dir.join(format!("{name}_Output")),
    }
}
