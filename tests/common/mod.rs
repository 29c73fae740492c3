//! Helpers shared by the integration tests.
#![allow(dead_code)]
use anyhow::Result;
use momf::command::{CommandOutput, CommandRunner, CommandSpec};
use momf::error::RunError;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// The environment named in the test projects' environment file
pub const ENV_NAME: &str = "OG-MOMF-env";

/// The binaries of every solver except GLPK, which also generates matrices
pub const SOLVER_BINARIES: [&str; 3] = ["cbc", "cplex", "gurobi_cl"];

/// Write a CSV file from a header and rows
pub fn write_csv(path: &Path, header: &[&str], rows: &[&[&str]]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut writer = csv::Writer::from_path(path).unwrap();
    writer.write_record(header).unwrap();
    for row in rows {
        writer.write_record(*row).unwrap();
    }
    writer.flush().unwrap();
}

/// The pipeline file of the test project.
///
/// Stages are declared out of order so that ordering by dependency is exercised.
pub const PIPELINE: &str = "\
stages:
  compile:
    cmd: python compile.py --date fecha
    deps:
      - data
    outs:
      - Executables
  prepare:
    cmd: python prepare.py
    deps:
      - raw
    outs:
      - data
";

/// Write a project which can be run with [`FakeTools`].
///
/// # Returns
///
/// The path to the configuration file.
pub fn write_project(dir: &Path, solver: &str) -> PathBuf {
    let config_path = dir.join("momf.toml");
    fs::write(
        &config_path,
        format!(
            "solver = \"{solver}\"\n\
             output_dir = \"results\"\n\
             annualize_capital = true\n\
             \n\
             [environment]\n\
             update_policy = \"never\"\n"
        ),
    )
    .unwrap();
    fs::write(
        dir.join("environment.yaml"),
        format!("name: {ENV_NAME}\ndependencies:\n  - python=3.11\n"),
    )
    .unwrap();
    fs::write(dir.join("dvc.yaml"), PIPELINE).unwrap();
    fs::write(dir.join("osemosys.txt"), "# model\n").unwrap();
    fs::write(dir.join("config.yaml"), "# otoole config\n").unwrap();

    for (name, cost) in [("BAU_0", "10"), ("NDC_0", "12")] {
        let scenario_dir = dir.join("Executables").join(name);
        fs::create_dir_all(&scenario_dir).unwrap();
        fs::write(scenario_dir.join(format!("{name}.txt")), "# data\n").unwrap();
        write_csv(
            &scenario_dir.join("Inputs").join("CapitalCost.csv"),
            &["REGION", "TECHNOLOGY", "YEAR", "VALUE"],
            &[&["RE1", "PWRSOLARG01", "2025", cost]],
        );
        write_csv(
            &scenario_dir.join("Inputs").join("YEAR.csv"),
            &["VALUE"],
            &[&["2025"], &["2026"]],
        );
    }

    config_path
}

/// The value of the argument after `flag`
fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let idx = args.iter().position(|arg| arg == flag)?;
    args.get(idx + 1).map(String::as_str)
}

/// The value of the first argument starting with `prefix`, without the prefix
fn arg_with_prefix<'a>(args: &'a [String], prefix: &str) -> Option<&'a str> {
    args.iter().find_map(|arg| arg.strip_prefix(prefix))
}

/// The program and arguments a command really runs, looking through `conda run`
pub fn inner_command(spec: &CommandSpec) -> (&str, &[String]) {
    if spec.program == "conda" && spec.args.first().is_some_and(|arg| arg == "run") {
        let start = spec
            .args
            .iter()
            .position(|arg| arg == "--no-capture-output")
            .map_or(spec.args.len(), |idx| idx + 1);
        if let Some(program) = spec.args.get(start) {
            return (program.as_str(), &spec.args[start + 1..]);
        }
    }

    (spec.program.as_str(), spec.args.as_slice())
}

/// Stands in for conda, dvc, the solvers and otoole, writing the files each would write
pub struct FakeTools {
    project_dir: PathBuf,
    installed: HashSet<String>,
    failing_stage: Option<String>,
    interrupted_stage: Option<String>,
    infeasible: bool,
    commands: RefCell<Vec<CommandSpec>>,
    pipeline_seen: RefCell<Vec<String>>,
}

impl FakeTools {
    /// Tools for the project in `project_dir`, with every program installed
    pub fn new(project_dir: &Path) -> Self {
        let installed = ["conda", "glpsol"]
            .into_iter()
            .chain(SOLVER_BINARIES)
            .map(String::from)
            .collect();

        Self {
            project_dir: project_dir.to_path_buf(),
            installed,
            failing_stage: None,
            interrupted_stage: None,
            infeasible: false,
            commands: RefCell::new(Vec::new()),
            pipeline_seen: RefCell::new(Vec::new()),
        }
    }

    /// Report `program` as not installed
    pub fn without(mut self, program: &str) -> Self {
        self.installed.remove(program);
        self
    }

    /// Make the named pipeline stage fail
    pub fn failing_stage(mut self, stage: &str) -> Self {
        self.failing_stage = Some(stage.to_string());
        self
    }

    /// Interrupt the run, as Ctrl+C would, while the named pipeline stage is running
    pub fn interrupted_at(mut self, stage: &str) -> Self {
        self.interrupted_stage = Some(stage.to_string());
        self
    }

    /// Make the solver report that the model is infeasible
    pub fn infeasible(mut self) -> Self {
        self.infeasible = true;
        self
    }

    /// Every command run so far
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.borrow().clone()
    }

    /// The programs run so far, looking through `conda run`
    pub fn programs_run(&self) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .map(|spec| inner_command(spec).0.to_string())
            .collect()
    }

    /// The contents of the pipeline file each time a stage was run
    pub fn pipeline_seen(&self) -> Vec<String> {
        self.pipeline_seen.borrow().clone()
    }

    fn dvc(&self, args: &[String]) -> CommandOutput {
        match args.first().map(String::as_str) {
            Some("init") => {
                fs::create_dir_all(self.project_dir.join(".dvc")).unwrap();
                CommandOutput::ok("")
            }
            Some("repro") => {
                let pipeline = fs::read_to_string(self.project_dir.join("dvc.yaml")).unwrap();
                self.pipeline_seen.borrow_mut().push(pipeline);
                let target = args.last().map(String::as_str).unwrap_or_default();
                match &self.failing_stage {
                    Some(stage) if target.ends_with(&format!(":{stage}")) => {
                        CommandOutput::failed(1, "stage failed")
                    }
                    _ => CommandOutput::ok(""),
                }
            }
            _ => CommandOutput::ok(""),
        }
    }

    fn solver(&self, program: &str, args: &[String]) -> CommandOutput {
        let (sol, contents, console) = match program {
            "glpsol" if args.iter().any(|arg| arg == "--wlp") => return CommandOutput::ok(""),
            "glpsol" => (
                arg_after(args, "--write"),
                if self.infeasible { "s bas 10 10 n f 0\n" } else { "s bas 10 10 f f 1.0\n" },
                "",
            ),
            "cbc" => (
                arg_after(args, "-solu"),
                if self.infeasible {
                    "Infeasible - objective value 0.00000000\n"
                } else {
                    "Optimal - objective value 1.00000000\n"
                },
                "",
            ),
            "cplex" => (
                arg_with_prefix(args, "write "),
                "<CPLEXSolution/>\n",
                if self.infeasible {
                    "Dual simplex - Infeasible"
                } else {
                    "Dual simplex - Optimal:  Objective = 1.0"
                },
            ),
            _ => (
                arg_with_prefix(args, "ResultFile="),
                "# Objective value = 1\n",
                if self.infeasible { "Infeasible model" } else { "Optimal solution found" },
            ),
        };

        if let Some(sol) = sol {
            fs::write(sol, contents).unwrap();
        }
        CommandOutput::ok(console)
    }

    fn otoole(args: &[String]) -> CommandOutput {
        // results <solver> csv <solution> <output folder> ...
        let outputs_dir = Path::new(&args[4]);
        write_csv(
            &outputs_dir.join("CapitalInvestment.csv"),
            &["REGION", "TECHNOLOGY", "YEAR", "VALUE"],
            &[&["RE1", "PWRSOLARG01", "2025", "100"]],
        );
        write_csv(
            &outputs_dir.join("TotalCapacityAnnual.csv"),
            &["REGION", "TECHNOLOGY", "YEAR", "VALUE"],
            &[
                &["RE1", "PWRSOLARG01", "2025", "5"],
                &["RE1", "PWRSOLARG01", "2026", "5"],
            ],
        );
        CommandOutput::ok("")
    }
}

impl CommandRunner for FakeTools {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.commands.borrow_mut().push(spec.clone());

        let (program, args) = inner_command(spec);
        if let Some(stage) = &self.interrupted_stage
            && program == "dvc"
            && args.last().is_some_and(|target| target.ends_with(&format!(":{stage}")))
        {
            Err(RunError::Interrupted)?;
        }

        let output = match program {
            "conda" if spec.has_args(&["list", "--json"]) => {
                CommandOutput::ok(format!("{{\"envs\": [\"/opt/conda/envs/{ENV_NAME}\"]}}"))
            }
            "conda" | "python" => CommandOutput::ok(""),
            "dvc" => self.dvc(args),
            "otoole" => Self::otoole(args),
            "glpsol" | "cbc" | "cplex" | "gurobi_cl" => self.solver(program, args),
            _ => CommandOutput::failed(127, format!("{program}: command not found")),
        };

        Ok(output)
    }

    fn find_program(&self, name: &str) -> Option<PathBuf> {
        self.installed
            .contains(name)
            .then(|| PathBuf::from("/usr/bin").join(name))
    }
}
