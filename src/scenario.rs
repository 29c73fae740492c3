//! Solving each scenario produced by the pipeline and collecting its inputs and results.
use crate::command::run_checked;
use crate::config::RunConfig;
use crate::environment::Environment;
use crate::input::input_err_msg;
use crate::solver::{ModelFiles, SolverKind, model_files_for, solve};
use crate::table::{OSEMOSYS_SETS, Table, VALUE_COLUMN, outer_merge_on_sets};
use anyhow::{Context, Result, ensure};
use itertools::Itertools;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Folders in the executables directory which are never scenarios
const IGNORED_FOLDERS: [&str; 2] = ["Default", "__pycache__"];

/// Columns which lead every aggregated table
const SCENARIO_COLUMNS: [&str; 2] = ["Future", "Scenario"];

/// One `<Scenario>_<Future>` folder produced by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRun {
    /// The folder name, e.g. `BAU_0`
    pub name: String,
    /// The scenario, e.g. `BAU`
    pub scenario: String,
    /// The future, e.g. `0`
    pub future: String,
    /// The folder itself
    pub dir: PathBuf,
}

impl ScenarioRun {
    /// Interpret a folder name as `<Scenario>_<Future>`
    fn from_dir(dir: PathBuf) -> Option<Self> {
        let name = dir.file_name()?.to_str()?.to_string();
        let (scenario, future) = name.rsplit_once('_')?;
        if scenario.is_empty() || future.is_empty() || !future.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }

        Some(Self {
            scenario: scenario.to_string(),
            future: future.to_string(),
            name,
            dir,
        })
    }

    /// The combined input table for this scenario
    pub fn input_csv(&self) -> PathBuf {
        self.dir.join(format!("{}_Input.csv", self.name))
    }

    /// The combined result table for this scenario
    pub fn output_csv(&self) -> PathBuf {
        self.dir.join(format!("{}_Output.csv", self.name))
    }
}

/// Find the scenario folders in the executables directory, sorted by scenario then future
pub fn discover_scenarios(executables_dir: &Path) -> Result<Vec<ScenarioRun>> {
    let entries = fs::read_dir(executables_dir)
        .with_context(|| input_err_msg(executables_dir))?;

    let mut runs = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| input_err_msg(executables_dir))?.path();
        if !path.is_dir() {
            continue;
        }
        let file_name = path.file_name().unwrap_or_default().to_string_lossy();
        if IGNORED_FOLDERS.contains(&&*file_name) {
            continue;
        }

        match ScenarioRun::from_dir(path.clone()) {
            Some(run) => runs.push(run),
            None => warn!(
                "Skipping {}: not named <Scenario>_<Future>",
                path.display()
            ),
        }
    }

    runs.sort_by(|a, b| {
        a.scenario.cmp(&b.scenario).then_with(|| {
            let key = |future: &str| future.parse::<u64>().unwrap_or(u64::MAX);
            key(&a.future).cmp(&key(&b.future))
        })
    });

    Ok(runs)
}

/// List the CSV files in a folder, sorted by name
fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| input_err_msg(dir))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.with_context(|| input_err_msg(dir))?.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        {
            files.push(path);
        }
    }
    files.sort();

    Ok(files)
}

/// The parameter name of a CSV file (its stem)
fn parameter_name(path: &Path) -> String {
    path.file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}

/// Read the parameter tables in a folder, skipping set definitions and files without values
fn read_parameter_tables(dir: &Path) -> Result<Vec<(String, Table)>> {
    let mut tables = Vec::new();
    for path in csv_files(dir)? {
        let name = parameter_name(&path);
        if OSEMOSYS_SETS.contains(&name.as_str()) {
            continue;
        }

        let table = Table::from_path(&path)?;
        if table.column_index(VALUE_COLUMN).is_none() || table.header().len() < 2 {
            debug!("Skipping {}: no parameter values", path.display());
            continue;
        }
        tables.push((name, table));
    }

    Ok(tables)
}

/// Combine the input parameter CSVs of a scenario into one table.
///
/// Each file's `VALUE` column is renamed to the parameter name. Set columns come first, then the
/// parameters in alphabetical order.
pub fn input_table(inputs_dir: &Path) -> Result<Table> {
    let tables = read_parameter_tables(inputs_dir)?
        .into_iter()
        .map(|(name, mut table)| {
            table.rename_column(VALUE_COLUMN, &name);
            table
        })
        .collect_vec();

    Ok(Table::concat(&tables).with_front_columns(&OSEMOSYS_SETS))
}

/// Merge the result CSVs of a scenario into one table, with one column per result
pub fn output_table(outputs_dir: &Path) -> Result<Table> {
    let tables = read_parameter_tables(outputs_dir)?;
    Ok(outer_merge_on_sets(&tables))
}

/// Convert a solution file to CSV files with otoole
fn convert_results(
    env: &Environment,
    config: &RunConfig,
    files: &ModelFiles,
    outputs_dir: &Path,
) -> Result<()> {
    if outputs_dir.exists() {
        fs::remove_dir_all(outputs_dir)
            .with_context(|| format!("Failed to clear {}", outputs_dir.display()))?;
    }
    fs::create_dir_all(outputs_dir)
        .with_context(|| format!("Failed to create {}", outputs_dir.display()))?;

    let mut spec = env
        .command("otoole")
        .args(["results", &config.solver.to_string(), "csv"])
        .path_arg(&files.sol())
        .path_arg(outputs_dir)
        .arg("datafile")
        .path_arg(&files.data)
        .path_arg(&config.resolve(&config.model.otoole_config));
    if config.solver == SolverKind::Glpk {
        spec = spec.arg("--glpk_model").path_arg(&files.glp());
    }
    run_checked(env.runner(), &spec)?;

    Ok(())
}

/// The inputs and results of one scenario
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioTables {
    /// The combined input parameters
    pub inputs: Table,
    /// The merged results
    pub outputs: Table,
}

/// Solve one scenario, convert its results and build its tables.
///
/// The per-scenario tables are also written into the scenario folder.
pub fn process_scenario(
    env: &Environment,
    config: &RunConfig,
    run: &ScenarioRun,
) -> Result<ScenarioTables> {
    let model = config.resolve(&config.model.osemosys_model);
    let files = model_files_for(&model, &run.dir, &run.name);
    ensure!(
        files.data.is_file(),
        "Data file {} for scenario {} was not found",
        files.data.display(),
        run.name
    );

    let status = solve(
        env.runner(),
        config.solver,
        &config.solver_options(),
        &files,
        &run.name,
    )?;
    info!("Scenario {}: solved ({status})", run.name);

    let outputs_dir = run.dir.join(&config.model.outputs_subdir);
    convert_results(env, config, &files, &outputs_dir)?;

    let inputs_dir = run.dir.join(&config.model.inputs_subdir);
    let inputs = if inputs_dir.is_dir() {
        input_table(&inputs_dir)?
    } else {
        warn!(
            "Scenario {}: no input folder at {}",
            run.name,
            inputs_dir.display()
        );
        Table::default()
    };
    let outputs = output_table(&outputs_dir)?;
    ensure!(
        !outputs.is_empty(),
        "Scenario {}: no results were produced in {}",
        run.name,
        outputs_dir.display()
    );

    inputs.write_to(&run.input_csv())?;
    outputs.write_to(&run.output_csv())?;

    Ok(ScenarioTables { inputs, outputs })
}

/// The tables written as run artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedTables {
    /// Inputs of every scenario
    pub inputs: Table,
    /// Results of every scenario
    pub outputs: Table,
    /// Inputs followed by results
    pub combined: Table,
}

/// The column order of aggregated tables
fn front_columns() -> Vec<&'static str> {
    SCENARIO_COLUMNS
        .iter()
        .chain(OSEMOSYS_SETS.iter())
        .copied()
        .collect()
}

/// Label a table with its scenario and future
fn labelled(table: &Table, run: &ScenarioRun) -> Table {
    let mut table = table.clone();
    table.insert_column(0, "Future", &run.future);
    table.insert_column(1, "Scenario", &run.scenario);
    table
}

/// Stack the tables of every scenario, labelling each row with its scenario and future
pub fn aggregate(results: &[(ScenarioRun, ScenarioTables)]) -> Result<AggregatedTables> {
    ensure!(!results.is_empty(), "No scenarios were solved");

    let front = front_columns();
    let inputs = results
        .iter()
        .filter(|(_, tables)| !tables.inputs.header().is_empty())
        .map(|(run, tables)| labelled(&tables.inputs, run))
        .collect_vec();
    let outputs = results
        .iter()
        .map(|(run, tables)| labelled(&tables.outputs, run))
        .collect_vec();

    let inputs = Table::concat(&inputs);
    let outputs = Table::concat(&outputs);
    ensure!(!outputs.is_empty(), "No results were produced for any scenario");
    let combined = Table::concat([&inputs, &outputs]);

    Ok(AggregatedTables {
        inputs: inputs.with_front_columns(&front),
        outputs: outputs.with_front_columns(&front),
        combined: combined.with_front_columns(&front),
    })
}
