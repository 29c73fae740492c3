//! The run configuration, read from `momf.toml` in the project directory.
use crate::environment::UpdatePolicy;
use crate::input::{deserialise_nonzero, input_err_msg, read_toml, resolve_path};
use crate::solver::{SolverKind, SolverOptions};
use crate::techs::olade::GrowthType;
use anyhow::{Context, Result, ensure};
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The default name of the run configuration file
pub const CONFIG_FILE_NAME: &str = "momf.toml";

/// The directory (relative to the project) holding run state such as logs and the run lock
pub const STATE_DIR_NAME: &str = ".momf";

/// The scenario name which stands for every scenario in a Secondary-Techs edit
pub const ALL_SCENARIOS: &str = "ALL";

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

macro_rules! define_path_default {
    ($name:ident, $value: expr) => {
        fn $name() -> PathBuf {
            PathBuf::from($value)
        }
    };
}

define_param_default!(default_threads, u32, 1);
define_param_default!(default_seed, u32, 12345);
define_param_default!(default_output_prefix, String, "RELAC_TX".to_string());
define_param_default!(default_discount_rate, f64, 0.0639);
define_param_default!(default_asset_lifetime, u32, 15);
define_param_default!(default_date_placeholder, String, "fecha".to_string());
define_param_default!(default_growth_rate, f64, 5.0);
define_param_default!(default_reference_year, u32, 2023);
define_path_default!(default_output_dir, ".");
define_path_default!(default_osemosys_model, "osemosys.txt");
define_path_default!(default_executables_dir, "Executables");
define_path_default!(default_otoole_config, "config.yaml");
define_path_default!(default_inputs_subdir, "Inputs");
define_path_default!(default_outputs_subdir, "Outputs");
define_path_default!(default_environment_file, "environment.yaml");
define_path_default!(default_pipeline_file, "dvc.yaml");
define_path_default!(default_techs_base_dir, "A1_Outputs");
define_path_default!(default_parameter_file, "Secondary_Techs.csv");
define_path_default!(default_editor_file, "Secondary_Techs_Editor.csv");
define_path_default!(default_olade_file, "OLADE_Capacity.csv");

fn default_conda_packages() -> IndexMap<String, String> {
    // Python module name -> conda package name
    [
        ("pandas", "pandas"),
        ("numpy", "numpy"),
        ("openpyxl", "openpyxl"),
        ("yaml", "pyyaml"),
        ("xlsxwriter", "xlsxwriter"),
    ]
    .into_iter()
    .map(|(module, package)| (module.to_string(), package.to_string()))
    .collect()
}

fn default_pip_packages() -> IndexMap<String, String> {
    // Python module name -> pip requirement
    [("dvc", "dvc"), ("otoole", "otoole>=1.1.1")]
        .into_iter()
        .map(|(module, package)| (module.to_string(), package.to_string()))
        .collect()
}

fn default_scenarios() -> Vec<String> {
    ["BAU", "NDC", "NDC+ELC", "NDC_NoRPO"]
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

/// Locations of the OSeMOSYS model and the folders the pipeline writes scenarios to
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// The OSeMOSYS model file
    #[serde(default = "default_osemosys_model")]
    pub osemosys_model: PathBuf,
    /// Folder holding one `<Scenario>_<Future>` folder per scenario
    #[serde(default = "default_executables_dir")]
    pub executables_dir: PathBuf,
    /// The otoole configuration describing the model's parameters and results
    #[serde(default = "default_otoole_config")]
    pub otoole_config: PathBuf,
    /// Subfolder of each scenario folder holding the input parameter CSVs
    #[serde(default = "default_inputs_subdir")]
    pub inputs_subdir: PathBuf,
    /// Subfolder of each scenario folder which results are converted into
    #[serde(default = "default_outputs_subdir")]
    pub outputs_subdir: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            osemosys_model: default_osemosys_model(),
            executables_dir: default_executables_dir(),
            otoole_config: default_otoole_config(),
            inputs_subdir: default_inputs_subdir(),
            outputs_subdir: default_outputs_subdir(),
        }
    }
}

/// How the execution environment is provisioned
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    /// Name of the environment (otherwise taken from the environment file)
    pub name: Option<String>,
    /// The conda environment definition
    #[serde(default = "default_environment_file")]
    pub file: PathBuf,
    /// When an existing environment is brought up to date
    #[serde(default)]
    pub update_policy: UpdatePolicy,
    /// Packages installed with conda, keyed by the Python module they provide
    #[serde(default = "default_conda_packages")]
    pub conda_packages: IndexMap<String, String>,
    /// Packages installed with pip, keyed by the Python module they provide
    #[serde(default = "default_pip_packages")]
    pub pip_packages: IndexMap<String, String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: None,
            file: default_environment_file(),
            update_policy: UpdatePolicy::default(),
            conda_packages: default_conda_packages(),
            pip_packages: default_pip_packages(),
        }
    }
}

/// The pipeline definition
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// The DVC pipeline file
    #[serde(default = "default_pipeline_file")]
    pub file: PathBuf,
    /// Text in the pipeline file which is replaced with the run date
    #[serde(default = "default_date_placeholder")]
    pub date_placeholder: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            file: default_pipeline_file(),
            date_placeholder: default_date_placeholder(),
        }
    }
}

/// Parameters for annualising capital investment
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AnnualizationConfig {
    /// Discount rate used in the capital recovery factor
    #[serde(default = "default_discount_rate")]
    pub discount_rate: f64,
    /// Number of years over which investments are paid back
    #[serde(default = "default_asset_lifetime")]
    pub asset_lifetime: u32,
}

impl Default for AnnualizationConfig {
    fn default() -> Self {
        Self {
            discount_rate: default_discount_rate(),
            asset_lifetime: default_asset_lifetime(),
        }
    }
}

/// Where the Secondary-Techs parameter files live
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TechsConfig {
    /// Folder containing one `A1_Outputs_<Scenario>` folder per scenario
    #[serde(default = "default_techs_base_dir")]
    pub base_dir: PathBuf,
    /// The scenarios which can be edited
    #[serde(default = "default_scenarios")]
    pub scenarios: Vec<String>,
    /// Name of the parameter file in each scenario folder
    #[serde(default = "default_parameter_file")]
    pub parameter_file: PathBuf,
    /// The editable template, relative to the base folder
    #[serde(default = "default_editor_file")]
    pub editor_file: PathBuf,
    /// Residual capacities from OLADE statistics
    #[serde(default)]
    pub olade: OladeConfig,
}

impl Default for TechsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_techs_base_dir(),
            scenarios: default_scenarios(),
            parameter_file: default_parameter_file(),
            editor_file: default_editor_file(),
            olade: OladeConfig::default(),
        }
    }
}

/// Settings for projecting power plant residual capacity from OLADE installed capacity
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OladeConfig {
    /// Whether OLADE data replaces entered residual capacities
    #[serde(default)]
    pub enabled: bool,
    /// The installed capacity table (MW), relative to the base folder
    #[serde(default = "default_olade_file")]
    pub data_file: PathBuf,
    /// Annual growth of capacity after the reference year, in percent
    #[serde(default = "default_growth_rate")]
    pub growth_rate: f64,
    /// How the growth rate is applied
    #[serde(default)]
    pub growth_type: GrowthType,
    /// The year the installed capacities refer to
    #[serde(default = "default_reference_year")]
    pub reference_year: u32,
}

impl Default for OladeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_file: default_olade_file(),
            growth_rate: default_growth_rate(),
            growth_type: GrowthType::default(),
            reference_year: default_reference_year(),
        }
    }
}

impl TechsConfig {
    /// The parameter file for a scenario
    pub fn scenario_file(&self, base_dir: &Path, scenario: &str) -> PathBuf {
        base_dir
            .join(format!("A1_Outputs_{scenario}"))
            .join(&self.parameter_file)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            !self.scenarios.is_empty(),
            "secondary_techs.scenarios must not be empty"
        );
        let mut seen = HashSet::new();
        for scenario in &self.scenarios {
            ensure!(
                !scenario.trim().is_empty(),
                "secondary_techs.scenarios contains an empty name"
            );
            ensure!(
                scenario != ALL_SCENARIOS,
                "'{ALL_SCENARIOS}' is reserved and cannot be used as a scenario name"
            );
            ensure!(
                seen.insert(scenario),
                "Scenario {scenario} is listed more than once in secondary_techs.scenarios"
            );
        }
        ensure!(
            self.olade.growth_rate.is_finite() && self.olade.growth_rate > -100.0,
            "secondary_techs.olade.growth_rate must be a percentage greater than -100"
        );

        Ok(())
    }
}

/// The contents of the run configuration file
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// The solver used for every scenario
    pub solver: SolverKind,
    /// Number of threads CPLEX may use
    #[serde(default = "default_threads")]
    #[serde(deserialize_with = "deserialise_nonzero")]
    pub cplex_threads: u32,
    /// Number of threads Gurobi may use
    #[serde(default = "default_threads")]
    #[serde(deserialize_with = "deserialise_nonzero")]
    pub gurobi_threads: u32,
    /// Random seed for CBC
    #[serde(default = "default_seed")]
    pub cbc_random_seed: u32,
    /// Random seed for CPLEX
    #[serde(default = "default_seed")]
    pub cplex_random_seed: u32,
    /// Random seed for Gurobi
    #[serde(default = "default_seed")]
    pub gurobi_seed: u32,
    /// Time limit for each solve, in seconds
    pub time_limit: Option<u32>,
    /// Whether to add annualised capital investment to the combined output
    #[serde(default)]
    pub annualize_capital: bool,
    /// Prefix of the output file names
    #[serde(default = "default_output_prefix")]
    pub output_prefix: String,
    /// Folder the output files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// The OSeMOSYS model and scenario folders
    #[serde(default)]
    pub model: ModelConfig,
    /// The execution environment
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// The pipeline definition
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Capital annualisation parameters
    #[serde(default)]
    pub annualization: AnnualizationConfig,
    /// Secondary-Techs editing
    #[serde(default)]
    pub secondary_techs: TechsConfig,
    /// The folder containing the configuration file
    #[serde(skip)]
    pub project_dir: PathBuf,
}

impl RunConfig {
    /// Read and validate a run configuration file.
    ///
    /// Relative paths in the file are resolved against the folder containing it.
    pub fn from_path(file_path: &Path) -> Result<RunConfig> {
        let mut config: RunConfig = read_toml(file_path)?;
        config.project_dir = project_dir_of(file_path);
        config.validate().with_context(|| input_err_msg(file_path))?;

        Ok(config)
    }

    /// Check values which can't be checked while deserialising
    fn validate(&self) -> Result<()> {
        check_output_prefix(&self.output_prefix)?;

        if let Some(limit) = self.time_limit {
            ensure!(limit > 0, "time_limit must be greater than zero");
        }

        check_annualization(&self.annualization)?;
        self.secondary_techs.validate()?;

        ensure!(
            !self.pipeline.date_placeholder.is_empty(),
            "pipeline.date_placeholder must not be empty"
        );

        Ok(())
    }

    /// The options passed to the configured solver
    pub fn solver_options(&self) -> SolverOptions {
        let (threads, seed) = match self.solver {
            SolverKind::Glpk => (None, None),
            SolverKind::Cbc => (None, Some(self.cbc_random_seed)),
            SolverKind::Cplex => (Some(self.cplex_threads), Some(self.cplex_random_seed)),
            SolverKind::Gurobi => (Some(self.gurobi_threads), Some(self.gurobi_seed)),
        };

        SolverOptions {
            threads,
            seed,
            time_limit: self.time_limit,
        }
    }

    /// Resolve a path from the configuration file against the project folder
    pub fn resolve(&self, path: &Path) -> PathBuf {
        resolve_path(&self.project_dir, path)
    }

    /// The folder holding run state (logs, the run lock, environment stamps)
    pub fn state_dir(&self) -> PathBuf {
        self.project_dir.join(STATE_DIR_NAME)
    }

    /// The folder log files and run metadata are written to
    pub fn log_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }
}

/// The folder which relative paths in a configuration file are resolved against
fn project_dir_of(file_path: &Path) -> PathBuf {
    match file_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Check that the output prefix can be used in a file name
fn check_output_prefix(prefix: &str) -> Result<()> {
    ensure!(!prefix.trim().is_empty(), "output_prefix must not be empty");
    ensure!(
        !prefix.contains(['/', '\\']),
        "output_prefix must not contain path separators"
    );

    Ok(())
}

/// Check the annualisation parameters
fn check_annualization(params: &AnnualizationConfig) -> Result<()> {
    ensure!(
        params.discount_rate.is_finite() && params.discount_rate >= 0.0,
        "annualization.discount_rate must be a finite number which is not negative"
    );
    ensure!(
        params.asset_lifetime > 0,
        "annualization.asset_lifetime must be greater than zero"
    );

    Ok(())
}

/// Only the Secondary-Techs part of a configuration file.
///
/// The `techs` commands don't need a solver, so this is read leniently.
#[derive(Debug, Default, Deserialize)]
struct TechsConfigFile {
    #[serde(default)]
    secondary_techs: TechsConfig,
}

/// Read the Secondary-Techs settings from a configuration file.
///
/// Defaults are used if the file doesn't exist. Returns the settings and the project folder.
pub fn load_techs_config(file_path: &Path) -> Result<(TechsConfig, PathBuf)> {
    let project_dir = project_dir_of(file_path);
    if !file_path.is_file() {
        return Ok((TechsConfig::default(), project_dir));
    }

    let file: TechsConfigFile = read_toml(file_path)?;
    file.secondary_techs
        .validate()
        .with_context(|| input_err_msg(file_path))?;

    Ok((file.secondary_techs, project_dir))
}
