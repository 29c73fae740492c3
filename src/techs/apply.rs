//! Applying an edited template to the Secondary-Techs parameter files.
use super::olade::{RESIDUAL_CAPACITY, is_power_tech_of, load_capacity_edits};
use super::template::TEMPLATE_COLUMNS;
use super::{
    Enumerations, PARAMETER_COLUMN, PROJECTION_MODE_COLUMN, PROVENANCE_SENTINEL, ParameterFile,
    TECH_COLUMN, country_of, load_parameter_files, parse_year_header,
};
use crate::config::{ALL_SCENARIOS, TechsConfig};
use anyhow::{Context, Result, anyhow, ensure};
use itertools::Itertools;
use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// The outcome of one edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EditStatus {
    /// The values were written
    Applied,
    /// The row was rejected before anything was changed
    Invalid,
    /// The row was valid but had no matching row in a scenario
    Failed,
    /// The row was replaced by OLADE data
    Skipped,
}

/// One row of the update log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Where the edit came from
    pub row: String,
    /// The scenario the entry refers to
    pub scenario: String,
    /// The technology code
    pub tech: String,
    /// The parameter
    pub parameter: String,
    /// What happened
    pub status: EditStatus,
    /// Details
    pub message: String,
}

/// Where an edit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum EditOrigin {
    /// A line of the template (the header is line 1)
    #[display("{_0}")]
    Line(usize),
    /// Projected from OLADE installed capacity
    #[display("OLADE")]
    Olade,
}

/// One row of the edited template, or a residual capacity projected from OLADE data
#[derive(Debug, Clone, PartialEq)]
pub struct EditRow {
    /// Where the edit came from
    pub origin: EditOrigin,
    /// Scenario name, or `ALL`
    pub scenario: String,
    /// Country code
    pub country: String,
    /// Technology description
    pub tech_name: String,
    /// Technology code
    pub tech: String,
    /// Parameter
    pub parameter: String,
    /// The values entered, as `(year, value)`
    pub values: Vec<(u32, String)>,
}

impl EditRow {
    /// Whether the rows to update are found by technology type and country rather than code
    fn matches_by_type(&self) -> bool {
        self.origin == EditOrigin::Olade
    }

    /// Whether OLADE data, when present, replaces this edit
    fn is_power_capacity(&self) -> bool {
        self.parameter == RESIDUAL_CAPACITY && self.tech.starts_with("PWR")
    }

    fn log(&self, scenario: &str, status: EditStatus, message: String) -> LogEntry {
        LogEntry {
            row: self.origin.to_string(),
            scenario: scenario.to_string(),
            tech: self.tech.clone(),
            parameter: self.parameter.clone(),
            status,
            message,
        }
    }
}

/// What [`apply_edits`] did
#[derive(Debug, Clone, PartialEq)]
pub struct ApplySummary {
    /// One entry per edit and scenario
    pub entries: Vec<LogEntry>,
    /// The parameter files which were changed
    pub changed_files: Vec<PathBuf>,
    /// The backups made of the changed files
    pub backups: Vec<PathBuf>,
    /// Where the log was written
    pub log_path: PathBuf,
}

impl ApplySummary {
    /// The number of entries with the given status
    pub fn count(&self, status: EditStatus) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }

    /// Whether every edit was applied or replaced by OLADE data
    pub fn is_success(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| matches!(entry.status, EditStatus::Applied | EditStatus::Skipped))
    }
}

/// Read the rows of an edited template.
///
/// Rows with nothing in the identifying columns, or no year values, are skipped. A missing
/// technology code is filled in from the technology description.
pub fn read_edits(path: &Path, enums: &Enumerations) -> Result<Vec<EditRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open template {}", path.display()))?;
    let header = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect_vec();

    let mut fixed = [0; TEMPLATE_COLUMNS.len()];
    for (idx, column) in TEMPLATE_COLUMNS.iter().enumerate() {
        fixed[idx] = header
            .iter()
            .position(|h| h == column)
            .with_context(|| format!("Template {} has no {column} column", path.display()))?;
    }
    let year_columns = header
        .iter()
        .enumerate()
        .filter_map(|(idx, h)| parse_year_header(h).map(|year| (idx, year)))
        .collect_vec();

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let line = idx + 2;
        let record = record.with_context(|| format!("Failed to read line {line} of template"))?;
        let field = |col: usize| record.get(col).unwrap_or_default().trim().to_string();
        let [scenario, country, tech_name, mut tech, parameter] = fixed.map(field);

        let values = year_columns
            .iter()
            .map(|&(col, year)| (year, field(col)))
            .filter(|(_, value)| !value.is_empty())
            .collect_vec();
        let identified = [&scenario, &country, &tech_name, &tech, &parameter]
            .iter()
            .any(|value| !value.is_empty());
        if !identified || values.is_empty() {
            continue;
        }

        if tech.is_empty()
            && let Some(code) = enums.tech_names.get(&tech_name)
        {
            tech.clone_from(code);
        }

        rows.push(EditRow {
            origin: EditOrigin::Line(line),
            scenario,
            country,
            tech_name,
            tech,
            parameter,
            values,
        });
    }

    Ok(rows)
}

/// Check an edit against the valid choices
pub fn validate_edit(edit: &EditRow, enums: &Enumerations) -> Result<()> {
    ensure!(!edit.scenario.is_empty(), "Scenario is empty");
    ensure!(!edit.country.is_empty(), "Country is empty");
    ensure!(!edit.tech.is_empty(), "Tech is empty");
    ensure!(!edit.parameter.is_empty(), "Parameter is empty");

    ensure!(
        edit.scenario == ALL_SCENARIOS || enums.scenarios.contains(&edit.scenario),
        "Invalid scenario '{}'. Must be one of: {}",
        edit.scenario,
        enums.scenario_choices().join(", ")
    );
    ensure!(
        enums.countries.contains(&edit.country),
        "Invalid country '{}'",
        edit.country
    );
    ensure!(enums.techs.contains(&edit.tech), "Invalid tech '{}'", edit.tech);
    ensure!(
        enums.parameters.contains(&edit.parameter),
        "Invalid parameter '{}'",
        edit.parameter
    );

    if edit.tech.starts_with("PWR") {
        let code = country_of(&edit.tech).with_context(|| {
            format!(
                "Tech '{}' is too short to contain a country code",
                edit.tech
            )
        })?;
        ensure!(
            code == edit.country,
            "Tech '{}' contains country code '{code}', but '{}' was specified",
            edit.tech,
            edit.country
        );
    }

    for (year, value) in &edit.values {
        ensure!(enums.years.contains(year), "Invalid year column '{year}'");
        ensure!(
            value.parse::<f64>().is_ok(),
            "Value '{value}' for {year} is not a number"
        );
    }

    Ok(())
}

/// Write an edit's values into one parameter file.
///
/// Every row matching the technology and parameter is updated. OLADE edits match every power
/// technology of their type and country, and only fill in the years the file has.
fn apply_edit(file: &mut ParameterFile, edit: &EditRow) -> Result<usize> {
    let table = &mut file.table;
    let tech_col = table.column_index(TECH_COLUMN).context("No Tech column")?;
    let param_col = table
        .column_index(PARAMETER_COLUMN)
        .context("No Parameter column")?;
    let mode_col = table.column_index(PROJECTION_MODE_COLUMN);

    let mut value_cols = Vec::with_capacity(edit.values.len());
    for (year, value) in &edit.values {
        let col = table
            .header()
            .iter()
            .position(|h| parse_year_header(h) == Some(*year));
        match col {
            Some(col) => value_cols.push((col, value)),
            None if edit.matches_by_type() => {}
            None => Err(anyhow!("No column for {year}"))?,
        }
    }

    let matches = |tech: &str| {
        if edit.matches_by_type() {
            is_power_tech_of(tech, &edit.tech, &edit.country)
        } else {
            tech == edit.tech
        }
    };
    let mut matched = 0;
    for row in table.rows_mut() {
        if !matches(row[tech_col].trim()) || row[param_col].trim() != edit.parameter {
            continue;
        }
        for (col, value) in &value_cols {
            row[*col].clone_from(value);
        }
        if let Some(col) = mode_col {
            row[col] = PROVENANCE_SENTINEL.to_string();
        }
        matched += 1;
    }

    if edit.matches_by_type() {
        ensure!(
            matched > 0,
            "No row for tech type '{}' in country '{}' and parameter '{}'",
            edit.tech,
            edit.country,
            edit.parameter
        );
    } else {
        ensure!(
            matched > 0,
            "No row for tech '{}' and parameter '{}'",
            edit.tech,
            edit.parameter
        );
    }

    Ok(matched)
}

/// The path a parameter file is backed up to before it is changed
fn backup_path(path: &Path, timestamp: &str) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_backup_{timestamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_backup_{timestamp}"),
    };
    path.with_file_name(name)
}

/// Write the update log
fn write_log(path: &Path, entries: &[LogEntry]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create log {}", path.display()))?;
    if entries.is_empty() {
        writer.write_record(["row", "scenario", "tech", "parameter", "status", "message"])?;
    }
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;

    Ok(())
}

/// Apply an edited template to the parameter files of every scenario.
///
/// Each valid row is applied to its scenario, or to every scenario for `ALL`. When OLADE data is
/// enabled and available, its projected residual capacities are applied to every scenario and
/// template rows giving power plant residual capacity are skipped. Parameter files are backed
/// up before being changed and an update log is written to `base_dir` whatever the outcome.
///
/// # Arguments
///
/// * `config` - Where the parameter files are
/// * `base_dir` - The folder containing the scenario folders
/// * `editor_path` - The edited template
/// * `timestamp` - Used to name the backups and log
pub fn apply_edits(
    config: &TechsConfig,
    base_dir: &Path,
    editor_path: &Path,
    timestamp: &str,
) -> Result<ApplySummary> {
    let mut files = load_parameter_files(config, base_dir)?;
    let enums = Enumerations::collect(&files);
    let mut edits = read_edits(editor_path, &enums)?;
    info!(
        "Read {} edits from {}",
        edits.len(),
        editor_path.display()
    );

    let mut entries = Vec::new();
    let olade = load_capacity_edits(&config.olade, base_dir, &enums.years);
    if !olade.is_empty() {
        let (replaced, kept): (Vec<_>, Vec<_>) =
            edits.into_iter().partition(EditRow::is_power_capacity);
        for edit in &replaced {
            info!(
                "Row {}: residual capacity taken from OLADE data instead",
                edit.origin
            );
            entries.push(edit.log(
                &edit.scenario,
                EditStatus::Skipped,
                "Replaced by OLADE data".to_string(),
            ));
        }
        edits = kept;
        edits.extend(olade);
    }

    let mut changed = vec![false; files.len()];
    for edit in &edits {
        let validated = if edit.matches_by_type() {
            Ok(())
        } else {
            validate_edit(edit, &enums)
        };
        if let Err(err) = validated {
            warn!("Row {}: {err}", edit.origin);
            entries.push(edit.log(&edit.scenario, EditStatus::Invalid, err.to_string()));
            continue;
        }

        for (file, changed) in files.iter_mut().zip(changed.iter_mut()) {
            if edit.scenario != ALL_SCENARIOS && edit.scenario != file.scenario {
                continue;
            }

            let scenario = file.scenario.clone();
            match apply_edit(file, edit) {
                Ok(rows) => {
                    *changed = true;
                    entries.push(edit.log(
                        &scenario,
                        EditStatus::Applied,
                        format!("Updated {rows} row(s)"),
                    ));
                }
                Err(err) => {
                    warn!("Row {} in scenario {scenario}: {err}", edit.origin);
                    entries.push(edit.log(&scenario, EditStatus::Failed, err.to_string()));
                }
            }
        }
    }

    let mut summary = ApplySummary {
        entries,
        changed_files: Vec::new(),
        backups: Vec::new(),
        log_path: base_dir.join(format!("secondary_techs_update_log_{timestamp}.csv")),
    };
    for (file, _) in files.iter().zip(changed).filter(|(_, changed)| *changed) {
        let backup = backup_path(&file.path, timestamp);
        fs::copy(&file.path, &backup)
            .with_context(|| format!("Failed to back up {}", file.path.display()))?;
        file.table.write_to(&file.path)?;
        info!(
            "Updated {} (backup: {})",
            file.path.display(),
            backup.display()
        );
        summary.changed_files.push(file.path.clone());
        summary.backups.push(backup);
    }

    write_log(&summary.log_path, &summary.entries)?;
    info!("Wrote update log {}", summary.log_path.display());

    Ok(summary)
}
