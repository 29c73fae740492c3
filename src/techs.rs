//! Editing Secondary-Techs parameters across scenarios.
//!
//! Each scenario has a parameter file with one row per technology and parameter, and one column
//! per year. [`template`] writes an editable template listing the valid choices, and [`apply`]
//! writes the edited values back into the parameter files.
use crate::config::{ALL_SCENARIOS, TechsConfig};
use crate::table::Table;
use anyhow::{Result, ensure};
use log::warn;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub mod apply;
pub mod olade;
pub mod template;

/// The value the provenance column is set to for edited rows
pub const PROVENANCE_SENTINEL: &str = "User defined";

/// The technology code column
pub const TECH_COLUMN: &str = "Tech";
/// The technology description column
pub const TECH_NAME_COLUMN: &str = "Tech.Name";
/// The parameter column
pub const PARAMETER_COLUMN: &str = "Parameter";
/// The provenance column
pub const PROJECTION_MODE_COLUMN: &str = "Projection.Mode";

/// The range of headers treated as year columns
const YEARS: std::ops::RangeInclusive<u32> = 2000..=2100;

/// Interpret a column header as a year
pub fn parse_year_header(header: &str) -> Option<u32> {
    let year: u32 = header.trim().parse().ok()?;
    YEARS.contains(&year).then_some(year)
}

/// The country code embedded in a power technology code (characters 7-9 of `PWR...`)
pub fn country_of(tech: &str) -> Option<&str> {
    if tech.starts_with("PWR") {
        tech.get(6..9)
    } else {
        None
    }
}

/// The parameter file for one scenario
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterFile {
    /// The scenario the file belongs to
    pub scenario: String,
    /// Where the file lives
    pub path: PathBuf,
    /// The contents of the file
    pub table: Table,
}

impl ParameterFile {
    /// Read a parameter file, checking it has the columns needed to match rows
    pub fn load(scenario: &str, path: &Path) -> Result<Self> {
        let table = Table::from_path(path)?;
        for column in [TECH_COLUMN, PARAMETER_COLUMN] {
            ensure!(
                table.column_index(column).is_some(),
                "{} has no {column} column",
                path.display()
            );
        }

        Ok(Self {
            scenario: scenario.to_string(),
            path: path.to_path_buf(),
            table,
        })
    }

    /// The year columns of the file, as `(column index, year)`
    pub fn year_columns(&self) -> Vec<(usize, u32)> {
        self.table
            .header()
            .iter()
            .enumerate()
            .filter_map(|(idx, header)| parse_year_header(header).map(|year| (idx, year)))
            .collect()
    }
}

/// Load the parameter file of every configured scenario.
///
/// Scenarios without a parameter file are skipped with a warning.
pub fn load_parameter_files(config: &TechsConfig, base_dir: &Path) -> Result<Vec<ParameterFile>> {
    let mut files = Vec::new();
    for scenario in &config.scenarios {
        let path = config.scenario_file(base_dir, scenario);
        if !path.is_file() {
            warn!(
                "Parameter file for scenario {scenario} not found: {}",
                path.display()
            );
            continue;
        }
        files.push(ParameterFile::load(scenario, &path)?);
    }

    ensure!(
        !files.is_empty(),
        "No Secondary-Techs parameter files found in {}",
        base_dir.display()
    );

    Ok(files)
}

/// The values which may be entered in the template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enumerations {
    /// Scenario names which have a parameter file
    pub scenarios: Vec<String>,
    /// Country codes
    pub countries: BTreeSet<String>,
    /// Technology descriptions, mapped to their codes
    pub tech_names: BTreeMap<String, String>,
    /// Technology codes
    pub techs: BTreeSet<String>,
    /// Parameters
    pub parameters: BTreeSet<String>,
    /// Years
    pub years: BTreeSet<u32>,
}

impl Enumerations {
    /// Collect the valid values from the parameter files
    pub fn collect(files: &[ParameterFile]) -> Self {
        let mut enums = Self::default();
        for file in files {
            enums.scenarios.push(file.scenario.clone());
            enums
                .years
                .extend(file.year_columns().into_iter().map(|(_, year)| year));

            let table = &file.table;
            for row in table.rows() {
                let tech = table.get(row, TECH_COLUMN).unwrap_or_default().trim();
                let parameter = table.get(row, PARAMETER_COLUMN).unwrap_or_default().trim();
                if tech.is_empty() {
                    continue;
                }

                enums.techs.insert(tech.to_string());
                if let Some(country) = country_of(tech) {
                    enums.countries.insert(country.to_string());
                }
                if !parameter.is_empty() {
                    enums.parameters.insert(parameter.to_string());
                }
                if let Some(name) = table.get(row, TECH_NAME_COLUMN).map(str::trim)
                    && !name.is_empty()
                {
                    enums
                        .tech_names
                        .entry(name.to_string())
                        .or_insert_with(|| tech.to_string());
                }
            }
        }

        enums
    }

    /// The scenario choices, including the wildcard
    pub fn scenario_choices(&self) -> Vec<String> {
        let mut choices = self.scenarios.clone();
        choices.sort();
        choices.push(ALL_SCENARIOS.to_string());
        choices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::write_csv;
    use map_macro::btree_set;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    #[rstest]
    #[case("2030", Some(2030))]
    #[case(" 2000 ", Some(2000))]
    #[case("2100", Some(2100))]
    #[case("1999", None)]
    #[case("2101", None)]
    #[case("Tech", None)]
    fn test_parse_year_header(#[case] header: &str, #[case] expected: Option<u32>) {
        assert_eq!(parse_year_header(header), expected);
    }

    #[rstest]
    #[case("PWRSOLARG01", Some("ARG"))]
    #[case("PWRSOLCHI", Some("CHI"))]
    #[case("PWRSOL", None)]
    #[case("TRNELCARG01", None)]
    fn test_country_of(#[case] tech: &str, #[case] expected: Option<&str>) {
        assert_eq!(country_of(tech), expected);
    }

    #[test]
    fn test_collect_enumerations() {
        let dir = tempdir().unwrap();
        let config = TechsConfig {
            scenarios: vec!["BAU".into(), "NDC".into(), "MISSING".into()],
            ..Default::default()
        };
        for scenario in ["BAU", "NDC"] {
            let path = config.scenario_file(dir.path(), scenario);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            write_csv(
                &path,
                &["Tech.Id", "Tech", "Tech.Name", "Parameter", "Projection.Mode", "2025", "2030"],
                &[
                    &["1", "PWRSOLARG01", "Solar ARG", "CapitalCost", "Flat", "1", "2"],
                    &["2", "PWRWNDCHI01", "Wind CHI", "FixedCost", "Flat", "3", "4"],
                    &["3", "MINCOA", "Coal mining", "CapitalCost", "Flat", "5", "6"],
                ],
            );
        }

        let files = load_parameter_files(&config, dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].year_columns(), [(5, 2025), (6, 2030)]);

        let enums = Enumerations::collect(&files);
        assert_eq!(enums.scenarios, ["BAU", "NDC"]);
        assert_eq!(enums.scenario_choices(), ["BAU", "NDC", "ALL"]);
        assert_eq!(
            enums.countries.iter().map(String::as_str).collect::<BTreeSet<_>>(),
            btree_set! {"ARG", "CHI"}
        );
        assert_eq!(enums.tech_names["Coal mining"], "MINCOA");
        assert_eq!(enums.parameters.len(), 2);
        assert_eq!(enums.years.iter().copied().collect::<Vec<_>>(), [2025, 2030]);
    }

    #[test]
    fn test_load_parameter_files_none_found() {
        let dir = tempdir().unwrap();
        assert!(load_parameter_files(&TechsConfig::default(), dir.path()).is_err());
    }
}
