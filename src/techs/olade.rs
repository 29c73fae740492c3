//! Projecting power plant residual capacity from OLADE installed capacity statistics.
//!
//! The data table has one row per OLADE technology and one column per country, in MW. Each
//! country's capacity in the reference year is grown by a fixed annual rate to give a
//! `ResidualCapacity` (GW) for every model year, which replaces whatever the template gives for
//! the power technologies of that country.
use super::apply::{EditOrigin, EditRow};
use crate::config::{ALL_SCENARIOS, OladeConfig};
use crate::input::resolve_path;
use crate::table::Table;
use anyhow::{Result, ensure};
use log::{info, warn};
use serde_string_enum::DeserializeLabeledStringEnum;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::Path;

/// The parameter filled in from OLADE data
pub const RESIDUAL_CAPACITY: &str = "ResidualCapacity";

const MW_PER_GW: f64 = 1000.0;

/// OLADE country names and their model codes
const COUNTRIES: [(&str, &str); 27] = [
    ("Argentina", "ARG"),
    ("Barbados", "BAR"),
    ("Belice", "BLZ"),
    ("Bolivia", "BOL"),
    ("Brasil", "BRA"),
    ("Chile", "CHI"),
    ("Colombia", "COL"),
    ("Costa Rica", "CRC"),
    ("Cuba", "CUB"),
    ("Ecuador", "ECU"),
    ("El Salvador", "SLV"),
    ("Grenada", "GRD"),
    ("Guatemala", "GTM"),
    ("Guyana", "GUY"),
    ("Haiti", "HTI"),
    ("Honduras", "HND"),
    ("Jamaica", "JAM"),
    ("México", "MEX"),
    ("Nicaragua", "NIC"),
    ("Panamá", "PAN"),
    ("Paraguay", "PRY"),
    ("Perú", "PER"),
    ("República Dominicana", "DOM"),
    ("Suriname", "SUR"),
    ("Trinidad & Tobago", "TTO"),
    ("Uruguay", "URY"),
    ("Venezuela", "VEN"),
];

/// OLADE technology names and the technology type they count towards.
///
/// Biogas and solid biomass are both counted as `BIO`.
const TECHNOLOGIES: [(&str, &str); 9] = [
    ("Nuclear", "URN"),
    ("Gas natural", "CCG"),
    ("Carbón mineral", "COA"),
    ("Hidro", "HYD"),
    ("Geotermia", "GEO"),
    ("Eólica", "WON"),
    ("Solar", "SPV"),
    ("Biogás", "BIO"),
    ("Biomasa sólida", "BIO"),
];

/// How the growth rate is applied to the reference year capacity
#[derive(DeserializeLabeledStringEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrowthType {
    /// `capacity * (1 + rate)^years`
    #[default]
    #[string = "compound"]
    Compound,
    /// `capacity * (1 + rate * years)`
    #[string = "simple"]
    Simple,
}

/// Installed capacity in GW, by country code and then technology type
pub type Capacities = BTreeMap<String, BTreeMap<String, f64>>;

fn country_code(name: &str) -> Option<&'static str> {
    COUNTRIES
        .iter()
        .find(|(country, _)| country.eq_ignore_ascii_case(name))
        .map(|(_, code)| *code)
}

fn tech_type(name: &str) -> Option<&'static str> {
    TECHNOLOGIES
        .iter()
        .find(|(tech, _)| tech.eq_ignore_ascii_case(name))
        .map(|(_, code)| *code)
}

/// Read an OLADE installed capacity table, converting MW to GW.
///
/// Unknown countries and technologies are ignored, as are blank or non-numeric cells.
pub fn read_capacities(path: &Path) -> Result<Capacities> {
    let table = Table::from_path(path)?;
    let countries: Vec<(usize, &str)> = table
        .header()
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(idx, name)| country_code(name.trim()).map(|code| (idx, code)))
        .collect();
    ensure!(
        !countries.is_empty(),
        "{} has no columns for known countries",
        path.display()
    );

    let mut capacities = Capacities::new();
    for row in table.rows() {
        let Some(tech) = row.first().and_then(|name| tech_type(name.trim())) else {
            continue;
        };
        for &(idx, country) in &countries {
            let Some(mw) = row.get(idx).and_then(|value| value.trim().parse::<f64>().ok()) else {
                continue;
            };
            *capacities
                .entry(country.to_string())
                .or_default()
                .entry(tech.to_string())
                .or_insert(0.0) += mw / MW_PER_GW;
        }
    }

    Ok(capacities)
}

/// The capacity in `year` given the capacity in `reference_year`.
///
/// `growth_rate` is a percentage. Years before the reference year shrink the capacity.
pub fn capacity_for_year(
    capacity: f64,
    reference_year: u32,
    year: u32,
    growth_rate: f64,
    growth_type: GrowthType,
) -> f64 {
    let years = f64::from(year) - f64::from(reference_year);
    let rate = growth_rate / 100.0;
    match growth_type {
        GrowthType::Compound => capacity * (1.0 + rate).powf(years),
        GrowthType::Simple => capacity + capacity * rate * years,
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One `ResidualCapacity` edit per country and technology type, covering every year
pub fn capacity_edits(
    capacities: &Capacities,
    config: &OladeConfig,
    years: &BTreeSet<u32>,
) -> Vec<EditRow> {
    let mut edits = Vec::new();
    for (country, techs) in capacities {
        for (tech, &capacity) in techs {
            let values = years
                .iter()
                .map(|&year| {
                    let value = capacity_for_year(
                        capacity,
                        config.reference_year,
                        year,
                        config.growth_rate,
                        config.growth_type,
                    );
                    (year, round_to_hundredths(value).to_string())
                })
                .collect();
            edits.push(EditRow {
                origin: EditOrigin::Olade,
                scenario: ALL_SCENARIOS.to_string(),
                country: country.clone(),
                tech_name: String::new(),
                tech: tech.clone(),
                parameter: RESIDUAL_CAPACITY.to_string(),
                values,
            });
        }
    }

    edits
}

/// Build the OLADE edits if enabled.
///
/// A missing or unreadable data file is reported and the template is applied without it.
pub fn load_capacity_edits(
    config: &OladeConfig,
    base_dir: &Path,
    years: &BTreeSet<u32>,
) -> Vec<EditRow> {
    if !config.enabled {
        return Vec::new();
    }

    let path = resolve_path(base_dir, &config.data_file);
    if !path.is_file() {
        warn!(
            "OLADE data file not found: {}. Continuing without OLADE data",
            path.display()
        );
        return Vec::new();
    }
    let capacities = match read_capacities(&path) {
        Ok(capacities) => capacities,
        Err(err) => {
            warn!("{err:#}. Continuing without OLADE data");
            return Vec::new();
        }
    };

    info!(
        "Projecting residual capacity for {} countries from {} ({}% {:?} growth from {})",
        capacities.len(),
        path.display(),
        config.growth_rate,
        config.growth_type,
        config.reference_year
    );

    capacity_edits(&capacities, config, years)
}

/// Whether a parameter file technology is the power plant of the given type in the given country
pub fn is_power_tech_of(tech: &str, tech_type: &str, country: &str) -> bool {
    let part = |range: Range<usize>| tech.get(range).unwrap_or_default();
    part(0..3).eq_ignore_ascii_case("PWR")
        && part(3..6).eq_ignore_ascii_case(tech_type)
        && part(6..9).eq_ignore_ascii_case(country)
}
