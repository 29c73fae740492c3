//! Annualising capital investment in the combined output table.
use crate::table::Table;
use anyhow::Result;
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::HashMap;

/// The column holding the capital investment made in each year
pub const CAPITAL_COLUMN: &str = "CapitalInvestment";

/// The column added to hold the annualised investment
pub const ANNUALIZED_COLUMN: &str = "CapitalInvestmentAnnualized";

/// Columns which identify a series of investments in the same asset type
const GROUPING_COLUMNS: [&str; 4] = ["Future", "Scenario", "REGION", "TECHNOLOGY"];

/// Calculates the capital recovery factor (CRF) for a given lifetime and discount rate.
///
/// The CRF converts an upfront investment into equal annual payments over the lifetime of an
/// asset.
pub fn capital_recovery_factor(lifetime: u32, discount_rate: f64) -> f64 {
    if lifetime == 0 {
        return 0.0;
    }
    if discount_rate == 0.0 {
        return 1.0 / lifetime as f64;
    }
    let factor = (1.0 + discount_rate).powi(lifetime as i32);
    (discount_rate * factor) / (factor - 1.0)
}

/// A row of a group, with its year and investment
struct GroupRow {
    row: usize,
    year: i64,
    amount: Option<f64>,
}

/// Add a column with annualised capital investment to `table`.
///
/// Rows are grouped by the scenario, region and technology columns. Each positive investment
/// made in year `y` adds `investment * CRF` to every year from `y` until the asset's lifetime
/// ends or the last year of the group, whichever is first. Every row of a group whose year falls
/// in a payment window gets the accumulated payment, whether or not the row has an investment of
/// its own, and empty investments count as zero. A group whose investments are all empty gets
/// empty annualised values.
pub fn annualise_capital(table: &mut Table, discount_rate: f64, lifetime: u32) -> Result<()> {
    let mut values = vec![String::new(); table.rows().len()];

    let Some(capital_idx) = table.column_index(CAPITAL_COLUMN) else {
        warn!("No {CAPITAL_COLUMN} column in the combined table; annualised values will be empty");
        return table.push_column(ANNUALIZED_COLUMN, values);
    };
    let year_idx = table.column_index("YEAR");
    let group_idx: Vec<usize> = GROUPING_COLUMNS
        .iter()
        .filter_map(|column| table.column_index(column))
        .collect();

    let mut groups: IndexMap<Vec<&str>, Vec<GroupRow>> = IndexMap::new();
    for (row_idx, row) in table.rows().iter().enumerate() {
        let Some(year) = year_idx.and_then(|idx| parse_year(&row[idx])) else {
            continue;
        };

        let key = group_idx.iter().map(|&idx| row[idx].as_str()).collect();
        groups.entry(key).or_default().push(GroupRow {
            row: row_idx,
            year,
            amount: row[capital_idx].trim().parse().ok(),
        });
    }

    let crf = capital_recovery_factor(lifetime, discount_rate);
    info!(
        "Annualising capital investment for {} groups (CRF = {crf:.6})",
        groups.len()
    );

    for rows in groups.values() {
        if rows.iter().all(|row| row.amount.is_none()) {
            continue;
        }

        let Some(last_year) = rows.iter().map(|row| row.year).max() else {
            continue;
        };
        let mut payments: HashMap<i64, f64> = HashMap::new();
        for row in rows {
            let amount = row.amount.unwrap_or(0.0);
            if amount <= 0.0 {
                continue;
            }
            let end = (row.year + i64::from(lifetime)).min(last_year + 1);
            for year in row.year..end {
                *payments.entry(year).or_insert(0.0) += amount * crf;
            }
        }

        for row in rows {
            let payment = payments.get(&row.year).copied().unwrap_or(0.0);
            values[row.row] = payment.to_string();
        }
    }

    table.push_column(ANNUALIZED_COLUMN, values)
}

/// Parse a year, which may be written as a float (e.g. `2030.0`)
fn parse_year(value: &str) -> Option<i64> {
    let value = value.trim();
    value.parse::<i64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|year| year.is_finite() && year.fract() == 0.0)
            .map(|year| year as i64)
    })
}
