//! In-memory CSV tables used to assemble the output artifacts.
//!
//! Model outputs have a column layout which depends on which OSeMOSYS parameters a scenario
//! uses, so they are handled as ordered string columns rather than typed records.
use crate::input::input_err_msg;
use anyhow::{Context, Result, ensure};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use std::fs;
use std::path::Path;

/// The OSeMOSYS set columns, in the order in which they appear in output tables
pub const OSEMOSYS_SETS: [&str; 11] = [
    "REGION",
    "YEAR",
    "TECHNOLOGY",
    "FUEL",
    "EMISSION",
    "MODE_OF_OPERATION",
    "TIMESLICE",
    "STORAGE",
    "SEASON",
    "DAYTYPE",
    "DAILYTIMEBRACKET",
];

/// The column holding parameter values in OSeMOSYS CSV files
pub const VALUE_COLUMN: &str = "VALUE";

/// A CSV table with a header and rows of strings
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    /// Create an empty table with the given columns
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    /// Read a table from a CSV file.
    ///
    /// Short rows are padded with empty values.
    pub fn from_path(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .with_context(|| input_err_msg(path))?;
        let header: Vec<String> = reader
            .headers()
            .with_context(|| input_err_msg(path))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut table = Self::new(header);
        for record in reader.records() {
            let record = record.with_context(|| input_err_msg(path))?;
            let row = record.iter().map(ToString::to_string).collect();
            table.push_row(row);
        }

        Ok(table)
    }

    /// The column names
    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// The rows of the table
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Mutable access to the rows of the table
    pub fn rows_mut(&mut self) -> &mut [Vec<String>] {
        &mut self.rows
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Add a row, padding or truncating it to the width of the table
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.header.len(), String::new());
        self.rows.push(row);
    }

    /// Get the index of the named column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Get the value of a column in a row, if the column exists
    pub fn get<'a>(&self, row: &'a [String], column: &str) -> Option<&'a str> {
        self.column_index(column).map(|idx| row[idx].as_str())
    }

    /// Rename a column
    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(idx) = self.column_index(from) {
            self.header[idx] = to.to_string();
        }
    }

    /// Insert a column with the same value in every row
    pub fn insert_column(&mut self, position: usize, name: &str, value: &str) {
        self.header.insert(position, name.to_string());
        for row in &mut self.rows {
            row.insert(position, value.to_string());
        }
    }

    /// Append a column with the given values, one per row
    pub fn push_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        ensure!(
            values.len() == self.rows.len(),
            "Column {name} has {} values but the table has {} rows",
            values.len(),
            self.rows.len()
        );

        self.header.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }

        Ok(())
    }

    /// Rearrange the columns into the given order, dropping any which aren't listed
    pub fn select(&self, columns: &[String]) -> Self {
        let indexes = columns
            .iter()
            .map(|name| self.column_index(name))
            .collect_vec();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                indexes
                    .iter()
                    .map(|idx| idx.map(|idx| row[idx].clone()).unwrap_or_default())
                    .collect()
            })
            .collect();

        Self {
            header: columns.to_vec(),
            rows,
        }
    }

    /// Order columns with `front` first (those present, in the given order) and the rest sorted
    pub fn with_front_columns(&self, front: &[&str]) -> Self {
        let mut columns: Vec<String> = front
            .iter()
            .filter(|name| self.column_index(name).is_some())
            .map(ToString::to_string)
            .collect();
        let rest = self
            .header
            .iter()
            .filter(|name| !front.contains(&name.as_str()))
            .sorted()
            .cloned();
        columns.extend(rest);

        self.select(&columns)
    }

    /// Stack tables on top of each other over the union of their columns.
    ///
    /// Columns appear in the order they are first seen; missing values are left empty.
    pub fn concat<'a, I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a Table>,
    {
        let tables = tables.into_iter().collect_vec();
        let header: IndexSet<&String> = tables.iter().flat_map(|t| t.header.iter()).collect();
        let header = header.into_iter().cloned().collect_vec();

        let mut out = Self::new(header.clone());
        for table in tables {
            out.rows.extend(table.select(&header).rows);
        }

        out
    }

    /// Serialise the table as CSV
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        if !self.header.is_empty() {
            writer.write_record(&self.header)?;
        }
        for row in &self.rows {
            writer.write_record(row)?;
        }

        Ok(writer.into_inner()?)
    }

    /// Write the table to a CSV file
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_csv_bytes()?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Merge result tables on the OSeMOSYS set columns.
///
/// Each input is `(parameter name, table)` where the table has some set columns and a `VALUE`
/// column. The result has one row per distinct combination of set values and one column per
/// parameter; combinations missing from a parameter are left empty.
pub fn outer_merge_on_sets(tables: &[(String, Table)]) -> Table {
    let present_sets = OSEMOSYS_SETS
        .iter()
        .filter(|set| tables.iter().any(|(_, t)| t.column_index(set).is_some()))
        .map(ToString::to_string)
        .collect_vec();

    let mut merged: IndexMap<Vec<String>, IndexMap<&str, String>> = IndexMap::new();
    for (parameter, table) in tables {
        let Some(value_idx) = table.column_index(VALUE_COLUMN) else {
            continue;
        };
        let set_idx = present_sets
            .iter()
            .map(|set| table.column_index(set))
            .collect_vec();

        for row in &table.rows {
            let key = set_idx
                .iter()
                .map(|idx| idx.map(|idx| row[idx].clone()).unwrap_or_default())
                .collect_vec();
            merged
                .entry(key)
                .or_default()
                .insert(parameter.as_str(), row[value_idx].clone());
        }
    }

    let parameters = tables.iter().map(|(name, _)| name.clone()).collect_vec();
    let mut header = present_sets;
    header.extend(parameters.iter().cloned());

    let mut out = Table::new(header);
    for (key, values) in merged {
        let mut row = key;
        row.extend(
            parameters
                .iter()
                .map(|p| values.get(p.as_str()).cloned().unwrap_or_default()),
        );
        out.push_row(row);
    }

    out
}
