//! The module responsible for writing the run's artifacts to disk.
use crate::error::RunError;
use crate::scenario::AggregatedTables;
use crate::table::Table;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use strum::{EnumIter, IntoEnumIterator};
use tempfile::NamedTempFile;

pub mod metadata;

/// The kinds of table written at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, strum::Display)]
pub enum ArtifactKind {
    /// The inputs of every scenario
    #[strum(serialize = "Inputs")]
    Inputs,
    /// The results of every scenario
    #[strum(serialize = "Outputs")]
    Outputs,
    /// Inputs followed by results
    #[strum(serialize = "Combined_Inputs_Outputs")]
    Combined,
}

impl ArtifactKind {
    fn table(self, tables: &AggregatedTables) -> &Table {
        match self {
            Self::Inputs => &tables.inputs,
            Self::Outputs => &tables.outputs,
            Self::Combined => &tables.combined,
        }
    }
}

/// The file name of an artifact.
///
/// With a date, this is the dated copy (`<prefix>_<kind>_<YYYY-MM-DD>.csv`); without, it is the
/// "latest" copy (`<prefix>_<kind>.csv`).
pub fn artifact_file_name(prefix: &str, kind: ArtifactKind, date: Option<NaiveDate>) -> String {
    match date {
        Some(date) => format!("{prefix}_{kind}_{}.csv", date.format("%Y-%m-%d")),
        None => format!("{prefix}_{kind}.csv"),
    }
}

/// Create the output directory if it doesn't exist
pub fn create_output_directory(output_dir: &Path) -> Result<()> {
    if output_dir.is_dir() {
        // already exists
        return Ok(());
    }

    fs::create_dir_all(output_dir).map_err(|err| write_error(err, output_dir))?;

    Ok(())
}

/// Turn an IO error into a [`RunError::OutputPermission`] if that's what it is
fn write_error(err: io::Error, path: &Path) -> anyhow::Error {
    if err.kind() == io::ErrorKind::PermissionDenied {
        RunError::OutputPermission {
            path: path.to_path_buf(),
        }
        .into()
    } else {
        anyhow::Error::new(err).context(format!("Failed to write {}", path.display()))
    }
}

/// Write `contents` to `path` by way of a temporary file in the same folder.
///
/// The file at `path` is either left as it was or replaced completely.
fn write_atomically(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut file = NamedTempFile::new_in(dir).map_err(|err| write_error(err, path))?;
    file.write_all(contents)
        .and_then(|()| file.flush())
        .map_err(|err| write_error(err, path))?;
    file.persist(path).map_err(|err| write_error(err.error, path))?;

    Ok(())
}

/// Write the dated and latest copies of every artifact.
///
/// Files for other dates are never touched.
///
/// # Returns
///
/// The paths written, in order.
pub fn write_artifacts(
    output_dir: &Path,
    prefix: &str,
    date: NaiveDate,
    tables: &AggregatedTables,
) -> Result<Vec<PathBuf>> {
    create_output_directory(output_dir)?;

    let mut written = Vec::new();
    for kind in ArtifactKind::iter() {
        let contents = kind
            .table(tables)
            .to_csv_bytes()
            .with_context(|| format!("Failed to serialise the {kind} table"))?;

        for file_date in [Some(date), None] {
            let path = output_dir.join(artifact_file_name(prefix, kind, file_date));
            write_atomically(&path, &contents)?;
            info!("Wrote {}", path.display());
            written.push(path);
        }
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rstest::rstest;
    use tempfile::tempdir;

    fn tables() -> AggregatedTables {
        let mut inputs = Table::new(vec!["Future".into(), "Scenario".into(), "CapitalCost".into()]);
        inputs.push_row(vec!["0".into(), "BAU".into(), "10".into()]);
        let mut outputs = Table::new(vec!["Future".into(), "Scenario".into(), "Demand".into()]);
        outputs.push_row(vec!["0".into(), "BAU".into(), "5".into()]);
        let combined = Table::concat([&inputs, &outputs]);
        AggregatedTables {
            inputs,
            outputs,
            combined,
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    #[rstest]
    #[case(ArtifactKind::Inputs, None, "RELAC_TX_Inputs.csv")]
    #[case(ArtifactKind::Outputs, Some(date(1)), "RELAC_TX_Outputs_2025-06-01.csv")]
    #[case(
        ArtifactKind::Combined,
        Some(date(30)),
        "RELAC_TX_Combined_Inputs_Outputs_2025-06-30.csv"
    )]
    fn test_artifact_file_name(
        #[case] kind: ArtifactKind,
        #[case] date: Option<NaiveDate>,
        #[case] expected: &str,
    ) {
        assert_eq!(artifact_file_name("RELAC_TX", kind, date), expected);
    }

    #[test]
    fn test_write_artifacts() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("results");
        let written = write_artifacts(&out, "RELAC_TX", date(2), &tables()).unwrap();
        assert_eq!(written.len(), 6);

        let names = fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .sorted()
            .collect_vec();
        assert_eq!(
            names,
            [
                "RELAC_TX_Combined_Inputs_Outputs.csv",
                "RELAC_TX_Combined_Inputs_Outputs_2025-06-02.csv",
                "RELAC_TX_Inputs.csv",
                "RELAC_TX_Inputs_2025-06-02.csv",
                "RELAC_TX_Outputs.csv",
                "RELAC_TX_Outputs_2025-06-02.csv",
            ]
        );

        for kind in ArtifactKind::iter() {
            let latest = fs::read(out.join(artifact_file_name("RELAC_TX", kind, None))).unwrap();
            let dated =
                fs::read(out.join(artifact_file_name("RELAC_TX", kind, Some(date(2))))).unwrap();
            assert_eq!(latest, dated);
        }
        assert_eq!(
            fs::read_to_string(out.join("RELAC_TX_Inputs.csv")).unwrap(),
            "Future,Scenario,CapitalCost\n0,BAU,10\n"
        );
    }

    #[test]
    fn test_write_artifacts_keeps_other_dates() {
        let dir = tempdir().unwrap();
        let old = dir.path().join(artifact_file_name("P", ArtifactKind::Inputs, Some(date(1))));
        fs::write(&old, "old").unwrap();

        write_artifacts(dir.path(), "P", date(2), &tables()).unwrap();
        assert_eq!(fs::read_to_string(&old).unwrap(), "old");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 7);
    }

    #[test]
    fn test_write_error_permission() {
        let err = write_error(
            io::Error::from(io::ErrorKind::PermissionDenied),
            Path::new("/out/P_Inputs.csv"),
        );
        assert!(matches!(
            err.downcast_ref::<RunError>(),
            Some(RunError::OutputPermission { .. })
        ));
    }
}
