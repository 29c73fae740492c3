//! Common routines for handling input data.
use anyhow::{Context, Result};
use serde::de::{Deserialize, DeserializeOwned, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};

/// Format an error message to include the file path. To be used with `anyhow::Context`.
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().display())
}

/// Parse a TOML file at the specified path.
///
/// # Arguments
///
/// * `file_path` - Path to the TOML file
///
/// # Returns
///
/// * The deserialised TOML data or an error if the file could not be read or parsed.
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let toml_str = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let toml_data = toml::from_str(&toml_str).with_context(|| input_err_msg(file_path))?;
    Ok(toml_data)
}

/// Parse a YAML file at the specified path.
///
/// Used for the files owned by external tools (the conda environment file and the pipeline
/// definition).
pub fn read_yaml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let yaml_str = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    let yaml_data = serde_yaml::from_str(&yaml_str).with_context(|| input_err_msg(file_path))?;
    Ok(yaml_data)
}

/// Resolve `path` relative to `base_dir`.
///
/// Absolute paths are passed through unchanged.
pub fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    // NB: If the path argument to join is absolute, it is passed through
    base_dir.join(path)
}

/// Read a `u32`, checking that it is greater than zero
pub fn deserialise_nonzero<'de, D>(deserialiser: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = u32::deserialize(deserialiser)?;
    if value == 0 {
        Err(serde::de::Error::custom("Value must be greater than zero"))?;
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Record {
        name: String,
        #[serde(deserialize_with = "deserialise_nonzero")]
        threads: u32,
    }

    #[test]
    fn test_read_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.toml");
        {
            let mut file = File::create(&file_path).unwrap();
            writeln!(file, "name = \"cbc\"\nthreads = 4").unwrap();
        }

        assert_eq!(
            read_toml::<Record>(&file_path).unwrap(),
            Record {
                name: "cbc".to_string(),
                threads: 4
            }
        );
    }

    #[test]
    fn test_read_toml_zero_rejected() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.toml");
        fs::write(&file_path, "name = \"cbc\"\nthreads = 0\n").unwrap();

        let err = read_toml::<Record>(&file_path).unwrap_err();
        assert_eq!(err.to_string(), input_err_msg(&file_path));
        assert!(format!("{err:?}").contains("Value must be greater than zero"));
    }

    #[test]
    fn test_read_yaml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test.yaml");
        fs::write(&file_path, "name: glpk\nthreads: 2\n").unwrap();

        assert_eq!(
            read_yaml::<Record>(&file_path).unwrap(),
            Record {
                name: "glpk".to_string(),
                threads: 2
            }
        );
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("missing.toml");
        assert_eq!(
            read_toml::<Record>(&file_path).unwrap_err().to_string(),
            input_err_msg(&file_path)
        );
    }

    #[test]
    fn test_resolve_path() {
        let base = Path::new("/project");
        assert_eq!(
            resolve_path(base, Path::new("dvc.yaml")),
            PathBuf::from("/project/dvc.yaml")
        );
        assert_eq!(
            resolve_path(base, Path::new("/elsewhere/dvc.yaml")),
            PathBuf::from("/elsewhere/dvc.yaml")
        );
    }
}
