//! Generating the Secondary-Techs editing template.
use super::{Enumerations, load_parameter_files};
use crate::config::TechsConfig;
use anyhow::{Context, Result, ensure};
use csv::Writer;
use log::info;
use std::fs;
use std::path::{Path, PathBuf};

/// The name of the file listing the valid choices for each template column
pub const CHOICES_FILE_NAME: &str = "Secondary_Techs_Choices.csv";

/// The fixed columns of the template, before the year columns
pub const TEMPLATE_COLUMNS: [&str; 5] = ["Scenario", "Country", "Tech.Name", "Tech", "Parameter"];

/// The files written by [`generate_template`]
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateFiles {
    /// The (empty) editing template
    pub editor: PathBuf,
    /// The valid choices for the template's columns
    pub choices: PathBuf,
}

/// Write the editing template and the list of valid choices into `base_dir`.
///
/// Existing files are only replaced if `force` is set.
pub fn generate_template(
    config: &TechsConfig,
    base_dir: &Path,
    force: bool,
) -> Result<TemplateFiles> {
    let files = TemplateFiles {
        editor: base_dir.join(&config.editor_file),
        choices: base_dir.join(CHOICES_FILE_NAME),
    };
    for path in [&files.editor, &files.choices] {
        ensure!(
            force || !path.exists(),
            "{} already exists. Use --force to overwrite it",
            path.display()
        );
    }

    let parameter_files = load_parameter_files(config, base_dir)?;
    let enums = Enumerations::collect(&parameter_files);
    fs::create_dir_all(base_dir)
        .with_context(|| format!("Failed to create {}", base_dir.display()))?;

    write_editor(&files.editor, &enums)?;
    write_choices(&files.choices, &enums)?;
    info!(
        "Wrote template {} ({} scenarios, {} technologies, {} parameters)",
        files.editor.display(),
        enums.scenarios.len(),
        enums.techs.len(),
        enums.parameters.len()
    );

    Ok(files)
}

/// Write the header-only editing template
fn write_editor(path: &Path, enums: &Enumerations) -> Result<()> {
    let header = TEMPLATE_COLUMNS
        .iter()
        .map(ToString::to_string)
        .chain(enums.years.iter().map(ToString::to_string));

    let mut writer = Writer::from_path(path)?;
    writer.write_record(header)?;
    writer.flush()?;

    Ok(())
}

/// Write one `field,value` row for each valid choice
fn write_choices(path: &Path, enums: &Enumerations) -> Result<()> {
    let choices = enums
        .scenario_choices()
        .into_iter()
        .map(|value| ("Scenario", value))
        .chain(enums.countries.iter().map(|value| ("Country", value.clone())))
        .chain(enums.tech_names.keys().map(|value| ("Tech.Name", value.clone())))
        .chain(enums.techs.iter().map(|value| ("Tech", value.clone())))
        .chain(enums.parameters.iter().map(|value| ("Parameter", value.clone())));

    let mut writer = Writer::from_path(path)?;
    writer.write_record(["field", "value"])?;
    for (field, value) in choices {
        writer.write_record([field, &value])?;
    }
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::write_csv;
    use tempfile::tempdir;

    fn write_parameter_files(config: &TechsConfig, base_dir: &Path) {
        for scenario in ["BAU", "NDC"] {
            let path = config.scenario_file(base_dir, scenario);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            write_csv(
                &path,
                &["Tech", "Tech.Name", "Parameter", "Projection.Mode", "2030", "2025"],
                &[
                    &["PWRSOLARG01", "Solar ARG", "CapitalCost", "Flat", "2", "1"],
                    &["MINCOA", "Coal mining", "FixedCost", "Flat", "4", "3"],
                ],
            );
        }
    }

    #[test]
    fn test_generate_template() {
        let dir = tempdir().unwrap();
        let config = TechsConfig::default();
        write_parameter_files(&config, dir.path());

        let files = generate_template(&config, dir.path(), false).unwrap();
        assert_eq!(
            fs::read_to_string(&files.editor).unwrap(),
            "Scenario,Country,Tech.Name,Tech,Parameter,2025,2030\n"
        );
        assert_eq!(
            fs::read_to_string(&files.choices).unwrap(),
            "field,value\n\
             Scenario,BAU\n\
             Scenario,NDC\n\
             Scenario,ALL\n\
             Country,ARG\n\
             Tech.Name,Coal mining\n\
             Tech.Name,Solar ARG\n\
             Tech,MINCOA\n\
             Tech,PWRSOLARG01\n\
             Parameter,CapitalCost\n\
             Parameter,FixedCost\n"
        );
    }

    #[test]
    fn test_generate_template_needs_force() {
        let dir = tempdir().unwrap();
        let config = TechsConfig::default();
        write_parameter_files(&config, dir.path());
        let editor = dir.path().join(&config.editor_file);
        fs::write(&editor, "edited").unwrap();

        assert!(generate_template(&config, dir.path(), false).is_err());
        assert_eq!(fs::read_to_string(&editor).unwrap(), "edited");

        generate_template(&config, dir.path(), true).unwrap();
        assert_ne!(fs::read_to_string(&editor).unwrap(), "edited");
    }
}
