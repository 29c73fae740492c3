//! The bundled example projects and the CLI commands for using them.
use anyhow::{Context, Result, ensure};
use clap::Subcommand;
use include_dir::{Dir, DirEntry, include_dir};
use std::fs;
use std::path::{Path, PathBuf};

/// The directory containing the example projects.
const DEMOS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/demos");

/// The available subcommands for managing example projects.
#[derive(Subcommand)]
pub enum ExampleSubcommands {
    /// List available examples.
    List,
    /// Provide information about the specified example.
    Info {
        /// The name of the example.
        name: String,
    },
    /// Extract an example project to a new directory.
    Extract {
        /// The name of the example to extract.
        name: String,
        /// The destination folder for the example.
        new_path: Option<PathBuf>,
    },
}

impl ExampleSubcommands {
    /// Execute the supplied example subcommand
    pub fn execute(self) -> Result<()> {
        match self {
            Self::List => {
                for name in example_names() {
                    println!("{name}");
                }
            }
            Self::Info { name } => println!("{}", example_readme(&name)?),
            Self::Extract { name, new_path } => {
                let dest = new_path.unwrap_or_else(|| PathBuf::from(&name));
                extract_example(&name, &dest)?;
                println!("Extracted {name} to {}", dest.display());
            }
        }

        Ok(())
    }
}

/// The names of the bundled examples
fn example_names() -> Vec<String> {
    DEMOS_DIR
        .dirs()
        .map(|dir| dir.path().display().to_string())
        .collect()
}

/// The README of an example
fn example_readme(name: &str) -> Result<&'static str> {
    let path: PathBuf = [name, "README.txt"].iter().collect();
    DEMOS_DIR
        .get_file(path)
        .with_context(|| format!("Example {name} not found."))?
        .contents_utf8()
        .context("README.txt is not UTF-8 encoded")
}

/// Extract the specified example to a new directory
fn extract_example(name: &str, new_path: &Path) -> Result<()> {
    let sub_dir = DEMOS_DIR
        .get_dir(name)
        .with_context(|| format!("Example {name} not found."))?;
    ensure!(
        !new_path.exists(),
        "Destination directory {} already exists",
        new_path.display()
    );

    fs::create_dir_all(new_path)?;
    copy_entries(sub_dir, sub_dir.path(), new_path)
}

/// Copy the contents of a bundled directory, keeping paths relative to `root`
fn copy_entries(dir: &Dir, root: &Path, dest: &Path) -> Result<()> {
    for entry in dir.entries() {
        let relative = entry.path().strip_prefix(root)?;
        let target = dest.join(relative);
        match entry {
            DirEntry::Dir(sub_dir) => {
                fs::create_dir_all(&target)?;
                copy_entries(sub_dir, root, dest)?;
            }
            DirEntry::File(file) => fs::write(&target, file.contents())
                .with_context(|| format!("Failed to write {}", target.display()))?,
        }
    }

    Ok(())
}
