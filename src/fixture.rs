//! Fixtures for tests
use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::RunConfig;
use crate::table::Table;
use anyhow::Result;
use rstest::fixture;
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// The function used to answer commands in a [`ScriptedRunner`]
type Responder = Box<dyn Fn(&CommandSpec) -> CommandOutput>;

/// A [`CommandRunner`] which answers commands with a closure and records what was run
pub struct ScriptedRunner {
    responder: Responder,
    programs: Option<HashSet<String>>,
    commands: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    /// Create a runner which answers every command with `responder`.
    ///
    /// Every program is reported as installed.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&CommandSpec) -> CommandOutput + 'static,
    {
        Self {
            responder: Box::new(responder),
            programs: None,
            commands: RefCell::new(Vec::new()),
        }
    }

    /// Only report the given programs as installed
    pub fn with_programs<I, S>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.programs = Some(programs.into_iter().map(Into::into).collect());
        self
    }

    /// The commands which have been run so far
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.borrow().clone()
    }

    /// The commands which have been run, formatted as command lines
    pub fn command_lines(&self) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.commands.borrow_mut().push(spec.clone());
        Ok((self.responder)(spec))
    }

    fn find_program(&self, name: &str) -> Option<PathBuf> {
        match &self.programs {
            Some(programs) if !programs.contains(name) => None,
            _ => Some(PathBuf::from("/usr/bin").join(name)),
        }
    }
}

/// Write a CSV file from a header and rows
pub fn write_csv(path: &Path, header: &[&str], rows: &[&[&str]]) {
    let mut table = Table::new(header.iter().map(ToString::to_string).collect());
    for row in rows {
        table.push_row(row.iter().map(ToString::to_string).collect());
    }
    table.write_to(path).unwrap();
}

#[fixture]
pub fn project_dir() -> TempDir {
    tempdir().unwrap()
}

/// A minimal run configuration file
pub const MINIMAL_CONFIG: &str = "solver = \"cbc\"\n";

#[fixture]
pub fn run_config(project_dir: TempDir) -> (TempDir, RunConfig) {
    let path = project_dir.path().join("momf.toml");
    std::fs::write(&path, MINIMAL_CONFIG).unwrap();
    let config = RunConfig::from_path(&path).unwrap();
    (project_dir, config)
}
