//! Common functionality for momf, a coordinator for reproducible OSeMOSYS model runs.
#![warn(missing_docs)]
use std::path::PathBuf;

pub mod cli;
pub mod command;
pub mod config;
pub mod environment;
pub mod error;
pub mod finance;
pub mod input;
pub mod lock;
pub mod log;
pub mod output;
pub mod pipeline;
pub mod run;
pub mod scenario;
pub mod settings;
pub mod solver;
pub mod table;
pub mod techs;

#[cfg(test)]
mod fixture;

/// Get the path to the user's momf configuration directory
pub fn get_momf_config_dir() -> PathBuf {
    let Some(mut config_dir) = dirs::config_dir() else {
        panic!("Could not get path to user's configuration directory");
    };

    config_dir.push("momf");
    config_dir
}
