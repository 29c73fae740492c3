//! Provides the main entry point to the program.
use ::log::error;
use human_panic::{metadata, setup_panic};
use momf::cli::run_cli;
use momf::log::is_logger_initialised;

fn main() {
    setup_panic!(metadata!().support(
        "Open an issue on the project's repository, attaching the log files from .momf/logs"
    ));

    if let Err(err) = run_cli() {
        if is_logger_initialised() {
            error!("{err:?}");
        } else {
            eprintln!("Error: {err:?}");
        }

        std::process::exit(1);
    }
}
