//! Integration tests for a full run, with every external tool replaced by [`FakeTools`].
mod common;
use chrono::NaiveDate;
use common::{FakeTools, PIPELINE, SOLVER_BINARIES, write_project};
use momf::cli::{RunOpts, handle_run_command};
use momf::config::RunConfig;
use momf::lock::RunLock;
use momf::error::RunError;
use momf::output::{ArtifactKind, artifact_file_name};
use momf::run::{RunOptions, run_pipeline};
use momf::settings::Settings;
use rstest::rstest;
use std::fs;
use std::path::Path;
use strum::IntoEnumIterator;
use tempfile::tempdir;

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_run_writes_six_artifacts() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "cbc")).unwrap();
    let tools = FakeTools::new(dir.path());

    let summary = run_pipeline(&config, &RunOptions::for_date(date(1)), &tools).unwrap();
    assert_eq!(summary.scenarios, ["BAU_0", "NDC_0"]);
    assert_eq!(summary.artifacts.len(), 6);

    let results = dir.path().join("results");
    assert_eq!(file_names(&results).len(), 6);
    for kind in ArtifactKind::iter() {
        let latest = fs::read(results.join(artifact_file_name("RELAC_TX", kind, None))).unwrap();
        let dated =
            fs::read(results.join(artifact_file_name("RELAC_TX", kind, Some(date(1))))).unwrap();
        assert_eq!(latest, dated);
    }

    let combined =
        fs::read_to_string(results.join("RELAC_TX_Combined_Inputs_Outputs.csv")).unwrap();
    let header = combined.lines().next().unwrap();
    assert!(header.starts_with("Future,Scenario,REGION,YEAR,TECHNOLOGY"));
    assert!(header.contains("CapitalInvestmentAnnualized"));

    let inputs = fs::read_to_string(results.join("RELAC_TX_Inputs.csv")).unwrap();
    assert_eq!(
        inputs,
        "Future,Scenario,REGION,YEAR,TECHNOLOGY,CapitalCost\n\
         0,BAU,RE1,2025,PWRSOLARG01,10\n\
         0,NDC,RE1,2025,PWRSOLARG01,12\n"
    );

    // Per-scenario tables are left in the scenario folders
    assert!(
        dir.path()
            .join("Executables/BAU_0/BAU_0_Output.csv")
            .is_file()
    );
}

#[test]
fn test_run_keeps_other_dates() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "cbc")).unwrap();
    let results = dir.path().join("results");

    run_pipeline(&config, &RunOptions::for_date(date(1)), &FakeTools::new(dir.path())).unwrap();
    let old = results.join(artifact_file_name("RELAC_TX", ArtifactKind::Outputs, Some(date(1))));
    fs::write(&old, "from an earlier run").unwrap();

    run_pipeline(&config, &RunOptions::for_date(date(2)), &FakeTools::new(dir.path())).unwrap();
    assert_eq!(fs::read_to_string(&old).unwrap(), "from an earlier run");
    assert_eq!(file_names(&results).len(), 9);
}

#[test]
fn test_run_is_deterministic() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "cbc")).unwrap();

    let mut outputs = Vec::new();
    for name in ["first", "second"] {
        let opts = RunOptions {
            output_dir: Some(dir.path().join(name)),
            ..RunOptions::for_date(date(1))
        };
        run_pipeline(&config, &opts, &FakeTools::new(dir.path())).unwrap();
        let contents: Vec<_> = file_names(&dir.path().join(name))
            .into_iter()
            .map(|file| fs::read(dir.path().join(name).join(file)).unwrap())
            .collect();
        outputs.push(contents);
    }

    assert_eq!(outputs[0], outputs[1]);
}

#[rstest]
#[case("glpk", "glpsol")]
#[case("cbc", "cbc")]
#[case("cplex", "cplex")]
#[case("gurobi", "gurobi_cl")]
fn test_solver_routing(#[case] solver: &str, #[case] binary: &str) {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), solver)).unwrap();
    let tools = FakeTools::new(dir.path());

    run_pipeline(&config, &RunOptions::for_date(date(1)), &tools).unwrap();

    let programs = tools.programs_run();
    assert!(programs.iter().any(|program| program == binary));
    for other in SOLVER_BINARIES.iter().filter(|other| **other != binary) {
        assert!(
            !programs.iter().any(|program| program == other),
            "{other} was run when the solver is {solver}"
        );
    }

    // otoole is told which solver wrote the results
    let otoole = tools
        .commands()
        .into_iter()
        .find(|spec| spec.has_args(&["otoole", "results"]))
        .unwrap();
    assert!(otoole.has_args(&["results", solver, "csv"]));
}

#[test]
fn test_missing_solver_fails_before_any_stage() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "gurobi")).unwrap();
    let tools = FakeTools::new(dir.path()).without("gurobi_cl");

    let err = run_pipeline(&config, &RunOptions::for_date(date(1)), &tools).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunError>(),
        Some(RunError::MissingSolver { binary, .. }) if binary == "gurobi_cl"
    ));
    assert!(tools.commands().is_empty());
    assert!(!dir.path().join("results").exists());
}

#[rstest]
#[case("solver = \"highs\"\n")]
#[case("solver = 3\n")]
#[case("output_prefix = \"RELAC_TX\"\n")]
fn test_bad_solver_value_is_rejected(#[case] contents: &str) {
    let dir = tempdir().unwrap();
    let config_path = write_project(dir.path(), "cbc");
    fs::write(&config_path, contents).unwrap();

    assert!(RunConfig::from_path(&config_path).is_err());
}

#[test]
fn test_pipeline_file_is_patched_then_restored() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "cbc")).unwrap();
    let tools = FakeTools::new(dir.path());

    run_pipeline(&config, &RunOptions::for_date(date(1)), &tools).unwrap();

    // Both stages ran, dependencies first, with the date substituted
    let stages: Vec<_> = tools
        .commands()
        .into_iter()
        .filter(|spec| spec.has_args(&["repro", "--single-item"]))
        .map(|spec| spec.args.last().unwrap().clone())
        .collect();
    assert_eq!(stages, ["dvc.yaml:prepare", "dvc.yaml:compile"]);
    for seen in tools.pipeline_seen() {
        assert!(seen.contains("--date 2025-06-01"));
        assert!(!seen.contains("fecha"));
    }

    assert_eq!(fs::read_to_string(dir.path().join("dvc.yaml")).unwrap(), PIPELINE);
    assert!(
        !file_names(dir.path())
            .iter()
            .any(|name| name.starts_with("dvc.yaml.bak"))
    );
}

#[test]
fn test_stage_failure() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "cbc")).unwrap();
    let tools = FakeTools::new(dir.path()).failing_stage("compile");

    let err = run_pipeline(&config, &RunOptions::for_date(date(1)), &tools).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunError>(),
        Some(RunError::StageFailed { stage, .. }) if stage == "compile"
    ));
    assert!(!tools.programs_run().iter().any(|program| program == "cbc"));
    assert_eq!(fs::read_to_string(dir.path().join("dvc.yaml")).unwrap(), PIPELINE);
    assert!(!dir.path().join("results").exists());
    assert!(!dir.path().join(".momf/run.lock").exists());
}

#[rstest]
#[case("glpk")]
#[case("cbc")]
#[case("cplex")]
#[case("gurobi")]
fn test_infeasible_model(#[case] solver: &str) {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), solver)).unwrap();
    let tools = FakeTools::new(dir.path()).infeasible();

    let err = run_pipeline(&config, &RunOptions::for_date(date(1)), &tools).unwrap_err();
    assert!(
        err.chain()
            .any(|cause| matches!(
                cause.downcast_ref::<RunError>(),
                Some(RunError::SolverOutcome { .. })
            )),
        "unexpected error: {err:?}"
    );
    assert!(!dir.path().join("results").exists());
}

#[test]
fn test_concurrent_run_is_refused() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "cbc")).unwrap();
    fs::create_dir_all(config.state_dir()).unwrap();
    fs::write(
        config.state_dir().join("run.lock"),
        format!("{}\n", std::process::id()),
    )
    .unwrap();
    let tools = FakeTools::new(dir.path());

    let err = run_pipeline(&config, &RunOptions::for_date(date(1)), &tools).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunError>(),
        Some(RunError::RunInProgress { .. })
    ));
    assert!(tools.pipeline_seen().is_empty());
}

#[test]
fn test_refused_run_leaves_logs_alone() {
    let dir = tempdir().unwrap();
    let config_path = write_project(dir.path(), "cbc");
    let config = RunConfig::from_path(&config_path).unwrap();
    let _lock = RunLock::acquire(&config.state_dir()).unwrap();

    // Written by the run holding the lock
    let log_dir = config.log_dir();
    fs::create_dir_all(&log_dir).unwrap();
    fs::write(log_dir.join("metadata.toml"), "FIRST RUN\n").unwrap();
    fs::write(log_dir.join("momf_info.log"), "first run is solving\n").unwrap();
    fs::write(log_dir.join("momf_error.log"), "").unwrap();

    let opts = RunOpts {
        config: Some(config_path),
        date: Some(date(1)),
        ..Default::default()
    };
    let err = handle_run_command(&opts, Some(Settings::default())).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunError>(),
        Some(RunError::RunInProgress { .. })
    ));

    assert_eq!(
        fs::read_to_string(log_dir.join("metadata.toml")).unwrap(),
        "FIRST RUN\n"
    );
    assert_eq!(
        fs::read_to_string(log_dir.join("momf_info.log")).unwrap(),
        "first run is solving\n"
    );
    assert_eq!(file_names(&log_dir).len(), 3);
}

#[cfg(unix)]
#[test]
fn test_lock_of_crashed_run_is_taken_over() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "cbc")).unwrap();
    fs::create_dir_all(config.state_dir()).unwrap();
    fs::write(config.state_dir().join("run.lock"), "999999999\n").unwrap();

    let summary =
        run_pipeline(&config, &RunOptions::for_date(date(1)), &FakeTools::new(dir.path())).unwrap();
    assert_eq!(summary.artifacts.len(), 6);
    assert!(!config.state_dir().join("run.lock").exists());
}

#[test]
fn test_pipeline_left_patched_is_restored() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "cbc")).unwrap();

    // A killed run left its date in the pipeline file along with the backup
    fs::write(
        dir.path().join("dvc.yaml"),
        PIPELINE.replace("fecha", "2024-12-31"),
    )
    .unwrap();
    fs::write(dir.path().join("dvc.yaml.bak.20241231_235959"), PIPELINE).unwrap();

    let tools = FakeTools::new(dir.path());
    run_pipeline(&config, &RunOptions::for_date(date(1)), &tools).unwrap();

    for seen in tools.pipeline_seen() {
        assert!(seen.contains("--date 2025-06-01"));
        assert!(!seen.contains("2024-12-31"));
    }
    assert_eq!(fs::read_to_string(dir.path().join("dvc.yaml")).unwrap(), PIPELINE);
    assert!(
        !file_names(dir.path())
            .iter()
            .any(|name| name.starts_with("dvc.yaml.bak"))
    );
}

#[test]
fn test_interrupted_run_cleans_up() {
    let dir = tempdir().unwrap();
    let config = RunConfig::from_path(&write_project(dir.path(), "cbc")).unwrap();
    let tools = FakeTools::new(dir.path()).interrupted_at("compile");

    let err = run_pipeline(&config, &RunOptions::for_date(date(1)), &tools).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<RunError>(),
        Some(RunError::Interrupted)
    ));

    assert_eq!(fs::read_to_string(dir.path().join("dvc.yaml")).unwrap(), PIPELINE);
    assert!(
        !file_names(dir.path())
            .iter()
            .any(|name| name.starts_with("dvc.yaml.bak"))
    );
    assert!(!config.state_dir().join("run.lock").exists());
    assert!(!dir.path().join("results").exists());
}
