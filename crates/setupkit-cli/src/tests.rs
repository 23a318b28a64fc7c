use super::*;
use clap::error::ErrorKind;
use render::{resolve_output_style, OutputStyle};
use setupkit_core::Stage;
use setupkit_installer::{
    read_run_metadata, InstallFailure, InstallReport, RunStatus, StepRecord, StepResult,
    VersionOrderingViolation,
};
use std::time::{SystemTime, UNIX_EPOCH};

fn version(input: &str) -> Version {
    Version::parse(input).expect("must parse version")
}

fn test_root() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("must read clock")
        .as_nanos();
    std::env::temp_dir().join(format!("setupkit-cli-test-{}-{nanos}", std::process::id()))
}

#[test]
fn parses_install_command() {
    let cli = Cli::try_parse_from([
        "setupkit",
        "--target",
        "/opt/app",
        "--state-root",
        "/var/lib/setupkit",
        "install",
        "--source",
        "/tmp/payload",
        "--new-version",
        "1.2.0.7",
    ])
    .expect("must parse install command");

    assert_eq!(cli.target, PathBuf::from("/opt/app"));
    assert_eq!(cli.state_root, PathBuf::from("/var/lib/setupkit"));
    assert!(cli.product_config.is_none());
    match cli.command {
        Commands::Install {
            source,
            new_version,
            setup,
            archive,
            prefs,
        } => {
            assert_eq!(source, PathBuf::from("/tmp/payload"));
            assert_eq!(new_version, version("1.2.0.7"));
            assert!(setup.is_none());
            assert!(archive.is_none());
            assert!(prefs.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn rejects_malformed_version_argument() {
    let err = Cli::try_parse_from([
        "setupkit",
        "--target",
        "/opt/app",
        "--state-root",
        "/var/lib/setupkit",
        "install",
        "--source",
        "/tmp/payload",
        "--new-version",
        "1.x",
    ])
    .expect_err("must reject malformed version");
    assert_eq!(err.kind(), ErrorKind::ValueValidation);
}

#[test]
fn status_requires_target_and_state_root() {
    let err = Cli::try_parse_from(["setupkit", "status"]).expect_err("must require paths");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn exit_codes_follow_outcome() {
    assert_eq!(exit_code_for(InstallOutcome::FirstInstallSuccess), 0);
    assert_eq!(exit_code_for(InstallOutcome::InstallRepaired), 0);
    assert_eq!(exit_code_for(InstallOutcome::NewVersionUpdated), 0);
    assert_eq!(exit_code_for(InstallOutcome::InUseUpdated), 0);
    assert_eq!(exit_code_for(InstallOutcome::InstallFailed), 1);
    assert_eq!(exit_code_for(InstallOutcome::SameVersionRepairFailed), 3);
}

#[test]
fn output_style_follows_stdout_tty() {
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false, true), OutputStyle::Plain);
}

#[test]
fn status_line_rendering_by_style() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "installed"),
        "installed"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "stale run"),
        "[WARN] stale run"
    );
}

#[test]
fn report_lines_for_successful_update() {
    let report = InstallReport {
        outcome: InstallOutcome::NewVersionUpdated,
        existing_version: Some(version("1.0.0.0")),
        failure: None,
        steps: vec![
            StepRecord {
                step: Stage::UpdatingChannels,
                result: StepResult::Completed,
            },
            StepRecord {
                step: Stage::CopyingPreferencesFile,
                result: StepResult::Skipped,
            },
            StepRecord {
                step: Stage::CreatingShortcuts,
                result: StepResult::Failed("desktop launcher unwritable".to_string()),
            },
        ],
    };

    let lines = format_install_report_lines(&report, &version("2.0.0.0"), OutputStyle::Plain);
    assert_eq!(
        lines,
        vec![
            "installed 2.0.0.0 (new_version_updated)".to_string(),
            "previous version: 1.0.0.0".to_string(),
            "updating_channels: done".to_string(),
            "copying_preferences_file: skipped".to_string(),
            "creating_shortcuts: desktop launcher unwritable".to_string(),
        ]
    );
}

#[test]
fn report_lines_for_downgrade() {
    let report = InstallReport {
        outcome: InstallOutcome::InstallFailed,
        existing_version: Some(version("3.0.0.0")),
        failure: Some(InstallFailure::Downgrade(VersionOrderingViolation {
            existing: "3.0.0.0".to_string(),
            new: "2.0.0.0".to_string(),
        })),
        steps: Vec::new(),
    };

    let lines = format_install_report_lines(&report, &version("2.0.0.0"), OutputStyle::Rich);
    assert_eq!(
        lines,
        vec![
            "[ERR] install of 2.0.0.0 failed (install_failed)".to_string(),
            "[STEP] previous version: 3.0.0.0".to_string(),
            "[ERR] staged version 2.0.0.0 is older than installed version 3.0.0.0".to_string(),
        ]
    );
}

#[test]
fn missing_config_paths_load_defaults() {
    let product = load_product_config(None).expect("must default product config");
    assert_eq!(product, ProductConfig::default());
    let prefs = load_preferences(None).expect("must default preferences");
    assert_eq!(prefs, InstallPreferences::default());
}

#[test]
fn loads_preferences_from_file() {
    let root = test_root();
    fs::create_dir_all(&root).expect("must create root");
    let path = root.join("prefs.toml");
    fs::write(&path, "create_all_shortcuts = true\nchannel = \"beta\"\n")
        .expect("must write prefs");

    let prefs = load_preferences(Some(&path)).expect("must load prefs");
    assert!(prefs.create_all_shortcuts);
    assert_eq!(prefs.channel.as_deref(), Some("beta"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn unreadable_product_config_names_path() {
    let root = test_root();
    let path = root.join("missing.toml");
    let err = load_product_config(Some(&path)).expect_err("must fail on missing file");
    assert!(err.to_string().contains("missing.toml"));
}

#[test]
fn parses_os_upgrade_command() {
    let cli = Cli::try_parse_from([
        "setupkit",
        "--target",
        "/opt/app",
        "--state-root",
        "/var/lib/setupkit",
        "os-upgrade",
    ])
    .expect("must parse os-upgrade command");
    assert!(matches!(cli.command, Commands::OsUpgrade));
}

#[test]
fn failed_install_closes_its_run() {
    let root = test_root();
    let target = root.join("target");
    let state = root.join("state");
    let missing = root.join("missing-payload");
    let cli = Cli::try_parse_from([
        "setupkit",
        "--target",
        target.to_str().expect("must be utf-8"),
        "--state-root",
        state.to_str().expect("must be utf-8"),
        "install",
        "--source",
        missing.to_str().expect("must be utf-8"),
        "--new-version",
        "1.0.0.0",
    ])
    .expect("must parse install command");

    let err = run_cli(cli).expect_err("must fail on missing source");
    assert!(err.to_string().contains("missing-payload"));

    let layout = InstallLayout::new(&target, &state);
    assert!(read_active_run(&layout).expect("must read marker").is_none());

    let run_ids: Vec<String> = fs::read_dir(layout.runs_dir())
        .expect("must read runs dir")
        .map(|entry| entry.expect("must read entry").path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .collect();
    assert_eq!(run_ids.len(), 1);
    let metadata = read_run_metadata(&layout, &run_ids[0])
        .expect("must read metadata")
        .expect("metadata must exist");
    assert_eq!(metadata.status, RunStatus::Aborted);

    let _ = fs::remove_dir_all(&root);
}
