use serde::Deserialize;

use super::*;

fn version(input: &str) -> Version {
    Version::parse(input).expect("version should parse")
}

#[test]
fn parse_four_part_version() {
    let parsed = version("12.0.742.91");
    assert_eq!(parsed.components(), &[12, 0, 742, 91]);
    assert_eq!(parsed.to_string(), "12.0.742.91");
}

#[test]
fn version_rejects_malformed_input() {
    assert_eq!(Version::parse(""), Err(VersionParseError::Empty));
    assert!(matches!(
        Version::parse("1..2"),
        Err(VersionParseError::InvalidComponent { .. })
    ));
    assert!(matches!(
        Version::parse("1.a.0"),
        Err(VersionParseError::InvalidComponent { .. })
    ));
    assert!(matches!(
        Version::parse("1.-2"),
        Err(VersionParseError::InvalidComponent { .. })
    ));
    assert!(matches!(
        Version::parse("1.02"),
        Err(VersionParseError::LeadingZero { .. })
    ));
    assert!(matches!(
        Version::parse("99999999999.0"),
        Err(VersionParseError::InvalidComponent { .. })
    ));
}

#[test]
fn version_ordering_is_componentwise() {
    assert!(version("1.0.0.0") < version("2.0.0.0"));
    assert!(version("1.10.0.0") > version("1.9.0.0"));
    assert!(version("1.0.0.1") > version("1.0.0"));
    assert_eq!(version("1.2"), version("1.2.0.0"));
    assert_eq!(version("0.0"), version("0"));
}

#[test]
fn equal_versions_hash_identically() {
    use std::collections::HashSet;

    let mut set = HashSet::new();
    set.insert(version("3.1"));
    assert!(set.contains(&version("3.1.0.0")));
    assert!(!set.contains(&version("3.1.0.1")));
}

#[test]
fn version_deserializes_from_string_field() {
    #[derive(Deserialize)]
    struct Holder {
        version: Version,
    }

    let holder: Holder = toml::from_str("version = \"4.5.6.7\"").expect("must parse");
    assert_eq!(holder.version, version("4.5.6.7"));

    let err = toml::from_str::<Holder>("version = \"4.x\"");
    assert!(err.is_err(), "malformed version must be rejected");
}

#[test]
fn outcome_success_classification() {
    for outcome in [
        InstallOutcome::FirstInstallSuccess,
        InstallOutcome::InstallRepaired,
        InstallOutcome::NewVersionUpdated,
        InstallOutcome::InUseUpdated,
    ] {
        assert!(outcome.is_success(), "{} should be success", outcome.as_str());
    }
    assert!(!InstallOutcome::SameVersionRepairFailed.is_success());
    assert!(!InstallOutcome::InstallFailed.is_success());
}

#[test]
fn stage_tokens_round_trip() {
    for stage in [
        Stage::Preparing,
        Stage::CreatingVisualManifest,
        Stage::Building,
        Stage::Executing,
        Stage::RollingBack,
        Stage::RefreshingPolicy,
        Stage::UpdatingChannels,
        Stage::CopyingPreferencesFile,
        Stage::CreatingShortcuts,
        Stage::RegisteringProduct,
        Stage::ConfigureAutoLaunch,
        Stage::RemovingOldVersions,
    ] {
        assert_eq!(Stage::parse(stage.as_str()), Some(stage));
    }
    assert_eq!(Stage::parse("unknown"), None);
}

#[test]
fn parse_preferences() {
    let prefs = InstallPreferences::from_toml_str(
        r#"
create_all_shortcuts = true
make_default_for_user = true
auto_launch = true
channel = "beta"
"#,
    )
    .expect("preferences should parse");

    assert!(prefs.create_all_shortcuts);
    assert!(!prefs.alternate_shortcut_text);
    assert!(!prefs.make_default);
    assert!(prefs.make_default_for_user);
    assert!(prefs.auto_launch);
    assert_eq!(prefs.channel.as_deref(), Some("beta"));
}

#[test]
fn empty_preferences_use_defaults() {
    let prefs = InstallPreferences::from_toml_str("").expect("empty prefs should parse");
    assert_eq!(prefs, InstallPreferences::default());
}

#[test]
fn preferences_reject_bad_channel() {
    let err = InstallPreferences::from_toml_str("channel = \"be ta\"")
        .expect_err("channel with space must fail");
    assert!(err.to_string().contains("invalid character"));
}

#[test]
fn parse_product_config() {
    let config = ProductConfig::from_toml_str(
        r#"
name = "Example Browser"
alternate_name = "Example Internet Browser"
executable = "example"
new_executable = "new_example"
client_key = "Software/Example/Clients/browser"
system_install = true
"#,
    )
    .expect("config should parse");

    assert_eq!(config.name, "Example Browser");
    assert_eq!(config.display_name(true), "Example Internet Browser");
    assert_eq!(config.display_name(false), "Example Browser");
    assert_eq!(config.client_state_key, ProductConfig::default().client_state_key);
    assert!(config.system_install);
}

#[test]
fn product_config_rejects_matching_executables() {
    let err = ProductConfig::from_toml_str(
        r#"
executable = "app"
new_executable = "app"
"#,
    )
    .expect_err("identical executables must fail");
    assert!(err.to_string().contains("must differ"));
}

#[test]
fn product_config_rejects_nested_executable_path() {
    let err = ProductConfig::from_toml_str("executable = \"bin/app\"")
        .expect_err("nested executable must fail");
    assert!(format!("{err:#}").contains("single path component"));
}
