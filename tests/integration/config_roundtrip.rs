//! Configuration persistence and its effect on a booted shield.

use std::sync::Arc;
use std::time::Duration;

use navshield::clock::ManualClock;
use navshield::config::ShieldConfig;
use navshield::probe::{CompatibilityRule, VerdictReason};
use navshield::{ShieldBuilder, Tier};

use crate::helpers::TestShims;

#[test]
fn saved_config_drives_a_new_shield() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("navshield").join("config.toml");

    let mut config = ShieldConfig::default();
    config.failures.threshold = 2;
    config.failures.window_secs = 10;
    config
        .compatibility
        .insert("maps".into(), CompatibilityRule::range("19.0.0", "20.0.0"));
    config.save_to_file(&path).unwrap();

    let loaded = ShieldConfig::from_file(&path).unwrap();
    assert_eq!(loaded, config);

    let clock = ManualClock::new();
    let shield = ShieldBuilder::new(TestShims::compatible().set())
        .config(loaded)
        .tier(Tier::Pro)
        .clock(Arc::new(clock.clone()))
        .boot()
        .unwrap();

    // 18.4.0 is below the configured 19.0.0 minimum.
    let report = shield.compatibility_report().unwrap();
    assert_eq!(
        report.verdict_for("maps").unwrap().reason,
        VerdictReason::BelowMinimum
    );
    assert!(shield.is_protective_mode_active());

    shield.disable_protective_mode();
    shield.report_failure("here", None);
    clock.advance(Duration::from_secs(11));
    shield.report_failure("here", None);
    assert!(!shield.is_protective_mode_active(), "window is 10s");
    shield.report_failure("here", None);
    assert!(shield.is_protective_mode_active(), "threshold is 2");
}

#[test]
fn hand_written_toml_is_accepted() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[failures]
window_secs = 30

[compatibility.maps]
min_version = "18.0.0"

[compatibility.gemini]
min_version = "0.9.0"
max_version = "1.0.0"
"#,
    )
    .unwrap();

    let config = ShieldConfig::from_file(&path).unwrap();
    assert_eq!(config.window(), Duration::from_secs(30));
    assert_eq!(config.failures.threshold, 3);
    assert!(config.validate().is_ok());

    // "here" is not in the file and keeps its built-in rule.
    let shield = ShieldBuilder::new(TestShims::compatible().set())
        .config(config)
        .boot()
        .unwrap();
    let report = shield.compatibility_report().unwrap();
    assert_eq!(
        report.verdict_for("here").unwrap().reason,
        VerdictReason::Compatible
    );
    assert!(report.all_safe);
}

#[test]
fn partial_compatibility_table_keeps_other_shims_guarded() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[compatibility.maps]
min_version = "18.0.0"
max_version = "21.0.0"
"#,
    )
    .unwrap();

    let config = ShieldConfig::from_file(&path).unwrap();
    let shims = TestShims::with_versions(Some("20.5.0"), Some("2.0.0"), Some("3.9.0"));
    let shield = ShieldBuilder::new(shims.set())
        .config(config)
        .tier(Tier::Pro)
        .boot()
        .unwrap();

    let report = shield.compatibility_report().unwrap();
    assert_eq!(
        report.verdict_for("maps").unwrap().reason,
        VerdictReason::Compatible
    );
    assert_eq!(
        report.verdict_for("gemini").unwrap().reason,
        VerdictReason::AtOrAboveMaximum
    );
    assert_eq!(
        report.verdict_for("here").unwrap().reason,
        VerdictReason::BelowMinimum
    );
    assert!(shield.is_protective_mode_active());
    assert!(shield.status().version_warning);
}

#[test]
fn invalid_file_fails_boot_before_probe() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[compatibility.maps]
min_version = "20.0.0"
max_version = "18.0.0"
"#,
    )
    .unwrap();

    let config = ShieldConfig::from_file(&path).unwrap();
    let result = ShieldBuilder::new(TestShims::compatible().set())
        .config(config)
        .boot();
    assert!(result.is_err());
}
