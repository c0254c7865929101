//! Protective-mode transitions driven through the public `Shield` surface.

use std::sync::Arc;
use std::time::Duration;

use navshield::{ModeReason, Tier};

use crate::helpers::{RecordingListener, TestShims, harness, harness_with};

#[test]
fn threshold_minus_one_leaves_mode_off() {
    let h = harness(Tier::Pro);
    h.shield.report_failure("maps", Some("tile timeout"));
    h.shield.report_failure("gemini", Some("quota"));
    assert!(!h.shield.is_protective_mode_active());
    assert_eq!(h.shield.status().recent_failure_count, 2);
}

#[test]
fn threshold_trips_on_the_nth_report() {
    let h = harness(Tier::Pro);
    h.shield.report_failure("maps", None);
    h.shield.report_failure("gemini", None);
    let count = h.shield.report_failure("here", None);
    assert_eq!(count, 3);
    assert!(
        h.shield.is_protective_mode_active(),
        "the third report must have tripped the mode before returning"
    );

    let status = h.shield.status();
    assert_eq!(
        status.reason,
        Some(ModeReason::FailureThreshold { recent_failures: 3 })
    );
    assert!(status.entered_at.is_some());
    assert_eq!(status.per_component_failure_count.len(), 3);
}

#[test]
fn failures_outside_window_do_not_count() {
    let h = harness(Tier::Pro);
    h.shield.report_failure("maps", None);
    h.shield.report_failure("maps", None);
    h.clock.advance(Duration::from_secs(61));
    h.shield.report_failure("maps", None);

    let status = h.shield.status();
    assert_eq!(status.recent_failure_count, 1);
    assert!(!status.active);
    assert_eq!(status.total_failures_reported, 3);
}

#[test]
fn failure_exactly_at_window_edge_still_counts() {
    let h = harness(Tier::Pro);
    h.shield.report_failure("here", None);
    h.shield.report_failure("here", None);
    h.clock.advance(Duration::from_secs(60));
    h.shield.report_failure("here", None);
    assert!(h.shield.is_protective_mode_active());
}

#[test]
fn disable_after_trip_clears_failures() {
    let h = harness(Tier::Plus);
    for _ in 0..3 {
        h.shield.report_failure("gemini", Some("503"));
    }
    assert!(h.shield.is_protective_mode_active());

    assert!(h.shield.disable_protective_mode());
    let status = h.shield.status();
    assert!(!status.active);
    assert_eq!(status.recent_failure_count, 0);
    assert!(status.per_component_failure_count.is_empty());
    assert!(status.reason.is_none());
}

#[test]
fn no_automatic_recovery() {
    let h = harness(Tier::Plus);
    for _ in 0..3 {
        h.shield.report_failure("maps", None);
    }
    h.clock.advance(Duration::from_secs(600));
    assert_eq!(h.shield.status().recent_failure_count, 0);
    assert!(
        h.shield.is_protective_mode_active(),
        "mode stays on after failures age out"
    );
}

#[test]
fn enable_and_disable_notify_once_each() {
    let h = harness(Tier::Free);
    let listener = Arc::new(RecordingListener::default());
    h.shield.set_listener(Some(listener.clone()));

    h.shield.enable_protective_mode();
    h.shield.enable_protective_mode();
    assert_eq!(listener.modes(), vec![true]);

    h.shield.disable_protective_mode();
    h.shield.disable_protective_mode();
    assert_eq!(listener.modes(), vec![true, false]);
}

#[test]
fn manual_enable_survives_low_failure_count() {
    let h = harness(Tier::Free);
    h.shield.enable_protective_mode();
    assert_eq!(h.shield.status().recent_failure_count, 0);
    assert!(h.shield.is_protective_mode_active());
    assert_eq!(h.shield.status().reason, Some(ModeReason::Manual));
}

#[test]
fn incompatible_boot_is_protective_before_any_failure() {
    let shims = TestShims::with_versions(Some("18.4.0"), Some("1.2.0"), Some("4.17.1"));
    let h = harness_with(Tier::Pro, shims);
    let status = h.shield.status();
    assert!(status.active);
    assert!(status.version_warning);
    assert_eq!(status.total_failures_reported, 0);
    match status.reason {
        Some(ModeReason::CompatibilityFailure { components }) => {
            assert_eq!(components.len(), 1);
            assert_eq!(components[0].as_str(), "gemini");
        }
        other => panic!("unexpected reason: {other:?}"),
    }
}

#[test]
fn unreadable_version_counts_as_incompatible() {
    let shims = TestShims::with_versions(Some("18.4.0"), Some("0.9.2"), None);
    let h = harness_with(Tier::Pro, shims);
    assert!(h.shield.is_protective_mode_active());
    assert!(!h.shield.compatibility_report().unwrap().all_safe);
}

#[test]
fn listener_sees_failures_in_report_order() {
    let h = harness(Tier::Free);
    let listener = Arc::new(RecordingListener::default());
    h.shield.add_listener(listener.clone());

    h.shield.report_failure("maps", None);
    h.shield.report_failure("here", None);
    h.shield.report_failure("gemini", None);

    assert_eq!(listener.failure_components(), vec!["maps", "here", "gemini"]);
    assert_eq!(listener.modes(), vec![true]);
}

#[test]
fn reprobe_clears_warning_after_shim_upgrade() {
    let shims = TestShims::with_versions(Some("17.0.0"), Some("0.9.2"), Some("4.17.1"));
    let h = harness_with(Tier::Plus, shims);
    let listener = Arc::new(RecordingListener::default());
    h.shield.add_listener(listener.clone());
    assert!(h.shield.status().version_warning);

    h.shims.maps.set_version(Some("18.0.0"));
    h.shield.reprobe();
    assert!(!h.shield.status().version_warning);
    assert!(h.shield.is_protective_mode_active());
    assert_eq!(*listener.warnings.lock().unwrap(), vec![false]);

    h.shield.disable_protective_mode();
    assert!(h.shield.is_capability_enabled(navshield::Capability::InAppMaps));
}
