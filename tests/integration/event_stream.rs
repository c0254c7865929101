//! Async consumers of the shield's event broadcast.

use navshield::{ModeReason, ShieldEvent, Tier};

use crate::helpers::{TestShims, drain_events, harness, harness_with};

#[tokio::test]
async fn trip_publishes_failures_then_mode_change() {
    let h = harness(Tier::Free);
    let mut rx = h.shield.subscribe_events();

    for component in ["maps", "gemini", "here"] {
        h.shield.report_failure(component, Some("boom"));
    }

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], ShieldEvent::FailureReported(_)));
    assert!(matches!(events[1], ShieldEvent::FailureReported(_)));
    assert!(matches!(events[2], ShieldEvent::FailureReported(_)));
    match &events[3] {
        ShieldEvent::ModeChanged { active, reason } => {
            assert!(*active);
            assert_eq!(
                *reason,
                Some(ModeReason::FailureThreshold { recent_failures: 3 })
            );
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn receiver_awaits_mode_change_from_another_task() {
    let h = harness(Tier::Plus);
    let mut rx = h.shield.subscribe_events();
    let controller = h.shield.controller().clone();

    let handle = tokio::task::spawn_blocking(move || {
        controller.enable();
        controller.disable();
    });

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    handle.await.unwrap();

    assert!(matches!(
        first,
        ShieldEvent::ModeChanged {
            active: true,
            reason: Some(ModeReason::Manual)
        }
    ));
    assert!(matches!(
        second,
        ShieldEvent::ModeChanged {
            active: false,
            reason: None
        }
    ));
}

#[tokio::test]
async fn version_warning_changes_are_published() {
    let shims = TestShims::with_versions(Some("16.0.0"), Some("0.9.2"), Some("4.17.1"));
    let h = harness_with(Tier::Plus, shims);
    let mut rx = h.shield.subscribe_events();

    assert!(h.shield.clear_version_warning());
    assert!(!h.shield.clear_version_warning());

    let events = drain_events(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        ShieldEvent::VersionWarningChanged { warning: false }
    ));
}

#[tokio::test]
async fn no_subscribers_is_not_an_error() {
    let h = harness(Tier::Free);
    for _ in 0..5 {
        h.shield.report_failure("maps", None);
    }
    assert!(h.shield.is_protective_mode_active());
}
