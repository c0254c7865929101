//! Guarded shim calls.

use std::fmt;

use navshield::{ShimOutcome, Tier};

use crate::helpers::harness;

#[derive(Debug)]
struct RoutingError(&'static str);

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for RoutingError {}

#[test]
fn failing_operation_returns_fallback_and_reports_once() {
    let h = harness(Tier::Plus);
    let routes: Vec<String> =
        h.shield
            .safe_execute("maps", Vec::new(), || Err(RoutingError("directions api down")));
    assert!(routes.is_empty());

    let status = h.shield.status();
    assert_eq!(status.recent_failure_count, 1);
    assert_eq!(status.per_component_failure_count.len(), 1);
    assert_eq!(
        status.per_component_failure_count.get("maps").copied(),
        Some(1)
    );
}

#[test]
fn successful_operation_is_not_reported() {
    let h = harness(Tier::Plus);
    let eta = h
        .shield
        .safe_execute("here", 0_u32, || Ok::<_, RoutingError>(42));
    assert_eq!(eta, 42);
    assert_eq!(h.shield.status().recent_failure_count, 0);
}

#[test]
fn panicking_operation_is_contained() {
    let h = harness(Tier::Plus);
    let answer = h.shield.safe_execute(
        "gemini",
        String::from("AI unavailable"),
        || -> Result<String, RoutingError> { panic!("native crash") },
    );
    assert_eq!(answer, "AI unavailable");
    let failures = h.shield.controller().tracker().failures_for("gemini");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error_kind, "panic");
}

#[test]
fn repeated_failures_through_safe_execute_trip_the_mode() {
    let h = harness(Tier::Pro);
    for _ in 0..3 {
        let _: Option<u8> = h
            .shield
            .safe_execute("here", None, || Err(RoutingError("truck profile rejected")));
    }
    assert!(h.shield.is_protective_mode_active());
}

#[test]
fn call_shim_distinguishes_unavailable_from_failed() {
    let h = harness(Tier::Pro);

    let ready = h
        .shield
        .call_shim(h.shims.routing.as_ref(), || Ok::<_, RoutingError>("route-1"));
    assert_eq!(ready.ready(), Some("route-1"));

    let failed: ShimOutcome<&str> = h
        .shield
        .call_shim(h.shims.routing.as_ref(), || Err(RoutingError("bad axle count")));
    match failed {
        ShimOutcome::Failed { component, message } => {
            assert_eq!(component.as_str(), "here");
            assert_eq!(message, "bad axle count");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    h.shims.routing.set_available(false);
    let unavailable: ShimOutcome<&str> = h
        .shield
        .call_shim(h.shims.routing.as_ref(), || Ok::<_, RoutingError>("never"));
    assert!(matches!(unavailable, ShimOutcome::Unavailable { .. }));
    assert_eq!(h.shield.status().recent_failure_count, 1);
}

#[test]
fn report_error_records_message_and_kind() {
    let h = harness(Tier::Free);
    h.shield
        .report_error("maps", &RoutingError("style sheet missing"));
    let failures = h.shield.controller().tracker().failures_for("maps");
    assert_eq!(failures[0].message, "style sheet missing");
    assert_eq!(failures[0].error_kind, "RoutingError");
}
