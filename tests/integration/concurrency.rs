//! Concurrent reporting and gating from many threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use navshield::config::{FailureConfig, ShieldConfig};
use navshield::{Capability, ShieldBuilder, Tier};

use crate::helpers::{RecordingListener, TestShims};

fn shield_with_threshold(threshold: usize) -> navshield::Shield {
    let config = ShieldConfig {
        failures: FailureConfig {
            threshold,
            ..FailureConfig::default()
        },
        ..ShieldConfig::default()
    };
    ShieldBuilder::new(TestShims::compatible().set())
        .config(config)
        .tier(Tier::Pro)
        .boot()
        .unwrap()
}

#[test]
fn concurrent_reports_below_threshold_lose_no_updates() {
    let threads = 8;
    let per_thread = 25;
    let shield = shield_with_threshold(threads * per_thread + 1);

    thread::scope(|s| {
        for t in 0..threads {
            let shield = &shield;
            s.spawn(move || {
                for i in 0..per_thread {
                    shield.report_failure(format!("shim-{t}"), Some(&format!("failure {i}")));
                }
            });
        }
    });

    let status = shield.status();
    assert!(!status.active);
    assert_eq!(status.recent_failure_count, threads * per_thread);
    assert_eq!(
        status.per_component_failure_count.values().sum::<usize>(),
        status.recent_failure_count
    );
}

#[test]
fn concurrent_trip_notifies_exactly_once() {
    let shield = shield_with_threshold(3);
    let listener = Arc::new(RecordingListener::default());
    shield.add_listener(listener.clone());

    thread::scope(|s| {
        for _ in 0..8 {
            let shield = &shield;
            s.spawn(move || {
                for _ in 0..10 {
                    shield.report_failure("maps", Some("tile server reset"));
                }
            });
        }
    });

    assert!(shield.is_protective_mode_active());
    assert_eq!(listener.modes(), vec![true]);
    assert_eq!(listener.failures.lock().unwrap().len(), 80);
    assert_eq!(listener.calls.load(Ordering::SeqCst), 81);
}

#[test]
fn gating_is_safe_while_mode_flips() {
    let shield = shield_with_threshold(3);
    let denials = AtomicUsize::new(0);

    thread::scope(|s| {
        let shield = &shield;
        let denials = &denials;
        s.spawn(move || {
            for _ in 0..200 {
                shield.enable_protective_mode();
                shield.disable_protective_mode();
            }
        });
        for _ in 0..4 {
            s.spawn(move || {
                for _ in 0..200 {
                    let summary = shield.summarize();
                    if summary.protective_mode {
                        assert!(!summary.in_app_maps);
                        assert!(!summary.advanced_features);
                        denials.fetch_add(1, Ordering::Relaxed);
                    } else {
                        assert!(summary.in_app_maps);
                    }
                    let _ = shield.is_capability_enabled(Capability::CommercialRouting);
                }
            });
        }
    });

    assert!(!shield.is_protective_mode_active());
    assert!(denials.load(Ordering::Relaxed) <= 800);
}
