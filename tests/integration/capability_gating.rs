//! Capability decisions read through a booted shield.

use navshield::policy::{DenialReason, ShimRole};
use navshield::{Capability, Tier};

use crate::helpers::harness;

#[test]
fn protective_mode_denies_every_capability_at_every_tier() {
    let h = harness(Tier::Free);
    h.shield.enable_protective_mode();
    for &tier in Tier::all() {
        h.tier.set(tier);
        for &cap in Capability::all() {
            assert!(
                !h.shield.is_capability_enabled(cap),
                "{cap} granted at {tier} while protective"
            );
            assert_eq!(
                h.shield.explain(cap).denial,
                Some(DenialReason::ProtectiveMode)
            );
        }
    }
}

#[test]
fn grants_never_shrink_as_tier_rises() {
    let h = harness(Tier::Free);
    for &cap in Capability::all() {
        let mut granted_below = false;
        for &tier in Tier::all() {
            h.tier.set(tier);
            let granted = h.shield.is_capability_enabled(cap);
            assert!(granted || !granted_below, "{cap} revoked at {tier}");
            granted_below = granted;
        }
    }
}

#[test]
fn max_waypoints_ignore_mode_and_shims() {
    let h = harness(Tier::Free);
    let expected = [(Tier::Free, 1), (Tier::Plus, 10), (Tier::Pro, 25)];
    for (tier, waypoints) in expected {
        h.tier.set(tier);
        assert_eq!(h.shield.max_waypoints(), waypoints);
        h.shims.maps.set_available(false);
        h.shield.enable_protective_mode();
        assert_eq!(h.shield.max_waypoints(), waypoints);
        h.shield.disable_protective_mode();
        h.shims.maps.set_available(true);
    }
}

#[test]
fn tier_upgrade_takes_effect_on_next_check() {
    let h = harness(Tier::Free);
    assert!(!h.shield.is_capability_enabled(Capability::MultiWaypoint));
    h.tier.set(Tier::Plus);
    assert!(h.shield.is_capability_enabled(Capability::MultiWaypoint));
    assert!(!h.shield.is_capability_enabled(Capability::CommercialRouting));
    h.tier.set(Tier::Pro);
    assert!(h.shield.is_capability_enabled(Capability::CommercialRouting));
}

#[test]
fn shim_going_offline_is_seen_without_caching() {
    let h = harness(Tier::Pro);
    assert!(h.shield.is_capability_enabled(Capability::CommercialRouting));
    h.shims.routing.set_available(false);
    assert_eq!(
        h.shield.explain(Capability::CommercialRouting).denial,
        Some(DenialReason::ShimUnavailable {
            shim: ShimRole::Routing
        })
    );
    h.shims.routing.set_available(true);
    assert!(h.shield.is_capability_enabled(Capability::CommercialRouting));
}

#[test]
fn cloud_ai_needs_ai_features() {
    let h = harness(Tier::Plus);
    assert!(h.shield.is_capability_enabled(Capability::CloudAiFeatures));
    h.shims.ai.set_available(false);
    assert!(!h.shield.is_capability_enabled(Capability::AiFeatures));
    assert_eq!(
        h.shield.explain(Capability::CloudAiFeatures).denial,
        Some(DenialReason::Prerequisite {
            capability: Capability::AiFeatures
        })
    );
}

#[test]
fn summary_is_one_consistent_snapshot() {
    let h = harness(Tier::Plus);
    h.shims.maps.set_available(false);
    let summary = h.shield.summarize();

    assert_eq!(summary.tier, Tier::Plus);
    assert!(!summary.protective_mode);
    assert!(!summary.availability.maps);
    assert!(!summary.in_app_maps);
    assert!(summary.ai_features);
    assert!(summary.cloud_ai_features);
    assert!(!summary.commercial_routing);
    assert!(summary.advanced_voice_commands);
    assert!(summary.multi_waypoint);
    assert_eq!(summary.max_waypoints, 10);

    // The snapshot does not change when the inputs do.
    h.shield.enable_protective_mode();
    assert!(summary.ai_features);
    assert!(!h.shield.summarize().ai_features);
}
