//! Capability gating.
//!
//! Every UI-facing "can I use this?" question is answered here as a pure
//! function of three inputs read fresh on each call: the subscription tier,
//! the protective-mode flag, and shim availability. Nothing is cached.
//!
//! Evaluation order for a boolean capability:
//!
//! 1. Protective mode on: denied.
//! 2. Required shim unavailable: denied.
//! 3. Prerequisite capability denied: denied.
//! 4. Tier below the capability's minimum: denied.
//!
//! # Examples
//!
//! ```
//! use navshield::policy::{Capability, decide, max_waypoints_for};
//! use navshield::shim::ShimAvailability;
//! use navshield::tier::Tier;
//!
//! let granted = decide(Capability::InAppMaps, Tier::Plus, false, &ShimAvailability::ALL);
//! assert!(granted.granted);
//!
//! let denied = decide(Capability::InAppMaps, Tier::Plus, true, &ShimAvailability::ALL);
//! assert!(!denied.granted);
//!
//! assert_eq!(max_waypoints_for(Tier::Pro), 25);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::controller::ProtectiveModeController;
pub use crate::shim::ShimAvailability;
use crate::shim::ShimSet;
use crate::tier::{Tier, TierSource};

// ── Capabilities ─────────────────────────────────────────────────────────────

/// A gated feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Anything beyond basic navigation; only needs protective mode off.
    AdvancedFeatures,
    /// On-device or cloud AI queries.
    AiFeatures,
    /// Cloud-backed AI queries.
    CloudAiFeatures,
    /// Commercial truck routing.
    CommercialRouting,
    /// Maps rendered inside the app.
    InAppMaps,
    /// Extended voice command set.
    AdvancedVoiceCommands,
    /// Routes with more than one stop.
    MultiWaypoint,
}

impl Capability {
    /// Every capability, in table order.
    pub fn all() -> &'static [Capability] {
        &[
            Capability::AdvancedFeatures,
            Capability::AiFeatures,
            Capability::CloudAiFeatures,
            Capability::CommercialRouting,
            Capability::InAppMaps,
            Capability::AdvancedVoiceCommands,
            Capability::MultiWaypoint,
        ]
    }

    /// Lowest tier the capability is granted at.
    pub fn required_tier(self) -> Tier {
        match self {
            Capability::AdvancedFeatures | Capability::AiFeatures => Tier::Free,
            Capability::CloudAiFeatures
            | Capability::InAppMaps
            | Capability::AdvancedVoiceCommands
            | Capability::MultiWaypoint => Tier::Plus,
            Capability::CommercialRouting => Tier::Pro,
        }
    }

    /// Shim that has to be available, if any.
    pub fn required_shim(self) -> Option<ShimRole> {
        match self {
            Capability::AiFeatures => Some(ShimRole::Ai),
            Capability::CommercialRouting => Some(ShimRole::Routing),
            Capability::InAppMaps => Some(ShimRole::Maps),
            Capability::AdvancedFeatures
            | Capability::CloudAiFeatures
            | Capability::AdvancedVoiceCommands
            | Capability::MultiWaypoint => None,
        }
    }

    /// Capability that has to be granted first, if any.
    pub fn prerequisite(self) -> Option<Capability> {
        match self {
            Capability::CloudAiFeatures => Some(Capability::AiFeatures),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Capability::AdvancedFeatures => "advanced_features",
            Capability::AiFeatures => "ai_features",
            Capability::CloudAiFeatures => "cloud_ai_features",
            Capability::CommercialRouting => "commercial_routing",
            Capability::InAppMaps => "in_app_maps",
            Capability::AdvancedVoiceCommands => "advanced_voice_commands",
            Capability::MultiWaypoint => "multi_waypoint",
        };
        f.write_str(s)
    }
}

/// Error returned when parsing an unknown capability name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability: {0}")]
pub struct CapabilityParseError(pub String);

impl FromStr for Capability {
    type Err = CapabilityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Capability::all()
            .iter()
            .copied()
            .find(|cap| cap.to_string() == wanted)
            .ok_or_else(|| CapabilityParseError(s.to_owned()))
    }
}

/// Which of the three shims a capability depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShimRole {
    /// Maps SDK.
    Maps,
    /// Generative-AI SDK.
    Ai,
    /// Commercial-routing SDK.
    Routing,
}

impl fmt::Display for ShimRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShimRole::Maps => "maps",
            ShimRole::Ai => "ai",
            ShimRole::Routing => "routing",
        })
    }
}

impl ShimAvailability {
    /// Availability of the shim filling `role`.
    pub fn is_available(&self, role: ShimRole) -> bool {
        match role {
            ShimRole::Maps => self.maps,
            ShimRole::Ai => self.ai,
            ShimRole::Routing => self.routing,
        }
    }
}

// ── Decisions ────────────────────────────────────────────────────────────────

/// Why a capability was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenialReason {
    /// Protective mode overrides every grant.
    ProtectiveMode,
    /// The required shim is not ready.
    ShimUnavailable {
        /// Shim that was queried.
        shim: ShimRole,
    },
    /// A capability this one builds on is denied.
    Prerequisite {
        /// The denied prerequisite.
        capability: Capability,
    },
    /// The user's tier is below the minimum.
    TierTooLow {
        /// Minimum tier.
        required: Tier,
        /// Tier in effect.
        current: Tier,
    },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::ProtectiveMode => f.write_str("protective mode is active"),
            DenialReason::ShimUnavailable { shim } => write!(f, "{shim} shim unavailable"),
            DenialReason::Prerequisite { capability } => write!(f, "requires {capability}"),
            DenialReason::TierTooLow { required, current } => {
                write!(f, "requires {required} tier (current: {current})")
            }
        }
    }
}

/// Outcome of one capability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityDecision {
    /// Capability that was checked.
    pub capability: Capability,
    /// Whether it is granted.
    pub granted: bool,
    /// Why it was denied, when it was.
    pub denial: Option<DenialReason>,
}

impl CapabilityDecision {
    fn grant(capability: Capability) -> Self {
        Self {
            capability,
            granted: true,
            denial: None,
        }
    }

    fn deny(capability: Capability, reason: DenialReason) -> Self {
        Self {
            capability,
            granted: false,
            denial: Some(reason),
        }
    }
}

/// Decide one capability from explicit inputs.
///
/// Total: every input combination yields a decision.
pub fn decide(
    capability: Capability,
    tier: Tier,
    protective_mode: bool,
    availability: &ShimAvailability,
) -> CapabilityDecision {
    if protective_mode {
        return CapabilityDecision::deny(capability, DenialReason::ProtectiveMode);
    }
    if let Some(shim) = capability.required_shim() {
        if !availability.is_available(shim) {
            return CapabilityDecision::deny(capability, DenialReason::ShimUnavailable { shim });
        }
    }
    if let Some(prerequisite) = capability.prerequisite() {
        if !decide(prerequisite, tier, protective_mode, availability).granted {
            return CapabilityDecision::deny(
                capability,
                DenialReason::Prerequisite {
                    capability: prerequisite,
                },
            );
        }
    }
    let required = capability.required_tier();
    if tier < required {
        return CapabilityDecision::deny(
            capability,
            DenialReason::TierTooLow {
                required,
                current: tier,
            },
        );
    }
    CapabilityDecision::grant(capability)
}

/// Maximum route stops for `tier`. Independent of mode and shims.
pub fn max_waypoints_for(tier: Tier) -> u32 {
    match tier {
        Tier::Free => 1,
        Tier::Plus => 10,
        Tier::Pro => 25,
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// Every decision computed from one read of the inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureSummary {
    /// Tier the decisions were made for.
    pub tier: Tier,
    /// Protective mode at the time of the read.
    pub protective_mode: bool,
    /// Shim availability at the time of the read.
    pub availability: ShimAvailability,
    /// [`Capability::AdvancedFeatures`] granted.
    pub advanced_features: bool,
    /// [`Capability::AiFeatures`] granted. Needs the AI shim.
    pub ai_features: bool,
    /// [`Capability::CloudAiFeatures`] granted. Needs AI features as well.
    pub cloud_ai_features: bool,
    /// [`Capability::CommercialRouting`] granted. Pro only, needs the routing shim.
    pub commercial_routing: bool,
    /// [`Capability::InAppMaps`] granted. Needs the maps shim.
    pub in_app_maps: bool,
    /// [`Capability::AdvancedVoiceCommands`] granted.
    pub advanced_voice_commands: bool,
    /// [`Capability::MultiWaypoint`] granted.
    pub multi_waypoint: bool,
    /// Maximum route stops.
    pub max_waypoints: u32,
}

impl FeatureSummary {
    /// Compute every decision from one set of inputs.
    pub fn compute(tier: Tier, protective_mode: bool, availability: ShimAvailability) -> Self {
        let granted = |cap| decide(cap, tier, protective_mode, &availability).granted;
        Self {
            tier,
            protective_mode,
            availability,
            advanced_features: granted(Capability::AdvancedFeatures),
            ai_features: granted(Capability::AiFeatures),
            cloud_ai_features: granted(Capability::CloudAiFeatures),
            commercial_routing: granted(Capability::CommercialRouting),
            in_app_maps: granted(Capability::InAppMaps),
            advanced_voice_commands: granted(Capability::AdvancedVoiceCommands),
            multi_waypoint: granted(Capability::MultiWaypoint),
            max_waypoints: max_waypoints_for(tier),
        }
    }

    /// The decision recorded for `capability`.
    pub fn is_enabled(&self, capability: Capability) -> bool {
        match capability {
            Capability::AdvancedFeatures => self.advanced_features,
            Capability::AiFeatures => self.ai_features,
            Capability::CloudAiFeatures => self.cloud_ai_features,
            Capability::CommercialRouting => self.commercial_routing,
            Capability::InAppMaps => self.in_app_maps,
            Capability::AdvancedVoiceCommands => self.advanced_voice_commands,
            Capability::MultiWaypoint => self.multi_waypoint,
        }
    }
}

// ── Live gate ────────────────────────────────────────────────────────────────

/// Gate bound to live inputs: a tier source, the controller, and the shims.
///
/// Holds no decision state of its own. Each call re-reads the inputs.
#[derive(Clone)]
pub struct FeatureGate {
    tier: Arc<dyn TierSource>,
    controller: Arc<ProtectiveModeController>,
    shims: ShimSet,
}

impl FeatureGate {
    /// Bind a gate to its inputs.
    pub fn new(
        tier: Arc<dyn TierSource>,
        controller: Arc<ProtectiveModeController>,
        shims: ShimSet,
    ) -> Self {
        Self {
            tier,
            controller,
            shims,
        }
    }

    /// Tier currently in effect.
    pub fn current_tier(&self) -> Tier {
        self.tier.current_tier()
    }

    /// Whether `capability` is granted right now.
    pub fn is_capability_enabled(&self, capability: Capability) -> bool {
        self.explain(capability).granted
    }

    /// Decide `capability` right now, with the denial reason.
    pub fn explain(&self, capability: Capability) -> CapabilityDecision {
        let tier = self.tier.current_tier();
        let active = self.controller.is_active();
        // Shims are not queried at all while protective mode is on.
        let availability = if active {
            ShimAvailability::NONE
        } else {
            self.shims.availability()
        };
        decide(capability, tier, active, &availability)
    }

    /// Maximum route stops for the current tier.
    pub fn max_waypoints(&self) -> u32 {
        max_waypoints_for(self.tier.current_tier())
    }

    /// Every decision from a single read of the inputs.
    pub fn summarize(&self) -> FeatureSummary {
        let tier = self.tier.current_tier();
        let active = self.controller.is_active();
        let availability = self.shims.availability();
        FeatureSummary::compute(tier, active, availability)
    }
}

impl fmt::Debug for FeatureGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureGate")
            .field("tier", &self.tier.current_tier())
            .field("protective_mode", &self.controller.is_active())
            .field("shims", &self.shims)
            .finish()
    }
}
