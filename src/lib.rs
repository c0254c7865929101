//! Navshield: capability gating and resilience layer for a tiered navigation client.
//!
//! The client delegates maps, generative-AI queries and commercial truck
//! routing to three third-party SDKs ("shims") that fail independently. This
//! crate sits between the UI and those shims:
//!
//! ```text
//! Boot probe → Protective-mode controller ← Failure tracker ← shim calls
//!                        ↓
//!                  Feature gate → UI decisions
//! ```
//!
//! # Architecture
//!
//! - **Probe**: classifies each shim's self-reported version against a
//!   known-good range once at startup
//! - **Failure tracker**: sliding-window record of shim failures
//! - **Controller**: owns the protective-mode and version-warning flags,
//!   trips on threshold crossings, notifies listeners
//! - **Policy**: pure capability decisions from tier, mode and availability
//! - **Shield**: the composition root the application holds

pub mod clock;
pub mod component;
pub mod config;
pub mod controller;
pub mod error;
pub mod failure_tracker;
pub mod metrics;
pub mod policy;
pub mod probe;
pub mod shield;
pub mod shim;
pub mod tier;

pub use component::ComponentId;
pub use config::ShieldConfig;
pub use controller::{
    ModeReason, ProtectiveModeController, ProtectiveModeListener, ProtectiveModeStatus,
    ShieldEvent,
};
pub use error::{Result, ShieldError};
pub use policy::{Capability, CapabilityDecision, FeatureSummary};
pub use probe::{CompatibilityReport, CompatibilityVerdict};
pub use shield::{Shield, ShieldBuilder, ShieldDiagnostics};
pub use shim::{Shim, ShimAvailability, ShimOutcome, ShimSet};
pub use tier::{Tier, TierSource};
