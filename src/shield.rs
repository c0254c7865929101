//! Composition root: wires the probe, the failure tracker, the controller and
//! the feature gate into the single surface the application talks to.
//!
//! ```
//! use std::sync::Arc;
//! use navshield::shield::ShieldBuilder;
//! use navshield::shim::{ShimSet, StaticShim};
//! use navshield::policy::Capability;
//! use navshield::tier::Tier;
//!
//! let shims = ShimSet::new(
//!     Arc::new(StaticShim::new("maps", Some("18.4.0"))),
//!     Arc::new(StaticShim::new("gemini", Some("0.9.2"))),
//!     Arc::new(StaticShim::new("here", Some("4.17.1"))),
//! );
//! let shield = ShieldBuilder::new(shims).tier(Tier::Plus).boot().unwrap();
//! assert!(!shield.is_protective_mode_active());
//! assert!(shield.is_capability_enabled(Capability::InAppMaps));
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::component::ComponentId;
use crate::config::ShieldConfig;
use crate::controller::{
    ListenerId, PANIC_ERROR_KIND, ProtectiveModeController, ProtectiveModeListener,
    ProtectiveModeStatus, ShieldEvent, error_kind_of, panic_message,
};
use crate::error::Result;
use crate::failure_tracker::{FailureEvent, FailureTracker};
use crate::metrics::{NoopMetrics, ShieldMetrics};
use crate::policy::{Capability, CapabilityDecision, FeatureGate, FeatureSummary};
use crate::probe::{CompatibilityProbe, CompatibilityReport};
use crate::shim::{Shim, ShimOutcome, ShimSet, component_of, query_available};
use crate::tier::{FixedTier, Tier, TierSource};

// ── Builder ──────────────────────────────────────────────────────────────────

/// Builder for [`Shield`].
pub struct ShieldBuilder {
    shims: ShimSet,
    config: ShieldConfig,
    tier: Arc<dyn TierSource>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn ShieldMetrics>,
}

impl ShieldBuilder {
    /// Start from default configuration, the free tier and the system clock.
    pub fn new(shims: ShimSet) -> Self {
        Self {
            shims,
            config: ShieldConfig::default(),
            tier: Arc::new(FixedTier(Tier::Free)),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Use `config` instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: ShieldConfig) -> Self {
        self.config = config;
        self
    }

    /// Read the tier from `source` on every decision.
    #[must_use]
    pub fn tier_source(mut self, source: Arc<dyn TierSource>) -> Self {
        self.tier = source;
        self
    }

    /// Pin the tier.
    #[must_use]
    pub fn tier(self, tier: Tier) -> Self {
        self.tier_source(Arc::new(FixedTier(tier)))
    }

    /// Time source for the failure window.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Metrics sink.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn ShieldMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate the configuration and assemble the shield without probing.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails [`ShieldConfig::validate`].
    pub fn build(self) -> Result<Shield> {
        self.config.validate()?;
        for shim in self.shims.all() {
            let component = component_of(shim.as_ref());
            if !self.config.compatibility.contains_key(component.as_str()) {
                warn!(
                    component = %component,
                    "no compatibility rule; any parseable version will be accepted"
                );
            }
        }

        let tracker = FailureTracker::with_clock(self.config.window(), self.clock);
        let controller = Arc::new(
            ProtectiveModeController::new(tracker, self.config.failures.threshold)
                .with_event_capacity(self.config.failures.event_capacity)
                .with_metrics(Arc::clone(&self.metrics)),
        );
        let probe = CompatibilityProbe::for_shim_set(&self.shims, self.config.compatibility.clone())
            .with_metrics(self.metrics);
        let gate = FeatureGate::new(self.tier, Arc::clone(&controller), self.shims.clone());

        Ok(Shield {
            config: self.config,
            shims: self.shims,
            controller,
            gate,
            probe,
            report: RwLock::new(None),
        })
    }

    /// Build, then run the boot-time compatibility probe.
    ///
    /// An incompatible shim puts the shield in protective mode before this
    /// returns; it is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn boot(self) -> Result<Shield> {
        let shield = self.build()?;
        shield.probe();
        Ok(shield)
    }
}

impl fmt::Debug for ShieldBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShieldBuilder")
            .field("shims", &self.shims)
            .field("config", &self.config)
            .field("tier", &self.tier.current_tier())
            .finish_non_exhaustive()
    }
}

// ── Diagnostics ──────────────────────────────────────────────────────────────

/// Everything a debug screen or a bug report needs, in one serializable value.
#[derive(Debug, Clone, Serialize)]
pub struct ShieldDiagnostics {
    /// When this snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Controller status.
    pub status: ProtectiveModeStatus,
    /// Latest compatibility report, if a probe has run.
    pub compatibility: Option<CompatibilityReport>,
    /// Failures still inside the window, oldest first.
    pub recent_failures: Vec<FailureEvent>,
    /// Current capability decisions.
    pub features: FeatureSummary,
}

impl ShieldDiagnostics {
    /// Render as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

// ── Shield ───────────────────────────────────────────────────────────────────

/// The shield layer: one instance per process.
///
/// Every method is safe to call concurrently from any thread and none of
/// them block on I/O.
pub struct Shield {
    config: ShieldConfig,
    shims: ShimSet,
    controller: Arc<ProtectiveModeController>,
    gate: FeatureGate,
    probe: CompatibilityProbe,
    report: RwLock<Option<CompatibilityReport>>,
}

impl Shield {
    /// Run the compatibility probe and feed the verdict to the controller.
    pub fn probe(&self) -> CompatibilityReport {
        let report = self.probe.run_all();
        self.controller.apply_compatibility_report(&report);
        *self.report.write().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());
        report
    }

    /// Re-run the probe on operator request.
    ///
    /// Refreshes the version warning. Protective mode is never left
    /// automatically, even if every shim now passes.
    pub fn reprobe(&self) -> CompatibilityReport {
        info!("re-probing shim compatibility");
        self.probe()
    }

    /// Latest compatibility report, if a probe has run.
    pub fn compatibility_report(&self) -> Option<CompatibilityReport> {
        self.report.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // ── Protective mode ──────────────────────────────────────────────────

    /// Force protective mode on.
    pub fn enable_protective_mode(&self) -> bool {
        self.controller.enable()
    }

    /// Turn protective mode off and clear failure history.
    pub fn disable_protective_mode(&self) -> bool {
        self.controller.disable()
    }

    /// Whether protective mode is on.
    pub fn is_protective_mode_active(&self) -> bool {
        self.controller.is_active()
    }

    /// Acknowledge the version warning.
    pub fn clear_version_warning(&self) -> bool {
        self.controller.clear_version_warning()
    }

    /// Report a shim failure. Returns the global recent-failure count.
    pub fn report_failure(&self, component: impl Into<ComponentId>, message: Option<&str>) -> usize {
        self.controller.report_failure(component, message)
    }

    /// Report a shim failure from an error value.
    pub fn report_error<E: std::error::Error>(
        &self,
        component: impl Into<ComponentId>,
        error: &E,
    ) -> usize {
        self.controller.report_error(component, error)
    }

    /// Controller status.
    pub fn status(&self) -> ProtectiveModeStatus {
        self.controller.status()
    }

    /// Set or clear the primary listener.
    pub fn set_listener(&self, listener: Option<Arc<dyn ProtectiveModeListener>>) {
        self.controller.set_listener(listener);
    }

    /// Register an additional listener.
    pub fn add_listener(&self, listener: Arc<dyn ProtectiveModeListener>) -> ListenerId {
        self.controller.add_listener(listener)
    }

    /// Unregister a listener added with [`add_listener`](Self::add_listener).
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.controller.remove_listener(id)
    }

    /// Subscribe to transition and failure events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ShieldEvent> {
        self.controller.subscribe_events()
    }

    // ── Capabilities ─────────────────────────────────────────────────────

    /// Whether `capability` is granted right now.
    pub fn is_capability_enabled(&self, capability: Capability) -> bool {
        self.gate.is_capability_enabled(capability)
    }

    /// Decide `capability` right now, with the denial reason.
    pub fn explain(&self, capability: Capability) -> CapabilityDecision {
        self.gate.explain(capability)
    }

    /// Maximum route stops for the current tier.
    pub fn max_waypoints(&self) -> u32 {
        self.gate.max_waypoints()
    }

    /// Every decision from one read of the inputs.
    pub fn summarize(&self) -> FeatureSummary {
        self.gate.summarize()
    }

    // ── Guarded shim calls ───────────────────────────────────────────────

    /// Run `operation`; on error or panic, report it and return `fallback`.
    pub fn safe_execute<T, E, F>(&self, component: impl Into<ComponentId>, fallback: T, operation: F) -> T
    where
        E: fmt::Display,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        self.controller.safe_execute(component, fallback, operation)
    }

    /// Call into `shim`, tagging the outcome.
    ///
    /// `operation` is not invoked when the shim reports itself unavailable.
    /// Errors and panics are reported against the shim's component. Gating on
    /// capability is left to the caller.
    pub fn call_shim<T, E, F>(&self, shim: &dyn Shim, operation: F) -> ShimOutcome<T>
    where
        E: fmt::Display,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        let component = component_of(shim);
        if !query_available(shim) {
            return ShimOutcome::Unavailable { component };
        }
        let (message, error_kind) = match catch_unwind(AssertUnwindSafe(operation)) {
            Ok(Ok(value)) => return ShimOutcome::Ready(value),
            Ok(Err(error)) => (error.to_string(), error_kind_of::<E>()),
            Err(payload) => (panic_message(payload.as_ref()), PANIC_ERROR_KIND.to_owned()),
        };
        self.controller
            .record_failure(component.clone(), message.clone(), error_kind);
        ShimOutcome::Failed { component, message }
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// One serializable snapshot of the whole layer.
    pub fn diagnostics(&self) -> ShieldDiagnostics {
        ShieldDiagnostics {
            generated_at: Utc::now(),
            status: self.controller.status(),
            compatibility: self.compatibility_report(),
            recent_failures: self.controller.tracker().all_recent(),
            features: self.gate.summarize(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    /// The shims this shield mediates.
    pub fn shims(&self) -> &ShimSet {
        &self.shims
    }

    /// Current tier.
    pub fn tier(&self) -> Tier {
        self.gate.current_tier()
    }

    /// The underlying controller.
    pub fn controller(&self) -> &Arc<ProtectiveModeController> {
        &self.controller
    }

    /// The underlying feature gate.
    pub fn gate(&self) -> &FeatureGate {
        &self.gate
    }
}

impl fmt::Debug for Shield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shield")
            .field("shims", &self.shims)
            .field("controller", &self.controller)
            .field("tier", &self.tier())
            .finish_non_exhaustive()
    }
}
