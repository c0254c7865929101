//! Metrics hooks for the shield layer.
//!
//! The [`ShieldMetrics`] trait lets the host application plug in whatever
//! backend it already uses (Prometheus, StatsD, a debug overlay) while the
//! shield core stays decoupled from any of them.
//!
//! # Thread Safety
//!
//! All methods take `&self`. Implementors should use interior mutability
//! (atomics, `Mutex`) since calls arrive concurrently from many call sites.

/// Metrics collection interface for shield operations.
///
/// The default [`NoopMetrics`] implementation does nothing.
pub trait ShieldMetrics: Send + Sync {
    /// A shim failure was reported.
    ///
    /// # Arguments
    /// - `component` - Shim id (e.g., "maps", "gemini", "here")
    /// - `error_kind` - Short error classification (e.g., "timeout", "panic")
    fn count_failure(&self, component: &str, error_kind: &str);

    /// Protective mode changed state.
    ///
    /// # Arguments
    /// - `active` - New state
    /// - `reason` - Why it changed (e.g., "failure_threshold", "manual")
    fn count_mode_transition(&self, active: bool, reason: &str);

    /// A compatibility verdict was produced.
    ///
    /// # Arguments
    /// - `component` - Shim id
    /// - `safe` - Whether the shim was classified safe
    fn count_probe_verdict(&self, component: &str, safe: bool);
}

/// No-op metrics collector (default implementation).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl ShieldMetrics for NoopMetrics {
    fn count_failure(&self, _component: &str, _error_kind: &str) {
        // No-op
    }

    fn count_mode_transition(&self, _active: bool, _reason: &str) {
        // No-op
    }

    fn count_probe_verdict(&self, _component: &str, _safe: bool) {
        // No-op
    }
}
