//! Protective-mode controller.
//!
//! Owns the single global "protective mode" flag and the "version warning"
//! flag, drives them from compatibility reports and failure-threshold
//! crossings, and fans transitions out to listeners.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────┐  incompatible shim at boot   ┌─────────┐
//! │ Disabled ├─────────────────────────────►│ Enabled │
//! └────▲─────┘  recent failures >= threshold└────┬────┘
//!      │        manual enable()                  │
//!      │                                         │
//!      └──────────── manual disable() ───────────┘
//!                   (also clears failures)
//! ```
//!
//! There is no automatic path back to `Disabled`. Once tripped, an operator
//! or the user has to clear it, which keeps the mode from flapping under
//! persistent partial failures.
//!
//! # Notifications
//!
//! Listeners are called synchronously after the state change is applied and
//! after every internal lock is released, so a listener may call back into
//! the controller. A panicking listener is logged and skipped. Every
//! notification is also published on a [`broadcast`] channel for async
//! consumers; having no subscribers is not an error.
//!
//! Mode and version-warning changes are delivered by one thread at a time,
//! in transition order. If a transition lands while another thread is still
//! delivering, that thread delivers it after the change in flight, so the
//! last notification a listener sees always matches [`is_active`].
//!
//! [`is_active`]: ProtectiveModeController::is_active

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::component::ComponentId;
use crate::failure_tracker::{FailureEvent, FailureTracker, UNKNOWN_ERROR_KIND};
use crate::metrics::{NoopMetrics, ShieldMetrics};
use crate::probe::CompatibilityReport;

/// Default number of recent failures that trips protective mode.
pub const DEFAULT_THRESHOLD: usize = 3;

/// Default capacity of the [`ShieldEvent`] broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Error kind recorded for a panic caught by [`ProtectiveModeController::safe_execute`].
pub const PANIC_ERROR_KIND: &str = "panic";

// ── Reasons, events, listeners ───────────────────────────────────────────────

/// Why protective mode was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModeReason {
    /// One or more shims failed the boot compatibility probe.
    CompatibilityFailure {
        /// Shims classified unsafe.
        components: Vec<ComponentId>,
    },
    /// Recent failures reached the threshold.
    FailureThreshold {
        /// Global recent count at the moment of the trip.
        recent_failures: usize,
    },
    /// Forced on by an operator or the user.
    Manual,
}

impl ModeReason {
    /// Stable snake_case label, used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CompatibilityFailure { .. } => "compatibility_failure",
            Self::FailureThreshold { .. } => "failure_threshold",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for ModeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompatibilityFailure { components } => {
                let names: Vec<&str> = components.iter().map(ComponentId::as_str).collect();
                write!(f, "incompatible shims: {}", names.join(", "))
            }
            Self::FailureThreshold { recent_failures } => {
                write!(f, "{recent_failures} recent failures")
            }
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Observer of controller transitions. Every method has an empty default.
pub trait ProtectiveModeListener: Send + Sync {
    /// Protective mode changed. Only called on effective transitions.
    fn on_mode_changed(&self, active: bool) {
        let _ = active;
    }

    /// A failure was reported, whether or not it tripped the mode.
    fn on_failure_reported(&self, failure: &FailureEvent) {
        let _ = failure;
    }

    /// The version-warning flag changed.
    fn on_version_warning_changed(&self, warning: bool) {
        let _ = warning;
    }
}

/// Handle returned by [`ProtectiveModeController::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event published on the controller's broadcast channel.
#[derive(Debug, Clone)]
pub enum ShieldEvent {
    /// Protective mode changed.
    ModeChanged {
        /// New state.
        active: bool,
        /// Why it was entered (`None` when leaving).
        reason: Option<ModeReason>,
    },
    /// The version-warning flag changed.
    VersionWarningChanged {
        /// New state.
        warning: bool,
    },
    /// A failure was reported.
    FailureReported(FailureEvent),
}

/// Read-only status for settings and debug surfaces.
///
/// Fields are read in two steps (flags, then counts), so the snapshot is not
/// atomic across all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtectiveModeStatus {
    /// Protective mode is on.
    pub active: bool,
    /// A shim failed the compatibility probe.
    pub version_warning: bool,
    /// Recent failures across all components.
    pub recent_failure_count: usize,
    /// Count that trips protective mode.
    pub threshold: usize,
    /// Recent failures per component.
    pub per_component_failure_count: BTreeMap<ComponentId, usize>,
    /// Why the mode is on, if it is.
    pub reason: Option<ModeReason>,
    /// When the mode was entered, if it is on.
    pub entered_at: Option<DateTime<Utc>>,
    /// Lifetime number of failure reports.
    pub total_failures_reported: u64,
}

// ── Controller ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ModeState {
    active: bool,
    version_warning: bool,
    reason: Option<ModeReason>,
    entered_at: Option<DateTime<Utc>>,
}

/// What listeners and subscribers have been told so far.
///
/// Only the thread that set `running` delivers. A transition made while
/// another thread is delivering is picked up by that thread's loop.
#[derive(Debug, Default)]
struct Delivery {
    running: bool,
    active: bool,
    version_warning: bool,
}

#[derive(Default)]
struct Listeners {
    primary: Option<Arc<dyn ProtectiveModeListener>>,
    registered: Vec<(ListenerId, Arc<dyn ProtectiveModeListener>)>,
}

impl Listeners {
    fn snapshot(&self) -> Vec<Arc<dyn ProtectiveModeListener>> {
        self.primary
            .iter()
            .cloned()
            .chain(self.registered.iter().map(|(_, l)| Arc::clone(l)))
            .collect()
    }
}

/// Owner of the global protective-mode flag.
pub struct ProtectiveModeController {
    tracker: FailureTracker,
    threshold: usize,
    state: Mutex<ModeState>,
    active: AtomicBool,
    delivery: Mutex<Delivery>,
    listeners: RwLock<Listeners>,
    next_listener_id: AtomicU64,
    events: broadcast::Sender<ShieldEvent>,
    metrics: Arc<dyn ShieldMetrics>,
}

impl ProtectiveModeController {
    /// Create a controller in the `Disabled` state.
    pub fn new(tracker: FailureTracker, threshold: usize) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            tracker,
            threshold: threshold.max(1),
            state: Mutex::new(ModeState::default()),
            active: AtomicBool::new(false),
            delivery: Mutex::new(Delivery::default()),
            listeners: RwLock::new(Listeners::default()),
            next_listener_id: AtomicU64::new(1),
            events,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Send transition and failure counts to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ShieldMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Resize the event broadcast channel.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        self.events = events;
        self
    }

    /// The underlying failure tracker.
    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    /// Recent-failure count that trips protective mode.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether protective mode is on. Lock-free.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether a shim failed the compatibility probe.
    pub fn version_warning(&self) -> bool {
        self.lock_state().version_warning
    }

    /// Force protective mode on. Returns `true` if this call changed the state.
    pub fn enable(&self) -> bool {
        self.enter(ModeReason::Manual)
    }

    /// Turn protective mode off and clear every recorded failure.
    ///
    /// Returns `true` if this call changed the state. Disabling when already
    /// disabled is a no-op and does not touch the failure history.
    pub fn disable(&self) -> bool {
        {
            let mut state = self.lock_state();
            if !state.active {
                return false;
            }
            state.active = false;
            state.reason = None;
            state.entered_at = None;
            // Clear under the state lock so stale failures cannot re-trip
            // the mode between the flip and the clear.
            self.tracker.clear_all();
            self.active.store(false, Ordering::Release);
        }

        info!("protective mode disabled; failure history cleared");
        self.metrics.count_mode_transition(false, ModeReason::Manual.label());
        self.deliver_transitions();
        true
    }

    /// Feed the boot-time compatibility report into the controller.
    ///
    /// Sets the version warning iff some shim is unsafe, and in that case
    /// enters protective mode before any shim is touched.
    pub fn apply_compatibility_report(&self, report: &CompatibilityReport) {
        self.set_version_warning(!report.all_safe);
        if !report.all_safe {
            self.enter(ModeReason::CompatibilityFailure {
                components: report.unsafe_components(),
            });
        }
    }

    /// Clear the version-warning flag. Protective mode is left as is.
    pub fn clear_version_warning(&self) -> bool {
        self.set_version_warning(false)
    }

    /// Report a shim failure with an optional message.
    ///
    /// Returns the global recent-failure count. If it reaches the threshold
    /// the mode is entered before this returns.
    pub fn report_failure(&self, component: impl Into<ComponentId>, message: Option<&str>) -> usize {
        self.record_failure(
            component,
            message.unwrap_or("unspecified failure"),
            UNKNOWN_ERROR_KIND,
        )
    }

    /// Report a shim failure from an error value, using its type as the kind.
    ///
    /// The kind is the last segment of the type name, so it is coarse for
    /// generic error types: `std::io::Error` and `anyhow::Error` are both
    /// `"Error"`, and a `&str` error is `"str"`. Use
    /// [`record_failure`](Self::record_failure) to pass a precise kind.
    pub fn report_error<E>(&self, component: impl Into<ComponentId>, error: &E) -> usize
    where
        E: std::error::Error,
    {
        self.record_failure(component, error.to_string(), error_kind_of::<E>())
    }

    /// Report a shim failure with an explicit error kind.
    pub fn record_failure(
        &self,
        component: impl Into<ComponentId>,
        message: impl Into<String>,
        error_kind: impl Into<String>,
    ) -> usize {
        let recorded = self.tracker.record(component, message, error_kind);
        let event = recorded.event;
        let recent = recorded.recent_failures;

        debug!(
            component = %event.component,
            error_kind = %event.error_kind,
            recent_failures = recent,
            threshold = self.threshold,
            "shim failure reported"
        );
        self.metrics
            .count_failure(event.component.as_str(), &event.error_kind);
        self.notify(|l| l.on_failure_reported(&event));
        self.publish(ShieldEvent::FailureReported(event));

        if recent >= self.threshold
            && self.enter(ModeReason::FailureThreshold {
                recent_failures: recent,
            })
        {
            warn!(
                recent_failures = recent,
                threshold = self.threshold,
                "failure threshold crossed"
            );
        }
        recent
    }

    /// Run `operation`; on error or panic, report it and return `fallback`.
    ///
    /// Never propagates the error. This is the sanctioned way to call a shim
    /// when graceful degradation is wanted instead of an error.
    ///
    /// Errors are reported with a kind derived from `E` as described on
    /// [`report_error`](Self::report_error); panics use `"panic"`.
    pub fn safe_execute<T, E, F>(&self, component: impl Into<ComponentId>, fallback: T, operation: F) -> T
    where
        E: fmt::Display,
        F: FnOnce() -> std::result::Result<T, E>,
    {
        match catch_unwind(AssertUnwindSafe(operation)) {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => {
                self.record_failure(component, error.to_string(), error_kind_of::<E>());
                fallback
            }
            Err(payload) => {
                self.record_failure(component, panic_message(payload.as_ref()), PANIC_ERROR_KIND);
                fallback
            }
        }
    }

    /// Point-in-time status.
    pub fn status(&self) -> ProtectiveModeStatus {
        let (active, version_warning, reason, entered_at) = {
            let state = self.lock_state();
            (
                state.active,
                state.version_warning,
                state.reason.clone(),
                state.entered_at,
            )
        };
        let counts = self.tracker.counts();
        ProtectiveModeStatus {
            active,
            version_warning,
            recent_failure_count: counts.total,
            threshold: self.threshold,
            per_component_failure_count: counts.per_component,
            reason,
            entered_at,
            total_failures_reported: self.tracker.total_reported(),
        }
    }

    // ── Listener registry ────────────────────────────────────────────────

    /// Register a listener. Listeners are called in registration order.
    pub fn add_listener(&self, listener: Arc<dyn ProtectiveModeListener>) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.write_listeners().registered.push((id, listener));
        id
    }

    /// Unregister a listener. Returns `false` if the id was unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.write_listeners();
        let before = listeners.registered.len();
        listeners.registered.retain(|(existing, _)| *existing != id);
        listeners.registered.len() != before
    }

    /// Set or clear the primary listener slot.
    ///
    /// The primary slot is separate from listeners added through
    /// [`add_listener`](Self::add_listener); replacing it never drops them.
    /// The primary listener is notified first.
    pub fn set_listener(&self, listener: Option<Arc<dyn ProtectiveModeListener>>) {
        self.write_listeners().primary = listener;
    }

    /// Number of listeners, including the primary slot.
    pub fn listener_count(&self) -> usize {
        let listeners = self.read_listeners();
        listeners.registered.len() + usize::from(listeners.primary.is_some())
    }

    /// Subscribe to the event broadcast.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ShieldEvent> {
        self.events.subscribe()
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Enter protective mode. Returns `true` on an effective transition.
    fn enter(&self, reason: ModeReason) -> bool {
        {
            let mut state = self.lock_state();
            if state.active {
                return false;
            }
            state.active = true;
            state.reason = Some(reason.clone());
            state.entered_at = Some(Utc::now());
            self.active.store(true, Ordering::Release);
        }

        warn!(reason = %reason, kind = reason.label(), "protective mode enabled");
        self.metrics.count_mode_transition(true, reason.label());
        self.deliver_transitions();
        true
    }

    fn set_version_warning(&self, warning: bool) -> bool {
        {
            let mut state = self.lock_state();
            if state.version_warning == warning {
                return false;
            }
            state.version_warning = warning;
        }

        if warning {
            warn!("version warning raised");
        } else {
            info!("version warning cleared");
        }
        self.deliver_transitions();
        true
    }

    /// Bring listeners and subscribers up to date with the current flags.
    ///
    /// Changes are delivered one at a time, in order, and the last thing
    /// delivered always matches the state at the time the loop exits. If
    /// another thread is already delivering, it takes over this change and
    /// the call returns at once. Listeners may call back into the controller,
    /// including `enable`/`disable`, without deadlocking.
    ///
    /// A flag that flips and flips back while a delivery is in flight may be
    /// coalesced into no notification.
    fn deliver_transitions(&self) {
        {
            let mut delivery = self.lock_delivery();
            if delivery.running {
                return;
            }
            delivery.running = true;
        }

        loop {
            let event = {
                // Lock order: delivery, then state. Reading state under the
                // delivery lock means a concurrent transition either sees
                // `running` cleared or is included in this snapshot.
                let mut delivery = self.lock_delivery();
                let (active, version_warning, reason) = {
                    let state = self.lock_state();
                    (state.active, state.version_warning, state.reason.clone())
                };
                if delivery.version_warning != version_warning {
                    delivery.version_warning = version_warning;
                    ShieldEvent::VersionWarningChanged {
                        warning: version_warning,
                    }
                } else if delivery.active != active {
                    delivery.active = active;
                    ShieldEvent::ModeChanged { active, reason }
                } else {
                    delivery.running = false;
                    return;
                }
            };

            match &event {
                ShieldEvent::ModeChanged { active, .. } => {
                    let active = *active;
                    self.notify(|l| l.on_mode_changed(active));
                }
                ShieldEvent::VersionWarningChanged { warning } => {
                    let warning = *warning;
                    self.notify(|l| l.on_version_warning_changed(warning));
                }
                ShieldEvent::FailureReported(_) => {}
            }
            self.publish(event);
        }
    }

    fn notify(&self, call: impl Fn(&dyn ProtectiveModeListener)) {
        let listeners = self.read_listeners().snapshot();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| call(listener.as_ref()))).is_err() {
                warn!("protective mode listener panicked; continuing");
            }
        }
    }

    fn publish(&self, event: ShieldEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ModeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_delivery(&self) -> std::sync::MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_listeners(&self) -> std::sync::RwLockReadGuard<'_, Listeners> {
        self.listeners.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_listeners(&self) -> std::sync::RwLockWriteGuard<'_, Listeners> {
        self.listeners.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for ProtectiveModeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectiveModeController")
            .field("active", &self.is_active())
            .field("threshold", &self.threshold)
            .field("tracker", &self.tracker)
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

/// Last path segment of `E`'s type name (`"io::Error"` → `"Error"`).
///
/// References and `Box`/`Arc`/`Rc` wrappers are looked through, so
/// `Box<QuotaError>` is `"QuotaError"`. For a trait object the first trait
/// is used: `Box<dyn Error + Send>` is `"Error"`.
pub(crate) fn error_kind_of<E: ?Sized>() -> String {
    let mut name = std::any::type_name::<E>().trim();
    loop {
        name = name
            .trim_start_matches('&')
            .trim_start_matches("mut ")
            .trim_start_matches("dyn ")
            .trim();
        let Some(open) = name.find('<') else {
            break;
        };
        let outer = &name[..open];
        if matches!(last_segment(outer), "Box" | "Arc" | "Rc") && name.ends_with('>') {
            name = &name[open + 1..name.len() - 1];
        } else {
            name = outer;
            break;
        }
    }
    let first_bound = name.split(" + ").next().unwrap_or(name);
    last_segment(first_bound).to_owned()
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

/// Text carried by a panic payload, if any.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "operation panicked".to_owned()
    }
}
