//! Sliding-window store of shim failures.
//!
//! Every shim exception is recorded as a [`FailureEvent`] under its
//! component. An event is *recent* while `now - recorded_at <= window`;
//! stale events are pruned on every write and every count, so the live set
//! stays bounded without a background sweeper.
//!
//! # Concurrency
//!
//! A single mutex guards the per-component histories. Insertion, pruning and
//! the returned count happen under one acquisition, so concurrent reporters
//! never lose an update and never see a torn count. An atomic mirror of the
//! live total lets the idle fast path skip the lock entirely.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::component::ComponentId;

/// Default length of the failure window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Error kind recorded when the caller supplies no error detail.
pub const UNKNOWN_ERROR_KIND: &str = "unknown";

// ── Failure event ────────────────────────────────────────────────────────────

/// One recorded shim failure. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEvent {
    /// Shim that failed.
    pub component: ComponentId,
    /// Monotonic instant used for window arithmetic.
    #[serde(skip)]
    pub recorded_at: Instant,
    /// Wall-clock time, for display only.
    pub occurred_at: DateTime<Utc>,
    /// Error text.
    pub message: String,
    /// Short error classification (type name, "panic", "timeout", ...).
    pub error_kind: String,
}

/// A failure as returned from [`FailureTracker::record`].
#[derive(Debug, Clone)]
pub struct RecordedFailure {
    /// The event that was appended.
    pub event: FailureEvent,
    /// Global recent-failure count immediately after the append.
    pub recent_failures: usize,
}

/// Consistent view of recent-failure counts taken under one lock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    /// Recent failures across every component.
    pub total: usize,
    /// Recent failures per component (components with none are omitted).
    pub per_component: BTreeMap<ComponentId, usize>,
}

// ── Tracker ──────────────────────────────────────────────────────────────────

/// Concurrency-safe sliding-window failure store.
pub struct FailureTracker {
    window: Duration,
    clock: Arc<dyn Clock>,
    histories: Mutex<HashMap<ComponentId, VecDeque<FailureEvent>>>,
    live: AtomicUsize,
    total_reported: AtomicU64,
}

impl FailureTracker {
    /// Create a tracker with the given window on the system clock.
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    /// Create a tracker driven by `clock`.
    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            histories: Mutex::new(HashMap::new()),
            live: AtomicUsize::new(0),
            total_reported: AtomicU64::new(0),
        }
    }

    /// Length of the sliding window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Append a failure and return the global recent count.
    pub fn report(
        &self,
        component: impl Into<ComponentId>,
        message: impl Into<String>,
        error_kind: impl Into<String>,
    ) -> usize {
        self.record(component, message, error_kind).recent_failures
    }

    /// Append a failure and return both the event and the global recent count.
    pub fn record(
        &self,
        component: impl Into<ComponentId>,
        message: impl Into<String>,
        error_kind: impl Into<String>,
    ) -> RecordedFailure {
        let component = component.into();
        let message = message.into();
        let error_kind = error_kind.into();

        let mut histories = self.lock();
        // Read the clock under the lock so each history stays time-ordered.
        let now = self.clock.now();
        let event = FailureEvent {
            component: component.clone(),
            recorded_at: now,
            occurred_at: Utc::now(),
            message,
            error_kind,
        };
        histories.entry(component).or_default().push_back(event.clone());
        let recent_failures = self.prune_locked(&mut histories, now);
        drop(histories);

        self.total_reported.fetch_add(1, Ordering::Relaxed);
        RecordedFailure {
            event,
            recent_failures,
        }
    }

    /// Recent failures for `component`, or across every component when `None`.
    pub fn count_recent(&self, component: Option<&str>) -> usize {
        if self.live.load(Ordering::Acquire) == 0 {
            return 0;
        }
        let mut histories = self.lock();
        let total = self.prune_locked(&mut histories, self.clock.now());
        match component {
            Some(component) => histories.get(component).map_or(0, VecDeque::len),
            None => total,
        }
    }

    /// Global and per-component recent counts from a single snapshot.
    pub fn counts(&self) -> FailureCounts {
        let mut histories = self.lock();
        let total = self.prune_locked(&mut histories, self.clock.now());
        let per_component = histories
            .iter()
            .map(|(component, events)| (component.clone(), events.len()))
            .collect();
        FailureCounts {
            total,
            per_component,
        }
    }

    /// Drop every recorded failure.
    pub fn clear_all(&self) {
        let mut histories = self.lock();
        histories.clear();
        self.live.store(0, Ordering::Release);
    }

    /// Recent failures for one component, oldest first.
    pub fn failures_for(&self, component: &str) -> Vec<FailureEvent> {
        let mut histories = self.lock();
        self.prune_locked(&mut histories, self.clock.now());
        histories
            .get(component)
            .map(|events| events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Recent failures across every component, oldest first.
    pub fn all_recent(&self) -> Vec<FailureEvent> {
        let mut histories = self.lock();
        self.prune_locked(&mut histories, self.clock.now());
        let mut events: Vec<FailureEvent> = histories.values().flatten().cloned().collect();
        events.sort_by_key(|e| e.recorded_at);
        events
    }

    /// Lifetime number of reports, including pruned and cleared ones.
    pub fn total_reported(&self) -> u64 {
        self.total_reported.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ComponentId, VecDeque<FailureEvent>>> {
        self.histories.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop stale events from every component and return the live total.
    fn prune_locked(
        &self,
        histories: &mut HashMap<ComponentId, VecDeque<FailureEvent>>,
        now: Instant,
    ) -> usize {
        let window = self.window;
        for events in histories.values_mut() {
            while events
                .front()
                .is_some_and(|e| now.saturating_duration_since(e.recorded_at) > window)
            {
                events.pop_front();
            }
        }
        histories.retain(|_, events| !events.is_empty());
        let total = histories.values().map(VecDeque::len).sum();
        self.live.store(total, Ordering::Release);
        total
    }
}

impl Default for FailureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl std::fmt::Debug for FailureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureTracker")
            .field("window", &self.window)
            .field("live", &self.live.load(Ordering::Relaxed))
            .field("total_reported", &self.total_reported())
            .finish_non_exhaustive()
    }
}
