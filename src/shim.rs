//! Narrow contracts the shield consumes from the third-party subsystems.
//!
//! A shim wraps one vendor SDK (maps, generative AI, commercial routing). The
//! shield only ever asks it two questions: is it ready right now, and which
//! version is loaded. Everything else a shim does is opaque here.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::component::ComponentId;

/// A third-party subsystem the shield mediates.
///
/// Both queries must be non-blocking. Implementations should not panic, but
/// the shield guards every call regardless.
pub trait Shim: Send + Sync {
    /// Stable id used for failure tracking and compatibility rules.
    fn component(&self) -> ComponentId;

    /// Whether the underlying SDK is initialised and ready for calls.
    fn is_available(&self) -> bool;

    /// Version string exposed by the SDK's own introspection, if readable.
    fn detect_version(&self) -> Option<String>;
}

/// Id reported for a shim whose `component()` panics.
pub const UNKNOWN_COMPONENT: &str = "unknown";

/// Read a shim's id, falling back to [`UNKNOWN_COMPONENT`] if it panics.
pub fn component_of(shim: &dyn Shim) -> ComponentId {
    catch_unwind(AssertUnwindSafe(|| shim.component()))
        .unwrap_or_else(|_| ComponentId::new(UNKNOWN_COMPONENT))
}

/// Ask a shim whether it is available, treating a panic as "not available".
pub fn query_available(shim: &dyn Shim) -> bool {
    catch_unwind(AssertUnwindSafe(|| shim.is_available())).unwrap_or_else(|_| {
        tracing::warn!(component = %component_of(shim), "availability query panicked");
        false
    })
}

// ── Static shim ──────────────────────────────────────────────────────────────

/// A shim whose availability and version are set explicitly.
///
/// Used by headless tools and tests in place of a real SDK wrapper. State is
/// interior-mutable so a test can flip availability after boot.
#[derive(Debug)]
pub struct StaticShim {
    component: ComponentId,
    available: AtomicBool,
    version: Mutex<Option<String>>,
}

impl StaticShim {
    /// Create an available shim reporting `version`.
    pub fn new(component: impl Into<ComponentId>, version: Option<&str>) -> Self {
        Self {
            component: component.into(),
            available: AtomicBool::new(true),
            version: Mutex::new(version.map(ToOwned::to_owned)),
        }
    }

    /// Create a shim that is not available and exposes no version.
    pub fn unavailable(component: impl Into<ComponentId>) -> Self {
        let shim = Self::new(component, None);
        shim.set_available(false);
        shim
    }

    /// Change the availability reported from now on.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Change the detected version reported from now on.
    pub fn set_version(&self, version: Option<&str>) {
        *self.version.lock().unwrap_or_else(|e| e.into_inner()) = version.map(ToOwned::to_owned);
    }
}

impl Shim for StaticShim {
    fn component(&self) -> ComponentId {
        self.component.clone()
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn detect_version(&self) -> Option<String> {
        self.version.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

// ── Shim set ─────────────────────────────────────────────────────────────────

/// The three shims a navigation client is built from.
#[derive(Clone)]
pub struct ShimSet {
    /// Maps SDK.
    pub maps: Arc<dyn Shim>,
    /// Generative-AI SDK.
    pub ai: Arc<dyn Shim>,
    /// Commercial truck-routing SDK.
    pub routing: Arc<dyn Shim>,
}

impl ShimSet {
    /// Bundle the three shims.
    pub fn new(maps: Arc<dyn Shim>, ai: Arc<dyn Shim>, routing: Arc<dyn Shim>) -> Self {
        Self { maps, ai, routing }
    }

    /// All shims in probe order (maps, AI, routing).
    pub fn all(&self) -> [&Arc<dyn Shim>; 3] {
        [&self.maps, &self.ai, &self.routing]
    }

    /// Query each shim's availability once.
    pub fn availability(&self) -> ShimAvailability {
        ShimAvailability {
            maps: query_available(self.maps.as_ref()),
            ai: query_available(self.ai.as_ref()),
            routing: query_available(self.routing.as_ref()),
        }
    }
}

impl std::fmt::Debug for ShimSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimSet")
            .field("maps", &component_of(self.maps.as_ref()))
            .field("ai", &component_of(self.ai.as_ref()))
            .field("routing", &component_of(self.routing.as_ref()))
            .finish()
    }
}

/// Point-in-time availability of each shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShimAvailability {
    /// Maps shim ready.
    pub maps: bool,
    /// AI shim ready.
    pub ai: bool,
    /// Routing shim ready.
    pub routing: bool,
}

impl ShimAvailability {
    /// Every shim available.
    pub const ALL: Self = Self {
        maps: true,
        ai: true,
        routing: true,
    };

    /// No shim available.
    pub const NONE: Self = Self {
        maps: false,
        ai: false,
        routing: false,
    };
}

// ── Tagged call outcome ──────────────────────────────────────────────────────

/// Result of invoking a shim through the shield.
///
/// Replaces placeholder sentinel values: a caller can always tell a real
/// answer from "the SDK was not there" from "the SDK blew up".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShimOutcome<T> {
    /// The shim answered.
    Ready(T),
    /// The shim reported itself unavailable; the operation was not invoked.
    Unavailable {
        /// Which shim.
        component: ComponentId,
    },
    /// The operation raised; the failure has already been reported.
    Failed {
        /// Which shim.
        component: ComponentId,
        /// Error text captured from the failure.
        message: String,
    },
}

impl<T> ShimOutcome<T> {
    /// Whether the shim produced a value.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The value, if the shim produced one.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Unavailable { .. } | Self::Failed { .. } => None,
        }
    }

    /// The value, or `fallback` when the shim was unavailable or failed.
    pub fn unwrap_or(self, fallback: T) -> T {
        self.ready().unwrap_or(fallback)
    }
}
