//! Subscription tiers and the source the gate reads them from.
//!
//! The shield never decides which tier a user is on; it only consumes the
//! value published by the subscription subsystem through [`TierSource`].
//!
//! # Examples
//!
//! ```
//! use navshield::tier::Tier;
//!
//! assert!(Tier::Free < Tier::Plus);
//! assert!(Tier::Plus < Tier::Pro);
//! assert!(Tier::Pro.is_plus_or_above());
//! assert!(!Tier::Free.is_plus_or_above());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

// ---------------------------------------------------------------------------
// Tier enum
// ---------------------------------------------------------------------------

/// Subscription tier.
///
/// Variants are declared from least to most privileged, so derived `Ord`
/// gives `Free < Plus < Pro`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Unpaid tier.
    #[default]
    Free,
    /// Mid tier: in-app maps, cloud AI, multi-waypoint routes.
    Plus,
    /// Top tier: adds commercial truck routing.
    Pro,
}

impl Tier {
    /// Return all tiers in ascending order.
    pub fn all() -> &'static [Tier] {
        &[Tier::Free, Tier::Plus, Tier::Pro]
    }

    /// `true` for [`Tier::Plus`] and [`Tier::Pro`].
    #[must_use]
    pub fn is_plus_or_above(self) -> bool {
        self >= Tier::Plus
    }

    /// `true` only for [`Tier::Pro`].
    #[must_use]
    pub fn is_pro(self) -> bool {
        self == Tier::Pro
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Free => "free",
            Self::Plus => "plus",
            Self::Pro => "pro",
        };
        f.write_str(label)
    }
}

/// Error returned when parsing an unknown tier name.
#[derive(Debug, Clone)]
pub struct TierParseError(pub String);

impl fmt::Display for TierParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tier: {:?}", self.0)
    }
}

impl std::error::Error for TierParseError {}

impl FromStr for Tier {
    type Err = TierParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "plus" => Ok(Tier::Plus),
            "pro" => Ok(Tier::Pro),
            _ => Err(TierParseError(s.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tier sources
// ---------------------------------------------------------------------------

/// Read-only view of the user's current tier.
///
/// Callers re-query per decision; implementations must be cheap and must not
/// block.
pub trait TierSource: Send + Sync {
    /// The tier in effect right now.
    fn current_tier(&self) -> Tier;
}

/// A tier that never changes. Useful for tests and headless tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTier(pub Tier);

impl TierSource for FixedTier {
    fn current_tier(&self) -> Tier {
        self.0
    }
}

/// A tier the subscription subsystem can update at runtime.
///
/// Clones share the same underlying value, so a purchase recorded through one
/// handle is visible to every gate holding another.
#[derive(Debug, Clone, Default)]
pub struct SharedTier {
    inner: Arc<RwLock<Tier>>,
}

impl SharedTier {
    /// Create a shared tier starting at `tier`.
    pub fn new(tier: Tier) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tier)),
        }
    }

    /// Publish a new tier.
    pub fn set(&self, tier: Tier) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = tier;
    }
}

impl TierSource for SharedTier {
    fn current_tier(&self) -> Tier {
        *self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}
