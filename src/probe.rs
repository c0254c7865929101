//! One-shot compatibility probe run at process start.
//!
//! For every known shim the probe reads the version the SDK reports about
//! itself and classifies it against a configured known-good range. Nothing
//! here touches the network or disk, and nothing here panics or returns an
//! error: a version that cannot be read, cannot be parsed, or whose
//! introspection call blows up is simply classified as *unsafe*.
//!
//! The caller (the boot sequence in [`crate::shield`]) feeds the resulting
//! [`CompatibilityReport`] into the protective-mode controller.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::component::ComponentId;
use crate::error::{Result, ShieldError};
use crate::metrics::{NoopMetrics, ShieldMetrics};
use crate::shim::{Shim, ShimSet, component_of};

// ── Versions ─────────────────────────────────────────────────────────────────

/// A `major.minor.patch` version reported by a shim.
///
/// Accepts `"18"`, `"18.2"`, `"v18.2.0"` and pre-release suffixes such as
/// `"0.9.1-beta02"`; missing components default to zero and the suffix is
/// ignored for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShimVersion {
    /// Breaking-release number.
    pub major: u64,
    /// Feature-release number.
    pub minor: u64,
    /// Fix-release number.
    pub patch: u64,
}

impl ShimVersion {
    /// Build a version from its three components.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ShimVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for ShimVersion {
    type Err = ShieldError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let candidate = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let numeric_end = candidate
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(candidate.len());
        let numeric = candidate[..numeric_end].trim_end_matches('.');
        if numeric.is_empty() {
            return Err(ShieldError::Version(format!("no numeric version in {s:?}")));
        }

        let parts: Vec<&str> = numeric.split('.').collect();
        if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(ShieldError::Version(format!("malformed version {s:?}")));
        }
        let mut nums = [0_u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| ShieldError::Version(format!("component out of range in {s:?}")))?;
        }
        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

// ── Rules ────────────────────────────────────────────────────────────────────

/// Known-good version range for one shim.
///
/// `min_version` is inclusive, `max_version` exclusive. Either bound may be
/// omitted; a rule with neither accepts any readable version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityRule {
    /// Lowest accepted version (inclusive).
    pub min_version: Option<String>,
    /// First rejected version (exclusive).
    pub max_version: Option<String>,
}

impl CompatibilityRule {
    /// Rule accepting `[min, max)`.
    pub fn range(min: &str, max: &str) -> Self {
        Self {
            min_version: Some(min.to_owned()),
            max_version: Some(max.to_owned()),
        }
    }

    /// Check that both bounds parse and that `min < max`.
    ///
    /// # Errors
    ///
    /// Returns [`ShieldError::Version`] for an unparseable bound and
    /// [`ShieldError::Config`] for an empty range.
    pub fn validate(&self) -> Result<()> {
        let (min, max) = self.bounds()?;
        if let (Some(min), Some(max)) = (min, max) {
            if min >= max {
                return Err(ShieldError::Config(format!(
                    "compatibility range is empty: min {min} >= max {max}"
                )));
            }
        }
        Ok(())
    }

    /// Classify `version` against this rule.
    fn classify(&self, version: ShimVersion) -> Result<VerdictReason> {
        let (min, max) = self.bounds()?;
        if min.is_some_and(|min| version < min) {
            return Ok(VerdictReason::BelowMinimum);
        }
        if max.is_some_and(|max| version >= max) {
            return Ok(VerdictReason::AtOrAboveMaximum);
        }
        Ok(VerdictReason::Compatible)
    }

    fn bounds(&self) -> Result<(Option<ShimVersion>, Option<ShimVersion>)> {
        let min = self
            .min_version
            .as_deref()
            .map(str::parse::<ShimVersion>)
            .transpose()?;
        let max = self
            .max_version
            .as_deref()
            .map(str::parse::<ShimVersion>)
            .transpose()?;
        Ok((min, max))
    }
}

/// Default known-good ranges for the three shipped shims.
pub fn default_rules() -> BTreeMap<String, CompatibilityRule> {
    let mut rules = BTreeMap::new();
    rules.insert(
        ComponentId::MAPS.to_owned(),
        CompatibilityRule::range("18.0.0", "20.0.0"),
    );
    rules.insert(
        ComponentId::GEMINI.to_owned(),
        CompatibilityRule::range("0.9.0", "1.0.0"),
    );
    rules.insert(
        ComponentId::HERE.to_owned(),
        CompatibilityRule::range("4.17.0", "5.0.0"),
    );
    rules
}

// ── Verdicts ─────────────────────────────────────────────────────────────────

/// Why a shim was classified the way it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictReason {
    /// Version is inside the known-good range.
    Compatible,
    /// No rule is configured for this shim and its version was readable.
    NoRule,
    /// The shim did not expose a version.
    VersionUnreadable,
    /// The exposed version string could not be parsed.
    VersionUnparseable,
    /// Older than the minimum supported version.
    BelowMinimum,
    /// At or beyond the first unsupported version.
    AtOrAboveMaximum,
    /// The configured rule itself is malformed.
    InvalidRule,
    /// The introspection call panicked.
    ProbePanicked,
}

impl VerdictReason {
    /// Whether this reason means the shim is safe to use.
    pub fn is_safe(self) -> bool {
        matches!(self, Self::Compatible | Self::NoRule)
    }
}

impl fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Compatible => "compatible",
            Self::NoRule => "no rule",
            Self::VersionUnreadable => "version unreadable",
            Self::VersionUnparseable => "version unparseable",
            Self::BelowMinimum => "below minimum",
            Self::AtOrAboveMaximum => "at or above maximum",
            Self::InvalidRule => "invalid rule",
            Self::ProbePanicked => "probe panicked",
        };
        f.write_str(s)
    }
}

/// Compatibility verdict for a single shim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityVerdict {
    /// Which shim.
    pub component: ComponentId,
    /// Version string the shim reported, if any.
    pub detected_version: Option<String>,
    /// Whether the shim is safe to use.
    pub is_safe: bool,
    /// Classification detail.
    pub reason: VerdictReason,
}

impl CompatibilityVerdict {
    fn new(component: ComponentId, detected_version: Option<String>, reason: VerdictReason) -> Self {
        Self {
            component,
            detected_version,
            is_safe: reason.is_safe(),
            reason,
        }
    }
}

/// Aggregate result of a probe run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    /// One verdict per probed shim, in probe order.
    pub verdicts: Vec<CompatibilityVerdict>,
    /// AND of every verdict.
    pub all_safe: bool,
    /// When the probe ran.
    pub probed_at: DateTime<Utc>,
}

impl CompatibilityReport {
    /// Build a report from verdicts, deriving `all_safe`.
    pub fn from_verdicts(verdicts: Vec<CompatibilityVerdict>) -> Self {
        let all_safe = verdicts.iter().all(|v| v.is_safe);
        Self {
            verdicts,
            all_safe,
            probed_at: Utc::now(),
        }
    }

    /// Verdict for a given shim.
    pub fn verdict_for(&self, component: &str) -> Option<&CompatibilityVerdict> {
        self.verdicts
            .iter()
            .find(|v| v.component.as_str() == component)
    }

    /// Shims classified unsafe.
    pub fn unsafe_components(&self) -> Vec<ComponentId> {
        self.verdicts
            .iter()
            .filter(|v| !v.is_safe)
            .map(|v| v.component.clone())
            .collect()
    }
}

// ── Probe ────────────────────────────────────────────────────────────────────

/// Runs the per-shim compatibility checks.
pub struct CompatibilityProbe {
    shims: Vec<Arc<dyn Shim>>,
    rules: BTreeMap<String, CompatibilityRule>,
    metrics: Arc<dyn ShieldMetrics>,
}

impl CompatibilityProbe {
    /// Probe an arbitrary list of shims against `rules`.
    pub fn new(shims: Vec<Arc<dyn Shim>>, rules: BTreeMap<String, CompatibilityRule>) -> Self {
        Self {
            shims,
            rules,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Probe the maps, AI and routing shims.
    pub fn for_shim_set(shims: &ShimSet, rules: BTreeMap<String, CompatibilityRule>) -> Self {
        Self::new(shims.all().into_iter().cloned().collect(), rules)
    }

    /// Report verdicts to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ShieldMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Probe every shim once and aggregate the verdicts.
    pub fn run_all(&self) -> CompatibilityReport {
        let verdicts = self.shims.iter().map(|shim| self.probe_one(shim.as_ref())).collect();
        let report = CompatibilityReport::from_verdicts(verdicts);
        if report.all_safe {
            info!(shims = report.verdicts.len(), "compatibility probe: all shims safe");
        } else {
            warn!(
                unsafe_components = ?report.unsafe_components(),
                "compatibility probe: incompatible shims detected"
            );
        }
        report
    }

    /// Classify a single shim. Never panics.
    pub fn probe_one(&self, shim: &dyn Shim) -> CompatibilityVerdict {
        let component = component_of(shim);

        let verdict = match catch_unwind(AssertUnwindSafe(|| shim.detect_version())) {
            Ok(detected) => {
                let reason = self.classify(&component, detected.as_deref());
                CompatibilityVerdict::new(component, detected, reason)
            }
            Err(_) => CompatibilityVerdict::new(component, None, VerdictReason::ProbePanicked),
        };

        if verdict.is_safe {
            info!(
                component = %verdict.component,
                detected_version = verdict.detected_version.as_deref().unwrap_or("-"),
                reason = %verdict.reason,
                "shim compatible"
            );
        } else {
            warn!(
                component = %verdict.component,
                detected_version = verdict.detected_version.as_deref().unwrap_or("-"),
                reason = %verdict.reason,
                "shim incompatible"
            );
        }
        self.metrics
            .count_probe_verdict(verdict.component.as_str(), verdict.is_safe);
        verdict
    }

    fn classify(&self, component: &ComponentId, detected: Option<&str>) -> VerdictReason {
        let Some(raw) = detected else {
            return VerdictReason::VersionUnreadable;
        };
        let Ok(version) = raw.parse::<ShimVersion>() else {
            return VerdictReason::VersionUnparseable;
        };
        match self.rules.get(component.as_str()) {
            None => VerdictReason::NoRule,
            Some(rule) => rule.classify(version).unwrap_or(VerdictReason::InvalidRule),
        }
    }
}
