//! Identifiers naming the third-party subsystems the shield mediates.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque name of a shim ("maps", "gemini", "here", ...).
///
/// Any string is valid; no registry is required. The id is the partition key
/// for failure tracking and compatibility rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    /// Maps SDK shim.
    pub const MAPS: &'static str = "maps";
    /// Generative-AI shim.
    pub const GEMINI: &'static str = "gemini";
    /// Commercial truck-routing shim.
    pub const HERE: &'static str = "here";

    /// Create an id from any string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The maps shim id.
    pub fn maps() -> Self {
        Self::new(Self::MAPS)
    }

    /// The AI shim id.
    pub fn gemini() -> Self {
        Self::new(Self::GEMINI)
    }

    /// The routing shim id.
    pub fn here() -> Self {
        Self::new(Self::HERE)
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ComponentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&ComponentId> for ComponentId {
    fn from(value: &ComponentId) -> Self {
        value.clone()
    }
}

impl Borrow<str> for ComponentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ComponentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
