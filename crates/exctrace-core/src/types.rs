//! Small shared types used across the error, model and output layers.

use serde::{Deserialize, Serialize};

/// A 1-indexed source location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    /// Workspace-relative file path.
    pub file: String,
    /// Line number (1-indexed).
    pub line: u32,
}

impl Location {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Location {
            file: file.into(),
            line,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Confidence label attached to propagated exception evidence.
///
/// Derived from the resolution kinds along a [`crate::propagation::PropagatedRaise`]
/// path: `low` if any hop is a name-fallback or polymorphic edge, else `medium`
/// if any hop came from a return-type resolution, else `high`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Propagation resolution mode selected for a session (spec §4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    Strict,
    Default,
    Aggressive,
}

impl Default for ResolutionMode {
    fn default() -> Self {
        ResolutionMode::Default
    }
}

impl std::fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResolutionMode::Strict => "strict",
            ResolutionMode::Default => "default",
            // Open Question #1 (DESIGN.md): aggressive collapses to default.
            ResolutionMode::Aggressive => "aggressive",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_display() {
        let loc = Location::new("a.py", 10);
        assert_eq!(loc.to_string(), "a.py:10");
    }

    #[test]
    fn confidence_ordering() {
        assert!(Confidence::Low < Confidence::Medium);
        assert!(Confidence::Medium < Confidence::High);
    }

    #[test]
    fn resolution_mode_default_is_default() {
        assert_eq!(ResolutionMode::default(), ResolutionMode::Default);
    }
}
