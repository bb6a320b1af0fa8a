//! Plugin results, violations, and the action ordering

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome action of a plugin application
///
/// The derive order gives `Allow < Audit < Warn < Block`, so the aggregated
/// action of a chain is simply the maximum of its contributions.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PluginAction {
    /// No objection
    #[default]
    Allow,
    /// Record for audit, do not surface to the client
    Audit,
    /// Surface a warning alongside the result
    Warn,
    /// Reject the request
    Block,
}

impl PluginAction {
    /// Stable tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Audit => "audit",
            Self::Warn => "warn",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for PluginAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected violation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Machine-readable violation type (e.g. `pattern_match`, `pii`)
    pub violation_type: String,
    /// Category within the type (e.g. `email`, `deny`, `hate`)
    pub category: String,
    /// Severity tag: `low`, `medium`, `high`, `critical`
    pub severity: String,
    /// Detector confidence in [0.0, 1.0]
    pub confidence: f64,
    /// Matched pattern or provider tag, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Byte offset of the match in the raw content, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

impl Violation {
    /// Violation with full confidence and no location info
    pub fn new(
        violation_type: impl Into<String>,
        category: impl Into<String>,
        severity: impl Into<String>,
    ) -> Self {
        Self {
            violation_type: violation_type.into(),
            category: category.into(),
            severity: severity.into(),
            confidence: 1.0,
            pattern: None,
            position: None,
        }
    }

    /// Set the detector confidence, clamped to [0.0, 1.0]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Record the matched pattern
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Record the match position
    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// Outcome of one plugin application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginResult {
    /// The plugin's action
    pub action: PluginAction,
    /// Human-readable reason
    pub reason: String,
    /// Whether the plugin returned modified content
    pub modified: bool,
    /// Violations detected during this application
    pub violations: Vec<Violation>,
}

impl PluginResult {
    /// An allowing result with no violations
    pub fn allow() -> Self {
        Self::default()
    }

    /// A blocking result
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            action: PluginAction::Block,
            reason: reason.into(),
            modified: false,
            violations: Vec::new(),
        }
    }

    /// A warning result
    pub fn warn(reason: impl Into<String>) -> Self {
        Self {
            action: PluginAction::Warn,
            reason: reason.into(),
            modified: false,
            violations: Vec::new(),
        }
    }

    /// An audit-only result
    pub fn audit(reason: impl Into<String>) -> Self {
        Self {
            action: PluginAction::Audit,
            reason: reason.into(),
            modified: false,
            violations: Vec::new(),
        }
    }

    /// Attach violations
    pub fn with_violations(mut self, violations: Vec<Violation>) -> Self {
        self.violations = violations;
        self
    }

    /// Mark the result as having modified content
    pub fn with_modified(mut self) -> Self {
        self.modified = true;
        self
    }

    /// Fold another result into this one
    ///
    /// Strongest action wins, violations concatenate, `modified` ORs, and
    /// non-empty reasons accumulate separated by "; ".
    pub fn merge(&mut self, other: PluginResult) {
        self.action = self.action.max(other.action);
        self.modified |= other.modified;
        self.violations.extend(other.violations);
        if !other.reason.is_empty() {
            if self.reason.is_empty() {
                self.reason = other.reason;
            } else {
                self.reason.push_str("; ");
                self.reason.push_str(&other.reason);
            }
        }
    }
}
