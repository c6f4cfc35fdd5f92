use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{GovernanceError, Result};

/// Terminal state of one validation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// Present and of the expected kind; nothing was done.
    Valid,
    /// Rebuilt from the declared structure.
    Recovered,
    /// Restored from a snapshot or replaced by a placeholder (degraded).
    Fallback,
    Failed,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Recovered => "recovered",
            Self::Fallback => "fallback",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PathSecurity,
    RecoveryDisabled,
    RecoveryExhausted,
    Timeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathSecurity => "path_security",
            Self::RecoveryDisabled => "recovery_disabled",
            Self::RecoveryExhausted => "recovery_exhausted",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tier produced the structure an attempt relied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Only the declared node itself had to be created.
    InheritStructure,
    TransientFallback,
    /// Missing declared ancestors were created along with the node.
    DagRebuild,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InheritStructure => "inherit-structure",
            Self::TransientFallback => "transient-fallback",
            Self::DagRebuild => "dag-rebuild",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One pass through the recovery tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAttempt {
    /// Declared node id, or the path key for undeclared paths.
    pub node_id: String,
    pub attempt_number: u32,
    pub strategy: StrategyKind,
    pub outcome: AttemptOutcome,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    /// Path as the caller passed it.
    pub path: String,
    /// Canonical path, absent when resolution was refused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PathBuf>,
    pub status: ValidationStatus,
    pub attempts: Vec<RecoveryAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip)]
    pub(crate) root: PathBuf,
}

impl ValidationOutcome {
    pub(crate) fn new(
        path: &str,
        root: PathBuf,
        resolved: Option<PathBuf>,
        status: ValidationStatus,
        attempts: Vec<RecoveryAttempt>,
        reason: Option<FailureReason>,
    ) -> Self {
        Self {
            path: path.to_string(),
            resolved,
            status,
            attempts,
            reason,
            root,
        }
    }

    /// Anything but `Failed`; `Fallback` counts as success.
    pub fn is_success(&self) -> bool {
        self.status != ValidationStatus::Failed
    }

    /// Turn a failed outcome into the matching error, for callers using `?`.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let target = self
            .resolved
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.path));

        Err(match self.reason {
            Some(FailureReason::PathSecurity) => GovernanceError::PathSecurity {
                path: self.path,
                root: self.root,
            },
            Some(FailureReason::RecoveryDisabled) => GovernanceError::NotFound(target),
            Some(FailureReason::RecoveryExhausted) => GovernanceError::RecoveryExhausted {
                path: target,
                attempts: self.attempts.len(),
            },
            Some(FailureReason::Timeout) => GovernanceError::ValidationFailed {
                path: target,
                reason: FailureReason::Timeout.to_string(),
            },
            None => GovernanceError::ValidationFailed {
                path: target,
                reason: "unknown".to_string(),
            },
        })
    }
}
