//! Execution statuses of families and tasks

use std::fmt;

use crate::error::{Result, TflowError};

/// Possible statuses for any family or task.
///
/// The variant order is a display convention: stale roots are sorted by
/// status first (lower value first), then by name. It says nothing about
/// severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlowStatus {
    Aborted,
    Submitted,
    Active,
    Queued,
    Suspended,
    Complete,
    #[default]
    Unknown,
}

impl FlowStatus {
    pub const ALL: [FlowStatus; 7] = [
        FlowStatus::Aborted,
        FlowStatus::Submitted,
        FlowStatus::Active,
        FlowStatus::Queued,
        FlowStatus::Suspended,
        FlowStatus::Complete,
        FlowStatus::Unknown,
    ];

    /// Map the 3-letter code printed by the scheduler's `status` command.
    pub fn from_code(code: &str, name: &str) -> Result<Self> {
        match code {
            "com" => Ok(FlowStatus::Complete),
            "que" => Ok(FlowStatus::Queued),
            "sus" => Ok(FlowStatus::Suspended),
            "abo" => Ok(FlowStatus::Aborted),
            "sub" => Ok(FlowStatus::Submitted),
            "act" => Ok(FlowStatus::Active),
            "unk" => Ok(FlowStatus::Unknown),
            _ => Err(TflowError::UnknownStatusCode {
                code: code.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Nodes created with these statuses are unfolded by default.
    pub fn expands_by_default(self) -> bool {
        matches!(
            self,
            FlowStatus::Active | FlowStatus::Aborted | FlowStatus::Submitted | FlowStatus::Unknown
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FlowStatus::Aborted => "ABORTED",
            FlowStatus::Submitted => "SUBMITTED",
            FlowStatus::Active => "ACTIVE",
            FlowStatus::Queued => "QUEUED",
            FlowStatus::Suspended => "SUSPENDED",
            FlowStatus::Complete => "COMPLETE",
            FlowStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
