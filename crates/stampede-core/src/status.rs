//! Lifecycle states for test executions and virtual users.
//!
//! Both state machines only ever move forward; `advance_to` rejects any
//! transition that would revert or leave a terminal state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a single test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Initializing,
    Running,
    Stopping,
    Stopped,
    Completed,
    Failed,
}

impl TestStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::Running => 1,
            Self::Stopping => 2,
            Self::Stopped | Self::Completed | Self::Failed => 3,
        }
    }

    /// Terminal states accept no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// True while stop has been requested or has finished.
    #[must_use]
    pub fn is_stop_requested(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    #[must_use]
    pub fn can_advance_to(self, next: TestStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Lowercase label used in logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a virtual user: `active → stopping → completed`, or
/// directly to `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualUserStatus {
    Active,
    Stopping,
    Completed,
    Failed,
}

impl VirtualUserStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Stopping => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    #[must_use]
    pub fn can_advance_to(self, next: VirtualUserStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for VirtualUserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
