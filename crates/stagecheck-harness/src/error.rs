//! Unit failures and their tiers.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stagecheck_exec::{CaptureError, Termination};
use thiserror::Error;

use crate::verify::VerifyFailure;

/// Which kind of problem failed a unit. Kept distinct in every report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureTier {
    /// The environment is broken: spawn failure, output ceiling, timeout, I/O.
    Harness,
    /// Something that must fail exited cleanly.
    UnexpectedSuccess,
    /// Observed output differs from the expectation.
    Mismatch,
}

impl FailureTier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Harness => "harness",
            Self::UnexpectedSuccess => "unexpected_success",
            Self::Mismatch => "mismatch",
        }
    }
}

impl fmt::Display for FailureTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one unit of work. Every variant that ran a process carries the
/// invocation so the failure can be reproduced by hand.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("{source}\ninvocation: {invocation}")]
    Capture {
        #[source]
        source: CaptureError,
        invocation: String,
    },
    #[error("unable to prepare {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("compilation failed: compiler {termination}\n{stderr}\ninvocation: {invocation}")]
    BuildFailed {
        termination: Termination,
        stderr: String,
        invocation: String,
    },
    #[error("{failure}\ninvocation: {invocation}")]
    Verify {
        failure: VerifyFailure,
        termination: Termination,
        invocation: String,
    },
}

impl UnitError {
    #[must_use]
    pub const fn tier(&self) -> FailureTier {
        match self {
            Self::Capture { .. } | Self::Io { .. } => FailureTier::Harness,
            Self::BuildFailed { .. } => FailureTier::Mismatch,
            Self::Verify { failure, .. } => failure.tier(),
        }
    }

    #[must_use]
    pub fn invocation(&self) -> Option<&str> {
        match self {
            Self::Capture { invocation, .. }
            | Self::BuildFailed { invocation, .. }
            | Self::Verify { invocation, .. } => Some(invocation),
            Self::Io { .. } => None,
        }
    }

    /// How the observed process ended, when one ran to completion.
    #[must_use]
    pub const fn termination(&self) -> Option<Termination> {
        match self {
            Self::BuildFailed { termination, .. } | Self::Verify { termination, .. } => {
                Some(*termination)
            }
            Self::Capture { .. } | Self::Io { .. } => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_cause() {
        let spawn = UnitError::Capture {
            source: CaptureError::EmptyArgv,
            invocation: String::new(),
        };
        assert_eq!(spawn.tier(), FailureTier::Harness);

        let success = UnitError::Verify {
            failure: VerifyFailure::CompilationIncorrectlySucceeded,
            termination: Termination::Exited(0),
            invocation: "zig build-obj tmp.zig".into(),
        };
        assert_eq!(success.tier(), FailureTier::UnexpectedSuccess);
        assert!(success.to_string().contains("zig build-obj tmp.zig"));
        assert_eq!(success.invocation(), Some("zig build-obj tmp.zig"));
        assert_eq!(success.termination(), Some(Termination::Exited(0)));
        assert_eq!(spawn.termination(), None);
    }
}
