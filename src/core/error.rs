use crate::core::validate::RejectReason;
use std::time::Duration;
use thiserror::Error;

/// Core error taxonomy for routemgr.
///
/// The distinctions matter to callers: validation and conflict errors are
/// client-correctable and never touched the facility, apply/timeout errors
/// aborted a plan mid-flight (after rollback of this invocation's own
/// changes), and unavailable means the facility itself could not be reached -
/// reported separately so operators don't confuse "facility down" with "rule
/// rejected".
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Candidate record failed a well-formedness check; nothing was persisted
    /// or applied
    #[error("validation failed: {0}")]
    Validation(RejectReason),

    /// Candidate record violates a uniqueness/occupancy constraint against
    /// the current desired state
    #[error("conflict: {0}")]
    Conflict(RejectReason),

    /// The facility rejected or failed a command; the plan was aborted and
    /// this invocation's partial changes rolled back
    #[error("facility rejected command for {tag}: {stderr}")]
    Apply {
        tag: String,
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// A facility call exceeded the configured bound. Distinct from
    /// `Unavailable`: the facility was reachable but did not answer in time.
    #[error("facility call for {tag} timed out after {timeout:?}")]
    Timeout {
        tag: String,
        command: String,
        timeout: Duration,
    },

    /// The facility is unreachable or not running. Detected before the policy
    /// lock is acquired.
    #[error("facility unavailable: {0}")]
    Unavailable(String),

    /// Privilege escalation failed
    #[error("elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),

    /// Internal logic error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Wraps a rejection in the matching error variant: uniqueness/occupancy
    /// rejections become [`Error::Conflict`], everything else
    /// [`Error::Validation`].
    pub fn from_rejection(reason: RejectReason) -> Self {
        if reason.is_conflict() {
            Error::Conflict(reason)
        } else {
            Error::Validation(reason)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
