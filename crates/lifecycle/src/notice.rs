//! Non-fatal lifecycle conditions.
//!
//! Provisioning and teardown are convergent: finding a namespace that already
//! exists, a principal that is already gone or a structural step with no
//! implementation is expected on a re-run and must not fail the call. These
//! conditions are collected as [`Notice`]s in the operation's report and
//! logged at `warn` (or `info` for pure idempotence hits).

use std::fmt;

use crate::error::EntityKind;

/// A non-fatal condition observed during provisioning or teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The entity already existed; creation was skipped.
    AlreadyExists {
        /// What kind of entity it is.
        kind: EntityKind,
        /// Its name.
        name: String,
    },

    /// The entity did not exist; removal was skipped.
    NotFound {
        /// What kind of entity it is.
        kind: EntityKind,
        /// Its name.
        name: String,
    },

    /// No principal exists and no credential was supplied, so provisioning
    /// continued without one.
    PrincipalMissing {
        /// The principal that was not created.
        principal: String,
    },

    /// A structural step has no implementation and was skipped.
    StepNotImplemented {
        /// Registered step name.
        step: String,
        /// Why no implementation was found.
        reason: String,
    },

    /// A single revoke failed; teardown continued.
    RevokeBestEffortFailure {
        /// The grant target, as displayed.
        target: String,
        /// Store error message.
        message: String,
    },

    /// Sessions survived every eviction pass; teardown continued under force.
    SessionsRemaining {
        /// Sessions still attributed to the tenant after the last pass.
        count: usize,
    },

    /// The principal still owned objects; teardown continued under force.
    ForcedPastDependency {
        /// The principal being removed.
        principal: String,
        /// Owned objects and residual grants, as displayed.
        objects: Vec<String>,
    },
}

impl Notice {
    /// Returns `true` for notices that only confirm an idempotent re-run.
    pub fn is_idempotence_hit(&self) -> bool {
        matches!(self, Notice::AlreadyExists { .. } | Notice::NotFound { .. })
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::AlreadyExists { kind, name } => write!(f, "{kind} {name} already exists"),
            Notice::NotFound { kind, name } => write!(f, "{kind} {name} does not exist"),
            Notice::PrincipalMissing { principal } => write!(
                f,
                "principal {principal} does not exist and no credential was given; continuing without it"
            ),
            Notice::StepNotImplemented { step, reason } => {
                write!(f, "structural step {step} skipped: {reason}")
            }
            Notice::RevokeBestEffortFailure { target, message } => {
                write!(f, "could not revoke {target}: {message}")
            }
            Notice::SessionsRemaining { count } => {
                write!(f, "{count} session(s) survived eviction")
            }
            Notice::ForcedPastDependency { principal, objects } => write!(
                f,
                "principal {principal} still owns {}; continuing because force is set",
                objects.join(", ")
            ),
        }
    }
}
