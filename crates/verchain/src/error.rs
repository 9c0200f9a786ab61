//! Errors raised while declaring chains and running migrations.

use crate::chain::Direction;
use crate::envelope::EnvelopeError;
use crate::manifest::ManifestError;
use crate::version::{Version, VersionError};

/// Why a chain declaration was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainFault {
    /// No versions were declared.
    #[error("chain has no versions")]
    Empty,
    /// The same version was declared twice.
    #[error("version {0} declared twice")]
    DuplicateVersion(Version),
    /// A version does not sort strictly after its predecessor.
    #[error("version {next} does not sort after {prev}")]
    NotIncreasing { prev: Version, next: Version },
    /// A `prev`/`next` link disagrees with its neighbour.
    #[error("broken link at version {0}")]
    BrokenLink(Version),
}

/// Error raised by a single hook while transforming a payload.
///
/// Hooks return this; the dispatcher wraps it in
/// [`MigrateError::HookExecution`] with the hop that failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct HookError {
    /// What the hook could not do.
    pub reason: String,
}

impl HookError {
    /// Create a hook error from a message.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// A required field was missing or had the wrong shape.
    pub fn field(name: &str, expected: &str) -> Self {
        Self::new(format!("field `{name}`: expected {expected}"))
    }
}

impl From<serde_json::Error> for HookError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// A hook that migrates embedded payloads through another domain fails
/// with that domain's error.
impl From<MigrateError> for HookError {
    fn from(e: MigrateError) -> Self {
        Self::new(e.to_string())
    }
}

/// Error from building or running a migration domain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrateError {
    /// The domain's version declaration is malformed. Fatal at setup.
    #[error("domain `{domain}`: chain integrity violated: {fault}")]
    ChainIntegrity { domain: String, fault: ChainFault },

    /// A version is not a member of the domain's chain.
    #[error("domain `{domain}`: unknown version {version}")]
    UnknownVersion { domain: String, version: Version },

    /// Two hooks were registered under the same key. Fatal at setup.
    #[error("domain `{domain}`: hook {key} registered twice at version {version}")]
    DuplicateHook {
        domain: String,
        version: Version,
        key: String,
    },

    /// A version label given at setup is malformed.
    #[error(transparent)]
    InvalidVersion(#[from] VersionError),

    /// Two domains were declared under the same name. Fatal at setup.
    #[error("domain `{0}` declared twice")]
    DuplicateDomain(String),

    /// A peripheral chain declares a version the global chain also declares.
    #[error("peripheral `{peripheral}`: version {version} conflicts with a global peripheral version")]
    ConflictingGlobalVersion { peripheral: String, version: Version },

    /// A hook failed while transforming a payload.
    #[error(
        "domain `{domain}`: hook `{operation}` ({direction}) at version {version} failed: {source}"
    )]
    HookExecution {
        domain: String,
        version: Version,
        operation: String,
        direction: Direction,
        source: HookError,
    },

    /// A stored payload's envelope could not be read.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// A payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Codec(String),

    /// The version manifest is invalid.
    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

impl MigrateError {
    /// True for errors that can only happen while a domain is being built.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::ChainIntegrity { .. }
                | Self::DuplicateHook { .. }
                | Self::InvalidVersion(_)
                | Self::DuplicateDomain(_)
                | Self::ConflictingGlobalVersion { .. }
                | Self::Manifest(_)
        )
    }
}
