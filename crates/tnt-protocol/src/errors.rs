//! Error types for the protocol layer.
//!
//! Every check returns a tagged error carrying enough context to name the
//! offending accessory, so callers can build readable messages without any
//! exception machinery.

use crate::types::{AttachmentId, Connection, IndexType, RemoteConnection, TankId, TapId};
use std::fmt;
use thiserror::Error;

/// Reference to an object that failed to resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectRef {
    Tank(TankId),
    Attachment(AttachmentId),
    Tap(TapId),
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Tank(id) => write!(f, "{id}"),
            ObjectRef::Attachment(id) => write!(f, "{id}"),
            ObjectRef::Tap(id) => write!(f, "{id}"),
        }
    }
}

/// Location of an accessory within a tank, attached to validation failures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessoryPath {
    pub tank: Option<TankId>,
    pub tap: Option<IndexType>,
    pub requirement: Option<IndexType>,
    pub attachment: Option<IndexType>,
}

impl AccessoryPath {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn attachment(index: IndexType) -> Self {
        Self { attachment: Some(index), ..Self::default() }
    }

    pub fn tap(index: IndexType) -> Self {
        Self { tap: Some(index), ..Self::default() }
    }

    pub fn requirement(tap: IndexType, requirement: IndexType) -> Self {
        Self { tap: Some(tap), requirement: Some(requirement), ..Self::default() }
    }

    pub fn on_tank(mut self, tank: TankId) -> Self {
        self.tank = Some(tank);
        self
    }
}

impl fmt::Display for AccessoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(tank) = self.tank {
            write!(f, "{tank}")?;
            wrote = true;
        }
        if let Some(tap) = self.tap {
            if wrote {
                write!(f, " ")?;
            }
            write!(f, "tap {tap}")?;
            wrote = true;
        }
        if let Some(requirement) = self.requirement {
            if wrote {
                write!(f, " ")?;
            }
            write!(f, "requirement {requirement}")?;
            wrote = true;
        }
        if let Some(attachment) = self.attachment {
            if wrote {
                write!(f, " ")?;
            }
            write!(f, "attachment {attachment}")?;
            wrote = true;
        }
        if !wrote {
            write!(f, "tank")?;
        }
        Ok(())
    }
}

// =============================================================================
// AUTHORITY ERRORS
// =============================================================================

/// Problems with an authority: missing, unusable, or declared but unused.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("{context} must not be the null authority")]
    Null { context: String },

    #[error("{context} must not be an impossible authority")]
    Impossible { context: String },

    #[error("{context} must not have a trivial weight threshold")]
    Trivial { context: String },

    /// A query required an authority the operation did not declare.
    #[error("required authority was not declared")]
    NotDeclared,

    /// A declared authority was never required by any query.
    #[error("{count} declared authorities were not used by any query")]
    Unused { count: usize },

    /// The presented authority does not match the one on record.
    #[error("{context} does not match the authority on record")]
    Mismatch { context: String },

    /// The operation needs an authority the tap does not define.
    #[error("{context} is not set")]
    Unset { context: String },
}

// =============================================================================
// LOOKUP AND CONNECTION ERRORS
// =============================================================================

/// Failure to resolve a tank, tap, or attachment reference.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("referenced object does not exist: {0}")]
    NonexistentObject(ObjectRef),

    /// A cross-tank reference cannot be resolved without a lookup callback.
    #[error("cannot resolve cross-tank reference without a tank lookup")]
    NeedLookupFunction,
}

/// Failure while walking or checking a connection chain.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection receives the wrong asset type: {connection}")]
    ReceivesWrongAsset { connection: Connection },

    #[error("connection cannot receive asset: {connection}")]
    ReceivesNoAsset { connection: Connection },

    #[error("connection chain exceeds the maximum length")]
    ExceededMaxChainLength,
}

// =============================================================================
// VALIDATION ERRORS
// =============================================================================

/// A schematic or operation check failure, with the accessory it names.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} [{path}]")]
pub struct ValidationError {
    pub path: AccessoryPath,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(path: AccessoryPath, kind: impl Into<ValidationErrorKind>) -> Self {
        Self { path, kind: kind.into() }
    }

    /// A failure not tied to any particular accessory.
    pub fn bare(kind: impl Into<ValidationErrorKind>) -> Self {
        Self { path: AccessoryPath::none(), kind: kind.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationErrorKind {
    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("referenced object does not exist: {0}")]
    Nonexistent(ObjectRef),

    #[error("sources on the same tank are authorized implicitly and must not be listed")]
    SameTankSourceAuthorized,

    #[error("tap opener release amount must be positive")]
    NonPositiveOpenerRelease,

    #[error("tap opener references nonexistent tap {tap}")]
    OpenerTapNotFound { tap: IndexType },

    #[error("attachment connect authority references nonexistent attachment {attachment}")]
    ReconnectTargetNotFound { attachment: IndexType },

    #[error("attachment connect authority references attachment {attachment}, which does not receive asset")]
    ReconnectTargetReceivesNoAsset { attachment: IndexType },

    #[error("attachments of type {kind} must be unique per tank")]
    DuplicateAttachmentType { kind: &'static str },

    #[error("requirements of type {kind} must be unique per tap")]
    DuplicateRequirementType { kind: &'static str },

    #[error("emergency tap does not exist")]
    EmergencyTapMissing,

    #[error("emergency tap must have no requirements")]
    EmergencyTapHasRequirements,

    #[error("emergency tap must specify an open authority")]
    EmergencyTapOpenAuthorityMissing,

    #[error("emergency tap must specify a connect authority")]
    EmergencyTapConnectAuthorityMissing,

    #[error("emergency tap must be a destructor tap")]
    EmergencyTapNotDestructor,

    #[error("tap must be connected or specify a connect authority")]
    TapUnconnectedWithoutConnectAuthority,

    #[error("tap {tap} does not exist")]
    TapNotFound { tap: IndexType },

    #[error("attachment {attachment} does not exist")]
    AttachmentNotFound { attachment: IndexType },

    #[error("{what} must be positive")]
    NonPositive { what: &'static str },

    #[error("time lock must specify at least one lock/unlock time")]
    EmptyLockTimes,

    #[error("time lock times must be strictly increasing")]
    NonIncreasingLockTimes,

    #[error("hash lock must not be the null hash")]
    NullHash,

    #[error("hash lock must not be the hash of the empty value")]
    HashOfEmptyPreimage,

    #[error("ticket signer must not be the null public key")]
    NullTicketSigner,

    #[error("exchange requirement references {attachment}, which is not a flow meter")]
    ExchangeMeterNotAMeter { attachment: AttachmentId },

    #[error("destination does not allow deposits from {remote_source}")]
    UnauthorizedRemoteSource { remote_source: RemoteConnection },

    #[error("destination restricts deposit sources and cannot have authorized a tank that does not exist yet")]
    UnauthorizedNewTankSource,

    #[error("deposit cannot be calculated before the tank has been validated")]
    NotYetValidated,

    // Operation-level checks.
    #[error("the emergency tap cannot be removed, only replaced")]
    EmergencyTapRemoved,

    #[error("cannot both remove and replace the same {what}")]
    RemoveReplaceOverlap { what: &'static str },

    #[error("tank id must be specified")]
    TankIdRequired,

    #[error("release amount must not be negative")]
    NegativeReleaseAmount,

    #[error("release amount can only be zero when destroying the tank")]
    ZeroReleaseWithoutDestroy,

    #[error("declared tap open count must be at least one")]
    ZeroTapOpenCount,

    #[error("declared required authorities must not contain duplicates")]
    DuplicateDeclaredAuthority,

    #[error("query list must not be empty")]
    EmptyQueryList,

    #[error("a new connection is required when clearing the connect authority")]
    ConnectionRequiredToClearAuthority,

    #[error("funding amount must be positive")]
    NonPositiveFundingAmount,
}

// =============================================================================
// QUERY ERRORS
// =============================================================================

/// Failure evaluating a query, or a statically malformed query.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("{query} may only be used when opening a tap")]
    TapOpenOnly { query: &'static str },

    #[error("cannot run multiple {query} queries against the same target in one operation")]
    Duplicate { query: &'static str },

    #[error("comment must not be empty if provided")]
    EmptyComment,

    #[error("comment exceeds {max} characters", max = crate::types::MAX_COMMENT_LENGTH)]
    CommentTooLong,

    #[error("request amount must not be zero")]
    ZeroRequestAmount,

    #[error("preimage must not be empty")]
    EmptyPreimage,

    #[error("ticket maximum withdrawal must be positive")]
    NonPositiveMaxWithdrawal,

    #[error("ticket {field} does not match the query target")]
    TicketTargetMismatch { field: &'static str },

    #[error("query target does not exist at {path}")]
    TargetNotFound { path: AccessoryPath },

    #[error("query target at {path} has the wrong accessory type")]
    WrongTargetType { path: AccessoryPath },

    #[error("no requests have been made against this requirement")]
    NoRequests,

    #[error("no request with id {id} exists")]
    RequestNotFound { id: IndexType },

    #[error("maximum number of pending requests has been reached")]
    RequestLimitReached,

    #[error("request {id} is already approved")]
    AlreadyApproved { id: IndexType },

    #[error("request {id} has not been approved")]
    NotApproved { id: IndexType },

    #[error("request {id} has not matured yet")]
    NotMatured { id: IndexType },

    #[error("request {id} has already matured and can no longer be vetoed")]
    AlreadyMatured { id: IndexType },

    #[error("preimage size must be {expected} bytes, got {actual}")]
    PreimageSizeMismatch { expected: u16, actual: usize },

    #[error("preimage does not hash to the expected value")]
    PreimageMismatch,

    #[error("ticket number is invalid; expected {expected}")]
    TicketNumberMismatch { expected: IndexType },

    #[error("ticket signature is not valid")]
    TicketSignatureInvalid,

    #[error("meter has not had any asset flow through it yet")]
    MeterUnused,

    #[error("exchange requirement has not released any asset yet")]
    ExchangeUnused,

    #[error("exchange meter is not at zero")]
    MeterNotZero,

    #[error("no veto authority is defined")]
    NoVetoAuthority,

    #[error("new connection cannot receive the asset the attachment releases")]
    ReconnectAssetMismatch,
}

// =============================================================================
// UMBRELLA
// =============================================================================

/// Any error the protocol layer can produce.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<ValidationErrorKind> for ProtocolError {
    fn from(kind: ValidationErrorKind) -> Self {
        ProtocolError::Validation(ValidationError::bare(kind))
    }
}
