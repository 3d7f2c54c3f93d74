//! Chain-side error types and the workspace umbrella error.
//!
//! Every failure aborts the containing operation: the staging buffer is
//! dropped, the database is untouched, and no virtual operations are
//! emitted.

use thiserror::Error;
use tnt_protocol::errors::{
    AuthorityError, ConnectionError, LookupError, ProtocolError, QueryError, ValidationError,
};
use tnt_protocol::types::{
    AccountId, Amount, AssetId, Connection, IndexType, TankId, TapId,
};

/// Failure while evaluating a tap flow or connection flow.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TapFlowError {
    #[error("cannot open tap: tank id not specified")]
    TankIdUnset,

    #[error("tap to open does not exist: {tap}")]
    TapNotFound { tap: TapId },

    #[error("cannot open tap {tap}: tap is not connected")]
    TapNotConnected { tap: TapId },

    #[error("account {account} is not authorized to transact asset {asset}")]
    UnauthorizedAsset { account: AccountId, asset: AssetId },

    #[error("cannot release {requested} through tap: tank balance is only {balance}")]
    InsufficientBalance { requested: Amount, balance: Amount },

    #[error("cannot open tap: requirement {requirement} has locked the tap")]
    TapLocked { requirement: IndexType },

    #[error("cannot open tap: tank is empty")]
    TankEmpty,

    #[error("cannot release {requested}: requirement {requirement} has limited flow to {limit}")]
    ExceedsReleaseLimit {
        requested: Amount,
        limit: Amount,
        requirement: IndexType,
    },

    #[error("tap flow exceeded its maximum of {max} taps to open")]
    CascadeLimitExceeded { max: u16 },

    #[error("opening taps is not permitted in this operation")]
    CascadeNotPermitted,

    #[error("cannot process connection flow from an origin of same-tank")]
    OriginIsSameTank,

    #[error("connection names an attachment with an implied tank outside any current-tank context")]
    NoCurrentTankContext,

    #[error("asset flowed to {connection}, which expects a different asset")]
    WrongAssetForAttachment { connection: Connection },

    #[error("destination tank {tank} stores a different asset than the flow carries")]
    WrongAssetForTank { tank: TankId },

    #[error("destination does not allow deposits from {remote_source}")]
    SourceNotAuthorized { remote_source: Connection },

    #[error("asset flowed to {connection}, which cannot receive asset")]
    CannotReceiveAsset { connection: Connection },
}

/// Violation of the evaluation state machine or of an operation's declared
/// bookkeeping.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("the query tank must not be changed; use a new query evaluator")]
    QueryTankAlreadySet,

    #[error("a query tank must be set before evaluating queries")]
    QueryTankUnset,

    #[error("cannot evaluate queries after queries have been applied")]
    EvaluateAfterApply,

    #[error("maximum release must be computed before it can be inspected")]
    MaxReleaseNotRun,

    #[error("release amount {amount} exceeds the remaining limit of requirement {requirement}")]
    ReleaseExceedsRemaining { amount: Amount, requirement: IndexType },

    #[error("declared tap open count {declared} does not match {actual} taps opened")]
    TapOpenCountMismatch { declared: u16, actual: usize },

    #[error("incorrect deposit amount: expected {expected}, declared {declared}")]
    DepositMismatch { expected: Amount, declared: Amount },

    #[error("incorrect deposit delta: expected {expected}, declared {declared}")]
    DepositDeltaMismatch { expected: Amount, declared: Amount },

    #[error("deposit claim {claimed} does not match tank deposit {deposit}")]
    DepositClaimMismatch { claimed: Amount, deposit: Amount },

    #[error("cannot delete a tank with an outstanding balance")]
    TankNotEmpty,

    #[error("cannot destroy tank: tap is not a destructor tap")]
    NotADestructorTap,

    #[error("tank must be emptied by the operation that destroys it")]
    TankNotEmptied,

    #[error("when destroying an empty tank, queries are not run")]
    QueriesOnEmptyDestroy,

    #[error("when destroying an empty tank, tap open count must be 1")]
    BadEmptyDestroyCount,

    #[error("when destroying an empty tank, declare exactly the tap open authority")]
    BadEmptyDestroyAuthorities,

    #[error("when destroying an empty tank, a bounded release amount must be zero")]
    BadEmptyDestroyAmount,

    #[error("insufficient balance to pay the deposit")]
    InsufficientDepositBalance,

    #[error("insufficient balance to fund the connection")]
    InsufficientFundingBalance,

    #[error("tank does not exist: {tank}")]
    UnknownTank { tank: TankId },
}

/// Any error the TNT core can produce.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TntError {
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

    #[error(transparent)]
    TapFlow(#[from] TapFlowError),

    #[error(transparent)]
    State(#[from] StateError),
}

impl From<ProtocolError> for TntError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Validation(err) => TntError::Validation(err),
            ProtocolError::Authority(err) => TntError::Authority(err),
            ProtocolError::Lookup(err) => TntError::Lookup(err),
            ProtocolError::Connection(err) => TntError::Connection(err),
            ProtocolError::Query(err) => TntError::Query(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_flatten_into_tnt_error() {
        let err: TntError = ProtocolError::Lookup(LookupError::NeedLookupFunction).into();
        assert_eq!(err, TntError::Lookup(LookupError::NeedLookupFunction));
    }

    #[test]
    fn test_tap_flow_error_messages_name_the_requirement() {
        let err = TapFlowError::TapLocked { requirement: 2 };
        assert!(err.to_string().contains("requirement 2"));
    }
}
