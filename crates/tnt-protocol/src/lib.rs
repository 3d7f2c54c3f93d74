//! # tnt-protocol
//!
//! Protocol types for Tanks and Taps (TNT): a composable framework for
//! holding and releasing fungible asset under programmable constraints.
//!
//! Asset is held in *tanks*, owned by no account. It leaves a tank only
//! through *taps*, each guarded by declarative *requirements* (flow limits,
//! time locks, review and delay workflows, hash preimages, signed tickets,
//! exchange ratios). Released asset travels along *connections*, possibly
//! through tank *attachments* (meters, openers, reconnect authorities),
//! until it reaches an account or another tank.
//!
//! A classic TNT structure is an HTLC: a tank with one tap hash-locked to
//! the recipient and another time-locked back to the funder.
//!
//! This crate is pure: it defines the data model, the static schematic
//! validator with deposit accounting, the lookup utilities, and the query
//! and operation types with their stateless checks. Evaluation against a
//! database lives in `tnt-chain`.

pub mod accessories;
pub mod address;
pub mod authority;
pub mod errors;
pub mod lookups;
pub mod operations;
pub mod parameters;
pub mod queries;
pub mod schematic;
pub mod types;
pub mod validation;

pub use accessories::{AccessoryState, AccessoryStateKind, TankAttachment, TapRequirement};
pub use address::AccessoryAddress;
pub use authority::{Authority, HashLock, PublicKey, Signature};
pub use errors::{
    AccessoryPath, AuthorityError, ConnectionError, LookupError, ProtocolError, QueryError,
    ValidationError, ValidationErrorKind,
};
pub use lookups::{ConnectionChain, Lookups, TankLookup};
pub use operations::{
    AccountFundConnection, ConnectionFundAccount, TankCreate, TankDelete, TankQueryOp, TankUpdate,
    TapConnect, TapOpen,
};
pub use parameters::TntParameters;
pub use queries::{validate_queries, TankQuery};
pub use schematic::{Tap, TankSchematic, EMERGENCY_TAP};
pub use types::{
    AccountId, Amount, AssetAmount, AssetFlowLimit, AssetId, AttachmentId, AuthorizedConnections,
    Connection, IndexType, RemoteConnection, TankId, TapId, TimePointSec, CORE_ASSET,
};
pub use validation::{TankValidator, UniquenessChecker};
