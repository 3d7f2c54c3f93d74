//! Core identifier and connection types for Tanks and Taps.
//!
//! A *tank* holds a balance of a single asset. Asset leaves a tank through
//! *taps* and travels along *connections*, possibly passing through tank
//! *attachments*, until it reaches a terminal depository (an account or
//! another tank).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Index of a tap, attachment, requirement, or request within its container.
pub type IndexType = u16;

/// A quantity of asset. Negative amounts never appear in balances; the signed
/// type exists so deltas can be expressed directly.
pub type Amount = i64;

/// Maximum length of request/review/documentation comments, in bytes.
pub const MAX_COMMENT_LENGTH: usize = 150;

/// The asset used for tank deposits.
pub const CORE_ASSET: AssetId = AssetId(0);

// =============================================================================
// OBJECT IDS
// =============================================================================

/// Database id of a tank object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TankId(pub u64);

/// Database id of an account object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

/// Database id of an asset object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(pub u64);

impl fmt::Display for TankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tank.{}", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account.{}", self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "asset.{}", self.0)
    }
}

/// Block timestamp with one-second resolution.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimePointSec(pub u32);

impl TimePointSec {
    pub fn saturating_add_secs(self, secs: u32) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Whole seconds elapsed since `earlier`, or zero if `earlier` is later.
    pub fn secs_since(self, earlier: TimePointSec) -> u32 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for TimePointSec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}

/// An amount of a specific asset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset_id: AssetId,
    pub amount: Amount,
}

impl AssetAmount {
    pub fn new(asset_id: AssetId, amount: Amount) -> Self {
        Self { asset_id, amount }
    }
}

// =============================================================================
// ACCESSORY IDS
// =============================================================================

/// Id of a tank attachment. An unset `tank_id` means "the current tank" in
/// whatever context the id appears.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AttachmentId {
    pub tank_id: Option<TankId>,
    pub index: IndexType,
}

impl AttachmentId {
    pub fn new(tank_id: impl Into<Option<TankId>>, index: IndexType) -> Self {
        Self { tank_id: tank_id.into(), index }
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tank_id {
            Some(tank) => write!(f, "{}.attachment.{}", tank, self.index),
            None => write!(f, "attachment.{}", self.index),
        }
    }
}

/// Id of a tap. An unset `tank_id` means "the current tank".
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TapId {
    pub tank_id: Option<TankId>,
    pub index: IndexType,
}

impl TapId {
    pub fn new(tank_id: impl Into<Option<TankId>>, index: IndexType) -> Self {
        Self { tank_id: tank_id.into(), index }
    }
}

impl fmt::Display for TapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tank_id {
            Some(tank) => write!(f, "{}.tap.{}", tank, self.index),
            None => write!(f, "tap.{}", self.index),
        }
    }
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// A pipeline over which asset can flow: where a release of asset goes next.
///
/// A connection is *terminal* if it names a depository that stores asset over
/// time (an account or a tank). An attachment connection is non-terminal: the
/// attachment processes the asset and immediately releases it onward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Connection {
    /// The tank the connection appears on, resolved from context.
    SameTank,
    Account(AccountId),
    Tank(TankId),
    Attachment(AttachmentId),
}

impl Connection {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Connection::Attachment(_))
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connection::SameTank => write!(f, "same-tank"),
            Connection::Account(id) => write!(f, "{id}"),
            Connection::Tank(id) => write!(f, "{id}"),
            Connection::Attachment(id) => write!(f, "{id}"),
        }
    }
}

/// A connection to or from somewhere other than the current tank.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RemoteConnection {
    Account(AccountId),
    Tank(TankId),
    Attachment(AttachmentId),
}

impl RemoteConnection {
    /// The tank this connection lives on, if it names one.
    pub fn connection_tank(&self) -> Option<TankId> {
        match self {
            RemoteConnection::Tank(id) => Some(*id),
            RemoteConnection::Attachment(id) => id.tank_id,
            RemoteConnection::Account(_) => None,
        }
    }
}

impl From<RemoteConnection> for Connection {
    fn from(remote: RemoteConnection) -> Self {
        match remote {
            RemoteConnection::Account(id) => Connection::Account(id),
            RemoteConnection::Tank(id) => Connection::Tank(id),
            RemoteConnection::Attachment(id) => Connection::Attachment(id),
        }
    }
}

impl TryFrom<Connection> for RemoteConnection {
    type Error = Connection;

    fn try_from(connection: Connection) -> Result<Self, Connection> {
        match connection {
            Connection::Account(id) => Ok(RemoteConnection::Account(id)),
            Connection::Tank(id) => Ok(RemoteConnection::Tank(id)),
            Connection::Attachment(id) => Ok(RemoteConnection::Attachment(id)),
            Connection::SameTank => Err(connection),
        }
    }
}

impl fmt::Display for RemoteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Connection::from(*self).fmt(f)
    }
}

/// Restriction on which remote sources may deposit to a tank or attachment.
/// Deposits from the same tank are always allowed implicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizedConnections {
    Sources(BTreeSet<RemoteConnection>),
    All,
}

impl AuthorizedConnections {
    pub fn all() -> Self {
        AuthorizedConnections::All
    }

    pub fn sources(sources: impl IntoIterator<Item = RemoteConnection>) -> Self {
        AuthorizedConnections::Sources(sources.into_iter().collect())
    }
}

impl Default for AuthorizedConnections {
    fn default() -> Self {
        AuthorizedConnections::All
    }
}

// =============================================================================
// FLOW LIMITS
// =============================================================================

/// A bound on the amount of asset that flows during a release: either a
/// concrete maximum, or no bound at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetFlowLimit {
    Unlimited,
    Amount(Amount),
}

impl AssetFlowLimit {
    pub fn bounded(&self) -> Option<Amount> {
        match self {
            AssetFlowLimit::Unlimited => None,
            AssetFlowLimit::Amount(amount) => Some(*amount),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, AssetFlowLimit::Unlimited)
    }
}

impl From<Amount> for AssetFlowLimit {
    fn from(amount: Amount) -> Self {
        AssetFlowLimit::Amount(amount)
    }
}

impl PartialOrd for AssetFlowLimit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AssetFlowLimit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use AssetFlowLimit::{Amount, Unlimited};
        match (self, other) {
            (Unlimited, Unlimited) => std::cmp::Ordering::Equal,
            (Unlimited, Amount(_)) => std::cmp::Ordering::Greater,
            (Amount(_), Unlimited) => std::cmp::Ordering::Less,
            (Amount(a), Amount(b)) => a.cmp(b),
        }
    }
}

impl fmt::Display for AssetFlowLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetFlowLimit::Unlimited => write!(f, "unlimited"),
            AssetFlowLimit::Amount(amount) => write!(f, "{amount}"),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_connections() {
        assert!(Connection::SameTank.is_terminal());
        assert!(Connection::Account(AccountId(1)).is_terminal());
        assert!(Connection::Tank(TankId(1)).is_terminal());
        assert!(!Connection::Attachment(AttachmentId::new(None, 0)).is_terminal());
    }

    #[test]
    fn test_flow_limit_ordering() {
        let unlimited = AssetFlowLimit::Unlimited;
        let small = AssetFlowLimit::Amount(5);
        let large = AssetFlowLimit::Amount(500);

        assert!(small < large);
        assert!(large < unlimited);
        assert!(small < unlimited);
        assert_eq!(unlimited.cmp(&AssetFlowLimit::Unlimited), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_remote_connection_round_trip() {
        let remote = RemoteConnection::Attachment(AttachmentId::new(TankId(4), 2));
        let connection = Connection::from(remote);
        assert_eq!(RemoteConnection::try_from(connection), Ok(remote));
        assert!(RemoteConnection::try_from(Connection::SameTank).is_err());
    }

    #[test]
    fn test_connection_tank_inference() {
        assert_eq!(RemoteConnection::Tank(TankId(7)).connection_tank(), Some(TankId(7)));
        assert_eq!(
            RemoteConnection::Attachment(AttachmentId::new(TankId(9), 1)).connection_tank(),
            Some(TankId(9))
        );
        assert_eq!(
            RemoteConnection::Attachment(AttachmentId::new(None, 1)).connection_tank(),
            None
        );
        assert_eq!(RemoteConnection::Account(AccountId(3)).connection_tank(), None);
    }

    #[test]
    fn test_time_point_arithmetic() {
        let t = TimePointSec(100);
        assert_eq!(t.saturating_add_secs(50), TimePointSec(150));
        assert_eq!(TimePointSec(150).secs_since(t), 50);
        assert_eq!(t.secs_since(TimePointSec(150)), 0);
        assert_eq!(TimePointSec(u32::MAX).saturating_add_secs(10), TimePointSec(u32::MAX));
    }
}
