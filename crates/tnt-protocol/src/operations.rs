//! The operations the core accepts, with their stateless validation.
//!
//! Stateless validation covers everything checkable without a database:
//! internal consistency of embedded taps and attachments, declared-authority
//! hygiene, and query-list validity. Stateful checks (balances, deposits,
//! authority matching) happen in the chain layer's evaluators.

use crate::accessories::TankAttachment;
use crate::authority::Authority;
use crate::errors::{ProtocolError, ValidationErrorKind};
use crate::queries::{validate_queries, TankQuery};
use crate::schematic::{Tap, EMERGENCY_TAP};
use crate::types::{
    AccountId, Amount, AssetAmount, AssetFlowLimit, AssetId, AuthorizedConnections, Connection,
    IndexType, TankId, TapId,
};
use crate::validation::{TankValidator, UniquenessChecker};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

fn ensure_no_duplicate_authorities(authorities: &[Authority]) -> Result<(), ProtocolError> {
    for (position, authority) in authorities.iter().enumerate() {
        if authorities[position + 1..].contains(authority) {
            return Err(ValidationErrorKind::DuplicateDeclaredAuthority.into());
        }
    }
    Ok(())
}

/// Create a new tank holding `contained_asset`, paying the deposit in the
/// core asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankCreate {
    /// Pays the deposit.
    pub payer: AccountId,
    /// Deposit paid, in the core asset; must match the calculated deposit.
    pub deposit_amount: Amount,
    pub contained_asset: AssetId,
    /// Taps for the new tank, assigned indexes consecutively from zero.
    pub taps: Vec<Tap>,
    /// Attachments for the new tank, assigned indexes consecutively from zero.
    pub attachments: Vec<TankAttachment>,
    pub authorized_sources: AuthorizedConnections,
}

impl TankCreate {
    /// Chain length bound used for stateless validation, where the configured
    /// limit is not available.
    pub const FALLBACK_CHAIN_LENGTH: usize = 100;

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.deposit_amount <= 0 {
            return Err(ValidationErrorKind::NonPositive { what: "deposit" }.into());
        }
        let schematic = crate::schematic::TankSchematic::from_create_operation(self);
        TankValidator::new(&schematic, Self::FALLBACK_CHAIN_LENGTH).validate_tank()?;
        Ok(())
    }
}

/// Restructure an existing tank's taps, attachments, or source policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankUpdate {
    /// Pays or receives the deposit delta.
    pub payer: AccountId,
    /// Must equal the emergency tap's open authority.
    pub update_authority: Authority,
    pub tank_to_update: TankId,
    /// Change to the deposit: `new_deposit − old_deposit`. The payer's core
    /// balance moves by the negation.
    pub deposit_delta: Amount,
    pub taps_to_remove: BTreeSet<IndexType>,
    /// State for all requirements of replaced taps is deleted.
    pub taps_to_replace: BTreeMap<IndexType, Tap>,
    /// Assigned fresh indexes from the tap counter.
    pub taps_to_add: Vec<Tap>,
    pub attachments_to_remove: Vec<IndexType>,
    /// State for replaced attachments is deleted.
    pub attachments_to_replace: BTreeMap<IndexType, TankAttachment>,
    pub attachments_to_add: Vec<TankAttachment>,
    /// If set, replaces the tank's deposit-source authorizations.
    pub new_authorized_sources: Option<AuthorizedConnections>,
}

impl TankUpdate {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.taps_to_remove.contains(&EMERGENCY_TAP) {
            return Err(ValidationErrorKind::EmergencyTapRemoved.into());
        }
        self.update_authority.ensure_usable("update authority")?;
        self.update_authority.ensure_nontrivial("update authority")?;

        if self
            .taps_to_replace
            .keys()
            .any(|index| self.taps_to_remove.contains(index))
        {
            return Err(ValidationErrorKind::RemoveReplaceOverlap { what: "tap" }.into());
        }
        if self
            .attachments_to_replace
            .keys()
            .any(|index| self.attachments_to_remove.contains(index))
        {
            return Err(ValidationErrorKind::RemoveReplaceOverlap { what: "attachment" }.into());
        }

        if let Some(emergency) = self.taps_to_replace.get(&EMERGENCY_TAP) {
            TankValidator::validate_emergency_tap_structure(emergency)?;
        }
        for tap in self.taps_to_replace.values().chain(&self.taps_to_add) {
            TankValidator::validate_tap_structure(tap)?;
        }

        let mut unique = UniquenessChecker::default();
        for attachment in self.attachments_to_replace.values().chain(&self.attachments_to_add) {
            if !unique.check(attachment.tag(), attachment.unique()) {
                return Err(ValidationErrorKind::DuplicateAttachmentType {
                    kind: attachment.kind_name(),
                }
                .into());
            }
            TankValidator::validate_attachment_structure(attachment)?;
        }

        Ok(())
    }
}

/// Destroy an empty tank and reclaim its deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankDelete {
    /// Receives the deposit.
    pub payer: AccountId,
    /// Must equal the emergency tap's open authority.
    pub delete_authority: Authority,
    pub tank_to_delete: TankId,
    /// Must equal the tank's deposit.
    pub deposit_claimed: Amount,
}

impl TankDelete {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.delete_authority.ensure_usable("delete authority")?;
        self.delete_authority.ensure_nontrivial("delete authority")?;
        Ok(())
    }
}

/// Run queries against a tank without opening any tap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankQueryOp {
    pub payer: AccountId,
    /// Authorities authenticating the queries; each must be used by at least
    /// one query.
    pub required_authorities: Vec<Authority>,
    pub tank_to_query: TankId,
    pub queries: Vec<TankQuery>,
}

impl TankQueryOp {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        ensure_no_duplicate_authorities(&self.required_authorities)?;
        if self.queries.is_empty() {
            return Err(ValidationErrorKind::EmptyQueryList.into());
        }
        validate_queries(&self.queries, self.tank_to_query, false)?;
        Ok(())
    }
}

/// Open a tap, optionally running queries first and optionally destroying the
/// tank if the tap is a destructor and the tank empties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapOpen {
    /// Pays the fee and receives any claimed deposit.
    pub payer: AccountId,
    pub required_authorities: Vec<Authority>,
    /// Queries run before the tap opens.
    pub queries: Vec<TankQuery>,
    /// The tap to open; the tank id must be set.
    pub tap_to_open: TapId,
    pub release_amount: AssetFlowLimit,
    /// If set, destroy the tank and claim this deposit. The tap must be a
    /// destructor tap and the tank must be empty when the operation finishes.
    pub deposit_claimed: Option<Amount>,
    /// Total taps this operation opens, including cascaded opens.
    pub tap_open_count: u16,
}

impl TapOpen {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        ensure_no_duplicate_authorities(&self.required_authorities)?;
        let Some(tank_id) = self.tap_to_open.tank_id else {
            return Err(ValidationErrorKind::TankIdRequired.into());
        };
        validate_queries(&self.queries, tank_id, true)?;

        if let Some(amount) = self.release_amount.bounded() {
            if amount < 0 {
                return Err(ValidationErrorKind::NegativeReleaseAmount.into());
            }
            if amount == 0 && self.deposit_claimed.is_none() {
                return Err(ValidationErrorKind::ZeroReleaseWithoutDestroy.into());
            }
        }

        if self.tap_open_count < 1 {
            return Err(ValidationErrorKind::ZeroTapOpenCount.into());
        }
        Ok(())
    }
}

/// Replace a tap's connection, optionally freezing it by clearing the
/// connect authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapConnect {
    pub payer: AccountId,
    /// Must match the tap's connect authority.
    pub connect_authority: Authority,
    /// The tap to reconnect; the tank id must be set.
    pub tap_to_connect: TapId,
    /// New destination; if unset, the tap is disconnected.
    pub new_connection: Option<Connection>,
    /// If true, the tap's connect authority is cleared and the connection can
    /// never be changed again; requires `new_connection` to be set.
    pub clear_connect_authority: bool,
}

impl TapConnect {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.tap_to_connect.tank_id.is_none() {
            return Err(ValidationErrorKind::TankIdRequired.into());
        }
        if self.clear_connect_authority && self.new_connection.is_none() {
            return Err(ValidationErrorKind::ConnectionRequiredToClearAuthority.into());
        }
        Ok(())
    }
}

/// Deposit asset from an account balance into a connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFundConnection {
    /// Provides the funds.
    pub funding_account: AccountId,
    pub funding_destination: Connection,
    pub funding_amount: AssetAmount,
}

impl AccountFundConnection {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.funding_amount.amount <= 0 {
            return Err(ValidationErrorKind::NonPositiveFundingAmount.into());
        }
        Ok(())
    }
}

/// Virtual operation emitted when a connection flow credits an account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionFundAccount {
    pub receiving_account: AccountId,
    pub amount_received: AssetAmount,
    /// The path the asset took to reach the account, including the origin.
    pub asset_path: Vec<Connection>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationError;

    #[test]
    fn test_update_cannot_remove_emergency_tap() {
        let op = TankUpdate {
            payer: AccountId(1),
            update_authority: Authority::account(AccountId(1)),
            tank_to_update: TankId(1),
            deposit_delta: 0,
            taps_to_remove: [EMERGENCY_TAP].into(),
            taps_to_replace: BTreeMap::new(),
            taps_to_add: vec![],
            attachments_to_remove: vec![],
            attachments_to_replace: BTreeMap::new(),
            attachments_to_add: vec![],
            new_authorized_sources: None,
        };
        assert_eq!(
            op.validate(),
            Err(ProtocolError::Validation(ValidationError::bare(
                ValidationErrorKind::EmergencyTapRemoved
            )))
        );
    }

    #[test]
    fn test_update_remove_and_replace_disjoint() {
        let op = TankUpdate {
            payer: AccountId(1),
            update_authority: Authority::account(AccountId(1)),
            tank_to_update: TankId(1),
            deposit_delta: 0,
            taps_to_remove: [2].into(),
            taps_to_replace: BTreeMap::from([(2, Tap::default())]),
            taps_to_add: vec![],
            attachments_to_remove: vec![],
            attachments_to_replace: BTreeMap::new(),
            attachments_to_add: vec![],
            new_authorized_sources: None,
        };
        assert_eq!(
            op.validate(),
            Err(ProtocolError::Validation(ValidationError::bare(
                ValidationErrorKind::RemoveReplaceOverlap { what: "tap" }
            )))
        );
    }

    #[test]
    fn test_tap_open_requires_tank_id() {
        let op = TapOpen {
            payer: AccountId(1),
            required_authorities: vec![],
            queries: vec![],
            tap_to_open: TapId::new(None, 0),
            release_amount: AssetFlowLimit::Unlimited,
            deposit_claimed: None,
            tap_open_count: 1,
        };
        assert_eq!(
            op.validate(),
            Err(ProtocolError::Validation(ValidationError::bare(
                ValidationErrorKind::TankIdRequired
            )))
        );
    }

    #[test]
    fn test_tap_open_zero_release_requires_destroy() {
        let mut op = TapOpen {
            payer: AccountId(1),
            required_authorities: vec![],
            queries: vec![],
            tap_to_open: TapId::new(TankId(1), 0),
            release_amount: AssetFlowLimit::Amount(0),
            deposit_claimed: None,
            tap_open_count: 1,
        };
        assert!(op.validate().is_err());
        op.deposit_claimed = Some(100);
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_duplicate_declared_authorities_rejected() {
        let auth = Authority::account(AccountId(1));
        let op = TapOpen {
            payer: AccountId(1),
            required_authorities: vec![auth.clone(), auth],
            queries: vec![],
            tap_to_open: TapId::new(TankId(1), 0),
            release_amount: AssetFlowLimit::Unlimited,
            deposit_claimed: None,
            tap_open_count: 1,
        };
        assert_eq!(
            op.validate(),
            Err(ProtocolError::Validation(ValidationError::bare(
                ValidationErrorKind::DuplicateDeclaredAuthority
            )))
        );
    }

    #[test]
    fn test_tap_connect_clear_requires_connection() {
        let op = TapConnect {
            payer: AccountId(1),
            connect_authority: Authority::account(AccountId(1)),
            tap_to_connect: TapId::new(TankId(1), 1),
            new_connection: None,
            clear_connect_authority: true,
        };
        assert_eq!(
            op.validate(),
            Err(ProtocolError::Validation(ValidationError::bare(
                ValidationErrorKind::ConnectionRequiredToClearAuthority
            )))
        );
    }

    #[test]
    fn test_fund_connection_requires_positive_amount() {
        let op = AccountFundConnection {
            funding_account: AccountId(1),
            funding_destination: Connection::Tank(TankId(1)),
            funding_amount: AssetAmount::new(AssetId(1), 0),
        };
        assert!(op.validate().is_err());
    }
}
