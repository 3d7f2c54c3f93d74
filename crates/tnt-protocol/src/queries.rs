//! Tank queries: declarative actions against a tank's accessory state.
//!
//! A query names a target (an accessory address, or the tank itself) and an
//! action to take there. Query *evaluation* lives in the chain layer; this
//! module defines the query model and the stateless checks an operation's
//! query list must pass: argument validity, the tap-open-only flag,
//! per-target uniqueness, and ticket/target binding.

use crate::accessories::Ticket;
use crate::address::AccessoryAddress;
use crate::authority::Signature;
use crate::errors::QueryError;
use crate::types::{
    AssetFlowLimit, Connection, IndexType, TankId, MAX_COMMENT_LENGTH,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What a query acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueryTarget {
    /// The tank as a whole.
    Tank,
    Accessory(AccessoryAddress),
}

/// Any query that can run against a tank. Variant order is the stable wire
/// order; new kinds are always appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TankQuery {
    /// Reset a flow meter's tally to zero.
    ResetMeter { address: AccessoryAddress },
    /// Point an asset-receiving attachment at a new destination, authorized
    /// by an attachment-connect-authority accessory.
    ReconnectAttachment {
        address: AccessoryAddress,
        new_connection: Connection,
    },
    /// File a release request against a review requirement.
    CreateReviewRequest {
        address: AccessoryAddress,
        request_amount: AssetFlowLimit,
        comment: Option<String>,
    },
    /// Approve or deny a pending review request.
    ReviewRequest {
        address: AccessoryAddress,
        request_id: IndexType,
        approved: bool,
        comment: Option<String>,
    },
    /// Withdraw a pending review request.
    CancelReviewRequest {
        address: AccessoryAddress,
        request_id: IndexType,
        comment: Option<String>,
    },
    /// Spend an approved review request to open the tap.
    ConsumeApprovedRequest {
        address: AccessoryAddress,
        request_id: IndexType,
    },
    /// Record the reason for the action being taken. Always accepted, and
    /// satisfies a documentation requirement when the tap opens.
    DocumentationString { reason: String },
    /// File a release request against a delay requirement.
    CreateDelayRequest {
        address: AccessoryAddress,
        request_amount: AssetFlowLimit,
        comment: Option<String>,
    },
    /// Veto a delay request before it matures.
    VetoDelayRequest {
        address: AccessoryAddress,
        request_id: IndexType,
        comment: Option<String>,
    },
    /// Withdraw a pending delay request.
    CancelDelayRequest {
        address: AccessoryAddress,
        request_id: IndexType,
        comment: Option<String>,
    },
    /// Spend a matured delay request to open the tap.
    ConsumeMaturedRequest {
        address: AccessoryAddress,
        request_id: IndexType,
    },
    /// Reveal the preimage of a hash-preimage requirement.
    RevealHashPreimage {
        address: AccessoryAddress,
        preimage: Vec<u8>,
    },
    /// Redeem a signed ticket against a ticket requirement.
    RedeemTicket {
        address: AccessoryAddress,
        ticket: Ticket,
        signature: Signature,
    },
    /// Reset an exchange requirement's released tally to zero. The linked
    /// meter must already read zero when this query is evaluated, so reset
    /// the meter in an earlier operation.
    ResetExchange { address: AccessoryAddress },
}

impl TankQuery {
    pub fn name(&self) -> &'static str {
        match self {
            TankQuery::ResetMeter { .. } => "reset_meter",
            TankQuery::ReconnectAttachment { .. } => "reconnect_attachment",
            TankQuery::CreateReviewRequest { .. } => "create_request_for_review",
            TankQuery::ReviewRequest { .. } => "review_request_to_open",
            TankQuery::CancelReviewRequest { .. } => "cancel_request_for_review",
            TankQuery::ConsumeApprovedRequest { .. } => "consume_approved_request_to_open",
            TankQuery::DocumentationString { .. } => "documentation_string",
            TankQuery::CreateDelayRequest { .. } => "create_request_for_delay",
            TankQuery::VetoDelayRequest { .. } => "veto_request_in_delay",
            TankQuery::CancelDelayRequest { .. } => "cancel_request_in_delay",
            TankQuery::ConsumeMaturedRequest { .. } => "consume_matured_request_to_open",
            TankQuery::RevealHashPreimage { .. } => "reveal_hash_preimage",
            TankQuery::RedeemTicket { .. } => "redeem_ticket_to_open",
            TankQuery::ResetExchange { .. } => "reset_exchange_requirement",
        }
    }

    /// Stable numeric tag of the query kind.
    pub fn tag(&self) -> u8 {
        match self {
            TankQuery::ResetMeter { .. } => 0,
            TankQuery::ReconnectAttachment { .. } => 1,
            TankQuery::CreateReviewRequest { .. } => 2,
            TankQuery::ReviewRequest { .. } => 3,
            TankQuery::CancelReviewRequest { .. } => 4,
            TankQuery::ConsumeApprovedRequest { .. } => 5,
            TankQuery::DocumentationString { .. } => 6,
            TankQuery::CreateDelayRequest { .. } => 7,
            TankQuery::VetoDelayRequest { .. } => 8,
            TankQuery::CancelDelayRequest { .. } => 9,
            TankQuery::ConsumeMaturedRequest { .. } => 10,
            TankQuery::RevealHashPreimage { .. } => 11,
            TankQuery::RedeemTicket { .. } => 12,
            TankQuery::ResetExchange { .. } => 13,
        }
    }

    /// True if the query only makes sense while opening a tap.
    pub fn tap_open_only(&self) -> bool {
        matches!(
            self,
            TankQuery::ConsumeApprovedRequest { .. }
                | TankQuery::ConsumeMaturedRequest { .. }
                | TankQuery::RevealHashPreimage { .. }
                | TankQuery::RedeemTicket { .. }
        )
    }

    /// True if at most one query of this kind may run per target per
    /// operation.
    pub fn unique(&self) -> bool {
        matches!(
            self,
            TankQuery::ResetMeter { .. }
                | TankQuery::ReconnectAttachment { .. }
                | TankQuery::RevealHashPreimage { .. }
                | TankQuery::RedeemTicket { .. }
                | TankQuery::ResetExchange { .. }
        )
    }

    pub fn target(&self) -> QueryTarget {
        match self {
            TankQuery::DocumentationString { .. } => QueryTarget::Tank,
            TankQuery::ResetMeter { address }
            | TankQuery::ReconnectAttachment { address, .. }
            | TankQuery::CreateReviewRequest { address, .. }
            | TankQuery::ReviewRequest { address, .. }
            | TankQuery::CancelReviewRequest { address, .. }
            | TankQuery::ConsumeApprovedRequest { address, .. }
            | TankQuery::CreateDelayRequest { address, .. }
            | TankQuery::VetoDelayRequest { address, .. }
            | TankQuery::CancelDelayRequest { address, .. }
            | TankQuery::ConsumeMaturedRequest { address, .. }
            | TankQuery::RevealHashPreimage { address, .. }
            | TankQuery::RedeemTicket { address, .. }
            | TankQuery::ResetExchange { address } => QueryTarget::Accessory(*address),
        }
    }

    /// Stateless argument checks.
    pub fn validate(&self) -> Result<(), QueryError> {
        match self {
            TankQuery::CreateReviewRequest { request_amount, comment, .. }
            | TankQuery::CreateDelayRequest { request_amount, comment, .. } => {
                if *request_amount == AssetFlowLimit::Amount(0) {
                    return Err(QueryError::ZeroRequestAmount);
                }
                validate_comment(comment.as_deref())
            }
            TankQuery::ReviewRequest { comment, .. }
            | TankQuery::CancelReviewRequest { comment, .. }
            | TankQuery::VetoDelayRequest { comment, .. }
            | TankQuery::CancelDelayRequest { comment, .. } => {
                validate_comment(comment.as_deref())
            }
            TankQuery::DocumentationString { reason } => validate_comment(Some(reason.as_str())),
            TankQuery::RevealHashPreimage { preimage, .. } => {
                if preimage.is_empty() {
                    return Err(QueryError::EmptyPreimage);
                }
                Ok(())
            }
            TankQuery::RedeemTicket { ticket, .. } => {
                if let Some(amount) = ticket.max_withdrawal.bounded() {
                    if amount <= 0 {
                        return Err(QueryError::NonPositiveMaxWithdrawal);
                    }
                }
                Ok(())
            }
            TankQuery::ResetMeter { .. }
            | TankQuery::ReconnectAttachment { .. }
            | TankQuery::ConsumeApprovedRequest { .. }
            | TankQuery::ConsumeMaturedRequest { .. }
            | TankQuery::ResetExchange { .. } => Ok(()),
        }
    }
}

fn validate_comment(comment: Option<&str>) -> Result<(), QueryError> {
    match comment {
        None => Ok(()),
        Some(comment) if comment.is_empty() => Err(QueryError::EmptyComment),
        Some(comment) if comment.len() > MAX_COMMENT_LENGTH => Err(QueryError::CommentTooLong),
        Some(_) => Ok(()),
    }
}

/// Validate an operation's query list: per-query arguments, the
/// tap-open-only flag, per-target uniqueness of unique kinds, and exact
/// ticket/target binding for ticket redemptions.
pub fn validate_queries(
    queries: &[TankQuery],
    queried_tank: TankId,
    tap_open: bool,
) -> Result<(), QueryError> {
    let mut unique_targets: BTreeMap<u8, BTreeSet<QueryTarget>> = BTreeMap::new();

    for query in queries {
        query.validate()?;

        if query.tap_open_only() && !tap_open {
            return Err(QueryError::TapOpenOnly { query: query.name() });
        }

        if query.unique() {
            let seen = unique_targets.entry(query.tag()).or_default();
            if !seen.insert(query.target()) {
                return Err(QueryError::Duplicate { query: query.name() });
            }
        }

        if let TankQuery::RedeemTicket { address, ticket, .. } = query {
            let AccessoryAddress::Requirement { tap, requirement } = address else {
                return Err(QueryError::WrongTargetType { path: address.path() });
            };
            if ticket.tank_id != queried_tank {
                return Err(QueryError::TicketTargetMismatch { field: "tank" });
            }
            if ticket.tap_index != *tap {
                return Err(QueryError::TicketTargetMismatch { field: "tap" });
            }
            if ticket.requirement_index != *requirement {
                return Err(QueryError::TicketTargetMismatch { field: "requirement index" });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redeem(tank: TankId, tap: IndexType, requirement: IndexType) -> TankQuery {
        TankQuery::RedeemTicket {
            address: AccessoryAddress::requirement(tap, requirement),
            ticket: Ticket {
                tank_id: tank,
                tap_index: tap,
                requirement_index: requirement,
                max_withdrawal: AssetFlowLimit::Amount(100),
                ticket_number: 0,
            },
            signature: Signature { r: [0; 32], s: [0; 32], v: 0 },
        }
    }

    #[test]
    fn test_tap_open_only_rejected_in_query_op() {
        let queries = vec![TankQuery::RevealHashPreimage {
            address: AccessoryAddress::requirement(1, 0),
            preimage: vec![1, 2, 3],
        }];
        assert!(validate_queries(&queries, TankId(1), true).is_ok());
        assert_eq!(
            validate_queries(&queries, TankId(1), false),
            Err(QueryError::TapOpenOnly { query: "reveal_hash_preimage" })
        );
    }

    #[test]
    fn test_unique_kind_rejected_per_target() {
        let queries = vec![redeem(TankId(1), 1, 0), redeem(TankId(1), 1, 0)];
        assert_eq!(
            validate_queries(&queries, TankId(1), true),
            Err(QueryError::Duplicate { query: "redeem_ticket_to_open" })
        );

        // Different targets are fine.
        let queries = vec![redeem(TankId(1), 1, 0), redeem(TankId(1), 2, 0)];
        assert!(validate_queries(&queries, TankId(1), true).is_ok());
    }

    #[test]
    fn test_ticket_must_bind_to_target() {
        let mut query = redeem(TankId(1), 1, 0);
        if let TankQuery::RedeemTicket { ticket, .. } = &mut query {
            ticket.tap_index = 2;
        }
        assert_eq!(
            validate_queries(&[query], TankId(1), true),
            Err(QueryError::TicketTargetMismatch { field: "tap" })
        );

        assert_eq!(
            validate_queries(&[redeem(TankId(2), 1, 0)], TankId(1), true),
            Err(QueryError::TicketTargetMismatch { field: "tank" })
        );
    }

    #[test]
    fn test_comment_limits() {
        let query = TankQuery::CreateReviewRequest {
            address: AccessoryAddress::requirement(1, 0),
            request_amount: AssetFlowLimit::Amount(10),
            comment: Some(String::new()),
        };
        assert_eq!(query.validate(), Err(QueryError::EmptyComment));

        let query = TankQuery::DocumentationString { reason: "x".repeat(151) };
        assert_eq!(query.validate(), Err(QueryError::CommentTooLong));

        let query = TankQuery::DocumentationString { reason: "audit trail".into() };
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_zero_request_amount_rejected() {
        let query = TankQuery::CreateDelayRequest {
            address: AccessoryAddress::requirement(1, 0),
            request_amount: AssetFlowLimit::Amount(0),
            comment: None,
        };
        assert_eq!(query.validate(), Err(QueryError::ZeroRequestAmount));

        let query = TankQuery::CreateDelayRequest {
            address: AccessoryAddress::requirement(1, 0),
            request_amount: AssetFlowLimit::Unlimited,
            comment: None,
        };
        assert!(query.validate().is_ok());
    }
}
