//! Two-phase evaluation of tank queries.
//!
//! The evaluator is pinned to one tank with [`set_query_tank`], evaluates
//! any number of queries against a snapshot of that tank (collecting the
//! authorities each query requires), and finally applies every evaluated
//! query, in evaluation order, to a mutable tank. Evaluation always observes
//! pre-operation state; no apply runs before all evaluates are done.
//!
//! Evaluated queries are indexed by target so the tap-flow machinery can ask
//! which queries address a given accessory or the tank itself.
//!
//! [`set_query_tank`]: QueryEvaluator::set_query_tank

use crate::domain::errors::{StateError, TntError};
use crate::domain::object::TankObject;
use crate::ports::database::{ChainDatabase, DbLookup};
use tnt_protocol::accessories::{
    DelayRequest, DelayState, ExchangeState, MeterState, ReviewRequest, ReviewState, TankAttachment,
    TapRequirement, TicketState,
};
use tnt_protocol::address::AccessoryAddress;
use tnt_protocol::authority::{recover_signer, Authority};
use tnt_protocol::errors::{AuthorityError, QueryError};
use tnt_protocol::lookups::{ConnectionAsset, Lookups};
use tnt_protocol::queries::TankQuery;
use tnt_protocol::schematic::EMERGENCY_TAP;
use tnt_protocol::types::{IndexType, TimePointSec};
use std::collections::BTreeMap;

/// Evaluates queries against a tank snapshot, then applies them.
#[derive(Default)]
pub struct QueryEvaluator {
    tank: Option<TankObject>,
    evaluated: Vec<TankQuery>,
    accessory_queries: BTreeMap<AccessoryAddress, Vec<usize>>,
    tank_queries: Vec<usize>,
    applied: bool,
}

impl QueryEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the evaluator to a tank. May only be called once.
    pub fn set_query_tank(&mut self, tank: &TankObject) -> Result<(), StateError> {
        if self.tank.is_some() {
            return Err(StateError::QueryTankAlreadySet);
        }
        self.tank = Some(tank.clone());
        Ok(())
    }

    /// Evaluate one query, returning the authorities it requires. The query
    /// is recorded for the apply phase.
    pub fn evaluate_query<D: ChainDatabase + ?Sized>(
        &mut self,
        query: &TankQuery,
        db: &D,
    ) -> Result<Vec<Authority>, TntError> {
        if self.applied {
            return Err(StateError::EvaluateAfterApply.into());
        }
        let tank = self.tank.as_ref().ok_or(StateError::QueryTankUnset)?;

        let mut required = Vec::new();
        evaluate(query, tank, db, &mut required)?;

        let index = self.evaluated.len();
        match query.target() {
            tnt_protocol::queries::QueryTarget::Tank => self.tank_queries.push(index),
            tnt_protocol::queries::QueryTarget::Accessory(address) => {
                self.accessory_queries.entry(address).or_default().push(index);
            }
        }
        self.evaluated.push(query.clone());
        Ok(required)
    }

    /// Apply every evaluated query, in evaluation order. Terminal: no
    /// further queries can be evaluated afterwards.
    pub fn apply_queries(
        &mut self,
        tank: &mut TankObject,
        now: TimePointSec,
    ) -> Result<(), TntError> {
        self.applied = true;
        for query in &self.evaluated {
            apply(query, tank, now)?;
        }
        Ok(())
    }

    /// Evaluated queries targeting the tank itself.
    pub fn tank_queries(&self) -> impl Iterator<Item = &TankQuery> {
        self.tank_queries.iter().map(|index| &self.evaluated[*index])
    }

    /// Evaluated queries targeting the given accessory.
    pub fn target_queries(&self, address: AccessoryAddress) -> impl Iterator<Item = &TankQuery> {
        self.accessory_queries
            .get(&address)
            .map(|indexes| indexes.as_slice())
            .unwrap_or(&[])
            .iter()
            .map(|index| &self.evaluated[*index])
    }
}

// =============================================================================
// EVALUATE
// =============================================================================

fn require(authorities: &mut Vec<Authority>, authority: &Authority) {
    authorities.push(authority.clone());
}

/// The emergency tap's open authority, the fallback for reset queries.
fn emergency_open_authority(tank: &TankObject) -> Result<&Authority, TntError> {
    tank.schematic
        .tap(EMERGENCY_TAP)
        .and_then(|tap| tap.open_authority.as_ref())
        .ok_or_else(|| {
            AuthorityError::Unset { context: "emergency tap open authority".into() }.into()
        })
}

/// The open authority of the tap holding the addressed requirement.
fn tap_open_authority<'t>(
    tank: &'t TankObject,
    address: &AccessoryAddress,
) -> Result<&'t Authority, TntError> {
    let tap_index = address
        .tap_index()
        .ok_or(QueryError::WrongTargetType { path: address.path() })?;
    tank.schematic
        .tap(tap_index)
        .ok_or(QueryError::TargetNotFound { path: address.path() })?
        .open_authority
        .as_ref()
        .ok_or_else(|| AuthorityError::Unset { context: "tap open authority".into() }.into())
}

fn review_requirement<'t>(
    tank: &'t TankObject,
    address: &AccessoryAddress,
) -> Result<&'t tnt_protocol::accessories::ReviewRequirement, TntError> {
    match address.requirement_in(&tank.schematic)? {
        TapRequirement::Review(requirement) => Ok(requirement),
        _ => Err(QueryError::WrongTargetType { path: address.path() }.into()),
    }
}

fn delay_requirement<'t>(
    tank: &'t TankObject,
    address: &AccessoryAddress,
) -> Result<&'t tnt_protocol::accessories::DelayRequirement, TntError> {
    match address.requirement_in(&tank.schematic)? {
        TapRequirement::Delay(requirement) => Ok(requirement),
        _ => Err(QueryError::WrongTargetType { path: address.path() }.into()),
    }
}

fn pending_review_request<'t>(
    tank: &'t TankObject,
    address: &AccessoryAddress,
    request_id: IndexType,
) -> Result<&'t ReviewRequest, TntError> {
    let state = tank
        .state::<ReviewState>(*address)
        .ok_or(QueryError::NoRequests)?;
    state
        .pending_requests
        .get(&request_id)
        .ok_or_else(|| QueryError::RequestNotFound { id: request_id }.into())
}

fn pending_delay_request<'t>(
    tank: &'t TankObject,
    address: &AccessoryAddress,
    request_id: IndexType,
) -> Result<&'t DelayRequest, TntError> {
    let state = tank
        .state::<DelayState>(*address)
        .ok_or(QueryError::NoRequests)?;
    state
        .pending_requests
        .get(&request_id)
        .ok_or_else(|| QueryError::RequestNotFound { id: request_id }.into())
}

fn evaluate<D: ChainDatabase + ?Sized>(
    query: &TankQuery,
    tank: &TankObject,
    db: &D,
    required: &mut Vec<Authority>,
) -> Result<(), TntError> {
    match query {
        TankQuery::ResetMeter { address } => {
            let TankAttachment::FlowMeter(meter) = address.attachment_in(&tank.schematic)?
            else {
                return Err(QueryError::WrongTargetType { path: address.path() }.into());
            };
            match &meter.reset_authority {
                Some(authority) => require(required, authority),
                None => require(required, emergency_open_authority(tank)?),
            }
            let flowed = tank
                .state::<MeterState>(*address)
                .map(|state| state.metered_amount)
                .unwrap_or(0);
            if flowed <= 0 {
                return Err(QueryError::MeterUnused.into());
            }
            Ok(())
        }

        TankQuery::ReconnectAttachment { address, new_connection } => {
            let TankAttachment::ConnectAuthority(aca) = address.attachment_in(&tank.schematic)?
            else {
                return Err(QueryError::WrongTargetType { path: address.path() }.into());
            };
            require(required, &aca.connect_authority);

            let target_address = AccessoryAddress::attachment(aca.attachment_index);
            let target = target_address.attachment_in(&tank.schematic)?;
            let released_asset = target
                .receives_asset()
                .ok_or(QueryError::ReconnectAssetMismatch)?;

            let lookup = DbLookup(db);
            let lookups = Lookups::with_lookup(&tank.schematic, &lookup);
            match lookups.connection_asset(new_connection) {
                Ok(ConnectionAsset::Any) => Ok(()),
                Ok(ConnectionAsset::Asset(asset)) if asset == released_asset => Ok(()),
                Ok(ConnectionAsset::Asset(_)) | Ok(ConnectionAsset::NoAsset(_)) => {
                    Err(QueryError::ReconnectAssetMismatch.into())
                }
                Err(err) => Err(err.into()),
            }
        }

        TankQuery::CreateReviewRequest { address, .. } => {
            let requirement = review_requirement(tank, address)?;
            require(required, tap_open_authority(tank, address)?);
            if let Some(state) = tank.state::<ReviewState>(*address) {
                if state.pending_requests.len() >= usize::from(requirement.request_limit) {
                    return Err(QueryError::RequestLimitReached.into());
                }
            }
            Ok(())
        }

        TankQuery::ReviewRequest { address, request_id, .. } => {
            let requirement = review_requirement(tank, address)?;
            require(required, &requirement.reviewer);
            let request = pending_review_request(tank, address, *request_id)?;
            if request.approved {
                return Err(QueryError::AlreadyApproved { id: *request_id }.into());
            }
            Ok(())
        }

        TankQuery::CancelReviewRequest { address, request_id, .. } => {
            review_requirement(tank, address)?;
            require(required, tap_open_authority(tank, address)?);
            pending_review_request(tank, address, *request_id)?;
            Ok(())
        }

        TankQuery::ConsumeApprovedRequest { address, request_id } => {
            review_requirement(tank, address)?;
            require(required, tap_open_authority(tank, address)?);
            let request = pending_review_request(tank, address, *request_id)?;
            if !request.approved {
                return Err(QueryError::NotApproved { id: *request_id }.into());
            }
            Ok(())
        }

        // Recorded as a tank-level query; the documentation requirement's
        // flow limit checks for its presence when the tap opens.
        TankQuery::DocumentationString { .. } => Ok(()),

        TankQuery::CreateDelayRequest { address, .. } => {
            let requirement = delay_requirement(tank, address)?;
            require(required, tap_open_authority(tank, address)?);
            if let Some(state) = tank.state::<DelayState>(*address) {
                if state.pending_requests.len() >= usize::from(requirement.request_limit) {
                    return Err(QueryError::RequestLimitReached.into());
                }
            }
            Ok(())
        }

        TankQuery::VetoDelayRequest { address, request_id, .. } => {
            let requirement = delay_requirement(tank, address)?;
            let veto = requirement
                .veto_authority
                .as_ref()
                .ok_or(QueryError::NoVetoAuthority)?;
            require(required, veto);
            let request = pending_delay_request(tank, address, *request_id)?;
            if db.head_block_time() >= request.delay_period_end {
                return Err(QueryError::AlreadyMatured { id: *request_id }.into());
            }
            Ok(())
        }

        TankQuery::CancelDelayRequest { address, request_id, .. } => {
            delay_requirement(tank, address)?;
            require(required, tap_open_authority(tank, address)?);
            pending_delay_request(tank, address, *request_id)?;
            Ok(())
        }

        TankQuery::ConsumeMaturedRequest { address, request_id } => {
            delay_requirement(tank, address)?;
            require(required, tap_open_authority(tank, address)?);
            let request = pending_delay_request(tank, address, *request_id)?;
            if db.head_block_time() < request.delay_period_end {
                return Err(QueryError::NotMatured { id: *request_id }.into());
            }
            Ok(())
        }

        TankQuery::RevealHashPreimage { address, preimage } => {
            // A valid preimage confers its own authority.
            let TapRequirement::HashPreimage(requirement) =
                address.requirement_in(&tank.schematic)?
            else {
                return Err(QueryError::WrongTargetType { path: address.path() }.into());
            };
            if let Some(expected) = requirement.preimage_size {
                if preimage.len() != usize::from(expected) {
                    return Err(QueryError::PreimageSizeMismatch {
                        expected,
                        actual: preimage.len(),
                    }
                    .into());
                }
            }
            if !requirement.hash.matches(preimage) {
                return Err(QueryError::PreimageMismatch.into());
            }
            Ok(())
        }

        TankQuery::RedeemTicket { address, ticket, signature } => {
            // A valid signature confers its own authority.
            let TapRequirement::Ticket(requirement) = address.requirement_in(&tank.schematic)?
            else {
                return Err(QueryError::WrongTargetType { path: address.path() }.into());
            };
            let expected = tank
                .state::<TicketState>(*address)
                .map(|state| state.tickets_consumed)
                .unwrap_or(0);
            if ticket.ticket_number != expected {
                return Err(QueryError::TicketNumberMismatch { expected }.into());
            }
            let signer = recover_signer(&ticket.digest(), signature)
                .ok_or(QueryError::TicketSignatureInvalid)?;
            if signer != requirement.ticket_signer {
                return Err(QueryError::TicketSignatureInvalid.into());
            }
            Ok(())
        }

        TankQuery::ResetExchange { address } => {
            let TapRequirement::Exchange(requirement) = address.requirement_in(&tank.schematic)?
            else {
                return Err(QueryError::WrongTargetType { path: address.path() }.into());
            };
            match &requirement.reset_authority {
                Some(authority) => require(required, authority),
                None => require(required, emergency_open_authority(tank)?),
            }

            let released = tank
                .state::<ExchangeState>(*address)
                .map(|state| state.amount_released)
                .unwrap_or(0);
            if released <= 0 {
                return Err(QueryError::ExchangeUnused.into());
            }

            // The linked meter must read zero at evaluation time. A
            // reset_meter in the same operation has not applied yet and does
            // not help.
            let meter_tank = match requirement.meter_id.tank_id {
                Some(id) => db.get_tank(id)?,
                None => tank,
            };
            let meter_address = AccessoryAddress::attachment(requirement.meter_id.index);
            if let Some(meter) = meter_tank.state::<MeterState>(meter_address) {
                if meter.metered_amount != 0 {
                    return Err(QueryError::MeterNotZero.into());
                }
            }
            Ok(())
        }
    }
}

// =============================================================================
// APPLY
// =============================================================================

fn apply(query: &TankQuery, tank: &mut TankObject, now: TimePointSec) -> Result<(), TntError> {
    match query {
        TankQuery::ResetMeter { address } => {
            tank.state_or_default::<MeterState>(*address).metered_amount = 0;
        }

        TankQuery::ReconnectAttachment { address, new_connection } => {
            let AccessoryAddress::Attachment { attachment } = address else {
                return Err(QueryError::WrongTargetType { path: address.path() }.into());
            };
            let target_index = match tank.schematic.attachment(*attachment) {
                Some(TankAttachment::ConnectAuthority(aca)) => aca.attachment_index,
                _ => return Err(QueryError::WrongTargetType { path: address.path() }.into()),
            };
            match tank.schematic.attachments.get_mut(&target_index) {
                Some(TankAttachment::FlowMeter(meter)) => meter.destination = *new_connection,
                Some(TankAttachment::TapOpener(opener)) => opener.destination = *new_connection,
                _ => return Err(QueryError::ReconnectAssetMismatch.into()),
            }
        }

        TankQuery::CreateReviewRequest { address, request_amount, comment } => {
            let state = tank.state_or_default::<ReviewState>(*address);
            let id = state.request_counter;
            state.request_counter += 1;
            state.pending_requests.insert(
                id,
                ReviewRequest {
                    request_amount: *request_amount,
                    request_comment: comment.clone(),
                    approved: false,
                },
            );
        }

        TankQuery::ReviewRequest { address, request_id, approved, .. } => {
            let state = tank.state_or_default::<ReviewState>(*address);
            if *approved {
                if let Some(request) = state.pending_requests.get_mut(request_id) {
                    request.approved = true;
                }
            } else {
                state.pending_requests.remove(request_id);
            }
        }

        TankQuery::CancelReviewRequest { address, request_id, .. } => {
            tank.state_or_default::<ReviewState>(*address)
                .pending_requests
                .remove(request_id);
        }

        // Consumed requests stay in state; the tap flow erases them when the
        // release actually happens.
        TankQuery::ConsumeApprovedRequest { .. } => {}
        TankQuery::ConsumeMaturedRequest { .. } => {}

        TankQuery::DocumentationString { .. } => {}

        TankQuery::CreateDelayRequest { address, request_amount, comment } => {
            let delay_period_sec = match address.requirement_in(&tank.schematic)? {
                TapRequirement::Delay(requirement) => requirement.delay_period_sec,
                _ => return Err(QueryError::WrongTargetType { path: address.path() }.into()),
            };
            let state = tank.state_or_default::<DelayState>(*address);
            let id = state.request_counter;
            state.request_counter += 1;
            state.pending_requests.insert(
                id,
                DelayRequest {
                    delay_period_end: now.saturating_add_secs(delay_period_sec),
                    request_amount: *request_amount,
                    request_comment: comment.clone(),
                },
            );
        }

        TankQuery::VetoDelayRequest { address, request_id, .. }
        | TankQuery::CancelDelayRequest { address, request_id, .. } => {
            tank.state_or_default::<DelayState>(*address)
                .pending_requests
                .remove(request_id);
        }

        // The preimage was checked at evaluation; the tap flow checks for
        // this query's presence when computing the release limit.
        TankQuery::RevealHashPreimage { .. } => {}

        TankQuery::RedeemTicket { address, .. } => {
            tank.state_or_default::<TicketState>(*address).tickets_consumed += 1;
        }

        TankQuery::ResetExchange { address } => {
            tank.state_or_default::<ExchangeState>(*address).amount_released = 0;
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
