//! Per-tap release limits and post-release bookkeeping.
//!
//! One utility instance exists per tap opened in an operation. The same tap
//! may open several times when openers cascade, so the utility carries the
//! budget left over from earlier openings: requirements that grant a
//! one-operation allowance (consumed requests, redeemed tickets) record the
//! remaining limit on first inspection and serve it on later ones.

use crate::domain::cow::CowTanks;
use crate::domain::errors::{StateError, TapFlowError, TntError};
use crate::domain::object::TankObject;
use crate::domain::query_eval::QueryEvaluator;
use crate::ports::database::ChainDatabase;
use std::collections::{BTreeMap, BTreeSet};
use tnt_protocol::accessories::{
    CumulativeFlowState, DelayState, ExchangeState, MeterState, PeriodicFlowState, ReviewState,
    TapRequirement, TicketState,
};
use tnt_protocol::address::AccessoryAddress;
use tnt_protocol::errors::QueryError;
use tnt_protocol::queries::TankQuery;
use tnt_protocol::types::{Amount, AssetFlowLimit, IndexType, TankId, TapId, TimePointSec};

/// Computes the maximum releasable amount for one tap and updates requirement
/// state when a release happens.
pub struct TapRequirementUtility {
    tank_id: TankId,
    tap_index: IndexType,
    /// Budget left from the operation's one-shot allowances, per requirement.
    remaining_limits: BTreeMap<IndexType, AssetFlowLimit>,
    /// Requirements whose consumed requests or tickets were already settled.
    adjusted_states: BTreeSet<IndexType>,
    most_restrictive: Option<IndexType>,
    max_release_run: bool,
}

impl TapRequirementUtility {
    /// The tap id must name its tank explicitly.
    pub fn new(tap: TapId) -> Result<Self, TntError> {
        let tank_id = tap.tank_id.ok_or(TapFlowError::TankIdUnset)?;
        Ok(Self {
            tank_id,
            tap_index: tap.index,
            remaining_limits: BTreeMap::new(),
            adjusted_states: BTreeSet::new(),
            most_restrictive: None,
            max_release_run: false,
        })
    }

    /// The most the tap's requirements allow to be released right now,
    /// bounded by the tank balance. Stops early once the limit hits zero.
    pub fn max_tap_release<D: ChainDatabase + ?Sized>(
        &mut self,
        db: &CowTanks<'_, D>,
        queries: &QueryEvaluator,
        now: TimePointSec,
    ) -> Result<Amount, TntError> {
        let tank = db.tank(self.tank_id)?;
        let tap = tank
            .schematic
            .tap(self.tap_index)
            .ok_or(TapFlowError::TapNotFound {
                tap: TapId::new(self.tank_id, self.tap_index),
            })?;

        let mut tap_limit = AssetFlowLimit::Amount(tank.balance);
        self.most_restrictive = None;

        for (index, requirement) in tap.requirements.iter().enumerate() {
            let index = index as IndexType;
            let requirement_limit =
                self.requirement_limit(db, tank, requirement, index, queries, now)?;
            if requirement_limit < tap_limit {
                tap_limit = requirement_limit;
                self.most_restrictive = Some(index);
            }
            if tap_limit == AssetFlowLimit::Amount(0) {
                break;
            }
        }

        self.max_release_run = true;
        // The limit started at the (bounded) balance and only ever shrank.
        Ok(tap_limit.bounded().unwrap_or(tank.balance))
    }

    /// The requirement that set the current limit, if any bound it below the
    /// tank balance. Only valid after [`max_tap_release`](Self::max_tap_release).
    pub fn most_restrictive_requirement(&self) -> Result<Option<IndexType>, TntError> {
        if !self.max_release_run {
            return Err(StateError::MaxReleaseNotRun.into());
        }
        Ok(self.most_restrictive)
    }

    fn requirement_limit<D: ChainDatabase + ?Sized>(
        &mut self,
        db: &CowTanks<'_, D>,
        tank: &TankObject,
        requirement: &TapRequirement,
        index: IndexType,
        queries: &QueryEvaluator,
        now: TimePointSec,
    ) -> Result<AssetFlowLimit, TntError> {
        let address = AccessoryAddress::requirement(self.tap_index, index);
        let limit = match requirement {
            TapRequirement::ImmediateFlowLimit(req) => AssetFlowLimit::Amount(req.limit),

            TapRequirement::CumulativeFlowLimit(req) => {
                let released = tank
                    .state::<CumulativeFlowState>(address)
                    .map(|state| state.amount_released)
                    .unwrap_or(0);
                AssetFlowLimit::Amount((req.limit - released).max(0))
            }

            TapRequirement::PeriodicFlowLimit(req) => match tank.state::<PeriodicFlowState>(address)
            {
                Some(state) if state.period_num == req.period_num_at(tank.creation_date, now) => {
                    AssetFlowLimit::Amount((req.limit - state.amount_released).max(0))
                }
                _ => AssetFlowLimit::Amount(req.limit),
            },

            TapRequirement::TimeLock(req) => {
                if req.unlocked_at(now) {
                    AssetFlowLimit::Unlimited
                } else {
                    AssetFlowLimit::Amount(0)
                }
            }

            TapRequirement::MinimumTankLevel(req) => {
                AssetFlowLimit::Amount((tank.balance - req.minimum_level).max(0))
            }

            TapRequirement::Documentation(_) => {
                let documented = queries
                    .tank_queries()
                    .any(|query| matches!(query, TankQuery::DocumentationString { .. }));
                if documented {
                    AssetFlowLimit::Unlimited
                } else {
                    AssetFlowLimit::Amount(0)
                }
            }

            TapRequirement::Review(_) => {
                if let Some(limit) = self.remaining_limits.get(&index) {
                    return Ok(*limit);
                }
                let limit = consume_budget(
                    tank.state::<ReviewState>(address).map(|state| &state.pending_requests),
                    queries.target_queries(address).filter_map(|query| match query {
                        TankQuery::ConsumeApprovedRequest { request_id, .. } => Some(*request_id),
                        _ => None,
                    }),
                    |request| request.request_amount,
                )?;
                self.remaining_limits.insert(index, limit);
                limit
            }

            TapRequirement::Delay(_) => {
                if let Some(limit) = self.remaining_limits.get(&index) {
                    return Ok(*limit);
                }
                let limit = consume_budget(
                    tank.state::<DelayState>(address).map(|state| &state.pending_requests),
                    queries.target_queries(address).filter_map(|query| match query {
                        TankQuery::ConsumeMaturedRequest { request_id, .. } => Some(*request_id),
                        _ => None,
                    }),
                    |request| request.request_amount,
                )?;
                self.remaining_limits.insert(index, limit);
                limit
            }

            TapRequirement::HashPreimage(_) => {
                let revealed = queries
                    .target_queries(address)
                    .any(|query| matches!(query, TankQuery::RevealHashPreimage { .. }));
                if revealed {
                    AssetFlowLimit::Unlimited
                } else {
                    AssetFlowLimit::Amount(0)
                }
            }

            TapRequirement::Ticket(_) => {
                if let Some(limit) = self.remaining_limits.get(&index) {
                    return Ok(*limit);
                }
                let limit = queries
                    .target_queries(address)
                    .find_map(|query| match query {
                        TankQuery::RedeemTicket { ticket, .. } => Some(ticket.max_withdrawal),
                        _ => None,
                    })
                    .unwrap_or(AssetFlowLimit::Amount(0));
                self.remaining_limits.insert(index, limit);
                limit
            }

            TapRequirement::Exchange(req) => {
                let meter_tank = match req.meter_id.tank_id {
                    Some(id) => db.tank(id)?,
                    None => tank,
                };
                let meter_address = AccessoryAddress::attachment(req.meter_id.index);
                match meter_tank.state::<MeterState>(meter_address) {
                    None => AssetFlowLimit::Amount(0),
                    Some(meter) => {
                        let released = tank
                            .state::<ExchangeState>(address)
                            .map(|state| state.amount_released)
                            .unwrap_or(0);
                        AssetFlowLimit::Amount(req.max_release_amount(released, meter).max(0))
                    }
                }
            }
        };
        Ok(limit)
    }

    /// Record that `amount` is about to be released through the tap: update
    /// every requirement's state accordingly. Consumed requests are erased
    /// and redeemed ticket numbers settled on the first release of the
    /// operation.
    pub fn prepare_tap_release<D: ChainDatabase + ?Sized>(
        &mut self,
        db: &mut CowTanks<'_, D>,
        queries: &QueryEvaluator,
        now: TimePointSec,
        amount: Amount,
    ) -> Result<(), TntError> {
        let (requirements, creation_date) = {
            let tank = db.tank(self.tank_id)?;
            let tap = tank
                .schematic
                .tap(self.tap_index)
                .ok_or(TapFlowError::TapNotFound {
                    tap: TapId::new(self.tank_id, self.tap_index),
                })?;
            (tap.requirements.clone(), tank.creation_date)
        };

        for (index, requirement) in requirements.iter().enumerate() {
            let index = index as IndexType;
            let address = AccessoryAddress::requirement(self.tap_index, index);
            match requirement {
                TapRequirement::ImmediateFlowLimit(_)
                | TapRequirement::TimeLock(_)
                | TapRequirement::MinimumTankLevel(_)
                | TapRequirement::Documentation(_)
                | TapRequirement::HashPreimage(_) => {}

                TapRequirement::CumulativeFlowLimit(_) => {
                    let tank = db.tank_mut(self.tank_id)?;
                    tank.state_or_default::<CumulativeFlowState>(address).amount_released +=
                        amount;
                }

                TapRequirement::PeriodicFlowLimit(req) => {
                    let period_num = req.period_num_at(creation_date, now);
                    let tank = db.tank_mut(self.tank_id)?;
                    let state = tank.state_or_default::<PeriodicFlowState>(address);
                    if state.period_num != period_num {
                        state.period_num = period_num;
                        state.amount_released = 0;
                    }
                    state.amount_released += amount;
                }

                TapRequirement::Review(_) => {
                    self.adjust_limit(index, amount)?;
                    if self.adjusted_states.insert(index) {
                        let consumed: Vec<IndexType> = queries
                            .target_queries(address)
                            .filter_map(|query| match query {
                                TankQuery::ConsumeApprovedRequest { request_id, .. } => {
                                    Some(*request_id)
                                }
                                _ => None,
                            })
                            .collect();
                        let tank = db.tank_mut(self.tank_id)?;
                        let state = tank.state_or_default::<ReviewState>(address);
                        for request_id in consumed {
                            state.pending_requests.remove(&request_id);
                        }
                    }
                }

                TapRequirement::Delay(_) => {
                    self.adjust_limit(index, amount)?;
                    if self.adjusted_states.insert(index) {
                        let consumed: Vec<IndexType> = queries
                            .target_queries(address)
                            .filter_map(|query| match query {
                                TankQuery::ConsumeMaturedRequest { request_id, .. } => {
                                    Some(*request_id)
                                }
                                _ => None,
                            })
                            .collect();
                        let tank = db.tank_mut(self.tank_id)?;
                        let state = tank.state_or_default::<DelayState>(address);
                        for request_id in consumed {
                            state.pending_requests.remove(&request_id);
                        }
                    }
                }

                TapRequirement::Ticket(_) => {
                    self.adjust_limit(index, amount)?;
                    if self.adjusted_states.insert(index) {
                        let redeemed = queries.target_queries(address).find_map(|query| {
                            match query {
                                TankQuery::RedeemTicket { ticket, .. } => {
                                    Some(ticket.ticket_number)
                                }
                                _ => None,
                            }
                        });
                        if let Some(ticket_number) = redeemed {
                            let tank = db.tank_mut(self.tank_id)?;
                            tank.state_or_default::<TicketState>(address).tickets_consumed =
                                ticket_number + 1;
                        }
                    }
                }

                TapRequirement::Exchange(_) => {
                    let tank = db.tank_mut(self.tank_id)?;
                    tank.state_or_default::<ExchangeState>(address).amount_released += amount;
                }
            }
        }
        Ok(())
    }

    // Draw `amount` from a requirement's remaining one-operation budget.
    fn adjust_limit(&mut self, index: IndexType, amount: Amount) -> Result<(), TntError> {
        if let Some(AssetFlowLimit::Amount(remaining)) = self.remaining_limits.get_mut(&index) {
            if *remaining < amount {
                return Err(StateError::ReleaseExceedsRemaining { amount, requirement: index }
                    .into());
            }
            *remaining -= amount;
        }
        Ok(())
    }
}

/// Total release allowance granted by the consume queries of an operation:
/// the sum of the consumed requests' amounts, unlimited if any is unlimited,
/// zero if there is no state at all.
fn consume_budget<R>(
    pending: Option<&BTreeMap<IndexType, R>>,
    consumed_ids: impl Iterator<Item = IndexType>,
    request_amount: impl Fn(&R) -> AssetFlowLimit,
) -> Result<AssetFlowLimit, TntError> {
    let Some(pending) = pending else {
        return Ok(AssetFlowLimit::Amount(0));
    };
    let mut budget: Amount = 0;
    for request_id in consumed_ids {
        let request = pending
            .get(&request_id)
            .ok_or(QueryError::RequestNotFound { id: request_id })?;
        match request_amount(request) {
            AssetFlowLimit::Unlimited => return Ok(AssetFlowLimit::Unlimited),
            AssetFlowLimit::Amount(amount) => budget += amount,
        }
    }
    Ok(AssetFlowLimit::Amount(budget))
}

// =============================================================================
// TESTS
// =============================================================================
