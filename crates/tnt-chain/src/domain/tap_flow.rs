//! Orchestration of tap openings, including opener-driven cascades.
//!
//! Pending opens are processed breadth-first from a FIFO queue seeded with
//! the operation's initial tap. Each opening consults the tap's requirement
//! utility for the release limit, drains the tank inside the staging buffer,
//! and hands the released asset to the connection-flow processor, which may
//! schedule further opens. One operation is bounded by `max_taps` openings
//! in total.

use crate::domain::connection_flow::ConnectionFlowProcessor;
use crate::domain::cow::CowTanks;
use crate::domain::errors::{TapFlowError, TntError};
use crate::domain::query_eval::QueryEvaluator;
use crate::domain::requirements::TapRequirementUtility;
use crate::ports::database::ChainDatabase;
use std::collections::{btree_map::Entry, BTreeMap, VecDeque};
use tnt_protocol::operations::ConnectionFundAccount;
use tnt_protocol::types::{
    AccountId, Amount, AssetAmount, AssetFlowLimit, Connection, TapId,
};

/// One completed tap opening.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TapFlow {
    pub amount_released: Amount,
    /// The tap that released the asset, with its tank id set.
    pub source_tap: TapId,
    /// The connections the asset flowed through.
    pub connection_path: Vec<Connection>,
}

/// Everything a tap-flow evaluation produced.
#[derive(Debug, Default)]
pub struct TapFlowOutcome {
    pub flows: Vec<TapFlow>,
    /// Account credits to pay and emit as virtual operations on commit.
    pub account_credits: Vec<ConnectionFundAccount>,
}

/// Open `tap_to_open` for `account`, releasing up to `release_amount`, and
/// process every cascading open it triggers.
pub fn evaluate_tap_flow<D: ChainDatabase + ?Sized>(
    db: &mut CowTanks<'_, D>,
    queries: &QueryEvaluator,
    account: AccountId,
    tap_to_open: TapId,
    release_amount: AssetFlowLimit,
    max_taps: u16,
) -> Result<TapFlowOutcome, TntError> {
    let now = db.db().head_block_time();
    let mut pending: VecDeque<(TapId, AssetFlowLimit)> = VecDeque::new();
    pending.push_back((tap_to_open, release_amount));

    let mut flows: Vec<TapFlow> = Vec::new();
    let mut utilities: BTreeMap<TapId, TapRequirementUtility> = BTreeMap::new();
    let mut processor = ConnectionFlowProcessor::new(true);

    while let Some((tap_id, requested)) = pending.pop_front() {
        let tank_id = tap_id.tank_id.ok_or(TapFlowError::TankIdUnset)?;
        let tap_id = TapId::new(tank_id, tap_id.index);

        let (connection, tank_asset, balance) = {
            let tank = db.tank(tank_id)?;
            let tap = tank
                .schematic
                .tap(tap_id.index)
                .ok_or(TapFlowError::TapNotFound { tap: tap_id })?;
            let connection = tap
                .connected_connection
                .ok_or(TapFlowError::TapNotConnected { tap: tap_id })?;
            (connection, tank.schematic.asset_type, tank.balance)
        };

        // The responsible account must be able to transact the tank's asset.
        if !db.db().is_authorized_asset(account, tank_asset) {
            return Err(TapFlowError::UnauthorizedAsset { account, asset: tank_asset }.into());
        }

        // Fast reject before consulting any requirement.
        if let Some(requested_amount) = requested.bounded() {
            if requested_amount > balance {
                return Err(TapFlowError::InsufficientBalance {
                    requested: requested_amount,
                    balance,
                }
                .into());
            }
        }

        let utility = match utilities.entry(tap_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(TapRequirementUtility::new(tap_id)?),
        };

        let release_limit = utility.max_tap_release(db, queries, now)?;
        let binding = utility.most_restrictive_requirement()?;
        if release_limit == 0 {
            return Err(match binding {
                Some(requirement) => TapFlowError::TapLocked { requirement },
                None => TapFlowError::TankEmpty,
            }
            .into());
        }

        let release = match requested.bounded() {
            Some(requested_amount) => {
                if requested_amount > release_limit {
                    return Err(match binding {
                        Some(requirement) => TapFlowError::ExceedsReleaseLimit {
                            requested: requested_amount,
                            limit: release_limit,
                            requirement,
                        },
                        None => TapFlowError::InsufficientBalance {
                            requested: requested_amount,
                            balance: release_limit,
                        },
                    }
                    .into());
                }
                requested_amount
            }
            None => release_limit,
        };

        utility.prepare_tap_release(db, queries, now, release)?;
        db.tank_mut(tank_id)?.balance -= release;

        let path = processor.release_to_connection(
            db,
            Connection::Tank(tank_id),
            connection,
            AssetAmount::new(tank_asset, release),
        )?;

        for scheduled in processor.drain_pending_opens() {
            // The current flow is about to be recorded; count it too.
            if pending.len() + flows.len() + 1 >= usize::from(max_taps) {
                return Err(TapFlowError::CascadeLimitExceeded { max: max_taps }.into());
            }
            pending.push_back(scheduled);
        }

        tracing::debug!(tap = %tap_id, amount = release, "tap opened");
        flows.push(TapFlow {
            amount_released: release,
            source_tap: tap_id,
            connection_path: path,
        });
    }

    Ok(TapFlowOutcome {
        flows,
        account_credits: processor.into_credits(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
