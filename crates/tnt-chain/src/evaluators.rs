//! Operation evaluators: one entry point per operation kind.
//!
//! Each evaluator validates the operation statelessly, performs its stateful
//! checks against the database, runs any speculative work inside a
//! copy-on-write buffer, and only then mutates the database. A failure at
//! any point leaves the database untouched.

use crate::domain::connection_flow::ConnectionFlowProcessor;
use crate::domain::cow::CowTanks;
use crate::domain::errors::{StateError, TapFlowError, TntError};
use crate::domain::query_eval::QueryEvaluator;
use crate::domain::tap_flow::{evaluate_tap_flow, TapFlow};
use crate::ports::database::{ChainDatabase, DbLookup, TankInit};
use std::collections::BTreeSet;
use tnt_protocol::authority::Authority;
use tnt_protocol::errors::AuthorityError;
use tnt_protocol::operations::{
    AccountFundConnection, TankCreate, TankDelete, TankQueryOp, TankUpdate, TapConnect, TapOpen,
};
use tnt_protocol::schematic::{TankSchematic, EMERGENCY_TAP};
use tnt_protocol::types::{AssetAmount, Connection, TankId, CORE_ASSET};
use tnt_protocol::validation::TankValidator;

// =============================================================================
// DECLARED-AUTHORITY TRACKING
// =============================================================================

/// Tracks which of an operation's declared authorities the queries actually
/// required. Success demands every requirement was declared and every
/// declaration used.
struct DeclaredAuthorities<'a> {
    declared: &'a [Authority],
    used: BTreeSet<usize>,
}

impl<'a> DeclaredAuthorities<'a> {
    fn new(declared: &'a [Authority]) -> Self {
        Self { declared, used: BTreeSet::new() }
    }

    fn require(&mut self, authority: &Authority) -> Result<(), TntError> {
        let position = self
            .declared
            .iter()
            .position(|declared| declared == authority)
            .ok_or(AuthorityError::NotDeclared)?;
        self.used.insert(position);
        Ok(())
    }

    fn require_all(
        &mut self,
        authorities: impl IntoIterator<Item = Authority>,
    ) -> Result<(), TntError> {
        for authority in authorities {
            self.require(&authority)?;
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), TntError> {
        let unused = self.declared.len() - self.used.len();
        if unused > 0 {
            return Err(AuthorityError::Unused { count: unused }.into());
        }
        Ok(())
    }
}

/// The emergency tap's open authority doubles as the tank's admin authority
/// for updates and deletion.
fn admin_authority(tank: &crate::domain::object::TankObject) -> Result<&Authority, TntError> {
    tank.schematic
        .tap(EMERGENCY_TAP)
        .and_then(|tap| tap.open_authority.as_ref())
        .ok_or_else(|| {
            AuthorityError::Unset { context: "emergency tap open authority".into() }.into()
        })
}

// =============================================================================
// TANK LIFECYCLE
// =============================================================================

/// Validate and create a tank, debiting the payer's deposit. Returns the new
/// tank's id.
pub fn evaluate_tank_create<D: ChainDatabase>(
    db: &mut D,
    op: &TankCreate,
) -> Result<TankId, TntError> {
    op.validate()?;
    let parameters = db.parameters().clone();

    if db.get_balance(op.payer, CORE_ASSET) < op.deposit_amount {
        return Err(StateError::InsufficientDepositBalance.into());
    }

    let schematic = TankSchematic::from_create_operation(op);
    {
        let lookup = DbLookup(&*db);
        let mut validator = TankValidator::with_lookup(
            &schematic,
            usize::from(parameters.max_connection_chain_length),
            &lookup,
        );
        validator.validate_tank()?;
        let deposit = validator.calculate_deposit(&parameters)?;
        if deposit != op.deposit_amount {
            return Err(StateError::DepositMismatch {
                expected: deposit,
                declared: op.deposit_amount,
            }
            .into());
        }
    }

    db.adjust_balance(op.payer, AssetAmount::new(CORE_ASSET, -op.deposit_amount));
    let creation_date = db.head_block_time();
    let id = db.create_tank(TankInit {
        schematic,
        deposit: op.deposit_amount,
        creation_date,
    });
    tracing::debug!(tank = %id, payer = %op.payer, "tank created");
    Ok(id)
}

/// Validate and apply a tank restructuring, settling the deposit delta and
/// clearing state of removed and replaced accessories.
pub fn evaluate_tank_update<D: ChainDatabase>(db: &mut D, op: &TankUpdate) -> Result<(), TntError> {
    op.validate()?;
    let parameters = db.parameters().clone();

    let (old_deposit, mut schematic) = {
        let tank = db.get_tank(op.tank_to_update)?;
        if op.update_authority != *admin_authority(tank)? {
            return Err(AuthorityError::Mismatch { context: "update authority".into() }.into());
        }
        (tank.deposit, tank.schematic.clone())
    };
    schematic.update_from_operation(op);

    let new_deposit = {
        let lookup = DbLookup(&*db);
        let mut validator = TankValidator::with_lookup(
            &schematic,
            usize::from(parameters.max_connection_chain_length),
            &lookup,
        )
        .for_tank(op.tank_to_update);
        validator.validate_tank()?;
        validator.calculate_deposit(&parameters)?
    };

    let expected_delta = new_deposit - old_deposit;
    if expected_delta != op.deposit_delta {
        return Err(StateError::DepositDeltaMismatch {
            expected: expected_delta,
            declared: op.deposit_delta,
        }
        .into());
    }
    if op.deposit_delta > 0 && db.get_balance(op.payer, CORE_ASSET) < op.deposit_delta {
        return Err(StateError::InsufficientDepositBalance.into());
    }

    db.adjust_balance(op.payer, AssetAmount::new(CORE_ASSET, -op.deposit_delta));
    db.modify_tank(op.tank_to_update, &mut |tank| {
        tank.schematic = schematic.clone();
        tank.deposit += op.deposit_delta;

        for index in &op.attachments_to_remove {
            tank.clear_attachment_state(*index);
        }
        for index in op.attachments_to_replace.keys() {
            tank.clear_attachment_state(*index);
        }
        for index in &op.taps_to_remove {
            tank.clear_tap_state(*index);
        }
        for index in op.taps_to_replace.keys() {
            tank.clear_tap_state(*index);
        }
    })?;
    tracing::debug!(tank = %op.tank_to_update, delta = op.deposit_delta, "tank updated");
    Ok(())
}

/// Destroy an empty tank and refund its deposit to the payer.
pub fn evaluate_tank_delete<D: ChainDatabase>(db: &mut D, op: &TankDelete) -> Result<(), TntError> {
    op.validate()?;
    {
        let tank = db.get_tank(op.tank_to_delete)?;
        if op.delete_authority != *admin_authority(tank)? {
            return Err(AuthorityError::Mismatch { context: "delete authority".into() }.into());
        }
        if tank.balance != 0 {
            return Err(StateError::TankNotEmpty.into());
        }
        if op.deposit_claimed != tank.deposit {
            return Err(StateError::DepositClaimMismatch {
                claimed: op.deposit_claimed,
                deposit: tank.deposit,
            }
            .into());
        }
    }

    db.adjust_balance(op.payer, AssetAmount::new(CORE_ASSET, op.deposit_claimed));
    db.remove_tank(op.tank_to_delete)?;
    tracing::debug!(tank = %op.tank_to_delete, "tank deleted");
    Ok(())
}

// =============================================================================
// QUERIES AND TAP FLOWS
// =============================================================================

/// Evaluate and apply a standalone query operation.
pub fn evaluate_tank_query<D: ChainDatabase>(
    db: &mut D,
    op: &TankQueryOp,
) -> Result<(), TntError> {
    op.validate()?;
    let tank = db.get_tank(op.tank_to_query)?.clone();

    let mut evaluator = QueryEvaluator::new();
    evaluator.set_query_tank(&tank)?;
    let mut declared = DeclaredAuthorities::new(&op.required_authorities);
    for query in &op.queries {
        let required = evaluator.evaluate_query(query, &*db)?;
        declared.require_all(required)?;
    }
    declared.finish()?;

    let now = db.head_block_time();
    let mut apply_result = Ok(());
    db.modify_tank(op.tank_to_query, &mut |tank| {
        apply_result = evaluator.apply_queries(tank, now);
    })?;
    apply_result?;
    tracing::debug!(tank = %op.tank_to_query, queries = op.queries.len(), "tank queried");
    Ok(())
}

/// Evaluate a tap-open operation: apply its queries, run the tap flow, and
/// commit the results. Returns the completed flows.
pub fn evaluate_tap_open<D: ChainDatabase>(
    db: &mut D,
    op: &TapOpen,
) -> Result<Vec<TapFlow>, TntError> {
    op.validate()?;
    let parameters = db.parameters().clone();
    let tank_id = op.tap_to_open.tank_id.ok_or(TapFlowError::TankIdUnset)?;
    let tank = db.get_tank(tank_id)?.clone();
    let tap = tank
        .schematic
        .tap(op.tap_to_open.index)
        .ok_or(TapFlowError::TapNotFound { tap: op.tap_to_open })?
        .clone();

    let mut delete_tank = false;
    if let Some(claimed) = op.deposit_claimed {
        if claimed != tank.deposit {
            return Err(StateError::DepositClaimMismatch { claimed, deposit: tank.deposit }.into());
        }
        if !tap.destructor_tap {
            return Err(StateError::NotADestructorTap.into());
        }
        delete_tank = true;

        // Fast path: destroying an already-empty tank skips queries and
        // flows entirely.
        if tank.balance == 0 {
            if !op.queries.is_empty() {
                return Err(StateError::QueriesOnEmptyDestroy.into());
            }
            if op.tap_open_count != 1 {
                return Err(StateError::BadEmptyDestroyCount.into());
            }
            let authorities_ok = match &tap.open_authority {
                Some(authority) => op.required_authorities == [authority.clone()],
                None => op.required_authorities.is_empty(),
            };
            if !authorities_ok {
                return Err(StateError::BadEmptyDestroyAuthorities.into());
            }
            if op.release_amount.bounded().is_some_and(|amount| amount != 0) {
                return Err(StateError::BadEmptyDestroyAmount.into());
            }

            db.remove_tank(tank_id)?;
            db.adjust_balance(op.payer, AssetAmount::new(CORE_ASSET, claimed));
            tracing::debug!(tank = %tank_id, "empty tank destroyed");
            return Ok(Vec::new());
        }
    }

    if op.tap_open_count > parameters.max_taps_to_open {
        return Err(TapFlowError::CascadeLimitExceeded { max: parameters.max_taps_to_open }
            .into());
    }

    let mut declared = DeclaredAuthorities::new(&op.required_authorities);
    if tap.connected_connection.is_none() {
        return Err(TapFlowError::TapNotConnected { tap: op.tap_to_open }.into());
    }
    if let Some(authority) = &tap.open_authority {
        declared.require(authority)?;
    }

    let mut evaluator = QueryEvaluator::new();
    evaluator.set_query_tank(&tank)?;
    for query in &op.queries {
        let required = evaluator.evaluate_query(query, &*db)?;
        declared.require_all(required)?;
    }

    let now = db.head_block_time();
    let (outcome, writes) = {
        let mut cow = CowTanks::new(&*db);
        evaluator.apply_queries(cow.tank_mut(tank_id)?, now)?;

        let outcome = evaluate_tap_flow(
            &mut cow,
            &evaluator,
            op.payer,
            op.tap_to_open,
            op.release_amount,
            op.tap_open_count,
        )?;

        if outcome.flows.len() != usize::from(op.tap_open_count) {
            return Err(StateError::TapOpenCountMismatch {
                declared: op.tap_open_count,
                actual: outcome.flows.len(),
            }
            .into());
        }
        declared.finish()?;
        if delete_tank && cow.tank(tank_id)?.balance != 0 {
            return Err(StateError::TankNotEmptied.into());
        }
        (outcome, cow.into_writes())
    };

    writes.commit(db)?;
    for credit in &outcome.account_credits {
        db.adjust_balance(credit.receiving_account, credit.amount_received);
        db.push_applied_operation(credit.clone());
    }
    if delete_tank {
        db.remove_tank(tank_id)?;
        if let Some(claimed) = op.deposit_claimed {
            db.adjust_balance(op.payer, AssetAmount::new(CORE_ASSET, claimed));
        }
    }
    tracing::debug!(tank = %tank_id, flows = outcome.flows.len(), "tap open committed");
    Ok(outcome.flows)
}

/// Reconnect a tap under its connect authority.
pub fn evaluate_tap_connect<D: ChainDatabase>(db: &mut D, op: &TapConnect) -> Result<(), TntError> {
    op.validate()?;
    let tank_id = op.tap_to_connect.tank_id.ok_or(TapFlowError::TankIdUnset)?;
    {
        let tank = db.get_tank(tank_id)?;
        let tap = tank
            .schematic
            .tap(op.tap_to_connect.index)
            .ok_or(TapFlowError::TapNotFound { tap: op.tap_to_connect })?;
        let connect_authority = tap.connect_authority.as_ref().ok_or_else(|| {
            TntError::from(AuthorityError::Unset { context: "tap connect authority".into() })
        })?;
        if op.connect_authority != *connect_authority {
            return Err(AuthorityError::Mismatch { context: "connect authority".into() }.into());
        }
    }

    db.modify_tank(tank_id, &mut |tank| {
        if let Some(tap) = tank.schematic.taps.get_mut(&op.tap_to_connect.index) {
            tap.connected_connection = op.new_connection;
            if op.clear_connect_authority {
                tap.connect_authority = None;
            }
        }
    })?;
    tracing::debug!(tap = %op.tap_to_connect, "tap reconnected");
    Ok(())
}

/// Deposit asset from an account into a connection. Cascading tap opens are
/// not permitted in this operation.
pub fn evaluate_account_fund_connection<D: ChainDatabase>(
    db: &mut D,
    op: &AccountFundConnection,
) -> Result<(), TntError> {
    op.validate()?;
    if db.get_balance(op.funding_account, op.funding_amount.asset_id) < op.funding_amount.amount {
        return Err(StateError::InsufficientFundingBalance.into());
    }

    let (writes, credits) = {
        let mut cow = CowTanks::new(&*db);
        let mut processor = ConnectionFlowProcessor::new(false);
        processor.release_to_connection(
            &mut cow,
            Connection::Account(op.funding_account),
            op.funding_destination,
            op.funding_amount,
        )?;
        (cow.into_writes(), processor.into_credits())
    };

    writes.commit(db)?;
    db.adjust_balance(
        op.funding_account,
        AssetAmount::new(op.funding_amount.asset_id, -op.funding_amount.amount),
    );
    for credit in credits {
        db.adjust_balance(credit.receiving_account, credit.amount_received);
        db.push_applied_operation(credit);
    }
    tracing::debug!(
        account = %op.funding_account,
        destination = %op.funding_destination,
        amount = op.funding_amount.amount,
        "connection funded"
    );
    Ok(())
}

// =============================================================================
// OPERATION-AUTHORING HELPER
// =============================================================================

/// Fill in the `tap_open_count` and `required_authorities` fields of a
/// `tap_open` operation by dry-running its queries and tap flow against a
/// read-only view of the database.
pub fn prepare_tap_open_fields<D: ChainDatabase>(
    db: &D,
    op: &mut TapOpen,
) -> Result<(), TntError> {
    let tank_id = op.tap_to_open.tank_id.ok_or(TapFlowError::TankIdUnset)?;
    let tank = db.get_tank(tank_id)?.clone();
    let tap = tank
        .schematic
        .tap(op.tap_to_open.index)
        .ok_or(TapFlowError::TapNotFound { tap: op.tap_to_open })?;
    op.required_authorities.clear();

    // Destroying an empty tank requires only the tap's own authority.
    if op.deposit_claimed.is_some() && tank.balance == 0 {
        if !op.queries.is_empty() {
            return Err(StateError::QueriesOnEmptyDestroy.into());
        }
        op.tap_open_count = 1;
        if let Some(authority) = &tap.open_authority {
            op.required_authorities.push(authority.clone());
        }
        return Ok(());
    }

    let mut authorities: Vec<Authority> = Vec::new();
    let mut add_authority = |authorities: &mut Vec<Authority>, authority: Authority| {
        if !authorities.contains(&authority) {
            authorities.push(authority);
        }
    };

    if let Some(authority) = &tap.open_authority {
        add_authority(&mut authorities, authority.clone());
    }

    let mut evaluator = QueryEvaluator::new();
    evaluator.set_query_tank(&tank)?;
    for query in &op.queries {
        for authority in evaluator.evaluate_query(query, db)? {
            add_authority(&mut authorities, authority);
        }
    }
    op.required_authorities = authorities;

    let mut cow = CowTanks::new(db);
    let outcome = evaluate_tap_flow(
        &mut cow,
        &evaluator,
        op.payer,
        op.tap_to_open,
        op.release_amount,
        db.parameters().max_taps_to_open,
    )?;
    op.tap_open_count = outcome.flows.len() as u16;
    Ok(())
}
