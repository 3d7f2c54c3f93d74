//! In-memory host database for tests and embedding demos.

use crate::domain::errors::StateError;
use crate::domain::object::TankObject;
use crate::ports::database::{ChainDatabase, TankInit};
use std::collections::{BTreeMap, BTreeSet};
use tnt_protocol::operations::ConnectionFundAccount;
use tnt_protocol::parameters::TntParameters;
use tnt_protocol::types::{AccountId, Amount, AssetAmount, AssetId, TankId, TimePointSec};

/// A [`ChainDatabase`] backed by plain maps.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tanks: BTreeMap<TankId, TankObject>,
    next_tank_id: u64,
    balances: BTreeMap<(AccountId, AssetId), Amount>,
    /// Explicitly unauthorized (account, asset) pairs; everything else is
    /// authorized.
    unauthorized_assets: BTreeSet<(AccountId, AssetId)>,
    time: TimePointSec,
    parameters: TntParameters,
    applied_operations: Vec<ConnectionFundAccount>,
}

impl MemoryDatabase {
    pub fn new(parameters: TntParameters) -> Self {
        Self { parameters, ..Self::default() }
    }

    pub fn set_time(&mut self, time: TimePointSec) {
        self.time = time;
    }

    pub fn advance_time(&mut self, secs: u32) {
        self.time = self.time.saturating_add_secs(secs);
    }

    pub fn credit(&mut self, account: AccountId, asset: AssetId, amount: Amount) {
        *self.balances.entry((account, asset)).or_default() += amount;
    }

    /// Mark an account as unauthorized to transact an asset.
    pub fn forbid_asset(&mut self, account: AccountId, asset: AssetId) {
        self.unauthorized_assets.insert((account, asset));
    }

    pub fn applied_operations(&self) -> &[ConnectionFundAccount] {
        &self.applied_operations
    }

    pub fn parameters_mut(&mut self) -> &mut TntParameters {
        &mut self.parameters
    }
}

impl ChainDatabase for MemoryDatabase {
    fn tank(&self, id: TankId) -> Option<&TankObject> {
        self.tanks.get(&id)
    }

    fn create_tank(&mut self, init: TankInit) -> TankId {
        let id = TankId(self.next_tank_id);
        self.next_tank_id += 1;
        self.tanks.insert(
            id,
            TankObject {
                id,
                schematic: init.schematic,
                balance: 0,
                deposit: init.deposit,
                creation_date: init.creation_date,
                accessory_states: BTreeMap::new(),
            },
        );
        id
    }

    fn modify_tank(
        &mut self,
        id: TankId,
        mutate: &mut dyn FnMut(&mut TankObject),
    ) -> Result<(), StateError> {
        let tank = self
            .tanks
            .get_mut(&id)
            .ok_or(StateError::UnknownTank { tank: id })?;
        mutate(tank);
        Ok(())
    }

    fn remove_tank(&mut self, id: TankId) -> Result<(), StateError> {
        self.tanks
            .remove(&id)
            .map(|_| ())
            .ok_or(StateError::UnknownTank { tank: id })
    }

    fn head_block_time(&self) -> TimePointSec {
        self.time
    }

    fn get_balance(&self, account: AccountId, asset: AssetId) -> Amount {
        self.balances.get(&(account, asset)).copied().unwrap_or(0)
    }

    fn adjust_balance(&mut self, account: AccountId, delta: AssetAmount) {
        *self.balances.entry((account, delta.asset_id)).or_default() += delta.amount;
    }

    fn is_authorized_asset(&self, account: AccountId, asset: AssetId) -> bool {
        !self.unauthorized_assets.contains(&(account, asset))
    }

    fn parameters(&self) -> &TntParameters {
        &self.parameters
    }

    fn push_applied_operation(&mut self, op: ConnectionFundAccount) {
        self.applied_operations.push(op);
    }
}
