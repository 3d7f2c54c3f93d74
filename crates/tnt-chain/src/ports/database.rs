//! The host database contract.
//!
//! The core is embeddable: the host chain supplies object storage, account
//! balances, the block clock, the asset authorization predicate, and the TNT
//! parameters through this trait. The core is single-threaded within one
//! operation evaluation, so the contract is synchronous; the host provides
//! serialization across operations.

use crate::domain::errors::StateError;
use crate::domain::object::TankObject;
use tnt_protocol::operations::ConnectionFundAccount;
use tnt_protocol::parameters::TntParameters;
use tnt_protocol::schematic::TankSchematic;
use tnt_protocol::types::{AccountId, Amount, AssetAmount, AssetId, TankId, TimePointSec};

/// Fields the core supplies when creating a tank; the host assigns the id
/// and initializes the balance to zero.
#[derive(Clone, Debug)]
pub struct TankInit {
    pub schematic: TankSchematic,
    pub deposit: Amount,
    pub creation_date: TimePointSec,
}

/// Everything the core needs from the host chain.
pub trait ChainDatabase {
    fn tank(&self, id: TankId) -> Option<&TankObject>;

    fn create_tank(&mut self, init: TankInit) -> TankId;

    /// Apply a mutator to a stored tank atomically.
    fn modify_tank(
        &mut self,
        id: TankId,
        mutate: &mut dyn FnMut(&mut TankObject),
    ) -> Result<(), StateError>;

    fn remove_tank(&mut self, id: TankId) -> Result<(), StateError>;

    fn head_block_time(&self) -> TimePointSec;

    fn get_balance(&self, account: AccountId, asset: AssetId) -> Amount;

    fn adjust_balance(&mut self, account: AccountId, delta: AssetAmount);

    /// Whether `account` may transact and hold `asset`.
    fn is_authorized_asset(&self, account: AccountId, asset: AssetId) -> bool;

    fn parameters(&self) -> &TntParameters;

    /// Record a virtual operation produced during evaluation.
    fn push_applied_operation(&mut self, op: ConnectionFundAccount);

    /// Tank lookup returning an error for missing tanks.
    fn get_tank(&self, id: TankId) -> Result<&TankObject, StateError> {
        self.tank(id).ok_or(StateError::UnknownTank { tank: id })
    }
}

/// Adapter presenting a [`ChainDatabase`] as the protocol layer's
/// [`TankLookup`](tnt_protocol::lookups::TankLookup).
pub struct DbLookup<'a, D: ?Sized>(pub &'a D);

impl<D: ChainDatabase + ?Sized> tnt_protocol::lookups::TankLookup for DbLookup<'_, D> {
    fn tank_schematic(&self, id: TankId) -> Option<&TankSchematic> {
        self.0.tank(id).map(|tank| &tank.schematic)
    }
}
