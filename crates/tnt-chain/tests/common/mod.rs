//! Shared fixtures for the operation-level test suites.
#![allow(dead_code)]

use tnt_chain::ports::database::ChainDatabase;
use tnt_chain::MemoryDatabase;
use tnt_protocol::accessories::{TankAttachment, Ticket};
use tnt_protocol::authority::{Authority, PublicKey, Signature};
use tnt_protocol::operations::TankCreate;
use tnt_protocol::schematic::{Tap, TankSchematic};
use tnt_protocol::types::{
    AccountId, Amount, AssetId, AuthorizedConnections, Connection, TankId, TimePointSec,
    CORE_ASSET,
};
use tnt_protocol::validation::TankValidator;

pub const FUNDER: AccountId = AccountId(1);
pub const RECIPIENT: AccountId = AccountId(2);
pub const REVIEWER: AccountId = AccountId(3);
pub const ASSET: AssetId = AssetId(7);

pub fn auth(account: AccountId) -> Authority {
    Authority::account(account)
}

/// An emergency tap owned by `FUNDER`, releasing back to the funder.
pub fn emergency_tap() -> Tap {
    Tap {
        connected_connection: Some(Connection::Account(FUNDER)),
        open_authority: Some(auth(FUNDER)),
        connect_authority: Some(auth(FUNDER)),
        requirements: vec![],
        destructor_tap: true,
    }
}

pub fn fresh_db() -> MemoryDatabase {
    let mut db = MemoryDatabase::default();
    db.set_time(TimePointSec(1_000));
    // Plenty of core asset for deposits and plenty of ASSET to fund tanks.
    db.credit(FUNDER, CORE_ASSET, 10_000_000);
    db.credit(FUNDER, ASSET, 1_000_000);
    db
}

/// Build a create operation for a tank of `ASSET` with the given taps (the
/// emergency tap is prepended) and attachments, with the deposit filled in.
pub fn create_op(taps: Vec<Tap>, attachments: Vec<TankAttachment>) -> TankCreate {
    create_op_for_asset(ASSET, taps, attachments)
}

pub fn create_op_for_asset(
    asset: AssetId,
    taps: Vec<Tap>,
    attachments: Vec<TankAttachment>,
) -> TankCreate {
    let mut op = TankCreate {
        payer: FUNDER,
        deposit_amount: 0,
        contained_asset: asset,
        taps: [vec![emergency_tap()], taps].concat(),
        attachments,
        authorized_sources: AuthorizedConnections::All,
    };
    let schematic = TankSchematic::from_create_operation(&op);
    op.deposit_amount =
        TankValidator::deposit_for(&schematic, &tnt_protocol::TntParameters::default())
            .expect("fixture schematic must validate");
    op
}

/// Create the tank and fund it with `balance` of its asset from `FUNDER`.
pub fn create_funded_tank(
    db: &mut MemoryDatabase,
    op: &TankCreate,
    balance: Amount,
) -> TankId {
    let id = tnt_chain::evaluate_tank_create(db, op).expect("fixture tank must create");
    if balance > 0 {
        let fund = tnt_protocol::operations::AccountFundConnection {
            funding_account: FUNDER,
            funding_destination: Connection::Tank(id),
            funding_amount: tnt_protocol::types::AssetAmount::new(op.contained_asset, balance),
        };
        tnt_chain::evaluate_account_fund_connection(db, &fund).expect("fixture funding must pass");
    }
    id
}

pub fn balance_of(db: &MemoryDatabase, account: AccountId, asset: AssetId) -> Amount {
    db.get_balance(account, asset)
}

/// A secp256k1 keypair for ticket tests: the signer's public key and a
/// closure-friendly signing function.
pub struct TicketSigner {
    signing_key: k256::ecdsa::SigningKey,
    pub public_key: PublicKey,
}

impl TicketSigner {
    pub fn random() -> Self {
        let signing_key = k256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let point = signing_key.verifying_key().to_encoded_point(true);
        let mut compressed = [0u8; 33];
        compressed.copy_from_slice(point.as_bytes());
        Self { signing_key, public_key: PublicKey(compressed) }
    }

    pub fn sign(&self, ticket: &Ticket) -> Signature {
        let (sig, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&ticket.digest())
            .expect("signing cannot fail on a 32-byte digest");
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Signature { r, s, v: recovery_id.to_byte() }
    }
}
