//! Releasing an amount of asset into a connection.
//!
//! The processor walks a connection chain inside the staging buffer, runs
//! every intermediate attachment it passes (metering, opener triggers), and
//! deposits at the terminal: a tank's balance or an account credit. Opener
//! triggers and account credits are accumulated as effects for the caller:
//! the tap-flow evaluator enqueues the former and the operation evaluator
//! emits the latter as virtual operations on commit.

use crate::domain::cow::CowTanks;
use crate::domain::errors::{TapFlowError, TntError};
use crate::ports::database::ChainDatabase;
use tnt_protocol::accessories::{MeterState, TankAttachment};
use tnt_protocol::address::AccessoryAddress;
use tnt_protocol::errors::{ConnectionError, LookupError, ObjectRef};
use tnt_protocol::operations::ConnectionFundAccount;
use tnt_protocol::types::{
    AssetAmount, AssetFlowLimit, AuthorizedConnections, Connection, RemoteConnection, TankId,
    TapId,
};

/// Processes releases into connections, accumulating cascade and credit
/// effects.
pub struct ConnectionFlowProcessor {
    /// Whether tap openers along the way may schedule cascading opens.
    allow_cascading: bool,
    pending_opens: Vec<(TapId, AssetFlowLimit)>,
    credits: Vec<ConnectionFundAccount>,
}

impl ConnectionFlowProcessor {
    pub fn new(allow_cascading: bool) -> Self {
        Self {
            allow_cascading,
            pending_opens: Vec::new(),
            credits: Vec::new(),
        }
    }

    /// Release `amount` from `origin` into `connection`, following attachment
    /// outputs until the asset comes to rest. Returns the path traversed:
    /// the starting connection through the terminal, with attachment hops
    /// carrying the tank they resolved against.
    pub fn release_to_connection<D: ChainDatabase + ?Sized>(
        &mut self,
        db: &mut CowTanks<'_, D>,
        origin: Connection,
        connection: Connection,
        amount: AssetAmount,
    ) -> Result<Vec<Connection>, TntError> {
        if origin == Connection::SameTank {
            return Err(TapFlowError::OriginIsSameTank.into());
        }
        let max_chain_length = usize::from(db.db().parameters().max_connection_chain_length);

        let mut current_tank: Option<TankId> = match origin {
            Connection::Tank(id) => Some(id),
            _ => None,
        };
        let mut path: Vec<Connection> = Vec::new();
        let mut connection = connection;

        while let Connection::Attachment(mut attachment_id) = connection {
            if path.len() >= max_chain_length {
                return Err(ConnectionError::ExceededMaxChainLength.into());
            }

            if attachment_id.tank_id.is_some() {
                current_tank = attachment_id.tank_id;
            } else if let Some(tank_id) = current_tank {
                attachment_id.tank_id = Some(tank_id);
            } else {
                return Err(TapFlowError::NoCurrentTankContext.into());
            }
            let tank_id = attachment_id.tank_id.expect("context was just resolved");

            let source = path.last().copied().unwrap_or(origin);
            let tank = db.tank_mut(tank_id)?;
            let attachment =
                tank.schematic.attachment(attachment_id.index).cloned().ok_or_else(|| {
                    LookupError::NonexistentObject(ObjectRef::Attachment(attachment_id))
                })?;

            tracing::trace!(
                tank = %tank_id,
                attachment = attachment_id.index,
                kind = attachment.kind_name(),
                "connection flow hop"
            );

            let next = match &attachment {
                TankAttachment::FlowMeter(meter) => {
                    check_source_restriction(&meter.remote_sources, &source, tank_id)?;
                    if meter.asset_type != amount.asset_id {
                        return Err(TapFlowError::WrongAssetForAttachment {
                            connection: Connection::Attachment(attachment_id),
                        }
                        .into());
                    }
                    let address = AccessoryAddress::attachment(attachment_id.index);
                    tank.state_or_default::<MeterState>(address).metered_amount += amount.amount;
                    meter.destination
                }
                TankAttachment::TapOpener(opener) => {
                    check_source_restriction(&opener.remote_sources, &source, tank_id)?;
                    if opener.asset_type != amount.asset_id {
                        return Err(TapFlowError::WrongAssetForAttachment {
                            connection: Connection::Attachment(attachment_id),
                        }
                        .into());
                    }
                    if !self.allow_cascading {
                        return Err(TapFlowError::CascadeNotPermitted.into());
                    }
                    self.pending_opens
                        .push((TapId::new(tank_id, opener.tap_index), opener.release_amount));
                    opener.destination
                }
                TankAttachment::ConnectAuthority(_) => {
                    return Err(TapFlowError::CannotReceiveAsset {
                        connection: Connection::Attachment(attachment_id),
                    }
                    .into());
                }
            };

            path.push(Connection::Attachment(attachment_id));
            connection = next;
        }

        // Resolve an implicit terminal against the carried tank context.
        if connection == Connection::SameTank {
            let tank_id = current_tank.ok_or(TapFlowError::NoCurrentTankContext)?;
            connection = Connection::Tank(tank_id);
        }

        let penultimate = path.last().copied().unwrap_or(origin);
        match connection {
            Connection::Tank(destination) => {
                let tank = db.tank_mut(destination)?;
                if tank.schematic.asset_type != amount.asset_id {
                    return Err(TapFlowError::WrongAssetForTank { tank: destination }.into());
                }
                check_source_restriction(&tank.schematic.remote_sources, &penultimate, destination)?;
                tank.balance += amount.amount;
            }
            Connection::Account(account) => {
                if !db.db().is_authorized_asset(account, amount.asset_id) {
                    return Err(TapFlowError::UnauthorizedAsset {
                        account,
                        asset: amount.asset_id,
                    }
                    .into());
                }
                let mut asset_path = Vec::with_capacity(path.len() + 2);
                asset_path.push(origin);
                asset_path.extend(path.iter().copied());
                asset_path.push(connection);
                self.credits.push(ConnectionFundAccount {
                    receiving_account: account,
                    amount_received: amount,
                    asset_path,
                });
            }
            // The loop only exits on terminal connections, and SameTank was
            // resolved above.
            Connection::SameTank | Connection::Attachment(_) => {
                return Err(TapFlowError::NoCurrentTankContext.into());
            }
        }

        path.push(connection);
        Ok(path)
    }

    /// Take the cascading opens scheduled since the last drain.
    pub fn drain_pending_opens(&mut self) -> Vec<(TapId, AssetFlowLimit)> {
        std::mem::take(&mut self.pending_opens)
    }

    /// The account credits accumulated across all releases.
    pub fn into_credits(self) -> Vec<ConnectionFundAccount> {
        self.credits
    }
}

/// Deposits from the destination's own tank are implicit; all other sources
/// must be authorized when the destination restricts them.
fn check_source_restriction(
    allowed: &AuthorizedConnections,
    source: &Connection,
    destination_tank: TankId,
) -> Result<(), TntError> {
    let AuthorizedConnections::Sources(authorized) = allowed else {
        return Ok(());
    };
    let remote = RemoteConnection::try_from(*source)
        .map_err(|_| TapFlowError::SourceNotAuthorized { remote_source: *source })?;
    if remote.connection_tank() == Some(destination_tank) {
        return Ok(());
    }
    if !authorized.contains(&remote) {
        return Err(TapFlowError::SourceNotAuthorized { remote_source: *source }.into());
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
