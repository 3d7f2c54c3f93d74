//! Resolution of tanks, attachments, and connection chains.
//!
//! All cross-tank references are opaque ids resolved through a [`TankLookup`]
//! implementation supplied by the caller. Without one, same-tank references
//! still resolve, and cross-tank references fail with
//! [`LookupError::NeedLookupFunction`]; the validator treats that outcome as
//! "skip the check" rather than a failure.

use crate::accessories::TankAttachment;
use crate::errors::{ConnectionError, LookupError, ObjectRef, ProtocolError};
use crate::schematic::TankSchematic;
use crate::types::{AssetId, AttachmentId, Connection, TankId};

/// Callback contract for resolving a tank schematic by id.
pub trait TankLookup {
    fn tank_schematic(&self, id: TankId) -> Option<&TankSchematic>;
}

/// What asset a connection can receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionAsset {
    /// The connection receives exactly this asset.
    Asset(AssetId),
    /// The connection is an account, which can receive any asset.
    Any,
    /// The connection is an attachment that cannot receive asset.
    NoAsset(AttachmentId),
}

/// A resolved chain of connections, ending at the first terminal connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionChain {
    /// Every connection traversed, starting connection first, terminal last.
    /// Attachment entries carry the tank id they resolved against.
    pub connections: Vec<Connection>,
    /// The "current tank" context of the final connection; `None` iff the
    /// chain never reached a remote tank.
    pub final_connection_tank: Option<TankId>,
}

/// Information-retrieval utilities over a tank and its neighborhood.
pub struct Lookups<'a> {
    current_tank: &'a TankSchematic,
    get_tank: Option<&'a dyn TankLookup>,
}

impl<'a> Lookups<'a> {
    /// Utilities without cross-tank resolution; remote references yield
    /// [`LookupError::NeedLookupFunction`].
    pub fn new(current_tank: &'a TankSchematic) -> Self {
        Self { current_tank, get_tank: None }
    }

    pub fn with_lookup(current_tank: &'a TankSchematic, get_tank: &'a dyn TankLookup) -> Self {
        Self { current_tank, get_tank: Some(get_tank) }
    }

    pub fn current_tank(&self) -> &'a TankSchematic {
        self.current_tank
    }

    /// Resolve a tank, returning the current tank when `id` is unset.
    pub fn lookup_tank(&self, id: Option<TankId>) -> Result<&'a TankSchematic, LookupError> {
        match id {
            None => Ok(self.current_tank),
            Some(tank_id) => {
                let get_tank = self.get_tank.ok_or(LookupError::NeedLookupFunction)?;
                get_tank
                    .tank_schematic(tank_id)
                    .ok_or(LookupError::NonexistentObject(ObjectRef::Tank(tank_id)))
            }
        }
    }

    pub fn lookup_attachment(&self, id: AttachmentId) -> Result<&'a TankAttachment, LookupError> {
        let tank = self.lookup_tank(id.tank_id)?;
        tank.attachments
            .get(&id.index)
            .ok_or(LookupError::NonexistentObject(ObjectRef::Attachment(id)))
    }

    /// The asset an attachment receives; `None` if it cannot receive asset.
    pub fn attachment_asset(&self, id: AttachmentId) -> Result<Option<AssetId>, LookupError> {
        Ok(self.lookup_attachment(id)?.receives_asset())
    }

    /// The connection an attachment releases received asset to; `None` if it
    /// cannot receive asset.
    pub fn attachment_output(&self, id: AttachmentId) -> Result<Option<&'a Connection>, LookupError> {
        Ok(self.lookup_attachment(id)?.output_connection())
    }

    /// What asset a connection can receive.
    pub fn connection_asset(&self, connection: &Connection) -> Result<ConnectionAsset, LookupError> {
        match connection {
            Connection::SameTank => Ok(ConnectionAsset::Asset(self.current_tank.asset_type)),
            Connection::Account(_) => Ok(ConnectionAsset::Any),
            Connection::Tank(id) => {
                Ok(ConnectionAsset::Asset(self.lookup_tank(Some(*id))?.asset_type))
            }
            Connection::Attachment(id) => Ok(match self.attachment_asset(*id)? {
                Some(asset) => ConnectionAsset::Asset(asset),
                None => ConnectionAsset::NoAsset(*id),
            }),
        }
    }

    /// Assert a connection can receive `expected_asset`. An unresolvable
    /// cross-tank reference passes; the caller has opted out of that check by
    /// not supplying a lookup.
    fn check_asset(
        &self,
        connection: &Connection,
        expected_asset: Option<AssetId>,
    ) -> Result<(), ProtocolError> {
        let Some(expected) = expected_asset else {
            return Ok(());
        };
        match self.connection_asset(connection) {
            Ok(ConnectionAsset::Any) | Err(LookupError::NeedLookupFunction) => Ok(()),
            Ok(ConnectionAsset::Asset(asset)) if asset == expected => Ok(()),
            Ok(ConnectionAsset::Asset(_)) => Err(ConnectionError::ReceivesWrongAsset {
                connection: *connection,
            }
            .into()),
            Ok(ConnectionAsset::NoAsset(_)) => Err(ConnectionError::ReceivesNoAsset {
                connection: *connection,
            }
            .into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Walk the chain of connections starting at `start` until it terminates
    /// at a depository, checking every hop against `expected_asset` if given.
    ///
    /// Attachments cannot store asset: each one immediately releases to its
    /// output connection, so a chain of attachments must eventually reach an
    /// account or a tank. The walk carries an implicit "current tank" taken
    /// from the most recent attachment id with an explicit tank.
    pub fn connection_chain(
        &self,
        start: &Connection,
        max_chain_length: usize,
        expected_asset: Option<AssetId>,
    ) -> Result<ConnectionChain, ProtocolError> {
        self.check_asset(start, expected_asset)?;
        let mut chain = ConnectionChain {
            connections: vec![*start],
            final_connection_tank: None,
        };

        loop {
            let last = *chain.connections.last().expect("chain is never empty");
            let Connection::Attachment(mut attachment_id) = last else {
                return Ok(chain);
            };
            if chain.connections.len() > max_chain_length {
                return Err(ConnectionError::ExceededMaxChainLength.into());
            }

            if attachment_id.tank_id.is_some() {
                chain.final_connection_tank = attachment_id.tank_id;
            } else {
                attachment_id.tank_id = chain.final_connection_tank;
            }

            let next = match self.attachment_output(attachment_id)? {
                Some(output) => *output,
                None => {
                    return Err(ConnectionError::ReceivesNoAsset {
                        connection: Connection::Attachment(attachment_id),
                    }
                    .into())
                }
            };
            self.check_asset(&next, expected_asset)?;
            chain.connections.push(next);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessories::AssetFlowMeter;
    use crate::types::{AccountId, AuthorizedConnections};
    use std::collections::BTreeMap;

    struct Tanks(BTreeMap<TankId, TankSchematic>);

    impl TankLookup for Tanks {
        fn tank_schematic(&self, id: TankId) -> Option<&TankSchematic> {
            self.0.get(&id)
        }
    }

    fn meter_to(destination: Connection, asset: AssetId) -> TankAttachment {
        TankAttachment::FlowMeter(AssetFlowMeter {
            asset_type: asset,
            destination,
            remote_sources: AuthorizedConnections::All,
            reset_authority: None,
        })
    }

    fn tank_with_attachments(asset: AssetId, attachments: Vec<TankAttachment>) -> TankSchematic {
        let mut schematic = TankSchematic { asset_type: asset, ..TankSchematic::default() };
        for (index, attachment) in attachments.into_iter().enumerate() {
            schematic.attachments.insert(index as u16, attachment);
            schematic.attachment_counter += 1;
        }
        schematic
    }

    #[test]
    fn test_lookup_tank_defaults_to_current() {
        let tank = tank_with_attachments(AssetId(1), vec![]);
        let lookups = Lookups::new(&tank);
        assert!(std::ptr::eq(lookups.lookup_tank(None).unwrap(), &tank));
        assert_eq!(
            lookups.lookup_tank(Some(TankId(3))),
            Err(LookupError::NeedLookupFunction)
        );
    }

    #[test]
    fn test_chain_walk_through_meters() {
        let asset = AssetId(1);
        let tank = tank_with_attachments(
            asset,
            vec![
                meter_to(Connection::Attachment(AttachmentId::new(None, 1)), asset),
                meter_to(Connection::Account(AccountId(9)), asset),
            ],
        );
        let lookups = Lookups::new(&tank);

        let start = Connection::Attachment(AttachmentId::new(None, 0));
        let chain = lookups.connection_chain(&start, 10, Some(asset)).unwrap();
        assert_eq!(chain.connections.len(), 3);
        assert_eq!(chain.connections[2], Connection::Account(AccountId(9)));
        assert_eq!(chain.final_connection_tank, None);
    }

    #[test]
    fn test_chain_walk_respects_length_limit() {
        let asset = AssetId(1);
        // Two attachments that point at each other loop forever.
        let tank = tank_with_attachments(
            asset,
            vec![
                meter_to(Connection::Attachment(AttachmentId::new(None, 1)), asset),
                meter_to(Connection::Attachment(AttachmentId::new(None, 0)), asset),
            ],
        );
        let lookups = Lookups::new(&tank);

        let start = Connection::Attachment(AttachmentId::new(None, 0));
        let result = lookups.connection_chain(&start, 4, Some(asset));
        assert_eq!(
            result,
            Err(ProtocolError::Connection(ConnectionError::ExceededMaxChainLength))
        );
    }

    #[test]
    fn test_chain_walk_rejects_wrong_asset() {
        let asset = AssetId(1);
        let other = AssetId(2);
        let tank = tank_with_attachments(asset, vec![meter_to(Connection::SameTank, other)]);
        let lookups = Lookups::new(&tank);

        let start = Connection::Attachment(AttachmentId::new(None, 0));
        let result = lookups.connection_chain(&start, 10, Some(asset));
        assert!(matches!(
            result,
            Err(ProtocolError::Connection(ConnectionError::ReceivesWrongAsset { .. }))
        ));
    }

    #[test]
    fn test_chain_walk_tracks_remote_tank_context() {
        let asset = AssetId(1);
        let remote_id = TankId(7);
        let remote = tank_with_attachments(asset, vec![meter_to(Connection::SameTank, asset)]);
        let current = tank_with_attachments(asset, vec![]);
        let tanks = Tanks(BTreeMap::from([(remote_id, remote)]));
        let lookups = Lookups::with_lookup(&current, &tanks);

        // Hop to an attachment on the remote tank whose output is SameTank:
        // the final connection context must be the remote tank.
        let start = Connection::Attachment(AttachmentId::new(remote_id, 0));
        let chain = lookups.connection_chain(&start, 10, Some(asset)).unwrap();
        assert_eq!(chain.final_connection_tank, Some(remote_id));
        assert_eq!(chain.connections.last(), Some(&Connection::SameTank));
    }

    #[test]
    fn test_cross_tank_without_lookup_needs_function() {
        let tank = tank_with_attachments(AssetId(1), vec![]);
        let lookups = Lookups::new(&tank);
        let result = lookups.lookup_attachment(AttachmentId::new(TankId(2), 0));
        assert_eq!(result.err(), Some(LookupError::NeedLookupFunction));
    }
}
