//! Tank schematics: the structure of a tank between updates.

use crate::accessories::{TankAttachment, TapRequirement};
use crate::authority::Authority;
use crate::operations::{TankCreate, TankUpdate};
use crate::types::{AssetId, AuthorizedConnections, Connection, IndexType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index of the emergency tap, present on every valid tank.
pub const EMERGENCY_TAP: IndexType = 0;

/// An egress point on a tank, guarded by requirements and authorities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tap {
    /// Where the tap releases asset; if unset, `connect_authority` must be
    /// specified so the tap can be connected later.
    pub connected_connection: Option<Connection>,
    /// Authority to open the tap; if unset, anyone who satisfies the
    /// requirements may open it. The emergency tap must set this.
    pub open_authority: Option<Authority>,
    /// Authority to connect or reconnect the tap; if unset, the connection is
    /// fixed at creation. The emergency tap must set this.
    pub connect_authority: Option<Authority>,
    /// Gating conditions on opening the tap, checked in order.
    pub requirements: Vec<TapRequirement>,
    /// Destructor taps may claim the tank's deposit and destroy the tank when
    /// it empties. The emergency tap must be a destructor tap.
    pub destructor_tap: bool,
}

/// Structural description of a tank: its taps, attachments, deposit-source
/// policy, and stored asset. Used for all consistency checks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankSchematic {
    /// Taps by index. Index 0 (the emergency tap) must exist.
    pub taps: BTreeMap<IndexType, Tap>,
    /// Count of taps ever added; assigns tap indexes and never decreases.
    pub tap_counter: IndexType,
    /// Attachments by index.
    pub attachments: BTreeMap<IndexType, TankAttachment>,
    /// Count of attachments ever added; never decreases.
    pub attachment_counter: IndexType,
    /// Which remote sources may deposit to this tank.
    pub remote_sources: AuthorizedConnections,
    /// The one asset this tank stores.
    pub asset_type: AssetId,
}

impl TankSchematic {
    /// Build the schematic a `tank_create` operation describes.
    pub fn from_create_operation(op: &TankCreate) -> Self {
        let mut schematic = TankSchematic {
            asset_type: op.contained_asset,
            remote_sources: op.authorized_sources.clone(),
            ..TankSchematic::default()
        };
        for attachment in &op.attachments {
            schematic
                .attachments
                .insert(schematic.attachment_counter, attachment.clone());
            schematic.attachment_counter += 1;
        }
        for tap in &op.taps {
            schematic.taps.insert(schematic.tap_counter, tap.clone());
            schematic.tap_counter += 1;
        }
        schematic
    }

    /// Apply a `tank_update` operation. Removals run before replacements and
    /// additions; added accessories take fresh indexes from the counters.
    pub fn update_from_operation(&mut self, op: &TankUpdate) {
        for index in &op.taps_to_remove {
            self.taps.remove(index);
        }
        for (index, tap) in &op.taps_to_replace {
            self.taps.insert(*index, tap.clone());
        }
        for tap in &op.taps_to_add {
            self.taps.insert(self.tap_counter, tap.clone());
            self.tap_counter += 1;
        }

        for index in &op.attachments_to_remove {
            self.attachments.remove(index);
        }
        for (index, attachment) in &op.attachments_to_replace {
            self.attachments.insert(*index, attachment.clone());
        }
        for attachment in &op.attachments_to_add {
            self.attachments.insert(self.attachment_counter, attachment.clone());
            self.attachment_counter += 1;
        }

        if let Some(sources) = &op.new_authorized_sources {
            self.remote_sources = sources.clone();
        }
    }

    pub fn tap(&self, index: IndexType) -> Option<&Tap> {
        self.taps.get(&index)
    }

    pub fn attachment(&self, index: IndexType) -> Option<&TankAttachment> {
        self.attachments.get(&index)
    }

    pub fn emergency_tap(&self) -> Option<&Tap> {
        self.taps.get(&EMERGENCY_TAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessories::{AssetFlowMeter, ImmediateFlowLimit};
    use crate::types::{AccountId, AssetId};

    fn meter() -> TankAttachment {
        TankAttachment::FlowMeter(AssetFlowMeter {
            asset_type: AssetId(1),
            destination: Connection::SameTank,
            remote_sources: AuthorizedConnections::All,
            reset_authority: None,
        })
    }

    fn create_op() -> TankCreate {
        TankCreate {
            payer: AccountId(1),
            deposit_amount: 0,
            contained_asset: AssetId(1),
            taps: vec![Tap::default(), Tap::default()],
            attachments: vec![meter()],
            authorized_sources: AuthorizedConnections::All,
        }
    }

    #[test]
    fn test_create_assigns_consecutive_indexes() {
        let schematic = TankSchematic::from_create_operation(&create_op());
        assert_eq!(schematic.tap_counter, 2);
        assert_eq!(schematic.attachment_counter, 1);
        assert!(schematic.tap(0).is_some());
        assert!(schematic.tap(1).is_some());
        assert!(schematic.tap(2).is_none());
        assert!(schematic.attachment(0).is_some());
    }

    #[test]
    fn test_update_counters_never_decrease() {
        let mut schematic = TankSchematic::from_create_operation(&create_op());
        let update = TankUpdate {
            payer: AccountId(1),
            update_authority: Authority::account(AccountId(1)),
            tank_to_update: crate::types::TankId(0),
            deposit_delta: 0,
            taps_to_remove: [1].into(),
            taps_to_replace: BTreeMap::new(),
            taps_to_add: vec![Tap {
                requirements: vec![TapRequirement::ImmediateFlowLimit(ImmediateFlowLimit {
                    limit: 10,
                })],
                ..Tap::default()
            }],
            attachments_to_remove: vec![0],
            attachments_to_replace: BTreeMap::new(),
            attachments_to_add: vec![],
            new_authorized_sources: None,
        };

        schematic.update_from_operation(&update);
        // The removed tap's index is never reused.
        assert!(schematic.tap(1).is_none());
        assert!(schematic.tap(2).is_some());
        assert_eq!(schematic.tap_counter, 3);
        assert!(schematic.attachments.is_empty());
        assert_eq!(schematic.attachment_counter, 1);
    }

    #[test]
    fn test_round_trip_preserves_indexes_and_counters() {
        let mut schematic = TankSchematic::from_create_operation(&create_op());
        // Leave a gap in the tap indexes, as a remove would.
        schematic.taps.remove(&0);
        schematic.taps.insert(5, Tap::default());
        schematic.tap_counter = 6;

        let encoded = serde_json::to_string(&schematic).unwrap();
        let decoded: TankSchematic = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, schematic);
        assert_eq!(decoded.tap_counter, 6);
        assert!(decoded.tap(5).is_some());
        assert!(decoded.attachment(0).is_some());
    }

    #[test]
    fn test_update_replaces_sources() {
        let mut schematic = TankSchematic::from_create_operation(&create_op());
        let update = TankUpdate {
            new_authorized_sources: Some(AuthorizedConnections::sources([])),
            ..TankUpdate {
                payer: AccountId(1),
                update_authority: Authority::account(AccountId(1)),
                tank_to_update: crate::types::TankId(0),
                deposit_delta: 0,
                taps_to_remove: Default::default(),
                taps_to_replace: Default::default(),
                taps_to_add: vec![],
                attachments_to_remove: vec![],
                attachments_to_replace: Default::default(),
                attachments_to_add: vec![],
                new_authorized_sources: None,
            }
        };
        schematic.update_from_operation(&update);
        assert_eq!(schematic.remote_sources, AuthorizedConnections::sources([]));
    }
}
