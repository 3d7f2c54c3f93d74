//! The tank object: schematic, balances, and per-accessory state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tnt_protocol::accessories::{AccessoryState, AccessoryStateKind};
use tnt_protocol::address::AccessoryAddress;
use tnt_protocol::schematic::TankSchematic;
use tnt_protocol::types::{Amount, IndexType, TankId, TimePointSec};

/// Runtime state of a tank. The schematic describes its structure; balance,
/// deposit, and accessory states evolve as operations run against it.
///
/// Accessory state is keyed by address position alone (not accessory type),
/// so replacing an accessory with a different kind at the same index must
/// erase the old state; `tank_update` evaluation does exactly that.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TankObject {
    pub id: TankId,
    pub schematic: TankSchematic,
    /// Balance of the schematic's asset type.
    pub balance: Amount,
    /// Deposit held for this tank, always in the core asset.
    pub deposit: Amount,
    pub creation_date: TimePointSec,
    pub accessory_states: BTreeMap<AccessoryAddress, AccessoryState>,
}

impl TankObject {
    /// State of the accessory at `address`, if any exists with the expected
    /// kind.
    pub fn state<S: AccessoryStateKind>(&self, address: AccessoryAddress) -> Option<&S> {
        self.accessory_states.get(&address).and_then(S::peek)
    }

    pub fn state_mut<S: AccessoryStateKind>(
        &mut self,
        address: AccessoryAddress,
    ) -> Option<&mut S> {
        self.accessory_states.get_mut(&address).and_then(S::peek_mut)
    }

    /// State at `address`, created as a default if absent. A row of a
    /// different kind at the same address is replaced; addresses only carry
    /// stale kinds if an accessory was swapped, and swapped accessories start
    /// from fresh state.
    pub fn state_or_default<S: AccessoryStateKind>(
        &mut self,
        address: AccessoryAddress,
    ) -> &mut S {
        let slot = self
            .accessory_states
            .entry(address)
            .or_insert_with(|| S::default().wrap());
        if S::peek(slot).is_none() {
            *slot = S::default().wrap();
        }
        S::peek_mut(slot).expect("slot was just set to the requested kind")
    }

    /// Erase state for every requirement on the given tap.
    pub fn clear_tap_state(&mut self, tap: IndexType) {
        let low = AccessoryAddress::requirement(tap, 0);
        let high = AccessoryAddress::requirement(tap, IndexType::MAX);
        let doomed: Vec<AccessoryAddress> =
            self.accessory_states.range(low..=high).map(|(addr, _)| *addr).collect();
        for address in doomed {
            self.accessory_states.remove(&address);
        }
    }

    /// Erase state for the given attachment.
    pub fn clear_attachment_state(&mut self, attachment: IndexType) {
        self.accessory_states.remove(&AccessoryAddress::attachment(attachment));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tnt_protocol::accessories::{CumulativeFlowState, MeterState, ReviewState};

    fn empty_tank() -> TankObject {
        TankObject {
            id: TankId(1),
            schematic: TankSchematic::default(),
            balance: 0,
            deposit: 0,
            creation_date: TimePointSec(0),
            accessory_states: BTreeMap::new(),
        }
    }

    #[test]
    fn test_state_round_trip() {
        let mut tank = empty_tank();
        let address = AccessoryAddress::attachment(0);
        assert!(tank.state::<MeterState>(address).is_none());

        tank.state_or_default::<MeterState>(address).metered_amount = 42;
        assert_eq!(tank.state::<MeterState>(address).unwrap().metered_amount, 42);
    }

    #[test]
    fn test_state_kind_mismatch_reads_as_absent() {
        let mut tank = empty_tank();
        let address = AccessoryAddress::requirement(1, 0);
        tank.state_or_default::<CumulativeFlowState>(address).amount_released = 7;
        assert!(tank.state::<ReviewState>(address).is_none());
    }

    #[test]
    fn test_clear_tap_state_only_touches_that_tap() {
        let mut tank = empty_tank();
        tank.state_or_default::<CumulativeFlowState>(AccessoryAddress::requirement(1, 0));
        tank.state_or_default::<CumulativeFlowState>(AccessoryAddress::requirement(1, 3));
        tank.state_or_default::<CumulativeFlowState>(AccessoryAddress::requirement(2, 0));
        tank.state_or_default::<MeterState>(AccessoryAddress::attachment(1));

        tank.clear_tap_state(1);
        assert!(tank.state::<CumulativeFlowState>(AccessoryAddress::requirement(1, 0)).is_none());
        assert!(tank.state::<CumulativeFlowState>(AccessoryAddress::requirement(1, 3)).is_none());
        assert!(tank.state::<CumulativeFlowState>(AccessoryAddress::requirement(2, 0)).is_some());
        assert!(tank.state::<MeterState>(AccessoryAddress::attachment(1)).is_some());
    }

    #[test]
    fn test_clear_attachment_state_ignores_requirements() {
        let mut tank = empty_tank();
        tank.state_or_default::<MeterState>(AccessoryAddress::attachment(0));
        tank.state_or_default::<CumulativeFlowState>(AccessoryAddress::requirement(0, 0));

        tank.clear_attachment_state(0);
        assert!(tank.state::<MeterState>(AccessoryAddress::attachment(0)).is_none());
        assert!(tank.state::<CumulativeFlowState>(AccessoryAddress::requirement(0, 0)).is_some());
    }
}
