//! Chain-configured parameters and limits for TNT structures.
//!
//! Parameters enter the core only through this struct; there is no implicit
//! process-wide configuration.

use crate::accessories::{tag_is_stateful, AccessoryTag};
use crate::types::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TntParameters {
    /// Maximum number of connections a chain may pass through.
    pub max_connection_chain_length: u16,
    /// Maximum number of taps a single operation may open.
    pub max_taps_to_open: u16,
    /// Base deposit required for every tank.
    pub tank_deposit: Amount,
    /// Default deposit per tap-requirement kind.
    pub default_tap_requirement_deposit: Amount,
    /// Default deposit per tank-attachment kind.
    pub default_tank_attachment_deposit: Amount,
    /// Premium added to the deposit for stateful accessory kinds.
    pub stateful_accessory_deposit_premium: Amount,
    /// Deposit overrides for specific accessory kinds, by stable tag.
    pub override_deposits: BTreeMap<AccessoryTag, Amount>,
}

impl TntParameters {
    /// The deposit charged for an accessory kind: the override if one exists,
    /// otherwise the kind's default plus the stateful premium where due.
    pub fn accessory_deposit(&self, tag: AccessoryTag, default_deposit: Amount) -> Amount {
        if let Some(amount) = self.override_deposits.get(&tag) {
            return *amount;
        }
        if tag_is_stateful(tag) {
            default_deposit + self.stateful_accessory_deposit_premium
        } else {
            default_deposit
        }
    }
}

impl Default for TntParameters {
    fn default() -> Self {
        Self {
            max_connection_chain_length: 10,
            max_taps_to_open: 20,
            tank_deposit: 50_000,
            default_tap_requirement_deposit: 10_000,
            default_tank_attachment_deposit: 10_000,
            stateful_accessory_deposit_premium: 5_000,
            override_deposits: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins_over_default_and_premium() {
        let mut params = TntParameters::default();
        params.override_deposits.insert(0, 123);
        assert_eq!(params.accessory_deposit(0, 10_000), 123);
    }

    #[test]
    fn test_stateful_premium_applies() {
        let params = TntParameters::default();
        // Tag 0 (flow meter) is stateful, tag 3 (immediate limit) is not.
        assert_eq!(params.accessory_deposit(0, 10_000), 15_000);
        assert_eq!(params.accessory_deposit(3, 10_000), 10_000);
    }
}
