//! Addresses of accessories within a tank.
//!
//! Accessory state is keyed by address position alone: an attachment address
//! carries only its attachment index, and a requirement address its tap index
//! and requirement position. All attachment addresses order before all
//! requirement addresses, then lexicographically within each kind; the
//! derived ordering on the enum gives exactly that.

use crate::errors::{AccessoryPath, QueryError};
use crate::schematic::TankSchematic;
use crate::types::IndexType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a stateful or queryable accessory on a tank.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AccessoryAddress {
    Attachment { attachment: IndexType },
    Requirement { tap: IndexType, requirement: IndexType },
}

impl AccessoryAddress {
    pub fn attachment(attachment: IndexType) -> Self {
        AccessoryAddress::Attachment { attachment }
    }

    pub fn requirement(tap: IndexType, requirement: IndexType) -> Self {
        AccessoryAddress::Requirement { tap, requirement }
    }

    pub fn path(&self) -> AccessoryPath {
        match *self {
            AccessoryAddress::Attachment { attachment } => AccessoryPath::attachment(attachment),
            AccessoryAddress::Requirement { tap, requirement } => {
                AccessoryPath::requirement(tap, requirement)
            }
        }
    }

    /// The tap index addressed, for requirement addresses.
    pub fn tap_index(&self) -> Option<IndexType> {
        match *self {
            AccessoryAddress::Requirement { tap, .. } => Some(tap),
            AccessoryAddress::Attachment { .. } => None,
        }
    }

    /// Resolve this address against a schematic, requiring a requirement.
    pub fn requirement_in<'a>(
        &self,
        schematic: &'a TankSchematic,
    ) -> Result<&'a crate::accessories::TapRequirement, QueryError> {
        match *self {
            AccessoryAddress::Requirement { tap, requirement } => schematic
                .taps
                .get(&tap)
                .and_then(|t| t.requirements.get(usize::from(requirement)))
                .ok_or(QueryError::TargetNotFound { path: self.path() }),
            AccessoryAddress::Attachment { .. } => {
                Err(QueryError::WrongTargetType { path: self.path() })
            }
        }
    }

    /// Resolve this address against a schematic, requiring an attachment.
    pub fn attachment_in<'a>(
        &self,
        schematic: &'a TankSchematic,
    ) -> Result<&'a crate::accessories::TankAttachment, QueryError> {
        match *self {
            AccessoryAddress::Attachment { attachment } => schematic
                .attachments
                .get(&attachment)
                .ok_or(QueryError::TargetNotFound { path: self.path() }),
            AccessoryAddress::Requirement { .. } => {
                Err(QueryError::WrongTargetType { path: self.path() })
            }
        }
    }
}

impl fmt::Display for AccessoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachments_order_before_requirements() {
        let attachment = AccessoryAddress::attachment(u16::MAX);
        let requirement = AccessoryAddress::requirement(0, 0);
        assert!(attachment < requirement);
    }

    #[test]
    fn test_lexicographic_within_kind() {
        assert!(AccessoryAddress::attachment(1) < AccessoryAddress::attachment(2));
        assert!(AccessoryAddress::requirement(1, 5) < AccessoryAddress::requirement(2, 0));
        assert!(AccessoryAddress::requirement(1, 0) < AccessoryAddress::requirement(1, 1));
    }

    #[test]
    fn test_requirement_range_bounds() {
        // Range scans over a tap's requirements rely on this bracketing.
        let low = AccessoryAddress::requirement(3, 0);
        let high = AccessoryAddress::requirement(3, u16::MAX);
        let inside = AccessoryAddress::requirement(3, 7);
        let outside = AccessoryAddress::requirement(4, 0);
        assert!(low <= inside && inside <= high);
        assert!(outside > high);
    }
}
