//! Copy-on-write staging over a read-only database.
//!
//! Tap flows and query applications run speculatively: reads pass through to
//! the underlying database until the first write to an object, which clones
//! it into a staging map. Later reads and writes of that object see the
//! staged copy. Nothing touches the real database until [`StagedWrites`] is
//! committed; dropping the buffer instead discards every speculative change.

use crate::domain::errors::StateError;
use crate::domain::object::TankObject;
use crate::ports::database::ChainDatabase;
use std::collections::BTreeMap;
use tnt_protocol::types::TankId;

/// A transactional view of the tank store.
pub struct CowTanks<'a, D: ?Sized> {
    db: &'a D,
    staged: BTreeMap<TankId, TankObject>,
}

impl<'a, D: ChainDatabase + ?Sized> CowTanks<'a, D> {
    pub fn new(db: &'a D) -> Self {
        Self { db, staged: BTreeMap::new() }
    }

    /// The wrapped database, for reads that bypass staging (clock,
    /// parameters, balances).
    pub fn db(&self) -> &'a D {
        self.db
    }

    /// Read a tank: the staged copy if one exists, the stored object
    /// otherwise.
    pub fn tank(&self, id: TankId) -> Result<&TankObject, StateError> {
        if let Some(staged) = self.staged.get(&id) {
            return Ok(staged);
        }
        self.db.get_tank(id)
    }

    /// Write access to a tank, cloning it into the staging map on first use.
    /// Every later read of the same id sees this copy.
    pub fn tank_mut(&mut self, id: TankId) -> Result<&mut TankObject, StateError> {
        if !self.staged.contains_key(&id) {
            let clone = self.db.get_tank(id)?.clone();
            self.staged.insert(id, clone);
        }
        Ok(self.staged.get_mut(&id).expect("staged entry was just inserted"))
    }

    /// Finish speculating and take the staged objects for commit.
    pub fn into_writes(self) -> StagedWrites {
        StagedWrites { tanks: self.staged }
    }
}

/// The staged objects of a finished speculation, detached from the read-only
/// borrow so they can be written back.
#[derive(Debug, Default)]
pub struct StagedWrites {
    tanks: BTreeMap<TankId, TankObject>,
}

impl StagedWrites {
    /// Write every staged object back, emptying the staging map. All-or-
    /// nothing from the caller's perspective: an unknown tank aborts before
    /// any effects when the staged set came from a consistent view.
    pub fn commit<D: ChainDatabase + ?Sized>(self, db: &mut D) -> Result<(), StateError> {
        for (id, staged) in self.tanks {
            db.modify_tank(id, &mut |stored| {
                *stored = staged.clone();
            })?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.tanks.is_empty()
    }
}
