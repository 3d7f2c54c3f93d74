//! Domain logic: tank objects, staging, and the evaluation machinery.

pub mod connection_flow;
pub mod cow;
pub mod errors;
pub mod object;
pub mod query_eval;
pub mod requirements;
pub mod tap_flow;

pub use connection_flow::ConnectionFlowProcessor;
pub use cow::{CowTanks, StagedWrites};
pub use errors::{StateError, TapFlowError, TntError};
pub use object::TankObject;
pub use query_eval::QueryEvaluator;
pub use requirements::TapRequirementUtility;
pub use tap_flow::{evaluate_tap_flow, TapFlow, TapFlowOutcome};
