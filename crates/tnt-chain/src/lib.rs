//! # tnt-chain
//!
//! Chain-side evaluation for Tanks and Taps (TNT).
//!
//! ## Role in System
//!
//! - **Embeddable core**: the host chain supplies storage, balances, the
//!   block clock, and parameters through [`ports::ChainDatabase`]; the core
//!   supplies the operational semantics.
//! - **Two-phase queries**: declarative actions evaluate against a snapshot,
//!   accumulate required authorities, then apply in order.
//! - **Speculative tap flows**: releases, attachment processing, and
//!   cascading opens run inside a copy-on-write buffer and commit atomically
//!   or not at all.
//!
//! ## Evaluation Flow
//!
//! ```text
//! operation ──→ [stateless validate]
//!                    │
//!                    ▼
//!       [query evaluate → authorities] ──→ [declared-authority check]
//!                    │
//!                    ▼
//!        [COW buffer: query apply → tap flow → connection flow]
//!                    │
//!                    ▼
//!      [commit + balance credits + virtual operations]
//! ```
//!
//! The core is single-threaded and synchronous within one operation; the
//! host serializes operations.

pub mod adapters;
pub mod domain;
pub mod evaluators;
pub mod ports;

pub use adapters::MemoryDatabase;
pub use domain::{
    evaluate_tap_flow, CowTanks, QueryEvaluator, StateError, TankObject, TapFlow, TapFlowError,
    TapFlowOutcome, TapRequirementUtility, TntError,
};
pub use evaluators::{
    evaluate_account_fund_connection, evaluate_tank_create, evaluate_tank_delete,
    evaluate_tank_query, evaluate_tank_update, evaluate_tap_connect, evaluate_tap_open,
    prepare_tap_open_fields,
};
pub use ports::{ChainDatabase, DbLookup, TankInit};
