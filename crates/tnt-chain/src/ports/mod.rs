//! Contracts the host chain implements for the core.

pub mod database;

pub use database::{ChainDatabase, DbLookup, TankInit};
