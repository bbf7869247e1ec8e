//! Stores for the four ledger tables. Each repository borrows a connection,
//! so the same code runs against the pool or inside a command's transaction.

pub mod allocation_repository;
pub mod asset_instance_repository;
pub mod asset_pool_repository;
pub mod history_repository;

pub use allocation_repository::{plan_fifo_return, AllocationRepository, ReturnPlan, ReturnStep};
pub use asset_instance_repository::{
    compose_serial, default_serial_prefix, ordinal_suffix, AssetInstanceRepository, Placement,
};
pub use asset_pool_repository::{AssetPoolRepository, PoolCounters};
pub use history_repository::{HistoryRepository, NewHistoryEntry};
