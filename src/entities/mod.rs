pub mod asset_allocation;
pub mod asset_history;
pub mod asset_instance;
pub mod asset_pool;

pub use asset_allocation::Entity as AssetAllocation;
pub use asset_history::{Entity as AssetHistory, HistoryAction};
pub use asset_instance::{Entity as AssetInstance, InstanceCondition};
pub use asset_pool::{AllocationMode, AssetType, Entity as AssetPool, Ownership, PoolStatus};
