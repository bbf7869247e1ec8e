use crate::{
    collaborators::{BlobStore, FundsLedger, HolderDirectory},
    db::DbPool,
    entities::Ownership,
    errors::ServiceError,
    events::EventSender,
};
use async_trait::async_trait;
use std::sync::Arc;

pub mod assets;

/// Everything a command may touch while it runs
#[derive(Clone)]
pub struct CommandContext {
    pub db: Arc<DbPool>,
    pub event_sender: Arc<EventSender>,
    pub holders: Arc<dyn HolderDirectory>,
    pub funds: Arc<dyn FundsLedger>,
    pub blobs: Arc<dyn BlobStore>,
    /// Purchases for pools with this ownership are mirrored into the funds ledger
    pub funds_sync_ownership: Ownership,
}

impl CommandContext {
    pub fn db(&self) -> &DbPool {
        &self.db
    }
}

/// Command trait for implementing the Command Pattern
///
/// This trait allows for encapsulating all the logic needed to execute a business operation
/// into a single object that can be validated, executed, and produce events.
#[async_trait]
pub trait Command: Send + Sync {
    /// The return type of the command when executed successfully
    type Result: Send;

    /// Execute the command against the ledger
    ///
    /// All reads and writes of one command share a single transaction; events
    /// are published only after it commits.
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError>;
}
