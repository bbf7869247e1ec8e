use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{ConnectionTrait, Set};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::Validate;

use super::{ensure_positive, record_outcome, record_purchase};
use super::{AssetCommand, AssetOperation};
use crate::{
    collaborators::{BlobStore, OperatorId},
    commands::{Command, CommandContext},
    db::in_transaction,
    entities::{
        asset_instance, asset_pool, AllocationMode, AssetType, HistoryAction, Ownership,
        PoolStatus,
    },
    errors::ServiceError,
    events::Event,
    repositories::{
        compose_serial, default_serial_prefix, ordinal_suffix, AssetInstanceRepository,
        AssetPoolRepository, HistoryRepository, NewHistoryEntry, Placement,
    },
};

/// Raw photo bytes attached to a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoUpload {
    pub bytes: Vec<u8>,
    pub extension: Option<String>,
}

impl PhotoUpload {
    /// Saves through the blob store; the path is what the pool keeps
    pub(crate) async fn store(&self, blobs: &dyn BlobStore) -> Result<String, ServiceError> {
        blobs
            .save_file(&self.bytes, self.extension.as_deref())
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("blob store: {}", e)))
    }
}

/// Intake of a new pool: manual entry, import row or funded purchase
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAssetCommand {
    /// Unique external code; generated from the serial prefix when absent
    #[validate(length(min = 1, max = 64))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    pub asset_type: AssetType,
    pub quantity: i32,
    pub unit_price: Option<Decimal>,
    /// Total purchase amount; gives the unit price when that is absent
    pub amount: Option<Decimal>,
    pub ownership: Ownership,
    #[serde(default = "default_allocation_mode")]
    pub allocation_mode: AllocationMode,
    #[validate(range(min = 0, max = 2))]
    #[serde(default)]
    pub bed_capacity: i32,
    #[validate(length(max = 200))]
    pub location: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    pub photo: Option<PhotoUpload>,
    /// Prefix of generated serial numbers (fixed assets only)
    #[validate(length(min = 1, max = 50))]
    pub serial_prefix: Option<String>,
    /// Per-unit serial suffixes; ordinals fill any gap
    pub serial_suffixes: Option<Vec<String>>,
    #[serde(default)]
    pub sync_funds: bool,
    pub operator_id: OperatorId,
}

fn default_allocation_mode() -> AllocationMode {
    AllocationMode::Personal
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedAsset {
    pub pool: asset_pool::Model,
    pub instances: Vec<asset_instance::Model>,
    /// Amount charged to the funds ledger, if any
    pub charged: Option<Decimal>,
}

/// `amount / quantity` to cents, half away from zero
pub fn unit_price_from_amount(amount: Decimal, quantity: i32) -> Decimal {
    if quantity <= 0 {
        return Decimal::ZERO;
    }
    (amount / Decimal::from(quantity))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `base`, then `base` with `N-` appended for N = 1, 2, ...
pub fn code_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string()).chain((1..).map(move |n| {
        if base.ends_with('-') {
            format!("{}{}-", base, n)
        } else {
            format!("{}-{}", base, n)
        }
    }))
}

#[async_trait]
impl Command for CreateAssetCommand {
    type Result = CreatedAsset;

    #[instrument(skip(self, ctx), fields(name = %self.name, asset_type = %self.asset_type, quantity = self.quantity))]
    async fn execute(&self, ctx: &CommandContext) -> Result<Self::Result, ServiceError> {
        let result = self.create(ctx).await;
        record_outcome(AssetOperation::Create, &result, self.quantity);
        let created = result?;

        info!(
            pool_id = created.pool.id,
            code = %created.pool.code,
            instances = created.instances.len(),
            charged = ?created.charged,
            "Asset pool created"
        );

        ctx.event_sender
            .publish(Event::AssetCreated {
                pool_id: created.pool.id,
                code: created.pool.code.clone(),
                name: created.pool.name.clone(),
                quantity: created.pool.total_quantity,
            })
            .await;

        Ok(created)
    }
}

impl AssetCommand for CreateAssetCommand {
    fn operation(&self) -> AssetOperation {
        AssetOperation::Create
    }

    fn operator_id(&self) -> OperatorId {
        self.operator_id
    }
}

impl CreateAssetCommand {
    fn unit_price(&self) -> Result<Decimal, ServiceError> {
        let price = match (self.unit_price, self.amount) {
            (Some(price), _) => price,
            (None, Some(amount)) => unit_price_from_amount(amount, self.quantity),
            (None, None) => Decimal::ZERO,
        };
        if price < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "unit price cannot be negative".to_string(),
            ));
        }
        Ok(price)
    }

    async fn create(&self, ctx: &CommandContext) -> Result<CreatedAsset, ServiceError> {
        self.validate()?;
        ensure_positive(self.quantity)?;
        let unit_price = self.unit_price()?;

        let photo_path = match &self.photo {
            Some(photo) => Some(photo.store(ctx.blobs.as_ref()).await?),
            None => None,
        };

        let cmd = self.clone();
        let funds = ctx.funds.clone();
        let sync_ownership = ctx.funds_sync_ownership;
        let stored_photo = photo_path.clone();
        let result = in_transaction(ctx.db(), move |txn| {
            Box::pin(async move {
                let today = Utc::now().date_naive();
                let code = cmd.pick_code(txn, today).await?;
                let now = Utc::now();

                let pool = AssetPoolRepository::new(txn)
                    .insert(asset_pool::ActiveModel {
                        code: Set(code.clone()),
                        name: Set(cmd.name.trim().to_string()),
                        asset_type: Set(cmd.asset_type),
                        total_quantity: Set(cmd.quantity),
                        stock_quantity: Set(cmd.quantity),
                        allocated_quantity: Set(0),
                        unit_price: Set(unit_price),
                        ownership: Set(cmd.ownership),
                        status: Set(PoolStatus::InStock),
                        location: Set(cmd.location.clone()),
                        current_holder_id: Set(None),
                        allocation_mode: Set(cmd.allocation_mode),
                        bed_capacity: Set(cmd.bed_capacity),
                        photo_path: Set(stored_photo),
                        notes: Set(cmd.notes.clone()),
                        created_at: Set(now),
                        updated_at: Set(now),
                        version: Set(1),
                        ..Default::default()
                    })
                    .await?;

                let mut instances = Vec::new();
                if pool.asset_type.tracks_instances() {
                    let prefix = cmd.serial_prefix.clone().unwrap_or_else(|| code.clone());
                    let repo = AssetInstanceRepository::new(txn);
                    for index in 0..cmd.quantity as usize {
                        let suffix = cmd
                            .serial_suffixes
                            .as_ref()
                            .and_then(|s| s.get(index))
                            .map(|s| s.trim())
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .unwrap_or_else(|| ordinal_suffix(index));
                        let placement = Placement {
                            location: pool.location.clone(),
                            ..Placement::default()
                        };
                        instances.push(
                            repo.create(pool.id, compose_serial(&prefix, &suffix), placement)
                                .await?,
                        );
                    }
                }

                let mut charged = None;
                if cmd.sync_funds && pool.ownership == sync_ownership {
                    let amount = unit_price * Decimal::from(cmd.quantity);
                    let description = format!(
                        "Asset purchase: {} x{} ({})",
                        pool.name, cmd.quantity, pool.code
                    );
                    if record_purchase(funds.as_ref(), &pool, amount, description, cmd.operator_id)
                        .await
                    {
                        charged = Some(amount);
                    }
                }

                let mut note = format!("intake of {}", cmd.quantity);
                if !instances.is_empty() {
                    note.push_str(&format!(", {} serialized", instances.len()));
                }
                if let Some(amount) = charged {
                    note.push_str(&format!(", charged {} to funds", amount));
                }
                HistoryRepository::new(txn)
                    .append(
                        NewHistoryEntry::new(pool.id, HistoryAction::Intake)
                            .operator(Some(cmd.operator_id))
                            .delta(cmd.quantity)
                            .note(note),
                    )
                    .await?;

                Ok(CreatedAsset {
                    pool,
                    instances,
                    charged,
                })
            })
        })
        .await;

        if result.is_err() {
            if let Some(path) = &photo_path {
                if let Err(e) = ctx.blobs.delete_file(path).await {
                    warn!(path = %path, "Failed to remove orphaned photo: {}", e);
                }
            }
        }
        result
    }

    /// The requested code, or the first free variant of the serial prefix
    async fn pick_code<C: ConnectionTrait>(
        &self,
        conn: &C,
        today: NaiveDate,
    ) -> Result<String, ServiceError> {
        let pools = AssetPoolRepository::new(conn);
        if let Some(code) = self.code.as_deref().map(str::trim) {
            if pools.code_exists(code).await? {
                return Err(ServiceError::Conflict(format!(
                    "Asset code {} already exists",
                    code
                )));
            }
            return Ok(code.to_string());
        }

        let base = self
            .serial_prefix
            .clone()
            .unwrap_or_else(|| default_serial_prefix(today));
        for candidate in code_candidates(&base) {
            if !pools.code_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(ServiceError::InternalError(
            "no free asset code".to_string(),
        ))
    }
}
