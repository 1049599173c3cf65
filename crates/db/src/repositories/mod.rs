use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use tradein_core::domain::alias::DeviceAlias;
use tradein_core::domain::bulk_quote::{BulkQuote, BulkQuoteDetail, BulkQuoteId, BulkTotals, DeviceLine};
use tradein_core::domain::commission::{
    CommissionLedgerEntry, LedgerEntryId, Payout, SourceKind,
};
use tradein_core::domain::device::{CategoryId, Device, DeviceId, DeviceKey, NewDevice};
use tradein_core::domain::order::{InventoryItem, InventoryItemId, Order};
use tradein_core::domain::partner::{Partner, PartnerId};
use tradein_core::domain::price_list::{
    Category, GradePrices, PriceList, PriceListId, PriceListSnapshot, PriceUpdate,
};
use tradein_core::domain::quote::Quote;
use tradein_core::errors::ApplicationError;
use tradein_core::flows::LifecycleEntity;
use tradein_core::DomainError;

use crate::DbPool;

pub mod alias;
pub mod bulk_quote;
pub mod commission;
pub mod device;
mod document;
pub mod memory;
pub mod order;
pub mod partner;
pub mod price_list;
pub mod quote;

pub use alias::SqlAliasRepository;
pub use bulk_quote::SqlBulkQuoteRepository;
pub use commission::SqlCommissionLedgerRepository;
pub use device::SqlDeviceRepository;
pub use memory::InMemoryStore;
pub use order::SqlOrderRepository;
pub use partner::SqlPartnerRepository;
pub use price_list::SqlPriceListRepository;
pub use quote::SqlQuoteRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    /// A compare-and-set commit found a different status than the caller read.
    #[error("{entity} `{id}` is no longer `{expected}`")]
    StaleStatus { entity: &'static str, id: String, expected: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn decode(error: impl ToString) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Conflict(message) => Self::Domain(DomainError::Conflict(message)),
            RepositoryError::StaleStatus { .. } => {
                Self::Domain(DomainError::Conflict(value.to_string()))
            }
            RepositoryError::NotFound { entity, id } => {
                Self::Domain(DomainError::NotFound { entity, id })
            }
            RepositoryError::Database(_)
            | RepositoryError::Decode(_)
            | RepositoryError::Unavailable(_) => Self::Persistence(value.to_string()),
        }
    }
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find_by_id(&self, id: DeviceId) -> Result<Option<Device>, RepositoryError>;
    async fn find_by_key(&self, key: &DeviceKey) -> Result<Option<Device>, RepositoryError>;
    async fn list_by_category(&self, category: &CategoryId) -> Result<Vec<Device>, RepositoryError>;

    /// Allocates the next catalog id from the serialized counter. A device
    /// with the same case-insensitive key is a `Conflict`.
    async fn create(&self, device: NewDevice) -> Result<Device, RepositoryError>;
}

#[async_trait]
pub trait AliasRepository: Send + Sync {
    async fn append(&self, alias: DeviceAlias) -> Result<(), RepositoryError>;
    async fn list_all(&self) -> Result<Vec<DeviceAlias>, RepositoryError>;

    /// Removes every row stored under the normalized alias text.
    async fn delete(&self, alias: &str) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait PriceListRepository: Send + Sync {
    async fn find_by_id(&self, id: &PriceListId) -> Result<Option<PriceList>, RepositoryError>;
    async fn find_category(&self, id: &CategoryId) -> Result<Option<Category>, RepositoryError>;
    async fn save_category(&self, category: Category) -> Result<(), RepositoryError>;

    /// Creates or replaces a list. When the list already exists its previous
    /// prices are snapshotted in the same transaction.
    async fn save(&self, price_list: PriceList) -> Result<(), RepositoryError>;

    /// Writes one chunk of per-device grade maps atomically.
    async fn apply_chunk(
        &self,
        id: &PriceListId,
        updates: &[PriceUpdate],
    ) -> Result<(), RepositoryError>;

    async fn snapshot(&self, id: &PriceListId) -> Result<PriceListSnapshot, RepositoryError>;
    async fn list_snapshots(
        &self,
        id: &PriceListId,
    ) -> Result<Vec<PriceListSnapshot>, RepositoryError>;
}

/// Status-carrying entity storage with compare-and-set commits.
#[async_trait]
pub trait LifecycleStore<E: LifecycleEntity>: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<E>, RepositoryError>;

    /// Persists `entity` only if the stored status still equals `expected`.
    /// Every id in `relist` is flipped to `listed` in the same commit.
    async fn commit_transition(
        &self,
        entity: &E,
        expected: E::Status,
        relist: &[InventoryItemId],
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait QuoteRepository: LifecycleStore<Quote> {
    async fn insert(&self, quote: Quote) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait BulkQuoteRepository: LifecycleStore<BulkQuote> {
    /// Writes the quote and all of its lines as one atomic unit.
    async fn insert_detail(&self, detail: BulkQuoteDetail) -> Result<(), RepositoryError>;
    async fn find_detail(
        &self,
        id: &BulkQuoteId,
    ) -> Result<Option<BulkQuoteDetail>, RepositoryError>;
    async fn update_line(
        &self,
        id: &BulkQuoteId,
        line: DeviceLine,
        totals: BulkTotals,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: LifecycleStore<Order> {
    async fn insert(&self, order: Order) -> Result<(), RepositoryError>;
    async fn save_inventory_item(&self, item: InventoryItem) -> Result<(), RepositoryError>;
    async fn find_inventory_item(
        &self,
        id: &InventoryItemId,
    ) -> Result<Option<InventoryItem>, RepositoryError>;
}

#[async_trait]
pub trait PartnerRepository: Send + Sync {
    async fn find_by_id(&self, id: &PartnerId) -> Result<Option<Partner>, RepositoryError>;
    async fn find_by_code(&self, code: &str) -> Result<Option<Partner>, RepositoryError>;
    async fn save(&self, partner: Partner) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait CommissionLedgerRepository: Send + Sync {
    /// Inserts a pending entry unless one already exists for the same
    /// (partner, source). Returns the stored entry and whether it was new.
    async fn insert_if_absent(
        &self,
        entry: CommissionLedgerEntry,
    ) -> Result<(CommissionLedgerEntry, bool), RepositoryError>;

    async fn find_by_source(
        &self,
        partner_id: &PartnerId,
        kind: SourceKind,
        source_id: &str,
    ) -> Result<Option<CommissionLedgerEntry>, RepositoryError>;

    async fn list_for_partner(
        &self,
        partner_id: &PartnerId,
    ) -> Result<Vec<CommissionLedgerEntry>, RepositoryError>;

    /// Moves every listed entry to `paid` and records the payout, or changes
    /// nothing when any entry is missing, foreign or already settled.
    async fn settle(
        &self,
        partner_id: &PartnerId,
        entry_ids: &[LedgerEntryId],
        reference: &str,
    ) -> Result<Payout, RepositoryError>;

    async fn list_payouts(&self, partner_id: &PartnerId) -> Result<Vec<Payout>, RepositoryError>;
}

/// Every repository the services need, behind trait objects.
#[derive(Clone)]
pub struct Repositories {
    pub devices: Arc<dyn DeviceRepository>,
    pub aliases: Arc<dyn AliasRepository>,
    pub price_lists: Arc<dyn PriceListRepository>,
    pub quotes: Arc<dyn QuoteRepository>,
    pub bulk_quotes: Arc<dyn BulkQuoteRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub partners: Arc<dyn PartnerRepository>,
    pub ledger: Arc<dyn CommissionLedgerRepository>,
}

impl Repositories {
    pub fn in_memory() -> (Self, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::default());
        (Self::from_memory(Arc::clone(&store)), store)
    }

    pub fn from_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            devices: store.clone(),
            aliases: store.clone(),
            price_lists: store.clone(),
            quotes: store.clone(),
            bulk_quotes: store.clone(),
            orders: store.clone(),
            partners: store.clone(),
            ledger: store,
        }
    }

    pub fn sql(pool: DbPool) -> Self {
        Self {
            devices: Arc::new(SqlDeviceRepository::new(pool.clone())),
            aliases: Arc::new(SqlAliasRepository::new(pool.clone())),
            price_lists: Arc::new(SqlPriceListRepository::new(pool.clone())),
            quotes: Arc::new(SqlQuoteRepository::new(pool.clone())),
            bulk_quotes: Arc::new(SqlBulkQuoteRepository::new(pool.clone())),
            orders: Arc::new(SqlOrderRepository::new(pool.clone())),
            partners: Arc::new(SqlPartnerRepository::new(pool.clone())),
            ledger: Arc::new(SqlCommissionLedgerRepository::new(pool)),
        }
    }
}

pub(crate) fn grade_prices_json(prices: &GradePrices) -> Result<String, RepositoryError> {
    Ok(serde_json::to_string(prices)?)
}

pub(crate) fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc)).map_err(|err| {
        RepositoryError::Decode(format!("invalid {} timestamp '{}': {}", field, value, err))
    })
}

pub(crate) fn parse_decimal(field: &str, value: &str) -> Result<Decimal, RepositoryError> {
    value
        .parse::<Decimal>()
        .map_err(|err| RepositoryError::Decode(format!("invalid {} amount '{}': {}", field, value, err)))
}

/// Maps a unique-constraint violation to `Conflict`, passing other errors through.
pub(crate) fn conflict_on_unique(error: sqlx::Error, message: impl FnOnce() -> String) -> RepositoryError {
    let unique = error.as_database_error().is_some_and(|db| db.is_unique_violation());
    if unique {
        RepositoryError::Conflict(message())
    } else {
        RepositoryError::Database(error)
    }
}
