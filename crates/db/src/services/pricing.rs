use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tradein_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use tradein_core::domain::device::{CategoryId, DeviceId, DeviceKey, NewDevice};
use tradein_core::domain::grade::Grade;
use tradein_core::domain::price_list::{Category, GradePrices, PriceList, PriceListId};
use tradein_core::errors::ApplicationError;
use tradein_core::pricing::{complete_grades, plan_adjustment, PriceAdjustment, PricingResolver};

use super::catalog::CatalogService;
use crate::repositories::{RepositoryError, Repositories};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRequest {
    pub device_ids: Vec<DeviceId>,
    pub adjustments: Vec<PriceAdjustment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentReport {
    pub price_list_id: PriceListId,
    pub applied: usize,
    pub chunks: usize,
    pub skipped: Vec<DeviceId>,
}

/// One row of a price-list import: a device description and its grade prices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRow {
    pub make: String,
    pub model: String,
    #[serde(default)]
    pub storage: String,
    pub prices: GradePrices,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceListImport {
    pub id: PriceListId,
    pub name: String,
    pub category: CategoryId,
    pub effective_date: NaiveDate,
    pub currency: String,
    pub rows: Vec<PriceRow>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub price_list_id: PriceListId,
    pub entries: usize,
    pub devices_created: Vec<DeviceId>,
}

#[derive(Clone)]
pub struct PricingService {
    repos: Repositories,
    catalog: CatalogService,
    resolver: PricingResolver,
    chunk_size: usize,
    audit: Arc<dyn AuditSink>,
}

impl PricingService {
    pub fn new(
        repos: Repositories,
        catalog: CatalogService,
        resolver: PricingResolver,
        chunk_size: usize,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { repos, catalog, resolver, chunk_size: chunk_size.max(1), audit }
    }

    /// Applies the adjustment steps to the listed devices in sequential atomic
    /// chunks. A failed chunk stops the run; earlier chunks stay applied and
    /// their size is reported through `ApplicationError::Dependency`.
    pub async fn adjust(
        &self,
        price_list_id: &PriceListId,
        request: AdjustmentRequest,
        audit: &AuditContext,
    ) -> Result<AdjustmentReport, ApplicationError> {
        let list = self
            .repos
            .price_lists
            .find_by_id(price_list_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("price_list", price_list_id))?;
        let plan = plan_adjustment(
            &list,
            &request.device_ids,
            &request.adjustments,
            self.resolver.settings().rounding,
        )?;

        self.repos.price_lists.snapshot(price_list_id).await?;

        let chunks = plan.chunk_count(self.chunk_size);
        let mut applied = 0;
        for (index, chunk) in plan.chunks(self.chunk_size).enumerate() {
            if let Err(error) = self.repos.price_lists.apply_chunk(price_list_id, chunk).await {
                self.catalog.invalidate_category(&list.category);
                warn!(
                    event_name = "pricing.adjust_chunk_failed",
                    correlation_id = %audit.correlation_id,
                    price_list_id = %price_list_id,
                    chunk = index + 1,
                    chunks,
                    applied,
                    error = %error,
                    "bulk price adjustment stopped"
                );
                self.emit(audit, price_list_id, AuditOutcome::Failed, applied, plan.skipped.len());
                return Err(ApplicationError::Dependency { applied, message: error.to_string() });
            }
            applied += chunk.len();
        }
        self.catalog.invalidate_category(&list.category);

        self.emit(audit, price_list_id, AuditOutcome::Success, applied, plan.skipped.len());
        info!(
            event_name = "pricing.adjusted",
            correlation_id = %audit.correlation_id,
            price_list_id = %price_list_id,
            applied,
            chunks,
            skipped = plan.skipped.len(),
            "bulk price adjustment applied"
        );
        Ok(AdjustmentReport {
            price_list_id: price_list_id.clone(),
            applied,
            chunks,
            skipped: plan.skipped,
        })
    }

    /// Resolves every row against the catalog, creating unseen devices, fills
    /// missing grades from grade A and stores the list. Replacing an existing
    /// list snapshots its previous prices.
    pub async fn import(
        &self,
        import: PriceListImport,
        audit: &AuditContext,
    ) -> Result<ImportReport, ApplicationError> {
        if import.rows.is_empty() {
            return Err(ApplicationError::validation("rows", "a price list needs at least one row"));
        }
        if import.currency.trim().len() != 3 {
            return Err(ApplicationError::validation("currency", "expected a 3-letter code"));
        }

        let settings = *self.resolver.settings();
        let mut devices_created = Vec::new();
        let mut prices = std::collections::BTreeMap::new();
        for (index, row) in import.rows.iter().enumerate() {
            if !row.prices.contains_key(&Grade::A) {
                return Err(ApplicationError::validation(
                    format!("row {}", index + 1),
                    "grade A price is required",
                ));
            }
            if row.prices.values().any(|price| price.is_sign_negative()) {
                return Err(ApplicationError::validation(
                    format!("row {}", index + 1),
                    "prices must not be negative",
                ));
            }

            let key = DeviceKey::new(&import.category, &row.make, &row.model, &row.storage);
            let device = match self.repos.devices.find_by_key(&key).await? {
                Some(device) => device,
                None => {
                    let created = self.create_or_fetch(&import.category, row, &key).await?;
                    devices_created.push(created.id);
                    created
                }
            };
            prices.insert(device.id, complete_grades(&row.prices, &settings));
        }

        let now = Utc::now();
        let created_at = self
            .repos
            .price_lists
            .find_by_id(&import.id)
            .await?
            .map(|existing| existing.created_at)
            .unwrap_or(now);
        let entries = prices.len();
        self.repos
            .price_lists
            .save(PriceList {
                id: import.id.clone(),
                name: import.name,
                category: import.category.clone(),
                effective_date: import.effective_date,
                currency: import.currency.trim().to_ascii_uppercase(),
                prices,
                created_at,
                updated_at: now,
            })
            .await?;
        self.catalog.invalidate_category(&import.category);

        self.audit.emit(
            AuditEvent::new(audit, "pricing.list_imported", AuditCategory::Pricing, AuditOutcome::Success)
                .with_metadata("price_list_id", import.id.to_string())
                .with_metadata("entries", entries.to_string())
                .with_metadata("devices_created", devices_created.len().to_string()),
        );
        Ok(ImportReport { price_list_id: import.id, entries, devices_created })
    }

    /// Points the list's category at it; a category record is created on first use.
    pub async fn activate(
        &self,
        price_list_id: &PriceListId,
        audit: &AuditContext,
    ) -> Result<Category, ApplicationError> {
        let list = self
            .repos
            .price_lists
            .find_by_id(price_list_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("price_list", price_list_id))?;
        let mut category = self.repos.price_lists.find_category(&list.category).await?.unwrap_or(
            Category { id: list.category.clone(), name: list.category.0.clone(), active_price_list: None },
        );
        category.active_price_list = Some(list.id.clone());
        self.repos.price_lists.save_category(category.clone()).await?;
        self.catalog.invalidate_category(&category.id);

        self.audit.emit(
            AuditEvent::new(audit, "pricing.list_activated", AuditCategory::Pricing, AuditOutcome::Success)
                .with_metadata("price_list_id", list.id.to_string())
                .with_metadata("category", category.id.to_string()),
        );
        Ok(category)
    }

    async fn create_or_fetch(
        &self,
        category: &CategoryId,
        row: &PriceRow,
        key: &DeviceKey,
    ) -> Result<tradein_core::domain::device::Device, ApplicationError> {
        let new_device = NewDevice {
            make: row.make.trim().to_string(),
            model: row.model.trim().to_string(),
            storage: row.storage.trim().to_string(),
            category: category.clone(),
        };
        match self.repos.devices.create(new_device).await {
            Ok(device) => Ok(device),
            // A concurrent import created the same device first.
            Err(RepositoryError::Conflict(message)) => self
                .repos
                .devices
                .find_by_key(key)
                .await?
                .ok_or_else(|| ApplicationError::conflict(message)),
            Err(other) => Err(other.into()),
        }
    }

    fn emit(
        &self,
        audit: &AuditContext,
        price_list_id: &PriceListId,
        outcome: AuditOutcome,
        applied: usize,
        skipped: usize,
    ) {
        self.audit.emit(
            AuditEvent::new(audit, "pricing.adjusted", AuditCategory::Pricing, outcome)
                .with_metadata("price_list_id", price_list_id.to_string())
                .with_metadata("applied", applied.to_string())
                .with_metadata("skipped", skipped.to_string()),
        );
    }
}
