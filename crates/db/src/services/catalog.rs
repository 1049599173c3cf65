use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use tradein_core::cache::{CatalogCache, CatalogSnapshot};
use tradein_core::domain::alias::AliasIndex;
use tradein_core::domain::device::{CategoryId, Device, NewDevice};
use tradein_core::errors::ApplicationError;
use tradein_core::matcher::MatchCandidate;

use crate::repositories::Repositories;

/// Read path for per-category catalog data, fronted by the injected cache.
#[derive(Clone)]
pub struct CatalogService {
    repos: Repositories,
    cache: Arc<CatalogCache>,
}

impl CatalogService {
    pub fn new(repos: Repositories, cache: Arc<CatalogCache>) -> Self {
        Self { repos, cache }
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    pub async fn snapshot(&self, category: &CategoryId) -> Result<Arc<CatalogSnapshot>, ApplicationError> {
        if let Some(cached) = self.cache.get(category) {
            debug!(event_name = "catalog.cache_hit", category = %category, "catalog snapshot served from cache");
            return Ok(cached);
        }

        let generation = self.cache.generation();
        let record = self
            .repos
            .price_lists
            .find_category(category)
            .await?
            .ok_or_else(|| ApplicationError::not_found("category", category))?;
        let active = record.active_price_list.ok_or_else(|| {
            ApplicationError::not_found("price_list", format!("active list of category {category}"))
        })?;
        let price_list = self
            .repos
            .price_lists
            .find_by_id(&active)
            .await?
            .ok_or_else(|| ApplicationError::not_found("price_list", &active))?;

        let devices = self.repos.devices.list_by_category(category).await?;
        let device_ids: BTreeSet<_> = devices.iter().map(|device| device.id).collect();
        let aliases = AliasIndex::from_aliases(
            self.repos
                .aliases
                .list_all()
                .await?
                .into_iter()
                .filter(|alias| device_ids.contains(&alias.device_id)),
        );
        let candidates = devices.iter().map(MatchCandidate::from_device).collect();

        info!(
            event_name = "catalog.snapshot_loaded",
            category = %category,
            price_list_id = %price_list.id,
            devices = device_ids.len(),
            aliases = aliases.len(),
            "catalog snapshot loaded"
        );
        Ok(self.cache.insert(
            category.clone(),
            CatalogSnapshot { candidates, aliases, price_list },
            generation,
        ))
    }

    pub async fn register_device(&self, device: NewDevice) -> Result<Device, ApplicationError> {
        if device.make.trim().is_empty() || device.model.trim().is_empty() {
            return Err(ApplicationError::validation("device", "make and model are required"));
        }
        let created = self.repos.devices.create(device).await?;
        self.cache.invalidate_category(&created.category);
        Ok(created)
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub fn invalidate_category(&self, category: &CategoryId) {
        self.cache.invalidate_category(category);
    }
}
