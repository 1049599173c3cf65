//! Application services composed over the repository bundle.

use std::sync::Arc;

use tradein_core::audit::{AuditSink, TracingAuditSink};
use tradein_core::cache::CatalogCache;
use tradein_core::config::AppConfig;
use tradein_core::errors::ApplicationError;
use tradein_core::matcher::DeviceMatcher;
use tradein_core::pricing::PricingResolver;

use crate::repositories::Repositories;

pub mod alias;
pub mod catalog;
pub mod commission;
pub mod estimate;
pub mod lifecycle;
pub mod notifier;
pub mod pricing;

pub use alias::AliasService;
pub use catalog::CatalogService;
pub use commission::CommissionService;
pub use estimate::{EstimateService, EstimateSubmission, QuoteRequest};
pub use lifecycle::{LifecycleService, TransitionReport};
pub use notifier::{NotifyError, PaidNotice, PaidNotifier, RecordingNotifier, TracingNotifier};
pub use pricing::{
    AdjustmentReport, AdjustmentRequest, ImportReport, PriceListImport, PriceRow, PricingService,
};

#[derive(Clone)]
pub struct AppServices {
    pub repos: Repositories,
    pub catalog: CatalogService,
    pub estimates: EstimateService,
    pub aliases: AliasService,
    pub pricing: PricingService,
    pub lifecycle: LifecycleService,
    pub commissions: CommissionService,
}

impl AppServices {
    pub fn new(repos: Repositories, config: &AppConfig) -> Result<Self, ApplicationError> {
        Self::with_collaborators(
            repos,
            config,
            Arc::new(TracingAuditSink),
            Arc::new(TracingNotifier),
        )
    }

    pub fn with_collaborators(
        repos: Repositories,
        config: &AppConfig,
        audit: Arc<dyn AuditSink>,
        notifier: Arc<dyn PaidNotifier>,
    ) -> Result<Self, ApplicationError> {
        let settings = config
            .pricing
            .settings()
            .map_err(|error| ApplicationError::Configuration(error.to_string()))?;
        let resolver = PricingResolver::new(settings);
        let matcher = DeviceMatcher::new(config.matching.thresholds());
        let catalog = CatalogService::new(repos.clone(), Arc::new(CatalogCache::new(config.cache.ttl())));
        let commissions = CommissionService::new(repos.clone(), Arc::clone(&audit));

        Ok(Self {
            estimates: EstimateService::new(
                repos.clone(),
                catalog.clone(),
                matcher,
                resolver,
                Arc::clone(&audit),
            ),
            aliases: AliasService::new(repos.clone(), catalog.clone(), resolver, Arc::clone(&audit)),
            pricing: PricingService::new(
                repos.clone(),
                catalog.clone(),
                resolver,
                config.pricing.batch_chunk_size,
                Arc::clone(&audit),
            ),
            lifecycle: LifecycleService::new(repos.clone(), commissions.clone(), notifier, audit),
            commissions,
            catalog,
            repos,
        })
    }
}
