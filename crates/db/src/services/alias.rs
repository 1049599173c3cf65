use std::sync::Arc;

use tracing::info;

use tradein_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use tradein_core::domain::alias::{AliasSource, DeviceAlias};
use tradein_core::domain::bulk_quote::{
    BulkQuoteDetail, BulkQuoteId, BulkQuoteStatus, BulkTotals, MatchConfidence,
};
use tradein_core::domain::device::DeviceId;
use tradein_core::domain::principal::Principal;
use tradein_core::errors::ApplicationError;
use tradein_core::estimate::{price_line, split_inline_quantity};
use tradein_core::flows::EntityKind;
use tradein_core::matcher::normalize;
use tradein_core::pricing::PricingResolver;

use super::catalog::CatalogService;
use super::estimate::rate_context_for;
use crate::repositories::Repositories;

/// Turns accepted or corrected matches into aliases so the same text resolves
/// at `high` confidence next time.
#[derive(Clone)]
pub struct AliasService {
    repos: Repositories,
    catalog: CatalogService,
    resolver: PricingResolver,
    audit: Arc<dyn AuditSink>,
}

impl AliasService {
    pub fn new(
        repos: Repositories,
        catalog: CatalogService,
        resolver: PricingResolver,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { repos, catalog, resolver, audit }
    }

    pub async fn record_alias(
        &self,
        raw_text: &str,
        device_id: DeviceId,
        principal: &Principal,
        correlation_id: &str,
    ) -> Result<DeviceAlias, ApplicationError> {
        if normalize(raw_text).is_empty() {
            return Err(ApplicationError::validation("alias", "alias text is empty after normalization"));
        }
        self.repos
            .devices
            .find_by_id(device_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("device", device_id))?;

        let source = if principal.admin { AliasSource::Admin } else { AliasSource::Auto };
        let alias = DeviceAlias::new(raw_text, device_id, source);
        self.repos.aliases.append(alias.clone()).await?;
        self.catalog.invalidate();

        self.audit.emit(
            AuditEvent::new(
                &principal.audit_context(correlation_id),
                "alias.recorded",
                AuditCategory::Matching,
                AuditOutcome::Success,
            )
            .with_metadata("alias", alias.alias.clone())
            .with_metadata("device_id", device_id.to_string())
            .with_metadata("created_by", source.as_str()),
        );
        info!(
            event_name = "alias.recorded",
            correlation_id = %correlation_id,
            alias = %alias.alias,
            device_id = %device_id,
            "device alias appended"
        );
        Ok(alias)
    }

    /// Confirms or overrides the device of one line. The line becomes `high`,
    /// is re-priced, the quote totals are recomputed and the line text is
    /// learned as an alias.
    pub async fn correct_line(
        &self,
        id: &BulkQuoteId,
        line_no: u32,
        device_id: DeviceId,
        principal: &Principal,
        correlation_id: &str,
    ) -> Result<BulkQuoteDetail, ApplicationError> {
        let mut detail = self
            .repos
            .bulk_quotes
            .find_detail(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("bulk_quote", id))?;
        if matches!(detail.quote.status, BulkQuoteStatus::Paid | BulkQuoteStatus::Cancelled) {
            return Err(ApplicationError::conflict(format!(
                "bulk quote `{id}` is {} and its lines are final",
                detail.quote.status
            )));
        }

        let device = self
            .repos
            .devices
            .find_by_id(device_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("device", device_id))?;
        if device.category != detail.quote.category {
            return Err(ApplicationError::validation(
                "device_id",
                format!("device {device_id} is not in category {}", detail.quote.category),
            ));
        }

        let snapshot = self.catalog.snapshot(&detail.quote.category).await?;
        let rate_context = rate_context_for(&self.repos, detail.quote.partner.as_ref()).await?;

        let line = detail
            .lines
            .iter_mut()
            .find(|line| line.line_no == line_no)
            .ok_or_else(|| ApplicationError::not_found("device_line", format!("{id}#{line_no}")))?;
        line.device_id = Some(device_id);
        line.confidence = MatchConfidence::High;
        price_line(line, &self.resolver, &snapshot.price_list, rate_context);
        let corrected = line.clone();

        let totals = BulkTotals::from_lines(&detail.lines);
        self.repos.bulk_quotes.update_line(id, corrected.clone(), totals.clone()).await?;
        detail.quote.totals = totals;

        let (device_text, _) = split_inline_quantity(&corrected.raw_input);
        self.record_alias(&device_text, device_id, principal, correlation_id).await?;

        self.audit.emit(
            AuditEvent::new(
                &principal.audit_context(correlation_id),
                "estimate.line_corrected",
                AuditCategory::Matching,
                AuditOutcome::Success,
            )
            .for_entity(EntityKind::BulkQuote, id.to_string())
            .with_metadata("line_no", line_no.to_string())
            .with_metadata("device_id", device_id.to_string()),
        );
        Ok(detail)
    }

    /// Admin removal of every alias stored under the normalized text.
    pub async fn delete_alias(
        &self,
        raw_text: &str,
        principal: &Principal,
        correlation_id: &str,
    ) -> Result<u64, ApplicationError> {
        if !principal.admin {
            return Err(ApplicationError::forbidden("alias deletion"));
        }
        let key = normalize(raw_text);
        let removed = self.repos.aliases.delete(&key).await?;
        self.catalog.invalidate();
        info!(
            event_name = "alias.deleted",
            correlation_id = %correlation_id,
            alias = %key,
            removed,
            "device aliases removed"
        );
        Ok(removed)
    }
}
