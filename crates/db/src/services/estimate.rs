use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tradein_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use tradein_core::domain::bulk_quote::{
    BulkQuote, BulkQuoteDetail, BulkQuoteId, BulkQuoteStatus, BulkTotals, BusinessContact,
};
use tradein_core::domain::device::{CategoryId, DeviceId};
use tradein_core::domain::grade::Grade;
use tradein_core::domain::partner::{PartnerAttribution, PartnerMode};
use tradein_core::domain::principal::Principal;
use tradein_core::domain::quote::Quote;
use tradein_core::errors::ApplicationError;
use tradein_core::estimate::{build_estimate, EstimateContext, ManifestRow, RateContext};
use tradein_core::flows::{EntityKind, StatusTimestamps};
use tradein_core::matcher::DeviceMatcher;
use tradein_core::pricing::PricingResolver;

use super::catalog::CatalogService;
use crate::repositories::Repositories;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimateSubmission {
    pub contact: BusinessContact,
    pub category: CategoryId,
    pub assumed_grade: Grade,
    pub rows: Vec<ManifestRow>,
    /// Code of the partner who referred the business, if any.
    #[serde(default)]
    pub referral_code: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub device_id: DeviceId,
    pub category: CategoryId,
    pub grade: Grade,
    #[serde(default)]
    pub referral_code: Option<String>,
}

#[derive(Clone)]
pub struct EstimateService {
    repos: Repositories,
    catalog: CatalogService,
    matcher: DeviceMatcher,
    resolver: PricingResolver,
    audit: Arc<dyn AuditSink>,
}

impl EstimateService {
    pub fn new(
        repos: Repositories,
        catalog: CatalogService,
        matcher: DeviceMatcher,
        resolver: PricingResolver,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { repos, catalog, matcher, resolver, audit }
    }

    /// Matches, prices and persists a manifest as a new bulk quote.
    pub async fn submit(
        &self,
        submission: EstimateSubmission,
        principal: &Principal,
        correlation_id: &str,
    ) -> Result<BulkQuoteDetail, ApplicationError> {
        let (partner, rate_context) =
            resolve_attribution(&self.repos, principal, submission.referral_code.as_deref()).await?;
        let snapshot = self.catalog.snapshot(&submission.category).await?;

        let context = EstimateContext {
            matcher: &self.matcher,
            candidates: &snapshot.candidates,
            aliases: &snapshot.aliases,
            resolver: &self.resolver,
            price_list: &snapshot.price_list,
        };
        let estimate =
            build_estimate(&submission.rows, submission.assumed_grade, rate_context, &context)?;

        let now = Utc::now();
        let detail = BulkQuoteDetail {
            quote: BulkQuote {
                id: BulkQuoteId::generate(),
                contact: submission.contact,
                category: submission.category,
                assumed_grade: submission.assumed_grade,
                currency: estimate.currency,
                totals: estimate.totals,
                status: BulkQuoteStatus::Estimated,
                partner,
                shipping: None,
                timestamps: StatusTimestamps::default(),
                created_at: now,
                updated_at: now,
            },
            lines: estimate.lines,
        };
        self.repos.bulk_quotes.insert_detail(detail.clone()).await?;

        let totals = &detail.quote.totals;
        self.audit.emit(
            AuditEvent::new(
                &principal.audit_context(correlation_id),
                "estimate.created",
                AuditCategory::Estimate,
                AuditOutcome::Success,
            )
            .for_entity(EntityKind::BulkQuote, detail.quote.id.to_string())
            .with_metadata("lines", detail.lines.len().to_string())
            .with_metadata("matched", totals.matched_count.to_string())
            .with_metadata("unpriced", totals.unpriced_count.to_string())
            .with_metadata("total_indicative", totals.total_indicative.to_string()),
        );
        if totals.unpriced_count > 0 {
            warn!(
                event_name = "estimate.unpriced_lines",
                correlation_id = %correlation_id,
                bulk_quote_id = %detail.quote.id,
                unpriced = totals.unpriced_count,
                "matched devices have no price in the active list"
            );
        }
        info!(
            event_name = "estimate.submitted",
            correlation_id = %correlation_id,
            bulk_quote_id = %detail.quote.id,
            total_devices = totals.total_devices,
            matched = totals.matched_count,
            unmatched = totals.unmatched_count,
            "bulk estimate persisted"
        );
        Ok(detail)
    }

    pub async fn get(&self, id: &BulkQuoteId) -> Result<BulkQuoteDetail, ApplicationError> {
        self.repos
            .bulk_quotes
            .find_detail(id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("bulk_quote", id))
    }

    /// Prices one device from the category's active list and stores a quote.
    pub async fn quote_device(
        &self,
        request: QuoteRequest,
        principal: &Principal,
        correlation_id: &str,
    ) -> Result<Quote, ApplicationError> {
        let (partner, rate_context) =
            resolve_attribution(&self.repos, principal, request.referral_code.as_deref()).await?;
        let snapshot = self.catalog.snapshot(&request.category).await?;
        let listed = self.resolver.price_for(request.device_id, request.grade, &snapshot.price_list)?;
        let price = rate_context.apply(listed, self.resolver.settings().rounding);

        let mut quote = Quote::new(request.device_id, request.grade, price, &snapshot.price_list.currency);
        quote.partner = partner;
        self.repos.quotes.insert(quote.clone()).await?;

        self.audit.emit(
            AuditEvent::new(
                &principal.audit_context(correlation_id),
                "quote.created",
                AuditCategory::Estimate,
                AuditOutcome::Success,
            )
            .for_entity(EntityKind::Quote, quote.id.to_string())
            .with_metadata("price", quote.price.to_string()),
        );
        Ok(quote)
    }

    /// Records the inspected grade of one line. The actual price defaults to
    /// the list price for that grade under the quote's rate context.
    pub async fn record_inspection(
        &self,
        id: &BulkQuoteId,
        line_no: u32,
        actual_grade: Grade,
        actual_price: Option<Decimal>,
        audit: &AuditContext,
    ) -> Result<BulkQuoteDetail, ApplicationError> {
        let mut detail = self.get(id).await?;
        if matches!(detail.quote.status, BulkQuoteStatus::Paid | BulkQuoteStatus::Cancelled) {
            return Err(ApplicationError::conflict(format!(
                "bulk quote `{id}` is {} and can no longer be inspected",
                detail.quote.status
            )));
        }
        let line = detail
            .lines
            .iter_mut()
            .find(|line| line.line_no == line_no)
            .ok_or_else(|| ApplicationError::not_found("device_line", format!("{id}#{line_no}")))?;
        let device_id = line.device_id.ok_or_else(|| {
            ApplicationError::validation(format!("line {line_no}"), "line has no matched device")
        })?;

        let price = match actual_price {
            Some(price) if price < Decimal::ZERO => {
                return Err(ApplicationError::validation("actual_price", "must not be negative"));
            }
            Some(price) => price,
            None => {
                let snapshot = self.catalog.snapshot(&detail.quote.category).await?;
                let rate_context = rate_context_for(&self.repos, detail.quote.partner.as_ref()).await?;
                let listed = self.resolver.price_for(device_id, actual_grade, &snapshot.price_list)?;
                rate_context.apply(listed, self.resolver.settings().rounding)
            }
        };
        line.actual_grade = Some(actual_grade);
        line.actual_price = Some(price);
        let updated = line.clone();

        let totals = BulkTotals::from_lines(&detail.lines);
        self.repos.bulk_quotes.update_line(id, updated, totals.clone()).await?;
        detail.quote.totals = totals;

        self.audit.emit(
            AuditEvent::new(audit, "estimate.line_inspected", AuditCategory::Estimate, AuditOutcome::Success)
                .for_entity(EntityKind::BulkQuote, id.to_string())
                .with_metadata("line_no", line_no.to_string())
                .with_metadata("actual_grade", actual_grade.to_string())
                .with_metadata("actual_price", price.to_string()),
        );
        Ok(detail)
    }
}

/// A mode B principal transacts at its discounted rate; otherwise a referral
/// code attributes the submission to a mode A partner at the direct rate.
pub(crate) async fn resolve_attribution(
    repos: &Repositories,
    principal: &Principal,
    referral_code: Option<&str>,
) -> Result<(Option<PartnerAttribution>, RateContext), ApplicationError> {
    if let Some(partner_id) = principal.partner_id.as_ref() {
        let partner = repos
            .partners
            .find_by_id(partner_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("partner", partner_id))?;
        if partner.supports(PartnerMode::B) {
            let attribution = PartnerAttribution { partner_id: partner.id, mode: PartnerMode::B };
            let rate = RateContext::PartnerDiscount { percent: partner.rate_discount_percent };
            return Ok((Some(attribution), rate));
        }
    }

    let Some(code) = referral_code.map(str::trim).filter(|code| !code.is_empty()) else {
        return Ok((None, RateContext::Direct));
    };
    let partner = repos.partners.find_by_code(code).await?.ok_or_else(|| {
        ApplicationError::validation("referral_code", format!("unknown partner code `{code}`"))
    })?;
    if !partner.supports(PartnerMode::A) {
        return Err(ApplicationError::validation(
            "referral_code",
            format!("partner `{code}` does not take referrals"),
        ));
    }
    Ok((Some(PartnerAttribution { partner_id: partner.id, mode: PartnerMode::A }), RateContext::Direct))
}

pub(crate) async fn rate_context_for(
    repos: &Repositories,
    attribution: Option<&PartnerAttribution>,
) -> Result<RateContext, ApplicationError> {
    let Some(attribution) = attribution.filter(|attribution| attribution.mode == PartnerMode::B) else {
        return Ok(RateContext::Direct);
    };
    let partner = repos
        .partners
        .find_by_id(&attribution.partner_id)
        .await?
        .ok_or_else(|| ApplicationError::not_found("partner", &attribution.partner_id))?;
    Ok(RateContext::PartnerDiscount { percent: partner.rate_discount_percent })
}
