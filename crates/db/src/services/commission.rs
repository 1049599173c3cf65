use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use tradein_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use tradein_core::commission::{accrual_amount, summarize_balance, CommissionBasis};
use tradein_core::domain::bulk_quote::BulkQuoteDetail;
use tradein_core::domain::commission::{
    CommissionLedgerEntry, LedgerEntryId, LedgerEntryStatus, PartnerBalance, Payout, SourceKind,
};
use tradein_core::domain::partner::{PartnerAttribution, PartnerId};
use tradein_core::domain::quote::Quote;
use tradein_core::errors::ApplicationError;

use crate::repositories::Repositories;

/// Accrues partner commission for paid sources and settles payouts against
/// the ledger.
#[derive(Clone)]
pub struct CommissionService {
    repos: Repositories,
    audit: Arc<dyn AuditSink>,
}

impl CommissionService {
    pub fn new(repos: Repositories, audit: Arc<dyn AuditSink>) -> Self {
        Self { repos, audit }
    }

    pub async fn accrue_for_quote(
        &self,
        quote: &Quote,
        audit: &AuditContext,
    ) -> Result<Option<CommissionLedgerEntry>, ApplicationError> {
        let Some(attribution) = quote.partner.as_ref() else {
            return Ok(None);
        };
        let basis = CommissionBasis::Quote { price: quote.price };
        self.accrue(attribution, SourceKind::Quote, &quote.id.0, basis, audit).await
    }

    /// Bulk commission is computed from the settled value of matched lines,
    /// using inspected prices where they exist.
    pub async fn accrue_for_bulk(
        &self,
        detail: &BulkQuoteDetail,
        audit: &AuditContext,
    ) -> Result<Option<CommissionLedgerEntry>, ApplicationError> {
        let Some(attribution) = detail.quote.partner.as_ref() else {
            return Ok(None);
        };
        let basis = CommissionBasis::BulkQuote {
            settled_value: detail.settled_value(),
            matched_devices: detail.quote.totals.matched_devices,
        };
        self.accrue(attribution, SourceKind::BulkQuote, &detail.quote.id.0, basis, audit).await
    }

    async fn accrue(
        &self,
        attribution: &PartnerAttribution,
        source_kind: SourceKind,
        source_id: &str,
        basis: CommissionBasis,
        audit: &AuditContext,
    ) -> Result<Option<CommissionLedgerEntry>, ApplicationError> {
        let partner = self
            .repos
            .partners
            .find_by_id(&attribution.partner_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("partner", &attribution.partner_id))?;
        let Some(amount) = accrual_amount(&partner, attribution, &basis) else {
            return Ok(None);
        };

        let entry = CommissionLedgerEntry {
            id: LedgerEntryId::generate(),
            partner_id: partner.id.clone(),
            source_kind,
            source_id: source_id.to_string(),
            amount,
            status: LedgerEntryStatus::Pending,
            payout_id: None,
            created_at: Utc::now(),
            paid_at: None,
        };
        let (stored, inserted) = self.repos.ledger.insert_if_absent(entry).await?;
        if inserted {
            self.audit.emit(
                AuditEvent::new(audit, "commission.accrued", AuditCategory::Commission, AuditOutcome::Success)
                    .with_metadata("partner_id", partner.id.to_string())
                    .with_metadata("source", format!("{}:{source_id}", source_kind.as_str()))
                    .with_metadata("amount", stored.amount.to_string()),
            );
            info!(
                event_name = "commission.accrued",
                correlation_id = %audit.correlation_id,
                partner_id = %partner.id,
                source_kind = source_kind.as_str(),
                source_id = %source_id,
                amount = %stored.amount,
                "commission ledger entry created"
            );
        }
        Ok(Some(stored))
    }

    pub async fn balance(&self, partner_id: &PartnerId) -> Result<PartnerBalance, ApplicationError> {
        self.repos
            .partners
            .find_by_id(partner_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("partner", partner_id))?;
        let entries = self.repos.ledger.list_for_partner(partner_id).await?;
        Ok(summarize_balance(partner_id, &entries))
    }

    pub async fn entries(
        &self,
        partner_id: &PartnerId,
    ) -> Result<Vec<CommissionLedgerEntry>, ApplicationError> {
        Ok(self.repos.ledger.list_for_partner(partner_id).await?)
    }

    pub async fn payouts(&self, partner_id: &PartnerId) -> Result<Vec<Payout>, ApplicationError> {
        Ok(self.repos.ledger.list_payouts(partner_id).await?)
    }

    /// Settles the listed pending entries as one payout. Either every entry
    /// moves to `paid` or none does.
    pub async fn settle(
        &self,
        partner_id: &PartnerId,
        entry_ids: &[LedgerEntryId],
        reference: &str,
        audit: &AuditContext,
    ) -> Result<Payout, ApplicationError> {
        if reference.trim().is_empty() {
            return Err(ApplicationError::validation("reference", "payout reference is required"));
        }
        if entry_ids.is_empty() {
            return Err(ApplicationError::validation(
                "entry_ids",
                "a payout must settle at least one entry",
            ));
        }

        let result = self.repos.ledger.settle(partner_id, entry_ids, reference.trim()).await;
        let payout = match result {
            Ok(payout) => payout,
            Err(error) => {
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "commission.payout_settled",
                        AuditCategory::Commission,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("partner_id", partner_id.to_string())
                    .with_metadata("reason", error.to_string()),
                );
                return Err(error.into());
            }
        };

        self.audit.emit(
            AuditEvent::new(audit, "commission.payout_settled", AuditCategory::Commission, AuditOutcome::Success)
                .with_metadata("partner_id", partner_id.to_string())
                .with_metadata("payout_id", payout.id.to_string())
                .with_metadata("entries", payout.entry_ids.len().to_string())
                .with_metadata("amount", payout.amount.to_string()),
        );
        info!(
            event_name = "commission.payout_settled",
            correlation_id = %audit.correlation_id,
            partner_id = %partner_id,
            payout_id = %payout.id,
            amount = %payout.amount,
            "partner payout recorded"
        );
        Ok(payout)
    }
}
