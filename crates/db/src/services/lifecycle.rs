use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use tradein_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use tradein_core::domain::bulk_quote::{BulkQuote, BulkQuoteId, BulkQuoteStatus};
use tradein_core::domain::order::{Order, OrderId, OrderStatus};
use tradein_core::domain::quote::{Quote, QuoteId, QuoteStatus};
use tradein_core::errors::{ApplicationError, SideEffectFailure};
use tradein_core::flows::{
    LifecycleEffect, LifecycleEngine, LifecycleEntity, TransitionOutcome, TransitionPayload,
};

use super::commission::CommissionService;
use super::notifier::{PaidNotice, PaidNotifier};
use crate::repositories::{LifecycleStore, Repositories, RepositoryError};

/// Result of a committed transition. Derivative effects that failed after the
/// commit are listed in `side_effect_failures`; the status change stands.
#[derive(Clone, Debug, Serialize)]
#[serde(bound(serialize = "E: Serialize, E::Status: Serialize"))]
pub struct TransitionReport<E: LifecycleEntity> {
    pub entity: E,
    pub from: E::Status,
    pub to: E::Status,
    pub effects: Vec<LifecycleEffect>,
    pub side_effect_failures: Vec<SideEffectFailure>,
}

impl<E: LifecycleEntity> TransitionReport<E> {
    fn committed(entity: E, outcome: TransitionOutcome<E::Status>) -> Self {
        Self {
            entity,
            from: outcome.from,
            to: outcome.to,
            effects: outcome.effects,
            side_effect_failures: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct LifecycleService {
    repos: Repositories,
    commissions: CommissionService,
    notifier: Arc<dyn PaidNotifier>,
    audit: Arc<dyn AuditSink>,
}

impl LifecycleService {
    pub fn new(
        repos: Repositories,
        commissions: CommissionService,
        notifier: Arc<dyn PaidNotifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { repos, commissions, notifier, audit }
    }

    pub async fn transition_quote(
        &self,
        id: &QuoteId,
        requested: QuoteStatus,
        payload: &TransitionPayload,
        audit: &AuditContext,
    ) -> Result<TransitionReport<Quote>, ApplicationError> {
        let (quote, outcome) =
            self.commit(self.repos.quotes.as_ref(), &id.0, requested, payload, audit).await?;
        let mut report = TransitionReport::committed(quote, outcome);

        if report.effects.contains(&LifecycleEffect::AccrueCommission) {
            if let Err(error) = self.commissions.accrue_for_quote(&report.entity, audit).await {
                report
                    .side_effect_failures
                    .push(self.side_effect_failed("accrue_commission", &report.entity, error, audit));
            }
        }
        if report.effects.contains(&LifecycleEffect::NotifyPaid) {
            let notice = PaidNotice {
                entity: Quote::table().entity,
                entity_id: id.to_string(),
                amount: report.entity.price,
                currency: report.entity.currency.clone(),
                correlation_id: audit.correlation_id.clone(),
            };
            if let Err(error) = self.notifier.notify_paid(&notice).await {
                report
                    .side_effect_failures
                    .push(self.side_effect_failed("notify_paid", &report.entity, error, audit));
            }
        }
        Ok(report)
    }

    pub async fn transition_bulk_quote(
        &self,
        id: &BulkQuoteId,
        requested: BulkQuoteStatus,
        payload: &TransitionPayload,
        audit: &AuditContext,
    ) -> Result<TransitionReport<BulkQuote>, ApplicationError> {
        let (quote, outcome) =
            self.commit(self.repos.bulk_quotes.as_ref(), &id.0, requested, payload, audit).await?;
        let mut report = TransitionReport::committed(quote, outcome);

        let paid_effects = [LifecycleEffect::AccrueCommission, LifecycleEffect::NotifyPaid];
        if !paid_effects.iter().any(|effect| report.effects.contains(effect)) {
            return Ok(report);
        }

        let detail = match self.repos.bulk_quotes.find_detail(id).await {
            Ok(Some(detail)) => detail,
            Ok(None) => {
                let error = RepositoryError::NotFound { entity: "bulk_quote", id: id.to_string() };
                report
                    .side_effect_failures
                    .push(self.side_effect_failed("load_detail", &report.entity, error, audit));
                return Ok(report);
            }
            Err(error) => {
                report
                    .side_effect_failures
                    .push(self.side_effect_failed("load_detail", &report.entity, error, audit));
                return Ok(report);
            }
        };

        if report.effects.contains(&LifecycleEffect::AccrueCommission) {
            if let Err(error) = self.commissions.accrue_for_bulk(&detail, audit).await {
                report
                    .side_effect_failures
                    .push(self.side_effect_failed("accrue_commission", &report.entity, error, audit));
            }
        }
        if report.effects.contains(&LifecycleEffect::NotifyPaid) {
            let notice = PaidNotice {
                entity: BulkQuote::table().entity,
                entity_id: id.to_string(),
                amount: detail.settled_value(),
                currency: report.entity.currency.clone(),
                correlation_id: audit.correlation_id.clone(),
            };
            if let Err(error) = self.notifier.notify_paid(&notice).await {
                report
                    .side_effect_failures
                    .push(self.side_effect_failed("notify_paid", &report.entity, error, audit));
            }
        }
        Ok(report)
    }

    /// Cancelling an order relists its inventory in the same commit as the
    /// status change.
    pub async fn transition_order(
        &self,
        id: &OrderId,
        requested: OrderStatus,
        payload: &TransitionPayload,
        audit: &AuditContext,
    ) -> Result<TransitionReport<Order>, ApplicationError> {
        let (order, outcome) =
            self.commit(self.repos.orders.as_ref(), &id.0, requested, payload, audit).await?;
        Ok(TransitionReport::committed(order, outcome))
    }

    async fn commit<E, R>(
        &self,
        store: &R,
        id: &str,
        requested: E::Status,
        payload: &TransitionPayload,
        audit: &AuditContext,
    ) -> Result<(E, TransitionOutcome<E::Status>), ApplicationError>
    where
        E: LifecycleEntity,
        R: LifecycleStore<E> + ?Sized,
    {
        let engine = LifecycleEngine::<E::Status>::for_entity::<E>();
        let kind = engine.entity();
        let mut entity =
            store.load(id).await?.ok_or_else(|| ApplicationError::not_found(kind.as_str(), id))?;

        let outcome = engine.apply_with_audit(
            id,
            entity.status(),
            requested,
            payload,
            self.audit.as_ref(),
            audit,
        )?;
        entity.apply_outcome(&outcome, Utc::now());

        let relist = if outcome.effects.contains(&LifecycleEffect::RelistInventory) {
            entity.inventory_items().to_vec()
        } else {
            Vec::new()
        };

        if let Err(error) = store.commit_transition(&entity, outcome.from, &relist).await {
            let rejected = matches!(error, RepositoryError::StaleStatus { .. });
            self.audit.emit(
                AuditEvent::new(
                    audit,
                    "lifecycle.transition_committed",
                    AuditCategory::Lifecycle,
                    if rejected { AuditOutcome::Rejected } else { AuditOutcome::Failed },
                )
                .for_entity(kind, id)
                .with_metadata("from", outcome.from.to_string())
                .with_metadata("to", outcome.to.to_string())
                .with_metadata("reason", error.to_string()),
            );
            warn!(
                event_name = "lifecycle.commit_rejected",
                correlation_id = %audit.correlation_id,
                entity = kind.as_str(),
                entity_id = %id,
                error = %error,
                "status change was not committed"
            );
            return Err(error.into());
        }

        self.audit.emit(
            AuditEvent::new(
                audit,
                "lifecycle.transition_committed",
                AuditCategory::Lifecycle,
                AuditOutcome::Success,
            )
            .for_entity(kind, id)
            .with_metadata("from", outcome.from.to_string())
            .with_metadata("to", outcome.to.to_string())
            .with_metadata("relisted", relist.len().to_string()),
        );
        info!(
            event_name = "lifecycle.transition_committed",
            correlation_id = %audit.correlation_id,
            entity = kind.as_str(),
            entity_id = %id,
            from = %outcome.from,
            to = %outcome.to,
            "status change committed"
        );
        Ok((entity, outcome))
    }

    fn side_effect_failed<E: LifecycleEntity>(
        &self,
        effect: &'static str,
        entity: &E,
        error: impl ToString,
        audit: &AuditContext,
    ) -> SideEffectFailure {
        let failure = SideEffectFailure {
            effect,
            entity: E::table().entity.as_str(),
            entity_id: entity.entity_id(),
            message: error.to_string(),
        };
        self.audit.emit(
            AuditEvent::new(audit, "lifecycle.side_effect_failed", AuditCategory::Lifecycle, AuditOutcome::Failed)
                .for_entity(E::table().entity, failure.entity_id.clone())
                .with_metadata("effect", effect)
                .with_metadata("reason", failure.message.clone()),
        );
        warn!(
            event_name = "lifecycle.side_effect_failed",
            correlation_id = %audit.correlation_id,
            effect,
            entity = failure.entity,
            entity_id = %failure.entity_id,
            error = %failure.message,
            "post-commit effect failed; status change stands"
        );
        failure
    }
}
