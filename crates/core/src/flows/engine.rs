use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::order::InventoryItemId;
use crate::flows::states::{
    EntityKind, LifecycleEffect, Requirement, TimestampField, TransitionOutcome,
    TransitionPayload,
};

/// Status enum of a lifecycle-managed entity.
pub trait LifecycleStatus:
    Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    fn timestamp_field(&self) -> Option<TimestampField>;
}

/// Static description of one entity's state machine.
///
/// `edges` lists the allowed destinations per status; a status missing from
/// `edges` is terminal. `locked` statuses reject every request with a reason.
/// `requirements` and `effects` are keyed by destination status.
pub struct TransitionTable<S: 'static> {
    pub entity: EntityKind,
    pub edges: &'static [(S, &'static [S])],
    pub locked: &'static [(S, &'static str)],
    pub requirements: &'static [(S, Requirement)],
    pub effects: &'static [(S, &'static [LifecycleEffect])],
}

impl<S> TransitionTable<S>
where
    S: LifecycleStatus,
{
    pub fn allowed(&self, from: S) -> &'static [S] {
        self.edges.iter().find(|(status, _)| *status == from).map(|(_, next)| *next).unwrap_or(&[])
    }

    pub fn is_terminal(&self, status: S) -> bool {
        self.allowed(status).is_empty()
    }

    fn lock_reason(&self, status: S) -> Option<&'static str> {
        self.locked.iter().find(|(locked, _)| *locked == status).map(|(_, reason)| *reason)
    }

    fn requirements_for(&self, to: S) -> impl Iterator<Item = Requirement> + '_ {
        self.requirements.iter().filter(move |(status, _)| *status == to).map(|(_, req)| *req)
    }

    fn effects_for(&self, to: S) -> Vec<LifecycleEffect> {
        self.effects
            .iter()
            .filter(|(status, _)| *status == to)
            .flat_map(|(_, effects)| effects.iter().copied())
            .collect()
    }
}

/// Entity whose `status` field is governed by a [`TransitionTable`].
pub trait LifecycleEntity: Clone + Send + Sync + 'static {
    type Status: LifecycleStatus;

    fn table() -> &'static TransitionTable<Self::Status>;
    fn entity_id(&self) -> String;
    fn status(&self) -> Self::Status;

    /// Writes status, stamped timestamp and shipping details onto the entity.
    fn apply_outcome(&mut self, outcome: &TransitionOutcome<Self::Status>, at: DateTime<Utc>);

    fn inventory_items(&self) -> &[InventoryItemId] {
        &[]
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error(
        "invalid {entity} transition from `{from}` to `{to}`; allowed: {{{}}}",
        .allowed.join(", ")
    )]
    NotAllowed { entity: EntityKind, from: String, to: String, allowed: Vec<String> },
    #[error("{entity} in status `{status}` cannot transition: {reason}")]
    Locked { entity: EntityKind, status: String, reason: String },
    #[error("transition of {entity} to `{to}` requires `{field}`")]
    MissingField { entity: EntityKind, to: String, field: &'static str },
}

/// Table-driven transition validator shared by every lifecycle entity.
pub struct LifecycleEngine<S: 'static> {
    table: &'static TransitionTable<S>,
}

impl<S> LifecycleEngine<S>
where
    S: LifecycleStatus,
{
    pub fn new(table: &'static TransitionTable<S>) -> Self {
        Self { table }
    }

    pub fn for_entity<E>() -> Self
    where
        E: LifecycleEntity<Status = S>,
    {
        Self::new(E::table())
    }

    pub fn entity(&self) -> EntityKind {
        self.table.entity
    }

    pub fn allowed(&self, from: S) -> &'static [S] {
        self.table.allowed(from)
    }

    pub fn apply(
        &self,
        current: S,
        requested: S,
        payload: &TransitionPayload,
    ) -> Result<TransitionOutcome<S>, TransitionError> {
        let entity = self.table.entity;

        if let Some(reason) = self.table.lock_reason(current) {
            return Err(TransitionError::Locked {
                entity,
                status: current.to_string(),
                reason: reason.to_string(),
            });
        }

        let allowed = self.table.allowed(current);
        if !allowed.contains(&requested) {
            return Err(TransitionError::NotAllowed {
                entity,
                from: current.to_string(),
                to: requested.to_string(),
                allowed: allowed.iter().map(ToString::to_string).collect(),
            });
        }

        let mut shipping = None;
        for requirement in self.table.requirements_for(requested) {
            match requirement {
                Requirement::ShippingDetails => {
                    let carrier_missing =
                        payload.carrier.as_deref().map(str::trim).unwrap_or_default().is_empty();
                    if carrier_missing {
                        return Err(TransitionError::MissingField {
                            entity,
                            to: requested.to_string(),
                            field: "carrier",
                        });
                    }
                    shipping = payload.shipping_info();
                    if shipping.is_none() {
                        return Err(TransitionError::MissingField {
                            entity,
                            to: requested.to_string(),
                            field: "tracking_number",
                        });
                    }
                }
            }
        }

        Ok(TransitionOutcome {
            entity,
            from: current,
            to: requested,
            stamped: requested.timestamp_field(),
            shipping: shipping.or_else(|| payload.shipping_info()),
            effects: self.table.effects_for(requested),
        })
    }

    pub fn apply_with_audit<A>(
        &self,
        entity_id: &str,
        current: S,
        requested: S,
        payload: &TransitionPayload,
        sink: &A,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome<S>, TransitionError>
    where
        A: AuditSink + ?Sized,
    {
        let result = self.apply(current, requested, payload);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "lifecycle.transition_validated",
                        AuditCategory::Lifecycle,
                        AuditOutcome::Success,
                    )
                    .for_entity(self.table.entity, entity_id)
                    .with_metadata("from", outcome.from.to_string())
                    .with_metadata("to", outcome.to.to_string()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "lifecycle.transition_rejected",
                        AuditCategory::Lifecycle,
                        AuditOutcome::Rejected,
                    )
                    .for_entity(self.table.entity, entity_id)
                    .with_metadata("from", current.to_string())
                    .with_metadata("to", requested.to_string())
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}
