use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Quote,
    BulkQuote,
    Order,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::BulkQuote => "bulk_quote",
            Self::Order => "order",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp slot stamped when a status is entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampField {
    AcceptedAt,
    ShippedAt,
    ReceivedAt,
    InspectedAt,
    PaidAt,
    DeliveredAt,
    CancelledAt,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTimestamps {
    pub accepted_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub inspected_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl StatusTimestamps {
    pub fn stamp(&mut self, field: TimestampField, at: DateTime<Utc>) {
        let slot = match field {
            TimestampField::AcceptedAt => &mut self.accepted_at,
            TimestampField::ShippedAt => &mut self.shipped_at,
            TimestampField::ReceivedAt => &mut self.received_at,
            TimestampField::InspectedAt => &mut self.inspected_at,
            TimestampField::PaidAt => &mut self.paid_at,
            TimestampField::DeliveredAt => &mut self.delivered_at,
            TimestampField::CancelledAt => &mut self.cancelled_at,
        };
        *slot = Some(at);
    }

    pub fn get(&self, field: TimestampField) -> Option<DateTime<Utc>> {
        match field {
            TimestampField::AcceptedAt => self.accepted_at,
            TimestampField::ShippedAt => self.shipped_at,
            TimestampField::ReceivedAt => self.received_at,
            TimestampField::InspectedAt => self.inspected_at,
            TimestampField::PaidAt => self.paid_at,
            TimestampField::DeliveredAt => self.delivered_at,
            TimestampField::CancelledAt => self.cancelled_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingInfo {
    pub carrier: String,
    pub tracking_number: String,
}

/// Caller-supplied data accompanying a status change request. Timestamps are
/// never accepted from callers; the engine stamps server time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionPayload {
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
}

impl TransitionPayload {
    pub fn shipping(carrier: impl Into<String>, tracking_number: impl Into<String>) -> Self {
        Self { carrier: Some(carrier.into()), tracking_number: Some(tracking_number.into()) }
    }

    pub fn shipping_info(&self) -> Option<ShippingInfo> {
        let carrier = self.carrier.as_deref().map(str::trim).filter(|value| !value.is_empty())?;
        let tracking_number =
            self.tracking_number.as_deref().map(str::trim).filter(|value| !value.is_empty())?;
        Some(ShippingInfo {
            carrier: carrier.to_string(),
            tracking_number: tracking_number.to_string(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requirement {
    ShippingDetails,
}

/// Side effects dispatched when a status is entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleEffect {
    /// Flip every referenced inventory item back to `listed`, inside the same
    /// atomic commit as the status change.
    RelistInventory,
    /// Post-commit, best effort.
    AccrueCommission,
    /// Post-commit, best effort.
    NotifyPaid,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome<S> {
    pub entity: EntityKind,
    pub from: S,
    pub to: S,
    pub stamped: Option<TimestampField>,
    pub shipping: Option<ShippingInfo>,
    pub effects: Vec<LifecycleEffect>,
}

impl<S> TransitionOutcome<S> {
    pub fn has_effect(&self, effect: LifecycleEffect) -> bool {
        self.effects.contains(&effect)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{StatusTimestamps, TimestampField, TransitionPayload};

    #[test]
    fn stamp_sets_only_the_requested_slot() {
        let mut timestamps = StatusTimestamps::default();
        let now = Utc::now();
        timestamps.stamp(TimestampField::PaidAt, now);

        assert_eq!(timestamps.get(TimestampField::PaidAt), Some(now));
        assert_eq!(timestamps.get(TimestampField::CancelledAt), None);
    }

    #[test]
    fn blank_tracking_number_is_not_shipping_info() {
        let payload = TransitionPayload::shipping("UPS", "   ");
        assert!(payload.shipping_info().is_none());

        let payload = TransitionPayload::shipping(" UPS ", "1Z999");
        let info = payload.shipping_info().expect("complete shipping details");
        assert_eq!(info.carrier, "UPS");
    }
}
