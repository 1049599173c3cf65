//! Transition tables for every lifecycle-managed entity, plus the glue that
//! lets the generic engine read and write each entity's status.

use chrono::{DateTime, Utc};

use crate::domain::bulk_quote::{BulkQuote, BulkQuoteStatus};
use crate::domain::order::{InventoryItemId, Order, OrderStatus};
use crate::domain::quote::{Quote, QuoteStatus};
use crate::flows::engine::{LifecycleEntity, LifecycleStatus, TransitionTable};
use crate::flows::states::{
    EntityKind, LifecycleEffect, Requirement, TimestampField, TransitionOutcome,
};

const PAID_EFFECTS: &[LifecycleEffect] =
    &[LifecycleEffect::AccrueCommission, LifecycleEffect::NotifyPaid];

pub static QUOTE_TABLE: TransitionTable<QuoteStatus> = {
    use QuoteStatus::*;
    TransitionTable {
        entity: EntityKind::Quote,
        edges: &[
            (Quoted, &[Accepted, Cancelled]),
            (Accepted, &[Shipped, Cancelled]),
            (Shipped, &[Received, Cancelled]),
            (Received, &[Inspected, Cancelled]),
            (Inspected, &[Paid, Cancelled]),
            (Paid, &[Cancelled]),
        ],
        locked: &[],
        requirements: &[(Shipped, Requirement::ShippingDetails)],
        effects: &[(Paid, PAID_EFFECTS)],
    }
};

pub static BULK_QUOTE_TABLE: TransitionTable<BulkQuoteStatus> = {
    use BulkQuoteStatus::*;
    TransitionTable {
        entity: EntityKind::BulkQuote,
        edges: &[
            (Estimated, &[Accepted, Cancelled]),
            (Accepted, &[Received, Cancelled]),
            (Received, &[Inspected, Cancelled]),
            (Inspected, &[Paid, Cancelled]),
        ],
        locked: &[],
        requirements: &[],
        effects: &[(Paid, PAID_EFFECTS)],
    }
};

pub static ORDER_TABLE: TransitionTable<OrderStatus> = {
    use OrderStatus::*;
    TransitionTable {
        entity: EntityKind::Order,
        edges: &[
            (Paid, &[Processing, Cancelled]),
            (Processing, &[Shipped, Cancelled]),
            (Shipped, &[Delivered]),
        ],
        locked: &[(Pending, "payment has not been confirmed")],
        requirements: &[],
        effects: &[(Cancelled, &[LifecycleEffect::RelistInventory])],
    }
};

impl LifecycleStatus for QuoteStatus {
    fn timestamp_field(&self) -> Option<TimestampField> {
        match self {
            Self::Quoted => None,
            Self::Accepted => Some(TimestampField::AcceptedAt),
            Self::Shipped => Some(TimestampField::ShippedAt),
            Self::Received => Some(TimestampField::ReceivedAt),
            Self::Inspected => Some(TimestampField::InspectedAt),
            Self::Paid => Some(TimestampField::PaidAt),
            Self::Cancelled => Some(TimestampField::CancelledAt),
        }
    }
}

impl LifecycleStatus for BulkQuoteStatus {
    fn timestamp_field(&self) -> Option<TimestampField> {
        match self {
            Self::Estimated => None,
            Self::Accepted => Some(TimestampField::AcceptedAt),
            Self::Received => Some(TimestampField::ReceivedAt),
            Self::Inspected => Some(TimestampField::InspectedAt),
            Self::Paid => Some(TimestampField::PaidAt),
            Self::Cancelled => Some(TimestampField::CancelledAt),
        }
    }
}

impl LifecycleStatus for OrderStatus {
    fn timestamp_field(&self) -> Option<TimestampField> {
        match self {
            Self::Pending | Self::Paid | Self::Processing => None,
            Self::Shipped => Some(TimestampField::ShippedAt),
            Self::Delivered => Some(TimestampField::DeliveredAt),
            Self::Cancelled => Some(TimestampField::CancelledAt),
        }
    }
}

impl LifecycleEntity for Quote {
    type Status = QuoteStatus;

    fn table() -> &'static TransitionTable<QuoteStatus> {
        &QUOTE_TABLE
    }

    fn entity_id(&self) -> String {
        self.id.0.clone()
    }

    fn status(&self) -> QuoteStatus {
        self.status
    }

    fn apply_outcome(&mut self, outcome: &TransitionOutcome<QuoteStatus>, at: DateTime<Utc>) {
        self.status = outcome.to;
        if let Some(field) = outcome.stamped {
            self.timestamps.stamp(field, at);
        }
        if let Some(shipping) = &outcome.shipping {
            self.shipping = Some(shipping.clone());
        }
        self.updated_at = at;
    }
}

impl LifecycleEntity for BulkQuote {
    type Status = BulkQuoteStatus;

    fn table() -> &'static TransitionTable<BulkQuoteStatus> {
        &BULK_QUOTE_TABLE
    }

    fn entity_id(&self) -> String {
        self.id.0.clone()
    }

    fn status(&self) -> BulkQuoteStatus {
        self.status
    }

    fn apply_outcome(&mut self, outcome: &TransitionOutcome<BulkQuoteStatus>, at: DateTime<Utc>) {
        self.status = outcome.to;
        if let Some(field) = outcome.stamped {
            self.timestamps.stamp(field, at);
        }
        if let Some(shipping) = &outcome.shipping {
            self.shipping = Some(shipping.clone());
        }
        self.updated_at = at;
    }
}

impl LifecycleEntity for Order {
    type Status = OrderStatus;

    fn table() -> &'static TransitionTable<OrderStatus> {
        &ORDER_TABLE
    }

    fn entity_id(&self) -> String {
        self.id.0.clone()
    }

    fn status(&self) -> OrderStatus {
        self.status
    }

    fn apply_outcome(&mut self, outcome: &TransitionOutcome<OrderStatus>, at: DateTime<Utc>) {
        self.status = outcome.to;
        if let Some(field) = outcome.stamped {
            self.timestamps.stamp(field, at);
        }
        if let Some(shipping) = &outcome.shipping {
            self.shipping = Some(shipping.clone());
        }
        self.updated_at = at;
    }

    fn inventory_items(&self) -> &[InventoryItemId] {
        &self.items
    }
}
