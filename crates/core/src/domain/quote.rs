use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::device::DeviceId;
use crate::domain::grade::Grade;
use crate::domain::partner::PartnerAttribution;
use crate::flows::states::{ShippingInfo, StatusTimestamps};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn generate() -> Self {
        Self(format!("Q-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for QuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Quoted,
    Accepted,
    Shipped,
    Received,
    Inspected,
    Paid,
    Cancelled,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quoted => "quoted",
            Self::Accepted => "accepted",
            Self::Shipped => "shipped",
            Self::Received => "received",
            Self::Inspected => "inspected",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quoted" => Some(Self::Quoted),
            "accepted" => Some(Self::Accepted),
            "shipped" => Some(Self::Shipped),
            "received" => Some(Self::Received),
            "inspected" => Some(Self::Inspected),
            "paid" => Some(Self::Paid),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-device trade-in quote.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub device_id: DeviceId,
    pub grade: Grade,
    pub price: Decimal,
    pub currency: String,
    pub status: QuoteStatus,
    pub partner: Option<PartnerAttribution>,
    pub shipping: Option<ShippingInfo>,
    pub timestamps: StatusTimestamps,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(device_id: DeviceId, grade: Grade, price: Decimal, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: QuoteId::generate(),
            device_id,
            grade,
            price,
            currency: currency.to_string(),
            status: QuoteStatus::Quoted,
            partner: None,
            shipping: None,
            timestamps: StatusTimestamps::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_partner(mut self, partner: PartnerAttribution) -> Self {
        self.partner = Some(partner);
        self
    }
}
