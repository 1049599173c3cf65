use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::device::{CategoryId, DeviceId};
use crate::domain::grade::Grade;
use crate::domain::partner::PartnerAttribution;
use crate::flows::states::{ShippingInfo, StatusTimestamps};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BulkQuoteId(pub String);

impl BulkQuoteId {
    pub fn generate() -> Self {
        Self(format!("BQ-{}", Uuid::new_v4()))
    }
}

impl fmt::Display for BulkQuoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkQuoteStatus {
    Estimated,
    Accepted,
    Received,
    Inspected,
    Paid,
    Cancelled,
}

impl BulkQuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Estimated => "estimated",
            Self::Accepted => "accepted",
            Self::Received => "received",
            Self::Inspected => "inspected",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "estimated" => Some(Self::Estimated),
            "accepted" => Some(Self::Accepted),
            "received" => Some(Self::Received),
            "inspected" => Some(Self::Inspected),
            "paid" => Some(Self::Paid),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for BulkQuoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How certain a raw-text-to-device match is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
    Manual,
    Unmatched,
}

impl MatchConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Manual => "manual",
            Self::Unmatched => "unmatched",
        }
    }
}

impl fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceCounts {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub manual: u32,
    pub unmatched: u32,
}

impl ConfidenceCounts {
    pub fn record(&mut self, confidence: MatchConfidence) {
        let slot = match confidence {
            MatchConfidence::High => &mut self.high,
            MatchConfidence::Medium => &mut self.medium,
            MatchConfidence::Low => &mut self.low,
            MatchConfidence::Manual => &mut self.manual,
            MatchConfidence::Unmatched => &mut self.unmatched,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn get(&self, confidence: MatchConfidence) -> u32 {
        match confidence {
            MatchConfidence::High => self.high,
            MatchConfidence::Medium => self.medium,
            MatchConfidence::Low => self.low,
            MatchConfidence::Manual => self.manual,
            MatchConfidence::Unmatched => self.unmatched,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLine {
    pub line_no: u32,
    pub raw_input: String,
    pub device_id: Option<DeviceId>,
    pub confidence: MatchConfidence,
    pub quantity: u32,
    pub assumed_grade: Grade,
    /// Per-unit price after the rate context; `None` when unmatched or unpriced.
    pub indicative_price: Option<Decimal>,
    pub actual_grade: Option<Grade>,
    pub actual_price: Option<Decimal>,
    /// Why a matched line has no indicative price, e.g. the active list
    /// holds no entry for the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_issue: Option<String>,
}

impl DeviceLine {
    pub fn is_matched(&self) -> bool {
        self.device_id.is_some()
    }

    pub fn is_unpriced(&self) -> bool {
        self.is_matched() && self.indicative_price.is_none()
    }

    pub fn indicative_total(&self) -> Decimal {
        self.indicative_price.unwrap_or(Decimal::ZERO) * Decimal::from(self.quantity)
    }

    /// Line value used for settlement: the inspected price once known.
    pub fn settled_total(&self) -> Decimal {
        self.actual_price.or(self.indicative_price).unwrap_or(Decimal::ZERO)
            * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkTotals {
    /// Sum of line quantities.
    pub total_devices: u32,
    pub total_indicative: Decimal,
    /// Lines resolved to a device.
    pub matched_count: u32,
    pub unmatched_count: u32,
    /// Units on lines resolved to a device.
    pub matched_devices: u32,
    /// Matched lines the active list could not price; they add nothing to
    /// `total_indicative`.
    #[serde(default)]
    pub unpriced_count: u32,
    pub confidence: ConfidenceCounts,
}

impl BulkTotals {
    pub fn from_lines(lines: &[DeviceLine]) -> Self {
        let mut totals = Self::default();
        for line in lines {
            totals.total_devices = totals.total_devices.saturating_add(line.quantity);
            totals.total_indicative += line.indicative_total();
            totals.confidence.record(line.confidence);
            if line.is_matched() {
                totals.matched_count += 1;
                totals.matched_devices = totals.matched_devices.saturating_add(line.quantity);
                if line.is_unpriced() {
                    totals.unpriced_count += 1;
                }
            } else {
                totals.unmatched_count += 1;
            }
        }
        totals
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessContact {
    pub business_name: String,
    pub contact_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkQuote {
    pub id: BulkQuoteId,
    pub contact: BusinessContact,
    pub category: CategoryId,
    pub assumed_grade: Grade,
    pub currency: String,
    pub totals: BulkTotals,
    pub status: BulkQuoteStatus,
    pub partner: Option<PartnerAttribution>,
    pub shipping: Option<ShippingInfo>,
    pub timestamps: StatusTimestamps,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A bulk quote together with its device lines, as fetched for detail views
/// and for settlement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkQuoteDetail {
    pub quote: BulkQuote,
    pub lines: Vec<DeviceLine>,
}

impl BulkQuoteDetail {
    pub fn settled_value(&self) -> Decimal {
        self.lines.iter().filter(|line| line.is_matched()).map(DeviceLine::settled_total).sum()
    }
}
