use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::device::{CategoryId, DeviceId};
use crate::domain::grade::Grade;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceListId(pub String);

impl fmt::Display for PriceListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type GradePrices = BTreeMap<Grade, Decimal>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceList {
    pub id: PriceListId,
    pub name: String,
    pub category: CategoryId,
    pub effective_date: NaiveDate,
    pub currency: String,
    pub prices: BTreeMap<DeviceId, GradePrices>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PriceList {
    pub fn grade_prices(&self, device_id: DeviceId) -> Option<&GradePrices> {
        self.prices.get(&device_id)
    }
}

/// Category record holding the pointer to its one active price list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub active_price_list: Option<PriceListId>,
}

/// Copy of a list's prices taken immediately before they are overwritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceListSnapshot {
    pub id: String,
    pub price_list_id: PriceListId,
    pub prices: BTreeMap<DeviceId, GradePrices>,
    pub taken_at: DateTime<Utc>,
}

/// One device's full grade map after an adjustment, written as part of a chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub device_id: DeviceId,
    pub prices: GradePrices,
}
