use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartnerId(pub String);

impl fmt::Display for PartnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `A` earns referral commission; `B` transacts hands-on at a discounted rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PartnerMode {
    A,
    B,
}

impl PartnerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub min_quantity: u32,
    pub percent: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CommissionModel {
    Percentage { percent: Decimal },
    Flat { amount_per_device: Decimal },
    Tiered { tiers: Vec<CommissionTier> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutFrequency {
    Weekly,
    Biweekly,
    Monthly,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partner {
    pub id: PartnerId,
    pub code: String,
    pub name: String,
    pub email: String,
    pub modes: BTreeSet<PartnerMode>,
    pub commission: CommissionModel,
    pub payout_frequency: PayoutFrequency,
    /// Mode B discount off the consumer price, in percent.
    pub rate_discount_percent: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Partner {
    pub fn supports(&self, mode: PartnerMode) -> bool {
        self.modes.contains(&mode)
    }
}

/// Partner attribution carried on quotes and bulk quotes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartnerAttribution {
    pub partner_id: PartnerId,
    pub mode: PartnerMode,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{CommissionModel, CommissionTier};

    #[test]
    fn commission_model_is_tagged_by_name() {
        let model = CommissionModel::Tiered {
            tiers: vec![CommissionTier { min_quantity: 10, percent: Decimal::from(5) }],
        };
        let json = serde_json::to_value(&model).expect("serialize commission model");

        assert_eq!(json["model"], "tiered");
        assert_eq!(json["tiers"][0]["min_quantity"], 10);

        let decoded: CommissionModel =
            serde_json::from_value(serde_json::json!({"model": "flat", "amount_per_device": "2.5"}))
                .expect("deserialize flat model");
        assert_eq!(decoded, CommissionModel::Flat { amount_per_device: "2.5".parse().expect("decimal") });
    }
}
