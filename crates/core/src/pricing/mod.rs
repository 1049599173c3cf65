//! Grade pricing: rounding rules, grade-ratio derivation, price resolution
//! and planning of bulk price-list adjustments.

use std::collections::BTreeSet;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::device::DeviceId;
use crate::domain::grade::Grade;
use crate::domain::price_list::{GradePrices, PriceList, PriceUpdate};
use crate::errors::DomainError;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RoundingRule {
    #[default]
    None,
    /// Nearest multiple of `increment`, midpoint away from zero.
    Nearest { increment: Decimal },
    Down { increment: Decimal },
    Up { increment: Decimal },
}

impl RoundingRule {
    pub fn parse(rule: &str, increment: Decimal) -> Result<Self, DomainError> {
        let parsed = match rule.trim().to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "nearest" => Self::Nearest { increment },
            "down" => Self::Down { increment },
            "up" => Self::Up { increment },
            other => {
                return Err(DomainError::validation(
                    "rounding",
                    format!("unknown rounding rule `{other}` (expected none|nearest|down|up)"),
                ))
            }
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        match self.increment() {
            Some(increment) if increment <= Decimal::ZERO => Err(DomainError::validation(
                "rounding.increment",
                "increment must be greater than zero",
            )),
            _ => Ok(()),
        }
    }

    pub fn increment(&self) -> Option<Decimal> {
        match self {
            Self::None => None,
            Self::Nearest { increment } | Self::Down { increment } | Self::Up { increment } => {
                Some(*increment)
            }
        }
    }

    pub fn apply(&self, amount: Decimal) -> Decimal {
        let (increment, strategy) = match self {
            Self::None => return amount,
            Self::Nearest { increment } => (*increment, RoundingStrategy::MidpointAwayFromZero),
            Self::Down { increment } => (*increment, RoundingStrategy::ToNegativeInfinity),
            Self::Up { increment } => (*increment, RoundingStrategy::ToPositiveInfinity),
        };
        if increment <= Decimal::ZERO {
            return amount;
        }
        (amount / increment).round_dp_with_strategy(0, strategy) * increment
    }
}

/// Percent of the grade A price used for each derived grade.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeRatios {
    pub b: Decimal,
    pub c: Decimal,
    pub d: Decimal,
    pub e: Decimal,
}

impl GradeRatios {
    pub fn ratio(&self, grade: Grade) -> Decimal {
        match grade {
            Grade::A => HUNDRED,
            Grade::B => self.b,
            Grade::C => self.c,
            Grade::D => self.d,
            Grade::E => self.e,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        for grade in Grade::DERIVED {
            let ratio = self.ratio(grade);
            if ratio < Decimal::ZERO || ratio > HUNDRED {
                return Err(DomainError::validation(
                    "grade_ratios",
                    format!("ratio for grade {grade} must be within 0..=100, got {ratio}"),
                ));
            }
        }
        Ok(())
    }
}

impl Default for GradeRatios {
    fn default() -> Self {
        Self {
            b: Decimal::from(85),
            c: Decimal::from(70),
            d: Decimal::from(50),
            e: Decimal::from(30),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSettings {
    pub rounding: RoundingRule,
    pub ratios: GradeRatios,
}

/// `round(A × ratio / 100)` for grades B through E.
pub fn derive_ratios(grade_a_price: Decimal, ratios: &GradeRatios, rounding: RoundingRule) -> GradePrices {
    Grade::DERIVED
        .into_iter()
        .map(|grade| {
            let derived = rounding.apply(grade_a_price * ratios.ratio(grade) / HUNDRED);
            (grade, derived.max(Decimal::ZERO))
        })
        .collect()
}

/// Fills in derived grades missing from supplied prices. Supplied prices are
/// never touched.
pub fn complete_grades(prices: &GradePrices, settings: &PricingSettings) -> GradePrices {
    let mut completed = prices.clone();
    if let Some(grade_a) = prices.get(&Grade::A) {
        for (grade, price) in derive_ratios(*grade_a, &settings.ratios, settings.rounding) {
            completed.entry(grade).or_insert(price);
        }
    }
    completed
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PricingResolver {
    settings: PricingSettings,
}

impl PricingResolver {
    pub fn new(settings: PricingSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PricingSettings {
        &self.settings
    }

    /// Stored price for the grade, else the price derived from grade A.
    pub fn price_for(
        &self,
        device_id: DeviceId,
        grade: Grade,
        price_list: &PriceList,
    ) -> Result<Decimal, DomainError> {
        let prices = price_list.grade_prices(device_id).ok_or_else(|| {
            DomainError::not_found("price", format!("device {device_id} in list {}", price_list.id))
        })?;
        if let Some(price) = prices.get(&grade) {
            return Ok(*price);
        }
        let grade_a = prices.get(&Grade::A).ok_or_else(|| {
            DomainError::not_found(
                "price",
                format!("grade {grade} of device {device_id} in list {}", price_list.id),
            )
        })?;
        let derived = self.settings.rounding.apply(
            *grade_a * self.settings.ratios.ratio(grade) / HUNDRED,
        );
        Ok(derived.max(Decimal::ZERO))
    }

    pub fn derive_ratios(&self, grade_a_price: Decimal) -> GradePrices {
        derive_ratios(grade_a_price, &self.settings.ratios, self.settings.rounding)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceAdjustment {
    /// Relative change applied to every stored grade, e.g. `10` for +10%.
    Percent { percent: Decimal },
    /// Absolute change applied to every stored grade.
    Dollar { amount: Decimal },
    /// Re-derives grades B..E from the current grade A price.
    SetRatios { ratios: GradeRatios },
}

impl PriceAdjustment {
    fn apply(&self, prices: &GradePrices, rounding: RoundingRule) -> Option<GradePrices> {
        let clamp = |amount: Decimal| rounding.apply(amount).max(Decimal::ZERO);
        match self {
            Self::Percent { percent } => Some(
                prices
                    .iter()
                    .map(|(grade, price)| (*grade, clamp(*price * (HUNDRED + *percent) / HUNDRED)))
                    .collect(),
            ),
            Self::Dollar { amount } => Some(
                prices.iter().map(|(grade, price)| (*grade, clamp(*price + *amount))).collect(),
            ),
            Self::SetRatios { ratios } => {
                let grade_a = *prices.get(&Grade::A)?;
                let mut updated = derive_ratios(grade_a, ratios, rounding);
                updated.insert(Grade::A, grade_a);
                Some(updated)
            }
        }
    }
}

/// Full set of per-device writes an adjustment produces, before chunking.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentPlan {
    pub updates: Vec<PriceUpdate>,
    /// Requested devices with no prices in the list, or no grade A price when
    /// ratios were requested.
    pub skipped: Vec<DeviceId>,
}

impl AdjustmentPlan {
    pub fn chunks(&self, chunk_size: usize) -> std::slice::Chunks<'_, PriceUpdate> {
        self.updates.chunks(chunk_size.max(1))
    }

    pub fn chunk_count(&self, chunk_size: usize) -> usize {
        self.updates.len().div_ceil(chunk_size.max(1))
    }
}

/// Applies `steps` in order to each requested device. A later `SetRatios`
/// step sees the grade A price produced by earlier steps.
pub fn plan_adjustment(
    price_list: &PriceList,
    device_ids: &[DeviceId],
    steps: &[PriceAdjustment],
    rounding: RoundingRule,
) -> Result<AdjustmentPlan, DomainError> {
    if steps.is_empty() {
        return Err(DomainError::validation("adjustments", "at least one adjustment is required"));
    }
    for step in steps {
        if let PriceAdjustment::SetRatios { ratios } = step {
            ratios.validate()?;
        }
    }

    let mut seen = BTreeSet::new();
    let mut plan = AdjustmentPlan::default();
    for device_id in device_ids.iter().copied().filter(|id| seen.insert(*id)) {
        let Some(current) = price_list.grade_prices(device_id) else {
            plan.skipped.push(device_id);
            continue;
        };
        let adjusted =
            steps.iter().try_fold(current.clone(), |prices, step| step.apply(&prices, rounding));
        match adjusted {
            Some(prices) => plan.updates.push(PriceUpdate { device_id, prices }),
            None => plan.skipped.push(device_id),
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{
        complete_grades, derive_ratios, plan_adjustment, GradeRatios, PriceAdjustment,
        PricingResolver, PricingSettings, RoundingRule,
    };
    use crate::domain::device::{CategoryId, DeviceId};
    use crate::domain::grade::Grade;
    use crate::domain::price_list::{GradePrices, PriceList, PriceListId};

    fn dec(value: &str) -> Decimal {
        value.parse().expect("decimal literal")
    }

    fn list(entries: Vec<(u64, GradePrices)>) -> PriceList {
        let now = Utc::now();
        PriceList {
            id: PriceListId("phones-2026-10".to_string()),
            name: "Phones October".to_string(),
            category: CategoryId("phones".to_string()),
            effective_date: NaiveDate::from_ymd_opt(2026, 10, 1).expect("valid date"),
            currency: "USD".to_string(),
            prices: entries.into_iter().map(|(id, prices)| (DeviceId(id), prices)).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    fn grades(pairs: &[(Grade, i64)]) -> GradePrices {
        pairs.iter().map(|(grade, price)| (*grade, Decimal::from(*price))).collect()
    }

    #[test]
    fn rounding_rules_respect_increment_and_direction() {
        let five = Decimal::from(5);
        assert_eq!(RoundingRule::Nearest { increment: five }.apply(dec("422.5")), dec("425"));
        assert_eq!(RoundingRule::Nearest { increment: five }.apply(dec("422.4")), dec("420"));
        assert_eq!(RoundingRule::Down { increment: five }.apply(dec("424.99")), dec("420"));
        assert_eq!(RoundingRule::Up { increment: five }.apply(dec("420.01")), dec("425"));
        assert_eq!(RoundingRule::None.apply(dec("420.01")), dec("420.01"));
        assert_eq!(
            RoundingRule::Nearest { increment: dec("0.01") }.apply(dec("10.005")),
            dec("10.01")
        );
    }

    #[test]
    fn parse_rejects_unknown_rules_and_non_positive_increments() {
        assert!(RoundingRule::parse("sideways", Decimal::ONE).is_err());
        assert!(RoundingRule::parse("nearest", Decimal::ZERO).is_err());
        assert_eq!(
            RoundingRule::parse("Up", Decimal::TEN).expect("valid rule"),
            RoundingRule::Up { increment: Decimal::TEN }
        );
    }

    #[test]
    fn derive_ratios_is_deterministic() {
        let ratios = GradeRatios::default();
        let rounding = RoundingRule::Nearest { increment: Decimal::ONE };
        let first = derive_ratios(dec("733"), &ratios, rounding);
        let second = derive_ratios(dec("733"), &ratios, rounding);

        assert_eq!(first, second);
        assert_eq!(first.get(&Grade::B), Some(&dec("623")));
        assert!(!first.contains_key(&Grade::A));
    }

    #[test]
    fn price_for_prefers_stored_prices_and_derives_the_rest() {
        let resolver = PricingResolver::new(PricingSettings::default());
        let list = list(vec![(7, grades(&[(Grade::A, 500), (Grade::C, 333)]))]);

        assert_eq!(resolver.price_for(DeviceId(7), Grade::C, &list).expect("stored"), dec("333"));
        assert_eq!(resolver.price_for(DeviceId(7), Grade::B, &list).expect("derived"), dec("425"));
        assert!(resolver.price_for(DeviceId(8), Grade::A, &list).is_err());
    }

    #[test]
    fn complete_grades_never_overrides_supplied_prices() {
        let supplied = grades(&[(Grade::A, 1000), (Grade::B, 900)]);
        let completed = complete_grades(&supplied, &PricingSettings::default());

        assert_eq!(completed.get(&Grade::B), Some(&Decimal::from(900)));
        assert_eq!(completed.get(&Grade::C), Some(&Decimal::from(700)));
        assert_eq!(completed.len(), 5);
    }

    #[test]
    fn percent_adjustment_then_set_ratios_uses_the_new_grade_a() {
        let list = list(vec![(1, grades(&[(Grade::A, 500), (Grade::B, 400)]))]);
        let ratios = GradeRatios {
            b: Decimal::from(80),
            c: Decimal::from(60),
            d: Decimal::from(40),
            e: Decimal::from(20),
        };

        let plan = plan_adjustment(
            &list,
            &[DeviceId(1)],
            &[
                PriceAdjustment::Percent { percent: Decimal::TEN },
                PriceAdjustment::SetRatios { ratios },
            ],
            RoundingRule::None,
        )
        .expect("valid plan");

        let prices = &plan.updates[0].prices;
        assert_eq!(prices.get(&Grade::A), Some(&dec("550")));
        assert_eq!(prices.get(&Grade::B), Some(&dec("440")));
        assert_eq!(prices.get(&Grade::E), Some(&dec("110")));
    }

    #[test]
    fn percent_adjustment_touches_every_stored_grade() {
        let list = list(vec![(1, grades(&[(Grade::A, 500), (Grade::B, 400)]))]);
        let plan = plan_adjustment(
            &list,
            &[DeviceId(1)],
            &[PriceAdjustment::Percent { percent: Decimal::TEN }],
            RoundingRule::None,
        )
        .expect("valid plan");

        let expected: BTreeMap<Grade, Decimal> =
            [(Grade::A, dec("550")), (Grade::B, dec("440"))].into_iter().collect();
        assert_eq!(plan.updates[0].prices, expected);
    }

    #[test]
    fn negative_results_clamp_and_unknown_devices_are_skipped() {
        let list = list(vec![(1, grades(&[(Grade::A, 50), (Grade::E, 5)]))]);
        let plan = plan_adjustment(
            &list,
            &[DeviceId(1), DeviceId(99), DeviceId(1)],
            &[PriceAdjustment::Dollar { amount: Decimal::from(-20) }],
            RoundingRule::None,
        )
        .expect("valid plan");

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].prices.get(&Grade::A), Some(&Decimal::from(30)));
        assert_eq!(plan.updates[0].prices.get(&Grade::E), Some(&Decimal::ZERO));
        assert_eq!(plan.skipped, vec![DeviceId(99)]);
    }

    #[test]
    fn plans_split_into_bounded_chunks() {
        let entries = (1..=1000).map(|id| (id, grades(&[(Grade::A, 100)]))).collect();
        let list = list(entries);
        let ids: Vec<DeviceId> = (1..=1000).map(DeviceId).collect();
        let plan = plan_adjustment(
            &list,
            &ids,
            &[PriceAdjustment::Dollar { amount: Decimal::ONE }],
            RoundingRule::None,
        )
        .expect("valid plan");

        assert_eq!(plan.chunk_count(450), 3);
        let sizes: Vec<usize> = plan.chunks(450).map(<[_]>::len).collect();
        assert_eq!(sizes, vec![450, 450, 100]);
    }
}
