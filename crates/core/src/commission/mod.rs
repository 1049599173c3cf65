//! Partner commission arithmetic and ledger bookkeeping rules.

use std::collections::BTreeSet;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::commission::{
    CommissionLedgerEntry, LedgerEntryId, LedgerEntryStatus, PartnerBalance,
};
use crate::domain::partner::{
    CommissionModel, CommissionTier, Partner, PartnerAttribution, PartnerId, PartnerMode,
};
use crate::errors::DomainError;

/// What a commission is computed from when a quote or bulk quote is paid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CommissionBasis {
    Quote { price: Decimal },
    /// `settled_value` sums matched lines at their inspected price when known.
    BulkQuote { settled_value: Decimal, matched_devices: u32 },
}

impl CommissionBasis {
    pub fn price(&self) -> Decimal {
        match self {
            Self::Quote { price } => *price,
            Self::BulkQuote { settled_value, .. } => *settled_value,
        }
    }

    pub fn volume(&self) -> u32 {
        match self {
            Self::Quote { .. } => 1,
            Self::BulkQuote { matched_devices, .. } => *matched_devices,
        }
    }
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Percent of the tier with the highest `min_quantity` not above `volume`.
pub fn tier_percent(tiers: &[CommissionTier], volume: u32) -> Option<Decimal> {
    tiers
        .iter()
        .filter(|tier| tier.min_quantity <= volume)
        .max_by_key(|tier| tier.min_quantity)
        .map(|tier| tier.percent)
}

pub fn compute_commission(model: &CommissionModel, basis: &CommissionBasis) -> Decimal {
    let hundred = Decimal::ONE_HUNDRED;
    let raw = match model {
        CommissionModel::Percentage { percent } => basis.price() * *percent / hundred,
        CommissionModel::Flat { amount_per_device } => {
            *amount_per_device * Decimal::from(basis.volume())
        }
        CommissionModel::Tiered { tiers } => match tier_percent(tiers, basis.volume()) {
            Some(percent) => basis.price() * percent / hundred,
            None => Decimal::ZERO,
        },
    };
    round_money(raw).max(Decimal::ZERO)
}

/// Commission owed for a paid source, or `None` when nothing is accrued:
/// mode B attribution, a partner not enrolled in mode A, or a zero amount.
pub fn accrual_amount(
    partner: &Partner,
    attribution: &PartnerAttribution,
    basis: &CommissionBasis,
) -> Option<Decimal> {
    if attribution.mode != PartnerMode::A || !partner.supports(PartnerMode::A) {
        return None;
    }
    let amount = compute_commission(&partner.commission, basis);
    (amount > Decimal::ZERO).then_some(amount)
}

pub fn summarize_balance(partner_id: &PartnerId, entries: &[CommissionLedgerEntry]) -> PartnerBalance {
    let mut balance = PartnerBalance {
        partner_id: partner_id.clone(),
        pending: Decimal::ZERO,
        paid: Decimal::ZERO,
        pending_entries: 0,
    };
    for entry in entries.iter().filter(|entry| &entry.partner_id == partner_id) {
        match entry.status {
            LedgerEntryStatus::Pending => {
                balance.pending += entry.amount;
                balance.pending_entries += 1;
            }
            LedgerEntryStatus::Paid => balance.paid += entry.amount,
        }
    }
    balance
}

/// Checks that every requested entry exists, belongs to `partner_id` and is
/// still pending and unclaimed. Returns the payout amount.
pub fn validate_payout_claim(
    partner_id: &PartnerId,
    requested: &[LedgerEntryId],
    found: &[CommissionLedgerEntry],
) -> Result<Decimal, DomainError> {
    if requested.is_empty() {
        return Err(DomainError::validation("entry_ids", "a payout must settle at least one entry"));
    }
    let mut unique = BTreeSet::new();
    if let Some(duplicate) = requested.iter().find(|id| !unique.insert((*id).clone())) {
        return Err(DomainError::validation(
            "entry_ids",
            format!("ledger entry `{duplicate}` is listed twice"),
        ));
    }

    let mut total = Decimal::ZERO;
    for id in requested {
        let Some(entry) = found.iter().find(|entry| &entry.id == id) else {
            return Err(DomainError::Conflict(format!("ledger entry `{id}` does not exist")));
        };
        if &entry.partner_id != partner_id {
            return Err(DomainError::Conflict(format!(
                "ledger entry `{id}` belongs to another partner"
            )));
        }
        if entry.status != LedgerEntryStatus::Pending || entry.payout_id.is_some() {
            return Err(DomainError::Conflict(format!(
                "ledger entry `{id}` was already settled"
            )));
        }
        total += entry.amount;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        accrual_amount, compute_commission, summarize_balance, tier_percent,
        validate_payout_claim, CommissionBasis,
    };
    use crate::domain::commission::{
        CommissionLedgerEntry, LedgerEntryId, LedgerEntryStatus, PayoutId, SourceKind,
    };
    use crate::domain::partner::{
        CommissionModel, CommissionTier, Partner, PartnerAttribution, PartnerId, PartnerMode,
        PayoutFrequency,
    };
    use crate::errors::DomainError;

    fn dec(value: &str) -> Decimal {
        value.parse().expect("decimal literal")
    }

    fn partner(commission: CommissionModel, modes: &[PartnerMode]) -> Partner {
        Partner {
            id: PartnerId("P-1".to_string()),
            code: "REPAIRCO".to_string(),
            name: "RepairCo".to_string(),
            email: "payouts@repairco.example".to_string(),
            modes: modes.iter().copied().collect::<BTreeSet<_>>(),
            commission,
            payout_frequency: PayoutFrequency::Monthly,
            rate_discount_percent: Decimal::from(10),
            created_at: Utc::now(),
        }
    }

    fn entry(id: &str, partner: &str, amount: i64, status: LedgerEntryStatus) -> CommissionLedgerEntry {
        CommissionLedgerEntry {
            id: LedgerEntryId(id.to_string()),
            partner_id: PartnerId(partner.to_string()),
            source_kind: SourceKind::Quote,
            source_id: format!("Q-{id}"),
            amount: Decimal::from(amount),
            status,
            payout_id: None,
            created_at: Utc::now(),
            paid_at: None,
        }
    }

    fn tiers() -> Vec<CommissionTier> {
        vec![
            CommissionTier { min_quantity: 1, percent: dec("3") },
            CommissionTier { min_quantity: 10, percent: dec("5") },
            CommissionTier { min_quantity: 50, percent: dec("7.5") },
        ]
    }

    #[test]
    fn percentage_commission_rounds_to_cents() {
        let model = CommissionModel::Percentage { percent: dec("7.5") };
        let amount = compute_commission(&model, &CommissionBasis::Quote { price: dec("333.33") });
        // 333.33 * 0.075 = 24.99975
        assert_eq!(amount, dec("25.00"));
    }

    #[test]
    fn flat_commission_multiplies_by_matched_units() {
        let model = CommissionModel::Flat { amount_per_device: dec("4.50") };
        let basis = CommissionBasis::BulkQuote { settled_value: dec("9000"), matched_devices: 12 };
        assert_eq!(compute_commission(&model, &basis), dec("54.00"));
    }

    #[test]
    fn highest_reached_tier_wins() {
        assert_eq!(tier_percent(&tiers(), 0), None);
        assert_eq!(tier_percent(&tiers(), 9), Some(dec("3")));
        assert_eq!(tier_percent(&tiers(), 10), Some(dec("5")));
        assert_eq!(tier_percent(&tiers(), 500), Some(dec("7.5")));

        let model = CommissionModel::Tiered { tiers: tiers() };
        let basis = CommissionBasis::BulkQuote { settled_value: dec("2000"), matched_devices: 12 };
        assert_eq!(compute_commission(&model, &basis), dec("100.00"));
    }

    #[test]
    fn no_applicable_tier_is_zero() {
        let model = CommissionModel::Tiered {
            tiers: vec![CommissionTier { min_quantity: 5, percent: dec("5") }],
        };
        let basis = CommissionBasis::BulkQuote { settled_value: dec("800"), matched_devices: 2 };
        assert_eq!(compute_commission(&model, &basis), Decimal::ZERO);
    }

    #[test]
    fn mode_b_and_zero_amounts_accrue_nothing() {
        let referral = partner(
            CommissionModel::Percentage { percent: dec("5") },
            &[PartnerMode::A, PartnerMode::B],
        );
        let basis = CommissionBasis::Quote { price: dec("400") };

        let mode_b = PartnerAttribution { partner_id: referral.id.clone(), mode: PartnerMode::B };
        assert_eq!(accrual_amount(&referral, &mode_b, &basis), None);

        let mode_a = PartnerAttribution { partner_id: referral.id.clone(), mode: PartnerMode::A };
        assert_eq!(accrual_amount(&referral, &mode_a, &basis), Some(dec("20.00")));
        assert_eq!(
            accrual_amount(&referral, &mode_a, &CommissionBasis::Quote { price: Decimal::ZERO }),
            None
        );
    }

    #[test]
    fn balance_separates_pending_and_paid() {
        let partner_id = PartnerId("P-1".to_string());
        let entries = vec![
            entry("1", "P-1", 20, LedgerEntryStatus::Pending),
            entry("2", "P-1", 30, LedgerEntryStatus::Paid),
            entry("3", "P-1", 5, LedgerEntryStatus::Pending),
            entry("4", "P-2", 99, LedgerEntryStatus::Pending),
        ];
        let balance = summarize_balance(&partner_id, &entries);

        assert_eq!(balance.pending, Decimal::from(25));
        assert_eq!(balance.paid, Decimal::from(30));
        assert_eq!(balance.pending_entries, 2);
    }

    #[test]
    fn payout_claim_rejects_foreign_settled_and_missing_entries() {
        let partner_id = PartnerId("P-1".to_string());
        let mut claimed = entry("3", "P-1", 5, LedgerEntryStatus::Pending);
        claimed.payout_id = Some(PayoutId("PO-1".to_string()));
        let found = vec![
            entry("1", "P-1", 20, LedgerEntryStatus::Pending),
            entry("2", "P-2", 30, LedgerEntryStatus::Pending),
            claimed,
        ];
        let id = |value: &str| LedgerEntryId(value.to_string());

        assert_eq!(
            validate_payout_claim(&partner_id, &[id("1")], &found).expect("claimable"),
            Decimal::from(20)
        );
        for bad in [id("2"), id("3"), id("9")] {
            let error = validate_payout_claim(&partner_id, &[id("1"), bad], &found)
                .expect_err("whole claim fails");
            assert!(matches!(error, DomainError::Conflict(_)));
        }
        assert!(validate_payout_claim(&partner_id, &[id("1"), id("1")], &found).is_err());
    }
}
