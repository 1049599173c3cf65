use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tradein_core::audit::AuditContext;
use tradein_core::domain::device::CategoryId;
use tradein_core::domain::grade::Grade;
use tradein_core::domain::partner::{
    CommissionModel, CommissionTier, Partner, PartnerId, PartnerMode, PayoutFrequency,
};
use tradein_core::domain::price_list::PriceListId;
use tradein_db::repositories::PartnerRepository;
use tradein_db::services::{AppServices, PriceListImport, PriceRow};

use crate::commands::{finish, open_pool, prepare, services, CommandError, CommandResult};

pub const DEMO_PRICE_LIST: &str = "PL-DEMO-PHONES";
pub const DEMO_CATEGORY: &str = "phones";

/// (make, model, storage, grade A price)
const DEMO_DEVICES: &[(&str, &str, &str, i64)] = &[
    ("Apple", "iPhone 13 Pro", "256GB", 520),
    ("Apple", "iPhone 13 Pro", "128GB", 470),
    ("Apple", "iPhone 13", "128GB", 330),
    ("Apple", "iPhone 12", "64GB", 210),
    ("Samsung", "Galaxy S22", "128GB", 260),
    ("Samsung", "Galaxy S21", "128GB", 180),
    ("Google", "Pixel 7", "128GB", 200),
];

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let services = services(pool.clone(), &config)?;
        let message = seed_demo(&services, &config.pricing.currency).await?;
        pool.close().await;
        Ok::<String, CommandError>(message)
    });

    finish("seed", result)
}

/// Upserts the demo catalog, its active price list and two demo partners.
/// Running it again converges on the same data.
pub async fn seed_demo(services: &AppServices, currency: &str) -> Result<String, CommandError> {
    let audit = AuditContext::system("cli-seed");
    let rows = DEMO_DEVICES
        .iter()
        .map(|(make, model, storage, grade_a)| PriceRow {
            make: (*make).to_string(),
            model: (*model).to_string(),
            storage: (*storage).to_string(),
            prices: BTreeMap::from([(Grade::A, Decimal::from(*grade_a))]),
        })
        .collect();
    let import = PriceListImport {
        id: PriceListId(DEMO_PRICE_LIST.to_string()),
        name: "Demo phones".to_string(),
        category: CategoryId(DEMO_CATEGORY.to_string()),
        effective_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or(NaiveDate::MIN),
        currency: currency.to_string(),
        rows,
    };
    let report = services
        .pricing
        .import(import, &audit)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
    services
        .pricing
        .activate(&report.price_list_id, &audit)
        .await
        .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

    for partner in demo_partners() {
        services
            .repos
            .partners
            .save(partner)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
    }

    Ok(format!(
        "seeded category {DEMO_CATEGORY} with {} priced devices, active list {DEMO_PRICE_LIST}, partners DEMOREF (mode A) and DEMOSHOP (mode B)",
        report.entries
    ))
}

fn demo_partners() -> [Partner; 2] {
    let created_at = Utc::now();
    [
        Partner {
            id: PartnerId("P-DEMOREF".to_string()),
            code: "DEMOREF".to_string(),
            name: "Demo Referrals".to_string(),
            email: "referrals@demo.tradein".to_string(),
            modes: BTreeSet::from([PartnerMode::A]),
            commission: CommissionModel::Tiered {
                tiers: vec![
                    CommissionTier { min_quantity: 1, percent: Decimal::from(5) },
                    CommissionTier { min_quantity: 25, percent: Decimal::from(8) },
                ],
            },
            payout_frequency: PayoutFrequency::Monthly,
            rate_discount_percent: Decimal::ZERO,
            created_at,
        },
        Partner {
            id: PartnerId("P-DEMOSHOP".to_string()),
            code: "DEMOSHOP".to_string(),
            name: "Demo Repair Shop".to_string(),
            email: "desk@demoshop.tradein".to_string(),
            modes: BTreeSet::from([PartnerMode::B]),
            commission: CommissionModel::Flat { amount_per_device: Decimal::ZERO },
            payout_frequency: PayoutFrequency::Weekly,
            rate_discount_percent: Decimal::from(15),
            created_at,
        },
    ]
}
