use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use tradein_core::audit::{AuditContext, InMemoryAuditSink};
use tradein_core::config::AppConfig;
use tradein_core::domain::bulk_quote::{BulkQuoteStatus, BusinessContact, MatchConfidence};
use tradein_core::domain::commission::LedgerEntryStatus;
use tradein_core::domain::device::{CategoryId, DeviceId, DeviceKey, NewDevice};
use tradein_core::domain::grade::Grade;
use tradein_core::domain::order::{
    InventoryItem, InventoryItemId, InventoryStatus, Order, OrderId, OrderStatus, OrderTotals,
};
use tradein_core::domain::partner::{CommissionModel, Partner, PartnerId, PartnerMode, PayoutFrequency};
use tradein_core::domain::price_list::PriceListId;
use tradein_core::domain::principal::Principal;
use tradein_core::domain::quote::{QuoteId, QuoteStatus};
use tradein_core::errors::{ApplicationError, DomainError};
use tradein_core::estimate::ManifestRow;
use tradein_core::flows::{StatusTimestamps, TransitionPayload};
use tradein_core::pricing::PriceAdjustment;
use tradein_db::repositories::{
    DeviceRepository, LifecycleStore, OrderRepository, PartnerRepository, PriceListRepository,
};
use tradein_db::services::{
    AdjustmentRequest, EstimateSubmission, PriceListImport, PriceRow, QuoteRequest,
    RecordingNotifier,
};
use tradein_db::{connect_with_settings, migrations, AppServices, InMemoryStore, Repositories};

const CORRELATION: &str = "req-flow-1";

fn dec(value: &str) -> Decimal {
    value.parse().expect("decimal literal")
}

fn phones() -> CategoryId {
    CategoryId("phones".to_string())
}

fn grade_a(price: &str) -> BTreeMap<Grade, Decimal> {
    BTreeMap::from([(Grade::A, dec(price))])
}

fn audit() -> AuditContext {
    AuditContext::new(CORRELATION, "ops@tradein.test")
}

struct Harness {
    services: AppServices,
    store: Option<Arc<InMemoryStore>>,
    notifier: RecordingNotifier,
    audit_sink: InMemoryAuditSink,
}

impl Harness {
    fn memory() -> Self {
        Self::memory_with(AppConfig::default(), RecordingNotifier::default())
    }

    fn memory_with(config: AppConfig, notifier: RecordingNotifier) -> Self {
        let (repos, store) = Repositories::in_memory();
        Self::build(repos, Some(store), config, notifier)
    }

    async fn sqlite() -> Self {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        Self::build(Repositories::sql(pool), None, AppConfig::default(), RecordingNotifier::default())
    }

    fn build(
        repos: Repositories,
        store: Option<Arc<InMemoryStore>>,
        config: AppConfig,
        notifier: RecordingNotifier,
    ) -> Self {
        let audit_sink = InMemoryAuditSink::default();
        let services = AppServices::with_collaborators(
            repos,
            &config,
            Arc::new(audit_sink.clone()),
            Arc::new(notifier.clone()),
        )
        .expect("services");
        Self { services, store, notifier, audit_sink }
    }

    fn store(&self) -> &InMemoryStore {
        self.store.as_deref().expect("in-memory harness")
    }

    /// Imports and activates a three-device phone list.
    async fn seed_catalog(&self) -> Vec<DeviceId> {
        let report = self
            .services
            .pricing
            .import(
                PriceListImport {
                    id: PriceListId("PL-PHONES-1".to_string()),
                    name: "Phones October".to_string(),
                    category: phones(),
                    effective_date: NaiveDate::from_ymd_opt(2026, 10, 1).expect("date"),
                    currency: "usd".to_string(),
                    rows: vec![
                        PriceRow {
                            make: "Apple".to_string(),
                            model: "iPhone 13 Pro".to_string(),
                            storage: "256GB".to_string(),
                            prices: grade_a("500"),
                        },
                        PriceRow {
                            make: "Apple".to_string(),
                            model: "iPhone 13".to_string(),
                            storage: "128GB".to_string(),
                            prices: grade_a("300"),
                        },
                        PriceRow {
                            make: "Samsung".to_string(),
                            model: "Galaxy S22".to_string(),
                            storage: "128GB".to_string(),
                            prices: grade_a("250"),
                        },
                    ],
                },
                &audit(),
            )
            .await
            .expect("import");
        self.services
            .pricing
            .activate(&report.price_list_id, &audit())
            .await
            .expect("activate");
        report.devices_created
    }

    async fn seed_partner(&self, code: &str, modes: &[PartnerMode]) -> PartnerId {
        let id = PartnerId(format!("P-{code}"));
        self.services
            .repos
            .partners
            .save(Partner {
                id: id.clone(),
                code: code.to_string(),
                name: format!("{code} Recyclers"),
                email: format!("{}@partners.test", code.to_ascii_lowercase()),
                modes: modes.iter().copied().collect(),
                commission: CommissionModel::Percentage { percent: dec("10") },
                payout_frequency: PayoutFrequency::Monthly,
                rate_discount_percent: dec("20"),
                created_at: Utc::now(),
            })
            .await
            .expect("save partner");
        id
    }

    async fn inspected_quote(&self, device_id: DeviceId, referral: Option<&str>) -> QuoteId {
        let quote = self
            .services
            .estimates
            .quote_device(
                QuoteRequest {
                    device_id,
                    category: phones(),
                    grade: Grade::A,
                    referral_code: referral.map(str::to_string),
                },
                &Principal::system(),
                CORRELATION,
            )
            .await
            .expect("quote");
        let steps = [
            (QuoteStatus::Accepted, TransitionPayload::default()),
            (QuoteStatus::Shipped, TransitionPayload::shipping("UPS", "1Z999")),
            (QuoteStatus::Received, TransitionPayload::default()),
            (QuoteStatus::Inspected, TransitionPayload::default()),
        ];
        for (status, payload) in steps {
            self.services
                .lifecycle
                .transition_quote(&quote.id, status, &payload, &audit())
                .await
                .expect("advance quote");
        }
        quote.id
    }
}

fn contact() -> BusinessContact {
    BusinessContact {
        business_name: "Acme Refurb".to_string(),
        contact_name: "Jordan Lee".to_string(),
        email: "jordan@acme.test".to_string(),
        phone: None,
    }
}

fn submission(rows: &[&str], referral_code: Option<&str>) -> EstimateSubmission {
    EstimateSubmission {
        contact: contact(),
        category: phones(),
        assumed_grade: Grade::A,
        rows: rows.iter().map(|row| ManifestRow::new([*row])).collect(),
        referral_code: referral_code.map(str::to_string),
    }
}

#[tokio::test]
async fn inline_quantity_row_is_matched_at_medium_and_priced_per_unit() {
    let harness = Harness::memory();
    let devices = harness.seed_catalog().await;

    let detail = harness
        .services
        .estimates
        .submit(submission(&["iphone 13 pro 256gb x2"], None), &Principal::system(), CORRELATION)
        .await
        .expect("estimate");

    let line = &detail.lines[0];
    assert_eq!(line.device_id, Some(devices[0]));
    assert_eq!(line.confidence, MatchConfidence::Medium);
    assert_eq!(line.quantity, 2);
    assert_eq!(line.indicative_price, Some(dec("500")));
    assert_eq!(detail.quote.totals.total_indicative, dec("1000"));
    assert_eq!(detail.quote.status, BulkQuoteStatus::Estimated);

    let stored = harness.services.estimates.get(&detail.quote.id).await.expect("stored");
    assert_eq!(stored, detail);
}

#[tokio::test]
async fn estimate_persists_through_sqlite_repositories() {
    let harness = Harness::sqlite().await;
    harness.seed_catalog().await;

    let detail = harness
        .services
        .estimates
        .submit(
            submission(&["iphone 13 pro 256gb x2", "nokia brick"], None),
            &Principal::system(),
            CORRELATION,
        )
        .await
        .expect("estimate");

    let stored = harness.services.estimates.get(&detail.quote.id).await.expect("stored");
    assert_eq!(stored.lines.len(), 2);
    assert_eq!(stored.quote.totals.matched_count, 1);
    assert_eq!(stored.quote.totals.unmatched_count, 1);
    assert_eq!(stored.quote.totals.total_indicative, dec("1000"));
}

#[tokio::test]
async fn device_registered_after_the_list_is_flagged_unpriced_not_zero() {
    let harness = Harness::memory();
    harness.seed_catalog().await;
    let pixel = harness
        .services
        .catalog
        .register_device(NewDevice {
            make: "Google".to_string(),
            model: "Pixel 7".to_string(),
            storage: "128GB".to_string(),
            category: phones(),
        })
        .await
        .expect("register");

    let detail = harness
        .services
        .estimates
        .submit(
            submission(&["google pixel 7 128gb x2", "iphone 13 128gb"], None),
            &Principal::system(),
            CORRELATION,
        )
        .await
        .expect("estimate");

    let line = &detail.lines[0];
    assert_eq!(line.device_id, Some(pixel.id));
    assert_eq!(line.indicative_price, None);
    assert!(line.price_issue.is_some());
    assert_eq!(detail.quote.totals.unpriced_count, 1);
    assert_eq!(detail.quote.totals.total_indicative, dec("300"));
}

#[tokio::test]
async fn corrected_line_is_learned_as_a_high_confidence_alias() {
    let harness = Harness::memory();
    let devices = harness.seed_catalog().await;

    let first = harness
        .services
        .estimates
        .submit(submission(&["ip13p 256 x3"], None), &Principal::system(), CORRELATION)
        .await
        .expect("estimate");
    assert_eq!(first.lines[0].device_id, None);

    let corrected = harness
        .services
        .aliases
        .correct_line(&first.quote.id, 1, devices[0], &Principal::system(), CORRELATION)
        .await
        .expect("correct");
    assert_eq!(corrected.lines[0].confidence, MatchConfidence::High);
    assert_eq!(corrected.quote.totals.total_indicative, dec("1500"));

    let second = harness
        .services
        .estimates
        .submit(submission(&["IP13P-256"], None), &Principal::system(), CORRELATION)
        .await
        .expect("second estimate");
    assert_eq!(second.lines[0].device_id, Some(devices[0]));
    assert_eq!(second.lines[0].confidence, MatchConfidence::High);
}

#[tokio::test]
async fn mode_b_partner_estimates_at_the_discounted_rate() {
    let harness = Harness::memory();
    harness.seed_catalog().await;
    let partner_id = harness.seed_partner("SHOPB", &[PartnerMode::B]).await;
    let principal = Principal {
        id: "u-7".to_string(),
        email: "desk@shopb.test".to_string(),
        partner_id: Some(partner_id.clone()),
        modes: BTreeSet::from([PartnerMode::B]),
        admin: false,
    };

    let detail = harness
        .services
        .estimates
        .submit(submission(&["iphone 13 pro 256gb"], None), &principal, CORRELATION)
        .await
        .expect("estimate");

    assert_eq!(detail.lines[0].indicative_price, Some(dec("400")));
    assert_eq!(detail.quote.partner.as_ref().map(|p| p.mode), Some(PartnerMode::B));
}

#[tokio::test]
async fn unknown_referral_code_is_a_validation_error() {
    let harness = Harness::memory();
    harness.seed_catalog().await;

    let error = harness
        .services
        .estimates
        .submit(submission(&["iphone 13 pro 256gb"], Some("NOPE")), &Principal::system(), CORRELATION)
        .await
        .expect_err("unknown code");

    assert!(matches!(
        error,
        ApplicationError::Domain(DomainError::Validation { ref field, .. }) if field == "referral_code"
    ));
}

#[tokio::test]
async fn rejected_transition_leaves_status_unchanged() {
    let harness = Harness::memory();
    let devices = harness.seed_catalog().await;
    let quote = harness
        .services
        .estimates
        .quote_device(
            QuoteRequest { device_id: devices[1], category: phones(), grade: Grade::B, referral_code: None },
            &Principal::system(),
            CORRELATION,
        )
        .await
        .expect("quote");

    let error = harness
        .services
        .lifecycle
        .transition_quote(&quote.id, QuoteStatus::Paid, &TransitionPayload::default(), &audit())
        .await
        .expect_err("quoted -> paid is not an edge");
    assert!(matches!(error, ApplicationError::Domain(DomainError::Transition(_))));

    let stored = harness.services.repos.quotes.load(&quote.id.0).await.expect("load").expect("quote");
    assert_eq!(stored.status, QuoteStatus::Quoted);
    assert_eq!(stored.timestamps, StatusTimestamps::default());
}

#[tokio::test]
async fn losing_a_status_race_is_a_conflict() {
    let harness = Harness::memory();
    let devices = harness.seed_catalog().await;
    let quote = harness
        .services
        .estimates
        .quote_device(
            QuoteRequest { device_id: devices[0], category: phones(), grade: Grade::A, referral_code: None },
            &Principal::system(),
            CORRELATION,
        )
        .await
        .expect("quote");

    // Another writer commits first while this caller still holds the `quoted` read.
    let mut stale = quote.clone();
    stale.status = QuoteStatus::Cancelled;
    harness
        .services
        .repos
        .quotes
        .commit_transition(&stale, QuoteStatus::Quoted, &[])
        .await
        .expect("concurrent cancel");

    let mut accepted = quote.clone();
    accepted.status = QuoteStatus::Accepted;
    let error = harness
        .services
        .repos
        .quotes
        .commit_transition(&accepted, QuoteStatus::Quoted, &[])
        .await
        .expect_err("stale read");
    let error = ApplicationError::from(error);
    assert!(matches!(error, ApplicationError::Domain(DomainError::Conflict(_))));
}

#[tokio::test]
async fn paying_a_referred_quote_accrues_exactly_one_entry_and_notifies() {
    let harness = Harness::memory();
    let devices = harness.seed_catalog().await;
    let partner_id = harness.seed_partner("REFA", &[PartnerMode::A]).await;
    let quote_id = harness.inspected_quote(devices[0], Some("refa")).await;

    let report = harness
        .services
        .lifecycle
        .transition_quote(&quote_id, QuoteStatus::Paid, &TransitionPayload::default(), &audit())
        .await
        .expect("pay");
    assert!(report.side_effect_failures.is_empty());
    assert!(report.entity.timestamps.paid_at.is_some());

    let again = harness
        .services
        .commissions
        .accrue_for_quote(&report.entity, &audit())
        .await
        .expect("repeat accrual");
    let entries = harness.services.commissions.entries(&partner_id).await.expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(again.map(|entry| entry.id), Some(entries[0].id.clone()));
    assert_eq!(entries[0].amount, dec("50.00"));

    let notices = harness.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].entity_id, quote_id.0);
    assert_eq!(notices[0].amount, dec("500"));
}

#[tokio::test]
async fn failed_side_effects_are_reported_without_undoing_the_payment() {
    let harness = Harness::memory_with(AppConfig::default(), RecordingNotifier::failing());
    let devices = harness.seed_catalog().await;
    harness.seed_partner("REFA", &[PartnerMode::A]).await;
    let quote_id = harness.inspected_quote(devices[0], Some("REFA")).await;
    harness.store().fail_ledger_writes(true);

    let report = harness
        .services
        .lifecycle
        .transition_quote(&quote_id, QuoteStatus::Paid, &TransitionPayload::default(), &audit())
        .await
        .expect("payment commits");

    let effects: Vec<_> = report.side_effect_failures.iter().map(|failure| failure.effect).collect();
    assert_eq!(effects, vec!["accrue_commission", "notify_paid"]);
    let stored =
        harness.services.repos.quotes.load(&quote_id.0).await.expect("load").expect("quote");
    assert_eq!(stored.status, QuoteStatus::Paid);
    assert!(harness
        .audit_sink
        .events()
        .iter()
        .any(|event| event.event_type == "lifecycle.side_effect_failed"));
}

#[tokio::test]
async fn cancelling_an_order_relists_its_items_atomically() {
    let harness = Harness::sqlite().await;
    let devices = harness.seed_catalog().await;
    let orders = &harness.services.repos.orders;
    for id in ["INV-1", "INV-2"] {
        orders
            .save_inventory_item(InventoryItem {
                id: InventoryItemId(id.to_string()),
                device_id: devices[0],
                grade: Grade::B,
                price: dec("420"),
                status: InventoryStatus::Sold,
                updated_at: Utc::now(),
            })
            .await
            .expect("inventory");
    }
    let now = Utc::now();
    orders
        .insert(Order {
            id: OrderId("ORD-1".to_string()),
            customer_email: "buyer@shop.test".to_string(),
            items: vec![InventoryItemId("INV-1".to_string()), InventoryItemId("INV-2".to_string())],
            add_ons: Vec::new(),
            totals: OrderTotals { subtotal: dec("840"), total: dec("840"), ..OrderTotals::default() },
            status: OrderStatus::Paid,
            shipping: None,
            timestamps: StatusTimestamps::default(),
            created_at: now,
            updated_at: now,
        })
        .await
        .expect("order");

    let report = harness
        .services
        .lifecycle
        .transition_order(
            &OrderId("ORD-1".to_string()),
            OrderStatus::Cancelled,
            &TransitionPayload::default(),
            &audit(),
        )
        .await
        .expect("cancel");

    assert_eq!(report.entity.status, OrderStatus::Cancelled);
    for id in ["INV-1", "INV-2"] {
        let item = orders
            .find_inventory_item(&InventoryItemId(id.to_string()))
            .await
            .expect("find")
            .expect("item");
        assert_eq!(item.status, InventoryStatus::Listed);
    }
}

#[tokio::test]
async fn chunk_failure_reports_how_many_devices_were_applied() {
    let mut config = AppConfig::default();
    config.pricing.batch_chunk_size = 1;
    let harness = Harness::memory_with(config, RecordingNotifier::default());
    let devices = harness.seed_catalog().await;
    harness.store().fail_price_chunks_after(1);

    let error = harness
        .services
        .pricing
        .adjust(
            &PriceListId("PL-PHONES-1".to_string()),
            AdjustmentRequest {
                device_ids: devices.clone(),
                adjustments: vec![PriceAdjustment::Percent { percent: dec("10") }],
            },
            &audit(),
        )
        .await
        .expect_err("second chunk fails");
    assert!(matches!(error, ApplicationError::Dependency { applied: 1, .. }));

    let list = harness
        .services
        .repos
        .price_lists
        .find_by_id(&PriceListId("PL-PHONES-1".to_string()))
        .await
        .expect("find")
        .expect("list");
    assert_eq!(list.prices[&devices[0]][&Grade::A], dec("550"));
    assert_eq!(list.prices[&devices[1]][&Grade::A], dec("300"));
    let snapshots = harness
        .services
        .repos
        .price_lists
        .list_snapshots(&list.id)
        .await
        .expect("snapshots");
    assert_eq!(snapshots.len(), 1);
}

#[tokio::test]
async fn reimporting_a_list_reuses_devices_and_snapshots_prices() {
    let harness = Harness::sqlite().await;
    let first = harness.seed_catalog().await;
    let second = harness.seed_catalog().await;

    assert_eq!(first.len(), 3);
    assert!(second.is_empty(), "devices are resolved by key on re-import");
    let key = DeviceKey::new(&phones(), "apple", "IPHONE 13 PRO", "256 gb");
    let device = harness.services.repos.devices.find_by_key(&key).await.expect("find").expect("device");
    assert_eq!(device.id, first[0]);

    let snapshots = harness
        .services
        .repos
        .price_lists
        .list_snapshots(&PriceListId("PL-PHONES-1".to_string()))
        .await
        .expect("snapshots");
    assert_eq!(snapshots.len(), 1);
}

#[tokio::test]
async fn payout_settles_pending_entries_once() {
    let harness = Harness::sqlite().await;
    let devices = harness.seed_catalog().await;
    let partner_id = harness.seed_partner("REFA", &[PartnerMode::A]).await;
    for device in [devices[0], devices[2]] {
        let quote_id = harness.inspected_quote(device, Some("REFA")).await;
        harness
            .services
            .lifecycle
            .transition_quote(&quote_id, QuoteStatus::Paid, &TransitionPayload::default(), &audit())
            .await
            .expect("pay");
    }
    let entries = harness.services.commissions.entries(&partner_id).await.expect("entries");
    let ids: Vec<_> = entries.iter().map(|entry| entry.id.clone()).collect();

    let balance = harness.services.commissions.balance(&partner_id).await.expect("balance");
    assert_eq!(balance.pending, dec("75.00"));

    let payout = harness
        .services
        .commissions
        .settle(&partner_id, &ids, "ACH-2026-10", &audit())
        .await
        .expect("settle");
    assert_eq!(payout.amount, dec("75.00"));

    let replay = harness
        .services
        .commissions
        .settle(&partner_id, &ids, "ACH-2026-10b", &audit())
        .await
        .expect_err("already settled");
    assert!(matches!(replay, ApplicationError::Domain(DomainError::Conflict(_))));

    let settled = harness.services.commissions.entries(&partner_id).await.expect("entries");
    assert!(settled.iter().all(|entry| entry.status == LedgerEntryStatus::Paid));
    let balance = harness.services.commissions.balance(&partner_id).await.expect("balance");
    assert_eq!(balance.pending, Decimal::ZERO);
    assert_eq!(balance.paid, dec("75.00"));
}
