use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use tradein_core::commission::validate_payout_claim;
use tradein_core::domain::alias::DeviceAlias;
use tradein_core::domain::bulk_quote::{
    BulkQuote, BulkQuoteDetail, BulkQuoteId, BulkTotals, DeviceLine,
};
use tradein_core::domain::commission::{
    CommissionLedgerEntry, LedgerEntryId, LedgerEntryStatus, Payout, PayoutId, SourceKind,
};
use tradein_core::domain::device::{CategoryId, Device, DeviceId, DeviceKey, NewDevice};
use tradein_core::domain::order::{InventoryItem, InventoryItemId, InventoryStatus, Order};
use tradein_core::domain::partner::{Partner, PartnerId};
use tradein_core::domain::price_list::{
    Category, PriceList, PriceListId, PriceListSnapshot, PriceUpdate,
};
use tradein_core::domain::quote::Quote;
use tradein_core::flows::LifecycleEntity;

use super::{
    AliasRepository, BulkQuoteRepository, CommissionLedgerRepository, DeviceRepository,
    LifecycleStore, OrderRepository, PartnerRepository, PriceListRepository, QuoteRepository,
    RepositoryError,
};

#[derive(Default)]
struct MemoryState {
    device_counter: u64,
    devices: BTreeMap<DeviceId, Device>,
    aliases: Vec<DeviceAlias>,
    categories: HashMap<CategoryId, Category>,
    price_lists: HashMap<PriceListId, PriceList>,
    snapshots: Vec<PriceListSnapshot>,
    quotes: HashMap<String, Quote>,
    bulk_quotes: HashMap<String, BulkQuoteDetail>,
    orders: HashMap<String, Order>,
    inventory: HashMap<InventoryItemId, InventoryItem>,
    partners: HashMap<PartnerId, Partner>,
    ledger: Vec<CommissionLedgerEntry>,
    payouts: Vec<Payout>,
}

/// Single-lock store implementing every repository trait. Multi-entity
/// writes happen under one write guard, so they are all-or-nothing.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
    chunk_budget: Mutex<Option<usize>>,
    fail_ledger: AtomicBool,
}

impl InMemoryStore {
    /// Lets `chunks` more price chunks succeed, then fails every later one.
    pub fn fail_price_chunks_after(&self, chunks: usize) {
        match self.chunk_budget.lock() {
            Ok(mut budget) => *budget = Some(chunks),
            Err(poisoned) => *poisoned.into_inner() = Some(chunks),
        }
    }

    pub fn fail_ledger_writes(&self, fail: bool) {
        self.fail_ledger.store(fail, Ordering::SeqCst);
    }

    fn take_chunk_budget(&self) -> Result<(), RepositoryError> {
        let mut budget = match self.chunk_budget.lock() {
            Ok(budget) => budget,
            Err(poisoned) => poisoned.into_inner(),
        };
        match budget.as_mut() {
            Some(0) => Err(RepositoryError::Unavailable("price chunk write rejected".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_ledger(&self) -> Result<(), RepositoryError> {
        if self.fail_ledger.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("ledger write rejected".to_string()));
        }
        Ok(())
    }
}

fn stale<E: LifecycleEntity>(entity: &E, expected: E::Status) -> RepositoryError {
    RepositoryError::StaleStatus {
        entity: E::table().entity.as_str(),
        id: entity.entity_id(),
        expected: expected.to_string(),
    }
}

fn missing<E: LifecycleEntity>(entity: &E) -> RepositoryError {
    RepositoryError::NotFound { entity: E::table().entity.as_str(), id: entity.entity_id() }
}

#[async_trait::async_trait]
impl DeviceRepository for InMemoryStore {
    async fn find_by_id(&self, id: DeviceId) -> Result<Option<Device>, RepositoryError> {
        Ok(self.state.read().await.devices.get(&id).cloned())
    }

    async fn find_by_key(&self, key: &DeviceKey) -> Result<Option<Device>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.devices.values().find(|device| &device.key() == key).cloned())
    }

    async fn list_by_category(&self, category: &CategoryId) -> Result<Vec<Device>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.devices.values().filter(|device| &device.category == category).cloned().collect())
    }

    async fn create(&self, device: NewDevice) -> Result<Device, RepositoryError> {
        let mut state = self.state.write().await;
        let key = device.key();
        if state.devices.values().any(|existing| existing.key() == key) {
            return Err(RepositoryError::Conflict(format!(
                "device {} {} {} already exists in category {}",
                device.make, device.model, device.storage, device.category
            )));
        }
        state.device_counter += 1;
        let created = Device {
            id: DeviceId(state.device_counter),
            make: device.make,
            model: device.model,
            storage: device.storage,
            category: device.category,
            created_at: Utc::now(),
        };
        state.devices.insert(created.id, created.clone());
        Ok(created)
    }
}

#[async_trait::async_trait]
impl AliasRepository for InMemoryStore {
    async fn append(&self, alias: DeviceAlias) -> Result<(), RepositoryError> {
        self.state.write().await.aliases.push(alias);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<DeviceAlias>, RepositoryError> {
        Ok(self.state.read().await.aliases.clone())
    }

    async fn delete(&self, alias: &str) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.aliases.len();
        state.aliases.retain(|stored| stored.alias != alias);
        Ok((before - state.aliases.len()) as u64)
    }
}

#[async_trait::async_trait]
impl PriceListRepository for InMemoryStore {
    async fn find_by_id(&self, id: &PriceListId) -> Result<Option<PriceList>, RepositoryError> {
        Ok(self.state.read().await.price_lists.get(id).cloned())
    }

    async fn find_category(&self, id: &CategoryId) -> Result<Option<Category>, RepositoryError> {
        Ok(self.state.read().await.categories.get(id).cloned())
    }

    async fn save_category(&self, category: Category) -> Result<(), RepositoryError> {
        self.state.write().await.categories.insert(category.id.clone(), category);
        Ok(())
    }

    async fn save(&self, price_list: PriceList) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(previous) = state.price_lists.get(&price_list.id) {
            let snapshot = PriceListSnapshot {
                id: format!("SNAP-{}", Uuid::new_v4()),
                price_list_id: previous.id.clone(),
                prices: previous.prices.clone(),
                taken_at: Utc::now(),
            };
            state.snapshots.push(snapshot);
        }
        state.price_lists.insert(price_list.id.clone(), price_list);
        Ok(())
    }

    async fn apply_chunk(
        &self,
        id: &PriceListId,
        updates: &[PriceUpdate],
    ) -> Result<(), RepositoryError> {
        self.take_chunk_budget()?;
        let mut state = self.state.write().await;
        let list = state
            .price_lists
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound { entity: "price_list", id: id.0.clone() })?;
        for update in updates {
            list.prices.insert(update.device_id, update.prices.clone());
        }
        list.updated_at = Utc::now();
        Ok(())
    }

    async fn snapshot(&self, id: &PriceListId) -> Result<PriceListSnapshot, RepositoryError> {
        let mut state = self.state.write().await;
        let list = state
            .price_lists
            .get(id)
            .ok_or_else(|| RepositoryError::NotFound { entity: "price_list", id: id.0.clone() })?;
        let snapshot = PriceListSnapshot {
            id: format!("SNAP-{}", Uuid::new_v4()),
            price_list_id: list.id.clone(),
            prices: list.prices.clone(),
            taken_at: Utc::now(),
        };
        state.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    async fn list_snapshots(
        &self,
        id: &PriceListId,
    ) -> Result<Vec<PriceListSnapshot>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.snapshots.iter().filter(|snapshot| &snapshot.price_list_id == id).cloned().collect())
    }
}

#[async_trait::async_trait]
impl LifecycleStore<Quote> for InMemoryStore {
    async fn load(&self, id: &str) -> Result<Option<Quote>, RepositoryError> {
        Ok(self.state.read().await.quotes.get(id).cloned())
    }

    async fn commit_transition(
        &self,
        entity: &Quote,
        expected: <Quote as LifecycleEntity>::Status,
        _relist: &[InventoryItemId],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let stored = state.quotes.get_mut(&entity.id.0).ok_or_else(|| missing(entity))?;
        if stored.status != expected {
            return Err(stale(entity, expected));
        }
        *stored = entity.clone();
        Ok(())
    }
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryStore {
    async fn insert(&self, quote: Quote) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.quotes.contains_key(&quote.id.0) {
            return Err(RepositoryError::Conflict(format!("quote `{}` already exists", quote.id)));
        }
        state.quotes.insert(quote.id.0.clone(), quote);
        Ok(())
    }
}

#[async_trait::async_trait]
impl LifecycleStore<BulkQuote> for InMemoryStore {
    async fn load(&self, id: &str) -> Result<Option<BulkQuote>, RepositoryError> {
        Ok(self.state.read().await.bulk_quotes.get(id).map(|detail| detail.quote.clone()))
    }

    async fn commit_transition(
        &self,
        entity: &BulkQuote,
        expected: <BulkQuote as LifecycleEntity>::Status,
        _relist: &[InventoryItemId],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let stored = state.bulk_quotes.get_mut(&entity.id.0).ok_or_else(|| missing(entity))?;
        if stored.quote.status != expected {
            return Err(stale(entity, expected));
        }
        // Line corrections may have moved the totals since the caller loaded.
        stored.quote.status = entity.status;
        stored.quote.timestamps = entity.timestamps.clone();
        stored.quote.shipping = entity.shipping.clone();
        stored.quote.updated_at = entity.updated_at;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BulkQuoteRepository for InMemoryStore {
    async fn insert_detail(&self, detail: BulkQuoteDetail) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.bulk_quotes.contains_key(&detail.quote.id.0) {
            return Err(RepositoryError::Conflict(format!(
                "bulk quote `{}` already exists",
                detail.quote.id
            )));
        }
        state.bulk_quotes.insert(detail.quote.id.0.clone(), detail);
        Ok(())
    }

    async fn find_detail(
        &self,
        id: &BulkQuoteId,
    ) -> Result<Option<BulkQuoteDetail>, RepositoryError> {
        Ok(self.state.read().await.bulk_quotes.get(&id.0).cloned())
    }

    async fn update_line(
        &self,
        id: &BulkQuoteId,
        line: DeviceLine,
        totals: BulkTotals,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let detail = state
            .bulk_quotes
            .get_mut(&id.0)
            .ok_or_else(|| RepositoryError::NotFound { entity: "bulk_quote", id: id.0.clone() })?;
        let slot = detail
            .lines
            .iter_mut()
            .find(|stored| stored.line_no == line.line_no)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "device_line",
                id: format!("{}#{}", id, line.line_no),
            })?;
        *slot = line;
        detail.quote.totals = totals;
        detail.quote.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait::async_trait]
impl LifecycleStore<Order> for InMemoryStore {
    async fn load(&self, id: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(self.state.read().await.orders.get(id).cloned())
    }

    async fn commit_transition(
        &self,
        entity: &Order,
        expected: <Order as LifecycleEntity>::Status,
        relist: &[InventoryItemId],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        match state.orders.get(&entity.id.0) {
            None => return Err(missing(entity)),
            Some(stored) if stored.status != expected => return Err(stale(entity, expected)),
            Some(_) => {}
        }
        if let Some(absent) = relist.iter().find(|item| !state.inventory.contains_key(*item)) {
            return Err(RepositoryError::NotFound { entity: "inventory_item", id: absent.0.clone() });
        }

        let now = Utc::now();
        for item_id in relist {
            if let Some(item) = state.inventory.get_mut(item_id) {
                item.status = InventoryStatus::Listed;
                item.updated_at = now;
            }
        }
        state.orders.insert(entity.id.0.clone(), entity.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryStore {
    async fn insert(&self, order: Order) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id.0) {
            return Err(RepositoryError::Conflict(format!("order `{}` already exists", order.id)));
        }
        state.orders.insert(order.id.0.clone(), order);
        Ok(())
    }

    async fn save_inventory_item(&self, item: InventoryItem) -> Result<(), RepositoryError> {
        self.state.write().await.inventory.insert(item.id.clone(), item);
        Ok(())
    }

    async fn find_inventory_item(
        &self,
        id: &InventoryItemId,
    ) -> Result<Option<InventoryItem>, RepositoryError> {
        Ok(self.state.read().await.inventory.get(id).cloned())
    }
}

#[async_trait::async_trait]
impl PartnerRepository for InMemoryStore {
    async fn find_by_id(&self, id: &PartnerId) -> Result<Option<Partner>, RepositoryError> {
        Ok(self.state.read().await.partners.get(id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Partner>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.partners.values().find(|partner| partner.code.eq_ignore_ascii_case(code)).cloned())
    }

    async fn save(&self, partner: Partner) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let code_taken = state.partners.values().any(|existing| {
            existing.id != partner.id && existing.code.eq_ignore_ascii_case(&partner.code)
        });
        if code_taken {
            return Err(RepositoryError::Conflict(format!(
                "partner code `{}` is already in use",
                partner.code
            )));
        }
        state.partners.insert(partner.id.clone(), partner);
        Ok(())
    }
}

#[async_trait::async_trait]
impl CommissionLedgerRepository for InMemoryStore {
    async fn insert_if_absent(
        &self,
        entry: CommissionLedgerEntry,
    ) -> Result<(CommissionLedgerEntry, bool), RepositoryError> {
        self.check_ledger()?;
        let mut state = self.state.write().await;
        let existing = state.ledger.iter().find(|stored| {
            stored.partner_id == entry.partner_id
                && stored.source_kind == entry.source_kind
                && stored.source_id == entry.source_id
        });
        if let Some(existing) = existing {
            return Ok((existing.clone(), false));
        }
        state.ledger.push(entry.clone());
        Ok((entry, true))
    }

    async fn find_by_source(
        &self,
        partner_id: &PartnerId,
        kind: SourceKind,
        source_id: &str,
    ) -> Result<Option<CommissionLedgerEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .ledger
            .iter()
            .find(|entry| {
                &entry.partner_id == partner_id
                    && entry.source_kind == kind
                    && entry.source_id == source_id
            })
            .cloned())
    }

    async fn list_for_partner(
        &self,
        partner_id: &PartnerId,
    ) -> Result<Vec<CommissionLedgerEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.ledger.iter().filter(|entry| &entry.partner_id == partner_id).cloned().collect())
    }

    async fn settle(
        &self,
        partner_id: &PartnerId,
        entry_ids: &[LedgerEntryId],
        reference: &str,
    ) -> Result<Payout, RepositoryError> {
        self.check_ledger()?;
        let mut state = self.state.write().await;
        let found: Vec<CommissionLedgerEntry> =
            state.ledger.iter().filter(|entry| entry_ids.contains(&entry.id)).cloned().collect();
        let amount = validate_payout_claim(partner_id, entry_ids, &found)
            .map_err(|error| RepositoryError::Conflict(error.to_string()))?;

        let now = Utc::now();
        let payout = Payout {
            id: PayoutId::generate(),
            partner_id: partner_id.clone(),
            amount,
            entry_ids: entry_ids.to_vec(),
            reference: reference.to_string(),
            created_at: now,
        };
        for entry in state.ledger.iter_mut().filter(|entry| entry_ids.contains(&entry.id)) {
            entry.status = LedgerEntryStatus::Paid;
            entry.payout_id = Some(payout.id.clone());
            entry.paid_at = Some(now);
        }
        state.payouts.push(payout.clone());
        Ok(payout)
    }

    async fn list_payouts(&self, partner_id: &PartnerId) -> Result<Vec<Payout>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.payouts.iter().filter(|payout| &payout.partner_id == partner_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use tradein_core::domain::commission::{
        CommissionLedgerEntry, LedgerEntryId, LedgerEntryStatus, SourceKind,
    };
    use tradein_core::domain::device::{CategoryId, DeviceId, NewDevice};
    use tradein_core::domain::grade::Grade;
    use tradein_core::domain::partner::PartnerId;
    use tradein_core::domain::quote::{Quote, QuoteStatus};

    use super::InMemoryStore;
    use crate::repositories::{
        CommissionLedgerRepository, DeviceRepository, LifecycleStore, QuoteRepository,
        RepositoryError,
    };

    fn new_device(model: &str) -> NewDevice {
        NewDevice {
            make: "Apple".to_string(),
            model: model.to_string(),
            storage: "128GB".to_string(),
            category: CategoryId("phones".to_string()),
        }
    }

    fn ledger_entry(id: &str, source: &str) -> CommissionLedgerEntry {
        CommissionLedgerEntry {
            id: LedgerEntryId(id.to_string()),
            partner_id: PartnerId("P-1".to_string()),
            source_kind: SourceKind::Quote,
            source_id: source.to_string(),
            amount: Decimal::from(12),
            status: LedgerEntryStatus::Pending,
            payout_id: None,
            created_at: Utc::now(),
            paid_at: None,
        }
    }

    #[tokio::test]
    async fn device_ids_are_sequential_and_keys_unique() {
        let store = InMemoryStore::default();
        let first = store.create(new_device("iPhone 12")).await.expect("create first");
        let second = store.create(new_device("iPhone 13")).await.expect("create second");
        assert_eq!(first.id, DeviceId(1));
        assert_eq!(second.id, DeviceId(2));

        let mut duplicate = new_device("IPHONE 12");
        duplicate.storage = "128 gb".to_string();
        let error = store.create(duplicate).await.expect_err("duplicate key");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn stale_status_commit_is_rejected() {
        let store = InMemoryStore::default();
        let quote = Quote::new(DeviceId(1), Grade::A, Decimal::from(300), "USD");
        store.insert(quote.clone()).await.expect("insert quote");

        let mut accepted = quote.clone();
        accepted.status = QuoteStatus::Accepted;
        store.commit_transition(&accepted, QuoteStatus::Quoted, &[]).await.expect("first commit");

        let mut cancelled = quote.clone();
        cancelled.status = QuoteStatus::Cancelled;
        let error = store
            .commit_transition(&cancelled, QuoteStatus::Quoted, &[])
            .await
            .expect_err("second writer read a stale status");
        assert!(matches!(error, RepositoryError::StaleStatus { .. }));

        let stored = LifecycleStore::<Quote>::load(&store, &quote.id.0)
            .await
            .expect("load quote")
            .expect("quote exists");
        assert_eq!(stored.status, QuoteStatus::Accepted);
    }

    #[tokio::test]
    async fn ledger_keeps_one_entry_per_source() {
        let store = InMemoryStore::default();
        let (first, inserted) =
            store.insert_if_absent(ledger_entry("CL-1", "Q-1")).await.expect("first insert");
        assert!(inserted);

        let (again, inserted) =
            store.insert_if_absent(ledger_entry("CL-2", "Q-1")).await.expect("second insert");
        assert!(!inserted);
        assert_eq!(again.id, first.id);

        let entries =
            store.list_for_partner(&PartnerId("P-1".to_string())).await.expect("list entries");
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn settle_is_all_or_nothing() {
        let store = InMemoryStore::default();
        store.insert_if_absent(ledger_entry("CL-1", "Q-1")).await.expect("insert");
        store.insert_if_absent(ledger_entry("CL-2", "Q-2")).await.expect("insert");
        let partner = PartnerId("P-1".to_string());

        let error = store
            .settle(
                &partner,
                &[LedgerEntryId("CL-1".to_string()), LedgerEntryId("CL-9".to_string())],
                "ACH-1",
            )
            .await
            .expect_err("unknown entry aborts payout");
        assert!(matches!(error, RepositoryError::Conflict(_)));

        let entries = store.list_for_partner(&partner).await.expect("list");
        assert!(entries.iter().all(|entry| entry.status == LedgerEntryStatus::Pending));

        let payout = store
            .settle(&partner, &[LedgerEntryId("CL-1".to_string())], "ACH-2")
            .await
            .expect("settle");
        assert_eq!(payout.amount, Decimal::from(12));

        let replay = store.settle(&partner, &[LedgerEntryId("CL-1".to_string())], "ACH-3").await;
        assert!(replay.is_err(), "an entry is claimed by at most one payout");
    }
}
