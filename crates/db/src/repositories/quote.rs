use async_trait::async_trait;

use tradein_core::domain::order::InventoryItemId;
use tradein_core::domain::quote::{Quote, QuoteStatus};

use super::{document, LifecycleStore, QuoteRepository, RepositoryError};
use crate::DbPool;

const TABLE: &str = "trade_quote";

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LifecycleStore<Quote> for SqlQuoteRepository {
    async fn load(&self, id: &str) -> Result<Option<Quote>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        document::load(&mut conn, TABLE, id).await
    }

    async fn commit_transition(
        &self,
        entity: &Quote,
        expected: QuoteStatus,
        _relist: &[InventoryItemId],
    ) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        document::compare_and_set(&mut conn, TABLE, entity, entity, expected).await
    }
}

#[async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn insert(&self, quote: Quote) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        document::insert(&mut conn, TABLE, &quote, &quote.created_at.to_rfc3339()).await
    }
}
