use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use tradein_core::domain::bulk_quote::{
    BulkQuote, BulkQuoteDetail, BulkQuoteId, BulkQuoteStatus, BulkTotals, DeviceLine,
};
use tradein_core::domain::order::InventoryItemId;

use super::{document, BulkQuoteRepository, LifecycleStore, RepositoryError};
use crate::DbPool;

const TABLE: &str = "bulk_quote";

pub struct SqlBulkQuoteRepository {
    pool: DbPool,
}

impl SqlBulkQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LifecycleStore<BulkQuote> for SqlBulkQuoteRepository {
    async fn load(&self, id: &str) -> Result<Option<BulkQuote>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        document::load(&mut conn, TABLE, id).await
    }

    async fn commit_transition(
        &self,
        entity: &BulkQuote,
        expected: BulkQuoteStatus,
        _relist: &[InventoryItemId],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let current: Option<BulkQuote> = document::load(&mut tx, TABLE, &entity.id.0).await?;

        // Keep totals written by line corrections; only lifecycle fields change.
        let merged = match current {
            Some(mut stored) => {
                stored.status = entity.status;
                stored.timestamps = entity.timestamps.clone();
                stored.shipping = entity.shipping.clone();
                stored.updated_at = entity.updated_at;
                stored
            }
            None => entity.clone(),
        };
        document::compare_and_set(&mut tx, TABLE, entity, &merged, expected).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl BulkQuoteRepository for SqlBulkQuoteRepository {
    async fn insert_detail(&self, detail: BulkQuoteDetail) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        document::insert(&mut tx, TABLE, &detail.quote, &detail.quote.created_at.to_rfc3339())
            .await?;

        for line in &detail.lines {
            sqlx::query(
                "INSERT INTO bulk_quote_line (bulk_quote_id, line_no, document) VALUES (?, ?, ?)",
            )
            .bind(&detail.quote.id.0)
            .bind(i64::from(line.line_no))
            .bind(serde_json::to_string(line)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_detail(
        &self,
        id: &BulkQuoteId,
    ) -> Result<Option<BulkQuoteDetail>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let Some(quote) = document::load::<BulkQuote>(&mut conn, TABLE, &id.0).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT document FROM bulk_quote_line WHERE bulk_quote_id = ? ORDER BY line_no",
        )
        .bind(&id.0)
        .fetch_all(&mut *conn)
        .await?;

        let lines = rows
            .iter()
            .map(|row| {
                let document: String = row.try_get("document")?;
                serde_json::from_str::<DeviceLine>(&document).map_err(RepositoryError::from)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(BulkQuoteDetail { quote, lines }))
    }

    async fn update_line(
        &self,
        id: &BulkQuoteId,
        line: DeviceLine,
        totals: BulkTotals,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE bulk_quote_line SET document = ? WHERE bulk_quote_id = ? AND line_no = ?",
        )
        .bind(serde_json::to_string(&line)?)
        .bind(&id.0)
        .bind(i64::from(line.line_no))
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                entity: "device_line",
                id: format!("{}#{}", id, line.line_no),
            });
        }

        let mut quote: BulkQuote = document::load(&mut tx, TABLE, &id.0)
            .await?
            .ok_or_else(|| RepositoryError::NotFound { entity: "bulk_quote", id: id.0.clone() })?;
        quote.totals = totals;
        quote.updated_at = Utc::now();

        sqlx::query("UPDATE bulk_quote SET document = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&quote)?)
            .bind(quote.updated_at.to_rfc3339())
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
