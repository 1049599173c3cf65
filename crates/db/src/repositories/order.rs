use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use tradein_core::domain::order::{
    InventoryItem, InventoryItemId, InventoryStatus, Order, OrderStatus,
};

use super::{document, LifecycleStore, OrderRepository, RepositoryError};
use crate::DbPool;

const TABLE: &str = "shop_order";

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LifecycleStore<Order> for SqlOrderRepository {
    async fn load(&self, id: &str) -> Result<Option<Order>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        document::load(&mut conn, TABLE, id).await
    }

    async fn commit_transition(
        &self,
        entity: &Order,
        expected: OrderStatus,
        relist: &[InventoryItemId],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        document::compare_and_set(&mut tx, TABLE, entity, entity, expected).await?;

        let now = Utc::now();
        for item_id in relist {
            let row = sqlx::query("SELECT document FROM inventory_item WHERE id = ?")
                .bind(&item_id.0)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| RepositoryError::NotFound {
                    entity: "inventory_item",
                    id: item_id.0.clone(),
                })?;
            let mut item: InventoryItem = serde_json::from_str(&row.try_get::<String, _>("document")?)?;
            item.status = InventoryStatus::Listed;
            item.updated_at = now;

            sqlx::query(
                "UPDATE inventory_item SET status = ?, document = ?, updated_at = ? WHERE id = ?",
            )
            .bind(item.status.as_str())
            .bind(serde_json::to_string(&item)?)
            .bind(now.to_rfc3339())
            .bind(&item_id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn insert(&self, order: Order) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        document::insert(&mut conn, TABLE, &order, &order.created_at.to_rfc3339()).await
    }

    async fn save_inventory_item(&self, item: InventoryItem) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO inventory_item (id, status, document, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id.0)
        .bind(item.status.as_str())
        .bind(serde_json::to_string(&item)?)
        .bind(item.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_inventory_item(
        &self,
        id: &InventoryItemId,
    ) -> Result<Option<InventoryItem>, RepositoryError> {
        let row = sqlx::query("SELECT document FROM inventory_item WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let document: String = row.try_get("document")?;
            serde_json::from_str(&document).map_err(RepositoryError::from)
        })
        .transpose()
    }
}
