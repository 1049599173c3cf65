use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

use tradein_core::domain::device::{CategoryId, DeviceId};
use tradein_core::domain::price_list::{
    Category, GradePrices, PriceList, PriceListId, PriceListSnapshot, PriceUpdate,
};

use super::device::device_id_param;
use super::{grade_prices_json, parse_rfc3339, PriceListRepository, RepositoryError};
use crate::DbPool;

type PriceMap = BTreeMap<DeviceId, GradePrices>;

pub struct SqlPriceListRepository {
    pool: DbPool,
}

impl SqlPriceListRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PriceListRepository for SqlPriceListRepository {
    async fn find_by_id(&self, id: &PriceListId) -> Result<Option<PriceList>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(
            "SELECT id, name, category_id, effective_date, currency, created_at, updated_at
             FROM price_list WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let prices = load_prices(&mut conn, id).await?;
        price_list_from_row(&row, prices).map(Some)
    }

    async fn find_category(&self, id: &CategoryId) -> Result<Option<Category>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, active_price_list_id FROM category WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Category {
                id: CategoryId(row.try_get("id")?),
                name: row.try_get("name")?,
                active_price_list: row
                    .try_get::<Option<String>, _>("active_price_list_id")?
                    .map(PriceListId),
            })
        })
        .transpose()
    }

    async fn save_category(&self, category: Category) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO category (id, name, active_price_list_id) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                active_price_list_id = excluded.active_price_list_id
            "#,
        )
        .bind(&category.id.0)
        .bind(&category.name)
        .bind(category.active_price_list.as_ref().map(|id| id.0.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save(&self, price_list: PriceList) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO price_list (
                id, name, category_id, effective_date, currency, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                category_id = excluded.category_id,
                effective_date = excluded.effective_date,
                currency = excluded.currency,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&price_list.id.0)
        .bind(&price_list.name)
        .bind(&price_list.category.0)
        .bind(price_list.effective_date.format("%Y-%m-%d").to_string())
        .bind(&price_list.currency)
        .bind(price_list.created_at.to_rfc3339())
        .bind(price_list.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        let previous = load_prices(&mut tx, &price_list.id).await?;
        if !previous.is_empty() {
            insert_snapshot(&mut tx, &price_list.id, &previous).await?;
        }

        sqlx::query("DELETE FROM price_list_entry WHERE price_list_id = ?")
            .bind(&price_list.id.0)
            .execute(&mut *tx)
            .await?;
        for (device_id, prices) in &price_list.prices {
            upsert_entry(&mut tx, &price_list.id, *device_id, prices).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn apply_chunk(
        &self,
        id: &PriceListId,
        updates: &[PriceUpdate],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE price_list SET updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(RepositoryError::NotFound { entity: "price_list", id: id.0.clone() });
        }

        for update in updates {
            upsert_entry(&mut tx, id, update.device_id, &update.prices).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn snapshot(&self, id: &PriceListId) -> Result<PriceListSnapshot, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM price_list WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Err(RepositoryError::NotFound { entity: "price_list", id: id.0.clone() });
        }

        let prices = load_prices(&mut tx, id).await?;
        let snapshot = insert_snapshot(&mut tx, id, &prices).await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    async fn list_snapshots(
        &self,
        id: &PriceListId,
    ) -> Result<Vec<PriceListSnapshot>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, price_list_id, prices_json, taken_at
             FROM price_list_snapshot WHERE price_list_id = ? ORDER BY taken_at, id",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(snapshot_from_row).collect()
    }
}

async fn load_prices(
    conn: &mut SqliteConnection,
    id: &PriceListId,
) -> Result<PriceMap, RepositoryError> {
    let rows = sqlx::query(
        "SELECT device_id, prices_json FROM price_list_entry WHERE price_list_id = ? ORDER BY device_id",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;

    let mut prices = PriceMap::new();
    for row in rows {
        let device_id: i64 = row.try_get("device_id")?;
        let grade_prices: GradePrices =
            serde_json::from_str(&row.try_get::<String, _>("prices_json")?)?;
        prices.insert(DeviceId(u64::try_from(device_id).map_err(RepositoryError::decode)?), grade_prices);
    }
    Ok(prices)
}

async fn upsert_entry(
    conn: &mut SqliteConnection,
    id: &PriceListId,
    device_id: DeviceId,
    prices: &GradePrices,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"
        INSERT INTO price_list_entry (price_list_id, device_id, prices_json) VALUES (?, ?, ?)
        ON CONFLICT(price_list_id, device_id) DO UPDATE SET prices_json = excluded.prices_json
        "#,
    )
    .bind(&id.0)
    .bind(device_id_param(device_id)?)
    .bind(grade_prices_json(prices)?)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn insert_snapshot(
    conn: &mut SqliteConnection,
    id: &PriceListId,
    prices: &PriceMap,
) -> Result<PriceListSnapshot, RepositoryError> {
    let snapshot = PriceListSnapshot {
        id: format!("SNAP-{}", Uuid::new_v4()),
        price_list_id: id.clone(),
        prices: prices.clone(),
        taken_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO price_list_snapshot (id, price_list_id, prices_json, taken_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&snapshot.id)
    .bind(&id.0)
    .bind(serde_json::to_string(&snapshot.prices)?)
    .bind(snapshot.taken_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(snapshot)
}

fn price_list_from_row(row: &SqliteRow, prices: PriceMap) -> Result<PriceList, RepositoryError> {
    let effective_raw: String = row.try_get("effective_date")?;
    let effective_date = NaiveDate::parse_from_str(&effective_raw, "%Y-%m-%d").map_err(|err| {
        RepositoryError::Decode(format!("invalid price list effective_date '{}': {}", effective_raw, err))
    })?;

    Ok(PriceList {
        id: PriceListId(row.try_get("id")?),
        name: row.try_get("name")?,
        category: CategoryId(row.try_get("category_id")?),
        effective_date,
        currency: row.try_get("currency")?,
        prices,
        created_at: parse_rfc3339("price list created_at", &row.try_get::<String, _>("created_at")?)?,
        updated_at: parse_rfc3339("price list updated_at", &row.try_get::<String, _>("updated_at")?)?,
    })
}

fn snapshot_from_row(row: &SqliteRow) -> Result<PriceListSnapshot, RepositoryError> {
    Ok(PriceListSnapshot {
        id: row.try_get("id")?,
        price_list_id: PriceListId(row.try_get("price_list_id")?),
        prices: serde_json::from_str(&row.try_get::<String, _>("prices_json")?)?,
        taken_at: parse_rfc3339("snapshot taken_at", &row.try_get::<String, _>("taken_at")?)?,
    })
}
