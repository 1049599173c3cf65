use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use tradein_core::domain::device::{CategoryId, Device, DeviceId, DeviceKey, NewDevice};

use super::{parse_rfc3339, DeviceRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDeviceRepository {
    pool: DbPool,
}

impl SqlDeviceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn key_text(key: &DeviceKey) -> String {
    format!("{}|{}|{}|{}", key.category, key.make, key.model, key.storage)
}

#[async_trait]
impl DeviceRepository for SqlDeviceRepository {
    async fn find_by_id(&self, id: DeviceId) -> Result<Option<Device>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, category_id, make, model, storage, created_at FROM device WHERE id = ?",
        )
        .bind(device_id_param(id)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| device_from_row(&value)).transpose()
    }

    async fn find_by_key(&self, key: &DeviceKey) -> Result<Option<Device>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, category_id, make, model, storage, created_at
             FROM device WHERE device_key = ?",
        )
        .bind(key_text(key))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| device_from_row(&value)).transpose()
    }

    async fn list_by_category(&self, category: &CategoryId) -> Result<Vec<Device>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, category_id, make, model, storage, created_at
             FROM device WHERE category_id = ? ORDER BY id",
        )
        .bind(&category.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(device_from_row).collect()
    }

    async fn create(&self, device: NewDevice) -> Result<Device, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Bumping the counter first takes the write lock for the whole transaction.
        sqlx::query(
            "INSERT INTO id_counter (name, value) VALUES ('device', 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1",
        )
        .execute(&mut *tx)
        .await?;

        let key = key_text(&device.key());
        let duplicate =
            sqlx::query("SELECT id FROM device WHERE device_key = ?").bind(&key).fetch_optional(&mut *tx).await?;
        if duplicate.is_some() {
            return Err(RepositoryError::Conflict(format!(
                "device {} {} {} already exists in category {}",
                device.make, device.model, device.storage, device.category
            )));
        }

        let next: i64 = sqlx::query_scalar("SELECT value FROM id_counter WHERE name = 'device'")
            .fetch_one(&mut *tx)
            .await?;
        let created = Device {
            id: DeviceId(u64::try_from(next).map_err(RepositoryError::decode)?),
            make: device.make,
            model: device.model,
            storage: device.storage,
            category: device.category,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO device (id, category_id, make, model, storage, device_key, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(next)
        .bind(&created.category.0)
        .bind(&created.make)
        .bind(&created.model)
        .bind(&created.storage)
        .bind(&key)
        .bind(created.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }
}

pub(crate) fn device_id_param(id: DeviceId) -> Result<i64, RepositoryError> {
    i64::try_from(id.0).map_err(RepositoryError::decode)
}

fn device_from_row(row: &SqliteRow) -> Result<Device, RepositoryError> {
    let id: i64 = row.try_get("id")?;
    Ok(Device {
        id: DeviceId(u64::try_from(id).map_err(RepositoryError::decode)?),
        make: row.try_get("make")?,
        model: row.try_get("model")?,
        storage: row.try_get("storage")?,
        category: CategoryId(row.try_get("category_id")?),
        created_at: parse_rfc3339("device created_at", &row.try_get::<String, _>("created_at")?)?,
    })
}
