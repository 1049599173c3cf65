use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use tradein_core::domain::alias::{AliasSource, DeviceAlias};
use tradein_core::domain::device::DeviceId;

use super::device::device_id_param;
use super::{parse_rfc3339, AliasRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAliasRepository {
    pool: DbPool,
}

impl SqlAliasRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AliasRepository for SqlAliasRepository {
    async fn append(&self, alias: DeviceAlias) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO device_alias (alias, device_id, created_by, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&alias.alias)
        .bind(device_id_param(alias.device_id)?)
        .bind(alias.created_by.as_str())
        .bind(alias.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<DeviceAlias>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT alias, device_id, created_by, created_at FROM device_alias ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(alias_from_row).collect()
    }

    async fn delete(&self, alias: &str) -> Result<u64, RepositoryError> {
        let deleted = sqlx::query("DELETE FROM device_alias WHERE alias = ?")
            .bind(alias)
            .execute(&self.pool)
            .await?;

        Ok(deleted.rows_affected())
    }
}

fn alias_from_row(row: &SqliteRow) -> Result<DeviceAlias, RepositoryError> {
    let created_by_raw: String = row.try_get("created_by")?;
    let created_by = AliasSource::parse(&created_by_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("invalid alias created_by: {}", created_by_raw))
    })?;
    let device_id: i64 = row.try_get("device_id")?;

    Ok(DeviceAlias {
        alias: row.try_get("alias")?,
        device_id: DeviceId(u64::try_from(device_id).map_err(RepositoryError::decode)?),
        created_by,
        created_at: parse_rfc3339("alias created_at", &row.try_get::<String, _>("created_at")?)?,
    })
}
