//! Shared storage for lifecycle entities kept as a JSON document next to an
//! indexed `status` column.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqliteConnection};

use tradein_core::flows::LifecycleEntity;

use super::RepositoryError;

pub(crate) async fn load<T: DeserializeOwned>(
    conn: &mut SqliteConnection,
    table: &'static str,
    id: &str,
) -> Result<Option<T>, RepositoryError> {
    let row = sqlx::query(&format!("SELECT document FROM {table} WHERE id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| {
        let document: String = row.try_get("document")?;
        serde_json::from_str(&document).map_err(RepositoryError::from)
    })
    .transpose()
}

pub(crate) async fn insert<E>(
    conn: &mut SqliteConnection,
    table: &'static str,
    entity: &E,
    created_at: &str,
) -> Result<(), RepositoryError>
where
    E: LifecycleEntity + Serialize,
{
    let inserted = sqlx::query(&format!(
        "INSERT INTO {table} (id, status, document, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(id) DO NOTHING"
    ))
    .bind(entity.entity_id())
    .bind(entity.status().to_string())
    .bind(serde_json::to_string(entity)?)
    .bind(created_at)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 0 {
        return Err(RepositoryError::Conflict(format!(
            "{} `{}` already exists",
            E::table().entity,
            entity.entity_id()
        )));
    }
    Ok(())
}

/// Compare-and-set write of `document` guarded by the stored status.
pub(crate) async fn compare_and_set<E>(
    conn: &mut SqliteConnection,
    table: &'static str,
    entity: &E,
    document: &E,
    expected: E::Status,
) -> Result<(), RepositoryError>
where
    E: LifecycleEntity + Serialize,
{
    let updated = sqlx::query(&format!(
        "UPDATE {table} SET status = ?, document = ?, updated_at = ? WHERE id = ? AND status = ?"
    ))
    .bind(entity.status().to_string())
    .bind(serde_json::to_string(document)?)
    .bind(Utc::now().to_rfc3339())
    .bind(entity.entity_id())
    .bind(expected.to_string())
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 1 {
        return Ok(());
    }

    let exists = sqlx::query(&format!("SELECT 1 FROM {table} WHERE id = ?"))
        .bind(entity.entity_id())
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    let entity_name = E::table().entity.as_str();
    if exists {
        Err(RepositoryError::StaleStatus {
            entity: entity_name,
            id: entity.entity_id(),
            expected: expected.to_string(),
        })
    } else {
        Err(RepositoryError::NotFound { entity: entity_name, id: entity.entity_id() })
    }
}
