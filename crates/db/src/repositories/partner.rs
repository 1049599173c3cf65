use async_trait::async_trait;
use sqlx::Row;

use tradein_core::domain::partner::{Partner, PartnerId};

use super::{conflict_on_unique, PartnerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPartnerRepository {
    pool: DbPool,
}

impl SqlPartnerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_where(&self, column: &str, value: &str) -> Result<Option<Partner>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT document FROM partner WHERE {column} = ?"))
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let document: String = row.try_get("document")?;
            serde_json::from_str(&document).map_err(RepositoryError::from)
        })
        .transpose()
    }
}

#[async_trait]
impl PartnerRepository for SqlPartnerRepository {
    async fn find_by_id(&self, id: &PartnerId) -> Result<Option<Partner>, RepositoryError> {
        self.find_where("id", &id.0).await
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Partner>, RepositoryError> {
        self.find_where("code", code.trim()).await
    }

    async fn save(&self, partner: Partner) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO partner (id, code, document, created_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                code = excluded.code,
                document = excluded.document
            "#,
        )
        .bind(&partner.id.0)
        .bind(&partner.code)
        .bind(serde_json::to_string(&partner)?)
        .bind(partner.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            conflict_on_unique(error, || format!("partner code `{}` is already in use", partner.code))
        })?;

        Ok(())
    }
}
