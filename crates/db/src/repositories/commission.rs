use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row};

use tradein_core::commission::validate_payout_claim;
use tradein_core::domain::commission::{
    CommissionLedgerEntry, LedgerEntryId, LedgerEntryStatus, Payout, PayoutId, SourceKind,
};
use tradein_core::domain::partner::PartnerId;

use super::{parse_decimal, parse_rfc3339, CommissionLedgerRepository, RepositoryError};
use crate::DbPool;

const ENTRY_COLUMNS: &str =
    "id, partner_id, source_kind, source_id, amount, status, payout_id, created_at, paid_at";

pub struct SqlCommissionLedgerRepository {
    pool: DbPool,
}

impl SqlCommissionLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommissionLedgerRepository for SqlCommissionLedgerRepository {
    async fn insert_if_absent(
        &self,
        entry: CommissionLedgerEntry,
    ) -> Result<(CommissionLedgerEntry, bool), RepositoryError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO commission_ledger (
                id, partner_id, source_kind, source_id, amount, status, payout_id, created_at, paid_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(partner_id, source_kind, source_id) DO NOTHING
            "#,
        )
        .bind(&entry.id.0)
        .bind(&entry.partner_id.0)
        .bind(entry.source_kind.as_str())
        .bind(&entry.source_id)
        .bind(entry.amount.to_string())
        .bind(entry.status.as_str())
        .bind(entry.payout_id.as_ref().map(|id| id.0.as_str()))
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.paid_at.map(|ts| ts.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok((entry, true));
        }

        let existing = self
            .find_by_source(&entry.partner_id, entry.source_kind, &entry.source_id)
            .await?
            .ok_or_else(|| {
                RepositoryError::Conflict(format!("ledger entry `{}` collides with another id", entry.id))
            })?;
        Ok((existing, false))
    }

    async fn find_by_source(
        &self,
        partner_id: &PartnerId,
        kind: SourceKind,
        source_id: &str,
    ) -> Result<Option<CommissionLedgerEntry>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM commission_ledger
             WHERE partner_id = ? AND source_kind = ? AND source_id = ?"
        ))
        .bind(&partner_id.0)
        .bind(kind.as_str())
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| entry_from_row(&value)).transpose()
    }

    async fn list_for_partner(
        &self,
        partner_id: &PartnerId,
    ) -> Result<Vec<CommissionLedgerEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM commission_ledger
             WHERE partner_id = ? ORDER BY created_at, id"
        ))
        .bind(&partner_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn settle(
        &self,
        partner_id: &PartnerId,
        entry_ids: &[LedgerEntryId],
        reference: &str,
    ) -> Result<Payout, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let mut found = Vec::with_capacity(entry_ids.len());
        for id in entry_ids {
            let row = sqlx::query(&format!("SELECT {ENTRY_COLUMNS} FROM commission_ledger WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = row {
                found.push(entry_from_row(&row)?);
            }
        }
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

        for id in entry_ids {
            let updated = sqlx::query(
                "UPDATE commission_ledger SET status = 'paid', payout_id = ?, paid_at = ?
                 WHERE id = ? AND partner_id = ? AND status = 'pending' AND payout_id IS NULL",
            )
            .bind(&payout.id.0)
            .bind(now.to_rfc3339())
            .bind(&id.0)
            .bind(&partner_id.0)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(RepositoryError::Conflict(format!(
                    "ledger entry `{}` was claimed concurrently",
                    id
                )));
            }
        }

        sqlx::query(
            "INSERT INTO payout (id, partner_id, amount, entry_ids_json, reference, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&payout.id.0)
        .bind(&partner_id.0)
        .bind(payout.amount.to_string())
        .bind(serde_json::to_string(&payout.entry_ids)?)
        .bind(&payout.reference)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(payout)
    }

    async fn list_payouts(&self, partner_id: &PartnerId) -> Result<Vec<Payout>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, partner_id, amount, entry_ids_json, reference, created_at
             FROM payout WHERE partner_id = ? ORDER BY created_at, id",
        )
        .bind(&partner_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(payout_from_row).collect()
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<CommissionLedgerEntry, RepositoryError> {
    let kind_raw: String = row.try_get("source_kind")?;
    let source_kind = SourceKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid ledger source_kind: {}", kind_raw)))?;
    let status_raw: String = row.try_get("status")?;
    let status = LedgerEntryStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid ledger status: {}", status_raw)))?;

    Ok(CommissionLedgerEntry {
        id: LedgerEntryId(row.try_get("id")?),
        partner_id: PartnerId(row.try_get("partner_id")?),
        source_kind,
        source_id: row.try_get("source_id")?,
        amount: parse_decimal("ledger", &row.try_get::<String, _>("amount")?)?,
        status,
        payout_id: row.try_get::<Option<String>, _>("payout_id")?.map(PayoutId),
        created_at: parse_rfc3339("ledger created_at", &row.try_get::<String, _>("created_at")?)?,
        paid_at: row
            .try_get::<Option<String>, _>("paid_at")?
            .as_deref()
            .map(|ts| parse_rfc3339("ledger paid_at", ts))
            .transpose()?,
    })
}

fn payout_from_row(row: &SqliteRow) -> Result<Payout, RepositoryError> {
    Ok(Payout {
        id: PayoutId(row.try_get("id")?),
        partner_id: PartnerId(row.try_get("partner_id")?),
        amount: parse_decimal("payout", &row.try_get::<String, _>("amount")?)?,
        entry_ids: serde_json::from_str(&row.try_get::<String, _>("entry_ids_json")?)?,
        reference: row.try_get("reference")?,
        created_at: parse_rfc3339("payout created_at", &row.try_get::<String, _>("created_at")?)?,
    })
}
