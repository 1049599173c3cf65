//! `/health` readiness: a reachable pool whose schema matches the newest
//! embedded migration. Catalog state is reported but never gates the status.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;
use tradein_db::{migrations, DbPool};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn skipped() -> Self {
        Self { status: "skipped", detail: "database unreachable".to_string() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub schema: HealthCheck,
    pub catalog: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let (schema, catalog) = if database.is_ready() {
        let schema = schema_check(&state.db_pool).await;
        let catalog = if schema.is_ready() {
            catalog_check(&state.db_pool).await
        } else {
            HealthCheck { status: "skipped", detail: "schema not current".to_string() }
        };
        (schema, catalog)
    } else {
        (HealthCheck::skipped(), HealthCheck::skipped())
    };

    let ready = database.is_ready() && schema.is_ready();
    if !ready {
        warn!(
            event_name = "health.degraded",
            database = %database.detail,
            schema = %schema.detail,
            "readiness check failed"
        );
    }

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        schema,
        catalog,
        checked_at: Utc::now().to_rfc3339(),
    };
    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck::ready("database query succeeded"),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}

async fn schema_check(pool: &DbPool) -> HealthCheck {
    let expected = migrations::latest_version();
    match migrations::applied_version(pool).await {
        Ok(applied) if applied == expected => {
            HealthCheck::ready(format!("schema at version {}", expected.unwrap_or_default()))
        }
        Ok(None) => HealthCheck::degraded("no migrations applied; run `tradein migrate`"),
        Ok(Some(applied)) => HealthCheck::degraded(format!(
            "schema at version {applied}, this build expects {}",
            expected.unwrap_or_default()
        )),
        Err(error) => HealthCheck::degraded(format!("migration history unreadable: {error}")),
    }
}

async fn catalog_check(pool: &DbPool) -> HealthCheck {
    let counts = sqlx::query_as::<_, (i64, i64)>(
        "SELECT COUNT(*), COUNT(active_price_list_id) FROM category",
    )
    .fetch_one(pool)
    .await;
    match counts {
        Ok((_, 0)) => HealthCheck {
            status: "empty",
            detail: "no category has an active price list".to_string(),
        },
        Ok((categories, priced)) => {
            HealthCheck::ready(format!("{priced} of {categories} categories have an active price list"))
        }
        Err(error) => HealthCheck::degraded(format!("category table unreadable: {error}")),
    }
}
