use tradein_core::config::{AppConfig, ConfigError, LoadOptions};
use tradein_core::errors::ApplicationError;
use tradein_db::{connect_with_settings, migrations, AppServices, DbPool, Repositories};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub services: AppServices,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("service wiring failed: {0}")]
    Services(#[source] ApplicationError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let services = AppServices::new(Repositories::sql(db_pool.clone()), &config)
        .map_err(BootstrapError::Services)?;

    Ok(Application { config, db_pool, services })
}

#[cfg(test)]
mod tests {
    use tradein_core::config::{ConfigOverrides, LoadOptions};
    use tradein_core::domain::device::CategoryId;

    use crate::bootstrap::{bootstrap, BootstrapError};

    #[tokio::test]
    async fn bootstrap_rejects_a_non_sqlite_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://localhost/tradein".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let error = result.err().expect("bootstrap should fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_services() {
        let dir = std::env::temp_dir().join(format!("tradein-bootstrap-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("scratch dir");
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(format!("sqlite://{}", dir.join("tradein.db").display())),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed against an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('device', 'price_list', 'bulk_quote', 'commission_ledger')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 4, "bootstrap should expose the core tables");

        let error = app
            .services
            .catalog
            .snapshot(&CategoryId("phones".to_string()))
            .await
            .expect_err("no category has been configured yet");
        assert!(error.to_string().contains("phones"));

        app.db_pool.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
