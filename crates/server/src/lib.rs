pub mod api;
pub mod bootstrap;
pub mod health;

use axum::Router;
use tradein_db::{AppServices, DbPool};

/// Entity API plus `/health`, served on one listener.
pub fn app(services: AppServices, db_pool: DbPool) -> Router {
    api::router(services).merge(health::router(db_pool))
}
