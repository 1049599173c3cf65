pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod services;

pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{InMemoryStore, Repositories, RepositoryError};
pub use services::AppServices;
