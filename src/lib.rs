pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod utils;
pub mod webhook;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

pub use config::Config;
pub use error::{AppError, AppResult};

use services::{mailer::Mailer, storage::BlobStorage};
use utils::jwt::TokenService;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Config,
    pub tokens: TokenService,
    pub mailer: Arc<dyn Mailer>,
    pub storage: Arc<dyn BlobStorage>,
}
