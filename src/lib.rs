pub mod api;
pub mod cache;
pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod seed;
pub mod session;
pub mod sql;
pub mod text_to_sql_chain;

pub use crate::api::{router, AppState};
pub use crate::config::AppConfig;
pub use crate::error::AppError;
