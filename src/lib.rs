pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod market;
pub mod utils;

// Re-export common modules
pub use api::router;
pub use config::Config;
pub use db::KustoDb;
pub use error::AppError;
