// Core modules
pub mod agents;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod market;
pub mod models;
pub mod risk;
pub mod service;
pub mod signals;

// Re-export commonly used types
pub use error::{ErrorKind, TradeError};
pub use models::*;
pub use service::TradingService;

// Error handling
pub type Result<T> = std::result::Result<T, TradeError>;
