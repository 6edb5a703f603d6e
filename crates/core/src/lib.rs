pub mod campaign;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod fraud;
pub mod notification;
pub mod receipt;
pub mod repository;
pub mod reward;
pub mod voucher;

pub use config::AppConfig;
pub use error::{LoyaltyError, LoyaltyResult};
