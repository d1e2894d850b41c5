pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;

pub use error::{BridgeError, Result};
pub use models::*;
pub use services::*;
