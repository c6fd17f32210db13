//! Highwater marks
//!
//! - `config`: Store configuration (HighwaterConfig, HighwaterConfigError)
//! - `error`: Store errors (HighwaterError)
//! - `store`: The sharded, journaled store (HighwaterStore)

pub mod config;
pub mod error;
pub mod store;

pub use config::{HighwaterConfig, HighwaterConfigError};
pub use error::HighwaterError;
pub use store::HighwaterStore;
