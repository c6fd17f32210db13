//! WAL (Write-Ahead Log) row store
//!
//! - `config`: WAL configuration (WalConfig, WalConfigError)
//! - `error`: WAL errors (WalError)
//! - `row`: Rows as appended and as scanned (WalRowDraft, WalRow, WalEntry)
//! - `row_store`: The append-only store itself (WalRowStore)
//! - `scan`: Streaming pull iterator over a row file (WalScan)

pub mod config;
pub mod error;
pub mod row;
pub mod row_store;
pub mod scan;

pub use config::{WalConfig, WalConfigError};
pub use error::WalError;
pub use row::{WalEntry, WalRow, WalRowDraft};
pub use row_store::{RecoveryReport, RecoveryStop, WalRowStore};
pub use scan::WalScan;
