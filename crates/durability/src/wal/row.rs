//! Public row types for the WAL row store.

use crate::format::wal_row::RowRecord;

/// A row to be appended; the store assigns the transaction id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRowDraft {
    /// Optional key prefix
    pub prefix: Option<Vec<u8>>,
    /// Row key
    pub key: Vec<u8>,
    /// Value payload (usually `None` for tombstones)
    pub value: Option<Vec<u8>>,
    /// Caller-supplied timestamp
    pub timestamp: i64,
    /// Logical deletion marker
    pub tombstoned: bool,
    /// Caller-supplied row version
    pub version: i64,
}

impl WalRowDraft {
    /// A live row
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, timestamp: i64, version: i64) -> Self {
        WalRowDraft {
            prefix: None,
            key: key.into(),
            value: Some(value.into()),
            timestamp,
            tombstoned: false,
            version,
        }
    }

    /// A deletion marker
    pub fn tombstone(key: impl Into<Vec<u8>>, timestamp: i64, version: i64) -> Self {
        WalRowDraft {
            prefix: None,
            key: key.into(),
            value: None,
            timestamp,
            tombstoned: true,
            version,
        }
    }

    /// Attach a prefix (builder pattern)
    pub fn with_prefix(mut self, prefix: impl Into<Vec<u8>>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub(crate) fn to_record(&self, tx_id: u64, batch_end: bool) -> RowRecord {
        RowRecord {
            tx_id,
            prefix: self.prefix.clone(),
            key: self.key.clone(),
            value: self.value.clone(),
            timestamp: self.timestamp,
            tombstoned: self.tombstoned,
            version: self.version,
            batch_end,
        }
    }
}

/// Row metadata as streamed by scans.
///
/// `fp` is the byte position of the row's record; pass it to
/// `WalRowStore::read_value` to fetch the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRow {
    /// Transaction id
    pub tx_id: u64,
    /// Optional key prefix
    pub prefix: Option<Vec<u8>>,
    /// Row key
    pub key: Vec<u8>,
    /// Caller-supplied timestamp
    pub timestamp: i64,
    /// Logical deletion marker
    pub tombstoned: bool,
    /// Caller-supplied row version
    pub version: i64,
    /// Record position (value locator)
    pub fp: u64,
}

/// A row together with its value payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    /// Row metadata
    pub row: WalRow,
    /// Value payload
    pub value: Option<Vec<u8>>,
}

impl WalEntry {
    pub(crate) fn from_record(record: RowRecord, fp: u64) -> Self {
        WalEntry {
            row: WalRow {
                tx_id: record.tx_id,
                prefix: record.prefix,
                key: record.key,
                timestamp: record.timestamp,
                tombstoned: record.tombstoned,
                version: record.version,
                fp,
            },
            value: record.value,
        }
    }
}
