use chrono::{DateTime, Utc};

/// One persisted example, as read back from a client table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    /// Store-assigned, strictly increasing per client table.
    pub id: i64,
    pub client_name: String,
    /// Opaque, non-empty payload.
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// Microseconds since the Unix epoch, the on-disk timestamp encoding.
pub(crate) fn to_micros(t: DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}
