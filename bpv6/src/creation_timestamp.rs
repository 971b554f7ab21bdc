use super::*;

/// Seconds between the Unix epoch and the DTN epoch, 2000-01-01T00:00:00Z.
const DTN_EPOCH_OFFSET: i64 = 946_684_800;

/// A bundle creation timestamp: seconds since the DTN epoch plus a
/// per-source sequence number.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CreationTimestamp {
    pub seconds: u64,
    pub sequence_number: u64,
}

impl CreationTimestamp {
    pub fn new(seconds: u64, sequence_number: u64) -> Self {
        Self {
            seconds,
            sequence_number,
        }
    }

    pub fn now() -> Self {
        let timestamp = time::OffsetDateTime::now_utc();
        Self {
            seconds: (timestamp.unix_timestamp() - DTN_EPOCH_OFFSET).max(0) as u64,
            sequence_number: u64::from(timestamp.nanosecond() % 1_000_000),
        }
    }
}

impl core::fmt::Display for CreationTimestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.seconds, self.sequence_number)
    }
}
