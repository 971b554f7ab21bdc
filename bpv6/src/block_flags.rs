use super::*;

/// The processing flags carried in every block preamble except the
/// primary block's.
#[derive(Default, Debug, Copy, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockFlags {
    /// The block must be replicated into every fragment of the bundle.
    pub must_replicate: bool,
    /// A status report is requested if processing of the block fails.
    pub report_on_error: bool,
    /// The whole bundle must be deleted if processing of the block fails.
    pub delete_bundle_on_error: bool,
    /// The preamble carries an endpoint-reference list.
    pub has_eid_refs: bool,
    /// The block alone is discarded if its processing fails.
    pub discard_block_on_error: bool,
    /// The block was forwarded by a node that could not process it.
    pub forwarded_unprocessed: bool,
    /// The block is the structurally last block of the bundle.
    pub last_block: bool,
    pub unrecognised: u64,
}

impl From<u64> for BlockFlags {
    fn from(value: u64) -> Self {
        let mut flags = Self {
            unrecognised: value & !0x7F,
            ..Default::default()
        };

        for b in 0..=6 {
            if value & (1 << b) != 0 {
                match b {
                    0 => flags.must_replicate = true,
                    1 => flags.report_on_error = true,
                    2 => flags.delete_bundle_on_error = true,
                    3 => flags.has_eid_refs = true,
                    4 => flags.discard_block_on_error = true,
                    5 => flags.forwarded_unprocessed = true,
                    _ => flags.last_block = true,
                }
            }
        }
        flags
    }
}

impl From<BlockFlags> for u64 {
    fn from(value: BlockFlags) -> Self {
        let mut flags = value.unrecognised;
        if value.must_replicate {
            flags |= 1 << 0;
        }
        if value.report_on_error {
            flags |= 1 << 1;
        }
        if value.delete_bundle_on_error {
            flags |= 1 << 2;
        }
        if value.has_eid_refs {
            flags |= 1 << 3;
        }
        if value.discard_block_on_error {
            flags |= 1 << 4;
        }
        if value.forwarded_unprocessed {
            flags |= 1 << 5;
        }
        if value.last_block {
            flags |= 1 << 6;
        }
        flags
    }
}
