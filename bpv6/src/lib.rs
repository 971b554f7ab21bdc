use mule_sdnv as sdnv;
use tracing::*;

mod age_block;
mod block;
mod block_flags;
mod block_type;
mod bundle;
mod bundle_flags;
mod creation_timestamp;
mod dictionary;
mod eid;
mod error;
mod fragmentation;
mod payload_block;
mod previous_hop_block;
mod primary_block;
mod processor;
mod protocol;
mod storage_mem;
mod unknown_block;

pub mod storage;

#[cfg(test)]
mod roundtrip_tests;

pub mod prelude {
    pub use super::age_block::AgeBlockProcessor;
    pub use super::block::{BlockInfo, BlockInfoVec, DataBuffer, ListOwner, SourceRef};
    pub use super::block_flags::BlockFlags;
    pub use super::block_type::BlockType;
    pub use super::bundle::{Bundle, Link, LinkBlockSet, LinkParams};
    pub use super::bundle_flags::{BundleFlags, Priority};
    pub use super::creation_timestamp::CreationTimestamp;
    pub use super::dictionary::Dictionary;
    pub use super::eid::{Eid, Error as EidError};
    pub use super::error::{Error, ReasonCode};
    pub use super::fragmentation::{FragmentKey, FragmentManager, FragmentState};
    pub use super::payload_block::PayloadBlockProcessor;
    pub use super::previous_hop_block::PreviousHopBlockProcessor;
    pub use super::primary_block::{CURRENT_VERSION, PrimaryBlockProcessor};
    pub use super::processor::BlockProcessor;
    pub use super::protocol::BundleProtocol;
    pub use super::storage::{PayloadAllocator, PayloadStore};
    pub use super::storage_mem::{MemoryAllocator, MemoryStore};
    pub use super::unknown_block::UnknownBlockProcessor;
}

use prelude::*;
