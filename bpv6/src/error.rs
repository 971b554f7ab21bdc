use super::*;
use thiserror::Error;

/// The primary error type for the `bpv6` crate.
#[derive(Error, Debug)]
pub enum Error {
    /// A varint field of a block is malformed.
    #[error(transparent)]
    InvalidSdnv(#[from] sdnv::decode::Error),

    /// The primary block carries an unsupported protocol version.
    #[error("Unsupported bundle protocol version {0}")]
    InvalidVersion(u8),

    /// An endpoint id failed to parse.
    #[error(transparent)]
    InvalidEid(#[from] eid::Error),

    /// A dictionary offset points outside the dictionary.
    #[error("Dictionary offset {0} is outside the {1} byte dictionary")]
    InvalidEidOffset(u64, usize),

    /// The primary block dictionary is empty or does not end with a NUL byte.
    #[error("Primary block dictionary is malformed")]
    BadDictionary,

    /// The primary block body ended before all of its fields.
    #[error("Primary block advertises an incorrect length")]
    BadPrimaryLength,

    /// A block-type code is already present in the registry.
    #[error("Block type {0} already registered")]
    DuplicateProcessor(u8),

    /// An outbound block list does not hold at least a primary and a payload.
    #[error("Bundle has fewer than two blocks")]
    TooFewBlocks,

    /// The first block of an outbound list is not the primary block.
    #[error("First block is not the primary block")]
    PrimaryNotFirst,

    /// A block that must carry an endpoint reference arrived without one.
    #[error("Block carries no endpoint reference")]
    MissingEidReference,

    /// A block was generated from a source reference that does not resolve.
    #[error("Block source reference does not resolve")]
    MissingSourceBlock,

    /// No generated block list exists for the link.
    #[error("No generated blocks for link '{0}'")]
    NoBlocksForLink(String),

    /// The bundle cannot be fragmented within the given constraints.
    #[error("Fragmentation impossible: {0}")]
    FragmentationImpossible(&'static str),

    /// A bundle without the is-fragment flag was offered for reassembly.
    #[error("Bundle is not a fragment")]
    NotAFragment,

    /// An error from the payload byte-store.
    #[error(transparent)]
    Storage(#[from] storage::Error),
}

/// RFC 5050 section 6.1.1 status report reason codes, used as the
/// out-parameters of `validate()`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReasonCode {
    NoAdditionalInfo,
    LifetimeExpired,
    ForwardedUnidirectional,
    TransmissionCanceled,
    DepletedStorage,
    EndpointIdUnintelligible,
    NoRouteToDestination,
    NoTimelyContact,
    BlockUnintelligible,
}
