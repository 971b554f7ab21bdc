use super::*;
use std::sync::Arc;

/// Per-link configuration the block engine cares about.
#[derive(Default, Debug, Copy, Clone)]
pub struct LinkParams {
    /// Include a previous-hop block in bundles sent over this link.
    pub announce_previous_hop: bool,
}

/// An outbound link, used only as the key for per-link block lists and as
/// the carrier of the per-link configuration above. Transport itself is a
/// convergence-layer concern outside this crate.
#[derive(Debug, Clone)]
pub struct Link {
    name: Arc<str>,
    params: LinkParams,
}

impl Link {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            params: LinkParams::default(),
        }
    }

    pub fn with_params(name: &str, params: LinkParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &LinkParams {
        &self.params
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Link {}

impl core::hash::Hash for Link {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state)
    }
}

impl core::fmt::Display for Link {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

/// The per-link outbound block lists of a bundle.
#[derive(Default, Debug)]
pub struct LinkBlockSet {
    entries: hashbrown::HashMap<Link, BlockInfoVec>,
}

impl LinkBlockSet {
    pub fn insert_blocks(&mut self, link: &Link, blocks: BlockInfoVec) {
        self.entries.insert(link.clone(), blocks);
    }

    pub fn find_blocks(&self, link: &Link) -> Option<&BlockInfoVec> {
        self.entries.get(link)
    }

    pub fn find_blocks_mut(&mut self, link: &Link) -> Option<&mut BlockInfoVec> {
        self.entries.get_mut(link)
    }

    pub fn delete_blocks(&mut self, link: &Link) -> Option<BlockInfoVec> {
        self.entries.remove(link)
    }
}

/// The unit of store-and-forward: protocol metadata, the block lists, and a
/// handle on the external payload byte-store.
#[derive(Debug)]
pub struct Bundle {
    pub source: Eid,
    pub destination: Eid,
    pub report_to: Eid,
    pub custodian: Eid,
    pub creation_ts: CreationTimestamp,
    /// Lifetime in seconds.
    pub lifetime: u64,
    pub flags: BundleFlags,

    /// Byte offset of this fragment's payload within the original payload.
    pub frag_offset: u64,
    /// Payload length of this fragment.
    pub frag_length: u64,
    /// Payload length of the original, unfragmented bundle.
    pub orig_length: u64,
    /// Set when an incomplete inbound bundle was converted to a fragment.
    pub fragmented_incoming: bool,

    /// The previous node, recovered from a previous-hop block.
    pub previous_hop: Option<Eid>,
    /// Seconds this bundle has been in transit, from a bundle-age block.
    pub age: Option<u64>,

    pub recv_blocks: BlockInfoVec,
    pub api_blocks: BlockInfoVec,
    pub xmit_blocks: LinkBlockSet,

    payload: Box<dyn PayloadStore>,
}

impl Bundle {
    pub fn new(payload: Box<dyn PayloadStore>) -> Self {
        Self {
            source: Eid::null(),
            destination: Eid::null(),
            report_to: Eid::null(),
            custodian: Eid::null(),
            creation_ts: CreationTimestamp::default(),
            lifetime: 0,
            flags: BundleFlags::default(),
            frag_offset: 0,
            frag_length: 0,
            orig_length: 0,
            fragmented_incoming: false,
            previous_hop: None,
            age: None,
            recv_blocks: BlockInfoVec::new(),
            api_blocks: BlockInfoVec::new(),
            xmit_blocks: LinkBlockSet::default(),
            payload,
        }
    }

    pub fn payload(&self) -> &dyn PayloadStore {
        self.payload.as_ref()
    }

    pub fn payload_mut(&mut self) -> &mut dyn PayloadStore {
        self.payload.as_mut()
    }

    /// Copies the addressing and policy metadata into another bundle, as
    /// when deriving a fragment. Fragment bookkeeping is not copied.
    pub fn copy_metadata(&self, other: &mut Bundle) {
        other.source = self.source.clone();
        other.destination = self.destination.clone();
        other.report_to = self.report_to.clone();
        other.custodian = self.custodian.clone();
        other.creation_ts = self.creation_ts;
        other.lifetime = self.lifetime;
        other.flags = self.flags;
    }

    /// Resolves a block's non-owning source reference.
    pub fn source_block(&self, source: SourceRef) -> Option<&BlockInfo> {
        match source.list {
            ListOwner::Received => self.recv_blocks.get(source.index),
            ListOwner::Api => self.api_blocks.get(source.index),
            _ => None,
        }
    }
}
