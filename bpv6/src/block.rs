use super::*;

/// Block contents live in a small buffer with 64 bytes of inline storage,
/// which covers most blocks without touching the heap. Payload block
/// contents hold only the preamble; the body stays in the payload store.
pub type DataBuffer = smallvec::SmallVec<[u8; 64]>;

/// Which of a bundle's block lists a block belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ListOwner {
    None,
    Received,
    Api,
    Xmit,
}

/// A non-owning reference to the block another block was copied or derived
/// from during re-generation. Outbound lists are rebuilt per link, so this
/// is a list/index pair rather than any kind of pointer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub list: ListOwner,
    pub index: usize,
}

impl SourceRef {
    pub fn received(index: usize) -> Self {
        Self {
            list: ListOwner::Received,
            index,
        }
    }

    pub fn api(index: usize) -> Self {
        Self {
            list: ListOwner::Api,
            index,
        }
    }
}

/// One block instance: the encoded preamble and body (or just the preamble,
/// for the payload block) plus the parse state around them.
#[derive(Debug, Clone)]
pub struct BlockInfo {
    /// The type code this block dispatches through the registry with.
    owner: BlockType,
    source: Option<SourceRef>,
    eid_list: Vec<Eid>,
    eid_refs: Vec<(u64, u64)>,
    contents: DataBuffer,
    data_offset: usize,
    data_length: u64,
    complete: bool,
}

impl BlockInfo {
    pub fn new(owner: BlockType) -> Self {
        Self {
            owner,
            source: None,
            eid_list: Vec::new(),
            eid_refs: Vec::new(),
            contents: DataBuffer::new(),
            data_offset: 0,
            data_length: 0,
            complete: false,
        }
    }

    pub fn with_source(owner: BlockType, source: SourceRef) -> Self {
        Self {
            source: Some(source),
            ..Self::new(owner)
        }
    }

    pub fn owner(&self) -> BlockType {
        self.owner
    }

    pub fn source(&self) -> Option<SourceRef> {
        self.source
    }

    /// The wire type code, read from the contents once any are present.
    ///
    /// The primary block is special-cased since its first content byte is
    /// the protocol version, not a type code.
    pub fn block_type(&self) -> BlockType {
        if self.owner == BlockType::Primary {
            return BlockType::Primary;
        }
        if self.contents.is_empty() {
            return self.owner;
        }
        BlockType::from(self.contents[0])
    }

    /// The processing flags, decoded from the preamble bytes.
    pub fn flags(&self) -> BlockFlags {
        if self.owner == BlockType::Primary || self.contents.len() < 2 {
            return BlockFlags::default();
        }
        match sdnv::decode::decode(&self.contents[1..]) {
            Ok((flags, _)) => BlockFlags::from(flags),
            Err(_) => BlockFlags::default(),
        }
    }

    pub fn last_block(&self) -> bool {
        self.flags().last_block
    }

    pub fn contents(&self) -> &DataBuffer {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut DataBuffer {
        &mut self.contents
    }

    /// Byte offset where the body begins; 0 while the preamble is unparsed.
    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    pub fn set_data_offset(&mut self, offset: usize) {
        self.data_offset = offset;
    }

    /// Body length in bytes, valid once the preamble has been parsed.
    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    pub fn set_data_length(&mut self, length: u64) {
        self.data_length = length;
    }

    /// Total encoded length of the block: preamble plus body.
    pub fn full_length(&self) -> u64 {
        self.data_offset as u64 + self.data_length
    }

    /// The body bytes held in the contents buffer.
    pub fn data(&self) -> &[u8] {
        &self.contents[self.data_offset..]
    }

    pub fn complete(&self) -> bool {
        self.complete
    }

    pub fn set_complete(&mut self, complete: bool) {
        self.complete = complete;
    }

    /// Adds an endpoint reference; `generate_preamble` folds these into the
    /// outbound dictionary and writes their offsets into the preamble.
    pub fn add_eid(&mut self, eid: Eid) {
        self.eid_list.push(eid);
    }

    pub fn eid_list(&self) -> &[Eid] {
        &self.eid_list
    }

    pub fn set_eid_list(&mut self, eids: Vec<Eid>) {
        self.eid_list = eids;
    }

    /// The raw (scheme, ssp) dictionary offset pairs from the preamble.
    pub fn eid_refs(&self) -> &[(u64, u64)] {
        &self.eid_refs
    }

    pub fn set_eid_refs(&mut self, refs: Vec<(u64, u64)>) {
        self.eid_refs = refs;
    }
}

/// An ordered block list plus the dictionary its endpoint references
/// resolve against. A bundle owns one per receive direction and one per
/// outbound link.
#[derive(Default, Debug)]
pub struct BlockInfoVec {
    blocks: Vec<BlockInfo>,
    dict: Dictionary,
}

impl core::ops::Deref for BlockInfoVec {
    type Target = Vec<BlockInfo>;

    fn deref(&self) -> &Self::Target {
        &self.blocks
    }
}

impl core::ops::DerefMut for BlockInfoVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.blocks
    }
}

impl BlockInfoVec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn dict_mut(&mut self) -> &mut Dictionary {
        &mut self.dict
    }

    /// Appends a fresh block and returns it.
    pub fn append_block(
        &mut self,
        owner: BlockType,
        source: Option<SourceRef>,
    ) -> &mut BlockInfo {
        self.blocks.push(match source {
            Some(source) => BlockInfo::with_source(owner, source),
            None => BlockInfo::new(owner),
        });
        self.blocks.last_mut().expect("just pushed")
    }

    pub fn find_block(&self, block_type: BlockType) -> Option<&BlockInfo> {
        self.blocks.iter().find(|b| b.block_type() == block_type)
    }

    pub fn has_block(&self, block_type: BlockType) -> bool {
        self.find_block(block_type).is_some()
    }

    /// Total encoded length of every block in the list.
    pub fn total_length(&self) -> u64 {
        self.blocks.iter().map(BlockInfo::full_length).sum()
    }

    /// Wire offset of the first payload body byte.
    pub fn payload_offset(&self) -> u64 {
        let mut offset = 0;
        for block in &self.blocks {
            if block.block_type() == BlockType::Payload {
                return offset + block.data_offset() as u64;
            }
            offset += block.full_length();
        }
        offset
    }

    /// Writes a standard preamble for `blocks[idx]`, folding the block's
    /// endpoint references into this list's dictionary.
    pub fn generate_preamble(
        &mut self,
        idx: usize,
        block_type: BlockType,
        flags: BlockFlags,
        data_length: u64,
    ) {
        processor::generate_preamble(&mut self.dict, &mut self.blocks[idx], block_type, flags, data_length)
    }
}
