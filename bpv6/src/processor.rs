use super::*;

/// The per-block-type processing contract.
///
/// One implementation exists per block type, registered with the
/// [`BundleProtocol`] orchestrator; blocks of unregistered types fall back
/// to the shared [`UnknownBlockProcessor`]. The default method bodies give
/// the behavior a plain extension block wants: buffer the preamble and body
/// on consume, copy bytes out on produce, succeed on validate.
///
/// Outbound, the orchestrator drives `prepare` → `generate` → `finalize`;
/// inbound it drives `consume` until each block completes, then `validate`.
pub trait BlockProcessor: Send + Sync {
    /// The type code this processor handles.
    fn block_type(&self) -> BlockType;

    /// Decide whether and how to insert a block of this type into the
    /// outbound list being assembled for `link`.
    ///
    /// A no-op `Ok` is a valid answer (e.g. a block disabled by
    /// configuration); a returned error aborts the whole outbound list.
    fn prepare(
        &self,
        bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        source: Option<SourceRef>,
        _link: &Link,
        _list: ListOwner,
    ) -> Result<(), Error> {
        let owner = match source {
            Some(source) => bundle
                .source_block(source)
                .ok_or(Error::MissingSourceBlock)?
                .block_type(),
            None => self.block_type(),
        };
        xmit_blocks.append_block(owner, source);
        Ok(())
    }

    /// Write the block's encoded bytes. Implementations must add any
    /// endpoint references with [`BlockInfo::add_eid`] before calling
    /// [`BlockInfoVec::generate_preamble`], and must set the last-block
    /// flag iff `last`.
    fn generate(
        &self,
        bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        idx: usize,
        link: &Link,
        last: bool,
    ) -> Result<(), Error>;

    /// Second output pass, run in reverse list order after every block has
    /// been generated, for content that depends on sibling blocks. May
    /// mutate any block in the list.
    fn finalize(
        &self,
        _bundle: &Bundle,
        _xmit_blocks: &mut BlockInfoVec,
        _idx: usize,
        _link: &Link,
    ) -> Result<(), Error> {
        Ok(())
    }

    /// Append a chunk of inbound data to the block, parsing the preamble
    /// once enough of it has arrived. Must tolerate arbitrary chunk
    /// boundaries, including a preamble split across calls.
    ///
    /// Returns the number of bytes consumed.
    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        buf: &[u8],
    ) -> Result<usize, Error> {
        let mut consumed = 0;
        if block.data_offset() == 0 {
            consumed = consume_preamble(bundle.recv_blocks.dict(), block, buf)?;
            if block.data_offset() == 0 {
                return Ok(consumed);
            }
        }
        consumed += consume_body(block, &buf[consumed..]);
        Ok(consumed)
    }

    /// Structural and semantic checks, run after every block of the bundle
    /// has been received. A `false` return fails the whole bundle; the
    /// reason out-parameters feed status reporting.
    fn validate(
        &self,
        _bundle: &Bundle,
        _block_list: &BlockInfoVec,
        _block: &BlockInfo,
        _reception_reason: &mut Option<ReasonCode>,
        _deletion_reason: &mut Option<ReasonCode>,
    ) -> bool {
        true
    }

    /// Copy `buf.len()` previously generated wire bytes starting at
    /// `offset` within the block. Used to re-serialize a block without
    /// holding all of it in memory.
    fn produce(
        &self,
        _bundle: &Bundle,
        block: &BlockInfo,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(), Error> {
        let offset = offset as usize;
        buf.copy_from_slice(&block.contents()[offset..offset + buf.len()]);
        Ok(())
    }

    /// Apply a read-only visitor over `len` bytes of the block's wire
    /// content starting at `offset`. The visitor may be invoked several
    /// times over consecutive chunks.
    fn process(
        &self,
        _bundle: &Bundle,
        block: &BlockInfo,
        offset: u64,
        len: u64,
        f: &mut dyn FnMut(&[u8]),
    ) -> Result<(), Error> {
        let offset = offset as usize;
        f(&block.contents()[offset..offset + len as usize]);
        Ok(())
    }

    /// Like [`BlockProcessor::process`], but the visitor may modify each
    /// chunk; modified chunks are flushed back to the backing store.
    /// Returns whether anything changed.
    fn mutate(
        &self,
        _bundle: &mut Bundle,
        block: &mut BlockInfo,
        offset: u64,
        len: u64,
        f: &mut dyn FnMut(&mut [u8]) -> bool,
    ) -> Result<bool, Error> {
        let offset = offset as usize;
        Ok(f(&mut block.contents_mut()[offset..offset + len as usize]))
    }

    /// Set up a block from raw contents, as when an application injects an
    /// extension block through the API.
    fn init_block(
        &self,
        block: &mut BlockInfo,
        dict: &mut Dictionary,
        block_type: BlockType,
        flags: BlockFlags,
        data: &[u8],
    ) -> Result<(), Error> {
        generate_preamble(dict, block, block_type, flags, data.len() as u64);
        block.contents_mut().extend_from_slice(data);
        block.set_complete(true);
        Ok(())
    }
}

/// A fully decoded block preamble.
struct Preamble {
    len: usize,
    data_length: u64,
    eid_refs: Vec<(u64, u64)>,
}

/// Reads one SDNV, mapping truncation to `None` so streaming parsers can
/// wait for more bytes.
pub(crate) fn read_sdnv(data: &[u8], offset: &mut usize) -> Result<Option<u64>, Error> {
    match sdnv::decode::decode(&data[*offset..]) {
        Ok((value, len)) => {
            *offset += len;
            Ok(Some(value))
        }
        Err(sdnv::decode::Error::NotEnoughData) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_preamble(data: &[u8]) -> Result<Option<Preamble>, Error> {
    if data.is_empty() {
        return Ok(None);
    }
    let mut offset = 1; // type code

    let Some(flags) = read_sdnv(data, &mut offset)? else {
        return Ok(None);
    };
    let flags = BlockFlags::from(flags);

    let mut eid_refs = Vec::new();
    if flags.has_eid_refs {
        let Some(count) = read_sdnv(data, &mut offset)? else {
            return Ok(None);
        };
        for _ in 0..count {
            let Some(scheme) = read_sdnv(data, &mut offset)? else {
                return Ok(None);
            };
            let Some(ssp) = read_sdnv(data, &mut offset)? else {
                return Ok(None);
            };
            eid_refs.push((scheme, ssp));
        }
    }

    let Some(data_length) = read_sdnv(data, &mut offset)? else {
        return Ok(None);
    };

    Ok(Some(Preamble {
        len: offset,
        data_length,
        eid_refs,
    }))
}

/// Incrementally parses a block preamble: type code, flags, optional
/// endpoint-reference list, body length.
///
/// Input is buffered in the block's own contents and re-parsed from the
/// start on every call until a whole preamble decodes; bytes past the
/// preamble are rolled back so the caller consumes them as body. Once the
/// preamble decodes, `data_offset`/`data_length` are set and the reference
/// offsets are resolved against `dict`.
pub fn consume_preamble(
    dict: &Dictionary,
    block: &mut BlockInfo,
    buf: &[u8],
) -> Result<usize, Error> {
    debug_assert_eq!(block.data_offset(), 0);
    let start = block.contents().len();
    block.contents_mut().extend_from_slice(buf);

    let Some(preamble) = parse_preamble(block.contents())? else {
        return Ok(buf.len());
    };

    block.contents_mut().truncate(preamble.len);
    block.set_data_offset(preamble.len);
    block.set_data_length(preamble.data_length);

    let mut eids = Vec::with_capacity(preamble.eid_refs.len());
    for (scheme, ssp) in &preamble.eid_refs {
        eids.push(dict.extract_eid(*scheme, *ssp)?);
    }
    block.set_eid_list(eids);
    block.set_eid_refs(preamble.eid_refs);

    Ok(preamble.len - start)
}

/// Buffers body bytes into the block contents until `data_length` bytes
/// have arrived, marking the block complete. Returns bytes consumed.
pub(crate) fn consume_body(block: &mut BlockInfo, buf: &[u8]) -> usize {
    let have = block.contents().len() as u64 - block.data_offset() as u64;
    let tocopy = (block.data_length() - have).min(buf.len() as u64) as usize;
    block.contents_mut().extend_from_slice(&buf[..tocopy]);
    if block.contents().len() as u64 == block.full_length() {
        block.set_complete(true);
    }
    tocopy
}

/// Writes the standard preamble for the given type, flags and body length,
/// folding the block's endpoint references into `dict` and reserving room
/// for the body.
pub fn generate_preamble(
    dict: &mut Dictionary,
    block: &mut BlockInfo,
    block_type: BlockType,
    mut flags: BlockFlags,
    data_length: u64,
) {
    let mut refs = Vec::with_capacity(block.eid_list().len());
    for eid in block.eid_list() {
        refs.push(dict.add_eid(eid));
    }
    flags.has_eid_refs = !refs.is_empty();

    let contents = block.contents_mut();
    contents.clear();
    contents.push(u8::from(block_type));
    sdnv::encode::encode_into(u64::from(flags), contents);
    if !refs.is_empty() {
        sdnv::encode::encode_into(refs.len() as u64, contents);
        for (scheme, ssp) in &refs {
            sdnv::encode::encode_into(*scheme, contents);
            sdnv::encode::encode_into(*ssp, contents);
        }
    }
    sdnv::encode::encode_into(data_length, contents);
    contents.reserve(data_length as usize);

    let data_offset = block.contents().len();
    block.set_data_offset(data_offset);
    block.set_data_length(data_length);
    block.set_eid_refs(refs);
}
