use super::*;

/// Handles the bundle-age block (type 10): an SDNV count of seconds the
/// bundle has spent in transit, for nodes without a synchronised clock.
///
/// Replicated into every fragment, discarded alone on error.
#[derive(Default, Debug)]
pub struct AgeBlockProcessor {
    /// Include an age block in locally originated bundles.
    outbound_enabled: bool,
}

impl AgeBlockProcessor {
    pub fn new(outbound_enabled: bool) -> Self {
        Self { outbound_enabled }
    }
}

impl BlockProcessor for AgeBlockProcessor {
    fn block_type(&self) -> BlockType {
        BlockType::Age
    }

    fn prepare(
        &self,
        bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        source: Option<SourceRef>,
        _link: &Link,
        _list: ListOwner,
    ) -> Result<(), Error> {
        // Forward a received age block regardless; originate one only when
        // configured to
        if source.is_none() && !self.outbound_enabled {
            return Ok(());
        }
        let owner = match source {
            Some(source) => bundle
                .source_block(source)
                .ok_or(Error::MissingSourceBlock)?
                .block_type(),
            None => BlockType::Age,
        };
        xmit_blocks.append_block(owner, source);
        Ok(())
    }

    fn generate(
        &self,
        bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        idx: usize,
        _link: &Link,
        last: bool,
    ) -> Result<(), Error> {
        let age = bundle.age.unwrap_or(0);
        let flags = BlockFlags {
            must_replicate: true,
            discard_block_on_error: true,
            last_block: last,
            ..Default::default()
        };
        let length = sdnv::encode::encoding_len(age) as u64;
        xmit_blocks.generate_preamble(idx, BlockType::Age, flags, length);
        sdnv::encode::encode_into(age, xmit_blocks[idx].contents_mut());
        Ok(())
    }

    fn consume(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        buf: &[u8],
    ) -> Result<usize, Error> {
        let mut consumed = 0;
        if block.data_offset() == 0 {
            consumed = processor::consume_preamble(bundle.recv_blocks.dict(), block, buf)?;
            if block.data_offset() == 0 {
                return Ok(consumed);
            }
        }
        consumed += processor::consume_body(block, &buf[consumed..]);
        if !block.complete() {
            return Ok(consumed);
        }

        let (age, _) = sdnv::decode::decode(block.data()).map_err(Error::InvalidSdnv)?;
        bundle.age = Some(age);
        Ok(consumed)
    }
}
