use super::*;

/// Handles the previous-hop block (type 5).
///
/// Carries the sending node's own endpoint id so the next hop knows where
/// a bundle arrived from. The endpoint travels entirely as a preamble
/// endpoint reference into the dictionary; the body is empty.
#[derive(Debug)]
pub struct PreviousHopBlockProcessor {
    local_eid: Eid,
}

impl PreviousHopBlockProcessor {
    pub fn new(local_eid: Eid) -> Self {
        Self { local_eid }
    }
}

impl BlockProcessor for PreviousHopBlockProcessor {
    fn block_type(&self) -> BlockType {
        BlockType::PreviousHop
    }

    fn prepare(
        &self,
        _bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        _source: Option<SourceRef>,
        link: &Link,
        _list: ListOwner,
    ) -> Result<(), Error> {
        if !link.params().announce_previous_hop {
            // No block to include; not a failure
            return Ok(());
        }
        // The source block's content is irrelevant: generate always
        // announces this node
        xmit_blocks.append_block(BlockType::PreviousHop, None);
        Ok(())
    }

    fn generate(
        &self,
        _bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        idx: usize,
        link: &Link,
        last: bool,
    ) -> Result<(), Error> {
        debug_assert!(link.params().announce_previous_hop);

        xmit_blocks[idx].add_eid(self.local_eid.clone());
        let flags = BlockFlags {
            discard_block_on_error: true,
            last_block: last,
            ..Default::default()
        };
        xmit_blocks.generate_preamble(idx, BlockType::PreviousHop, flags, 0);
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

        let Some(prevhop) = block.eid_list().first() else {
            error!("Previous-hop block carries no endpoint reference");
            return Err(Error::MissingEidReference);
        };
        bundle.previous_hop = Some(prevhop.clone());
        Ok(consumed)
    }
}
