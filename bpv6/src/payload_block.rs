use super::*;
use crate::storage::WORK_BUF_LEN;

/// Handles the payload block (type 1).
///
/// The body never enters the block contents buffer: inbound bytes stream
/// into the bundle's payload store and outbound bytes stream back out of
/// it, so only the preamble lives in memory.
#[derive(Default, Debug)]
pub struct PayloadBlockProcessor;

impl BlockProcessor for PayloadBlockProcessor {
    fn block_type(&self) -> BlockType {
        BlockType::Payload
    }

    fn generate(
        &self,
        bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        idx: usize,
        _link: &Link,
        last: bool,
    ) -> Result<(), Error> {
        // Just the preamble; the body stays in the payload store
        let flags = BlockFlags {
            last_block: last,
            ..Default::default()
        };
        xmit_blocks.generate_preamble(idx, BlockType::Payload, flags, bundle.payload().len());
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
                debug_assert_eq!(consumed, buf.len());
                return Ok(consumed);
            }
        }

        // A zero length payload is complete as soon as the preamble is
        if block.data_length() == 0 {
            block.set_complete(true);
            return Ok(consumed);
        }

        let buf = &buf[consumed..];
        if buf.is_empty() {
            return Ok(consumed);
        }

        // The contents buffer holds just the preamble; the rest goes to
        // the payload store
        debug_assert_eq!(block.contents().len(), block.data_offset());

        let rcvd = bundle.payload().len();
        let remainder = block.data_length() - rcvd;
        let tocopy = remainder.min(buf.len() as u64) as usize;
        if tocopy as u64 == remainder {
            block.set_complete(true);
        }

        bundle.payload_mut().write_data(&buf[..tocopy], rcvd)?;
        consumed += tocopy;

        if bundle.flags.is_fragment {
            bundle.frag_length = bundle.payload().len();
        }

        Ok(consumed)
    }

    fn validate(
        &self,
        bundle: &Bundle,
        _block_list: &BlockInfoVec,
        block: &BlockInfo,
        _reception_reason: &mut Option<ReasonCode>,
        deletion_reason: &mut Option<ReasonCode>,
    ) -> bool {
        if !block.complete() {
            // An incomplete payload is salvageable by reactive
            // fragmentation, but only with a full preamble, at least one
            // byte of payload, and fragmentation permitted.
            if block.data_offset() == 0
                || (block.data_length() != 0 && bundle.payload().is_empty())
                || bundle.flags.do_not_fragment
            {
                error!("Payload incomplete and cannot be fragmented");
                *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return false;
            }
        }
        true
    }

    fn produce(
        &self,
        bundle: &Bundle,
        block: &BlockInfo,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(), Error> {
        let offset = offset as usize;

        // First any of the preamble the range covers
        let mut copied = 0;
        if offset < block.data_offset() {
            copied = buf.len().min(block.data_offset() - offset);
            buf[..copied].copy_from_slice(&block.contents()[offset..offset + copied]);
        }
        if copied == buf.len() {
            return Ok(());
        }

        let payload_offset = (offset + copied - block.data_offset()) as u64;
        bundle.payload().read_data(payload_offset, &mut buf[copied..])?;
        Ok(())
    }

    fn process(
        &self,
        bundle: &Bundle,
        block: &BlockInfo,
        offset: u64,
        len: u64,
        f: &mut dyn FnMut(&[u8]),
    ) -> Result<(), Error> {
        let mut offset = offset as usize;
        let mut len = len;

        if offset < block.data_offset() {
            let todo = len.min((block.data_offset() - offset) as u64) as usize;
            f(&block.contents()[offset..offset + todo]);
            offset += todo;
            len -= todo as u64;
        }
        if len == 0 {
            return Ok(());
        }

        // Walk the payload in bounded chunks
        let mut work = [0u8; WORK_BUF_LEN];
        let mut payload_offset = (offset - block.data_offset()) as u64;
        let mut remaining = len.min(bundle.payload().len() - payload_offset);
        while remaining > 0 {
            let todo = remaining.min(WORK_BUF_LEN as u64) as usize;
            bundle.payload().read_data(payload_offset, &mut work[..todo])?;
            f(&work[..todo]);
            payload_offset += todo as u64;
            remaining -= todo as u64;
        }
        Ok(())
    }

    fn mutate(
        &self,
        bundle: &mut Bundle,
        block: &mut BlockInfo,
        offset: u64,
        len: u64,
        f: &mut dyn FnMut(&mut [u8]) -> bool,
    ) -> Result<bool, Error> {
        let mut changed = false;
        let mut offset = offset as usize;
        let mut len = len;

        if offset < block.data_offset() {
            let todo = len.min((block.data_offset() - offset) as u64) as usize;
            changed = f(&mut block.contents_mut()[offset..offset + todo]);
            offset += todo;
            len -= todo as u64;
        }
        if len == 0 {
            return Ok(changed);
        }

        let mut work = [0u8; WORK_BUF_LEN];
        let mut payload_offset = (offset - block.data_offset()) as u64;
        let mut remaining = len.min(bundle.payload().len() - payload_offset);
        while remaining > 0 {
            let todo = remaining.min(WORK_BUF_LEN as u64) as usize;
            bundle.payload().read_data(payload_offset, &mut work[..todo])?;
            let chunk_changed = f(&mut work[..todo]);
            // Flush modified chunks back to the store
            if chunk_changed {
                bundle.payload_mut().write_data(&work[..todo], payload_offset)?;
            }
            changed |= chunk_changed;
            payload_offset += todo as u64;
            remaining -= todo as u64;
        }
        Ok(changed)
    }
}
