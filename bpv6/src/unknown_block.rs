use super::*;

/// The shared fallback for block types with no registered processor.
///
/// Passes bytes through opaquely: a received unknown block is forwarded
/// unmodified (with the forwarded-unprocessed flag raised) unless its own
/// flags say otherwise.
#[derive(Default, Debug)]
pub struct UnknownBlockProcessor;

impl UnknownBlockProcessor {
    fn source_block<'a>(&self, bundle: &'a Bundle, block: &BlockInfo) -> Result<&'a BlockInfo, Error> {
        block
            .source()
            .and_then(|source| bundle.source_block(source))
            .ok_or(Error::MissingSourceBlock)
    }
}

impl BlockProcessor for UnknownBlockProcessor {
    fn block_type(&self) -> BlockType {
        // Never registered; blocks dispatch here by falling through the
        // registry, carrying their own wire type codes
        BlockType::Unrecognised(0)
    }

    fn prepare(
        &self,
        bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        source: Option<SourceRef>,
        _link: &Link,
        _list: ListOwner,
    ) -> Result<(), Error> {
        // This processor only ever re-forwards received blocks
        let source = source.ok_or(Error::MissingSourceBlock)?;
        let source_block = bundle
            .source_block(source)
            .ok_or(Error::MissingSourceBlock)?;

        if source_block.flags().discard_block_on_error {
            // The block is not forwarded, and that is a success
            return Ok(());
        }

        xmit_blocks.append_block(source_block.block_type(), Some(source));
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
        let source = self.source_block(bundle, &xmit_blocks[idx])?;
        debug_assert!(!source.flags().delete_bundle_on_error);
        debug_assert_ne!(source.data_offset(), 0);

        let mut flags = source.flags();
        flags.last_block = last;
        flags.forwarded_unprocessed = true;

        let eid_list = source.eid_list().to_vec();
        let block_type = source.block_type();
        let data_length = source.data_length();
        let body = source.data().to_vec();

        xmit_blocks[idx].set_eid_list(eid_list);
        xmit_blocks.generate_preamble(idx, block_type, flags, data_length);
        xmit_blocks[idx].contents_mut().extend_from_slice(&body);
        debug_assert_eq!(xmit_blocks[idx].data_length(), data_length);
        Ok(())
    }

    fn validate(
        &self,
        bundle: &Bundle,
        _block_list: &BlockInfoVec,
        block: &BlockInfo,
        reception_reason: &mut Option<ReasonCode>,
        deletion_reason: &mut Option<ReasonCode>,
    ) -> bool {
        // Extension blocks of unknown type are unintelligible by definition
        if block.flags().report_on_error {
            *reception_reason = Some(ReasonCode::BlockUnintelligible);
        }

        if block.flags().delete_bundle_on_error {
            warn!(
                "Unknown block type {:?} demands bundle deletion on error: *{} -> {}",
                block.block_type(),
                bundle.source,
                bundle.destination
            );
            *deletion_reason = Some(ReasonCode::BlockUnintelligible);
            return false;
        }

        true
    }
}
