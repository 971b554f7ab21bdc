use super::*;
use std::sync::Arc;

/// The protocol orchestrator: a write-once registry of block processors
/// plus the outbound (prepare → generate → finalize) and inbound
/// (consume → validate) pipelines that drive them.
///
/// The registry is populated at startup through `&mut self` and read-only
/// afterwards, so shared use needs no locking.
pub struct BundleProtocol {
    processors: [Option<Arc<dyn BlockProcessor>>; 256],
    unknown: Arc<dyn BlockProcessor>,
    primary: Arc<PrimaryBlockProcessor>,
}

impl Default for BundleProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleProtocol {
    /// A registry holding just the two structural processors, primary and
    /// payload. Extension processors are added with [`Self::register`].
    pub fn new() -> Self {
        let primary = Arc::new(PrimaryBlockProcessor);
        let mut protocol = Self {
            processors: core::array::from_fn(|_| None),
            unknown: Arc::new(UnknownBlockProcessor),
            primary: primary.clone(),
        };
        protocol
            .register(primary)
            .and_then(|_| protocol.register(Arc::new(PayloadBlockProcessor)))
            .expect("fresh registry");
        protocol
    }

    /// [`Self::new`] plus the stock extension processors: previous-hop
    /// (announcing `local_eid`) and bundle-age.
    pub fn with_default_processors(local_eid: Eid) -> Self {
        let mut protocol = Self::new();
        protocol
            .register(Arc::new(PreviousHopBlockProcessor::new(local_eid)))
            .and_then(|_| protocol.register(Arc::new(AgeBlockProcessor::default())))
            .expect("fresh registry");
        protocol
    }

    /// Registers a processor for its type code. Fails if the code is taken.
    pub fn register(&mut self, processor: Arc<dyn BlockProcessor>) -> Result<(), Error> {
        let code = u8::from(processor.block_type());
        let slot = &mut self.processors[code as usize];
        if slot.is_some() {
            return Err(Error::DuplicateProcessor(code));
        }
        *slot = Some(processor);
        Ok(())
    }

    /// The processor for a type code, or the shared unknown-type fallback.
    pub fn find(&self, type_code: u8) -> &Arc<dyn BlockProcessor> {
        self.processors[type_code as usize]
            .as_ref()
            .unwrap_or(&self.unknown)
    }

    fn find_for(&self, block: &BlockInfo) -> &Arc<dyn BlockProcessor> {
        self.find(u8::from(block.block_type()))
    }

    /// Builds the outbound block list for `link`.
    ///
    /// Received bundles re-run `prepare` over each received block in order
    /// (the primary forces itself first); fresh bundles synthesize primary
    /// then payload. Application-injected blocks follow, then every other
    /// registered processor gets an opportunistic chance to add itself.
    pub fn prepare_blocks(&self, bundle: &Bundle, link: &Link) -> Result<BlockInfoVec, Error> {
        let mut xmit_blocks = BlockInfoVec::new();

        if !bundle.recv_blocks.is_empty() {
            for idx in 0..bundle.recv_blocks.len() {
                // Blocks following the payload of a reactively fragmented
                // bundle travel with the tail fragment instead
                if bundle.fragmented_incoming && xmit_blocks.has_block(BlockType::Payload) {
                    continue;
                }
                let block = &bundle.recv_blocks[idx];
                self.find_for(block)
                    .prepare(
                        bundle,
                        &mut xmit_blocks,
                        Some(SourceRef::received(idx)),
                        link,
                        ListOwner::Received,
                    )
                    .inspect_err(|e| {
                        error!(
                            "prepare failed for received block type {:?}: {e}",
                            block.block_type()
                        )
                    })?;
            }
        } else {
            self.find(u8::from(BlockType::Primary)).prepare(
                bundle,
                &mut xmit_blocks,
                None,
                link,
                ListOwner::None,
            )?;
            self.find(u8::from(BlockType::Payload)).prepare(
                bundle,
                &mut xmit_blocks,
                None,
                link,
                ListOwner::None,
            )?;
        }

        // Locally generated bundles carry blocks injected through the API
        for idx in 0..bundle.api_blocks.len() {
            let block = &bundle.api_blocks[idx];
            self.find_for(block)
                .prepare(
                    bundle,
                    &mut xmit_blocks,
                    Some(SourceRef::api(idx)),
                    link,
                    ListOwner::Api,
                )
                .inspect_err(|e| {
                    error!(
                        "prepare failed for api block type {:?}: {e}",
                        block.block_type()
                    )
                })?;
        }

        // Opportunistic pass: any registered type not yet in the list may
        // add itself. Individual refusals are normal here.
        for processor in self.processors.iter().flatten() {
            if xmit_blocks.has_block(processor.block_type()) {
                continue;
            }
            let _ = processor.prepare(bundle, &mut xmit_blocks, None, link, ListOwner::None);
        }

        Ok(xmit_blocks)
    }

    /// Generates the encoded bytes of every block in `blocks`, then
    /// regenerates the primary (whose body depends on the completed
    /// dictionary) and runs `finalize` in reverse order. Returns the total
    /// wire length. On error the caller discards `blocks`.
    pub fn generate_blocks(
        &self,
        bundle: &Bundle,
        blocks: &mut BlockInfoVec,
        link: &Link,
    ) -> Result<u64, Error> {
        if blocks.len() < 2 {
            return Err(Error::TooFewBlocks);
        }
        if blocks[0].block_type() != BlockType::Primary {
            return Err(Error::PrimaryNotFirst);
        }

        let count = blocks.len();
        for idx in 0..count {
            let last = idx + 1 == count;
            let block_type = blocks[idx].block_type();
            self.find(u8::from(block_type))
                .generate(bundle, blocks, idx, link, last)
                .inspect_err(|e| error!("generate failed for block type {block_type:?}: {e}"))?;
            debug_assert_eq!(blocks[idx].last_block(), last);
        }

        // Every endpoint reference is in the dictionary now
        self.primary.generate_primary(bundle, blocks, 0)?;

        // finalize in reverse order, so outer blocks can cover the already
        // finalized inner ones
        for idx in (0..count).rev() {
            let block_type = blocks[idx].block_type();
            self.find(u8::from(block_type))
                .finalize(bundle, blocks, idx, link)
                .inspect_err(|e| error!("finalize failed for block type {block_type:?}: {e}"))?;
        }

        Ok(blocks.total_length())
    }

    /// Parses a chunk of arriving data into the bundle's received block
    /// list, dispatching each block through the registry as its type code
    /// arrives. Returns the bytes consumed and whether the block flagged
    /// last completed, which ends the bundle.
    pub fn consume(&self, bundle: &mut Bundle, data: &[u8]) -> Result<(usize, bool), Error> {
        let origlen = data.len();
        let mut data = data;
        let mut last = false;

        // The first call creates a primary placeholder of unknown length
        if bundle.recv_blocks.is_empty() {
            bundle.recv_blocks.append_block(BlockType::Primary, None);
        }

        while !data.is_empty() {
            // A complete block at the tail means this byte starts a new one
            if bundle.recv_blocks.last().is_some_and(BlockInfo::complete) {
                bundle
                    .recv_blocks
                    .append_block(BlockType::from(data[0]), None);
            }

            // Detach the block so its processor can reach the rest of the
            // bundle while filling it in
            let mut block = bundle.recv_blocks.pop().expect("list is never empty here");
            let result = self
                .find(u8::from(block.owner()))
                .consume(bundle, &mut block, data);
            let complete = block.complete();
            let last_flag = block.last_block();
            bundle.recv_blocks.push(block);

            let cc = result.inspect_err(|e| error!("Protocol error handling block: {e}"))?;
            data = &data[cc..];

            if complete {
                if last_flag {
                    last = true;
                    break;
                }
            } else {
                debug_assert!(data.is_empty());
            }
        }

        Ok((origlen - data.len(), last))
    }

    /// Validates a fully received bundle: structural invariants over the
    /// block list plus every block's own `validate`.
    pub fn validate(
        &self,
        bundle: &mut Bundle,
        reception_reason: &mut Option<ReasonCode>,
        deletion_reason: &mut Option<ReasonCode>,
    ) -> bool {
        if bundle.recv_blocks.len() < 2 {
            error!("Bundle fails to contain at least two blocks");
            *deletion_reason = Some(ReasonCode::BlockUnintelligible);
            return false;
        }
        if bundle.recv_blocks[0].block_type() != BlockType::Primary {
            error!("Bundle fails to start with a primary block");
            *deletion_reason = Some(ReasonCode::BlockUnintelligible);
            return false;
        }

        // A trailing block whose preamble never arrived is salvaged by
        // dropping it, provided a structurally valid bundle remains
        if bundle
            .recv_blocks
            .last()
            .is_some_and(|b| b.data_offset() == 0)
        {
            debug!("Forgetting preamble-starved last block");
            bundle.recv_blocks.pop();
            if bundle.recv_blocks.len() < 2 {
                error!("Bundle fails to contain at least two blocks");
                *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return false;
            }
        }

        let mut primary_blocks = 0;
        let mut payload_blocks = 0;
        let last_idx = bundle.recv_blocks.len() - 1;

        for idx in 0..=last_idx {
            let block = &bundle.recv_blocks[idx];

            // Only the structurally last block may be preamble-starved,
            // and that one was dropped above
            if block.data_offset() == 0 {
                error!("Bundle block too short for the preamble");
                *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return false;
            }

            match block.block_type() {
                BlockType::Primary => primary_blocks += 1,
                BlockType::Payload => payload_blocks += 1,
                _ => {}
            }

            if !self.find_for(block).validate(
                bundle,
                &bundle.recv_blocks,
                block,
                reception_reason,
                deletion_reason,
            ) {
                return false;
            }

            // The last block must be flagged as such and no other may be
            if idx == last_idx {
                if !block.last_block() && !bundle.fragmented_incoming {
                    error!("Bundle's last block not flagged");
                    *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                    return false;
                }
            } else if block.last_block() {
                error!("Bundle block incorrectly flagged as last");
                *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return false;
            }
        }

        if primary_blocks != 1 {
            error!("Bundle contains {primary_blocks} primary blocks");
            *deletion_reason = Some(ReasonCode::BlockUnintelligible);
            return false;
        }
        if payload_blocks > 1 {
            error!("Bundle contains {payload_blocks} payload blocks");
            *deletion_reason = Some(ReasonCode::BlockUnintelligible);
            return false;
        }

        true
    }

    /// Copies out an arbitrary wire-level byte range of a generated block
    /// list. Returns the bytes produced and whether the range ended the
    /// bundle.
    pub fn produce(
        &self,
        bundle: &Bundle,
        blocks: &BlockInfoVec,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<(usize, bool), Error> {
        let origlen = buf.len();
        if origlen == 0 {
            return Ok((0, false));
        }

        // Advance past the blocks the offset skips entirely
        let mut offset = offset;
        let mut idx = 0;
        while idx < blocks.len() && offset >= blocks[idx].full_length() {
            offset -= blocks[idx].full_length();
            idx += 1;
        }

        let mut written = 0;
        while idx < blocks.len() {
            let block = &blocks[idx];
            let remainder = (block.full_length() - offset) as usize;
            let tocopy = (origlen - written).min(remainder);
            self.find_for(block)
                .produce(bundle, block, &mut buf[written..written + tocopy], offset)?;
            written += tocopy;
            offset = 0;

            if written == origlen {
                // Filled the buffer; did we also finish the bundle?
                return Ok((written, tocopy == remainder && block.last_block()));
            }
            // Completed this block with room left over
            if block.last_block() {
                return Ok((written, true));
            }
            idx += 1;
        }

        Ok((written, false))
    }
}
