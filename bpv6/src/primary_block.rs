use super::*;
use crate::processor::read_sdnv;

/// The bundle protocol version this engine speaks.
pub const CURRENT_VERSION: u8 = 6;

/// Handles the primary block.
///
/// The primary block shares the general framing discipline but not the
/// standard preamble: its layout is `[version:1][processing flags:SDNV]
/// [block length:SDNV]` followed by the eight dictionary offsets of the
/// destination / source / report-to / custodian endpoints, the creation
/// timestamp, the lifetime, the dictionary itself and, for fragments, the
/// fragment offset and original payload length.
///
/// Because its body depends on the dictionary built up by every other
/// block's `generate`, the orchestrator regenerates it via
/// [`PrimaryBlockProcessor::generate_primary`] after the rest of the list
/// is done.
#[derive(Default, Debug)]
pub struct PrimaryBlockProcessor;

fn require(value: Option<u64>) -> Result<u64, Error> {
    value.ok_or(Error::BadPrimaryLength)
}

/// Incremental parse of the version / flags / length header, buffering in
/// the block contents like the standard preamble codec.
fn consume_primary_preamble(block: &mut BlockInfo, buf: &[u8]) -> Result<usize, Error> {
    let start = block.contents().len();
    block.contents_mut().extend_from_slice(buf);

    let (preamble_len, block_length) = {
        let data = block.contents().as_slice();
        if data.is_empty() {
            return Ok(buf.len());
        }
        if data[0] != CURRENT_VERSION {
            warn!("Protocol version mismatch: {} != {CURRENT_VERSION}", data[0]);
            return Err(Error::InvalidVersion(data[0]));
        }
        let mut offset = 1;
        let Some(_flags) = read_sdnv(data, &mut offset)? else {
            return Ok(buf.len());
        };
        let Some(block_length) = read_sdnv(data, &mut offset)? else {
            return Ok(buf.len());
        };
        (offset, block_length)
    };

    block.contents_mut().truncate(preamble_len);
    block.set_data_offset(preamble_len);
    block.set_data_length(block_length);
    Ok(preamble_len - start)
}

impl PrimaryBlockProcessor {
    /// Full parse of a completed primary block into the bundle metadata
    /// and the receive list's dictionary.
    fn parse_primary(&self, bundle: &mut Bundle, block: &BlockInfo) -> Result<(), Error> {
        let data = block.contents().as_slice();
        let mut offset = 1;

        let flags = require(read_sdnv(data, &mut offset)?)?;
        let _block_length = require(read_sdnv(data, &mut offset)?)?;
        bundle.flags = BundleFlags::from(flags);

        let dest_scheme = require(read_sdnv(data, &mut offset)?)?;
        let dest_ssp = require(read_sdnv(data, &mut offset)?)?;
        let source_scheme = require(read_sdnv(data, &mut offset)?)?;
        let source_ssp = require(read_sdnv(data, &mut offset)?)?;
        let replyto_scheme = require(read_sdnv(data, &mut offset)?)?;
        let replyto_ssp = require(read_sdnv(data, &mut offset)?)?;
        let custodian_scheme = require(read_sdnv(data, &mut offset)?)?;
        let custodian_ssp = require(read_sdnv(data, &mut offset)?)?;

        let seconds = require(read_sdnv(data, &mut offset)?)?;
        let sequence_number = require(read_sdnv(data, &mut offset)?)?;
        bundle.creation_ts = CreationTimestamp::new(seconds, sequence_number);
        bundle.lifetime = require(read_sdnv(data, &mut offset)?)?;

        let dictionary_length = require(read_sdnv(data, &mut offset)?)? as usize;
        if data.len() - offset < dictionary_length {
            error!("Primary block advertises a dictionary longer than its body");
            return Err(Error::BadPrimaryLength);
        }
        bundle
            .recv_blocks
            .dict_mut()
            .set_raw(&data[offset..offset + dictionary_length])?;
        offset += dictionary_length;

        let dict = bundle.recv_blocks.dict();
        bundle.destination = dict.extract_eid(dest_scheme, dest_ssp)?;
        bundle.source = dict.extract_eid(source_scheme, source_ssp)?;
        bundle.report_to = dict.extract_eid(replyto_scheme, replyto_ssp)?;
        bundle.custodian = dict.extract_eid(custodian_scheme, custodian_ssp)?;

        if bundle.flags.is_fragment {
            bundle.frag_offset = require(read_sdnv(data, &mut offset)?)?;
            bundle.orig_length = require(read_sdnv(data, &mut offset)?)?;
        }

        trace!(
            "Parsed primary block: {} -> {} ts {}",
            bundle.source, bundle.destination, bundle.creation_ts
        );
        Ok(())
    }

    /// Writes the whole primary block. Must run after every other block has
    /// generated, so the dictionary holds every referenced endpoint.
    pub fn generate_primary(
        &self,
        bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        idx: usize,
    ) -> Result<(), Error> {
        let dict = xmit_blocks.dict_mut();
        let (dest_scheme, dest_ssp) = dict.add_eid(&bundle.destination);
        let (source_scheme, source_ssp) = dict.add_eid(&bundle.source);
        let (replyto_scheme, replyto_ssp) = dict.add_eid(&bundle.report_to);
        let (custodian_scheme, custodian_ssp) = dict.add_eid(&bundle.custodian);
        let dictionary = dict.raw().to_vec();

        let offsets = [
            dest_scheme,
            dest_ssp,
            source_scheme,
            source_ssp,
            replyto_scheme,
            replyto_ssp,
            custodian_scheme,
            custodian_ssp,
        ];

        let sdnv_len = |value: u64| sdnv::encode::encoding_len(value) as u64;
        let mut block_length = offsets.iter().map(|v| sdnv_len(*v)).sum::<u64>();
        block_length += sdnv_len(bundle.creation_ts.seconds);
        block_length += sdnv_len(bundle.creation_ts.sequence_number);
        block_length += sdnv_len(bundle.lifetime);
        block_length += sdnv_len(dictionary.len() as u64);
        block_length += dictionary.len() as u64;
        if bundle.flags.is_fragment {
            block_length += sdnv_len(bundle.frag_offset);
            block_length += sdnv_len(bundle.orig_length);
        }

        let flags = u64::from(bundle.flags);

        let block = &mut xmit_blocks[idx];
        let contents = block.contents_mut();
        contents.clear();
        contents.push(CURRENT_VERSION);
        sdnv::encode::encode_into(flags, contents);
        sdnv::encode::encode_into(block_length, contents);
        for v in offsets {
            sdnv::encode::encode_into(v, contents);
        }
        sdnv::encode::encode_into(bundle.creation_ts.seconds, contents);
        sdnv::encode::encode_into(bundle.creation_ts.sequence_number, contents);
        sdnv::encode::encode_into(bundle.lifetime, contents);
        sdnv::encode::encode_into(dictionary.len() as u64, contents);
        contents.extend_from_slice(&dictionary);
        if bundle.flags.is_fragment {
            sdnv::encode::encode_into(bundle.frag_offset, contents);
            sdnv::encode::encode_into(bundle.orig_length, contents);
        }

        // The primary keeps data_offset 0: its full length is its whole
        // contents, version and header included.
        let total = block.contents().len() as u64;
        block.set_data_length(total);
        debug_assert_eq!(
            total,
            1 + sdnv_len(flags) + sdnv_len(block_length) + block_length
        );
        Ok(())
    }
}

impl BlockProcessor for PrimaryBlockProcessor {
    fn block_type(&self) -> BlockType {
        BlockType::Primary
    }

    fn prepare(
        &self,
        bundle: &Bundle,
        xmit_blocks: &mut BlockInfoVec,
        source: Option<SourceRef>,
        _link: &Link,
        _list: ListOwner,
    ) -> Result<(), Error> {
        // Start the dictionary off with the four bundle endpoints
        let dict = xmit_blocks.dict_mut();
        dict.add_eid(&bundle.destination);
        dict.add_eid(&bundle.source);
        dict.add_eid(&bundle.report_to);
        dict.add_eid(&bundle.custodian);

        // The primary always goes first
        xmit_blocks.insert(
            0,
            match source {
                Some(source) => BlockInfo::with_source(BlockType::Primary, source),
                None => BlockInfo::new(BlockType::Primary),
            },
        );
        Ok(())
    }

    fn generate(
        &self,
        _bundle: &Bundle,
        _xmit_blocks: &mut BlockInfoVec,
        _idx: usize,
        _link: &Link,
        last: bool,
    ) -> Result<(), Error> {
        // The real work happens in generate_primary once the dictionary is
        // complete. There is always a payload after us.
        debug_assert!(!last);
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
            consumed = consume_primary_preamble(block, buf)?;
            if block.data_offset() == 0 {
                return Ok(consumed);
            }
        }
        consumed += processor::consume_body(block, &buf[consumed..]);
        if block.complete() {
            self.parse_primary(bundle, block)?;
        }
        Ok(consumed)
    }

    fn validate(
        &self,
        bundle: &Bundle,
        _block_list: &BlockInfoVec,
        _block: &BlockInfo,
        _reception_reason: &mut Option<ReasonCode>,
        deletion_reason: &mut Option<ReasonCode>,
    ) -> bool {
        // A bundle with a null source may not request reports or custody,
        // and must not be fragmentable (RFC 5050 section 3.3)
        if bundle.source.is_null() {
            if bundle.flags.receipt_report_requested
                || bundle.flags.delivery_report_requested
                || bundle.flags.app_ack_requested
            {
                error!("Bundle with null source eid has requested a report");
                *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return false;
            }
            if bundle.flags.custody_requested {
                error!("Bundle with null source eid has requested custody transfer");
                *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return false;
            }
            if !bundle.flags.do_not_fragment {
                error!("Bundle with null source eid has not set 'do-not-fragment'");
                *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return false;
            }
        }

        // Admin bundles cannot request custody transfer or reports
        if bundle.flags.is_admin_record {
            if bundle.flags.custody_requested {
                error!("Admin bundle requested custody transfer");
                *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return false;
            }
            if bundle.flags.receipt_report_requested
                || bundle.flags.custody_report_requested
                || bundle.flags.forward_report_requested
                || bundle.flags.delivery_report_requested
                || bundle.flags.delete_report_requested
                || bundle.flags.app_ack_requested
            {
                error!("Admin bundle has requested a report");
                *deletion_reason = Some(ReasonCode::BlockUnintelligible);
                return false;
            }
        }

        true
    }
}
