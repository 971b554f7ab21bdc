use super::*;
use hashbrown::hash_map::Entry;
use std::sync::Mutex;

/// Extra budget reserved per fragment for the payload block preamble and
/// the growth of the primary block's own length field.
const FRAGMENT_SLOP: u64 = 12;

fn sdnv_len(value: u64) -> u64 {
    sdnv::encode::encoding_len(value) as u64
}

fn budget_sub(length: u64, cost: u64) -> Result<u64, Error> {
    length
        .checked_sub(cost)
        .ok_or(Error::FragmentationImpossible(
            "blocks exceed the fragment size budget",
        ))
}

/// The logical identity a fragment reassembles under: creation timestamp
/// plus source and destination endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    timestamp: CreationTimestamp,
    source: Eid,
    destination: Eid,
}

impl From<&Bundle> for FragmentKey {
    fn from(bundle: &Bundle) -> Self {
        Self {
            timestamp: bundle.creation_ts,
            source: bundle.source.clone(),
            destination: bundle.destination.clone(),
        }
    }
}

impl core::fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}->{}", self.timestamp, self.source, self.destination)
    }
}

/// One reassembly in progress (or one proactive fragmentation job): the
/// aggregate bundle under construction plus the fragments seen so far,
/// ordered by fragment offset.
#[derive(Debug)]
pub struct FragmentState {
    bundle: Bundle,
    fragments: Vec<Bundle>,
    leading_copied: bool,
    trailing_copied: bool,
}

impl FragmentState {
    fn new(bundle: Bundle) -> Self {
        Self {
            bundle,
            fragments: Vec::new(),
            leading_copied: false,
            trailing_copied: false,
        }
    }

    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    pub fn fragments(&self) -> &[Bundle] {
        &self.fragments
    }

    pub fn into_fragments(self) -> Vec<Bundle> {
        self.fragments
    }

    fn into_bundle(self) -> Bundle {
        self.bundle
    }

    /// Inserts keeping the list sorted by fragment offset.
    fn add_fragment(&mut self, fragment: Bundle) {
        let pos = self
            .fragments
            .partition_point(|f| f.frag_offset <= fragment.frag_offset);
        self.fragments.insert(pos, fragment);
    }

    /// Walks the fragments in offset order tracking a coverage watermark
    /// from byte 0: adjacent fragments advance it, redundant ones are
    /// skipped, partial overlaps count only their fresh remainder.
    /// Complete iff the watermark reaches the original payload length.
    ///
    /// Panics if a fragment disagrees on the original length; that means a
    /// key collision or a forged fragment, not a recoverable condition.
    pub fn check_completed(&self) -> bool {
        let total = self.bundle.payload().len();
        let mut watermark: u64 = 0;
        for fragment in &self.fragments {
            if fragment.orig_length != total {
                panic!(
                    "Reassembly inconsistency: fragment declares original length {} but {total} is being tracked",
                    fragment.orig_length
                );
            }
            let offset = fragment.frag_offset;
            let len = fragment.payload().len();
            if offset > watermark {
                // a gap
                return false;
            }
            if offset + len > watermark {
                watermark = offset + len;
            }
        }
        watermark == total
    }
}

/// Splits bundles into fragments honoring a size budget, and merges
/// arriving fragments back together.
///
/// Reassembly state is held in a table keyed by [`FragmentKey`]; every
/// table operation happens under one mutex, so lookup, insert and the
/// erase-on-completion are atomic relative to each other.
pub struct FragmentManager {
    table: Mutex<hashbrown::HashMap<FragmentKey, FragmentState>>,
    allocator: Box<dyn PayloadAllocator>,
}

impl FragmentManager {
    pub fn new(allocator: Box<dyn PayloadAllocator>) -> Self {
        Self {
            table: Mutex::new(hashbrown::HashMap::new()),
            allocator,
        }
    }

    /// Creates one fragment bundle covering `length` budgeted wire bytes of
    /// `bundle` starting at payload offset `offset`.
    ///
    /// The primary block, the payload block, blocks flagged
    /// replicate-in-every-fragment and blocks without a source are copied
    /// into every fragment; leading blocks ride along when `first` and
    /// trailing blocks when `last`. Their wire cost, the cost of the
    /// fragment's own offset / original-length fields, and
    /// [`FRAGMENT_SLOP`] all come out of `length` before it is clamped to
    /// the remaining payload.
    pub fn create_fragment(
        &self,
        bundle: &Bundle,
        recv_blocks: &BlockInfoVec,
        xmit_blocks: &BlockInfoVec,
        offset: u64,
        length: u64,
        first: bool,
        last: bool,
    ) -> Result<Bundle, Error> {
        let mut fragment = Bundle::new(self.allocator.allocate()?);
        bundle.copy_metadata(&mut fragment);
        fragment.flags.is_fragment = true;
        fragment.flags.do_not_fragment = false;

        // Copy forward the structural blocks, the replicate-always blocks,
        // and the leading/trailing blocks this fragment is responsible for
        let mut length = length;
        let mut found_payload = false;
        for block in xmit_blocks.iter() {
            let block_type = block.block_type();
            if block_type == BlockType::Primary
                || block_type == BlockType::Payload
                || (!found_payload && first)
                || (found_payload && last)
                || block.source().is_none()
                || block.flags().must_replicate
            {
                if let Some(source) = block.source() {
                    let src_block = match source.list {
                        ListOwner::Received => recv_blocks.get(source.index),
                        ListOwner::Api => bundle.api_blocks.get(source.index),
                        _ => None,
                    }
                    .ok_or(Error::MissingSourceBlock)?;
                    fragment.recv_blocks.push(src_block.clone());
                }

                if block_type == BlockType::Payload {
                    found_payload = true;
                } else {
                    length = budget_sub(length, block.contents().len() as u64)?;
                }
            }
        }

        // The new primary carries offset and original-length fields the
        // source bundle's may not have; correct the budget for them
        if !bundle.flags.is_fragment {
            fragment.orig_length = bundle.payload().len();
            fragment.frag_offset = offset;
            length = budget_sub(length, sdnv_len(bundle.payload().len()) + sdnv_len(offset))?;
        } else {
            fragment.orig_length = bundle.orig_length;
            fragment.frag_offset = bundle.frag_offset + offset;
            length = budget_sub(
                length,
                sdnv_len(bundle.frag_offset + offset) - sdnv_len(bundle.frag_offset),
            )?;
        }
        length = budget_sub(length, FRAGMENT_SLOP)?;

        // Clamp against the payload that is actually left
        let payload_len = bundle.payload().len();
        if offset + length >= payload_len {
            length = payload_len - offset;
            // A fragment not flagged last must leave payload behind for the
            // fragment that carries the trailing blocks
            if first {
                length = length.div_ceil(2);
            } else if !last {
                length -= 1;
            }
        }
        if length == 0 {
            return Err(Error::FragmentationImpossible("no payload for fragment"));
        }

        fragment.payload_mut().set_len(length)?;
        storage::copy_payload(fragment.payload_mut(), 0, bundle.payload(), offset, length)?;
        fragment.frag_length = length;

        debug!(
            "Created fragment {} offset {} length {length}",
            FragmentKey::from(&fragment),
            fragment.frag_offset
        );
        Ok(fragment)
    }

    /// Splits `bundle`'s generated block list for `link` into fragments of
    /// at most `max_length` wire bytes each, registering the resulting
    /// state under the bundle's fragment key.
    pub fn proactively_fragment(
        &self,
        bundle: &Bundle,
        link: &Link,
        max_length: u64,
    ) -> Result<FragmentKey, Error> {
        let payload_len = bundle.payload().len();
        let mut todo = payload_len;
        if todo <= 1 {
            return Err(Error::FragmentationImpossible("payload of 1 byte or less"));
        }

        let xmit_blocks = bundle
            .xmit_blocks
            .find_blocks(link)
            .ok_or_else(|| Error::NoBlocksForLink(link.name().to_string()))?;

        // Wire cost of a first fragment's leading blocks and a last
        // fragment's trailing blocks
        let mut first_len: u64 = 0;
        let mut last_len: u64 = 0;
        let mut found_payload = false;
        for block in xmit_blocks.iter() {
            let len = block.contents().len() as u64;
            match block.block_type() {
                BlockType::Primary => {
                    first_len += len;
                    last_len += len;
                }
                BlockType::Payload => found_payload = true,
                _ if block.flags().must_replicate || block.source().is_none() => {
                    first_len += len;
                    last_len += len;
                }
                _ if found_payload => last_len += len,
                _ => first_len += len,
            }
        }
        let extra = if bundle.flags.is_fragment {
            sdnv_len(bundle.orig_length) + FRAGMENT_SLOP
        } else {
            sdnv_len(payload_len.saturating_mul(2)) + FRAGMENT_SLOP
        };
        first_len += extra;
        last_len += extra;

        if first_len >= max_length || last_len >= max_length {
            return Err(Error::FragmentationImpossible(
                "extension blocks too large for the budget",
            ));
        }

        let mut fragments = Vec::new();
        let mut offset = 0;
        let mut first = true;
        let mut last = false;
        while todo > 0 {
            if !first && todo + last_len <= max_length {
                last = true;
            }
            let fragment = self.create_fragment(
                bundle,
                &bundle.recv_blocks,
                xmit_blocks,
                offset,
                max_length,
                first,
                last,
            )?;
            first = false;

            let fraglen = fragment.payload().len();
            offset += fraglen;
            todo -= fraglen;
            fragments.push(fragment);
        }

        info!(
            "Proactively fragmenting {payload_len} byte payload into {} <={max_length} byte fragments",
            fragments.len()
        );

        let key = FragmentKey::from(bundle);
        let mut table = self.table.lock().expect("fragment table lock poisoned");
        let state = match table.entry(key.clone()) {
            // Re-fragmenting a fragment folds into the existing state
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut aggregate = Bundle::new(self.allocator.allocate()?);
                bundle.copy_metadata(&mut aggregate);
                aggregate.flags.is_fragment = false;
                aggregate.payload_mut().set_len(if bundle.flags.is_fragment {
                    bundle.orig_length
                } else {
                    payload_len
                })?;
                entry.insert(FragmentState::new(aggregate))
            }
        };
        for fragment in fragments {
            state.add_fragment(fragment);
        }

        Ok(key)
    }

    /// Turns a partially received bundle whose payload preamble is known
    /// into an incoming reactive fragment, so the bytes that did arrive
    /// survive. Truncates an exactly-complete payload by one byte to force
    /// a genuine gap when trailing blocks are missing.
    pub fn try_to_convert_to_fragment(&self, bundle: &mut Bundle) -> Result<bool, Error> {
        let Some(payload_block) = bundle.recv_blocks.find_block(BlockType::Payload) else {
            return Ok(false);
        };
        if payload_block.data_offset() == 0 {
            // not even enough data for the preamble
            return Ok(false);
        }
        if bundle.flags.do_not_fragment {
            return Ok(false);
        }

        let payload_len = payload_block.data_length();
        let payload_is_last = payload_block.last_block();
        let mut payload_rcvd = bundle.payload().len();

        // A fragment cannot be made from a single byte of payload
        if payload_len <= 1 {
            return Ok(false);
        }

        if payload_rcvd >= payload_len {
            if payload_is_last {
                return Ok(false); // the whole bundle is present
            }
            // Extension blocks follow the payload; are they all here?
            if bundle
                .recv_blocks
                .last()
                .is_some_and(|b| b.data_offset() != 0 && b.complete() && b.last_block())
            {
                return Ok(false);
            }
            // The payload is complete but the bundle is not; force a real
            // gap by dropping a byte
            payload_rcvd -= 1;
            bundle.payload_mut().truncate(payload_rcvd)?;
        }

        debug!("Converting partial bundle into a reactive fragment of {payload_rcvd} bytes");

        if !bundle.flags.is_fragment {
            bundle.flags.is_fragment = true;
            bundle.orig_length = payload_len;
            bundle.frag_offset = 0;
        }
        bundle.frag_length = payload_rcvd;
        bundle.fragmented_incoming = true;
        Ok(true)
    }

    /// Given a transmission that stopped after `bytes_sent` wire bytes,
    /// synthesizes a tail fragment covering exactly the untransmitted
    /// payload remainder, or `None` if no valid split point exists inside
    /// the payload region.
    pub fn try_to_reactively_fragment(
        &self,
        bundle: &Bundle,
        blocks: &BlockInfoVec,
        bytes_sent: u64,
    ) -> Result<Option<Bundle>, Error> {
        if bundle.flags.do_not_fragment {
            return Ok(None);
        }

        let payload_offset = blocks.payload_offset();
        let total_length = blocks.total_length();
        if bytes_sent <= payload_offset || bytes_sent >= total_length {
            return Ok(None);
        }

        let payload_len = bundle.payload().len();
        if payload_len <= 1 {
            return Ok(None);
        }
        let payload_sent = payload_len.min(bytes_sent - payload_offset);

        let (frag_off, frag_len) = if payload_sent >= payload_len {
            // The payload went out whole but trailing blocks did not;
            // keep one byte to travel with them
            debug_assert!(
                blocks
                    .find_block(BlockType::Payload)
                    .is_some_and(|b| !b.last_block())
            );
            (payload_len - 1, 1)
        } else {
            (payload_sent, payload_len - payload_sent)
        };

        debug!("Creating reactive fragment (offset {frag_off} len {frag_len}/{payload_len})");

        // No wire budget constrains a retransmission tail; an unbounded
        // budget lets the remaining-payload clamp size it exactly
        let budget = total_length + payload_len + 64;
        let tail =
            self.create_fragment(bundle, &bundle.recv_blocks, blocks, frag_off, budget, false, true)?;
        debug_assert_eq!(tail.payload().len(), frag_len);
        Ok(Some(tail))
    }

    /// Folds an arriving fragment into its reassembly state, creating the
    /// state on first sight. Returns the reassembled bundle once coverage
    /// is complete, destroying the state.
    pub fn process_for_reassembly(&self, fragment: Bundle) -> Result<Option<Bundle>, Error> {
        if !fragment.flags.is_fragment {
            return Err(Error::NotAFragment);
        }
        let key = FragmentKey::from(&fragment);
        let mut table = self.table.lock().expect("fragment table lock poisoned");

        let state = match table.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!("No reassembly state for {key}; creating");
                let mut aggregate = Bundle::new(self.allocator.allocate()?);
                fragment.copy_metadata(&mut aggregate);
                aggregate.flags.is_fragment = false;
                aggregate.payload_mut().set_len(fragment.orig_length)?;
                entry.insert(FragmentState::new(aggregate))
            }
        };

        if state.bundle.payload().len() != fragment.orig_length {
            panic!(
                "Reassembly inconsistency: fragment {key} declares original length {} but {} is being tracked",
                fragment.orig_length,
                state.bundle.payload().len()
            );
        }

        // The payload bytes land at the fragment's offset
        let fraglen = fragment.payload().len();
        storage::copy_payload(
            state.bundle.payload_mut(),
            fragment.frag_offset,
            fragment.payload(),
            0,
            fraglen,
        )?;

        // The first fragment contributes the blocks up through the payload
        if fragment.frag_offset == 0 && !state.leading_copied {
            let mut insert_at = 0;
            for block in fragment.recv_blocks.iter() {
                state.bundle.recv_blocks.insert(insert_at, block.clone());
                insert_at += 1;
                if block.block_type() == BlockType::Payload {
                    break;
                }
            }
            state.leading_copied = true;
        }
        // The terminal fragment contributes the blocks after the payload
        if fragment.frag_offset + fraglen == fragment.orig_length && !state.trailing_copied {
            let mut seen_payload = false;
            for block in fragment.recv_blocks.iter() {
                if seen_payload {
                    state.bundle.recv_blocks.push(block.clone());
                }
                if block.block_type() == BlockType::Payload {
                    seen_payload = true;
                }
            }
            state.trailing_copied = true;
        }

        state.add_fragment(fragment);

        if !state.check_completed() {
            return Ok(None);
        }

        debug!("Reassembly of {key} complete");
        let state = table.remove(&key).expect("state present");
        Ok(Some(state.into_bundle()))
    }

    /// Removes one fragment from its reassembly state, destroying the
    /// state when no fragments remain. Returns whether anything was
    /// removed.
    pub fn discard_fragment(&self, fragment: &Bundle) -> bool {
        let key = FragmentKey::from(fragment);
        let mut table = self.table.lock().expect("fragment table lock poisoned");
        let Some(state) = table.get_mut(&key) else {
            return false;
        };
        let Some(pos) = state.fragments.iter().position(|f| {
            f.frag_offset == fragment.frag_offset && f.frag_length == fragment.frag_length
        }) else {
            return false;
        };
        state.fragments.remove(pos);
        if state.fragments.is_empty() {
            table.remove(&key);
        }
        true
    }

    /// Takes a whole fragmentation/reassembly state out of the table, as
    /// when the caller abandons it or wants the fragments for
    /// transmission.
    pub fn remove_state(&self, key: &FragmentKey) -> Option<FragmentState> {
        self.table
            .lock()
            .expect("fragment table lock poisoned")
            .remove(key)
    }
}
