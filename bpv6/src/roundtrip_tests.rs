use super::prelude::*;
use std::sync::Arc;

fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn new_bundle(payload: Vec<u8>) -> Bundle {
    let mut bundle = Bundle::new(Box::new(MemoryStore::from(payload)));
    bundle.source = "dtn://sender/app".parse().unwrap();
    bundle.destination = "dtn://receiver/app".parse().unwrap();
    bundle.creation_ts = CreationTimestamp::new(666_000_000, 42);
    bundle.lifetime = 3600;
    bundle
}

fn read_payload(bundle: &Bundle) -> Vec<u8> {
    let mut data = vec![0u8; bundle.payload().len() as usize];
    bundle.payload().read_data(0, &mut data).unwrap();
    data
}

/// Adds an opaque extension block of exactly `total_len` wire bytes (3 of
/// preamble, the rest body) to the bundle's api list.
fn add_api_block(
    protocol: &BundleProtocol,
    bundle: &mut Bundle,
    type_code: u8,
    total_len: usize,
    must_replicate: bool,
) {
    assert!(total_len > 3 && total_len - 3 < 128);
    let flags = BlockFlags {
        must_replicate,
        ..Default::default()
    };
    let mut dict = Dictionary::default();
    let mut block = BlockInfo::new(BlockType::Unrecognised(type_code));
    protocol
        .find(type_code)
        .init_block(
            &mut block,
            &mut dict,
            BlockType::Unrecognised(type_code),
            flags,
            &vec![type_code; total_len - 3],
        )
        .unwrap();
    assert_eq!(block.contents().len(), total_len);
    bundle.api_blocks.push(block);
}

/// prepare + generate + produce; leaves the generated list in
/// `bundle.xmit_blocks` and returns the full wire image.
fn generate_wire(protocol: &BundleProtocol, bundle: &mut Bundle, link: &Link) -> Vec<u8> {
    let mut blocks = protocol.prepare_blocks(bundle, link).unwrap();
    let total = protocol.generate_blocks(bundle, &mut blocks, link).unwrap();

    let mut wire = vec![0u8; total as usize];
    let (produced, last) = protocol.produce(bundle, &blocks, &mut wire, 0).unwrap();
    assert_eq!(produced as u64, total);
    assert!(last);

    bundle.xmit_blocks.insert_blocks(link, blocks);
    wire
}

/// Feeds a wire image to a fresh bundle in `chunk`-sized pieces and
/// validates it.
fn receive_wire(protocol: &BundleProtocol, wire: &[u8], chunk: usize) -> Bundle {
    let mut bundle = Bundle::new(Box::new(MemoryStore::new()));
    let mut fed = 0;
    let mut ended = false;
    while fed < wire.len() {
        let end = (fed + chunk).min(wire.len());
        let (cc, last) = protocol.consume(&mut bundle, &wire[fed..end]).unwrap();
        fed += cc;
        if last {
            ended = true;
            break;
        }
        assert_eq!(fed, end);
    }
    assert!(ended);
    assert_eq!(fed, wire.len());

    let mut reception = None;
    let mut deletion = None;
    assert!(protocol.validate(&mut bundle, &mut reception, &mut deletion));
    assert_eq!(deletion, None);
    bundle
}

fn validate_fails(protocol: &BundleProtocol, bundle: &mut Bundle) -> Option<ReasonCode> {
    let mut reception = None;
    let mut deletion = None;
    assert!(!protocol.validate(bundle, &mut reception, &mut deletion));
    deletion
}

#[test]
fn test_roundtrip() {
    let local: Eid = "dtn://sender/".parse().unwrap();
    let protocol = BundleProtocol::with_default_processors(local.clone());
    let link = Link::with_params(
        "uplink",
        LinkParams {
            announce_previous_hop: true,
        },
    );

    let payload = test_payload(4096);
    let mut bundle = new_bundle(payload.clone());
    bundle.flags.priority = Priority::Expedited;
    let wire = generate_wire(&protocol, &mut bundle, &link);

    // Whole-buffer and several chunked deliveries must agree
    for chunk in [wire.len(), 1, 13, 1500] {
        let received = receive_wire(&protocol, &wire, chunk);

        assert_eq!(received.source, bundle.source);
        assert_eq!(received.destination, bundle.destination);
        assert_eq!(received.report_to, Eid::null());
        assert_eq!(received.custodian, Eid::null());
        assert_eq!(received.creation_ts, bundle.creation_ts);
        assert_eq!(received.lifetime, 3600);
        assert_eq!(received.flags.priority, Priority::Expedited);
        assert_eq!(received.previous_hop, Some(local.clone()));
        assert_eq!(read_payload(&received), payload);

        let block_types: Vec<BlockType> =
            received.recv_blocks.iter().map(|b| b.block_type()).collect();
        assert_eq!(
            block_types,
            vec![BlockType::Primary, BlockType::Payload, BlockType::PreviousHop]
        );
        assert!(received.recv_blocks.last().unwrap().last_block());
    }
}

#[test]
fn test_produce_ranges() {
    let protocol = BundleProtocol::new();
    let link = Link::new("uplink");

    let mut bundle = new_bundle(test_payload(2000));
    let wire = generate_wire(&protocol, &mut bundle, &link);
    let blocks = bundle.xmit_blocks.find_blocks(&link).unwrap();

    // Producing in arbitrary chunks reproduces the same image
    for chunk in [1usize, 7, 256] {
        let mut copy = vec![0u8; wire.len()];
        let mut offset = 0;
        let mut last = false;
        while offset < wire.len() {
            let end = (offset + chunk).min(wire.len());
            let (n, l) = protocol
                .produce(&bundle, blocks, &mut copy[offset..end], offset as u64)
                .unwrap();
            assert_eq!(n, end - offset);
            offset = end;
            last = l;
        }
        assert!(last);
        assert_eq!(copy, wire);
    }
}

#[test]
fn test_forwarding() {
    let protocol = BundleProtocol::with_default_processors("dtn://router/".parse().unwrap());
    let quiet_link = Link::new("downlink");

    let mut original = new_bundle(test_payload(600));
    // An opaque block to carry across the hop
    add_api_block(&protocol, &mut original, 0xC0, 20, false);
    let mut wire = generate_wire(&protocol, &mut original, &quiet_link);

    // Splice in a second opaque block flagged discard-on-error behind the
    // 0xC0 block: [P, payload, 0xC0, 0xC1]
    let blocks = original.xmit_blocks.find_blocks(&quiet_link).unwrap();
    let c0_flags_pos = (blocks[0].full_length() + blocks[1].full_length() + 1) as usize;
    assert_eq!(wire[c0_flags_pos - 1], 0xC0);
    assert_eq!(wire[c0_flags_pos], 0x60); // forwarded-unprocessed + last
    wire[c0_flags_pos] = 0x20;
    wire.extend_from_slice(&[0xC1, 0x50, 0x06]); // discard-on-error + last
    wire.extend_from_slice(b"secret");

    let mut received = receive_wire(&protocol, &wire, 31);
    assert!(received.recv_blocks.has_block(BlockType::Unrecognised(0xC0)));
    assert!(received.recv_blocks.has_block(BlockType::Unrecognised(0xC1)));

    // Re-forward: the discard-on-error block is dropped, the other one is
    // carried opaquely with the forwarded-unprocessed flag raised
    let forwarded_wire = generate_wire(&protocol, &mut received, &quiet_link);
    let forwarded = receive_wire(&protocol, &forwarded_wire, forwarded_wire.len());

    assert_eq!(read_payload(&forwarded), test_payload(600));
    let carried = forwarded
        .recv_blocks
        .find_block(BlockType::Unrecognised(0xC0))
        .unwrap();
    assert!(carried.flags().forwarded_unprocessed);
    assert_eq!(carried.data(), &[0xC0u8; 17]);
    assert!(!forwarded.recv_blocks.has_block(BlockType::Unrecognised(0xC1)));
}

#[test]
fn test_age_block() {
    let mut protocol = BundleProtocol::new();
    protocol.register(Arc::new(AgeBlockProcessor::new(true))).unwrap();
    let link = Link::new("uplink");

    let mut bundle = new_bundle(test_payload(64));
    bundle.age = Some(1234);
    let wire = generate_wire(&protocol, &mut bundle, &link);

    let received = receive_wire(&protocol, &wire, 5);
    assert_eq!(received.age, Some(1234));
    let age_block = received.recv_blocks.find_block(BlockType::Age).unwrap();
    assert!(age_block.flags().must_replicate);
    assert!(age_block.flags().discard_block_on_error);
}

#[test]
fn test_register_duplicate() {
    let mut protocol = BundleProtocol::new();
    assert!(matches!(
        protocol.register(Arc::new(PayloadBlockProcessor)),
        Err(Error::DuplicateProcessor(1))
    ));
}

#[test]
fn test_validate_rejects() {
    let protocol = BundleProtocol::new();
    let link = Link::new("uplink");
    let mut bundle = new_bundle(test_payload(100));
    let wire = generate_wire(&protocol, &mut bundle, &link);
    let primary_len = bundle.xmit_blocks.find_blocks(&link).unwrap()[0].full_length() as usize;
    // [type][flags][length] with 1-byte fields
    assert_eq!(wire[primary_len], 0x01);
    assert_eq!(wire[primary_len + 1], 0x40); // last-block

    // Fewer than two blocks: the primary alone
    {
        let mut lone = Bundle::new(Box::new(MemoryStore::new()));
        let (cc, last) = protocol.consume(&mut lone, &wire[..primary_len]).unwrap();
        assert_eq!(cc, primary_len);
        assert!(!last);
        assert_eq!(
            validate_fails(&protocol, &mut lone),
            Some(ReasonCode::BlockUnintelligible)
        );
    }

    // Last block not flagged as last
    {
        let mut doctored = wire.clone();
        doctored[primary_len + 1] = 0x00;
        let mut bundle = Bundle::new(Box::new(MemoryStore::new()));
        let (cc, last) = protocol.consume(&mut bundle, &doctored).unwrap();
        assert_eq!(cc, doctored.len());
        assert!(!last);
        assert!(validate_fails(&protocol, &mut bundle).is_some());
    }

    // More than one payload block
    {
        let mut doctored = wire.clone();
        doctored[primary_len + 1] = 0x00;
        doctored.extend_from_slice(&[0x01, 0x40, 0x00]); // empty payload, last
        let mut bundle = Bundle::new(Box::new(MemoryStore::new()));
        let (cc, last) = protocol.consume(&mut bundle, &doctored).unwrap();
        assert_eq!(cc, doctored.len());
        assert!(last);
        assert!(validate_fails(&protocol, &mut bundle).is_some());
    }

    // A block that is not last carrying the last-block flag
    {
        let mut bundle = Bundle::new(Box::new(MemoryStore::new()));
        let (_, last) = protocol.consume(&mut bundle, &wire).unwrap();
        assert!(last);
        let mut dict = Dictionary::default();
        let mut stray = BlockInfo::new(BlockType::Unrecognised(0xC2));
        protocol
            .find(0xC2)
            .init_block(
                &mut stray,
                &mut dict,
                BlockType::Unrecognised(0xC2),
                BlockFlags::default(),
                b"xx",
            )
            .unwrap();
        bundle.recv_blocks.push(stray);
        assert!(validate_fails(&protocol, &mut bundle).is_some());
    }

    // First block not primary
    {
        let mut bundle = Bundle::new(Box::new(MemoryStore::new()));
        let (_, last) = protocol.consume(&mut bundle, &wire).unwrap();
        assert!(last);
        bundle.recv_blocks.remove(0);
        let mut dict = Dictionary::default();
        let mut stray = BlockInfo::new(BlockType::Unrecognised(0xC2));
        protocol
            .find(0xC2)
            .init_block(
                &mut stray,
                &mut dict,
                BlockType::Unrecognised(0xC2),
                BlockFlags::default(),
                b"xx",
            )
            .unwrap();
        bundle.recv_blocks.push(stray);
        assert!(validate_fails(&protocol, &mut bundle).is_some());
    }
}

#[test]
fn test_preamble_starved_salvage() {
    let protocol = BundleProtocol::new();
    let link = Link::new("uplink");
    let mut bundle = new_bundle(test_payload(50));
    let wire = generate_wire(&protocol, &mut bundle, &link);

    // The payload is not last; an extension block follows but only its
    // type code ever arrives
    let primary_len = bundle.xmit_blocks.find_blocks(&link).unwrap()[0].full_length() as usize;
    let mut doctored = wire.clone();
    doctored[primary_len + 1] = 0x00; // clear last-block on the payload
    doctored.push(0xC3); // a lone type code

    let mut partial = Bundle::new(Box::new(MemoryStore::new()));
    let (cc, last) = protocol.consume(&mut partial, &doctored).unwrap();
    assert_eq!(cc, doctored.len());
    assert!(!last);
    assert_eq!(partial.recv_blocks.len(), 3);
    assert_eq!(partial.recv_blocks.last().unwrap().data_offset(), 0);

    // As a reactive fragment the starved trailer is dropped and the
    // remaining two blocks stand
    partial.fragmented_incoming = true;
    let mut reception = None;
    let mut deletion = None;
    assert!(protocol.validate(&mut partial, &mut reception, &mut deletion));
    assert_eq!(partial.recv_blocks.len(), 2);

    // Without the reactive-fragment exemption the unflagged tail fails
    let mut partial = Bundle::new(Box::new(MemoryStore::new()));
    protocol.consume(&mut partial, &doctored).unwrap();
    assert!(validate_fails(&protocol, &mut partial).is_some());
}

#[test]
fn test_convert_to_fragment() {
    let protocol = BundleProtocol::new();
    let link = Link::new("uplink");
    let manager = FragmentManager::new(Box::new(MemoryAllocator));

    let payload = test_payload(400);
    let mut bundle = new_bundle(payload.clone());
    let wire = generate_wire(&protocol, &mut bundle, &link);

    // The stream dies 100 bytes short
    let mut partial = Bundle::new(Box::new(MemoryStore::new()));
    let (cc, last) = protocol.consume(&mut partial, &wire[..wire.len() - 100]).unwrap();
    assert_eq!(cc, wire.len() - 100);
    assert!(!last);

    assert!(manager.try_to_convert_to_fragment(&mut partial).unwrap());
    assert!(partial.flags.is_fragment);
    assert!(partial.fragmented_incoming);
    assert_eq!(partial.frag_offset, 0);
    assert_eq!(partial.orig_length, 400);
    assert_eq!(partial.payload().len(), 300);
    assert_eq!(read_payload(&partial), payload[..300]);

    let mut reception = None;
    let mut deletion = None;
    assert!(protocol.validate(&mut partial, &mut reception, &mut deletion));

    // A complete bundle is left alone
    let mut whole = receive_wire(&protocol, &wire, wire.len());
    assert!(!manager.try_to_convert_to_fragment(&mut whole).unwrap());
}

#[test]
fn test_convert_drops_byte_when_trailers_missing() {
    let protocol = BundleProtocol::with_default_processors("dtn://sender/".parse().unwrap());
    let link = Link::with_params(
        "uplink",
        LinkParams {
            announce_previous_hop: true,
        },
    );
    let manager = FragmentManager::new(Box::new(MemoryAllocator));

    let mut bundle = new_bundle(test_payload(400));
    let wire = generate_wire(&protocol, &mut bundle, &link);
    let blocks = bundle.xmit_blocks.find_blocks(&link).unwrap();
    // everything except the trailing previous-hop block
    let sent = (blocks.payload_offset() + 400) as usize;
    assert!(sent < wire.len());

    let mut partial = Bundle::new(Box::new(MemoryStore::new()));
    protocol.consume(&mut partial, &wire[..sent]).unwrap();
    assert_eq!(partial.payload().len(), 400);

    // The payload arrived whole, so a byte is sacrificed to make a gap
    assert!(manager.try_to_convert_to_fragment(&mut partial).unwrap());
    assert_eq!(partial.payload().len(), 399);
    assert_eq!(partial.orig_length, 400);
}

#[test]
fn test_reactive_fragmentation() {
    let protocol = BundleProtocol::new();
    let link = Link::new("uplink");
    let manager = FragmentManager::new(Box::new(MemoryAllocator));

    let payload = test_payload(2000);
    let mut bundle = new_bundle(payload.clone());
    generate_wire(&protocol, &mut bundle, &link);
    let blocks = bundle.xmit_blocks.find_blocks(&link).unwrap();
    let payload_offset = blocks.payload_offset();
    let total_length = blocks.total_length();

    // Died before the payload: nothing to salvage
    assert!(
        manager
            .try_to_reactively_fragment(&bundle, blocks, payload_offset)
            .unwrap()
            .is_none()
    );
    // Everything sent: nothing to do
    assert!(
        manager
            .try_to_reactively_fragment(&bundle, blocks, total_length)
            .unwrap()
            .is_none()
    );

    // Died 100 payload bytes in: the tail is exactly the remainder
    let tail = manager
        .try_to_reactively_fragment(&bundle, blocks, payload_offset + 100)
        .unwrap()
        .unwrap();
    assert!(tail.flags.is_fragment);
    assert_eq!(tail.frag_offset, 100);
    assert_eq!(tail.orig_length, 2000);
    assert_eq!(read_payload(&tail), payload[100..]);
}

#[test]
fn test_reactive_keeps_byte_for_trailing_blocks() {
    let protocol = BundleProtocol::with_default_processors("dtn://sender/".parse().unwrap());
    let link = Link::with_params(
        "uplink",
        LinkParams {
            announce_previous_hop: true,
        },
    );
    let manager = FragmentManager::new(Box::new(MemoryAllocator));

    let mut bundle = new_bundle(test_payload(500));
    generate_wire(&protocol, &mut bundle, &link);
    let blocks = bundle.xmit_blocks.find_blocks(&link).unwrap();

    // The whole payload went out but the trailing block did not
    let sent = blocks.payload_offset() + 500 + 1;
    assert!(sent < blocks.total_length());
    let tail = manager
        .try_to_reactively_fragment(&bundle, blocks, sent)
        .unwrap()
        .unwrap();
    assert_eq!(tail.frag_offset, 499);
    assert_eq!(tail.payload().len(), 1);
}

// A 10000 byte payload against a 1500 byte budget, with a 20 byte
// replicate-always block and a 30 byte ordinary block along for the ride.
#[test]
fn test_proactive_fragmentation_and_reassembly() {
    let protocol = BundleProtocol::new();
    let link = Link::new("uplink");
    let manager = FragmentManager::new(Box::new(MemoryAllocator));

    let payload = test_payload(10000);
    let mut bundle = new_bundle(payload.clone());
    add_api_block(&protocol, &mut bundle, 0xD0, 20, true);
    add_api_block(&protocol, &mut bundle, 0xD1, 30, false);
    generate_wire(&protocol, &mut bundle, &link);

    let fragment_bundles = |manager: &FragmentManager| -> Vec<Bundle> {
        let key = manager.proactively_fragment(&bundle, &link, 1500).unwrap();
        manager.remove_state(&key).unwrap().into_fragments()
    };
    let fragments = fragment_bundles(&manager);
    assert!(fragments.len() > 1);

    // The fragments partition [0, 10000) exactly, and every fragment's
    // re-measured wire length fits the budget
    let mut covered = 0;
    for fragment in &fragments {
        assert!(fragment.flags.is_fragment);
        assert_eq!(fragment.orig_length, 10000);
        assert_eq!(fragment.frag_offset, covered);
        covered += fragment.payload().len();
        assert_eq!(
            read_payload(fragment),
            payload[fragment.frag_offset as usize..covered as usize]
        );

        let mut copy = Bundle::new(Box::new(MemoryStore::from(read_payload(fragment))));
        fragment.copy_metadata(&mut copy);
        copy.flags = fragment.flags;
        copy.frag_offset = fragment.frag_offset;
        copy.frag_length = fragment.frag_length;
        copy.orig_length = fragment.orig_length;
        for block in fragment.recv_blocks.iter() {
            copy.recv_blocks.push(block.clone());
        }
        let mut blocks = protocol.prepare_blocks(&copy, &link).unwrap();
        let measured = protocol.generate_blocks(&copy, &mut blocks, &link).unwrap();
        assert!(
            measured <= 1500,
            "fragment at offset {} measures {measured} wire bytes",
            fragment.frag_offset
        );
    }
    assert_eq!(covered, 10000);

    // Reassemble in a scrambled order, with one duplicate fed first;
    // exactly one feed completes the bundle
    let dup_source = fragment_bundles(&manager);
    let mut reassembled = None;
    let mut feeds = 0;
    let feed = |manager: &FragmentManager, f: Bundle, out: &mut Option<Bundle>| {
        if let Some(bundle) = manager.process_for_reassembly(f).unwrap() {
            assert!(out.is_none(), "completed twice");
            *out = Some(bundle);
        }
    };

    let mut scrambled: Vec<Bundle> = Vec::new();
    let mut evens: Vec<Bundle> = Vec::new();
    for (i, f) in dup_source.into_iter().enumerate() {
        if i % 2 == 1 {
            scrambled.push(f);
        } else {
            evens.push(f);
        }
    }
    evens.reverse();
    scrambled.extend(evens);

    // the duplicate: the first fragment from the first batch
    let mut first_batch = fragments;
    feed(&manager, first_batch.remove(0), &mut reassembled);
    for f in scrambled {
        feeds += 1;
        feed(&manager, f, &mut reassembled);
    }
    assert!(feeds > 0);
    let reassembled = reassembled.expect("reassembly never completed");
    assert!(!reassembled.flags.is_fragment);
    assert_eq!(read_payload(&reassembled), payload);
}

#[test]
fn test_fragmentation_impossible() {
    let protocol = BundleProtocol::new();
    let link = Link::new("uplink");
    let manager = FragmentManager::new(Box::new(MemoryAllocator));

    // A payload of one byte cannot be split
    let mut tiny = new_bundle(test_payload(1));
    generate_wire(&protocol, &mut tiny, &link);
    assert!(matches!(
        manager.proactively_fragment(&tiny, &link, 1500),
        Err(Error::FragmentationImpossible(_))
    ));

    // A budget smaller than the fixed blocks cannot be met
    let mut bundle = new_bundle(test_payload(1000));
    generate_wire(&protocol, &mut bundle, &link);
    assert!(matches!(
        manager.proactively_fragment(&bundle, &link, 40),
        Err(Error::FragmentationImpossible(_))
    ));
}

#[test]
#[should_panic(expected = "Reassembly inconsistency")]
fn test_reassembly_inconsistency() {
    let manager = FragmentManager::new(Box::new(MemoryAllocator));

    let mut a = new_bundle(test_payload(10));
    a.flags.is_fragment = true;
    a.frag_offset = 0;
    a.frag_length = 10;
    a.orig_length = 100;
    manager.process_for_reassembly(a).unwrap();

    let mut b = new_bundle(test_payload(10));
    b.flags.is_fragment = true;
    b.frag_offset = 10;
    b.frag_length = 10;
    b.orig_length = 50; // disagrees
    manager.process_for_reassembly(b).unwrap();
}

#[test]
fn test_payload_process_and_mutate() {
    let protocol = BundleProtocol::new();
    let link = Link::new("uplink");

    let payload = test_payload(3000);
    let mut bundle = new_bundle(payload.clone());
    let wire = generate_wire(&protocol, &mut bundle, &link);
    let mut received = receive_wire(&protocol, &wire, 64);

    let mut block = received.recv_blocks.remove(1);
    assert_eq!(block.block_type(), BlockType::Payload);
    let body_start = block.data_offset() as u64;

    // process walks the store-backed body in bounded chunks
    let mut sum: u64 = 0;
    let mut calls = 0;
    protocol
        .find(1)
        .process(&received, &block, body_start, 3000, &mut |chunk: &[u8]| {
            calls += 1;
            sum += chunk.iter().map(|b| u64::from(*b)).sum::<u64>();
        })
        .unwrap();
    assert!(calls > 1);
    assert_eq!(sum, payload.iter().map(|b| u64::from(*b)).sum::<u64>());

    // mutate flushes changed chunks back to the store
    let changed = protocol
        .find(1)
        .mutate(
            &mut received,
            &mut block,
            body_start,
            3000,
            &mut |chunk: &mut [u8]| {
                for b in chunk.iter_mut() {
                    *b ^= 0xFF;
                }
                true
            },
        )
        .unwrap();
    assert!(changed);
    let flipped = read_payload(&received);
    assert!(
        flipped
            .iter()
            .zip(payload.iter())
            .all(|(a, b)| *a == *b ^ 0xFF)
    );
}
