use mariawire::protocol::MAX_PAYLOAD_LEN;
use mariawire::protocol::writer::encode_lenenc_int;
use mariawire::{
    MemoryTransport, PacketReader, PacketWriter, Reassembler, ResponseCollector, Sequence,
    WireConfig,
};
use proptest::prelude::*;

fn write_packet(payload: &[u8]) -> MemoryTransport {
    let mut writer = PacketWriter::new(MemoryTransport::new(), &WireConfig::default());
    writer.start_packet(Sequence::new()).unwrap();
    writer.write_bytes(payload).unwrap();
    writer.flush(true).unwrap();
    writer.into_transport()
}

fn reassemble(stream: &[u8], chunk: usize, packets: usize) -> Vec<Vec<u8>> {
    let mut reassembler: Reassembler<ResponseCollector> =
        Reassembler::new(&WireConfig::default());
    reassembler.enqueue(ResponseCollector::count(packets), Sequence::new());
    let mut dispatched = 0;
    for piece in stream.chunks(chunk.max(1)) {
        dispatched += reassembler.feed(piece).unwrap();
    }
    assert_eq!(dispatched, packets);
    assert!(!reassembler.is_mid_packet());
    reassembler
        .pop_finished()
        .unwrap()
        .into_packets()
        .into_iter()
        .map(|p| p.into_payload())
        .collect()
}

/// Reverse the writer's backslash escaping.
fn unescape(quoted: &[u8]) -> Vec<u8> {
    assert_eq!(quoted.first(), Some(&b'\''));
    assert_eq!(quoted.last(), Some(&b'\''));
    let inner = &quoted[1..quoted.len() - 1];
    let mut out = Vec::with_capacity(inner.len());
    let mut bytes = inner.iter();
    while let Some(&b) = bytes.next() {
        if b == b'\\' {
            match bytes.next() {
                Some(b'0') => out.push(0),
                Some(&other) => out.push(other),
                None => panic!("dangling escape"),
            }
        } else {
            out.push(b);
        }
    }
    out
}

#[test]
fn test_frame_roundtrip_at_size_boundaries() {
    let sizes = [
        0,
        1,
        MAX_PAYLOAD_LEN - 1,
        MAX_PAYLOAD_LEN,
        MAX_PAYLOAD_LEN + 1,
        2 * MAX_PAYLOAD_LEN,
        3 * MAX_PAYLOAD_LEN,
    ];
    for size in sizes {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        let transport = write_packet(&payload);

        let frames = transport.frames();
        assert_eq!(frames.len(), size / MAX_PAYLOAD_LEN + 1, "size {size}");
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame[3] as usize, i, "sequence of frame {i} for size {size}");
        }
        let last = frames.last().unwrap();
        assert!(last.len() - 4 < MAX_PAYLOAD_LEN);

        let stream = transport.bytes();
        let packets = reassemble(&stream, stream.len(), 1);
        assert_eq!(packets[0].len(), size);
        assert!(packets[0] == payload, "payload mismatch for size {size}");
    }
}

#[test]
fn test_large_escaped_string_spans_frames() {
    let text: String = "it's a \"quoted\" \\ path\0"
        .chars()
        .cycle()
        .take(MAX_PAYLOAD_LEN / 2 + 1000)
        .collect();
    let mut writer = PacketWriter::new(MemoryTransport::new(), &WireConfig::default());
    writer.start_packet(Sequence::new()).unwrap();
    writer.write_string_escaped(&text).unwrap();
    writer.flush(true).unwrap();
    let transport = writer.into_transport();
    assert!(transport.frames().len() >= 2);

    let stream = transport.bytes();
    let packets = reassemble(&stream, 1 << 20, 1);
    assert_eq!(unescape(&packets[0]), text.as_bytes());
}

#[test]
fn test_escaping_example() {
    let transport = {
        let mut writer = PacketWriter::new(MemoryTransport::new(), &WireConfig::default());
        writer.start_packet(Sequence::new()).unwrap();
        writer.write_string_escaped("a'b\"c\\d\0e").unwrap();
        writer.flush(true).unwrap();
        writer.into_transport()
    };
    assert_eq!(&transport.frames()[0][4..], b"'a\\'b\\\"c\\\\d\\0e'");
}

#[test]
fn test_utf16_surrogates() {
    let units: Vec<u16> = "x\u{1F600}y".encode_utf16().collect();
    let mut writer = PacketWriter::new(MemoryTransport::new(), &WireConfig::default());
    writer.start_packet(Sequence::new()).unwrap();
    writer.write_utf16_escaped(&units).unwrap();
    writer.write_utf16_escaped(&[0x61, 0xD800, 0x62]).unwrap();
    writer.flush(true).unwrap();
    let payload = writer.transport().frames()[0][4..].to_vec();
    assert_eq!(payload, "'x\u{1F600}y''a?b'".as_bytes());
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_packets(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..600), 1..8),
        chunk in 1usize..97,
    ) {
        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend(write_packet(payload).bytes());
        }
        let whole = reassemble(&stream, stream.len(), payloads.len());
        let pieces = reassemble(&stream, chunk, payloads.len());
        prop_assert_eq!(&whole, &payloads);
        prop_assert_eq!(&pieces, &payloads);
    }

    #[test]
    fn prop_lenenc_int_roundtrip(value in any::<u64>()) {
        let mut encoded = [0u8; 9];
        let len = encode_lenenc_int(value, &mut encoded);
        let mut reader = PacketReader::new(&encoded[..len]);
        prop_assert_eq!(reader.read_lenenc_int().unwrap(), Some(value));
        prop_assert!(reader.is_empty());
    }

    #[test]
    fn prop_escaped_text_roundtrip(text in "\\PC{0,200}") {
        let transport = {
            let mut writer = PacketWriter::new(MemoryTransport::new(), &WireConfig::default());
            writer.start_packet(Sequence::new()).unwrap();
            writer.write_string_escaped(&text).unwrap();
            writer.flush(true).unwrap();
            writer.into_transport()
        };
        let payload = &transport.frames()[0][4..];
        prop_assert_eq!(unescape(payload), text.as_bytes());
    }
}
