//! Property-based tests for stream decoding.
//!
//! Uses proptest to generate random event sequences and chunkings and verify
//! that decoding never depends on where chunk boundaries fall.

use proptest::prelude::*;
use voidrun_core::{EventDecoder, EventKind, EventRecord};

/// A random event kind as it appears on the wire.
fn kind() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("stdout"), Just("stderr"), Just("exit"), Just("progress")]
}

/// Payload lines, including multi-byte characters. Never empty, so no event
/// is discarded as a keep-alive.
fn payload() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z0-9 {}:\"é✓日]{1,12}", 1..4)
        .prop_map(|lines| lines.into_iter().map(|l| format!("x{l}")).collect())
}

fn events() -> impl Strategy<Value = Vec<(&'static str, Vec<String>)>> {
    prop::collection::vec((kind(), payload()), 1..8)
}

fn encode(events: &[(&'static str, Vec<String>)]) -> Vec<u8> {
    let mut out = String::new();
    for (kind, lines) in events {
        out.push_str(&format!("event: {kind}\n"));
        for line in lines {
            out.push_str(&format!("data: {line}\n"));
        }
        out.push('\n');
    }
    out.into_bytes()
}

fn expected(events: &[(&'static str, Vec<String>)]) -> Vec<EventRecord> {
    events
        .iter()
        .map(|(kind, lines)| EventRecord::new(EventKind::parse(kind), lines.join("\n")))
        .collect()
}

fn decode_in_chunks(bytes: &[u8], cuts: &[usize]) -> Vec<EventRecord> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
    points.sort_unstable();

    let mut decoder = EventDecoder::new();
    let mut out = Vec::new();
    let mut start = 0;
    for point in points {
        out.extend(decoder.push(&bytes[start..point]));
        start = point;
    }
    out.extend(decoder.push(&bytes[start..]));
    out.extend(decoder.finish());
    out
}

proptest! {
    /// Any chunking decodes to the same records as the whole input.
    #[test]
    fn chunking_never_changes_records(
        events in events(),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
    ) {
        let bytes = encode(&events);
        prop_assert_eq!(decode_in_chunks(&bytes, &cuts), expected(&events));
    }

    /// Nothing is left pending after a terminated stream.
    #[test]
    fn terminated_stream_leaves_no_pending_bytes(
        events in events(),
        cuts in prop::collection::vec(any::<usize>(), 0..16),
    ) {
        let bytes = encode(&events);
        let mut decoder = EventDecoder::new();
        let mut start = 0;
        let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
        points.sort_unstable();
        for point in points {
            decoder.push(&bytes[start..point]);
            start = point;
        }
        decoder.push(&bytes[start..]);
        prop_assert_eq!(decoder.pending_len(), 0);
        prop_assert!(decoder.finish().is_none());
    }

    /// Arbitrary bytes never panic the decoder.
    #[test]
    fn arbitrary_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..256), cut in any::<usize>()) {
        let split = cut % (data.len() + 1);
        let mut decoder = EventDecoder::new();
        decoder.push(&data[..split]);
        decoder.push(&data[split..]);
        let _ = decoder.finish();
    }
}
