use bytes::Bytes;
use opaldb::core::protocol::{RespFrame, decode_one};
use proptest::prelude::*;

fn arb_frame() -> impl Strategy<Value = RespFrame> {
    let leaf = prop_oneof![
        "[a-zA-Z0-9 ]{0,24}".prop_map(RespFrame::SimpleString),
        "[A-Z]{3,9}( [a-z]{1,12}){0,3}".prop_map(RespFrame::Error),
        any::<i64>().prop_map(RespFrame::Integer),
        proptest::collection::vec(any::<u8>(), 0..64)
            .prop_map(|bytes| RespFrame::BulkString(Bytes::from(bytes))),
        Just(RespFrame::Null),
        Just(RespFrame::NullArray),
    ];
    leaf.prop_recursive(3, 48, 8, |inner| {
        proptest::collection::vec(inner, 0..8).prop_map(RespFrame::Array)
    })
}

proptest! {
    /// encode → decode is the identity for every frame kind, including
    /// binary-safe bulk strings, and the reported length covers the whole
    /// encoding.
    #[test]
    fn prop_encode_decode_roundtrip(frame in arb_frame()) {
        let encoded = frame.encode_to_vec();
        let (decoded, len) = decode_one(&encoded).unwrap().expect("complete frame");
        prop_assert_eq!(decoded, frame);
        prop_assert_eq!(len, encoded.len());
    }

    /// Truncating an encoding never produces a bogus frame: the decoder asks
    /// for more data or (for inline-looking prefixes) stays within bounds.
    #[test]
    fn prop_truncated_frames_do_not_panic(frame in arb_frame(), cut in 0usize..64) {
        let encoded = frame.encode_to_vec();
        if cut < encoded.len() {
            let _ = decode_one(&encoded[..cut]);
        }
    }

    /// Command lines survive the array framing helpers.
    #[test]
    fn prop_cmd_line_roundtrip(parts in proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 0..16),
        1..6,
    )) {
        let line: Vec<Bytes> = parts.into_iter().map(Bytes::from).collect();
        let frame = RespFrame::from_cmd_line(&line);
        prop_assert_eq!(frame.as_cmd_line().unwrap(), line);
    }
}
