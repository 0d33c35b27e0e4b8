#![allow(clippy::unwrap_used, clippy::panic)]

//! Property-based tests for the live frame parser.
//!
//! Uses proptest to verify:
//! 1. Arbitrary text never panics `decode_frame` (returns `Err` gracefully).
//! 2. Arbitrary bytes never panic `decode_binary_frame`.
//! 3. Any message frame with finite telemetry survives encode → decode with
//!    its identity and telemetry intact.

use chrono::{DateTime, Utc};
use loramesh_proto::codec;
use loramesh_proto::frame::LiveFrame;
use loramesh_proto::message::{MessageRecord, Telemetry};
use proptest::prelude::*;

fn received_at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

/// Strategy for telemetry values a LoRa radio can plausibly report.
fn arb_telemetry() -> impl Strategy<Value = Telemetry> {
    (
        prop::option::of(-150.0f64..0.0),
        prop::option::of(-25.0f64..15.0),
    )
        .prop_map(|(rssi, snr)| Telemetry { rssi, snr })
}

/// Strategy for message records with second-resolution timestamps.
fn arb_record() -> impl Strategy<Value = MessageRecord> {
    (
        "[a-z0-9-]{1,16}",
        ".{0,256}",
        0i64..4_000_000_000,
        arb_telemetry(),
    )
        .prop_map(|(source, payload, secs, telemetry)| {
            MessageRecord::new(
                source,
                payload,
                DateTime::from_timestamp(secs, 0).unwrap_or_default(),
            )
            .with_telemetry(telemetry)
        })
}

proptest! {
    #[test]
    fn arbitrary_text_never_panics(text in ".{0,512}") {
        let _ = codec::decode_frame(&text, received_at());
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode_binary_frame(&bytes, received_at());
    }

    #[test]
    fn json_objects_with_unexpected_fields_never_panic(
        key in "[a-z_]{1,12}",
        value in ".{0,64}",
    ) {
        let mut object = serde_json::Map::new();
        object.insert(key, serde_json::Value::String(value));
        let text = serde_json::Value::Object(object).to_string();
        let _ = codec::decode_frame(&text, received_at());
    }

    #[test]
    fn message_frames_keep_identity(record in arb_record()) {
        let text = codec::encode_frame(&LiveFrame::Message(record.clone())).unwrap();
        let LiveFrame::Message(decoded) = codec::decode_frame(&text, received_at()).unwrap() else {
            panic!("message frame decoded as roster push");
        };
        prop_assert!(record.key().matches(&decoded));
        prop_assert_eq!(decoded.sent_at, record.sent_at);
        prop_assert_eq!(decoded.telemetry, record.telemetry);
    }
}
