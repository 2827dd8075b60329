//! Property-based tests for statistics and frame parsing.

use proptest::prelude::*;
use wsprobe::protocol::socketio::EnginePacket;
use wsprobe::protocol::{Frame, OpCode, apply_mask};
use wsprobe::stats::{LatencyDistribution, percentile, summarize};

fn latency_strategy() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..10_000.0, 1..200)
}

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Text), Just(OpCode::Binary)]
}

proptest! {
    #[test]
    fn test_percentiles_are_ordered(values in latency_strategy()) {
        let s = summarize(&values);
        let min = s.min.unwrap();
        let median = s.median.unwrap();
        let p95 = s.p95.unwrap();
        let p99 = s.p99.unwrap();
        let max = s.max.unwrap();
        prop_assert!(min <= median);
        prop_assert!(median <= p95);
        prop_assert!(p95 <= p99);
        prop_assert!(p99 <= max);
    }

    #[test]
    fn test_mean_within_bounds(values in latency_strategy()) {
        let s = summarize(&values);
        let mean = s.mean.unwrap();
        prop_assert!(mean >= s.min.unwrap() - 1e-6);
        prop_assert!(mean <= s.max.unwrap() + 1e-6);
        prop_assert!(s.std_dev.unwrap() >= 0.0);
        prop_assert_eq!(s.count, values.len());
    }

    #[test]
    fn test_summarize_is_idempotent(values in latency_strategy()) {
        prop_assert_eq!(summarize(&values), summarize(&values));
    }

    #[test]
    fn test_summarize_ignores_order(mut values in latency_strategy()) {
        let forward = summarize(&values);
        values.reverse();
        let reversed = summarize(&values);
        prop_assert_eq!(forward.median, reversed.median);
        prop_assert_eq!(forward.p95, reversed.p95);
        prop_assert_eq!(forward.max, reversed.max);
    }

    #[test]
    fn test_constant_values_have_zero_spread(value in 0.0f64..1000.0, n in 2usize..50) {
        let values = vec![value; n];
        let s = summarize(&values);
        prop_assert!(s.std_dev.unwrap() < 1e-9);
        prop_assert_eq!(s.p99, Some(value));
        prop_assert_eq!(s.median, Some(value));
    }

    #[test]
    fn test_percentile_monotonic_in_p(values in latency_strategy(), a in 0.0f64..100.0, b in 0.0f64..100.0) {
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(percentile(&sorted, lo).unwrap() <= percentile(&sorted, hi).unwrap());
    }

    #[test]
    fn test_distribution_counts_every_value(values in latency_strategy()) {
        let distribution = LatencyDistribution::from_values(&values);
        prop_assert_eq!(distribution.total(), values.len());
    }

    #[test]
    fn test_frame_parse_never_panics(data in prop::collection::vec(any::<u8>(), 0..300)) {
        let _ = Frame::parse(&data);
    }

    #[test]
    fn test_masked_frame_unmasks_payload(
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..2000),
        mask in any::<[u8; 4]>()
    ) {
        let frame = Frame::new(true, opcode, payload.clone());
        let mut buf = Vec::new();
        frame.write_to(&mut buf, Some(mask));
        prop_assert_eq!(buf.len(), frame.wire_size(true));

        let (parsed, consumed) = Frame::parse(&buf).unwrap();
        prop_assert_eq!(consumed, buf.len());
        prop_assert_eq!(parsed.opcode, opcode);
        prop_assert_eq!(parsed.payload(), &payload[..]);
    }

    #[test]
    fn test_truncated_frame_is_incomplete(
        payload in prop::collection::vec(any::<u8>(), 1..500),
        cut in 1usize..500
    ) {
        let mut buf = Vec::new();
        Frame::binary(payload).write_to(&mut buf, None);
        let cut = cut.min(buf.len() - 1);
        prop_assert!(Frame::parse(&buf[..cut]).is_err());
    }

    #[test]
    fn test_mask_is_involution(
        data in prop::collection::vec(any::<u8>(), 0..1000),
        mask in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, mask);
        apply_mask(&mut masked, mask);
        prop_assert_eq!(masked, data);
    }

    #[test]
    fn test_engine_decode_never_panics(text in ".{0,64}") {
        let _ = EnginePacket::decode(&text);
    }
}
