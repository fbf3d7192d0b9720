//! Tests for the stream registry and the unseen-stream bound

use std::collections::HashSet;

use hq_demux::{Demultiplexer, Direction, RoutingError, StreamCodec};
use proptest::prelude::*;
use rstest::rstest;

use super::support::mock_demux;

#[test]
fn test_add_then_remove() {
    let mut demux = mock_demux(Direction::Responder);

    let codec = demux.add_codec(0).unwrap();
    assert_eq!(codec.stream_id(), 0);
    assert_eq!(codec.direction, Direction::Responder);
    assert!(demux.contains_stream(0));
    assert_eq!(demux.stream_count(), 1);

    assert!(demux.remove_codec(0));
    assert!(!demux.contains_stream(0));
    assert_eq!(demux.stream_count(), 0);
}

#[test]
fn test_remove_nonexistent_is_noop() {
    let mut demux = mock_demux(Direction::Responder);
    demux.add_codec(4).unwrap();

    assert!(!demux.remove_codec(999));
    assert_eq!(demux.stream_count(), 1);
}

#[test]
fn test_duplicate_add_is_rejected() {
    let mut demux = mock_demux(Direction::Responder);
    demux.add_codec(8).unwrap().ingress.push(1);

    let err = demux.add_codec(8).unwrap_err();
    assert_eq!(err, RoutingError::DuplicateStream(8));
    // The live codec survives
    assert_eq!(demux.codec(8).unwrap().ingress, vec![1]);
}

#[test]
fn test_readd_after_remove_creates_fresh_codec() {
    let mut demux = mock_demux(Direction::Responder);
    demux.add_codec(8).unwrap().ingress.push(1);
    demux.remove_codec(8);

    let codec = demux.add_codec(8).unwrap();
    assert!(codec.ingress.is_empty());
}

#[test]
fn test_unknown_codec_lookup() {
    let mut demux = mock_demux(Direction::Initiator);
    assert_eq!(demux.codec(3).unwrap_err(), RoutingError::UnknownStream(3));
    assert_eq!(demux.codec_mut(3).unwrap_err(), RoutingError::UnknownStream(3));
}

#[test]
fn test_stream_ids() {
    let mut demux = mock_demux(Direction::Responder);
    for id in [0, 4, 8] {
        demux.add_codec(id).unwrap();
    }
    let mut ids: Vec<_> = demux.stream_ids().collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 4, 8]);
}

#[test]
fn test_min_unseen_stream_id_advances_on_client_bidi() {
    let mut demux = mock_demux(Direction::Responder);
    demux.add_codec(4).unwrap();
    demux.add_codec(8).unwrap();
    assert_eq!(demux.min_unseen_stream_id(), 12);

    demux.add_codec(9).unwrap();
    assert_eq!(demux.min_unseen_stream_id(), 12);
}

#[test]
fn test_min_unseen_stream_id_ignores_older_streams() {
    let mut demux = mock_demux(Direction::Responder);
    demux.add_codec(20).unwrap();
    demux.add_codec(4).unwrap();
    assert_eq!(demux.min_unseen_stream_id(), 24);
}

#[test]
fn test_remove_does_not_lower_bound() {
    let mut demux = mock_demux(Direction::Responder);
    demux.add_codec(8).unwrap();
    demux.remove_codec(8);
    assert_eq!(demux.min_unseen_stream_id(), 12);
}

#[rstest]
#[case(Direction::Responder, 0, 4)]
#[case(Direction::Responder, 1, 0)]
#[case(Direction::Responder, 2, 0)]
#[case(Direction::Responder, 3, 0)]
#[case(Direction::Initiator, 0, 0)]
#[case(Direction::Initiator, 4, 0)]
fn test_bound_by_stream_kind(
    #[case] direction: Direction,
    #[case] stream_id: u64,
    #[case] expected: u64,
) {
    let mut demux: Demultiplexer = Demultiplexer::new(direction);
    demux.add_codec(stream_id).unwrap();
    assert_eq!(demux.min_unseen_stream_id(), expected);
}

#[derive(Debug, Clone)]
enum Op {
    Add(u64),
    Remove(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..16).prop_map(Op::Add),
        (0u64..16).prop_map(Op::Remove),
    ]
}

proptest! {
    #[test]
    fn registry_matches_model(ops in proptest::collection::vec(op_strategy(), 0..64)) {
        let mut demux = mock_demux(Direction::Responder);
        let mut model = HashSet::new();
        let mut last_bound = 0;

        for op in ops {
            match op {
                Op::Add(id) => {
                    let added = demux.add_codec(id).is_ok();
                    prop_assert_eq!(added, model.insert(id));
                }
                Op::Remove(id) => {
                    prop_assert_eq!(demux.remove_codec(id), model.remove(&id));
                }
            }
            prop_assert!(demux.min_unseen_stream_id() >= last_bound);
            last_bound = demux.min_unseen_stream_id();
        }

        prop_assert_eq!(demux.stream_count(), model.len());
        for id in 0u64..16 {
            prop_assert_eq!(demux.contains_stream(id), model.contains(&id));
        }
    }
}
