//! Tests for request-stream egress generation

use bytes::BytesMut;
use hq_demux::{
    settings_id, CodecError, Demultiplexer, Direction, Error, Header, Settings, StreamEvent,
};

use super::support::setup;

#[test]
fn test_request_reaches_peer() {
    let (mut client, _) = setup(Direction::Initiator);
    let (mut server, recorder) = setup(Direction::Responder);
    let request = vec![
        Header::new(":method", "POST"),
        Header::new(":path", "/upload"),
        Header::new("x-trace", "7f3a"),
    ];

    let mut wire = BytesMut::new();
    client.generate_header(&mut wire, 0, &request, false).unwrap();
    client.generate_body(&mut wire, 0, b"payload", None, false).unwrap();
    client
        .generate_trailers(&mut wire, 0, &[Header::new("x-checksum", "ok")])
        .unwrap();
    client.generate_eom(&mut wire, 0).unwrap();

    server.on_ingress_for(0, &wire).unwrap();
    assert!(server.set_current_stream(0));
    server.on_ingress_eof().unwrap();

    assert_eq!(
        recorder.take(),
        vec![
            StreamEvent::Headers { headers: request },
            StreamEvent::Body { data: b"payload".to_vec() },
            StreamEvent::Trailers { headers: vec![Header::new("x-checksum", "ok")] },
            StreamEvent::MessageComplete,
        ]
    );
}

#[test]
fn test_push_promise_reaches_initiator() {
    let (mut server, _) = setup(Direction::Responder);
    let (mut client, recorder) = setup(Direction::Initiator);
    let promised = vec![Header::new(":method", "GET"), Header::new(":path", "/style.css")];

    let mut wire = BytesMut::new();
    let push_id = server.allocate_push_id().unwrap();
    server
        .generate_header(&mut wire, 0, &[Header::new(":status", "200")], false)
        .unwrap();
    server.generate_push_promise(&mut wire, 0, push_id, &promised).unwrap();

    client.on_ingress_for(0, &wire).unwrap();

    assert_eq!(
        recorder.take(),
        vec![
            StreamEvent::Headers { headers: vec![Header::new(":status", "200")] },
            StreamEvent::PushPromise { push_id: 0, headers: promised },
        ]
    );
}

#[test]
fn test_initiator_cannot_push() {
    let (mut client, _) = setup(Direction::Initiator);
    let mut out = BytesMut::new();

    let err = client
        .generate_push_promise(&mut out, 0, 0, &[Header::new(":method", "GET")])
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Codec(CodecError::PushNotAllowed(Direction::Initiator))
    ));
    assert!(out.is_empty());
}

#[test]
fn test_header_list_over_peer_limit() {
    let peer: Settings = [(settings_id::MAX_FIELD_SECTION_SIZE, 40)].into_iter().collect();
    let mut demux: Demultiplexer =
        Demultiplexer::new(Direction::Responder).with_settings(peer, Settings::new());
    demux.add_codec(0).unwrap();
    let mut out = BytesMut::new();

    // 7 + 3 + 32 = 42
    let err = demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Codec(CodecError::HeaderListTooLarge { size: 42, max: 40 })
    ));
    assert!(out.is_empty());
    assert_eq!(demux.compression_info().blocks_encoded, 0);
}

#[test]
fn test_body_before_headers() {
    let (mut demux, _) = setup(Direction::Responder);
    let mut out = BytesMut::new();

    let err = demux.generate_body(&mut out, 0, b"x", None, false).unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::MissingHeaders)));

    let err = demux
        .generate_trailers(&mut out, 0, &[Header::new("a", "b")])
        .unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::MissingHeaders)));
    assert!(out.is_empty());
}

#[test]
fn test_egress_after_eom() {
    let (mut demux, _) = setup(Direction::Responder);
    let mut out = BytesMut::new();
    demux
        .generate_header(&mut out, 0, &[Header::new(":status", "204")], true)
        .unwrap();
    let len = out.len();

    let err = demux.generate_body(&mut out, 0, b"late", None, false).unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::EgressAfterEom)));

    let err = demux.generate_eom(&mut out, 0).unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::EgressAfterEom)));

    let err = demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::EgressAfterEom)));

    assert_eq!(out.len(), len);
}

#[test]
fn test_padding_is_ignored() {
    let (mut demux, _) = setup(Direction::Responder);
    let mut out = BytesMut::new();
    demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap();
    out.clear();

    let written = demux.generate_body(&mut out, 0, b"hi", Some(16), false).unwrap();

    assert_eq!(written, 4);
    assert_eq!(&out[..], &[0x00, 0x02, b'h', b'i']);
}

#[test]
fn test_empty_body_with_eom() {
    let (mut demux, _) = setup(Direction::Responder);
    let mut out = BytesMut::new();
    demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap();
    out.clear();

    assert_eq!(demux.generate_body(&mut out, 0, b"", None, true).unwrap(), 0);
    assert!(out.is_empty());
    assert!(demux.codec(0).unwrap().is_egress_complete());
}

#[test]
fn test_trailers_frame() {
    let (mut demux, _) = setup(Direction::Responder);
    let mut out = BytesMut::new();
    demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap();
    out.clear();

    // :path / is static index 4
    let written = demux
        .generate_trailers(&mut out, 0, &[Header::new(":path", "/")])
        .unwrap();

    assert_eq!(written, 3);
    assert_eq!(&out[..], &[0x01, 0x01, 0x84]);
}

#[test]
fn test_only_eom_after_trailers() {
    let (mut demux, _) = setup(Direction::Responder);
    let mut out = BytesMut::new();
    demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap();
    demux
        .generate_trailers(&mut out, 0, &[Header::new("x-checksum", "ok")])
        .unwrap();
    let len = out.len();

    let err = demux.generate_body(&mut out, 0, b"late", None, false).unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::EgressOutOfOrder("DATA"))));

    let err = demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::EgressOutOfOrder("HEADERS"))));

    let err = demux
        .generate_trailers(&mut out, 0, &[Header::new("x-checksum", "again")])
        .unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::EgressOutOfOrder("trailers"))));

    assert_eq!(out.len(), len);
    assert_eq!(demux.generate_eom(&mut out, 0).unwrap(), 0);
    assert!(demux.codec(0).unwrap().is_egress_complete());
}

#[test]
fn test_headers_after_body() {
    let (mut demux, _) = setup(Direction::Responder);
    let mut out = BytesMut::new();
    demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap();
    demux.generate_body(&mut out, 0, b"hi", None, false).unwrap();

    let err = demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::EgressOutOfOrder("HEADERS"))));
}

#[test]
fn test_interim_headers_before_final() {
    let (mut demux, _) = setup(Direction::Responder);
    let mut out = BytesMut::new();

    demux
        .generate_header(&mut out, 0, &[Header::new(":status", "103")], false)
        .unwrap();
    demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap();
    demux.generate_body(&mut out, 0, b"ok", None, true).unwrap();
}

#[test]
fn test_every_header_section_checks_peer_limit() {
    let peer: Settings = [(settings_id::MAX_FIELD_SECTION_SIZE, 50)].into_iter().collect();
    let mut demux: Demultiplexer =
        Demultiplexer::new(Direction::Responder).with_settings(peer, Settings::new());
    demux.add_codec(0).unwrap();
    let mut out = BytesMut::new();
    demux
        .generate_header(&mut out, 0, &[Header::new(":status", "200")], false)
        .unwrap();
    out.clear();

    // 18 + 19 + 32 = 69
    let oversized = [Header::new("x-long-header-name", "a-fairly-long-value")];

    let err = demux.generate_trailers(&mut out, 0, &oversized).unwrap_err();
    assert!(matches!(
        err,
        Error::Codec(CodecError::HeaderListTooLarge { size: 69, max: 50 })
    ));

    let err = demux
        .generate_push_promise(&mut out, 0, 0, &oversized)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Codec(CodecError::HeaderListTooLarge { size: 69, max: 50 })
    ));

    assert!(out.is_empty());
    // A rejected trailer section leaves trailers still possible
    demux
        .generate_trailers(&mut out, 0, &[Header::new("a", "b")])
        .unwrap();
}
