//! Tests for the frame defragmenters.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;

use seine::defrag::{
    Defragmenter, HeaderProbe, LengthPrefixedDefragmenter, MixedDefragmenter, ReadOutcome,
};
use seine::{CancelToken, NetError};

/// Encode a payload with a 4-byte little-endian total-length header.
fn encode(payload: &[u8]) -> Vec<u8> {
    let total = (payload.len() + 4) as u32;
    let mut frame = total.to_le_bytes().to_vec();
    frame.extend_from_slice(payload);
    frame
}

#[tokio::test]
async fn assembles_frame_from_single_write() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    let mut defrag = LengthPrefixedDefragmenter::u32_le(1024);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    tx.write_all(&encode(b"ping")).await.unwrap();

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    assert_eq!(
        outcome,
        ReadOutcome::Frame(bytes::Bytes::from_static(&[
            0x08, 0x00, 0x00, 0x00, b'p', b'i', b'n', b'g'
        ]))
    );
    assert!(carry.is_empty());
}

#[tokio::test]
async fn assembles_frame_arriving_one_byte_at_a_time() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    let frame = encode(b"slow");

    let writer = tokio::spawn(async move {
        for byte in frame {
            tx.write_all(&[byte]).await.unwrap();
            tx.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tx
    });

    let mut defrag = LengthPrefixedDefragmenter::u32_le(1024);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    match outcome {
        ReadOutcome::Frame(frame) => assert_eq!(&frame[4..], b"slow"),
        other => panic!("expected frame, got {:?}", other),
    }

    drop(writer.await.unwrap());
}

#[tokio::test]
async fn two_frames_in_one_read_are_split() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    let mut coalesced = encode(b"a");
    coalesced.extend_from_slice(&encode(b"b"));
    tx.write_all(&coalesced).await.unwrap();

    let mut defrag = LengthPrefixedDefragmenter::u32_le(1024);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    let first = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    match first {
        ReadOutcome::Frame(frame) => assert_eq!(&frame[..], &encode(b"a")[..]),
        other => panic!("expected frame, got {:?}", other),
    }
    // The second frame comes entirely from leftovers.
    assert_eq!(carry.len(), 5);

    let second = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    match second {
        ReadOutcome::Frame(frame) => assert_eq!(&frame[..], &encode(b"b")[..]),
        other => panic!("expected frame, got {:?}", other),
    }
    assert!(carry.is_empty());
}

#[tokio::test]
async fn eof_mid_header_reports_stream_closed() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    tx.write_all(&[0x08, 0x00]).await.unwrap();
    drop(tx);

    let mut defrag = LengthPrefixedDefragmenter::u32_le(1024);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    assert_eq!(outcome, ReadOutcome::StreamClosed);
}

#[tokio::test]
async fn eof_mid_body_reports_stream_closed() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    tx.write_all(&[0x08, 0x00, 0x00, 0x00, b'p', b'i']).await.unwrap();
    drop(tx);

    let mut defrag = LengthPrefixedDefragmenter::u32_le(1024);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    assert_eq!(outcome, ReadOutcome::StreamClosed);
}

#[tokio::test]
async fn undersized_declared_length_is_dropped() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    // Total of 2 is less than the 4-byte header itself.
    tx.write_all(&[0x02, 0x00, 0x00, 0x00]).await.unwrap();

    let mut defrag = LengthPrefixedDefragmenter::u32_le(1024);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    assert_eq!(outcome, ReadOutcome::Dropped);
}

#[tokio::test]
async fn oversized_declared_length_is_dropped() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    tx.write_all(&[0xFF, 0xFF, 0xFF, 0x7F]).await.unwrap();

    let mut defrag = LengthPrefixedDefragmenter::u32_le(64);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    assert_eq!(outcome, ReadOutcome::Dropped);
}

#[tokio::test]
async fn cancelled_token_fails_pending_read() {
    let (_tx, mut rx) = tokio::io::duplex(1024);
    let mut defrag = LengthPrefixedDefragmenter::u32_le(1024);
    let mut carry = BytesMut::new();

    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await;
    assert!(matches!(outcome, Err(NetError::Cancelled)));
}

#[tokio::test]
async fn length_prefixed_round_trip_is_identity() {
    let payloads: Vec<&[u8]> = vec![b"", b"x", b"hello", &[0u8; 300]];

    let (mut tx, mut rx) = tokio::io::duplex(4096);
    for payload in &payloads {
        tx.write_all(&encode(payload)).await.unwrap();
    }
    drop(tx);

    let mut defrag = LengthPrefixedDefragmenter::u32_le(4096);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    for payload in &payloads {
        let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
        match outcome {
            ReadOutcome::Frame(frame) => assert_eq!(&frame[4..], *payload),
            other => panic!("expected frame, got {:?}", other),
        }
    }

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    assert_eq!(outcome, ReadOutcome::StreamClosed);
}

/// Probe for a 2-byte header: a magic byte, then a body-length byte.
fn magic_probe(prefix: &[u8]) -> HeaderProbe {
    if prefix.is_empty() {
        return HeaderProbe::NeedMore;
    }
    if prefix[0] != 0xAB {
        return HeaderProbe::Invalid;
    }
    if prefix.len() < 2 {
        return HeaderProbe::NeedMore;
    }
    HeaderProbe::Complete {
        header_len: 2,
        total_len: 2 + prefix[1] as usize,
    }
}

#[tokio::test]
async fn mixed_defragmenter_assembles_frames() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    tx.write_all(&[0xAB, 0x03, b'o', b'n', b'e']).await.unwrap();
    tx.write_all(&[0xAB, 0x00]).await.unwrap();

    let mut defrag = MixedDefragmenter::new(magic_probe, 1024);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    let first = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    match first {
        ReadOutcome::Frame(frame) => assert_eq!(&frame[..], &[0xAB, 0x03, b'o', b'n', b'e']),
        other => panic!("expected frame, got {:?}", other),
    }

    let second = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    match second {
        ReadOutcome::Frame(frame) => assert_eq!(&frame[..], &[0xAB, 0x00]),
        other => panic!("expected frame, got {:?}", other),
    }
}

#[tokio::test]
async fn mixed_defragmenter_drops_invalid_header() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    tx.write_all(&[0x00, 0x01, 0x02]).await.unwrap();

    let mut defrag = MixedDefragmenter::new(magic_probe, 1024);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    assert_eq!(outcome, ReadOutcome::Dropped);
}

#[tokio::test]
async fn mixed_defragmenter_reports_eof_mid_header() {
    let (mut tx, mut rx) = tokio::io::duplex(1024);
    tx.write_all(&[0xAB]).await.unwrap();
    drop(tx);

    let mut defrag = MixedDefragmenter::new(magic_probe, 1024);
    let mut carry = BytesMut::new();
    let cancel = CancelToken::new();

    let outcome = defrag.read_frame(&mut rx, &mut carry, &cancel).await.unwrap();
    assert_eq!(outcome, ReadOutcome::StreamClosed);
}
