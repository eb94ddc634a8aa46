//!
//! The reassembler: one instance per redundant link, consuming wire bytes
//! and producing at most one completed transfer per call.
//!

use alloc::vec::Vec;

use fallible_collections::FallibleVec;

use cyphal_core::{Microseconds, NodeId, OutOfMemoryError, TransferKind, WireNodeId};
use cyphal_header::Header;

use crate::cobs::CobsDecoder;
use crate::crc::{self, TransferCrc};
use crate::metadata::{RxTransfer, TransferMetadata};
use crate::subscription::{session_key, Session, SubscriptionInfo, SubscriptionTree};
use crate::tree::AvlTree;

#[cfg(any(feature = "log", feature = "defmt"))]
use defmt_or_log::{debug, trace};

/// Number of trailing wire bytes that are the transfer CRC rather than
/// payload. Counted toward the running CRC but stripped from delivery.
const TRAILING_CRC_LEN: usize = 4;

struct HeaderPhase {
    buf: [u8; cyphal_header::HEADER_SIZE],
    len: usize,
}

struct PayloadPhase<U> {
    header: Header,
    crc: TransferCrc,
    buf: Vec<u8>,
    extent: usize,
    received: usize,
    timestamp: Microseconds,
    info: SubscriptionInfo<U>,
}

enum Phase<U> {
    Header(HeaderPhase),
    Payload(PayloadPhase<U>),
}

enum State<U> {
    Idle,
    Active { decoder: CobsDecoder, phase: Phase<U> },
    Discard,
}

/// Per-link byte-oriented reassembly state machine. See the module
/// documentation for the state diagram; this type only tracks the current
/// frame, the subscription registry and its sessions live on [`crate::Instance`].
pub struct Reassembler<U> {
    state: State<U>,
}

impl<U> Reassembler<U> {
    pub fn new() -> Self {
        Reassembler { state: State::Idle }
    }
}

impl<U> Default for Reassembler<U> {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumes `bytes`, returning the number of bytes consumed and, if a
/// complete transfer was reassembled before the buffer ran out, the
/// transfer and a snapshot of the subscription it matched.
///
/// For inputs of at most 32 bytes the residual case never occurs (the
/// return always consumes the whole slice unless a transfer completed
/// exactly at its end).
pub fn rx_accept<U: Clone>(
    subscriptions: &mut SubscriptionTree<U>,
    counters: &mut super::Counters,
    reassembler: &mut Reassembler<U>,
    timestamp: Microseconds,
    bytes: &[u8],
) -> Result<(usize, Option<(RxTransfer, SubscriptionInfo<U>)>), OutOfMemoryError> {
    for (i, &byte) in bytes.iter().enumerate() {
        if let Some(delivery) = feed(reassembler, subscriptions, counters, timestamp, byte)? {
            return Ok((i + 1, Some(delivery)));
        }
    }
    Ok((bytes.len(), None))
}

fn feed<U: Clone>(
    reassembler: &mut Reassembler<U>,
    subscriptions: &mut SubscriptionTree<U>,
    counters: &mut super::Counters,
    timestamp: Microseconds,
    byte: u8,
) -> Result<Option<(RxTransfer, SubscriptionInfo<U>)>, OutOfMemoryError> {
    if byte == 0 {
        let prev = core::mem::replace(&mut reassembler.state, State::Idle);
        if let State::Active { phase: Phase::Payload(p), .. } = prev {
            return Ok(finish_frame(subscriptions, counters, p));
        }
        return Ok(None);
    }

    match core::mem::replace(&mut reassembler.state, State::Idle) {
        State::Idle => {
            reassembler.state = State::Active {
                decoder: CobsDecoder::new(),
                phase: Phase::Header(HeaderPhase { buf: [0u8; cyphal_header::HEADER_SIZE], len: 0 }),
            };
            advance(reassembler, subscriptions, counters, timestamp, byte)
        }
        State::Discard => {
            reassembler.state = State::Discard;
            Ok(None)
        }
        active @ State::Active { .. } => {
            reassembler.state = active;
            advance(reassembler, subscriptions, counters, timestamp, byte)
        }
    }
}

fn advance<U: Clone>(
    reassembler: &mut Reassembler<U>,
    subscriptions: &mut SubscriptionTree<U>,
    counters: &mut super::Counters,
    timestamp: Microseconds,
    byte: u8,
) -> Result<Option<(RxTransfer, SubscriptionInfo<U>)>, OutOfMemoryError> {
    let (mut decoder, mut phase) = match core::mem::replace(&mut reassembler.state, State::Idle) {
        State::Active { decoder, phase } => (decoder, phase),
        other => {
            reassembler.state = other;
            return Ok(None);
        }
    };

    let decoded = decoder.feed(byte);
    for &data_byte in decoded.as_slice() {
        match advance_phase(phase, subscriptions, counters, timestamp, data_byte)? {
            Ok(next) => phase = next,
            Err(()) => {
                reassembler.state = State::Discard;
                return Ok(None);
            }
        }
    }
    reassembler.state = State::Active { decoder, phase };
    Ok(None)
}

type PhaseResult<U> = Result<Result<Phase<U>, ()>, OutOfMemoryError>;

fn advance_phase<U: Clone>(
    phase: Phase<U>,
    subscriptions: &SubscriptionTree<U>,
    counters: &mut super::Counters,
    timestamp: Microseconds,
    byte: u8,
) -> PhaseResult<U> {
    match phase {
        Phase::Header(mut h) => {
            if h.len >= h.buf.len() {
                #[cfg(any(feature = "log", feature = "defmt"))]
                trace!("oversize header, discarding frame");
                counters.error_count = counters.error_count.wrapping_add(1);
                return Ok(Err(()));
            }
            h.buf[h.len] = byte;
            h.len += 1;
            if h.len < h.buf.len() {
                return Ok(Ok(Phase::Header(h)));
            }

            let header = match cyphal_header::read(&h.buf) {
                Ok(header) => header,
                Err(_err) => {
                    #[cfg(any(feature = "log", feature = "defmt"))]
                    trace!("malformed header, discarding frame");
                    counters.error_count = counters.error_count.wrapping_add(1);
                    return Ok(Err(()));
                }
            };

            let info = match subscriptions.snapshot(header.kind, header.port) {
                Some(info) => info,
                None => {
                    #[cfg(any(feature = "log", feature = "defmt"))]
                    trace!("no matching subscription, discarding frame");
                    return Ok(Err(()));
                }
            };

            let mut buf: Vec<u8> = Vec::new();
            buf.try_reserve(info.extent).map_err(|_| OutOfMemoryError)?;

            Ok(Ok(Phase::Payload(PayloadPhase {
                header,
                crc: TransferCrc::new(),
                buf,
                extent: info.extent,
                received: 0,
                timestamp,
                info,
            })))
        }
        Phase::Payload(mut p) => {
            p.crc.update(byte);
            p.received += 1;
            if p.buf.len() < p.extent {
                p.buf.try_push(byte).map_err(|_| OutOfMemoryError)?;
            }
            Ok(Ok(Phase::Payload(p)))
        }
    }
}

fn finish_frame<U: Clone>(
    subscriptions: &mut SubscriptionTree<U>,
    counters: &mut super::Counters,
    p: PayloadPhase<U>,
) -> Option<(RxTransfer, SubscriptionInfo<U>)> {
    if !crc::finalize_matches_residue(p.crc.finalize()) {
        #[cfg(any(feature = "log", feature = "defmt"))]
        trace!("transfer CRC mismatch, dropping frame");
        counters.error_count = counters.error_count.wrapping_add(1);
        return None;
    }

    let true_payload_len = p.received.saturating_sub(TRAILING_CRC_LEN);
    let deliver_len = core::cmp::min(true_payload_len, p.extent);
    let mut payload = p.buf;
    payload.truncate(deliver_len);

    let accepted = dispatch(subscriptions, &p.header, p.timestamp);
    if !accepted {
        return None;
    }

    counters.transfer_count = counters.transfer_count.wrapping_add(1);
    let metadata = TransferMetadata {
        priority: p.header.priority.value(),
        kind: p.header.kind,
        port: p.header.port,
        remote_node: p.header.source,
        transfer_id: p.header.transfer_id,
    };
    Some((
        RxTransfer { metadata, timestamp: p.timestamp, payload },
        p.info,
    ))
}

/// Applies the transfer-ID deduplication policy and updates session state.
/// Returns whether the transfer should be delivered.
fn dispatch<U>(subscriptions: &mut SubscriptionTree<U>, header: &Header, timestamp: Microseconds) -> bool {
    let sub = match subscriptions.find_mut(header.kind, header.port) {
        Some(sub) => sub,
        None => return false,
    };

    let node = match header.source {
        WireNodeId::Unset => return true,
        WireNodeId::Node(node) => node,
    };

    let timeout = sub.timeout;
    let sessions: &mut AvlTree<(NodeId, Session)> = sub.sessions_mut();
    let result = sessions.find_or_insert(&node, session_key, || {
        Ok::<_, core::convert::Infallible>((
            node,
            Session { last_transfer_id: header.transfer_id, last_activity: timestamp },
        ))
    });
    let (entry, created) = result.expect("session factory is infallible");
    if created {
        #[cfg(any(feature = "log", feature = "defmt"))]
        debug!("new session");
        return true;
    }

    let session = &mut entry.1;
    let elapsed = timestamp.saturating_since(session.last_activity);
    if elapsed >= timeout {
        session.last_transfer_id = header.transfer_id;
        session.last_activity = timestamp;
        true
    } else if session.last_transfer_id != header.transfer_id {
        session.last_transfer_id = header.transfer_id;
        session.last_activity = timestamp;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tx;
    use cyphal_core::{PortId, Priority, TransferId};

    fn feed_all<U: Clone>(
        subscriptions: &mut SubscriptionTree<U>,
        counters: &mut super::super::Counters,
        reassembler: &mut Reassembler<U>,
        ts: Microseconds,
        bytes: &[u8],
    ) -> Vec<(RxTransfer, SubscriptionInfo<U>)> {
        let mut out = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let (consumed, delivery) = rx_accept(subscriptions, counters, reassembler, ts, rest).unwrap();
            if let Some(d) = delivery {
                out.push(d);
            }
            rest = &rest[consumed..];
        }
        out
    }

    fn encode_frame(metadata: &TransferMetadata, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        tx::emit(WireNodeId::Unset, metadata, payload, &mut out, |buf, frag| {
            buf.extend_from_slice(frag);
            true
        })
        .unwrap();
        out
    }

    #[test]
    fn scenario_s1_round_trips_hello() {
        let mut subscriptions: SubscriptionTree<()> = SubscriptionTree::new();
        subscriptions
            .subscribe(TransferKind::Message, PortId::from(1000), 64, Microseconds(2_000_000), ())
            .unwrap();
        let metadata = TransferMetadata {
            priority: Priority::Nominal.value(),
            kind: TransferKind::Message,
            port: PortId::from(1000),
            remote_node: WireNodeId::Unset,
            transfer_id: TransferId::from(42),
        };
        let frame = encode_frame(&metadata, b"hello");

        let mut counters = super::super::Counters::default();
        let mut reassembler = Reassembler::new();
        let delivered = feed_all(&mut subscriptions, &mut counters, &mut reassembler, Microseconds(0), &frame);

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0.payload.as_slice(), b"hello");
        assert_eq!(counters.transfer_count, 1);
    }

    #[test]
    fn scenario_s2_extra_delimiters_yield_one_delivery() {
        let mut subscriptions: SubscriptionTree<()> = SubscriptionTree::new();
        subscriptions
            .subscribe(TransferKind::Message, PortId::from(1000), 64, Microseconds(2_000_000), ())
            .unwrap();
        let metadata = TransferMetadata {
            priority: Priority::Nominal.value(),
            kind: TransferKind::Message,
            port: PortId::from(1000),
            remote_node: WireNodeId::Unset,
            transfer_id: TransferId::from(42),
        };
        let mut frame = encode_frame(&metadata, b"hello");
        frame.insert(0, 0);
        frame.push(0);

        let mut counters = super::super::Counters::default();
        let mut reassembler = Reassembler::new();
        let delivered = feed_all(&mut subscriptions, &mut counters, &mut reassembler, Microseconds(0), &frame);
        assert_eq!(delivered.len(), 1);
    }

    #[test]
    fn scenario_s4_truncates_to_extent_but_still_validates_full_crc() {
        let mut subscriptions: SubscriptionTree<()> = SubscriptionTree::new();
        subscriptions
            .subscribe(TransferKind::Request, PortId::from(42), 8, Microseconds(2_000_000), ())
            .unwrap();
        let metadata = TransferMetadata {
            priority: Priority::Nominal.value(),
            kind: TransferKind::Request,
            port: PortId::from(42),
            remote_node: WireNodeId::Node(NodeId::new(9).unwrap()),
            transfer_id: TransferId::from(1),
        };
        let payload = b"0123456789AB";
        let frame = encode_frame(&metadata, payload);

        let mut counters = super::super::Counters::default();
        let mut reassembler = Reassembler::new();
        let delivered = feed_all(&mut subscriptions, &mut counters, &mut reassembler, Microseconds(0), &frame);

        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0.payload.len(), 8);
        assert_eq!(delivered[0].0.payload.as_slice(), &payload[..8]);
    }

    #[test]
    fn scenario_s6_duplicate_transfer_id_suppressed_until_timeout() {
        let mut subscriptions: SubscriptionTree<()> = SubscriptionTree::new();
        subscriptions
            .subscribe(TransferKind::Message, PortId::from(1), 16, Microseconds(2_000_000), ())
            .unwrap();
        let metadata = TransferMetadata {
            priority: Priority::Nominal.value(),
            kind: TransferKind::Message,
            port: PortId::from(1),
            remote_node: WireNodeId::Node(NodeId::new(5).unwrap()),
            transfer_id: TransferId::from(7),
        };
        let frame = encode_frame(&metadata, b"x");

        let mut counters = super::super::Counters::default();
        let mut reassembler = Reassembler::new();

        let first = feed_all(&mut subscriptions, &mut counters, &mut reassembler, Microseconds(0), &frame);
        assert_eq!(first.len(), 1);

        let second = feed_all(&mut subscriptions, &mut counters, &mut reassembler, Microseconds(10), &frame);
        assert_eq!(second.len(), 0, "duplicate transfer ID within the timeout must be suppressed");

        let third = feed_all(&mut subscriptions, &mut counters, &mut reassembler, Microseconds(3_000_000), &frame);
        assert_eq!(third.len(), 1, "a gap exceeding the timeout re-admits the same transfer ID");
    }

    #[test]
    fn corrupt_frame_between_valid_frames_does_not_disturb_neighbors() {
        let mut subscriptions: SubscriptionTree<()> = SubscriptionTree::new();
        subscriptions
            .subscribe(TransferKind::Message, PortId::from(1000), 64, Microseconds(2_000_000), ())
            .unwrap();
        let metadata = TransferMetadata {
            priority: Priority::Nominal.value(),
            kind: TransferKind::Message,
            port: PortId::from(1000),
            remote_node: WireNodeId::Unset,
            transfer_id: TransferId::from(1),
        };
        let good = encode_frame(&metadata, b"hello");
        let mut corrupt = good.clone();
        let mid = corrupt.len() / 2;
        corrupt[mid] ^= 0xFF;
        if corrupt[mid] == 0 {
            corrupt[mid] = 1;
        }

        let mut stream = Vec::new();
        stream.extend_from_slice(&good);
        stream.extend_from_slice(&corrupt);
        stream.extend_from_slice(&good);

        let mut counters = super::super::Counters::default();
        let mut reassembler = Reassembler::new();
        let delivered = feed_all(&mut subscriptions, &mut counters, &mut reassembler, Microseconds(0), &stream);
        assert_eq!(delivered.len(), 2);
    }
}
