//!
//! The emitter: drives a single outgoing transfer through header, payload
//! and CRC, via COBS, to a caller-supplied sink. Allocates nothing.
//!

use core::cell::Cell;
use core::convert::TryFrom;

use cyphal_core::{InvalidArgumentError, Priority, TransferKind, WireNodeId};
use cyphal_header::Header;

use crate::cobs::CobsEncoder;
use crate::crc::TransferCrc;
use crate::metadata::TransferMetadata;

/// Outcome of a successful `tx_push` call. There is no error variant here —
/// invalid arguments are rejected before anything is sent, see
/// [`emit`]'s `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// The full frame was handed to the sink.
    Sent,
    /// The sink returned `false` partway through; the caller must treat
    /// whatever reached the link as a discarded partial frame.
    Aborted,
}

fn validate(metadata: &TransferMetadata) -> Result<Priority, InvalidArgumentError> {
    let priority = Priority::try_from(metadata.priority).map_err(|_| InvalidArgumentError)?;
    if !metadata.port.is_valid_for(metadata.kind) {
        return Err(InvalidArgumentError);
    }
    match metadata.kind {
        TransferKind::Message => {
            if !metadata.remote_node.is_unset() {
                return Err(InvalidArgumentError);
            }
        }
        TransferKind::Request | TransferKind::Response => {
            if metadata.remote_node.is_unset() {
                return Err(InvalidArgumentError);
            }
        }
    }
    Ok(priority)
}

/// Frames `metadata`/`payload` and streams it to `sink` fragment by
/// fragment, each fragment at most 255 bytes. `source` is the emitting
/// instance's own node ID (unset for an anonymous instance).
pub fn emit<U>(
    source: WireNodeId,
    metadata: &TransferMetadata,
    payload: &[u8],
    user: &mut U,
    mut sink: impl FnMut(&mut U, &[u8]) -> bool,
) -> Result<TxOutcome, InvalidArgumentError> {
    let priority = validate(metadata)?;

    let header = Header {
        priority,
        kind: metadata.kind,
        port: metadata.port,
        source,
        destination: metadata.remote_node,
        transfer_id: metadata.transfer_id,
    };
    let header_bytes = cyphal_header::write(&header);

    if !sink(&mut *user, &[0u8]) {
        return Ok(TxOutcome::Aborted);
    }

    let mut encoder = CobsEncoder::new();
    let mut crc = TransferCrc::new();
    let ok = Cell::new(true);
    {
        let mut forward = |frag: &[u8]| -> bool {
            if ok.get() {
                ok.set(sink(&mut *user, frag));
            }
            ok.get()
        };

        for &byte in header_bytes.iter() {
            if !encoder.push(byte, &mut forward) {
                break;
            }
        }
        if ok.get() {
            for &byte in payload {
                crc.update(byte);
                if !encoder.push(byte, &mut forward) {
                    break;
                }
            }
        }
        if ok.get() {
            for &byte in crc.finalize().to_le_bytes().iter() {
                if !encoder.push(byte, &mut forward) {
                    break;
                }
            }
        }
        if ok.get() {
            encoder.finish(&mut forward);
        }
    }

    if !ok.get() {
        return Ok(TxOutcome::Aborted);
    }
    if !sink(&mut *user, &[0u8]) {
        return Ok(TxOutcome::Aborted);
    }
    Ok(TxOutcome::Sent)
}

#[cfg(test)]
mod test {
    use super::*;
    use cyphal_core::{NodeId, PortId, TransferId};

    fn sample() -> TransferMetadata {
        TransferMetadata {
            priority: Priority::Nominal.value(),
            kind: TransferKind::Message,
            port: PortId::from(1000),
            remote_node: WireNodeId::Unset,
            transfer_id: TransferId::from(42),
        }
    }

    /// Scenario S1: emitting "hello" produces a single well-formed frame
    /// that a matching receiver can decode back to the original bytes.
    #[test]
    fn emits_a_well_formed_frame() {
        let metadata = sample();
        let mut out: alloc::vec::Vec<u8> = alloc::vec::Vec::new();
        let outcome = emit(WireNodeId::Unset, &metadata, b"hello", &mut out, |buf, frag| {
            buf.extend_from_slice(frag);
            true
        })
        .unwrap();
        assert_eq!(outcome, TxOutcome::Sent);
        assert_eq!(out.first(), Some(&0u8));
        assert_eq!(out.last(), Some(&0u8));
        assert!(out[1..out.len() - 1].iter().all(|&b| b != 0), "COBS interior must be zero-free");
    }

    /// Scenario S5: an invalid priority is rejected before the sink runs.
    #[test]
    fn rejects_invalid_priority_without_touching_sink() {
        let mut metadata = sample();
        metadata.priority = 8;
        let mut calls = 0u32;
        let result = emit(WireNodeId::Unset, &metadata, b"hello", &mut calls, |calls, _frag| {
            *calls += 1;
            true
        });
        assert!(result.is_err());
        assert_eq!(calls, 0);
    }

    #[test]
    fn rejects_message_with_destination_set() {
        let mut metadata = sample();
        metadata.remote_node = WireNodeId::Node(NodeId::new(5).unwrap());
        let mut out: alloc::vec::Vec<u8> = alloc::vec::Vec::new();
        let result = emit(WireNodeId::Unset, &metadata, b"hello", &mut out, |buf, frag| {
            buf.extend_from_slice(frag);
            true
        });
        assert!(result.is_err());
    }

    #[test]
    fn rejects_request_without_destination() {
        let mut metadata = sample();
        metadata.kind = TransferKind::Request;
        metadata.port = PortId::from(42);
        let mut out: alloc::vec::Vec<u8> = alloc::vec::Vec::new();
        let result = emit(WireNodeId::Unset, &metadata, b"hello", &mut out, |buf, frag| {
            buf.extend_from_slice(frag);
            true
        });
        assert!(result.is_err());
    }

    #[test]
    fn sink_abort_stops_further_calls() {
        let metadata = sample();
        let mut calls = 0u32;
        let outcome = emit(WireNodeId::Unset, &metadata, b"hello", &mut calls, |calls, _frag| {
            *calls += 1;
            false
        })
        .unwrap();
        assert_eq!(outcome, TxOutcome::Aborted);
        assert_eq!(calls, 1, "only the opening delimiter should have reached the sink");
    }
}
