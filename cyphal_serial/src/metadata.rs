//!
//! Transfer metadata and the reassembled transfer object, shared by the
//! emitter and the reassembler.
//!

use alloc::vec::Vec;

use cyphal_core::{Microseconds, PortId, TransferId, TransferKind, WireNodeId};

/// Everything about a transfer except its payload.
///
/// `priority` is a raw 0..=7 value rather than `cyphal_core::Priority`
/// because `tx_push` is responsible for rejecting an out-of-range value
/// with an error rather than relying on the type system to make it
/// unrepresentable — matching the conformance requirement that priority 8
/// is an invalid argument, not a caller bug caught at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferMetadata {
    pub priority: u8,
    pub kind: TransferKind,
    pub port: PortId,
    /// Destination for an outgoing transfer, origin for an incoming one.
    /// Unset for outgoing Message transfers and for anonymous incoming ones.
    pub remote_node: WireNodeId,
    pub transfer_id: TransferId,
}

/// A reassembled incoming transfer, ready for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxTransfer {
    pub metadata: TransferMetadata,
    /// Timestamp of the first data fragment of this transfer.
    pub timestamp: Microseconds,
    pub payload: Vec<u8>,
}
