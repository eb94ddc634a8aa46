#![no_std]
//!
//! Cyphal/Serial transport core: COBS framing, a single-frame reassembler,
//! transfer-ID deduplication and the subscription registry, built around a
//! user-supplied fallible allocator rather than a fixed-capacity arena.
//!

extern crate alloc;

mod cobs;
mod crc;
mod metadata;
mod rx;
mod subscription;
mod tree;
mod tx;

pub use cobs::{CobsDecoder, CobsEncoder, Decoded};
pub use crc::{TransferCrc, TRANSFER_CRC_RESIDUE};
pub use cyphal_header::HeaderError;
pub use metadata::{RxTransfer, TransferMetadata};
pub use rx::Reassembler;
pub use subscription::{Session, SubscriptionInfo};
pub use tree::AvlTree;
pub use tx::{emit as tx_emit, TxOutcome};

use cyphal_core::{InvalidArgumentError, Microseconds, NodeId, OutOfMemoryError, PortId, TransferKind, WireNodeId};
use subscription::SubscriptionTree;

/// The recommended transfer-ID timeout, carried over from the C reference
/// implementation this transport is descended from.
pub const DEFAULT_TRANSFER_ID_TIMEOUT: Microseconds = Microseconds(2_000_000);

/// Running counters maintained by an [`Instance`]. Not part of the wire
/// protocol; cheap observability patterned after
/// `canadensis_can::Receiver`'s `transfer_count`/`error_count` fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub transfer_count: u64,
    pub error_count: u64,
}

/// A single Cyphal/Serial transport endpoint: this node's identity, the
/// subscription registry, and running counters. One `Instance` is shared by
/// every reassembler (one per redundant link) and by outgoing transfers.
pub struct Instance<U> {
    node_id: WireNodeId,
    subscriptions: SubscriptionTree<U>,
    counters: Counters,
}

impl<U> Instance<U> {
    /// A new instance with an unset (anonymous) node ID.
    pub fn new() -> Self {
        Instance {
            node_id: WireNodeId::Unset,
            subscriptions: SubscriptionTree::new(),
            counters: Counters::default(),
        }
    }

    pub fn node_id(&self) -> WireNodeId {
        self.node_id
    }

    pub fn set_node_id(&mut self, node_id: NodeId) {
        self.node_id = WireNodeId::Node(node_id);
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    /// Frames `metadata`/`payload` and streams it to `sink`, using this
    /// instance's node ID as the outgoing source address.
    pub fn tx_push<S>(
        &self,
        metadata: &TransferMetadata,
        payload: &[u8],
        user: &mut S,
        sink: impl FnMut(&mut S, &[u8]) -> bool,
    ) -> Result<TxOutcome, InvalidArgumentError> {
        tx::emit(self.node_id, metadata, payload, user, sink)
    }

    /// Feeds bytes through `reassembler`, dispatching any completed
    /// transfer against this instance's subscription registry.
    pub fn rx_accept(
        &mut self,
        reassembler: &mut Reassembler<U>,
        timestamp: Microseconds,
        bytes: &[u8],
    ) -> Result<(usize, Option<(RxTransfer, SubscriptionInfo<U>)>), OutOfMemoryError>
    where
        U: Clone,
    {
        rx::rx_accept(&mut self.subscriptions, &mut self.counters, reassembler, timestamp, bytes)
    }

    /// Registers a subscription, replacing any prior one with the same
    /// (kind, port). Returns `true` if this created a new entry, `false` if
    /// it replaced an existing one.
    pub fn rx_subscribe(
        &mut self,
        kind: TransferKind,
        port: PortId,
        extent: usize,
        timeout: Microseconds,
        user_reference: U,
    ) -> Result<bool, InvalidArgumentError> {
        self.subscriptions.subscribe(kind, port, extent, timeout, user_reference)
    }

    /// Removes a subscription and every session it owns. Returns `true` if
    /// a subscription was present.
    pub fn rx_unsubscribe(&mut self, kind: TransferKind, port: PortId) -> bool {
        self.subscriptions.unsubscribe(kind, port)
    }
}

impl<U> Default for Instance<U> {
    fn default() -> Self {
        Self::new()
    }
}
