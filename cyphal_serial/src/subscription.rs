//!
//! The subscription registry: three ordered indices (one per transfer kind,
//! keyed by port) each holding subscriptions, which in turn each own an
//! ordered index of per-origin reassembly sessions keyed by node ID.
//!

use cyphal_core::{InvalidArgumentError, Microseconds, NodeId, PortId, TransferId, TransferKind, NUM_TRANSFER_KINDS};

use crate::tree::AvlTree;

/// Per-origin transfer-ID deduplication state. Created lazily on first
/// contact from a new node, reclaimed when the owning subscription is
/// removed or, individually, once the transfer-ID timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub last_transfer_id: TransferId,
    pub last_activity: Microseconds,
}

pub(crate) fn session_key(entry: &(NodeId, Session)) -> NodeId {
    entry.0
}

/// A registered interest in transfers of a given kind and port.
///
/// Subscription instances live inside an [`AvlTree`] node once inserted,
/// which gives them a stable address for as long as they stay registered
/// (see [`crate::tree`]).
pub struct Subscription<U> {
    pub port: PortId,
    pub extent: usize,
    pub timeout: Microseconds,
    pub user_reference: U,
    sessions: AvlTree<(NodeId, Session)>,
}

fn subscription_key<U>(sub: &Subscription<U>) -> PortId {
    sub.port
}

impl<U> Subscription<U> {
    pub fn sessions(&self) -> &AvlTree<(NodeId, Session)> {
        &self.sessions
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// A `Clone` snapshot of a subscription's public fields, returned alongside
/// a delivered transfer in place of a borrow into the registry — a
/// self-referential borrow that would otherwise have to outlive the mutable
/// access the dispatcher needs to update session state.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo<U> {
    pub kind: TransferKind,
    pub port: PortId,
    pub extent: usize,
    pub timeout: Microseconds,
    pub user_reference: U,
}

impl<U: Clone> SubscriptionInfo<U> {
    fn snapshot(kind: TransferKind, sub: &Subscription<U>) -> Self {
        SubscriptionInfo {
            kind,
            port: sub.port,
            extent: sub.extent,
            timeout: sub.timeout,
            user_reference: sub.user_reference.clone(),
        }
    }
}

/// The three independent per-kind subscription indices.
pub struct SubscriptionTree<U> {
    kinds: [AvlTree<Subscription<U>>; NUM_TRANSFER_KINDS],
}

impl<U> SubscriptionTree<U> {
    pub const fn new() -> Self {
        SubscriptionTree {
            kinds: [AvlTree::new(), AvlTree::new(), AvlTree::new()],
        }
    }

    fn index(&self, kind: TransferKind) -> &AvlTree<Subscription<U>> {
        &self.kinds[kind.index()]
    }

    fn index_mut(&mut self, kind: TransferKind) -> &mut AvlTree<Subscription<U>> {
        &mut self.kinds[kind.index()]
    }

    pub fn find(&self, kind: TransferKind, port: PortId) -> Option<&Subscription<U>> {
        self.index(kind).search(&port, subscription_key)
    }

    pub fn find_mut(&mut self, kind: TransferKind, port: PortId) -> Option<&mut Subscription<U>> {
        self.index_mut(kind).search_mut(&port, subscription_key)
    }

    pub fn snapshot(&self, kind: TransferKind, port: PortId) -> Option<SubscriptionInfo<U>>
    where
        U: Clone,
    {
        self.find(kind, port).map(|sub| SubscriptionInfo::snapshot(kind, sub))
    }

    /// Registers a subscription, replacing and fully tearing down any prior
    /// one with the same (kind, port). Returns `true` if this created a new
    /// entry, `false` if it replaced an existing one.
    pub fn subscribe(
        &mut self,
        kind: TransferKind,
        port: PortId,
        extent: usize,
        timeout: Microseconds,
        user_reference: U,
    ) -> Result<bool, InvalidArgumentError> {
        if !port.is_valid_for(kind) {
            return Err(InvalidArgumentError);
        }
        let replaced = self.index_mut(kind).remove(&port, subscription_key).is_some();
        let sub = Subscription {
            port,
            extent,
            timeout,
            user_reference,
            sessions: AvlTree::new(),
        };
        // The factory is infallible; the tree's key is unique because any
        // prior entry was just removed above.
        let _ = self
            .index_mut(kind)
            .find_or_insert(&port, subscription_key, || Ok::<_, core::convert::Infallible>(sub));
        Ok(!replaced)
    }

    /// Removes a subscription, if any, dropping every session it owns.
    /// Returns `true` if a subscription was present.
    pub fn unsubscribe(&mut self, kind: TransferKind, port: PortId) -> bool {
        match self.index_mut(kind).remove(&port, subscription_key) {
            Some(mut sub) => {
                sub.sessions.drain(|_| {});
                true
            }
            None => false,
        }
    }
}

impl<U> Default for SubscriptionTree<U> {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) type SessionTree = AvlTree<(NodeId, Session)>;

impl<U> Subscription<U> {
    pub(crate) fn sessions_mut(&mut self) -> &mut SessionTree {
        &mut self.sessions
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn subscribe_reports_created_then_replaced() {
        let mut tree: SubscriptionTree<u32> = SubscriptionTree::new();
        let port = PortId::from(1000);
        assert_eq!(
            tree.subscribe(TransferKind::Message, port, 64, Microseconds(2_000_000), 1).unwrap(),
            true
        );
        assert_eq!(
            tree.subscribe(TransferKind::Message, port, 8, Microseconds(2_000_000), 2).unwrap(),
            false
        );
        let sub = tree.find(TransferKind::Message, port).unwrap();
        assert_eq!(sub.extent, 8);
        assert_eq!(sub.user_reference, 2);
    }

    #[test]
    fn subscribe_rejects_out_of_range_port() {
        let mut tree: SubscriptionTree<u32> = SubscriptionTree::new();
        let oversized = PortId::from(PortId::SUBJECT_MAX + 1);
        assert!(tree
            .subscribe(TransferKind::Message, oversized, 64, Microseconds(2_000_000), 1)
            .is_err());
    }

    #[test]
    fn unsubscribe_drops_sessions_and_frees_slot() {
        let mut tree: SubscriptionTree<u32> = SubscriptionTree::new();
        let port = PortId::from(42);
        tree.subscribe(TransferKind::Request, port, 64, Microseconds(2_000_000), 1).unwrap();
        {
            let sub = tree.find_mut(TransferKind::Request, port).unwrap();
            sub.sessions_mut()
                .find_or_insert(&NodeId::new(3).unwrap(), session_key, || {
                    Ok::<_, core::convert::Infallible>((
                        NodeId::new(3).unwrap(),
                        Session {
                            last_transfer_id: TransferId::from(1),
                            last_activity: Microseconds(0),
                        },
                    ))
                })
                .unwrap();
        }
        assert_eq!(tree.find(TransferKind::Request, port).unwrap().session_count(), 1);
        assert!(tree.unsubscribe(TransferKind::Request, port));
        assert!(tree.find(TransferKind::Request, port).is_none());
        assert!(!tree.unsubscribe(TransferKind::Request, port));
    }
}
