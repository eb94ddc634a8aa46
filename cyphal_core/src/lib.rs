#![no_std]
//!
//! Identifiers and error types shared by the Cyphal/Serial header and
//! transport crates.
//!

use core::convert::TryFrom;
use core::fmt;

/// A node identifier on the link.
///
/// Valid node IDs are `0..=65534`. The value `65535` is the reserved sentinel
/// meaning "anonymous source" or "broadcast destination" and is never a valid
/// `NodeId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u16);

impl NodeId {
    /// The largest valid node ID.
    pub const MAX: u16 = 0xFFFE;
    /// The sentinel value carried on the wire for an unset/anonymous node.
    pub const UNSET_VALUE: u16 = 0xFFFF;

    /// Creates a node ID, rejecting the unset sentinel and out-of-range values.
    pub fn new(value: u16) -> Result<Self, InvalidArgumentError> {
        if value <= Self::MAX {
            Ok(NodeId(value))
        } else {
            Err(InvalidArgumentError)
        }
    }
}

impl TryFrom<u16> for NodeId {
    type Error = InvalidArgumentError;
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        NodeId::new(value)
    }
}

impl From<NodeId> for u16 {
    fn from(id: NodeId) -> u16 {
        id.0
    }
}

/// A node ID on the wire, which may be the unset/anonymous sentinel.
///
/// This is the type actually carried in transfer metadata: outgoing message
/// transfers must use `WireNodeId::UNSET`, outgoing service transfers must
/// use a concrete node, and incoming transfers report whichever the sender
/// put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireNodeId {
    Unset,
    Node(NodeId),
}

impl WireNodeId {
    pub fn is_unset(&self) -> bool {
        matches!(self, WireNodeId::Unset)
    }

    pub fn from_wire_value(value: u16) -> Self {
        match NodeId::new(value) {
            Ok(id) => WireNodeId::Node(id),
            Err(_) => WireNodeId::Unset,
        }
    }

    pub fn wire_value(&self) -> u16 {
        match self {
            WireNodeId::Unset => NodeId::UNSET_VALUE,
            WireNodeId::Node(id) => id.0,
        }
    }
}

impl From<NodeId> for WireNodeId {
    fn from(id: NodeId) -> Self {
        WireNodeId::Node(id)
    }
}

/// A subject (message) or service (request/response) port identifier.
///
/// The valid range depends on the transfer kind it is used with: `0..=8191`
/// for messages, `0..=511` for requests and responses. This type stores the
/// raw value; range validation happens where the kind is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(u16);

impl PortId {
    pub const SUBJECT_MAX: u16 = 8191;
    pub const SERVICE_MAX: u16 = 511;

    pub fn new(value: u16) -> Self {
        PortId(value)
    }

    pub fn value(&self) -> u16 {
        self.0
    }

    pub fn is_valid_for(&self, kind: TransferKind) -> bool {
        match kind {
            TransferKind::Message => self.0 <= Self::SUBJECT_MAX,
            TransferKind::Request | TransferKind::Response => self.0 <= Self::SERVICE_MAX,
        }
    }
}

impl From<u16> for PortId {
    fn from(value: u16) -> Self {
        PortId(value)
    }
}

impl From<PortId> for u16 {
    fn from(port: PortId) -> u16 {
        port.0
    }
}

/// Transfer priority: 0 (`Exceptional`, highest) through 7 (`Optional`, lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Exceptional = 0,
    Immediate = 1,
    Fast = 2,
    High = 3,
    Nominal = 4,
    Low = 5,
    Slow = 6,
    Optional = 7,
}

impl Priority {
    pub const MAX: u8 = 7;

    pub fn value(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = InvalidArgumentError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Priority::Exceptional,
            1 => Priority::Immediate,
            2 => Priority::Fast,
            3 => Priority::High,
            4 => Priority::Nominal,
            5 => Priority::Low,
            6 => Priority::Slow,
            7 => Priority::Optional,
            _ => return Err(InvalidArgumentError),
        })
    }
}

/// The three transfer kinds defined by the Cyphal specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Message = 0,
    Response = 1,
    Request = 2,
}

/// The number of distinct transfer kinds; used to size the per-kind
/// subscription index.
pub const NUM_TRANSFER_KINDS: usize = 3;

impl TransferKind {
    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// A 64-bit monotonically increasing transfer counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TransferId(u64);

impl TransferId {
    pub const fn const_default() -> Self {
        TransferId(0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn increment(self) -> Self {
        TransferId(self.0.wrapping_add(1))
    }
}

impl From<u64> for TransferId {
    fn from(value: u64) -> Self {
        TransferId(value)
    }
}

impl From<TransferId> for u64 {
    fn from(id: TransferId) -> u64 {
        id.0
    }
}

/// A monotonic timestamp in microseconds, as supplied by the caller's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Microseconds(pub u64);

impl Microseconds {
    /// The time elapsed since `earlier`, or zero if `earlier` is later than `self`.
    ///
    /// Saturating, not wrapping: a caller-supplied clock is assumed monotonic,
    /// so `earlier` later than `self` would indicate a clock regression, not
    /// a legitimate negative duration.
    pub fn saturating_since(&self, earlier: Microseconds) -> Microseconds {
        Microseconds(self.0.saturating_sub(earlier.0))
    }
}

/// Returned when allocating memory for a new session or payload buffer fails.
///
/// Carries the numeric error code from the Cyphal/Serial C reference
/// (`SERARD_ERROR_OUT_OF_MEMORY`) for callers that bridge to that convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemoryError;

impl OutOfMemoryError {
    pub const CODE: i8 = 3;

    /// The numeric code used by the C reference implementation
    /// (`SERARD_ERROR_OUT_OF_MEMORY`), for callers bridging to that
    /// convention.
    pub const fn as_code(&self) -> i8 {
        Self::CODE
    }
}

impl fmt::Display for OutOfMemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("out of memory")
    }
}

/// Returned when a caller-supplied argument is out of its valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidArgumentError;

impl InvalidArgumentError {
    pub const CODE: i8 = 2;

    /// The numeric code used by the C reference implementation
    /// (`SERARD_ERROR_INVALID_ARGUMENT`), for callers bridging to that
    /// convention.
    pub const fn as_code(&self) -> i8 {
        Self::CODE
    }
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid argument")
    }
}
