#![no_std]
//!
//! The fixed-size Cyphal/Serial frame header: pack, parse, and the header
//! integrity field.
//!

use core::convert::TryFrom;

use crc_any::CRCu16;
use zerocopy::byteorder::{LittleEndian, U16, U64};
use zerocopy::{AsBytes, FromBytes, Unaligned};

use cyphal_core::{InvalidArgumentError, NodeId, PortId, Priority, TransferId, TransferKind, WireNodeId};

/// Size in bytes of the packed wire header, including the integrity field.
pub const HEADER_SIZE: usize = 21;

const SUPPORTED_VERSION: u8 = 1;
const PORT_ID_RESERVED_MASK: u16 = 0b1110_0000_0000_0000;
const KIND_BYTE_RESERVED_MASK: u8 = 0b1111_1000;
const KIND_BYTE_ANONYMOUS_BIT: u8 = 0b0000_0100;
const KIND_BYTE_KIND_MASK: u8 = 0b0000_0011;

#[derive(Clone, Copy, Debug, Eq, PartialEq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
struct RawHeader {
    version: u8,
    priority: u8,
    source_node_id: U16<LittleEndian>,
    destination_node_id: U16<LittleEndian>,
    port_id: U16<LittleEndian>,
    kind_byte: u8,
    transfer_id: U64<LittleEndian>,
    reserved: U16<LittleEndian>,
    header_crc: U16<LittleEndian>,
}

const _: () = assert!(core::mem::size_of::<RawHeader>() == HEADER_SIZE);

/// A decoded transfer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub priority: Priority,
    pub kind: TransferKind,
    pub port: PortId,
    pub source: WireNodeId,
    pub destination: WireNodeId,
    pub transfer_id: TransferId,
}

/// Why a received header could not be parsed. All variants are treated as
/// "malformed frame, discard silently" by the reassembler, per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    UnsupportedVersion,
    ReservedBitsSet,
    InvalidKind,
    AnonymityMismatch,
    HeaderCrc,
}

impl HeaderError {
    /// All header parse failures are malformed-frame conditions, which the
    /// C reference reports as `SERARD_ERROR_INVALID_ARGUMENT`.
    pub const fn as_code(&self) -> i8 {
        InvalidArgumentError::CODE
    }
}

fn header_crc(bytes_before_crc: &[u8]) -> u16 {
    let mut crc = CRCu16::crc16ccitt_false();
    crc.digest(bytes_before_crc);
    crc.get_crc()
}

/// Packs a header into its wire representation. Never fails: the caller is
/// responsible for supplying metadata that was already validated by the
/// emitter (priority `<= 7`, port in range for `kind`, node IDs consistent
/// with `kind`).
pub fn write(header: &Header) -> [u8; HEADER_SIZE] {
    let anonymous = header.source.is_unset();
    let kind_byte = (header.kind as u8 & KIND_BYTE_KIND_MASK)
        | if anonymous { KIND_BYTE_ANONYMOUS_BIT } else { 0 };

    let mut raw = RawHeader {
        version: SUPPORTED_VERSION,
        priority: header.priority.value(),
        source_node_id: U16::new(header.source.wire_value()),
        destination_node_id: U16::new(header.destination.wire_value()),
        port_id: U16::new(header.port.value()),
        kind_byte,
        transfer_id: U64::new(header.transfer_id.value()),
        reserved: U16::new(0),
        header_crc: U16::new(0),
    };

    let crc = header_crc(&raw.as_bytes()[..HEADER_SIZE - 2]);
    raw.header_crc = U16::new(crc);

    let mut out = [0u8; HEADER_SIZE];
    out.copy_from_slice(raw.as_bytes());
    out
}

/// Parses a wire header, validating version, reserved bits, anonymity
/// consistency and the header integrity field.
pub fn read(bytes: &[u8; HEADER_SIZE]) -> Result<Header, HeaderError> {
    let raw = RawHeader::read_from(bytes.as_slice()).expect("size checked at compile time");

    if raw.version != SUPPORTED_VERSION {
        return Err(HeaderError::UnsupportedVersion);
    }
    if raw.port_id.get() & PORT_ID_RESERVED_MASK != 0 {
        return Err(HeaderError::ReservedBitsSet);
    }
    if raw.kind_byte & KIND_BYTE_RESERVED_MASK != 0 {
        return Err(HeaderError::ReservedBitsSet);
    }
    if raw.reserved.get() != 0 {
        return Err(HeaderError::ReservedBitsSet);
    }

    let expected_crc = header_crc(&bytes[..HEADER_SIZE - 2]);
    if raw.header_crc.get() != expected_crc {
        return Err(HeaderError::HeaderCrc);
    }

    let kind = match raw.kind_byte & KIND_BYTE_KIND_MASK {
        0 => TransferKind::Message,
        1 => TransferKind::Response,
        2 => TransferKind::Request,
        _ => return Err(HeaderError::InvalidKind),
    };

    let priority = Priority::try_from(raw.priority).map_err(|_: InvalidArgumentError| HeaderError::ReservedBitsSet)?;

    let source = WireNodeId::from_wire_value(raw.source_node_id.get());
    let anonymous_bit = raw.kind_byte & KIND_BYTE_ANONYMOUS_BIT != 0;
    if anonymous_bit != source.is_unset() {
        return Err(HeaderError::AnonymityMismatch);
    }

    let destination = WireNodeId::from_wire_value(raw.destination_node_id.get());

    Ok(Header {
        priority,
        kind,
        port: PortId::from(raw.port_id.get()),
        source,
        destination,
        transfer_id: TransferId::from(raw.transfer_id.get()),
    })
}
