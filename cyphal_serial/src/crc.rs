//!
//! The 32-bit transfer CRC: CRC-32C (Castagnoli), reflected, little-endian
//! on the wire.
//!

use crc_any::CRCu32;

/// Streaming CRC-32C accumulator over a transfer's payload bytes.
///
/// `init` -> `update(bytes)*` -> `finalize`, as specified. Used by both the
/// emitter (over outgoing payload bytes) and the reassembler (over decoded
/// incoming payload bytes, including the trailing four CRC bytes — see
/// [`finalize_matches_residue`]).
pub struct TransferCrc(CRCu32);

impl TransferCrc {
    pub fn new() -> Self {
        TransferCrc(CRCu32::crc32c())
    }

    pub fn update(&mut self, byte: u8) {
        self.0.digest(&[byte]);
    }

    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.0.digest(bytes);
    }

    pub fn finalize(&self) -> u32 {
        self.0.get_crc()
    }
}

impl Default for TransferCrc {
    fn default() -> Self {
        Self::new()
    }
}

/// The fixed residue produced by a correct CRC-32C computation that includes
/// its own check value in the input stream (payload bytes followed by the
/// four wire CRC bytes, in the order they arrive). This is the convention
/// the reassembler uses instead of re-deriving and byte-comparing the
/// standalone CRC value.
pub const TRANSFER_CRC_RESIDUE: u32 = 0x4867_4BC7;

/// True if `crc_including_trailer`, the result of digesting a transfer's
/// payload bytes followed immediately by its own four wire CRC bytes, is the
/// expected CRC-32C residue.
pub fn finalize_matches_residue(crc_including_trailer: u32) -> bool {
    crc_including_trailer == TRANSFER_CRC_RESIDUE
}
