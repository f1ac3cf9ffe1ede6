// Rust7 - Native Rust S7 client (Snap7‑style) for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Result, S7Error};

pub const ISO_ID: u8 = 0x03; // RFC 1006 ID
pub const S7_ID: u8 = 0x32; // S7 Protocol ID
pub const ISO_HEADER_LEN: usize = 7; // TPKT + COTP

pub const SIZE_HEADER_READ: usize = 31; // Header Size when Reading
pub const SIZE_HEADER_WRITE: usize = 35; // Header Size when Writing
pub const SIZE_NCK_HEADER: usize = 19; // NC Header Size (both directions)

pub const S7_FUNC_READ_VAR: u8 = 0x04;
pub const S7_FUNC_WRITE_VAR: u8 = 0x05;

/// Read/Write area telegram.
///
/// Reads use the first 31 bytes, writes the whole 35 bytes plus payload.
pub const READ_WRITE_TELEGRAM: [u8; SIZE_HEADER_WRITE] = [
    ISO_ID, 0x00,     // RFC 1006 ID (constant)                   0
    0x00, 0x1f,       // Telegram Length (Data Size + 31 or 35)   2
    0x02, 0xf0, 0x80, // COTP (constant)                          4
    S7_ID,            // S7 Protocol ID                           7
    0x01,             // Job Type                                 8
    0x00, 0x00,       // Redundancy identification                9
    0x05, 0x00,       // PDU Reference                            11
    0x00, 0x0e,       // Parameters Length                        13
    0x00, 0x00,       // Data Length = Size(bytes) + 4            15
    S7_FUNC_READ_VAR, // Function: 4 Read Var, 5 Write Var        17
    0x01,             // Items count                              18
    0x12,             // Var spec.                                19
    0x0a,             // Length of remaining bytes                20
    0x10,             // Syntax ID                                21
    0x02,             // Transport Size (WordLen)                 22
    0x00, 0x00,       // Num Elements                             23
    0x00, 0x00,       // DB Number (if any, else 0)               25
    0x84,             // Area Type                                27
    0x00, 0x00, 0x00, // 24 bit Area Offset                       28
    // Write data header
    0x00,             // Reserved                                 31
    0x04,             // Transport size                           32
    0x00, 0x00,       // Data Length * 8 (if not bit/timer/ctr)   33
];

/// NC-unit Read/Write telegram header, address items follow at 19
pub const NCK_TELEGRAM: [u8; SIZE_NCK_HEADER] = [
    ISO_ID, 0x00,     // RFC 1006 ID (constant)                   0
    0x00, 0x1d,       // Telegram Length                          2
    0x02, 0xf0, 0x80, // COTP (constant)                          4
    S7_ID,            // S7 Protocol ID                           7
    0x01,             // Job Type                                 8
    0x00, 0x00,       // Redundancy identification                9
    0x05, 0x00,       // PDU Reference                            11
    0x00, 0x0c,       // Parameters Length                        13
    0x00, 0x00,       // Data Length                              15
    S7_FUNC_READ_VAR, // Function: 4 Read Var, 5 Write Var        17
    0x01,             // Items count                              18
];

/// One S7 telegram, request or response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtocolDataUnit {
    pub data: Vec<u8>,
}

impl ProtocolDataUnit {
    /// Creates a PDU owning a copy of `bytes`
    pub fn new(bytes: &[u8]) -> Self {
        ProtocolDataUnit {
            data: bytes.to_vec(),
        }
    }

    /// Creates a zeroed PDU of `len` bytes starting with (a prefix of) `template`
    pub fn with_len(template: &[u8], len: usize) -> Self {
        let mut data = vec![0u8; len];
        let n = template.len().min(len);
        data[..n].copy_from_slice(&template[..n]);
        ProtocolDataUnit { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn put_u8(&mut self, offset: usize, value: u8) -> Result<()> {
        let len = self.data.len();
        let slot = self.data.get_mut(offset).ok_or_else(|| out_of_bounds(offset, 1, len))?;
        *slot = value;
        Ok(())
    }

    /// Writes `value` big-endian at `offset`
    pub fn put_u16(&mut self, offset: usize, value: u16) -> Result<()> {
        let len = self.data.len();
        let slot = self
            .data
            .get_mut(offset..offset + 2)
            .ok_or_else(|| out_of_bounds(offset, 2, len))?;
        BigEndian::write_u16(slot, value);
        Ok(())
    }

    /// Inserts `payload` at `offset`, shifting whatever follows
    pub fn append_payload(&mut self, offset: usize, payload: &[u8]) -> Result<()> {
        if offset > self.data.len() {
            return Err(out_of_bounds(offset, payload.len(), self.data.len()));
        }
        self.data.splice(offset..offset, payload.iter().copied());
        Ok(())
    }
}

fn out_of_bounds(offset: usize, size: usize, len: usize) -> S7Error {
    S7Error::InvalidPdu(format!(
        "{} byte(s) at offset {} exceed telegram length {}",
        size, offset, len
    ))
}
