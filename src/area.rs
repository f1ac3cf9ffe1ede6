// Rust7 - Native Rust S7 client (Snap7‑style) for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! Area access: codes, transfer planning and area telegrams.
//!
//! A transfer is first normalized into a [`TransferPlan`] (word length,
//! element width, element count and the biggest chunk the negotiated PDU
//! can carry), then split into [`Chunk`]s, each one travelling in its own
//! telegram.

use tracing::trace;

use crate::error::{Result, S7Error, RES_SUCCESS};
use crate::pdu::{
    ProtocolDataUnit, READ_WRITE_TELEGRAM, S7_FUNC_WRITE_VAR, SIZE_HEADER_READ, SIZE_HEADER_WRITE,
};

// Areas
pub const S7_AREA_PE: u8 = 0x81; // Process Inputs
pub const S7_AREA_PA: u8 = 0x82; // Process Outputs
pub const S7_AREA_MK: u8 = 0x83; // Merkers
pub const S7_AREA_DB: u8 = 0x84; // Data Block
pub const S7_AREA_CT: u8 = 0x1C; // Counters
pub const S7_AREA_TM: u8 = 0x1D; // Timers

// Wordlen
pub const S7_WL_BIT: u8 = 0x01; // Bit (inside a word)
pub const S7_WL_BYTE: u8 = 0x02; // Byte (8 bit)
pub const S7_WL_CHAR: u8 = 0x03;
pub const S7_WL_WORD: u8 = 0x04; // Word (16 bit)
pub const S7_WL_INT: u8 = 0x05;
pub const S7_WL_DWORD: u8 = 0x06; // Double Word (32 bit)
pub const S7_WL_DINT: u8 = 0x07;
pub const S7_WL_REAL: u8 = 0x08; // Real (32 bit float)
pub const S7_WL_COUNTER: u8 = 0x1C; // Counter (16 bit)
pub const S7_WL_TIMER: u8 = 0x1D; // Timer (16 bit)

// Result transport size
pub const TS_RES_BIT: u8 = 3;
pub const TS_RES_BYTE: u8 = 4;
pub const TS_RES_INT: u8 = 5; // Not used by area writes, completes the transport size table
pub const TS_RES_REAL: u8 = 7; // Not used by area writes, completes the transport size table
pub const TS_RES_OCTET: u8 = 9;

pub const READ_OVERHEAD: usize = 18; // Reply telegram header
pub const WRITE_OVERHEAD: usize = 35; // Request telegram header

const RES_STATUS_OFFSET: usize = 21; // Item return code
const READ_RES_DATA: usize = 25; // First payload byte of a read reply
const WRITE_RES_LEN: usize = 22; // Whole write reply
const MAX_ADDRESS: usize = 0xFF_FFFF; // 24 bit
const MAX_WIRE: usize = u16::MAX as usize;
// A byte chunk travels with its length in bits (write request and read reply)
const MAX_BYTE_CHUNK: usize = MAX_WIRE >> 3;
// Telegram length = write header + payload
const MAX_ELEMENT_CHUNK_BYTES: usize = MAX_WIRE - SIZE_HEADER_WRITE;

/// Byte width of one element of `word_len`, 0 if the code is unknown
pub fn data_size_byte(word_len: u8) -> usize {
    match word_len {
        S7_WL_BIT | S7_WL_BYTE | S7_WL_CHAR => 1,
        S7_WL_WORD | S7_WL_INT | S7_WL_COUNTER | S7_WL_TIMER => 2,
        S7_WL_DWORD | S7_WL_DINT | S7_WL_REAL => 4,
        _ => 0,
    }
}

/// A normalized area transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub area: u8,
    /// Word length written on the wire (bit, byte, counter or timer)
    pub word_len: u8,
    /// Bytes per element after normalization
    pub width: usize,
    /// Elements to transfer
    pub amount: usize,
    /// Biggest chunk (in elements) a single telegram can carry
    pub max_elements: usize,
}

/// One telegram worth of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    /// Element address of the first element
    pub start: usize,
    pub elements: usize,
    /// Position inside the caller buffer
    pub offset: usize,
    /// Bytes carried
    pub size: usize,
}

impl TransferPlan {
    /// ### Normalizes a transfer request
    ///
    /// - Counter and timer areas always use their own word length.
    /// - Bit transfers carry exactly one element.
    /// - Everything else is flattened to bytes so that all the widths share the same path.
    ///
    /// `overhead` is the header size of the telegram bounding the chunk
    /// (`READ_OVERHEAD` or `WRITE_OVERHEAD`). Whatever the PDU length, a chunk
    /// never exceeds what the 16 bit length fields can carry (8191 bytes when
    /// the length travels in bits).
    pub fn new(area: u8, word_len: u8, amount: usize, pdu_length: usize, overhead: usize) -> Result<Self> {
        let mut word_len = match area {
            S7_AREA_CT => S7_WL_COUNTER,
            S7_AREA_TM => S7_WL_TIMER,
            _ => word_len,
        };

        let mut width = data_size_byte(word_len);
        if width == 0 {
            return Err(S7Error::InvalidDataSize(format!(
                "unknown word length {:#04x}",
                word_len
            )));
        }

        let mut amount = amount;
        if word_len == S7_WL_BIT {
            amount = 1; // Only 1 bit can be transferred at time
        } else if word_len != S7_WL_COUNTER && word_len != S7_WL_TIMER {
            amount = amount.checked_mul(width).ok_or_else(|| {
                S7Error::InvalidArgument(format!("{} elements of {} bytes overflow", amount, width))
            })?;
            width = 1;
            word_len = S7_WL_BYTE;
        }

        let wire_bytes = if word_len == S7_WL_BYTE {
            MAX_BYTE_CHUNK
        } else {
            MAX_ELEMENT_CHUNK_BYTES
        };
        let max_elements = (pdu_length.saturating_sub(overhead) / width).min(wire_bytes / width);
        if max_elements < 1 {
            return Err(S7Error::PduLengthTooSmall {
                pdu_length,
                overhead,
                width,
            });
        }

        Ok(TransferPlan {
            area,
            word_len,
            width,
            amount,
            max_elements,
        })
    }

    /// Bit, counter and timer addresses count elements, not bits
    pub fn element_addressed(&self) -> bool {
        matches!(self.word_len, S7_WL_BIT | S7_WL_COUNTER | S7_WL_TIMER)
    }

    /// Bytes the caller buffer must hold
    pub fn byte_len(&self) -> usize {
        self.amount * self.width
    }

    pub fn chunk_count(&self) -> usize {
        self.amount.div_ceil(self.max_elements)
    }

    pub fn chunks(&self, start: usize) -> Chunks {
        Chunks {
            plan: *self,
            start,
            done: 0,
            index: 0,
        }
    }

    /// Write transport size tag; must match the wire layout
    pub fn transport_size(&self) -> u8 {
        match self.word_len {
            S7_WL_BIT => TS_RES_BIT,
            S7_WL_COUNTER | S7_WL_TIMER => TS_RES_OCTET,
            _ => TS_RES_BYTE,
        }
    }

    fn address(&self, chunk: &Chunk) -> Result<usize> {
        let address = if self.element_addressed() {
            Some(chunk.start)
        } else {
            chunk.start.checked_mul(8)
        };
        match address {
            Some(a) if a <= MAX_ADDRESS => Ok(a),
            _ => Err(S7Error::InvalidArgument(format!(
                "start {} does not fit the 24 bit address field",
                chunk.start
            ))),
        }
    }
}

/// Iterator over the chunks of a [`TransferPlan`].
#[derive(Debug, Clone)]
pub struct Chunks {
    plan: TransferPlan,
    start: usize,
    done: usize,
    index: usize,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let remaining = self.plan.amount - self.done;
        if remaining == 0 {
            return None;
        }
        let elements = remaining.min(self.plan.max_elements);
        let chunk = Chunk {
            index: self.index,
            start: self.start,
            elements,
            offset: self.done * self.plan.width,
            size: elements * self.plan.width,
        };
        self.done += elements;
        self.start += elements;
        self.index += 1;
        Some(chunk)
    }
}

fn wire_u16(value: usize, what: &str) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| S7Error::InvalidArgument(format!("{} {} does not fit a 16 bit field", what, value)))
}

// Fields shared by read and write telegrams (offsets 22..31)
fn patch_item(request: &mut ProtocolDataUnit, plan: &TransferPlan, db_number: u16, chunk: &Chunk) -> Result<()> {
    request.put_u8(27, plan.area)?;
    if plan.area == S7_AREA_DB {
        request.put_u16(25, db_number)?;
    }
    let address = plan.address(chunk)?;
    if plan.element_addressed() {
        request.put_u8(22, plan.word_len)?;
    }
    request.put_u16(23, wire_u16(chunk.elements, "element count")?)?;
    // Address into the PLC (only 3 bytes)
    request.put_u8(28, ((address >> 16) & 0xFF) as u8)?;
    request.put_u8(29, ((address >> 8) & 0xFF) as u8)?;
    request.put_u8(30, (address & 0xFF) as u8)?;
    Ok(())
}

/// Builds the read telegram of one chunk
pub fn build_read_request(plan: &TransferPlan, db_number: u16, chunk: &Chunk) -> Result<ProtocolDataUnit> {
    let mut request = ProtocolDataUnit::with_len(&READ_WRITE_TELEGRAM, SIZE_HEADER_READ);
    patch_item(&mut request, plan, db_number, chunk)?;
    trace!(chunk = chunk.index, len = request.len(), "read telegram built");
    Ok(request)
}

/// Builds the write telegram of one chunk, `payload` is the chunk slice of the caller buffer
pub fn build_write_request(
    plan: &TransferPlan,
    db_number: u16,
    chunk: &Chunk,
    payload: &[u8],
) -> Result<ProtocolDataUnit> {
    if payload.len() != chunk.size {
        return Err(S7Error::InvalidDataSize(format!(
            "payload of {} bytes for a chunk of {} bytes",
            payload.len(),
            chunk.size
        )));
    }
    let data_size = chunk.size;
    let mut request = ProtocolDataUnit::new(&READ_WRITE_TELEGRAM);

    // Whole telegram Size
    request.put_u16(2, wire_u16(SIZE_HEADER_WRITE + data_size, "telegram length")?)?;
    // Data length
    request.put_u16(15, wire_u16(data_size + 4, "data length")?)?;
    request.put_u8(17, S7_FUNC_WRITE_VAR)?;
    patch_item(&mut request, plan, db_number, chunk)?;

    let length = if plan.element_addressed() {
        data_size
    } else {
        data_size << 3
    };
    request.put_u8(32, plan.transport_size())?;
    request.put_u16(33, wire_u16(length, "payload length")?)?;
    request.append_payload(SIZE_HEADER_WRITE, payload)?;

    trace!(chunk = chunk.index, len = request.len(), "write telegram built");
    Ok(request)
}

/// ### Validates a read reply and returns the chunk payload
///
/// The status byte is checked before the payload length, so a CPU error
/// reply (which carries no data) is reported as such.
pub fn read_response_payload<'a>(response: &'a ProtocolDataUnit, chunk: &Chunk) -> Result<&'a [u8]> {
    let data = response.as_bytes();
    if data.len() < READ_RES_DATA {
        return Err(S7Error::InvalidDataSize(format!(
            "reply of {} bytes to chunk {} (start {}, {} bytes), header alone is {}",
            data.len(),
            chunk.index,
            chunk.start,
            chunk.size,
            READ_RES_DATA
        )));
    }
    if data[RES_STATUS_OFFSET] != RES_SUCCESS {
        return Err(S7Error::cpu(data[RES_STATUS_OFFSET], chunk.index, chunk.start, chunk.size));
    }
    data.get(READ_RES_DATA..READ_RES_DATA + chunk.size).ok_or_else(|| {
        S7Error::InvalidDataSize(format!(
            "reply of {} bytes to chunk {} (start {}) carries less than the {} bytes requested",
            data.len(),
            chunk.index,
            chunk.start,
            chunk.size
        ))
    })
}

/// Validates a write reply
pub fn check_write_response(response: &ProtocolDataUnit, chunk: &Chunk) -> Result<()> {
    let data = response.as_bytes();
    if data.len() != WRITE_RES_LEN {
        return Err(S7Error::InvalidPdu(format!(
            "write reply of {} bytes to chunk {} (start {}, {} bytes), expected {}",
            data.len(),
            chunk.index,
            chunk.start,
            chunk.size,
            WRITE_RES_LEN
        )));
    }
    if data[RES_STATUS_OFFSET] != RES_SUCCESS {
        return Err(S7Error::cpu(data[RES_STATUS_OFFSET], chunk.index, chunk.start, chunk.size));
    }
    Ok(())
}
