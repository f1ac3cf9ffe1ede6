// Rust7 - Native Rust S7 client (Snap7‑style) for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! NC-unit (NCK) multi-item codec.
//!
//! Unlike area access, one NC telegram carries a list of independently
//! addressed and independently sized items and is never chunked: keeping
//! the list within one PDU is up to the caller.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::trace;

use crate::error::{Result, S7Error};
use crate::pdu::{ProtocolDataUnit, NCK_TELEGRAM, S7_FUNC_WRITE_VAR, SIZE_NCK_HEADER};

const NCK_ADDR_ITEM_LEN: usize = 10;
const NCK_DATA_HEADER_LEN: usize = 4; // ReturnCode + TransportSize + Length
const NCK_RES_DATA: usize = 21; // First data item of a reply
const NCK_READ_RES_MIN: usize = 25;

const VAR_SPEC: u8 = 0x12; // Variable specification
const VAR_SPEC_LEN: u8 = 0x08; // Length of the following address specification
const SYNTAX_ID_NCK: u8 = 0x82;
const LINE_COUNT: u8 = 0x01;

const DATA_RETURN_CODE: u8 = 0x00; // Reserved in requests
const DATA_TRANSPORT_SIZE: u8 = 0x09; // Octet string

/// Address of one NC-unit data point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct S7NckAddrItem {
    /// 0..=7
    pub area: u8,
    /// 0..=31
    pub unit: u8,
    pub column: u16,
    pub line: u16,
    pub module: u8,
}

/// One self-describing NC data item.
///
/// The wire `Length` is always `data.len()`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct S7NckDataItem {
    pub return_code: u8,
    pub transport_size: u8,
    pub data: Vec<u8>,
}

impl S7NckDataItem {
    pub fn new(data: Vec<u8>) -> Self {
        S7NckDataItem {
            return_code: DATA_RETURN_CODE,
            transport_size: DATA_TRANSPORT_SIZE,
            data,
        }
    }

    /// NC 64 bit floats travel as little-endian blocks
    pub fn from_f64(value: f64) -> Self {
        let mut data = vec![0u8; 8];
        LittleEndian::write_f64(&mut data, value);
        Self::new(data)
    }

    pub fn as_f64(&self) -> Option<f64> {
        if self.data.len() == 8 {
            Some(LittleEndian::read_f64(&self.data))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Packs Area (bits 7..5) and Unit (bits 4..0) into one byte
pub fn combine_to_byte(area: u8, unit: u8) -> Result<u8> {
    if area > 7 || unit > 31 {
        return Err(S7Error::InvalidNckItem { area, unit });
    }
    Ok((area << 5) | unit)
}

/// Inverse of [`combine_to_byte`]: `(area, unit)`
pub fn split_area_unit(value: u8) -> (u8, u8) {
    (value >> 5, value & 0x1F)
}

/// Bytes taken by the data section of a write request
pub fn nck_data_len(items: &[S7NckDataItem]) -> usize {
    items.iter().map(|item| NCK_DATA_HEADER_LEN + item.len()).sum()
}

fn to_u16(value: usize, what: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        S7Error::InvalidArgument(format!("{} of {} bytes does not fit one telegram", what, value))
    })
}

fn encode_addr_items(request: &mut ProtocolDataUnit, items: &[S7NckAddrItem]) -> Result<()> {
    for (i, item) in items.iter().enumerate() {
        let offset = SIZE_NCK_HEADER + i * NCK_ADDR_ITEM_LEN;
        request.put_u8(offset, VAR_SPEC)?;
        request.put_u8(offset + 1, VAR_SPEC_LEN)?;
        request.put_u8(offset + 2, SYNTAX_ID_NCK)?;
        request.put_u8(offset + 3, combine_to_byte(item.area, item.unit)?)?;
        request.put_u16(offset + 4, item.column)?;
        request.put_u16(offset + 6, item.line)?;
        request.put_u8(offset + 8, item.module)?;
        request.put_u8(offset + 9, LINE_COUNT)?;
    }
    Ok(())
}

/// Encodes data items as `0x00 0x09 Length(BE) Data`
pub fn encode_nck_data_items(items: &[S7NckDataItem]) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(nck_data_len(items));
    for item in items {
        let mut header = [DATA_RETURN_CODE, DATA_TRANSPORT_SIZE, 0, 0];
        BigEndian::write_u16(&mut header[2..], to_u16(item.len(), "NC data item")?);
        buffer.extend_from_slice(&header);
        buffer.extend_from_slice(&item.data);
    }
    Ok(buffer)
}

/// Builds an NC read telegram for `items`
pub fn build_nck_read_request(items: &[S7NckAddrItem]) -> Result<ProtocolDataUnit> {
    if items.is_empty() {
        return Err(S7Error::InvalidArgument("NC read needs at least one address item".into()));
    }
    let addr_count = u8::try_from(items.len())
        .map_err(|_| S7Error::InvalidArgument(format!("{} NC items in one telegram", items.len())))?;
    let size = SIZE_NCK_HEADER + items.len() * NCK_ADDR_ITEM_LEN;

    let mut request = ProtocolDataUnit::with_len(&NCK_TELEGRAM, size);
    request.put_u16(2, to_u16(size, "NC read telegram")?)?;
    request.put_u16(13, (items.len() * NCK_ADDR_ITEM_LEN + 2) as u16)?;
    request.put_u8(18, addr_count)?;
    encode_addr_items(&mut request, items)?;

    trace!(items = items.len(), len = request.len(), "NC read telegram built");
    Ok(request)
}

/// Builds an NC write telegram, one data item per address item
pub fn build_nck_write_request(addr_items: &[S7NckAddrItem], data_items: &[S7NckDataItem]) -> Result<ProtocolDataUnit> {
    if addr_items.is_empty() || addr_items.len() != data_items.len() {
        return Err(S7Error::InvalidArgument(format!(
            "NC write needs as many data items as address items (and at least one), got {} and {}",
            addr_items.len(),
            data_items.len()
        )));
    }
    let addr_count = u8::try_from(addr_items.len()).map_err(|_| {
        S7Error::InvalidArgument(format!("{} NC items in one telegram", addr_items.len()))
    })?;
    let data_len = nck_data_len(data_items);
    let addr_end = SIZE_NCK_HEADER + addr_items.len() * NCK_ADDR_ITEM_LEN;
    let size = addr_end + data_len;

    let mut request = ProtocolDataUnit::with_len(&NCK_TELEGRAM, addr_end);
    request.put_u16(2, to_u16(size, "NC write telegram")?)?;
    request.put_u16(13, (addr_items.len() * NCK_ADDR_ITEM_LEN + 2) as u16)?;
    request.put_u16(15, to_u16(data_len, "NC write data")?)?;
    request.put_u8(17, S7_FUNC_WRITE_VAR)?;
    request.put_u8(18, addr_count)?;
    encode_addr_items(&mut request, addr_items)?;
    request.append_payload(addr_end, &encode_nck_data_items(data_items)?)?;

    trace!(items = addr_items.len(), len = request.len(), "NC write telegram built");
    Ok(request)
}

/// ### Parses a run of `ReturnCode TransportSize Length(BE) Data` items
///
/// Items are read until `data` is exhausted. A truncated item is an error,
/// never a partial result.
pub fn parse_nck_resp_items(data: &[u8]) -> Result<Vec<S7NckDataItem>> {
    let mut items = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let header = data.get(offset..offset + NCK_DATA_HEADER_LEN).ok_or_else(|| {
            S7Error::NckParse(format!(
                "item {} header truncated at offset {} ({} bytes left)",
                items.len(),
                offset,
                data.len() - offset
            ))
        })?;
        let length = BigEndian::read_u16(&header[2..]) as usize;
        let (return_code, transport_size) = (header[0], header[1]);
        offset += NCK_DATA_HEADER_LEN;

        let payload = data.get(offset..offset + length).ok_or_else(|| {
            S7Error::NckParse(format!(
                "item {} declares {} bytes, only {} left",
                items.len(),
                length,
                data.len() - offset
            ))
        })?;
        offset += length;

        items.push(S7NckDataItem {
            return_code,
            transport_size,
            data: payload.to_vec(),
        });
    }
    Ok(items)
}

/// Parses the reply of an NC read
pub fn parse_nck_read_response(response: &ProtocolDataUnit) -> Result<Vec<S7NckDataItem>> {
    let data = response.as_bytes();
    if data.len() < NCK_READ_RES_MIN {
        return Err(S7Error::InvalidDataSize(format!(
            "NC read reply of {} bytes, expected at least {}",
            data.len(),
            NCK_READ_RES_MIN
        )));
    }
    parse_nck_resp_items(&data[NCK_RES_DATA..])
}

/// Returns the per-item return codes of an NC write reply
pub fn parse_nck_write_response(response: &ProtocolDataUnit, addr_count: usize) -> Result<Vec<u8>> {
    let data = response.as_bytes();
    if data.len() != NCK_RES_DATA + addr_count {
        return Err(S7Error::InvalidPdu(format!(
            "NC write reply of {} bytes for {} items, expected {}",
            data.len(),
            addr_count,
            NCK_RES_DATA + addr_count
        )));
    }
    Ok(data[NCK_RES_DATA..].to_vec())
}
