// Rust7 - Native Rust S7 client (Snap7‑style) for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use std::time::Instant;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use tracing::debug;

use crate::address::{parse_address, AddressKind, S7Address, S7Value, BIT_MASK};
use crate::area::{
    build_read_request, build_write_request, check_write_response, read_response_payload, TransferPlan,
    READ_OVERHEAD, S7_AREA_CT, S7_AREA_DB, S7_AREA_MK, S7_AREA_PA, S7_AREA_PE, S7_AREA_TM, S7_WL_BIT,
    S7_WL_BYTE, S7_WL_COUNTER, S7_WL_TIMER, WRITE_OVERHEAD,
};
use crate::error::{response_error, Result, S7Error};
use crate::nck::{
    build_nck_read_request, build_nck_write_request, parse_nck_read_response, parse_nck_write_response,
    S7NckAddrItem, S7NckDataItem,
};
use crate::pdu::ProtocolDataUnit;
use crate::transport::ClientHandler;

/// S7 client over any [`ClientHandler`] backend.
///
/// Every operation is a blocking request/response exchange and needs
/// `&mut self`: share a client across threads behind a `Mutex`.
pub struct S7Client<H: ClientHandler> {
    handler: H,
    /// Last operation time in milliseconds
    pub last_time: f64,
    /// Telegrams exchanged by the last operation
    pub chunks: usize,
}

impl<H: ClientHandler> S7Client<H> {
    /// ### Creates a client driving `handler`
    ///
    /// The handler is not connected here, call `connect()`.
    pub fn new(handler: H) -> Self {
        S7Client {
            handler,
            last_time: 0.0,
            chunks: 0,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Negotiated PDU length, 0 when not connected
    pub fn pdu_length(&self) -> usize {
        self.handler.negotiated_pdu_length()
    }

    /// ### Connects to the PLC through the handler
    ///
    /// ### Errors
    /// Whatever the handler reports: TCP, ISO or PDU negotiation failures.
    pub fn connect(&mut self) -> Result<()> {
        self.last_time = 0.0;
        let start_time = Instant::now();
        self.handler.connect()?;
        self.last_time = start_time.elapsed().as_secs_f64() * 1000.0;
        debug!(pdu_length = self.pdu_length(), time_ms = self.last_time, "session open");
        Ok(())
    }

    /// ### Closes the connection.
    ///
    /// Safe to call even if the client is not currently connected.
    ///
    /// ### Notes
    /// ```text
    /// A Client should be disconnected on low-level error (see `read_area()` suggestion)
    /// ```
    pub fn disconnect(&mut self) {
        self.handler.close();
    }

    // One request/response exchange
    fn send(&mut self, request: &ProtocolDataUnit) -> Result<ProtocolDataUnit> {
        let data = self.handler.send(request.as_bytes())?;
        self.handler.verify(request.as_bytes(), &data)?;
        if data.is_empty() {
            return Err(S7Error::EmptyResponse);
        }
        let response = ProtocolDataUnit { data };
        response_error(&response)?;
        Ok(response)
    }

    fn plan(&self, area: u8, amount: usize, word_len: u8, buffer_len: usize, overhead: usize) -> Result<TransferPlan> {
        let pdu_length = self.pdu_length();
        if pdu_length == 0 {
            return Err(S7Error::NotConnected);
        }
        let plan = TransferPlan::new(area, word_len, amount, pdu_length, overhead)?;
        if buffer_len < plan.byte_len() {
            return Err(S7Error::InvalidDataSize(format!(
                "buffer of {} bytes, the transfer needs {}",
                buffer_len,
                plan.byte_len()
            )));
        }
        Ok(plan)
    }

    /// ### Reads a block of data from a specific S7 memory area.
    ///
    /// ### Parameters
    /// - `area`: S7 memory area constant (e.g., `S7_AREA_PE`, `S7_AREA_PA`, `S7_AREA_DB`, `S7_AREA_MK`).
    /// - `db_number`: DB number (ignored for non-DB areas).
    /// - `start`: Starting element index (byte index for bytes, bit index for bits, element for timers/counters).
    /// - `amount`: Number of elements of `word_len` to read.
    /// - `word_len`: Word length constant (e.g., `S7_WL_BYTE`, `S7_WL_WORD`, `S7_WL_BIT`).
    /// - `buffer`: Destination buffer, at least `amount` * element size bytes.
    ///
    /// #### Bit access notes
    /// 1. The start must be expressed in bits.
    ///    For example, if you want to access bit `DBX 45.3`, the start value would be 45 * 8 + 3 = 363.
    /// 2. Only one bit is transferred whatever `amount` is.
    ///
    /// ### Errors
    /// #### Low level
    /// - `S7Error::NotConnected`: no PDU length negotiated.
    /// - `S7Error::Iso*`, `S7Error::Io`: transport failures.
    /// - `S7Error::Plc`: the S7 header carries an error class/code.
    ///
    /// #### Suggestion
    /// In case of a low-level error, it is **highly recommended** to disconnect and reconnect the Client (as WinCC or other SCADA do)
    ///
    /// #### High level
    /// - `S7Error::Cpu`: the item return code is not success (e.g. inexistent DB, reading beyond the limits, optimized DB).
    /// - `S7Error::InvalidDataSize`: unknown `word_len`, short buffer or short reply.
    /// - `S7Error::PduLengthTooSmall`: not even one element fits a telegram.
    ///
    /// ### Notes
    /// - Large blocks are automatically split into chunks based on the negotiated PDU size.
    /// - In case of error, the chunks already read are in the buffer, the failing one is not.
    pub fn read_area(
        &mut self,
        area: u8,
        db_number: u16,
        start: usize,
        amount: usize,
        word_len: u8,
        buffer: &mut [u8],
    ) -> Result<()> {
        self.last_time = 0.0;
        self.chunks = 0;

        let plan = self.plan(area, amount, word_len, buffer.len(), READ_OVERHEAD)?;
        let start_time = Instant::now();

        for chunk in plan.chunks(start) {
            self.chunks += 1;
            let request = build_read_request(&plan, db_number, &chunk)?;
            let response = self.send(&request)?;
            let payload = read_response_payload(&response, &chunk)?;
            buffer[chunk.offset..chunk.offset + chunk.size].copy_from_slice(payload);
            debug!(
                area,
                db_number,
                chunk = chunk.index,
                start = chunk.start,
                size = chunk.size,
                "chunk read"
            );
        }

        self.last_time = start_time.elapsed().as_secs_f64() * 1000.0;
        Ok(())
    }

    /// ### Writes a block of data to a specific S7 memory area.
    ///
    /// Parameters are the same of `read_area()`, `buffer` being the source.
    ///
    /// ### Notes
    /// - Writing a bit affects **only that bit**, leaving adjacent bits in the byte unchanged.
    /// - Writing the output buffer (`S7_AREA_PA`) usually does not produce useful results, in fact the output process image
    ///   will be rewritten by OB1 in the next round
    /// ---
    /// For further info, please refer to `read_area()`
    pub fn write_area(
        &mut self,
        area: u8,
        db_number: u16,
        start: usize,
        amount: usize,
        word_len: u8,
        buffer: &[u8],
    ) -> Result<()> {
        self.last_time = 0.0;
        self.chunks = 0;

        let plan = self.plan(area, amount, word_len, buffer.len(), WRITE_OVERHEAD)?;
        let start_time = Instant::now();

        for chunk in plan.chunks(start) {
            self.chunks += 1;
            let payload = &buffer[chunk.offset..chunk.offset + chunk.size];
            let request = build_write_request(&plan, db_number, &chunk, payload)?;
            let response = self.send(&request)?;
            check_write_response(&response, &chunk)?;
            debug!(
                area,
                db_number,
                chunk = chunk.index,
                start = chunk.start,
                size = chunk.size,
                "chunk written"
            );
        }

        self.last_time = start_time.elapsed().as_secs_f64() * 1000.0;
        Ok(())
    }

    /// ### Reads a bit from a specific S7 memory area
    ///
    /// Same as `read_area()` with `S7_WL_BIT` and start = `byte_num * 8 + bit_idx`.
    ///
    /// ### Example
    /// To read DB10.DBX71.4 use:
    ///
    /// ```my_bit = client.read_bit(S7_AREA_DB, 10, 71, 4)?;```
    ///
    /// ### Suggestion
    ///
    /// ```text
    /// Even reading a single bit requires an entire telegram.
    /// If you need to read multiple bits (more or less adjacent in the same area),
    /// read blocks of bytes and then unpack them.
    /// ```
    pub fn read_bit(&mut self, area: u8, db_number: u16, byte_num: usize, bit_idx: u8) -> Result<bool> {
        let start = bit_start(byte_num, bit_idx)?;
        let mut buffer = [0u8; 1];
        self.read_area(area, db_number, start, 1, S7_WL_BIT, &mut buffer)?;
        Ok(buffer[0] != 0)
    }

    /// ### Writes a bit to a specific S7 memory area
    ///
    /// Same as `write_area()` with `S7_WL_BIT` and start = `byte_num * 8 + bit_idx`.
    /// Only that bit is affected.
    pub fn write_bit(&mut self, area: u8, db_number: u16, byte_num: usize, bit_idx: u8, value: bool) -> Result<()> {
        let start = bit_start(byte_num, bit_idx)?;
        self.write_area(area, db_number, start, 1, S7_WL_BIT, &[value as u8])
    }

    /// ### Reads `size` bytes from a Data Block (DB)
    ///
    /// Same as `read_area()` with area = `S7_AREA_DB` and word_len = `S7_WL_BYTE`
    pub fn ag_read_db(&mut self, db_number: u16, start: usize, size: usize, buffer: &mut [u8]) -> Result<()> {
        self.read_area(S7_AREA_DB, db_number, start, size, S7_WL_BYTE, buffer)
    }

    /// ### Writes `size` bytes to a Data Block (DB)
    ///
    /// Same as `write_area()` with area = `S7_AREA_DB` and word_len = `S7_WL_BYTE`
    pub fn ag_write_db(&mut self, db_number: u16, start: usize, size: usize, buffer: &[u8]) -> Result<()> {
        self.write_area(S7_AREA_DB, db_number, start, size, S7_WL_BYTE, buffer)
    }

    /// Reads `size` merker bytes
    pub fn ag_read_mb(&mut self, start: usize, size: usize, buffer: &mut [u8]) -> Result<()> {
        self.read_area(S7_AREA_MK, 0, start, size, S7_WL_BYTE, buffer)
    }

    pub fn ag_write_mb(&mut self, start: usize, size: usize, buffer: &[u8]) -> Result<()> {
        self.write_area(S7_AREA_MK, 0, start, size, S7_WL_BYTE, buffer)
    }

    /// Reads `size` bytes of the process inputs
    pub fn ag_read_eb(&mut self, start: usize, size: usize, buffer: &mut [u8]) -> Result<()> {
        self.read_area(S7_AREA_PE, 0, start, size, S7_WL_BYTE, buffer)
    }

    pub fn ag_write_eb(&mut self, start: usize, size: usize, buffer: &[u8]) -> Result<()> {
        self.write_area(S7_AREA_PE, 0, start, size, S7_WL_BYTE, buffer)
    }

    /// Reads `size` bytes of the process outputs
    pub fn ag_read_ab(&mut self, start: usize, size: usize, buffer: &mut [u8]) -> Result<()> {
        self.read_area(S7_AREA_PA, 0, start, size, S7_WL_BYTE, buffer)
    }

    pub fn ag_write_ab(&mut self, start: usize, size: usize, buffer: &[u8]) -> Result<()> {
        self.write_area(S7_AREA_PA, 0, start, size, S7_WL_BYTE, buffer)
    }

    /// ### Reads `amount` timers starting at `start`
    ///
    /// `buffer` receives one host value per timer.
    pub fn ag_read_tm(&mut self, start: usize, amount: usize, buffer: &mut [u16]) -> Result<()> {
        self.read_elements(S7_AREA_TM, S7_WL_TIMER, start, amount, buffer)
    }

    pub fn ag_write_tm(&mut self, start: usize, amount: usize, buffer: &[u16]) -> Result<()> {
        self.write_elements(S7_AREA_TM, S7_WL_TIMER, start, amount, buffer)
    }

    /// ### Reads `amount` counters starting at `start`
    ///
    /// `buffer` receives one host value per counter.
    pub fn ag_read_ct(&mut self, start: usize, amount: usize, buffer: &mut [u16]) -> Result<()> {
        self.read_elements(S7_AREA_CT, S7_WL_COUNTER, start, amount, buffer)
    }

    pub fn ag_write_ct(&mut self, start: usize, amount: usize, buffer: &[u16]) -> Result<()> {
        self.write_elements(S7_AREA_CT, S7_WL_COUNTER, start, amount, buffer)
    }

    // Timers and counters: host value = wire[2c+1] << 8 | wire[2c]
    fn read_elements(&mut self, area: u8, word_len: u8, start: usize, amount: usize, buffer: &mut [u16]) -> Result<()> {
        check_elements(amount, buffer.len())?;
        let mut wire = vec![0u8; amount * 2];
        self.read_area(area, 0, start, amount, word_len, &mut wire)?;
        for (value, bytes) in buffer.iter_mut().zip(wire.chunks_exact(2)) {
            *value = LittleEndian::read_u16(bytes);
        }
        Ok(())
    }

    fn write_elements(&mut self, area: u8, word_len: u8, start: usize, amount: usize, buffer: &[u16]) -> Result<()> {
        check_elements(amount, buffer.len())?;
        let mut wire = vec![0u8; amount * 2];
        for (bytes, value) in wire.chunks_exact_mut(2).zip(buffer) {
            LittleEndian::write_u16(bytes, *value);
        }
        self.write_area(area, 0, start, amount, word_len, &wire)
    }

    /// ### Reads a list of NC-unit items in one telegram
    ///
    /// The whole request and its reply must fit the negotiated PDU.
    ///
    /// ### Errors
    /// - `S7Error::InvalidArgument`: empty list.
    /// - `S7Error::InvalidNckItem`: area > 7 or unit > 31.
    /// - `S7Error::InvalidDataSize` / `S7Error::NckParse`: short or truncated reply.
    pub fn ag_read_multi_nck(&mut self, items: &[S7NckAddrItem]) -> Result<Vec<S7NckDataItem>> {
        self.last_time = 0.0;
        self.chunks = 0;
        let request = build_nck_read_request(items)?;
        let start_time = Instant::now();

        self.chunks = 1;
        let response = self.send(&request)?;
        let data_items = parse_nck_read_response(&response)?;

        self.last_time = start_time.elapsed().as_secs_f64() * 1000.0;
        debug!(items = items.len(), replies = data_items.len(), "NC items read");
        Ok(data_items)
    }

    /// ### Writes a list of NC-unit items in one telegram
    ///
    /// `addr_items` and `data_items` are paired by position.
    ///
    /// ### Returns
    /// The per-item return codes (0xFF success).
    pub fn ag_write_multi_nck(&mut self, addr_items: &[S7NckAddrItem], data_items: &[S7NckDataItem]) -> Result<Vec<u8>> {
        self.last_time = 0.0;
        self.chunks = 0;
        let request = build_nck_write_request(addr_items, data_items)?;
        let start_time = Instant::now();

        self.chunks = 1;
        let response = self.send(&request)?;
        let codes = parse_nck_write_response(&response, addr_items.len())?;

        self.last_time = start_time.elapsed().as_secs_f64() * 1000.0;
        debug!(items = addr_items.len(), "NC items written");
        Ok(codes)
    }

    /// Reads a single NC-unit item
    pub fn ag_read_nck(&mut self, item: &S7NckAddrItem) -> Result<S7NckDataItem> {
        self.ag_read_multi_nck(std::slice::from_ref(item))?
            .into_iter()
            .next()
            .ok_or_else(|| S7Error::NckParse("NC read reply carries no data item".into()))
    }

    /// Writes a single NC-unit item, returns its return code
    pub fn ag_write_nck(&mut self, item: &S7NckAddrItem, data: &S7NckDataItem) -> Result<u8> {
        let codes = self.ag_write_multi_nck(std::slice::from_ref(item), std::slice::from_ref(data))?;
        Ok(codes[0])
    }

    /// ### Reads a symbolic variable
    ///
    /// ### Example
    /// ```ignore
    /// let speed = client.read("DB10.DBW4")?;     // S7Value::Word
    /// let flag = client.read("M2.1")?;           // S7Value::Bit
    /// ```
    ///
    /// ### Errors
    /// - `S7Error::InvalidAddress`: the variable does not parse.
    /// - Any error of `read_area()`.
    pub fn read(&mut self, variable: &str) -> Result<S7Value> {
        let address = parse_address(variable)?;
        let offset = address.offset as usize;
        match address.kind {
            AddressKind::Timer => {
                let mut value = [0u16; 1];
                self.ag_read_tm(offset, 1, &mut value)?;
                Ok(S7Value::Timer(value[0]))
            }
            AddressKind::Counter => {
                let mut value = [0u16; 1];
                self.ag_read_ct(offset, 1, &mut value)?;
                Ok(S7Value::Counter(value[0]))
            }
            kind => {
                let mut buffer = [0u8; 4];
                let bytes = &mut buffer[..kind.size()];
                self.read_bytes(&address, bytes)?;
                Ok(match kind {
                    AddressKind::Bit => S7Value::Bit(bytes[0] & BIT_MASK[address.bit as usize] != 0),
                    AddressKind::Byte => S7Value::Byte(bytes[0]),
                    AddressKind::Word => S7Value::Word(BigEndian::read_u16(bytes)),
                    _ => S7Value::DWord(BigEndian::read_u32(bytes)),
                })
            }
        }
    }

    /// ### Writes a symbolic variable
    ///
    /// The value variant must match the variable, e.g. `S7Value::Word` for `DB1.DBW4`.
    /// Bits are written with a bit telegram, adjacent bits are left unchanged.
    ///
    /// ### Errors
    /// - `S7Error::InvalidAddress`: the variable does not parse.
    /// - `S7Error::InvalidArgument`: value and variable kinds differ.
    /// - Any error of `write_area()`.
    pub fn write(&mut self, variable: &str, value: S7Value) -> Result<()> {
        let address = parse_address(variable)?;
        if value.kind() != address.kind {
            return Err(S7Error::InvalidArgument(format!(
                "{:?} value does not fit '{}' ({:?})",
                value.kind(),
                variable,
                address.kind
            )));
        }
        let offset = address.offset as usize;
        match value {
            S7Value::Bit(bit) => self.write_bit(address.area, address.db_number, offset, address.bit, bit),
            S7Value::Byte(byte) => self.write_bytes(&address, &[byte]),
            S7Value::Word(word) => {
                let mut buffer = [0u8; 2];
                BigEndian::write_u16(&mut buffer, word);
                self.write_bytes(&address, &buffer)
            }
            S7Value::DWord(dword) => {
                let mut buffer = [0u8; 4];
                BigEndian::write_u32(&mut buffer, dword);
                self.write_bytes(&address, &buffer)
            }
            S7Value::Timer(timer) => self.ag_write_tm(offset, 1, &[timer]),
            S7Value::Counter(counter) => self.ag_write_ct(offset, 1, &[counter]),
        }
    }

    fn read_bytes(&mut self, address: &S7Address, buffer: &mut [u8]) -> Result<()> {
        let size = buffer.len();
        self.read_area(address.area, address.db_number, address.offset as usize, size, S7_WL_BYTE, buffer)
    }

    fn write_bytes(&mut self, address: &S7Address, buffer: &[u8]) -> Result<()> {
        self.write_area(address.area, address.db_number, address.offset as usize, buffer.len(), S7_WL_BYTE, buffer)
    }
}

fn bit_start(byte_num: usize, bit_idx: u8) -> Result<usize> {
    if bit_idx > 7 {
        return Err(S7Error::InvalidAddress(format!("bit index {} out of range 0..7", bit_idx)));
    }
    byte_num
        .checked_mul(8)
        .map(|bits| bits + bit_idx as usize)
        .ok_or_else(|| S7Error::InvalidAddress(format!("byte {} out of range", byte_num)))
}

fn check_elements(amount: usize, len: usize) -> Result<()> {
    if len < amount {
        return Err(S7Error::InvalidDataSize(format!(
            "buffer of {} elements, {} requested",
            len, amount
        )));
    }
    Ok(())
}

impl<H: ClientHandler> Drop for S7Client<H> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
