// Rust7 - Native Rust S7 client (Snap7‑style) for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use std::io::{Read, Write};
use std::net::Shutdown;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tracing::{debug, info};

use crate::error::{Result, S7Error};
use crate::pdu::{ISO_HEADER_LEN, ISO_ID, S7_ID};
use crate::transport::{Packager, PduLength, Transporter};

// Connection types
pub const CT_PG: u16 = 0x0001; // As PG (Default)
pub const CT_OP: u16 = 0x0002; // As OP
pub const CT_S7: u16 = 0x0003; // AS S7 Basic

pub const DEFAULT_PORT: u16 = 102;
pub const DEFAULT_PDU_LENGTH: u16 = 480; // PDU Length requested for negotiation

const ISO_CR_LEN: usize = 22; // Connection request telegram size
const ISO_CONN_REQ: u8 = 0xE0; // ISO connection request
const ISO_CONN_OK: u8 = 0xD0; // ISO connection accepted
const ISO_PN_REQ_LEN: usize = 25; // PDU negotiation request telegram size
const ISO_PN_RES_LEN: usize = 27; // PDU negotiation response telegram size
const EOT: u8 = 0x80; // ISO End of Trasmission
const PDU_REF_OFFSET: usize = 11;

// Macros
macro_rules! hi_part {
    ($x:expr) => {
        (($x >> 8) & 0xFF) as u8
    };
}

macro_rules! lo_part {
    ($x:expr) => {
        ($x & 0xFF) as u8
    };
}

macro_rules! make_u16 {
    ($hi:expr, $lo:expr) => {
        ((($hi as u16) << 8) | ($lo as u16))
    };
}

/// Connection parameters of a [`TcpClientHandler`].
#[derive(Debug, Clone)]
pub struct TcpClientConfig {
    /// PLC IPV4 address (or host name)
    pub address: String,
    pub port: u16,
    pub rack: u16,
    pub slot: u16,
    /// `CT_PG`, `CT_OP` or `CT_S7`
    pub conn_type: u16,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// PDU length asked for during negotiation, the PLC may grant less
    pub pdu_length: u16,
    /// SO_KEEPALIVE on the connection
    pub keep_alive: bool,
    /// Idle time before the first probe, `None` keeps the OS default
    pub keep_alive_time: Option<Duration>,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        TcpClientConfig {
            address: String::new(),
            port: DEFAULT_PORT,
            rack: 0,
            slot: 0,
            conn_type: CT_PG,
            connect_timeout: Duration::from_millis(3000),
            read_timeout: Duration::from_millis(1000),
            write_timeout: Duration::from_millis(500),
            pdu_length: DEFAULT_PDU_LENGTH,
            keep_alive: true,
            keep_alive_time: None,
        }
    }
}

impl TcpClientConfig {
    /// ### Connection to a Siemens PLC/Drive using Rack and Slot
    ///
    /// Rack and Slot are Hardware configuration parameters.
    /// - S71200/1500: rack 0, slot 0 (or 1)
    /// - S7300: rack 0, slot 2
    /// - Sinumerik NCU: usually rack 0, slot 3 to reach the NC-unit
    pub fn new(address: &str, rack: u16, slot: u16) -> Self {
        TcpClientConfig {
            address: address.to_string(),
            rack,
            slot,
            ..Default::default()
        }
    }

    /// ### Changes the S7 connection type to the PLC
    ///
    /// `CT_PG` (programming device), `CT_OP` (HMI) or `CT_S7` (generic device).
    /// With very old PLCs with limited communication resources, the connection
    /// may be rejected as PG, in this case use `CT_OP` or `CT_S7`.
    pub fn set_connection_type(&mut self, connection_type: u16) {
        self.conn_type = connection_type;
    }

    /// ### Sets operations timeout (ms)
    ///
    /// Values must be > 0, otherwise they are ignored
    pub fn set_timeout(&mut self, co_timeout_ms: u64, rd_timeout_ms: u64, wr_timeout_ms: u64) {
        if co_timeout_ms > 0 {
            self.connect_timeout = Duration::from_millis(co_timeout_ms);
        }
        if rd_timeout_ms > 0 {
            self.read_timeout = Duration::from_millis(rd_timeout_ms);
        }
        if wr_timeout_ms > 0 {
            self.write_timeout = Duration::from_millis(wr_timeout_ms);
        }
    }

    /// ### Sets the TCP Connection Port
    ///
    /// The default S7 Port is 102. Value must be > 0, otherwise it is ignored
    pub fn set_connection_port(&mut self, port: u16) {
        if port > 0 {
            self.port = port;
        }
    }

    /// ### Enables or disables TCP keep-alive
    ///
    /// `idle_ms` is the idle time before the first probe, 0 keeps the OS default
    pub fn set_keep_alive(&mut self, enabled: bool, idle_ms: u64) {
        self.keep_alive = enabled;
        self.keep_alive_time = if idle_ms > 0 {
            Some(Duration::from_millis(idle_ms))
        } else {
            None
        };
    }

    pub fn local_tsap(&self) -> u16 {
        0x0100
    }

    pub fn remote_tsap(&self) -> u16 {
        (self.conn_type << 8) + (self.rack * 0x20) + self.slot
    }
}

/// ISO-on-TCP transport (RFC 1006) with S7 PDU negotiation.
pub struct TcpClientHandler {
    config: TcpClientConfig,
    stream: Option<TcpStream>,
    /// PDU length negotiated by the CPU
    pub pdu_length: u16,
}

/// ### Checks the incoming ISO Packet coherence
///
/// Typically, a PLC never sends incorrect values, but we may find data in the buffer
/// from a fragmented transmission, so it is good practice to check.
/// Returns the remaining bytes to read from the telegram.
pub fn check_iso_packet(pdu_length: u16, iso_packet: &[u8; ISO_HEADER_LEN]) -> Result<usize> {
    //
    //  TPKT + ISO Header
    //
    //  TPKT
    //      [0]    RFC 1006 ID          0x03
    //      [1]    Reserved             0x00
    //      [2]    HI Telegram length   Variable
    //      [3]    LO Telegram length   Variable
    //  ISO
    //      [4]    Length               0x02
    //      [5]    PDU Type             0xF0
    //      [6]    EOT                  0x80

    if iso_packet[0] != ISO_ID || iso_packet[4] != 0x02 || iso_packet[5] != 0xF0 {
        return Err(S7Error::IsoInvalidHeader);
    }

    if iso_packet[6] != EOT {
        return Err(S7Error::IsoFragmentedPacket);
    }

    let telegram_length: usize = make_u16!(iso_packet[2], iso_packet[3]) as usize;

    if telegram_length <= ISO_HEADER_LEN || telegram_length - ISO_HEADER_LEN > pdu_length as usize {
        return Err(S7Error::IsoInvalidTelegram);
    }

    Ok(telegram_length - ISO_HEADER_LEN)
}

impl TcpClientHandler {
    pub fn new(config: TcpClientConfig) -> Self {
        TcpClientHandler {
            config,
            stream: None,
            pdu_length: 0,
        }
    }

    pub fn config(&self) -> &TcpClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn apply_keep_alive(&self, stream: &TcpStream) -> Result<()> {
        if !self.config.keep_alive {
            return Ok(());
        }
        let socket = SockRef::from(stream);
        match self.config.keep_alive_time {
            Some(time) => socket.set_tcp_keepalive(&TcpKeepalive::new().with_time(time))?,
            None => socket.set_keepalive(true)?,
        }
        Ok(())
    }

    fn iso_connect(&self, stream: &mut TcpStream) -> Result<()> {
        let local_tsap = self.config.local_tsap();
        let remote_tsap = self.config.remote_tsap();

        let iso_cr: [u8; ISO_CR_LEN] = [
            // TPKT (RFC1006 Header)
            ISO_ID, // RFC 1006 ID (3)
            0x00,   // Reserved, always 0
            hi_part!(ISO_CR_LEN), // High part of packet length (entire frame, payload and TPDU included)
            lo_part!(ISO_CR_LEN), // Low part of packet length (entire frame, payload and TPDU included)
            // COTP (ISO 8073 Header)
            0x11, // PDU Size Length
            ISO_CONN_REQ, // CR - Connection Request ID
            0x00, // Dst Reference HI
            0x00, // Dst Reference LO
            0x00, // Src Reference HI
            0x01, // Src Reference LO
            0x00, // Class + Options Flags
            0xC0, // PDU Max Length ID
            0x01, // PDU Max Length HI
            0x0A, // PDU Max Length LO
            0xC1, // Src TSAP Identifier
            0x02, // Src TSAP Length (2 bytes)
            hi_part!(local_tsap), // Loc TSAP HI
            lo_part!(local_tsap), // Loc TSAP LO
            0xC2, // Rem TSAP Identifier
            0x02, // Rem TSAP Length (2 bytes)
            hi_part!(remote_tsap), // Rem TSAP HI
            lo_part!(remote_tsap), // Rem TSAP LO
        ];

        stream.write_all(&iso_cr)?;

        let mut iso_resp = [0u8; ISO_CR_LEN];
        let size_resp = stream.read(&mut iso_resp)?;

        if size_resp < ISO_CR_LEN || iso_resp[5] != ISO_CONN_OK {
            return Err(S7Error::IsoConnectionFailed);
        }
        debug!(local_tsap, remote_tsap, "ISO connection accepted");
        Ok(())
    }

    fn negotiate_pdu_length(&self, stream: &mut TcpStream) -> Result<u16> {
        let requested = self.config.pdu_length;
        // S7 PDU Negotiation Telegram (contains also ISO Header and COTP Header)
        let s7_pn: [u8; ISO_PN_REQ_LEN] = [
            ISO_ID, 0x00, 0x00, 0x19,
            0x02, 0xf0, 0x80,
            S7_ID, 0x01, 0x00, 0x00, 0x04, 0x00, 0x00, 0x08, 0x00,
            0x00, 0xf0, 0x00, 0x00, 0x01, 0x00, 0x01,
            hi_part!(requested),
            lo_part!(requested),
        ];
        stream.write_all(&s7_pn)?;

        let mut pn_resp = [0u8; ISO_PN_RES_LEN];
        let size_pn = stream.read(&mut pn_resp)?;

        if size_pn < ISO_PN_RES_LEN || pn_resp[0] != ISO_ID || pn_resp[7] != S7_ID || pn_resp[17] != 0x00 {
            return Err(S7Error::PduNegotiationFailed);
        }

        let pdu_length = make_u16!(pn_resp[25], pn_resp[26]);
        if pdu_length == 0 {
            return Err(S7Error::PduNegotiationFailed);
        }
        Ok(pdu_length)
    }
}

impl Transporter for TcpClientHandler {
    /// ### Connects to the PLC
    ///
    /// TCP connection, ISO connection request built from rack/slot/connection type,
    /// then S7 PDU negotiation.
    ///
    /// ### Errors
    /// - `S7Error::TcpConnectionFailed`: TCP connection could not be established.
    /// - `S7Error::IsoConnectionFailed`: ISO connection failed
    /// - `S7Error::PduNegotiationFailed`: PDU negotiation failed.
    /// - `S7Error::Io`: network I/O error.
    fn connect(&mut self) -> Result<()> {
        self.close();

        let addr = format!("{}:{}", self.config.address, self.config.port);
        let sock_addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or(S7Error::TcpConnectionFailed)?;

        let mut stream = TcpStream::connect_timeout(&sock_addr, self.config.connect_timeout)?;
        stream.set_read_timeout(Some(self.config.read_timeout))?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;
        stream.set_nodelay(true)?;
        self.apply_keep_alive(&stream)?;

        self.iso_connect(&mut stream)?;
        self.pdu_length = self.negotiate_pdu_length(&mut stream)?;
        self.stream = Some(stream);

        info!(%addr, pdu_length = self.pdu_length, "connected");
        Ok(())
    }

    /// Safe to call even if the handler is not currently connected.
    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            // If we are disconnecting on a low-level error it's better to flush the socket
            let _ = stream.shutdown(Shutdown::Both);
            self.pdu_length = 0;
            debug!("disconnected");
        }
    }

    fn send(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let pdu_length = self.pdu_length;
        let stream = self.stream.as_mut().ok_or(S7Error::NotConnected)?;

        stream.write_all(request)?;

        // Read and check ISO header
        let mut iso_packet = [0u8; ISO_HEADER_LEN];
        stream.read_exact(&mut iso_packet)?;
        let s7_comm_size = check_iso_packet(pdu_length, &iso_packet)?;

        let mut response = Vec::with_capacity(ISO_HEADER_LEN + s7_comm_size);
        response.extend_from_slice(&iso_packet);
        response.resize(ISO_HEADER_LEN + s7_comm_size, 0);
        stream.read_exact(&mut response[ISO_HEADER_LEN..])?;

        Ok(response)
    }
}

impl Packager for TcpClientHandler {
    /// The reply must be an S7 telegram answering the request's PDU reference
    fn verify(&self, request: &[u8], response: &[u8]) -> Result<()> {
        let reference = |t: &[u8]| t.get(PDU_REF_OFFSET..PDU_REF_OFFSET + 2).map(|r| [r[0], r[1]]);
        if response.first() != Some(&ISO_ID) || response.get(ISO_HEADER_LEN) != Some(&S7_ID) {
            return Err(S7Error::IsoInvalidTelegram);
        }
        match (reference(request), reference(response)) {
            (Some(req), Some(res)) if req == res => Ok(()),
            _ => Err(S7Error::IsoInvalidTelegram),
        }
    }
}

impl PduLength for TcpClientHandler {
    fn negotiated_pdu_length(&self) -> usize {
        self.pdu_length as usize
    }
}

impl Drop for TcpClientHandler {
    fn drop(&mut self) {
        self.close();
    }
}
