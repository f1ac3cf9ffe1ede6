// Rust7 - Native Rust S7 client (Snap7‑style) for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use std::fmt;
use std::io;
use std::result::Result as StdResult;

use thiserror::Error;
use tracing::warn;

use crate::pdu::{ProtocolDataUnit, ISO_HEADER_LEN};

/// Crate wide result type
pub type Result<T> = StdResult<T, S7Error>;

/// Item return code meaning "operation successful"
pub const RES_SUCCESS: u8 = 0xFF;

#[derive(Debug, Error)]
pub enum S7Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("TCP connection failed")]
    TcpConnectionFailed,

    #[error("ISO-on-TCP connection failed")]
    IsoConnectionFailed,

    #[error("Fragmented ISO Packet")]
    IsoFragmentedPacket,

    #[error("Invalid ISO Header")]
    IsoInvalidHeader,

    #[error("Invalid ISO Telegram")]
    IsoInvalidTelegram,

    #[error("S7 PDU negotiation failed")]
    PduNegotiationFailed,

    #[error("s7: response data is empty")]
    EmptyResponse,

    /// Negotiated PDU too small to carry even one element
    #[error("PDU length {pdu_length} leaves no room for a {width} byte element (overhead {overhead})")]
    PduLengthTooSmall {
        pdu_length: usize,
        overhead: usize,
        width: usize,
    },

    #[error("invalid data size: {0}")]
    InvalidDataSize(String),

    #[error("invalid PDU: {0}")]
    InvalidPdu(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// NC address item with Area outside 0..=7 or Unit outside 0..=31
    #[error("invalid NC address item: area {area} (0..=7), unit {unit} (0..=31)")]
    InvalidNckItem { area: u8, unit: u8 },

    #[error("malformed NC response: {0}")]
    NckParse(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The CPU rejected one chunk of an area transfer
    #[error("CPU error {code:#04x} ({text}) at chunk {chunk}, start {start}, {size} bytes")]
    Cpu {
        code: u8,
        text: &'static str,
        chunk: usize,
        start: usize,
        size: usize,
    },

    /// Error class/code reported in the S7 header
    #[error("{0}")]
    Plc(S7ErrorCode),
}

impl S7Error {
    /// Builds a `Cpu` error for a rejected chunk, resolving the code text
    pub fn cpu(code: u8, chunk: usize, start: usize, size: usize) -> Self {
        S7Error::Cpu {
            code,
            text: cpu_error_text(code),
            chunk,
            start,
            size,
        }
    }
}

/// Composed PLC error code (error class + error code of the S7 header).
///
/// The zero value means "no error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct S7ErrorCode {
    pub high: u8,
    pub low: u8,
}

impl S7ErrorCode {
    pub fn new(high: u8, low: u8) -> Self {
        S7ErrorCode { high, low }
    }

    pub fn code(&self) -> u16 {
        ((self.high as u16) << 8) | self.low as u16
    }

    pub fn is_ok(&self) -> bool {
        self.code() == 0
    }

    pub fn text(&self) -> &'static str {
        s7_error_text(self.code())
    }
}

impl fmt::Display for S7ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S7 error {:#06x}: {}", self.code(), self.text())
    }
}

/// Text of a data item return code (the status byte of an area response)
pub fn cpu_error_text(code: u8) -> &'static str {
    match code {
        RES_SUCCESS => "success",
        0x00 => "reserved",
        0x01 => "hardware fault",
        0x03 => "accessing the object not allowed",
        0x05 => "address out of range",
        0x06 => "data type not supported",
        0x07 => "data type inconsistent",
        0x0A => "object does not exist",
        _ => "unknown CPU error",
    }
}

/// Text of an S7 header error class/code pair
pub fn s7_error_text(code: u16) -> &'static str {
    match code {
        0x0000 => "no error",
        0x0110 => "invalid block number",
        0x0111 => "invalid request length",
        0x0112 => "invalid parameter",
        0x0113 => "invalid block type",
        0x0114 => "block not found",
        0x0115 => "block already exists",
        0x0116 => "block is write-protected",
        0x0117 => "the block/operating system update is too large",
        0x0118 => "invalid block number",
        0x0119 => "incorrect password entered",
        0x011A => "PG resource error",
        0x011B => "PLC resource error",
        0x011C => "protocol error",
        0x011D => "too many blocks",
        0x011E => "there is no longer a connection to the database, or S7DOS handle is invalid",
        0x011F => "result buffer too small",
        0x0120 => "end of block list",
        0x0140 => "insufficient memory available",
        0x0141 => "job cannot be processed because of a lack of resources",
        0x8001 => "the requested service cannot be performed while the block is in the current status",
        0x8003 => "S7 protocol error: error occurred while transferring the block",
        0x8100 => "application, general error: service unknown to remote module",
        0x8104 => "this service is not implemented on the module or a frame error was reported",
        0x8204 => "the type specification for the object is inconsistent",
        0x8205 => "a copied block already exists and is not linked",
        0x8301 => "insufficient memory space or work memory on the module, or specified storage medium not accessible",
        0x8302 => "too few resources available or the processor resources are not available",
        0x8304 => "no further parallel upload possible, there is a resource bottleneck",
        0x8305 => "function not available",
        0x8306 => "insufficient work memory (for copying, linking, loading AWP)",
        0x8307 => "not enough retentive work memory (for copying, linking, loading AWP)",
        0x8401 => "S7 protocol error: invalid service sequence (for example, loading or uploading a block)",
        0x8402 => "service cannot execute owing to status of the addressed object",
        0x8404 => "S7 protocol: the function cannot be performed",
        0x8405 => "remote block is in DISABLE state (CFB), the function cannot be performed",
        0x8500 => "S7 protocol error: wrong frames",
        0x8503 => "alarm from the module: service canceled prematurely",
        0x8701 => "error addressing the object on the communications partner (for example, area length error)",
        0x8702 => "the requested service is not supported by the module",
        0x8703 => "access to object refused",
        0x8704 => "access error: object damaged",
        0xD001 => "protocol error: illegal job number",
        0xD002 => "parameter error: illegal job variant",
        0xD003 => "parameter error: debugging function not supported by module",
        0xD004 => "parameter error: illegal job status",
        0xD005 => "parameter error: illegal job termination",
        0xD006 => "parameter error: illegal link disconnection ID",
        0xD007 => "parameter error: illegal number of buffer elements",
        0xD008 => "parameter error: illegal scan rate",
        0xD009 => "parameter error: illegal number of executions",
        0xD00A => "parameter error: illegal trigger event",
        0xD00B => "parameter error: illegal trigger condition",
        0xD011 => "parameter error in path of the call environment: block does not exist",
        0xD012 => "parameter error: wrong address in block",
        0xD014 => "parameter error: block being deleted/overwritten",
        0xD015 => "parameter error: illegal tag address",
        0xD016 => "parameter error: test jobs not possible, because of errors in user program",
        0xD017 => "parameter error: illegal trigger number",
        0xD025 => "parameter error: invalid path",
        0xD026 => "parameter error: illegal access type",
        0xD027 => "parameter error: this number of data blocks is not permitted",
        0xD031 => "internal protocol error",
        0xD032 => "parameter error: wrong result buffer length",
        0xD033 => "protocol error: wrong job length",
        0xD03F => "coding error: error in parameter section",
        0xD041 => "data error: illegal status list ID",
        0xD042 => "data error: illegal tag address",
        0xD043 => "data error: referenced job not found, check job data",
        0xD044 => "data error: illegal tag value, check job data",
        0xD045 => "data error: exiting the ODIS control is not allowed in HOLD",
        0xD046 => "data error: illegal measuring stage during run-time measurement",
        0xD047 => "data error: illegal hierarchy in 'Read job list'",
        0xD048 => "data error: illegal deletion ID in 'Delete job'",
        0xD049 => "invalid substitute ID in 'Replace job'",
        0xD04A => "error executing 'program status'",
        0xD05F => "coding error: error in data section",
        0xD061 => "resource error: no memory space for job",
        0xD062 => "resource error: job list full",
        0xD063 => "resource error: trigger event occupied",
        0xD064 => "resource error: not enough memory space for one result buffer element",
        0xD065 => "resource error: not enough memory space for several result buffer elements",
        0xD066 => "resource error: the timer available for run-time measurement is occupied by another job",
        0xD067 => "resource error: too many 'modify tag' jobs active",
        0xD081 => "function not permitted in current mode",
        0xD082 => "mode error: cannot exit HOLD mode",
        0xD0A1 => "function not permitted in current protection level",
        0xD0A2 => "function not possible at present, because a function is running that modifies memory",
        0xD0A3 => "too many 'modify tag' jobs active on the I/O",
        0xD0A4 => "'forcing' has already been established",
        0xD0A5 => "referenced job not found",
        0xD0A6 => "job cannot be disabled/enabled",
        0xD0A7 => "job cannot be deleted, for example because it is currently being read",
        0xD0A8 => "job cannot be replaced, for example because it is currently being read or deleted",
        0xD0A9 => "job cannot be read, for example because it is currently being deleted",
        0xD0AA => "time limit exceeded in process operation",
        0xD0AB => "invalid job parameters in process operation",
        0xD0AC => "invalid job data in process operation",
        0xD0AD => "operating mode already set",
        0xD0AE => "the job was set up over a different connection and can only be handled over this connection",
        0xD0C1 => "at least one error has been detected while accessing the tag(s)",
        0xD0C2 => "change to STOP/HOLD mode",
        0xD0C3 => "at least one error was detected while accessing the tag(s), mode change to STOP/HOLD",
        0xD0C4 => "timeout during run-time measurement",
        0xD0C5 => "display of block stack inconsistent, because blocks were deleted/reloaded",
        0xD0C6 => "job was automatically deleted as the jobs it referenced have been deleted",
        0xD0C7 => "the job was automatically deleted because STOP mode was exited",
        0xD0C8 => "'block status' aborted because of inconsistencies between test job and running program",
        0xD0C9 => "exit the status area by resetting OB90",
        0xD0CA => "exiting the status range by resetting OB90 and access error reading tags before exiting",
        0xD0CB => "the output disable for the peripheral outputs has been activated again",
        0xD0CC => "the amount of data for the debugging functions is restricted by the time limit",
        0xD201 => "syntax error in block name",
        0xD202 => "syntax error in function parameters",
        0xD205 => "linked block already exists in RAM: conditional copying is not possible",
        0xD206 => "linked block already exists in EPROM: conditional copying is not possible",
        0xD208 => "maximum number of copied (not linked) blocks on module exceeded",
        0xD209 => "(at least) one of the given blocks not found on the module",
        0xD20A => "the maximum number of blocks that can be linked with one job was exceeded",
        0xD20B => "the maximum number of blocks that can be deleted with one job was exceeded",
        0xD20C => "OB cannot be copied because the associated priority class does not exist",
        0xD20D => "SDB cannot be interpreted (for example, unknown number)",
        0xD20E => "no (further) block available",
        0xD20F => "module-specific maximum block size exceeded",
        0xD210 => "invalid block number",
        0xD212 => "incorrect header attribute (run-time relevant)",
        0xD213 => "too many SDBs",
        0xD216 => "invalid user program, reset module",
        0xD217 => "protection level specified in module properties not permitted",
        0xD218 => "incorrect attribute (active/passive)",
        0xD219 => "incorrect block lengths",
        0xD21A => "incorrect local data length or write-protection code faulty",
        0xD21B => "module cannot compress or compression was interrupted early",
        0xD21D => "the volume of dynamic project data transferred is illegal",
        0xD21E => "unable to assign parameters to a module (such as FM, CP), the system data could not be linked",
        0xD220 => "invalid programming language",
        0xD221 => "the system data for connections or routing are not valid",
        0xD222 => "the system data of the global data definition contain invalid parameters",
        0xD223 => "error in instance data block for communication function block or maximum number of instance DBs exceeded",
        0xD224 => "the SCAN system data block contains invalid parameters",
        0xD225 => "the DP system data block contains invalid parameters",
        0xD226 => "a structural error occurred in a block",
        0xD230 => "a structural error occurred in a block",
        0xD231 => "at least one loaded OB cannot be copied because the associated priority class does not exist",
        0xD232 => "at least one block number of a loaded block is illegal",
        0xD234 => "block exists twice in the specified memory medium or in the job",
        0xD235 => "the block contains an incorrect checksum",
        0xD236 => "the block does not contain a checksum",
        0xD237 => "you are about to load the block twice",
        0xD238 => "at least one of the blocks specified is not a DB",
        0xD239 => "at least one of the DBs specified is not available as a linked variant in the load memory",
        0xD23A => "at least one of the specified DBs is considerably different from the copied and linked variant",
        0xD240 => "coordination rules violated",
        0xD241 => "the function is not permitted in the current protection level",
        0xD242 => "protection violation while processing F blocks",
        0xD250 => "update and module ID or version do not match",
        0xD251 => "incorrect sequence of operating system components",
        0xD252 => "checksum error",
        0xD253 => "no executable loader available, update only possible using a memory card",
        0xD254 => "storage error in operating system",
        0xD280 => "error compiling block in S7-300 CPU",
        0xD2A1 => "another block function or a trigger on a block is active",
        0xD2A2 => "a trigger is active on a block, complete the debugging function first",
        0xD2A3 => "the block is not active (linked), the block is occupied or the block is currently marked for deletion",
        0xD2A4 => "the block is already being processed by another block function",
        0xD2A6 => "it is not possible to save and change the user program simultaneously",
        0xD2A7 => "the block has the attribute 'unlinked' or is not processed",
        0xD2A8 => "an active debugging function is preventing parameters from being assigned to the CPU",
        0xD2A9 => "new parameters are being assigned to the CPU",
        0xD2AA => "new parameters are currently being assigned to the modules",
        0xD2AB => "the dynamic configuration limits are currently being changed",
        0xD2AC => "a running active or deactivate assignment (SFC 12) is temporarily preventing R-KiR process",
        0xD2B0 => "an error occurred while configuring in RUN (CiR)",
        0xD2C0 => "the maximum number of technological objects has been exceeded",
        0xD2C1 => "the same technology data block already exists on the module",
        0xD2C2 => "downloading the user program or downloading the hardware configuration is not possible",
        0xD401 => "information function unavailable",
        0xD402 => "information function unavailable",
        0xD403 => "service has already been logged on/off (diagnostics/PMC)",
        0xD404 => "maximum number of nodes reached, no more logons possible for diagnostics/PMC",
        0xD405 => "service not supported or syntax error in function parameters",
        0xD406 => "required information currently unavailable",
        0xD407 => "diagnostics error occurred",
        0xD408 => "update aborted",
        0xD409 => "error on DP bus",
        0xD601 => "syntax error in function parameter",
        0xD602 => "incorrect password entered",
        0xD603 => "the connection has already been legitimized",
        0xD604 => "the connection has already been enabled",
        0xD605 => "legitimization not possible because password does not exist",
        0xD801 => "at least one tag address is invalid",
        0xD802 => "specified job does not exist",
        0xD803 => "illegal job status",
        0xD804 => "illegal cycle time (illegal time base or multiple)",
        0xD805 => "no more cyclic read jobs can be set up",
        0xD806 => "the referenced job is in a state in which the requested function cannot be performed",
        0xD807 => "function aborted due to overload, meaning executing the read cycle takes longer than the set scan cycle time",
        0xDC01 => "date and/or time invalid",
        0xE201 => "CPU is already the master",
        0xE202 => "connect and update not possible due to different user program in flash module",
        0xE203 => "connect and update not possible due to different firmware",
        0xE204 => "connect and update not possible due to different memory configuration",
        0xE205 => "connect/update aborted due to synchronization error",
        0xE206 => "connect/update denied due to coordination violation",
        0xEF01 => "S7 protocol error: error at ID2, only 00H permitted in job",
        0xEF02 => "S7 protocol error: error at ID2, set of resources does not exist",
        _ => match (code >> 8) as u8 {
            0x81 => "unknown error code (application relationship)",
            0x82 => "unknown error code (object definition)",
            0x83 => "unknown error code (no resources available)",
            0x84 => "unknown error code (error on service processing)",
            0x85 => "unknown error code (error on supplies)",
            0x87 => "unknown error code (access error)",
            _ => "unknown error code",
        },
    }
}

/// ### Extracts the S7 header error from a response telegram
///
/// The S7 header starts right after the TPKT + COTP prefix.
/// - ROSCTR 1 (Job) or 7 (Userdata): the code sits at header bytes 2..4
/// - ROSCTR 2 (Ack) or 3 (AckData): the code sits at header bytes 10..12
/// - anything else: no protocol-level error is present
///
/// A zero pair is "no error".
pub fn response_error(response: &ProtocolDataUnit) -> Result<()> {
    let header = response.data.get(ISO_HEADER_LEN..).unwrap_or(&[]);

    let at = match header.get(1) {
        Some(1) | Some(7) => 2,
        Some(2) | Some(3) => 10,
        _ => return Ok(()),
    };

    let code = match header.get(at..at + 2) {
        Some(pair) => S7ErrorCode::new(pair[0], pair[1]),
        None => {
            return Err(S7Error::InvalidPdu(format!(
                "S7 header truncated: {} bytes, error code expected at {}",
                header.len(),
                at
            )))
        }
    };

    if code.is_ok() {
        Ok(())
    } else {
        warn!(code = code.code(), "PLC reported {}", code);
        Err(S7Error::Plc(code))
    }
}
