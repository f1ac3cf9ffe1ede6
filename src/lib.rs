#![doc = include_str!("../README.md")]

pub mod address;
pub mod area;
pub mod client;
pub mod error;
pub mod nck;
pub mod pdu;
pub mod tcp;
pub mod transport;

pub use address::{parse_address, AddressKind, S7Address, S7Value};
pub use area::{
    S7_AREA_CT, S7_AREA_DB, S7_AREA_MK, S7_AREA_PA, S7_AREA_PE, S7_AREA_TM,
    S7_WL_BIT, S7_WL_BYTE, S7_WL_CHAR, S7_WL_COUNTER, S7_WL_DINT, S7_WL_DWORD, S7_WL_INT, S7_WL_REAL,
    S7_WL_TIMER, S7_WL_WORD,
};
pub use client::S7Client;
pub use error::{Result, S7Error, S7ErrorCode};
pub use nck::{S7NckAddrItem, S7NckDataItem};
pub use pdu::ProtocolDataUnit;
pub use tcp::{TcpClientConfig, TcpClientHandler, CT_OP, CT_PG, CT_S7};
pub use transport::{ClientHandler, Packager, PduLength, Transporter};
