// Rust7 - Native Rust S7 client (Snap7‑style) for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! Collaborators consumed by the protocol engine.
//!
//! The engine never touches a socket: it hands complete telegrams to a
//! [`Transporter`], lets a [`Packager`] check that the answer belongs to the
//! request, and reads the negotiated PDU size through [`PduLength`].

use crate::error::Result;

/// Moves whole telegrams to and from the PLC.
pub trait Transporter {
    /// Opens the session (TCP + ISO connection + PDU negotiation)
    fn connect(&mut self) -> Result<()>;

    /// Closes the session. Safe to call when not connected.
    fn close(&mut self);

    /// One blocking round trip: sends `request`, returns the whole response telegram
    fn send(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}

/// Checks that a response correlates to its request.
pub trait Packager {
    fn verify(&self, request: &[u8], response: &[u8]) -> Result<()>;
}

/// Exposes the PDU length agreed during session setup.
pub trait PduLength {
    /// Negotiated PDU length in bytes, 0 when not negotiated yet
    fn negotiated_pdu_length(&self) -> usize;
}

/// Everything an `S7Client` needs from its backend.
pub trait ClientHandler: Transporter + Packager + PduLength {}

impl<T: Transporter + Packager + PduLength> ClientHandler for T {}
