// Rust7 - Native Rust S7 client (Snap7‑style) for Siemens PLCs.
// Copyright 2025 - Davide Nardella

//! Symbolic S7 addresses (`DB10.DBW4`, `MX2.1`, `T12`, ...).

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::area::{S7_AREA_CT, S7_AREA_DB, S7_AREA_MK, S7_AREA_PA, S7_AREA_PE, S7_AREA_TM};
use crate::error::{Result, S7Error};

/// Bit masks indexed by bit number
pub const BIT_MASK: [u8; 8] = [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80];

const MAX_BYTE_ADDRESS: u32 = 2_097_151; // (2^24 - 1) / 8

static DB_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^DB(\d+)\.DB([BWDX])(\d+)(?:\.(-?\d+))?$").unwrap());
static IO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([EIAOM])([BWDX]?)(\d+)(?:\.(-?\d+))?$").unwrap());
static TC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([TZC])(\d+)$").unwrap());

/// What a symbolic address points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    Bit,
    Byte,
    Word,
    DWord,
    Timer,
    Counter,
}

impl AddressKind {
    /// Bytes read for this kind (timers and counters are elements)
    pub fn size(&self) -> usize {
        match self {
            AddressKind::Bit | AddressKind::Byte => 1,
            AddressKind::Word | AddressKind::Timer | AddressKind::Counter => 2,
            AddressKind::DWord => 4,
        }
    }
}

/// A parsed symbolic address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7Address {
    pub area: u8,
    /// DB number when `area == S7_AREA_DB`, else 0
    pub db_number: u16,
    pub kind: AddressKind,
    /// Byte offset, or element number for timers and counters
    pub offset: u32,
    /// Bit index 0..=7 for `AddressKind::Bit`, else 0
    pub bit: u8,
}

/// A value read from or written to a symbolic address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7Value {
    Bit(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    Timer(u16),
    Counter(u16),
}

impl S7Value {
    pub fn kind(&self) -> AddressKind {
        match self {
            S7Value::Bit(_) => AddressKind::Bit,
            S7Value::Byte(_) => AddressKind::Byte,
            S7Value::Word(_) => AddressKind::Word,
            S7Value::DWord(_) => AddressKind::DWord,
            S7Value::Timer(_) => AddressKind::Timer,
            S7Value::Counter(_) => AddressKind::Counter,
        }
    }
}

impl fmt::Display for S7Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            S7Value::Bit(v) => write!(f, "{}", v),
            S7Value::Byte(v) => write!(f, "{:#04x}", v),
            S7Value::Word(v) => write!(f, "{:#06x}", v),
            S7Value::DWord(v) => write!(f, "{:#010x}", v),
            S7Value::Timer(v) | S7Value::Counter(v) => write!(f, "{}", v),
        }
    }
}

/// ### Parses a symbolic address
///
/// Case-insensitive, whitespace is ignored.
/// - `DB<n>.DBB<i>`, `DB<n>.DBW<i>`, `DB<n>.DBD<i>`, `DB<n>.DBX<i>.<bit>`
/// - `E`/`I` inputs, `A`/`O` outputs, `M` merkers: `MB<i>`, `MW<i>`, `MD<i>`, `MX<i>.<bit>` or `M<i>.<bit>`
/// - `T<n>` timers, `Z<n>`/`C<n>` counters
pub fn parse_address(input: &str) -> Result<S7Address> {
    let s: String = input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if s.is_empty() {
        return Err(S7Error::InvalidAddress(
            "input variable is empty, variable should be S7 syntax".into(),
        ));
    }

    if s.starts_with("DB") {
        let caps = DB_RE
            .captures(&s)
            .ok_or_else(|| S7Error::InvalidAddress(format!("malformed DB address '{}'", input)))?;
        let db_number = parse_number(&caps[1], input)?;
        let db_number = u16::try_from(db_number)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| S7Error::InvalidAddress(format!("DB number out of range in '{}'", input)))?;
        return typed(S7_AREA_DB, db_number, &caps[2], &caps[3], caps.get(4).map(|m| m.as_str()), input);
    }

    if let Some(caps) = TC_RE.captures(&s) {
        let number = parse_number(&caps[2], input)?;
        let offset = u16::try_from(number)
            .map_err(|_| S7Error::InvalidAddress(format!("element out of range in '{}'", input)))?;
        let (area, kind) = if &caps[1] == "T" {
            (S7_AREA_TM, AddressKind::Timer)
        } else {
            (S7_AREA_CT, AddressKind::Counter)
        };
        return Ok(S7Address {
            area,
            db_number: 0,
            kind,
            offset: offset as u32,
            bit: 0,
        });
    }

    if let Some(caps) = IO_RE.captures(&s) {
        let area = match &caps[1] {
            "E" | "I" => S7_AREA_PE,
            "A" | "O" => S7_AREA_PA,
            _ => S7_AREA_MK,
        };
        return typed(area, 0, &caps[2], &caps[3], caps.get(4).map(|m| m.as_str()), input);
    }

    Err(S7Error::InvalidAddress(format!("unknown area in '{}'", input)))
}

impl FromStr for S7Address {
    type Err = S7Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_address(s)
    }
}

// `size` is one of "", "B", "W", "D", "X"; an empty size means bit form
fn typed(area: u8, db_number: u16, size: &str, offset: &str, bit: Option<&str>, input: &str) -> Result<S7Address> {
    let offset = parse_number(offset, input)?;
    if offset > MAX_BYTE_ADDRESS {
        return Err(S7Error::InvalidAddress(format!("byte offset out of range in '{}'", input)));
    }
    let kind = match size {
        "B" => AddressKind::Byte,
        "W" => AddressKind::Word,
        "D" => AddressKind::DWord,
        _ => AddressKind::Bit,
    };
    let bit = match (kind, bit) {
        (AddressKind::Bit, Some(b)) => check_bit(b, input)?,
        (AddressKind::Bit, None) => {
            return Err(S7Error::InvalidAddress(format!("missing bit index in '{}'", input)))
        }
        (_, Some(_)) => {
            return Err(S7Error::InvalidAddress(format!("bit index not allowed in '{}'", input)))
        }
        (_, None) => 0,
    };
    Ok(S7Address {
        area,
        db_number,
        kind,
        offset,
        bit,
    })
}

fn parse_number(digits: &str, input: &str) -> Result<u32> {
    digits
        .parse::<u32>()
        .map_err(|_| S7Error::InvalidAddress(format!("number '{}' out of range in '{}'", digits, input)))
}

fn check_bit(bit: &str, input: &str) -> Result<u8> {
    match bit.parse::<i32>() {
        Ok(b) if (0..=7).contains(&b) => Ok(b as u8),
        _ => Err(S7Error::InvalidAddress(format!(
            "bit index '{}' out of range 0..7 in '{}'",
            bit, input
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(input: &str) -> S7Address {
        match parse_address(input) {
            Ok(a) => a,
            Err(e) => panic!("parse_address failed for '{input}': {e:?}"),
        }
    }

    #[test]
    fn db_addresses() {
        assert_eq!(
            addr("DB1.DBX3.2"),
            S7Address { area: S7_AREA_DB, db_number: 1, kind: AddressKind::Bit, offset: 3, bit: 2 }
        );
        assert_eq!(
            addr("DB1.DBW4"),
            S7Address { area: S7_AREA_DB, db_number: 1, kind: AddressKind::Word, offset: 4, bit: 0 }
        );
        assert_eq!(addr("db10.dbb7").kind, AddressKind::Byte);
        assert_eq!(addr(" DB 10 . DBD 8 ").kind, AddressKind::DWord);
        assert_eq!(addr("DB10.DBD8").db_number, 10);
    }

    #[test]
    fn io_and_merker_addresses() {
        let a = addr("EB2");
        assert_eq!((a.area, a.kind, a.offset), (S7_AREA_PE, AddressKind::Byte, 2));
        let a = addr("IW4");
        assert_eq!((a.area, a.kind, a.offset), (S7_AREA_PE, AddressKind::Word, 4));
        let a = addr("AD8");
        assert_eq!((a.area, a.kind, a.offset), (S7_AREA_PA, AddressKind::DWord, 8));
        let a = addr("O0.1");
        assert_eq!((a.area, a.kind, a.offset, a.bit), (S7_AREA_PA, AddressKind::Bit, 0, 1));
        let a = addr("MX10.7");
        assert_eq!((a.area, a.kind, a.offset, a.bit), (S7_AREA_MK, AddressKind::Bit, 10, 7));
        let a = addr("m5.0");
        assert_eq!((a.area, a.kind, a.offset, a.bit), (S7_AREA_MK, AddressKind::Bit, 5, 0));
    }

    #[test]
    fn timers_and_counters() {
        let t = addr("T12");
        assert_eq!((t.area, t.kind, t.offset), (S7_AREA_TM, AddressKind::Timer, 12));
        let z = addr("Z3");
        assert_eq!((z.area, z.kind, z.offset), (S7_AREA_CT, AddressKind::Counter, 3));
        let c = addr("c 4");
        assert_eq!((c.area, c.kind, c.offset), (S7_AREA_CT, AddressKind::Counter, 4));
    }

    #[test]
    fn bit_index_range() {
        assert!(matches!(parse_address("DB1.DBX3.8"), Err(S7Error::InvalidAddress(_))));
        assert!(matches!(parse_address("DB1.DBX3.-1"), Err(S7Error::InvalidAddress(_))));
        assert!(matches!(parse_address("M3.9"), Err(S7Error::InvalidAddress(_))));
        assert_eq!(addr("DB1.DBX3.7").bit, 7);
    }

    #[test]
    fn malformed_input() {
        for bad in [
            "", "   ", "DB", "DB1", "DB1.", "DB1.DBQ4", "DB1.DBX3", "DB1.DBW4.1", "DB0.DBB0",
            "DB70000.DBB0", "DBX.DBB1", "MW", "MX1", "T", "Tx", "X12", "P10", "DB1.DBB99999999999",
        ] {
            assert!(
                matches!(parse_address(bad), Err(S7Error::InvalidAddress(_))),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn from_str_and_value_kinds() {
        let a: S7Address = "MW10".parse().unwrap();
        assert_eq!(a.kind, S7Value::Word(0).kind());
        assert_eq!(AddressKind::DWord.size(), 4);
        assert_eq!(S7Value::Word(0x1234).to_string(), "0x1234");
    }
}
