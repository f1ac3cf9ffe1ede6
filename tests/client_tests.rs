// Rust7 - Native Rust S7 client (Snap7‑style) for Siemens PLCs.
// Copyright 2025 - Davide Nardella

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};

use rust7_nck::{
    Packager, PduLength, Result, S7Client, S7Error, S7NckAddrItem, S7NckDataItem, S7Value, Transporter,
    S7_AREA_CT, S7_AREA_DB, S7_AREA_MK, S7_AREA_PA, S7_AREA_PE, S7_AREA_TM, S7_WL_BIT, S7_WL_BYTE,
    S7_WL_DWORD, S7_WL_REAL, S7_WL_WORD,
};

const AREA_SIZE: usize = 65536;

/// In-memory PLC answering area and NC telegrams
struct MockPlc {
    pdu_length: usize,
    negotiated: usize,
    memory: HashMap<(u8, u16), Vec<u8>>,
    nc: HashMap<(u8, u16, u16, u8), Vec<u8>>,
    requests: Vec<Vec<u8>>,
    /// (request index, item status) to answer with a CPU error
    fail_item: Option<(usize, u8)>,
    /// Error class and code put in the S7 header
    header_error: Option<(u8, u8)>,
    truncate_nc: bool,
}

impl MockPlc {
    fn new(pdu_length: usize) -> Self {
        MockPlc {
            pdu_length,
            negotiated: 0,
            memory: HashMap::new(),
            nc: HashMap::new(),
            requests: Vec::new(),
            fail_item: None,
            header_error: None,
            truncate_nc: false,
        }
    }

    fn area(&mut self, area: u8, db_number: u16) -> &mut Vec<u8> {
        let key = if area == S7_AREA_DB { (area, db_number) } else { (area, 0) };
        self.memory.entry(key).or_insert_with(|| vec![0u8; AREA_SIZE])
    }

    fn ack(&self, request: &[u8], params: [u8; 2], data: &[u8]) -> Vec<u8> {
        let (class, code) = self.header_error.unwrap_or((0, 0));
        let len = 21 + data.len();
        let mut response = vec![
            0x03, 0x00, (len >> 8) as u8, len as u8, 0x02, 0xf0, 0x80, // TPKT + COTP
            0x32, 0x03, 0x00, 0x00, request[11], request[12], // AckData, PDU reference
            0x00, 0x02, (data.len() >> 8) as u8, data.len() as u8, class, code,
        ];
        response.extend_from_slice(&params);
        response.extend_from_slice(data);
        response
    }

    fn area_telegram(&mut self, request: &[u8], index: usize) -> Vec<u8> {
        let function = request[17];
        let word_len = request[22];
        let count = BigEndian::read_u16(&request[23..25]) as usize;
        let db_number = BigEndian::read_u16(&request[25..27]);
        let area = request[27];
        let address = ((request[28] as usize) << 16) | ((request[29] as usize) << 8) | request[30] as usize;
        let params = [function, 0x01];

        if let Some((at, status)) = self.fail_item {
            if at == index {
                let data = if function == 0x04 { vec![status, 0x00, 0x00, 0x00] } else { vec![status] };
                return self.ack(request, params, &data);
            }
        }

        let (offset, size) = match word_len {
            0x01 => (address / 8, 1),
            0x1C | 0x1D => (address * 2, count * 2),
            _ => (address >> 3, count),
        };

        if function == 0x04 {
            let memory = self.area(area, db_number);
            let (ts, payload) = if word_len == 0x01 {
                (0x03, vec![(memory[offset] >> (address % 8)) & 0x01])
            } else {
                (0x04, memory[offset..offset + size].to_vec())
            };
            let mut data = vec![0xFF, ts];
            data.extend_from_slice(&((payload.len() << 3) as u16).to_be_bytes());
            data.extend_from_slice(&payload);
            self.ack(request, params, &data)
        } else {
            let payload = request[35..].to_vec();
            let memory = self.area(area, db_number);
            if word_len == 0x01 {
                let mask = 1u8 << (address % 8);
                if payload[0] != 0 {
                    memory[offset] |= mask;
                } else {
                    memory[offset] &= !mask;
                }
            } else {
                memory[offset..offset + size].copy_from_slice(&payload);
            }
            self.ack(request, params, &[0xFF])
        }
    }

    fn nc_telegram(&mut self, request: &[u8]) -> Vec<u8> {
        let function = request[17];
        let count = request[18] as usize;
        let keys: Vec<(u8, u16, u16, u8)> = (0..count)
            .map(|i| {
                let item = &request[19 + i * 10..29 + i * 10];
                (item[3], BigEndian::read_u16(&item[4..6]), BigEndian::read_u16(&item[6..8]), item[8])
            })
            .collect();
        let params = [function, count as u8];

        if function == 0x04 {
            let mut data = Vec::new();
            for key in &keys {
                let value = self.nc.get(key).cloned().unwrap_or_else(|| vec![0u8; 8]);
                data.extend_from_slice(&[0xFF, 0x09]);
                data.extend_from_slice(&(value.len() as u16).to_be_bytes());
                data.extend_from_slice(&value);
            }
            let mut response = self.ack(request, params, &data);
            if self.truncate_nc {
                response.pop();
            }
            response
        } else {
            let mut offset = 19 + count * 10;
            for key in keys {
                let len = BigEndian::read_u16(&request[offset + 2..offset + 4]) as usize;
                self.nc.insert(key, request[offset + 4..offset + 4 + len].to_vec());
                offset += 4 + len;
            }
            self.ack(request, params, &vec![0xFF; count])
        }
    }
}

impl Transporter for MockPlc {
    fn connect(&mut self) -> Result<()> {
        self.negotiated = self.pdu_length;
        Ok(())
    }

    fn close(&mut self) {
        self.negotiated = 0;
    }

    fn send(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        if self.negotiated == 0 {
            return Err(S7Error::NotConnected);
        }
        let index = self.requests.len();
        self.requests.push(request.to_vec());
        match request[21] {
            0x10 => Ok(self.area_telegram(request, index)),
            0x82 => Ok(self.nc_telegram(request)),
            other => panic!("unexpected syntax id {:#04x}", other),
        }
    }
}

impl Packager for MockPlc {
    fn verify(&self, request: &[u8], response: &[u8]) -> Result<()> {
        if response.len() < 13 || request[11..13] != response[11..13] {
            return Err(S7Error::IsoInvalidTelegram);
        }
        Ok(())
    }
}

impl PduLength for MockPlc {
    fn negotiated_pdu_length(&self) -> usize {
        self.negotiated
    }
}

fn connected(pdu_length: usize) -> S7Client<MockPlc> {
    let mut client = S7Client::new(MockPlc::new(pdu_length));
    client.connect().unwrap();
    client
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn db_round_trip_is_chunked() {
    let mut client = connected(240);
    let data = pattern(1000);

    client.ag_write_db(10, 3, data.len(), &data).unwrap();
    assert_eq!(client.chunks, 1000usize.div_ceil(240 - 35));

    let mut buffer = vec![0u8; 1000];
    client.ag_read_db(10, 3, buffer.len(), &mut buffer).unwrap();
    assert_eq!(client.chunks, 1000usize.div_ceil(240 - 18));
    assert_eq!(buffer, data);
    assert_eq!(&client.handler_mut().area(S7_AREA_DB, 10)[3..1003], &data[..]);
    assert_eq!(client.handler_mut().area(S7_AREA_DB, 11)[3], 0);
}

#[test]
fn chunk_count_follows_pdu_length() {
    for pdu_length in [240usize, 480, 960] {
        let mut client = connected(pdu_length);
        for amount in [1usize, 222, 223, 1000] {
            let mut buffer = vec![0u8; amount];
            client.ag_read_mb(0, amount, &mut buffer).unwrap();
            assert_eq!(client.chunks, amount.div_ceil(pdu_length - 18));
        }
    }
}

#[test]
fn huge_pdu_still_encodes_exact_lengths() {
    let mut client = connected(10_000);
    let data = pattern(9000);

    client.ag_write_db(2, 0, data.len(), &data).unwrap();
    assert_eq!(client.chunks, 2);
    let first = &client.handler().requests[0];
    assert_eq!(BigEndian::read_u16(&first[33..35]) as usize, 8191 * 8);
    assert_eq!(BigEndian::read_u16(&first[2..4]) as usize, first.len());

    let mut buffer = vec![0u8; 9000];
    client.ag_read_db(2, 0, buffer.len(), &mut buffer).unwrap();
    assert_eq!(client.chunks, 2);
    assert_eq!(buffer, data);
}

#[test]
fn word_lengths_are_flattened() {
    let mut client = connected(240);
    let data = pattern(600);

    client.write_area(S7_AREA_DB, 1, 0, 300, S7_WL_WORD, &data).unwrap();
    let mut buffer = vec![0u8; 600];
    client.read_area(S7_AREA_DB, 1, 0, 150, S7_WL_DWORD, &mut buffer).unwrap();
    assert_eq!(buffer, data);
    assert_eq!(client.chunks, 3);

    let first = &client.handler().requests[client.handler().requests.len() - 3];
    assert_eq!(first[22], S7_WL_BYTE);
    assert_eq!(&first[23..25], &[0x00, 222]);

    let mut reals = vec![0u8; 8];
    client.read_area(S7_AREA_DB, 1, 4, 2, S7_WL_REAL, &mut reals).unwrap();
    assert_eq!(&reals[..], &data[4..12]);
}

#[test]
fn inputs_outputs_and_merkers() {
    let mut client = connected(480);
    client.ag_write_eb(2, 3, &[1, 2, 3]).unwrap();
    client.ag_write_ab(0, 2, &[0xAA, 0xBB]).unwrap();
    client.ag_write_mb(100, 1, &[0x42]).unwrap();

    let mut buffer = [0u8; 3];
    client.ag_read_eb(2, 3, &mut buffer).unwrap();
    assert_eq!(buffer, [1, 2, 3]);
    client.ag_read_ab(0, 2, &mut buffer[..2]).unwrap();
    assert_eq!(&buffer[..2], &[0xAA, 0xBB]);
    client.ag_read_mb(100, 1, &mut buffer[..1]).unwrap();
    assert_eq!(buffer[0], 0x42);

    assert_eq!(client.handler_mut().area(S7_AREA_PE, 0)[2..5], [1, 2, 3]);
    assert_eq!(client.handler_mut().area(S7_AREA_PA, 0)[0..2], [0xAA, 0xBB]);
    assert_eq!(client.handler_mut().area(S7_AREA_MK, 0)[100], 0x42);
}

#[test]
fn bits_travel_alone() {
    let mut client = connected(240);
    client.handler_mut().area(S7_AREA_DB, 1)[3] = 0x81;

    client.write_bit(S7_AREA_DB, 1, 3, 2, true).unwrap();
    assert_eq!(client.chunks, 1);
    assert_eq!(client.handler_mut().area(S7_AREA_DB, 1)[3], 0x85);

    let request = client.handler().requests.last().unwrap().clone();
    assert_eq!(request[22], S7_WL_BIT);
    assert_eq!(&request[23..25], &[0x00, 0x01]);
    assert_eq!(&request[28..31], &[0x00, 0x00, 26]);
    assert_eq!(request[32], 3);

    assert!(client.read_bit(S7_AREA_DB, 1, 3, 2).unwrap());
    assert!(!client.read_bit(S7_AREA_DB, 1, 3, 1).unwrap());

    // Amount is ignored for bits
    let mut buffer = [0u8; 1];
    client.read_area(S7_AREA_DB, 1, 3 * 8 + 7, 40, S7_WL_BIT, &mut buffer).unwrap();
    assert_eq!(client.chunks, 1);
    assert_eq!(buffer[0], 1);
}

#[test]
fn cpu_error_keeps_previous_chunks() {
    let mut client = connected(240);
    client.handler_mut().area(S7_AREA_DB, 5)[..500].copy_from_slice(&pattern(500));
    client.handler_mut().fail_item = Some((1, 0x0A));

    let mut buffer = vec![0xEEu8; 500];
    match client.ag_read_db(5, 0, 500, &mut buffer) {
        Err(S7Error::Cpu { code, text, chunk, start, size }) => {
            assert_eq!((code, chunk, start, size), (0x0A, 1, 222, 222));
            assert_eq!(text, "object does not exist");
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(client.chunks, 2);
    assert_eq!(&buffer[..222], &pattern(500)[..222]);
    assert!(buffer[222..].iter().all(|b| *b == 0xEE));
}

#[test]
fn cpu_error_on_write() {
    let mut client = connected(240);
    client.handler_mut().fail_item = Some((0, 0x05));
    assert!(matches!(
        client.ag_write_db(1, 0, 4, &[1, 2, 3, 4]),
        Err(S7Error::Cpu { code: 0x05, .. })
    ));
    assert_eq!(client.handler_mut().area(S7_AREA_DB, 1)[..4], [0, 0, 0, 0]);
}

#[test]
fn header_error_is_decoded() {
    let mut client = connected(240);
    client.handler_mut().header_error = Some((0x81, 0x04));
    let mut buffer = [0u8; 2];
    match client.ag_read_db(1, 0, 2, &mut buffer) {
        Err(S7Error::Plc(code)) => assert_eq!(code.code(), 0x8104),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn timers_and_counters_are_host_values() {
    let mut client = connected(240);
    client.ag_write_tm(5, 3, &[0x1234, 0x0002, 0xABCD]).unwrap();
    assert_eq!(client.handler_mut().area(S7_AREA_TM, 0)[10..12], [0x34, 0x12]);

    let request = client.handler().requests.last().unwrap().clone();
    assert_eq!(request[22], 0x1D);
    assert_eq!(&request[28..31], &[0x00, 0x00, 5]);
    assert_eq!(request[32], 9);
    assert_eq!(&request[33..35], &[0x00, 6]);

    let mut timers = [0u16; 3];
    client.ag_read_tm(5, 3, &mut timers).unwrap();
    assert_eq!(timers, [0x1234, 0x0002, 0xABCD]);

    client.ag_write_ct(0, 2, &[7, 0x0100]).unwrap();
    let mut counters = [0u16; 2];
    client.ag_read_ct(0, 2, &mut counters).unwrap();
    assert_eq!(counters, [7, 0x0100]);
    assert_eq!(client.handler_mut().area(S7_AREA_CT, 0)[..4], [7, 0, 0, 1]);
}

#[test]
fn many_timers_are_chunked_by_element() {
    let mut client = connected(240);
    let values: Vec<u16> = (0..300).collect();
    client.ag_write_tm(0, values.len(), &values).unwrap();
    assert_eq!(client.chunks, 300usize.div_ceil((240 - 35) / 2));

    let mut back = vec![0u16; 300];
    client.ag_read_tm(0, back.len(), &mut back).unwrap();
    assert_eq!(client.chunks, 3);
    assert_eq!(back, values);
}

#[test]
fn nc_items_round_trip() {
    let mut client = connected(480);
    let position = S7NckAddrItem { area: 2, unit: 1, column: 2, line: 1, module: 0x74 };
    let feed = S7NckAddrItem { area: 4, unit: 1, column: 0x20, line: 3, module: 0x1A };

    let codes = client
        .ag_write_multi_nck(&[position, feed], &[S7NckDataItem::from_f64(12.5), S7NckDataItem::new(vec![1, 2, 3])])
        .unwrap();
    assert_eq!(codes, vec![0xFF, 0xFF]);
    assert_eq!(client.chunks, 1);

    let request = client.handler().requests.last().unwrap().clone();
    assert_eq!(request[17], 0x05);
    assert_eq!(request[18], 2);
    assert_eq!(&request[19..29], &[0x12, 0x08, 0x82, 0x41, 0x00, 0x02, 0x00, 0x01, 0x74, 0x01]);

    let items = client.ag_read_multi_nck(&[feed, position]).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].data, vec![1, 2, 3]);
    assert_eq!(items[0].return_code, 0xFF);
    assert_eq!(items[1].as_f64(), Some(12.5));

    let single = client.ag_read_nck(&position).unwrap();
    assert_eq!(single.as_f64(), Some(12.5));
    assert_eq!(client.ag_write_nck(&feed, &S7NckDataItem::new(vec![9])).unwrap(), 0xFF);
}

#[test]
fn truncated_nc_reply_is_an_error() {
    let mut client = connected(480);
    client.handler_mut().truncate_nc = true;
    let item = S7NckAddrItem { area: 2, unit: 1, column: 2, line: 1, module: 0x74 };
    assert!(matches!(client.ag_read_nck(&item), Err(S7Error::NckParse(_))));
}

#[test]
fn symbolic_variables() {
    let mut client = connected(240);

    client.write("DB1.DBW4", S7Value::Word(0xBEEF)).unwrap();
    assert_eq!(client.handler_mut().area(S7_AREA_DB, 1)[4..6], [0xBE, 0xEF]);
    assert_eq!(client.read("DB1.DBW4").unwrap(), S7Value::Word(0xBEEF));

    client.handler_mut().area(S7_AREA_DB, 1)[3] = 0x01;
    client.write("DB1.DBX3.2", S7Value::Bit(true)).unwrap();
    assert_eq!(client.handler_mut().area(S7_AREA_DB, 1)[3], 0x05);
    assert_eq!(client.read("db1.dbx3.2").unwrap(), S7Value::Bit(true));
    assert_eq!(client.read("DB1.DBX3.1").unwrap(), S7Value::Bit(false));

    client.write("MD8", S7Value::DWord(0x0102_0304)).unwrap();
    assert_eq!(client.read("MD8").unwrap(), S7Value::DWord(0x0102_0304));
    assert_eq!(client.read("MB9").unwrap(), S7Value::Byte(0x02));
    assert_eq!(client.read("M8.0").unwrap(), S7Value::Bit(true));

    client.write("AB1", S7Value::Byte(0x7F)).unwrap();
    assert_eq!(client.read("OB1").unwrap(), S7Value::Byte(0x7F));

    client.handler_mut().area(S7_AREA_PE, 0)[0] = 0x80;
    assert_eq!(client.read("I0.7").unwrap(), S7Value::Bit(true));
    assert_eq!(client.read("EW0").unwrap(), S7Value::Word(0x8000));

    client.write("T2", S7Value::Timer(0x0310)).unwrap();
    assert_eq!(client.read("T2").unwrap(), S7Value::Timer(0x0310));
    client.write("Z1", S7Value::Counter(42)).unwrap();
    assert_eq!(client.read("C1").unwrap(), S7Value::Counter(42));

    assert!(matches!(client.read("DB1.DBX3.8"), Err(S7Error::InvalidAddress(_))));
}

#[test]
fn pdu_too_small_sends_nothing() {
    let mut client = connected(35);
    assert!(matches!(
        client.ag_write_db(1, 0, 10, &[0u8; 10]),
        Err(S7Error::PduLengthTooSmall { pdu_length: 35, overhead: 35, width: 1 })
    ));
    assert!(client.handler().requests.is_empty());
}

#[test]
fn disconnected_client_refuses_work() {
    let mut client = connected(240);
    client.disconnect();
    let mut buffer = [0u8; 1];
    assert!(matches!(client.ag_read_mb(0, 1, &mut buffer), Err(S7Error::NotConnected)));
    client.connect().unwrap();
    assert!(client.ag_read_mb(0, 1, &mut buffer).is_ok());
}
