use rust7_nck::{
    S7Client, S7NckAddrItem, S7NckDataItem, S7Value, TcpClientConfig, TcpClientHandler, S7_AREA_DB,
};
use tracing_subscriber::EnvFilter;

fn main() {
    // RUST_LOG=rust7_nck=debug shows every telegram
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let db_number: u16 = 100; // Must exist into the PLC

    let mut config = TcpClientConfig::new("192.168.0.100", 0, 1);
    config.set_timeout(2000, 0, 0);
    let mut client = S7Client::new(TcpClientHandler::new(config));

    match client.connect() {
        Ok(_) => {
            println!("Connected to PLC");
            println!("PDU negotiated: {} byte", client.pdu_length());
            println!("Job time (ms) : {:.3}", client.last_time);
        }
        Err(e) => {
            eprintln!("Connection failed: {}", e);
            return;
        }
    }

    // Reads 462 byte from DB100
    println!();
    println!("Attempt to read 462 byte from DB100");
    let mut read_buffer = vec![0u8; 462];
    match client.ag_read_db(db_number, 0, read_buffer.len(), &mut read_buffer) {
        Ok(_) => {
            println!("Success!");
            println!("Job time (ms) : {:.3}", client.last_time);
            println!("Chunks        : {}", client.chunks);
            println!("Data read:");
            for (i, chunk) in read_buffer.chunks(32).enumerate() {
                print!("{:04X}: ", i * 32); // Hex Offset
                for byte in chunk {
                    print!("{:02X} ", byte);
                }
                println!();
            }
        }
        Err(e) => eprintln!("Read failed: {}", e),
    }

    // Writes 1024 byte to DB100
    println!();
    println!("Attempt to write 1024 byte to DB100");
    let write_data: Vec<u8> = (0..1024).map(|i| (i % 256) as u8).collect();
    match client.ag_write_db(db_number, 0, write_data.len(), &write_data) {
        Ok(_) => {
            println!("Success!");
            println!("Job time (ms) : {:.3}", client.last_time);
            println!("Chunks        : {}", client.chunks);
        }
        Err(e) => eprintln!("Write failed: {}", e),
    }

    // Bits, by number and by name
    println!();
    println!("Attempt to write 'false' into DB100.DBX16.0");
    if let Err(e) = client.write_bit(S7_AREA_DB, db_number, 16, 0, false) {
        eprintln!("Write failed: {}", e);
    }
    for variable in ["DB100.DBX45.5", "DB100.DBW4", "MW10", "T3", "Z1"] {
        match client.read(variable) {
            Ok(value) => println!("{:<14}: {}", variable, value),
            Err(e) => eprintln!("{:<14}: {}", variable, e),
        }
    }
    if let Err(e) = client.write("DB100.DBD8", S7Value::DWord(0xCAFE_0001)) {
        eprintln!("Write failed: {}", e);
    }

    // NC-unit: R-parameter 1 of channel 1 (Sinumerik)
    println!();
    let r_param = S7NckAddrItem {
        area: 2,
        unit: 1,
        column: 1,
        line: 2,
        module: 0x15,
    };
    match client.ag_write_nck(&r_param, &S7NckDataItem::from_f64(3.25)) {
        Ok(code) => println!("NC write return code: {:#04X}", code),
        Err(e) => eprintln!("NC write failed: {}", e),
    }
    match client.ag_read_nck(&r_param) {
        Ok(item) => println!("R1 = {:?}", item.as_f64()),
        Err(e) => eprintln!("NC read failed: {}", e),
    }

    client.disconnect();
    println!();
    println!("Disconnected");
}
