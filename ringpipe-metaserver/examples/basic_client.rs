/// Example client demonstrating the metadata directory wire protocol.
///
/// Usage:
///   1. Start the directory:
///      cargo run -p ringpipe-metaserver -- --addr 127.0.0.1:9998
///   2. Run this example:
///      cargo run -p ringpipe-metaserver --example basic_client
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use ringpipe_proto::{Request, Response};

fn roundtrip(addr: &str, request: &Request) -> Result<Response, Box<dyn std::error::Error>> {
    let stream = TcpStream::connect(addr)?;
    let mut writer = stream.try_clone()?;
    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    writer.write_all(line.as_bytes())?;

    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply)?;
    Ok(serde_json::from_str(reply.trim())?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = "127.0.0.1:9998";
    println!("Talking to metadata directory at {addr}");

    println!("\n1. Publishing a key...");
    let resp = roundtrip(
        addr,
        &Request::Set {
            key: "example_key".to_string(),
            value: "example_value".to_string(),
        },
    )?;
    println!("   SET response: {resp:?}");

    println!("\n2. Retrieving it back...");
    let resp = roundtrip(
        addr,
        &Request::Get {
            key: "example_key".to_string(),
        },
    )?;
    println!("   GET response: {resp:?}");

    println!("\n3. Retrieving a missing key...");
    let resp = roundtrip(
        addr,
        &Request::Get {
            key: "never_published".to_string(),
        },
    )?;
    println!("   GET response: {resp:?}");

    println!("\n4. Clearing the directory...");
    let resp = roundtrip(addr, &Request::Clear)?;
    println!("   CLEAR response: {resp:?}");

    Ok(())
}
