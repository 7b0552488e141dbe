//! Framed echo server.
//!
//! Accepts connections and answers every message with the same payload
//! under the next message id.
//!
//! Run with: cargo run --example echo_server
//! Then connect with: cargo run --example pool_client

use std::net::TcpListener;
use std::thread;

use tcpool::codec::MsgParser;

const BIND_ADDR: &str = "127.0.0.1:3563";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(BIND_ADDR)?;
    println!("Echo server listening on {}", listener.local_addr()?);

    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                eprintln!("Accept error: {e}");
                continue;
            }
        };
        let peer = stream.peer_addr()?;
        println!("New connection from {peer}");

        // Handle each connection in a separate thread
        thread::spawn(move || {
            let parser = MsgParser::default();
            loop {
                let body = match parser.read_frame(&mut stream) {
                    Ok(body) => body,
                    Err(e) => {
                        eprintln!("Connection error: {e}");
                        break;
                    }
                };
                if body.len() < 2 {
                    eprintln!("Frame without message id, dropping connection");
                    break;
                }

                let id = u16::from_be_bytes([body[0], body[1]]);
                let reply = id.wrapping_add(1).to_be_bytes();
                println!("Received id={id}, {} payload bytes", body.len() - 2);

                if let Err(e) = parser.write_frame(&mut stream, &[reply.as_slice(), &body[2..]]) {
                    eprintln!("Failed to send reply: {e}");
                    break;
                }
            }
            println!("Connection closed: {peer}");
        });
    }

    Ok(())
}
