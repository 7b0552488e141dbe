//! Pool client example.
//!
//! Opens four connections to the echo server, pings on each, and prints
//! the replies routed back through the dispatcher.
//!
//! Run the server first: cargo run --example echo_server
//! Then run: cargo run --example pool_client

use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tcpool::{ClientConfig, FramedAgent, TcpClient};
use tracing_subscriber::EnvFilter;

const SERVER_ADDR: &str = "127.0.0.1:3563";
const MSG_PING: u16 = 1;
const MSG_PONG: u16 = 2;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let agents = std::sync::Arc::new(Mutex::new(Vec::new()));
    let registry = std::sync::Arc::clone(&agents);

    let config = ClientConfig::new(SERVER_ADDR)
        .with_conn_num(4)
        .with_connect_interval(Duration::from_secs(1));
    let client = TcpClient::with_agent_factory(config, move |conn| {
        registry.lock().push(conn.clone());
        FramedAgent::new(conn)
    });

    client.reg_handler(MSG_PONG, |agent: &FramedAgent, payload| {
        println!(
            "Pong on {}: {:?}",
            agent.local_addr(),
            String::from_utf8_lossy(&payload)
        );
    });

    client.start()?;
    println!("Dialing {SERVER_ADDR} with 4 connections...");
    thread::sleep(Duration::from_secs(1));
    println!("Connected: {}", client.connection_count());

    for (i, conn) in agents.lock().iter().enumerate() {
        let payload = format!("ping #{i}");
        let id = MSG_PING.to_be_bytes();
        conn.write_msg(&[id.as_slice(), payload.as_bytes()])?;
    }

    thread::sleep(Duration::from_secs(1));
    client.close();

    let stats = client.stats();
    println!(
        "Closed after {} dial attempts, {} connections",
        stats.dial_attempts, stats.connect_count
    );
    Ok(())
}
