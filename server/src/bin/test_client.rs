//! Headless client for poking at a running relay server.
//!
//! Connects, sends the username, then sends a few movement updates while
//! printing everything the server relays back, and finally logs out.

use clap::Parser;
use log::error;
use shared::codec::{read_message, write_frame};
use shared::Packet;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval, sleep};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Username announced in the handshake
    #[arg(short = 'u', long, default_value = "tester")]
    username: String,

    /// Number of movement updates to send before logging out
    #[arg(short = 'n', long, default_value_t = 10)]
    moves: u32,

    /// Milliseconds between movement updates
    #[arg(short = 'i', long, default_value_t = 500)]
    interval_ms: u64,
}

const KEY_CYCLE: [&str; 4] = ["UP", "RIGHT", "DOWN", "LEFT"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect(&args.server).await?;
    println!("Connected to {} from {}", args.server, stream.local_addr()?);
    let (mut reader, mut writer) = stream.into_split();

    write_frame(&mut writer, args.username.as_str()).await?;
    println!("Sent username {:?}", args.username);

    let printer = tokio::spawn(async move {
        loop {
            match read_message::<_, Packet>(&mut reader).await {
                Ok(Some(Packet::Heartbeat { .. })) => {}
                Ok(Some(packet)) => println!("Received: {:?}", packet),
                Ok(None) => {
                    println!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    println!("Error reading from server: {}", e);
                    break;
                }
            }
        }
    });

    let mut ticker = interval(Duration::from_millis(args.interval_ms));
    for i in 0..args.moves {
        ticker.tick().await;
        let keys = KEY_CYCLE[i as usize % KEY_CYCLE.len()];
        write_frame(&mut writer, &Packet::movement(args.username.as_str(), keys)).await?;
        println!("Sent movement {}", keys);
    }

    // Let the last echoes arrive before leaving.
    sleep(Duration::from_millis(args.interval_ms)).await;
    write_frame(&mut writer, &Packet::logout(args.username.as_str(), "Client test complete")).await?;
    println!("Sent logout");

    if let Err(e) = printer.await {
        error!("Reader task failed: {}", e);
    }
    println!("Test client finished");
    Ok(())
}
