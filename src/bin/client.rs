//! gatepost client
//!
//! Opens a circuit to a gate, sends each stdin line as one payload,
//! and prints whatever the gate pushes back.
//!
//! Usage: gatepost-client <GATE_URI> [OPTIONS]
//!
//! Options:
//!   --profile <FILE>       TOML cover profile shared with the gate
//!   --compress             Deflate outbound payloads when smaller
//!   --ping                 Probe reachability before connecting
//!   --no-test              Skip the circuit self-test
//!   -h, --help             Print help information

use std::env;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use gatepost::{ChannelClient, CoverProfile, Flags, WaitStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    let mut gate_uri = None;
    let mut profile = CoverProfile::default();
    let mut flags = Flags::ENCRYPT | Flags::TEST_CIRCUIT;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "--profile" => {
                i += 1;
                let file = args
                    .get(i)
                    .ok_or_else(|| anyhow::anyhow!("--profile requires a file path"))?;
                profile = toml::from_str(&std::fs::read_to_string(file)?)?;
            }
            "--compress" => flags |= Flags::COMPRESS,
            "--ping" => flags |= Flags::PING_SERVER,
            "--no-test" => flags &= !Flags::TEST_CIRCUIT,
            other if gate_uri.is_none() && !other.starts_with('-') => {
                gate_uri = Some(other.to_string());
            }
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                return Ok(());
            }
        }
        i += 1;
    }

    let gate_uri = gate_uri.ok_or_else(|| anyhow::anyhow!("missing gate URI"))?;

    let client = ChannelClient::build_with_profile(&gate_uri, flags, profile)?;
    client.initialize_circuit().await?;
    tracing::info!(
        client_id = %client.client_id_hex().unwrap_or_default(),
        "circuit up, type lines to send (EOF closes)"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) if !line.is_empty() => {
                        client.write(line.as_bytes()).await?;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            (len, status) = client.wait(Duration::from_secs(1)) => {
                match status {
                    WaitStatus::DataReceived => {
                        let mut buf = vec![0u8; len];
                        let n = client.read(&mut buf)?;
                        println!("{}", String::from_utf8_lossy(&buf[..n]));
                    }
                    WaitStatus::Closed => {
                        tracing::info!("gate closed the circuit");
                        return Ok(());
                    }
                    WaitStatus::TimeoutReached => {}
                }
            }
        }
    }

    client.close().await;
    Ok(())
}

fn print_usage() {
    println!(
        r#"gatepost-client - interactive covert channel client

USAGE:
    gatepost-client <GATE_URI> [OPTIONS]

OPTIONS:
    --profile <FILE>      TOML cover profile shared with the gate
    --compress            Deflate outbound payloads when smaller
    --ping                Probe reachability before connecting
    --no-test             Skip the circuit self-test
    -h, --help            Print help information

EXAMPLES:
    Connect to a local gate:
        gatepost-client http://127.0.0.1:8080/gate.php
"#
    );
}
