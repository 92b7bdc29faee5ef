//! gatepost gate server
//!
//! Runs a gate with a demo echo handler: everything a client posts is
//! read and written straight back onto its transmit queue.
//!
//! Usage: gatepost-server [OPTIONS]
//!
//! Options:
//!   -p, --port <PORT>      Listen port (default 8080)
//!   -u, --path <PATH>      Gate path (default /gate.php)
//!   --profile <FILE>       TOML cover profile shared with clients
//!   --compress             Deflate outbound payloads when smaller
//!   -h, --help             Print help information

use std::env;
use std::time::Duration;

use gatepost::{connect_handler, CoverProfile, Flags, GateService, WaitStatus, DEFAULT_GATE_PATH};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing — respects RUST_LOG env var (e.g. RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut port: u16 = 8080;
    let mut path = DEFAULT_GATE_PATH.to_string();
    let mut profile = CoverProfile::default();
    let mut flags = Flags::ENCRYPT;

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "-p" | "--port" => {
                port = next_value(&args, &mut i)?.parse()?;
            }
            "-u" | "--path" => {
                path = next_value(&args, &mut i)?.to_string();
            }
            "--profile" => {
                let content = std::fs::read_to_string(next_value(&args, &mut i)?)?;
                profile = toml::from_str(&content)?;
            }
            "--compress" => {
                flags |= Flags::COMPRESS;
            }
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                return Ok(());
            }
        }
        i += 1;
    }

    let service = GateService::create_with_profile(
        &path,
        port,
        flags,
        profile,
        connect_handler(|client, _service| async move {
            tracing::info!(client_id = %client.client_id_hex(), "client connected");

            loop {
                let (len, status) = client.wait(Duration::from_secs(30)).await;
                match status {
                    WaitStatus::DataReceived => {
                        let mut buf = vec![0u8; len];
                        let n = client.read(&mut buf)?;
                        tracing::info!(
                            client_id = %client.client_id_hex(),
                            bytes = n,
                            "echoing payload"
                        );
                        client.write(&buf[..n])?;
                    }
                    WaitStatus::TimeoutReached => continue,
                    WaitStatus::Closed => {
                        tracing::info!(client_id = %client.client_id_hex(), "client gone");
                        return Ok(());
                    }
                }
            }
        }),
    )
    .await?;

    tracing::info!(
        "gate ready at http://0.0.0.0:{}{}",
        service.local_port(),
        service.gate_path()
    );

    tokio::signal::ctrl_c().await?;
    service.shutdown();
    Ok(())
}

fn next_value<'a>(args: &'a [String], i: &mut usize) -> anyhow::Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("{} requires a value", args[*i - 1]))
}

fn print_usage() {
    println!(
        r#"gatepost-server - covert gate with a demo echo handler

USAGE:
    gatepost-server [OPTIONS]

OPTIONS:
    -p, --port <PORT>     Listen port (default 8080)
    -u, --path <PATH>     Gate path (default /gate.php)
    --profile <FILE>      TOML cover profile shared with clients
    --compress            Deflate outbound payloads when smaller
    -h, --help            Print help information

EXAMPLES:
    Run on the default port:
        gatepost-server

    Blend in on a custom path:
        gatepost-server --port 8080 --path /submit.php
"#
    );
}
