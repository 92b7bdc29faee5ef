//! Gate reachability probe.
//!
//! The original design sends ICMP echoes, but raw ICMP sockets need
//! elevated privileges on most systems; this probe substitutes plain
//! TCP connects to the gate's port, up to five attempts, followed by
//! an ordinary GET that must draw any HTTP response at all. Either
//! failure reports the server as down.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::error::{Error, Result};

/// Connect attempts before declaring the host unreachable.
const PROBE_ATTEMPTS: usize = 5;

/// Per-attempt connect timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Verify the gate host answers on its port and speaks HTTP.
pub async fn check_server_alive(gate: &Url, http: &reqwest::Client) -> Result<()> {
    let host = gate
        .host_str()
        .ok_or_else(|| Error::InvalidUri("gate URI has no host".to_string()))?;
    let port = gate.port_or_known_default().unwrap_or(80);

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|_| Error::InvalidUri(format!("cannot resolve host {}", host)))?
        .collect();
    let Some(addr) = addrs.first().copied() else {
        return Err(Error::InvalidUri(format!("host {} has no addresses", host)));
    };

    let mut reachable = false;
    for attempt in 1..=PROBE_ATTEMPTS {
        match timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => {
                reachable = true;
                break;
            }
            _ => {
                tracing::trace!(attempt, %addr, "probe connect failed");
            }
        }
    }
    if !reachable {
        return Err(Error::ServerDown);
    }

    // The port answering is not enough; the gate must return some HTTP
    // response to a plain GET (any status counts).
    http.get(gate.clone())
        .send()
        .await
        .map_err(|_| Error::ServerDown)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unresolvable_host_is_invalid_uri() {
        let gate = Url::parse("http://no-such-host.invalid/gate.php").unwrap();
        let http = reqwest::Client::new();
        assert!(matches!(
            check_server_alive(&gate, &http).await,
            Err(Error::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_port_is_server_down() {
        // Bind and immediately drop a listener to find a port that is
        // very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let gate = Url::parse(&format!("http://127.0.0.1:{}/gate.php", port)).unwrap();
        let http = reqwest::Client::new();
        assert!(matches!(
            check_server_alive(&gate, &http).await,
            Err(Error::ServerDown)
        ));
    }
}
