//! Reachability probe.
//!
//! A container can be running before the process inside it has bound its
//! socket. Registering it at that point would hand routers a dead
//! backend, so every candidate address must accept a TCP connection
//! first.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Whether `address` (`host:port`) accepts a TCP connection within
/// `timeout`. The connection is closed immediately; nothing is sent.
pub async fn is_open(address: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            debug!(%address, error = %e, "reachability probe failed");
            false
        }
        Err(_) => {
            debug!(%address, ?timeout, "reachability probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_port_is_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(is_open(&addr, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn closed_port_is_not_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(!is_open(&addr, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn unresolvable_address_is_not_open() {
        assert!(!is_open("not-an-address", Duration::from_millis(500)).await);
    }
}
