//! TCP reachability probe.

use std::time::Duration;
use tokio::net::TcpStream;

/// `true` if a TCP connection to `host:port` succeeds within `timeout`.
/// Refused connections, timeouts and resolution failures all count as
/// unreachable; this never returns an error.
pub async fn is_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            tracing::trace!("Probe {}:{} failed: {}", host, port, e);
            false
        }
        Err(_) => {
            tracing::trace!("Probe {}:{} timed out after {:?}", host, port, timeout);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_reachable("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!is_reachable("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_unreachable() {
        assert!(!is_reachable("no-such-host.invalid", 80, Duration::from_secs(2)).await);
    }
}
