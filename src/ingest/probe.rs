//! Cheap reachability check run before opening a full stream session.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use url::Url;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reports whether the stream endpoint accepts connections.
///
/// Unreachability is an expected outcome, so probes return `false` instead of
/// an error.
pub trait ConnectionProbe: Send {
    fn probe(&self, url: &str) -> bool;
}

/// Raw TCP connect to the host/port named in the stream URL.
#[derive(Clone, Debug)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl ConnectionProbe for TcpProbe {
    fn probe(&self, url: &str) -> bool {
        if url.starts_with("stub://") {
            return true;
        }
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("TcpProbe: cannot parse stream url {}: {}", url, e);
                return false;
            }
        };
        let Some(host) = parsed.host_str() else {
            log::warn!("TcpProbe: stream url {} has no host", url);
            return false;
        };
        let Some(port) = parsed.port_or_known_default() else {
            log::warn!("TcpProbe: stream url {} has no port", url);
            return false;
        };

        let addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                log::warn!("TcpProbe: cannot resolve {}:{}: {}", host, port, e);
                return false;
            }
        };
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(_) => return true,
                Err(e) => log::debug!("TcpProbe: {} unreachable: {}", addr, e),
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn probe_reports_listening_endpoint_as_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::new(Duration::from_secs(1));

        assert!(probe.probe(&format!("http://127.0.0.1:{}/video.mjpg", port)));
    }

    #[test]
    fn probe_reports_closed_port_as_unreachable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let probe = TcpProbe::new(Duration::from_millis(500));

        assert!(!probe.probe(&format!("http://127.0.0.1:{}/video.mjpg", port)));
    }

    #[test]
    fn probe_never_fails_on_garbage() {
        let probe = TcpProbe::default();
        assert!(!probe.probe("not a url"));
        assert!(!probe.probe("file:///tmp/stream"));
    }

    #[test]
    fn stub_urls_are_always_reachable() {
        assert!(TcpProbe::default().probe("stub://front_door"));
    }
}
