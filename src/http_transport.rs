//! Blocking HTTP transport seam used by the catalog client and the fetcher.

use std::io::Read;
use std::time::Duration;

use log::debug;

use crate::error::{PipelineError, Result};

const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Minimal GET capability. Implementations never retry; callers own the
/// retry/fallback policy.
pub trait HttpTransport {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>>;
}

/// `ureq`-backed transport with a fixed client identifier and timeouts.
pub struct UreqTransport {
    http_client: ureq::Agent,
    user_agent: String,
}

impl UreqTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build();
        Self {
            http_client,
            user_agent: user_agent.to_string(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {url}");
        let response = self
            .http_client
            .get(url)
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|error| map_ureq_error(url, error))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|error| PipelineError::Network {
                url: url.to_string(),
                message: format!("Failed to read response: {error}"),
            })?;
        Ok(bytes)
    }
}

pub(crate) fn map_ureq_error(url: &str, error: ureq::Error) -> PipelineError {
    match error {
        ureq::Error::Status(status, _) => PipelineError::Transport {
            url: url.to_string(),
            status,
        },
        ureq::Error::Transport(transport) => PipelineError::Network {
            url: url.to_string(),
            message: transport.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpTransport, UreqTransport};
    use crate::error::PipelineError;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Duration;

    fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("loopback bind should succeed");
        let addr = listener.local_addr().expect("listener should have an address");
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut request = [0u8; 2048];
                let _ = stream.read(&mut request);
                let _ = stream.write_all(response);
            }
        });
        format!("http://{addr}/image.jpg")
    }

    #[test]
    fn test_get_bytes_returns_body_on_success() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nJPEG");
        let transport = UreqTransport::new("gameshelf-test", Duration::from_secs(5));
        let body = transport.get_bytes(&url).expect("200 response should succeed");
        assert_eq!(body, b"JPEG");
    }

    #[test]
    fn test_get_bytes_maps_error_status_to_transport_error() {
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );
        let transport = UreqTransport::new("gameshelf-test", Duration::from_secs(5));
        match transport.get_bytes(&url) {
            Err(PipelineError::Transport { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
