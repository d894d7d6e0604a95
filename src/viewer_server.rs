//! Loopback static file server for the catalog viewer.

use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Component, Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::shutdown_signal::ShutdownSignal;

const INDEX_FILE_NAME: &str = "index.html";
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(30);
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Binds `127.0.0.1` on the first port in `[first_port, first_port + span)`
/// that is free.
pub fn bind_first_free(first_port: u16, span: u16) -> Result<TcpListener> {
    let last = (u32::from(first_port) + u32::from(span.max(1))).min(u32::from(u16::MAX) + 1);
    for port in u32::from(first_port)..last {
        let Ok(port) = u16::try_from(port) else {
            break;
        };
        match TcpListener::bind(("127.0.0.1", port)) {
            Ok(listener) => return Ok(listener),
            Err(err) => debug!("Port {port} unavailable: {err}"),
        }
    }
    Err(PipelineError::Configuration(format!(
        "could not find an available port in {}..{}",
        first_port, last
    )))
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json",
        Some("csv") => "text/csv; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PathRejection {
    Forbidden,
    NotFound,
}

/// Maps a request target onto a file under `root`.
fn resolve_request_path(root: &Path, target: &str) -> std::result::Result<PathBuf, PathRejection> {
    let raw_path = target
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    let decoded = urlencoding::decode(raw_path).map_err(|_| PathRejection::NotFound)?;

    let mut resolved = root.to_path_buf();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(PathRejection::Forbidden)
            }
        }
    }
    if resolved.is_dir() {
        resolved.push(INDEX_FILE_NAME);
    }
    if resolved.is_file() {
        Ok(resolved)
    } else {
        Err(PathRejection::NotFound)
    }
}

fn parse_header_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    Some((name.trim(), value.trim()))
}

fn parse_http_request(
    reader: &mut BufReader<TcpStream>,
) -> std::result::Result<(String, String, HashMap<String, String>), String> {
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .map_err(|err| format!("failed to read request line: {err}"))?;
    if request_line.trim().is_empty() {
        return Err("empty request".to_string());
    }
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| "missing request method".to_string())?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| "missing request path".to_string())?
        .to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .map_err(|err| format!("failed to read header line: {err}"))?;
        if line == "\r\n" || line == "\n" || line.is_empty() {
            break;
        }
        if let Some((name, value)) = parse_header_line(&line) {
            headers.insert(name.to_ascii_lowercase(), value.to_string());
        }
    }

    Ok((method, path, headers))
}

fn write_response(
    stream: &mut TcpStream,
    status_line: &str,
    content_type: &str,
    body: &[u8],
    include_body: bool,
) -> std::result::Result<(), String> {
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream
        .write_all(header.as_bytes())
        .map_err(|err| format!("failed to write response header: {err}"))?;
    if include_body {
        stream
            .write_all(body)
            .map_err(|err| format!("failed to write response body: {err}"))?;
    }
    Ok(())
}

fn handle_connection(stream: TcpStream, root: &Path) -> std::result::Result<(), String> {
    stream
        .set_nonblocking(false)
        .and_then(|_| stream.set_read_timeout(Some(REQUEST_READ_TIMEOUT)))
        .map_err(|err| format!("failed to configure connection: {err}"))?;
    let mut reader = BufReader::new(
        stream
            .try_clone()
            .map_err(|err| format!("failed to clone stream: {err}"))?,
    );
    let (method, target, _headers) = parse_http_request(&mut reader)?;
    let mut stream = stream;

    let include_body = match method.as_str() {
        "GET" => true,
        "HEAD" => false,
        _ => {
            return write_response(
                &mut stream,
                "HTTP/1.1 405 Method Not Allowed",
                "text/plain; charset=utf-8",
                b"Method Not Allowed\n",
                true,
            )
        }
    };

    match resolve_request_path(root, &target) {
        Ok(path) => {
            let body = fs::read(&path)
                .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
            debug!("{method} {target} -> {}", path.display());
            write_response(
                &mut stream,
                "HTTP/1.1 200 OK",
                content_type_for(&path),
                &body,
                include_body,
            )
        }
        Err(PathRejection::Forbidden) => write_response(
            &mut stream,
            "HTTP/1.1 403 Forbidden",
            "text/plain; charset=utf-8",
            b"Forbidden\n",
            include_body,
        ),
        Err(PathRejection::NotFound) => write_response(
            &mut stream,
            "HTTP/1.1 404 Not Found",
            "text/plain; charset=utf-8",
            b"Not Found\n",
            include_body,
        ),
    }
}

pub struct ViewerServer {
    listener: TcpListener,
    listen_addr: SocketAddr,
    root: PathBuf,
}

impl ViewerServer {
    pub fn bind(root: &Path, first_port: u16, span: u16) -> Result<Self> {
        if !root.is_dir() {
            return Err(PipelineError::Configuration(format!(
                "viewer root {} not found",
                root.display()
            )));
        }
        let listener = bind_first_free(first_port, span)?;
        listener
            .set_nonblocking(true)
            .map_err(|err| PipelineError::io(root, err))?;
        let listen_addr = listener
            .local_addr()
            .map_err(|err| PipelineError::io(root, err))?;
        Ok(Self {
            listener,
            listen_addr,
            root: root.to_path_buf(),
        })
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}/", self.listen_addr.port())
    }

    pub fn port(&self) -> u16 {
        self.listen_addr.port()
    }

    /// Accepts connections until `shutdown` is signaled. One thread per
    /// connection.
    pub fn serve(&self, shutdown: &ShutdownSignal) {
        info!("Serving files from: {}", self.root.display());
        info!("Viewer running at {} (Ctrl+C to stop)", self.url());
        while !shutdown.is_signaled() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let root = self.root.clone();
                    thread::spawn(move || {
                        if let Err(err) = handle_connection(stream, &root) {
                            debug!("Viewer request from {peer} failed: {err}");
                        }
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => {
                    warn!("Viewer accept failed: {}", err);
                    thread::sleep(Duration::from_millis(120));
                }
            }
        }
        info!("Server stopped.");
    }
}

/// Binds, optionally opens the browser, and serves until shutdown.
pub fn run_viewer(
    root: &Path,
    first_port: u16,
    span: u16,
    open_browser: bool,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    let server = ViewerServer::bind(root, first_port, span)?;
    if open_browser {
        if let Err(err) = webbrowser::open(&server.url()) {
            warn!("Failed to open browser at {}: {}", server.url(), err);
        }
    }
    server.serve(shutdown);
    Ok(())
}
