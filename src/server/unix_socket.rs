//! Local admin channel.
//!
//! Clients on the same machine send `{endpoint, request}` over a unix socket.
//! Each message is an 8-byte big-endian length followed by that many bytes of
//! JSON. The server issues a one-shot root nonce, adds it to `request` and
//! forwards the request to its own HTTP port, then frames the HTTP body back.

use crate::api::{UserIdentity, CONTENT_KEY};
use crate::services::Services;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const ENDPOINT_KEY: &str = "endpoint";
pub const REQUEST_KEY: &str = "request";
pub const NONCE_KEY: &str = "root-user-nonce";
pub const NONCE_SIZE_BYTES: usize = 64;
pub const MAX_MESSAGE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("unix socket IO failed: {0}")]
    Io(#[from] io::Error),
    #[error("message of {size} bytes exceeds the 2 GiB limit")]
    TooLarge { size: u64 },
    #[error("message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message has no '{0}' key of the right type")]
    MissingKey(&'static str),
    #[error("failed to generate a nonce: {0}")]
    Random(String),
    #[error("failed to forward the request: {0}")]
    Http(#[from] reqwest::Error),
}

/// Read one length-framed message.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Vec<u8>, SocketError> {
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;

    let size = u64::from_be_bytes(header);
    if size > MAX_MESSAGE_BYTES {
        return Err(SocketError::TooLarge { size });
    }

    // The buffer grows with the bytes that arrive, not with the claimed size.
    let mut buffer = Vec::new();
    reader.by_ref().take(size).read_to_end(&mut buffer)?;
    if buffer.len() as u64 != size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("message ended after {} of {size} bytes", buffer.len()),
        )
        .into());
    }
    Ok(buffer)
}

/// Write one length-framed message.
pub fn write_message<W: Write>(writer: &mut W, message: &[u8]) -> Result<(), SocketError> {
    let size = message.len() as u64;
    if size > MAX_MESSAGE_BYTES {
        return Err(SocketError::TooLarge { size });
    }

    writer.write_all(&size.to_be_bytes())?;
    writer.write_all(message)?;
    writer.flush()?;
    Ok(())
}

/// Send one request to a running server and return its envelope.
pub fn call(socket_path: &Path, endpoint: &str, request: Value) -> Result<Value, SocketError> {
    let mut stream = UnixStream::connect(socket_path)?;
    let message = serde_json::json!({
        ENDPOINT_KEY: endpoint,
        REQUEST_KEY: request,
    });
    write_message(&mut stream, &serde_json::to_vec(&message)?)?;
    let response = read_message(&mut stream)?;
    Ok(serde_json::from_slice(&response)?)
}

/// Listener thread for the admin channel. Connections run on their own threads.
pub struct UnixSocketServer {
    path: PathBuf,
    stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UnixSocketServer {
    pub fn start(path: &Path, port: u16, services: Services) -> Result<Self, SocketError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(path)?;
        let stopping = Arc::new(AtomicBool::new(false));

        info!(unix_socket = %path.display(), "Unix socket server started");

        let accept_stopping = Arc::clone(&stopping);
        let handle = thread::Builder::new()
            .name("unix-socket".to_string())
            .spawn(move || accept_loop(listener, port, services, accept_stopping))?;

        Ok(Self {
            path: path.to_path_buf(),
            stopping,
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop accepting and remove the socket file. In-flight connections finish on their own.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.stopping.store(true, Ordering::SeqCst);
        // Wake the blocking accept.
        UnixStream::connect(&self.path).ok();
        if handle.join().is_err() {
            error!("Unix socket accept thread panicked");
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(unix_socket = %self.path.display(), error = %e, "Failed to remove unix socket");
            }
        }
        info!(unix_socket = %self.path.display(), "Unix socket server stopped");
    }
}

impl Drop for UnixSocketServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: UnixListener, port: u16, services: Services, stopping: Arc<AtomicBool>) {
    for connection in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }

        let stream = match connection {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Failed to accept unix socket connection");
                continue;
            }
        };

        let services = services.clone();
        let spawned = thread::Builder::new()
            .name("unix-socket-conn".to_string())
            .spawn(move || {
                if let Err(e) = handle_connection(stream, port, &services) {
                    error!(error = %e, "Error handling unix socket connection");
                }
            });
        if let Err(e) = spawned {
            error!(error = %e, "Failed to spawn unix socket connection thread");
        }
    }
}

fn handle_connection(
    mut stream: UnixStream,
    port: u16,
    services: &Services,
) -> Result<(), SocketError> {
    let message = read_message(&mut stream)?;

    let nonce = services
        .random
        .hex(NONCE_SIZE_BYTES)
        .map_err(|e| SocketError::Random(format!("{e:#}")))?;
    services.nonces.issue(nonce.clone(), UserIdentity::root());

    let result = forward(&message, &nonce, port);
    services.nonces.revoke(&nonce);

    let body = result?;
    write_message(&mut stream, &body)
}

fn forward(message: &[u8], nonce: &str, port: u16) -> Result<Vec<u8>, SocketError> {
    let mut payload: Value = serde_json::from_slice(message)?;

    let endpoint = payload
        .get(ENDPOINT_KEY)
        .and_then(Value::as_str)
        .ok_or(SocketError::MissingKey(ENDPOINT_KEY))?
        .to_string();

    let request = payload
        .get_mut(REQUEST_KEY)
        .and_then(Value::as_object_mut)
        .ok_or(SocketError::MissingKey(REQUEST_KEY))?;
    request.insert(NONCE_KEY.to_string(), Value::String(nonce.to_string()));
    let content = serde_json::to_string(request)?;

    let form = url::form_urlencoded::Serializer::new(String::new())
        .append_pair(CONTENT_KEY, &content)
        .finish();

    let url = format!("http://127.0.0.1:{port}{endpoint}");
    debug!(url = %url, "Forwarding unix socket request");

    let response = reqwest::blocking::Client::new()
        .post(url)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(form)
        .send()?;

    Ok(response.bytes()?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_framing() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, b"{\"a\":1}").unwrap();
        assert_eq!(&buffer[..8], &7u64.to_be_bytes());

        let message = read_message(&mut Cursor::new(buffer)).unwrap();
        assert_eq!(message, b"{\"a\":1}");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buffer = (MAX_MESSAGE_BYTES + 1).to_be_bytes().to_vec();
        buffer.extend_from_slice(b"xx");
        assert!(matches!(
            read_message(&mut Cursor::new(buffer)),
            Err(SocketError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_truncated_frame() {
        let mut buffer = 10u64.to_be_bytes().to_vec();
        buffer.extend_from_slice(b"abc");
        assert!(matches!(
            read_message(&mut Cursor::new(buffer)),
            Err(SocketError::Io(_))
        ));
    }

    #[test]
    fn test_max_claimed_size_with_short_body() {
        let mut buffer = MAX_MESSAGE_BYTES.to_be_bytes().to_vec();
        buffer.extend_from_slice(b"abc");
        assert!(matches!(
            read_message(&mut Cursor::new(buffer)),
            Err(SocketError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn test_forward_requires_keys() {
        assert!(matches!(
            forward(br#"{"request": {}}"#, "n", 1),
            Err(SocketError::MissingKey(ENDPOINT_KEY))
        ));
        assert!(matches!(
            forward(br#"{"endpoint": "/x", "request": 3}"#, "n", 1),
            Err(SocketError::MissingKey(REQUEST_KEY))
        ));
    }
}
