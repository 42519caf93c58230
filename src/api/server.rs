/*!
 * Control Server
 * JSON-lines control protocol over TCP: one request per line, one
 * response per line, answered in order per connection
 */

use super::handlers::{ApiHandler, SessionHistory};
use super::types::{ApiError, ApiRequest, ApiResponse};
use crate::orchestrator::Orchestrator;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Request lines longer than this are answered with an error and skipped
const MAX_REQUEST_LINE: usize = 64 * 1024;

pub struct ControlServer {
    handler: ApiHandler,
}

impl ControlServer {
    pub fn new(orchestrator: Arc<Orchestrator>, history: SessionHistory) -> Self {
        Self {
            handler: ApiHandler::new(orchestrator, history),
        }
    }

    pub fn handler(&self) -> &ApiHandler {
        &self.handler
    }

    /// Accept connections until `shutdown` resolves
    ///
    /// Connections still open at shutdown are aborted; operations they
    /// started stop at their next await point.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(addr = %local, "Control server listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = self.handler.clone();
                        connections.spawn(async move {
                            if let Err(e) = serve_connection(handler, stream, peer).await {
                                debug!(peer = %peer, error = %e, "Connection closed with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "Accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(open = connections.len(), "Control server shutting down");
        connections.shutdown().await;
        Ok(())
    }
}

/// Parse one request line into a response
async fn answer(handler: &ApiHandler, line: &str) -> ApiResponse {
    match serde_json::from_str::<ApiRequest>(line) {
        Ok(request) => handler.handle(request).await,
        Err(e) => {
            // Echo the id back when the line is at least a JSON object
            let id = serde_json::from_str::<serde_json::Value>(line)
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_u64()));
            ApiResponse::failure(id, ApiError::invalid_request(e.to_string()))
        }
    }
}

async fn serve_connection(handler: ApiHandler, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
    debug!(peer = %peer, "Connection accepted");
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut line = Vec::new();

    loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_REQUEST_LINE as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if read == 0 {
            break;
        }
        if line.len() > MAX_REQUEST_LINE && line.last() != Some(&b'\n') {
            warn!(peer = %peer, "Request line too long");
            let response = ApiResponse::failure(None, ApiError::invalid_request("request line too long"));
            write_response(&mut write, &response).await?;
            if !skip_line(&mut reader).await? {
                break;
            }
            continue;
        }

        let response = match std::str::from_utf8(&line) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => answer(&handler, text.trim()).await,
            Err(_) => ApiResponse::failure(None, ApiError::invalid_request("request line is not valid UTF-8")),
        };
        write_response(&mut write, &response).await?;
    }

    debug!(peer = %peer, "Connection closed");
    Ok(())
}

/// Discard input up to and including the next newline without buffering
/// it; false when the peer closed first
async fn skip_line<R>(reader: &mut R) -> io::Result<bool>
where
    R: AsyncBufReadExt + Unpin,
{
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(false);
        }
        let (used, found) = match buf.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (buf.len(), false),
        };
        reader.consume(used);
        if found {
            return Ok(true);
        }
    }
}

async fn write_response<W>(write: &mut W, response: &ApiResponse) -> io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let mut encoded = serde_json::to_vec(response).map_err(io::Error::other)?;
    encoded.push(b'\n');
    write.write_all(&encoded).await?;
    write.flush().await
}
