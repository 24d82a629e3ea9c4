//! RPC listener: one task per connection, one reply line per request line.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::{RpcHandler, RpcRequest, RpcResponse};
use rollcall_common::RollcallError;
use rollcall_common::constants::{DEFAULT_RPC_IDLE_SECS, MAX_RPC_FRAME_BYTES};

/// Bound RPC listener
pub struct RpcServer {
    listener: TcpListener,
    idle: Duration,
}

impl RpcServer {
    /// Bind the listener (use port 0 for an ephemeral port)
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind RPC listener on {addr}"))?;
        Ok(Self {
            listener,
            idle: Duration::from_secs(DEFAULT_RPC_IDLE_SECS),
        })
    }

    /// Close connections that send nothing for `idle`
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("RPC listener has no local address")
    }

    /// Accept connections until shutdown
    pub async fn serve<H: RpcHandler>(
        self,
        handler: Arc<H>,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<()> {
        let addr = self.local_addr()?;
        let idle = self.idle;
        tracing::info!(addr = %addr, "📞 RPC server started");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, handler, idle).await {
                                    tracing::debug!(peer = %peer, error = %e, "RPC connection closed with error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "RPC accept error");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("📞 RPC server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// One frame read off a connection
enum Frame {
    Line(Vec<u8>),
    TooLong,
    Closed,
}

/// Read up to the next newline, giving up past [`MAX_RPC_FRAME_BYTES`]
async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<Frame> {
    let mut buf = Vec::new();
    let limit = (MAX_RPC_FRAME_BYTES + 1) as u64;
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;

    if read == 0 {
        return Ok(Frame::Closed);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > MAX_RPC_FRAME_BYTES {
        return Ok(Frame::TooLong);
    }
    Ok(Frame::Line(buf))
}

async fn handle_connection<H: RpcHandler>(
    stream: TcpStream,
    handler: Arc<H>,
    idle: Duration,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let frame = match tokio::time::timeout(idle, read_frame(&mut reader)).await {
            Ok(frame) => frame?,
            Err(_) => {
                tracing::debug!(idle = ?idle, "Closing idle RPC connection");
                return Ok(());
            }
        };

        let line = match frame {
            Frame::Line(line) => line,
            Frame::Closed => return Ok(()),
            Frame::TooLong => {
                let response = RpcResponse::err(&RollcallError::InvalidInput(format!(
                    "request exceeds {MAX_RPC_FRAME_BYTES} bytes"
                )));
                write_response(&mut write_half, &response).await?;
                return Ok(());
            }
        };
        if line.trim_ascii().is_empty() {
            continue;
        }

        let response = match serde_json::from_slice::<RpcRequest>(&line) {
            Ok(request) => {
                tracing::trace!(method = %request.method, "RPC call");
                match handler.call(&request.method, request.params).await {
                    Ok(result) => RpcResponse::ok(result),
                    Err(e) => {
                        tracing::debug!(method = %request.method, error = %e, "RPC call failed");
                        RpcResponse::err(&e)
                    }
                }
            }
            Err(e) => RpcResponse::err(&RollcallError::InvalidInput(format!(
                "malformed request: {e}"
            ))),
        };

        write_response(&mut write_half, &response).await?;
    }
}

async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &RpcResponse) -> Result<()> {
    let mut frame = serde_json::to_vec(response)?;
    frame.push(b'\n');
    writer.write_all(&frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_common::RollcallResult;
    use serde_json::Value;

    struct Null;

    #[async_trait::async_trait]
    impl RpcHandler for Null {
        async fn call(&self, _method: &str, _params: Value) -> RollcallResult<Value> {
            Ok(Value::Null)
        }
    }

    async fn spawn_null(idle: Duration) -> (SocketAddr, tokio::sync::broadcast::Sender<()>) {
        let server = RpcServer::bind("127.0.0.1:0")
            .await
            .unwrap()
            .with_idle_timeout(idle);
        let addr = server.local_addr().unwrap();
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        tokio::spawn(server.serve(Arc::new(Null), rx));
        (addr, tx)
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_and_closed() {
        let (addr, _shutdown) = spawn_null(Duration::from_secs(5)).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // One byte over the cap and no newline
        let blob = vec![b'a'; MAX_RPC_FRAME_BYTES + 1];
        stream.write_all(&blob).await.unwrap();

        let mut reply = String::new();
        let mut reader = BufReader::new(stream);
        reader.read_line(&mut reply).await.unwrap();
        let response: RpcResponse = serde_json::from_str(&reply).unwrap();
        assert_eq!(response.error.unwrap().kind, "invalid_input");

        let mut rest = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), reader.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_silent_peer_is_disconnected() {
        let (addr, _shutdown) = spawn_null(Duration::from_millis(100)).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"{\"method\":\"Ping\"").await.unwrap();

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("server kept the idle connection open");
        assert_eq!(read.unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_calls_share_a_connection() {
        let (addr, _shutdown) = spawn_null(Duration::from_secs(5)).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        write_half
            .write_all(b"{\"method\":\"A\"}\n\n{\"method\":\"B\"}\n")
            .await
            .unwrap();
        for _ in 0..2 {
            let line = lines.next_line().await.unwrap().unwrap();
            let response: RpcResponse = serde_json::from_str(&line).unwrap();
            assert!(response.error.is_none());
        }
    }
}
