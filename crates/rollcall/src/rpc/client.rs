//! RPC caller. Every call runs under a deadline; no retries.

use rollcall_common::constants::{MAX_RPC_FRAME_BYTES, methods};
use rollcall_common::{
    AssignReply, AssignRequest, PingReply, PingRequest, RollcallError, RollcallResult,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use super::{RpcRequest, RpcResponse};

/// Dials a fresh connection per call
#[derive(Debug, Clone)]
pub struct RpcClient {
    timeout: Duration,
}

impl RpcClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Call `method` on `addr`; a missed deadline is [`RollcallError::Timeout`]
    pub async fn call<P, R>(&self, addr: &str, method: &str, params: &P) -> RollcallResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = RpcRequest {
            method: method.to_string(),
            params: serde_json::to_value(params)?,
        };

        match tokio::time::timeout(self.timeout, round_trip(addr, &request)).await {
            Ok(result) => {
                let value = result?;
                serde_json::from_value(value).map_err(|e| {
                    RollcallError::Connection(format!("unexpected {method} reply from {addr}: {e}"))
                })
            }
            Err(_) => Err(RollcallError::Timeout(format!(
                "{method} to {addr} exceeded {:?}",
                self.timeout
            ))),
        }
    }

    /// Registry-facing identity assignment
    pub async fn assign_identity(&self, addr: &str, req: &AssignRequest) -> RollcallResult<u32> {
        let reply: AssignReply = self.call(addr, methods::ASSIGN_IDENTITY, req).await?;
        Ok(reply.id)
    }

    /// Agent-facing liveness probe
    pub async fn ping(&self, addr: &str, id: u32) -> RollcallResult<PingReply> {
        self.call(addr, methods::PING, &PingRequest { id }).await
    }
}

async fn round_trip(addr: &str, request: &RpcRequest) -> RollcallResult<serde_json::Value> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| RollcallError::Connection(format!("dial {addr}: {e}")))?;
    let (read_half, mut write_half) = stream.into_split();

    let mut frame = serde_json::to_vec(request)?;
    frame.push(b'\n');
    write_half
        .write_all(&frame)
        .await
        .map_err(|e| RollcallError::Connection(format!("write to {addr}: {e}")))?;

    let mut line = String::new();
    let read = BufReader::new(read_half.take((MAX_RPC_FRAME_BYTES + 1) as u64))
        .read_line(&mut line)
        .await
        .map_err(|e| RollcallError::Connection(format!("read from {addr}: {e}")))?;
    if read == 0 {
        return Err(RollcallError::Connection(format!(
            "{addr} closed the connection without replying"
        )));
    }

    let response: RpcResponse = serde_json::from_str(&line)
        .map_err(|e| RollcallError::Connection(format!("malformed reply from {addr}: {e}")))?;

    match (response.result, response.error) {
        (_, Some(error)) => Err(error.into()),
        (Some(result), None) => Ok(result),
        (None, None) => Ok(serde_json::Value::Null),
    }
}
