//! Line-oriented JSON transport
//!
//! One request per line:
//!
//! ```json
//! {"id": 1, "role": "builder", "capability": "repo.clone", "arguments": {...}}
//! ```
//!
//! Each request is dispatched on its own task, so responses may arrive out
//! of order; `id` is echoed back for correlation. A line that is not a
//! request gets a `VALIDATION_ERROR` reply and the stream continues.

use hostgate_core::{DispatchResponse, Dispatcher, ErrorCode, ResponseError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// One inbound line
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub role: String,
    pub capability: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One outbound line
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RpcReply {
    Dispatched {
        id: Value,
        #[serde(flatten)]
        response: DispatchResponse,
    },
    /// The line could not be read as a request
    Malformed {
        id: Value,
        ok: bool,
        error: ResponseError,
    },
}

impl RpcReply {
    fn malformed(reason: &serde_json::Error) -> Self {
        RpcReply::Malformed {
            id: Value::Null,
            ok: false,
            error: ResponseError {
                code: ErrorCode::ValidationError,
                message: format!("malformed request: {reason}"),
                hint: Some("send one JSON object per line with role, capability and arguments".to_string()),
                field: None,
            },
        }
    }
}

/// Dispatch one raw line
pub async fn handle_line(dispatcher: &Dispatcher, line: &str) -> RpcReply {
    match serde_json::from_str::<RpcRequest>(line) {
        Ok(request) => {
            let response = dispatcher
                .dispatch(&request.role, &request.capability, request.arguments)
                .await;
            RpcReply::Dispatched {
                id: request.id,
                response,
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "malformed request line");
            RpcReply::malformed(&e)
        }
    }
}

/// Serve requests from `reader` until EOF, writing replies to `writer`
///
/// Returns the number of replies written once every in-flight request has
/// been answered.
///
/// # Errors
/// Returns the first I/O error on either stream
pub async fn serve<R, W>(dispatcher: Dispatcher, reader: R, mut writer: W) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let reader_task = tokio::spawn(read_requests(dispatcher, reader, tx));

    let mut written = 0u64;
    while let Some(line) = rx.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        written += 1;
    }

    reader_task.await.map_err(std::io::Error::other)??;
    tracing::debug!(replies = written, "input closed");
    Ok(written)
}

async fn read_requests<R>(
    dispatcher: Dispatcher,
    reader: R,
    tx: mpsc::UnboundedSender<String>,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let dispatcher = dispatcher.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let reply = handle_line(&dispatcher, &line).await;
            match serde_json::to_string(&reply) {
                Ok(encoded) => {
                    // Only fails if the writer side already gave up.
                    let _ = tx.send(encoded);
                }
                Err(e) => tracing::error!(error = %e, "reply could not be encoded"),
            }
        });
    }
    Ok(())
}
