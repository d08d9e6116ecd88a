//! Unix-socket embedding daemon transport.
//!
//! Wire format: 4-byte big-endian payload length followed by UTF-8 JSON.
//! Requests carry an id, a method (`embed` or `health`) and params; the
//! daemon answers with `{id, result}` or `{id, error}`. The daemon process
//! itself is external; this module is the codec and the client.

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

use crate::embeddings::EmbeddingProvider;
use crate::error::EngineError;
use crate::error::Result;

/// Ceiling on a single frame; a batch of embeddings fits comfortably.
pub const MAX_FRAME_BYTES: usize = 50 * 1024 * 1024;

/// Encode a JSON value as one length-prefixed frame.
pub fn encode_frame(value: &Value) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(value).map_err(|e| EngineError::Embedding {
        cause: format!("frame encode failed: {e}"),
    })?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(EngineError::Embedding {
            cause: format!("frame of {} bytes exceeds limit", payload.len()),
        });
    }
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read one length-prefixed JSON frame from a stream.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Value> {
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| EngineError::Embedding {
            cause: format!("connection closed while reading header: {e}"),
        })?;

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(EngineError::Embedding {
            cause: format!("frame of {len} bytes exceeds limit"),
        });
    }

    let mut payload = vec![0u8; len];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|e| EngineError::Embedding {
            cause: format!("connection closed while reading payload: {e}"),
        })?;

    serde_json::from_slice(&payload).map_err(|e| EngineError::Embedding {
        cause: format!("frame decode failed: {e}"),
    })
}

/// Write one frame to a stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, value: &Value) -> Result<()> {
    let frame = encode_frame(value)?;
    stream
        .write_all(&frame)
        .await
        .map_err(|e| EngineError::Embedding {
            cause: format!("frame write failed: {e}"),
        })?;
    Ok(())
}

/// Daemon health report.
#[derive(Debug, Clone)]
pub struct DaemonHealth {
    pub status: String,
    pub models_loaded: Vec<String>,
    pub memory_mb: f64,
    pub device: String,
}

/// Client for the local embedding daemon.
///
/// Connects per request; request ids are a process-local counter. A timed
/// out batch is retried once before the failure propagates.
pub struct DaemonClient {
    socket_path: PathBuf,
    model: String,
    dimension: i32,
    timeout: Duration,
    next_id: AtomicU64,
}

impl DaemonClient {
    pub fn new(socket_path: PathBuf, model: String, dimension: i32, timeout: Duration) -> Self {
        Self {
            socket_path,
            model,
            dimension,
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    fn request_id(&self) -> String {
        format!("req-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn round_trip(&self, request: Value) -> Result<Value> {
        let work = async {
            let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
                EngineError::Embedding {
                    cause: format!(
                        "cannot connect to daemon at {}: {e}",
                        self.socket_path.display()
                    ),
                }
            })?;
            write_frame(&mut stream, &request).await?;
            read_frame(&mut stream).await
        };

        let response = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| EngineError::Embedding {
                cause: format!("daemon request timed out after {:?}", self.timeout),
            })??;

        if let Some(error) = response.get("error") {
            let kind = error.get("type").and_then(Value::as_str).unwrap_or("ServerError");
            let message = error.get("message").and_then(Value::as_str).unwrap_or("");
            return Err(EngineError::Embedding {
                cause: format!("{kind}: {message}"),
            });
        }
        Ok(response)
    }

    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = json!({
            "id": self.request_id(),
            "method": "embed",
            "params": {"model": self.model, "texts": texts},
        });

        let response = match self.round_trip(request.clone()).await {
            Ok(r) => r,
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "Daemon embed failed, retrying once");
                self.round_trip(request).await?
            }
            Err(e) => return Err(e),
        };

        let embeddings = response
            .pointer("/result/embeddings")
            .and_then(Value::as_array)
            .ok_or(EngineError::Embedding {
                cause: "daemon response missing embeddings".to_string(),
            })?;

        let mut vectors = Vec::with_capacity(embeddings.len());
        for row in embeddings {
            let vector: Vec<f32> = row
                .as_array()
                .map(|xs| {
                    xs.iter()
                        .filter_map(Value::as_f64)
                        .map(|x| x as f32)
                        .collect()
                })
                .unwrap_or_default();
            vectors.push(vector);
        }
        Ok(vectors)
    }

    /// Query daemon health.
    pub async fn health(&self) -> Result<DaemonHealth> {
        let request = json!({"id": self.request_id(), "method": "health"});
        let response = self.round_trip(request).await?;

        let result = response.get("result").ok_or(EngineError::Embedding {
            cause: "daemon health response missing result".to_string(),
        })?;

        Ok(DaemonHealth {
            status: result
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            models_loaded: result
                .get("models_loaded")
                .and_then(Value::as_array)
                .map(|xs| {
                    xs.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            memory_mb: result.get("memory_mb").and_then(Value::as_f64).unwrap_or(0.0),
            device: result
                .get("device")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for DaemonClient {
    fn name(&self) -> &str {
        "daemon"
    }

    fn dimension(&self) -> i32 {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.embed_request(&[text.to_string()]).await?;
        results.into_iter().next().ok_or(EngineError::Embedding {
            cause: "empty daemon response".to_string(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_request(texts).await
    }
}
