/// Streaming execution chunks
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::ErrorPayload;

/// One item of a streaming run
///
/// A stream is zero or more `Data` chunks, optionally terminated by a single
/// `Error` chunk. Serialized as `{"data": "..."}` or `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamChunk {
    Data(String),
    Error(ErrorPayload),
}

impl StreamChunk {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Single-consumer, finite sequence of chunks
pub type ChunkStream = ReceiverStream<StreamChunk>;

/// Channel capacity between the forwarding task and the consumer
pub(crate) const CHUNK_BUFFER: usize = 4;
