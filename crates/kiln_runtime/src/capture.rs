//! Bounded output capture.
//!
//! Child output is read continuously so the process never blocks on a full
//! pipe, but only the first `limit` bytes per stream are kept.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 8 * 1024;

/// Byte buffer that keeps a prefix of the stream and counts the rest
#[derive(Debug, Clone)]
pub struct CappedBuffer {
    data: Vec<u8>,
    limit: usize,
    dropped: u64,
}

impl CappedBuffer {
    /// Create a buffer keeping at most `limit` bytes
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    /// Append a chunk, discarding whatever exceeds the cap
    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        let kept = room.min(chunk.len());
        self.data.extend_from_slice(&chunk[..kept]);
        self.dropped += (chunk.len() - kept) as u64;
    }

    /// Bytes kept so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing was kept
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes discarded past the cap
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Whether anything was discarded
    #[must_use]
    pub fn truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Render the captured text.
    ///
    /// Invalid UTF-8 is replaced; a truncated stream ends with a marker
    /// naming how many bytes were dropped.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        if self.truncated() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[output truncated: {} bytes dropped]", self.dropped));
        }
        text
    }
}

/// Capture buffer shared between a reader task and the engine
pub type SharedBuffer = Arc<Mutex<CappedBuffer>>;

/// Create a shared buffer
#[must_use]
pub fn shared(limit: usize) -> SharedBuffer {
    Arc::new(Mutex::new(CappedBuffer::new(limit)))
}

/// Snapshot `(text, truncated)` of a shared buffer
#[must_use]
pub fn snapshot(buffer: &SharedBuffer) -> (String, bool) {
    let buf = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    (buf.render(), buf.truncated())
}

/// Read `reader` to EOF into `buffer`.
///
/// Each chunk is committed as soon as it is read, so aborting this task
/// keeps everything received up to that point.
pub async fn drain<R>(mut reader: R, buffer: SharedBuffer)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(&chunk[..n]),
            Err(e) => {
                tracing::debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
}
