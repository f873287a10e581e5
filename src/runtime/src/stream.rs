//! Decoding of the engine's pull/build progress feed.
//!
//! The engine answers a pull with back-to-back JSON values (not an array),
//! each either a progress update or an error. The decoder runs as a
//! background task next to the pull call and reports exactly one outcome:
//! the first daemon error, a decode error, or success when the stream ends
//! cleanly. A separate completion signal fires when the task exits, after
//! the remainder of the stream has been drained, so the producer never
//! blocks on a full pipe.

use image_inspector_core::error::{InspectorError, Result};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;

/// Read size for the progress feed.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// One value of the progress feed. Only the error field matters here.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProgressMessage {
    #[serde(alias = "Error")]
    error: Option<String>,
    #[serde(alias = "Status")]
    status: Option<String>,
}

/// Handle to a running decoder task.
///
/// Decode failures carry the `serde_json` description after the
/// `Error decoding json: ` prefix, e.g. `expected value at line 1 column 5`
/// for trailing garbage. Callers matching on the text should match that
/// prefix rather than another parser's wording.
pub struct StreamDecoder {
    outcome: Option<oneshot::Receiver<Result<()>>>,
    finished: Option<oneshot::Receiver<()>>,
}

/// Raises the completion signal when dropped, so it fires on every exit path.
struct CompletionGuard(Option<oneshot::Sender<()>>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

impl StreamDecoder {
    /// Start decoding `reader` on a background task.
    pub fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (outcome_tx, outcome) = oneshot::channel();
        let (finished_tx, finished) = oneshot::channel();

        tokio::spawn(async move {
            let _guard = CompletionGuard(Some(finished_tx));
            let mut reader = reader;
            let result = decode_until_outcome(&mut reader).await;
            if let Err(ref e) = result {
                tracing::debug!(error = %e, "Progress stream reported an error");
            }
            let _ = outcome_tx.send(result);
            drain(&mut reader).await;
        });

        Self {
            outcome: Some(outcome),
            finished: Some(finished),
        }
    }

    /// Wait for the terminal outcome.
    ///
    /// The outcome is delivered once; later calls return an error.
    pub async fn outcome(&mut self) -> Result<()> {
        let Some(rx) = self.outcome.take() else {
            return Err(InspectorError::Other(
                "progress outcome already consumed".to_string(),
            ));
        };
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(InspectorError::Other(
                "progress decoder exited without an outcome".to_string(),
            )),
        }
    }

    /// Wait until the decoder task has exited. Returns at once if already observed.
    pub async fn finished(&mut self) {
        if let Some(rx) = self.finished.take() {
            let _ = rx.await;
        }
    }

    /// Wait for the outcome, then for the task to exit.
    pub async fn wait(mut self) -> Result<()> {
        let result = self.outcome().await;
        self.finished().await;
        result
    }
}

/// Decode values until the first error or the end of the stream.
async fn decode_until_outcome<R>(reader: &mut R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        let at_eof = n == 0;
        buf.extend_from_slice(&chunk[..n]);

        let mut stream = serde_json::Deserializer::from_slice(&buf).into_iter::<ProgressMessage>();
        let mut consumed = 0;
        while let Some(item) = stream.next() {
            match item {
                Ok(message) => {
                    consumed = stream.byte_offset();
                    if let Some(error) = message.error.filter(|e| !e.is_empty()) {
                        return Err(InspectorError::Daemon(error));
                    }
                    if let Some(status) = message.status {
                        tracing::trace!(status = %status, "Pull progress");
                    }
                }
                // A value split across reads; wait for more bytes.
                Err(e) if e.is_eof() && !at_eof => break,
                Err(e) => return Err(InspectorError::StreamDecode(e.to_string())),
            }
        }
        buf.drain(..consumed);

        if at_eof {
            return Ok(());
        }
    }
}

/// Discard whatever the producer still writes.
async fn drain<R>(reader: &mut R)
where
    R: AsyncRead + Unpin,
{
    let mut sink = tokio::io::sink();
    let _ = tokio::io::copy(reader, &mut sink).await;
}
