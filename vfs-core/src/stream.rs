//! Owned byte buffers and a push-readable stream with pause/resume/end
//! semantics (spec §2 component 2, §5 "Streams").

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// A push-readable byte stream. Producers call [`ByteStreamSender::send`]
/// per chunk and `drop` the sender to signal end-of-stream; an
/// `Err` chunk signals a terminal error and ends the stream.
pub struct ByteStream {
    inner: ReceiverStream<io::Result<Bytes>>,
    paused: Arc<AtomicBool>,
    /// One-slot lookahead: a chunk split at a `consume_stream_with_limit`
    /// boundary gets its remainder pushed back here so it is the next
    /// thing `next_chunk` yields.
    pending: Option<Bytes>,
}

#[derive(Clone)]
pub struct ByteStreamSender {
    tx: mpsc::Sender<io::Result<Bytes>>,
    paused: Arc<AtomicBool>,
}

/// Creates a bounded push-stream. The bound provides the manual
/// backpressure spec §5 calls for: a fast producer blocks in `send` once
/// the channel fills, rather than buffering unboundedly.
pub fn channel(capacity: usize) -> (ByteStreamSender, ByteStream) {
    let (tx, rx) = mpsc::channel(capacity);
    let paused = Arc::new(AtomicBool::new(false));
    (
        ByteStreamSender { tx, paused: paused.clone() },
        ByteStream { inner: ReceiverStream::new(rx), paused, pending: None },
    )
}

impl ByteStreamSender {
    pub async fn send(&self, chunk: Bytes) -> Result<(), mpsc::error::SendError<io::Result<Bytes>>> {
        // Backpressure: while paused, wait before handing the next chunk to
        // the channel. Checked before each send, not during, matching the
        // "pause/resume" contract rather than a mid-send cancel.
        while self.paused.load(Ordering::Acquire) {
            tokio::task::yield_now().await;
        }
        self.tx.send(Ok(chunk)).await
    }

    pub async fn error(&self, err: io::Error) {
        let _ = self.tx.send(Err(err)).await;
    }
}

impl ByteStream {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if let Some(chunk) = self.pending.take() {
            return Some(Ok(chunk));
        }
        self.inner.next().await
    }

    /// Re-queues `chunk` so the next `next_chunk` call returns it before
    /// pulling from the channel. Used to push back the unconsumed
    /// remainder of a chunk split at a `consume_stream_with_limit`
    /// boundary.
    fn push_back(&mut self, chunk: Bytes) {
        debug_assert!(self.pending.is_none());
        self.pending = Some(chunk);
    }
}

pub enum ConsumeOutcome {
    /// End of stream reached within the limit; the concatenation of every
    /// chunk seen.
    Complete(Bytes),
    /// The limit was reached before EOF; the concatenated prefix plus the
    /// still-live stream for continued consumption.
    Partial(Bytes, ByteStream),
}

/// Reads at most `limit` bytes from `stream`, per spec §5
/// "consumeStreamWithLimit".
pub async fn consume_stream_with_limit(mut stream: ByteStream, limit: usize) -> io::Result<ConsumeOutcome> {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match stream.next_chunk().await {
            Some(Ok(mut chunk)) => {
                let remaining = limit - buf.len();
                if chunk.len() > remaining {
                    let rest = chunk.split_off(remaining);
                    buf.extend_from_slice(&chunk);
                    stream.push_back(rest);
                } else {
                    buf.extend_from_slice(&chunk);
                }
            }
            Some(Err(e)) => return Err(e),
            None => return Ok(ConsumeOutcome::Complete(Bytes::from(buf))),
        }
    }
    Ok(ConsumeOutcome::Partial(Bytes::from(buf), stream))
}

/// Reads a stream to completion, with no limit.
pub async fn consume_stream(mut stream: ByteStream) -> io::Result<Bytes> {
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next_chunk().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_within_limit() {
        let (tx, rx) = channel(4);
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"ab")).await.unwrap();
            tx.send(Bytes::from_static(b"cd")).await.unwrap();
        });
        match consume_stream_with_limit(rx, 100).await.unwrap() {
            ConsumeOutcome::Complete(b) => assert_eq!(&b[..], b"abcd"),
            ConsumeOutcome::Partial(..) => panic!("expected complete"),
        }
    }

    #[tokio::test]
    async fn partial_returns_resumable_tail() {
        let (tx, rx) = channel(4);
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"ab")).await.unwrap();
            tx.send(Bytes::from_static(b"cd")).await.unwrap();
            tx.send(Bytes::from_static(b"ef")).await.unwrap();
        });
        match consume_stream_with_limit(rx, 3).await.unwrap() {
            ConsumeOutcome::Partial(head, tail) => {
                assert_eq!(&head[..], b"abc");
                let rest = consume_stream(tail).await.unwrap();
                assert_eq!(&rest[..], b"def");
            }
            ConsumeOutcome::Complete(_) => panic!("expected partial"),
        }
    }
}
