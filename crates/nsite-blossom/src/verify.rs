//! Streaming size and hash verification of blob bodies.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use nsite_types::Sha256Hash;
use sha2::{Digest, Sha256};

use crate::client::ByteStream;
use crate::error::BlobError;

/// A body stream that is checked while it is forwarded.
///
/// Chunks pass through unchanged but one step behind: the most recent chunk
/// is held until the next arrives, and the last one is only released once the
/// sha256 of everything received matches. A lying mirror therefore never
/// produces a complete body. The stream fails as soon as more than
/// `max_size` bytes arrived.
pub struct VerifiedBody {
    inner: ByteStream,
    expected: Sha256Hash,
    max_size: Option<u64>,
    hasher: Sha256,
    received: u64,
    held: Option<Bytes>,
    done: bool,
}

impl VerifiedBody {
    pub fn new(inner: ByteStream, expected: Sha256Hash, max_size: Option<u64>) -> Self {
        Self {
            inner,
            expected,
            max_size,
            hasher: Sha256::new(),
            received: 0,
            held: None,
            done: false,
        }
    }

    /// Bytes received from the mirror so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Read the whole body into memory, verifying it.
    pub async fn collect_bytes(mut self) -> Result<Bytes, BlobError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(out))
    }

    fn fail(&mut self, error: BlobError) -> Poll<Option<Result<Bytes, BlobError>>> {
        self.done = true;
        self.held = None;
        Poll::Ready(Some(Err(error)))
    }
}

impl Stream for VerifiedBody {
    type Item = Result<Bytes, BlobError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(this.held.take().map(Ok));
            }
            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    this.received += chunk.len() as u64;
                    if let Some(max) = this.max_size
                        && this.received > max
                    {
                        let size = this.received;
                        return this.fail(BlobError::TooLarge { size, max });
                    }
                    if chunk.is_empty() {
                        continue;
                    }
                    this.hasher.update(&chunk);
                    if let Some(previous) = this.held.replace(chunk) {
                        return Poll::Ready(Some(Ok(previous)));
                    }
                }
                Some(Err(e)) => return this.fail(e),
                None => {
                    let digest: [u8; 32] = std::mem::take(&mut this.hasher).finalize().into();
                    let actual = Sha256Hash::from(digest);
                    if actual != this.expected {
                        let expected = this.expected;
                        return this.fail(BlobError::HashMismatch { expected, actual });
                    }
                    this.done = true;
                }
            }
        }
    }
}

impl std::fmt::Debug for VerifiedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifiedBody")
            .field("expected", &self.expected)
            .field("max_size", &self.max_size)
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}
