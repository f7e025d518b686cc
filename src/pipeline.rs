//! The streaming blob pipeline.
//!
//! A single blob flows through a chain of stream wrappers assembled here:
//!
//! ```text
//! source stream
//!   └─ digest verification (against the declared digest)
//!        └─ compression detection (peek, no bytes consumed)
//!             └─ byte-count progress bar
//!                  └─ tee ──────────────► diffID side task
//!                  └─ gzip side task (only for uncompressed layers the
//!                  │                  destination wants compressed)
//!                  └─ progress channel events
//!                       └─ destination put_blob
//! ```
//!
//! The tee sits downstream of digest verification, so the diffID branch
//! observes exactly the validated byte sequence. Up to two side tasks run
//! per blob; both terminate on every exit path because dropping either end
//! of their pipe wakes the peer.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

use crate::compress::{decompress, detect_compression, spawn_compressor, CompressionFormat};
use crate::constants::{COPY_CHUNK_LEN, PIPE_CAPACITY};
use crate::digest::{Digest, DigestingReader};
use crate::error::{Error, Result};
use crate::progress::{ProgressReader, ProgressUpdate, ReportSink};
use crate::transport::{BlobInfo, BlobReader, ImageDestination};

/// Channel configuration for machine-readable progress events.
#[derive(Clone)]
pub(crate) struct ProgressChannel {
    pub sender: mpsc::Sender<ProgressUpdate>,
    pub interval: std::time::Duration,
}

/// Receives the diffID side task's result. Buffered with capacity 1 so the
/// task can always deposit its result and exit, even if the consumer has
/// already departed.
pub(crate) type DiffIdReceiver = mpsc::Receiver<Result<Digest>>;

/// What the pipeline produced for one blob.
#[derive(Debug)]
pub(crate) struct PipelineOutcome {
    /// The blob info the destination actually stored.
    pub uploaded: BlobInfo,
    /// Pending diffID result, when a recorder was requested.
    pub diff_id: Option<DiffIdReceiver>,
}

/// Copies one blob from `src_stream` to the destination through the full
/// reader chain.
///
/// `src_info` must carry the declared digest. With `diff_id_wanted`, a tee
/// branch computes the digest of the uncompressed content on the side. With
/// `may_compress`, an uncompressed stream is gzip-compressed in flight when
/// the destination asks for compressed layers; the destination then sees an
/// input info without digest or size and computes both itself.
pub(crate) async fn copy_blob_from_stream(
    dest: &dyn ImageDestination,
    report: &ReportSink,
    progress: Option<&ProgressChannel>,
    src_stream: BlobReader,
    src_info: &BlobInfo,
    diff_id_wanted: bool,
    may_compress: bool,
) -> Result<PipelineOutcome> {
    let expected = src_info.digest.clone().ok_or_else(|| Error::InvalidDigest {
        digest: String::new(),
        reason: "blob has no declared digest".to_string(),
    })?;

    // Verify against the declared digest. The sticky handle survives the
    // stream being consumed by the destination.
    let digesting = DigestingReader::new(src_stream, expected)?;
    let validation = digesting.validation_handle();

    // Identify compression framing without consuming bytes.
    let (format, stream) = detect_compression(Box::new(digesting)).await?;
    let is_compressed = format.is_some();

    // Byte-count bar for humans.
    let bar = report.blob_bar(src_info);
    let mut stream: BlobReader = Box::new(bar.wrap_async_read(stream));

    // DiffID tee branch, strictly downstream of digest verification.
    let mut diff_id = None;
    if diff_id_wanted {
        let (side_write, side_read) = tokio::io::duplex(PIPE_CAPACITY);
        diff_id = Some(spawn_diff_id_task(side_read, format));
        stream = Box::new(TeeReader::new(stream, side_write));
    }

    // Compress uncompressed layers in flight when the destination wants
    // that; it will compute digest and size of what it receives.
    let mut input_info = src_info.clone();
    if may_compress && !is_compressed && dest.should_compress_layers() {
        debug!(digest = %input_info.digest_label(), "compressing blob on the fly");
        stream = spawn_compressor(stream);
        input_info.digest = None;
        input_info.size = -1;
    } else {
        debug!(digest = %input_info.digest_label(), "using original blob without modification");
    }

    // Rate-limited events for subscribers.
    if let Some(channel) = progress {
        stream = Box::new(ProgressReader::new(
            stream,
            channel.sender.clone(),
            channel.interval,
            src_info.clone(),
        ));
    }

    let uploaded = dest.put_blob(&mut *stream, &input_info).await?;

    // The diffID branch must observe the complete stream even if the
    // destination returned early (for example because it already had the
    // blob). Drain the remainder through the tee.
    if diff_id.is_some() {
        tokio::io::copy(&mut stream, &mut tokio::io::sink())
            .await
            .map_err(Error::from)?;
    }
    // Dropping the chain closes the tee pipe; the side task sees EOF and
    // delivers its result.
    drop(stream);
    bar.finish_and_clear();

    if validation.failed() {
        return Err(Error::InternalIntegrity(format!(
            "digest verification of blob {} failed but the error was ignored",
            src_info.digest_label()
        )));
    }
    if let (Some(declared), Some(stored)) = (&input_info.digest, &uploaded.digest) {
        if declared != stored {
            return Err(Error::InternalIntegrity(format!(
                "blob with digest {} was stored with digest {}",
                declared, stored
            )));
        }
    }

    Ok(PipelineOutcome { uploaded, diff_id })
}

/// Spawns the diffID side task: reads the tee branch to EOF, uncompressing
/// first when the main stream is compressed, and hashes the result.
fn spawn_diff_id_task(
    side: DuplexStream,
    format: Option<CompressionFormat>,
) -> DiffIdReceiver {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let result = compute_diff_id(side, format).await;
        // The consumer may have departed on an earlier failure; the
        // buffered slot keeps this send from blocking either way.
        let _ = tx.send(result).await;
    });
    rx
}

async fn compute_diff_id(side: DuplexStream, format: Option<CompressionFormat>) -> Result<Digest> {
    let mut stream: BlobReader = match format {
        Some(format) => decompress(format, side),
        None => Box::new(side),
    };
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; COPY_CHUNK_LEN];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    format!("sha256:{}", hex::encode(hasher.finalize())).parse()
}

// =============================================================================
// Tee Reader
// =============================================================================

/// Mirrors every byte read from `inner` into a side pipe before handing it
/// to the consumer of the *next* read, and signals EOF to the side branch
/// before reporting EOF downstream. Write failures on the side branch
/// surface as read errors, ending the transfer.
struct TeeReader<R> {
    inner: R,
    side: DuplexStream,
    pending: Vec<u8>,
    pending_pos: usize,
    eof: bool,
    done: bool,
}

impl<R: AsyncRead + Unpin> TeeReader<R> {
    fn new(inner: R, side: DuplexStream) -> Self {
        Self {
            inner,
            side,
            pending: Vec::new(),
            pending_pos: 0,
            eof: false,
            done: false,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for TeeReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = &mut *self;

        // Finish mirroring the previous chunk before anything else.
        while me.pending_pos < me.pending.len() {
            let n = ready!(Pin::new(&mut me.side).poll_write(cx, &me.pending[me.pending_pos..]))?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "tee branch closed",
                )));
            }
            me.pending_pos += n;
        }

        if me.done {
            return Poll::Ready(Ok(()));
        }

        if !me.eof {
            let before = buf.filled().len();
            ready!(Pin::new(&mut me.inner).poll_read(cx, buf))?;
            let filled = &buf.filled()[before..];
            if !filled.is_empty() {
                me.pending.clear();
                me.pending_pos = 0;
                me.pending.extend_from_slice(filled);
                return Poll::Ready(Ok(()));
            }
            me.eof = true;
        }

        // End of input: close the side branch so it observes EOF too.
        ready!(Pin::new(&mut me.side).poll_shutdown(cx))?;
        me.done = true;
        Poll::Ready(Ok(()))
    }
}
