//! Compression framing detection and streaming (de)compression.
//!
//! Detection peeks at the first bytes of a blob stream and re-prefixes them,
//! so no bytes are ever lost. Decompression is used only on the diffID side
//! branch; the main transfer path never alters blob bytes except when
//! compressing an uncompressed layer on the fly.

use std::io::Cursor;

use async_compression::tokio::bufread::{GzipDecoder, GzipEncoder, ZstdDecoder};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::constants::{COMPRESSION_PEEK_LEN, PIPE_CAPACITY};
use crate::error::Result;
use crate::transport::BlobReader;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// Compression framings the engine can recognize and undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    Gzip,
    Zstd,
}

impl CompressionFormat {
    /// Identifies a framing from a stream prefix, if any.
    pub fn sniff(prefix: &[u8]) -> Option<Self> {
        if prefix.starts_with(&GZIP_MAGIC) {
            Some(Self::Gzip)
        } else if prefix.starts_with(&ZSTD_MAGIC) {
            Some(Self::Zstd)
        } else {
            None
        }
    }
}

/// Peeks at `stream` to identify compression framing.
///
/// Returns the detected format (if any) and a stream that yields exactly the
/// original byte sequence, peeked prefix included.
pub async fn detect_compression(mut stream: BlobReader) -> Result<(Option<CompressionFormat>, BlobReader)> {
    let mut prefix = vec![0u8; COMPRESSION_PEEK_LEN];
    let mut filled = 0;
    // Short streams are fine; read until the peek buffer is full or EOF.
    while filled < prefix.len() {
        let n = stream.read(&mut prefix[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    prefix.truncate(filled);

    let format = CompressionFormat::sniff(&prefix);
    let rewound: BlobReader = Box::new(Cursor::new(prefix).chain(stream));
    Ok((format, rewound))
}

/// Wraps `stream` in a decoder for the given framing.
pub fn decompress(format: CompressionFormat, stream: impl AsyncRead + Send + Unpin + 'static) -> BlobReader {
    match format {
        CompressionFormat::Gzip => Box::new(GzipDecoder::new(BufReader::new(stream))),
        CompressionFormat::Zstd => Box::new(ZstdDecoder::new(BufReader::new(stream))),
    }
}

/// Spawns a side task that gzip-compresses `stream` through an in-memory
/// pipe, returning the compressed end.
///
/// The task ends when the input reaches EOF or when the returned reader is
/// dropped (the write side then fails with a broken pipe and the task
/// exits). Errors on the input surface as read errors on the returned
/// stream.
pub(crate) fn spawn_compressor(stream: BlobReader) -> BlobReader {
    let (mut pipe_write, pipe_read) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(async move {
        let mut encoder = GzipEncoder::new(BufReader::new(stream));
        // Either side closing terminates the copy; nothing to report here,
        // the consumer observes the outcome through the pipe.
        let _ = tokio::io::copy(&mut encoder, &mut pipe_write).await;
    });
    Box::new(pipe_read)
}
