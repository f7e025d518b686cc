//! Progress reporting for blob transfers.
//!
//! Two independent mechanisms exist. The *report sink* renders a textual
//! byte-count bar per blob plus step messages, for humans watching a copy.
//! The *progress channel* delivers rate-limited [`ProgressUpdate`] events to
//! a subscriber, for programs driving a UI. Both are best-effort: neither
//! ever blocks or fails the transfer, and channel events are dropped when
//! the subscriber lags.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

use crate::transport::BlobInfo;

/// A point-in-time progress event for one artifact.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// The blob being transferred.
    pub artifact: BlobInfo,
    /// Bytes transferred so far.
    pub offset: u64,
}

/// Stream wrapper emitting [`ProgressUpdate`] events on a wall-clock
/// interval.
///
/// Emission is non-blocking: if the channel is full the event is dropped.
/// Subscribers must not assume they see every offset.
pub struct ProgressReader<R> {
    inner: R,
    channel: mpsc::Sender<ProgressUpdate>,
    interval: Duration,
    artifact: BlobInfo,
    offset: u64,
    last_emitted: Instant,
}

impl<R: AsyncRead + Unpin> ProgressReader<R> {
    pub fn new(
        inner: R,
        channel: mpsc::Sender<ProgressUpdate>,
        interval: Duration,
        artifact: BlobInfo,
    ) -> Self {
        Self {
            inner,
            channel,
            interval,
            artifact,
            offset: 0,
            last_emitted: Instant::now(),
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = &mut *self;
        let before = buf.filled().len();
        ready!(Pin::new(&mut me.inner).poll_read(cx, buf))?;
        let n = buf.filled().len() - before;
        if n > 0 {
            me.offset += n as u64;
            if me.last_emitted.elapsed() >= me.interval {
                // Drop-on-full; progress must never block I/O.
                let _ = me.channel.try_send(ProgressUpdate {
                    artifact: me.artifact.clone(),
                    offset: me.offset,
                });
                me.last_emitted = Instant::now();
            }
        }
        Poll::Ready(Ok(()))
    }
}

/// The human-facing report sink: a [`MultiProgress`] plus helpers to print
/// step messages and draw per-blob byte bars.
pub(crate) struct ReportSink {
    multi: MultiProgress,
}

impl ReportSink {
    /// Uses the caller's sink, or a hidden one when the caller did not ask
    /// for reporting.
    pub fn new(multi: Option<MultiProgress>) -> Self {
        Self {
            multi: multi
                .unwrap_or_else(|| MultiProgress::with_draw_target(ProgressDrawTarget::hidden())),
        }
    }

    /// Prints a step message above the active bars. Best-effort.
    pub fn println(&self, msg: impl AsRef<str>) {
        let _ = self.multi.println(msg);
    }

    /// Adds a byte-count bar for one blob transfer. Unknown sizes get a
    /// spinner instead of a bounded bar.
    pub fn blob_bar(&self, info: &BlobInfo) -> ProgressBar {
        let bar = if info.size >= 0 {
            let bar = self.multi.add(ProgressBar::new(info.size as u64));
            bar.set_style(
                ProgressStyle::with_template(
                    "{bar:40.cyan/blue} {decimal_bytes:>8}/{decimal_total_bytes:8}",
                )
                .unwrap()
                .progress_chars("##-"),
            );
            bar
        } else {
            let bar = self.multi.add(ProgressBar::new_spinner());
            bar.set_style(
                ProgressStyle::with_template("{spinner} {decimal_bytes:>8}").unwrap(),
            );
            bar
        };
        bar
    }
}
