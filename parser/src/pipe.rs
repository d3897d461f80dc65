//! The byte pipe between the source-reading producer and the parser.
//!
//! The producer publishes fixed-size segments over a bounded channel,
//! which is also the backpressure bound: when the parser falls behind,
//! the producer suspends on `send`. Completion is signalled by dropping
//! the sending side. The consumer half buffers the received segments and
//! lets the parser inspect them through a [`ReadView`], a unified
//! try-read interface over the logically contiguous, possibly
//! multi-segment byte range. Reads either succeed in full or report
//! insufficient bytes; no partial state is kept in the view itself.
//!
//! After a parse step the consumer reports how many bytes it actually
//! used; [`PipeReader::consume`] drops them and retains the remainder
//! for the next read.

use crate::cancel::CancelToken;
use crate::error::{CancelledSnafu, ReadSourceSnafu, Result};
use byteordered::byteorder::{ByteOrder, LittleEndian};
use crossbeam_channel::{select, Receiver, Sender};
use snafu::ResultExt;
use std::collections::VecDeque;
use std::io::Read;

/// A message from the producer: one filled segment, or the I/O error
/// which ended the production.
pub(crate) type PipeMessage = std::io::Result<Vec<u8>>;

/// Read the whole source into `block_size`-sized segments and publish
/// them to the channel. Runs on its own thread; returns when the source
/// is drained, the source fails, the consumer hangs up, or the token is
/// cancelled.
pub(crate) fn produce<R: Read>(
    source: &mut R,
    tx: Sender<PipeMessage>,
    block_size: usize,
    cancel: CancelToken,
) {
    loop {
        if cancel.is_cancelled() {
            tracing::trace!("byte source stopped by cancellation");
            return;
        }
        let mut block = vec![0; block_size];
        let message = match source.read(&mut block) {
            Ok(0) => break,
            Ok(n) => {
                block.truncate(n);
                Ok(block)
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => Err(e),
        };
        let failed = message.is_err();
        select! {
            send(tx, message) -> outcome => {
                if outcome.is_err() {
                    // consumer hung up; completion already observed there
                    return;
                }
            },
            recv(cancel.notified()) -> _ => return,
        }
        if failed {
            return;
        }
    }
    // sender drops here, which the consumer sees as completion
}

/// One buffered segment; `pos` marks how far it has been consumed.
#[derive(Debug)]
struct Segment {
    data: Vec<u8>,
    pos: usize,
}

/// The consumer half of the pipe.
#[derive(Debug)]
pub(crate) struct PipeReader {
    rx: Receiver<PipeMessage>,
    segments: VecDeque<Segment>,
    buffered: usize,
    completed: bool,
}

impl PipeReader {
    pub(crate) fn new(rx: Receiver<PipeMessage>) -> Self {
        PipeReader {
            rx,
            segments: VecDeque::new(),
            buffered: 0,
            completed: false,
        }
    }

    /// Number of bytes currently buffered and not yet consumed.
    pub(crate) fn buffered(&self) -> usize {
        self.buffered
    }

    /// Whether the producer has completed and every published segment
    /// has been received.
    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    /// Block until at least one more segment arrives or the producer
    /// completes. Returns `true` if new bytes were buffered.
    pub(crate) fn fill(&mut self, cancel: &CancelToken) -> Result<bool> {
        if self.completed {
            return Ok(false);
        }
        if cancel.is_cancelled() {
            return CancelledSnafu.fail();
        }
        let message = select! {
            recv(self.rx) -> msg => msg,
            recv(cancel.notified()) -> _ => return CancelledSnafu.fail(),
        };
        match message {
            Ok(msg) => {
                self.push(msg)?;
                // opportunistically drain whatever else is already queued
                while let Ok(msg) = self.rx.try_recv() {
                    self.push(msg)?;
                }
                Ok(true)
            }
            Err(_) => {
                self.completed = true;
                Ok(false)
            }
        }
    }

    fn push(&mut self, message: PipeMessage) -> Result<()> {
        let data = message.context(ReadSourceSnafu)?;
        if !data.is_empty() {
            self.buffered += data.len();
            self.segments.push_back(Segment { data, pos: 0 });
        }
        Ok(())
    }

    /// A fresh view over everything currently buffered.
    pub(crate) fn view(&self) -> ReadView<'_> {
        ReadView {
            segments: &self.segments,
            seg: 0,
            off: self.segments.front().map(|s| s.pos).unwrap_or(0),
            remaining: self.buffered,
            consumed: 0,
        }
    }

    /// Drop `n` bytes from the front of the buffer,
    /// retaining the rest for the next read.
    pub(crate) fn consume(&mut self, mut n: usize) {
        debug_assert!(n <= self.buffered);
        self.buffered -= n;
        while n > 0 {
            let front = self
                .segments
                .front_mut()
                .expect("consumed more than buffered");
            let available = front.data.len() - front.pos;
            if n >= available {
                n -= available;
                self.segments.pop_front();
            } else {
                front.pos += n;
                n = 0;
            }
        }
    }
}

/// A cursor over the buffered byte range.
///
/// Every read advances the cursor and the `consumed` tally;
/// a read for which not enough bytes are buffered returns `None`
/// and leaves the cursor untouched.
#[derive(Debug)]
pub(crate) struct ReadView<'a> {
    segments: &'a VecDeque<Segment>,
    seg: usize,
    off: usize,
    remaining: usize,
    consumed: usize,
}

impl ReadView<'_> {
    /// Bytes left in the view.
    pub(crate) fn remaining(&self) -> usize {
        self.remaining
    }

    /// Bytes read through this view so far.
    pub(crate) fn consumed(&self) -> usize {
        self.consumed
    }

    fn next_byte(&mut self) -> u8 {
        loop {
            let segment = &self.segments[self.seg];
            if self.off < segment.data.len() {
                let b = segment.data[self.off];
                self.off += 1;
                self.remaining -= 1;
                self.consumed += 1;
                return b;
            }
            self.seg += 1;
            self.off = 0;
        }
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.remaining < N {
            return None;
        }
        let mut buf = [0u8; N];
        for b in buf.iter_mut() {
            *b = self.next_byte();
        }
        Some(buf)
    }

    /// Read one little-endian unsigned 16-bit integer.
    pub(crate) fn read_u16(&mut self) -> Option<u16> {
        self.read_array::<2>().map(|b| LittleEndian::read_u16(&b))
    }

    /// Read one little-endian unsigned 32-bit integer.
    pub(crate) fn read_u32(&mut self) -> Option<u32> {
        self.read_array::<4>().map(|b| LittleEndian::read_u32(&b))
    }

    /// Read exactly two bytes.
    pub(crate) fn read_pair(&mut self) -> Option<[u8; 2]> {
        self.read_array::<2>()
    }

    /// Advance over `n` bytes.
    pub(crate) fn skip(&mut self, n: usize) -> Option<()> {
        if self.remaining < n {
            return None;
        }
        for _ in 0..n {
            self.next_byte();
        }
        Some(())
    }

    /// Copy up to `dst.len()` bytes into `dst`,
    /// returning how many were copied.
    pub(crate) fn copy_to(&mut self, dst: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < dst.len() && self.remaining > 0 {
            let segment = &self.segments[self.seg];
            let pos = self.off;
            if pos == segment.data.len() {
                self.seg += 1;
                self.off = 0;
                continue;
            }
            let chunk = &segment.data[pos..];
            let n = chunk.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&chunk[..n]);
            copied += n;
            self.off += n;
            self.remaining -= n;
            self.consumed += n;
        }
        copied
    }
}
