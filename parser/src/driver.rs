//! The parse driver: spawns the producer task, checks the file head,
//! and pumps the state machine until the pipe drains.

use crate::cancel::CancelToken;
use crate::dataset::Dataset;
use crate::error::{BadPreambleSnafu, CancelledSnafu, Result, TooSmallSnafu, UnexpectedEndSnafu};
use crate::fsm::{StateMachine, StepProgress};
use crate::pipe::{self, PipeReader};
use crate::pool::Pools;
use dcmflow_core::DataDictionary;
use dcmflow_dictionary_std::StandardDataDictionary;
use crossbeam_channel::bounded;
use snafu::ensure;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Preamble plus the `DICM` magic code.
const FILE_HEAD_LENGTH: usize = 132;
const MAGIC_CODE: &[u8; 4] = b"DICM";

/// Tunables for one parse invocation.
///
/// The defaults match the intended production profile; every knob exists
/// so that embedders can trade memory for throughput and so that tests
/// can run with small, isolated resources.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pipe_block_size: usize,
    pipe_capacity_blocks: usize,
    bump_block_size: usize,
    large_value_threshold: usize,
    pools: Option<Arc<Pools>>,
    cancel: Option<CancelToken>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            pipe_block_size: 1 << 20,
            pipe_capacity_blocks: 4,
            bump_block_size: 16 << 10,
            large_value_threshold: 1 << 20,
            pools: None,
            cancel: None,
        }
    }
}

impl ParseOptions {
    /// Default options.
    pub fn new() -> Self {
        ParseOptions::default()
    }

    /// Size of the blocks the byte source reads into. Default 1 MiB.
    pub fn pipe_block_size(mut self, size: usize) -> Self {
        self.pipe_block_size = size.max(1);
        self
    }

    /// How many filled blocks the pipe may hold before the source
    /// suspends on backpressure. Default 4.
    pub fn pipe_capacity_blocks(mut self, blocks: usize) -> Self {
        self.pipe_capacity_blocks = blocks.max(1);
        self
    }

    /// Size of the shared block that short values are carved from.
    /// Default 16 KiB.
    pub fn bump_block_size(mut self, size: usize) -> Self {
        self.bump_block_size = size.max(1);
        self
    }

    /// Values at or above this many bytes rent from the large block
    /// pool. Default 1 MiB.
    pub fn large_value_threshold(mut self, threshold: usize) -> Self {
        self.large_value_threshold = threshold.max(1);
        self
    }

    /// Use the given pool set instead of the process-wide one.
    pub fn pools(mut self, pools: Arc<Pools>) -> Self {
        self.pools = Some(pools);
        self
    }

    /// Observe the given token for cancellation.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Parse a DICOM Part 10 stream into a data set,
/// consulting the standard dictionary in implicit VR data.
///
/// The returned [`Dataset`] owns all value memory; dropping it returns
/// that memory to the shared pools.
pub fn parse<R>(source: R) -> Result<Dataset>
where
    R: Read + Send,
{
    parse_with_options(source, &ParseOptions::default())
}

/// Parse a DICOM Part 10 stream with explicit options.
pub fn parse_with_options<R>(source: R, options: &ParseOptions) -> Result<Dataset>
where
    R: Read + Send,
{
    parse_with_dictionary(source, options, StandardDataDictionary)
}

/// Parse a DICOM Part 10 stream with explicit options and a custom
/// data dictionary for implicit VR inference.
pub fn parse_with_dictionary<R, D>(mut source: R, options: &ParseOptions, dict: D) -> Result<Dataset>
where
    R: Read + Send,
    D: DataDictionary,
{
    let cancel = options.cancel.clone().unwrap_or_default();
    let pools = options.pools.clone().unwrap_or_else(Pools::process);
    let block_size = options.pipe_block_size;

    let (tx, rx) = bounded(options.pipe_capacity_blocks);
    thread::scope(|scope| {
        let producer_cancel = cancel.clone();
        let source = &mut source;
        let _producer = scope.spawn(move || pipe::produce(source, tx, block_size, producer_cancel));

        let machine = StateMachine::new(
            dict,
            pools,
            options.bump_block_size,
            options.large_value_threshold,
            FILE_HEAD_LENGTH as u64,
        );
        drive(PipeReader::new(rx), machine, &cancel)
    })
}

fn drive<D>(mut reader: PipeReader, mut machine: StateMachine<D>, cancel: &CancelToken) -> Result<Dataset>
where
    D: DataDictionary,
{
    read_file_head(&mut reader, cancel)?;
    debug!("file head verified, reading data set");
    loop {
        ensure!(!cancel.is_cancelled(), CancelledSnafu);
        let consumed = {
            let mut view = reader.view();
            loop {
                match machine.step(&mut view)? {
                    StepProgress::Continue => {}
                    StepProgress::NeedMore => break,
                }
            }
            view.consumed()
        };
        reader.consume(consumed);
        if reader.is_completed() {
            // trailing bytes which cannot form an element are an error
            ensure!(
                reader.buffered() == 0,
                UnexpectedEndSnafu {
                    position: machine.position()
                }
            );
            return machine.finish();
        }
        reader.fill(cancel)?;
    }
}

/// Check the 128-byte preamble and the `DICM` magic code.
fn read_file_head(reader: &mut PipeReader, cancel: &CancelToken) -> Result<()> {
    while reader.buffered() < FILE_HEAD_LENGTH {
        if !reader.fill(cancel)? {
            return TooSmallSnafu {
                got: reader.buffered() as u64,
            }
            .fail();
        }
    }
    {
        let mut view = reader.view();
        let _ = view.skip(128);
        let mut magic = [0u8; 4];
        view.copy_to(&mut magic);
        ensure!(&magic == MAGIC_CODE, BadPreambleSnafu);
    }
    reader.consume(FILE_HEAD_LENGTH);
    Ok(())
}
