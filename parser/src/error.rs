//! Error types raised while parsing a DICOM Part 10 stream.
//!
//! Every format error carries the byte offset at which it was detected,
//! counted from the start of the input (the preamble included).
//! Cancellation is reported through its own variant so that callers can
//! tell a deliberately abandoned parse apart from corrupted input.

use dcmflow_core::Tag;
use snafu::{Backtrace, Snafu};

/// The main error type for a failed parse.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The input ended before the 132-byte file head
    /// (128-byte preamble plus the `DICM` magic code).
    #[snafu(display("Input ended after {} bytes, before the 132-byte file head", got))]
    TooSmall { got: u64, backtrace: Backtrace },

    /// Bytes 128..132 of the input are not the `DICM` magic code.
    #[snafu(display("Invalid DICOM file (magic code check failed at offset 128)"))]
    BadPreamble { backtrace: Backtrace },

    /// An explicit VR pair is not one of the 34 known value representations.
    #[snafu(display(
        "Unknown value representation {:?} at offset {}",
        String::from_utf8_lossy(bytes),
        position
    ))]
    UnknownVr {
        bytes: [u8; 2],
        position: u64,
        backtrace: Backtrace,
    },

    /// Item or delimitation nesting is invalid:
    /// an item outside any sequence or fragment context,
    /// an orphan delimiter, a nested item without prior delimitation,
    /// or a stray element where only item markers may appear.
    #[snafu(display("Malformed item or delimitation at offset {}", position))]
    MalformedItem { position: u64, backtrace: Backtrace },

    /// A sequence item announced a defined length;
    /// only undefined-length (delimited) items are supported.
    #[snafu(display(
        "Sequence item with explicit length {} at offset {} is not supported",
        length,
        position
    ))]
    UnsupportedExplicitLengthItem {
        length: u32,
        position: u64,
        backtrace: Backtrace,
    },

    /// A value length exceeds the maximum supported payload size.
    #[snafu(display(
        "Value length {} at offset {} exceeds the maximum supported size",
        length,
        position
    ))]
    ValueTooLarge {
        length: u32,
        position: u64,
        backtrace: Backtrace,
    },

    /// The stream completed in the middle of an element
    /// or with an unterminated sequence or fragment container.
    #[snafu(display("Unexpected end of stream at offset {}", position))]
    UnexpectedEnd { position: u64, backtrace: Backtrace },

    /// The same tag occurred twice at one data set level.
    #[snafu(display("Duplicate tag {} at offset {}", tag, position))]
    DuplicateTag {
        tag: Tag,
        position: u64,
        backtrace: Backtrace,
    },

    /// The underlying byte source failed.
    #[snafu(display("Could not read from the byte source"))]
    ReadSource {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// The parse was cancelled through its cancellation token.
    #[snafu(display("Parsing was cancelled"))]
    Cancelled { backtrace: Backtrace },
}

/// Type alias for a result from this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
