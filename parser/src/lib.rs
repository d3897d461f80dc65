#![crate_type = "lib"]
#![deny(trivial_casts, trivial_numeric_casts, unsafe_code, unstable_features)]
#![warn(unused_qualifications, unused_import_braces)]

//! An incremental, allocation-conscious parser for DICOM Part 10 streams.
//!
//! The parser runs as a producer/consumer pair over a bounded byte pipe:
//! the producer reads the source into fixed-size blocks while the
//! consumer drives a resumable five-stage state machine which tolerates
//! the available bytes ending anywhere, including inside a length field
//! or a value payload. All value bytes land in pooled arena blocks owned
//! by the resulting [`Dataset`]; the slices it hands out are views into
//! those blocks, and dropping the data set returns every block to the
//! shared pools.
//!
//! The file meta group is always read as explicit VR little endian.
//! When its transfer syntax element announces Implicit VR Little Endian,
//! the machine switches to dictionary-based VR inference for the rest of
//! the stream.
//!
//! ## Example
//!
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = std::fs::File::open("image.dcm")?;
//! let dataset = dcmflow_parser::parse(std::io::BufReader::new(file))?;
//! if let Some(uid) = dataset.get_raw((0x0008, 0x0018)) {
//!     println!("SOP Instance UID: {}", String::from_utf8_lossy(uid));
//! }
//! # Ok(())
//! # }
//! ```

mod arena;
mod cancel;
mod dataset;
mod driver;
mod fsm;
mod pipe;
mod pool;

pub mod error;

pub use cancel::CancelToken;
pub use dataset::{Dataset, Fragments};
pub use driver::{parse, parse_with_dictionary, parse_with_options, ParseOptions};
pub use error::{Error, Result};
pub use pool::{Pools, PoolsConfig};
