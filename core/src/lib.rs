#![crate_type = "lib"]
#![deny(trivial_casts, trivial_numeric_casts, unsafe_code, unstable_features)]
#![warn(missing_debug_implementations, unused_qualifications, unused_import_braces)]

//! Core data types for reading DICOM data sets,
//! shared by the other crates in this project:
//! the attribute tag, the value representation code,
//! element length semantics, and the data dictionary seam
//! used to infer value representations in implicit VR data.

pub mod dictionary;
pub mod header;

pub use dictionary::{DataDictionary, StubDataDictionary};
pub use header::{Length, Tag, VR};
