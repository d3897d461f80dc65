//! Core data element dictionary types.
//!
//! When a data set is encoded in implicit VR, the value representation of
//! each element is not in the stream and must be inferred by looking the
//! tag up in a dictionary. This module defines the seam for that lookup;
//! the standard attribute registry lives in the `dcmflow-dictionary-std`
//! crate.

use crate::header::{Tag, VR};

/// A dictionary of DICOM attributes,
/// queried by tag for the attribute's value representation.
pub trait DataDictionary {
    /// Retrieve the value representation registered for the given tag,
    /// or `None` if the tag is not in the dictionary.
    fn vr_of(&self, tag: Tag) -> Option<VR>;
}

impl<T: DataDictionary + ?Sized> DataDictionary for &T {
    fn vr_of(&self, tag: Tag) -> Option<VR> {
        (**self).vr_of(tag)
    }
}

/// An empty data dictionary: every lookup misses.
///
/// Useful for reading explicit VR data, where no inference is needed,
/// and for tests that exercise the `UN` fallback path.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubDataDictionary;

impl DataDictionary for StubDataDictionary {
    fn vr_of(&self, _: Tag) -> Option<VR> {
        None
    }
}
