//! This crate implements a standard DICOM attribute dictionary
//! for value representation inference,
//! along with constants for commonly used attribute tags and UIDs.
//!
//! - [`data_element`] holds the run-time dictionary,
//!   provided as a singleton behind the unit type
//!   [`StandardDataDictionary`].
//!   The records cover the attribute groups commonly found in
//!   image storage objects; it is a curated subset of [DICOM PS3.6],
//!   not the complete registry.
//! - [`tags`] maps attribute aliases to DICOM tags at compile time.
//! - [`uids`] declares normative DICOM unique identifiers,
//!   notably the transfer syntax UIDs that drive
//!   the explicit/implicit VR decision.
//!
//! [DICOM PS3.6]: https://dicom.nema.org/medical/dicom/current/output/chtml/part06/ps3.6.html
pub mod data_element;
pub mod tags;
pub mod uids;

mod entries;

pub use data_element::{StandardDataDictionary, StandardDataDictionaryRegistry};
pub use entries::DictionaryEntryRef;

#[cfg(test)]
mod tests {
    use dcmflow_core::Tag;

    /// tests for just a few attributes to make sure that the tag constants
    /// were well installed into the crate
    #[test]
    fn tags_constants_available() {
        use crate::tags::*;
        assert_eq!(PATIENT_NAME, Tag(0x0010, 0x0010));
        assert_eq!(MODALITY, Tag(0x0008, 0x0060));
        assert_eq!(PIXEL_DATA, Tag(0x7FE0, 0x0010));
        assert_eq!(TRANSFER_SYNTAX_UID, Tag(0x0002, 0x0010));
    }

    /// tests for the presence of a few UID constants
    #[test]
    fn uids_constants_available() {
        use crate::uids::*;
        assert_eq!(IMPLICIT_VR_LITTLE_ENDIAN, "1.2.840.10008.1.2");
        assert_eq!(EXPLICIT_VR_LITTLE_ENDIAN, "1.2.840.10008.1.2.1");
    }
}
