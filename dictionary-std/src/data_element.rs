//! Data element dictionary implementation

use crate::entries::{DictionaryEntryRef, ENTRIES};
use dcmflow_core::dictionary::DataDictionary;
use dcmflow_core::{Tag, VR};
use once_cell::sync::Lazy;
use std::collections::HashMap;

static DICT: Lazy<StandardDataDictionaryRegistry> = Lazy::new(init_dictionary);

/// Retrieve a singleton instance of the standard dictionary registry.
///
/// Note that one does not generally have to call this
/// unless when retrieving the underlying registry is important.
/// The unit type [`StandardDataDictionary`]
/// already provides a lazy loaded singleton implementing the necessary traits.
#[inline]
pub fn registry() -> &'static StandardDataDictionaryRegistry {
    &DICT
}

/// The data struct actually containing the standard dictionary.
///
/// This structure is made opaque via the unit type [`StandardDataDictionary`],
/// which provides a lazy loaded singleton.
#[derive(Debug)]
pub struct StandardDataDictionaryRegistry {
    /// mapping: tag → entry
    by_tag: HashMap<Tag, &'static DictionaryEntryRef<'static>>,
    /// mapping: name → entry
    by_name: HashMap<&'static str, &'static DictionaryEntryRef<'static>>,
}

impl StandardDataDictionaryRegistry {
    fn new() -> StandardDataDictionaryRegistry {
        StandardDataDictionaryRegistry {
            by_tag: HashMap::with_capacity(ENTRIES.len()),
            by_name: HashMap::with_capacity(ENTRIES.len()),
        }
    }

    /// record the given dictionary entry reference
    fn index(&mut self, entry: &'static DictionaryEntryRef<'static>) -> &mut Self {
        self.by_tag.insert(entry.tag, entry);
        self.by_name.insert(entry.alias, entry);
        self
    }

    /// Retrieve the full entry for the given tag, if present.
    pub fn entry(&self, tag: Tag) -> Option<&'static DictionaryEntryRef<'static>> {
        self.by_tag.get(&tag).copied()
    }

    /// Retrieve the full entry for the given attribute alias, if present.
    pub fn entry_by_name(&self, name: &str) -> Option<&'static DictionaryEntryRef<'static>> {
        self.by_name.get(name).copied()
    }
}

fn init_dictionary() -> StandardDataDictionaryRegistry {
    let mut d = StandardDataDictionaryRegistry::new();
    for entry in ENTRIES {
        d.index(entry);
    }
    d
}

/// A data element dictionary which consults
/// the crate's global DICOM attribute registry.
///
/// This is the type which would generally be used
/// whenever a data element dictionary is needed,
/// such as when reading data sets in implicit VR.
///
/// The dictionary index is automatically initialized upon the first use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StandardDataDictionary;

impl DataDictionary for StandardDataDictionary {
    fn vr_of(&self, tag: Tag) -> Option<VR> {
        registry().entry(tag).map(|e| e.vr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_fetch_vr_by_tag() {
        let dict = StandardDataDictionary;
        assert_eq!(dict.vr_of(Tag(0x0008, 0x0018)), Some(VR::UI));
        assert_eq!(dict.vr_of(Tag(0x0010, 0x0010)), Some(VR::PN));
        assert_eq!(dict.vr_of(Tag(0x0028, 0x0010)), Some(VR::US));
        assert_eq!(dict.vr_of(Tag(0x0008, 0x2112)), Some(VR::SQ));
    }

    #[test]
    fn unknown_tags_miss() {
        let dict = StandardDataDictionary;
        assert_eq!(dict.vr_of(Tag(0x0009, 0x0001)), None);
        assert_eq!(dict.vr_of(Tag(0xABCD, 0xEF01)), None);
    }

    #[test]
    fn can_fetch_entry_by_name() {
        let entry = registry()
            .entry_by_name("PatientName")
            .expect("PatientName should be registered");
        assert_eq!(entry.tag, Tag(0x0010, 0x0010));
        assert_eq!(entry.vr, VR::PN);
    }
}
