//! End-to-end tests over synthesised DICOM Part 10 byte streams.

use dcmflow_core::{Tag, VR};
use dcmflow_parser::{
    parse, parse_with_options, CancelToken, Dataset, Error, ParseOptions, Pools,
};
use matches::assert_matches;
use std::io::{Cursor, Read};
use std::sync::Arc;

const UNDEFINED: u32 = 0xFFFF_FFFF;

/// Builds a Part 10 byte stream: 128-byte preamble, `DICM`, elements.
struct FileBuilder {
    bytes: Vec<u8>,
}

impl FileBuilder {
    fn new() -> Self {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        FileBuilder { bytes }
    }

    fn tag(mut self, group: u16, element: u16) -> Self {
        self.bytes.extend_from_slice(&group.to_le_bytes());
        self.bytes.extend_from_slice(&element.to_le_bytes());
        self
    }

    /// Explicit VR element with a 16-bit length.
    fn short(self, group: u16, element: u16, vr: &[u8; 2], value: &[u8]) -> Self {
        let mut b = self.tag(group, element);
        b.bytes.extend_from_slice(vr);
        b.bytes
            .extend_from_slice(&(value.len() as u16).to_le_bytes());
        b.bytes.extend_from_slice(value);
        b
    }

    /// Explicit VR element with reserved bytes and a 32-bit length.
    fn long(self, group: u16, element: u16, vr: &[u8; 2], len: u32, value: &[u8]) -> Self {
        let mut b = self.tag(group, element);
        b.bytes.extend_from_slice(vr);
        b.bytes.extend_from_slice(&[0, 0]);
        b.bytes.extend_from_slice(&len.to_le_bytes());
        b.bytes.extend_from_slice(value);
        b
    }

    /// Implicit VR element (32-bit length, no inline VR).
    fn implicit(self, group: u16, element: u16, value: &[u8]) -> Self {
        let mut b = self.tag(group, element);
        b.bytes
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        b.bytes.extend_from_slice(value);
        b
    }

    /// An item-group marker: tag plus a 32-bit length, no VR.
    fn marker(self, element: u16, len: u32) -> Self {
        let mut b = self.tag(0xFFFE, element);
        b.bytes.extend_from_slice(&len.to_le_bytes());
        b
    }

    fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// The usual two-element file meta group for the given
    /// transfer syntax UID.
    fn meta(self, transfer_syntax: &[u8]) -> Self {
        self.short(0x0002, 0x0002, b"UI", b"1.2.840.10008.5.1.4.1.1.7\0")
            .short(0x0002, 0x0010, b"UI", transfer_syntax)
    }

    fn build(self) -> Vec<u8> {
        self.bytes
    }
}

const EXPLICIT_LE: &[u8] = b"1.2.840.10008.1.2.1\0";
const IMPLICIT_LE: &[u8] = b"1.2.840.10008.1.2\0";

/// Decode a UI/LO style value, trimming trailing NUL padding.
fn text(bytes: &[u8]) -> &str {
    std::str::from_utf8(bytes)
        .expect("value should be ASCII")
        .trim_end_matches('\0')
}

fn parse_bytes(bytes: Vec<u8>) -> Result<Dataset, Error> {
    parse(Cursor::new(bytes))
}

fn assert_same_dataset(a: &Dataset, b: &Dataset) {
    let tags_a: Vec<Tag> = a.tags().collect();
    let tags_b: Vec<Tag> = b.tags().collect();
    assert_eq!(tags_a, tags_b);
    for tag in tags_a {
        assert_eq!(a.vr_of(tag), b.vr_of(tag), "VR mismatch at {}", tag);
        assert_eq!(a.get_raw(tag), b.get_raw(tag), "raw mismatch at {}", tag);
        match (a.get_sequence(tag), b.get_sequence(tag)) {
            (Some(items_a), Some(items_b)) => {
                assert_eq!(items_a.len(), items_b.len());
                for (ia, ib) in items_a.iter().zip(items_b) {
                    assert_same_dataset(ia, ib);
                }
            }
            (None, None) => {}
            _ => panic!("sequence content mismatch at {}", tag),
        }
        let fragments_a = a.get_fragments(tag).map(|f| f.collect::<Vec<_>>());
        let fragments_b = b.get_fragments(tag).map(|f| f.collect::<Vec<_>>());
        assert_eq!(fragments_a, fragments_b, "fragment mismatch at {}", tag);
    }
}

#[test]
fn explicit_vr_value_retrieval() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .short(
            0x0008,
            0x0018,
            b"UI",
            b"2.25.332838821141227624838581964210008219211",
        )
        .short(0x0040, 0x2016, b"LO", b"ORDER2024081216321")
        .build();
    let dataset = parse_bytes(file).unwrap();
    assert_eq!(
        text(dataset.get_raw((0x0008, 0x0018)).unwrap()),
        "2.25.332838821141227624838581964210008219211"
    );
    assert_eq!(
        text(dataset.get_raw((0x0040, 0x2016)).unwrap()),
        "ORDER2024081216321"
    );
    assert_eq!(dataset.vr_of((0x0008, 0x0018)), Some(VR::UI));
}

#[test]
fn implicit_vr_value_retrieval() {
    let file = FileBuilder::new()
        .meta(IMPLICIT_LE)
        .implicit(
            0x0008,
            0x0018,
            b"1.2.840.113619.2.1.2411.1031152382.365.1.736169244",
        )
        .implicit(0x0028, 0x1054, b"US")
        .build();
    let dataset = parse_bytes(file).unwrap();
    assert_eq!(
        text(dataset.get_raw((0x0008, 0x0018)).unwrap()),
        "1.2.840.113619.2.1.2411.1031152382.365.1.736169244"
    );
    assert_eq!(text(dataset.get_raw((0x0028, 0x1054)).unwrap()), "US");
    // the VRs come from the dictionary, not the stream
    assert_eq!(dataset.vr_of((0x0008, 0x0018)), Some(VR::UI));
    assert_eq!(dataset.vr_of((0x0028, 0x1054)), Some(VR::LO));
}

#[test]
fn implicit_vr_unknown_tag_falls_back_to_un() {
    let file = FileBuilder::new()
        .meta(IMPLICIT_LE)
        .implicit(0x0009, 0x0011, b"\x01\x02\x03\x04")
        .build();
    let dataset = parse_bytes(file).unwrap();
    assert_eq!(dataset.vr_of((0x0009, 0x0011)), Some(VR::UN));
    assert_eq!(
        dataset.get_raw((0x0009, 0x0011)),
        Some(b"\x01\x02\x03\x04".as_ref())
    );
}

#[test]
fn nested_sequence_navigation() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        // SourceImageSequence > item > PurposeOfReferenceCodeSequence > item
        .long(0x0008, 0x2112, b"SQ", UNDEFINED, b"")
        .marker(0xE000, UNDEFINED)
        .short(0x0008, 0x1150, b"UI", b"1.2.840.10008.5.1.4.1.1.7\0")
        .long(0x0040, 0xA170, b"SQ", UNDEFINED, b"")
        .marker(0xE000, UNDEFINED)
        .short(0x0008, 0x0100, b"SH", b"121320")
        .short(0x0008, 0x0104, b"LO", b"Uncompressed predecessor")
        .marker(0xE00D, 0)
        .marker(0xE0DD, 0)
        .marker(0xE00D, 0)
        .marker(0xE0DD, 0)
        .short(0x0020, 0x0013, b"IS", b"1 ")
        .build();
    let dataset = parse_bytes(file).unwrap();

    let sources = dataset.get_sequence((0x0008, 0x2112)).unwrap();
    assert!(!sources.is_empty());
    let purposes = sources[0].get_sequence((0x0040, 0xA170)).unwrap();
    assert!(!purposes.is_empty());
    assert_eq!(
        text(purposes[0].get_raw((0x0008, 0x0104)).unwrap()),
        "Uncompressed predecessor"
    );
    // elements after the sequence still land at the root level
    assert_eq!(dataset.get_raw((0x0020, 0x0013)), Some(b"1 ".as_ref()));
}

#[test]
fn sequence_with_three_items() {
    let mut builder = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .long(0x0008, 0x1115, b"SQ", UNDEFINED, b"");
    for n in [b"1 ", b"2 ", b"3 "] {
        builder = builder
            .marker(0xE000, UNDEFINED)
            .short(0x0020, 0x0011, b"IS", n)
            .short(0x0020, 0x0013, b"IS", n)
            .marker(0xE00D, 0);
    }
    let file = builder.marker(0xE0DD, 0).build();
    let dataset = parse_bytes(file).unwrap();

    let items = dataset.get_sequence((0x0008, 0x1115)).unwrap();
    assert_eq!(items.len(), 3);
    for item in items {
        let tags: Vec<Tag> = item.tags().collect();
        assert_eq!(tags, vec![Tag(0x0020, 0x0011), Tag(0x0020, 0x0013)]);
    }
    assert_eq!(items[2].get_raw((0x0020, 0x0011)), Some(b"3 ".as_ref()));
}

#[test]
fn missing_preamble_is_rejected() {
    let err = parse_bytes(vec![0xAB; 200]).unwrap_err();
    assert_matches!(err, Error::BadPreamble { .. });
}

#[test]
fn short_input_is_rejected() {
    let err = parse_bytes(vec![0u8; 64]).unwrap_err();
    assert_matches!(err, Error::TooSmall { got: 64, .. });
}

#[test]
fn head_only_file_yields_an_empty_dataset() {
    let dataset = parse_bytes(FileBuilder::new().build()).unwrap();
    assert!(dataset.is_empty());
    assert_eq!(dataset.len(), 0);
}

#[test]
fn encapsulated_pixel_data_fragments() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .long(0x7FE0, 0x0010, b"OB", UNDEFINED, b"")
        .marker(0xE000, 4)
        .raw(b"\x01\x02\x03\x04")
        .marker(0xE000, 8)
        .raw(b"\x05\x06\x07\x08\x09\x0A\x0B\x0C")
        .marker(0xE0DD, 0)
        .build();
    let dataset = parse_bytes(file).unwrap();

    assert_eq!(dataset.vr_of((0x7FE0, 0x0010)), Some(VR::OB));
    assert_eq!(dataset.get_raw((0x7FE0, 0x0010)), None);
    let fragments = dataset.get_fragments((0x7FE0, 0x0010)).unwrap();
    assert_eq!(fragments.len(), 2);
    let parts: Vec<&[u8]> = fragments.collect();
    assert_eq!(parts[0], b"\x01\x02\x03\x04");
    assert_eq!(parts[1], b"\x05\x06\x07\x08\x09\x0A\x0B\x0C");
}

#[test]
fn group_length_elements_are_discarded() {
    let file = FileBuilder::new()
        .short(0x0002, 0x0000, b"UL", &28u32.to_le_bytes())
        .meta(EXPLICIT_LE)
        .short(0x0008, 0x0000, b"UL", &10u32.to_le_bytes())
        .short(0x0008, 0x0060, b"CS", b"CT")
        .build();
    let dataset = parse_bytes(file).unwrap();
    assert!(!dataset.contains((0x0002, 0x0000)));
    assert!(!dataset.contains((0x0008, 0x0000)));
    assert_eq!(dataset.get_raw((0x0008, 0x0060)), Some(b"CT".as_ref()));
}

#[test]
fn insertion_order_follows_the_stream() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .short(0x0010, 0x0010, b"PN", b"Doe^John")
        .short(0x0008, 0x0060, b"CS", b"MR")
        .build();
    let dataset = parse_bytes(file).unwrap();
    let tags: Vec<Tag> = dataset.tags().collect();
    assert_eq!(
        tags,
        vec![
            Tag(0x0002, 0x0002),
            Tag(0x0002, 0x0010),
            Tag(0x0010, 0x0010),
            Tag(0x0008, 0x0060),
        ]
    );
}

#[test]
fn chunk_size_does_not_affect_the_result() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .short(0x0008, 0x0060, b"CS", b"CT")
        .long(0x0008, 0x2112, b"SQ", UNDEFINED, b"")
        .marker(0xE000, UNDEFINED)
        .short(0x0008, 0x0104, b"LO", b"Uncompressed predecessor")
        .marker(0xE00D, 0)
        .marker(0xE0DD, 0)
        .long(0x7FE0, 0x0010, b"OB", UNDEFINED, b"")
        .marker(0xE000, 4)
        .raw(b"\xDE\xAD\xBE\xEF")
        .marker(0xE0DD, 0)
        .build();

    let whole = parse_bytes(file.clone()).unwrap();
    for block_size in 1..=48 {
        let options = ParseOptions::new().pipe_block_size(block_size);
        let chunked = parse_with_options(Cursor::new(file.clone()), &options)
            .unwrap_or_else(|e| panic!("block size {} failed: {}", block_size, e));
        assert_same_dataset(&whole, &chunked);
    }
}

#[test]
fn duplicate_tags_are_rejected() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .short(0x0010, 0x0020, b"LO", b"A1")
        .short(0x0010, 0x0020, b"LO", b"A2")
        .build();
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(
        err,
        Error::DuplicateTag {
            tag: Tag(0x0010, 0x0020),
            ..
        }
    );
}

#[test]
fn unknown_vr_pairs_are_rejected() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .short(0x0008, 0x0060, b"QX", b"CT")
        .build();
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(err, Error::UnknownVr { bytes: [b'Q', b'X'], .. });
}

#[test]
fn truncated_value_is_an_unexpected_end() {
    let mut file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .short(0x0010, 0x0010, b"PN", b"Doe^John")
        .build();
    file.truncate(file.len() - 3);
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(err, Error::UnexpectedEnd { .. });
}

#[test]
fn truncated_length_field_is_an_unexpected_end() {
    let mut file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .short(0x0010, 0x0010, b"PN", b"Doe^John")
        .build();
    // cut inside the 16-bit length field of the last element
    file.truncate(file.len() - 8 - 1);
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(err, Error::UnexpectedEnd { .. });
}

#[test]
fn unterminated_sequence_is_an_unexpected_end() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .long(0x0008, 0x2112, b"SQ", UNDEFINED, b"")
        .marker(0xE000, UNDEFINED)
        .build();
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(err, Error::UnexpectedEnd { .. });
}

#[test]
fn explicit_length_sequence_items_are_rejected() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .long(0x0008, 0x2112, b"SQ", UNDEFINED, b"")
        .marker(0xE000, 0)
        .build();
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(err, Error::UnsupportedExplicitLengthItem { length: 0, .. });
}

#[test]
fn orphan_item_delimiter_is_malformed() {
    let file = FileBuilder::new().meta(EXPLICIT_LE).marker(0xE00D, 0).build();
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(err, Error::MalformedItem { .. });
}

#[test]
fn item_outside_any_container_is_malformed() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .marker(0xE000, UNDEFINED)
        .build();
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(err, Error::MalformedItem { .. });
}

#[test]
fn undefined_length_fragment_items_are_rejected() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .long(0x7FE0, 0x0010, b"OB", UNDEFINED, b"")
        .marker(0xE000, UNDEFINED)
        .build();
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(err, Error::ValueTooLarge { length: UNDEFINED, .. });
}

#[test]
fn oversized_values_are_rejected() {
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .long(0x7FE0, 0x0010, b"OB", 2_147_483_592, b"")
        .build();
    let err = parse_bytes(file).unwrap_err();
    assert_matches!(
        err,
        Error::ValueTooLarge {
            length: 2_147_483_592,
            ..
        }
    );
}

#[test]
fn disposal_returns_every_rented_block() {
    let pools = Arc::new(Pools::new());
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .short(0x0008, 0x0060, b"CS", b"CT")
        .long(0x7FE0, 0x0010, b"OB", 8, b"\x00\x01\x02\x03\x04\x05\x06\x07")
        .long(0x0008, 0x2112, b"SQ", UNDEFINED, b"")
        .marker(0xE000, UNDEFINED)
        .short(0x0008, 0x0104, b"LO", b"Uncompressed predecessor")
        .marker(0xE00D, 0)
        .marker(0xE0DD, 0)
        .build();
    let options = ParseOptions::new().pools(Arc::clone(&pools));
    let dataset = parse_with_options(Cursor::new(file), &options).unwrap();

    assert!(pools.outstanding_blocks() > 0);
    assert!(pools.outstanding_tables() > 0);
    drop(dataset);
    assert_eq!(pools.outstanding_blocks(), 0);
    assert_eq!(pools.outstanding_tables(), 0);
}

#[test]
fn raw_slices_match_the_input_bytes() {
    let value = b"2.25.332838821141227624838581964210008219211";
    let file = FileBuilder::new()
        .meta(EXPLICIT_LE)
        .short(0x0008, 0x0018, b"UI", value)
        .build();
    // locate the value window in the input
    let offset = file
        .windows(value.len())
        .position(|w| w == value)
        .unwrap();
    let dataset = parse_bytes(file.clone()).unwrap();
    assert_eq!(
        dataset.get_raw((0x0008, 0x0018)).unwrap(),
        &file[offset..offset + value.len()]
    );
}

/// A source which cancels the given token after a number of reads.
struct CancelAfter {
    data: Cursor<Vec<u8>>,
    token: CancelToken,
    reads: usize,
    cancel_at: usize,
}

impl Read for CancelAfter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.reads == self.cancel_at {
            self.token.cancel();
        }
        self.reads += 1;
        self.data.read(buf)
    }
}

#[test]
fn cancellation_before_the_parse_starts() {
    let token = CancelToken::new();
    token.cancel();
    let file = FileBuilder::new().meta(EXPLICIT_LE).build();
    let options = ParseOptions::new().cancel_token(token);
    let err = parse_with_options(Cursor::new(file), &options).unwrap_err();
    assert_matches!(err, Error::Cancelled { .. });
}

#[test]
fn cancellation_mid_parse_releases_every_block() {
    let pools = Arc::new(Pools::new());
    let mut builder = FileBuilder::new().meta(EXPLICIT_LE);
    for element in 0u16..64 {
        builder = builder.short(0x0009, 0x1000 + element, b"LO", b"0123456789ABCDEF");
    }
    let token = CancelToken::new();
    let source = CancelAfter {
        data: Cursor::new(builder.build()),
        token: token.clone(),
        reads: 0,
        cancel_at: 2,
    };
    let options = ParseOptions::new()
        .pools(Arc::clone(&pools))
        .pipe_block_size(16)
        .cancel_token(token);
    let err = parse_with_options(source, &options).unwrap_err();
    assert_matches!(err, Error::Cancelled { .. });
    assert_eq!(pools.outstanding_blocks(), 0);
    assert_eq!(pools.outstanding_tables(), 0);
}
