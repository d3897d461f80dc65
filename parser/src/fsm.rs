//! The resumable parse state machine.
//!
//! Decoding advances through five stages per element: group, element,
//! VR, length, value. Each stage either completes against the bytes
//! currently buffered or reports that it needs more, leaving the state
//! untouched; the driver then refills the pipe and re-enters at the
//! stored stage. Sequence nesting is held in an explicit stack of
//! frames, so the machine never recurses and nesting depth is bounded
//! only by the input.

use crate::arena::{Arena, ByteRange};
use crate::dataset::{Dataset, Item, ItemContent};
use crate::error::{
    DuplicateTagSnafu, MalformedItemSnafu, Result, UnexpectedEndSnafu,
    UnsupportedExplicitLengthItemSnafu, UnknownVrSnafu, ValueTooLargeSnafu,
};
use crate::pipe::ReadView;
use crate::pool::{Pools, TableKind};
use dcmflow_core::{DataDictionary, Length, Tag, VR};
use dcmflow_dictionary_std::uids;
use smallvec::SmallVec;
use snafu::ensure;
use std::sync::Arc;
use tracing::{debug, trace};

/// Largest supported value payload, in bytes.
pub(crate) const MAX_VALUE_LENGTH: u32 = 2_147_483_591;

/// Transfer Syntax UID (0002,0010).
const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);

/// The decoding stage the machine resumes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseStage {
    Group,
    Element,
    Vr,
    Length,
    Value,
}

/// Outcome of one [`StateMachine::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepProgress {
    /// The stage completed; call `step` again.
    Continue,
    /// Not enough bytes buffered; refill the pipe and re-enter.
    NeedMore,
}

/// One open sequence: its tag, the items collected so far,
/// and the item currently being filled, if any.
struct SequenceFrame {
    tag: Tag,
    items: Vec<Dataset>,
    open: Option<Dataset>,
}

/// An open fragment collection (undefined-length non-SQ value).
struct FragmentsState {
    tag: Tag,
    vr: VR,
    parts: SmallVec<[ByteRange; 2]>,
}

/// Write progress through the current value.
#[derive(Debug, Clone, Copy)]
struct ValueCursor {
    range: ByteRange,
    written: u32,
}

/// The scratch record driving one parse.
pub(crate) struct StateMachine<D> {
    dict: D,
    pools: Arc<Pools>,
    arena: Arena,
    root: Dataset,
    stage: ParseStage,
    group: u16,
    element: u16,
    vr: VR,
    length: u32,
    /// whether the current length came from a 16-bit field
    short_length: bool,
    explicit_vr: bool,
    /// set when the transfer syntax announced implicit VR;
    /// takes effect once the file meta group ends
    switch_armed: bool,
    seq_stack: Vec<SequenceFrame>,
    fragments: Option<FragmentsState>,
    cursor: ValueCursor,
    /// absolute offset of the next unread input byte
    position: u64,
}

impl<D> StateMachine<D>
where
    D: DataDictionary,
{
    pub(crate) fn new(
        dict: D,
        pools: Arc<Pools>,
        bump_block_size: usize,
        large_value_threshold: usize,
        start_position: u64,
    ) -> Self {
        StateMachine {
            dict,
            arena: Arena::new(Arc::clone(&pools), bump_block_size, large_value_threshold),
            root: Dataset::new(Arc::clone(&pools), TableKind::Root),
            pools,
            stage: ParseStage::Group,
            group: 0,
            element: 0,
            vr: VR::UN,
            length: 0,
            short_length: false,
            explicit_vr: true,
            switch_armed: false,
            seq_stack: Vec::new(),
            fragments: None,
            cursor: ValueCursor {
                range: ByteRange::EMPTY,
                written: 0,
            },
            position: start_position,
        }
    }

    /// The absolute offset of the next unread input byte.
    pub(crate) fn position(&self) -> u64 {
        self.position
    }

    fn tag(&self) -> Tag {
        Tag(self.group, self.element)
    }

    /// Run the stage the machine is currently in.
    pub(crate) fn step(&mut self, view: &mut ReadView<'_>) -> Result<StepProgress> {
        match self.stage {
            ParseStage::Group => self.step_group(view),
            ParseStage::Element => self.step_element(view),
            ParseStage::Vr => self.step_vr(view),
            ParseStage::Length => self.step_length(view),
            ParseStage::Value => self.step_value(view),
        }
    }

    /// Conclude the parse after the pipe has completed and drained.
    pub(crate) fn finish(self) -> Result<Dataset> {
        ensure!(
            self.stage == ParseStage::Group
                && self.seq_stack.is_empty()
                && self.fragments.is_none(),
            UnexpectedEndSnafu {
                position: self.position
            }
        );
        debug!(elements = self.root.len(), "parse complete");
        let arena = Arc::new(self.arena);
        let mut root = self.root;
        root.attach_arena(&arena);
        Ok(root)
    }

    fn step_group(&mut self, view: &mut ReadView<'_>) -> Result<StepProgress> {
        let Some(group) = view.read_u16() else {
            return Ok(StepProgress::NeedMore);
        };
        self.group = group;
        self.position += 2;
        self.stage = ParseStage::Element;
        Ok(StepProgress::Continue)
    }

    fn step_element(&mut self, view: &mut ReadView<'_>) -> Result<StepProgress> {
        let Some(element) = view.read_u16() else {
            return Ok(StepProgress::NeedMore);
        };
        self.element = element;
        self.position += 2;

        // the implicit VR switch takes effect after the file meta group
        if self.switch_armed && self.group > 0x0002 {
            self.explicit_vr = false;
            self.switch_armed = false;
            trace!(position = self.position, "switched to implicit VR");
        }

        let tag = self.tag();
        if tag.is_item() || tag.is_item_delimiter() || tag.is_sequence_delimiter() {
            // item markers carry no VR and no reserved padding
            self.stage = ParseStage::Length;
        } else if !self.explicit_vr {
            let vr = self.dict.vr_of(tag).unwrap_or(VR::UN);
            // a group length not in the dictionary is still an UL
            self.vr = if element == 0x0000 && vr == VR::UN {
                VR::UL
            } else {
                vr
            };
            self.stage = ParseStage::Length;
        } else {
            self.stage = ParseStage::Vr;
        }
        Ok(StepProgress::Continue)
    }

    fn step_vr(&mut self, view: &mut ReadView<'_>) -> Result<StepProgress> {
        let Some(bytes) = view.read_pair() else {
            return Ok(StepProgress::NeedMore);
        };
        let Some(vr) = VR::from_binary(bytes) else {
            return UnknownVrSnafu {
                bytes,
                position: self.position,
            }
            .fail();
        };
        self.vr = vr;
        self.position += 2;
        self.stage = ParseStage::Length;
        Ok(StepProgress::Continue)
    }

    fn step_length(&mut self, view: &mut ReadView<'_>) -> Result<StepProgress> {
        let tag = self.tag();
        if self.group == 0xFFFE {
            // the item group always carries a 32-bit length
            let Some(len) = view.read_u32() else {
                return Ok(StepProgress::NeedMore);
            };
            self.position += 4;
            return self.dispatch_item_marker(tag, Length(len));
        }

        // only item markers may appear while fragments are open
        ensure!(
            self.fragments.is_none(),
            MalformedItemSnafu {
                position: self.position
            }
        );

        if self.explicit_vr && !self.vr.has_32bit_length() {
            let Some(len) = view.read_u16() else {
                return Ok(StepProgress::NeedMore);
            };
            self.position += 2;
            self.length = u32::from(len);
            self.short_length = true;
            self.begin_value();
            return Ok(StepProgress::Continue);
        }

        let len = Length(if self.explicit_vr {
            // two reserved bytes, then the 32-bit length
            if view.remaining() < 6 {
                return Ok(StepProgress::NeedMore);
            }
            let _ = view.skip(2);
            let Some(len) = view.read_u32() else {
                return Ok(StepProgress::NeedMore);
            };
            self.position += 6;
            len
        } else {
            let Some(len) = view.read_u32() else {
                return Ok(StepProgress::NeedMore);
            };
            self.position += 4;
            len
        });

        if self.vr == VR::SQ {
            trace!(%tag, "sequence open");
            self.seq_stack.push(SequenceFrame {
                tag,
                items: Vec::new(),
                open: None,
            });
            self.stage = ParseStage::Group;
            return Ok(StepProgress::Continue);
        }
        match len.get() {
            None => {
                // undefined length outside SQ opens a fragment collection
                trace!(%tag, vr = %self.vr, "fragment collection open");
                self.fragments = Some(FragmentsState {
                    tag,
                    vr: self.vr,
                    parts: SmallVec::new(),
                });
                self.stage = ParseStage::Group;
                Ok(StepProgress::Continue)
            }
            Some(size) => {
                ensure!(
                    size <= MAX_VALUE_LENGTH,
                    ValueTooLargeSnafu {
                        length: size,
                        position: self.position
                    }
                );
                self.length = size;
                self.short_length = false;
                self.begin_value();
                Ok(StepProgress::Continue)
            }
        }
    }

    fn dispatch_item_marker(&mut self, tag: Tag, len: Length) -> Result<StepProgress> {
        if tag.is_item() {
            if self.fragments.is_some() {
                // a fragment item: the length is the fragment's byte count
                let size = match len.get() {
                    Some(size) if size <= MAX_VALUE_LENGTH => size,
                    _ => {
                        return ValueTooLargeSnafu {
                            length: len.0,
                            position: self.position,
                        }
                        .fail()
                    }
                };
                self.length = size;
                self.short_length = false;
                self.begin_value();
                return Ok(StepProgress::Continue);
            }
            let position = self.position;
            let Some(frame) = self.seq_stack.last_mut() else {
                return MalformedItemSnafu { position }.fail();
            };
            ensure!(
                len.is_undefined(),
                UnsupportedExplicitLengthItemSnafu {
                    length: len.0,
                    position
                }
            );
            // a nested item requires the previous one to be delimited
            ensure!(frame.open.is_none(), MalformedItemSnafu { position });
            frame.open = Some(Dataset::new(Arc::clone(&self.pools), TableKind::Item));
            self.stage = ParseStage::Group;
            Ok(StepProgress::Continue)
        } else if tag.is_item_delimiter() {
            let position = self.position;
            ensure!(self.fragments.is_none(), MalformedItemSnafu { position });
            let Some(frame) = self.seq_stack.last_mut() else {
                return MalformedItemSnafu { position }.fail();
            };
            let Some(dataset) = frame.open.take() else {
                return MalformedItemSnafu { position }.fail();
            };
            frame.items.push(dataset);
            self.stage = ParseStage::Group;
            Ok(StepProgress::Continue)
        } else if tag.is_sequence_delimiter() {
            // sequence delimitation closes fragments or the innermost sequence
            if let Some(fragments) = self.fragments.take() {
                trace!(tag = %fragments.tag, parts = fragments.parts.len(), "fragment collection closed");
                let item = Item {
                    vr: fragments.vr,
                    content: ItemContent::Fragments(fragments.parts),
                };
                self.insert_item(fragments.tag, item)?;
                self.stage = ParseStage::Group;
                return Ok(StepProgress::Continue);
            }
            let position = self.position;
            let Some(frame) = self.seq_stack.pop() else {
                return MalformedItemSnafu { position }.fail();
            };
            // an open item must be delimited before the sequence ends
            ensure!(frame.open.is_none(), MalformedItemSnafu { position });
            trace!(tag = %frame.tag, items = frame.items.len(), "sequence closed");
            let item = Item {
                vr: VR::SQ,
                content: ItemContent::Sequence(frame.items),
            };
            self.insert_item(frame.tag, item)?;
            self.stage = ParseStage::Group;
            Ok(StepProgress::Continue)
        } else {
            // only the three marker tags are meaningful in the item group
            MalformedItemSnafu {
                position: self.position,
            }
            .fail()
        }
    }

    fn begin_value(&mut self) {
        let range = if self.short_length {
            self.arena.alloc_short(self.length)
        } else {
            self.arena.alloc_long(self.length)
        };
        self.cursor = ValueCursor { range, written: 0 };
        self.stage = ParseStage::Value;
    }

    fn step_value(&mut self, view: &mut ReadView<'_>) -> Result<StepProgress> {
        if self.cursor.written < self.length {
            let range = self.cursor.range;
            let start = self.cursor.written as usize;
            let end = self.length as usize;
            let copied = view.copy_to(&mut self.arena.slice_mut(range)[start..end]);
            self.cursor.written += copied as u32;
            self.position += copied as u64;
            if self.cursor.written < self.length {
                return Ok(StepProgress::NeedMore);
            }
        }
        self.complete_value()
    }

    fn complete_value(&mut self) -> Result<StepProgress> {
        let range = self.cursor.range;
        if let Some(fragments) = self.fragments.as_mut() {
            fragments.parts.push(range);
            self.stage = ParseStage::Group;
            return Ok(StepProgress::Continue);
        }
        let tag = self.tag();
        if tag == TRANSFER_SYNTAX_UID && is_implicit_vr_uid(self.arena.slice(range)) {
            self.switch_armed = true;
            debug!("transfer syntax announces implicit VR");
        }
        // group lengths are parsed but not stored
        if self.element != 0x0000 {
            let item = Item {
                vr: self.vr,
                content: ItemContent::Raw(range),
            };
            self.insert_item(tag, item)?;
        }
        self.stage = ParseStage::Group;
        Ok(StepProgress::Continue)
    }

    /// Insert into the open sequence item, or the root data set when no
    /// sequence is open.
    fn insert_item(&mut self, tag: Tag, item: Item) -> Result<()> {
        let position = self.position;
        let target = match self.seq_stack.last_mut() {
            Some(frame) => match frame.open.as_mut() {
                Some(dataset) => dataset,
                // between items only markers are legal
                None => return MalformedItemSnafu { position }.fail(),
            },
            None => &mut self.root,
        };
        ensure!(target.insert(tag, item), DuplicateTagSnafu { tag, position });
        Ok(())
    }
}

/// Whether the value bytes name the Implicit VR Little Endian transfer
/// syntax, ignoring trailing NUL padding.
fn is_implicit_vr_uid(mut bytes: &[u8]) -> bool {
    while let [head @ .., 0] = bytes {
        bytes = head;
    }
    bytes == uids::IMPLICIT_VR_LITTLE_ENDIAN.as_bytes()
}
