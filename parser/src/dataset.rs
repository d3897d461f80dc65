//! The materialised data set tree produced by a parse.
//!
//! A data set is an ordered map from tag to item, where an item's content
//! is raw bytes, a fragment list, or a sequence of nested data sets.
//! Raw bytes and fragments are windows into the parse's arena; the slices
//! returned by the accessors borrow from the data set and therefore
//! cannot outlive it.
//!
//! Dropping a data set is its disposal: nested data sets are disposed
//! recursively, the entry table goes back to its table pool, and once the
//! last data set of the parse is gone the arena returns every byte block
//! to its origin pool.

use crate::arena::{Arena, ByteRange};
use crate::pool::{Pools, TableKind};
use dcmflow_core::{Tag, VR};
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::sync::Arc;

/// The entry table of one data set level.
pub(crate) type Table = IndexMap<Tag, Item>;

/// One data element as stored in a data set.
#[derive(Debug)]
pub(crate) struct Item {
    pub vr: VR,
    pub content: ItemContent,
}

/// The payload of an item; exactly one form applies.
#[derive(Debug)]
pub(crate) enum ItemContent {
    /// Plain value bytes.
    Raw(ByteRange),
    /// Encapsulated fragments, in stream order.
    Fragments(SmallVec<[ByteRange; 2]>),
    /// Nested data sets, in stream order.
    Sequence(Vec<Dataset>),
}

/// An ordered collection of parsed data elements, keyed by tag.
///
/// Obtained from [`parse`](crate::parse); nested data sets are reachable
/// through [`get_sequence`](Dataset::get_sequence). Iteration follows the
/// order in which elements appeared in the stream.
#[derive(Debug)]
pub struct Dataset {
    pools: Arc<Pools>,
    kind: TableKind,
    table: Option<Table>,
    arena: Option<Arc<Arena>>,
}

impl Dataset {
    pub(crate) fn new(pools: Arc<Pools>, kind: TableKind) -> Self {
        let table = pools.rent_table(kind);
        Dataset {
            pools,
            kind,
            table: Some(table),
            arena: None,
        }
    }

    /// Insert an item, refusing duplicates.
    /// Returns `false` when the tag is already present.
    pub(crate) fn insert(&mut self, tag: Tag, item: Item) -> bool {
        match self.table.as_mut() {
            Some(table) if table.contains_key(&tag) => false,
            Some(table) => {
                table.insert(tag, item);
                true
            }
            None => false,
        }
    }

    /// Hand every data set in this tree its arena handle.
    /// Called once, after a successful parse.
    pub(crate) fn attach_arena(&mut self, arena: &Arc<Arena>) {
        self.arena = Some(Arc::clone(arena));
        if let Some(table) = self.table.as_mut() {
            for item in table.values_mut() {
                if let ItemContent::Sequence(children) = &mut item.content {
                    for child in children {
                        child.attach_arena(arena);
                    }
                }
            }
        }
    }

    fn item(&self, tag: Tag) -> Option<&Item> {
        self.table.as_ref()?.get(&tag)
    }

    /// The raw value bytes of the element with the given tag,
    /// or `None` if the tag is absent or its content is a sequence
    /// or fragment list.
    pub fn get_raw<T: Into<Tag>>(&self, tag: T) -> Option<&[u8]> {
        match &self.item(tag.into())?.content {
            ItemContent::Raw(range) => Some(self.arena.as_ref()?.slice(*range)),
            _ => None,
        }
    }

    /// The nested data sets of the sequence with the given tag,
    /// or `None` if the tag is absent or not sequence-valued.
    pub fn get_sequence<T: Into<Tag>>(&self, tag: T) -> Option<&[Dataset]> {
        match &self.item(tag.into())?.content {
            ItemContent::Sequence(children) => Some(children.as_slice()),
            _ => None,
        }
    }

    /// The encapsulated fragments of the element with the given tag,
    /// or `None` if the tag is absent or not fragment-valued.
    pub fn get_fragments<T: Into<Tag>>(&self, tag: T) -> Option<Fragments<'_>> {
        match &self.item(tag.into())?.content {
            ItemContent::Fragments(parts) => {
                let arena: &Arena = self.arena.as_ref()?;
                Some(Fragments {
                    arena,
                    parts,
                    next: 0,
                })
            }
            _ => None,
        }
    }

    /// The value representation of the element with the given tag.
    pub fn vr_of<T: Into<Tag>>(&self, tag: T) -> Option<VR> {
        self.item(tag.into()).map(|item| item.vr)
    }

    /// Whether an element with the given tag is present at this level.
    pub fn contains<T: Into<Tag>>(&self, tag: T) -> bool {
        self.item(tag.into()).is_some()
    }

    /// Number of elements at this data set level.
    pub fn len(&self) -> usize {
        self.table.as_ref().map_or(0, Table::len)
    }

    /// Whether this data set level holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The tags at this level, in the order they appeared in the stream.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.table.as_ref().into_iter().flat_map(|t| t.keys().copied())
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            // clearing the table disposes nested data sets first
            self.pools.give_back_table(self.kind, table);
        }
    }
}

/// Iterator over the fragments of an encapsulated value,
/// yielding each fragment's bytes in stream order.
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    arena: &'a Arena,
    parts: &'a [ByteRange],
    next: usize,
}

impl<'a> Iterator for Fragments<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let range = *self.parts.get(self.next)?;
        self.next += 1;
        Some(self.arena.slice(range))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.parts.len() - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Fragments<'_> {}
