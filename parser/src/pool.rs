//! Process-wide pools for value byte blocks and data set tables.
//!
//! All pools are bounded lock-free FIFOs. Rent and return may happen
//! concurrently from independent parse invocations. Retention caps are
//! hard: a return that finds its pool full hands the container back to
//! the allocator instead. Returned containers are cleared before they
//! are offered for reuse.

use crate::dataset::Table;
use crossbeam_queue::ArrayQueue;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Where an arena block was rented from, so it can go back there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockOrigin {
    /// The small byte-block pool.
    Small,
    /// The large byte-block pool.
    Large,
}

/// Which table pool a data set's entry table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableKind {
    /// A root data set.
    Root,
    /// A sequence item data set.
    Item,
}

/// A bounded pool of reusable byte blocks.
#[derive(Debug)]
struct BytePool {
    queue: ArrayQueue<Vec<u8>>,
    /// blocks above this capacity are not retained
    max_block_capacity: usize,
    outstanding: AtomicUsize,
}

impl BytePool {
    fn new(max_block_capacity: usize, retained: usize) -> Self {
        BytePool {
            queue: ArrayQueue::new(retained.max(1)),
            max_block_capacity,
            outstanding: AtomicUsize::new(0),
        }
    }

    fn rent(&self, min_capacity: usize) -> Vec<u8> {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        match self.queue.pop() {
            Some(mut block) => {
                if block.capacity() < min_capacity {
                    block.reserve_exact(min_capacity);
                }
                block
            }
            None => Vec::with_capacity(min_capacity),
        }
    }

    fn give_back(&self, mut block: Vec<u8>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        block.clear();
        if block.capacity() <= self.max_block_capacity {
            // a full queue drops the block to the allocator
            let _ = self.queue.push(block);
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

/// A bounded pool of reusable data set tables.
#[derive(Debug)]
struct TablePool {
    queue: ArrayQueue<Table>,
    capacity_hint: usize,
    outstanding: AtomicUsize,
}

impl TablePool {
    fn new(capacity_hint: usize, retained: usize) -> Self {
        TablePool {
            queue: ArrayQueue::new(retained.max(1)),
            capacity_hint,
            outstanding: AtomicUsize::new(0),
        }
    }

    fn rent(&self) -> Table {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        self.queue
            .pop()
            .unwrap_or_else(|| IndexMap::with_capacity(self.capacity_hint))
    }

    fn give_back(&self, mut table: Table) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        table.clear();
        let _ = self.queue.push(table);
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}

/// Sizing knobs for one [`Pools`] set.
#[derive(Debug, Clone)]
pub struct PoolsConfig {
    /// Largest block capacity the small byte pool retains. Default 1 MiB.
    pub small_block_capacity: usize,
    /// Retention cap of the small byte pool. Default 1024 blocks.
    pub small_blocks_retained: usize,
    /// Largest block capacity the large byte pool retains. Default 25 MiB.
    pub large_block_capacity: usize,
    /// Retention cap of the large byte pool. Default 32 blocks.
    pub large_blocks_retained: usize,
    /// Initial entry capacity of root data set tables. Default 256.
    pub root_table_capacity: usize,
    /// Retention cap of the root table pool. Default 64 tables.
    pub root_tables_retained: usize,
    /// Initial entry capacity of sequence item tables. Default 16.
    pub item_table_capacity: usize,
    /// Retention cap of the item table pool. Default 256 tables.
    pub item_tables_retained: usize,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        PoolsConfig {
            small_block_capacity: 1 << 20,
            small_blocks_retained: 1024,
            large_block_capacity: 25 << 20,
            large_blocks_retained: 32,
            root_table_capacity: 256,
            root_tables_retained: 64,
            item_table_capacity: 16,
            item_tables_retained: 256,
        }
    }
}

/// One set of byte-block and table pools.
///
/// A process-wide default set backs every parse unless
/// [`ParseOptions::pools`](crate::ParseOptions::pools) injects another,
/// which is how tests obtain isolated rental accounting and embedders
/// apply custom sizing.
#[derive(Debug)]
pub struct Pools {
    small: BytePool,
    large: BytePool,
    root_tables: TablePool,
    item_tables: TablePool,
}

static PROCESS_POOLS: Lazy<Arc<Pools>> = Lazy::new(|| Arc::new(Pools::new()));

impl Pools {
    /// Create a pool set with default sizing.
    pub fn new() -> Self {
        Pools::with_config(&PoolsConfig::default())
    }

    /// Create a pool set with the given sizing.
    pub fn with_config(config: &PoolsConfig) -> Self {
        Pools {
            small: BytePool::new(config.small_block_capacity, config.small_blocks_retained),
            large: BytePool::new(config.large_block_capacity, config.large_blocks_retained),
            root_tables: TablePool::new(config.root_table_capacity, config.root_tables_retained),
            item_tables: TablePool::new(config.item_table_capacity, config.item_tables_retained),
        }
    }

    /// The process-wide default pool set.
    pub fn process() -> Arc<Pools> {
        Arc::clone(&PROCESS_POOLS)
    }

    /// Byte blocks currently rented and not yet returned.
    pub fn outstanding_blocks(&self) -> usize {
        self.small.outstanding() + self.large.outstanding()
    }

    /// Data set tables currently rented and not yet returned.
    pub fn outstanding_tables(&self) -> usize {
        self.root_tables.outstanding() + self.item_tables.outstanding()
    }

    pub(crate) fn rent_block(&self, origin: BlockOrigin, min_capacity: usize) -> Vec<u8> {
        match origin {
            BlockOrigin::Small => self.small.rent(min_capacity),
            BlockOrigin::Large => self.large.rent(min_capacity),
        }
    }

    pub(crate) fn give_back_block(&self, origin: BlockOrigin, block: Vec<u8>) {
        match origin {
            BlockOrigin::Small => self.small.give_back(block),
            BlockOrigin::Large => self.large.give_back(block),
        }
    }

    pub(crate) fn rent_table(&self, kind: TableKind) -> Table {
        match kind {
            TableKind::Root => self.root_tables.rent(),
            TableKind::Item => self.item_tables.rent(),
        }
    }

    pub(crate) fn give_back_table(&self, kind: TableKind, table: Table) {
        match kind {
            TableKind::Root => self.root_tables.give_back(table),
            TableKind::Item => self.item_tables.give_back(table),
        }
    }
}

impl Default for Pools {
    fn default() -> Self {
        Pools::new()
    }
}
