//! Hands audio blocks from the capture callback to the render loop.
//!
//! The writer never waits for the reader. Every `publish()` replaces whatever
//! the reader has not picked up yet, so the reader only ever sees the newest block,
//! and sees it whole. Before the first publish there is nothing to read (`None`).
//! After that the reader keeps its last block until a newer one arrives.
//!
//! # Slots
//!
//! Three pre-allocated `T`s. At any moment one belongs to the writer (being filled),
//! one to the reader (being drawn), and one is parked in `shared_state`.
//! `publish()` parks the filled slot with `FRESH_FLAG` set and takes back the parked one.
//! `fetch()` only swaps when `FRESH_FLAG` is set, trading the reader's slot
//! for the parked one. Both swaps are AcqRel: the writer's fill happens-before the
//! reader's loads, and the reader's loads happen-before the writer refills that slot.
//! Relaxed or Release-only swaps lose one of those edges
//! (https://github.com/HadrienG2/triple-buffer/issues/14).
//!
//! Invariant: `shared_state & INDEX_MASK`, `write_index` and `read_index`
//! are always 0, 1 and 2 in some order, so no slot has two owners.

use crate::common::Block;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

struct Slots<T> {
    data: [UnsafeCell<T>; 3],
    shared_state: AtomicU8,
}

const INDEX_MASK: u8 = 0b011;
const FRESH_FLAG: u8 = 0b100;

/// Create a bridge from three interchangeable initial values.
///
/// The values are never observed by the reader until the writer publishes one.
pub fn channel<T>(shared_v: T, writer_v: T, reader_v: T) -> (BridgeWriter<T>, BridgeReader<T>) {
    let slots = Arc::new(Slots {
        data: [
            UnsafeCell::new(shared_v),
            UnsafeCell::new(writer_v),
            UnsafeCell::new(reader_v),
        ],
        shared_state: AtomicU8::new(0),
    });
    (
        BridgeWriter {
            slots: Arc::clone(&slots),
            write_index: 1,
        },
        BridgeReader {
            slots,
            read_index: 2,
            has_value: false,
        },
    )
}

/// A bridge carrying audio blocks of `frames * channels` samples.
pub fn block_channel(frames: usize, channels: u16) -> (BridgeWriter<Block>, BridgeReader<Block>) {
    channel(
        Block::new(frames, channels),
        Block::new(frames, channels),
        Block::new(frames, channels),
    )
}

/// Producer half. Lives in the audio callback.
pub struct BridgeWriter<T> {
    slots: Arc<Slots<T>>,
    write_index: u8,
}

// The writer only touches the slot it owns, so moving it to the audio thread
// moves a `T`. A shared `&BridgeWriter` exposes no slot at all.
unsafe impl<T> Send for BridgeWriter<T> where T: Send {}
unsafe impl<T> Sync for BridgeWriter<T> where T: Sync {}

impl<T> BridgeWriter<T> {
    /// The slot we own. The reader cannot see it until `publish()`.
    pub fn get_mut(&mut self) -> &mut T {
        unsafe { &mut *self.slots.data[self.write_index as usize].get() }
    }

    /// Park the filled slot for the reader, dropping any block it has not picked up,
    /// and continue with the slot we get back. Never blocks or allocates.
    pub fn publish(&mut self) {
        let filled = self.write_index | FRESH_FLAG;
        let returned = self.slots.shared_state.swap(filled, Ordering::AcqRel);
        self.write_index = returned & INDEX_MASK;
    }

    pub fn publish_with<F>(&mut self, f: F)
    where
        F: FnOnce(&mut T),
    {
        f(self.get_mut());
        self.publish();
    }
}

impl BridgeWriter<Block> {
    /// Copy `block` into the owned slot and publish it.
    ///
    /// `block` must have the same shape as the bridge's blocks.
    pub fn publish_block(&mut self, block: &Block) {
        self.publish_with(|slot| {
            slot.samples.copy_from_slice(&block.samples);
            slot.channels = block.channels;
            slot.status = block.status;
        });
    }
}

/// Consumer half. Lives on the render thread.
pub struct BridgeReader<T> {
    slots: Arc<Slots<T>>,
    read_index: u8,

    /// True once we have fetched at least one published value.
    has_value: bool,
}

// The reader hands out `&T` to its own slot and swaps it for the parked one.
// Sharing `&BridgeReader` only allows `current()`, a plain `&T`.
unsafe impl<T> Send for BridgeReader<T> where T: Send {}
unsafe impl<T> Sync for BridgeReader<T> where T: Sync {}

impl<T> BridgeReader<T> {
    /// Pick up the parked block if it is newer than ours. Our old slot goes back
    /// to the writer. Returns false, keeping the current value, if nothing new arrived.
    pub fn fetch(&mut self) -> bool {
        if self.slots.shared_state.load(Ordering::Relaxed) & FRESH_FLAG == 0 {
            return false;
        }

        // A racing publish only replaces one fresh slot with another.
        let parked = self.slots.shared_state.swap(self.read_index, Ordering::AcqRel);
        debug_assert!(parked & FRESH_FLAG != 0);
        self.read_index = parked & INDEX_MASK;
        self.has_value = true;
        true
    }

    /// The most recently published value, or `None` if nothing was ever published.
    ///
    /// Without an intervening publish, repeated calls return the same value.
    pub fn take_latest(&mut self) -> Option<&T> {
        self.fetch();
        self.current()
    }

    /// The value we currently own, without checking for a newer one.
    pub fn current(&self) -> Option<&T> {
        if self.has_value {
            Some(unsafe { &*self.slots.data[self.read_index as usize].get() })
        } else {
            None
        }
    }

    pub fn has_published(&self) -> bool {
        self.has_value || self.slots.shared_state.load(Ordering::Relaxed) & FRESH_FLAG != 0
    }
}
