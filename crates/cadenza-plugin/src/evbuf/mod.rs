//! Event buffers for plugin event ports
//!
//! An [`EventBuffer`] owns the memory behind one event port of one plugin instance. It is
//! allocated once at instantiation and then only reset, appended to and iterated from the
//! audio thread. [`PortEvents`] is the same codec seen from the plugin side of a port
//! pointer.

mod codec;
mod port;

pub use codec::{
    pad8, Event, EventFormat, EventIter, EventUrids, ATOM_EVENT_HEADER_SIZE,
    EVENT_BUFFER_HEADER_SIZE, EVENT_HEADER_SIZE, SEQUENCE_HEADER_SIZE,
};
pub use port::PortEvents;

use crate::error::EventOverflow;
use crate::native::PortPtr;
use cadenza_core::Urid;

/// Fixed-capacity event stream for one port direction.
pub struct EventBuffer {
    // u64 words keep the header and every event 8-byte aligned.
    storage: Box<[u64]>,
    capacity: usize,
    format: EventFormat,
    urids: EventUrids,
    last_frames: u32,
}

impl EventBuffer {
    /// Allocate a zeroed buffer holding up to `capacity` bytes of encoded events.
    pub fn new(capacity: u32, format: EventFormat, urids: EventUrids) -> Self {
        let capacity = capacity as usize;
        let words = (format.buffer_header_size() + pad8(capacity)) / 8;
        let mut buffer = Self {
            storage: vec![0u64; words].into_boxed_slice(),
            capacity,
            format,
            urids,
            last_frames: 0,
        };
        buffer.reset();
        buffer
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        // SAFETY: the slice covers exactly the words owned by `storage`; u8 has no
        // alignment requirement and every bit pattern is valid.
        unsafe {
            std::slice::from_raw_parts(
                self.storage.as_ptr() as *const u8,
                self.storage.len() * std::mem::size_of::<u64>(),
            )
        }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, and the exclusive borrow of `self` rules out aliasing.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.storage.as_mut_ptr() as *mut u8,
                self.storage.len() * std::mem::size_of::<u64>(),
            )
        }
    }

    pub fn format(&self) -> EventFormat {
        self.format
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of encoded events currently held. Always a multiple of 8.
    pub fn get_size(&self) -> usize {
        codec::used_size(self.format, self.bytes(), self.capacity, self.urids)
    }

    pub fn is_empty(&self) -> bool {
        self.get_size() == 0
    }

    /// Empty the buffer and clear the time stamp cursor. O(1).
    pub fn reset(&mut self) {
        let (format, capacity, urids) = (self.format, self.capacity, self.urids);
        codec::write_empty(format, self.bytes_mut(), capacity, urids);
        self.last_frames = 0;
    }

    /// Reset and hand the whole capacity to a plugin writing into this buffer.
    pub fn prepare_output(&mut self) {
        let (format, capacity, urids) = (self.format, self.capacity, self.urids);
        codec::write_chunk(format, self.bytes_mut(), capacity, urids);
        self.last_frames = 0;
    }

    /// Append one event. On overflow the buffer is left untouched.
    pub fn append(
        &mut self,
        frames: u32,
        subframes: u32,
        event_type: Urid,
        payload: &[u8],
    ) -> Result<(), EventOverflow> {
        debug_assert!(
            frames >= self.last_frames,
            "event at frame {frames} appended after frame {}",
            self.last_frames
        );
        let (format, capacity, urids) = (self.format, self.capacity, self.urids);
        let event = Event {
            frames,
            subframes,
            event_type,
            payload,
        };
        codec::append(format, self.bytes_mut(), capacity, urids, event)?;
        self.last_frames = frames;
        Ok(())
    }

    /// Iterator positioned at the first event.
    pub fn begin(&self) -> EventIter<'_> {
        EventIter::new(self.bytes(), self.format, self.get_size())
    }

    pub fn iter(&self) -> EventIter<'_> {
        self.begin()
    }

    /// Pointer to hand to the plugin's `connect_port`.
    ///
    /// Valid until the buffer is moved out of its box or dropped; the instance owning
    /// the buffer reconnects it every cycle.
    pub fn port_ptr(&mut self) -> PortPtr {
        if self.format == EventFormat::Event {
            codec::write_data_pointer(self.bytes_mut());
        }
        PortPtr::from_raw(self.storage.as_mut_ptr().cast())
    }

    pub fn urids(&self) -> EventUrids {
        self.urids
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("format", &self.format)
            .field("capacity", &self.capacity)
            .field("size", &self.get_size())
            .finish()
    }
}

impl<'a> IntoIterator for &'a EventBuffer {
    type Item = Event<'a>;
    type IntoIter = EventIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.begin()
    }
}
