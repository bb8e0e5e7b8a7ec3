//! Plugin-side view of a connected event port.

use super::codec::{self, Event, EventFormat, EventIter, EventUrids};
use crate::error::EventOverflow;
use crate::native::PortPtr;
use cadenza_core::Urid;

/// Reader/writer over the buffer behind an event port pointer.
///
/// Plugins implementing [`NativePlugin`](crate::NativePlugin) use this inside `run()` to
/// read their input events and write their output events with the same codec the host
/// uses on the other side.
pub struct PortEvents<'a> {
    bytes: &'a mut [u8],
    format: EventFormat,
    capacity: usize,
    urids: EventUrids,
    last_frames: u32,
}

impl<'a> PortEvents<'a> {
    /// View an input port holding events written by the host.
    ///
    /// Returns `None` for a null pointer or a header that is not an event stream.
    ///
    /// # Safety
    ///
    /// `ptr` must be the pointer the host connected to this port for the current cycle,
    /// in `format`, and nothing else may access the buffer while the view lives.
    pub unsafe fn input(ptr: PortPtr, format: EventFormat, urids: EventUrids) -> Option<Self> {
        Self::from_header(ptr, format, urids, false)
    }

    /// View an output port and start an empty event stream in it.
    ///
    /// # Safety
    ///
    /// Same contract as [`input`](Self::input).
    pub unsafe fn output(ptr: PortPtr, format: EventFormat, urids: EventUrids) -> Option<Self> {
        let mut events = Self::from_header(ptr, format, urids, true)?;
        codec::write_empty(format, events.bytes, events.capacity, urids);
        Some(events)
    }

    unsafe fn from_header(
        ptr: PortPtr,
        format: EventFormat,
        urids: EventUrids,
        output: bool,
    ) -> Option<Self> {
        if ptr.is_null() {
            return None;
        }
        let header_size = format.buffer_header_size();
        let base = ptr.as_raw() as *mut u8;
        // SAFETY: every connected event buffer starts with a full header.
        let header = std::slice::from_raw_parts(base, header_size);
        let capacity = if output {
            codec::header_capacity(format, header, urids)?
        } else {
            // Inputs may only be read up to what the host wrote.
            match format {
                EventFormat::Event => codec::header_capacity(format, header, urids)?,
                EventFormat::Atom => codec::used_size(format, header, usize::MAX, urids),
            }
        };
        // SAFETY: the host allocated header + capacity bytes behind the pointer.
        let bytes = std::slice::from_raw_parts_mut(base, header_size + capacity);
        Some(Self {
            bytes,
            format,
            capacity,
            urids,
            last_frames: 0,
        })
    }

    pub fn format(&self) -> EventFormat {
        self.format
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used_size(&self) -> usize {
        codec::used_size(self.format, self.bytes, self.capacity, self.urids)
    }

    pub fn iter(&self) -> EventIter<'_> {
        EventIter::new(self.bytes, self.format, self.used_size())
    }

    /// Append an event. Overflowing events must be dropped by the caller.
    pub fn append(
        &mut self,
        frames: u32,
        subframes: u32,
        event_type: Urid,
        payload: &[u8],
    ) -> Result<(), EventOverflow> {
        debug_assert!(frames >= self.last_frames);
        let event = Event {
            frames,
            subframes,
            event_type,
            payload,
        };
        codec::append(self.format, self.bytes, self.capacity, self.urids, event)?;
        self.last_frames = frames;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evbuf::EventBuffer;

    const URIDS: EventUrids = EventUrids {
        sequence: 11,
        chunk: 12,
    };

    #[test]
    fn test_plugin_reads_host_events() {
        for format in [EventFormat::Event, EventFormat::Atom] {
            let mut host = EventBuffer::new(128, format, URIDS);
            host.append(4, 0, 3, &[0x90, 1, 2]).unwrap();
            host.append(8, 0, 3, &[0x80, 1, 0]).unwrap();
            let ptr = host.port_ptr();

            let plugin = unsafe { PortEvents::input(ptr, format, URIDS) }.unwrap();
            let frames: Vec<u32> = plugin.iter().map(|e| e.frames).collect();
            assert_eq!(frames, [4, 8]);
        }
    }

    #[test]
    fn test_plugin_writes_host_reads() {
        for format in [EventFormat::Event, EventFormat::Atom] {
            let mut host = EventBuffer::new(64, format, URIDS);
            host.prepare_output();
            let ptr = host.port_ptr();

            {
                let mut plugin = unsafe { PortEvents::output(ptr, format, URIDS) }.unwrap();
                assert_eq!(plugin.capacity(), 64);
                plugin.append(2, 0, 3, &[0xB0, 7, 100]).unwrap();
                assert!(plugin.append(3, 0, 3, &[0; 200]).is_err());
            }

            let events: Vec<_> = host.iter().collect();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].payload, &[0xB0, 7, 100]);
        }
    }

    #[test]
    fn test_null_port_has_no_view() {
        let view = unsafe { PortEvents::input(PortPtr::NULL, EventFormat::Atom, URIDS) };
        assert!(view.is_none());
    }
}
