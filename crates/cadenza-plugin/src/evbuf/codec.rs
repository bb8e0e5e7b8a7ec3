//! Byte layout of the two event stream formats.
//!
//! Both layouts start with a buffer header that plugins read through the port pointer,
//! followed by events packed back to back. Every event occupies
//! `pad8(event_header + payload)` bytes so each header starts on an 8-byte boundary.
//! Fields are native-endian: the buffer never leaves the process.
//!
//! ```text
//! Event (legacy)                         Atom Sequence
//! +---------------------------+          +---------------------------+
//! | data ptr                  |          | atom.size  | atom.type    |
//! | hdr_size|stamp| count     |          | unit       | pad          |
//! | capacity      | size      |          +---------------------------+
//! +---------------------------+          | time (i64)                |
//! | frames        | subframes |          | size       | type         |
//! | type | size   | payload.. |          | payload...                |
//! +---------------------------+          +---------------------------+
//! ```

use crate::error::EventOverflow;
use cadenza_core::{HostUris, Urid};
use serde::{Deserialize, Serialize};

const PTR_SIZE: usize = std::mem::size_of::<*mut u8>();

/// Legacy event header: frames u32, subframes u32, type u16, size u16.
pub const EVENT_HEADER_SIZE: usize = 12;

/// Atom event header: time i64, body size u32, body type u32.
pub const ATOM_EVENT_HEADER_SIZE: usize = 16;

/// Legacy buffer header, padded so events start 8-byte aligned.
pub const EVENT_BUFFER_HEADER_SIZE: usize = pad8(PTR_SIZE + 16);

/// Atom header (size, type) plus the sequence body header (unit, pad).
pub const SEQUENCE_HEADER_SIZE: usize = 16;

/// Size of the atom header alone; `atom.size` counts everything after it.
const ATOM_HEADER_SIZE: usize = 8;

/// Round `size` up to the next multiple of 8.
#[inline]
pub const fn pad8(size: usize) -> usize {
    (size + 7) & !7
}

/// Wire format of one event buffer. Chosen once per plugin and never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventFormat {
    /// Legacy event framing with 16-bit type and size fields.
    Event,
    /// Atom sequence framing with 64-bit time stamps and 32-bit fields.
    Atom,
}

impl EventFormat {
    #[inline]
    pub const fn buffer_header_size(self) -> usize {
        match self {
            EventFormat::Event => EVENT_BUFFER_HEADER_SIZE,
            EventFormat::Atom => SEQUENCE_HEADER_SIZE,
        }
    }

    #[inline]
    pub const fn event_header_size(self) -> usize {
        match self {
            EventFormat::Event => EVENT_HEADER_SIZE,
            EventFormat::Atom => ATOM_EVENT_HEADER_SIZE,
        }
    }

    /// Bytes one event with `payload_len` bytes of payload occupies in a buffer.
    #[inline]
    pub const fn encoded_size(self, payload_len: usize) -> usize {
        pad8(self.event_header_size() + payload_len)
    }
}

/// Type ids the atom layout writes into its buffer header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventUrids {
    pub sequence: Urid,
    pub chunk: Urid,
}

impl From<&HostUris> for EventUrids {
    fn from(uris: &HostUris) -> Self {
        Self {
            sequence: uris.atom_sequence,
            chunk: uris.atom_chunk,
        }
    }
}

/// One decoded event. The payload borrows from the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event<'a> {
    pub frames: u32,
    /// Always 0 for the atom layout.
    pub subframes: u32,
    pub event_type: Urid,
    pub payload: &'a [u8],
}

#[inline]
fn read_u16(bytes: &[u8], at: usize) -> u16 {
    let mut raw = [0u8; 2];
    raw.copy_from_slice(&bytes[at..at + 2]);
    u16::from_ne_bytes(raw)
}

#[inline]
fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_ne_bytes(raw)
}

#[inline]
fn read_i64(bytes: &[u8], at: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    i64::from_ne_bytes(raw)
}

#[inline]
fn write_u16(bytes: &mut [u8], at: usize, value: u16) {
    bytes[at..at + 2].copy_from_slice(&value.to_ne_bytes());
}

#[inline]
fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_ne_bytes());
}

#[inline]
fn write_i64(bytes: &mut [u8], at: usize, value: i64) {
    bytes[at..at + 8].copy_from_slice(&value.to_ne_bytes());
}

// Legacy buffer header field offsets.
const EV_HEADER_SIZE_AT: usize = PTR_SIZE;
const EV_STAMP_TYPE_AT: usize = PTR_SIZE + 2;
const EV_COUNT_AT: usize = PTR_SIZE + 4;
const EV_CAPACITY_AT: usize = PTR_SIZE + 8;
const EV_SIZE_AT: usize = PTR_SIZE + 12;

/// Bytes of encoded events recorded in the buffer header, bounded by `capacity`.
///
/// An atom buffer that still holds an output chunk header reads as empty.
pub(crate) fn used_size(
    format: EventFormat,
    bytes: &[u8],
    capacity: usize,
    urids: EventUrids,
) -> usize {
    let used = match format {
        EventFormat::Event => read_u32(bytes, EV_SIZE_AT) as usize,
        EventFormat::Atom => {
            if read_u32(bytes, 4) != urids.sequence {
                return 0;
            }
            (read_u32(bytes, 0) as usize).saturating_sub(ATOM_HEADER_SIZE)
        }
    };
    used.min(capacity)
}

/// Capacity recorded in a buffer header by [`write_empty`] or [`write_chunk`].
///
/// Returns `None` for an atom header that is neither an empty sequence nor a chunk.
pub(crate) fn header_capacity(
    format: EventFormat,
    bytes: &[u8],
    urids: EventUrids,
) -> Option<usize> {
    match format {
        EventFormat::Event => Some(read_u32(bytes, EV_CAPACITY_AT) as usize),
        EventFormat::Atom => {
            let body = (read_u32(bytes, 0) as usize).checked_sub(ATOM_HEADER_SIZE)?;
            let kind = read_u32(bytes, 4);
            (kind == urids.chunk || kind == urids.sequence).then_some(body)
        }
    }
}

/// Write the header of an empty event stream.
pub(crate) fn write_empty(
    format: EventFormat,
    bytes: &mut [u8],
    capacity: usize,
    urids: EventUrids,
) {
    match format {
        EventFormat::Event => {
            write_u16(bytes, EV_HEADER_SIZE_AT, EVENT_BUFFER_HEADER_SIZE as u16);
            // Stamps are audio frames.
            write_u16(bytes, EV_STAMP_TYPE_AT, 0);
            write_u32(bytes, EV_COUNT_AT, 0);
            write_u32(bytes, EV_CAPACITY_AT, capacity as u32);
            write_u32(bytes, EV_SIZE_AT, 0);
        }
        EventFormat::Atom => {
            write_u32(bytes, 0, ATOM_HEADER_SIZE as u32);
            write_u32(bytes, 4, urids.sequence);
            write_u32(bytes, 8, 0);
            write_u32(bytes, 12, 0);
        }
    }
}

/// Write the header handed to a plugin for an output port.
///
/// Atom output ports receive a chunk whose size covers all writable space after
/// the atom header; the plugin replaces it with a sequence.
pub(crate) fn write_chunk(
    format: EventFormat,
    bytes: &mut [u8],
    capacity: usize,
    urids: EventUrids,
) {
    match format {
        EventFormat::Event => write_empty(format, bytes, capacity, urids),
        EventFormat::Atom => {
            write_u32(bytes, 0, (ATOM_HEADER_SIZE + capacity) as u32);
            write_u32(bytes, 4, urids.chunk);
            write_u32(bytes, 8, 0);
            write_u32(bytes, 12, 0);
        }
    }
}

/// Store the address of the event area in a legacy header.
pub(crate) fn write_data_pointer(bytes: &mut [u8]) {
    let data = bytes[EVENT_BUFFER_HEADER_SIZE..].as_mut_ptr() as usize;
    bytes[..PTR_SIZE].copy_from_slice(&data.to_ne_bytes());
}

/// Encode one event after the `used` bytes already in the buffer.
///
/// Either the whole event is written and the header updated, or nothing changes.
pub(crate) fn append(
    format: EventFormat,
    bytes: &mut [u8],
    capacity: usize,
    urids: EventUrids,
    event: Event<'_>,
) -> Result<(), EventOverflow> {
    let used = used_size(format, bytes, capacity, urids);
    let needed = format.encoded_size(event.payload.len());
    let available = capacity - used;

    let fits_fields = match format {
        EventFormat::Event => {
            event.event_type <= u16::MAX as u32 && event.payload.len() <= u16::MAX as usize
        }
        EventFormat::Atom => event.payload.len() <= u32::MAX as usize,
    };
    if !fits_fields || needed > available {
        return Err(EventOverflow { needed, available });
    }

    let start = format.buffer_header_size() + used;
    let header = format.event_header_size();
    match format {
        EventFormat::Event => {
            write_u32(bytes, start, event.frames);
            write_u32(bytes, start + 4, event.subframes);
            write_u16(bytes, start + 8, event.event_type as u16);
            write_u16(bytes, start + 10, event.payload.len() as u16);
        }
        EventFormat::Atom => {
            write_i64(bytes, start, i64::from(event.frames));
            write_u32(bytes, start + 8, event.payload.len() as u32);
            write_u32(bytes, start + 12, event.event_type);
        }
    }
    let body = start + header;
    bytes[body..body + event.payload.len()].copy_from_slice(event.payload);
    bytes[body + event.payload.len()..start + needed].fill(0);

    let used = used + needed;
    match format {
        EventFormat::Event => {
            let count = read_u32(bytes, EV_COUNT_AT);
            write_u32(bytes, EV_COUNT_AT, count.saturating_add(1));
            write_u32(bytes, EV_SIZE_AT, used as u32);
        }
        EventFormat::Atom => {
            write_u32(bytes, 0, (ATOM_HEADER_SIZE + used) as u32);
            write_u32(bytes, 4, urids.sequence);
        }
    }
    Ok(())
}

/// Decode the event at `offset` (relative to the event area).
///
/// Returns the event and the offset of the next one, or `None` when the header or
/// payload would extend past `used`.
pub(crate) fn read_event(
    format: EventFormat,
    bytes: &[u8],
    used: usize,
    offset: usize,
) -> Option<(Event<'_>, usize)> {
    let base = format.buffer_header_size();
    let end = base + used;
    let start = base.checked_add(offset)?;
    let header = format.event_header_size();
    if start.checked_add(header)? > end {
        return None;
    }

    let (frames, subframes, event_type, size) = match format {
        EventFormat::Event => (
            read_u32(bytes, start),
            read_u32(bytes, start + 4),
            u32::from(read_u16(bytes, start + 8)),
            read_u16(bytes, start + 10) as usize,
        ),
        EventFormat::Atom => (
            u32::try_from(read_i64(bytes, start)).unwrap_or(0),
            0,
            read_u32(bytes, start + 12),
            read_u32(bytes, start + 8) as usize,
        ),
    };

    let body = start + header;
    let body_end = body.checked_add(size)?;
    if body_end > end {
        return None;
    }
    let event = Event {
        frames,
        subframes,
        event_type,
        payload: &bytes[body..body_end],
    };
    Some((event, offset + format.encoded_size(size)))
}

/// Cursor over the events of one buffer. Never allocates.
#[derive(Debug, Clone)]
pub struct EventIter<'a> {
    bytes: &'a [u8],
    format: EventFormat,
    used: usize,
    offset: usize,
}

impl<'a> EventIter<'a> {
    pub(crate) fn new(bytes: &'a [u8], format: EventFormat, used: usize) -> Self {
        Self {
            bytes,
            format,
            used,
            offset: 0,
        }
    }

    /// True while a complete event sits at the cursor.
    pub fn valid(&self) -> bool {
        self.read().is_some()
    }

    /// Decode the event at the cursor without moving it.
    pub fn read(&self) -> Option<Event<'a>> {
        read_event(self.format, self.bytes, self.used, self.offset).map(|(event, _)| event)
    }

    /// Step to the next event. No-op once the cursor is invalid.
    pub fn advance(&mut self) {
        if let Some((_, next)) = read_event(self.format, self.bytes, self.used, self.offset) {
            self.offset = next;
        }
    }

    /// Byte offset of the cursor within the event area.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for EventIter<'a> {
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (event, next) = read_event(self.format, self.bytes, self.used, self.offset)?;
        self.offset = next;
        Some(event)
    }
}
