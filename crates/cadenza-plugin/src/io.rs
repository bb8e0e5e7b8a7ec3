//! Audio buffers handed to an instance for one process cycle.
//!
//! The graph layer owns all of this memory; an instance only borrows it for the duration
//! of `connect_and_run`.

use smallvec::SmallVec;

/// A set of mono audio buffers of equal length.
#[derive(Debug, Clone)]
pub struct BufferSet {
    channels: Vec<Box<[f32]>>,
    frames: usize,
}

impl BufferSet {
    pub fn new(channels: usize, frames: usize) -> Self {
        Self {
            channels: (0..channels)
                .map(|_| vec![0.0; frames].into_boxed_slice())
                .collect(),
            frames,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(|c| &c[..])
    }

    pub fn channel_mut(&mut self, index: usize) -> Option<&mut [f32]> {
        self.channels.get_mut(index).map(|c| &mut c[..])
    }

    pub fn silence(&mut self) {
        for channel in &mut self.channels {
            channel.fill(0.0);
        }
    }

    /// Pointer to sample `offset` of a channel, if `offset + nframes` samples exist.
    pub(crate) fn sample_ptr(&mut self, index: usize, offset: usize, nframes: usize) -> Option<*mut f32> {
        let channel = self.channels.get_mut(index)?;
        if offset.checked_add(nframes)? > channel.len() {
            return None;
        }
        // SAFETY: offset is within the channel, checked above.
        Some(unsafe { channel.as_mut_ptr().add(offset) })
    }
}

/// Maps the n-th audio input (or output) port of a plugin to a buffer in a [`BufferSet`].
///
/// Unmapped ports are bound to the scratch buffers. Input and output maps may name the
/// same buffer, in which case the plugin processes in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelMap {
    entries: SmallVec<[Option<usize>; 8]>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Port `n` reads or writes buffer `n`, for `count` ports.
    pub fn identity(count: usize) -> Self {
        Self {
            entries: (0..count).map(Some).collect(),
        }
    }

    pub fn set(&mut self, port: usize, buffer: usize) {
        if self.entries.len() <= port {
            self.entries.resize(port + 1, None);
        }
        self.entries[port] = Some(buffer);
    }

    pub fn with(mut self, port: usize, buffer: usize) -> Self {
        self.set(port, buffer);
        self
    }

    pub fn unset(&mut self, port: usize) {
        if let Some(entry) = self.entries.get_mut(port) {
            *entry = None;
        }
    }

    pub fn get(&self, port: usize) -> Option<usize> {
        self.entries.get(port).copied().flatten()
    }
}

/// Silent input and throw-away output buffers for unmapped ports.
#[derive(Debug, Clone)]
pub struct ScratchBuffers {
    silence: Box<[f32]>,
    discard: Box<[f32]>,
}

impl ScratchBuffers {
    pub fn new(frames: usize) -> Self {
        Self {
            silence: vec![0.0; frames].into_boxed_slice(),
            discard: vec![0.0; frames].into_boxed_slice(),
        }
    }

    pub fn frames(&self) -> usize {
        self.silence.len()
    }

    pub fn silence(&self) -> &[f32] {
        &self.silence
    }

    pub(crate) fn silence_ptr(&mut self) -> *mut f32 {
        self.silence.as_mut_ptr()
    }

    pub(crate) fn discard_ptr(&mut self) -> *mut f32 {
        self.discard.as_mut_ptr()
    }
}

/// Buffers for one `connect_and_run` call.
pub struct ProcessIo<'a> {
    pub buffers: &'a mut BufferSet,
    pub inputs: &'a ChannelMap,
    pub outputs: &'a ChannelMap,
    pub scratch: &'a mut ScratchBuffers,
}
