//! Lock-free scalars shared between the audio thread and control threads.

use crate::compat::Ordering;
use atomic_float::AtomicF32;

/// Cache-line aligned atomic f32.
///
/// Used for control port shadows: a UI thread stores a value at any time and the audio
/// thread takes a single snapshot of it once per process cycle. Readers observe either
/// the old or the new value, never a torn one.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFloat {
    value: AtomicF32,
}

impl AtomicFloat {
    pub fn new(value: f32) -> Self {
        Self {
            value: AtomicF32::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    /// Snapshot read for the audio thread.
    #[inline]
    pub fn get_relaxed(&self) -> f32 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn set_relaxed(&self, value: f32) {
        self.value.store(value, Ordering::Relaxed);
    }
}

impl Clone for AtomicFloat {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl Default for AtomicFloat {
    fn default() -> Self {
        Self::new(0.0)
    }
}
