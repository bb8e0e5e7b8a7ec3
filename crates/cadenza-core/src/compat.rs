//! Compatibility layer for no_std + alloc.

pub use parking_lot::RwLock;

pub use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec::Vec,
};

pub use core::sync::atomic::Ordering;

pub use hashbrown::HashMap;
