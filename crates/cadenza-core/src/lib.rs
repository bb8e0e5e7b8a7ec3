//! Core host services shared by every cadenza crate.
//!
//! # Primary API
//!
//! - [`UriMap`]: process-wide URI <-> integer interning
//! - [`HostUris`]: ids of the URIs the host needs on the audio thread
//! - [`HostConfig`]: sample rate, block size and event buffer sizing
//! - [`AtomicFloat`]: lock-free control value shared with the audio thread
//!
//! The crate is `no_std` + `alloc`; the `std` feature (on by default) only adds
//! `std::error::Error` integration.

#![no_std]

#[cfg(any(feature = "std", test))]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod compat;

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::{HostConfig, MAX_BLOCK_SIZE_LIMIT, MIN_EVENT_CAPACITY};

pub mod lockfree;
pub use lockfree::AtomicFloat;

pub mod urid;
pub use urid::{uris, HostUris, UriMap, Urid};

pub mod prelude {
    pub use crate::{AtomicFloat, HostConfig, HostUris, UriMap, Urid};
}
