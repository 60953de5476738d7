// SPDX-License-Identifier: MIT
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
#[macro_use]
extern crate alloc;

// Core modules
pub mod core;
pub mod fs;

// Reusable types and traits
pub use crate::core::meta::FsMeta;

/// FAT12/16/32 filesystem check-disk engine.
///
/// See [`fat::check_disk`], [`fat::CheckFlags`] and [`fat::CheckOptions`].
pub mod fat {
    pub use super::fs::fat::prelude::*;
}
