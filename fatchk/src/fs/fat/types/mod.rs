// SPDX-License-Identifier: MIT

mod entries;

pub use entries::*;
