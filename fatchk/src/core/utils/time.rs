// SPDX-License-Identifier: MIT

//! UTC time source for on-disk timestamps.
//!
//! - In `std` mode, uses the system clock.
//! - In `no_std`, returns UNIX_EPOCH as fixed timestamp.

use time::OffsetDateTime;

/// Returns the current UTC time, or UNIX_EPOCH without `std`.
pub fn now_utc() -> OffsetDateTime {
    #[cfg(feature = "std")]
    {
        OffsetDateTime::now_utc()
    }

    #[cfg(not(feature = "std"))]
    {
        OffsetDateTime::UNIX_EPOCH
    }
}
