// SPDX-License-Identifier: MIT

//! Allocation-table mirror comparison and resynchronization.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use fatio::prelude::*;

use crate::core::checker::CheckMode;
use crate::core::errors::*;
use crate::fs::fat::chkdsk::log::{LogId, ReportLog, TestCase};
use crate::fs::fat::meta::FatMeta;

/// Compares the primary and secondary table copies sector by sector,
/// stopping at the first differing byte. A single-FAT volume trivially
/// matches.
pub fn compare<IO: BlockIO + ?Sized>(io: &mut IO, meta: &FatMeta) -> FsCheckResult<bool> {
    if meta.num_fats < 2 {
        return Ok(false);
    }

    let bps = meta.bytes_per_sector as usize;
    let mut primary = vec![0u8; bps];
    let mut secondary = vec![0u8; bps];

    for sector in 0..meta.fat_size_sectors as u64 {
        let first = meta.fat_start_sector(0) + sector;
        let second = meta.fat_start_sector(1) + sector;
        io.read_at(meta.sector_offset(first), &mut primary)?;
        io.read_at(meta.sector_offset(second), &mut secondary)?;
        if primary != secondary {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Copies every sector of the primary table over the secondary.
fn overwrite_secondary<IO: BlockIO + ?Sized>(io: &mut IO, meta: &FatMeta) -> FsCheckResult<()> {
    let bps = meta.bytes_per_sector as usize;
    let mut sector_buf = vec![0u8; bps];

    for sector in 0..meta.fat_size_sectors as u64 {
        let first = meta.fat_start_sector(0) + sector;
        let second = meta.fat_start_sector(1) + sector;
        io.read_at(meta.sector_offset(first), &mut sector_buf)?;
        io.write_at(meta.sector_offset(second), &sector_buf)?;
    }
    io.flush()?;
    Ok(())
}

/// Fix-mode mirror check: on mismatch, resynchronize the secondary from
/// the primary and log one mismatch message.
pub fn run_fix<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    log: &mut ReportLog,
    mode: CheckMode,
) -> FsCheckResult<()> {
    debug_assert!(mode.fixing());
    log.clear_records();

    if !compare(io, meta)? {
        return Ok(());
    }

    log.start_test_case(TestCase::FatTables);
    overwrite_secondary(io, meta)?;
    log.write_message(io, meta, LogId::FatTableMismatch.message(), 1)?;
    log.end_test_case(io, meta)?;
    Ok(())
}
