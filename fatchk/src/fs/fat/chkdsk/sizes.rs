// SPDX-License-Identifier: MIT

//! File-size reconciliation.
//!
//! Two sizes are derived per file: the whole-cluster extent of its chain,
//! and an exact byte size found by scanning the last cluster for the first
//! run of zero bytes. The scan assumes no valid data follows the first
//! zero; that monotonicity assumption is inherited, documented behavior.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use fatio::prelude::*;

use crate::core::checker::CheckMode;
use crate::core::errors::*;
use crate::fs::fat::chkdsk::classify;
use crate::fs::fat::chkdsk::log::{LogId, ReportLog, TestCase};
use crate::fs::fat::chkdsk::salvage;
use crate::fs::fat::chkdsk::walker::{DirRecord, RecordVisitor, Visit, traverse};
use crate::fs::fat::constant::*;
use crate::fs::fat::meta::FatMeta;
use crate::fs::fat::table::{self, Link};
use crate::fs::fat::utils;

/// Driver for the file-size check.
pub fn run<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    log: &mut ReportLog,
    mode: CheckMode,
) -> FsCheckResult<()> {
    log.start_test_case(TestCase::FileSizes);
    log.clear_records();

    let mut visitor = FileSizeCheck {
        log: &mut *log,
        mode,
        folder: None,
    };
    traverse(io, meta, &mut visitor, true, false)?;

    if !log.is_zero(LogId::FilesLess) || !log.is_zero(LogId::FilesGreater) {
        log.write_record(io, meta, LogId::FileLengths)?;
        if log.count(LogId::FilesGreater) > 0 {
            log.write_record(io, meta, LogId::FilesGreater)?;
        }
        if log.count(LogId::FilesLess) > 0 {
            log.write_record(io, meta, LogId::FilesLess)?;
        }
        log.end_test_case(io, meta)?;
    }
    Ok(())
}

/// Whole-cluster extent of the chain starting at `start`.
pub fn size_on_disk<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    start: u32,
) -> FsChainResult<u64> {
    let mut size = 0u64;
    let mut current = start;
    let mut followed = 0u32;
    loop {
        followed += 1;
        if followed > meta.cluster_count {
            return Err(FsChainError::LoopDetected);
        }
        size += meta.bytes_per_cluster as u64;
        match table::read_link(io, meta, current)? {
            Link::Next(next) => current = next,
            Link::EndOfChain => break,
            Link::Bad => return Err(FsChainError::Defective(current)),
            Link::Free => return Err(FsChainError::Invalid(0)),
            Link::Invalid(v) => return Err(FsChainError::Invalid(v)),
        }
    }
    Ok(size)
}

/// Exact byte size of the data reachable from `start`: full clusters up to
/// the last one, then a binary search over that cluster's sectors for the
/// first sector opening with a zero byte, then a binary search inside the
/// preceding sector for the first zero run.
pub fn exact_size<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    start: u32,
) -> FsCheckResult<u64> {
    let mut last = start;
    let mut full_clusters = 0u64;
    let mut followed = 0u32;
    loop {
        followed += 1;
        if followed > meta.cluster_count {
            return Err(FsChainError::LoopDetected.into());
        }
        match table::read_link(io, meta, last)? {
            Link::Next(next) => {
                full_clusters += 1;
                last = next;
            }
            Link::EndOfChain => break,
            Link::Bad => return Err(FsChainError::Defective(last).into()),
            Link::Free => return Err(FsChainError::Invalid(0).into()),
            Link::Invalid(v) => return Err(FsChainError::Invalid(v).into()),
        }
    }

    let base = full_clusters * meta.bytes_per_cluster as u64;
    let bps = meta.bytes_per_sector as usize;
    let spc = meta.sectors_per_cluster as u64;
    let first_sector = meta.cluster_to_sector(last);

    // First sector whose opening byte is zero; `spc` when every sector
    // holds data.
    let mut lo = 0u64;
    let mut hi = spc;
    let mut byte0 = [0u8; 1];
    while lo < hi {
        let mid = (lo + hi) / 2;
        io.read_at(meta.sector_offset(first_sector + mid), &mut byte0)?;
        if byte0[0] == 0 {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }

    if lo == 0 {
        return Ok(base);
    }

    let mut sector_buf = vec![0u8; bps];
    io.read_at(meta.sector_offset(first_sector + lo - 1), &mut sector_buf)?;
    if sector_buf[bps - 1] != 0 {
        // Boundary sector is full; data ends exactly on it.
        return Ok(base + lo * bps as u64);
    }

    let end = find_end_of_data(&sector_buf);
    Ok(base + (lo - 1) * bps as u64 + end as u64)
}

/// Offset of the first zero run in a sector whose first byte holds data
/// and whose last byte is zero.
fn find_end_of_data(sector: &[u8]) -> usize {
    let mut lo = 0usize;
    let mut hi = sector.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if sector[mid] == 0 {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

struct FileSizeCheck<'l> {
    log: &'l mut ReportLog,
    mode: CheckMode,
    /// Recovery folder for excess-data salvage, created on first use.
    folder: Option<u32>,
}

impl<'l, IO: BlockIO + ?Sized> RecordVisitor<IO> for FileSizeCheck<'l> {
    fn visit(&mut self, io: &mut IO, meta: &FatMeta, record: &DirRecord) -> FsCheckResult<Visit> {
        if record.entry.is_dir() {
            return Ok(Visit::Clean);
        }
        let start = record.entry.first_cluster(meta.kind);
        if !classify::is_valid_link_target(meta, start) {
            return Ok(Visit::Clean);
        }

        let declared = record.entry.file_size as u64;
        let disk = size_on_disk(io, meta, start)?;
        let bpc = meta.bytes_per_cluster as u64;

        if declared > disk {
            // Declared size larger than the chain can hold: shrink it to
            // the exact data size.
            let exact = exact_size(io, meta, start)?;
            if declared > exact {
                self.log.add(LogId::FilesLess);
                if self.mode.fixing() {
                    let mut entry = record.entry;
                    entry.file_size = exact as u32;
                    salvage::rewrite_record_at(io, meta, &record.location, &entry)?;
                    return Ok(Visit::DiskChanged);
                }
            }
            return Ok(Visit::Clean);
        }

        let kept_clusters = (declared.div_ceil(bpc)).max(1);
        if disk <= kept_clusters * bpc {
            return Ok(Visit::Clean);
        }

        // The chain extends past the declared size: cut it at the cluster
        // boundary and salvage the excess.
        self.log.add(LogId::FilesGreater);
        if !self.mode.fixing() {
            return Ok(Visit::Clean);
        }

        let mut last_kept = start;
        for _ in 1..kept_clusters {
            match table::read_link(io, meta, last_kept)? {
                Link::Next(next) => last_kept = next,
                _ => return Ok(Visit::Clean),
            }
        }
        let excess_head = match table::read_link(io, meta, last_kept)? {
            Link::Next(next) => next,
            _ => return Ok(Visit::Clean),
        };

        if self.folder.is_none() {
            self.folder = Some(
                salvage::make_recovery_dir(io, meta, FILE_LEN_FOLDER)
                    .map_err(FsCheckError::Salvage)?,
            );
        }
        let folder = self.folder.unwrap_or(0);

        let excess = disk - kept_clusters * bpc;
        let name = utils::sequenced_name(
            FILE_LEN_FILE_PREFIX,
            self.log.count(LogId::FilesGreater),
            RECOVERY_EXTENSION,
        );
        salvage::create_salvage_entry(io, meta, folder, name, true, excess_head, excess as u32)
            .map_err(FsCheckError::Salvage)?;

        table::write_eoc(io, meta, last_kept)?;
        table::flush(io)?;

        Ok(Visit::DiskChanged)
    }
}
