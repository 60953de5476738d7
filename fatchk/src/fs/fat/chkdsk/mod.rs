// SPDX-License-Identifier: MIT

//! Check-disk engine for FAT12/16/32 volumes.
//!
//! One entry point runs the requested subset of checks in a fixed order:
//! table-mirror compare, directory records, cross-linked chains, lost
//! cluster chains, file sizes. Each check resets the shared log record
//! table and writes its findings into the on-volume report log before the
//! next check starts.

pub mod chains;
pub mod classify;
pub mod log;
pub mod mirror;
pub mod normalize;
pub mod records;
pub mod salvage;
pub mod sizes;
pub mod walker;

use fatio::prelude::*;

use crate::core::checker::{CheckMode, SessionGuard, WaitMode};
use crate::core::errors::*;
use crate::fs::fat::constant::DEFAULT_LOG_FILE;
use crate::fs::fat::meta::FatMeta;

use log::ReportLog;

bitflags::bitflags! {
    /// Which checks to run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CheckFlags: u8 {
        const FAT_MIRROR  = 1 << 0;
        const DIR_RECORDS = 1 << 1;
        const CROSS_LINKS = 1 << 2;
        const LOST_CHAINS = 1 << 3;
        const FILE_SIZES  = 1 << 4;
        const ALL         = 0x1F;
    }
}

/// Check-session configuration.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub flags: CheckFlags,
    pub mode: CheckMode,
    pub wait: WaitMode,
    /// Salvage lost and cross-linked directories as plain files. Directory
    /// salvage is gated behind this policy switch.
    pub files_only_salvage: bool,
    pub log_file_name: &'static str,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            flags: CheckFlags::ALL,
            mode: CheckMode::ReportOnly,
            wait: WaitMode::Wait,
            files_only_salvage: true,
            log_file_name: DEFAULT_LOG_FILE,
        }
    }
}

/// Terminal status of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// No findings; no log file left behind.
    Clean,
    /// Findings exist; see the on-volume log file.
    LogCreated,
    /// Report-only mirror check found differing table copies; nothing was
    /// written, including the log.
    TablesDiffer,
}

/// Checks `meta`'s volume for the issues selected by `flags`.
pub fn check_disk<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    flags: CheckFlags,
    mode: CheckMode,
) -> FsCheckResult<CheckOutcome> {
    check_disk_with(
        io,
        meta,
        &CheckOptions {
            flags,
            mode,
            ..CheckOptions::default()
        },
    )
}

/// Full-option entry point.
pub fn check_disk_with<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    opts: &CheckOptions,
) -> FsCheckResult<CheckOutcome> {
    crate::ensure!(!opts.flags.is_empty(), FsCheckError::Invalid("no checks requested"));
    crate::ensure!(meta.cluster_count > 0, FsCheckError::Invalid("empty volume"));
    crate::ensure!(
        meta.bytes_per_sector >= 512 && meta.sectors_per_cluster > 0,
        FsCheckError::Invalid("bad volume geometry")
    );

    let _guard = SessionGuard::acquire(opts.wait).ok_or(FsCheckError::Busy)?;

    let flags = opts.flags;
    let mode = opts.mode;
    let mut log = ReportLog::new();

    if flags.contains(CheckFlags::FAT_MIRROR) {
        if mode.fixing() {
            // The log can be created up front: a mismatch will be repaired
            // from the primary before anything else reads the table.
            log.start(io, meta, opts.log_file_name)?;
            mirror::run_fix(io, meta, &mut log, mode)?;
        } else {
            // Report-only: a mismatch means the table cannot be trusted to
            // host the log file; return without creating it.
            if mirror::compare(io, meta)? {
                return Ok(CheckOutcome::TablesDiffer);
            }
            log.start(io, meta, opts.log_file_name)?;
        }
        log.flush(io, meta)?;
    } else {
        log.start(io, meta, opts.log_file_name)?;
    }

    let mut result: FsCheckResult<()> = Ok(());

    if result.is_ok() && flags.contains(CheckFlags::DIR_RECORDS) {
        result = records::run(io, meta, &mut log, mode);
    }

    if result.is_ok() && flags.contains(CheckFlags::CROSS_LINKS) {
        result = demand_dir_records(
            chains::run_cross(io, meta, &mut log, mode, opts.files_only_salvage),
            flags,
            mode,
        );
    }

    if result.is_ok() && flags.contains(CheckFlags::LOST_CHAINS) {
        result = chains::run_lost(io, meta, &mut log, mode, opts.files_only_salvage);
    }

    if result.is_ok() && flags.contains(CheckFlags::FILE_SIZES) {
        result = demand_dir_records(sizes::run(io, meta, &mut log, mode), flags, mode);
    }

    // Close the logger even on failure; flushed findings stay valid.
    let closed = log.stop(io, meta);
    result?;
    closed?;

    if log.file_size() == 0 {
        log.delete(io, meta)?;
        Ok(CheckOutcome::Clean)
    } else {
        Ok(CheckOutcome::LogCreated)
    }
}

/// Invalid cluster values met by the cross-link and file-size checks are
/// expected to have been normalized by the directory-record check. When
/// that check ran in the same report-only invocation the findings are
/// already logged and the error is dropped; when it was not requested at
/// all, surface the distinguishing status so the caller knows to request
/// it.
fn demand_dir_records(
    result: FsCheckResult<()>,
    flags: CheckFlags,
    mode: CheckMode,
) -> FsCheckResult<()> {
    let ddr = flags.contains(CheckFlags::DIR_RECORDS);
    match result {
        Err(FsCheckError::Chain(FsChainError::Defective(_) | FsChainError::Invalid(_)))
        | Err(FsCheckError::InvalidCluster)
            if ddr && mode == CheckMode::ReportOnly =>
        {
            Ok(())
        }
        Err(FsCheckError::Chain(FsChainError::Defective(_) | FsChainError::Invalid(_))) if !ddr => {
            Err(FsCheckError::InvalidCluster)
        }
        other => other,
    }
}
